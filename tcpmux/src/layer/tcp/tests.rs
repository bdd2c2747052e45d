use core::result::Result;
use std::collections::BTreeMap;

use crate::engine::{
    Callback, Callbacks, ConnectionId, Engine, ErrorCode, Event, Frame, Handle, HandleInfo,
    InterfaceId, State,
};
use crate::layer::{Error, Fault};
use crate::time::{Duration, Expiration, Instant};
use crate::wire::{
    CrcMode, IpAddress, IpProtocol, Segment, TcpFlags, TcpPacket, TcpRepr, TcpSeqNumber,
};

use super::*;

const LOCAL: IpAddress = IpAddress::v4(10, 0, 0, 1);
const REMOTE: IpAddress = IpAddress::v4(10, 0, 0, 2);
const ID: ConnectionId = ConnectionId(1);
const IFACE: InterfaceId = InterfaceId(0);

/// A handle of the scripted engine.
struct Pcb {
    arg: Option<ConnectionId>,
    info: HandleInfo,
    written: Vec<u8>,
    consumed: usize,
}

/// An engine that only moves when told to.
///
/// Actions record what they were asked to do, events are raised by the test through the helpers
/// below.
#[derive(Default)]
struct Scripted {
    handles: BTreeMap<Handle, Pcb>,
    next_handle: u32,
    next_port: u16,
    /// Send buffer of new handles.
    room: usize,
    /// Refuse this many writes with `Memory`.
    refuse_writes: usize,
    fail_connect: Option<ErrorCode>,
    /// Transmit every write and have it acknowledged before `write` returns.
    echo_writes: bool,
    /// Reset the connection from inside the next write.
    reset_on_write: bool,
    /// Refuse to close handles.
    refuse_close: bool,
    inputs: Vec<Segment>,
    fast_ticks: usize,
    slow_ticks: usize,
    busy: bool,
}

#[derive(Default)]
struct Recorder {
    indications: Vec<Indication>,
    outbound: Vec<Outbound>,
    schedules: Vec<Instant>,
    next_id: u64,
    cancelled: bool,
}

type TestBridge = Bridge<Scripted, Recorder>;

impl Scripted {
    fn new() -> Self {
        Scripted {
            room: 1 << 16,
            next_port: 49152,
            ..Scripted::default()
        }
    }

    fn pcb(&mut self, handle: Handle) -> &mut Pcb {
        self.handles.get_mut(&handle).expect("No such handle")
    }

    fn set_state(&mut self, handle: Handle, state: State) {
        self.pcb(handle).info.state = state;
    }

    /// The peer acknowledged `len` octets, freeing send buffer.
    fn ack(&mut self, handle: Handle, len: usize) {
        self.pcb(handle).info.send_buffer += len;
    }

    fn written(&self, handle: Handle) -> &[u8] {
        &self.handles[&handle].written
    }

    /// Transmit freshly written data and take the peer's acknowledgement, all synchronously.
    fn echo(&mut self, handle: Handle, data: &[u8], cb: &mut dyn Callbacks) {
        let pcb = self.pcb(handle);
        let (arg, info) = (pcb.arg, pcb.info);
        let repr = TcpRepr {
            src_port: info.local_port,
            dst_port: info.remote_port,
            flags: ack(),
            seq_number: info.send_next,
            ack_number: Some(info.recv_next),
            window_len: 1024,
            window_scale: None,
            max_seg_size: None,
            sack_permitted: false,
            payload_len: 0,
        };
        let bytes = Segment::from_repr(repr, data)
            .and_then(|segment| segment.emit(info.local, info.remote))
            .expect("Unencodable segment");

        let pcb = self.pcb(handle);
        pcb.info.send_next += data.len();
        pcb.info.send_buffer += data.len();
        cb.output(arg, info.local, info.remote, &bytes);
        cb.event(self, Callback { arg, handle, event: Event::Sent(data.len()) });
    }

    fn fresh(&mut self) -> Handle {
        self.next_handle += 1;
        let handle = Handle(self.next_handle);
        let info = HandleInfo {
            state: State::Closed,
            local: IpAddress::Unspecified,
            local_port: 0,
            remote: IpAddress::Unspecified,
            remote_port: 0,
            send_mss: 536,
            send_unacked: TcpSeqNumber(0),
            send_next: TcpSeqNumber(0),
            send_window: 0,
            send_buffer: self.room,
            recv_next: TcpSeqNumber(0),
            recv_window: 4096,
        };
        self.handles.insert(handle, Pcb { arg: None, info, written: Vec::new(), consumed: 0 });
        handle
    }
}

impl Engine for Scripted {
    fn create(&mut self) -> Result<Handle, ErrorCode> {
        Ok(self.fresh())
    }

    fn set_arg(&mut self, handle: Handle, arg: Option<ConnectionId>) {
        if let Some(pcb) = self.handles.get_mut(&handle) {
            pcb.arg = arg;
        }
    }

    fn info(&self, handle: Handle) -> Option<HandleInfo> {
        self.handles.get(&handle).map(|pcb| pcb.info)
    }

    fn bind(&mut self, handle: Handle, addr: IpAddress, port: u16) -> Result<(), ErrorCode> {
        let port = if port == 0 {
            self.next_port += 1;
            self.next_port
        } else {
            port
        };
        let pcb = self.handles.get_mut(&handle).ok_or(ErrorCode::Argument)?;
        pcb.info.local = addr;
        pcb.info.local_port = port;
        Ok(())
    }

    fn set_local_addr(&mut self, handle: Handle, addr: IpAddress) {
        if let Some(pcb) = self.handles.get_mut(&handle) {
            pcb.info.local = addr;
        }
    }

    fn connect(&mut self, handle: Handle, addr: IpAddress, port: u16, _: &mut dyn Callbacks)
        -> Result<(), ErrorCode>
    {
        if let Some(code) = self.fail_connect {
            return Err(code);
        }
        let pcb = self.handles.get_mut(&handle).ok_or(ErrorCode::Argument)?;
        pcb.info.remote = addr;
        pcb.info.remote_port = port;
        pcb.info.state = State::SynSent;
        Ok(())
    }

    fn listen(&mut self, handle: Handle) -> Result<Handle, ErrorCode> {
        let old = self.handles.remove(&handle).ok_or(ErrorCode::Argument)?;
        let listening = self.fresh();
        let pcb = self.pcb(listening);
        pcb.arg = old.arg;
        pcb.info.local = old.info.local;
        pcb.info.local_port = old.info.local_port;
        pcb.info.state = State::Listen;
        Ok(listening)
    }

    fn write(&mut self, handle: Handle, data: &[u8], cb: &mut dyn Callbacks)
        -> Result<(), ErrorCode>
    {
        if self.refuse_writes > 0 {
            self.refuse_writes -= 1;
            return Err(ErrorCode::Memory);
        }
        if self.reset_on_write {
            let pcb = self.handles.remove(&handle).ok_or(ErrorCode::Argument)?;
            cb.event(self, Callback { arg: pcb.arg, handle, event: Event::Err(ErrorCode::Reset) });
            return Err(ErrorCode::Reset);
        }
        let pcb = self.handles.get_mut(&handle).ok_or(ErrorCode::Argument)?;
        if data.len() > pcb.info.send_buffer {
            return Err(ErrorCode::Memory);
        }
        pcb.info.send_buffer -= data.len();
        pcb.written.extend_from_slice(data);
        if self.echo_writes {
            self.echo(handle, data, cb);
        }
        Ok(())
    }

    fn output(&mut self, handle: Handle, _: &mut dyn Callbacks) -> Result<(), ErrorCode> {
        self.handles.get(&handle).map(|_| ()).ok_or(ErrorCode::Argument)
    }

    fn recved(&mut self, handle: Handle, len: usize) {
        if let Some(pcb) = self.handles.get_mut(&handle) {
            pcb.consumed += len;
        }
    }

    fn close(&mut self, handle: Handle, _: &mut dyn Callbacks) -> Result<(), ErrorCode> {
        if self.refuse_close {
            return Err(ErrorCode::Memory);
        }
        let pcb = self.handles.get_mut(&handle).ok_or(ErrorCode::Argument)?;
        match pcb.info.state {
            State::Established | State::SynRcvd => pcb.info.state = State::FinWait1,
            State::CloseWait => pcb.info.state = State::LastAck,
            _ => { self.handles.remove(&handle); },
        }
        Ok(())
    }

    fn abort(&mut self, handle: Handle, cb: &mut dyn Callbacks) {
        if let Some(pcb) = self.handles.remove(&handle) {
            cb.event(self, Callback {
                arg: pcb.arg,
                handle,
                event: Event::Err(ErrorCode::Aborted),
            });
        }
    }

    fn input(&mut self, frame: &Frame, cb: &mut dyn Callbacks) {
        let repr = *frame.segment.repr();
        self.inputs.push(frame.segment.clone());
        let arg = self.handles.values()
            .find(|pcb| pcb.info.local_port == repr.dst_port
                && pcb.info.remote_port == repr.src_port
                && pcb.info.remote == frame.src_addr)
            .and_then(|pcb| pcb.arg);
        cb.segment_arrived(frame, arg, repr.seq_number, usize::from(repr.payload_len));
    }

    fn tick_fast(&mut self, _: &mut dyn Callbacks) {
        self.fast_ticks += 1;
    }

    fn tick_slow(&mut self, _: &mut dyn Callbacks) {
        self.slow_ticks += 1;
    }

    fn is_busy(&self) -> bool {
        self.busy
    }
}

impl Host for Recorder {
    fn indicate(&mut self, indication: Indication) {
        self.indications.push(indication);
    }

    fn transmit(&mut self, outbound: Outbound) {
        self.outbound.push(outbound);
    }

    fn allocate_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(1000 + self.next_id)
    }

    fn schedule(&mut self, at: Instant) {
        self.schedules.push(at);
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

fn bridge() -> TestBridge {
    Bridge::new(Scripted::new(), Recorder::default())
}

fn at(millis: i64) -> Instant {
    Instant::from_millis(millis)
}

fn command(bridge: &mut TestBridge, id: ConnectionId, command: Command) -> crate::layer::Result<()> {
    bridge.handle_command(at(0), Request::new(id, command))
}

fn handle_of(bridge: &TestBridge, id: ConnectionId) -> Handle {
    bridge.core.endpoint.get(id)
        .and_then(|conn| conn.handle)
        .expect("Connection without handle")
}

fn indications(bridge: &TestBridge) -> &[Indication] {
    &bridge.host().indications
}

/// Raise an event on a handle, as the engine would.
fn signal(bridge: &mut TestBridge, handle: Handle, event: Event) {
    let Bridge { engine, core } = bridge;
    let arg = engine.handles.get(&handle).and_then(|pcb| pcb.arg);
    core.event(engine, Callback { arg, handle, event });
}

/// Release a handle with an error, as the engine does on reset and timeout.
fn fail_handle(bridge: &mut TestBridge, handle: Handle, code: ErrorCode) {
    let Bridge { engine, core } = bridge;
    let pcb = engine.handles.remove(&handle).expect("No such handle");
    core.event(engine, Callback { arg: pcb.arg, handle, event: Event::Err(code) });
}

/// Release a handle after a completed close.
fn free_handle(bridge: &mut TestBridge, handle: Handle) {
    let Bridge { engine, core } = bridge;
    let pcb = engine.handles.remove(&handle).expect("No such handle");
    core.freed(pcb.arg, handle);
}

/// A listener accepts a request from `remote_port` of the remote host.
fn accept_on(bridge: &mut TestBridge, listener: Handle, remote_port: u16) -> Handle {
    let Bridge { engine, core } = bridge;
    let (arg, local, local_port) = {
        let pcb = engine.pcb(listener);
        (pcb.arg, pcb.info.local, pcb.info.local_port)
    };
    let forked = engine.fresh();
    let info = &mut engine.pcb(forked).info;
    info.state = State::Established;
    info.local = local;
    info.local_port = local_port;
    info.remote = REMOTE;
    info.remote_port = remote_port;
    core.event(engine, Callback { arg, handle: forked, event: Event::Accept });
    forked
}

/// An active open that completed its handshake.
fn established(bridge: &mut TestBridge, id: ConnectionId, mode: TransferMode) -> Handle {
    let open = Open::active(REMOTE, 80).local(LOCAL, 4000).with_mode(mode);
    command(bridge, id, Command::OpenActive(open)).unwrap();
    let handle = handle_of(bridge, id);
    bridge.engine.set_state(handle, State::Established);
    signal(bridge, handle, Event::Connected);
    handle
}

fn segment_bytes(src_port: u16, dst_port: u16, flags: TcpFlags, payload: &[u8]) -> Vec<u8> {
    let repr = TcpRepr {
        src_port,
        dst_port,
        flags,
        seq_number: TcpSeqNumber(0x1000),
        ack_number: if flags.ack() { Some(TcpSeqNumber(0x2000)) } else { None },
        window_len: 1024,
        window_scale: None,
        max_seg_size: None,
        sack_permitted: false,
        payload_len: 0,
    };
    Segment::from_repr(repr, payload).unwrap()
        .emit(REMOTE, LOCAL).unwrap()
}

fn syn() -> TcpFlags {
    let mut flags = TcpFlags::default();
    flags.set_syn(true);
    flags
}

fn syn_ack() -> TcpFlags {
    let mut flags = syn();
    flags.set_ack(true);
    flags
}

fn ack() -> TcpFlags {
    let mut flags = TcpFlags::default();
    flags.set_ack(true);
    flags
}

#[test]
fn active_open_indicates_established_once() {
    let mut bridge = bridge();
    let open = Open::active(REMOTE, 80).local(LOCAL, 4000);
    command(&mut bridge, ID, Command::OpenActive(open)).unwrap();

    let handle = handle_of(&bridge, ID);
    assert_eq!(bridge.engine().info(handle).map(|info| info.state), Some(State::SynSent));
    assert!(indications(&bridge).is_empty());

    bridge.engine.set_state(handle, State::Established);
    signal(&mut bridge, handle, Event::Connected);
    signal(&mut bridge, handle, Event::Poll);

    let tuple = FourTuple {
        local: LOCAL,
        local_port: 4000,
        remote: REMOTE,
        remote_port: 80,
    };
    assert_eq!(indications(&bridge), [Indication::Established { id: ID, tuple }]);
}

#[test]
fn open_requires_endpoints() {
    let mut bridge = bridge();
    assert_eq!(
        command(&mut bridge, ID, Command::OpenActive(Open::passive(80))),
        Err(Error::Unspecified("remote address and port")));
    assert_eq!(
        command(&mut bridge, ID, Command::OpenPassive(Open::default())),
        Err(Error::Unspecified("local port")));
    assert_eq!(bridge.connection_count(), 0);
    assert!(bridge.engine().handles.is_empty());
}

#[test]
fn open_twice_is_rejected() {
    let mut bridge = bridge();
    established(&mut bridge, ID, TransferMode::ByteStream);
    let open = Open::active(REMOTE, 81);
    assert_eq!(command(&mut bridge, ID, Command::OpenActive(open)), Err(Error::AlreadyOpen(ID)));
    assert_eq!(bridge.connection_count(), 1);
}

#[test]
fn failed_connect_is_forgotten() {
    let mut bridge = bridge();
    bridge.engine.fail_connect = Some(ErrorCode::Route);
    let open = Open::active(REMOTE, 80);
    assert_eq!(command(&mut bridge, ID, Command::OpenActive(open)), Err(Error::Engine(ErrorCode::Route)));
    assert_eq!(bridge.connection_count(), 0);
    // The handle was handed back.
    assert!(bridge.engine().handles.is_empty());

    // And the identifier can be used again.
    bridge.engine.fail_connect = None;
    command(&mut bridge, ID, Command::OpenActive(open)).unwrap();
    assert_eq!(bridge.connection_count(), 1);
}

#[test]
fn commands_need_a_connection() {
    let mut bridge = bridge();
    assert_eq!(command(&mut bridge, ID, Command::Close), Err(Error::UnknownConnection(ID)));
    assert_eq!(command(&mut bridge, ID, Command::Status), Err(Error::UnknownConnection(ID)));
    assert_eq!(
        command(&mut bridge, ID, Command::Send(Payload::Bytes(vec![1]))),
        Err(Error::UnknownConnection(ID)));
}

#[test]
fn accept_releases_held_data() {
    let mut bridge = bridge();
    let open = Open::passive(80).local(LOCAL, 80);
    command(&mut bridge, ID, Command::OpenPassive(open)).unwrap();
    let listener = handle_of(&bridge, ID);
    assert_eq!(bridge.engine().info(listener).map(|info| info.state), Some(State::Listen));

    let forked = accept_on(&mut bridge, listener, 5555);
    let new_id = ConnectionId(1001);
    let tuple = FourTuple {
        local: LOCAL,
        local_port: 80,
        remote: REMOTE,
        remote_port: 5555,
    };
    assert_eq!(indications(&bridge), [Indication::Available { listener: ID, id: new_id, tuple }]);

    // Nothing reaches the application before it accepts.
    signal(&mut bridge, forked, Event::Recv(Some(b"early")));
    signal(&mut bridge, forked, Event::Recv(None));
    assert_eq!(indications(&bridge).len(), 1);
    assert_eq!(bridge.engine.pcb(forked).consumed, 5);

    command(&mut bridge, new_id, Command::Accept).unwrap();
    assert_eq!(indications(&bridge)[1..], [
        Indication::Established { id: new_id, tuple },
        Indication::Data { id: new_id, payload: Payload::Bytes(b"early".to_vec()) },
        Indication::PeerClosed { id: new_id },
    ]);

    // A second accept changes nothing.
    command(&mut bridge, new_id, Command::Accept).unwrap();
    assert_eq!(indications(&bridge).len(), 4);
    // The listener is still there.
    assert_eq!(bridge.connection_count(), 2);
}

#[test]
fn time_wait_before_accept_is_held() {
    let mut bridge = bridge();
    let open = Open::passive(80).local(LOCAL, 80);
    command(&mut bridge, ID, Command::OpenPassive(open)).unwrap();
    let listener = handle_of(&bridge, ID);
    let forked = accept_on(&mut bridge, listener, 5555);
    let new_id = ConnectionId(1001);

    signal(&mut bridge, forked, Event::Recv(Some(b"bye")));
    bridge.engine.set_state(forked, State::TimeWait);
    signal(&mut bridge, forked, Event::Recv(None));
    assert_eq!(indications(&bridge).len(), 1);

    command(&mut bridge, new_id, Command::Accept).unwrap();
    let tuple = bridge.status(new_id).map(|status| status.tuple).unwrap();
    assert_eq!(indications(&bridge)[1..], [
        Indication::Established { id: new_id, tuple },
        Indication::Data { id: new_id, payload: Payload::Bytes(b"bye".to_vec()) },
        Indication::Closed { id: new_id },
    ]);
}

#[test]
fn accept_on_non_listener_is_fault() {
    let mut bridge = bridge();
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);
    accept_on(&mut bridge, handle, 5555);
    assert_eq!(bridge.fault(), Some(Fault::NotListening(ID)));
    assert_eq!(
        command(&mut bridge, ID, Command::Status),
        Err(Error::Internal(Fault::NotListening(ID))));
}

#[test]
fn duplicate_allocated_id_is_fault() {
    let mut bridge = bridge();
    let taken = ConnectionId(1001);
    established(&mut bridge, taken, TransferMode::ByteStream);
    command(&mut bridge, ID, Command::OpenPassive(Open::passive(80))).unwrap();
    let listener = handle_of(&bridge, ID);
    accept_on(&mut bridge, listener, 5555);
    assert_eq!(bridge.fault(), Some(Fault::DuplicateId(taken)));
}

#[test]
fn peer_close_or_close_in_time_wait() {
    let mut bridge = bridge();
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);
    bridge.engine.set_state(handle, State::CloseWait);
    signal(&mut bridge, handle, Event::Recv(None));
    assert_eq!(indications(&bridge).last(), Some(&Indication::PeerClosed { id: ID }));

    let other = ConnectionId(2);
    let handle = established(&mut bridge, other, TransferMode::ByteStream);
    bridge.engine.set_state(handle, State::TimeWait);
    signal(&mut bridge, handle, Event::Recv(None));
    assert_eq!(indications(&bridge).last(), Some(&Indication::Closed { id: other }));
}

#[test]
fn send_writes_every_octet_once() {
    let mut bridge = bridge();
    bridge.engine.room = 1000;
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);

    let data: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
    bridge.engine.refuse_writes = 1;
    command(&mut bridge, ID, Command::Send(Payload::Bytes(data.clone()))).unwrap();
    assert!(bridge.engine().written(handle).is_empty());
    assert_eq!(bridge.status(ID).map(|status| status.send_queued), Some(2500));

    signal(&mut bridge, handle, Event::Poll);
    assert_eq!(bridge.engine().written(handle).len(), 1000);

    bridge.engine.ack(handle, 1000);
    signal(&mut bridge, handle, Event::Sent(1000));
    assert_eq!(bridge.engine().written(handle).len(), 2000);

    bridge.engine.ack(handle, 1000);
    signal(&mut bridge, handle, Event::Sent(1000));
    assert_eq!(bridge.engine().written(handle), &data[..]);
    assert_eq!(bridge.status(ID).map(|status| status.send_queued), Some(0));
}

#[test]
fn reentrant_writes_transmit_every_octet_once() {
    let mut bridge = bridge();
    bridge.engine.room = 300;
    bridge.engine.echo_writes = true;
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);

    let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
    command(&mut bridge, ID, Command::Send(Payload::Bytes(data.clone()))).unwrap();

    let outbound = &bridge.host().outbound;
    assert_eq!(outbound.len(), 9);
    let transmitted: Vec<u8> = outbound.iter()
        .flat_map(|outbound| outbound.segment.payload().iter().copied())
        .collect();
    assert_eq!(transmitted, data);
    assert_eq!(bridge.engine().written(handle), &data[..]);

    let status = bridge.status(ID).unwrap();
    assert_eq!(status.send_queued, 0);
    assert_eq!(status.stats.segments_sent, 9);
    assert_eq!(status.stats.octets_sent, 2500);
    assert_eq!(bridge.fault(), None);
}

#[test]
fn reset_inside_write_ends_flush() {
    let mut bridge = bridge();
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);
    bridge.engine.reset_on_write = true;

    command(&mut bridge, ID, Command::Send(Payload::Bytes(b"doomed".to_vec()))).unwrap();
    assert_eq!(indications(&bridge).last(), Some(&Indication::ConnectionReset { id: ID }));
    assert!(!indications(&bridge).contains(&Indication::Closed { id: ID }));
    assert_eq!(bridge.connection_count(), 0);
    assert!(bridge.engine().info(handle).is_none());
    assert_eq!(bridge.fault(), None);
}

#[test]
fn refused_release_leaves_handle_detached() {
    let mut bridge = bridge();
    bridge.engine.fail_connect = Some(ErrorCode::Route);
    bridge.engine.refuse_close = true;
    let open = Open::active(REMOTE, 80);
    assert_eq!(command(&mut bridge, ID, Command::OpenActive(open)), Err(Error::Engine(ErrorCode::Route)));
    // The engine kept the handle, detached from any connection.
    assert_eq!(bridge.engine().handles.len(), 1);
    assert!(bridge.engine().handles.values().all(|pcb| pcb.arg.is_none()));
    assert_eq!(bridge.connection_count(), 0);
    assert_eq!(bridge.fault(), None);
}

#[test]
fn send_is_chunked() {
    let config = Config::default().write_chunk(100);
    let mut bridge = Bridge::with_config(Scripted::new(), Recorder::default(), config).unwrap();
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);
    command(&mut bridge, ID, Command::Send(Payload::Bytes(vec![7; 250]))).unwrap();
    assert_eq!(bridge.engine().written(handle), &[7; 250][..]);
}

#[test]
fn declared_incorrect_is_dropped() {
    let mut bridge = bridge();
    let bytes = segment_bytes(5555, 80, syn(), &[]);
    bridge.handle_segment(at(0), &bytes, REMOTE, LOCAL, IFACE, CrcMode::DeclaredIncorrect).unwrap();
    assert!(bridge.engine().inputs.is_empty());
}

#[test]
fn declared_correct_is_recomputed() {
    let mut bridge = bridge();
    let mut bytes = segment_bytes(5555, 80, syn(), &[]);
    bytes[16] ^= 0xff;
    bridge.handle_segment(at(0), &bytes, REMOTE, LOCAL, IFACE, CrcMode::DeclaredCorrect).unwrap();

    let inputs = &bridge.engine().inputs;
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].crc_mode(), CrcMode::Computed);
    let packet = TcpPacket::new_unchecked(inputs[0].as_bytes());
    assert_eq!(packet.verify_checksum(REMOTE, LOCAL), Ok(true));
}

#[test]
fn computed_mismatch_is_dropped() {
    let mut bridge = bridge();
    let mut bytes = segment_bytes(5555, 80, syn(), &[]);
    bytes[17] ^= 0x01;
    bridge.handle_segment(at(0), &bytes, REMOTE, LOCAL, IFACE, CrcMode::Computed).unwrap();
    assert!(bridge.engine().inputs.is_empty());

    // Intact, it goes through.
    let bytes = segment_bytes(5555, 80, syn(), &[]);
    bridge.handle_segment(at(0), &bytes, REMOTE, LOCAL, IFACE, CrcMode::Computed).unwrap();
    assert_eq!(bridge.engine().inputs.len(), 1);
}

#[test]
fn oversized_segment_is_dropped() {
    let config = Config::default().max_segment_len(40);
    let mut bridge = Bridge::with_config(Scripted::new(), Recorder::default(), config).unwrap();
    let bytes = segment_bytes(5555, 80, ack(), &[0; 30]);
    bridge.handle_segment(at(0), &bytes, REMOTE, LOCAL, IFACE, CrcMode::Computed).unwrap();
    assert!(bridge.engine().inputs.is_empty());
    assert_eq!(bridge.fault(), None);
}

#[test]
fn stray_payload_is_fault() {
    let mut bridge = bridge();
    let bytes = segment_bytes(5555, 80, ack(), b"lost");
    assert_eq!(
        bridge.handle_segment(at(0), &bytes, REMOTE, LOCAL, IFACE, CrcMode::Computed),
        Err(Error::Internal(Fault::StrayPayload)));
    // Poisoned for good.
    let bytes = segment_bytes(5555, 80, syn(), &[]);
    assert_eq!(
        bridge.handle_segment(at(0), &bytes, REMOTE, LOCAL, IFACE, CrcMode::Computed),
        Err(Error::Internal(Fault::StrayPayload)));
    assert_eq!(bridge.engine().inputs.len(), 1);
}

#[test]
fn segments_are_counted() {
    let mut bridge = bridge();
    established(&mut bridge, ID, TransferMode::ByteStream);
    let bytes = segment_bytes(80, 4000, ack(), b"abc");
    bridge.handle_segment(at(0), &bytes, REMOTE, LOCAL, IFACE, CrcMode::Computed).unwrap();

    let stats = bridge.status(ID).map(|status| status.stats).unwrap();
    assert_eq!(stats.segments_received, 1);
    assert_eq!(stats.octets_received, 3);
    assert_eq!(stats.last_seq_received, Some(TcpSeqNumber(0x1000)));
}

#[test]
fn syn_ack_binds_local_address() {
    let mut bridge = bridge();
    command(&mut bridge, ID, Command::OpenActive(Open::active(REMOTE, 80))).unwrap();
    let handle = handle_of(&bridge, ID);
    let info = bridge.engine().info(handle).unwrap();
    assert!(info.local.is_unspecified());

    let bytes = segment_bytes(80, info.local_port, syn_ack(), &[]);
    bridge.handle_segment(at(0), &bytes, REMOTE, LOCAL, IFACE, CrcMode::Computed).unwrap();
    assert_eq!(bridge.engine().info(handle).map(|info| info.local), Some(LOCAL));
    assert_eq!(bridge.status(ID).map(|status| status.tuple.local), Some(LOCAL));
}

#[test]
fn engine_output_is_sealed() {
    let mut bridge = bridge();
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);

    let mut bytes = segment_bytes(4000, 80, ack(), b"hello");
    // Whatever the engine wrote as checksum is replaced.
    bytes[16] = 0;
    bytes[17] = 0;
    {
        let Bridge { engine, core } = &mut bridge;
        let arg = engine.pcb(handle).arg;
        core.output(arg, LOCAL, REMOTE, &bytes);
    }

    let outbound = &bridge.host().outbound;
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].protocol, IpProtocol::Tcp);
    assert_eq!(outbound[0].segment.payload(), b"hello");
    let packet = TcpPacket::new_unchecked(outbound[0].segment.as_bytes());
    assert_eq!(packet.verify_checksum(LOCAL, REMOTE), Ok(true));

    let stats = bridge.status(ID).map(|status| status.stats).unwrap();
    assert_eq!(stats.segments_sent, 1);
    assert_eq!(stats.octets_sent, 5);
}

#[test]
fn garbled_output_is_fault() {
    let mut bridge = bridge();
    let Bridge { core, .. } = &mut bridge;
    core.output(None, LOCAL, REMOTE, &[0; 8]);
    assert!(matches!(bridge.fault(), Some(Fault::BadOutput(_))));
}

#[test]
fn reset_removes_connection() {
    let mut bridge = bridge();
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);
    fail_handle(&mut bridge, handle, ErrorCode::Reset);
    assert_eq!(indications(&bridge).last(), Some(&Indication::ConnectionReset { id: ID }));
    assert_eq!(bridge.connection_count(), 0);
    assert_eq!(bridge.fault(), None);
}

#[test]
fn unexpected_error_poisons() {
    let mut bridge = bridge();
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);
    fail_handle(&mut bridge, handle, ErrorCode::Timeout);
    let fault = Fault::UnexpectedError(ErrorCode::Timeout);
    assert_eq!(bridge.fault(), Some(fault));
    assert_eq!(command(&mut bridge, ID, Command::Status), Err(Error::Internal(fault)));
    assert_eq!(bridge.handle_tick(at(1_000)), Err(Error::Internal(fault)));
}

#[test]
fn events_for_foreign_handles() {
    let mut bridge = bridge();
    established(&mut bridge, ID, TransferMode::ByteStream);

    // Polls on handles the connection no longer owns are harmless.
    {
        let Bridge { engine, core } = &mut bridge;
        core.event(engine, Callback { arg: Some(ID), handle: Handle(99), event: Event::Poll });
    }
    assert_eq!(bridge.fault(), None);

    {
        let Bridge { engine, core } = &mut bridge;
        core.event(engine, Callback { arg: Some(ID), handle: Handle(99), event: Event::Sent(1) });
    }
    assert!(matches!(bridge.fault(), Some(Fault::HandleMismatch { id: ID, handle: Handle(99), .. })));
}

#[test]
fn event_for_unknown_connection_is_fault() {
    let mut bridge = bridge();
    let Bridge { engine, core } = &mut bridge;
    let stranger = Some(ConnectionId(42));
    core.event(engine, Callback { arg: stranger, handle: Handle(1), event: Event::Connected });
    assert_eq!(bridge.fault(), Some(Fault::UnknownTarget(stranger)));
}

#[test]
fn abort_closes_once() {
    let mut bridge = bridge();
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);
    command(&mut bridge, ID, Command::Abort).unwrap();

    let closed = indications(&bridge).iter()
        .filter(|indication| **indication == Indication::Closed { id: ID })
        .count();
    assert_eq!(closed, 1);
    assert_eq!(bridge.connection_count(), 0);
    assert!(bridge.engine().info(handle).is_none());
}

#[test]
fn deferred_close_waits_for_queue() {
    let mut bridge = bridge();
    bridge.engine.room = 4;
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);

    command(&mut bridge, ID, Command::Send(Payload::Bytes(b"0123456789".to_vec()))).unwrap();
    command(&mut bridge, ID, Command::Close).unwrap();
    assert_eq!(bridge.engine().info(handle).map(|info| info.state), Some(State::Established));

    bridge.engine.ack(handle, 4);
    signal(&mut bridge, handle, Event::Sent(4));
    assert_eq!(bridge.engine().info(handle).map(|info| info.state), Some(State::Established));

    bridge.engine.ack(handle, 4);
    signal(&mut bridge, handle, Event::Sent(4));
    assert_eq!(bridge.engine().written(handle), b"0123456789");
    assert_eq!(bridge.engine().info(handle).map(|info| info.state), Some(State::FinWait1));

    free_handle(&mut bridge, handle);
    assert_eq!(indications(&bridge).last(), Some(&Indication::Closed { id: ID }));
    assert_eq!(bridge.connection_count(), 0);
}

#[test]
fn status_is_indicated() {
    let mut bridge = bridge();
    established(&mut bridge, ID, TransferMode::Object);
    command(&mut bridge, ID, Command::Status).unwrap();

    match indications(&bridge).last() {
        Some(Indication::Status { id, status }) => {
            assert_eq!(*id, ID);
            assert_eq!(status.state(), Some(State::Established));
            assert_eq!(status.mode, TransferMode::Object);
            assert_eq!(status.send_queued, 0);
            assert_eq!(status.tuple.remote_port, 80);
        },
        other => panic!("Expected status, got {:?}", other),
    }
}

#[test]
fn object_mode_frames_messages() {
    let mut bridge = bridge();
    let handle = established(&mut bridge, ID, TransferMode::Object);

    command(&mut bridge, ID, Command::Send(Payload::Object(b"hello".to_vec()))).unwrap();
    assert_eq!(bridge.engine().written(handle), b"\x00\x00\x00\x05hello");

    assert_eq!(
        command(&mut bridge, ID, Command::Send(Payload::Bytes(b"raw".to_vec()))),
        Err(Error::TransferMode(TransferMode::Object)));

    signal(&mut bridge, handle, Event::Recv(Some(b"\x00\x00\x00\x03a")));
    assert!(!matches!(indications(&bridge).last(), Some(Indication::Data { .. })));
    signal(&mut bridge, handle, Event::Recv(Some(b"bc")));
    assert_eq!(
        indications(&bridge).last(),
        Some(&Indication::Data { id: ID, payload: Payload::Object(b"abc".to_vec()) }));
}

#[test]
fn byte_count_mode() {
    let mut bridge = bridge();
    let handle = established(&mut bridge, ID, TransferMode::ByteCount);

    command(&mut bridge, ID, Command::Send(Payload::Count(7))).unwrap();
    assert_eq!(bridge.engine().written(handle), &[0; 7][..]);

    signal(&mut bridge, handle, Event::Recv(Some(&[1u8, 2, 3])));
    assert_eq!(
        indications(&bridge).last(),
        Some(&Indication::Data { id: ID, payload: Payload::Count(3) }));
}

#[test]
fn ticks_only_while_busy() {
    let mut bridge = bridge();
    established(&mut bridge, ID, TransferMode::ByteStream);
    assert!(bridge.host().schedules.is_empty());
    assert_eq!(bridge.next_tick(), Expiration::Never);

    bridge.engine.busy = true;
    bridge.handle_command(at(1_130), Request::new(ID, Command::Status)).unwrap();
    assert_eq!(bridge.host().schedules, [at(1_250)]);

    // Early wakeups run nothing and arm nothing new.
    bridge.handle_tick(at(1_249)).unwrap();
    assert_eq!(bridge.engine().fast_ticks, 0);
    assert_eq!(bridge.host().schedules.len(), 1);

    bridge.handle_tick(at(1_250)).unwrap();
    assert_eq!((bridge.engine().fast_ticks, bridge.engine().slow_ticks), (1, 0));
    assert_eq!(bridge.host().schedules, [at(1_250), at(1_500)]);

    bridge.engine.busy = false;
    bridge.handle_tick(at(1_500)).unwrap();
    assert_eq!((bridge.engine().fast_ticks, bridge.engine().slow_ticks), (2, 1));
    assert_eq!(bridge.next_tick(), Expiration::Never);
    assert_eq!(bridge.host().schedules.len(), 2);
}

#[test]
fn custom_timer_grid() {
    let config = Config::default()
        .fast_interval(Duration::from_millis(100))
        .slow_interval(Duration::from_millis(300))
        .grid(Duration::from_millis(50));
    let mut bridge = Bridge::with_config(Scripted::new(), Recorder::default(), config).unwrap();
    bridge.engine.busy = true;
    bridge.handle_tick(at(1_020)).unwrap();
    assert_eq!(bridge.next_tick(), Expiration::When(at(1_100)));

    let invalid = Config::default().slow_interval(Duration::from_millis(300));
    assert!(Bridge::with_config(Scripted::new(), Recorder::default(), invalid).is_err());
}

#[test]
fn shutdown_detaches() {
    let mut bridge = bridge();
    bridge.engine.busy = true;
    let handle = established(&mut bridge, ID, TransferMode::ByteStream);
    assert_ne!(bridge.next_tick(), Expiration::Never);

    let (mut engine, host) = bridge.shutdown();
    assert_eq!(engine.pcb(handle).arg, None);
    assert!(host.cancelled);
}

#[test]
fn datagram_protocols() {
    let mut bridge = bridge();
    let bytes = [0u8; 8];
    assert_eq!(
        bridge.handle_datagram(at(0), IpProtocol::Icmp, &bytes, REMOTE, LOCAL, IFACE, CrcMode::Computed),
        Ok(()));
    assert_eq!(
        bridge.handle_datagram(at(0), IpProtocol::Udp, &bytes, REMOTE, LOCAL, IFACE, CrcMode::Computed),
        Err(Error::Protocol(IpProtocol::Udp)));

    let segment = segment_bytes(5555, 80, syn(), &[]);
    bridge.handle_datagram(at(0), IpProtocol::Tcp, &segment, REMOTE, LOCAL, IFACE, CrcMode::Computed)
        .unwrap();
    assert_eq!(bridge.engine().inputs.len(), 1);
}

#[test]
fn summary_by_state() {
    let mut bridge = bridge();
    command(&mut bridge, ID, Command::OpenActive(Open::active(REMOTE, 80))).unwrap();
    command(&mut bridge, ConnectionId(2), Command::OpenPassive(Open::passive(80))).unwrap();

    let summary = bridge.state_summary();
    assert_eq!(summary.count(Some(State::SynSent)), 1);
    assert_eq!(summary.count(Some(State::Listen)), 1);
    assert_eq!(summary.total(), 2);
    assert_eq!(summary.to_string(), "listen:1 syn_sent:1 ");
}
