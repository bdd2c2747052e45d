//! Engine callbacks.
//!
//! The engine calls back synchronously from inside its own actions, possibly nested several
//! times. No borrow of connection state is held across an engine call, each handler looks the
//! connection up again by the identifier in the callback argument.
use crate::engine::{Callback, Callbacks, ConnectionId, Engine, ErrorCode, Event, Frame, Handle, State};
use crate::layer::Fault;
use crate::wire::{IpAddress, IpProtocol, Segment, TcpSeqNumber};

use super::{Core, Host, Outbound};
use super::connection::{Connection, Operator};
use super::notify::{FourTuple, Indication};

impl<H: Host> Callbacks for Core<H> {
    fn event(&mut self, engine: &mut dyn Engine, callback: Callback) {
        if self.fault.is_some() {
            return;
        }

        let handle = callback.handle;
        match callback.event {
            // The new handle has no connection yet, the argument names the listener.
            Event::Accept => self.accepted(engine, callback.arg, handle),
            Event::Sent(len) => self.on_owner(engine, callback, |op| {
                net_trace!("tcp {}: {} octets acknowledged", op.id, len);
                op.do_send();
            }),
            Event::Recv(None) => self.on_owner(engine, callback, |op| op.recv_closed(handle)),
            Event::Recv(Some(data)) => self.on_owner(engine, callback, |op| op.recv(handle, data)),
            Event::Connected => self.on_owner(engine, callback, |op| op.connected()),
            Event::Poll => self.on_owner(engine, callback, |op| op.do_send()),
            Event::Err(ErrorCode::Aborted) => self.on_owner(engine, callback, |op| {
                net_info!("tcp {}: aborted", op.id);
                op.closed();
                op.core.destroy(op.engine, op.id);
            }),
            Event::Err(ErrorCode::Reset) => self.on_owner(engine, callback, |op| {
                net_info!("tcp {}: reset by peer", op.id);
                op.core.host.indicate(Indication::ConnectionReset { id: op.id });
                op.core.destroy(op.engine, op.id);
            }),
            Event::Err(code) => self.on_owner(engine, callback, |op| {
                op.core.fail(Fault::UnexpectedError(code));
            }),
        }
    }

    fn segment_arrived(&mut self, frame: &Frame, arg: Option<ConnectionId>,
                       seq_number: TcpSeqNumber, payload_len: usize)
    {
        if self.fault.is_some() {
            return;
        }

        match arg {
            Some(id) => match self.endpoint.get_mut(id) {
                Some(conn) => {
                    conn.stats.segments_received += 1;
                    conn.stats.octets_received += payload_len as u64;
                    conn.stats.last_seq_received = Some(seq_number);
                    net_trace!("tcp {}: <- {}", id, frame.segment.repr());
                },
                None => self.fail(Fault::UnknownTarget(arg)),
            },
            None if payload_len > 0 => self.fail(Fault::StrayPayload),
            None => net_debug!("tcp: segment from {} for no connection: {}",
                               frame.src_addr, frame.segment.repr()),
        }
    }

    fn output(&mut self, arg: Option<ConnectionId>, src_addr: IpAddress, dst_addr: IpAddress,
              bytes: &[u8])
    {
        if self.fault.is_some() {
            return;
        }

        let segment = match Segment::seal(bytes, src_addr, dst_addr) {
            Ok(segment) => segment,
            Err(err) => return self.fail(Fault::BadOutput(err)),
        };

        let repr = *segment.repr();
        if let Some(conn) = arg.and_then(|id| self.endpoint.get_mut(id)) {
            conn.stats.segments_sent += 1;
            conn.stats.octets_sent += u64::from(repr.payload_len);
            conn.stats.last_seq_sent = Some(repr.seq_number);
        }

        if repr.flags.syn() || repr.flags.fin() || repr.flags.rst() {
            net_info!("tcp: {} -> {} {}", src_addr, dst_addr, repr);
        } else {
            net_trace!("tcp: {} -> {} {}", src_addr, dst_addr, repr);
        }

        self.host.transmit(Outbound {
            src_addr,
            dst_addr,
            protocol: IpProtocol::Tcp,
            segment,
        });
    }

    fn freed(&mut self, arg: Option<ConnectionId>, handle: Handle) {
        if self.fault.is_some() {
            return;
        }

        let id = match arg {
            Some(id) => id,
            None => return,
        };
        let (close_issued, closed_indicated) = match self.endpoint.get(id) {
            Some(conn) if conn.handle == Some(handle) =>
                (conn.flags.close_issued, conn.flags.closed_indicated),
            _ => return,
        };

        net_debug!("tcp {}: handle {} released", id, handle);
        self.endpoint.remove(id);
        if close_issued && !closed_indicated {
            self.host.indicate(Indication::Closed { id });
        }
    }
}

impl<H: Host> Core<H> {
    /// Run `f` on the connection named by the callback argument, if it owns the handle.
    ///
    /// An argument naming no connection poisons the bridge. So does a foreign handle, except for
    /// polls and errors of stale handles such as the one replaced when listening.
    fn on_owner<F>(&mut self, engine: &mut dyn Engine, callback: Callback, f: F)
        where F: FnOnce(&mut Operator<'_, H>)
    {
        let id = match callback.arg {
            Some(id) if self.endpoint.contains(id) => id,
            other => return self.fail(Fault::UnknownTarget(other)),
        };

        let owned = self.endpoint.get(id).and_then(|conn| conn.handle);
        if owned == Some(callback.handle) {
            return f(&mut Operator { core: self, engine, id });
        }

        match callback.event {
            Event::Poll | Event::Err(_) => {
                net_debug!("tcp {}: ignored {:?} for handle {}", id, callback.event, callback.handle);
            },
            _ => self.fail(Fault::HandleMismatch {
                id,
                owned,
                handle: callback.handle,
            }),
        }
    }

    /// A listening connection accepted a request on a new handle.
    fn accepted(&mut self, engine: &mut dyn Engine, arg: Option<ConnectionId>, handle: Handle) {
        let listener = match arg.and_then(|id| self.endpoint.get(id)) {
            Some(listener) => listener,
            None => return self.fail(Fault::UnknownTarget(arg)),
        };
        if !listener.flags.listening {
            let id = listener.id;
            return self.fail(Fault::NotListening(id));
        }

        let id = self.host.allocate_id();
        let mut conn = Connection::accepted(id, listener, handle);
        if let Some(info) = engine.info(handle) {
            conn.tuple = FourTuple {
                local: info.local,
                remote: info.remote,
                local_port: info.local_port,
                remote_port: info.remote_port,
            };
        }

        let listener = conn.listener.unwrap_or(id);
        let tuple = conn.tuple;
        if let Err(fault) = self.endpoint.insert(conn) {
            return self.fail(fault);
        }
        engine.set_arg(handle, Some(id));

        net_info!("tcp {}: accepted {} on {}", id, tuple, listener);
        self.host.indicate(Indication::Available { listener, id, tuple });
    }
}

impl<'a, H: Host> Operator<'a, H> {
    /// The peer closed its half of the connection.
    fn recv_closed(&mut self, handle: Handle) {
        let state = self.engine.info(handle).map(|info| info.state);
        if state == Some(State::TimeWait) {
            self.finished();
        } else {
            self.peer_closed();
        }
        self.engine.recved(handle, 0);
        self.send_up_data();
        self.do_send();
    }

    fn recv(&mut self, handle: Handle, data: &[u8]) {
        if let Some(conn) = self.core.endpoint.get_mut(self.id) {
            conn.recv.enqueue(data);
        }
        self.engine.recved(handle, data.len());
        self.send_up_data();
        self.do_send();
    }

    /// The active open completed.
    fn connected(&mut self) {
        self.refresh_tuple();
        let tuple = match self.core.endpoint.get(self.id) {
            Some(conn) => conn.tuple,
            None => return,
        };
        net_info!("tcp {}: established {}", self.id, tuple);
        self.core.host.indicate(Indication::Established { id: self.id, tuple });
        self.send_up_data();
        self.do_send();
    }
}
