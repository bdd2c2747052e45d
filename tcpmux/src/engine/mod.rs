//! The contract with the callback-driven TCP engine.
//!
//! The engine is the actual protocol machine: sequence space, retransmission, congestion control
//! and the TCP state diagram all live there. It is modelled on the classic embedded stack
//! interface where every connection is an opaque control block (here a [`Handle`]) and where
//! results are reported through callbacks while an action is still running.
//!
//! ## Reentrancy
//!
//! Every action that can produce events takes a `&mut dyn Callbacks`. The engine invokes the sink
//! synchronously, before the action returns, and hands itself back as `&mut dyn Engine` so that
//! the sink can issue follow-up actions. Implementations must therefore not hold any borrow of
//! their own per-handle state while calling into the sink. The sink in turn must not rely on any
//! state it read before an action once that action has returned.
//!
//! ## Back-references
//!
//! Each handle carries one opaque argument slot, set through [`Engine::set_arg`]. The bridge
//! stores the owning [`ConnectionId`] there and the engine reports it with every callback for
//! that handle. A handle without argument belongs to no connection.
//!
//! [`Handle`]: struct.Handle.html
//! [`ConnectionId`]: struct.ConnectionId.html
//! [`Engine::set_arg`]: trait.Engine.html#tymethod.set_arg
use core::fmt;

use crate::wire::{IpAddress, Segment, TcpSeqNumber};

/// An engine-owned control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u32);

/// The stable identifier of a connection, chosen by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

/// The network interface a segment arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InterfaceId(pub u32);

/// The protocol state of a handle, as owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Error codes reported by the engine, from actions or through the error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Out of memory, or no room in the send buffer.
    Memory,
    /// Buffer error.
    Buffer,
    /// Timeout.
    Timeout,
    /// No route to the destination.
    Route,
    /// The connection was aborted, locally or by the engine.
    Aborted,
    /// The connection was reset by the peer.
    Reset,
    /// The connection was closed.
    Closed,
    /// Not connected.
    NotConnected,
    /// Illegal value.
    Value,
    /// Illegal argument.
    Argument,
    /// Address in use.
    InUse,
    /// Low-level interface error.
    Interface,
    /// Already connected.
    IsConnected,
    /// Operation in progress.
    InProgress,
}

/// One callback delivered by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// A listening handle accepted a connection request; the callback handle is the new one.
    Accept,
    /// The peer acknowledged this many octets.
    Sent(usize),
    /// Data arrived, or `None` when the peer closed its half of the connection.
    Recv(Option<&'a [u8]>),
    /// An active open completed.
    Connected,
    /// Periodic poll of the handle.
    Poll,
    /// The handle hit a fatal error and was released by the engine.
    Err(ErrorCode),
}

/// An event together with the handle it concerns and that handle's argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Callback<'a> {
    /// The argument slot of the handle the event was registered on.
    ///
    /// For `Accept` this is the argument of the listening handle.
    pub arg: Option<ConnectionId>,
    /// The handle the event concerns.
    pub handle: Handle,
    /// What happened.
    pub event: Event<'a>,
}

/// A snapshot of a handle's protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleInfo {
    /// The protocol state.
    pub state: State,
    /// The local address, unspecified while unbound.
    pub local: IpAddress,
    /// The local port.
    pub local_port: u16,
    /// The remote address, unspecified while unconnected.
    pub remote: IpAddress,
    /// The remote port.
    pub remote_port: u16,
    /// The maximum segment size used for sending.
    pub send_mss: u16,
    /// The oldest unacknowledged sequence number.
    pub send_unacked: TcpSeqNumber,
    /// The next sequence number to send.
    pub send_next: TcpSeqNumber,
    /// The peer's advertised window.
    pub send_window: u32,
    /// Free space in the engine's send buffer, in octets.
    pub send_buffer: usize,
    /// The next expected sequence number.
    pub recv_next: TcpSeqNumber,
    /// The window we advertise.
    pub recv_window: u32,
}

/// A segment handed to the engine, with the network-layer context it arrived in.
///
/// Only valid for the duration of one `Engine::input` call.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// The sender of the carrying datagram.
    pub src_addr: IpAddress,
    /// The receiver of the carrying datagram.
    pub dst_addr: IpAddress,
    /// The interface it arrived on.
    pub interface: InterfaceId,
    /// The segment, with a valid computed checksum.
    pub segment: &'a Segment,
}

/// The action interface of a TCP engine.
///
/// Actions that may raise events take the callback sink as an argument and invoke it before
/// returning.
pub trait Engine {
    /// Allocate a fresh handle in the `Closed` state.
    fn create(&mut self) -> Result<Handle, ErrorCode>;

    /// Set the argument slot of a handle. Unknown handles are ignored.
    fn set_arg(&mut self, handle: Handle, arg: Option<ConnectionId>);

    /// Query the state of a handle, `None` once it has been released.
    fn info(&self, handle: Handle) -> Option<HandleInfo>;

    /// Bind a handle to a local address and port. Port 0 picks an ephemeral port.
    fn bind(&mut self, handle: Handle, addr: IpAddress, port: u16) -> Result<(), ErrorCode>;

    /// Overwrite the local address of a handle without rebinding.
    fn set_local_addr(&mut self, handle: Handle, addr: IpAddress);

    /// Start an active open.
    fn connect(&mut self, handle: Handle, addr: IpAddress, port: u16, cb: &mut dyn Callbacks)
        -> Result<(), ErrorCode>;

    /// Turn a bound handle into a listening one.
    ///
    /// The passed handle is released and the listening handle returned in its place. Its argument
    /// slot is carried over.
    fn listen(&mut self, handle: Handle) -> Result<Handle, ErrorCode>;

    /// Enqueue data for sending. `Memory` signals that there is currently no room.
    ///
    /// A write takes all of `data` or nothing. On any error no octet was enqueued, the caller
    /// keeps the whole slice for a later attempt.
    fn write(&mut self, handle: Handle, data: &[u8], cb: &mut dyn Callbacks)
        -> Result<(), ErrorCode>;

    /// Transmit whatever the engine has queued for the handle.
    fn output(&mut self, handle: Handle, cb: &mut dyn Callbacks) -> Result<(), ErrorCode>;

    /// Acknowledge that `len` received octets were consumed, opening the receive window.
    fn recved(&mut self, handle: Handle, len: usize);

    /// Start a graceful close.
    fn close(&mut self, handle: Handle, cb: &mut dyn Callbacks) -> Result<(), ErrorCode>;

    /// Abort the connection, sending a reset. Raises `Err(Aborted)` on the handle.
    fn abort(&mut self, handle: Handle, cb: &mut dyn Callbacks);

    /// Process one inbound segment.
    fn input(&mut self, frame: &Frame, cb: &mut dyn Callbacks);

    /// The fast timer, nominally every 250 ms.
    fn tick_fast(&mut self, cb: &mut dyn Callbacks);

    /// The slow timer, nominally every 500 ms.
    fn tick_slow(&mut self, cb: &mut dyn Callbacks);

    /// Whether any handle is in an active or time-wait state and needs the timers.
    fn is_busy(&self) -> bool;
}

/// The sink of engine callbacks.
pub trait Callbacks {
    /// A protocol event on a handle.
    fn event(&mut self, engine: &mut dyn Engine, callback: Callback);

    /// The engine accepted a segment into the sequence space of a handle.
    ///
    /// Raised during `Engine::input`, `frame` is the segment being processed.
    fn segment_arrived(&mut self, frame: &Frame, arg: Option<ConnectionId>,
                       seq_number: TcpSeqNumber, payload_len: usize);

    /// The engine emits a segment. `arg` is `None` for segments of no connection, such as a reset
    /// answering an unmatched segment.
    fn output(&mut self, arg: Option<ConnectionId>, src_addr: IpAddress, dst_addr: IpAddress,
              bytes: &[u8]);

    /// The engine released a handle.
    fn freed(&mut self, arg: Option<ConnectionId>, handle: Handle);
}

impl State {
    /// Whether data can still be sent on the handle.
    pub fn can_send(self) -> bool {
        matches!(self, State::Established | State::CloseWait)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN_SENT",
            State::SynRcvd => "SYN_RCVD",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN_WAIT_1",
            State::FinWait2 => "FIN_WAIT_2",
            State::CloseWait => "CLOSE_WAIT",
            State::Closing => "CLOSING",
            State::LastAck => "LAST_ACK",
            State::TimeWait => "TIME_WAIT",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            ErrorCode::Memory => "out of memory",
            ErrorCode::Buffer => "buffer error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Route => "routing problem",
            ErrorCode::Aborted => "connection aborted",
            ErrorCode::Reset => "connection reset",
            ErrorCode::Closed => "connection closed",
            ErrorCode::NotConnected => "not connected",
            ErrorCode::Value => "illegal value",
            ErrorCode::Argument => "illegal argument",
            ErrorCode::InUse => "address in use",
            ErrorCode::Interface => "low-level netif error",
            ErrorCode::IsConnected => "already connected",
            ErrorCode::InProgress => "operation in progress",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn state_classes() {
        assert!(State::CloseWait.can_send());
        assert!(!State::FinWait1.can_send());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Handle(3)), "#3");
        assert_eq!(format!("{}", State::FinWait2), "FIN_WAIT_2");
        assert_eq!(format!("{}", ErrorCode::Reset), "connection reset");
    }
}
