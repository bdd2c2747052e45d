//! Notifications toward the application.
use core::fmt;

use crate::engine::{ConnectionId, HandleInfo, State};
use crate::wire::IpAddress;

use super::connection::Stats;
use super::io::{Payload, TransferMode};

/// The addresses of a connection as far as they are known.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourTuple {
    /// The local address.
    pub local: IpAddress,
    /// The remote address.
    pub remote: IpAddress,
    /// The local port.
    pub local_port: u16,
    /// The remote port.
    pub remote_port: u16,
}

/// Something the application is told about one of its connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Indication {
    /// A listening connection accepted a request, yielding a new connection.
    Available {
        /// The listening connection, which stays open.
        listener: ConnectionId,
        /// The new connection.
        id: ConnectionId,
        /// Its addresses.
        tuple: FourTuple,
    },

    /// The connection is established.
    Established {
        /// The connection.
        id: ConnectionId,
        /// Its addresses.
        tuple: FourTuple,
    },

    /// The peer closed its direction, sending is still possible.
    PeerClosed {
        /// The connection.
        id: ConnectionId,
    },

    /// The connection is closed and gone.
    Closed {
        /// The connection.
        id: ConnectionId,
    },

    /// The peer reset the connection, it is gone.
    ConnectionReset {
        /// The connection.
        id: ConnectionId,
    },

    /// The reply to a status request.
    Status {
        /// The connection.
        id: ConnectionId,
        /// The snapshot.
        status: Status,
    },

    /// Received application data.
    Data {
        /// The connection.
        id: ConnectionId,
        /// The data, in the connection's transfer mode.
        payload: Payload,
    },
}

/// A snapshot of a connection, taken without side effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status {
    /// The addresses.
    pub tuple: FourTuple,
    /// The transfer mode.
    pub mode: TransferMode,
    /// The engine's view, `None` if the connection has no handle yet.
    pub engine: Option<HandleInfo>,
    /// Octets waiting to be written to the engine.
    pub send_queued: usize,
    /// Octets waiting to be delivered to the application.
    pub receive_queued: usize,
    /// Segment counters.
    pub stats: Stats,
}

/// A census of connections by engine state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateSummary {
    counts: [usize; 12],
}

const NAMES: [&str; 12] = [
    "init", "closed", "listen", "syn_sent", "syn_rcvd", "estab",
    "close_wait", "last_ack", "fin_wait_1", "fin_wait_2", "closing", "time_wait",
];

impl Indication {
    /// The connection the indication is about.
    pub fn id(&self) -> ConnectionId {
        match *self {
            Indication::Available { id, .. }
            | Indication::Established { id, .. }
            | Indication::PeerClosed { id }
            | Indication::Closed { id }
            | Indication::ConnectionReset { id }
            | Indication::Status { id, .. }
            | Indication::Data { id, .. } => id,
        }
    }
}

impl Status {
    /// The engine state, `None` before the connection got a handle.
    pub fn state(&self) -> Option<State> {
        self.engine.map(|info| info.state)
    }
}

impl StateSummary {
    fn slot(state: Option<State>) -> usize {
        match state {
            None => 0,
            Some(State::Closed) => 1,
            Some(State::Listen) => 2,
            Some(State::SynSent) => 3,
            Some(State::SynRcvd) => 4,
            Some(State::Established) => 5,
            Some(State::CloseWait) => 6,
            Some(State::LastAck) => 7,
            Some(State::FinWait1) => 8,
            Some(State::FinWait2) => 9,
            Some(State::Closing) => 10,
            Some(State::TimeWait) => 11,
        }
    }

    /// Count a connection, `None` for one without engine handle.
    pub(crate) fn add(&mut self, state: Option<State>) {
        self.counts[Self::slot(state)] += 1;
    }

    /// The number of connections in a state, `None` counting those without handle.
    pub fn count(&self, state: Option<State>) -> usize {
        self.counts[Self::slot(state)]
    }

    /// The total number of connections.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

impl fmt::Display for StateSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, count) in NAMES.iter().zip(self.counts.iter()) {
            if *count > 0 {
                write!(f, "{}:{} ", name, count)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for FourTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{} -> {}:{}", self.local, self.local_port, self.remote, self.remote_port)
    }
}
