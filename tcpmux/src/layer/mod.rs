//! The process logic between engine and host.
//!
//! ## Layering
//!
//! The segment format lives in `wire` and the protocol machine behind `engine`. This module holds
//! the processing part: the state kept per connection, and the translation between application
//! commands, engine actions, engine callbacks and notifications. Everything that is observable to
//! the host goes through the `Host` trait of the [`tcp`] layer.
//!
//! ## Errors
//!
//! There are two classes of errors. Misuse of a single command, such as opening a connection
//! without a remote address, fails only that command. An internal fault means the bridge and the
//! engine no longer agree on which connections exist. It poisons the bridge and every later entry
//! point reports the same fault.
//!
//! [`tcp`]: tcp/index.html
use crate::engine::{ConnectionId, ErrorCode, Handle};
use crate::wire::{self, IpProtocol};

pub mod tcp;

/// The result type of the bridge.
pub type Result<T> = core::result::Result<T, Error>;

/// The error type of the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    /// A command lacked required information.
    ///
    /// The message names what was missing, for example the remote endpoint of an active open.
    #[error("unspecified: {0}")]
    Unspecified(&'static str),

    /// The command names no existing connection and does not open one.
    #[error("no connection {0}")]
    UnknownConnection(ConnectionId),

    /// The payload of a send does not match the connection's transfer mode.
    #[error("payload does not match transfer mode {0:?}")]
    TransferMode(tcp::TransferMode),

    /// An object payload is too long for its four octet length prefix.
    #[error("object of {0} octets exceeds the length prefix")]
    ObjectTooLong(usize),

    /// An open command named a connection that already exists.
    #[error("connection {0} is already open")]
    AlreadyOpen(ConnectionId),

    /// A segment arrived carrying a protocol other than TCP.
    #[error("unexpected protocol {0}")]
    Protocol(IpProtocol),

    /// The engine refused an action.
    #[error("engine: {0}")]
    Engine(ErrorCode),

    /// Bridge and engine have diverged, the bridge is unusable.
    #[error("internal fault: {0}")]
    Internal(#[from] Fault),
}

/// An internal-consistency violation between bridge and engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Fault {
    /// A callback carried an argument that names no registered connection.
    #[error("callback for unregistered connection {0:?}")]
    UnknownTarget(Option<ConnectionId>),

    /// A callback concerned a handle other than the connection's own.
    #[error("connection {id} owns {owned:?}, event was for {handle}")]
    HandleMismatch {
        /// The connection named by the callback argument.
        id: ConnectionId,
        /// The handle the connection owns, if any.
        owned: Option<Handle>,
        /// The handle the callback concerned.
        handle: Handle,
    },

    /// An accept was reported on a connection that is not listening.
    #[error("accept on connection {0} which is not listening")]
    NotListening(ConnectionId),

    /// The host allocated an identifier that is still registered.
    #[error("connection id {0} allocated twice")]
    DuplicateId(ConnectionId),

    /// The engine reported an error code other than abort or reset.
    #[error("unexpected engine error: {0}")]
    UnexpectedError(ErrorCode),

    /// A segment carrying payload reached no connection.
    #[error("payload for a segment without connection")]
    StrayPayload,

    /// The engine emitted a segment that could not be encoded.
    #[error("malformed engine output: {0}")]
    BadOutput(wire::Error),
}

impl Error {
    /// Whether the error left the bridge poisoned.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::Engine(code)
    }
}
