use crate::engine::{ConnectionId, Engine};
use crate::layer::{Error, Result};
use crate::wire::IpAddress;

use super::{Core, Host};
use super::connection::{Connection, Operator};
use super::io::{Payload, TransferMode};
use super::notify::Indication;

/// A command of the application concerning one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// The connection, chosen by the host when opening.
    pub id: ConnectionId,
    /// What to do.
    pub command: Command,
}

/// The operations available to the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Connect to a remote endpoint.
    OpenActive(Open),
    /// Listen for connection requests, each of which becomes a new connection.
    OpenPassive(Open),
    /// Take over a connection announced with `Available`.
    Accept,
    /// Queue payload for sending.
    Send(Payload),
    /// Close gracefully once all queued payload was written.
    Close,
    /// Reset the connection.
    Abort,
    /// Report a `Status` indication.
    Status,
}

/// Parameters of an open command.
///
/// Unspecified addresses and absent ports are left for the engine to choose where it can.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Open {
    /// The local address to bind.
    pub local_addr: IpAddress,
    /// The local port, an ephemeral one if `None`.
    pub local_port: Option<u16>,
    /// The remote address, required for an active open.
    pub remote_addr: IpAddress,
    /// The remote port, required for an active open.
    pub remote_port: Option<u16>,
    /// The transfer mode, inherited by connections accepted on a listener.
    pub mode: TransferMode,
}

impl Request {
    /// Create a request.
    pub fn new(id: ConnectionId, command: Command) -> Self {
        Request { id, command }
    }
}

impl Open {
    /// Parameters of an active open to a remote endpoint.
    pub fn active(remote_addr: IpAddress, remote_port: u16) -> Self {
        Open {
            remote_addr,
            remote_port: Some(remote_port),
            ..Open::default()
        }
    }

    /// Parameters of a passive open on a local port of any address.
    pub fn passive(local_port: u16) -> Self {
        Open {
            local_port: Some(local_port),
            ..Open::default()
        }
    }

    /// Bind to a specific local endpoint.
    pub fn local(self, local_addr: IpAddress, local_port: u16) -> Self {
        Open {
            local_addr,
            local_port: Some(local_port),
            ..self
        }
    }

    /// Use a transfer mode other than `ByteStream`.
    pub fn with_mode(self, mode: TransferMode) -> Self {
        Open { mode, ..self }
    }

    fn remote(&self) -> Result<(IpAddress, u16)> {
        match self.remote_port {
            Some(port) if port != 0 && !self.remote_addr.is_unspecified() =>
                Ok((self.remote_addr, port)),
            _ => Err(Error::Unspecified("remote address and port")),
        }
    }
}

impl<H: Host> Core<H> {
    /// Dispatch one application command.
    pub(crate) fn command(&mut self, engine: &mut dyn Engine, request: Request) -> Result<()> {
        let Request { id, command } = request;
        match command {
            Command::OpenActive(open) => {
                let (remote, remote_port) = open.remote()?;
                self.register(id, open.mode)?;
                let result = self.operator(engine, id)
                    .connect(open.local_addr, open.local_port.unwrap_or(0), remote, remote_port);
                self.forget_unopened(id, result)
            },
            Command::OpenPassive(open) => {
                let local_port = open.local_port.ok_or(Error::Unspecified("local port"))?;
                self.register(id, open.mode)?;
                let result = self.operator(engine, id).listen(open.local_addr, local_port);
                self.forget_unopened(id, result)
            },
            Command::Accept => {
                self.known(id)?;
                self.operator(engine, id).accept();
                Ok(())
            },
            Command::Send(payload) => {
                self.known(id)?;
                self.operator(engine, id).send(payload)
            },
            Command::Close => {
                self.known(id)?;
                self.operator(engine, id).close();
                Ok(())
            },
            Command::Abort => {
                self.known(id)?;
                self.operator(engine, id).abort();
                Ok(())
            },
            Command::Status => {
                self.known(id)?;
                if let Some(status) = self.status(engine, id) {
                    self.host.indicate(Indication::Status { id, status });
                }
                Ok(())
            },
        }
    }

    fn operator<'a>(&'a mut self, engine: &'a mut dyn Engine, id: ConnectionId) -> Operator<'a, H> {
        Operator { core: self, engine, id }
    }

    fn known(&self, id: ConnectionId) -> Result<()> {
        if self.endpoint.contains(id) {
            Ok(())
        } else {
            Err(Error::UnknownConnection(id))
        }
    }

    /// Get a connection ready for an open command.
    ///
    /// A connection without handle, such as one whose open failed, may be opened again.
    fn register(&mut self, id: ConnectionId, mode: TransferMode) -> Result<()> {
        match self.endpoint.get(id) {
            Some(conn) if conn.handle.is_some() => return Err(Error::AlreadyOpen(id)),
            Some(_) => { self.endpoint.remove(id); },
            None => (),
        }
        self.endpoint.insert(Connection::new(id, mode))?;
        Ok(())
    }

    /// Drop the connection of an open command that did not reach the engine.
    fn forget_unopened(&mut self, id: ConnectionId, result: Result<()>) -> Result<()> {
        if result.is_err() {
            if let Some(conn) = self.endpoint.get(id) {
                if conn.handle.is_none() {
                    self.endpoint.remove(id);
                }
            }
        }
        result
    }
}
