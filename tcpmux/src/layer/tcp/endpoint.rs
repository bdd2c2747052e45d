use std::collections::BTreeMap;

use crate::engine::{ConnectionId, Handle};
use crate::layer::Fault;

use super::connection::Connection;

/// The registry of live connections.
///
/// Every connection the engine may call back about is found here by the identifier stored in the
/// handle's argument slot. A connection is registered from the open command or the accept callback
/// that created it until it is closed, reset, aborted or released.
#[derive(Debug, Default)]
pub(crate) struct Endpoint {
    connections: BTreeMap<ConnectionId, Connection>,
}

impl Endpoint {
    pub(crate) fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Register a connection under its identifier.
    ///
    /// An identifier is never reused while its connection lives, a collision means the host handed
    /// out the same identifier twice.
    pub(crate) fn insert(&mut self, conn: Connection) -> Result<(), Fault> {
        if self.connections.contains_key(&conn.id) {
            return Err(Fault::DuplicateId(conn.id));
        }
        self.connections.insert(conn.id, conn);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item=&Connection> + '_ {
        self.connections.values()
    }

    /// The connections that currently own an engine handle.
    pub(crate) fn handles(&self) -> Vec<(ConnectionId, Handle)> {
        self.connections.values()
            .filter_map(|conn| conn.handle.map(|handle| (conn.id, handle)))
            .collect()
    }

    /// Unregister everything.
    pub(crate) fn clear(&mut self) -> Vec<Connection> {
        core::mem::take(&mut self.connections).into_values().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }
}
