use crate::engine::{ConnectionId, Engine, ErrorCode, Handle, State};
use crate::layer::{Error, Result};
use crate::wire::{IpAddress, TcpSeqNumber};

use super::{Core, Host};
use super::io::{Payload, ReceiveQueue, SendQueue, TransferMode};
use super::notify::{FourTuple, Indication};

/// The bridge's state of one connection.
///
/// The protocol state itself is owned by the engine and only mirrored here through the handle.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) id: ConnectionId,

    /// The engine handle, `None` before an open command got one or after the engine released it.
    pub(crate) handle: Option<Handle>,

    /// The listening connection this one was accepted on.
    pub(crate) listener: Option<ConnectionId>,

    /// The addresses, filled in as the engine resolves them.
    pub(crate) tuple: FourTuple,

    pub(crate) mode: TransferMode,

    pub(crate) send: SendQueue,

    pub(crate) recv: ReceiveQueue,

    pub(crate) flags: Flags,

    pub(crate) stats: Stats,
}

/// Lifecycle bookkeeping of a connection.
///
/// These guarantee that every notification is sent at most once even though the engine may
/// report the same transition through several paths.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Flags {
    /// The handle is listening.
    pub(crate) listening: bool,

    /// The application may see data and lifecycle notifications.
    ///
    /// Connections opened by the application start out accepted. Forked ones wait for `Accept`.
    pub(crate) accepted: bool,

    /// A peer close arrived before the application accepted.
    pub(crate) peer_closed_held: bool,

    /// Both directions closed before the application accepted.
    pub(crate) closed_held: bool,

    /// The application asked for a close, it is issued once the send queue drained.
    pub(crate) close_requested: bool,

    /// The close was handed to the engine.
    pub(crate) close_issued: bool,

    /// `Closed` was indicated.
    pub(crate) closed_indicated: bool,

    /// A flush of the send queue is running further up the stack.
    pub(crate) flushing: bool,

    /// A nested flush was requested while `flushing`.
    pub(crate) flush_again: bool,
}

/// Segment counters of a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Segments the engine accepted for this connection.
    pub segments_received: u64,
    /// Payload octets in those segments.
    pub octets_received: u64,
    /// The sequence number of the last segment received.
    pub last_seq_received: Option<TcpSeqNumber>,
    /// Segments emitted for this connection.
    pub segments_sent: u64,
    /// Payload octets in those segments.
    pub octets_sent: u64,
    /// The sequence number of the last segment sent.
    pub last_seq_sent: Option<TcpSeqNumber>,
}

/// Operates one connection on behalf of a command or an engine callback.
///
/// Holds on to the identifier only, every access looks the connection up again. Any engine call
/// may run callbacks that modify or remove it.
pub(crate) struct Operator<'a, H> {
    pub(crate) core: &'a mut Core<H>,
    pub(crate) engine: &'a mut dyn Engine,
    pub(crate) id: ConnectionId,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, mode: TransferMode) -> Self {
        Connection {
            id,
            handle: None,
            listener: None,
            tuple: FourTuple::default(),
            mode,
            send: SendQueue::new(mode),
            recv: ReceiveQueue::new(mode),
            flags: Flags { accepted: true, ..Flags::default() },
            stats: Stats::default(),
        }
    }

    /// A connection forked from `listener` onto a freshly accepted handle.
    pub(crate) fn accepted(id: ConnectionId, listener: &Connection, handle: Handle) -> Self {
        let mut conn = Connection::new(id, listener.mode);
        conn.handle = Some(handle);
        conn.listener = Some(listener.id);
        conn.flags.accepted = false;
        conn
    }
}

impl<'a, H: Host> Operator<'a, H> {
    fn conn(&mut self) -> Option<&mut Connection> {
        self.core.endpoint.get_mut(self.id)
    }

    fn handle(&mut self) -> Option<Handle> {
        self.conn().and_then(|conn| conn.handle)
    }

    fn indicate(&mut self, indication: Indication) {
        self.core.host.indicate(indication)
    }

    /// Copy the addresses the engine resolved into the connection.
    pub(crate) fn refresh_tuple(&mut self) {
        let info = match self.handle().and_then(|handle| self.engine.info(handle)) {
            Some(info) => info,
            None => return,
        };
        if let Some(conn) = self.conn() {
            conn.tuple = FourTuple {
                local: info.local,
                remote: info.remote,
                local_port: info.local_port,
                remote_port: info.remote_port,
            };
        }
    }

    /// Give the connection a fresh handle bound to the local address.
    fn bind(&mut self, local: IpAddress, local_port: u16) -> Result<Handle> {
        let handle = self.engine.create()?;
        self.engine.set_arg(handle, Some(self.id));
        match self.conn() {
            Some(conn) => conn.handle = Some(handle),
            None => return Err(Error::UnknownConnection(self.id)),
        }

        if let Err(code) = self.engine.bind(handle, local, local_port) {
            net_debug!("tcp bind {}:{} failed: {}", local, local_port, code);
            self.release(handle);
            return Err(Error::Engine(code));
        }
        Ok(handle)
    }

    /// Return a handle that never got connected to the engine, detaching it first.
    fn release(&mut self, handle: Handle) {
        self.engine.set_arg(handle, None);
        if let Some(conn) = self.conn() {
            conn.handle = None;
        }
        if let Err(code) = self.engine.close(handle, self.core) {
            net_debug!("tcp {}: releasing handle {} failed: {}", self.id, handle, code);
        }
    }

    /// Request an active open.
    pub(crate) fn connect(&mut self, local: IpAddress, local_port: u16,
                          remote: IpAddress, remote_port: u16) -> Result<()> {
        let handle = self.bind(local, local_port)?;
        if let Some(conn) = self.conn() {
            conn.tuple.remote = remote;
            conn.tuple.remote_port = remote_port;
        }

        if let Err(code) = self.engine.connect(handle, remote, remote_port, self.core) {
            net_debug!("tcp connect to {}:{} failed: {}", remote, remote_port, code);
            if self.handle() == Some(handle) {
                self.release(handle);
            }
            return Err(Error::Engine(code));
        }

        self.refresh_tuple();
        let tuple = self.conn().map(|conn| conn.tuple).unwrap_or_default();
        net_info!("tcp {}: connecting {}", self.id, tuple);
        Ok(())
    }

    /// Request a passive open. Every accepted request forks a new connection.
    pub(crate) fn listen(&mut self, local: IpAddress, local_port: u16) -> Result<()> {
        let handle = self.bind(local, local_port)?;
        let listening = match self.engine.listen(handle) {
            Ok(listening) => listening,
            Err(code) => {
                self.release(handle);
                return Err(Error::Engine(code));
            },
        };

        self.engine.set_arg(listening, Some(self.id));
        if let Some(conn) = self.conn() {
            conn.handle = Some(listening);
            conn.flags.listening = true;
            conn.tuple.local = local;
            conn.tuple.local_port = local_port;
        }
        net_info!("tcp {}: listening on {}:{}", self.id, local, local_port);
        Ok(())
    }

    /// The application took over a forked connection.
    pub(crate) fn accept(&mut self) {
        let (tuple, peer_closed, closed) = match self.conn() {
            Some(conn) if !conn.flags.accepted => {
                conn.flags.accepted = true;
                let flags = &mut conn.flags;
                (conn.tuple,
                 core::mem::take(&mut flags.peer_closed_held),
                 core::mem::take(&mut flags.closed_held))
            },
            _ => {
                net_debug!("tcp {}: nothing to accept", self.id);
                return;
            },
        };

        self.indicate(Indication::Established { id: self.id, tuple });
        self.send_up_data();
        if peer_closed {
            self.indicate(Indication::PeerClosed { id: self.id });
        }
        if closed {
            self.closed();
        }
        self.do_send();
    }

    /// Queue application data and try to write it.
    pub(crate) fn send(&mut self, payload: Payload) -> Result<()> {
        let id = self.id;
        let conn = self.conn().ok_or(Error::UnknownConnection(id))?;
        if let Err(err) = conn.send.enqueue(payload) {
            net_debug!("tcp {}: payload refused: {}", id, err);
            return Err(err);
        }
        self.do_send();
        Ok(())
    }

    /// Request a graceful close, deferred until queued data is written.
    pub(crate) fn close(&mut self) {
        match self.conn() {
            Some(conn) if conn.handle.is_some() => conn.flags.close_requested = true,
            Some(_) => {
                // Never reached the engine.
                self.closed();
                self.core.destroy(self.engine, self.id);
                return;
            },
            None => return,
        }
        self.do_send();
    }

    /// Tear the connection down at once.
    pub(crate) fn abort(&mut self) {
        if let Some(handle) = self.handle() {
            // Reported back as an abort error, which removes the connection.
            self.engine.abort(handle, self.core);
        }

        if self.conn().is_some() {
            self.closed();
            self.core.destroy(self.engine, self.id);
        }
    }

    /// Indicate `Closed` unless that already happened.
    pub(crate) fn closed(&mut self) {
        let first = match self.conn() {
            Some(conn) => !core::mem::replace(&mut conn.flags.closed_indicated, true),
            None => false,
        };
        if first {
            net_info!("tcp {}: closed", self.id);
            self.indicate(Indication::Closed { id: self.id });
        }
    }

    /// The peer closed its direction.
    pub(crate) fn peer_closed(&mut self) {
        let accepted = match self.conn() {
            Some(conn) if conn.flags.accepted => true,
            Some(conn) => {
                conn.flags.peer_closed_held = true;
                false
            },
            None => return,
        };
        if accepted {
            net_info!("tcp {}: closed by peer", self.id);
            self.indicate(Indication::PeerClosed { id: self.id });
        }
    }

    /// Both directions are closed, the engine keeps the handle in time-wait.
    pub(crate) fn finished(&mut self) {
        let accepted = match self.conn() {
            Some(conn) if conn.flags.accepted => true,
            Some(conn) => {
                conn.flags.closed_held = true;
                false
            },
            None => return,
        };
        if accepted {
            self.closed();
        }
    }

    /// Hand received data to the application, once it accepted the connection.
    pub(crate) fn send_up_data(&mut self) {
        loop {
            let payload = match self.conn() {
                Some(conn) if conn.flags.accepted => conn.recv.extract(),
                _ => None,
            };
            match payload {
                Some(payload) => self.indicate(Indication::Data { id: self.id, payload }),
                None => break,
            }
        }
    }

    /// Write as much of the send queue as the engine takes, then let it transmit.
    ///
    /// The engine may call back into another flush of the same connection while writing. That
    /// nested flush only marks that another round is needed, so no octet is taken twice.
    pub(crate) fn do_send(&mut self) {
        match self.conn() {
            Some(conn) if conn.flags.flushing => {
                conn.flags.flush_again = true;
                return;
            },
            Some(conn) => conn.flags.flushing = true,
            None => return,
        }

        loop {
            if let Some(conn) = self.conn() {
                conn.flags.flush_again = false;
            }
            self.flush_round();
            match self.conn() {
                Some(conn) if conn.flags.flush_again => continue,
                _ => break,
            }
        }

        if let Some(conn) = self.conn() {
            conn.flags.flushing = false;
        }
    }

    fn flush_round(&mut self) {
        let handle = match self.handle() {
            Some(handle) => handle,
            None => return,
        };

        let chunk_limit = self.core.config.write_chunk;
        loop {
            let room = match self.engine.info(handle) {
                Some(info) if info.state.can_send() && info.send_buffer > 0 => info.send_buffer,
                _ => break,
            };
            let chunk = match self.conn() {
                Some(conn) if !conn.send.is_empty() => conn.send.take(room.min(chunk_limit)),
                _ => break,
            };

            match self.engine.write(handle, &chunk, self.core) {
                Ok(()) => net_trace!("tcp {}: wrote {} octets", self.id, chunk.len()),
                Err(code) => {
                    if code != ErrorCode::Memory {
                        net_warn!("tcp {}: write failed: {}", self.id, code);
                    }
                    if let Some(conn) = self.conn() {
                        conn.send.restore(chunk);
                    }
                    break;
                },
            }
        }

        let close_now = match self.conn() {
            Some(conn) => conn.flags.close_requested
                && !conn.flags.close_issued
                && conn.send.is_empty()
                && conn.handle == Some(handle),
            None => return,
        };
        if close_now {
            self.issue_close(handle);
        }

        let alive = matches!(self.engine.info(handle), Some(info) if info.state != State::Listen);
        if alive && self.handle() == Some(handle) {
            if let Err(code) = self.engine.output(handle, self.core) {
                net_debug!("tcp {}: output failed: {}", self.id, code);
            }
        }
    }

    fn issue_close(&mut self, handle: Handle) {
        if let Some(conn) = self.conn() {
            conn.flags.close_issued = true;
        }
        net_info!("tcp {}: closing", self.id);
        match self.engine.close(handle, self.core) {
            Ok(()) => (),
            Err(ErrorCode::Memory) => {
                // Retried on the next flush.
                if let Some(conn) = self.conn() {
                    conn.flags.close_issued = false;
                }
            },
            Err(code) => net_warn!("tcp {}: close failed: {}", self.id, code),
        }
    }
}
