//! The bridge between a TCP engine and a message-passing host.
//!
//! The host drives the [`Bridge`] with three kinds of input: segments from the network layer,
//! commands of the application and wakeups of the timer it was asked to arm. The bridge answers
//! through the [`Host`] trait, with indications toward the application and segments toward the
//! network layer.
//!
//! ## Connections
//!
//! Every connection is named by a `ConnectionId`. The application picks it when opening, the host
//! allocates one when a listening connection accepts a request. The same identifier is stored in
//! the argument slot of the engine handle and routes every callback back to its connection.
//!
//! A forked connection is announced with `Available`. Data and a peer close that arrive before
//! the application accepts it are held back, and delivered in order right after `Established`.
//!
//! ## Timers
//!
//! The engine needs its fast timer every 250 ms and its slow timer every 500 ms, but only while it
//! has connections in active or time-wait states. After every input the bridge arms at most one
//! wakeup, rounded down onto a 250 ms grid, and leaves the timer off while the engine is idle.
//!
//! ## Errors
//!
//! A command that is malformed fails on its own. A callback that cannot be matched to a
//! connection poisons the bridge, see [`Error`].
//!
//! [`Bridge`]: struct.Bridge.html
//! [`Host`]: trait.Host.html
//! [`Error`]: ../enum.Error.html
use crate::engine::{ConnectionId, Engine, Frame, InterfaceId, State};
use crate::time::{Expiration, Instant};
use crate::wire::{CrcMode, IpAddress, IpProtocol, Segment};

use super::{Error, Fault, Result};

mod command;
mod config;
mod connection;
mod endpoint;
mod event;
mod io;
mod notify;
mod timer;

#[cfg(test)]
mod tests;

pub use self::command::{Command, Open, Request};
pub use self::config::{Config, ConfigError};
pub use self::connection::Stats;
pub use self::io::{Payload, TransferMode};
pub use self::notify::{FourTuple, Indication, StateSummary, Status};

use self::endpoint::Endpoint;
use self::timer::TickScheduler;

/// The surroundings of the bridge.
pub trait Host {
    /// Notify the application.
    fn indicate(&mut self, indication: Indication);

    /// Hand a segment to the network layer.
    fn transmit(&mut self, outbound: Outbound);

    /// Pick an identifier for a connection accepted on a listener.
    ///
    /// Must not collide with any live connection, including those the application opened.
    fn allocate_id(&mut self) -> ConnectionId;

    /// Arm the timer to call `Bridge::handle_tick` at `at`.
    ///
    /// Called only when no earlier wakeup is pending.
    fn schedule(&mut self, at: Instant);

    /// Disarm a pending wakeup.
    fn cancel(&mut self) { }
}

/// A segment emitted by the engine, with its checksum filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// The source address of the carrying datagram.
    pub src_addr: IpAddress,
    /// The destination address of the carrying datagram.
    pub dst_addr: IpAddress,
    /// The protocol of the carrying datagram, always TCP.
    pub protocol: IpProtocol,
    /// The segment.
    pub segment: Segment,
}

/// Connects an engine to a host.
///
/// Owns both and serializes every input. Each entry point runs to completion, with all engine
/// callbacks it causes, before it returns.
pub struct Bridge<E, H> {
    engine: E,
    core: Core<H>,
}

/// Everything of the bridge but the engine.
///
/// Split off so that it can serve as the callback sink while the engine runs an action.
pub(crate) struct Core<H> {
    pub(crate) host: H,
    pub(crate) endpoint: Endpoint,
    pub(crate) config: Config,
    pub(crate) timer: TickScheduler,
    pub(crate) fault: Option<Fault>,
}

impl<E: Engine, H: Host> Bridge<E, H> {
    /// Create a bridge with the default configuration.
    pub fn new(engine: E, host: H) -> Self {
        let config = Config::default();
        Bridge {
            engine,
            core: Core::new(host, config),
        }
    }

    /// Create a bridge with custom timers and limits.
    pub fn with_config(engine: E, host: H, config: Config) -> core::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Bridge {
            engine,
            core: Core::new(host, config),
        })
    }

    /// Process a datagram of the network layer.
    ///
    /// TCP is handed on to `handle_segment`. ICMP is accepted and discarded, the engine has no use
    /// for it. Any other protocol is an error.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_datagram(
        &mut self,
        now: Instant,
        protocol: IpProtocol,
        bytes: &[u8],
        src_addr: IpAddress,
        dst_addr: IpAddress,
        interface: InterfaceId,
        mode: CrcMode,
    ) -> Result<()> {
        match protocol {
            IpProtocol::Tcp => self.handle_segment(now, bytes, src_addr, dst_addr, interface, mode),
            IpProtocol::Icmp | IpProtocol::Icmpv6 => {
                self.core.check()?;
                net_debug!("discarding {} from {}", protocol, src_addr);
                Ok(())
            },
            other => {
                self.core.check()?;
                net_warn!("unexpected protocol {} from {}", other, src_addr);
                Err(Error::Protocol(other))
            },
        }
    }

    /// Process an inbound TCP segment.
    ///
    /// Segments that fail their checksum, cannot be parsed or exceed the configured length are
    /// dropped without an error.
    pub fn handle_segment(
        &mut self,
        now: Instant,
        bytes: &[u8],
        src_addr: IpAddress,
        dst_addr: IpAddress,
        interface: InterfaceId,
        mode: CrcMode,
    ) -> Result<()> {
        self.core.check()?;
        self.core.receive(&mut self.engine, bytes, src_addr, dst_addr, interface, mode);
        self.finish(now, Ok(()))
    }

    /// Process a command of the application.
    pub fn handle_command(&mut self, now: Instant, request: Request) -> Result<()> {
        self.core.check()?;
        net_debug!("tcp {}: command {:?}", request.id, request.command);
        let result = self.core.command(&mut self.engine, request);
        self.finish(now, result)
    }

    /// Process a wakeup of the timer armed through `Host::schedule`.
    ///
    /// A wakeup earlier than the armed instant runs no timers.
    pub fn handle_tick(&mut self, now: Instant) -> Result<()> {
        self.core.check()?;
        if let Some(ticks) = self.core.timer.fire(now) {
            self.engine.tick_fast(&mut self.core);
            if ticks.slow && self.core.fault.is_none() {
                self.engine.tick_slow(&mut self.core);
            }
        }
        self.finish(now, Ok(()))
    }

    /// Detach from the engine and give back both sides.
    ///
    /// Every handle argument is cleared so the engine no longer calls back about the connections,
    /// and a pending wakeup is cancelled.
    pub fn shutdown(self) -> (E, H) {
        let Bridge { mut engine, mut core } = self;
        for (id, handle) in core.endpoint.handles() {
            net_debug!("tcp {}: detaching handle {}", id, handle);
            engine.set_arg(handle, None);
        }
        core.endpoint.clear();
        if core.timer.cancel() {
            core.host.cancel();
        }
        (engine, core.host)
    }

    /// The engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The host.
    pub fn host(&self) -> &H {
        &self.core.host
    }

    /// The host, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.core.host
    }

    /// The configuration in use.
    pub fn config(&self) -> &Config {
        &self.core.config
    }

    /// The number of live connections, listeners included.
    pub fn connection_count(&self) -> usize {
        self.core.endpoint.len()
    }

    /// Count the live connections by engine state.
    pub fn state_summary(&self) -> StateSummary {
        let mut summary = StateSummary::default();
        for conn in self.core.endpoint.iter() {
            let state = conn.handle
                .and_then(|handle| self.engine.info(handle))
                .map(|info| info.state);
            summary.add(state);
        }
        summary
    }

    /// A snapshot of a connection, without indicating it.
    pub fn status(&self, id: ConnectionId) -> Option<Status> {
        self.core.status(&self.engine, id)
    }

    /// The pending timer wakeup.
    pub fn next_tick(&self) -> Expiration {
        self.core.timer.next()
    }

    /// The fault that poisoned the bridge, if any.
    pub fn fault(&self) -> Option<Fault> {
        self.core.fault
    }

    /// Common epilogue of every input.
    ///
    /// A fault raised during the input supersedes its result. Otherwise the timer is rearmed if
    /// the engine needs it.
    fn finish(&mut self, now: Instant, result: Result<()>) -> Result<()> {
        self.core.check()?;
        if let Some(at) = self.core.timer.rearm(now, self.engine.is_busy()) {
            net_trace!("tcp: next tick at {}", at);
            self.core.host.schedule(at);
        }
        result
    }
}

impl<H: Host> Core<H> {
    fn new(host: H, config: Config) -> Self {
        Core {
            host,
            endpoint: Endpoint::default(),
            timer: TickScheduler::new(&config),
            config,
            fault: None,
        }
    }

    /// Fail with the recorded fault, if any.
    pub(crate) fn check(&self) -> Result<()> {
        match self.fault {
            Some(fault) => Err(Error::Internal(fault)),
            None => Ok(()),
        }
    }

    /// Record a fault. Only the first one is kept.
    pub(crate) fn fail(&mut self, fault: Fault) {
        net_error!("tcp: {}", fault);
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    /// Unregister a connection and detach its handle.
    pub(crate) fn destroy(&mut self, engine: &mut dyn Engine, id: ConnectionId) {
        if let Some(conn) = self.endpoint.remove(id) {
            if let Some(handle) = conn.handle {
                engine.set_arg(handle, None);
            }
        }
    }

    pub(crate) fn status(&self, engine: &dyn Engine, id: ConnectionId) -> Option<Status> {
        let conn = self.endpoint.get(id)?;
        Some(Status {
            tuple: conn.tuple,
            mode: conn.mode,
            engine: conn.handle.and_then(|handle| engine.info(handle)),
            send_queued: conn.send.len(),
            receive_queued: conn.recv.len(),
            stats: conn.stats,
        })
    }

    /// Decode an inbound segment and feed it to the engine.
    fn receive(
        &mut self,
        engine: &mut dyn Engine,
        bytes: &[u8],
        src_addr: IpAddress,
        dst_addr: IpAddress,
        interface: InterfaceId,
        mode: CrcMode,
    ) {
        if bytes.len() > self.config.max_segment_len {
            net_debug!("tcp: dropping {} octet segment from {}", bytes.len(), src_addr);
            return;
        }

        let segment = match Segment::decode(bytes, src_addr, dst_addr, mode) {
            Ok(segment) => segment,
            Err(err) => {
                net_debug!("tcp: dropping segment from {}: {}", src_addr, err);
                return;
            },
        };

        let flags = segment.repr().flags;
        if flags.syn() && flags.ack() {
            self.bind_answered_syn(engine, &segment, src_addr, dst_addr);
        }

        let frame = Frame {
            src_addr,
            dst_addr,
            interface,
            segment: &segment,
        };
        engine.input(&frame, self);
    }

    /// Bind the local address of an active open to where its SYN+ACK was sent.
    ///
    /// An open without a local address leaves the engine handle unbound. The answer to the SYN
    /// tells which of our addresses the peer reached, which the handle must use from now on.
    fn bind_answered_syn(
        &mut self,
        engine: &mut dyn Engine,
        segment: &Segment,
        src_addr: IpAddress,
        dst_addr: IpAddress,
    ) {
        let repr = segment.repr();
        for (id, handle) in self.endpoint.handles() {
            let info = match engine.info(handle) {
                Some(info) => info,
                None => continue,
            };
            if info.state == State::SynSent
                && info.local.is_unspecified()
                && info.local_port == repr.dst_port
                && info.remote == src_addr
                && info.remote_port == repr.src_port
            {
                net_debug!("tcp {}: local address is {}", id, dst_addr);
                engine.set_local_addr(handle, dst_addr);
                if let Some(conn) = self.endpoint.get_mut(id) {
                    conn.tuple.local = dst_addr;
                }
            }
        }
    }
}
