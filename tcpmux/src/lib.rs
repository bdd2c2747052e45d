//! Connection multiplexing between a callback-driven TCP engine and a message-passing host.
//!
//! ## Table of contents
//!
//! 1. [Design](#design-and-relevant-core-concepts)
//! 2. [The wire module](wire/index.html)
//! 3. [The engine contract](engine/index.html)
//! 4. [The bridge](layer/tcp/index.html)
//!
//! ## Design and relevant core concepts
//!
//! The TCP protocol machine itself is not part of this crate. It lives behind the [`Engine`]
//! trait and is driven like a classic embedded stack: actions are plain method calls, results
//! come back as synchronous callbacks into a [`Callbacks`] sink. Everything else the host sees is
//! message-passing. Segments arrive one at a time, application commands arrive one at a time, a
//! timer fires one at a time, and every reaction is either an [`Indication`] for the application
//! or an [`Outbound`] segment for the network.
//!
//! The difficulty is in the middle. Any engine action may call back into the bridge before it
//! returns, and those callbacks may in turn issue further actions on the same engine. There is no
//! concurrency, only reentrancy, so nothing is locked. Instead the bridge never holds on to a
//! connection across an engine call and looks it up again afterwards. A connection destroyed
//! during the call is simply gone when looked up.
//!
//! [`Engine`]: engine/trait.Engine.html
//! [`Callbacks`]: engine/trait.Callbacks.html
//! [`Indication`]: layer/tcp/enum.Indication.html
//! [`Outbound`]: layer/tcp/struct.Outbound.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]

#[macro_use] mod macros;
pub mod engine;
pub mod layer;
pub mod time;
pub mod wire;
