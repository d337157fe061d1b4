//! Collaborator plumbing shared by the topology crates.
//!
//! - [`EventBus`]: in-process bus with regex subscriptions
//! - [`EventHandler`]: trait for bus consumers, run by [`spawn_handler`]
//! - [`SyncMap`]: ordered registry map that prevents auto-vivification bugs
//! - [`poll_until`]: bounded polling of a collaborator that bootstraps late
//!
//! # Architecture
//!
//! The engine is event driven:
//!
//! 1. Discovery and liveness subsystems publish dotted events on the bus
//! 2. Handlers subscribe by pattern and receive envelopes concurrently
//! 3. Handlers mutate registries held in `SyncMap`s under coarse locks
//! 4. Derived notifications are published back onto the bus

mod bus;
mod handler;
mod poll;
mod sync_map;

pub use bus::{BusError, Envelope, EventBus};
pub use handler::{spawn_handler, EventHandler};
pub use poll::{poll_until, PollError, PollPolicy};
pub use sync_map::{SyncMap, SyncMapError};
