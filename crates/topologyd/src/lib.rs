//! Topology consistency engine.
//!
//! Maintains the authoritative view of switches, interfaces and the links
//! between them for an SDN controller, driven by discovery and liveness
//! events, and persists administrative state so it survives restarts.
//!
//! # Architecture
//!
//! ```text
//!  discovery / liveness            topologyd                    consumers
//! ┌──────────────────┐     ┌──────────────────────────┐     ┌──────────────┐
//! │ switch.new       │     │ Dispatcher               │     │ topology.*   │
//! │ interface.link_* │────▶│   │                      │────▶│ notifications│
//! │ interface.is.nni │     │   ▼                      │     └──────────────┘
//! │ liveness.*       │     │ Topology                 │
//! └──────────────────┘     │   SwitchRegistry         │     ┌──────────────┐
//!                          │   LinkTable  LinkUpTimer │◀───▶│ TopologyStore│
//!                          └──────────────────────────┘     └──────────────┘
//! ```
//!
//! Link-up notifications are debounced: a link must stay up for the
//! configured window before consumers hear about it. Link-down is always
//! reported immediately.

pub mod config;
pub mod debounce;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod ingress;
pub mod links;
pub mod maintenance;
pub mod metadata;
pub mod model;
pub mod notification;
pub mod reconcile;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod topology;
pub mod view;

pub use config::TopologydConfig;
pub use dispatcher::{Dispatcher, MaintenanceTarget, TopologyEvent};
pub use error::{Result, TopologyError};
pub use ingress::EventFrame;
pub use handlers::{InterfaceInfo, LinkDownOutcome, LinkUpOutcome, LivenessStatus, SwitchInfo};
pub use maintenance::BatchReport;
pub use metadata::EntityRef;
pub use model::{Entity, Interface, Link, Switch, SwitchDescription};
pub use notification::{MetadataAction, Notification, Notifier};
pub use reconcile::RestoreReport;
pub use snapshot::{NetworkStatus, TagRecord};
pub use store::{JsonFileStore, MemoryStore, TopologyStore};
pub use topology::{EngineSettings, Topology};
pub use view::{LinkView, TopologyView};
