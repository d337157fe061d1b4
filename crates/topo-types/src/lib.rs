//! Common topology types for the SDN topology engine.
//!
//! This crate provides the identity and value primitives shared by every
//! topology crate:
//!
//! - [`InterfaceId`]: `{switch_id}:{port_number}` interface identity
//! - [`LinkId`]: deterministic, order-independent link identity
//! - [`EndpointPair`]: unordered pair of interface ids with symmetric equality
//! - [`EntityKind`]: switch/interface/link class label
//! - [`EntityStatus`]: derived up/down/disabled status
//! - [`Metadata`]: free-form per-entity annotations

mod ids;
mod status;

pub use ids::{EndpointPair, InterfaceId, LinkId};
pub use status::{EntityKind, EntityStatus};

/// Free-form metadata attached to a switch, interface or link.
///
/// Backed by an ordered map so that persisted documents are stable.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid interface id: {0} (expected <switch_id>:<port_number>)")]
    InvalidInterfaceId(String),

    #[error("invalid link id: {0}")]
    InvalidLinkId(String),

    #[error("invalid entity kind: {0}")]
    InvalidEntityKind(String),

    #[error("invalid entity status: {0}")]
    InvalidEntityStatus(String),
}
