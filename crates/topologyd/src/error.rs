//! Error types for topologyd

use thiserror::Error;
use topo_types::EntityKind;

/// Topology engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopologyError {
    /// Unknown switch, interface or link
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Metadata key absent on a known entity
    #[error("metadata key {key} not found on {kind} {id}")]
    MetadataKeyNotFound {
        kind: EntityKind,
        id: String,
        key: String,
    },

    /// Malformed administrative or metadata payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// Partially applied multi-entity operation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Snapshot fetch exhausted its retry budget at startup
    #[error("persistence unavailable after {attempts} attempts")]
    PersistenceUnavailable { attempts: u32 },

    /// One switch or link failed to replay during startup
    #[error("failed to restore {kind} {id}: {reason}")]
    PartialRestore {
        kind: EntityKind,
        id: String,
        reason: String,
    },

    /// Invalid or already-claimed link endpoints
    #[error("Link creation conflict: {0}")]
    LinkCreation(String),

    /// Persistence collaborator failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error, kept as text so the error stays `Clone`
    #[error("IO error: {0}")]
    Io(String),

    /// Identifier or payload parse error
    #[error("Parse error: {0}")]
    Parse(String),
}

impl TopologyError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn switch_not_found(id: impl ToString) -> Self {
        Self::not_found(EntityKind::Switch, id)
    }

    pub fn interface_not_found(id: impl ToString) -> Self {
        Self::not_found(EntityKind::Interface, id)
    }

    pub fn link_not_found(id: impl ToString) -> Self {
        Self::not_found(EntityKind::Link, id)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn partial_restore(kind: EntityKind, id: impl ToString, reason: impl ToString) -> Self {
        Self::PartialRestore {
            kind,
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for the not-found family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::MetadataKeyNotFound { .. }
        )
    }

    /// Request-surface status equivalent.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } | Self::MetadataKeyNotFound { .. } => 404,
            Self::Validation(_) => 400,
            Self::Conflict(_) | Self::LinkCreation(_) => 409,
            Self::PersistenceUnavailable { .. } => 503,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for TopologyError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for TopologyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<topo_types::ParseError> for TopologyError {
    fn from(e: topo_types::ParseError) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Result type for topology operations
pub type Result<T> = std::result::Result<T, TopologyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TopologyError::switch_not_found("00:01");
        assert_eq!(err.to_string(), "switch not found: 00:01");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TopologyError::link_not_found("x").status_code(), 404);
        assert_eq!(TopologyError::validation("bad").status_code(), 400);
        assert_eq!(TopologyError::Conflict("partial".into()).status_code(), 409);
        assert_eq!(TopologyError::LinkCreation("claimed".into()).status_code(), 409);
        assert_eq!(
            TopologyError::PersistenceUnavailable { attempts: 20 }.status_code(),
            503
        );
        assert_eq!(TopologyError::persistence("disk").status_code(), 500);
    }

    #[test]
    fn test_from_io_error() {
        let err: TopologyError = std::io::Error::other("denied").into();
        assert_eq!(err.to_string(), "IO error: denied");
    }
}
