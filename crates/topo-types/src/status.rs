//! Entity class labels and derived status.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Class of a topology entity.
///
/// Carried explicitly on notifications and errors so consumers never have to
/// infer the class from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Switch,
    Interface,
    Link,
}

impl EntityKind {
    /// Singular lowercase label (`switch`).
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Switch => "switch",
            EntityKind::Interface => "interface",
            EntityKind::Link => "link",
        }
    }

    /// Plural label used in event names and metadata namespaces (`switches`).
    pub const fn plural(&self) -> &'static str {
        match self {
            EntityKind::Switch => "switches",
            EntityKind::Interface => "interfaces",
            EntityKind::Link => "links",
        }
    }

    /// All entity kinds, in persistence order.
    pub const ALL: [EntityKind; 3] = [EntityKind::Switch, EntityKind::Interface, EntityKind::Link];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "switch" | "switches" => Ok(EntityKind::Switch),
            "interface" | "interfaces" => Ok(EntityKind::Interface),
            "link" | "links" => Ok(EntityKind::Link),
            _ => Err(ParseError::InvalidEntityKind(s.to_string())),
        }
    }
}

/// Status of an entity as seen by consumers.
///
/// Derived from the admin and operational planes; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityStatus {
    Up,
    Down,
    Disabled,
}

impl EntityStatus {
    /// Derives a status from the two planes. Admin state wins.
    pub const fn derive(enabled: bool, active: bool) -> Self {
        match (enabled, active) {
            (false, _) => EntityStatus::Disabled,
            (true, true) => EntityStatus::Up,
            (true, false) => EntityStatus::Down,
        }
    }

    pub const fn is_up(&self) -> bool {
        matches!(self, EntityStatus::Up)
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityStatus::Up => "UP",
            EntityStatus::Down => "DOWN",
            EntityStatus::Disabled => "DISABLED",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for EntityStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UP" => Ok(EntityStatus::Up),
            "DOWN" => Ok(EntityStatus::Down),
            "DISABLED" => Ok(EntityStatus::Disabled),
            _ => Err(ParseError::InvalidEntityStatus(s.to_string())),
        }
    }
}
