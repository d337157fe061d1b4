//! Identity types for interfaces and links.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::str::FromStr;

/// Interface identity in the form `{switch_id}:{port_number}`.
///
/// Switch datapath ids contain colons themselves (`00:00:00:00:00:00:00:01`),
/// so the port number is always taken from the last colon-separated field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceId {
    switch: String,
    port: u32,
}

impl InterfaceId {
    /// Creates an interface id from a switch id and a port number.
    pub fn new(switch: impl Into<String>, port: u32) -> Self {
        Self {
            switch: switch.into(),
            port,
        }
    }

    /// Returns the owning switch id.
    pub fn switch(&self) -> &str {
        &self.switch
    }

    /// Returns the port number.
    pub const fn port(&self) -> u32 {
        self.port
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.switch, self.port)
    }
}

impl FromStr for InterfaceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (switch, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidInterfaceId(s.to_string()))?;
        if switch.is_empty() {
            return Err(ParseError::InvalidInterfaceId(s.to_string()));
        }
        let port = port
            .parse::<u32>()
            .map_err(|_| ParseError::InvalidInterfaceId(s.to_string()))?;
        Ok(Self::new(switch, port))
    }
}

impl TryFrom<String> for InterfaceId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InterfaceId> for String {
    fn from(id: InterfaceId) -> Self {
        id.to_string()
    }
}

/// Deterministic link identity.
///
/// A link id is the hex encoded SHA3-256 digest of its two endpoint interface
/// ids, sorted before hashing so that `(a, b)` and `(b, a)` yield the same id.
/// Each id is prefixed with its byte length so no two pairs share an input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    /// Computes the id of the link joining two interfaces.
    pub fn from_endpoints(a: &InterfaceId, b: &InterfaceId) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let mut hasher = Sha3_256::new();
        for id in [first.to_string(), second.to_string()] {
            hasher.update((id.len() as u64).to_be_bytes());
            hasher.update(id.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LinkId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(ParseError::InvalidLinkId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

/// Unordered pair of interface ids.
///
/// Stored sorted, so derived equality and hashing are symmetric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointPair {
    low: InterfaceId,
    high: InterfaceId,
}

impl EndpointPair {
    /// Builds a pair from two endpoints in any order.
    pub fn new(a: InterfaceId, b: InterfaceId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Returns true if both endpoints are the same interface.
    pub fn is_degenerate(&self) -> bool {
        self.low == self.high
    }

    /// Returns true if `id` is one of the two endpoints.
    pub fn contains(&self, id: &InterfaceId) -> bool {
        &self.low == id || &self.high == id
    }

    /// Returns the endpoint opposite to `id`, if `id` belongs to the pair.
    pub fn other(&self, id: &InterfaceId) -> Option<&InterfaceId> {
        if &self.low == id {
            Some(&self.high)
        } else if &self.high == id {
            Some(&self.low)
        } else {
            None
        }
    }

    /// Returns both endpoints in sorted order.
    pub fn endpoints(&self) -> (&InterfaceId, &InterfaceId) {
        (&self.low, &self.high)
    }

    /// Computes the link id for this pair.
    pub fn link_id(&self) -> LinkId {
        LinkId::from_endpoints(&self.low, &self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_interface_id() {
        let id: InterfaceId = "00:00:00:00:00:00:00:01:7".parse().unwrap();
        assert_eq!(id.switch(), "00:00:00:00:00:00:00:01");
        assert_eq!(id.port(), 7);
        assert_eq!(id.to_string(), "00:00:00:00:00:00:00:01:7");
    }

    #[test]
    fn test_parse_interface_id_invalid() {
        assert!("no-port".parse::<InterfaceId>().is_err());
        assert!(":1".parse::<InterfaceId>().is_err());
        assert!("sw:abc".parse::<InterfaceId>().is_err());
    }

    #[test]
    fn test_interface_id_serde_as_string() {
        let id = InterfaceId::new("A", 2);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"A:2\"");
        let back: InterfaceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_link_id_is_order_independent() {
        let a = InterfaceId::new("A", 1);
        let b = InterfaceId::new("B", 1);
        assert_eq!(LinkId::from_endpoints(&a, &b), LinkId::from_endpoints(&b, &a));
        assert_eq!(LinkId::from_endpoints(&a, &b).as_str().len(), 64);
    }

    #[test]
    fn test_link_id_differs_per_pair() {
        let a = InterfaceId::new("A", 1);
        let b = InterfaceId::new("B", 1);
        let c = InterfaceId::new("B", 2);
        assert_ne!(LinkId::from_endpoints(&a, &b), LinkId::from_endpoints(&a, &c));
    }

    #[test]
    fn test_link_id_shifted_boundary() {
        let joined = LinkId::from_endpoints(&InterfaceId::new("1", 1), &InterfaceId::new("23", 4));
        let shifted = LinkId::from_endpoints(&InterfaceId::new("1", 12), &InterfaceId::new("3", 4));
        assert_ne!(joined, shifted);
    }

    #[test]
    fn test_endpoint_pair_symmetric() {
        let a = InterfaceId::new("A", 1);
        let b = InterfaceId::new("B", 1);
        let ab = EndpointPair::new(a.clone(), b.clone());
        let ba = EndpointPair::new(b.clone(), a.clone());
        assert_eq!(ab, ba);
        assert_eq!(ab.other(&a), Some(&b));
        assert_eq!(ab.other(&InterfaceId::new("C", 1)), None);
        assert!(!ab.is_degenerate());
        assert!(EndpointPair::new(a.clone(), a).is_degenerate());
    }
}
