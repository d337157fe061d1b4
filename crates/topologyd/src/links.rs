//! Link registry and link resolution.
//!
//! The table itself is not synchronised; the engine keeps it behind the
//! links lock and performs every read-modify-write sequence under a single
//! acquisition.

use crate::error::{Result, TopologyError};
use crate::model::Link;
use std::collections::BTreeSet;
use topo_common::SyncMap;
use topo_types::{EndpointPair, InterfaceId, LinkId};

#[derive(Debug, Default)]
pub struct LinkTable {
    links: SyncMap<LinkId, Link>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, id: &LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn get_mut(&mut self, id: &LinkId) -> Option<&mut Link> {
        self.links.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// Returns the link joining `a` and `b`, creating it if none exists.
    ///
    /// The endpoint pair is unordered. Fails when both endpoints are the
    /// same interface, or when either endpoint already belongs to a
    /// different link that is operationally active.
    pub fn get_or_create(
        &mut self,
        a: &InterfaceId,
        b: &InterfaceId,
        enabled: bool,
    ) -> Result<(LinkId, bool)> {
        let pair = EndpointPair::new(a.clone(), b.clone());
        if pair.is_degenerate() {
            return Err(TopologyError::LinkCreation(format!(
                "both endpoints are {}",
                a
            )));
        }

        if let Some(existing) = self.links.values().find(|l| l.pair() == pair) {
            return Ok((existing.id.clone(), false));
        }

        if let Some(claimed) = self
            .links
            .values()
            .find(|l| l.active && (l.has_endpoint(a) || l.has_endpoint(b)))
        {
            return Err(TopologyError::LinkCreation(format!(
                "endpoint of {}-{} already claimed by active link {}",
                a, b, claimed.id
            )));
        }

        let link = Link::new(a.clone(), b.clone(), enabled);
        let id = link.id.clone();
        if let Err(e) = self.links.insert_new(id.clone(), link) {
            return Err(TopologyError::LinkCreation(format!(
                "link id {} for {}-{}: {}",
                id, a, b, e
            )));
        }
        tracing::info!(link_id = %id, endpoint_a = %a, endpoint_b = %b, "Link created");
        Ok((id, true))
    }

    /// Linear scan for the link containing `interface` as an endpoint.
    ///
    /// When a moved cable left several candidates, the active one wins,
    /// otherwise the lowest id.
    pub fn find_by_interface(&self, interface: &InterfaceId) -> Option<&Link> {
        let mut found: Option<&Link> = None;
        for link in self.links.values().filter(|l| l.has_endpoint(interface)) {
            match found {
                Some(current) if current.active || !link.active => {}
                _ => found = Some(link),
            }
        }
        found
    }

    /// Ids of every link touching any of `interfaces`.
    pub fn links_of_interfaces<'a, I>(&self, interfaces: I) -> BTreeSet<LinkId>
    where
        I: IntoIterator<Item = &'a InterfaceId>,
    {
        let wanted: BTreeSet<&InterfaceId> = interfaces.into_iter().collect();
        self.links
            .values()
            .filter(|l| wanted.contains(&l.endpoint_a) || wanted.contains(&l.endpoint_b))
            .map(|l| l.id.clone())
            .collect()
    }

    /// Ids of every link with an endpoint on `switch`.
    pub fn links_of_switch(&self, switch: &str) -> BTreeSet<LinkId> {
        self.links
            .values()
            .filter(|l| l.endpoint_a.switch() == switch || l.endpoint_b.switch() == switch)
            .map(|l| l.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use pretty_assertions::assert_eq;

    fn intf(sw: &str, port: u32) -> InterfaceId {
        InterfaceId::new(sw, port)
    }

    #[test]
    fn test_get_or_create_is_symmetric() {
        let mut table = LinkTable::new();
        let (first, created) = table.get_or_create(&intf("A", 1), &intf("B", 1), true).unwrap();
        assert!(created);
        let (second, created) = table.get_or_create(&intf("B", 1), &intf("A", 1), true).unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_degenerate_pair_rejected() {
        let mut table = LinkTable::new();
        let err = table
            .get_or_create(&intf("A", 1), &intf("A", 1), true)
            .unwrap_err();
        assert!(matches!(err, TopologyError::LinkCreation(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_endpoint_claimed_by_active_link() {
        let mut table = LinkTable::new();
        let (id, _) = table.get_or_create(&intf("A", 1), &intf("B", 1), true).unwrap();
        table.get_mut(&id).unwrap().activate();

        let err = table
            .get_or_create(&intf("A", 1), &intf("C", 1), true)
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_inactive_link_endpoint_can_move() {
        let mut table = LinkTable::new();
        table.get_or_create(&intf("A", 1), &intf("B", 1), true).unwrap();
        let (moved, created) = table.get_or_create(&intf("A", 1), &intf("C", 1), true).unwrap();
        assert!(created);
        assert_eq!(table.len(), 2);

        table.get_mut(&moved).unwrap().activate();
        assert_eq!(table.find_by_interface(&intf("A", 1)).unwrap().id, moved);
    }

    #[test]
    fn test_id_collision_does_not_overwrite() {
        let mut table = LinkTable::new();
        let (id, _) = table.get_or_create(&intf("A", 1), &intf("B", 1), true).unwrap();
        {
            let link = table.get_mut(&id).unwrap();
            link.endpoint_a = intf("C", 1);
            link.endpoint_b = intf("D", 1);
        }

        let err = table
            .get_or_create(&intf("A", 1), &intf("B", 1), true)
            .unwrap_err();
        assert!(matches!(err, TopologyError::LinkCreation(_)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&id).unwrap().endpoint_a, intf("C", 1));
    }

    #[test]
    fn test_find_by_interface() {
        let mut table = LinkTable::new();
        let (id, _) = table.get_or_create(&intf("A", 1), &intf("B", 1), true).unwrap();
        assert_eq!(table.find_by_interface(&intf("B", 1)).map(|l| &l.id), Some(&id));
        assert!(table.find_by_interface(&intf("B", 2)).is_none());
    }

    #[test]
    fn test_links_of_switch_and_interfaces() {
        let mut table = LinkTable::new();
        let (ab, _) = table.get_or_create(&intf("A", 1), &intf("B", 1), true).unwrap();
        let (bc, _) = table.get_or_create(&intf("B", 2), &intf("C", 1), true).unwrap();

        assert_eq!(table.links_of_switch("B").len(), 2);
        assert_eq!(
            table.links_of_interfaces([&intf("C", 1)]),
            BTreeSet::from([bc])
        );
        assert_eq!(table.links_of_switch("A"), BTreeSet::from([ab]));
    }
}
