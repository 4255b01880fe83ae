//! Adj-RIB-In: routes as last received from one peer, kept for operational
//! inspection (`rib show in`) and graceful restart. Never consulted for
//! forwarding.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use crate::wire::{AttributeCollection, Family, Nlri, Update};

#[derive(Debug)]
pub struct InEntry {
    pub nlri: Nlri,
    pub attributes: Arc<AttributeCollection>,
    pub timestamp: DateTime<Utc>,
    /// Held over from a dropped session under graceful restart
    pub stale: bool,
}

#[derive(Debug, Default)]
pub struct AdjRibIn {
    routes: HashMap<Vec<u8>, InEntry>,
    /// Retention can be disabled per neighbor (adj-rib-in false)
    pub enabled: bool,
}

impl AdjRibIn {
    pub fn new(enabled: bool) -> Self {
        Self {
            routes: HashMap::new(),
            enabled,
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &InEntry> {
        self.routes.values()
    }

    /// Fold one received UPDATE in. Re-announcement of a stale route
    /// clears its stale flag.
    pub fn apply(&mut self, update: &Update) {
        if !self.enabled {
            return;
        }
        let attributes = Arc::new(update.attributes.clone());
        for nlri in &update.announced {
            self.routes.insert(
                nlri.index(),
                InEntry {
                    nlri: nlri.clone(),
                    attributes: attributes.clone(),
                    timestamp: Utc::now(),
                    stale: false,
                },
            );
        }
        for nlri in &update.withdrawn {
            self.routes.remove(&nlri.index());
        }
    }

    /// Session dropped under graceful restart: everything becomes stale
    pub fn mark_all_stale(&mut self) {
        for entry in self.routes.values_mut() {
            entry.stale = true;
        }
    }

    /// End-of-RIB received for a family: evict what was not refreshed
    pub fn sweep_stale(&mut self, family: Family) -> usize {
        let before = self.routes.len();
        self.routes
            .retain(|_, entry| !(entry.stale && entry.nlri.family() == family));
        let removed = before - self.routes.len();
        if removed > 0 {
            debug!("evicted {} stale routes for {}", removed, family);
        }
        removed
    }

    /// Drop every route (session ended without graceful restart, or
    /// `rib clear in`)
    pub fn clear(&mut self) -> usize {
        let removed = self.routes.len();
        self.routes.clear();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::attribute::{Attribute, AttributeCollection};
    use crate::wire::nlri::Cidr;

    fn announce(prefix: &str, mask: u8) -> Update {
        let mut attributes = AttributeCollection::new();
        attributes.insert(Attribute::NextHop("10.0.0.2".parse().unwrap()));
        Update::new(
            attributes,
            vec![Nlri::unicast(Cidr::from_ip(prefix.parse().unwrap(), mask), None)],
            vec![],
        )
    }

    fn withdraw(prefix: &str, mask: u8) -> Update {
        Update::new(
            AttributeCollection::new(),
            vec![],
            vec![Nlri::unicast(Cidr::from_ip(prefix.parse().unwrap(), mask), None)],
        )
    }

    #[test]
    fn test_apply_announce_withdraw() {
        let mut rib = AdjRibIn::new(true);
        rib.apply(&announce("10.0.0.0", 16));
        rib.apply(&announce("10.1.0.0", 16));
        assert_eq!(rib.len(), 2);
        rib.apply(&withdraw("10.0.0.0", 16));
        assert_eq!(rib.len(), 1);
    }

    #[test]
    fn test_disabled_retains_nothing() {
        let mut rib = AdjRibIn::new(false);
        rib.apply(&announce("10.0.0.0", 16));
        assert!(rib.is_empty());
    }

    #[test]
    fn test_graceful_restart_stale_lifecycle() {
        // stale marking, refresh clears, EOR sweeps the leftovers
        let mut rib = AdjRibIn::new(true);
        rib.apply(&announce("10.0.0.0", 16));
        rib.apply(&announce("10.1.0.0", 16));
        rib.mark_all_stale();
        assert!(rib.entries().all(|entry| entry.stale));

        // one route re-announced before EOR
        rib.apply(&announce("10.0.0.0", 16));
        let swept = rib.sweep_stale(Family::IPV4_UNICAST);
        assert_eq!(swept, 1);
        assert_eq!(rib.len(), 1);
        assert!(rib.entries().all(|entry| !entry.stale));
    }
}
