//! Adj-RIB-Out: the set of routes advertised (or queued for advertisement)
//! to one peer, with attribute-grouped UPDATE construction and watchdog
//! gating.

use std::collections::{HashMap, VecDeque};

use log::debug;

use crate::rib::{Action, Change};
use crate::wire::{Family, Nlri, Update};

/// Rough byte budget for the NLRI section of one grouped UPDATE, leaving
/// headroom for the header and attribute section of a 4096-byte message.
const UPDATE_NLRI_BUDGET: usize = 3500;

#[derive(Debug)]
struct CachedRoute {
    change: Change,
    /// Drained to the wire at least once
    advertised: bool,
    /// Temporarily withdrawn because its watchdog is down
    suppressed: bool,
}

#[derive(Debug, Default)]
pub struct AdjRibOut {
    cached: HashMap<Vec<u8>, CachedRoute>,
    new_queue: VecDeque<Change>,
    refresh_queue: VecDeque<Change>,
    watchdogs: HashMap<String, bool>,
    /// Set by `rib flush out`; gates draining on auto-flush-disabled peers
    flush_requested: bool,
}

impl AdjRibOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cached.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.new_queue.is_empty() || !self.refresh_queue.is_empty()
    }

    fn watchdog_is_up(&self, name: &str) -> bool {
        self.watchdogs.get(name).copied().unwrap_or(true)
    }

    /// Force a named watchdog down without touching routes (used for
    /// routes configured to start withdrawn).
    pub fn seed_watchdog_down(&mut self, name: &str) {
        self.watchdogs.entry(name.to_string()).or_insert(false);
    }

    /// Idempotent install of an announcement; replaces any earlier pending
    /// change for the same NLRI.
    pub fn insert_announcement(&mut self, change: Change) {
        debug_assert_eq!(change.action, Action::Announce);
        let key = change.key();
        self.cancel_pending(&key);

        if let Some(existing) = self.cached.get(&key) {
            if existing.advertised
                && !existing.suppressed
                && existing.change.attributes == change.attributes
            {
                // already advertised with these attributes
                self.cached.insert(
                    key,
                    CachedRoute {
                        change,
                        advertised: true,
                        suppressed: false,
                    },
                );
                return;
            }
        }

        let suppressed = change
            .watchdog
            .as_deref()
            .map(|name| !self.watchdog_is_up(name))
            .unwrap_or(false);
        if !suppressed {
            self.new_queue.push_back(change.clone());
        }
        self.cached.insert(
            key,
            CachedRoute {
                change,
                advertised: false,
                suppressed,
            },
        );
    }

    /// Queue a withdrawal; a pending announcement for the same NLRI is
    /// cancelled. Nothing goes on the wire unless the route was advertised.
    pub fn insert_withdraw(&mut self, nlri: Nlri) {
        let key = nlri.index();
        self.cancel_pending(&key);
        if let Some(existing) = self.cached.remove(&key) {
            if existing.advertised && !existing.suppressed {
                self.new_queue.push_back(Change::withdraw(nlri));
            }
        }
    }

    fn cancel_pending(&mut self, key: &[u8]) {
        self.new_queue.retain(|pending| pending.key() != key);
        self.refresh_queue.retain(|pending| pending.key() != key);
    }

    /// Pending changes in insertion order (new before refresh)
    pub fn queued_changes(&self) -> impl Iterator<Item = &Change> {
        self.new_queue.iter().chain(self.refresh_queue.iter())
    }

    /// Every currently cached route
    pub fn cached_changes(&self) -> impl Iterator<Item = &Change> {
        self.cached.values().map(|cached| &cached.change)
    }

    /// Copy every cached, unsuppressed route into the refresh queue
    pub fn mark_for_refresh(&mut self) {
        for cached in self.cached.values() {
            if !cached.suppressed {
                self.refresh_queue.push_back(cached.change.clone());
            }
        }
    }

    /// Route-refresh for one family only
    pub fn mark_for_refresh_family(&mut self, family: Family) {
        for cached in self.cached.values() {
            if !cached.suppressed && cached.change.nlri.family() == family {
                self.refresh_queue.push_back(cached.change.clone());
            }
        }
    }

    /// Fresh session: drop anything queued and re-announce the full table
    /// exactly once.
    pub fn resend_all(&mut self) {
        self.new_queue.clear();
        self.refresh_queue.clear();
        for cached in self.cached.values_mut() {
            cached.advertised = false;
        }
        self.mark_for_refresh();
        self.flush_requested = true;
    }

    pub fn request_flush(&mut self) {
        self.flush_requested = true;
    }

    pub fn flush_requested(&self) -> bool {
        self.flush_requested
    }

    pub fn clear_flush_request(&mut self) {
        self.flush_requested = false;
    }

    /// Bring a named watchdog up; its suppressed routes are re-announced
    pub fn announce_watchdog(&mut self, name: &str) {
        self.watchdogs.insert(name.to_string(), true);
        let mut to_queue = Vec::new();
        for cached in self.cached.values_mut() {
            if cached.change.watchdog.as_deref() == Some(name) && cached.suppressed {
                cached.suppressed = false;
                cached.advertised = false;
                to_queue.push(cached.change.clone());
            }
        }
        self.new_queue.extend(to_queue);
    }

    /// Take a named watchdog down; its routes are withdrawn while it stays
    /// down but remain cached
    pub fn withdraw_watchdog(&mut self, name: &str) {
        self.watchdogs.insert(name.to_string(), false);
        let mut to_queue = Vec::new();
        for cached in self.cached.values_mut() {
            if cached.change.watchdog.as_deref() == Some(name) && !cached.suppressed {
                cached.suppressed = true;
                if cached.advertised {
                    to_queue.push(Change::withdraw(cached.change.nlri.clone()));
                }
            }
        }
        self.new_queue.extend(to_queue);
    }

    /// Drop every cached route and anything pending
    pub fn clear(&mut self) {
        self.cached.clear();
        self.new_queue.clear();
        self.refresh_queue.clear();
    }

    /// Build the UPDATEs for everything queued, clearing the queues as it
    /// goes. With `group` set, consecutive changes sharing an attribute
    /// fingerprint coalesce into one UPDATE with many NLRIs. `limit` caps
    /// the number of UPDATEs produced in this drain (rate limiting);
    /// leftovers stay queued.
    pub fn drain_updates(
        &mut self,
        group: bool,
        families: &[Family],
        limit: Option<usize>,
    ) -> Vec<Update> {
        let mut updates: Vec<Update> = Vec::new();

        loop {
            if let Some(limit) = limit {
                if updates.len() >= limit {
                    break;
                }
            }
            let change = match self.pop_queued(families) {
                Some(change) => change,
                None => break,
            };

            match change.action {
                Action::Announce => {
                    if let Some(cached) = self.cached.get_mut(&change.key()) {
                        cached.advertised = true;
                    }
                    let fingerprint = change.attributes.fingerprint();
                    let family = change.nlri.family();
                    let mergeable = group
                        && updates.last().map_or(false, |update| {
                            update.withdrawn.is_empty()
                                && !update.announced.is_empty()
                                && update.announced[0].family() == family
                                && update.attributes.fingerprint() == fingerprint
                                && update_nlri_bytes(update) < UPDATE_NLRI_BUDGET
                        });
                    if mergeable {
                        let update = updates.last_mut().expect("grouped update exists");
                        update.announced.push(change.nlri);
                    } else {
                        updates.push(Update::new(
                            (*change.attributes).clone(),
                            vec![change.nlri],
                            vec![],
                        ));
                    }
                }
                Action::Withdraw => {
                    let family = change.nlri.family();
                    let mergeable = group
                        && updates.last().map_or(false, |update| {
                            update.announced.is_empty()
                                && !update.withdrawn.is_empty()
                                && update.withdrawn[0].family() == family
                                && update_nlri_bytes(update) < UPDATE_NLRI_BUDGET
                        });
                    if mergeable {
                        let update = updates.last_mut().expect("grouped update exists");
                        update.withdrawn.push(change.nlri);
                    } else {
                        updates.push(Update::new(
                            Default::default(),
                            vec![],
                            vec![change.nlri],
                        ));
                    }
                }
            }
        }
        updates
    }

    fn pop_queued(&mut self, families: &[Family]) -> Option<Change> {
        loop {
            let change = match self.new_queue.pop_front() {
                Some(change) => change,
                None => self.refresh_queue.pop_front()?,
            };
            if families.is_empty() || families.contains(&change.nlri.family()) {
                return Some(change);
            }
            debug!("dropping queued {} (family not negotiated)", change.nlri);
        }
    }
}

fn update_nlri_bytes(update: &Update) -> usize {
    update
        .announced
        .iter()
        .chain(update.withdrawn.iter())
        .map(|nlri| nlri.index().len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::wire::attribute::{Attribute, AttributeCollection};
    use crate::wire::nlri::Cidr;

    fn attrs(next_hop: &str) -> Arc<AttributeCollection> {
        let mut collection = AttributeCollection::new();
        collection.insert(Attribute::NextHop(next_hop.parse().unwrap()));
        Arc::new(collection)
    }

    fn route(prefix: &str, mask: u8) -> Nlri {
        Nlri::unicast(Cidr::from_ip(prefix.parse().unwrap(), mask), None)
    }

    fn drain_all(rib: &mut AdjRibOut) -> Vec<Update> {
        rib.drain_updates(true, &[], None)
    }

    #[test]
    fn test_drain_preserves_multiset() {
        let mut rib = AdjRibOut::new();
        let shared = attrs("10.0.0.2");
        for i in 0..5u8 {
            rib.insert_announcement(Change::announce(
                route(&format!("10.{}.0.0", i), 16),
                shared.clone(),
            ));
        }
        let updates = drain_all(&mut rib);
        let nlri_count: usize = updates.iter().map(|u| u.announced.len()).sum();
        assert_eq!(nlri_count, 5);
        assert!(!rib.has_pending());
    }

    #[test]
    fn test_withdraw_then_announce_yields_one_announce() {
        let mut rib = AdjRibOut::new();
        // route must have been advertised for a withdraw to queue at all
        rib.insert_announcement(Change::announce(route("10.0.0.0", 16), attrs("10.0.0.2")));
        drain_all(&mut rib);

        rib.insert_withdraw(route("10.0.0.0", 16));
        rib.insert_announcement(Change::announce(route("10.0.0.0", 16), attrs("10.0.0.3")));
        let updates = drain_all(&mut rib);
        let announces: usize = updates.iter().map(|u| u.announced.len()).sum();
        let withdraws: usize = updates.iter().map(|u| u.withdrawn.len()).sum();
        assert_eq!((announces, withdraws), (1, 0));
    }

    #[test]
    fn test_announce_then_withdraw_before_drain_is_silent() {
        let mut rib = AdjRibOut::new();
        rib.insert_announcement(Change::announce(route("10.0.0.0", 16), attrs("10.0.0.2")));
        rib.insert_withdraw(route("10.0.0.0", 16));
        assert!(drain_all(&mut rib).is_empty());
        assert!(rib.is_empty());
    }

    #[test]
    fn test_mark_for_refresh_emits_each_cached_once() {
        let mut rib = AdjRibOut::new();
        let shared = attrs("10.0.0.2");
        for i in 0..3u8 {
            rib.insert_announcement(Change::announce(
                route(&format!("10.{}.0.0", i), 16),
                shared.clone(),
            ));
        }
        drain_all(&mut rib);

        rib.mark_for_refresh();
        let updates = drain_all(&mut rib);
        let nlri_count: usize = updates.iter().map(|u| u.announced.len()).sum();
        assert_eq!(nlri_count, 3);
        // queues fully cleared: a second drain sends nothing
        assert!(drain_all(&mut rib).is_empty());
    }

    #[test]
    fn test_grouping_is_non_trivial() {
        let mut rib = AdjRibOut::new();
        let shared = attrs("10.0.0.2");
        for i in 0..100u32 {
            rib.insert_announcement(Change::announce(
                route(&format!("10.{}.{}.0", i / 256, i % 256), 24),
                shared.clone(),
            ));
        }
        let updates = drain_all(&mut rib);
        assert!(updates.len() < 100);
        assert!(updates.iter().all(|u| u.announced.len() >= 2));
    }

    #[test]
    fn test_different_attributes_do_not_group() {
        let mut rib = AdjRibOut::new();
        rib.insert_announcement(Change::announce(route("10.0.0.0", 16), attrs("10.0.0.2")));
        rib.insert_announcement(Change::announce(route("10.1.0.0", 16), attrs("10.0.0.3")));
        let updates = drain_all(&mut rib);
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn test_watchdog_cycle() {
        let mut rib = AdjRibOut::new();
        let change = Change::announce(route("10.0.0.0", 16), attrs("10.0.0.2"))
            .with_watchdog(Some("dog".to_string()));
        rib.insert_announcement(change);
        drain_all(&mut rib);

        rib.withdraw_watchdog("dog");
        let updates = drain_all(&mut rib);
        assert_eq!(updates.iter().map(|u| u.withdrawn.len()).sum::<usize>(), 1);
        // still cached, just suppressed
        assert_eq!(rib.len(), 1);

        rib.announce_watchdog("dog");
        let updates = drain_all(&mut rib);
        assert_eq!(updates.iter().map(|u| u.announced.len()).sum::<usize>(), 1);
    }

    #[test]
    fn test_route_behind_downed_watchdog_not_announced() {
        let mut rib = AdjRibOut::new();
        rib.seed_watchdog_down("dog");
        let change = Change::announce(route("10.0.0.0", 16), attrs("10.0.0.2"))
            .with_watchdog(Some("dog".to_string()));
        rib.insert_announcement(change);
        assert!(drain_all(&mut rib).is_empty());

        rib.announce_watchdog("dog");
        let updates = drain_all(&mut rib);
        assert_eq!(updates.iter().map(|u| u.announced.len()).sum::<usize>(), 1);
    }

    #[test]
    fn test_rate_limit_leaves_remainder_queued() {
        let mut rib = AdjRibOut::new();
        for i in 0..4u8 {
            rib.insert_announcement(Change::announce(
                route(&format!("10.{}.0.0", i), 16),
                attrs(&format!("10.0.0.{}", i + 1)),
            ));
        }
        let first = rib.drain_updates(false, &[], Some(2));
        assert_eq!(first.len(), 2);
        assert!(rib.has_pending());
        let rest = rib.drain_updates(false, &[], None);
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn test_family_filter() {
        let mut rib = AdjRibOut::new();
        rib.insert_announcement(Change::announce(route("10.0.0.0", 16), attrs("10.0.0.2")));
        let updates = rib.drain_updates(true, &[Family::new(crate::wire::Afi::Ipv6, crate::wire::Safi::Unicast)], None);
        assert!(updates.is_empty());
        assert!(!rib.has_pending());
    }
}
