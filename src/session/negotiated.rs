//! The merged view of the two OPENs, computed once during OpenConfirm and
//! immutable for the life of the session.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;

use log::warn;

use crate::wire::capability::{self, Capability};
use crate::wire::{CodecContext, Family, Open};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshLevel {
    None,
    Normal,
    Enhanced,
}

impl fmt::Display for RefreshLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RefreshLevel::None => "disabled",
            RefreshLevel::Normal => "normal",
            RefreshLevel::Enhanced => "enhanced",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GracefulRestart {
    pub restart_time: u16,
    /// The peer is restarting and asked us to treat its routes as stale
    pub restarting: bool,
    /// (family, forwarding-state preserved)
    pub families: Vec<(Family, bool)>,
}

#[derive(Clone, Debug)]
pub struct Negotiated {
    pub local_asn: u32,
    pub peer_asn: u32,
    pub peer_router_id: Ipv4Addr,
    pub asn4: bool,
    pub hold_time: u16,
    pub keepalive: u16,
    pub families: Vec<Family>,
    pub addpath_send: HashSet<Family>,
    pub addpath_receive: HashSet<Family>,
    pub msg_size: u16,
    pub refresh: RefreshLevel,
    pub graceful_restart: Option<GracefulRestart>,
    pub operational: bool,
    pub peer_hostname: Option<String>,
    pub sent_open: Open,
    pub received_open: Open,
}

impl Negotiated {
    /// Merge our sent OPEN with the peer's.
    pub fn build(sent: Open, received: Open) -> Self {
        let local_families = sent.multiprotocol_families();
        let peer_families = received.multiprotocol_families();
        let families: Vec<Family> = local_families
            .iter()
            .filter(|family| peer_families.contains(family))
            .copied()
            .collect();
        for family in &local_families {
            if !peer_families.contains(family) {
                warn!("family {} not advertised by peer, unusable", family);
            }
        }

        let hold_time = sent.hold_time.min(received.hold_time);
        let keepalive = if hold_time == 0 {
            0
        } else {
            (hold_time / 3).max(1)
        };

        let asn4 = sent.find(capability::ASN4).is_some()
            && received.find(capability::ASN4).is_some();

        let msg_size = if sent.find(capability::EXTENDED_MESSAGE).is_some()
            && received.find(capability::EXTENDED_MESSAGE).is_some()
        {
            crate::wire::MAX_EXTENDED_MESSAGE
        } else {
            crate::wire::MAX_MESSAGE
        };

        let refresh = match (
            refresh_offered(&sent),
            refresh_offered(&received),
            enhanced_refresh_offered(&sent),
            enhanced_refresh_offered(&received),
        ) {
            (_, _, true, true) => RefreshLevel::Enhanced,
            (true, true, _, _) => RefreshLevel::Normal,
            _ => RefreshLevel::None,
        };

        let (addpath_send, addpath_receive) = addpath_matrices(&sent, &received, &families);

        let graceful_restart = match (
            sent.find(capability::GRACEFUL_RESTART),
            received.find(capability::GRACEFUL_RESTART),
        ) {
            (
                Some(_),
                Some(Capability::GracefulRestart {
                    restart_flags,
                    restart_time,
                    families: gr_families,
                }),
            ) => Some(GracefulRestart {
                restart_time: *restart_time,
                restarting: restart_flags & capability::GR_RESTART_FLAG != 0,
                families: gr_families
                    .iter()
                    .map(|(family, flags)| {
                        (*family, flags & capability::GR_FORWARDING_FLAG != 0)
                    })
                    .collect(),
            }),
            _ => None,
        };

        let operational = sent.find(capability::OPERATIONAL).is_some()
            && received.find(capability::OPERATIONAL).is_some();

        let peer_hostname = received.capabilities.iter().find_map(|cap| match cap {
            Capability::Hostname { hostname, .. } => Some(hostname.clone()),
            _ => None,
        });

        Self {
            local_asn: sent.asn4(),
            peer_asn: received.asn4(),
            peer_router_id: received.router_id,
            asn4,
            hold_time,
            keepalive,
            families,
            addpath_send,
            addpath_receive,
            msg_size,
            refresh,
            graceful_restart,
            operational,
            peer_hostname,
            sent_open: sent,
            received_open: received,
        }
    }

    pub fn codec_context(&self) -> CodecContext {
        CodecContext {
            asn4: self.asn4,
            local_asn: self.local_asn,
            peer_asn: self.peer_asn,
            max_message_size: self.msg_size,
            addpath_send: self.addpath_send.clone(),
            addpath_receive: self.addpath_receive.clone(),
        }
    }

    pub fn is_ebgp(&self) -> bool {
        self.local_asn != self.peer_asn
    }

    /// Did the peer claim forwarding-state preservation for this family?
    pub fn gr_preserves(&self, family: Family) -> bool {
        self.graceful_restart
            .as_ref()
            .map(|gr| {
                gr.families
                    .iter()
                    .any(|(gr_family, preserved)| *gr_family == family && *preserved)
            })
            .unwrap_or(false)
    }
}

fn refresh_offered(open: &Open) -> bool {
    open.find(capability::ROUTE_REFRESH).is_some()
        || open.find(capability::CISCO_ROUTE_REFRESH).is_some()
}

fn enhanced_refresh_offered(open: &Open) -> bool {
    open.find(capability::ENHANCED_ROUTE_REFRESH).is_some()
}

/// Per-family AddPath in each direction: we send path-ids only when we
/// offered send and the peer offered receive, and vice versa.
fn addpath_matrices(
    sent: &Open,
    received: &Open,
    families: &[Family],
) -> (HashSet<Family>, HashSet<Family>) {
    let local = addpath_entries(sent);
    let peer = addpath_entries(received);
    let mut send = HashSet::new();
    let mut receive = HashSet::new();
    for family in families {
        if let (Some(ours), Some(theirs)) = (local.get(family), peer.get(family)) {
            if ours.sends() && theirs.receives() {
                send.insert(*family);
            }
            if ours.receives() && theirs.sends() {
                receive.insert(*family);
            }
        }
    }
    (send, receive)
}

fn addpath_entries(
    open: &Open,
) -> std::collections::HashMap<Family, capability::AddPathDirection> {
    open.capabilities
        .iter()
        .filter_map(|cap| match cap {
            Capability::AddPath(entries) => Some(entries.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::capability::AddPathDirection;
    use crate::wire::family::{Afi, Safi};

    fn open(asn: u32, hold: u16, router_id: &str, extra: Vec<Capability>) -> Open {
        let mut capabilities = vec![
            Capability::Multiprotocol(Family::IPV4_UNICAST),
            Capability::Asn4(asn),
        ];
        capabilities.extend(extra);
        Open::new(
            crate::wire::open::two_byte_asn(asn),
            hold,
            router_id.parse().unwrap(),
            capabilities,
        )
    }

    #[test]
    fn test_hold_time_is_minimum() {
        // holdtime is min(local, peer); keepalive is a third of it
        let negotiated = Negotiated::build(
            open(65000, 90, "1.1.1.1", vec![]),
            open(65001, 180, "2.2.2.2", vec![]),
        );
        assert_eq!(negotiated.hold_time, 90);
        assert_eq!(negotiated.keepalive, 30);
        assert!(negotiated.is_ebgp());
    }

    #[test]
    fn test_keepalive_clamped_to_one_second() {
        let negotiated = Negotiated::build(
            open(65000, 3, "1.1.1.1", vec![]),
            open(65001, 3, "2.2.2.2", vec![]),
        );
        assert_eq!(negotiated.keepalive, 1);
    }

    #[test]
    fn test_family_intersection() {
        let v6 = Family::new(Afi::Ipv6, Safi::Unicast);
        let local = Open::new(
            65000,
            90,
            "1.1.1.1".parse().unwrap(),
            vec![
                Capability::Multiprotocol(Family::IPV4_UNICAST),
                Capability::Multiprotocol(v6),
                Capability::Asn4(65000),
            ],
        );
        let peer = open(65001, 90, "2.2.2.2", vec![]);
        let negotiated = Negotiated::build(local, peer);
        assert_eq!(negotiated.families, vec![Family::IPV4_UNICAST]);
    }

    #[test]
    fn test_addpath_directions_are_independent() {
        let local = open(
            65000,
            90,
            "1.1.1.1",
            vec![Capability::AddPath(vec![(
                Family::IPV4_UNICAST,
                AddPathDirection::SendReceive,
            )])],
        );
        let peer = open(
            65001,
            90,
            "2.2.2.2",
            vec![Capability::AddPath(vec![(
                Family::IPV4_UNICAST,
                AddPathDirection::Send,
            )])],
        );
        let negotiated = Negotiated::build(local, peer);
        // peer only sends: we receive but may not send
        assert!(negotiated.addpath_receive.contains(&Family::IPV4_UNICAST));
        assert!(!negotiated.addpath_send.contains(&Family::IPV4_UNICAST));
    }

    #[test]
    fn test_graceful_restart() {
        let gr = Capability::GracefulRestart {
            restart_flags: capability::GR_RESTART_FLAG,
            restart_time: 120,
            families: vec![(Family::IPV4_UNICAST, capability::GR_FORWARDING_FLAG)],
        };
        let local = open(
            65000,
            90,
            "1.1.1.1",
            vec![Capability::GracefulRestart {
                restart_flags: 0,
                restart_time: 120,
                families: vec![(Family::IPV4_UNICAST, 0)],
            }],
        );
        let peer = open(65001, 90, "2.2.2.2", vec![gr]);
        let negotiated = Negotiated::build(local, peer);
        let gr = negotiated.graceful_restart.as_ref().unwrap();
        assert_eq!(gr.restart_time, 120);
        assert!(gr.restarting);
        assert!(negotiated.gr_preserves(Family::IPV4_UNICAST));
    }

    #[test]
    fn test_asn_trans_resolution() {
        let negotiated = Negotiated::build(
            open(4_200_000_001, 90, "1.1.1.1", vec![]),
            open(65001, 90, "2.2.2.2", vec![]),
        );
        assert_eq!(negotiated.local_asn, 4_200_000_001);
        assert_eq!(negotiated.sent_open.asn, 23456);
    }
}
