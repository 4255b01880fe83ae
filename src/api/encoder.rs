//! Event serialization toward helper processes: key=value text lines or
//! one JSON object per line with the
//! `exabgp`/`time`/`host`/`pid`/`ppid`/`counter`/`type` envelope.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::session::Direction;
use crate::wire::attribute::Attribute;
use crate::wire::{Notification, Open, Operational, RouteRefresh, Update};

/// Neighbor identity carried in every envelope
#[derive(Clone, Debug)]
pub struct NeighborRef {
    pub local_address: String,
    pub peer_address: String,
    pub local_as: u32,
    pub peer_as: u32,
}

#[derive(Debug)]
pub enum Event {
    State {
        peer: NeighborRef,
        state: &'static str,
        reason: Option<String>,
    },
    Negotiated {
        peer: NeighborRef,
        summary: Value,
    },
    Fsm {
        peer: NeighborRef,
        state: String,
    },
    Signal {
        peer: NeighborRef,
        code: i32,
        name: String,
    },
    Open {
        peer: NeighborRef,
        direction: Direction,
        open: Open,
        header: Vec<u8>,
        body: Vec<u8>,
    },
    Update {
        peer: NeighborRef,
        direction: Direction,
        update: Update,
        header: Vec<u8>,
        body: Vec<u8>,
    },
    Keepalive {
        peer: NeighborRef,
        direction: Direction,
    },
    Notification {
        peer: NeighborRef,
        direction: Direction,
        notification: Notification,
    },
    Refresh {
        peer: NeighborRef,
        direction: Direction,
        refresh: RouteRefresh,
    },
    Operational {
        peer: NeighborRef,
        direction: Direction,
        operational: Operational,
    },
    Packet {
        peer: NeighborRef,
        direction: Direction,
        category: &'static str,
        header: Vec<u8>,
        body: Vec<u8>,
    },
    Shutdown,
}

impl Event {
    /// Routing key for subscriptions
    pub fn kind(&self) -> &'static str {
        match self {
            Event::State { .. } => "state",
            Event::Negotiated { .. } => "negotiated",
            Event::Fsm { .. } => "fsm",
            Event::Signal { .. } => "signal",
            Event::Open { .. } => "open",
            Event::Update { .. } => "update",
            Event::Keepalive { .. } => "keepalive",
            Event::Notification { .. } => "notification",
            Event::Refresh { .. } => "refresh",
            Event::Operational { .. } => "operational",
            Event::Packet { .. } => "packets",
            Event::Shutdown => "notification",
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Event::Open { direction, .. }
            | Event::Update { direction, .. }
            | Event::Keepalive { direction, .. }
            | Event::Notification { direction, .. }
            | Event::Refresh { direction, .. }
            | Event::Operational { direction, .. }
            | Event::Packet { direction, .. } => Some(*direction),
            _ => None,
        }
    }

    pub fn peer(&self) -> Option<&NeighborRef> {
        match self {
            Event::State { peer, .. }
            | Event::Negotiated { peer, .. }
            | Event::Fsm { peer, .. }
            | Event::Signal { peer, .. }
            | Event::Open { peer, .. }
            | Event::Update { peer, .. }
            | Event::Keepalive { peer, .. }
            | Event::Notification { peer, .. }
            | Event::Refresh { peer, .. }
            | Event::Operational { peer, .. }
            | Event::Packet { peer, .. } => Some(peer),
            Event::Shutdown => None,
        }
    }
}

pub struct Encoder {
    version: String,
    host: String,
    pid: u32,
    ppid: u32,
    counters: HashMap<String, u64>,
}

impl Encoder {
    pub fn new(host: String) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            host,
            pid: std::process::id(),
            ppid: parent_pid(),
            counters: HashMap::new(),
        }
    }

    fn counter(&mut self, peer: &NeighborRef) -> u64 {
        let count = self
            .counters
            .entry(peer.peer_address.clone())
            .or_insert(0);
        *count += 1;
        *count
    }

    /// One JSON object, newline-free
    pub fn json_line(&mut self, event: &Event) -> String {
        let mut envelope = Map::new();
        envelope.insert("exabgp".to_string(), json!(self.version));
        envelope.insert("time".to_string(), json!(Utc::now().timestamp_millis() as f64 / 1000.0));
        envelope.insert("host".to_string(), json!(self.host));
        envelope.insert("pid".to_string(), json!(self.pid));
        envelope.insert("ppid".to_string(), json!(self.ppid));
        if let Some(peer) = event.peer() {
            envelope.insert("counter".to_string(), json!(self.counter(peer)));
        }
        envelope.insert("type".to_string(), json!(self.type_name(event)));

        if let Some(peer) = event.peer() {
            let mut neighbor = Map::new();
            neighbor.insert(
                "address".to_string(),
                json!({ "local": peer.local_address, "peer": peer.peer_address }),
            );
            neighbor.insert(
                "asn".to_string(),
                json!({ "local": peer.local_as, "peer": peer.peer_as }),
            );
            if let Some(direction) = event.direction() {
                neighbor.insert("direction".to_string(), json!(direction.to_string()));
            }
            self.fill_neighbor_content(event, &mut neighbor);
            envelope.insert("neighbor".to_string(), Value::Object(neighbor));
        } else if let Event::Shutdown = event {
            envelope.insert("notification".to_string(), json!("shutdown"));
        }

        Value::Object(envelope).to_string()
    }

    fn type_name(&self, event: &Event) -> &'static str {
        match event {
            Event::State { .. } => "state",
            Event::Negotiated { .. } => "negotiated",
            Event::Fsm { .. } => "fsm",
            Event::Signal { .. } => "signal",
            Event::Open { .. } => "open",
            Event::Update { .. } => "update",
            Event::Keepalive { .. } => "keepalive",
            Event::Notification { .. } | Event::Shutdown => "notification",
            Event::Refresh { .. } => "refresh",
            Event::Operational { .. } => "operational",
            Event::Packet { category, .. } => category,
        }
    }

    fn fill_neighbor_content(&self, event: &Event, neighbor: &mut Map<String, Value>) {
        match event {
            Event::State { state, reason, .. } => {
                neighbor.insert("state".to_string(), json!(state));
                if let Some(reason) = reason {
                    neighbor.insert("reason".to_string(), json!(reason));
                }
            }
            Event::Negotiated { summary, .. } => {
                neighbor.insert("negotiated".to_string(), summary.clone());
            }
            Event::Fsm { state, .. } => {
                neighbor.insert("state".to_string(), json!(state));
            }
            Event::Signal { code, name, .. } => {
                neighbor.insert("code".to_string(), json!(code));
                neighbor.insert("name".to_string(), json!(name));
            }
            Event::Open {
                open, header, body, ..
            } => {
                let capabilities: Vec<String> = open
                    .capabilities
                    .iter()
                    .map(|capability| capability.to_string())
                    .collect();
                neighbor.insert(
                    "open".to_string(),
                    json!({
                        "version": open.version,
                        "asn": open.asn4(),
                        "hold_time": open.hold_time,
                        "router_id": open.router_id.to_string(),
                        "capabilities": capabilities,
                    }),
                );
                neighbor.insert("header".to_string(), json!(hex::encode(header)));
                neighbor.insert("body".to_string(), json!(hex::encode(body)));
            }
            Event::Update {
                update,
                header,
                body,
                ..
            } => {
                neighbor.insert("message".to_string(), update_json(update));
                neighbor.insert("header".to_string(), json!(hex::encode(header)));
                neighbor.insert("body".to_string(), json!(hex::encode(body)));
            }
            Event::Keepalive { .. } => (),
            Event::Notification {
                notification: message,
                ..
            } => {
                neighbor.insert(
                    "notification".to_string(),
                    json!({
                        "code": message.code,
                        "subcode": message.subcode,
                        "data": hex::encode(&message.data),
                    }),
                );
            }
            Event::Refresh { refresh, .. } => {
                neighbor.insert(
                    "route-refresh".to_string(),
                    json!({
                        "afi": refresh.family.afi.to_string(),
                        "safi": refresh.family.safi.to_string(),
                        "subtype": refresh.subtype.to_string(),
                    }),
                );
            }
            Event::Operational { operational, .. } => {
                neighbor.insert("operational".to_string(), operational_json(operational));
            }
            Event::Packet {
                category,
                header,
                body,
                ..
            } => {
                neighbor.insert(
                    "message".to_string(),
                    json!({
                        "category": category,
                        "header": hex::encode(header),
                        "body": hex::encode(body),
                    }),
                );
            }
            Event::Shutdown => (),
        }
    }

    /// Text form, one or more lines (an UPDATE yields one line per NLRI)
    pub fn text_lines(&mut self, event: &Event) -> Vec<String> {
        let prefix = |peer: &NeighborRef| format!("neighbor {}", peer.peer_address);
        match event {
            Event::State { peer, state, reason } => match reason {
                Some(reason) => vec![format!("{} {} {}", prefix(peer), state, reason)],
                None => vec![format!("{} {}", prefix(peer), state)],
            },
            Event::Negotiated { peer, summary } => {
                vec![format!("{} negotiated {}", prefix(peer), summary)]
            }
            Event::Fsm { peer, state } => vec![format!("{} fsm {}", prefix(peer), state)],
            Event::Signal { peer, code, name } => {
                vec![format!("{} signal {} {}", prefix(peer), code, name)]
            }
            Event::Open {
                peer,
                direction,
                open,
                ..
            } => vec![format!(
                "{} {} open version {} asn {} hold-time {} router-id {}",
                prefix(peer),
                direction_verb(*direction),
                open.version,
                open.asn4(),
                open.hold_time,
                open.router_id,
            )],
            Event::Update {
                peer,
                direction,
                update,
                ..
            } => update_text_lines(&prefix(peer), *direction, update),
            Event::Keepalive { peer, direction } => vec![format!(
                "{} {} keepalive",
                prefix(peer),
                direction_verb(*direction)
            )],
            Event::Notification {
                peer,
                direction,
                notification,
            } => vec![format!(
                "{} {} notification code {} subcode {} data {}",
                prefix(peer),
                direction_verb(*direction),
                notification.code,
                notification.subcode,
                hex::encode(&notification.data),
            )],
            Event::Refresh {
                peer,
                direction,
                refresh,
            } => vec![format!(
                "{} {} route-refresh afi {} safi {} {}",
                prefix(peer),
                direction_verb(*direction),
                refresh.family.afi,
                refresh.family.safi,
                refresh.subtype,
            )],
            Event::Operational {
                peer,
                direction,
                operational,
            } => vec![format!(
                "{} {} operational {}",
                prefix(peer),
                direction_verb(*direction),
                operational.name(),
            )],
            Event::Packet {
                peer,
                direction,
                category,
                header,
                body,
            } => vec![format!(
                "{} {} packet {} header {} body {}",
                prefix(peer),
                direction_verb(*direction),
                category,
                hex::encode(header),
                hex::encode(body),
            )],
            Event::Shutdown => vec!["shutdown".to_string()],
        }
    }
}

fn direction_verb(direction: Direction) -> &'static str {
    match direction {
        Direction::Receive => "received",
        Direction::Send => "sent",
    }
}

fn parent_pid() -> u32 {
    // getppid never fails
    unsafe { libc::getppid() as u32 }
}

/// `{ "update": { "attribute": {...}, "announce": { "<afi> <safi>":
/// { "<next-hop>": [ {nlri}... ] } }, "withdraw": {...} } }`, or the
/// per-family `eor` object.
pub fn update_json(update: &Update) -> Value {
    if let Some(family) = update.eor {
        return json!({
            "eor": {
                "afi": family.afi.to_string(),
                "safi": family.safi.to_string(),
            }
        });
    }

    let mut message = Map::new();
    let attributes = attributes_json(update);
    if !attributes.is_empty() {
        message.insert("attribute".to_string(), Value::Object(attributes));
    }

    if !update.announced.is_empty() {
        let next_hop = update
            .next_hop()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "null".to_string());
        let mut announce: Map<String, Value> = Map::new();
        for nlri in &update.announced {
            let family = nlri.family().to_string();
            let by_family = announce
                .entry(family)
                .or_insert_with(|| json!({}));
            let by_nexthop = by_family
                .as_object_mut()
                .expect("announce family object")
                .entry(next_hop.clone())
                .or_insert_with(|| json!([]));
            by_nexthop
                .as_array_mut()
                .expect("announce nlri list")
                .push(nlri.json());
        }
        message.insert("announce".to_string(), Value::Object(announce));
    }

    if !update.withdrawn.is_empty() {
        let mut withdraw: Map<String, Value> = Map::new();
        for nlri in &update.withdrawn {
            let family = nlri.family().to_string();
            let list = withdraw.entry(family).or_insert_with(|| json!([]));
            list.as_array_mut()
                .expect("withdraw nlri list")
                .push(nlri.json());
        }
        message.insert("withdraw".to_string(), Value::Object(withdraw));
    }

    json!({ "update": Value::Object(message) })
}

fn attributes_json(update: &Update) -> Map<String, Value> {
    let mut out = Map::new();
    for attribute in update.attributes.iter() {
        match attribute {
            Attribute::Origin(origin) => {
                out.insert("origin".to_string(), json!(origin.to_string()));
            }
            Attribute::AsPath(path) => {
                out.insert("as-path".to_string(), json!(path.asns()));
            }
            Attribute::Med(value) => {
                out.insert("med".to_string(), json!(value));
            }
            Attribute::LocalPref(value) => {
                out.insert("local-preference".to_string(), json!(value));
            }
            Attribute::AtomicAggregate => {
                out.insert("atomic-aggregate".to_string(), json!(true));
            }
            Attribute::Aggregator { asn, speaker } => {
                out.insert(
                    "aggregator".to_string(),
                    json!(format!("{}:{}", asn, speaker)),
                );
            }
            Attribute::Communities(communities) => {
                let rendered: Vec<String> = communities
                    .iter()
                    .map(|value| format!("{}:{}", value >> 16, value & 0xffff))
                    .collect();
                out.insert("community".to_string(), json!(rendered));
            }
            Attribute::ExtendedCommunities(communities) => {
                let rendered: Vec<String> = communities
                    .iter()
                    .map(|value| crate::utils::community::ext_community_to_display(*value))
                    .collect();
                out.insert("extended-community".to_string(), json!(rendered));
            }
            Attribute::LargeCommunities(communities) => {
                let rendered: Vec<String> = communities
                    .iter()
                    .map(|(a, b, c)| format!("{}:{}:{}", a, b, c))
                    .collect();
                out.insert("large-community".to_string(), json!(rendered));
            }
            Attribute::OriginatorId(id) => {
                out.insert("originator-id".to_string(), json!(id.to_string()));
            }
            Attribute::ClusterList(clusters) => {
                let rendered: Vec<String> =
                    clusters.iter().map(|addr| addr.to_string()).collect();
                out.insert("cluster-list".to_string(), json!(rendered));
            }
            Attribute::Aigp(metric) => {
                out.insert("aigp".to_string(), json!(metric));
            }
            Attribute::Unknown { code, data, .. } => {
                out.insert(
                    format!("attribute-0x{:02x}", code),
                    json!(hex::encode(data)),
                );
            }
            // next-hop travels with the announce object; MP carriers and
            // the remaining opaque attributes stay out of the summary
            _ => (),
        }
    }
    out
}

fn update_text_lines(prefix: &str, direction: Direction, update: &Update) -> Vec<String> {
    let verb = match direction {
        Direction::Receive => "received",
        Direction::Send => "announced",
    };
    if let Some(family) = update.eor {
        return vec![format!("{} {} eor {}", prefix, verb, family)];
    }
    let mut lines = Vec::with_capacity(update.announced.len() + update.withdrawn.len());
    let attrs = update.attributes.to_string();
    for nlri in &update.announced {
        if attrs.is_empty() {
            lines.push(format!("{} {} route {}", prefix, verb, nlri));
        } else {
            lines.push(format!("{} {} route {} {}", prefix, verb, nlri, attrs));
        }
    }
    let withdraw_verb = match direction {
        Direction::Receive => "received withdraw",
        Direction::Send => "withdrawn",
    };
    for nlri in &update.withdrawn {
        lines.push(format!("{} {} route {}", prefix, withdraw_verb, nlri));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::wire::attribute::AttributeCollection;
    use crate::wire::nlri::Cidr;
    use crate::wire::{Family, Nlri};

    fn peer() -> NeighborRef {
        NeighborRef {
            local_address: "10.0.0.9".to_string(),
            peer_address: "10.0.0.1".to_string(),
            local_as: 65000,
            peer_as: 65001,
        }
    }

    fn sample_update() -> Update {
        let mut attributes = AttributeCollection::new();
        attributes.insert(Attribute::NextHop("10.0.0.2".parse().unwrap()));
        attributes.insert(Attribute::LocalPref(200));
        Update::new(
            attributes,
            vec![Nlri::unicast(
                Cidr::from_ip("192.0.2.0".parse().unwrap(), 24),
                None,
            )],
            vec![],
        )
    }

    #[test]
    fn test_json_envelope() {
        let mut encoder = Encoder::new("testhost".to_string());
        let event = Event::Update {
            peer: peer(),
            direction: Direction::Receive,
            update: sample_update(),
            header: vec![0xff],
            body: vec![0x01],
        };
        let line = encoder.json_line(&event);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["exabgp"], env!("CARGO_PKG_VERSION"));
        assert_eq!(value["host"], "testhost");
        assert_eq!(value["type"], "update");
        assert_eq!(value["counter"], 1);
        assert_eq!(value["neighbor"]["address"]["peer"], "10.0.0.1");
        assert_eq!(value["neighbor"]["asn"]["local"], 65000);
        assert_eq!(value["neighbor"]["direction"], "receive");
        let announce = &value["neighbor"]["message"]["update"]["announce"];
        assert_eq!(announce["ipv4 unicast"]["10.0.0.2"][0]["nlri"], "192.0.2.0/24");
        assert_eq!(
            value["neighbor"]["message"]["update"]["attribute"]["local-preference"],
            200
        );
    }

    #[test]
    fn test_counter_increments_per_peer() {
        let mut encoder = Encoder::new("testhost".to_string());
        let event = Event::Keepalive {
            peer: peer(),
            direction: Direction::Receive,
        };
        let first: Value = serde_json::from_str(&encoder.json_line(&event)).unwrap();
        let second: Value = serde_json::from_str(&encoder.json_line(&event)).unwrap();
        assert_eq!(first["counter"], 1);
        assert_eq!(second["counter"], 2);
    }

    #[test]
    fn test_eor_json() {
        let value = update_json(&Update::eor(Family::IPV4_UNICAST));
        assert_eq!(value["eor"]["afi"], "ipv4");
        assert_eq!(value["eor"]["safi"], "unicast");
    }

    #[test]
    fn test_withdraw_json_keyed_by_family() {
        let update = Update::new(
            AttributeCollection::new(),
            vec![],
            vec![Nlri::unicast(
                Cidr::from_ip("192.0.2.0".parse().unwrap(), 24),
                None,
            )],
        );
        let value = update_json(&update);
        assert_eq!(
            value["update"]["withdraw"]["ipv4 unicast"][0]["nlri"],
            "192.0.2.0/24"
        );
    }

    #[test]
    fn test_text_lines() {
        let mut encoder = Encoder::new("testhost".to_string());
        let event = Event::Update {
            peer: peer(),
            direction: Direction::Send,
            update: sample_update(),
            header: vec![],
            body: vec![],
        };
        let lines = encoder.text_lines(&event);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("neighbor 10.0.0.1 announced route 192.0.2.0/24"));
        assert!(lines[0].contains("next-hop 10.0.0.2"));
    }

    #[test]
    fn test_state_text() {
        let mut encoder = Encoder::new("testhost".to_string());
        let lines = encoder.text_lines(&Event::State {
            peer: peer(),
            state: "up",
            reason: None,
        });
        assert_eq!(lines, vec!["neighbor 10.0.0.1 up"]);
    }

    #[test]
    fn test_shutdown_json() {
        let mut encoder = Encoder::new("testhost".to_string());
        let value: Value = serde_json::from_str(&encoder.json_line(&Event::Shutdown)).unwrap();
        assert_eq!(value["notification"], "shutdown");
        assert!(value.get("neighbor").is_none());
    }
}
