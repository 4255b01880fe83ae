//! v6 command dispatch: a small recursive descent over already-split
//! tokens, producing a typed [`Command`] plus the peers it targets.

use std::sync::Arc;

use ipnetwork::IpNetwork;

use super::selector::{extract_neighbors, match_peers};
use super::ApiError;
use crate::config::NeighborConfig;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RibDirection {
    In,
    Out,
}

impl RibDirection {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "in" => Some(RibDirection::In),
            "out" => Some(RibDirection::Out),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BodyKind {
    Route,
    Ipv4,
    Ipv6,
    Flow,
    Eor,
    Watchdog,
    Attributes,
    RouteRefresh,
    Operational,
    Vpls,
}

impl BodyKind {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "route" => Some(BodyKind::Route),
            "ipv4" => Some(BodyKind::Ipv4),
            "ipv6" => Some(BodyKind::Ipv6),
            "flow" => Some(BodyKind::Flow),
            "eor" => Some(BodyKind::Eor),
            "watchdog" => Some(BodyKind::Watchdog),
            "attribute" | "attributes" => Some(BodyKind::Attributes),
            "route-refresh" => Some(BodyKind::RouteRefresh),
            "operational" => Some(BodyKind::Operational),
            "vpls" => Some(BodyKind::Vpls),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    DaemonShutdown,
    DaemonReload,
    DaemonRestart,
    DaemonStatus,
    AckEnable,
    AckDisable,
    AckSilence,
    SyncEnable,
    SyncDisable,
    SessionReset,
    Ping { token: String },
    Bye,
    Help,
    Version,
    Crash,
    QueueStatus,
    ApiVersion { version: Option<String> },
    RibShow { direction: RibDirection, extensive: bool },
    RibFlushOut { peers: Vec<IpNetwork> },
    RibClear { direction: RibDirection, peers: Vec<IpNetwork> },
    PeerList,
    PeerShow { peers: Vec<IpNetwork>, detail: String },
    PeerCreate { body: String },
    PeerDelete { peers: Vec<IpNetwork> },
    Teardown { peers: Vec<IpNetwork>, code: u8 },
    Announce { peers: Vec<IpNetwork>, kind: BodyKind, body: String },
    Withdraw { peers: Vec<IpNetwork>, kind: BodyKind, body: String },
    GroupStart,
    GroupEnd,
    Comment,
}

/// Route one v6-format command. `candidates` is the peer table already
/// scoped to the peers visible to the issuing service.
pub fn dispatch(
    command: &str,
    candidates: &[(IpNetwork, Arc<NeighborConfig>)],
) -> Result<Command, ApiError> {
    let command = command.trim();
    if command.starts_with('#') || command.is_empty() {
        return Ok(Command::Comment);
    }

    let parts: Vec<&str> = command.split_whitespace().collect();
    let unknown = || ApiError::UnknownCommand(command.to_string());

    match parts[0] {
        "group-start" => return Ok(Command::GroupStart),
        "group-end" => return Ok(Command::GroupEnd),
        _ => (),
    }

    match parts[0] {
        "daemon" => {
            let action = parts.get(1).ok_or_else(unknown)?;
            match *action {
                "shutdown" => Ok(Command::DaemonShutdown),
                "reload" => Ok(Command::DaemonReload),
                "restart" => Ok(Command::DaemonRestart),
                "status" => Ok(Command::DaemonStatus),
                _ => Err(unknown()),
            }
        }
        "session" => {
            let action = parts.get(1).ok_or_else(unknown)?;
            match *action {
                "ack" => match parts.get(2) {
                    Some(&"enable") => Ok(Command::AckEnable),
                    Some(&"disable") => Ok(Command::AckDisable),
                    Some(&"silence") => Ok(Command::AckSilence),
                    _ => Err(unknown()),
                },
                "sync" => match parts.get(2) {
                    Some(&"enable") => Ok(Command::SyncEnable),
                    Some(&"disable") => Ok(Command::SyncDisable),
                    _ => Err(unknown()),
                },
                "reset" => Ok(Command::SessionReset),
                "ping" => Ok(Command::Ping {
                    token: parts[2..].join(" "),
                }),
                "bye" => Ok(Command::Bye),
                _ => Err(unknown()),
            }
        }
        "system" => {
            let action = parts.get(1).ok_or_else(unknown)?;
            match *action {
                "help" => Ok(Command::Help),
                "version" => Ok(Command::Version),
                "crash" => Ok(Command::Crash),
                "queue-status" => Ok(Command::QueueStatus),
                "api" => match parts.get(2) {
                    Some(&"version") => Ok(Command::ApiVersion {
                        version: parts.get(3).map(|v| v.to_string()),
                    }),
                    _ => Err(unknown()),
                },
                _ => Err(unknown()),
            }
        }
        "rib" => {
            let action = parts.get(1).ok_or_else(unknown)?;
            let direction = parts
                .get(2)
                .and_then(|word| RibDirection::from_word(word))
                .ok_or_else(unknown)?;
            match *action {
                "show" => Ok(Command::RibShow {
                    direction,
                    extensive: parts.get(3) == Some(&"extensive"),
                }),
                "flush" => {
                    if direction != RibDirection::Out {
                        return Err(unknown());
                    }
                    let peers = all_peers(candidates, command)?;
                    Ok(Command::RibFlushOut { peers })
                }
                "clear" => {
                    let peers = all_peers(candidates, command)?;
                    Ok(Command::RibClear { direction, peers })
                }
                _ => Err(unknown()),
            }
        }
        "peer" => dispatch_peer(command, &parts, candidates),
        _ => Err(unknown()),
    }
}

fn all_peers(
    candidates: &[(IpNetwork, Arc<NeighborConfig>)],
    command: &str,
) -> Result<Vec<IpNetwork>, ApiError> {
    if candidates.is_empty() {
        return Err(ApiError::NoMatchingPeers(command.to_string()));
    }
    Ok(candidates.iter().map(|(network, _)| *network).collect())
}

fn dispatch_peer(
    command: &str,
    parts: &[&str],
    candidates: &[(IpNetwork, Arc<NeighborConfig>)],
) -> Result<Command, ApiError> {
    let unknown = || ApiError::UnknownCommand(command.to_string());
    let action = parts.get(1).ok_or_else(unknown)?;

    // actions without a selector
    match *action {
        "list" => {
            if parts.len() != 2 {
                return Err(ApiError::InvalidCommand(command.to_string()));
            }
            return Ok(Command::PeerList);
        }
        "show" => {
            return Ok(Command::PeerShow {
                peers: candidates.iter().map(|(network, _)| *network).collect(),
                detail: parts[2..].join(" "),
            });
        }
        "create" => {
            return Ok(Command::PeerCreate {
                body: parts[2..].join(" "),
            });
        }
        "delete" => {
            let rest = format!("peer {}", parts[2..].join(" "));
            let (selectors, _) = extract_neighbors(&rest)?;
            let peers = match_peers(&selectors, candidates);
            if peers.is_empty() {
                return Err(ApiError::NoMatchingPeers(command.to_string()));
            }
            return Ok(Command::PeerDelete { peers });
        }
        _ => (),
    }

    // everything else: peer <selector> <action> ...
    let (selectors, remainder) = extract_neighbors(command)?;
    let remainder_parts: Vec<&str> = remainder.split_whitespace().collect();
    let action = remainder_parts.first().ok_or_else(unknown)?;
    let peers = match_peers(&selectors, candidates);

    match *action {
        "show" => Ok(Command::PeerShow {
            peers,
            detail: remainder_parts[1..].join(" "),
        }),
        "teardown" => {
            if peers.is_empty() {
                return Err(ApiError::NoMatchingPeers(command.to_string()));
            }
            let code = remainder_parts
                .get(1)
                .and_then(|word| word.parse().ok())
                .unwrap_or(2);
            Ok(Command::Teardown { peers, code })
        }
        "announce" | "withdraw" => {
            if peers.is_empty() {
                return Err(ApiError::NoMatchingPeers(command.to_string()));
            }
            let kind = remainder_parts
                .get(1)
                .and_then(|word| BodyKind::from_word(word))
                .ok_or_else(unknown)?;
            let mut skip = 2;
            // "announce flow route ..." carries a redundant 'route' token
            if kind == BodyKind::Flow && remainder_parts.get(2) == Some(&"route") {
                skip = 3;
            }
            let body = remainder_parts[skip..].join(" ");
            if *action == "announce" {
                Ok(Command::Announce { peers, kind, body })
            } else {
                Ok(Command::Withdraw { peers, kind, body })
            }
        }
        _ => Err(unknown()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<(IpNetwork, Arc<NeighborConfig>)> {
        let config = crate::config::from_str(
            r#"
router_id = "9.9.9.9"
local_as = 65000
[[neighbors]]
peer_address = "10.0.0.1"
peer_as = 65001
[[neighbors]]
peer_address = "10.0.0.2"
peer_as = 65002
"#,
        )
        .unwrap();
        config
            .neighbors
            .iter()
            .map(|neighbor| (neighbor.peer_address, Arc::clone(neighbor)))
            .collect()
    }

    #[test]
    fn test_daemon_commands() {
        assert_eq!(
            dispatch("daemon shutdown", &candidates()).unwrap(),
            Command::DaemonShutdown
        );
        assert_eq!(
            dispatch("daemon reload", &candidates()).unwrap(),
            Command::DaemonReload
        );
        assert!(dispatch("daemon explode", &candidates()).is_err());
    }

    #[test]
    fn test_announce_to_selected_peer() {
        let command = dispatch(
            "peer 10.0.0.1 announce route 192.0.2.0/24 next-hop 10.0.0.9",
            &candidates(),
        )
        .unwrap();
        match command {
            Command::Announce { peers, kind, body } => {
                assert_eq!(peers.len(), 1);
                assert_eq!(kind, BodyKind::Route);
                assert_eq!(body, "192.0.2.0/24 next-hop 10.0.0.9");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_announce_wildcard_targets_all() {
        let command =
            dispatch("peer * announce route 192.0.2.0/24", &candidates()).unwrap();
        match command {
            Command::Announce { peers, .. } => assert_eq!(peers.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_announce_flow_skips_route_token() {
        let command = dispatch(
            "peer 10.0.0.1 announce flow route destination 192.0.2.0/24 then discard",
            &candidates(),
        )
        .unwrap();
        match command {
            Command::Announce { kind, body, .. } => {
                assert_eq!(kind, BodyKind::Flow);
                assert_eq!(body, "destination 192.0.2.0/24 then discard");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_no_matching_peers() {
        let err = dispatch("peer 172.16.0.1 announce route 192.0.2.0/24", &candidates())
            .unwrap_err();
        match err {
            ApiError::NoMatchingPeers(_) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rib_commands() {
        assert_eq!(
            dispatch("rib show in", &candidates()).unwrap(),
            Command::RibShow {
                direction: RibDirection::In,
                extensive: false
            }
        );
        match dispatch("rib flush out", &candidates()).unwrap() {
            Command::RibFlushOut { peers } => assert_eq!(peers.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(dispatch("rib flush in", &candidates()).is_err());
    }

    #[test]
    fn test_teardown_with_code() {
        match dispatch("peer 10.0.0.1 teardown 4", &candidates()).unwrap() {
            Command::Teardown { peers, code } => {
                assert_eq!(peers.len(), 1);
                assert_eq!(code, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_group_commands() {
        assert_eq!(
            dispatch("group-start", &candidates()).unwrap(),
            Command::GroupStart
        );
        assert_eq!(
            dispatch("group-end", &candidates()).unwrap(),
            Command::GroupEnd
        );
    }

    #[test]
    fn test_peer_delete() {
        match dispatch("peer delete 10.0.0.2", &candidates()).unwrap() {
            Command::PeerDelete { peers } => assert_eq!(peers.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(dispatch("peer delete 172.16.0.9", &candidates()).is_err());
    }

    #[test]
    fn test_comment() {
        assert_eq!(dispatch("# note", &candidates()).unwrap(), Command::Comment);
    }
}
