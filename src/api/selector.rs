//! Neighbor selectors: `peer <ip|*> [local-ip <ip>] [local-as <asn>]
//! [peer-as <asn>] [router-id <ip>] [family-allowed <family|in-open>] …`,
//! with bracket syntax for multiple selectors. Selectors match the peer
//! table by literal equality of the named fields.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

use super::ApiError;
use crate::config::NeighborConfig;
use crate::wire::Family;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighborSelector {
    /// None = wildcard `*`
    pub peer_ip: Option<IpAddr>,
    pub local_ip: Option<IpAddr>,
    pub local_as: Option<u32>,
    pub peer_as: Option<u32>,
    pub router_id: Option<IpAddr>,
    /// "in-open" or "<afi>-<safi>" / "<afi> <safi>"
    pub family_allowed: Option<String>,
}

impl NeighborSelector {
    pub fn wildcard() -> Self {
        Self::default()
    }

    pub fn matches(&self, config: &NeighborConfig) -> bool {
        if let Some(peer_ip) = self.peer_ip {
            let host = config.peer_address.prefix()
                == match config.peer_address {
                    IpNetwork::V4(_) => 32,
                    IpNetwork::V6(_) => 128,
                };
            let exact = host && config.peer_address.ip() == peer_ip;
            if !exact && !config.peer_address.contains(peer_ip) {
                return false;
            }
        }
        if let Some(local_ip) = self.local_ip {
            if config.local_address != Some(local_ip) {
                return false;
            }
        }
        if let Some(local_as) = self.local_as {
            if config.local_as != local_as {
                return false;
            }
        }
        if let Some(peer_as) = self.peer_as {
            if config.peer_as != peer_as {
                return false;
            }
        }
        if let Some(router_id) = self.router_id {
            if IpAddr::from(config.router_id) != router_id {
                return false;
            }
        }
        if let Some(family) = &self.family_allowed {
            if family != "in-open" {
                match Family::from_name(family) {
                    Some(family) => {
                        if !config.families.contains(&family) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
        }
        true
    }
}

fn parse_selector_words(words: &[&str]) -> Result<NeighborSelector, ApiError> {
    let mut selector = NeighborSelector::default();
    let mut idx = 0usize;

    match words.first() {
        Some(&"*") => {
            idx += 1;
        }
        Some(word) => {
            let ip: IpAddr = word.parse().map_err(|_| {
                ApiError::InvalidCommand(format!("expected IP or * in selector, got: {}", word))
            })?;
            selector.peer_ip = Some(ip);
            idx += 1;
        }
        None => {
            return Err(ApiError::InvalidCommand("empty selector".to_string()));
        }
    }

    while idx < words.len() {
        let key = words[idx];
        let value = words.get(idx + 1).ok_or_else(|| {
            ApiError::InvalidCommand(format!("selector {} requires a value", key))
        })?;
        match key {
            "local-ip" => {
                selector.local_ip = Some(value.parse().map_err(|_| {
                    ApiError::InvalidCommand(format!("invalid local-ip: {}", value))
                })?);
                idx += 2;
            }
            "local-as" => {
                selector.local_as = Some(value.parse().map_err(|_| {
                    ApiError::InvalidCommand(format!("invalid local-as: {}", value))
                })?);
                idx += 2;
            }
            "peer-as" => {
                selector.peer_as = Some(value.parse().map_err(|_| {
                    ApiError::InvalidCommand(format!("invalid peer-as: {}", value))
                })?);
                idx += 2;
            }
            "router-id" => {
                selector.router_id = Some(value.parse().map_err(|_| {
                    ApiError::InvalidCommand(format!("invalid router-id: {}", value))
                })?);
                idx += 2;
            }
            "family-allowed" => {
                if *value == "in-open" || value.contains('-') {
                    selector.family_allowed = Some(value.to_string());
                    idx += 2;
                } else {
                    let safi = words.get(idx + 2).ok_or_else(|| {
                        ApiError::InvalidCommand(
                            "family-allowed requires afi and safi".to_string(),
                        )
                    })?;
                    selector.family_allowed = Some(format!("{} {}", value, safi));
                    idx += 3;
                }
            }
            other => {
                return Err(ApiError::InvalidCommand(format!(
                    "unknown selector key: {}",
                    other
                )));
            }
        }
    }
    Ok(selector)
}

/// Split a `peer …` command into its selectors and the remaining action
/// text. Handles `peer * …`, `peer <ip> [keys] …` and
/// `peer [<sel>, <sel>] …`.
pub fn extract_neighbors(command: &str) -> Result<(Vec<NeighborSelector>, String), ApiError> {
    let rest = command
        .trim()
        .strip_prefix("peer")
        .ok_or_else(|| ApiError::InvalidCommand(format!("not a peer command: {}", command)))?
        .trim_start();

    // bracketed multi-selector form
    if let Some(inner_start) = rest.strip_prefix('[') {
        let end = inner_start
            .find(']')
            .ok_or_else(|| ApiError::InvalidCommand("unterminated '[' selector".to_string()))?;
        let inner = &inner_start[..end];
        let remainder = inner_start[end + 1..].trim().to_string();
        let mut selectors = Vec::new();
        for part in inner.split(',') {
            let words: Vec<&str> = part.split_whitespace().collect();
            if words.is_empty() {
                continue;
            }
            selectors.push(parse_selector_words(&words)?);
        }
        if selectors.is_empty() {
            return Err(ApiError::InvalidCommand("empty selector list".to_string()));
        }
        return Ok((selectors, remainder));
    }

    // single selector: words until a non-selector token
    let words: Vec<&str> = rest.split_whitespace().collect();
    let mut end = 0usize;
    if !words.is_empty() {
        end = 1;
        while end < words.len() {
            match words[end] {
                "local-ip" | "local-as" | "peer-as" | "router-id" => end += 2,
                "family-allowed" => {
                    let value = words.get(end + 1).copied().unwrap_or("");
                    if value == "in-open" || value.contains('-') {
                        end += 2;
                    } else {
                        end += 3;
                    }
                }
                _ => break,
            }
        }
    }
    if end == 0 {
        return Err(ApiError::InvalidCommand("missing selector".to_string()));
    }
    let end = end.min(words.len());
    let selector = parse_selector_words(&words[..end])?;
    let remainder = words[end..].join(" ");
    Ok((vec![selector], remainder))
}

/// Match selectors against the peer table (already scoped to the peers the
/// issuing service may see).
pub fn match_peers(
    selectors: &[NeighborSelector],
    candidates: &[(IpNetwork, std::sync::Arc<NeighborConfig>)],
) -> Vec<IpNetwork> {
    candidates
        .iter()
        .filter(|(_, config)| selectors.iter().any(|selector| selector.matches(config)))
        .map(|(network, _)| *network)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn neighbor(peer: &str, peer_as: u32) -> (IpNetwork, Arc<NeighborConfig>) {
        let config = crate::config::from_str(&format!(
            r#"
router_id = "9.9.9.9"
local_as = 65000
[[neighbors]]
peer_address = "{}"
peer_as = {}
"#,
            peer, peer_as
        ))
        .unwrap();
        (
            config.neighbors[0].peer_address,
            Arc::clone(&config.neighbors[0]),
        )
    }

    #[test]
    fn test_extract_single() {
        let (selectors, rest) =
            extract_neighbors("peer 10.0.0.1 announce route 10.0.0.0/24").unwrap();
        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].peer_ip, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(rest, "announce route 10.0.0.0/24");
    }

    #[test]
    fn test_extract_wildcard() {
        let (selectors, rest) = extract_neighbors("peer * teardown 2").unwrap();
        assert_eq!(selectors[0], NeighborSelector::wildcard());
        assert_eq!(rest, "teardown 2");
    }

    #[test]
    fn test_extract_with_keys() {
        let (selectors, rest) =
            extract_neighbors("peer 10.0.0.1 peer-as 65001 router-id 1.2.3.4 teardown").unwrap();
        assert_eq!(selectors[0].peer_as, Some(65001));
        assert_eq!(selectors[0].router_id, Some("1.2.3.4".parse().unwrap()));
        assert_eq!(rest, "teardown");
    }

    #[test]
    fn test_extract_bracketed() {
        let (selectors, rest) = extract_neighbors(
            "peer [10.0.0.1 peer-as 65001, 10.0.0.2] announce route 10.0.0.0/24",
        )
        .unwrap();
        assert_eq!(selectors.len(), 2);
        assert_eq!(selectors[0].peer_as, Some(65001));
        assert_eq!(selectors[1].peer_ip, Some("10.0.0.2".parse().unwrap()));
        assert_eq!(rest, "announce route 10.0.0.0/24");
    }

    #[test]
    fn test_match_peers() {
        let peers = vec![neighbor("10.0.0.1", 65001), neighbor("10.0.0.2", 65002)];
        let (selectors, _) = extract_neighbors("peer 10.0.0.1 teardown").unwrap();
        let matched = match_peers(&selectors, &peers);
        assert_eq!(matched, vec![peers[0].0]);

        let (selectors, _) = extract_neighbors("peer * teardown").unwrap();
        assert_eq!(match_peers(&selectors, &peers).len(), 2);

        let (selectors, _) = extract_neighbors("peer 10.0.0.1 peer-as 65002 teardown").unwrap();
        assert!(match_peers(&selectors, &peers).is_empty());
    }

    #[test]
    fn test_family_allowed_match() {
        let peers = vec![neighbor("10.0.0.1", 65001)];
        let (selectors, _) =
            extract_neighbors("peer 10.0.0.1 family-allowed ipv4-unicast teardown").unwrap();
        assert_eq!(match_peers(&selectors, &peers).len(), 1);
        let (selectors, _) =
            extract_neighbors("peer 10.0.0.1 family-allowed l2vpn-evpn teardown").unwrap();
        assert!(match_peers(&selectors, &peers).is_empty());
    }
}
