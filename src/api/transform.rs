//! Rewrite v4 (action-first) API commands to the v6 (target-first) grammar
//! so both versions share one dispatcher. The rewrite is total over the
//! declared v4 grammar and idempotent on v6 input.

use super::ApiError;

const ANNOUNCE_SUBCOMMANDS: &[&str] = &[
    "route",
    "route-refresh",
    "ipv4",
    "ipv6",
    "flow",
    "eor",
    "watchdog",
    "attribute",
    "attributes",
    "operational",
    "vpls",
];

const WITHDRAW_SUBCOMMANDS: &[&str] = &[
    "route",
    "ipv4",
    "ipv6",
    "flow",
    "watchdog",
    "attribute",
    "attributes",
    "vpls",
];

const NEIGHBOR_SELECTOR_KEYS: &[&str] = &[
    "peer-as",
    "local-as",
    "local-ip",
    "router-id",
    "family-allowed",
];

const NEIGHBOR_ACTIONS: &[&str] = &["announce", "withdraw", "teardown"];

/// v6 prefixes pass through untouched
const V6_PREFIXES: &[&str] = &["daemon ", "session ", "system ", "rib ", "peer "];

fn is_ip_or_wildcard(word: &str) -> bool {
    word == "*" || word.matches('.').count() == 3 || word.contains(':')
}

/// Transform a v4 command to v6 format. v6 input, comments and empty lines
/// come back unchanged; commands outside both grammars come back unchanged
/// for the dispatcher to reject.
pub fn v4_to_v6(command: &str) -> Result<String, ApiError> {
    let command = command.trim();
    if command.is_empty() || command.starts_with('#') {
        return Ok(command.to_string());
    }
    if V6_PREFIXES.iter().any(|prefix| command.starts_with(prefix)) {
        return Ok(command.to_string());
    }

    let words: Vec<&str> = command.split_whitespace().collect();
    if words.is_empty() {
        return Ok(command.to_string());
    }

    if words[0] == "neighbor" {
        return transform_neighbor(&words);
    }

    if let Some((prefix, consumed)) = tree_lookup(&words) {
        let rest = words[consumed..].join(" ");
        if rest.is_empty() {
            return Ok(prefix.to_string());
        }
        return Ok(format!("{} {}", prefix, rest));
    }
    Ok(command.to_string())
}

/// Does this command belong to the v4 grammar?
pub fn is_v4_command(command: &str) -> bool {
    let command = command.trim();
    if command.is_empty() || command.starts_with('#') {
        return false;
    }
    if V6_PREFIXES.iter().any(|prefix| command.starts_with(prefix)) {
        return false;
    }
    let words: Vec<&str> = command.split_whitespace().collect();
    match words.first() {
        Some(&"neighbor") => true,
        Some(&word) => tree_lookup(&[
            word,
            words.get(1).copied().unwrap_or(""),
            words.get(2).copied().unwrap_or(""),
        ])
        .is_some(),
        None => false,
    }
}

/// The dispatch tree: v4 command words to the v6 prefix that replaces
/// them, plus how many words were consumed.
fn tree_lookup(words: &[&str]) -> Option<(&'static str, usize)> {
    let second = words.get(1).copied().unwrap_or("");
    let third = words.get(2).copied().unwrap_or("");
    match words[0] {
        // daemon control
        "shutdown" => Some(("daemon shutdown", 1)),
        "reload" => Some(("daemon reload", 1)),
        "restart" => Some(("daemon restart", 1)),
        "status" => Some(("daemon status", 1)),
        // session management
        "enable-ack" => Some(("session ack enable", 1)),
        "disable-ack" => Some(("session ack disable", 1)),
        "silence-ack" => Some(("session ack silence", 1)),
        "enable-sync" => Some(("session sync enable", 1)),
        "disable-sync" => Some(("session sync disable", 1)),
        "reset" => Some(("session reset", 1)),
        "ping" => Some(("session ping", 1)),
        "bye" => Some(("session bye", 1)),
        // system commands
        "help" => Some(("system help", 1)),
        "version" => Some(("system version", 1)),
        "crash" => Some(("system crash", 1)),
        "queue-status" => Some(("system queue-status", 1)),
        "api" if second == "version" => Some(("system api version", 2)),
        // peer operations
        "teardown" => Some(("peer * teardown", 1)),
        // rib operations (layered: show/flush/clear -> adj-rib -> in/out)
        "show" => match (second, third) {
            ("adj-rib", "in") => Some(("rib show in", 3)),
            ("adj-rib", "out") => Some(("rib show out", 3)),
            ("neighbor", _) => Some(("peer show", 2)),
            _ => None,
        },
        "flush" => match (second, third) {
            ("adj-rib", "out") => Some(("rib flush out", 3)),
            _ => None,
        },
        "clear" => match (second, third) {
            ("adj-rib", "in") => Some(("rib clear in", 3)),
            ("adj-rib", "out") => Some(("rib clear out", 3)),
            _ => None,
        },
        // peer management
        "create" if second == "neighbor" => Some(("peer create", 2)),
        "delete" if second == "neighbor" => Some(("peer delete", 2)),
        // announce/withdraw with explicit subcommands
        "announce" => ANNOUNCE_SUBCOMMANDS
            .iter()
            .find(|sub| **sub == second)
            .map(|sub| (announce_prefix(sub), 2)),
        "withdraw" => WITHDRAW_SUBCOMMANDS
            .iter()
            .find(|sub| **sub == second)
            .map(|sub| (withdraw_prefix(sub), 2)),
        _ => None,
    }
}

fn announce_prefix(sub: &str) -> &'static str {
    match sub {
        "route" => "peer * announce route",
        "route-refresh" => "peer * announce route-refresh",
        "ipv4" => "peer * announce ipv4",
        "ipv6" => "peer * announce ipv6",
        "flow" => "peer * announce flow",
        "eor" => "peer * announce eor",
        "watchdog" => "peer * announce watchdog",
        "attribute" => "peer * announce attribute",
        "attributes" => "peer * announce attributes",
        "operational" => "peer * announce operational",
        "vpls" => "peer * announce vpls",
        _ => unreachable!(),
    }
}

fn withdraw_prefix(sub: &str) -> &'static str {
    match sub {
        "route" => "peer * withdraw route",
        "ipv4" => "peer * withdraw ipv4",
        "ipv6" => "peer * withdraw ipv6",
        "flow" => "peer * withdraw flow",
        "watchdog" => "peer * withdraw watchdog",
        "attribute" => "peer * withdraw attribute",
        "attributes" => "peer * withdraw attributes",
        "vpls" => "peer * withdraw vpls",
        _ => unreachable!(),
    }
}

/// One selector group: IP (or *) plus optional key/value pairs.
/// Returns the group's words and the index of the next word.
fn parse_selector_group(words: &[&str], start: usize) -> Result<(Vec<String>, usize), ApiError> {
    let mut parts: Vec<String> = Vec::new();
    let mut idx = start;

    match words.get(idx) {
        Some(word) if is_ip_or_wildcard(word) => {
            parts.push(word.to_string());
            idx += 1;
        }
        Some(word) => {
            return Err(ApiError::InvalidCommand(format!(
                "expected IP or * in selector, got: {}",
                word
            )));
        }
        None => {
            return Err(ApiError::InvalidCommand(
                "expected IP or * in selector".to_string(),
            ));
        }
    }

    while let Some(word) = words.get(idx) {
        if *word == "," {
            break;
        }
        if let Some(stripped) = word.strip_suffix(',') {
            if !stripped.is_empty() {
                parts.push(stripped.to_string());
            }
            idx += 1;
            break;
        }
        if NEIGHBOR_ACTIONS.contains(word) {
            break;
        }
        if NEIGHBOR_SELECTOR_KEYS.contains(word) {
            parts.push(word.to_string());
            let value = words.get(idx + 1).ok_or_else(|| {
                ApiError::InvalidCommand(format!("selector {} requires a value", word))
            })?;
            if *word == "family-allowed" && *value != "in-open" && !value.contains('-') {
                // two-word family form: afi safi
                let safi = words.get(idx + 2).ok_or_else(|| {
                    ApiError::InvalidCommand(
                        "family-allowed requires afi and safi (or in-open or afi-safi)"
                            .to_string(),
                    )
                })?;
                parts.push(value.to_string());
                let ends_group = safi.ends_with(',');
                parts.push(safi.trim_end_matches(',').to_string());
                idx += 3;
                if ends_group {
                    break;
                }
            } else {
                let ends_group = value.ends_with(',');
                parts.push(value.trim_end_matches(',').to_string());
                idx += 2;
                if ends_group {
                    break;
                }
            }
            continue;
        }
        // unknown word: end of selector
        break;
    }
    Ok((parts, idx))
}

/// `neighbor <sel>[, neighbor <sel>]… <action> …` to the v6 peer form.
fn transform_neighbor(words: &[&str]) -> Result<String, ApiError> {
    if words.len() < 2 {
        return Err(ApiError::InvalidCommand(
            "neighbor requires at least IP/wildcard".to_string(),
        ));
    }
    if !is_ip_or_wildcard(words[1]) {
        return Err(ApiError::InvalidCommand(format!(
            "expected IP or * after neighbor, got: {}",
            words[1]
        )));
    }

    let mut selector_groups: Vec<Vec<String>> = Vec::new();
    let mut idx = 1;
    while idx < words.len() {
        if words[idx] == "neighbor" || words[idx] == "," {
            idx += 1;
            continue;
        }
        if NEIGHBOR_ACTIONS.contains(&words[idx]) {
            break;
        }
        let (group, next) = parse_selector_group(words, idx)?;
        if !group.is_empty() {
            selector_groups.push(group);
        }
        idx = next;
    }
    if selector_groups.is_empty() {
        return Err(ApiError::InvalidCommand(
            "neighbor command missing selector".to_string(),
        ));
    }

    let action = *words.get(idx).ok_or_else(|| {
        ApiError::InvalidCommand(
            "neighbor command missing action (announce/withdraw/teardown)".to_string(),
        )
    })?;
    if !NEIGHBOR_ACTIONS.contains(&action) {
        return Err(ApiError::InvalidCommand(format!(
            "expected action, got: {}",
            action
        )));
    }
    if let Some(subcommand) = words.get(idx + 1) {
        let valid = match action {
            "announce" => ANNOUNCE_SUBCOMMANDS.contains(subcommand),
            "withdraw" => WITHDRAW_SUBCOMMANDS.contains(subcommand),
            _ => true,
        };
        if !valid {
            return Err(ApiError::InvalidCommand(format!(
                "unknown {} subcommand: {}",
                action, subcommand
            )));
        }
    }

    let action_and_args = words[idx..].join(" ");

    // wildcard or single selector: no brackets
    if selector_groups.len() == 1 {
        let selector = selector_groups[0].join(" ");
        return Ok(format!("peer {} {}", selector, action_and_args));
    }
    let selectors: Vec<String> = selector_groups.iter().map(|group| group.join(" ")).collect();
    Ok(format!(
        "peer [{}] {}",
        selectors.join(", "),
        action_and_args
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v6(input: &str) -> String {
        v4_to_v6(input).unwrap()
    }

    #[test]
    fn test_daemon_commands() {
        assert_eq!(v6("shutdown"), "daemon shutdown");
        assert_eq!(v6("reload"), "daemon reload");
        assert_eq!(v6("restart"), "daemon restart");
        assert_eq!(v6("status"), "daemon status");
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(v6("enable-ack"), "session ack enable");
        assert_eq!(v6("silence-ack"), "session ack silence");
        assert_eq!(v6("disable-sync"), "session sync disable");
        assert_eq!(v6("reset"), "session reset");
        assert_eq!(v6("ping"), "session ping");
    }

    #[test]
    fn test_rib_commands() {
        assert_eq!(v6("show adj-rib in"), "rib show in");
        assert_eq!(v6("show adj-rib out extensive"), "rib show out extensive");
        assert_eq!(v6("flush adj-rib out"), "rib flush out");
        assert_eq!(v6("clear adj-rib in"), "rib clear in");
    }

    #[test]
    fn test_announce_route() {
        assert_eq!(
            v6("announce route 10.0.0.0/24 next-hop 1.2.3.4"),
            "peer * announce route 10.0.0.0/24 next-hop 1.2.3.4"
        );
        assert_eq!(
            v6("withdraw route 10.0.0.0/24"),
            "peer * withdraw route 10.0.0.0/24"
        );
        assert_eq!(
            v6("announce eor ipv4 unicast"),
            "peer * announce eor ipv4 unicast"
        );
    }

    #[test]
    fn test_neighbor_single_selector() {
        assert_eq!(
            v6("neighbor 192.168.1.1 announce route 10.0.0.0/24 next-hop 1.2.3.4"),
            "peer 192.168.1.1 announce route 10.0.0.0/24 next-hop 1.2.3.4"
        );
    }

    #[test]
    fn test_neighbor_selector_keys() {
        assert_eq!(
            v6("neighbor 10.0.0.1 router-id 1.2.3.4 announce route 10.0.0.0/24"),
            "peer 10.0.0.1 router-id 1.2.3.4 announce route 10.0.0.0/24"
        );
    }

    #[test]
    fn test_neighbor_multiple_selectors() {
        assert_eq!(
            v6("neighbor 10.0.0.1, neighbor 10.0.0.2 announce route 10.0.0.0/24"),
            "peer [10.0.0.1, 10.0.0.2] announce route 10.0.0.0/24"
        );
        assert_eq!(
            v6("neighbor 10.0.0.1 local-as 65000, neighbor 10.0.0.2 teardown 2"),
            "peer [10.0.0.1 local-as 65000, 10.0.0.2] teardown 2"
        );
    }

    #[test]
    fn test_neighbor_wildcard() {
        assert_eq!(
            v6("neighbor * announce route 10.0.0.0/24"),
            "peer * announce route 10.0.0.0/24"
        );
    }

    #[test]
    fn test_idempotent_on_v6() {
        for command in [
            "daemon shutdown",
            "peer 10.0.0.1 announce route 10.0.0.0/24",
            "rib show in",
            "session ack enable",
        ] {
            assert_eq!(v6(command), command);
            // and a second application changes nothing either
            assert_eq!(v6(&v6(command)), command);
        }
    }

    #[test]
    fn test_unknown_passes_through() {
        assert_eq!(v6("frobnicate everything"), "frobnicate everything");
        assert_eq!(v6("# comment"), "# comment");
        assert_eq!(v6(""), "");
    }

    #[test]
    fn test_invalid_neighbor_structure() {
        assert!(v4_to_v6("neighbor").is_err());
        assert!(v4_to_v6("neighbor notanip announce route 10.0.0.0/24").is_err());
        assert!(v4_to_v6("neighbor 10.0.0.1 announce frobnicate").is_err());
        assert!(v4_to_v6("neighbor 10.0.0.1").is_err());
    }

    #[test]
    fn test_family_allowed_selector() {
        assert_eq!(
            v6("neighbor 10.0.0.1 family-allowed ipv4 unicast announce route 10.0.0.0/24"),
            "peer 10.0.0.1 family-allowed ipv4 unicast announce route 10.0.0.0/24"
        );
        assert_eq!(
            v6("neighbor 10.0.0.1 family-allowed in-open announce route 10.0.0.0/24"),
            "peer 10.0.0.1 family-allowed in-open announce route 10.0.0.0/24"
        );
    }

    #[test]
    fn test_is_v4_command() {
        assert!(is_v4_command("shutdown"));
        assert!(is_v4_command("announce route 10.0.0.0/24"));
        assert!(is_v4_command("neighbor 10.0.0.1 teardown"));
        assert!(!is_v4_command("daemon shutdown"));
        assert!(!is_v4_command("# note"));
        assert!(!is_v4_command("frobnicate"));
    }
}
