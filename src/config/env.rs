//! Environment overrides: every global option has a dotted name
//! (`log.level`, `tcp.port`, `api.cli`) overridable through
//! `exabgp.<dotted>` or `exabgp_<dotted>` variables. Booleans accept
//! true/enable/yes/1 and their negations; lists are whitespace-separated.

use std::collections::BTreeMap;
use std::env;

use log::warn;

use super::{Config, Encoder};

const PREFIX_DOT: &str = "exabgp.";
const PREFIX_UNDERSCORE: &str = "exabgp_";

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "enable" | "enabled" | "yes" | "1" | "on" => Some(true),
        "false" | "disable" | "disabled" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Collect `exabgp.*` / `exabgp_*` variables as dotted-name overrides
pub fn overrides_from_env() -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (key, value) in env::vars() {
        let key = key.to_lowercase();
        let dotted = if let Some(rest) = key.strip_prefix(PREFIX_DOT) {
            rest.replace('_', ".")
        } else if let Some(rest) = key.strip_prefix(PREFIX_UNDERSCORE) {
            rest.replace('_', ".")
        } else {
            continue;
        };
        map.insert(dotted, value);
    }
    map
}

/// The effective settings in dotted form (for `-e`)
pub fn dotted_settings(config: &Config) -> Vec<(String, String)> {
    let encoder = |encoder: &Encoder| match encoder {
        Encoder::Json => "json".to_string(),
        Encoder::Text => "text".to_string(),
    };
    vec![
        ("log.level".to_string(), config.log.level.clone()),
        (
            "log.destination".to_string(),
            config.log.destination.clone().unwrap_or_default(),
        ),
        ("tcp.port".to_string(), config.tcp.port.to_string()),
        (
            "tcp.bind".to_string(),
            config
                .tcp
                .bind
                .iter()
                .map(|addr| addr.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        ),
        ("tcp.delay".to_string(), config.tcp.delay.to_string()),
        ("tcp.once".to_string(), config.tcp.once.to_string()),
        ("tcp.attempts".to_string(), config.tcp.attempts.to_string()),
        ("api.ack".to_string(), config.api.ack.to_string()),
        ("api.encoder".to_string(), encoder(&config.api.encoder)),
        ("api.respawn".to_string(), config.api.respawn.to_string()),
        ("api.terminate".to_string(), config.api.terminate.to_string()),
        (
            "api.pipename".to_string(),
            config.api.pipename.clone().unwrap_or_default(),
        ),
        ("api.cli".to_string(), config.api.cli.to_string()),
        (
            "pid".to_string(),
            config.pid.clone().unwrap_or_default(),
        ),
    ]
}

impl Config {
    /// Fold dotted-name overrides onto the global options. Unknown names
    /// warn and are otherwise ignored.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, String>) {
        for (key, value) in overrides {
            match key.as_str() {
                "log.level" => self.log.level = value.clone(),
                "log.destination" => self.log.destination = Some(value.clone()),
                "tcp.port" => match value.parse() {
                    Ok(port) => self.tcp.port = port,
                    Err(_) => warn!("invalid tcp.port override '{}'", value),
                },
                "tcp.bind" => {
                    self.tcp.bind = value
                        .split_whitespace()
                        .filter_map(|addr| addr.parse().ok())
                        .collect();
                }
                "tcp.delay" => match value.parse() {
                    Ok(delay) => self.tcp.delay = delay,
                    Err(_) => warn!("invalid tcp.delay override '{}'", value),
                },
                "tcp.once" => match parse_bool(value) {
                    Some(once) => self.tcp.once = once,
                    None => warn!("invalid tcp.once override '{}'", value),
                },
                "tcp.attempts" => match value.parse() {
                    Ok(attempts) => self.tcp.attempts = attempts,
                    Err(_) => warn!("invalid tcp.attempts override '{}'", value),
                },
                "api.ack" => match parse_bool(value) {
                    Some(ack) => self.api.ack = ack,
                    None => warn!("invalid api.ack override '{}'", value),
                },
                "api.encoder" => {
                    self.api.encoder = if value == "json" {
                        Encoder::Json
                    } else {
                        Encoder::Text
                    };
                }
                "api.respawn" => match parse_bool(value) {
                    Some(respawn) => self.api.respawn = respawn,
                    None => warn!("invalid api.respawn override '{}'", value),
                },
                "api.terminate" => match parse_bool(value) {
                    Some(terminate) => self.api.terminate = terminate,
                    None => warn!("invalid api.terminate override '{}'", value),
                },
                "api.pipename" => self.api.pipename = Some(value.clone()),
                "api.cli" => match parse_bool(value) {
                    Some(cli) => self.api.cli = cli,
                    None => warn!("invalid api.cli override '{}'", value),
                },
                "pid" => self.pid = Some(value.clone()),
                other => warn!("unknown environment override '{}'", other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        crate::config::from_str(
            r#"
router_id = "1.1.1.1"
local_as = 65000
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_bool() {
        for value in ["true", "enable", "yes", "1", "on"] {
            assert_eq!(parse_bool(value), Some(true), "{}", value);
        }
        for value in ["false", "disable", "no", "0", "off"] {
            assert_eq!(parse_bool(value), Some(false), "{}", value);
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = sample();
        let mut overrides = BTreeMap::new();
        overrides.insert("tcp.port".to_string(), "1790".to_string());
        overrides.insert("api.encoder".to_string(), "json".to_string());
        overrides.insert("api.terminate".to_string(), "yes".to_string());
        config.apply_overrides(&overrides);
        assert_eq!(config.tcp.port, 1790);
        assert_eq!(config.api.encoder, Encoder::Json);
        assert!(config.api.terminate);
    }

    #[test]
    fn test_dotted_settings_roundtrip() {
        let config = sample();
        let settings = dotted_settings(&config);
        assert!(settings
            .iter()
            .any(|(key, value)| key == "tcp.port" && value == "179"));
    }
}
