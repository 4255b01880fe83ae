//! TOML representation of the configuration file. Specs carry the raw
//! deserialized values; `super::Config` is the resolved in-memory form with
//! server-level defaults applied.

use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::wire::family::{Afi, Family, Safi};

pub(super) struct Defaults;

impl Defaults {
    pub(super) fn enabled() -> bool {
        true
    }
    pub(super) fn passive() -> bool {
        false
    }
    pub(super) fn hold_time() -> u16 {
        180
    }
    pub(super) fn connect_port() -> u16 {
        179
    }
    pub(super) fn listen_port() -> u16 {
        179
    }
    pub(super) fn families() -> Vec<Family> {
        vec![
            Family::new(Afi::Ipv4, Safi::Unicast),
            Family::new(Afi::Ipv4, Safi::Flow),
            Family::new(Afi::Ipv6, Safi::Unicast),
            Family::new(Afi::Ipv6, Safi::Flow),
        ]
    }
    pub(super) fn yes() -> bool {
        true
    }
    pub(super) fn no() -> bool {
        false
    }
    pub(super) fn poll_interval() -> u16 {
        30
    }
    pub(super) fn encoder() -> String {
        "text".to_string()
    }
    pub(super) fn log_level() -> String {
        "info".to_string()
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum AddPathMode {
    Disable,
    Send,
    Receive,
    SendReceive,
}

impl AddPathMode {
    pub fn sends(self) -> bool {
        matches!(self, AddPathMode::Send | AddPathMode::SendReceive)
    }
    pub fn receives(self) -> bool {
        matches!(self, AddPathMode::Receive | AddPathMode::SendReceive)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct NeighborSpec {
    // Session addressing
    pub(super) peer_address: IpNetwork,
    pub(super) local_address: Option<IpAddr>,
    pub(super) peer_as: u32,
    pub(super) local_as: Option<u32>,
    pub(super) router_id: Option<Ipv4Addr>,

    #[serde(default = "Defaults::enabled")]
    pub(super) enabled: bool,
    #[serde(default = "Defaults::passive")]
    pub(super) passive: bool,
    #[serde(default = "Defaults::hold_time")]
    pub(super) hold_time: u16,
    #[serde(default = "Defaults::connect_port")]
    pub(super) connect_port: u16,
    #[serde(default = "Defaults::listen_port")]
    pub(super) listen_port: u16,

    // Transport options, opaque to the protocol engine
    pub(super) md5: Option<String>,
    pub(super) ttl_out: Option<u8>,
    pub(super) ttl_in: Option<u8>,
    pub(super) source_interface: Option<String>,

    // Capability preferences
    #[serde(default = "Defaults::families")]
    pub(super) families: Vec<Family>,
    #[serde(default)]
    pub(super) add_path: Vec<AddPathSpec>,
    #[serde(default = "Defaults::yes")]
    pub(super) route_refresh: bool,
    /// None/absent = disabled; seconds otherwise
    pub(super) graceful_restart: Option<u16>,
    #[serde(default = "Defaults::no")]
    pub(super) extended_message: bool,
    #[serde(default = "Defaults::yes")]
    pub(super) asn4: bool,
    #[serde(default = "Defaults::no")]
    pub(super) operational: bool,
    #[serde(default = "Defaults::no")]
    pub(super) aigp: bool,
    #[serde(default = "Defaults::no")]
    pub(super) multisession: bool,

    // Bookkeeping
    #[serde(default = "Defaults::no")]
    pub(super) adj_rib_in: bool,
    #[serde(default = "Defaults::yes")]
    pub(super) adj_rib_out: bool,
    #[serde(default = "Defaults::yes")]
    pub(super) auto_flush: bool,
    #[serde(default = "Defaults::no")]
    pub(super) manual_eor: bool,
    #[serde(default = "Defaults::yes")]
    pub(super) group_updates: bool,
    pub(super) rate_limit: Option<usize>,

    /// Helper processes receiving this neighbor's events (empty = all)
    #[serde(default)]
    pub(super) api: Vec<String>,

    // Static announcements, in the API route-body grammar
    #[serde(default)]
    pub(super) routes: Vec<String>,
    #[serde(default)]
    pub(super) flows: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct AddPathSpec {
    pub(super) family: Family,
    pub(super) mode: AddPathMode,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ProcessSpec {
    pub(super) name: String,
    pub(super) run: String,
    #[serde(default = "Defaults::encoder")]
    pub(super) encoder: String,
    #[serde(default = "Defaults::no")]
    pub(super) neighbor_changes: bool,
    #[serde(default = "Defaults::no")]
    pub(super) negotiated: bool,
    #[serde(default = "Defaults::no")]
    pub(super) fsm: bool,
    #[serde(default = "Defaults::no")]
    pub(super) signal: bool,
    #[serde(default = "Defaults::no")]
    pub(super) consolidate: bool,
    #[serde(default)]
    pub(super) receive: Vec<String>,
    #[serde(default)]
    pub(super) send: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct LogSpec {
    #[serde(default = "Defaults::log_level")]
    pub(super) level: String,
    pub(super) destination: Option<String>,
}

// The whole section may be absent; hand-written Defaults keep the values
// in lockstep with the per-field serde defaults.
impl Default for LogSpec {
    fn default() -> Self {
        Self {
            level: Defaults::log_level(),
            destination: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct TcpSpec {
    pub(super) port: Option<u16>,
    pub(super) bind: Option<Vec<IpAddr>>,
    #[serde(default)]
    pub(super) delay: u16,
    #[serde(default = "Defaults::no")]
    pub(super) once: bool,
    #[serde(default)]
    pub(super) attempts: u32,
    #[serde(default = "Defaults::poll_interval")]
    pub(super) poll_interval: u16,
}

impl Default for TcpSpec {
    fn default() -> Self {
        Self {
            port: None,
            bind: None,
            delay: 0,
            once: false,
            attempts: 0,
            poll_interval: Defaults::poll_interval(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiSpec {
    #[serde(default = "Defaults::yes")]
    pub(super) ack: bool,
    #[serde(default = "Defaults::encoder")]
    pub(super) encoder: String,
    #[serde(default = "Defaults::yes")]
    pub(super) respawn: bool,
    #[serde(default = "Defaults::no")]
    pub(super) terminate: bool,
    pub(super) pipename: Option<String>,
    #[serde(default = "Defaults::no")]
    pub(super) cli: bool,
}

impl Default for ApiSpec {
    fn default() -> Self {
        Self {
            ack: true,
            encoder: Defaults::encoder(),
            respawn: true,
            terminate: false,
            pipename: None,
            cli: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ConfigSpec {
    pub(super) router_id: Ipv4Addr,
    pub(super) local_as: u32,
    pub(super) pid: Option<String>,
    #[serde(default)]
    pub(super) log: LogSpec,
    #[serde(default)]
    pub(super) tcp: TcpSpec,
    #[serde(default)]
    pub(super) api: ApiSpec,
    #[serde(default)]
    pub(super) neighbors: Vec<NeighborSpec>,
    #[serde(default)]
    pub(super) processes: Vec<ProcessSpec>,
}

impl ConfigSpec {
    pub(super) fn from_file(path: &str) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_str(&contents)
    }

    pub(super) fn from_str(contents: &str) -> io::Result<Self> {
        toml::from_str(contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
router_id = "1.1.1.1"
local_as = 65000

[tcp]
port = 1790

[api]
encoder = "json"
pipename = "bgpiped.sock"

[[neighbors]]
peer_address = "127.0.0.2"
peer_as = 65001
hold_time = 30
passive = true
families = ["ipv4 unicast", "ipv4 flow"]
routes = ["192.0.2.0/24 next-hop 10.0.0.2"]

[[neighbors]]
peer_address = "10.1.0.0/24"
peer_as = 65002
graceful_restart = 120

[[neighbors.add_path]]
family = "ipv4 unicast"
mode = "send-receive"

[[processes]]
name = "watcher"
run = "/usr/bin/watcher --json"
encoder = "json"
neighbor_changes = true
receive = ["update", "open"]
"#;

    #[test]
    fn test_parse_config() {
        let spec = ConfigSpec::from_str(SAMPLE).unwrap();
        assert_eq!(spec.router_id, Ipv4Addr::new(1, 1, 1, 1));
        assert_eq!(spec.local_as, 65000);
        assert_eq!(spec.tcp.port, Some(1790));
        assert_eq!(spec.api.encoder, "json");
        assert_eq!(spec.neighbors.len(), 2);

        let passive = &spec.neighbors[0];
        assert!(passive.passive);
        assert_eq!(passive.hold_time, 30);
        assert_eq!(passive.families.len(), 2);
        assert_eq!(passive.routes.len(), 1);

        let ranged = &spec.neighbors[1];
        assert_eq!(ranged.graceful_restart, Some(120));
        assert_eq!(ranged.add_path.len(), 1);
        assert_eq!(ranged.add_path[0].mode, AddPathMode::SendReceive);
        assert!(ranged.peer_address.contains("10.1.0.7".parse().unwrap()));

        assert_eq!(spec.processes.len(), 1);
        assert_eq!(spec.processes[0].receive, vec!["update", "open"]);
    }

    #[test]
    fn test_defaults() {
        let spec = ConfigSpec::from_str(
            r#"
router_id = "1.1.1.1"
local_as = 65000
[[neighbors]]
peer_address = "127.0.0.2"
peer_as = 65001
"#,
        )
        .unwrap();
        let neighbor = &spec.neighbors[0];
        assert!(neighbor.enabled);
        assert_eq!(neighbor.hold_time, 180);
        assert_eq!(neighbor.connect_port, 179);
        assert!(neighbor.route_refresh);
        assert!(neighbor.asn4);
        assert!(neighbor.graceful_restart.is_none());
        assert!(neighbor.group_updates);
        assert!(!neighbor.manual_eor);

        // absent sections take the same defaults as empty ones
        assert_eq!(spec.tcp.poll_interval, 30);
        assert!(spec.api.ack);
        assert!(spec.api.respawn);
        assert_eq!(spec.log.level, "info");
    }

    #[test]
    fn test_rejects_bad_toml() {
        assert!(ConfigSpec::from_str("router_id = ").is_err());
    }
}
