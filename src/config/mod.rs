mod env;
mod file;

pub use env::{dotted_settings, overrides_from_env, parse_bool};
pub use file::AddPathMode;

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use ipnetwork::IpNetwork;
use log::warn;

use crate::session::network::TransportOptions;
use crate::wire::capability::{self, AddPathDirection, Capability};
use crate::wire::open::two_byte_asn;
use crate::wire::{Family, Open};

/// Parse a TOML config file, returning the resolved configuration
pub fn from_file(path: &str) -> io::Result<Config> {
    let spec = file::ConfigSpec::from_file(path)?;
    let mut config = Config::from_spec(spec)?;
    config.apply_overrides(&overrides_from_env());
    Ok(config)
}

/// Parse configuration from a string (tests, `-p` pre-validation)
pub fn from_str(contents: &str) -> io::Result<Config> {
    let spec = file::ConfigSpec::from_str(contents)?;
    Config::from_spec(spec)
}

#[derive(Clone, Debug)]
pub struct LogOptions {
    pub level: String,
    pub destination: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TcpOptions {
    pub port: u16,
    pub bind: Vec<IpAddr>,
    /// Synchronize outbound connects to this many minutes modulo the hour
    pub delay: u16,
    /// Single-shot connection attempts, for scripting
    pub once: bool,
    /// Cap on consecutive connect attempts per peer (0 = unlimited)
    pub attempts: u32,
    pub poll_interval: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Encoder {
    Text,
    Json,
}

impl Encoder {
    fn from_name(name: &str) -> Self {
        match name {
            "json" => Encoder::Json,
            _ => Encoder::Text,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApiOptions {
    pub ack: bool,
    pub encoder: Encoder,
    pub respawn: bool,
    pub terminate: bool,
    pub pipename: Option<String>,
    pub cli: bool,
}

/// Which events a helper process receives, per direction and kind
#[derive(Clone, Debug, Default)]
pub struct MessageKinds {
    pub packets: bool,
    pub parsed: bool,
    pub consolidate: bool,
    pub open: bool,
    pub update: bool,
    pub keepalive: bool,
    pub notification: bool,
    pub refresh: bool,
    pub operational: bool,
}

impl MessageKinds {
    fn from_names(names: &[String]) -> Self {
        let mut kinds = Self::default();
        for name in names {
            match name.as_str() {
                "packets" => kinds.packets = true,
                "parsed" => kinds.parsed = true,
                "consolidate" => kinds.consolidate = true,
                "open" => kinds.open = true,
                "update" => kinds.update = true,
                "keepalive" => kinds.keepalive = true,
                "notification" => kinds.notification = true,
                "refresh" | "route-refresh" => kinds.refresh = true,
                "operational" => kinds.operational = true,
                other => warn!("unknown api message kind '{}' ignored", other),
            }
        }
        kinds
    }

    pub fn wants(&self, kind: &str) -> bool {
        match kind {
            "open" => self.open || self.parsed,
            "update" => self.update || self.parsed,
            "keepalive" => self.keepalive || self.parsed,
            "notification" => self.notification || self.parsed,
            "refresh" => self.refresh || self.parsed,
            "operational" => self.operational || self.parsed,
            "packets" => self.packets,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Subscriptions {
    pub neighbor_changes: bool,
    pub negotiated: bool,
    pub fsm: bool,
    pub signal: bool,
    pub consolidate: bool,
    pub receive: MessageKinds,
    pub send: MessageKinds,
}

#[derive(Clone, Debug)]
pub struct ProcessConfig {
    pub name: String,
    pub run: String,
    pub encoder: Encoder,
    pub subscriptions: Subscriptions,
}

#[derive(Clone, Debug)]
pub struct NeighborConfig {
    pub peer_address: IpNetwork,
    pub local_address: Option<IpAddr>,
    pub peer_as: u32,
    pub local_as: u32,
    pub router_id: Ipv4Addr,
    pub enabled: bool,
    pub passive: bool,
    pub hold_time: u16,
    pub connect_port: u16,
    pub listen_port: u16,
    pub md5: Option<String>,
    pub ttl_out: Option<u8>,
    pub ttl_in: Option<u8>,
    pub source_interface: Option<String>,
    pub families: Vec<Family>,
    pub add_path: Vec<(Family, AddPathMode)>,
    pub route_refresh: bool,
    pub graceful_restart: Option<u16>,
    pub extended_message: bool,
    pub asn4: bool,
    pub operational: bool,
    pub aigp: bool,
    pub multisession: bool,
    pub adj_rib_in: bool,
    pub adj_rib_out: bool,
    pub auto_flush: bool,
    pub manual_eor: bool,
    pub group_updates: bool,
    pub rate_limit: Option<usize>,
    pub api_processes: Vec<String>,
    pub routes: Vec<String>,
    pub flows: Vec<String>,
}

impl NeighborConfig {
    pub fn is_ebgp(&self) -> bool {
        self.peer_as != self.local_as
    }

    /// Stable name used in logs and selector matching
    pub fn name(&self) -> String {
        if self.peer_address.prefix() == host_prefix(&self.peer_address) {
            self.peer_address.ip().to_string()
        } else {
            self.peer_address.to_string()
        }
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            md5_password: self.md5.clone(),
            ttl: self.ttl_out,
            min_ttl: self.ttl_in,
            source_address: self.local_address,
            source_interface: self.source_interface.clone(),
        }
    }

    /// Does this helper process receive events for this neighbor?
    pub fn visible_to(&self, process: &str) -> bool {
        self.api_processes.is_empty()
            || self.api_processes.iter().any(|name| name == process)
    }

    /// Build the OPEN we offer this neighbor
    pub fn create_open(&self, hostname: &str) -> Open {
        let mut capabilities: Vec<Capability> = self
            .families
            .iter()
            .map(|family| Capability::Multiprotocol(*family))
            .collect();
        if self.asn4 {
            capabilities.push(Capability::Asn4(self.local_as));
        }
        if self.route_refresh {
            capabilities.push(Capability::RouteRefresh);
            capabilities.push(Capability::EnhancedRouteRefresh);
        }
        if let Some(restart_time) = self.graceful_restart {
            capabilities.push(Capability::GracefulRestart {
                restart_flags: 0,
                restart_time,
                families: self
                    .families
                    .iter()
                    .map(|family| (*family, capability::GR_FORWARDING_FLAG))
                    .collect(),
            });
        }
        if self.extended_message {
            capabilities.push(Capability::ExtendedMessage);
        }
        if self.operational {
            capabilities.push(Capability::Operational);
        }
        let addpath: Vec<(Family, AddPathDirection)> = self
            .add_path
            .iter()
            .filter_map(|(family, mode)| {
                let direction = match (mode.sends(), mode.receives()) {
                    (true, true) => AddPathDirection::SendReceive,
                    (true, false) => AddPathDirection::Send,
                    (false, true) => AddPathDirection::Receive,
                    (false, false) => return None,
                };
                Some((*family, direction))
            })
            .collect();
        if !addpath.is_empty() {
            capabilities.push(Capability::AddPath(addpath));
        }
        if !hostname.is_empty() {
            capabilities.push(Capability::Hostname {
                hostname: hostname.to_string(),
                domainname: String::new(),
            });
        }
        Open::new(
            two_byte_asn(self.local_as),
            self.hold_time,
            self.router_id,
            capabilities,
        )
    }
}

fn host_prefix(network: &IpNetwork) -> u8 {
    match network {
        IpNetwork::V4(_) => 32,
        IpNetwork::V6(_) => 128,
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub router_id: Ipv4Addr,
    pub local_as: u32,
    pub pid: Option<String>,
    pub log: LogOptions,
    pub tcp: TcpOptions,
    pub api: ApiOptions,
    pub neighbors: Vec<Arc<NeighborConfig>>,
    pub processes: Vec<ProcessConfig>,
}

impl Config {
    fn from_spec(spec: file::ConfigSpec) -> io::Result<Self> {
        let neighbors: Vec<Arc<NeighborConfig>> = spec
            .neighbors
            .iter()
            .map(|n| {
                Arc::new(NeighborConfig {
                    peer_address: n.peer_address,
                    local_address: n.local_address,
                    peer_as: n.peer_as,
                    local_as: n.local_as.unwrap_or(spec.local_as),
                    router_id: n.router_id.unwrap_or(spec.router_id),
                    enabled: n.enabled,
                    passive: n.passive,
                    hold_time: n.hold_time,
                    connect_port: n.connect_port,
                    listen_port: n.listen_port,
                    md5: n.md5.clone(),
                    ttl_out: n.ttl_out,
                    ttl_in: n.ttl_in,
                    source_interface: n.source_interface.clone(),
                    families: n.families.clone(),
                    add_path: n
                        .add_path
                        .iter()
                        .map(|spec| (spec.family, spec.mode))
                        .collect(),
                    route_refresh: n.route_refresh,
                    graceful_restart: n.graceful_restart,
                    extended_message: n.extended_message,
                    asn4: n.asn4,
                    operational: n.operational,
                    aigp: n.aigp,
                    multisession: n.multisession,
                    adj_rib_in: n.adj_rib_in,
                    adj_rib_out: n.adj_rib_out,
                    auto_flush: n.auto_flush,
                    manual_eor: n.manual_eor,
                    group_updates: n.group_updates,
                    rate_limit: n.rate_limit,
                    api_processes: n.api.clone(),
                    routes: n.routes.clone(),
                    flows: n.flows.clone(),
                })
            })
            .collect();

        let processes = spec
            .processes
            .iter()
            .map(|p| ProcessConfig {
                name: p.name.clone(),
                run: p.run.clone(),
                encoder: Encoder::from_name(&p.encoder),
                subscriptions: Subscriptions {
                    neighbor_changes: p.neighbor_changes,
                    negotiated: p.negotiated,
                    fsm: p.fsm,
                    signal: p.signal,
                    consolidate: p.consolidate,
                    receive: MessageKinds::from_names(&p.receive),
                    send: MessageKinds::from_names(&p.send),
                },
            })
            .collect();

        let config = Self {
            router_id: spec.router_id,
            local_as: spec.local_as,
            pid: spec.pid,
            log: LogOptions {
                level: spec.log.level.clone(),
                destination: spec.log.destination.clone(),
            },
            tcp: TcpOptions {
                port: spec.tcp.port.unwrap_or(179),
                bind: spec.tcp.bind.clone().unwrap_or_default(),
                delay: spec.tcp.delay,
                once: spec.tcp.once,
                attempts: spec.tcp.attempts,
                poll_interval: spec.tcp.poll_interval,
            },
            api: ApiOptions {
                ack: spec.api.ack,
                encoder: Encoder::from_name(&spec.api.encoder),
                respawn: spec.api.respawn,
                terminate: spec.api.terminate,
                pipename: spec.api.pipename.clone(),
                cli: spec.api.cli,
            },
            neighbors,
            processes,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> io::Result<()> {
        let invalid = |reason: String| Err(io::Error::new(io::ErrorKind::InvalidData, reason));
        if self.local_as == 0 {
            return invalid("local_as must be non-zero".to_string());
        }
        for neighbor in &self.neighbors {
            if neighbor.hold_time != 0 && neighbor.hold_time < 3 {
                return invalid(format!(
                    "neighbor {}: hold_time must be 0 or >= 3",
                    neighbor.name()
                ));
            }
            if neighbor.families.is_empty() {
                return invalid(format!(
                    "neighbor {}: at least one family required",
                    neighbor.name()
                ));
            }
            if neighbor.multisession {
                warn!(
                    "neighbor {}: multisession is accepted but runs as a single session",
                    neighbor.name()
                );
            }
        }
        for process in &self.processes {
            if process.run.trim().is_empty() {
                return invalid(format!("process {}: empty run command", process.name));
            }
        }
        Ok(())
    }

    pub fn find_process(&self, name: &str) -> Option<&ProcessConfig> {
        self.processes.iter().find(|process| process.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(extra: &str) -> String {
        format!(
            r#"
router_id = "1.1.1.1"
local_as = 65000
[[neighbors]]
peer_address = "10.0.0.1"
peer_as = 65001
{}"#,
            extra
        )
    }

    #[test]
    fn test_resolved_defaults() {
        let config = from_str(&minimal("")).unwrap();
        let neighbor = &config.neighbors[0];
        assert_eq!(neighbor.local_as, 65000);
        assert_eq!(neighbor.router_id, "1.1.1.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(neighbor.name(), "10.0.0.1");
        assert!(neighbor.is_ebgp());
        assert_eq!(config.tcp.port, 179);
    }

    #[test]
    fn test_validation_rejects_bad_hold_time() {
        assert!(from_str(&minimal("hold_time = 2")).is_err());
    }

    #[test]
    fn test_create_open_capabilities() {
        let config = from_str(&minimal("graceful_restart = 120\noperational = true")).unwrap();
        let open = config.neighbors[0].create_open("rtr1");
        assert_eq!(open.asn4(), 65000);
        assert!(open.find(capability::GRACEFUL_RESTART).is_some());
        assert!(open.find(capability::OPERATIONAL).is_some());
        assert!(open.find(capability::ASN4).is_some());
        assert!(open.find(capability::HOSTNAME).is_some());
        // one multiprotocol capability per configured family
        assert_eq!(open.multiprotocol_families().len(), 4);
    }

    #[test]
    fn test_visible_to() {
        let config = from_str(&minimal("api = [\"watcher\"]")).unwrap();
        assert!(config.neighbors[0].visible_to("watcher"));
        assert!(!config.neighbors[0].visible_to("other"));
        let config = from_str(&minimal("")).unwrap();
        assert!(config.neighbors[0].visible_to("anyone"));
    }
}
