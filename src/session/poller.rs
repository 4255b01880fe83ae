//! Tracks idle peers, schedules outbound connection attempts with bounded
//! linear backoff, and accepts inbound connections on the configured
//! listeners.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use chrono::{Timelike, Utc};
use futures::{pin_mut, select, FutureExt, StreamExt};
use ipnetwork::IpNetwork;
use log::{debug, trace, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::time::DelayQueue;

use super::network;
use crate::config::{NeighborConfig, TcpOptions};

/// Backoff growth cap: never wait more than this many base intervals
const MAX_BACKOFF_MULTIPLIER: u32 = 8;

pub type PollerTx = mpsc::UnboundedSender<Arc<NeighborConfig>>;
pub type PollerRx = mpsc::UnboundedReceiver<Arc<NeighborConfig>>;

#[derive(Debug)]
struct IdlePeer {
    config: Arc<NeighborConfig>,
    /// Consecutive failed connect attempts; reset on establishment
    failures: u32,
    exhausted: bool,
}

impl IdlePeer {
    fn new(config: Arc<NeighborConfig>) -> Self {
        Self {
            config,
            failures: 0,
            exhausted: false,
        }
    }
}

/// A new connection handed to the manager: the stream, its neighbor
/// config, and whether we initiated it.
pub type NewConnection = (TcpStream, Arc<NeighborConfig>, bool);

pub struct Poller {
    idle_peers: HashMap<IpNetwork, IdlePeer>,
    listeners: Vec<TcpListener>,
    rx: PollerRx,
    interval: Duration,
    delay_queue: DelayQueue<IpAddr>,
    /// tcp.once: single-shot connect attempts for scripting
    once: bool,
    /// tcp.attempts: cap on consecutive attempts (0 = unlimited)
    max_attempts: u32,
    /// tcp.delay: only start outbound connects when minute % delay == 0
    connect_delay: u16,
}

impl Poller {
    pub fn new(tcp: &TcpOptions, rx: PollerRx) -> io::Result<Self> {
        let mut listeners = Vec::new();
        let binds: Vec<IpAddr> = if tcp.bind.is_empty() {
            vec![IpAddr::from(Ipv4Addr::UNSPECIFIED)]
        } else {
            tcp.bind.clone()
        };
        for bind in binds {
            let listener = network::listen(
                SocketAddr::new(bind, tcp.port),
                &network::TransportOptions::default(),
            )?;
            debug!("listening on {}:{}", bind, tcp.port);
            listeners.push(listener);
        }

        let mut delay_queue = DelayQueue::with_capacity(4);
        // keep the queue non-empty so polling it never busy-loops
        delay_queue.insert_at(
            IpAddr::from(Ipv4Addr::UNSPECIFIED),
            Instant::now() + Duration::from_secs(31_536_000),
        );
        Ok(Self {
            idle_peers: HashMap::new(),
            listeners,
            rx,
            interval: Duration::from_secs(tcp.poll_interval.into()),
            delay_queue,
            once: tcp.once,
            max_attempts: tcp.attempts,
            connect_delay: tcp.delay,
        })
    }

    pub fn upsert_config(&mut self, config: Arc<NeighborConfig>) {
        let network = config.peer_address;
        if self
            .idle_peers
            .insert(network, IdlePeer::new(config))
            .is_some()
        {
            debug!("Peer config for {} updated", network);
        } else if let Some(addr) = host_address(&network) {
            // outgoing queue only for single-host, non-passive peers
            self.delay_queue.insert(addr, Duration::from_secs(0));
        }
    }

    pub fn remove_config(&mut self, network: &IpNetwork) {
        self.idle_peers.remove(network);
    }

    /// A session established cleanly; backoff restarts from scratch when
    /// it next drops.
    pub fn mark_established(&mut self, network: &IpNetwork) {
        if let Some(peer) = self.idle_peers.get_mut(network) {
            peer.failures = 0;
            peer.exhausted = false;
        }
    }

    fn reschedule(&mut self, addr: IpAddr, failed: bool) {
        let network = match self.find_network(addr) {
            Some(network) => network,
            None => return,
        };
        let peer = match self.idle_peers.get_mut(&network) {
            Some(peer) => peer,
            None => return,
        };
        if failed {
            peer.failures = peer.failures.saturating_add(1);
        }
        if self.once {
            debug!("tcp.once set, not rescheduling {}", addr);
            return;
        }
        if self.max_attempts > 0 && peer.failures >= self.max_attempts {
            if !peer.exhausted {
                warn!(
                    "{}: giving up after {} connect attempts (tcp.attempts)",
                    addr, peer.failures
                );
                peer.exhausted = true;
            }
            return;
        }
        // bounded linear backoff
        let multiplier = (1 + peer.failures).min(MAX_BACKOFF_MULTIPLIER);
        self.delay_queue.insert(addr, self.interval * multiplier);
    }

    fn find_network(&self, addr: IpAddr) -> Option<IpNetwork> {
        self.idle_peers
            .keys()
            .find(|network| network.contains(addr))
            .copied()
    }

    fn config_for(&self, addr: IpAddr) -> Option<Arc<NeighborConfig>> {
        self.find_network(addr)
            .and_then(|network| self.idle_peers.get(&network))
            .map(|peer| Arc::clone(&peer.config))
    }

    /// Outbound connects synchronize on tcp.delay minute boundaries so a
    /// fleet of instances does not thundering-herd a peer.
    fn delay_gate_open(&self) -> bool {
        self.connect_delay == 0 || Utc::now().minute() % u32::from(self.connect_delay) == 0
    }

    pub async fn get_connection(&mut self) -> io::Result<Option<NewConnection>> {
        // resolve the select into a plain value first; the pinned futures
        // borrow fields of self and must be gone before we mutate state
        let polled = {
            let inbound = accept_any(&self.listeners).fuse();
            let outbound = self.delay_queue.next().fuse();
            let rescheduled = self.rx.recv().fuse();
            pin_mut!(inbound, outbound, rescheduled);
            select! {
                incoming = inbound => Polled::Inbound(incoming),
                expired = outbound => {
                    Polled::Outbound(expired.map(|expired| expired.into_inner()))
                },
                peer = rescheduled => Polled::Rescheduled(peer),
            }
        };

        match polled {
            Polled::Inbound(incoming) => {
                let (stream, remote) = incoming?;
                match self.config_for(remote.ip()) {
                    Some(config) if config.enabled => {
                        debug!("Incoming new connection from {}", remote.ip());
                        Ok(Some((stream, config, false)))
                    }
                    Some(_) => Ok(None),
                    None => {
                        warn!(
                            "Unexpected connection from {}: Not a configured peer",
                            remote.ip(),
                        );
                        Ok(None)
                    }
                }
            }
            Polled::Outbound(expired) => {
                let addr = match expired {
                    Some(addr) => addr,
                    None => return Ok(None),
                };
                if addr == IpAddr::from(Ipv4Addr::UNSPECIFIED) {
                    return Ok(None);
                }
                trace!("Poller outbound triggered for {}", addr);
                if !self.delay_gate_open() {
                    self.delay_queue.insert(addr, Duration::from_secs(10));
                    return Ok(None);
                }
                // peer may be gone if an incoming connection won the race
                let config = match self.config_for(addr) {
                    Some(config) if config.enabled && !config.passive => config,
                    _ => return Ok(None),
                };
                let peer_sock = SocketAddr::new(addr, config.connect_port);
                match network::connect(peer_sock, &config.transport_options()).await {
                    Ok(stream) => Ok(Some((stream, config, true))),
                    Err(err) => {
                        warn!("Error connecting to {}: {}", addr, err);
                        self.reschedule(addr, true);
                        Ok(None)
                    }
                }
            }
            Polled::Rescheduled(peer) => {
                if let Some(config) = peer {
                    let network = config.peer_address;
                    let addr = host_address(&network);
                    self.idle_peers
                        .entry(network)
                        .or_insert_with(|| IdlePeer::new(Arc::clone(&config)))
                        .config = config.clone();
                    if let Some(addr) = addr {
                        self.reschedule(addr, false);
                    }
                }
                Ok(None)
            }
        }
    }
}

enum Polled {
    Inbound(io::Result<(TcpStream, SocketAddr)>),
    Outbound(Option<IpAddr>),
    Rescheduled(Option<Arc<NeighborConfig>>),
}

impl fmt::Display for Poller {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Poller peers={}>", self.idle_peers.len())
    }
}

async fn accept_any(listeners: &[TcpListener]) -> io::Result<(TcpStream, SocketAddr)> {
    if listeners.is_empty() {
        return futures::future::pending().await;
    }
    let accepts = listeners
        .iter()
        .map(|listener| Box::pin(listener.accept()));
    let (result, _, _) = futures::future::select_all(accepts).await;
    result
}

/// Single-host networks have a connectable address; ranges accept only
pub fn host_address(network: &IpNetwork) -> Option<IpAddr> {
    let host = match network {
        IpNetwork::V4(v4) => v4.prefix() == 32,
        IpNetwork::V6(v6) => v6.prefix() == 128,
    };
    if host {
        Some(network.ip())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_address() {
        assert!(host_address(&"1.1.1.0/24".parse::<IpNetwork>().unwrap()).is_none());
        assert_eq!(
            host_address(&"1.1.1.1".parse::<IpNetwork>().unwrap()),
            Some("1.1.1.1".parse::<IpAddr>().unwrap())
        );
        assert!(host_address(&"2001:1:2::10".parse::<IpNetwork>().unwrap()).is_some());
        assert!(host_address(&"2001:1:2::/64".parse::<IpNetwork>().unwrap()).is_none());
    }
}
