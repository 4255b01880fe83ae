//! Owns the peer table and every active session, turns poller connections
//! into sessions (with RFC 4271 §6.8 collision resolution), and reconciles
//! the table across configuration reloads.

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use super::poller::{host_address, Poller, PollerTx};
use super::{collision_keep_local, Session, SessionEvent};
use crate::config::{Config, NeighborConfig};
use crate::rib::{AdjRibIn, AdjRibOut};
use crate::utils::{parse_flow_body, parse_route_body};

/// Per-peer state that outlives any one TCP session
pub struct PeerRecord {
    pub config: Arc<NeighborConfig>,
    pub rib_out: Arc<Mutex<AdjRibOut>>,
    pub rib_in: Arc<Mutex<AdjRibIn>>,
    /// Created through `peer create` rather than configuration; survives
    /// reload
    pub dynamic: bool,
    /// Graceful-restart stale window, armed when an Established session
    /// drops with the GR capability negotiated
    pub gr_deadline: Option<Instant>,
    /// Keys of routes sourced from configuration, for reload reconciliation
    config_route_keys: HashSet<Vec<u8>>,
}

impl PeerRecord {
    fn new(config: Arc<NeighborConfig>, dynamic: bool) -> Self {
        let adj_rib_in = config.adj_rib_in;
        Self {
            config,
            rib_out: Arc::new(Mutex::new(AdjRibOut::new())),
            rib_in: Arc::new(Mutex::new(AdjRibIn::new(adj_rib_in))),
            dynamic,
            gr_deadline: None,
            config_route_keys: HashSet::new(),
        }
    }
}

pub struct SessionManager {
    pub peers: HashMap<IpNetwork, PeerRecord>,
    // Active sessions by remote address
    pub sessions: HashMap<IpAddr, Session>,
    poller: Poller,
    poller_tx: PollerTx,
    hostname: String,
    sent_tx: Option<mpsc::UnboundedSender<(IpAddr, crate::wire::Message)>>,
}

impl SessionManager {
    pub fn new(config: &Config, hostname: String) -> std::io::Result<Self> {
        let (poller_tx, poller_rx) = mpsc::unbounded_channel();
        let poller = Poller::new(&config.tcp, poller_rx)?;
        let mut manager = Self {
            peers: HashMap::new(),
            sessions: HashMap::new(),
            poller,
            poller_tx,
            hostname,
            sent_tx: None,
        };
        manager.apply_config(config);
        Ok(manager)
    }

    /// Install the channel that copies sent messages toward the API layer
    pub fn set_sent_channel(
        &mut self,
        sent_tx: mpsc::UnboundedSender<(IpAddr, crate::wire::Message)>,
    ) {
        self.sent_tx = Some(sent_tx);
    }

    /// Reconcile the peer table with a (re)loaded configuration: static
    /// peers are created/updated/removed; dynamic peers survive unless a
    /// static peer now claims their address.
    pub fn apply_config(&mut self, config: &Config) {
        let configured: HashMap<IpNetwork, Arc<NeighborConfig>> = config
            .neighbors
            .iter()
            .map(|neighbor| (neighbor.peer_address, Arc::clone(neighbor)))
            .collect();

        // removed static peers (and dynamic peers displaced by new statics)
        let removed: Vec<IpNetwork> = self
            .peers
            .iter()
            .filter(|(network, record)| {
                if record.dynamic {
                    configured.contains_key(*network)
                } else {
                    !configured.contains_key(*network)
                }
            })
            .map(|(network, _)| *network)
            .collect();
        for network in removed {
            warn!("peer {} de-configured", network);
            self.remove_peer_record(&network, 3);
        }

        for (network, neighbor) in configured {
            match self.peers.get_mut(&network) {
                Some(record) => {
                    record.config = Arc::clone(&neighbor);
                }
                None => {
                    self.peers
                        .insert(network, PeerRecord::new(Arc::clone(&neighbor), false));
                }
            }
            if let Some(addr) = host_address(&network) {
                if let Some(session) = self.sessions.get_mut(&addr) {
                    session.update_config(Arc::clone(&neighbor));
                }
            }
            self.poller.upsert_config(neighbor);
        }
    }

    /// Parse and install configuration-sourced routes for every peer,
    /// withdrawing the ones a reload dropped.
    pub async fn seed_config_routes(&mut self) {
        for record in self.peers.values_mut() {
            let mut changes = Vec::new();
            let mut seed_down = Vec::new();
            for body in &record.config.routes {
                match parse_route_body(body, true) {
                    Ok(mut parsed) => {
                        changes.append(&mut parsed.changes);
                        seed_down.append(&mut parsed.start_down_watchdogs);
                    }
                    Err(err) => warn!(
                        "{}: bad static route '{}': {}",
                        record.config.name(),
                        body,
                        err
                    ),
                }
            }
            for body in &record.config.flows {
                match parse_flow_body(body) {
                    Ok(change) => changes.push(change),
                    Err(err) => warn!(
                        "{}: bad static flow '{}': {}",
                        record.config.name(),
                        body,
                        err
                    ),
                }
            }

            let mut rib = record.rib_out.lock().await;
            for name in seed_down {
                rib.seed_watchdog_down(&name);
            }
            let new_keys: HashSet<Vec<u8>> = changes.iter().map(|change| change.key()).collect();
            // withdraw config routes a reload removed
            let stale: Vec<Vec<u8>> = record
                .config_route_keys
                .difference(&new_keys)
                .cloned()
                .collect();
            for key in stale {
                let nlri = rib
                    .cached_changes()
                    .find(|change| change.key() == key)
                    .map(|change| change.nlri.clone());
                if let Some(nlri) = nlri {
                    rib.insert_withdraw(nlri);
                }
            }
            for change in changes {
                rib.insert_announcement(change);
            }
            record.config_route_keys = new_keys;
        }
    }

    /// `peer create`: fails when the address collides with any known peer
    pub fn create_peer(&mut self, config: NeighborConfig) -> Result<(), String> {
        let network = config.peer_address;
        if self.peers.contains_key(&network) {
            return Err(format!("peer {} already exists", network));
        }
        let config = Arc::new(config);
        self.peers
            .insert(network, PeerRecord::new(Arc::clone(&config), true));
        self.poller.upsert_config(config);
        info!("created dynamic peer {}", network);
        Ok(())
    }

    /// `peer delete`
    pub fn delete_peer(&mut self, network: &IpNetwork) -> Result<(), String> {
        if !self.peers.contains_key(network) {
            return Err(format!("peer {} does not exist", network));
        }
        self.remove_peer_record(network, 3);
        info!("deleted peer {}", network);
        Ok(())
    }

    fn remove_peer_record(&mut self, network: &IpNetwork, cease_subcode: u8) {
        self.peers.remove(network);
        self.poller.remove_config(network);
        let addrs: Vec<IpAddr> = self
            .sessions
            .iter()
            .filter(|(addr, _)| network.contains(**addr))
            .map(|(addr, _)| *addr)
            .collect();
        for addr in addrs {
            if let Some(session) = self.sessions.get_mut(&addr) {
                session.request_teardown(cease_subcode);
            }
        }
    }

    pub fn record_for_addr(&self, addr: IpAddr) -> Option<(&IpNetwork, &PeerRecord)> {
        self.peers
            .iter()
            .find(|(network, _)| network.contains(addr))
    }

    /// Peer networks visible to an API service (helper processes can be
    /// scoped per neighbor; socket clients see everything)
    pub fn visible_peers(&self, service: Option<&str>) -> Vec<IpNetwork> {
        self.peers
            .iter()
            .filter(|(_, record)| match service {
                Some(name) => record.config.visible_to(name),
                None => true,
            })
            .map(|(network, _)| *network)
            .collect()
    }

    /// Evict stale graceful-restart routes whose window expired
    pub async fn sweep_gr_deadlines(&mut self) {
        let now = Instant::now();
        for (network, record) in self.peers.iter_mut() {
            if let Some(deadline) = record.gr_deadline {
                if deadline <= now {
                    let removed = record.rib_in.lock().await.clear();
                    record.gr_deadline = None;
                    if removed > 0 {
                        info!(
                            "{}: graceful-restart window expired, {} stale routes dropped",
                            network, removed
                        );
                    }
                }
            }
        }
    }

    /// Make progress: step every session, then wait for a new connection.
    /// Returns at most one event per call.
    pub async fn get_event(&mut self) -> Result<Option<SessionEvent>, Box<dyn Error>> {
        // run every session once; first event wins
        let mut ended: Vec<(IpAddr, String)> = Vec::new();
        for (addr, session) in self.sessions.iter_mut() {
            match session.run().await {
                Ok(Some(event)) => {
                    if let SessionEvent::Up(_) = event {
                        self.poller.mark_established(&session.config.peer_address);
                    }
                    return Ok(Some(event));
                }
                Ok(None) => (),
                Err(err) => {
                    if let Some(notification) = err.notification() {
                        session.send_notification(notification).await;
                    }
                    warn!("{}", err);
                    ended.push((*addr, err.to_string()));
                }
            }
        }

        if !ended.is_empty() {
            for (addr, _) in &ended {
                self.close_session(*addr).await;
            }
            return Ok(Some(SessionEvent::Ended(ended)));
        }

        match self.poller.get_connection().await? {
            Some((stream, config, locally_initiated)) => {
                Ok(self
                    .incoming_connection(stream, config, locally_initiated)
                    .await?)
            }
            None => Ok(None),
        }
    }

    async fn incoming_connection(
        &mut self,
        stream: tokio::net::TcpStream,
        config: Arc<NeighborConfig>,
        locally_initiated: bool,
    ) -> std::io::Result<Option<SessionEvent>> {
        let remote_ip = stream.peer_addr()?.ip();

        if let Some(existing) = self.sessions.get_mut(&remote_ip) {
            if existing.is_established() {
                debug!(
                    "Connection from {} while Established, dropping it",
                    remote_ip
                );
                return Ok(None);
            }
            // RFC 4271 §6.8: the side with the higher router-id keeps its
            // initiated connection
            let keep_local = match existing.peer_router_id() {
                Some(peer_id) => collision_keep_local(config.router_id, peer_id),
                // peer identity unknown yet, first connection stands
                None => return Ok(None),
            };
            let existing_survives = existing.locally_initiated() == keep_local;
            if existing_survives {
                debug!("collision: keeping existing session with {}", remote_ip);
                return Ok(None);
            }
            // the losing connection goes out with a collision NOTIFICATION
            existing
                .send_notification(crate::wire::Notification::new(6, 7))
                .await;
        }

        let record = match self.record_for_addr(remote_ip) {
            Some((_, record)) => record,
            None => return Ok(None),
        };
        let session = Session::new(
            config,
            stream,
            locally_initiated,
            Arc::clone(&record.rib_out),
            Arc::clone(&record.rib_in),
            self.hostname.clone(),
            self.sent_tx.clone(),
        )?;
        info!("New session started: {}", remote_ip);
        self.sessions.insert(remote_ip, session);
        Ok(Some(SessionEvent::Connected(remote_ip)))
    }

    /// Tear a finished session down: graceful restart keeps received
    /// routes (stale) inside the restart window, everything else clears.
    async fn close_session(&mut self, addr: IpAddr) {
        let session = match self.sessions.remove(&addr) {
            Some(session) => session,
            None => return,
        };
        let was_established = session.is_established();
        let gr = session
            .negotiated
            .as_ref()
            .and_then(|negotiated| negotiated.graceful_restart.clone());

        if let Some((network, _)) = self.record_for_addr(addr) {
            let network = *network;
            if let Some(record) = self.peers.get_mut(&network) {
                match (was_established, gr) {
                    (true, Some(gr)) => {
                        record.rib_in.lock().await.mark_all_stale();
                        record.gr_deadline = Some(
                            Instant::now()
                                + tokio::time::Duration::from_secs(u64::from(gr.restart_time)),
                        );
                        debug!(
                            "{}: session dropped, stale window {}s",
                            addr, gr.restart_time
                        );
                    }
                    _ => {
                        record.rib_in.lock().await.clear();
                    }
                }
                // idle again, back to the connect queue
                let _ = self.poller_tx.send(Arc::clone(&record.config));
            }
        }
    }
}
