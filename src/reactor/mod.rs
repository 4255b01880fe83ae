//! The supervising event loop: drains signal flags, pumps API command
//! lines, steps every peer through the session manager, runs the async
//! scheduler with a wall-clock budget, and sleeps on the union of its
//! event sources.

pub mod scheduler;
pub mod signal;

pub use scheduler::{Progress, Scheduler, Task};
pub use signal::Signals;

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use ipnetwork::IpNetwork;
use log::{debug, error, info, warn};
use rand::Rng;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::api::{
    dispatch, v4_to_v6, BodyKind, Command, Event, NeighborRef, ProcessManager, RibDirection,
    ServiceId,
};
use crate::config::{Config, NeighborConfig};
use crate::rib::Change;
use crate::session::{Direction, SessionEvent, SessionManager};
use crate::utils::{
    family_from_words, parse_attributes_body, parse_flow_body, parse_route_body, ParseError,
    ParsedRoutes,
};
use crate::wire::family::Safi;
use crate::wire::{Family, Message, Nlri, Operational};

use scheduler::{ClearTask, FlushTask, Outgoing, RouteTask, SendTask, WatchdogTask};

/// Upper bound on one scheduler drain between I/O waits
const SCHEDULER_BUDGET_MS: u64 = 500;
/// Loop pacing when nothing else wakes us
const REACTOR_SPEED_MS: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AckMode {
    Enabled,
    Disabled,
    Silence,
}

struct SocketClient {
    writer: mpsc::UnboundedSender<String>,
    uuid: Option<String>,
}

#[derive(Debug)]
struct GroupedChange {
    peers: Vec<IpNetwork>,
    kind: BodyKind,
    body: String,
    announce: bool,
}

pub struct Reactor {
    config: Config,
    config_path: String,
    manager: SessionManager,
    processes: ProcessManager,
    scheduler: Scheduler,
    signals: Signals,
    line_rx: mpsc::UnboundedReceiver<(ServiceId, String)>,
    line_tx: mpsc::UnboundedSender<(ServiceId, String)>,
    sent_rx: mpsc::UnboundedReceiver<(IpAddr, Message)>,
    client_rx: mpsc::UnboundedReceiver<(u64, mpsc::UnboundedSender<String>)>,
    client_tx: mpsc::UnboundedSender<(u64, mpsc::UnboundedSender<String>)>,
    socket_clients: HashMap<u64, SocketClient>,
    ack_modes: HashMap<ServiceId, AckMode>,
    groups: HashMap<ServiceId, Vec<GroupedChange>>,
    /// Stable across the daemon's life; `pong` replies carry it so
    /// clients can detect a restart
    uuid: String,
    start_time: i64,
    hostname: String,
    /// Human-readable diagnostic from the last failed reload
    last_error: Option<String>,
    shutdown: bool,
}

impl Reactor {
    pub fn new(config: Config, config_path: String) -> io::Result<Self> {
        let hostname = hostname();
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (client_tx, client_rx) = mpsc::unbounded_channel();

        let mut manager = SessionManager::new(&config, hostname.clone())?;
        manager.set_sent_channel(sent_tx);
        let processes =
            ProcessManager::new(config.api.clone(), hostname.clone(), line_tx.clone());

        let uuid: String = {
            let mut rng = rand::thread_rng();
            (0..16)
                .map(|_| format!("{:02x}", rng.gen::<u8>()))
                .collect()
        };

        let signals = Signals::register()?;
        Ok(Self {
            config,
            config_path,
            manager,
            processes,
            scheduler: Scheduler::new(),
            signals,
            line_rx,
            line_tx,
            sent_rx,
            client_rx,
            client_tx,
            socket_clients: HashMap::new(),
            ack_modes: HashMap::new(),
            groups: HashMap::new(),
            uuid,
            start_time: Utc::now().timestamp(),
            hostname,
            last_error: None,
            shutdown: false,
        })
    }

    pub async fn run(mut self) -> io::Result<()> {
        self.manager.seed_config_routes().await;
        let process_configs = self.config.processes.clone();
        self.processes.spawn_all(&process_configs);
        self.start_control_socket();
        info!("reactor started (uuid {})", self.uuid);

        loop {
            // 1. signals
            if self.signals.take_shutdown() || self.shutdown {
                break;
            }
            if self.signals.take_full_restart() {
                info!("SIGUSR1/SIGALRM: reloading configuration and helpers");
                let _ = self.reload(true).await;
            } else if self.signals.take_reload() {
                info!("SIGHUP: reloading configuration");
                let _ = self.reload(false).await;
            }
            if self.signals.take_rotate() {
                info!("SIGUSR2: log rotation requested");
            }

            self.manager.sweep_gr_deadlines().await;
            if let Err(reason) = self.processes.check_children() {
                error!("{}", reason);
                break;
            }

            // 2. pending API lines, non-blocking
            while let Ok((service, line)) = self.line_rx.try_recv() {
                self.handle_line(service, line).await;
            }
            while let Ok((addr, message)) = self.sent_rx.try_recv() {
                self.handle_sent(addr, message);
            }
            while let Ok((id, writer)) = self.client_rx.try_recv() {
                self.socket_clients
                    .insert(id, SocketClient { writer, uuid: None });
            }

            // 3. cooperative tasks within a wall-clock budget
            let completed = self
                .scheduler
                .drain(
                    &mut self.manager,
                    Duration::from_millis(SCHEDULER_BUDGET_MS),
                )
                .await;
            for (service, result) in completed {
                self.ack(&service, result);
            }

            // 4. peers + new I/O, bounded by the reactor speed
            tokio::select! {
                event = self.manager.get_event() => match event {
                    Ok(Some(event)) => self.handle_session_event(event).await,
                    Ok(None) => (),
                    Err(err) => warn!("session error: {}", err),
                },
                line = self.line_rx.recv() => {
                    if let Some((service, line)) = line {
                        self.handle_line(service, line).await;
                    }
                },
                _ = sleep(Duration::from_millis(REACTOR_SPEED_MS)) => (),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        info!("shutting down");
        self.processes.dispatch_event(&Event::Shutdown, None);
        let addrs: Vec<IpAddr> = self.manager.sessions.keys().copied().collect();
        for addr in addrs {
            if let Some(session) = self.manager.sessions.get_mut(&addr) {
                session
                    .send_notification(crate::wire::Notification::new(6, 2))
                    .await;
            }
        }
        self.processes.shutdown();
    }

    fn start_control_socket(&mut self) {
        if !self.config.api.cli {
            return;
        }
        let pipename = match &self.config.api.pipename {
            Some(pipename) => pipename.clone(),
            None => return,
        };
        let _ = std::fs::remove_file(&pipename);
        let listener = match UnixListener::bind(&pipename) {
            Ok(listener) => listener,
            Err(err) => {
                error!("could not bind control socket {}: {}", pipename, err);
                return;
            }
        };
        info!("control socket listening on {}", pipename);
        let line_tx = self.line_tx.clone();
        let client_tx = self.client_tx.clone();
        tokio::spawn(async move {
            let mut next_id: u64 = 1;
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("control socket accept failed: {}", err);
                        continue;
                    }
                };
                let id = next_id;
                next_id += 1;
                let (read_half, mut write_half) = stream.into_split();
                let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
                if client_tx.send((id, writer_tx)).is_err() {
                    return;
                }
                tokio::spawn(async move {
                    use tokio::io::AsyncWriteExt;
                    while let Some(line) = writer_rx.recv().await {
                        if write_half.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                        if write_half.write_all(b"\n").await.is_err() {
                            break;
                        }
                    }
                });
                let line_tx = line_tx.clone();
                tokio::spawn(async move {
                    use tokio::io::AsyncBufReadExt;
                    let mut lines = tokio::io::BufReader::new(read_half).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if line_tx.send((ServiceId::Socket(id), line)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
    }

    // ---- events -------------------------------------------------------

    fn neighbor_ref(&self, addr: IpAddr) -> Option<(NeighborRef, Arc<NeighborConfig>)> {
        let (_, record) = self.manager.record_for_addr(addr)?;
        let config = Arc::clone(&record.config);
        let local = self
            .manager
            .sessions
            .get(&addr)
            .map(|session| session.local_addr.to_string())
            .or_else(|| config.local_address.map(|ip| ip.to_string()))
            .unwrap_or_default();
        Some((
            NeighborRef {
                local_address: local,
                peer_address: addr.to_string(),
                local_as: config.local_as,
                peer_as: config.peer_as,
            },
            config,
        ))
    }

    fn emit(&mut self, event: Event, config: Option<&Arc<NeighborConfig>>) {
        self.processes
            .dispatch_event(&event, config.map(|config| config.as_ref()));
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected(addr) => {
                if let Some((peer, config)) = self.neighbor_ref(addr) {
                    self.emit(
                        Event::State {
                            peer: peer.clone(),
                            state: "connected",
                            reason: None,
                        },
                        Some(&config),
                    );
                    self.emit(
                        Event::Fsm {
                            peer,
                            state: "CONNECT".to_string(),
                        },
                        Some(&config),
                    );
                }
            }
            SessionEvent::OpenReceived(addr, open, direction) => {
                if let Some((peer, config)) = self.neighbor_ref(addr) {
                    self.emit(
                        Event::Open {
                            peer,
                            direction,
                            open,
                            header: Vec::new(),
                            body: Vec::new(),
                        },
                        Some(&config),
                    );
                }
            }
            SessionEvent::Up(addr) => {
                if let Some((peer, config)) = self.neighbor_ref(addr) {
                    self.emit(
                        Event::State {
                            peer: peer.clone(),
                            state: "up",
                            reason: None,
                        },
                        Some(&config),
                    );
                    if let Some(summary) = self.negotiated_summary(addr) {
                        self.emit(
                            Event::Negotiated {
                                peer: peer.clone(),
                                summary,
                            },
                            Some(&config),
                        );
                    }
                    self.emit(
                        Event::Fsm {
                            peer,
                            state: "ESTABLISHED".to_string(),
                        },
                        Some(&config),
                    );
                }
            }
            SessionEvent::Learned(addr, update, header, body) => {
                if let Some((peer, config)) = self.neighbor_ref(addr) {
                    self.emit(
                        Event::Packet {
                            peer: peer.clone(),
                            direction: Direction::Receive,
                            category: "update",
                            header: header.clone(),
                            body: body.clone(),
                        },
                        Some(&config),
                    );
                    self.emit(
                        Event::Update {
                            peer,
                            direction: Direction::Receive,
                            update,
                            header,
                            body,
                        },
                        Some(&config),
                    );
                }
            }
            SessionEvent::KeepaliveReceived(addr) => {
                if let Some((peer, config)) = self.neighbor_ref(addr) {
                    self.emit(
                        Event::Keepalive {
                            peer,
                            direction: Direction::Receive,
                        },
                        Some(&config),
                    );
                }
            }
            SessionEvent::RefreshReceived(addr, refresh) => {
                if let Some((peer, config)) = self.neighbor_ref(addr) {
                    self.emit(
                        Event::Refresh {
                            peer,
                            direction: Direction::Receive,
                            refresh,
                        },
                        Some(&config),
                    );
                }
            }
            SessionEvent::OperationalReceived(addr, operational) => {
                if let Some((peer, config)) = self.neighbor_ref(addr) {
                    self.emit(
                        Event::Operational {
                            peer,
                            direction: Direction::Receive,
                            operational,
                        },
                        Some(&config),
                    );
                }
            }
            SessionEvent::NotificationReceived(addr, notification) => {
                if let Some((peer, config)) = self.neighbor_ref(addr) {
                    self.emit(
                        Event::Notification {
                            peer,
                            direction: Direction::Receive,
                            notification,
                        },
                        Some(&config),
                    );
                }
            }
            SessionEvent::Ended(ended) => {
                for (addr, reason) in ended {
                    if let Some((peer, config)) = self.neighbor_ref(addr) {
                        self.emit(
                            Event::State {
                                peer: peer.clone(),
                                state: "down",
                                reason: Some(reason),
                            },
                            Some(&config),
                        );
                        self.emit(
                            Event::Fsm {
                                peer,
                                state: "IDLE".to_string(),
                            },
                            Some(&config),
                        );
                    }
                }
            }
        }
    }

    fn negotiated_summary(&self, addr: IpAddr) -> Option<serde_json::Value> {
        let session = self.manager.sessions.get(&addr)?;
        let negotiated = session.negotiated.as_ref()?;
        let families: Vec<String> = negotiated
            .families
            .iter()
            .map(|family| family.to_string())
            .collect();
        let addpath_send: Vec<String> = negotiated
            .addpath_send
            .iter()
            .map(|family| family.to_string())
            .collect();
        let addpath_receive: Vec<String> = negotiated
            .addpath_receive
            .iter()
            .map(|family| family.to_string())
            .collect();
        Some(serde_json::json!({
            "message_size": negotiated.msg_size,
            "hold_time": negotiated.hold_time,
            "asn4": negotiated.asn4,
            "refresh": negotiated.refresh.to_string(),
            "operational": negotiated.operational,
            "families": families,
            "add_path": { "send": addpath_send, "receive": addpath_receive },
        }))
    }

    fn handle_sent(&mut self, addr: IpAddr, message: Message) {
        let (peer, config) = match self.neighbor_ref(addr) {
            Some(found) => found,
            None => return,
        };
        let event = match message {
            Message::Update(update) => Event::Update {
                peer,
                direction: Direction::Send,
                update,
                header: Vec::new(),
                body: Vec::new(),
            },
            Message::Open(open) => Event::Open {
                peer,
                direction: Direction::Send,
                open,
                header: Vec::new(),
                body: Vec::new(),
            },
            Message::KeepAlive => Event::Keepalive {
                peer,
                direction: Direction::Send,
            },
            Message::Notification(notification) => Event::Notification {
                peer,
                direction: Direction::Send,
                notification,
            },
            Message::RouteRefresh(refresh) => Event::Refresh {
                peer,
                direction: Direction::Send,
                refresh,
            },
            Message::Operational(operational) => Event::Operational {
                peer,
                direction: Direction::Send,
                operational,
            },
        };
        self.emit(event, Some(&config));
    }

    // ---- command handling ---------------------------------------------

    fn reply(&mut self, service: &ServiceId, line: String) {
        match service {
            ServiceId::Process(_) => self.processes.reply(service, line),
            ServiceId::Socket(id) => {
                if let Some(client) = self.socket_clients.get(id) {
                    let _ = client.writer.send(line);
                }
            }
        }
    }

    fn ack(&mut self, service: &ServiceId, result: Result<String, String>) {
        let mode = self
            .ack_modes
            .get(service)
            .copied()
            .unwrap_or(if self.processes.ack_enabled() {
                AckMode::Enabled
            } else {
                AckMode::Disabled
            });
        match (mode, result) {
            (AckMode::Silence, _) => (),
            (AckMode::Disabled, Ok(_)) => (),
            (AckMode::Disabled, Err(reason)) | (AckMode::Enabled, Err(reason)) => {
                self.reply(service, format!("error {}", reason));
            }
            (AckMode::Enabled, Ok(_)) => {
                self.reply(service, "done".to_string());
            }
        }
    }

    fn service_name(service: &ServiceId) -> Option<String> {
        match service {
            ServiceId::Process(name) => Some(name.clone()),
            ServiceId::Socket(_) => None,
        }
    }

    fn candidates(&self, service: &ServiceId) -> Vec<(IpNetwork, Arc<NeighborConfig>)> {
        let name = Self::service_name(service);
        self.manager
            .visible_peers(name.as_deref())
            .into_iter()
            .filter_map(|network| {
                self.manager
                    .peers
                    .get(&network)
                    .map(|record| (network, Arc::clone(&record.config)))
            })
            .collect()
    }

    async fn handle_line(&mut self, service: ServiceId, line: String) {
        debug!("[{}] {}", service, line);
        let v6 = match v4_to_v6(&line) {
            Ok(v6) => v6,
            Err(err) => {
                self.ack(&service, Err(err.to_string()));
                return;
            }
        };
        let candidates = self.candidates(&service);
        let command = match dispatch(&v6, &candidates) {
            Ok(command) => command,
            Err(err) => {
                self.ack(&service, Err(err.to_string()));
                return;
            }
        };
        self.execute(service, command).await;
    }

    async fn execute(&mut self, service: ServiceId, command: Command) {
        match command {
            Command::Comment => self.ack(&service, Ok("done".to_string())),
            Command::DaemonShutdown => {
                self.ack(&service, Ok("done".to_string()));
                self.shutdown = true;
            }
            Command::DaemonReload => {
                let result = self.reload(false).await;
                self.ack(&service, result);
            }
            Command::DaemonRestart => {
                let result = self.reload(true).await;
                self.ack(&service, result);
            }
            Command::DaemonStatus => {
                let established = self
                    .manager
                    .sessions
                    .values()
                    .filter(|session| session.is_established())
                    .count();
                let status = format!(
                    "uuid {} peers {} sessions {} established {} tasks {}{}",
                    self.uuid,
                    self.manager.peers.len(),
                    self.manager.sessions.len(),
                    established,
                    self.scheduler.len(),
                    self.last_error
                        .as_ref()
                        .map(|err| format!(" last-error '{}'", err))
                        .unwrap_or_default(),
                );
                self.reply(&service, status);
                self.ack(&service, Ok("done".to_string()));
            }
            Command::AckEnable => {
                self.ack_modes.insert(service.clone(), AckMode::Enabled);
                self.ack(&service, Ok("done".to_string()));
            }
            Command::AckDisable => {
                self.ack_modes.insert(service.clone(), AckMode::Disabled);
            }
            Command::AckSilence => {
                self.ack_modes.insert(service.clone(), AckMode::Silence);
            }
            Command::SyncEnable | Command::SyncDisable => {
                // command batches already acknowledge after the scheduler
                // commits them; nothing extra to arm
                self.ack(&service, Ok("done".to_string()));
            }
            Command::SessionReset => {
                self.scheduler.purge_service(&service);
                self.groups.remove(&service);
                self.ack(&service, Ok("done".to_string()));
            }
            Command::Ping { token } => {
                if let ServiceId::Socket(id) = &service {
                    if let Some(client) = self.socket_clients.get_mut(id) {
                        // `ping <client-uuid> <start-time>` liveness handshake
                        client.uuid = token.split_whitespace().next().map(str::to_string);
                    }
                }
                self.reply(&service, format!("pong {} {}", self.uuid, self.start_time));
            }
            Command::Bye => {
                self.reply(&service, "bye".to_string());
                if let ServiceId::Socket(id) = &service {
                    self.socket_clients.remove(id);
                    self.scheduler.purge_service(&service);
                }
            }
            Command::Help => {
                for line in HELP_TEXT.lines() {
                    self.reply(&service, line.to_string());
                }
                self.ack(&service, Ok("done".to_string()));
            }
            Command::Version => {
                self.reply(
                    &service,
                    format!("bgpiped {}", env!("CARGO_PKG_VERSION")),
                );
                self.ack(&service, Ok("done".to_string()));
            }
            Command::ApiVersion { version } => {
                match version {
                    Some(version) => self.reply(&service, format!("api version {}", version)),
                    None => self.reply(&service, "api version 6".to_string()),
                }
                self.ack(&service, Ok("done".to_string()));
            }
            Command::Crash => {
                error!("system crash requested by {}", service);
                self.ack(&service, Err("crash requested".to_string()));
            }
            Command::QueueStatus => {
                for line in self.processes.queue_status() {
                    self.reply(&service, line);
                }
                self.reply(
                    &service,
                    format!("scheduler queued={}", self.scheduler.len()),
                );
                self.ack(&service, Ok("done".to_string()));
            }
            Command::RibShow {
                direction,
                extensive,
            } => {
                self.rib_show(&service, direction, extensive).await;
                self.ack(&service, Ok("done".to_string()));
            }
            Command::RibFlushOut { peers } => {
                self.scheduler
                    .push(service, Box::new(FlushTask { peers }));
            }
            Command::RibClear { direction, peers } => {
                self.scheduler.push(
                    service,
                    Box::new(ClearTask {
                        peers,
                        clear_in: direction == RibDirection::In,
                    }),
                );
            }
            Command::PeerList => {
                let networks: Vec<IpNetwork> =
                    self.manager.peers.keys().copied().collect();
                for network in networks {
                    self.reply(&service, network.to_string());
                }
                self.ack(&service, Ok("done".to_string()));
            }
            Command::PeerShow { peers, detail } => {
                self.peer_show(&service, &peers, &detail);
                self.ack(&service, Ok("done".to_string()));
            }
            Command::PeerCreate { body } => {
                let result = self.peer_create(&body);
                self.ack(&service, result);
            }
            Command::PeerDelete { peers } => {
                let mut result = Ok("done".to_string());
                for network in &peers {
                    if let Err(err) = self.manager.delete_peer(network) {
                        result = Err(err);
                    }
                    self.scheduler.purge_peer(network);
                }
                self.ack(&service, result);
            }
            Command::Teardown { peers, code } => {
                for network in &peers {
                    let addrs: Vec<IpAddr> = self
                        .manager
                        .sessions
                        .keys()
                        .filter(|addr| network.contains(**addr))
                        .copied()
                        .collect();
                    for addr in addrs {
                        if let Some(session) = self.manager.sessions.get_mut(&addr) {
                            session.request_teardown(code);
                        }
                    }
                }
                self.ack(&service, Ok("done".to_string()));
            }
            Command::GroupStart => {
                self.groups.insert(service.clone(), Vec::new());
                self.ack(&service, Ok("done".to_string()));
            }
            Command::GroupEnd => {
                match self.groups.remove(&service) {
                    Some(grouped) => {
                        let result = self.commit_group(&service, grouped);
                        if let Err(err) = result {
                            self.ack(&service, Err(err));
                        }
                        // success is acknowledged when the task completes
                    }
                    None => {
                        self.ack(&service, Err("no group in progress".to_string()));
                    }
                }
            }
            Command::Announce { peers, kind, body } => {
                self.route_command(service, peers, kind, body, true).await;
            }
            Command::Withdraw { peers, kind, body } => {
                self.route_command(service, peers, kind, body, false).await;
            }
        }
    }

    /// Reload the configuration file; atomic, the running config survives
    /// any parse or validation failure.
    async fn reload(&mut self, restart_helpers: bool) -> Result<String, String> {
        match crate::config::from_file(&self.config_path) {
            Ok(new_config) => {
                self.last_error = None;
                self.config = new_config;
                self.manager.apply_config(&self.config);
                self.manager.seed_config_routes().await;
                let processes = self.config.processes.clone();
                if restart_helpers {
                    self.processes.shutdown();
                }
                self.processes.spawn_all(&processes);
                info!("configuration reloaded from {}", self.config_path);
                Ok("reloaded".to_string())
            }
            Err(err) => {
                let reason = format!("reload failed: {}", err);
                error!("{}", reason);
                self.last_error = Some(reason.clone());
                Err(reason)
            }
        }
    }

    // ---- route commands -----------------------------------------------

    async fn route_command(
        &mut self,
        service: ServiceId,
        peers: Vec<IpNetwork>,
        kind: BodyKind,
        body: String,
        announce: bool,
    ) {
        match kind {
            BodyKind::Watchdog => {
                let name = body.trim().to_string();
                if name.is_empty() {
                    self.ack(&service, Err("watchdog requires a name".to_string()));
                    return;
                }
                self.scheduler.push(
                    service,
                    Box::new(WatchdogTask {
                        peers,
                        name,
                        up: announce,
                    }),
                );
            }
            BodyKind::Eor => match family_from_words(
                &body.split_whitespace().collect::<Vec<&str>>(),
            ) {
                Ok(family) => self.scheduler.push(
                    service,
                    Box::new(SendTask {
                        peers,
                        outgoing: Outgoing::Eor(family),
                    }),
                ),
                Err(err) => self.ack(&service, Err(err.to_string())),
            },
            BodyKind::RouteRefresh => match family_from_words(
                &body.split_whitespace().collect::<Vec<&str>>(),
            ) {
                Ok(family) => self.scheduler.push(
                    service,
                    Box::new(SendTask {
                        peers,
                        outgoing: Outgoing::Refresh(family),
                    }),
                ),
                Err(err) => self.ack(&service, Err(err.to_string())),
            },
            BodyKind::Operational => match parse_operational_body(&body) {
                Ok(operational) => self.scheduler.push(
                    service,
                    Box::new(SendTask {
                        peers,
                        outgoing: Outgoing::Operational(operational),
                    }),
                ),
                Err(err) => self.ack(&service, Err(err.to_string())),
            },
            BodyKind::Vpls => {
                self.ack(&service, Err("vpls is not supported".to_string()));
            }
            _ => {
                if let Some(group) = self.groups.get_mut(&service) {
                    group.push(GroupedChange {
                        peers,
                        kind,
                        body,
                        announce,
                    });
                    self.ack(&service, Ok("queued".to_string()));
                    return;
                }
                match self.build_route_work(&peers, kind, &body, announce) {
                    Ok((work, seeds)) => {
                        let label = format!(
                            "{} {:?}",
                            if announce { "announce" } else { "withdraw" },
                            kind
                        );
                        self.scheduler
                            .push(service, Box::new(RouteTask::new(label, work, seeds)));
                    }
                    Err(err) => self.ack(&service, Err(err.to_string())),
                }
            }
        }
    }

    /// Parse a route/flow/attributes body once per peer (next-hop self is
    /// per-peer) and shape it into RouteTask work.
    fn build_route_work(
        &self,
        peers: &[IpNetwork],
        kind: BodyKind,
        body: &str,
        announce: bool,
    ) -> Result<(Vec<(IpNetwork, Vec<Change>)>, Vec<String>), ParseError> {
        let mut work = Vec::with_capacity(peers.len());
        let mut seeds = Vec::new();
        for network in peers {
            let resolved = self.resolve_next_hop_self(body, network)?;
            let parsed = parse_body(kind, &resolved, announce)?;
            seeds.extend(parsed.start_down_watchdogs);
            work.push((*network, parsed.changes));
        }
        Ok((work, seeds))
    }

    fn resolve_next_hop_self(
        &self,
        body: &str,
        network: &IpNetwork,
    ) -> Result<String, ParseError> {
        if !body.contains("next-hop self") {
            return Ok(body.to_string());
        }
        let record = self
            .manager
            .peers
            .get(network)
            .ok_or_else(|| ParseError::new("peer disappeared"))?;
        let local = session_for_network(&self.manager.sessions, network)
            .map(|session| session.local_addr)
            .or(record.config.local_address)
            .ok_or_else(|| {
                ParseError::new(format!(
                    "next-hop self needs a local address for {}",
                    network
                ))
            })?;
        Ok(body.replace("next-hop self", &format!("next-hop {}", local)))
    }

    fn commit_group(
        &mut self,
        service: &ServiceId,
        grouped: Vec<GroupedChange>,
    ) -> Result<(), String> {
        // merge per-peer so each peer's batch lands in one task step
        let mut merged: HashMap<IpNetwork, Vec<Change>> = HashMap::new();
        let mut seeds: Vec<String> = Vec::new();
        for entry in grouped {
            for network in &entry.peers {
                let resolved = self
                    .resolve_next_hop_self(&entry.body, network)
                    .map_err(|err| err.to_string())?;
                let parsed = parse_body(entry.kind, &resolved, entry.announce)
                    .map_err(|err| err.to_string())?;
                seeds.extend(parsed.start_down_watchdogs);
                merged.entry(*network).or_default().extend(parsed.changes);
            }
        }
        let work: Vec<(IpNetwork, Vec<Change>)> = merged.into_iter().collect();
        self.scheduler.push(
            service.clone(),
            Box::new(RouteTask::new("group commit".to_string(), work, seeds)),
        );
        Ok(())
    }

    // ---- show commands ------------------------------------------------

    async fn rib_show(
        &mut self,
        service: &ServiceId,
        direction: RibDirection,
        extensive: bool,
    ) {
        let candidates = self.candidates(service);
        let mut lines: Vec<String> = Vec::new();
        for (network, _) in candidates {
            let record = match self.manager.peers.get(&network) {
                Some(record) => record,
                None => continue,
            };
            match direction {
                RibDirection::In => {
                    let rib = record.rib_in.lock().await;
                    for entry in rib.entries() {
                        let stale = if entry.stale { " stale" } else { "" };
                        if extensive {
                            lines.push(format!(
                                "neighbor {} {} {}{}",
                                network, entry.nlri, entry.attributes, stale
                            ));
                        } else {
                            lines.push(format!("neighbor {} {}{}", network, entry.nlri, stale));
                        }
                    }
                }
                RibDirection::Out => {
                    let rib = record.rib_out.lock().await;
                    for change in rib.cached_changes() {
                        if extensive {
                            lines.push(format!(
                                "neighbor {} {} {}",
                                network, change.nlri, change.attributes
                            ));
                        } else {
                            lines.push(format!("neighbor {} {}", network, change.nlri));
                        }
                    }
                }
            }
        }
        for line in lines {
            self.reply(service, line);
        }
    }

    fn peer_show(&mut self, service: &ServiceId, peers: &[IpNetwork], detail: &str) {
        let mut lines: Vec<String> = Vec::new();
        for network in peers {
            let record = match self.manager.peers.get(network) {
                Some(record) => record,
                None => continue,
            };
            let config = &record.config;
            let session = session_for_network(&self.manager.sessions, network);
            let state = session
                .map(|session| session.state.to_string())
                .unwrap_or_else(|| "Idle".to_string());
            match detail {
                "configuration" => {
                    lines.push(format!(
                        "neighbor {} local-as {} peer-as {} router-id {} hold-time {} families [{}]{}{}",
                        network,
                        config.local_as,
                        config.peer_as,
                        config.router_id,
                        config.hold_time,
                        config
                            .families
                            .iter()
                            .map(|family| family.to_string())
                            .collect::<Vec<_>>()
                            .join(", "),
                        if config.passive { " passive" } else { "" },
                        if record.dynamic { " dynamic" } else { "" },
                    ));
                }
                "extensive" => {
                    let (received, sent, uptime) = session
                        .map(|session| {
                            (
                                session.counts.received().total(),
                                session.counts.sent().total(),
                                crate::utils::format_time_as_elapsed(session.connect_time),
                            )
                        })
                        .unwrap_or((0, 0, "00:00:00".to_string()));
                    lines.push(format!(
                        "neighbor {} state {} received {} sent {} uptime {}",
                        network, state, received, sent, uptime,
                    ));
                }
                _ => {
                    lines.push(format!("neighbor {} state {}", network, state));
                }
            }
        }
        for line in lines {
            self.reply(service, line);
        }
    }

    /// `peer create <ip> peer-as <asn> [local-as <asn>] [router-id <ip>]
    /// [local-ip <ip>] [hold-time <n>] [port <n>] [md5 <pw>] [passive]
    /// [family <afi> <safi>]…`
    fn peer_create(&mut self, body: &str) -> Result<String, String> {
        let words: Vec<&str> = body.split_whitespace().collect();
        let peer_address: IpNetwork = words
            .first()
            .ok_or_else(|| "peer create requires an address".to_string())?
            .parse()
            .map_err(|_| format!("invalid peer address '{}'", words[0]))?;

        let mut neighbor = NeighborConfig {
            peer_address,
            local_address: None,
            peer_as: 0,
            local_as: self.config.local_as,
            router_id: self.config.router_id,
            enabled: true,
            passive: false,
            hold_time: 180,
            connect_port: 179,
            listen_port: 179,
            md5: None,
            ttl_out: None,
            ttl_in: None,
            source_interface: None,
            families: vec![Family::IPV4_UNICAST],
            add_path: Vec::new(),
            route_refresh: true,
            graceful_restart: None,
            extended_message: false,
            asn4: true,
            operational: false,
            aigp: false,
            multisession: false,
            adj_rib_in: false,
            adj_rib_out: true,
            auto_flush: true,
            manual_eor: false,
            group_updates: true,
            rate_limit: None,
            api_processes: Vec::new(),
            routes: Vec::new(),
            flows: Vec::new(),
        };
        let mut families: Vec<Family> = Vec::new();

        let mut i = 1usize;
        while i < words.len() {
            let value = |offset: usize| -> Result<&str, String> {
                words
                    .get(i + offset)
                    .copied()
                    .ok_or_else(|| format!("'{}' requires a value", words[i]))
            };
            match words[i] {
                "peer-as" => {
                    neighbor.peer_as = value(1)?
                        .parse()
                        .map_err(|_| "invalid peer-as".to_string())?;
                    i += 2;
                }
                "local-as" => {
                    neighbor.local_as = value(1)?
                        .parse()
                        .map_err(|_| "invalid local-as".to_string())?;
                    i += 2;
                }
                "router-id" => {
                    neighbor.router_id = value(1)?
                        .parse()
                        .map_err(|_| "invalid router-id".to_string())?;
                    i += 2;
                }
                "local-ip" => {
                    neighbor.local_address = Some(
                        value(1)?
                            .parse()
                            .map_err(|_| "invalid local-ip".to_string())?,
                    );
                    i += 2;
                }
                "hold-time" => {
                    neighbor.hold_time = value(1)?
                        .parse()
                        .map_err(|_| "invalid hold-time".to_string())?;
                    i += 2;
                }
                "port" => {
                    neighbor.connect_port = value(1)?
                        .parse()
                        .map_err(|_| "invalid port".to_string())?;
                    i += 2;
                }
                "md5" => {
                    neighbor.md5 = Some(value(1)?.to_string());
                    i += 2;
                }
                "passive" => {
                    neighbor.passive = true;
                    i += 1;
                }
                "family" => {
                    let family =
                        family_from_words(&[value(1)?, value(2)?]).map_err(|err| err.to_string())?;
                    families.push(family);
                    i += 3;
                }
                other => return Err(format!("unknown peer create token '{}'", other)),
            }
        }
        if neighbor.peer_as == 0 {
            return Err("peer create requires peer-as".to_string());
        }
        if !families.is_empty() {
            neighbor.families = families;
        }
        self.manager.create_peer(neighbor)?;
        Ok("created".to_string())
    }
}

fn session_for_network<'a>(
    sessions: &'a HashMap<IpAddr, crate::session::Session>,
    network: &IpNetwork,
) -> Option<&'a crate::session::Session> {
    sessions
        .iter()
        .find(|(addr, _)| network.contains(**addr))
        .map(|(_, session)| session)
}

fn parse_body(kind: BodyKind, body: &str, announce: bool) -> Result<ParsedRoutes, ParseError> {
    match kind {
        BodyKind::Route => parse_route_body(body, announce),
        BodyKind::Ipv4 | BodyKind::Ipv6 => {
            // optional leading safi word, then a route body
            let (safi, rest) = match body.split_whitespace().next() {
                Some("unicast") | Some("route") => {
                    (Safi::Unicast, body.splitn(2, ' ').nth(1).unwrap_or(""))
                }
                Some("multicast") => (Safi::Multicast, body.splitn(2, ' ').nth(1).unwrap_or("")),
                Some("nlri-mpls") | Some("mpls") => {
                    (Safi::NlriMpls, body.splitn(2, ' ').nth(1).unwrap_or(""))
                }
                _ => (Safi::Unicast, body),
            };
            let mut parsed = parse_route_body(rest, announce)?;
            if safi == Safi::Multicast {
                for change in parsed.changes.iter_mut() {
                    if let Nlri::Prefix(prefix) = &mut change.nlri {
                        prefix.family = Family::new(prefix.family.afi, Safi::Multicast);
                    }
                }
            }
            Ok(parsed)
        }
        BodyKind::Flow => {
            // a withdraw only identifies the NLRI; the then-clause is
            // optional there
            let owned;
            let body = if !announce && !body.contains(" then ") {
                owned = format!("{} then discard", body);
                &owned
            } else {
                body
            };
            let change = parse_flow_body(body)?;
            let change = if announce {
                change
            } else {
                Change::withdraw(change.nlri)
            };
            Ok(ParsedRoutes {
                changes: vec![change],
                start_down_watchdogs: Vec::new(),
            })
        }
        BodyKind::Attributes => parse_attributes_body(body, announce),
        _ => Err(ParseError::new("not a route body")),
    }
}

/// `adm|asm afi <afi> safi <safi> advisory "<text>"`
fn parse_operational_body(body: &str) -> Result<Operational, ParseError> {
    let words: Vec<&str> = body.split_whitespace().collect();
    let kind = words
        .first()
        .map(|word| word.to_lowercase())
        .ok_or_else(|| ParseError::new("operational requires a type"))?;
    let find_value = |key: &str| -> Option<String> {
        words
            .iter()
            .position(|word| *word == key)
            .and_then(|i| words.get(i + 1))
            .map(|word| word.to_string())
    };
    let afi = find_value("afi").ok_or_else(|| ParseError::new("operational requires afi"))?;
    let safi = find_value("safi").ok_or_else(|| ParseError::new("operational requires safi"))?;
    let family = family_from_words(&[&afi, &safi])?;
    let advisory = body
        .find("advisory")
        .map(|i| body[i + "advisory".len()..].trim().trim_matches('"').to_string())
        .ok_or_else(|| ParseError::new("operational requires an advisory"))?;
    match kind.as_str() {
        "adm" => Ok(Operational::Adm { family, advisory }),
        "asm" => Ok(Operational::Asm { family, advisory }),
        other => Err(ParseError::new(format!(
            "unsupported operational type '{}'",
            other
        ))),
    }
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).to_string()
    } else {
        "localhost".to_string()
    }
}

const HELP_TEXT: &str = "\
daemon shutdown|reload|restart|status
session ack enable|disable|silence
session sync enable|disable
session reset | session ping | session bye
system help|version|queue-status
system api version [4|6]
rib show in|out [extensive]
rib flush out
rib clear in|out
peer list | peer show [summary|extensive|configuration]
peer create <ip> peer-as <asn> [options]
peer delete <selector>
peer <selector> teardown [code]
peer <selector> announce|withdraw route|ipv4|ipv6|flow|eor|watchdog|attributes|route-refresh|operational <body>
group-start / group-end";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operational_body() {
        let operational =
            parse_operational_body("adm afi ipv4 safi unicast advisory \"maintenance\"").unwrap();
        match operational {
            Operational::Adm { family, advisory } => {
                assert_eq!(family, Family::IPV4_UNICAST);
                assert_eq!(advisory, "maintenance");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_operational_body("adm afi ipv4 safi unicast").is_err());
        assert!(parse_operational_body("xxx afi ipv4 safi unicast advisory a").is_err());
    }

    #[test]
    fn test_parse_body_multicast() {
        let parsed = parse_body(
            BodyKind::Ipv4,
            "multicast 10.0.0.0/24 next-hop 10.0.0.2",
            true,
        )
        .unwrap();
        assert_eq!(
            parsed.changes[0].nlri.family(),
            Family::new(crate::wire::Afi::Ipv4, Safi::Multicast)
        );
    }

    #[test]
    fn test_hostname_not_empty() {
        assert!(!hostname().is_empty());
    }
}
