//! The async scheduler: a FIFO of resumable tasks the reactor drains with
//! a wall-clock budget between I/O waits. Each task does a bounded slice
//! of work per step so keepalives and reads keep flowing.

use std::collections::VecDeque;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use log::debug;
use tokio::time::{Duration, Instant};

use crate::api::ServiceId;
use crate::rib::Change;
use crate::session::SessionManager;
use crate::wire::{Family, Message, Operational, RouteRefresh, Update};


pub enum Progress {
    /// More work to do, reschedule
    Again,
    /// Finished; the result is relayed as the command's ACK
    Done(Result<String, String>),
}

#[async_trait]
pub trait Task: Send {
    fn label(&self) -> String;
    /// Forget work bound to a deleted peer
    fn forget_peer(&mut self, _network: &IpNetwork) {}
    async fn step(&mut self, manager: &mut SessionManager) -> Progress;
}

pub struct Scheduled {
    pub service: ServiceId,
    pub task: Box<dyn Task>,
}

#[derive(Default)]
pub struct Scheduler {
    queue: VecDeque<Scheduled>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn push(&mut self, service: ServiceId, task: Box<dyn Task>) {
        debug!("scheduled task [{}] for {}", task.label(), service);
        self.queue.push_back(Scheduled { service, task });
    }

    /// `session reset`: drop everything a client had queued
    pub fn purge_service(&mut self, service: &ServiceId) {
        self.queue.retain(|scheduled| &scheduled.service != service);
    }

    pub fn purge_peer(&mut self, network: &IpNetwork) {
        for scheduled in self.queue.iter_mut() {
            scheduled.task.forget_peer(network);
        }
    }

    /// Run queued tasks until the budget is spent or the queue is empty.
    /// Completed tasks yield (service, result) pairs for acknowledgement.
    pub async fn drain(
        &mut self,
        manager: &mut SessionManager,
        budget: Duration,
    ) -> Vec<(ServiceId, Result<String, String>)> {
        let deadline = Instant::now() + budget;
        let mut completed = Vec::new();
        while Instant::now() < deadline {
            let mut scheduled = match self.queue.pop_front() {
                Some(scheduled) => scheduled,
                None => break,
            };
            match scheduled.task.step(manager).await {
                Progress::Again => self.queue.push_back(scheduled),
                Progress::Done(result) => completed.push((scheduled.service, result)),
            }
        }
        completed
    }
}

/// Apply parsed route changes to the targeted peers' Adj-RIB-Outs, a
/// bounded slice at a time. Bodies with `next-hop self` are resolved
/// per-peer before the task is built.
pub struct RouteTask {
    pub label: String,
    /// (peer, changes) — one entry per targeted peer
    pub work: Vec<(IpNetwork, Vec<Change>)>,
    pub seed_down_watchdogs: Vec<String>,
    applied: usize,
}

impl RouteTask {
    pub fn new(
        label: String,
        work: Vec<(IpNetwork, Vec<Change>)>,
        seed_down_watchdogs: Vec<String>,
    ) -> Self {
        Self {
            label,
            work,
            seed_down_watchdogs,
            applied: 0,
        }
    }

    fn total(&self) -> usize {
        self.work.iter().map(|(_, changes)| changes.len()).sum()
    }
}

#[async_trait]
impl Task for RouteTask {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn forget_peer(&mut self, network: &IpNetwork) {
        self.work.retain(|(peer, _)| peer != network);
    }

    // One targeted peer per step, committed in full so its session sees
    // the whole batch in a single round of UPDATEs.
    async fn step(&mut self, manager: &mut SessionManager) -> Progress {
        let (network, changes) = match self.work.pop() {
            Some(entry) => entry,
            None => {
                return Progress::Done(Ok(format!("{} changes applied", self.applied)));
            }
        };
        if let Some(record) = manager.peers.get_mut(&network) {
            let mut rib = record.rib_out.lock().await;
            for name in &self.seed_down_watchdogs {
                rib.seed_watchdog_down(name);
            }
            for change in changes {
                match change.action {
                    crate::rib::Action::Announce => rib.insert_announcement(change),
                    crate::rib::Action::Withdraw => rib.insert_withdraw(change.nlri),
                }
                self.applied += 1;
            }
        }
        Progress::Again
    }
}

/// Watchdog state flip across the targeted peers
pub struct WatchdogTask {
    pub peers: Vec<IpNetwork>,
    pub name: String,
    pub up: bool,
}

#[async_trait]
impl Task for WatchdogTask {
    fn label(&self) -> String {
        format!(
            "watchdog {} {}",
            self.name,
            if self.up { "announce" } else { "withdraw" }
        )
    }

    fn forget_peer(&mut self, network: &IpNetwork) {
        self.peers.retain(|peer| peer != network);
    }

    async fn step(&mut self, manager: &mut SessionManager) -> Progress {
        let network = match self.peers.pop() {
            Some(network) => network,
            None => return Progress::Done(Ok("done".to_string())),
        };
        if let Some(record) = manager.peers.get(&network) {
            let mut rib = record.rib_out.lock().await;
            if self.up {
                rib.announce_watchdog(&self.name);
            } else {
                rib.withdraw_watchdog(&self.name);
            }
        }
        Progress::Again
    }
}

/// `rib flush out`: release queued changes on auto-flush-disabled peers
pub struct FlushTask {
    pub peers: Vec<IpNetwork>,
}

#[async_trait]
impl Task for FlushTask {
    fn label(&self) -> String {
        "rib flush out".to_string()
    }

    fn forget_peer(&mut self, network: &IpNetwork) {
        self.peers.retain(|peer| peer != network);
    }

    async fn step(&mut self, manager: &mut SessionManager) -> Progress {
        let network = match self.peers.pop() {
            Some(network) => network,
            None => return Progress::Done(Ok("done".to_string())),
        };
        if let Some(record) = manager.peers.get(&network) {
            record.rib_out.lock().await.request_flush();
        }
        Progress::Again
    }
}

/// `rib clear in|out`
pub struct ClearTask {
    pub peers: Vec<IpNetwork>,
    pub clear_in: bool,
}

#[async_trait]
impl Task for ClearTask {
    fn label(&self) -> String {
        format!("rib clear {}", if self.clear_in { "in" } else { "out" })
    }

    fn forget_peer(&mut self, network: &IpNetwork) {
        self.peers.retain(|peer| peer != network);
    }

    async fn step(&mut self, manager: &mut SessionManager) -> Progress {
        let network = match self.peers.pop() {
            Some(network) => network,
            None => return Progress::Done(Ok("done".to_string())),
        };
        if let Some(record) = manager.peers.get(&network) {
            if self.clear_in {
                record.rib_in.lock().await.clear();
            } else {
                record.rib_out.lock().await.clear();
            }
        }
        Progress::Again
    }
}

/// Send one message (EOR, route-refresh request, operational) to the
/// established session of each targeted peer.
pub enum Outgoing {
    Eor(Family),
    Refresh(Family),
    Operational(Operational),
}

pub struct SendTask {
    pub peers: Vec<IpNetwork>,
    pub outgoing: Outgoing,
}

#[async_trait]
impl Task for SendTask {
    fn label(&self) -> String {
        match &self.outgoing {
            Outgoing::Eor(family) => format!("announce eor {}", family),
            Outgoing::Refresh(family) => format!("announce route-refresh {}", family),
            Outgoing::Operational(operational) => {
                format!("announce operational {}", operational.name())
            }
        }
    }

    fn forget_peer(&mut self, network: &IpNetwork) {
        self.peers.retain(|peer| peer != network);
    }

    async fn step(&mut self, manager: &mut SessionManager) -> Progress {
        let network = match self.peers.pop() {
            Some(network) => network,
            None => return Progress::Done(Ok("done".to_string())),
        };
        let addrs: Vec<std::net::IpAddr> = manager
            .sessions
            .iter()
            .filter(|(addr, session)| network.contains(**addr) && session.is_established())
            .map(|(addr, _)| *addr)
            .collect();
        for addr in addrs {
            if let Some(session) = manager.sessions.get_mut(&addr) {
                let message = match &self.outgoing {
                    Outgoing::Eor(family) => Message::Update(Update::eor(*family)),
                    Outgoing::Refresh(family) => {
                        Message::RouteRefresh(RouteRefresh::request(*family))
                    }
                    Outgoing::Operational(operational) => {
                        Message::Operational(operational.clone())
                    }
                };
                if let Err(err) = session.send_message(message).await {
                    return Progress::Done(Err(err.to_string()));
                }
            }
        }
        Progress::Again
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountTask {
        steps: usize,
    }

    #[async_trait]
    impl Task for CountTask {
        fn label(&self) -> String {
            "count".to_string()
        }

        async fn step(&mut self, _manager: &mut SessionManager) -> Progress {
            self.steps -= 1;
            if self.steps == 0 {
                Progress::Done(Ok("done".to_string()))
            } else {
                Progress::Again
            }
        }
    }

    fn test_manager() -> SessionManager {
        let config = crate::config::from_str(
            r#"
router_id = "1.1.1.1"
local_as = 65000
[tcp]
port = 0
"#,
        )
        .unwrap();
        SessionManager::new(&config, "test".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_drain_with_ack() {
        let mut manager = test_manager();
        let mut scheduler = Scheduler::new();
        scheduler.push(
            ServiceId::Process("a".to_string()),
            Box::new(CountTask { steps: 3 }),
        );
        scheduler.push(
            ServiceId::Process("b".to_string()),
            Box::new(CountTask { steps: 1 }),
        );
        let completed = scheduler
            .drain(&mut manager, Duration::from_secs(5))
            .await;
        assert_eq!(completed.len(), 2);
        // the shorter task completes first
        assert_eq!(completed[0].0, ServiceId::Process("b".to_string()));
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_purge_service() {
        let mut manager = test_manager();
        let mut scheduler = Scheduler::new();
        scheduler.push(
            ServiceId::Process("a".to_string()),
            Box::new(CountTask { steps: 100 }),
        );
        scheduler.purge_service(&ServiceId::Process("a".to_string()));
        assert!(scheduler.is_empty());
        let completed = scheduler
            .drain(&mut manager, Duration::from_millis(10))
            .await;
        assert!(completed.is_empty());
    }
}
