//! Spawns the configured helper programs, reads command lines from their
//! stdout, and feeds them events through a bounded per-helper write queue.
//! A slow helper never blocks the reactor: writes past the queue limit are
//! counted and reported by `system queue-status`, not waited on.

use std::collections::HashMap;
use std::process::Stdio;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::encoder::{Encoder, Event};
use crate::config::{ApiOptions, Encoder as EncoderKind, NeighborConfig, ProcessConfig};
use crate::session::Direction;

/// Originator of an API line: a helper process or a control-socket client
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ServiceId {
    Process(String),
    Socket(u64),
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ServiceId::Process(name) => write!(f, "process {}", name),
            ServiceId::Socket(id) => write!(f, "socket client {}", id),
        }
    }
}

/// Lines queued per helper before backpressure kicks in
const WRITE_QUEUE_DEPTH: usize = 10_000;

struct Helper {
    config: ProcessConfig,
    child: Child,
    writer: mpsc::Sender<String>,
    /// Lines dropped because the queue was full
    dropped: u64,
    restarts: u32,
}

pub struct ProcessManager {
    helpers: HashMap<String, Helper>,
    options: ApiOptions,
    encoder: Encoder,
    line_tx: mpsc::UnboundedSender<(ServiceId, String)>,
}

impl ProcessManager {
    pub fn new(
        options: ApiOptions,
        hostname: String,
        line_tx: mpsc::UnboundedSender<(ServiceId, String)>,
    ) -> Self {
        Self {
            helpers: HashMap::new(),
            options,
            encoder: Encoder::new(hostname),
            line_tx,
        }
    }

    pub fn spawn_all(&mut self, processes: &[ProcessConfig]) {
        // drop helpers a reload removed
        let configured: Vec<String> = processes.iter().map(|p| p.name.clone()).collect();
        let removed: Vec<String> = self
            .helpers
            .keys()
            .filter(|name| !configured.contains(name))
            .cloned()
            .collect();
        for name in removed {
            info!("helper {} de-configured, dropping", name);
            if let Some(mut helper) = self.helpers.remove(&name) {
                let _ = helper.child.start_kill();
            }
        }
        for process in processes {
            if !self.helpers.contains_key(&process.name) {
                if let Err(err) = self.spawn(process.clone()) {
                    error!("could not start helper {}: {}", process.name, err);
                }
            }
        }
    }

    fn spawn(&mut self, config: ProcessConfig) -> std::io::Result<()> {
        let mut words = config.run.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty run"))?;
        let mut child = Command::new(program)
            .args(words)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // reader: helper stdout -> command lines for the reactor
        let stdout = child.stdout.take().expect("piped stdout");
        let service = ServiceId::Process(config.name.clone());
        let line_tx = self.line_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line_tx.send((service.clone(), line)).is_err() {
                    break;
                }
            }
        });

        // writer: bounded queue -> helper stdin
        let mut stdin = child.stdin.take().expect("piped stdin");
        let (writer, mut writer_rx) = mpsc::channel::<String>(WRITE_QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(line) = writer_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        info!("started helper {} ({})", config.name, config.run);
        self.helpers.insert(
            config.name.clone(),
            Helper {
                config,
                child,
                writer,
                dropped: 0,
                restarts: 0,
            },
        );
        Ok(())
    }

    /// Route one event to every subscribed helper
    pub fn dispatch_event(&mut self, event: &Event, neighbor: Option<&NeighborConfig>) {
        let kind = event.kind();
        let direction = event.direction();

        let mut deliveries: Vec<(String, String)> = Vec::new();
        for helper in self.helpers.values() {
            if let Some(neighbor) = neighbor {
                if !neighbor.visible_to(&helper.config.name) {
                    continue;
                }
            }
            if !wants(&helper.config, kind, direction) {
                continue;
            }
            let payload = match helper.config.encoder {
                EncoderKind::Json => vec![self.encoder.json_line(event)],
                EncoderKind::Text => self.encoder.text_lines(event),
            };
            for line in payload {
                deliveries.push((helper.config.name.clone(), line));
            }
        }
        for (name, line) in deliveries {
            self.deliver(&name, line);
        }
    }

    fn deliver(&mut self, name: &str, line: String) {
        if let Some(helper) = self.helpers.get_mut(name) {
            if helper.writer.try_send(line).is_err() {
                // queue full or writer gone: record, never block
                helper.dropped += 1;
                if helper.dropped % 1000 == 1 {
                    warn!(
                        "helper {} backpressure, {} lines dropped",
                        name, helper.dropped
                    );
                }
            }
        }
    }

    /// ACK or reply toward the service that issued a command
    pub fn reply(&mut self, service: &ServiceId, line: String) {
        if let ServiceId::Process(name) = service {
            self.deliver(&name.clone(), line);
        }
    }

    /// Reap crashed helpers; respawn or report a fatal condition per
    /// `api.respawn` / `api.terminate`.
    pub fn check_children(&mut self) -> Result<(), String> {
        let mut crashed: Vec<String> = Vec::new();
        for (name, helper) in self.helpers.iter_mut() {
            if let Ok(Some(status)) = helper.child.try_wait() {
                warn!("helper {} exited: {}", name, status);
                crashed.push(name.clone());
            }
        }
        for name in crashed {
            let helper = self.helpers.remove(&name).expect("crashed helper entry");
            if self.options.terminate {
                return Err(format!("helper {} died with api.terminate set", name));
            }
            if self.options.respawn {
                let restarts = helper.restarts + 1;
                let config = helper.config;
                debug!("respawning helper {} (restart #{})", name, restarts);
                if let Err(err) = self.spawn(config) {
                    error!("respawn of helper {} failed: {}", name, err);
                } else if let Some(respawned) = self.helpers.get_mut(&name) {
                    respawned.restarts = restarts;
                }
            }
        }
        Ok(())
    }

    /// Per-helper queue depth report for `system queue-status`
    pub fn queue_status(&self) -> Vec<String> {
        self.helpers
            .values()
            .map(|helper| {
                format!(
                    "{} queued={} dropped={} restarts={}",
                    helper.config.name,
                    WRITE_QUEUE_DEPTH - helper.writer.capacity(),
                    helper.dropped,
                    helper.restarts,
                )
            })
            .collect()
    }

    pub fn shutdown(&mut self) {
        for (name, helper) in self.helpers.iter_mut() {
            debug!("stopping helper {}", name);
            let _ = helper.child.start_kill();
        }
        self.helpers.clear();
    }

    pub fn ack_enabled(&self) -> bool {
        self.options.ack
    }
}

fn wants(config: &ProcessConfig, kind: &str, direction: Option<Direction>) -> bool {
    let subs = &config.subscriptions;
    match kind {
        "state" => subs.neighbor_changes,
        "negotiated" => subs.negotiated,
        "fsm" => subs.fsm,
        "signal" => subs.signal,
        _ => match direction {
            Some(Direction::Receive) => subs.receive.wants(kind),
            Some(Direction::Send) => subs.send.wants(kind),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MessageKinds, Subscriptions};

    fn process_config(receive_update: bool, neighbor_changes: bool) -> ProcessConfig {
        ProcessConfig {
            name: "watcher".to_string(),
            run: "/bin/cat".to_string(),
            encoder: EncoderKind::Json,
            subscriptions: Subscriptions {
                neighbor_changes,
                receive: MessageKinds {
                    update: receive_update,
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_subscription_routing() {
        let config = process_config(true, false);
        assert!(wants(&config, "update", Some(Direction::Receive)));
        assert!(!wants(&config, "update", Some(Direction::Send)));
        assert!(!wants(&config, "state", None));
        assert!(!wants(&config, "keepalive", Some(Direction::Receive)));

        let config = process_config(false, true);
        assert!(wants(&config, "state", None));
        assert!(!wants(&config, "update", Some(Direction::Receive)));
    }

    #[test]
    fn test_parsed_subscription_covers_kinds() {
        let mut config = process_config(false, false);
        config.subscriptions.receive.parsed = true;
        for kind in ["update", "open", "keepalive", "notification", "refresh"] {
            assert!(wants(&config, kind, Some(Direction::Receive)), "{}", kind);
        }
        assert!(!wants(&config, "packets", Some(Direction::Receive)));
    }
}
