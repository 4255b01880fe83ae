//! The per-neighbor finite state machine: one `Session` owns the framed
//! connection, the negotiated state and the peer's RIB handles, and makes
//! cooperative progress each time the manager polls it.

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use super::codec::{MessageCodec, MessageProtocol, ReceivedMessage};
use super::negotiated::Negotiated;
use super::{HoldTimer, MessageCounts, SessionError, SessionEvent, SessionState};
use crate::config::NeighborConfig;
use crate::rib::{AdjRibIn, AdjRibOut};
use crate::utils::format_time_as_elapsed;
use crate::wire::{CodecContext, Family, Message, Notification, Update};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Receive,
    Send,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Receive => write!(f, "receive"),
            Direction::Send => write!(f, "send"),
        }
    }
}

pub struct Session {
    pub addr: IpAddr,
    pub local_addr: IpAddr,
    pub state: SessionState,
    pub config: Arc<NeighborConfig>,
    protocol: MessageProtocol,
    codec_ctx: Arc<RwLock<CodecContext>>,
    pub negotiated: Option<Arc<Negotiated>>,
    pub connect_time: DateTime<Utc>,
    pub hold_timer: HoldTimer,
    pub counts: MessageCounts,
    pub rib_out: Arc<Mutex<AdjRibOut>>,
    pub rib_in: Arc<Mutex<AdjRibIn>>,
    locally_initiated: bool,
    hostname: String,
    eor_sent: bool,
    pending_close: Option<SessionError>,
    /// Copies of sent messages for send-direction API subscribers
    sent_tx: Option<tokio::sync::mpsc::UnboundedSender<(IpAddr, Message)>>,
}

impl Session {
    pub fn new(
        config: Arc<NeighborConfig>,
        stream: TcpStream,
        locally_initiated: bool,
        rib_out: Arc<Mutex<AdjRibOut>>,
        rib_in: Arc<Mutex<AdjRibIn>>,
        hostname: String,
        sent_tx: Option<tokio::sync::mpsc::UnboundedSender<(IpAddr, Message)>>,
    ) -> std::io::Result<Session> {
        let addr = stream.peer_addr()?.ip();
        let local_addr = stream.local_addr()?.ip();
        let codec = MessageCodec::new();
        let codec_ctx = codec.context();
        let hold_timer = HoldTimer::new(config.hold_time);
        Ok(Session {
            addr,
            local_addr,
            state: if locally_initiated {
                SessionState::Connect
            } else {
                SessionState::Active
            },
            config,
            protocol: Framed::new(stream, codec),
            codec_ctx,
            negotiated: None,
            connect_time: Utc::now(),
            hold_timer,
            counts: MessageCounts::new(),
            rib_out,
            rib_in,
            locally_initiated,
            hostname,
            eor_sent: false,
            pending_close: None,
            sent_tx,
        })
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn locally_initiated(&self) -> bool {
        self.locally_initiated
    }

    /// Router-id the peer put in its OPEN, once known
    pub fn peer_router_id(&self) -> Option<std::net::Ipv4Addr> {
        self.negotiated.as_ref().map(|n| n.peer_router_id)
    }

    pub fn update_state(&mut self, new_state: SessionState) {
        debug!("{} went from {} to {}", self.addr, self.state, new_state);
        self.state = new_state;
    }

    pub fn update_config(&mut self, new_config: Arc<NeighborConfig>) {
        debug!("Peer config for {} (active session) updated", self.addr);
        self.config = new_config;
    }

    /// Main function for making progress with the session. Waits for
    /// either a new incoming message or a hold-timer event; pending RIB
    /// changes are drained first.
    pub async fn run(&mut self) -> Result<Option<SessionEvent>, SessionError> {
        if !self.config.enabled {
            return Err(SessionError::Deconfigured);
        }
        if let Some(err) = self.pending_close.take() {
            return Err(err);
        }

        if self.state == SessionState::Connect && self.locally_initiated {
            let open = self.config.create_open(&self.hostname);
            self.send_message(Message::Open(open)).await?;
            self.update_state(SessionState::OpenSent);
        }

        // the operational sub-states are transient; one loop iteration each
        if self.state == SessionState::OperStart {
            self.update_state(SessionState::OperConfirm);
        } else if self.state == SessionState::OperConfirm {
            let event = self.enter_established().await?;
            return Ok(Some(event));
        }

        if self.state == SessionState::Established {
            self.drain_rib().await?;
        }
        trace!("Hold time on {}: {}", self.addr, self.hold_timer);

        tokio::select! {
            message = self.protocol.next() => {
                match message {
                    // stream exhausted, remote side closed the connection
                    None => Err(SessionError::Other(format!(
                        "Session ended with {}", self.addr
                    ))),
                    Some(Ok(received)) => {
                        trace!("[{}] Incoming: {}", self.addr, received.message.label());
                        self.counts.increment_received(received.message.kind());
                        self.hold_timer.received();
                        self.process_message(received).await
                    }
                    Some(Err(err)) => Err(SessionError::from(err)),
                }
            },
            keepalive = self.hold_timer.should_send_keepalive() => {
                if keepalive? {
                    self.send_message(Message::KeepAlive).await?;
                }
                Ok(None)
            },
        }
    }

    async fn process_message(
        &mut self,
        received: ReceivedMessage,
    ) -> Result<Option<SessionEvent>, SessionError> {
        let ReceivedMessage {
            message,
            header,
            body,
        } = received;
        match message {
            Message::Open(open) => {
                let remote_asn = open.asn4();
                if remote_asn != self.config.peer_as {
                    return Err(SessionError::OpenAsnMismatch(
                        remote_asn,
                        self.config.peer_as,
                    ));
                }
                debug!(
                    "[{}] Received OPEN [w/ {} capabilities]",
                    self.addr,
                    open.capabilities.len()
                );
                let reply_open = match self.state {
                    // we initiated and already sent our OPEN
                    SessionState::OpenSent => None,
                    // remote initiated, reply with our OPEN first
                    SessionState::Active | SessionState::Connect => {
                        Some(self.config.create_open(&self.hostname))
                    }
                    _ => {
                        return Err(SessionError::FiniteStateMachine(fsm_err_for_state(
                            self.state,
                        )));
                    }
                };
                let local_open = reply_open
                    .clone()
                    .unwrap_or_else(|| self.config.create_open(&self.hostname));

                let negotiated = Arc::new(Negotiated::build(local_open, open.clone()));
                *self.codec_ctx.write().expect("codec context lock") =
                    negotiated.codec_context();
                self.hold_timer = HoldTimer::new(negotiated.hold_time);
                self.negotiated = Some(negotiated);

                if let Some(reply) = reply_open {
                    self.send_message(Message::Open(reply)).await?;
                }
                self.send_message(Message::KeepAlive).await?;
                self.update_state(SessionState::OpenConfirm);
                Ok(Some(SessionEvent::OpenReceived(
                    self.addr,
                    open,
                    Direction::Receive,
                )))
            }
            Message::KeepAlive => match self.state {
                SessionState::OpenConfirm => {
                    let operational = self
                        .negotiated
                        .as_ref()
                        .map(|n| n.operational)
                        .unwrap_or(false);
                    if operational {
                        self.update_state(SessionState::OperStart);
                        Ok(None)
                    } else {
                        let event = self.enter_established().await?;
                        Ok(Some(event))
                    }
                }
                _ => Ok(Some(SessionEvent::KeepaliveReceived(self.addr))),
            },
            Message::Update(update) => {
                if self.state != SessionState::Established {
                    return Err(SessionError::FiniteStateMachine(fsm_err_for_state(
                        self.state,
                    )));
                }
                self.apply_update(&update).await;
                Ok(Some(SessionEvent::Learned(self.addr, update, header, body)))
            }
            Message::Notification(notification) => {
                warn!("{} NOTIFICATION: {}", self.addr, notification);
                self.pending_close = Some(SessionError::Other(format!(
                    "peer sent {}",
                    notification
                )));
                Ok(Some(SessionEvent::NotificationReceived(
                    self.addr,
                    notification,
                )))
            }
            Message::RouteRefresh(refresh) => {
                use crate::wire::refresh::RefreshSubtype;
                match refresh.subtype {
                    RefreshSubtype::Request => {
                        let mut rib = self.rib_out.lock().await;
                        rib.mark_for_refresh_family(refresh.family);
                    }
                    // enhanced refresh markers need no action on our side
                    RefreshSubtype::Begin | RefreshSubtype::End => {
                        debug!("[{}] enhanced refresh {}", self.addr, refresh.subtype);
                    }
                }
                Ok(Some(SessionEvent::RefreshReceived(self.addr, refresh)))
            }
            Message::Operational(operational) => {
                let supported = self
                    .negotiated
                    .as_ref()
                    .map(|n| n.operational)
                    .unwrap_or(false);
                if !supported {
                    debug!("[{}] operational message without capability", self.addr);
                }
                Ok(Some(SessionEvent::OperationalReceived(
                    self.addr,
                    operational,
                )))
            }
        }
    }

    async fn enter_established(&mut self) -> Result<SessionEvent, SessionError> {
        self.update_state(SessionState::Established);
        self.counts.sessions_up += 1;
        // re-announce the full Adj-RIB-Out exactly once
        self.rib_out.lock().await.resend_all();
        self.eor_sent = false;
        Ok(SessionEvent::Up(self.addr))
    }

    /// Fold a received UPDATE into the Adj-RIB-In; EOR sweeps stale
    /// graceful-restart routes for its family.
    async fn apply_update(&mut self, update: &Update) {
        let mut rib = self.rib_in.lock().await;
        match update.eor {
            Some(family) => {
                rib.sweep_stale(family);
            }
            None => rib.apply(update),
        }
    }

    /// Push queued Adj-RIB-Out changes onto the wire, then the initial
    /// End-of-RIB markers once the queue is empty.
    async fn drain_rib(&mut self) -> Result<(), SessionError> {
        let negotiated = match &self.negotiated {
            Some(negotiated) => Arc::clone(negotiated),
            None => return Ok(()),
        };
        let (updates, drained) = {
            let mut rib = self.rib_out.lock().await;
            // with auto-flush disabled, queued changes wait for an
            // explicit `rib flush out`
            if !self.config.auto_flush && !rib.flush_requested() {
                return Ok(());
            }
            let updates = rib.drain_updates(
                self.config.group_updates,
                &negotiated.families,
                self.config.rate_limit,
            );
            if !rib.has_pending() {
                rib.clear_flush_request();
            }
            (updates, !rib.has_pending())
        };
        for update in updates {
            self.send_message(Message::Update(update)).await?;
        }
        if drained && !self.eor_sent && !self.config.manual_eor {
            for family in negotiated.families.clone() {
                self.send_message(Message::Update(Update::eor(family))).await?;
            }
            self.eor_sent = true;
        }
        Ok(())
    }

    /// Queue an explicit End-of-RIB (manual-eor neighbors)
    pub async fn send_eor(&mut self, family: Family) -> Result<(), SessionError> {
        self.send_message(Message::Update(Update::eor(family))).await?;
        self.eor_sent = true;
        Ok(())
    }

    // Send a message and flush the send buffer afterwards
    pub async fn send_message(&mut self, message: Message) -> Result<(), SessionError> {
        trace!("[{}] Outgoing: {}", self.addr, message.label());
        let kind = message.kind();
        if let Some(sent_tx) = &self.sent_tx {
            let _ = sent_tx.send((self.addr, message.clone()));
        }
        self.protocol.send(message).await?;
        self.counts.increment_sent(kind);
        self.hold_timer.sent();
        Ok(())
    }

    pub async fn send_notification(&mut self, notification: Notification) {
        if let Err(err) = self
            .send_message(Message::Notification(notification))
            .await
        {
            debug!("[{}] could not send NOTIFICATION: {}", self.addr, err);
        }
    }

    /// Operator-requested teardown: flush a NOTIFICATION on the next run
    pub fn request_teardown(&mut self, subcode: u8) {
        self.pending_close = Some(SessionError::Teardown(subcode));
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Session {} {} uptime={} hold_time={}>",
            self.addr,
            self.state,
            format_time_as_elapsed(self.connect_time),
            self.hold_timer,
        )
    }
}

fn fsm_err_for_state(state: SessionState) -> u8 {
    use SessionState::*;
    match state {
        OpenSent => 1,
        OpenConfirm | OperStart | OperConfirm => 2,
        Established => 3,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsm_err_codes() {
        assert_eq!(fsm_err_for_state(SessionState::OpenSent), 1);
        assert_eq!(fsm_err_for_state(SessionState::OpenConfirm), 2);
        assert_eq!(fsm_err_for_state(SessionState::Established), 3);
        assert_eq!(fsm_err_for_state(SessionState::Idle), 0);
    }
}
