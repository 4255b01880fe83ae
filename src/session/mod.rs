mod codec;
mod hold_timer;
mod manager;
mod message_counts;
pub mod negotiated;
pub mod network;
mod peer;
mod poller;

use std::error;
use std::fmt;
use std::io;
use std::net::IpAddr;

pub use codec::{CodecError, MessageCodec, MessageProtocol, ReceivedMessage};
pub use hold_timer::HoldTimer;
pub use manager::{PeerRecord, SessionManager};
pub use message_counts::MessageCounts;
pub use negotiated::Negotiated;
pub use peer::{Direction, Session};
pub use poller::{Poller, PollerTx};

use crate::wire::{Notification, Notify, Open, Operational, RouteRefresh, Update};

/// Something a running session surfaced to the reactor
#[derive(Debug)]
pub enum SessionEvent {
    /// TCP came up and a session object now exists
    Connected(IpAddr),
    /// OPEN exchanged and validated
    OpenReceived(IpAddr, Open, Direction),
    /// Session reached Established
    Up(IpAddr),
    /// UPDATE received from the peer, with its raw header/body for
    /// packet-level API subscribers
    Learned(IpAddr, Update, Vec<u8>, Vec<u8>),
    KeepaliveReceived(IpAddr),
    RefreshReceived(IpAddr, RouteRefresh),
    OperationalReceived(IpAddr, Operational),
    NotificationReceived(IpAddr, Notification),
    /// Sessions are over, clear RIB state for these peers [(addr, reason)]
    Ended(Vec<(IpAddr, String)>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    /// Transient pre-Established states used when the operational
    /// capability was negotiated
    OperStart,
    OperConfirm,
    Established,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            SessionState::Idle => "Idle",
            SessionState::Connect => "Connect",
            SessionState::Active => "Active",
            SessionState::OpenSent => "OpenSent",
            SessionState::OpenConfirm => "OpenConfirm",
            SessionState::OperStart => "OperStart",
            SessionState::OperConfirm => "OperConfirm",
            SessionState::Established => "Established",
        };
        write!(f, "{}", word)
    }
}

#[derive(Debug)]
pub enum SessionError {
    /// Peer de-configured
    Deconfigured,
    /// Received an unexpected ASN [received, expected]
    OpenAsnMismatch(u32, u32),
    /// Unexpected message for the current state [minor_err_code]
    FiniteStateMachine(u8),
    /// Hold time expired [interval]
    HoldTimeExpired(u16),
    /// Wire decode error to relay as a NOTIFICATION
    Protocol(Notify),
    /// Operator-requested teardown [cease subcode]
    Teardown(u8),
    /// Connection collision lost (RFC 4271 §6.8)
    CollisionLost,
    TransportError(String),
    Other(String),
}

impl SessionError {
    /// The NOTIFICATION to put on the wire for this failure, if any
    pub fn notification(&self) -> Option<Notification> {
        use SessionError::*;
        match self {
            Deconfigured => Some(Notification::new(6, 3)),
            OpenAsnMismatch(received, _) => {
                let mut notification = Notification::new(2, 2);
                notification.data = received.to_be_bytes().to_vec();
                Some(notification)
            }
            FiniteStateMachine(minor) => Some(Notification::new(5, *minor)),
            HoldTimeExpired(_) => Some(Notification::new(4, 0)),
            Protocol(notify) => Some(Notification::from(notify.clone())),
            Teardown(subcode) => Some(Notification::new(6, *subcode)),
            CollisionLost => Some(Notification::new(6, 7)),
            TransportError(_) | Other(_) => None,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Session Error: ")?;
        use SessionError::*;
        match self {
            Deconfigured => write!(f, "Peer De-configured")?,
            OpenAsnMismatch(r, e) => {
                write!(f, "Open ASN Mismatch (received={}, expected={})", r, e)?;
            }
            HoldTimeExpired(h) => write!(f, "Hold time expired after {} seconds", h)?,
            FiniteStateMachine(minor) => write!(f, "Finite State Machine err [{}]", minor)?,
            Protocol(notify) => write!(f, "{}", notify)?,
            Teardown(subcode) => write!(f, "Teardown requested (cease/{})", subcode)?,
            CollisionLost => write!(f, "Connection collision, this session lost")?,
            TransportError(r) => write!(f, "Transport error [{}]", r)?,
            Other(r) => write!(f, "{}", r)?,
        }
        Ok(())
    }
}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        SessionError::TransportError(error.to_string())
    }
}

impl From<Notify> for SessionError {
    fn from(notify: Notify) -> Self {
        SessionError::Protocol(notify)
    }
}

impl From<CodecError> for SessionError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Io(err) => SessionError::TransportError(err.to_string()),
            CodecError::Notify(notify) => SessionError::Protocol(notify),
        }
    }
}

impl error::Error for SessionError {}

/// RFC 4271 §6.8: when two connections to the same peer are both pending,
/// the connection initiated by the side with the higher router-id survives.
/// Returns true when the locally-initiated connection should be kept.
pub fn collision_keep_local(local_id: std::net::Ipv4Addr, peer_id: std::net::Ipv4Addr) -> bool {
    u32::from_be_bytes(local_id.octets()) > u32::from_be_bytes(peer_id.octets())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_resolution() {
        let local = "2.2.2.2".parse().unwrap();
        let peer = "1.1.1.1".parse().unwrap();
        assert!(collision_keep_local(local, peer));
        assert!(!collision_keep_local(peer, local));
    }

    #[test]
    fn test_error_notifications() {
        assert_eq!(
            SessionError::HoldTimeExpired(30).notification(),
            Some(Notification::new(4, 0))
        );
        assert_eq!(
            SessionError::CollisionLost.notification(),
            Some(Notification::new(6, 7))
        );
        let notification = SessionError::OpenAsnMismatch(65002, 65001)
            .notification()
            .unwrap();
        assert_eq!((notification.code, notification.subcode), (2, 2));
        assert!(SessionError::TransportError("reset".into())
            .notification()
            .is_none());
    }
}
