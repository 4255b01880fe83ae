//! Per-peer routing tables: the outbound Adj-RIB-Out with its update
//! batching, and the optional inbound Adj-RIB-In kept for operational
//! inspection and graceful restart.

pub mod inbound;
pub mod outbound;

pub use inbound::AdjRibIn;
pub use outbound::AdjRibOut;

use std::fmt;
use std::sync::Arc;

use crate::wire::{AttributeCollection, Nlri};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Announce,
    Withdraw,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Action::Announce => write!(f, "announce"),
            Action::Withdraw => write!(f, "withdraw"),
        }
    }
}

/// One route change bound for (or applied to) a peer's table. The NLRI
/// identifies the route; attributes plus next-hop identify the path.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    pub nlri: Nlri,
    pub attributes: Arc<AttributeCollection>,
    pub action: Action,
    /// Routes tagged with a watchdog are only announced while it is up
    pub watchdog: Option<String>,
}

impl Change {
    pub fn announce(nlri: Nlri, attributes: Arc<AttributeCollection>) -> Self {
        Self {
            nlri,
            attributes,
            action: Action::Announce,
            watchdog: None,
        }
    }

    pub fn withdraw(nlri: Nlri) -> Self {
        Self {
            nlri,
            attributes: Arc::new(AttributeCollection::new()),
            action: Action::Withdraw,
            watchdog: None,
        }
    }

    pub fn with_watchdog(mut self, watchdog: Option<String>) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn key(&self) -> Vec<u8> {
        self.nlri.index()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.action, self.nlri)
    }
}
