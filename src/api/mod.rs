//! The helper-process API: line-protocol command parsing (v4 and v6
//! grammars), neighbor selection, event encoding, and the manager that
//! feeds spawned helper programs.

pub mod dispatch;
pub mod encoder;
pub mod process;
pub mod selector;
pub mod transform;

pub use dispatch::{dispatch, BodyKind, Command, RibDirection};
pub use encoder::{Encoder as EventEncoder, Event, NeighborRef};
pub use process::{ProcessManager, ServiceId};
pub use selector::{extract_neighbors, match_peers, NeighborSelector};
pub use transform::v4_to_v6;

use std::error::Error;
use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum ApiError {
    UnknownCommand(String),
    InvalidCommand(String),
    NoMatchingPeers(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::UnknownCommand(command) => write!(f, "unknown command: {}", command),
            ApiError::InvalidCommand(reason) => write!(f, "invalid command: {}", reason),
            ApiError::NoMatchingPeers(command) => {
                write!(f, "no matching peers: {}", command)
            }
        }
    }
}

impl Error for ApiError {}
