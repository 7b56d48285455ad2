//! Lightbridge Client - Discovery bookkeeping for remote bridge services
//!
//! The lighting-host side of the protocol: broadcasts `DEVICES` queries,
//! tracks which bridge services have answered and which devices each one
//! announced, and purges services that stop answering.

pub mod runner;
pub mod tracker;

pub use runner::{run, ClientConfig};
pub use tracker::{ClientEvent, ServiceSession, ServiceTracker, LIVENESS_TIMEOUT_SECS};
