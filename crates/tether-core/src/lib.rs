//! Tether Core - Shared identifiers, descriptors, and configuration
//!
//! This crate contains the foundational types used by the relay and its
//! clients. It has no dependencies on networking code.

pub mod config;
pub mod error;
pub mod id;
pub mod types;

pub use config::{Config, IceConfig, SignalConfig};
pub use error::*;
pub use id::ConnectionId;
pub use types::*;

/// Protocol version reported by the relay
pub const PROTOCOL_VERSION: u32 = 1;
