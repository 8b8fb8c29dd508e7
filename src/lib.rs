//! # Guestbridge - sandboxed Guest UIs for tool-calling hosts
//!
//! Embeds untrusted Guest UI documents inside a Host through a double-frame
//! relay and connects the two sides with a JSON-RPC protocol.
//!
//! ## Architecture
//!
//! - **channel**: windows and origin-checked message channels between frames
//! - **protocol**: JSON-RPC envelope, sessions, typed payloads, metadata
//! - **sandbox**: the relay, CSP and sandbox attributes, tamper monitor
//! - **bridge**: the Host endpoint (`AppBridge`) and Guest loading
//! - **app**: the Guest endpoint (`App`) and auto-resize
//! - **config**: file and environment configuration
//! - **utils**: shared error type

pub mod app;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod protocol;
pub mod sandbox;
pub mod utils;

// Re-export main types for convenience
pub use app::{App, AppDelegate};
pub use bridge::{AppBridge, GuestLoader, GuestResource, HostDelegate, UpstreamServer};
pub use channel::{MessageChannel, Window};
pub use config::Config;
pub use sandbox::{SandboxRelay, TamperMonitor};
pub use utils::error::{BridgeError, Result};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "guestbridge";
