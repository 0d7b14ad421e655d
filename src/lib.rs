//! agent-say - speech output for coding agents
//!
//! Serves a text-to-speech tool over MCP. Requests are deduplicated,
//! bounded by a global concurrency cap and given an adaptive timeout
//! learned from how fast each engine actually speaks.

pub mod config;
pub mod error;
pub mod markdown;
pub mod mcp;
pub mod platform;
pub mod speech;

pub use error::{Result, SayError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "agent-say";
