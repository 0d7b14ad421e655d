//! Model Context Protocol front end
//!
//! Exposes the `speak` and `stop_speech` tools over newline-delimited
//! JSON-RPC on stdio.

pub mod protocol;
pub mod server;

pub use server::Server;
