//! Parley is the session core of a live voice/text agent client.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`session`] reconciles the realtime session's event stream into an
//!   ordered transcript, tracks guardrail verdicts and agent handoffs, and
//!   exposes the controller that owns the realtime transport.
//! - [`mcp`] is the Model Context Protocol client used for tool calls: JSON-RPC
//!   over streamable HTTP, the connection state machine, and frame selection
//!   for event-stream replies.
//! - [`core`] holds configuration and shared constants.
//! - [`utils`] writes transcript logs.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod cli;
pub mod core;
pub mod mcp;
pub mod session;
pub mod utils;
