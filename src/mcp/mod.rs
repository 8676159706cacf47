pub mod client;
pub mod error;
pub mod tools;
pub mod transport;

pub use client::{ConnectionReport, ConnectionState, McpSessionClient, McpSnapshot};
pub use error::McpError;
pub use tools::{ToolCallResponse, ToolDescriptor};
