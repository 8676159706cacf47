pub mod data;
pub mod defaults;
pub mod io;

pub use data::{Config, FallbackTool, McpSettings, SessionSettings};
pub use io::ConfigError;
