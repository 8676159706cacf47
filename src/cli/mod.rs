//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::warn;

use crate::core::config::data::path_display;
use crate::core::config::Config;
use crate::mcp::{ConnectionState, McpSessionClient, ToolCallResponse};
use crate::session::{ReplayTransport, SessionController};
use crate::utils::logging::{format_item, TranscriptLog};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Session core for live agent conversations, with an MCP tool client")]
#[command(
    long_about = "Parley reconciles realtime agent session events into a transcript and \
talks to a remote tool server over MCP (JSON-RPC over streamable HTTP).\n\n\
Environment Variables:\n\
  PARLEY_MCP_URL    Override the MCP server URL from the config file\n\
  PARLEY_LOG        Log filter (falls back to RUST_LOG, default parley=info)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Use this config file instead of the platform default
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to the MCP server and list its tools
    Tools,
    /// Call a tool on the MCP server
    Call {
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(short = 'a', long, value_name = "JSON")]
        args: Option<String>,
    },
    /// Replay a recorded JSONL session event log and print the transcript
    Replay {
        /// Event log, one JSON event per line
        file: PathBuf,
        /// Agent to start the session with
        #[arg(long)]
        agent: Option<String>,
        /// Write the resulting transcript to this file
        #[arg(short = 'l', long)]
        log: Option<String>,
    },
    /// Inspect or initialize the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the config file path
    Path,
    /// Print the effective configuration
    Show,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config_path = match args.config {
        Some(path) => path,
        None => Config::get_config_path()?,
    };

    match args.command {
        Commands::Tools => list_tools(load_config(&config_path)?).await,
        Commands::Call { tool, args } => {
            let arguments = parse_tool_arguments(args.as_deref())?;
            let response = call_with_retry(load_config(&config_path)?, &tool, arguments).await?;
            println!("{}", response.extract_text());
            if response.success {
                Ok(())
            } else {
                Err("Tool call failed.".into())
            }
        }
        Commands::Replay { file, agent, log } => {
            let config = load_config(&config_path)?;
            for line in run_replay(&config, &file, agent.as_deref(), log).await? {
                println!("{line}\n");
            }
            Ok(())
        }
        Commands::Config { action } => run_config_action(&config_path, action),
    }
}

/// Loads the config at `path` and applies environment overrides.
pub(crate) fn load_config(path: &Path) -> Result<Config, Box<dyn Error>> {
    let mut config = Config::load_from_path(path)?;
    config.apply_env_overrides();
    Ok(config)
}

/// Parses `--args`; absent means an empty object.
pub(crate) fn parse_tool_arguments(raw: Option<&str>) -> Result<Value, Box<dyn Error>> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value =
        serde_json::from_str(raw).map_err(|err| format!("--args is not valid JSON: {err}"))?;
    if !value.is_object() {
        return Err("--args must be a JSON object".into());
    }
    Ok(value)
}

async fn list_tools(config: Config) -> Result<(), Box<dyn Error>> {
    let client = McpSessionClient::with_http(config.mcp)?;
    let state = client.initialize().await;
    let snapshot = client.snapshot().await;

    println!("MCP server: {}", client.settings().base_url);
    println!("State: {state}");
    if let Some(session_id) = &snapshot.session_id {
        println!("Session: {session_id}");
    }
    if let Some(version) = &snapshot.negotiated_protocol_version {
        println!("Protocol: {version}");
    }
    if let Some(err) = &snapshot.last_error {
        println!("Last error: {err}");
    }
    if state == ConnectionState::Degraded {
        println!("Using fallback tool catalogue.");
    }
    println!();
    for tool in &snapshot.tools {
        if tool.description.is_empty() {
            println!("  {}", tool.name);
        } else {
            println!("  {} - {}", tool.name, tool.description);
        }
    }
    Ok(())
}

/// Calls a tool, reconnecting and retrying up to `retry_attempts` times.
pub(crate) async fn call_with_retry(
    config: Config,
    tool: &str,
    arguments: Value,
) -> Result<ToolCallResponse, Box<dyn Error>> {
    let retry_attempts = config.mcp.retry_attempts;
    let client = McpSessionClient::with_http(config.mcp)?;
    client.initialize().await;

    let mut attempt = 0;
    loop {
        let response = client.call_tool(tool, arguments.clone()).await;
        if response.success || attempt >= retry_attempts {
            return Ok(response);
        }
        attempt += 1;
        warn!(
            tool = %tool,
            attempt,
            error = response.error.as_deref().unwrap_or_default(),
            "Tool call failed; reconnecting"
        );
        client.reconnect().await;
    }
}

/// Replays `file` through a session controller and returns the rendered
/// transcript.
pub(crate) async fn run_replay(
    config: &Config,
    file: &Path,
    agent: Option<&str>,
    log: Option<String>,
) -> Result<Vec<String>, Box<dyn Error>> {
    let transport = ReplayTransport::from_path(file)?;
    let mut controller = SessionController::new(transport, &config.session);
    if let Some(agent) = agent {
        controller.select_agent(agent).await?;
    }
    controller.connect().await?;
    controller.pump().await;

    let items = controller.transcript_snapshot();
    if let Some(path) = log {
        TranscriptLog::new(path).rewrite(&items)?;
    }
    Ok(items.iter().map(format_item).collect())
}

pub(crate) fn run_config_action(path: &Path, action: ConfigAction) -> Result<(), Box<dyn Error>> {
    match action {
        ConfigAction::Path => {
            println!("{}", path_display(path));
        }
        ConfigAction::Show => {
            let config = load_config(path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Err(format!(
                    "{} already exists; pass --force to overwrite it",
                    path_display(path)
                )
                .into());
            }
            Config::default().save_to_path(path)?;
            println!("Wrote default configuration to {}", path_display(path));
        }
    }
    Ok(())
}
