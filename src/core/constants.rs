//! Shared constants used across the application

/// Tools advertised when the remote server cannot be reached during the
/// handshake, as `(name, description)` pairs.
pub const FALLBACK_TOOLS: &[(&str, &str)] = &[
    ("get_all_cards_with_name", "List every card with its name"),
    (
        "get_available_benefit_keywords",
        "List the benefit keywords that can be searched",
    ),
    ("search_cards_by_benefit", "Search cards by benefit keyword"),
    ("search_cards_by_annual_fee", "Search cards by annual fee"),
    ("get_card_info", "Fetch detailed information for one card"),
    ("get_event_data", "List currently running events"),
];

pub const DEFAULT_MCP_BASE_URL: &str = "http://localhost:8000/mcp/";
pub const DEFAULT_MCP_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_MCP_PROBE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MCP_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const DEFAULT_MCP_CLIENT_NAME: &str = "parley";

/// Text shown for a user turn until the first transcription delta arrives.
pub const TRANSCRIBING_PLACEHOLDER: &str = "Transcribing…";

/// Environment variable that overrides `mcp.base_url`.
pub const MCP_URL_ENV: &str = "PARLEY_MCP_URL";
