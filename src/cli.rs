//! Command-line interface for tierroute
//!
//! Provides argument parsing and subcommand handling for the tierroute binary.

use clap::{Parser, Subcommand};

/// Budget-constrained multi-tier request router for hosted LLMs
#[derive(Parser)]
#[command(name = "tierroute")]
#[command(version)]
#[command(about = "Budget-constrained multi-tier request router for hosted LLMs")]
#[command(
    long_about = "tierroute classifies requests by complexity, routes them to free, cheap or \
    premium models under a daily budget, and falls back across ranked models when one is \
    rate-limited or unavailable."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# tierroute configuration
# ========================

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
host = "0.0.0.0"
port = 3000

# Whole-request deadline; the request is cancelled after this many seconds
request_timeout_seconds = 120

# ─────────────────────────────────────────────────────────────────────────────
# BUDGET
# ─────────────────────────────────────────────────────────────────────────────
#
# Amounts are USD. The period resets at UTC midnight.

[budget]
daily_limit = 5.00

# Estimates are multiplied by this before checking (>= 1.0)
safety_buffer_ratio = 1.5

# Optional per-session cap within the period
# session_limit = 1.00

# Output tokens assumed for every estimate and sent as max_tokens
max_output_tokens = 1024

# ─────────────────────────────────────────────────────────────────────────────
# RATE-LIMIT COOLDOWN
# ─────────────────────────────────────────────────────────────────────────────
#
# A throttled model is skipped for min_seconds, doubling on every repeat
# throttle up to max_seconds.

[cooldown]
min_seconds = 3600
max_seconds = 86400

# ─────────────────────────────────────────────────────────────────────────────
# CATALOG
# ─────────────────────────────────────────────────────────────────────────────

[catalog]
refresh_interval_seconds = 604800
top_n = 3
backups = 2

# Paid models at or below this price per token are "cheap", above are "premium"
cheap_max_cost_per_token = 0.000003

# OpenRouter-style model listing; omit to use only the models below
discovery_url = "https://openrouter.ai/api/v1/models"
discovery_timeout_seconds = 30

# ─────────────────────────────────────────────────────────────────────────────
# PINNED MODELS
# ─────────────────────────────────────────────────────────────────────────────
#
# Always in the catalog, ranked ahead of discovered models.

[[tiers.free]]
id = "meta-llama/llama-3.3-70b-instruct:free"
context_window = 131072
rank = 1

[[tiers.cheap]]
id = "google/gemini-2.0-flash-001"
cost_per_token = 0.0000004
context_window = 1000000
rank = 1

[[tiers.premium]]
id = "anthropic/claude-sonnet-4"
cost_per_token = 0.000015
context_window = 200000
rank = 1

# ─────────────────────────────────────────────────────────────────────────────
# ROUTING
# ─────────────────────────────────────────────────────────────────────────────

[routing]
simple_tier = "free"
medium_tier = "cheap"
allow_escalation = true

[planner]
planning_tier = "premium"
max_subtasks = 8
subtask_concurrency = 1

# Per-call timeouts in seconds, (0, 300]
[timeouts]
free = 30
cheap = 45
premium = 90

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDER
# ─────────────────────────────────────────────────────────────────────────────

[provider]
base_url = "https://openrouter.ai/api/v1"
api_key_env = "OPENROUTER_API_KEY"

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"
"#
}
