//! Configuration management for tierroute
//!
//! Loads configuration from TOML files and provides typed access to all settings.

use crate::error::{AppError, AppResult};
use crate::models::{ModelDescriptor, ModelId, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub budget: BudgetConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub tiers: TiersConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    30
}

/// Spending limits
///
/// Validated at parse time through [`BudgetConfig::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawBudgetConfig")]
pub struct BudgetConfig {
    daily_limit: f64,
    safety_buffer_ratio: f64,
    session_limit: Option<f64>,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct RawBudgetConfig {
    daily_limit: f64,
    #[serde(default = "default_safety_buffer")]
    safety_buffer_ratio: f64,
    #[serde(default)]
    session_limit: Option<f64>,
    #[serde(default = "default_max_output_tokens")]
    max_output_tokens: u32,
}

fn default_safety_buffer() -> f64 {
    1.5
}

fn default_max_output_tokens() -> u32 {
    1024
}

impl TryFrom<RawBudgetConfig> for BudgetConfig {
    type Error = AppError;

    fn try_from(raw: RawBudgetConfig) -> Result<Self, Self::Error> {
        Self::new(
            raw.daily_limit,
            raw.safety_buffer_ratio,
            raw.session_limit,
            raw.max_output_tokens,
        )
    }
}

impl BudgetConfig {
    /// Create a validated budget section
    ///
    /// # Errors
    ///
    /// Returns an error if the limit is not a positive finite amount, the
    /// safety buffer is below 1.0, the session limit is not positive, or the
    /// output allowance is zero.
    pub fn new(
        daily_limit: f64,
        safety_buffer_ratio: f64,
        session_limit: Option<f64>,
        max_output_tokens: u32,
    ) -> AppResult<Self> {
        if !daily_limit.is_finite() || daily_limit <= 0.0 {
            return Err(AppError::Config(format!(
                "budget.daily_limit must be a positive amount, got {}",
                daily_limit
            )));
        }
        if !safety_buffer_ratio.is_finite() || safety_buffer_ratio < 1.0 {
            return Err(AppError::Config(format!(
                "budget.safety_buffer_ratio must be at least 1.0, got {}",
                safety_buffer_ratio
            )));
        }
        if let Some(limit) = session_limit
            && (!limit.is_finite() || limit <= 0.0)
        {
            return Err(AppError::Config(format!(
                "budget.session_limit must be a positive amount, got {}",
                limit
            )));
        }
        if max_output_tokens == 0 {
            return Err(AppError::Config(
                "budget.max_output_tokens must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            daily_limit,
            safety_buffer_ratio,
            session_limit,
            max_output_tokens,
        })
    }

    pub fn daily_limit(&self) -> f64 {
        self.daily_limit
    }

    pub fn safety_buffer_ratio(&self) -> f64 {
        self.safety_buffer_ratio
    }

    pub fn session_limit(&self) -> Option<f64> {
        self.session_limit
    }

    /// Completion allowance per call, used for estimates and as `max_tokens`
    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }
}

/// Rate-limit cooldown bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CooldownConfig {
    #[serde(default = "default_min_cooldown")]
    min_seconds: u64,
    #[serde(default = "default_max_cooldown")]
    max_seconds: u64,
}

fn default_min_cooldown() -> u64 {
    3600
}

fn default_max_cooldown() -> u64 {
    86400
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            min_seconds: default_min_cooldown(),
            max_seconds: default_max_cooldown(),
        }
    }
}

impl CooldownConfig {
    pub fn min_seconds(&self) -> u64 {
        self.min_seconds
    }

    pub fn max_seconds(&self) -> u64 {
        self.max_seconds
    }
}

/// Catalog discovery and retention
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(default = "default_refresh_interval")]
    refresh_interval_seconds: u64,
    #[serde(default = "default_top_n")]
    top_n: usize,
    #[serde(default = "default_backups")]
    backups: usize,
    #[serde(default = "default_cheap_max_cost")]
    cheap_max_cost_per_token: f64,
    #[serde(default)]
    discovery_url: Option<String>,
    #[serde(default = "default_discovery_timeout")]
    discovery_timeout_seconds: u64,
}

fn default_refresh_interval() -> u64 {
    // weekly
    604_800
}

fn default_top_n() -> usize {
    3
}

fn default_backups() -> usize {
    2
}

fn default_cheap_max_cost() -> f64 {
    0.000_003
}

fn default_discovery_timeout() -> u64 {
    30
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval(),
            top_n: default_top_n(),
            backups: default_backups(),
            cheap_max_cost_per_token: default_cheap_max_cost(),
            discovery_url: None,
            discovery_timeout_seconds: default_discovery_timeout(),
        }
    }
}

impl CatalogConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    /// Primary models retained per tier
    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Backup models retained per tier beyond `top_n`
    pub fn backups(&self) -> usize {
        self.backups
    }

    /// Highest per-token price still counted as the cheap tier
    pub fn cheap_max_cost_per_token(&self) -> f64 {
        self.cheap_max_cost_per_token
    }

    pub fn discovery_url(&self) -> Option<&str> {
        self.discovery_url.as_deref()
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_seconds)
    }
}

/// Statically configured models per tier
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TiersConfig {
    #[serde(default)]
    pub free: Vec<TierModel>,
    #[serde(default)]
    pub cheap: Vec<TierModel>,
    #[serde(default)]
    pub premium: Vec<TierModel>,
}

impl TiersConfig {
    /// Iterate over (tier, model) pairs
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &TierModel)> {
        self.free
            .iter()
            .map(|m| (Tier::Free, m))
            .chain(self.cheap.iter().map(|m| (Tier::Cheap, m)))
            .chain(self.premium.iter().map(|m| (Tier::Premium, m)))
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty() && self.cheap.is_empty() && self.premium.is_empty()
    }
}

/// A configured model entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierModel {
    id: String,
    #[serde(default)]
    cost_per_token: f64,
    #[serde(default = "default_context_window")]
    context_window: u32,
    #[serde(default = "default_rank")]
    rank: u32,
}

fn default_context_window() -> u32 {
    8192
}

fn default_rank() -> u32 {
    1
}

impl TierModel {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cost_per_token(&self) -> f64 {
        self.cost_per_token
    }

    pub fn context_window(&self) -> u32 {
        self.context_window
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }
}

/// Complexity → tier mapping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default = "default_simple_tier")]
    pub simple_tier: Tier,
    #[serde(default = "default_medium_tier")]
    pub medium_tier: Tier,
    /// Move up one tier when every candidate of a tier is unusable
    #[serde(default = "default_allow_escalation")]
    pub allow_escalation: bool,
}

fn default_simple_tier() -> Tier {
    Tier::Free
}

fn default_medium_tier() -> Tier {
    Tier::Cheap
}

fn default_allow_escalation() -> bool {
    true
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            simple_tier: default_simple_tier(),
            medium_tier: default_medium_tier(),
            allow_escalation: default_allow_escalation(),
        }
    }
}

/// Plan-then-execute settings for complex requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    #[serde(default = "default_planning_tier")]
    pub planning_tier: Tier,
    #[serde(default = "default_max_subtasks")]
    pub max_subtasks: usize,
    /// Subtasks in flight at once (results stay in plan order)
    #[serde(default = "default_subtask_concurrency")]
    pub subtask_concurrency: usize,
}

fn default_planning_tier() -> Tier {
    Tier::Premium
}

fn default_max_subtasks() -> usize {
    8
}

fn default_subtask_concurrency() -> usize {
    1
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            planning_tier: default_planning_tier(),
            max_subtasks: default_max_subtasks(),
            subtask_concurrency: default_subtask_concurrency(),
        }
    }
}

/// Upstream completion API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_provider_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl ProviderConfig {
    /// API key from the configured environment variable, if set and non-empty
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Upper bound for any per-call timeout
const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Per-tier timeout overrides
///
/// If a tier timeout is not specified, the global
/// `server.request_timeout_seconds` is used.
///
/// # Custom Deserialization
///
/// Values are validated at parse time: every timeout must be in (0, 300]
/// seconds, so an invalid `TimeoutsConfig` never exists.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeoutsConfig {
    free: Option<u64>,
    cheap: Option<u64>,
    premium: Option<u64>,
}

impl TimeoutsConfig {
    /// Create a new TimeoutsConfig with validated timeout values
    ///
    /// # Errors
    ///
    /// Returns an error if any timeout is zero or exceeds 300 seconds.
    pub fn new(free: Option<u64>, cheap: Option<u64>, premium: Option<u64>) -> AppResult<Self> {
        for (tier_name, timeout_opt) in [("free", free), ("cheap", cheap), ("premium", premium)] {
            if let Some(timeout) = timeout_opt {
                if timeout == 0 {
                    return Err(AppError::Config(format!(
                        "timeouts.{} must be greater than 0, got {}",
                        tier_name, timeout
                    )));
                }
                if timeout > MAX_TIMEOUT_SECONDS {
                    return Err(AppError::Config(format!(
                        "timeouts.{} cannot exceed {} seconds, got {}",
                        tier_name, MAX_TIMEOUT_SECONDS, timeout
                    )));
                }
            }
        }
        Ok(Self {
            free,
            cheap,
            premium,
        })
    }

    pub fn free(&self) -> Option<u64> {
        self.free
    }

    pub fn cheap(&self) -> Option<u64> {
        self.cheap
    }

    pub fn premium(&self) -> Option<u64> {
        self.premium
    }
}

impl<'de> Deserialize<'de> for TimeoutsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, MapAccess, Visitor};
        use std::fmt;

        #[derive(Deserialize)]
        #[serde(field_identifier, rename_all = "lowercase")]
        enum Field {
            Free,
            Cheap,
            Premium,
        }

        struct TimeoutsConfigVisitor;

        impl<'de> Visitor<'de> for TimeoutsConfigVisitor {
            type Value = TimeoutsConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a table with optional timeout fields (free, cheap, premium)")
            }

            fn visit_map<V>(self, mut map: V) -> Result<TimeoutsConfig, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut free = None;
                let mut cheap = None;
                let mut premium = None;

                while let Some(key) = map.next_key()? {
                    let (slot, name) = match key {
                        Field::Free => (&mut free, "free"),
                        Field::Cheap => (&mut cheap, "cheap"),
                        Field::Premium => (&mut premium, "premium"),
                    };
                    if slot.is_some() {
                        return Err(de::Error::duplicate_field(name));
                    }
                    *slot = Some(map.next_value()?);
                }

                TimeoutsConfig::new(free, cheap, premium)
                    .map_err(|e| de::Error::custom(format!("Invalid timeout configuration: {}", e)))
            }
        }

        deserializer.deserialize_struct(
            "TimeoutsConfig",
            &["free", "cheap", "premium"],
            TimeoutsConfigVisitor,
        )
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self = toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
            path: path_display.clone(),
            source,
        })?;

        // Phase 3: Validate parsed config
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Get timeout for a specific model tier
    ///
    /// Returns the per-tier timeout if configured, otherwise falls back to
    /// the global `server.request_timeout_seconds`.
    pub fn timeout_for_tier(&self, tier: Tier) -> u64 {
        let tier_timeout = match tier {
            Tier::Free => self.timeouts.free(),
            Tier::Cheap => self.timeouts.cheap(),
            Tier::Premium => self.timeouts.premium(),
        };
        tier_timeout.unwrap_or(self.server.request_timeout_seconds)
    }

    /// Configured models as catalog descriptors
    pub fn pinned_models(&self) -> Vec<ModelDescriptor> {
        self.tiers
            .iter()
            .map(|(tier, model)| {
                ModelDescriptor::new(
                    model.id(),
                    tier,
                    model.cost_per_token(),
                    model.context_window(),
                    model.rank(),
                )
            })
            .collect()
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()` and `from_str()`, but can
    /// also be called explicitly when constructing Config via other means.
    pub fn validate(&self) -> AppResult<()> {
        if self.server.request_timeout_seconds == 0
            || self.server.request_timeout_seconds > MAX_TIMEOUT_SECONDS
        {
            return Err(AppError::Config(format!(
                "server.request_timeout_seconds must be in (0, {}], got {}",
                MAX_TIMEOUT_SECONDS, self.server.request_timeout_seconds
            )));
        }

        if self.cooldown.min_seconds == 0 {
            return Err(AppError::Config(
                "cooldown.min_seconds must be greater than 0".to_string(),
            ));
        }
        if self.cooldown.max_seconds < self.cooldown.min_seconds {
            return Err(AppError::Config(format!(
                "cooldown.max_seconds ({}) must be at least cooldown.min_seconds ({})",
                self.cooldown.max_seconds, self.cooldown.min_seconds
            )));
        }

        let catalog = &self.catalog;
        if catalog.top_n == 0 {
            return Err(AppError::Config(
                "catalog.top_n must be at least 1".to_string(),
            ));
        }
        if !catalog.cheap_max_cost_per_token.is_finite() || catalog.cheap_max_cost_per_token < 0.0
        {
            return Err(AppError::Config(format!(
                "catalog.cheap_max_cost_per_token must be a non-negative price, got {}",
                catalog.cheap_max_cost_per_token
            )));
        }
        if catalog.refresh_interval_seconds < 60 {
            return Err(AppError::Config(format!(
                "catalog.refresh_interval_seconds must be at least 60, got {}",
                catalog.refresh_interval_seconds
            )));
        }
        if catalog.discovery_timeout_seconds == 0
            || catalog.discovery_timeout_seconds > MAX_TIMEOUT_SECONDS
        {
            return Err(AppError::Config(format!(
                "catalog.discovery_timeout_seconds must be in (0, {}], got {}",
                MAX_TIMEOUT_SECONDS, catalog.discovery_timeout_seconds
            )));
        }
        if let Some(url) = catalog.discovery_url()
            && !is_http_url(url)
        {
            return Err(AppError::Config(format!(
                "catalog.discovery_url must start with http:// or https://, got '{}'",
                url
            )));
        }

        let mut seen = HashSet::new();
        for (tier, model) in self.tiers.iter() {
            ModelId::new(model.id()).map_err(|reason| {
                AppError::Config(format!("tiers.{}: {}", tier, reason))
            })?;
            if !model.cost_per_token.is_finite() || model.cost_per_token < 0.0 {
                return Err(AppError::Config(format!(
                    "tiers.{} model '{}' has invalid cost_per_token {}",
                    tier, model.id, model.cost_per_token
                )));
            }
            if model.context_window == 0 {
                return Err(AppError::Config(format!(
                    "tiers.{} model '{}' must have a non-zero context_window",
                    tier, model.id
                )));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(AppError::Config(format!(
                    "model '{}' is configured more than once; each model belongs to one tier",
                    model.id
                )));
            }
        }

        if self.tiers.is_empty() && catalog.discovery_url.is_none() {
            return Err(AppError::Config(
                "No models available: configure [[tiers.*]] entries or catalog.discovery_url"
                    .to_string(),
            ));
        }

        if self.planner.max_subtasks == 0 || self.planner.max_subtasks > 32 {
            return Err(AppError::Config(format!(
                "planner.max_subtasks must be in [1, 32], got {}",
                self.planner.max_subtasks
            )));
        }
        if self.planner.subtask_concurrency == 0 || self.planner.subtask_concurrency > 16 {
            return Err(AppError::Config(format!(
                "planner.subtask_concurrency must be in [1, 16], got {}",
                self.planner.subtask_concurrency
            )));
        }

        if !is_http_url(&self.provider.base_url) {
            return Err(AppError::Config(format!(
                "provider.base_url must start with http:// or https://, got '{}'",
                self.provider.base_url
            )));
        }
        if self.provider.api_key_env.trim().is_empty() {
            return Err(AppError::Config(
                "provider.api_key_env cannot be empty".to_string(),
            ));
        }

        // Timeouts and budget are validated by their constructors at parse time

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CONFIG: &str = r#"
[server]
host = "0.0.0.0"
port = 3000
request_timeout_seconds = 30

[budget]
daily_limit = 5.0
safety_buffer_ratio = 1.5
max_output_tokens = 512

[cooldown]
min_seconds = 600
max_seconds = 7200

[[tiers.free]]
id = "meta-llama/llama-3.1-8b-instruct:free"
context_window = 131072

[[tiers.free]]
id = "mistralai/mistral-7b-instruct:free"
rank = 2

[[tiers.cheap]]
id = "openai/gpt-4o-mini"
cost_per_token = 0.0000006

[[tiers.premium]]
id = "anthropic/claude-sonnet-4"
cost_per_token = 0.000015
context_window = 200000

[routing]
simple_tier = "free"
medium_tier = "cheap"

[timeouts]
premium = 120

[observability]
log_level = "debug"
"#;

    fn with_budget(budget: &str) -> String {
        format!(
            "[server]\nhost = \"127.0.0.1\"\nport = 3000\n\n[budget]\n{}\n\n[[tiers.free]]\nid = \"free-a\"\n",
            budget
        )
    }

    #[test]
    fn test_config_from_str_parses_successfully() {
        let config = Config::from_str(TEST_CONFIG).expect("should parse config");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.budget.daily_limit(), 5.0);
        assert_eq!(config.budget.max_output_tokens(), 512);
        assert_eq!(config.cooldown.min_seconds(), 600);
        assert_eq!(config.tiers.free.len(), 2);
        assert_eq!(config.tiers.free[0].context_window(), 131072);
        assert_eq!(config.tiers.free[1].rank(), 2);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_defaults_apply_to_omitted_sections() {
        let config = Config::from_str(&with_budget("daily_limit = 1.0")).unwrap();
        assert_eq!(config.budget.safety_buffer_ratio(), 1.5);
        assert_eq!(config.budget.session_limit(), None);
        assert_eq!(config.cooldown.min_seconds(), 3600);
        assert_eq!(config.cooldown.max_seconds(), 86400);
        assert_eq!(config.catalog.refresh_interval(), Duration::from_secs(604_800));
        assert_eq!(config.routing.simple_tier, Tier::Free);
        assert_eq!(config.routing.medium_tier, Tier::Cheap);
        assert!(config.routing.allow_escalation);
        assert_eq!(config.planner.planning_tier, Tier::Premium);
        assert_eq!(config.planner.subtask_concurrency, 1);
        assert_eq!(config.provider.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_pinned_models_carry_their_tier() {
        let config = Config::from_str(TEST_CONFIG).unwrap();
        let pinned = config.pinned_models();
        assert_eq!(pinned.len(), 4);
        assert_eq!(pinned[2].tier(), Tier::Cheap);
        assert_eq!(pinned[2].cost_per_token(), 0.0000006);
        assert_eq!(pinned[3].tier(), Tier::Premium);
    }

    #[test]
    fn test_timeout_for_tier_uses_override_then_global() {
        let config = Config::from_str(TEST_CONFIG).unwrap();
        assert_eq!(config.timeout_for_tier(Tier::Premium), 120);
        assert_eq!(config.timeout_for_tier(Tier::Free), 30);
        assert_eq!(config.timeout_for_tier(Tier::Cheap), 30);
    }

    #[test]
    fn test_budget_rejects_buffer_below_one() {
        let result = Config::from_str(&with_budget(
            "daily_limit = 1.0\nsafety_buffer_ratio = 0.9",
        ));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("safety_buffer_ratio"), "got: {}", err);
    }

    #[test]
    fn test_budget_rejects_non_positive_limit() {
        assert!(Config::from_str(&with_budget("daily_limit = 0.0")).is_err());
        assert!(Config::from_str(&with_budget("daily_limit = -2.0")).is_err());
        assert!(Config::from_str(&with_budget("daily_limit = nan")).is_err());
    }

    #[test]
    fn test_budget_section_required() {
        let toml = "[server]\nhost = \"127.0.0.1\"\nport = 3000\n[[tiers.free]]\nid = \"a\"\n";
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_timeouts_reject_zero_and_excessive() {
        let zero = format!("{}\n[timeouts]\nfree = 0\n", with_budget("daily_limit = 1.0"));
        let high = format!("{}\n[timeouts]\ncheap = 301\n", with_budget("daily_limit = 1.0"));
        let edge = format!("{}\n[timeouts]\ncheap = 300\n", with_budget("daily_limit = 1.0"));
        assert!(Config::from_str(&zero).is_err());
        assert!(Config::from_str(&high).is_err());
        assert!(Config::from_str(&edge).is_ok());
    }

    #[test]
    fn test_cooldown_max_below_min_fails() {
        let toml = format!(
            "{}\n[cooldown]\nmin_seconds = 100\nmax_seconds = 50\n",
            with_budget("daily_limit = 1.0")
        );
        let err = Config::from_str(&toml).unwrap_err().to_string();
        assert!(err.contains("cooldown.max_seconds"));
    }

    #[test]
    fn test_duplicate_model_ids_fail() {
        let toml = format!(
            "{}\n[[tiers.cheap]]\nid = \"free-a\"\ncost_per_token = 0.000001\n",
            with_budget("daily_limit = 1.0")
        );
        let err = Config::from_str(&toml).unwrap_err().to_string();
        assert!(err.contains("more than once"));
    }

    #[test]
    fn test_no_model_source_fails() {
        let toml = "[server]\nhost = \"127.0.0.1\"\nport = 3000\n[budget]\ndaily_limit = 1.0\n";
        let err = Config::from_str(toml).unwrap_err().to_string();
        assert!(err.contains("No models available"));

        let with_discovery = format!(
            "{}[catalog]\ndiscovery_url = \"https://openrouter.ai/api/v1/models\"\n",
            toml
        );
        assert!(Config::from_str(&with_discovery).is_ok());
    }

    #[test]
    fn test_invalid_discovery_url_fails() {
        let toml = format!(
            "{}\n[catalog]\ndiscovery_url = \"ftp://example.com/models\"\n",
            with_budget("daily_limit = 1.0")
        );
        assert!(Config::from_str(&toml).is_err());
    }

    #[test]
    fn test_planner_bounds() {
        let zero = format!(
            "{}\n[planner]\nmax_subtasks = 0\n",
            with_budget("daily_limit = 1.0")
        );
        let wide = format!(
            "{}\n[planner]\nsubtask_concurrency = 64\n",
            with_budget("daily_limit = 1.0")
        );
        assert!(Config::from_str(&zero).is_err());
        assert!(Config::from_str(&wide).is_err());
    }

    #[test]
    fn test_invalid_tier_name_fails_to_parse() {
        let toml = format!(
            "{}\n[routing]\nsimple_tier = \"gold\"\n",
            with_budget("daily_limit = 1.0")
        );
        assert!(matches!(
            Config::from_str(&toml),
            Err(AppError::ConfigParseFailed { .. })
        ));
    }
}
