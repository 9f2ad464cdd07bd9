//! Configuration loading.
//!
//! Loads `dispatch.toml` (or `$DISPATCH_CONFIG_PATH`). Every section has
//! defaults, so a missing or empty file is valid.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level dispatcher configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Channel gateway connection.
    pub transport: TransportConfig,
    /// Dispatch database location.
    pub database: DatabaseConfig,
    /// Tick, concurrency and revival settings.
    pub orchestrator: OrchestratorConfig,
    /// Delays applied by campaign loops.
    pub pacing: PacingConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl DispatchConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = Self::config_path_with(env);
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(env);
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrongly typed values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Resolve the config file path: `$DISPATCH_CONFIG_PATH`, else `./dispatch.toml`.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("DISPATCH_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("dispatch.toml"))
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function so tests can avoid mutating the process env.
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("DISPATCH_TRANSPORT_URL") {
            self.transport.base_url = v;
        }
        if let Some(v) = env("DISPATCH_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = env("DISPATCH_LOG_DIR") {
            self.logging.dir = PathBuf::from(v);
        }
        if let Some(v) = env("DISPATCH_LOG_LEVEL") {
            self.logging.level = v;
        }

        override_number(
            &env,
            "DISPATCH_MAX_CONCURRENT_CAMPAIGNS",
            &mut self.orchestrator.max_concurrent_campaigns,
        );
        override_number(
            &env,
            "DISPATCH_STUCK_TTL_SECS",
            &mut self.orchestrator.stuck_ttl_secs,
        );
        override_number(
            &env,
            "DISPATCH_TICK_INTERVAL_SECS",
            &mut self.orchestrator.tick_interval_secs,
        );
    }
}

fn override_number<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    target: &mut T,
) {
    if let Some(v) = env(var) {
        match v.trim().parse() {
            Ok(n) => *target = n,
            Err(_) => tracing::warn!(var, value = %v, "ignoring invalid env override"),
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// Channel gateway connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Gateway base address.
    pub base_url: String,
    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout; media uploads can be slow.
    pub request_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_owned(),
            connect_timeout_secs: 5,
            request_timeout_secs: 60,
        }
    }
}

/// Dispatch database settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path.
    pub path: PathBuf,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dispatch.db"),
            max_connections: 5,
        }
    }
}

/// Orchestrator tick settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Seconds between discovery ticks.
    pub tick_interval_secs: u64,
    /// Maximum campaign loops running at once; 0 means unbounded.
    pub max_concurrent_campaigns: usize,
    /// Seconds after which a processing item is considered abandoned.
    pub stuck_ttl_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            max_concurrent_campaigns: 0,
            stuck_ttl_secs: 1800,
        }
    }
}

impl OrchestratorConfig {
    /// Tick interval, never shorter than one second.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    /// Stuck-item TTL.
    pub fn stuck_ttl(&self) -> Duration {
        Duration::from_secs(self.stuck_ttl_secs)
    }

    /// Concurrency ceiling, `None` when unbounded.
    pub fn concurrency_limit(&self) -> Option<usize> {
        (self.max_concurrent_campaigns > 0).then_some(self.max_concurrent_campaigns)
    }
}

/// Campaign loop delays.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Per-message delay for campaigns without their own `delay`.
    pub default_message_delay_ms: u64,
    /// Wait before re-checking a paused campaign.
    pub paused_backoff_secs: u64,
    /// Wait after a failed loop iteration.
    pub error_cooldown_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            default_message_delay_ms: 30_000,
            paused_backoff_secs: 10,
            error_cooldown_secs: 5,
        }
    }
}

impl PacingConfig {
    /// Per-message delay fallback.
    pub fn default_message_delay(&self) -> Duration {
        Duration::from_millis(self.default_message_delay_ms)
    }

    /// Paused re-check interval.
    pub fn paused_backoff(&self) -> Duration {
        Duration::from_secs(self.paused_backoff_secs)
    }

    /// Cooldown after an iteration error.
    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rotated JSON logs.
    pub dir: PathBuf,
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `campaign_dispatch=debug`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            level: "info".to_owned(),
        }
    }
}
