//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults, so a partial file (or none at all) still
//! yields a runnable configuration. Secrets such as the webhook URL are
//! referenced by env-var name and resolved at runtime.

use anyhow::{Context, Result};
use chrono::Duration;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::engine::accounts::WalletLimits;
use crate::types::{Amount, GameError, RoundTiming};

/// Longest round the engine accepts: one day.
pub const MAX_ROUND_DURATION_SECS: u64 = 86_400;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub game: GameConfig,
    pub wallet: WalletConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub alerts: AlertsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GameConfig {
    pub round_duration_secs: u64,
    /// Betting closes this long before the round ends.
    pub betting_cutoff_secs: u64,
    pub min_stake: Amount,
    pub tick_interval_millis: u64,
    /// Number of resolved rounds kept in the results strip.
    pub history_len: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_duration_secs: 180,
            betting_cutoff_secs: 30,
            min_stake: 10,
            tick_interval_millis: 1000,
            history_len: 10,
        }
    }
}

impl GameConfig {
    /// Round geometry. Values beyond `MAX_ROUND_DURATION_SECS` are clamped;
    /// `AppConfig::validate` rejects them before they get here.
    pub fn timing(&self) -> RoundTiming {
        let secs = |s: u64| Duration::seconds(s.min(MAX_ROUND_DURATION_SECS) as i64);
        RoundTiming {
            duration: secs(self.round_duration_secs),
            cutoff_margin: secs(self.betting_cutoff_secs),
        }
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_millis.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WalletConfig {
    pub initial_balance: Amount,
    pub min_deposit: Amount,
    pub min_withdrawal: Amount,
    /// Largest single deposit or withdrawal.
    pub max_transaction: Amount,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let limits = WalletLimits::default();
        Self {
            initial_balance: limits.initial_balance,
            min_deposit: limits.min_deposit,
            min_withdrawal: limits.min_withdrawal,
            max_transaction: limits.max_transaction,
        }
    }
}

impl WalletConfig {
    pub fn limits(&self) -> WalletLimits {
        WalletLimits {
            initial_balance: self.initial_balance,
            min_deposit: self.min_deposit,
            min_withdrawal: self.min_withdrawal,
            max_transaction: self.max_transaction,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "tiranga_data".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    /// Env var holding the webhook URL. Unset var means no webhook.
    pub webhook_url_env: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url_env: Some("TIRANGA_WEBHOOK_URL".into()),
        }
    }
}

impl AlertsConfig {
    /// The webhook URL, if its env var is configured and set.
    pub fn webhook_url(&self) -> Option<SecretString> {
        let env_name = self.webhook_url_env.as_deref()?;
        AppConfig::resolve_env(env_name)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(SecretString::new)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the round engine cannot run with.
    pub fn validate(&self) -> Result<(), GameError> {
        let game = &self.game;
        if game.round_duration_secs == 0 {
            return Err(GameError::Config("round_duration_secs must be positive".into()));
        }
        if game.round_duration_secs > MAX_ROUND_DURATION_SECS {
            return Err(GameError::Config(format!(
                "round_duration_secs ({}) exceeds the maximum of {MAX_ROUND_DURATION_SECS}",
                game.round_duration_secs
            )));
        }
        if game.betting_cutoff_secs >= game.round_duration_secs {
            return Err(GameError::Config(format!(
                "betting_cutoff_secs ({}) must be shorter than round_duration_secs ({})",
                game.betting_cutoff_secs, game.round_duration_secs
            )));
        }
        if game.min_stake <= 0 {
            return Err(GameError::Config("min_stake must be positive".into()));
        }
        if game.history_len == 0 {
            return Err(GameError::Config("history_len must be at least 1".into()));
        }

        let wallet = &self.wallet;
        if wallet.initial_balance < 0 {
            return Err(GameError::Config("initial_balance cannot be negative".into()));
        }
        if wallet.min_deposit <= 0 || wallet.min_withdrawal <= 0 {
            return Err(GameError::Config("deposit and withdrawal minimums must be positive".into()));
        }
        if wallet.max_transaction < wallet.min_deposit.max(wallet.min_withdrawal) {
            return Err(GameError::Config(format!(
                "max_transaction ({}) is below the deposit or withdrawal minimum",
                wallet.max_transaction
            )));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_load_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.toml");
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.game.round_duration_secs, 180);
        assert_eq!(cfg.game.betting_cutoff_secs, 30);
        assert_eq!(cfg.game.min_stake, 10);
        assert_eq!(cfg.wallet.initial_balance, 1000);
        assert_eq!(cfg.wallet.max_transaction, 1_000_000);
        assert_eq!(cfg.api.port, 8080);
    }

    #[test]
    fn test_rejects_oversized_round() {
        for secs in [MAX_ROUND_DURATION_SECS + 1, 9_000_000_000_000_000] {
            let err = AppConfig::parse(&format!("[game]\nround_duration_secs = {secs}\n")).unwrap_err();
            assert!(err.to_string().contains("round_duration_secs"));
        }

        let longest = format!("[game]\nround_duration_secs = {MAX_ROUND_DURATION_SECS}\n");
        let cfg = AppConfig::parse(&longest).unwrap();
        assert_eq!(cfg.game.timing().duration, Duration::days(1));
    }

    #[test]
    fn test_rejects_max_transaction_below_minimums() {
        let err = AppConfig::parse("[wallet]\nmax_transaction = 150\n").unwrap_err();
        assert!(err.to_string().contains("max_transaction"));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg.game.min_stake, 10);
        assert_eq!(cfg.game.history_len, 10);
        assert_eq!(cfg.wallet.min_deposit, 100);
        assert_eq!(cfg.wallet.min_withdrawal, 200);
        assert_eq!(cfg.storage.data_dir, "tiranga_data");
        assert_eq!(cfg.api.port, 8080);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg = AppConfig::parse("[game]\nround_duration_secs = 60\nbetting_cutoff_secs = 10\n").unwrap();
        let timing = cfg.game.timing();
        assert_eq!(timing.duration, Duration::seconds(60));
        assert_eq!(timing.cutoff_margin, Duration::seconds(10));
        assert_eq!(cfg.game.min_stake, 10);
    }

    #[test]
    fn test_cutoff_must_precede_close() {
        let err = AppConfig::parse("[game]\nround_duration_secs = 30\nbetting_cutoff_secs = 30\n").unwrap_err();
        assert!(err.to_string().contains("betting_cutoff_secs"));
    }

    #[test]
    fn test_rejects_non_positive_stake() {
        assert!(AppConfig::parse("[game]\nmin_stake = 0\n").is_err());
    }

    #[test]
    fn test_wallet_limits() {
        let cfg = AppConfig::parse("[wallet]\ninitial_balance = 500\n").unwrap();
        let limits = cfg.wallet.limits();
        assert_eq!(limits.initial_balance, 500);
        assert_eq!(limits.min_deposit, 100);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let cfg = AppConfig::load_or_default("definitely/not/here.toml").unwrap();
        assert_eq!(cfg.game.round_duration_secs, 180);
        assert!(AppConfig::load("definitely/not/here.toml").is_err());
    }

    #[test]
    fn test_webhook_url_from_env() {
        let alerts = AlertsConfig {
            webhook_url_env: Some("TIRANGA_TEST_WEBHOOK_URL".into()),
        };
        assert!(alerts.webhook_url().is_none());

        std::env::set_var("TIRANGA_TEST_WEBHOOK_URL", "https://hooks.example/round");
        let url = alerts.webhook_url().unwrap();
        assert_eq!(url.expose_secret(), "https://hooks.example/round");
        std::env::remove_var("TIRANGA_TEST_WEBHOOK_URL");

        assert!(AlertsConfig { webhook_url_env: None }.webhook_url().is_none());
    }
}
