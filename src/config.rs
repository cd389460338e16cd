//! Slotguard configuration.
//!
//! Loaded from `~/.slotguard/config.toml`. Every key is optional; a missing
//! file means defaults. `SLOTGUARD_STEALTH_LEVEL` and
//! `SLOTGUARD_MAX_RISK_SCORE` override the file.
//!
//! ```toml
//! stealth-level = "high"
//! max-risk-score = 50
//! booking-deadline-secs = 120
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stealth::{StealthConfig, StealthLevel};
use crate::timing::TimingConfig;

pub const ENV_STEALTH_LEVEL: &str = "SLOTGUARD_STEALTH_LEVEL";
pub const ENV_MAX_RISK_SCORE: &str = "SLOTGUARD_MAX_RISK_SCORE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHome,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}: {message}")]
    Env {
        var: &'static str,
        value: String,
        message: String,
    },

    #[error("{key} must be {expected}, got {got}")]
    OutOfRange {
        key: &'static str,
        expected: &'static str,
        got: u64,
    },
}

pub type Result<T> = core::result::Result<T, ConfigError>;

/// Slotguard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Config {
    pub stealth_level: StealthLevel,

    /// Risk score at which HIGH-risk operations are refused.
    pub max_risk_score: u8,

    /// Risk score at which a refusal also trips emergency mode.
    pub emergency_threshold: u8,
    pub adaptive_mode: bool,

    /// How long the user has to answer a booking prompt.
    pub confirmation_timeout_secs: u64,

    /// How long BOOKING may run before it times out. Unbounded if unset.
    pub booking_deadline_secs: Option<u64>,
    pub history_size: usize,
    pub emergency_pause_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stealth_level: StealthLevel::Medium,
            max_risk_score: 60,
            emergency_threshold: 70,
            adaptive_mode: true,
            confirmation_timeout_secs: 30,
            booking_deadline_secs: None,
            history_size: 50,
            emergency_pause_ms: 10_000,
        }
    }
}

impl Config {
    /// Load from `~/.slotguard/config.toml`, then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let path = Self::path().ok_or(ConfigError::NoHome)?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` without environment overrides. Missing file means
    /// defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// The config file path: `~/.slotguard/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".slotguard").join("config.toml"))
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(ENV_STEALTH_LEVEL) {
            self.stealth_level = value.parse().map_err(|message| ConfigError::Env {
                var: ENV_STEALTH_LEVEL,
                value: value.clone(),
                message,
            })?;
        }
        if let Some(value) = lookup(ENV_MAX_RISK_SCORE) {
            self.max_risk_score = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Env {
                    var: ENV_MAX_RISK_SCORE,
                    value: value.clone(),
                    message: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let score = |key: &'static str, got: u8| {
            if got > 100 {
                Err(ConfigError::OutOfRange {
                    key,
                    expected: "between 0 and 100",
                    got: u64::from(got),
                })
            } else {
                Ok(())
            }
        };
        score("max-risk-score", self.max_risk_score)?;
        score("emergency-threshold", self.emergency_threshold)?;

        if self.confirmation_timeout_secs == 0 {
            return Err(ConfigError::OutOfRange {
                key: "confirmation-timeout-secs",
                expected: "at least 1",
                got: 0,
            });
        }
        if self.history_size == 0 {
            return Err(ConfigError::OutOfRange {
                key: "history-size",
                expected: "at least 1",
                got: 0,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn stealth_config(&self) -> StealthConfig {
        StealthConfig {
            level: self.stealth_level,
            max_risk_score: self.max_risk_score,
            emergency_threshold: self.emergency_threshold,
            adaptive_mode: self.adaptive_mode,
            emergency_pause: Duration::from_millis(self.emergency_pause_ms),
            ..StealthConfig::default()
        }
    }

    #[must_use]
    pub fn timing_config(&self) -> TimingConfig {
        TimingConfig {
            history_size: self.history_size,
            adaptive: self.adaptive_mode,
            ..TimingConfig::default()
        }
    }

    #[must_use]
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    #[must_use]
    pub fn booking_deadline(&self) -> Option<Duration> {
        self.booking_deadline_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_file_is_defaults() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn missing_file_is_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn reads_kebab_case_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "stealth-level = \"high\"\nmax-risk-score = 45\nbooking-deadline-secs = 120\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.stealth_level, StealthLevel::High);
        assert_eq!(config.max_risk_score, 45);
        assert_eq!(config.booking_deadline(), Some(Duration::from_secs(120)));
        assert_eq!(config.emergency_threshold, 70);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = Config::from_toml_str("stealth = \"high\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_scores_over_100() {
        let err = Config::from_toml_str("emergency-threshold = 150").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                key: "emergency-threshold",
                got: 150,
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(Config::from_toml_str("confirmation-timeout-secs = 0").is_err());
    }

    #[test]
    fn environment_wins_over_file() {
        let mut config = Config::from_toml_str("stealth-level = \"low\"").unwrap();
        config
            .apply_env(env(&[
                (ENV_STEALTH_LEVEL, "HIGH"),
                (ENV_MAX_RISK_SCORE, " 40 "),
            ]))
            .unwrap();

        assert_eq!(config.stealth_level, StealthLevel::High);
        assert_eq!(config.max_risk_score, 40);
    }

    #[test]
    fn bad_environment_values_are_errors() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[(ENV_MAX_RISK_SCORE, "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env {
                var: ENV_MAX_RISK_SCORE,
                ..
            }
        ));
        assert!(config.apply_env(env(&[(ENV_STEALTH_LEVEL, "max")])).is_err());
    }

    #[test]
    fn derived_configs_carry_settings() {
        let config = Config::from_toml_str(
            "stealth-level = \"low\"\nadaptive-mode = false\nhistory-size = 10\nemergency-pause-ms = 500\n",
        )
        .unwrap();

        let stealth = config.stealth_config();
        assert_eq!(stealth.level, StealthLevel::Low);
        assert!(!stealth.adaptive_mode);
        assert_eq!(stealth.emergency_pause, Duration::from_millis(500));

        let timing = config.timing_config();
        assert_eq!(timing.history_size, 10);
        assert!(!timing.adaptive);
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(30));
    }
}
