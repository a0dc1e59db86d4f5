pub mod vars;

pub use vars::VarsParser;

use crate::error::HarnessError;
use crate::poll::PollConfig;
use config::{Config as Cfg, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct HarnessConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_vars_file")]
    pub vars_file: PathBuf,
    #[serde(default = "default_samples_dir")]
    pub samples_dir: PathBuf,
    #[serde(default = "default_cf_binary")]
    pub cf_binary: String,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default = "std::env::temp_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default)]
    pub user_input_enabled: bool,
    #[serde(default)]
    pub second_factor_enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollSettings {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_poll_max_wait")]
    pub max_wait_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            max_wait_secs: default_poll_max_wait(),
        }
    }
}

impl PollSettings {
    pub fn to_poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.interval_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_mtls_timeout")]
    pub mtls_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            mtls_timeout_secs: default_mtls_timeout(),
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn mtls_timeout(&self) -> Duration {
        Duration::from_secs(self.mtls_timeout_secs)
    }
}

fn default_service_name() -> String {
    "cloud-security-samples".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_vars_file() -> PathBuf {
    PathBuf::from("./vars.yml")
}

fn default_samples_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_cf_binary() -> String {
    "cf".to_string()
}

fn default_poll_interval() -> u64 {
    7
}

fn default_poll_max_wait() -> u64 {
    280
}

fn default_http_timeout() -> u64 {
    30
}

fn default_mtls_timeout() -> u64 {
    500
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            otlp_endpoint: None,
            vars_file: default_vars_file(),
            samples_dir: default_samples_dir(),
            cf_binary: default_cf_binary(),
            poll: PollSettings::default(),
            http: HttpSettings::default(),
            scratch_dir: std::env::temp_dir(),
            user_input_enabled: false,
            second_factor_enabled: false,
        }
    }
}

impl HarnessConfig {
    /// Loads `configuration.*` (optional) and `HARNESS__*` environment overrides.
    ///
    /// The legacy `USER_INPUT_ENABLED` and `ENABLE_2_FACTOR` switches are honoured on top.
    pub fn load() -> Result<Self, HarnessError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("HARNESS").separator("__"))
            .build()?;

        let mut harness: HarnessConfig = config.try_deserialize()?;

        if let Ok(value) = std::env::var("USER_INPUT_ENABLED") {
            harness.user_input_enabled = parse_flag(&value);
        }
        if std::env::var_os("ENABLE_2_FACTOR").is_some() {
            harness.second_factor_enabled = true;
        }

        harness.validate()?;
        Ok(harness)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.poll.interval_secs == 0 {
            return Err(HarnessError::Config(anyhow::anyhow!(
                "poll.interval_secs must be greater than zero"
            )));
        }
        if self.poll.max_wait_secs < self.poll.interval_secs {
            return Err(HarnessError::Config(anyhow::anyhow!(
                "poll.max_wait_secs ({}) must not be shorter than poll.interval_secs ({})",
                self.poll.max_wait_secs,
                self.poll.interval_secs
            )));
        }
        Ok(())
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll.to_poll_config()
    }
}

/// Truthy spellings accepted for on/off environment switches.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "t" | "true" | "on" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_poll_tuning() {
        let config = HarnessConfig::default();
        let poll = config.poll_config();
        assert_eq!(poll.interval, Duration::from_secs(7));
        assert_eq!(poll.max_wait, Duration::from_secs(280));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config = HarnessConfig::default();
        config.poll.interval_secs = 0;
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));
    }

    #[test]
    fn parse_flag_accepts_truthy_spellings() {
        for value in ["y", "YES", "t", "true", "On", "1"] {
            assert!(parse_flag(value), "{value} should be truthy");
        }
        for value in ["n", "false", "0", "", "maybe"] {
            assert!(!parse_flag(value), "{value} should be falsy");
        }
    }
}
