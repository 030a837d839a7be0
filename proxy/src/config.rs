use crate::error::{ProxyError, Result};
use meter::MeterConfig;
use meter::config::{DEFAULT_GLOBAL_LIMIT, DEFAULT_REPORT_PERIOD, DEFAULT_USER_LIMIT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Admin API address; the API is disabled when unset
    #[serde(default)]
    pub api_addr: Option<String>,

    /// Bytes a single client may read, or write, in total
    #[serde(default = "default_user_limit")]
    pub user_limit: u64,

    /// Bytes all clients together may transfer in total
    #[serde(default = "default_global_limit")]
    pub global_limit: u64,

    #[serde(default = "default_report_period_secs")]
    pub report_period_secs: u64,

    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log directory for file-based logging, stdout when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:10800".to_string()
}

fn default_user_limit() -> u64 {
    DEFAULT_USER_LIMIT
}

fn default_global_limit() -> u64 {
    DEFAULT_GLOBAL_LIMIT
}

fn default_report_period_secs() -> u64 {
    DEFAULT_REPORT_PERIOD.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_addr: None,
            user_limit: default_user_limit(),
            global_limit: default_global_limit(),
            report_period_secs: default_report_period_secs(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl ProxyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ProxyConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`ProxyConfig::load`], falling back to defaults when the file
    /// does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.report_period_secs == 0 {
            return Err(ProxyError::Configuration(
                "report_period_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(api_addr) = &self.api_addr
            && api_addr == &self.listen_addr
        {
            return Err(ProxyError::Configuration(format!(
                "api_addr and listen_addr are both {}",
                api_addr
            )));
        }
        Ok(())
    }

    pub fn meter_config(&self) -> MeterConfig {
        MeterConfig {
            user_limit: self.user_limit,
            global_limit: self.global_limit,
            report_period: Duration::from_secs(self.report_period_secs),
        }
    }
}
