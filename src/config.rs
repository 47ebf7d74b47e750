use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub api_base: String,
    pub state_dir: PathBuf,
    pub sites_limit: u32,
    pub pages_limit: u32,
    pub alerts_limit: u32,
    pub detail_limit: u32,
    pub watch_ttl_secs: u64,
    pub refresh_interval_secs: u64,
    pub scan_refresh_attempts: u32,
    pub scan_refresh_delay_ms: u64,
    pub default_freq_min: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8080".to_owned(),
            state_dir: PathBuf::from(".sitewatch"),
            sites_limit: 200,
            pages_limit: 1000,
            alerts_limit: 10,
            detail_limit: 200,
            watch_ttl_secs: 300,
            refresh_interval_secs: 60,
            scan_refresh_attempts: 5,
            scan_refresh_delay_ms: 1200,
            default_freq_min: 1440,
        }
    }
}

impl Config {
    /// Defaults, then the YAML file (if any), then `SITEWATCH_*` variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(api_base) = var("SITEWATCH_API_BASE").filter(|v| !v.trim().is_empty()) {
            self.api_base = api_base.trim().to_owned();
        }
        if let Some(state_dir) = var("SITEWATCH_STATE_DIR").filter(|v| !v.trim().is_empty()) {
            self.state_dir = PathBuf::from(state_dir.trim());
        }
        if let Some(raw) = var("SITEWATCH_REFRESH_INTERVAL_SECS") {
            self.refresh_interval_secs = raw.trim().parse().with_context(|| {
                format!("invalid SITEWATCH_REFRESH_INTERVAL_SECS={raw:?}. expected whole seconds")
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_base.trim().is_empty() {
            anyhow::bail!("api_base is empty");
        }
        if self.refresh_interval_secs == 0 {
            anyhow::bail!("refresh_interval_secs must be greater than zero");
        }
        if self.default_freq_min == 0 {
            anyhow::bail!("default_freq_min must be greater than zero");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}
