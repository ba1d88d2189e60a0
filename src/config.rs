//! Configuration file parsing for scuttle
//!
//! Parses `scuttle.toml` using serde. Every key is optional; a missing
//! default file means all defaults.

use crate::cleanup::CleanupOptions;
use crate::error::{Error, Result};
use crate::reaper;
use crate::vmm;
use nix::sys::signal::Signal;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where the configuration is looked up when none is given
pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/scuttle.toml";

/// Load configuration from a file
pub fn load(path: &Path) -> Result<ScuttleConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: ScuttleConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Load `path` if given, otherwise the default file if it exists
///
/// An explicitly requested file must exist.
pub fn load_or_default(path: Option<&Path>) -> Result<ScuttleConfig> {
    match path {
        Some(path) => load(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load(default)
            } else {
                Ok(ScuttleConfig::default())
            }
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScuttleConfig {
    #[serde(default)]
    pub cleanup: CleanupSection,

    #[serde(default)]
    pub host: HostSection,
}

/// `[cleanup]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupSection {
    /// Seconds to wait for jailed processes to exit
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: u64,

    /// Signal sent to jailed processes, e.g. "SIGKILL"
    #[serde(default = "default_signal")]
    pub signal: String,

    #[serde(default)]
    pub skip_first_devfs: bool,

    /// Milliseconds between process probes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            kill_timeout: default_kill_timeout(),
            signal: default_signal(),
            skip_first_devfs: false,
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// `[host]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSection {
    #[serde(default = "default_vmm_dir")]
    pub vmm_dir: PathBuf,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            vmm_dir: default_vmm_dir(),
        }
    }
}

fn default_kill_timeout() -> u64 {
    30
}

fn default_signal() -> String {
    "SIGKILL".to_string()
}

fn default_poll_interval() -> u64 {
    reaper::POLL_INTERVAL.as_millis() as u64
}

fn default_vmm_dir() -> PathBuf {
    PathBuf::from(vmm::VMM_DIR)
}

/// Accepts "SIGKILL", "KILL" or "kill"
pub fn parse_signal(name: &str) -> Result<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&full)
        .map_err(|_| Error::ConfigValidation(format!("Unknown signal: {}", name)))
}

impl ScuttleConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cleanup.kill_timeout == 0 {
            return Err(Error::ConfigValidation(
                "cleanup.kill_timeout must be at least 1 second".into(),
            ));
        }

        if self.cleanup.poll_interval_ms == 0 {
            return Err(Error::ConfigValidation(
                "cleanup.poll_interval_ms must be positive".into(),
            ));
        }

        parse_signal(&self.cleanup.signal)?;

        if !self.host.vmm_dir.is_absolute() {
            return Err(Error::ConfigValidation(format!(
                "host.vmm_dir must be absolute: {}",
                self.host.vmm_dir.display()
            )));
        }

        Ok(())
    }

    /// Teardown options described by this configuration
    pub fn options(&self) -> Result<CleanupOptions> {
        Ok(CleanupOptions {
            kill_timeout: Duration::from_secs(self.cleanup.kill_timeout),
            signal: parse_signal(&self.cleanup.signal)?,
            poll_interval: Duration::from_millis(self.cleanup.poll_interval_ms),
            skip_first_devfs: self.cleanup.skip_first_devfs,
        })
    }
}
