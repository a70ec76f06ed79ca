//! Configuration loading from `disktest.toml`.

use anyhow::{Context, Result};
use disktest_ahci::config::PORT_SPIN_TIMEOUT;
use disktest_ahci::{CompletionPolicy, PortConfig};
use disktest_core::log::LogLevel;
use serde::Deserialize;
use std::path::Path;

/// File looked up in the current directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "disktest.toml";

/// ATA drive signature reported by simulated ports.
const SATA_SIGNATURE: u32 = 0x0000_0101;

/// Top-level `disktest.toml` contents.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Driver tunables.
    pub driver: DriverSection,
    /// Log sink settings.
    pub log: LogSection,
    /// Simulated controller layout.
    pub sim: SimSection,
}

/// `[driver]` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverSection {
    /// Polls per bounded wait.
    pub spin_limit: u32,
    /// Completion behavior after a task-file error.
    pub completion: Completion,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            spin_limit: PORT_SPIN_TIMEOUT,
            completion: Completion::Abort,
        }
    }
}

/// `completion = "abort" | "drain"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completion {
    /// Stop at the first task-file error.
    Abort,
    /// Wait for the command-issue bit to clear before reporting.
    Drain,
}

impl From<Completion> for CompletionPolicy {
    fn from(value: Completion) -> Self {
        match value {
            Completion::Abort => Self::AbortOnError,
            Completion::Drain => Self::DrainOnError,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    /// Most verbose level printed.
    pub level: Level,
}

impl Default for LogSection {
    fn default() -> Self {
        Self { level: Level::Info }
    }
}

/// Log level names accepted in `[log] level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warn,
    /// Scan results and the above.
    Info,
    /// Engine transitions and register dumps.
    Debug,
    /// Per-command detail.
    Trace,
}

impl Level {
    /// Raises the level by `steps` (one per `-v`), saturating at trace.
    #[must_use]
    pub fn raised(self, steps: u8) -> Self {
        const ORDER: [Level; 5] = [
            Level::Error,
            Level::Warn,
            Level::Info,
            Level::Debug,
            Level::Trace,
        ];
        let idx = ORDER.iter().position(|&l| l == self).unwrap_or(0);
        ORDER[(idx + usize::from(steps)).min(ORDER.len() - 1)]
    }
}

impl From<Level> for LogLevel {
    fn from(value: Level) -> Self {
        match value {
            Level::Error => Self::Error,
            Level::Warn => Self::Warn,
            Level::Info => Self::Info,
            Level::Debug => Self::Debug,
            Level::Trace => Self::Trace,
        }
    }
}

/// `[sim]` section: the controller the tool talks to.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimSection {
    /// Ports with a drive attached.
    pub ports: Vec<u8>,
    /// Capacity of each drive in sectors.
    pub sectors: u64,
    /// PxSIG value reported by each drive.
    pub sata_signature: u32,
    /// LBA whose reads fail with an aborted command.
    pub fault_lba: Option<u64>,
    /// Failed commands post a received FIS with a bad type tag.
    pub corrupt_fis: bool,
    /// Place all memory above 4 GiB.
    pub high_memory: bool,
    /// Report CAP.S64A.
    pub supports_64bit: bool,
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            ports: vec![0],
            sectors: 2048,
            sata_signature: SATA_SIGNATURE,
            fault_lba: None,
            corrupt_fis: false,
            high_memory: false,
            supports_64bit: true,
        }
    }
}

impl Config {
    /// Loads `path`, or [`DEFAULT_CONFIG_FILE`] if it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parses configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.driver.spin_limit == 0 {
            anyhow::bail!("[driver] spin_limit must be at least 1");
        }
        if let Some(&port) = config.sim.ports.iter().find(|&&p| p >= 32) {
            anyhow::bail!("[sim] port {port} out of range (0-31)");
        }
        Ok(config)
    }

    /// Driver configuration for every port.
    #[must_use]
    pub fn port_config(&self) -> PortConfig {
        PortConfig {
            spin_limit: self.driver.spin_limit,
            completion: self.driver.completion.into(),
        }
    }
}
