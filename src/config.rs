use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scoring::ChronicConfig;
use crate::timing::TimingThresholds;

pub const CONFIG_FILE_NAME: &str = "pm_flex.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chronic_tools: ChronicConfig,
    pub pm_timing: TimingThresholds,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub network_share_path: PathBuf,
    pub file_name: String,
    pub max_weeks_back: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            network_share_path: PathBuf::from("data"),
            file_name: "PM_Flex.csv".to_string(),
            max_weeks_back: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Config {
    /// Hard errors come from the same checks the scorer applies at
    /// construction; warnings flag values that are legal but likely mistakes.
    pub fn validate(&self) -> ConfigReport {
        let mut report = ConfigReport::default();
        let chronic = &self.chronic_tools;

        if let Err(err) = chronic.validate() {
            report.errors.push(err.to_string());
        }
        if let Err(err) = self.pm_timing.validate() {
            report.errors.push(err.to_string());
        }
        if self.discovery.file_name.trim().is_empty() {
            report.errors.push("discovery.file_name must not be empty".to_string());
        }

        let total = chronic.score_weights.total();
        if (total - 1.0).abs() > 0.01 {
            report.warnings.push(format!(
                "chronic score weights total {total:.2}, not 1.00; scores are not renormalized"
            ));
        }
        if chronic.unscheduled_rate_threshold > 1.0 {
            report.warnings.push(format!(
                "unscheduled_rate_threshold {} is above 1.0 and can never be exceeded",
                chronic.unscheduled_rate_threshold
            ));
        }
        if (1..3).contains(&chronic.min_pm_events) {
            report.warnings.push(format!(
                "min_pm_events is very low ({}); consider at least 5",
                chronic.min_pm_events
            ));
        } else if chronic.min_pm_events > 20 {
            report.warnings.push(format!(
                "min_pm_events is very high ({}); many tools will be excluded",
                chronic.min_pm_events
            ));
        }
        if chronic.severity_thresholds.critical > 100.0 {
            report.warnings.push(format!(
                "critical severity threshold {} is above the maximum score of 100",
                chronic.severity_thresholds.critical
            ));
        }

        report
    }
}

/// Where the effective PM_Flex configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Passed with `--config`; must exist.
    Flag(PathBuf),
    /// `pm_flex.toml` found in the working directory.
    WorkingDir(PathBuf),
    BuiltIn,
}

impl ConfigSource {
    pub fn resolve(flag: Option<&Path>, cwd: &Path) -> Self {
        if let Some(path) = flag {
            return ConfigSource::Flag(path.to_path_buf());
        }
        let local = cwd.join(CONFIG_FILE_NAME);
        if local.is_file() {
            ConfigSource::WorkingDir(local)
        } else {
            ConfigSource::BuiltIn
        }
    }
}

/// Resolves and reads the PM_Flex configuration for a CLI run.
pub fn load_config(flag: Option<&Path>, cwd: &Path) -> Result<Config> {
    let source = ConfigSource::resolve(flag, cwd);
    debug!(?source, "resolved PM_Flex configuration");
    match source {
        ConfigSource::Flag(path) => {
            if !path.is_file() {
                bail!(
                    "PM_Flex config {} given with --config does not exist",
                    path.display()
                );
            }
            Config::from_file(&path)
        }
        ConfigSource::WorkingDir(path) => Config::from_file(&path),
        ConfigSource::BuiltIn => Ok(Config::default()),
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read PM_Flex config {}", path.display()))?;
        toml::from_str(&text).with_context(|| {
            format!(
                "PM_Flex config {} does not match the expected sections",
                path.display()
            )
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("cannot render PM_Flex config as TOML")
    }
}

/// Writes the built-in configuration to `path`. An existing file is left alone.
pub fn write_default_config(path: &Path) -> Result<()> {
    let rendered = Config::default().to_toml()?;
    let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            bail!("PM_Flex config {} already exists; edit it instead", path.display())
        }
        Err(err) => {
            return Err(err).with_context(|| format!("cannot create {}", path.display()));
        }
    };
    file.write_all(rendered.as_bytes())
        .with_context(|| format!("cannot write PM_Flex config {}", path.display()))?;
    Ok(())
}
