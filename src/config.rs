use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::sources::GatewayHost;

/// User configuration for the observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverSettings {
    /// Identity string embedded in every report.
    #[serde(default = "default_observer_address")]
    pub observer_address: String,
    /// FQDN of the trusted baseline gateway.
    #[serde(default = "default_reference_gateway_host")]
    pub reference_gateway_host: String,
    /// Gateways assessed in parallel.
    #[serde(default = "default_gateway_concurrency")]
    pub gateway_assessment_concurrency: usize,
    /// Names assessed in parallel per list within one gateway.
    #[serde(default = "default_name_concurrency")]
    pub name_assessment_concurrency: usize,
    #[serde(default)]
    pub epoch: EpochSettings,
    /// Names every observer must assess this epoch.
    #[serde(default)]
    pub prescribed_names: Vec<String>,
    /// Names this observer picked for the epoch.
    #[serde(default)]
    pub chosen_names: Vec<String>,
    /// Fleet registry; repeated FQDNs mean multiple wallets claim one host.
    #[serde(default)]
    pub gateways: Vec<GatewayHost>,
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            observer_address: default_observer_address(),
            reference_gateway_host: default_reference_gateway_host(),
            gateway_assessment_concurrency: default_gateway_concurrency(),
            name_assessment_concurrency: default_name_concurrency(),
            epoch: EpochSettings::default(),
            prescribed_names: Vec::new(),
            chosen_names: Vec::new(),
            gateways: Vec::new(),
            service: ServiceSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

fn default_observer_address() -> String {
    "unspecified-observer".into()
}

fn default_reference_gateway_host() -> String {
    "ar-io.dev".into()
}

fn default_gateway_concurrency() -> usize {
    10
}

fn default_name_concurrency() -> usize {
    5
}

/// Block-height bounds of the epoch under audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpochSettings {
    #[serde(default)]
    pub start_height: u64,
    #[serde(default)]
    pub end_height: u64,
}

/// Settings for `--serve` mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "ServiceSettings::default_listen_addr")]
    pub listen_addr: String,
    /// Seconds between report refreshes.
    #[serde(default = "ServiceSettings::default_report_interval_secs")]
    pub report_interval_secs: u64,
}

impl ServiceSettings {
    fn default_listen_addr() -> String {
        "127.0.0.1:5050".into()
    }

    fn default_report_interval_secs() -> u64 {
        3600
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            report_interval_secs: Self::default_report_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub traces: TraceSettings,
}

/// JSON trace export alongside console logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Override for where trace files land.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl ObserverSettings {
    /// Load settings from disk, writing defaults if missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("unable to read config at {}", path.display()))?;
            let parsed: Self = serde_json::from_str(&raw)
                .with_context(|| format!("malformed config at {}", path.display()))?;
            Ok(parsed)
        } else {
            let settings = Self::default();
            settings.save(path)?;
            Ok(settings)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }
        let serialised = serde_json::to_string_pretty(self)?;
        fs::write(path, serialised)
            .with_context(|| format!("failed to persist config to {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.observer_address.trim().is_empty() {
            bail!("observer_address must not be empty");
        }
        if self.reference_gateway_host.trim().is_empty() {
            bail!("reference_gateway_host must not be empty");
        }
        if self.gateway_assessment_concurrency == 0 {
            bail!("gateway_assessment_concurrency must be at least 1");
        }
        if self.name_assessment_concurrency == 0 {
            bail!("name_assessment_concurrency must be at least 1");
        }
        if self.epoch.end_height < self.epoch.start_height {
            bail!(
                "epoch end height {} precedes start height {}",
                self.epoch.end_height,
                self.epoch.start_height
            );
        }
        Ok(())
    }
}

/// Platform default location of the observer config file.
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("dev", "arns", "ArnsObserver")
        .context("unable to resolve platform config directory")?;
    Ok(dirs.config_dir().join("observer.json"))
}
