pub mod assess;
pub mod cli;
pub mod config;
pub mod ownership;
pub mod report;
pub mod resolver;
pub mod server;
pub mod sources;
pub mod telemetry;

use std::path::PathBuf;

use anyhow::Result;

use crate::config::{ObserverSettings, default_config_path};
use crate::ownership::OwnershipProbe;
use crate::report::{ObserverReport, ReportBuilder, ReportOptions};
use crate::resolver::Resolver;
use crate::sources::{StaticEpochSource, StaticGatewayHostsSource, StaticNamesSource};

/// Wires settings into probes, sources and the report builder.
pub struct Observer {
    settings: ObserverSettings,
    resolver: Resolver,
    ownership: OwnershipProbe,
    epochs: StaticEpochSource,
    prescribed: StaticNamesSource,
    chosen: StaticNamesSource,
    gateways: StaticGatewayHostsSource,
    options: ReportOptions,
}

impl Observer {
    /// Construct an observer from explicit settings.
    pub fn from_settings(settings: ObserverSettings) -> Result<Self> {
        settings.validate()?;
        let client = resolver::build_probe_client()?;
        let resolver = Resolver::with_client(client.clone());
        let ownership = OwnershipProbe::with_client(client);
        let epochs = StaticEpochSource::new(settings.epoch.start_height, settings.epoch.end_height);
        let prescribed = StaticNamesSource::new(settings.prescribed_names.clone());
        let chosen = StaticNamesSource::new(settings.chosen_names.clone());
        let gateways = StaticGatewayHostsSource::new(settings.gateways.clone());
        let options = ReportOptions {
            observer_address: settings.observer_address.clone(),
            reference_gateway_host: settings.reference_gateway_host.clone(),
            gateway_assessment_concurrency: settings.gateway_assessment_concurrency,
            name_assessment_concurrency: settings.name_assessment_concurrency,
        };
        Ok(Self {
            settings,
            resolver,
            ownership,
            epochs,
            prescribed,
            chosen,
            gateways,
            options,
        })
    }

    /// Load configuration from its default path and bootstrap the observer.
    pub fn bootstrap(config_path_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path_override {
            Some(path) => path,
            None => default_config_path()?,
        };
        let settings = ObserverSettings::load_or_default(&config_path)?;
        Self::from_settings(settings)
    }

    /// Produce one audit report for the configured epoch. Probe failures
    /// surface inside the report; only a failing source aborts.
    pub async fn generate_report(&self) -> Result<ObserverReport> {
        ReportBuilder::new(
            &self.resolver,
            &self.ownership,
            &self.epochs,
            &self.prescribed,
            &self.chosen,
            &self.gateways,
            &self.options,
        )
        .generate_report()
        .await
    }

    pub fn settings(&self) -> &ObserverSettings {
        &self.settings
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn ownership(&self) -> &OwnershipProbe {
        &self.ownership
    }

    /// Sorted, deduplicated wallets claiming `fqdn` in the configured fleet.
    pub fn expected_wallets_for(&self, fqdn: &str) -> Vec<String> {
        let mut wallets: Vec<String> = self
            .settings
            .gateways
            .iter()
            .filter(|host| host.fqdn == fqdn)
            .map(|host| host.wallet.clone())
            .collect();
        wallets.sort();
        wallets.dedup();
        wallets
    }
}
