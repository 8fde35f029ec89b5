use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use serde::Serialize;
use tracing::info;

use crate::Observer;
use crate::config::{ObserverSettings, default_config_path};

#[derive(Parser, Debug)]
#[command(
    name = "arns-observer",
    version,
    about = "Audits an ArNS gateway fleet against a reference gateway",
    long_about = None
)]
pub struct Cli {
    /// Custom config path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity.
    #[arg(long, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Write emitted JSON to PATH instead of stdout.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Pretty-print emitted JSON.
    #[arg(long, action = ArgAction::SetTrue)]
    pub pretty: bool,

    /// Resolve a single NAME and print the resolution instead of a report.
    #[arg(long, value_name = "NAME")]
    pub probe: Option<String>,

    /// Gateway FQDN for --probe (defaults to the reference gateway).
    #[arg(long, value_name = "FQDN")]
    pub gateway: Option<String>,

    /// Check a gateway's ownership identity and exit.
    #[arg(long, value_name = "FQDN")]
    pub check_ownership: Option<String>,

    /// Run as a service: periodic reports plus the observer HTTP API.
    #[arg(long, action = ArgAction::SetTrue)]
    pub serve: bool,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => default_config_path()?,
    };
    let settings = ObserverSettings::load_or_default(&config_path)?;
    crate::telemetry::init_tracing(cli.verbose, &settings.telemetry)?;
    info!(path = %config_path.display(), "using observer config");

    let observer = Observer::from_settings(settings)?;

    if let Some(name) = cli.probe.as_deref() {
        let host = cli
            .gateway
            .as_deref()
            .unwrap_or(&observer.settings().reference_gateway_host);
        let resolution = observer.resolver().resolve(host, name).await?;
        return emit_json(&resolution, cli.output.as_deref(), cli.pretty);
    }

    if let Some(host) = cli.check_ownership.as_deref() {
        let expected = observer.expected_wallets_for(host);
        if expected.is_empty() {
            bail!("no configured gateway entry claims fqdn {host}");
        }
        let assessment = observer.ownership().assess_ownership(host, &expected).await;
        return emit_json(&assessment, cli.output.as_deref(), cli.pretty);
    }

    if cli.serve {
        return crate::server::run_service(observer).await;
    }

    // One-shot run; ctrl-c aborts in-flight probes and discards partial work.
    let report = tokio::select! {
        result = observer.generate_report() => result?,
        _ = tokio::signal::ctrl_c() => bail!("interrupted before the report completed"),
    };
    emit_json(&report, cli.output.as_deref(), cli.pretty)
}

fn emit_json<T: Serialize>(value: &T, output: Option<&Path>, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    match output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("failed to write output to {}", path.display()))?,
        None => println!("{rendered}"),
    }
    Ok(())
}
