use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::assess::{GatewayAssessment, HostAssessor, NameResolver, OwnershipVerifier};
use crate::sources::{ArnsNamesSource, EpochHeightSource, GatewayHost, GatewayHostsSource};

pub const REPORT_FORMAT_VERSION: u32 = 1;

/// The audit artifact: one epoch's verdicts over the whole fleet, keyed by
/// gateway FQDN. Maps are ordered so the serialized report is
/// byte-deterministic for downstream signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverReport {
    pub format_version: u32,
    pub observer_address: String,
    pub epoch_start_height: u64,
    pub epoch_end_height: u64,
    pub generated_at: u64,
    pub gateway_assessments: BTreeMap<String, GatewayAssessment>,
}

pub(crate) fn unix_timestamp() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Knobs the builder needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub observer_address: String,
    pub reference_gateway_host: String,
    pub gateway_assessment_concurrency: usize,
    pub name_assessment_concurrency: usize,
}

/// Top-level orchestrator: fetches epoch bounds, name lists and the fleet
/// registry, then fans out host assessments under the outer concurrency
/// bound.
pub struct ReportBuilder<'a, R, O, E, P, C, G> {
    resolver: &'a R,
    ownership: &'a O,
    epochs: &'a E,
    prescribed: &'a P,
    chosen: &'a C,
    gateways: &'a G,
    options: &'a ReportOptions,
}

impl<'a, R, O, E, P, C, G> ReportBuilder<'a, R, O, E, P, C, G>
where
    R: NameResolver,
    O: OwnershipVerifier,
    E: EpochHeightSource,
    P: ArnsNamesSource,
    C: ArnsNamesSource,
    G: GatewayHostsSource,
{
    pub fn new(
        resolver: &'a R,
        ownership: &'a O,
        epochs: &'a E,
        prescribed: &'a P,
        chosen: &'a C,
        gateways: &'a G,
        options: &'a ReportOptions,
    ) -> Self {
        Self {
            resolver,
            ownership,
            epochs,
            prescribed,
            chosen,
            gateways,
            options,
        }
    }

    /// Probe failures land in the report as failed assessments; only a
    /// failing source aborts, because without its inputs there is nothing
    /// to assess.
    pub async fn generate_report(&self) -> Result<ObserverReport> {
        let epoch_start_height = self
            .epochs
            .epoch_start_height()
            .await
            .context("epoch height source failed to provide the start height")?;
        let epoch_end_height = self
            .epochs
            .epoch_end_height()
            .await
            .context("epoch height source failed to provide the end height")?;
        let prescribed_names = self
            .prescribed
            .names(Some(epoch_start_height))
            .await
            .context("prescribed names source failed")?;
        let chosen_names = self
            .chosen
            .names(Some(epoch_start_height))
            .await
            .context("chosen names source failed")?;
        let hosts = self
            .gateways
            .hosts()
            .await
            .context("gateway hosts source failed")?;

        let grouped = group_by_fqdn(hosts);
        info!(
            gateways = grouped.len(),
            prescribed = prescribed_names.len(),
            chosen = chosen_names.len(),
            epoch_start_height,
            epoch_end_height,
            "assessing gateway fleet"
        );

        let assessor = HostAssessor::new(
            self.resolver,
            self.ownership,
            &self.options.reference_gateway_host,
            self.options.name_assessment_concurrency,
        );
        let assessor = &assessor;
        let prescribed_names = &prescribed_names;
        let chosen_names = &chosen_names;
        let gateway_assessments: BTreeMap<String, GatewayAssessment> = stream::iter(grouped)
            .map(|(fqdn, wallets)| async move {
                let assessment = assessor
                    .assess_host(&fqdn, prescribed_names, chosen_names, &wallets)
                    .await;
                debug!(gateway = %fqdn, pass = assessment.pass, "gateway assessed");
                (fqdn, assessment)
            })
            .buffer_unordered(self.options.gateway_assessment_concurrency.max(1))
            .collect()
            .await;

        Ok(ObserverReport {
            format_version: REPORT_FORMAT_VERSION,
            observer_address: self.options.observer_address.clone(),
            epoch_start_height,
            epoch_end_height,
            generated_at: unix_timestamp(),
            gateway_assessments,
        })
    }
}

/// Collapse the registry to one entry per FQDN with the ascending-sorted
/// union of claiming wallets.
fn group_by_fqdn(hosts: Vec<GatewayHost>) -> Vec<(String, Vec<String>)> {
    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for host in hosts {
        grouped.entry(host.fqdn).or_default().insert(host.wallet);
    }
    grouped
        .into_iter()
        .map(|(fqdn, wallets)| (fqdn, wallets.into_iter().collect()))
        .collect()
}
