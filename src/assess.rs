use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::ownership::{OwnershipAssessment, OwnershipProbe};
use crate::report::unix_timestamp;
use crate::resolver::{ArnsResolution, ResolutionTimings, Resolver};

/// Longest failure reason recorded for a failed probe.
const MAX_FAILURE_REASON_CHARS: usize = 512;

/// Seam over [`Resolver`] so assessors can be exercised against stub
/// gateways.
#[allow(async_fn_in_trait)]
pub trait NameResolver {
    async fn resolve(&self, host: &str, name: &str) -> Result<ArnsResolution>;
}

impl NameResolver for Resolver {
    async fn resolve(&self, host: &str, name: &str) -> Result<ArnsResolution> {
        Resolver::resolve(self, host, name).await
    }
}

/// Seam over [`OwnershipProbe`].
#[allow(async_fn_in_trait)]
pub trait OwnershipVerifier {
    async fn assess_ownership(
        &self,
        host: &str,
        expected_wallets: &[String],
    ) -> OwnershipAssessment;
}

impl OwnershipVerifier for OwnershipProbe {
    async fn assess_ownership(
        &self,
        host: &str,
        expected_wallets: &[String],
    ) -> OwnershipAssessment {
        OwnershipProbe::assess_ownership(self, host, expected_wallets).await
    }
}

/// Comparison of one name's resolution on a gateway against the reference
/// gateway. Status codes and hashes are recorded for diagnostics even though
/// only the canonical field set drives `pass`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArnsNameAssessment {
    pub assessed_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_data_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_data_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub pass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<ResolutionTimings>,
}

impl ArnsNameAssessment {
    fn probe_failure(err: anyhow::Error) -> Self {
        Self {
            assessed_at: unix_timestamp(),
            expected_status_code: None,
            resolved_status_code: None,
            expected_id: None,
            resolved_id: None,
            expected_data_hash: None,
            resolved_data_hash: None,
            failure_reason: Some(truncate_reason(format!("{err:#}"))),
            pass: false,
            timings: None,
        }
    }
}

/// Name assessments for one gateway, split by how the names were selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArnsAssessments {
    pub prescribed_names: BTreeMap<String, ArnsNameAssessment>,
    pub chosen_names: BTreeMap<String, ArnsNameAssessment>,
    pub pass: bool,
}

/// Complete verdict for one gateway FQDN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAssessment {
    pub ownership_assessment: OwnershipAssessment,
    pub arns_assessments: ArnsAssessments,
    pub pass: bool,
}

/// Runs two sequential resolutions per name, reference gateway first, and
/// compares the canonical field set.
pub struct NameAssessor<'a, R> {
    resolver: &'a R,
    reference_host: &'a str,
}

impl<'a, R: NameResolver> NameAssessor<'a, R> {
    pub fn new(resolver: &'a R, reference_host: &'a str) -> Self {
        Self {
            resolver,
            reference_host,
        }
    }

    /// A resolver failure on either side short-circuits into a failed
    /// assessment; the reference probe always runs first.
    pub async fn assess(&self, host: &str, name: &str) -> ArnsNameAssessment {
        let reference = match self.resolver.resolve(self.reference_host, name).await {
            Ok(resolution) => resolution,
            Err(err) => return ArnsNameAssessment::probe_failure(err),
        };
        let target = match self.resolver.resolve(host, name).await {
            Ok(resolution) => resolution,
            Err(err) => return ArnsNameAssessment::probe_failure(err),
        };

        let failure_reason = compare_resolutions(&reference, &target);
        ArnsNameAssessment {
            assessed_at: unix_timestamp(),
            expected_status_code: Some(reference.status_code),
            resolved_status_code: Some(target.status_code),
            expected_id: reference.resolved_id,
            resolved_id: target.resolved_id,
            expected_data_hash: reference.data_hash_digest,
            resolved_data_hash: target.data_hash_digest,
            pass: failure_reason.is_none(),
            failure_reason,
            timings: target.timings,
        }
    }
}

/// Strict equality over the canonical field set, in declaration order.
/// Both-absent counts as a match; `status_code` and `content_length` are
/// deliberately excluded (the latter disappears under chunked encoding).
fn compare_resolutions(reference: &ArnsResolution, target: &ArnsResolution) -> Option<String> {
    let mut mismatches = Vec::new();
    if reference.resolved_id != target.resolved_id {
        mismatches.push("resolvedId mismatch");
    }
    if reference.ttl_seconds != target.ttl_seconds {
        mismatches.push("ttlSeconds mismatch");
    }
    if reference.content_type != target.content_type {
        mismatches.push("contentType mismatch");
    }
    if reference.data_hash_digest != target.data_hash_digest {
        mismatches.push("dataHashDigest mismatch");
    }
    if mismatches.is_empty() {
        None
    } else {
        Some(mismatches.join(", "))
    }
}

fn truncate_reason(reason: String) -> String {
    if reason.chars().count() <= MAX_FAILURE_REASON_CHARS {
        reason
    } else {
        reason.chars().take(MAX_FAILURE_REASON_CHARS).collect()
    }
}

/// Assesses one gateway: ownership identity plus both name lists, with the
/// two lists running as independent bounded pools that overlap the
/// ownership probe.
pub struct HostAssessor<'a, R, O> {
    resolver: &'a R,
    ownership: &'a O,
    reference_host: &'a str,
    name_concurrency: usize,
}

impl<'a, R, O> HostAssessor<'a, R, O>
where
    R: NameResolver,
    O: OwnershipVerifier,
{
    pub fn new(
        resolver: &'a R,
        ownership: &'a O,
        reference_host: &'a str,
        name_concurrency: usize,
    ) -> Self {
        Self {
            resolver,
            ownership,
            reference_host,
            name_concurrency,
        }
    }

    /// Individual name failures never short-circuit; the gateway always
    /// receives a complete assessment.
    pub async fn assess_host(
        &self,
        host: &str,
        prescribed_names: &[String],
        chosen_names: &[String],
        expected_wallets: &[String],
    ) -> GatewayAssessment {
        let assessor = NameAssessor::new(self.resolver, self.reference_host);
        let (ownership_assessment, prescribed, chosen) = tokio::join!(
            self.ownership.assess_ownership(host, expected_wallets),
            assess_names(&assessor, host, prescribed_names, self.name_concurrency),
            assess_names(&assessor, host, chosen_names, self.name_concurrency),
        );

        // The threshold denominator is the unique name set while the
        // numerator counts both lists' assessments, so a name appearing in
        // both lists counts twice. Reproduced from the reward arithmetic.
        let unique: HashSet<&str> = prescribed_names
            .iter()
            .chain(chosen_names)
            .map(String::as_str)
            .collect();
        let passed = prescribed
            .values()
            .chain(chosen.values())
            .filter(|assessment| assessment.pass)
            .count();
        let names_pass = passed * 5 >= unique.len() * 4;

        GatewayAssessment {
            pass: ownership_assessment.pass && names_pass,
            ownership_assessment,
            arns_assessments: ArnsAssessments {
                prescribed_names: prescribed,
                chosen_names: chosen,
                pass: names_pass,
            },
        }
    }
}

async fn assess_names<R: NameResolver>(
    assessor: &NameAssessor<'_, R>,
    host: &str,
    names: &[String],
    concurrency: usize,
) -> BTreeMap<String, ArnsNameAssessment> {
    stream::iter(names.iter().cloned())
        .map(|name| async move {
            let assessment = assessor.assess(host, &name).await;
            (name, assessment)
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<BTreeMap<_, _>>()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const REFERENCE: &str = "reference.example";
    const TARGET: &str = "gateway.example";

    #[derive(Default)]
    struct StubResolver {
        responses: HashMap<(String, String), Result<ArnsResolution, String>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl StubResolver {
        fn with(mut self, host: &str, name: &str, outcome: Result<ArnsResolution, &str>) -> Self {
            self.responses.insert(
                (host.into(), name.into()),
                outcome.map_err(str::to_string),
            );
            self
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl NameResolver for StubResolver {
        async fn resolve(&self, host: &str, name: &str) -> Result<ArnsResolution> {
            self.calls.lock().unwrap().push((host.into(), name.into()));
            match self.responses.get(&(host.to_string(), name.to_string())) {
                Some(Ok(resolution)) => Ok(resolution.clone()),
                Some(Err(message)) => Err(anyhow!(message.clone())),
                None => Err(anyhow!("no stub response for {name}.{host}")),
            }
        }
    }

    struct StubOwnership {
        pass: bool,
    }

    impl OwnershipVerifier for StubOwnership {
        async fn assess_ownership(
            &self,
            _host: &str,
            expected_wallets: &[String],
        ) -> OwnershipAssessment {
            OwnershipAssessment {
                expected_wallets: expected_wallets.to_vec(),
                observed_wallet: self.pass.then(|| expected_wallets[0].clone()),
                failure_reason: (!self.pass).then(|| "No wallet found".into()),
                pass: self.pass,
            }
        }
    }

    fn resolution(id: &str, hash: &str) -> ArnsResolution {
        ArnsResolution {
            status_code: 200,
            resolved_id: Some(id.into()),
            ttl_seconds: Some("300".into()),
            content_type: Some("text/html".into()),
            content_length: Some("1024".into()),
            data_hash_digest: Some(hash.into()),
            timings: None,
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[tokio::test]
    async fn identical_resolutions_pass() {
        let resolver = StubResolver::default()
            .with(REFERENCE, "ardrive", Ok(resolution("tx-1", "h1")))
            .with(TARGET, "ardrive", Ok(resolution("tx-1", "h1")));
        let assessor = NameAssessor::new(&resolver, REFERENCE);

        let assessment = assessor.assess(TARGET, "ardrive").await;
        assert!(assessment.pass);
        assert!(assessment.failure_reason.is_none());
        assert_eq!(assessment.expected_id.as_deref(), Some("tx-1"));
        assert_eq!(assessment.resolved_id.as_deref(), Some("tx-1"));
        assert_eq!(assessment.expected_status_code, Some(200));
        assert_eq!(assessment.resolved_status_code, Some(200));
        assert!(assessment.assessed_at > 0);
    }

    #[tokio::test]
    async fn diverging_hash_is_the_only_mismatch() {
        // Same id, ttl and content type on both sides, one byte of body
        // difference shows up only in the digest.
        let resolver = StubResolver::default()
            .with(REFERENCE, "ardrive", Ok(resolution("X", "hash-a")))
            .with(TARGET, "ardrive", Ok(resolution("X", "hash-b")));
        let assessor = NameAssessor::new(&resolver, REFERENCE);

        let assessment = assessor.assess(TARGET, "ardrive").await;
        assert!(!assessment.pass);
        assert_eq!(
            assessment.failure_reason.as_deref(),
            Some("dataHashDigest mismatch")
        );
        assert_eq!(assessment.expected_data_hash.as_deref(), Some("hash-a"));
        assert_eq!(assessment.resolved_data_hash.as_deref(), Some("hash-b"));
    }

    #[tokio::test]
    async fn mismatch_reasons_follow_field_declaration_order() {
        let mut target = resolution("tx-2", "h2");
        target.ttl_seconds = Some("900".into());
        let resolver = StubResolver::default()
            .with(REFERENCE, "ardrive", Ok(resolution("tx-1", "h1")))
            .with(TARGET, "ardrive", Ok(target));
        let assessor = NameAssessor::new(&resolver, REFERENCE);

        let assessment = assessor.assess(TARGET, "ardrive").await;
        assert_eq!(
            assessment.failure_reason.as_deref(),
            Some("resolvedId mismatch, ttlSeconds mismatch, dataHashDigest mismatch")
        );
    }

    #[tokio::test]
    async fn symmetric_not_found_passes() {
        let resolver = StubResolver::default()
            .with(REFERENCE, "gone", Ok(ArnsResolution::not_found()))
            .with(TARGET, "gone", Ok(ArnsResolution::not_found()));
        let assessor = NameAssessor::new(&resolver, REFERENCE);

        let assessment = assessor.assess(TARGET, "gone").await;
        assert!(assessment.pass);
        assert_eq!(assessment.expected_status_code, Some(404));
        assert_eq!(assessment.resolved_status_code, Some(404));
        assert!(assessment.expected_data_hash.is_none());
        assert!(assessment.resolved_data_hash.is_none());
    }

    #[tokio::test]
    async fn reference_failure_skips_the_target_probe() {
        let resolver = StubResolver::default()
            .with(REFERENCE, "ardrive", Err("tls handshake timed out"))
            .with(TARGET, "ardrive", Ok(resolution("tx-1", "h1")));
        let assessor = NameAssessor::new(&resolver, REFERENCE);

        let assessment = assessor.assess(TARGET, "ardrive").await;
        assert!(!assessment.pass);
        assert!(assessment.expected_id.is_none());
        assert!(assessment.resolved_id.is_none());
        assert!(
            assessment
                .failure_reason
                .as_deref()
                .unwrap()
                .contains("tls handshake timed out")
        );
        assert_eq!(
            resolver.calls(),
            vec![(REFERENCE.to_string(), "ardrive".to_string())]
        );
    }

    #[tokio::test]
    async fn target_failure_records_error() {
        let resolver = StubResolver::default()
            .with(REFERENCE, "ardrive", Ok(resolution("tx-1", "h1")))
            .with(TARGET, "ardrive", Err("connection reset"));
        let assessor = NameAssessor::new(&resolver, REFERENCE);

        let assessment = assessor.assess(TARGET, "ardrive").await;
        assert!(!assessment.pass);
        assert!(
            assessment
                .failure_reason
                .as_deref()
                .unwrap()
                .contains("connection reset")
        );
    }

    #[tokio::test]
    async fn failure_reason_is_truncated() {
        let long_error = "x".repeat(600);
        let resolver =
            StubResolver::default().with(REFERENCE, "ardrive", Err(long_error.as_str()));
        let assessor = NameAssessor::new(&resolver, REFERENCE);

        let assessment = assessor.assess(TARGET, "ardrive").await;
        assert_eq!(
            assessment.failure_reason.as_deref().unwrap().chars().count(),
            MAX_FAILURE_REASON_CHARS
        );
    }

    fn stub_for_names(passing: &[&str], failing: &[&str]) -> StubResolver {
        let mut resolver = StubResolver::default();
        for name in passing {
            resolver = resolver
                .with(REFERENCE, name, Ok(resolution("tx", "same")))
                .with(TARGET, name, Ok(resolution("tx", "same")));
        }
        for name in failing {
            resolver = resolver
                .with(REFERENCE, name, Ok(resolution("tx", "ref-hash")))
                .with(TARGET, name, Ok(resolution("tx", "other-hash")));
        }
        resolver
    }

    #[tokio::test]
    async fn eight_of_ten_names_meets_the_threshold() {
        let passing = ["n0", "n1", "n2", "n3", "n4", "n5", "n6", "n7"];
        let failing = ["n8", "n9"];
        let resolver = stub_for_names(&passing, &failing);
        let ownership = StubOwnership { pass: true };
        let assessor = HostAssessor::new(&resolver, &ownership, REFERENCE, 4);

        let all: Vec<String> = passing.iter().chain(&failing).map(|n| n.to_string()).collect();
        let gateway = assessor
            .assess_host(TARGET, &all, &[], &names(&["W1"]))
            .await;
        assert!(gateway.arns_assessments.pass);
        assert!(gateway.pass);
        assert_eq!(gateway.arns_assessments.prescribed_names.len(), 10);
    }

    #[tokio::test]
    async fn seven_of_ten_names_misses_the_threshold() {
        let passing = ["n0", "n1", "n2", "n3", "n4", "n5", "n6"];
        let failing = ["n7", "n8", "n9"];
        let resolver = stub_for_names(&passing, &failing);
        let ownership = StubOwnership { pass: true };
        let assessor = HostAssessor::new(&resolver, &ownership, REFERENCE, 4);

        let all: Vec<String> = passing.iter().chain(&failing).map(|n| n.to_string()).collect();
        let gateway = assessor
            .assess_host(TARGET, &all, &[], &names(&["W1"]))
            .await;
        assert!(!gateway.arns_assessments.pass);
        assert!(!gateway.pass);
    }

    #[tokio::test]
    async fn ownership_failure_fails_the_gateway_despite_passing_names() {
        let resolver = stub_for_names(&["n0"], &[]);
        let ownership = StubOwnership { pass: false };
        let assessor = HostAssessor::new(&resolver, &ownership, REFERENCE, 2);

        let gateway = assessor
            .assess_host(TARGET, &names(&["n0"]), &[], &names(&["W1"]))
            .await;
        assert!(gateway.arns_assessments.pass);
        assert!(!gateway.ownership_assessment.pass);
        assert!(!gateway.pass);
    }

    #[tokio::test]
    async fn name_in_both_lists_counts_twice_against_unique_denominator() {
        // One unique name assessed in both lists: numerator 2, denominator 1.
        let resolver = stub_for_names(&["n0"], &[]);
        let ownership = StubOwnership { pass: true };
        let assessor = HostAssessor::new(&resolver, &ownership, REFERENCE, 2);

        let gateway = assessor
            .assess_host(TARGET, &names(&["n0"]), &names(&["n0"]), &names(&["W1"]))
            .await;
        assert!(gateway.arns_assessments.pass);
        assert_eq!(gateway.arns_assessments.prescribed_names.len(), 1);
        assert_eq!(gateway.arns_assessments.chosen_names.len(), 1);
    }

    #[tokio::test]
    async fn empty_name_lists_pass_trivially() {
        let resolver = StubResolver::default();
        let ownership = StubOwnership { pass: true };
        let assessor = HostAssessor::new(&resolver, &ownership, REFERENCE, 2);

        let gateway = assessor
            .assess_host(TARGET, &[], &[], &names(&["W1"]))
            .await;
        assert!(gateway.arns_assessments.pass);
        assert!(gateway.pass);
    }
}
