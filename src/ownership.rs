use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict on whether a gateway is operated by one of the wallets claiming
/// its FQDN in the fleet registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipAssessment {
    pub expected_wallets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_wallet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub pass: bool,
}

impl OwnershipAssessment {
    /// Fold a wallet lookup outcome into an assessment per the decision
    /// table: missing wallet, wallet mismatch, match, or probe error.
    /// `expected_wallets` is pre-sorted so the mismatch message is
    /// deterministic.
    fn from_wallet_lookup(expected_wallets: &[String], lookup: Result<Option<String>>) -> Self {
        match lookup {
            Ok(Some(wallet)) => {
                if expected_wallets.iter().any(|expected| expected == &wallet) {
                    Self {
                        expected_wallets: expected_wallets.to_vec(),
                        observed_wallet: Some(wallet),
                        failure_reason: None,
                        pass: true,
                    }
                } else {
                    let failure = format!(
                        "Wallet mismatch: expected one of {} but found {wallet}",
                        expected_wallets.join(", ")
                    );
                    Self {
                        expected_wallets: expected_wallets.to_vec(),
                        observed_wallet: Some(wallet),
                        failure_reason: Some(failure),
                        pass: false,
                    }
                }
            }
            Ok(None) => Self {
                expected_wallets: expected_wallets.to_vec(),
                observed_wallet: None,
                failure_reason: Some("No wallet found".into()),
                pass: false,
            },
            Err(err) => Self {
                expected_wallets: expected_wallets.to_vec(),
                observed_wallet: None,
                failure_reason: Some(format!("{err:#}")),
                pass: false,
            },
        }
    }
}

/// Fetches a gateway's `/ar-io/info` endpoint and checks the advertised
/// wallet against the expected set.
#[derive(Debug, Clone)]
pub struct OwnershipProbe {
    client: Client,
}

impl OwnershipProbe {
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(crate::resolver::build_probe_client()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Probe errors never escape; they land in `failure_reason`.
    pub async fn assess_ownership(
        &self,
        host: &str,
        expected_wallets: &[String],
    ) -> OwnershipAssessment {
        let lookup = self.fetch_wallet(host).await;
        OwnershipAssessment::from_wallet_lookup(expected_wallets, lookup)
    }

    async fn fetch_wallet(&self, host: &str) -> Result<Option<String>> {
        let url = format!("https://{host}/ar-io/info");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("info request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("gateway info endpoint {url} returned status {status}");
        }
        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("info response from {url} was not JSON"))?;
        if !payload.is_object() {
            bail!("info response from {url} was not a JSON object");
        }
        Ok(payload
            .get("wallet")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn wallets(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn matching_wallet_passes() {
        let assessment =
            OwnershipAssessment::from_wallet_lookup(&wallets(&["A", "B"]), Ok(Some("B".into())));
        assert!(assessment.pass);
        assert_eq!(assessment.observed_wallet.as_deref(), Some("B"));
        assert!(assessment.failure_reason.is_none());
    }

    #[test]
    fn mismatched_wallet_reports_expected_set() {
        let assessment =
            OwnershipAssessment::from_wallet_lookup(&wallets(&["A", "B"]), Ok(Some("Z".into())));
        assert!(!assessment.pass);
        assert_eq!(assessment.observed_wallet.as_deref(), Some("Z"));
        assert_eq!(
            assessment.failure_reason.as_deref(),
            Some("Wallet mismatch: expected one of A, B but found Z")
        );
    }

    #[test]
    fn missing_wallet_field_fails() {
        let assessment = OwnershipAssessment::from_wallet_lookup(&wallets(&["A"]), Ok(None));
        assert!(!assessment.pass);
        assert!(assessment.observed_wallet.is_none());
        assert_eq!(assessment.failure_reason.as_deref(), Some("No wallet found"));
    }

    #[test]
    fn probe_error_becomes_failure_reason() {
        let assessment = OwnershipAssessment::from_wallet_lookup(
            &wallets(&["A"]),
            Err(anyhow!("connection reset by peer")),
        );
        assert!(!assessment.pass);
        assert!(
            assessment
                .failure_reason
                .as_deref()
                .unwrap()
                .contains("connection reset")
        );
    }

    #[test]
    fn assessment_serializes_with_wire_field_names() {
        let assessment =
            OwnershipAssessment::from_wallet_lookup(&wallets(&["W1", "W2"]), Ok(Some("W1".into())));
        let value = serde_json::to_value(&assessment).expect("serialize");
        assert_eq!(value["expectedWallets"], serde_json::json!(["W1", "W2"]));
        assert_eq!(value["observedWallet"], "W1");
        assert_eq!(value["pass"], true);
        assert!(value.get("failureReason").is_none());
    }
}
