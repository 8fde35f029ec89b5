use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures_util::TryStreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Bytes of response body fed to the content digest before the transfer is
/// cut off. Bytes beyond the cap are neither hashed nor drained.
pub const MAX_HASHED_BYTES: u64 = 1_048_576;

pub const HEADER_RESOLVED_ID: &str = "x-arns-resolved-id";
pub const HEADER_TTL_SECONDS: &str = "x-arns-ttl-seconds";

/// One budget for TCP establishment and the TLS handshake together.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const SOCKET_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

const PROBE_USER_AGENT: &str = concat!("ArnsObserver/", env!("CARGO_PKG_VERSION"));

/// Per-phase timing breakdown of a single probe, in milliseconds. Phases the
/// transport does not surface stay unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionTimings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_byte: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Outcome of probing `https://{name}.{host}/` on a single gateway.
///
/// A gateway answering 404 is a first-class "name unresolved" signal and is
/// represented with `status_code == 404` and every other field absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArnsResolution {
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_hash_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<ResolutionTimings>,
}

impl ArnsResolution {
    /// Shape returned when the upstream reported 404 before any body bytes.
    pub fn not_found() -> Self {
        Self {
            status_code: StatusCode::NOT_FOUND.as_u16(),
            resolved_id: None,
            ttl_seconds: None,
            content_type: None,
            content_length: None,
            data_hash_digest: None,
            timings: None,
        }
    }
}

/// Incremental SHA-256 over at most [`MAX_HASHED_BYTES`] of input. A chunk
/// straddling the cap is sliced; the digest is finalized exactly once.
struct CappedDigest {
    hasher: Sha256,
    hashed: u64,
}

impl CappedDigest {
    fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            hashed: 0,
        }
    }

    /// Feed one chunk. Returns true once the cap is reached and the
    /// transfer should be terminated.
    fn update(&mut self, chunk: &[u8]) -> bool {
        let take = (MAX_HASHED_BYTES - self.hashed).min(chunk.len() as u64) as usize;
        self.hasher.update(&chunk[..take]);
        self.hashed += take as u64;
        self.hashed == MAX_HASHED_BYTES
    }

    /// Base64url digest of the hashed prefix, absent when no bytes arrived.
    fn finish(self) -> (Option<String>, u64) {
        let hashed = self.hashed;
        let digest = (hashed > 0).then(|| URL_SAFE_NO_PAD.encode(self.hasher.finalize()));
        (digest, hashed)
    }
}

/// Build the HTTP client shared by name and ownership probes.
///
/// `connect_timeout` bounds TCP establishment plus the TLS handshake; the
/// read timeout governs slow-drip bodies between socket reads. There is no
/// end-to-end deadline per request.
pub(crate) fn build_probe_client() -> Result<Client> {
    Client::builder()
        .user_agent(PROBE_USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(SOCKET_IDLE_TIMEOUT)
        .build()
        .context("failed to build probe HTTP client")
}

/// One-shot streaming probe of a name against a gateway host.
#[derive(Debug, Clone)]
pub struct Resolver {
    client: Client,
}

impl Resolver {
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(build_probe_client()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Resolve `name` against `host`, hashing at most [`MAX_HASHED_BYTES`]
    /// of the body. Failures are not retried; callers convert them into
    /// per-name assessment failures.
    pub async fn resolve(&self, host: &str, name: &str) -> Result<ArnsResolution> {
        let url = probe_url(host, name)?;
        let started = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("probe of {url} failed"))?;
        let request_ms = elapsed_ms(started);

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(ArnsResolution::not_found());
        }
        if !status.is_success() {
            bail!("gateway returned unexpected status {status} for {url}");
        }

        let resolved_id = header_string(&response, HEADER_RESOLVED_ID);
        let ttl_seconds = header_string(&response, HEADER_TTL_SECONDS);
        let content_type = header_string(&response, reqwest::header::CONTENT_TYPE.as_str());
        let content_length = header_string(&response, reqwest::header::CONTENT_LENGTH.as_str());

        let mut digest = CappedDigest::new();
        let mut first_byte_ms = None;
        let mut stream = response.bytes_stream();
        loop {
            let chunk = match stream
                .try_next()
                .await
                .with_context(|| format!("body stream from {url} failed"))?
            {
                Some(chunk) => chunk,
                None => break,
            };
            if first_byte_ms.is_none() && !chunk.is_empty() {
                first_byte_ms = Some(elapsed_ms(started));
            }
            if digest.update(&chunk) {
                break;
            }
        }
        // Dropping an unfinished stream aborts the read and closes the
        // underlying connection, so a capped transfer never drains the rest.
        drop(stream);

        let (data_hash_digest, _) = digest.finish();

        Ok(ArnsResolution {
            status_code: status.as_u16(),
            resolved_id,
            ttl_seconds,
            content_type,
            content_length,
            data_hash_digest,
            timings: Some(ResolutionTimings {
                dns: None,
                tcp: None,
                tls: None,
                request: Some(request_ms),
                first_byte: first_byte_ms,
                total: Some(elapsed_ms(started)),
            }),
        })
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn header_string(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Probe target for `name` on `host`. The scheme is fixed to HTTPS and the
/// caller must not supply a port.
fn probe_url(host: &str, name: &str) -> Result<Url> {
    if host.is_empty() || name.is_empty() {
        bail!("probe requires both a gateway host and a name");
    }
    if host.contains(':') || host.contains('/') {
        bail!("gateway host '{host}' must be a bare FQDN without port or path");
    }
    // Names come from untrusted registrants; anything that could change the
    // URL's host, path or authority must not reach the format string.
    if name.contains(|c: char| "/?#@:".contains(c) || c.is_whitespace()) {
        bail!("name '{name}' must be a bare ArNS label");
    }
    let url = Url::parse(&format!("https://{name}.{host}/"))
        .with_context(|| format!("invalid probe target {name}.{host}"))?;
    // Url lowercases the authority while parsing, so compare ignoring case.
    let expected = format!("{name}.{host}");
    if !url
        .host_str()
        .is_some_and(|parsed| parsed.eq_ignore_ascii_case(&expected))
    {
        bail!("probe target {name}.{host} did not resolve to the gateway host");
    }
    Ok(url)
}
