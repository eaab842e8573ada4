//! Circuit-breaker deeplink converter.
//!
//! Wraps the outbound affiliate-link conversion API. Affiliate revenue is a
//! bonus, never a purchase blocker: every failure path degrades to the
//! original URL and the converter never returns an error to its caller.
//!
//! An upstream authentication rejection opens the breaker for a cooldown;
//! while open, no network call is made at all. Any other upstream failure
//! degrades that call only.

use crate::cache::TtlCache;
use crate::clock::SharedClock;
use crate::error::ErrorCode;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upstream cap on URLs per conversion call. Callers chunk larger batches.
pub const MAX_URLS_PER_CALL: usize = 50;

/// One converted link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedLink {
    /// URL that was submitted for conversion.
    pub original_url: String,
    /// Affiliate-tagged URL, or the original on degradation.
    pub affiliate_url: String,
    /// Shortened URL, or the original on degradation.
    pub shorten_url: String,
}

impl ConvertedLink {
    fn passthrough(url: &str) -> Self {
        Self {
            original_url: url.to_string(),
            affiliate_url: url.to_string(),
            shorten_url: url.to_string(),
        }
    }
}

/// Result of a conversion call. `degraded` marks calls answered without a
/// successful upstream conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    /// One entry per input URL, in input order.
    pub links: Vec<ConvertedLink>,
    /// True when links fell back to original URLs.
    pub degraded: bool,
}

/// Upstream failure classification. Only `Auth` trips the breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Credentials rejected by the affiliate API.
    Auth(String),
    /// Any other failure (network, 5xx, malformed body).
    Other(String),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth(msg) => write!(f, "auth rejected: {msg}"),
            Self::Other(msg) => write!(f, "upstream failure: {msg}"),
        }
    }
}

/// Affiliate conversion API seam.
#[async_trait]
pub trait DeeplinkUpstream: Send + Sync {
    /// Convert up to [`MAX_URLS_PER_CALL`] URLs into affiliate links.
    async fn convert(
        &self,
        urls: &[String],
        sub_id: &str,
    ) -> Result<Vec<ConvertedLink>, UpstreamError>;
}

/// Breaker state, owned by the converter instance (injectable for tests,
/// not a bare global). Process-wide scope: a multi-node deployment must
/// externalize this to keep the cooldown shared across instances.
#[derive(Debug, Default)]
struct CircuitBreaker {
    open_until_ms: i64,
    last_logged_at_ms: Option<i64>,
}

/// Converter configuration.
#[derive(Debug, Clone)]
pub struct DeeplinkConfig {
    /// How long successful conversions stay cached. Affiliate mappings are
    /// stable, so this defaults to 24 hours.
    pub cache_ttl: Duration,
    /// Breaker cooldown after an auth rejection.
    pub cooldown: Duration,
    /// Minimum interval between breaker-trip log lines.
    pub log_interval: Duration,
}

impl Default for DeeplinkConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(24 * 3600),
            cooldown: Duration::from_secs(15 * 60),
            log_interval: Duration::from_secs(60),
        }
    }
}

/// Circuit-breaker deeplink converter with long-TTL result caching.
pub struct DeeplinkConverter {
    upstream: Arc<dyn DeeplinkUpstream>,
    cache: TtlCache<String, Vec<ConvertedLink>>,
    breaker: Mutex<CircuitBreaker>,
    config: DeeplinkConfig,
    clock: SharedClock,
}

impl DeeplinkConverter {
    /// Create a converter over the given upstream.
    #[must_use]
    pub fn new(
        upstream: Arc<dyn DeeplinkUpstream>,
        config: DeeplinkConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            upstream,
            cache: TtlCache::new(Arc::clone(&clock)),
            breaker: Mutex::new(CircuitBreaker::default()),
            config,
            clock,
        }
    }

    /// Convert `urls` under `sub_id`. Infallible by contract: every failure
    /// degrades to the original URLs.
    pub async fn convert(&self, urls: &[String], sub_id: &str) -> Conversion {
        if urls.is_empty() {
            return Conversion {
                links: Vec::new(),
                degraded: false,
            };
        }
        if urls.len() > MAX_URLS_PER_CALL {
            warn!(
                count = urls.len(),
                cap = MAX_URLS_PER_CALL,
                "oversized deeplink batch, degrading to original urls"
            );
            return self.passthrough(urls);
        }

        let key = cache_key(urls, sub_id);
        if let Some(links) = self.cache.get(&key) {
            debug!(sub_id, "deeplink cache hit");
            return Conversion {
                links,
                degraded: false,
            };
        }

        if self.breaker_open() {
            return self.passthrough(urls);
        }

        match self.upstream.convert(urls, sub_id).await {
            Ok(links) if links.len() == urls.len() => {
                self.cache.insert(key, links.clone(), self.config.cache_ttl);
                Conversion {
                    links,
                    degraded: false,
                }
            }
            Ok(links) => {
                // Shape mismatch is an upstream bug; do not cache it.
                warn!(
                    expected = urls.len(),
                    got = links.len(),
                    "deeplink upstream returned wrong link count"
                );
                self.passthrough(urls)
            }
            Err(UpstreamError::Auth(msg)) => {
                self.trip_breaker(&msg);
                self.passthrough(urls)
            }
            Err(UpstreamError::Other(msg)) => {
                // Transient failure: degrade this call only.
                debug!(error = %msg, "deeplink conversion failed, using original urls");
                self.passthrough(urls)
            }
        }
    }

    /// Convert a single URL, returning the affiliate URL (or the original).
    pub async fn convert_one(&self, url: &str, sub_id: &str) -> String {
        let conversion = self.convert(&[url.to_string()], sub_id).await;
        conversion
            .links
            .into_iter()
            .next()
            .map_or_else(|| url.to_string(), |link| link.affiliate_url)
    }

    /// Whether the breaker currently blocks upstream calls.
    #[must_use]
    pub fn breaker_open(&self) -> bool {
        self.clock.now_ms() < self.breaker.lock().open_until_ms
    }

    fn trip_breaker(&self, msg: &str) {
        let now = self.clock.now_ms();
        let cooldown_ms = i64::try_from(self.config.cooldown.as_millis()).unwrap_or(i64::MAX);
        let log_interval_ms =
            i64::try_from(self.config.log_interval.as_millis()).unwrap_or(i64::MAX);

        let mut breaker = self.breaker.lock();
        breaker.open_until_ms = now.saturating_add(cooldown_ms);
        // Trip storms would otherwise flood the log once per request.
        let due = breaker
            .last_logged_at_ms
            .map_or(true, |at| now.saturating_sub(at) >= log_interval_ms);
        if due {
            breaker.last_logged_at_ms = Some(now);
            warn!(
                cooldown_secs = self.config.cooldown.as_secs(),
                code = %ErrorCode::UpstreamAuthFailed,
                error = %msg,
                "deeplink auth rejected, breaker open"
            );
        }
    }

    fn passthrough(&self, urls: &[String]) -> Conversion {
        Conversion {
            links: urls
                .iter()
                .map(|url| ConvertedLink::passthrough(url))
                .collect(),
            degraded: true,
        }
    }
}

/// Deterministic cache key: identical logical requests hit the same slot
/// regardless of input ordering.
fn cache_key(urls: &[String], sub_id: &str) -> String {
    let mut sorted: Vec<&str> = urls.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{}|{}", sorted.join("\n"), sub_id)
}

/// Upstream for deployments without an affiliate API configured: every
/// conversion degrades to the original URL without tripping the breaker.
pub struct DisabledUpstream;

#[async_trait]
impl DeeplinkUpstream for DisabledUpstream {
    async fn convert(
        &self,
        _urls: &[String],
        _sub_id: &str,
    ) -> Result<Vec<ConvertedLink>, UpstreamError> {
        Err(UpstreamError::Other("deeplink upstream disabled".to_string()))
    }
}

/// HTTP implementation of the affiliate conversion API.
pub struct HttpDeeplinkUpstream {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct ConvertRequest<'a> {
    urls: &'a [String],
    sub_id: &'a str,
}

#[derive(Deserialize)]
struct ConvertResponse {
    links: Vec<ConvertedLink>,
}

impl HttpDeeplinkUpstream {
    /// Create an HTTP upstream client.
    ///
    /// # Errors
    ///
    /// Returns a config error if the reqwest client cannot be built.
    pub fn new(
        endpoint: String,
        api_key: String,
        timeout: Duration,
    ) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::error::Error::Config(format!("deeplink client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl DeeplinkUpstream for HttpDeeplinkUpstream {
    async fn convert(
        &self,
        urls: &[String],
        sub_id: &str,
    ) -> Result<Vec<ConvertedLink>, UpstreamError> {
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&ConvertRequest { urls, sub_id });

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::Other(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(UpstreamError::Auth(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(UpstreamError::Other(format!("status {status}")));
        }

        let body: ConvertResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Other(format!("malformed body: {e}")))?;
        Ok(body.links)
    }
}
