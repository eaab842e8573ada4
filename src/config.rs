//! Configuration for pricegate.

use crate::deeplink::DeeplinkConfig;
use crate::guard::GuardPolicy;
use crate::verify::VerifyConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// HTTP listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Require explicit confirmation on any detected price drift.
    #[serde(default = "default_true")]
    pub strict_guard: bool,

    /// Allow redirecting on an unverifiable price (entry path only).
    #[serde(default)]
    pub allow_degraded_redirect: bool,

    /// Hard deadline on a click-time live price fetch, seconds.
    #[serde(default = "default_click_verify_timeout")]
    pub click_verify_timeout_secs: u64,

    /// How long a verification snapshot may be reused, seconds.
    #[serde(default = "default_listing_price_ttl")]
    pub listing_price_ttl_secs: u64,

    /// Freshness window splitting `verified_fresh` from `verified_stale`,
    /// minutes.
    #[serde(default = "default_display_price_fresh")]
    pub display_price_fresh_minutes: u64,

    /// Scheduled batch interval in minutes (0 disables the scheduler).
    #[serde(default)]
    pub batch_interval_minutes: u64,

    /// Price-lookup collaborator endpoint
    /// (`GET {price_endpoint}/{offer_id}` -> `{"price": ...}`).
    #[serde(default)]
    pub price_endpoint: String,

    /// Shared secret for admin routes. Empty disables admin access.
    #[serde(default)]
    pub admin_token: String,

    /// Token signing and lifetime settings.
    #[serde(default)]
    pub token: TokenConfig,

    /// Deeplink converter settings.
    #[serde(default)]
    pub deeplink: DeeplinkSection,

    /// Offers seeded into the in-memory store at startup.
    #[serde(default)]
    pub seed_offers: Vec<SeedOffer>,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Token service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Hex-encoded master secret (see the keygen binary).
    #[serde(default)]
    pub master_secret: String,

    /// Price token lifetime, seconds.
    #[serde(default = "default_price_token_ttl")]
    pub price_ttl_secs: u64,

    /// Confirm token lifetime, seconds.
    #[serde(default = "default_confirm_token_ttl")]
    pub confirm_ttl_secs: u64,
}

/// Deeplink converter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeeplinkSection {
    /// Affiliate conversion API endpoint. Empty disables upstream calls
    /// (every conversion degrades to the original URL).
    #[serde(default)]
    pub endpoint: String,

    /// API credential for the conversion endpoint.
    #[serde(default)]
    pub api_key: String,

    /// Conversion cache TTL, seconds. Affiliate mappings are stable.
    #[serde(default = "default_deeplink_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Breaker cooldown after an auth rejection, seconds.
    #[serde(default = "default_deeplink_cooldown")]
    pub cooldown_secs: u64,

    /// Per-request timeout against the conversion API, seconds.
    #[serde(default = "default_deeplink_timeout")]
    pub request_timeout_secs: u64,
}

/// One seeded offer for single-process deployments and demos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedOffer {
    /// Offer id, e.g. `coupang-123`.
    pub id: String,
    /// Source platform.
    pub platform: String,
    /// Canonical product URL.
    pub url: String,
    /// Tracking URL for affiliate conversion.
    #[serde(default)]
    pub tracking_url: Option<String>,
    /// Listed price in integer minor units.
    pub listed_price: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            strict_guard: true,
            allow_degraded_redirect: false,
            click_verify_timeout_secs: default_click_verify_timeout(),
            listing_price_ttl_secs: default_listing_price_ttl(),
            display_price_fresh_minutes: default_display_price_fresh(),
            batch_interval_minutes: 0,
            price_endpoint: String::new(),
            admin_token: String::new(),
            token: TokenConfig::default(),
            deeplink: DeeplinkSection::default(),
            seed_offers: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            master_secret: String::new(),
            price_ttl_secs: default_price_token_ttl(),
            confirm_ttl_secs: default_confirm_token_ttl(),
        }
    }
}

impl Default for DeeplinkSection {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            cache_ttl_secs: default_deeplink_cache_ttl(),
            cooldown_secs: default_deeplink_cooldown(),
            request_timeout_secs: default_deeplink_timeout(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    ([127, 0, 0, 1], 8380).into()
}

fn default_true() -> bool {
    true
}

const fn default_click_verify_timeout() -> u64 {
    5
}

const fn default_listing_price_ttl() -> u64 {
    30 * 60
}

const fn default_display_price_fresh() -> u64 {
    10
}

const fn default_price_token_ttl() -> u64 {
    60 * 60
}

const fn default_confirm_token_ttl() -> u64 {
    10 * 60
}

const fn default_deeplink_cache_ttl() -> u64 {
    24 * 3600
}

const fn default_deeplink_cooldown() -> u64 {
    15 * 60
}

const fn default_deeplink_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GuardConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Engine view of the freshness and timeout policy.
    #[must_use]
    pub fn verify_config(&self) -> VerifyConfig {
        VerifyConfig {
            listing_price_ttl: Duration::from_secs(self.listing_price_ttl_secs),
            display_price_freshness: Duration::from_secs(self.display_price_fresh_minutes * 60),
            fetch_timeout: Duration::from_secs(self.click_verify_timeout_secs),
        }
    }

    /// Guard view of the redirect policy.
    #[must_use]
    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            strict_guard: self.strict_guard,
            allow_degraded_redirect: self.allow_degraded_redirect,
            confirm_ttl_secs: self.token.confirm_ttl_secs,
        }
    }

    /// Converter view of the breaker and cache policy.
    #[must_use]
    pub fn deeplink_config(&self) -> DeeplinkConfig {
        DeeplinkConfig {
            cache_ttl: Duration::from_secs(self.deeplink.cache_ttl_secs),
            cooldown: Duration::from_secs(self.deeplink.cooldown_secs),
            log_interval: Duration::from_secs(60),
        }
    }
}
