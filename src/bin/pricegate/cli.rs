//! Command-line interface definition.

use clap::Parser;
use pricegate::config::GuardConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Price-verified affiliate redirect guard.
#[derive(Parser, Debug)]
#[command(name = "pricegate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// HTTP listen address.
    #[arg(long, short, env = "PRICEGATE_LISTEN_ADDR")]
    pub listen: Option<SocketAddr>,

    /// Require explicit confirmation on any detected price drift.
    #[arg(long, env = "PRICEGATE_STRICT_GUARD")]
    pub strict_guard: Option<bool>,

    /// Allow redirecting on an unverifiable price.
    #[arg(long, env = "PRICEGATE_ALLOW_DEGRADED")]
    pub allow_degraded_redirect: Option<bool>,

    /// Hex master secret for token signing (see pricegate-keygen).
    #[arg(long, env = "PRICEGATE_TOKEN_SECRET")]
    pub token_secret: Option<String>,

    /// Shared secret for admin routes.
    #[arg(long, env = "PRICEGATE_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Price-lookup collaborator endpoint.
    #[arg(long, env = "PRICEGATE_PRICE_ENDPOINT")]
    pub price_endpoint: Option<String>,

    /// Affiliate conversion API endpoint.
    #[arg(long, env = "PRICEGATE_DEEPLINK_ENDPOINT")]
    pub deeplink_endpoint: Option<String>,

    /// Affiliate conversion API key.
    #[arg(long, env = "PRICEGATE_DEEPLINK_API_KEY")]
    pub deeplink_api_key: Option<String>,

    /// Scheduled batch interval in minutes (0 disables).
    #[arg(long, env = "PRICEGATE_BATCH_INTERVAL_MINUTES")]
    pub batch_interval_minutes: Option<u64>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Layer CLI arguments over the file (or default) configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<GuardConfig> {
        let mut config = if let Some(ref path) = self.config {
            GuardConfig::from_file(path)?
        } else {
            GuardConfig::default()
        };

        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(strict) = self.strict_guard {
            config.strict_guard = strict;
        }
        if let Some(degraded) = self.allow_degraded_redirect {
            config.allow_degraded_redirect = degraded;
        }
        if let Some(secret) = self.token_secret {
            config.token.master_secret = secret;
        }
        if let Some(token) = self.admin_token {
            config.admin_token = token;
        }
        if let Some(endpoint) = self.price_endpoint {
            config.price_endpoint = endpoint;
        }
        if let Some(endpoint) = self.deeplink_endpoint {
            config.deeplink.endpoint = endpoint;
        }
        if let Some(api_key) = self.deeplink_api_key {
            config.deeplink.api_key = api_key;
        }
        if let Some(interval) = self.batch_interval_minutes {
            config.batch_interval_minutes = interval;
        }
        config.log_level = self.log_level;

        Ok(config)
    }
}
