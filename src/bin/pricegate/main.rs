//! pricegate CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use pricegate::batch::BatchCoordinator;
use pricegate::clock::{SharedClock, SystemClock};
use pricegate::config::GuardConfig;
use pricegate::deeplink::{DeeplinkConverter, DeeplinkUpstream, DisabledUpstream, HttpDeeplinkUpstream};
use pricegate::fetch::HttpPriceFetcher;
use pricegate::guard::RedirectGuard;
use pricegate::http::{serve, AppState};
use pricegate::metrics::MetricsLog;
use pricegate::offer::{
    MemoryOfferStore, Offer, OfferStore, PriceFetcher, StaticTokenAuthorizer, VerifyState,
};
use pricegate::token::TokenService;
use pricegate::verify::VerificationEngine;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("pricegate v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = cli.into_config()?;

    run(config).await?;

    info!("Goodbye!");
    Ok(())
}

async fn run(config: GuardConfig) -> color_eyre::Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);

    // Token service
    let master_secret = if config.token.master_secret.is_empty() {
        warn!("no token master secret configured; using an ephemeral one (tokens die on restart)");
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        secret.to_vec()
    } else {
        hex::decode(&config.token.master_secret)
            .map_err(|e| pricegate::Error::Config(format!("token.master_secret: {e}")))?
    };
    let tokens = Arc::new(TokenService::new(&master_secret, Arc::clone(&clock))?);

    // Offer store, seeded from config
    let store = MemoryOfferStore::new();
    for seed in &config.seed_offers {
        store.upsert(Offer {
            id: seed.id.clone(),
            platform: seed.platform.clone(),
            url: seed.url.clone(),
            tracking_url: seed.tracking_url.clone(),
            listed_price: seed.listed_price,
            verify_state: VerifyState::Unverified,
            verified_price: None,
            verified_at: None,
            last_error: None,
        });
    }
    info!(offers = store.len(), "offer store seeded");
    let store: Arc<dyn OfferStore> = Arc::new(store);

    // Price-lookup collaborator
    if config.price_endpoint.is_empty() {
        return Err(pricegate::Error::Config(
            "price_endpoint is required (the core cannot verify prices without it)".to_string(),
        )
        .into());
    }
    let fetcher: Arc<dyn PriceFetcher> = Arc::new(HttpPriceFetcher::new(
        config.price_endpoint.clone(),
        Duration::from_secs(config.click_verify_timeout_secs),
        Arc::clone(&clock),
    )?);

    // Deeplink converter
    let upstream: Arc<dyn DeeplinkUpstream> = if config.deeplink.endpoint.is_empty() {
        warn!("no deeplink endpoint configured; redirects will use original urls");
        Arc::new(DisabledUpstream)
    } else {
        Arc::new(HttpDeeplinkUpstream::new(
            config.deeplink.endpoint.clone(),
            config.deeplink.api_key.clone(),
            Duration::from_secs(config.deeplink.request_timeout_secs),
        )?)
    };
    let converter = Arc::new(DeeplinkConverter::new(
        upstream,
        config.deeplink_config(),
        Arc::clone(&clock),
    ));

    // Engine, guard, coordinator
    let metrics = MetricsLog::new(Arc::clone(&clock));
    let engine = Arc::new(VerificationEngine::new(
        Arc::clone(&store),
        fetcher,
        converter,
        metrics.clone(),
        config.verify_config(),
        Arc::clone(&clock),
    ));
    let guard = Arc::new(RedirectGuard::new(
        Arc::clone(&tokens),
        Arc::clone(&engine),
        config.guard_policy(),
    ));
    let coordinator = Arc::new(BatchCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        metrics,
    ));

    if config.admin_token.is_empty() {
        warn!("no admin token configured; admin routes are disabled");
    }
    let state = AppState {
        guard,
        engine,
        coordinator: Arc::clone(&coordinator),
        authorizer: Arc::new(StaticTokenAuthorizer::new(config.admin_token.clone())),
    };

    // Optional batch scheduler
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = if config.batch_interval_minutes > 0 {
        let interval = Duration::from_secs(config.batch_interval_minutes * 60);
        Some(tokio::spawn(
            Arc::clone(&coordinator).run_scheduled(interval, shutdown_rx),
        ))
    } else {
        None
    };

    // Serve until ctrl-c
    serve(&config, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    Ok(())
}
