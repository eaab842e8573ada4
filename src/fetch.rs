//! HTTP client for the external price-lookup collaborator.
//!
//! Retailer-specific scraping lives outside this crate; deployments point
//! pricegate at a collaborator endpoint that answers
//! `GET {endpoint}/{offer_id}` with `{"price": <minor units>}`.

use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::offer::{Offer, PriceFetcher, PriceQuote};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
struct PriceBody {
    price: u64,
}

/// Price fetcher backed by a collaborator HTTP service.
pub struct HttpPriceFetcher {
    client: reqwest::Client,
    endpoint: String,
    clock: SharedClock,
}

impl HttpPriceFetcher {
    /// Create a fetcher against `endpoint`, with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a config error if the HTTP client cannot be built.
    pub fn new(endpoint: String, timeout: Duration, clock: SharedClock) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("price fetch client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            clock,
        })
    }
}

#[async_trait]
impl PriceFetcher for HttpPriceFetcher {
    async fn fetch_current_price(&self, offer: &Offer) -> Result<PriceQuote> {
        let url = format!("{}/{}", self.endpoint, offer.id);
        debug!(offer_id = %offer.id, %url, "fetching live price");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::PriceFetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::PriceFetch(format!("status {}", response.status())));
        }
        let body: PriceBody = response
            .json()
            .await
            .map_err(|e| Error::PriceFetch(format!("malformed body: {e}")))?;

        Ok(PriceQuote {
            price: body.price,
            fetched_at: self.clock.now_ms(),
        })
    }
}
