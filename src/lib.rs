//! # pricegate
//!
//! Price-verified affiliate redirects for a shopping site.
//!
//! A listing page shows a price and embeds a signed [`token`] proving what
//! the user saw. When the user clicks through, the [`guard`] re-checks the
//! live price via the [`verify`] engine (single-flight per offer, hard
//! timeout) and either redirects through the circuit-breaker [`deeplink`]
//! converter or demands an explicit confirmation of the price change.
//!
//! Retailer scraping, the product catalog, and session management live
//! outside this crate behind the [`offer`] collaborator traits.

pub mod batch;
pub mod cache;
pub mod clock;
pub mod config;
pub mod deeplink;
pub mod error;
pub mod fetch;
pub mod guard;
pub mod http;
pub mod metrics;
pub mod offer;
pub mod singleflight;
pub mod token;
pub mod verify;

pub use batch::{BatchCoordinator, BatchOptions, BatchSummary};
pub use cache::TtlCache;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::GuardConfig;
pub use deeplink::{DeeplinkConverter, DeeplinkUpstream};
pub use error::{Error, ErrorCode, Result};
pub use guard::{GuardOutcome, GuardPolicy, RedirectGuard};
pub use metrics::{MetricsLog, Trigger};
pub use offer::{Authorizer, Offer, OfferStore, PriceFetcher, VerifyState};
pub use singleflight::SingleFlight;
pub use token::TokenService;
pub use verify::{VerificationEngine, VerificationResult, VerifyRequest};
