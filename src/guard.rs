//! Redirect guard: the click -> (redirect | confirm | fail) protocol.
//!
//! HTTP-agnostic orchestration of the token service and the verification
//! engine. The HTTP layer maps [`GuardOutcome`] onto status codes and
//! content negotiation; nothing here knows about axum.

use crate::error::{Error, ErrorCode};
use crate::metrics::Trigger;
use crate::token::TokenService;
use crate::verify::{VerificationEngine, VerifyRequest};
use std::sync::Arc;
use tracing::{debug, info};

/// Guard policy knobs.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    /// Require explicit confirmation on any detected price drift.
    pub strict_guard: bool,
    /// Allow redirecting on an unverifiable price (entry path only).
    pub allow_degraded_redirect: bool,
    /// Confirm token lifetime in seconds.
    pub confirm_ttl_secs: u64,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            strict_guard: true,
            allow_degraded_redirect: false,
            confirm_ttl_secs: 10 * 60,
        }
    }
}

/// Outcome of one guarded click or confirmation.
#[derive(Debug, Clone)]
pub enum GuardOutcome {
    /// Send the user onward. Served with `Cache-Control: no-store`.
    Redirect {
        /// Affiliate (or original) URL to redirect to.
        url: String,
    },
    /// The price moved; the user must confirm before any redirect.
    ConfirmRequired {
        /// Token authorizing the confirm step.
        confirm_token: String,
        /// Offer being confirmed.
        offer_id: String,
        /// Price the user originally saw.
        old_price: u64,
        /// Live price the user is asked to accept.
        new_price: u64,
    },
    /// Typed refusal; never a raw upstream error.
    Denied {
        /// Failure identity.
        code: ErrorCode,
    },
}

/// Composes token verification, price verification, and confirm minting.
pub struct RedirectGuard {
    tokens: Arc<TokenService>,
    engine: Arc<VerificationEngine>,
    policy: GuardPolicy,
}

impl RedirectGuard {
    /// Wire up a guard.
    #[must_use]
    pub fn new(
        tokens: Arc<TokenService>,
        engine: Arc<VerificationEngine>,
        policy: GuardPolicy,
    ) -> Self {
        Self {
            tokens,
            engine,
            policy,
        }
    }

    /// Entry point: a listing click carrying a price token.
    pub async fn handle_click(&self, offer_id: &str, price_token: Option<&str>) -> GuardOutcome {
        let payload = match self.tokens.verify_price(price_token, offer_id) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(offer_id, code = %err.code(), "price token rejected");
                return GuardOutcome::Denied { code: err.code() };
            }
        };

        let request = VerifyRequest {
            trigger: Trigger::Click,
            force: true,
            strict_guard: self.policy.strict_guard,
            allow_unverified_redirect: !self.policy.strict_guard
                || self.policy.allow_degraded_redirect,
            listed_price: Some(payload.listed_price),
        };

        let Some(result) = self.engine.verify(offer_id, request).await else {
            return GuardOutcome::Denied {
                code: ErrorCode::OfferNotFound,
            };
        };

        if let Some(url) = result.redirect_url {
            if result.price_changed {
                info!(offer_id, "degraded redirect despite price change");
            }
            return GuardOutcome::Redirect { url };
        }

        if result.price_changed && self.policy.strict_guard {
            let (Some(old_price), Some(new_price)) = (result.listed_price, result.current_price)
            else {
                return GuardOutcome::Denied {
                    code: ErrorCode::ConfirmTokenCreateFailed,
                };
            };
            // Confirmation only makes sense for two real prices.
            if old_price == 0 || new_price == 0 {
                return GuardOutcome::Denied {
                    code: ErrorCode::VerifyFailed,
                };
            }
            return self.mint_confirm(offer_id, old_price, new_price);
        }

        GuardOutcome::Denied {
            code: result.code.unwrap_or(ErrorCode::VerifyFailed),
        }
    }

    /// Confirm step: the user accepted a shown price change.
    ///
    /// No degrading here: the user has already seen one price change, so a
    /// second unverifiable attempt fails loudly. If the price moved again,
    /// a fresh confirm token is minted instead of silently looping.
    pub async fn handle_confirm(
        &self,
        offer_id: &str,
        confirm_token: Option<&str>,
    ) -> GuardOutcome {
        let payload = match self.tokens.verify_confirm(confirm_token, offer_id) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(offer_id, code = %err.code(), "confirm token rejected");
                let code = match err {
                    Error::Token(ErrorCode::TokenExpired) => ErrorCode::TokenExpired,
                    _ => ErrorCode::ConfirmTokenInvalid,
                };
                return GuardOutcome::Denied { code };
            }
        };

        let request = VerifyRequest {
            trigger: Trigger::Confirm,
            force: true,
            strict_guard: true,
            allow_unverified_redirect: false,
            listed_price: Some(payload.new_price),
        };

        let Some(result) = self.engine.verify(offer_id, request).await else {
            return GuardOutcome::Denied {
                code: ErrorCode::OfferNotFound,
            };
        };

        if let Some(url) = result.redirect_url {
            return GuardOutcome::Redirect { url };
        }

        if result.price_changed {
            // Moved again since the notice: chain a new confirmation.
            let (Some(old_price), Some(new_price)) = (result.listed_price, result.current_price)
            else {
                return GuardOutcome::Denied {
                    code: ErrorCode::ConfirmTokenCreateFailed,
                };
            };
            if old_price == 0 || new_price == 0 {
                return GuardOutcome::Denied {
                    code: ErrorCode::VerifyFailed,
                };
            }
            info!(
                offer_id,
                old_price, new_price, "price moved again during confirmation"
            );
            return self.mint_confirm(offer_id, old_price, new_price);
        }

        GuardOutcome::Denied {
            code: result.code.unwrap_or(ErrorCode::VerifyFailed),
        }
    }

    fn mint_confirm(&self, offer_id: &str, old_price: u64, new_price: u64) -> GuardOutcome {
        match self.tokens.issue_confirm(
            offer_id,
            old_price,
            new_price,
            self.policy.confirm_ttl_secs,
        ) {
            Ok(confirm_token) => GuardOutcome::ConfirmRequired {
                confirm_token,
                offer_id: offer_id.to_string(),
                old_price,
                new_price,
            },
            Err(_) => GuardOutcome::Denied {
                code: ErrorCode::ConfirmTokenCreateFailed,
            },
        }
    }
}
