//! Signed, time-boxed price and confirm tokens.
//!
//! Tokens are stateless: all fields live in the signed payload, so nothing
//! is stored server-side. The two namespaces derive separate HMAC keys from
//! one master secret via HKDF-SHA256, so a price token can never pass the
//! confirm verifier or vice versa.

use crate::clock::SharedClock;
use crate::error::{Error, ErrorCode, Result};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signing namespace; each gets its own derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    Price,
    Confirm,
}

impl Namespace {
    fn domain(self) -> &'static [u8] {
        match self {
            Self::Price => b"pricegate/token/price/v1",
            Self::Confirm => b"pricegate/token/confirm/v1",
        }
    }
}

/// Signed proof of the price shown to a user at listing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePayload {
    /// Offer the listing page rendered.
    pub offer_id: String,
    /// Price shown to the user, in integer minor units.
    pub listed_price: u64,
    /// When that price was last verified, unix millis.
    pub verified_at: i64,
    /// Token expiry, unix millis.
    pub expires_at: i64,
}

/// Signed proof that the user saw a price-change notice and may proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPayload {
    /// Offer the confirmation applies to.
    pub offer_id: String,
    /// Price the user originally saw.
    pub old_price: u64,
    /// Price the user was asked to accept.
    pub new_price: u64,
    /// Token expiry, unix millis.
    pub expires_at: i64,
}

trait TokenPayload: Serialize + DeserializeOwned {
    fn offer_id(&self) -> &str;
    fn expires_at(&self) -> i64;
}

impl TokenPayload for PricePayload {
    fn offer_id(&self) -> &str {
        &self.offer_id
    }
    fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

impl TokenPayload for ConfirmPayload {
    fn offer_id(&self) -> &str {
        &self.offer_id
    }
    fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

/// Issues and verifies price/confirm tokens.
pub struct TokenService {
    price_key: [u8; 32],
    confirm_key: [u8; 32],
    clock: SharedClock,
}

impl TokenService {
    /// Create a service from a master secret (any length; 32+ bytes of
    /// entropy recommended, see the keygen binary).
    ///
    /// # Errors
    ///
    /// Returns a config error if the secret is empty.
    pub fn new(master_secret: &[u8], clock: SharedClock) -> Result<Self> {
        if master_secret.is_empty() {
            return Err(Error::Config("token master secret is empty".to_string()));
        }
        Ok(Self {
            price_key: derive_key(master_secret, Namespace::Price)?,
            confirm_key: derive_key(master_secret, Namespace::Confirm)?,
            clock,
        })
    }

    /// Issue a price token valid for `ttl_secs`.
    ///
    /// # Errors
    ///
    /// Returns a token error if payload serialization fails.
    pub fn issue_price(
        &self,
        offer_id: &str,
        listed_price: u64,
        verified_at: i64,
        ttl_secs: u64,
    ) -> Result<String> {
        let payload = PricePayload {
            offer_id: offer_id.to_string(),
            listed_price,
            verified_at,
            expires_at: self.deadline(ttl_secs),
        };
        self.sign(&self.price_key, &payload)
    }

    /// Issue a confirm token for a detected price change.
    ///
    /// # Errors
    ///
    /// Returns a token error if payload serialization fails.
    pub fn issue_confirm(
        &self,
        offer_id: &str,
        old_price: u64,
        new_price: u64,
        ttl_secs: u64,
    ) -> Result<String> {
        let payload = ConfirmPayload {
            offer_id: offer_id.to_string(),
            old_price,
            new_price,
            expires_at: self.deadline(ttl_secs),
        };
        self.sign(&self.confirm_key, &payload)
    }

    /// Verify a price token against the offer id from the request path.
    ///
    /// # Errors
    ///
    /// `TOKEN_MISSING` for an absent token, `TOKEN_INVALID` for a bad
    /// signature, malformed payload, or offer mismatch, `TOKEN_EXPIRED`
    /// when past the embedded deadline.
    pub fn verify_price(
        &self,
        token: Option<&str>,
        expected_offer_id: &str,
    ) -> Result<PricePayload> {
        self.verify(&self.price_key, token, expected_offer_id)
    }

    /// Verify a confirm token against the offer id from the request path.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Self::verify_price`].
    pub fn verify_confirm(
        &self,
        token: Option<&str>,
        expected_offer_id: &str,
    ) -> Result<ConfirmPayload> {
        self.verify(&self.confirm_key, token, expected_offer_id)
    }

    fn deadline(&self, ttl_secs: u64) -> i64 {
        self.clock
            .now_ms()
            .saturating_add(i64::try_from(ttl_secs.saturating_mul(1_000)).unwrap_or(i64::MAX))
    }

    fn sign<P: TokenPayload>(&self, key: &[u8; 32], payload: &P) -> Result<String> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|_| Error::Token(ErrorCode::ConfirmTokenCreateFailed))?;
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|_| Error::Token(ErrorCode::ConfirmTokenCreateFailed))?;
        mac.update(&bytes);
        let tag = mac.finalize().into_bytes();
        Ok(format!("{}.{}", hex::encode(&bytes), hex::encode(tag)))
    }

    fn verify<P: TokenPayload>(
        &self,
        key: &[u8; 32],
        token: Option<&str>,
        expected_offer_id: &str,
    ) -> Result<P> {
        let token = match token {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => return Err(Error::Token(ErrorCode::TokenMissing)),
        };

        let (payload_hex, tag_hex) = token
            .split_once('.')
            .ok_or(Error::Token(ErrorCode::TokenInvalid))?;
        let bytes =
            hex::decode(payload_hex).map_err(|_| Error::Token(ErrorCode::TokenInvalid))?;
        let tag = hex::decode(tag_hex).map_err(|_| Error::Token(ErrorCode::TokenInvalid))?;

        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|_| Error::Token(ErrorCode::TokenInvalid))?;
        mac.update(&bytes);
        // Constant-time comparison via the Mac trait.
        mac.verify_slice(&tag)
            .map_err(|_| Error::Token(ErrorCode::TokenInvalid))?;

        let payload: P =
            serde_json::from_slice(&bytes).map_err(|_| Error::Token(ErrorCode::TokenInvalid))?;
        if payload.offer_id() != expected_offer_id {
            return Err(Error::Token(ErrorCode::TokenInvalid));
        }
        if self.clock.now_ms() > payload.expires_at() {
            return Err(Error::Token(ErrorCode::TokenExpired));
        }
        Ok(payload)
    }
}

fn derive_key(master_secret: &[u8], namespace: Namespace) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, master_secret);
    let mut key = [0u8; 32];
    hk.expand(namespace.domain(), &mut key)
        .map_err(|_| Error::Config("token key derivation failed".to_string()))?;
    Ok(key)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn service_at(now_ms: i64) -> (TokenService, ManualClock) {
        let clock = ManualClock::at(now_ms);
        let service =
            TokenService::new(b"test-master-secret", Arc::new(clock.clone())).expect("service");
        (service, clock)
    }

    #[test]
    fn price_token_round_trips_exact_payload() {
        let (service, _clock) = service_at(1_000);
        let token = service
            .issue_price("coupang-123", 1_000_000, 500, 300)
            .expect("issue");

        let payload = service
            .verify_price(Some(&token), "coupang-123")
            .expect("verify");
        assert_eq!(payload.offer_id, "coupang-123");
        assert_eq!(payload.listed_price, 1_000_000);
        assert_eq!(payload.verified_at, 500);
        assert_eq!(payload.expires_at, 301_000);
    }

    #[test]
    fn wrong_offer_id_is_invalid() {
        let (service, _clock) = service_at(0);
        let token = service
            .issue_price("coupang-123", 1_000_000, 0, 300)
            .expect("issue");

        let err = service
            .verify_price(Some(&token), "coupang-999")
            .expect_err("must fail");
        assert_eq!(err.code(), ErrorCode::TokenInvalid);
    }

    #[test]
    fn expired_token_fails_even_with_valid_signature() {
        let (service, clock) = service_at(0);
        let token = service
            .issue_price("coupang-123", 1_000_000, 0, 60)
            .expect("issue");

        clock.advance(61_000);
        let err = service
            .verify_price(Some(&token), "coupang-123")
            .expect_err("must fail");
        assert_eq!(err.code(), ErrorCode::TokenExpired);
    }

    #[test]
    fn missing_token_has_its_own_code() {
        let (service, _clock) = service_at(0);
        let err = service
            .verify_price(None, "coupang-123")
            .expect_err("must fail");
        assert_eq!(err.code(), ErrorCode::TokenMissing);

        let err = service
            .verify_price(Some("  "), "coupang-123")
            .expect_err("must fail");
        assert_eq!(err.code(), ErrorCode::TokenMissing);
    }

    #[test]
    fn namespaces_never_cross_verify() {
        let (service, _clock) = service_at(0);
        let price = service
            .issue_price("coupang-123", 1_000_000, 0, 300)
            .expect("issue");
        let confirm = service
            .issue_confirm("coupang-123", 1_000_000, 950_000, 300)
            .expect("issue");

        assert!(service.verify_confirm(Some(&price), "coupang-123").is_err());
        assert!(service.verify_price(Some(&confirm), "coupang-123").is_err());
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let (service, _clock) = service_at(0);
        let token = service
            .issue_price("coupang-123", 1_000_000, 0, 300)
            .expect("issue");

        // Flip one nibble in the payload half.
        let mut chars: Vec<char> = token.chars().collect();
        chars[2] = if chars[2] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();

        let err = service
            .verify_price(Some(&tampered), "coupang-123")
            .expect_err("must fail");
        assert_eq!(err.code(), ErrorCode::TokenInvalid);
    }

    #[test]
    fn different_secrets_do_not_verify() {
        let clock = ManualClock::at(0);
        let a = TokenService::new(b"secret-a", Arc::new(clock.clone())).expect("a");
        let b = TokenService::new(b"secret-b", Arc::new(clock)).expect("b");

        let token = a
            .issue_price("coupang-123", 1_000_000, 0, 300)
            .expect("issue");
        assert!(b.verify_price(Some(&token), "coupang-123").is_err());
    }

    proptest::proptest! {
        #[test]
        fn any_issued_token_verifies_only_for_its_offer(
            offer_id in "[a-z0-9-]{1,24}",
            other_id in "[a-z0-9-]{1,24}",
            price in 1u64..10_000_000_000,
        ) {
            let (service, _clock) = service_at(0);
            let token = service.issue_price(&offer_id, price, 0, 300).expect("issue");

            let payload = service.verify_price(Some(&token), &offer_id).expect("verify");
            proptest::prop_assert_eq!(payload.listed_price, price);

            if other_id != offer_id {
                proptest::prop_assert!(service.verify_price(Some(&token), &other_id).is_err());
            }
        }
    }

    #[test]
    fn tokens_are_url_safe() {
        let (service, _clock) = service_at(0);
        let token = service
            .issue_price("offer/with?odd&chars", 1, 0, 300)
            .expect("issue");
        assert!(token
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '.'));
    }
}
