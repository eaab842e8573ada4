//! Error types for pricegate.

use serde::{Deserialize, Serialize};

/// Result type alias for pricegate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed outcome codes surfaced to callers of the redirect protocol.
///
/// These are the only failure identities that cross the component
/// boundaries; upstream-specific detail never leaks past them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No price token was supplied with the click.
    TokenMissing,
    /// Bad signature, malformed payload, or offer id mismatch.
    TokenInvalid,
    /// Token signature is valid but the embedded expiry has passed.
    TokenExpired,
    /// The offer id in the path is unknown to the store.
    OfferNotFound,
    /// Live price verification failed (fetch error or policy denial).
    VerifyFailed,
    /// Live price verification exceeded its deadline.
    VerifyTimeout,
    /// A confirm token could not be minted for a detected price change.
    ConfirmTokenCreateFailed,
    /// The confirm token was missing, malformed, expired, or mismatched.
    ConfirmTokenInvalid,
    /// Upstream rejected our deeplink credentials. Recorded when the
    /// converter's breaker trips; never surfaced to end users.
    UpstreamAuthFailed,
}

impl ErrorCode {
    /// Stable wire identifier for this code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenMissing => "TOKEN_MISSING",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::OfferNotFound => "OFFER_NOT_FOUND",
            Self::VerifyFailed => "VERIFY_FAILED",
            Self::VerifyTimeout => "VERIFY_TIMEOUT",
            Self::ConfirmTokenCreateFailed => "CONFIRM_TOKEN_CREATE_FAILED",
            Self::ConfirmTokenInvalid => "CONFIRM_TOKEN_INVALID",
            Self::UpstreamAuthFailed => "UPSTREAM_AUTH_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by pricegate components.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token creation or verification failure with a typed code.
    #[error("Token error: {0}")]
    Token(ErrorCode),

    /// Price fetch failure against the retailer collaborator.
    #[error("Price fetch error: {0}")]
    PriceFetch(String),

    /// HTTP server failure.
    #[error("HTTP error: {0}")]
    Http(String),
}

impl Error {
    /// Map this error onto the caller-facing code taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Token(code) => *code,
            _ => ErrorCode::VerifyFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::ConfirmTokenCreateFailed)
            .unwrap_or_default();
        assert_eq!(json, "\"CONFIRM_TOKEN_CREATE_FAILED\"");
        assert_eq!(
            ErrorCode::VerifyTimeout.as_str(),
            "VERIFY_TIMEOUT"
        );
    }

    #[test]
    fn token_error_keeps_its_code() {
        let err = Error::Token(ErrorCode::TokenExpired);
        assert_eq!(err.code(), ErrorCode::TokenExpired);
    }
}
