use thiserror::Error;

/// Errors returned by SproutPay domain operations.
#[derive(Debug, Error)]
pub enum SproutError {
    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// A stored or submitted value did not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
