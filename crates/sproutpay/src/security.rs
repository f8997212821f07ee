//! Secret handling and wallet identity helpers shared by the API and the
//! settlement client.

use alloy::signers::local::PrivateKeySigner;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::SproutError;

/// Constant-time byte comparison that does not leak input lengths or content.
///
/// Both inputs are hashed to SHA-256 digests first, so timing reveals neither
/// length nor content. Used for the `/metrics` bearer token.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Case-insensitive wallet address comparison (checksummed vs. lowercase hex).
pub fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// `0x` followed by 40 hex digits.
pub fn is_address_format(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse the service wallet key. Must be `0x` followed by 64 hex digits.
pub fn parse_private_key(key: &str) -> Result<PrivateKeySigner, SproutError> {
    if !key.starts_with("0x") || key.len() != 66 {
        return Err(SproutError::InvalidPrivateKey(
            "must be a 32-byte hex string starting with 0x".to_string(),
        ));
    }
    key.parse::<PrivateKeySigner>()
        .map_err(|_| SproutError::InvalidPrivateKey("not a valid secp256k1 key".to_string()))
}
