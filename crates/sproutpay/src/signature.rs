//! Wallet signature verification for `personal_sign` (EIP-191) messages.
//!
//! [`verify`] is the boolean capability the status machine calls before every
//! state-mutating operation; it never errors or panics on malformed input.

use alloy::primitives::{Address, Signature, U256};

use crate::SproutError;

/// secp256k1 curve order N / 2. Signatures with s above it are malleable (EIP-2).
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xBFD25E8CD0364140,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0x7FFFFFFFFFFFFFFF,
]);

/// Decode a `0x`-prefixed (or bare) 65-byte hex signature.
pub fn decode_signature(signature: &str) -> Result<Signature, SproutError> {
    let hex = signature.strip_prefix("0x").unwrap_or(signature);
    let bytes = alloy::hex::decode(hex)
        .map_err(|e| SproutError::SignatureError(format!("invalid hex: {e}")))?;

    if bytes.len() != 65 {
        return Err(SproutError::SignatureError(format!(
            "signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }

    let sig = Signature::from_raw(&bytes)
        .map_err(|e| SproutError::SignatureError(format!("invalid signature: {e}")))?;

    if sig.s() > SECP256K1_N_DIV_2 {
        return Err(SproutError::SignatureError(
            "high-s signature rejected (EIP-2 malleability)".to_string(),
        ));
    }

    Ok(sig)
}

/// Recover the address that signed `message` with EIP-191 prefixing.
pub fn recover(message: &str, signature: &str) -> Result<Address, SproutError> {
    let sig = decode_signature(signature)?;
    sig.recover_address_from_msg(message.as_bytes())
        .map_err(|e| SproutError::SignatureError(format!("recovery failed: {e}")))
}

/// Whether `signature` over `message` was produced by `address`.
pub fn verify(address: &str, message: &str, signature: &str) -> bool {
    let Ok(expected) = address.parse::<Address>() else {
        return false;
    };

    match recover(message, signature) {
        Ok(recovered) => recovered == expected,
        Err(e) => {
            tracing::debug!(error = %e, "signature verification failed");
            false
        }
    }
}

/// Encode a signature as `0x` + 130 hex chars.
pub fn encode_signature_hex(sig: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(sig.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    fn sign(signer: &PrivateKeySigner, message: &str) -> String {
        let sig = signer.sign_message_sync(message.as_bytes()).unwrap();
        encode_signature_hex(&sig)
    }

    #[test]
    fn valid_signature_verifies() {
        let signer = PrivateKeySigner::random();
        let message = "Create SproutPay link for 0.01 ETH";
        let sig = sign(&signer, message);

        assert!(verify(&signer.address().to_string(), message, &sig));
        // lowercase address form is accepted too
        let lower = format!("{:#x}", signer.address());
        assert!(verify(&lower, message, &sig));
    }

    #[test]
    fn other_signer_does_not_verify() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let sig = sign(&signer, "hello");

        assert!(!verify(&other.address().to_string(), "hello", &sig));
    }

    #[test]
    fn tampered_message_does_not_verify() {
        let signer = PrivateKeySigner::random();
        let sig = sign(&signer, "accept link ABCDEFGH");

        assert!(!verify(
            &signer.address().to_string(),
            "accept link ABCDEFGJ",
            &sig
        ));
    }

    #[test]
    fn malformed_input_is_false_not_error() {
        let signer = PrivateKeySigner::random();
        let addr = signer.address().to_string();
        let sig = sign(&signer, "msg");

        assert!(!verify("not-an-address", "msg", &sig));
        assert!(!verify(&addr, "msg", "0x"));
        assert!(!verify(&addr, "msg", "0xzz"));
        assert!(!verify(&addr, "msg", &format!("0x{}", "00".repeat(64))));
        assert!(!verify(&addr, "msg", &format!("0x{}", "ff".repeat(65))));
        assert!(!verify("", "", ""));
    }

    #[test]
    fn bare_hex_signature_is_accepted() {
        let signer = PrivateKeySigner::random();
        let sig = sign(&signer, "msg");
        let bare = sig.trim_start_matches("0x");
        assert_eq!(recover("msg", bare).unwrap(), signer.address());
    }
}
