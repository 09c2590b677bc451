// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Ed25519 Signature Utilities
//!
//! Detached signature verification over canonical message bytes. Pure
//! functions with no side effects; `ed25519-dalek` performs the comparison
//! in constant time. Callers must never invoke these while holding a
//! shared lock — verification is CPU-bound.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::domain::error::GatewayError;

/// Verify `signature_b64` (base64 of a 64-byte Ed25519 signature) over
/// `message` using a raw 32-byte public key.
pub fn verify_detached(
    public_key: &[u8],
    message: &[u8],
    signature_b64: &str,
) -> Result<(), GatewayError> {
    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| GatewayError::BadSignature("public key must be 32 bytes".into()))?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| GatewayError::BadSignature(format!("invalid public key: {e}")))?;

    let decoded = STANDARD
        .decode(signature_b64)
        .map_err(|e| GatewayError::BadSignature(format!("invalid base64 signature: {e}")))?;

    let sig_bytes: [u8; 64] = decoded
        .try_into()
        .map_err(|_| GatewayError::BadSignature("signature must be 64 bytes".into()))?;

    verifying_key
        .verify(message, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| GatewayError::BadSignature("verification failed".into()))
}

/// Sign `message` and return the base64 signature. Used by tests and by
/// in-process producers; AE clients normally sign on their own side.
pub fn sign_detached(signing_key: &SigningKey, message: &[u8]) -> String {
    STANDARD.encode(signing_key.sign(message).to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn round_trip_sign_verify() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = signing_key.verifying_key().to_bytes();
        let message = b"canonical bytes";

        let sig = sign_detached(&signing_key, message);
        assert!(verify_detached(&public, message, &sig).is_ok());

        // Any tampering with the message fails verification.
        assert!(matches!(
            verify_detached(&public, b"canonical bytez", &sig),
            Err(GatewayError::BadSignature(_))
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let signer = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let sig = sign_detached(&signer, b"msg");

        assert!(matches!(
            verify_detached(&other.verifying_key().to_bytes(), b"msg", &sig),
            Err(GatewayError::BadSignature(_))
        ));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let signer = SigningKey::generate(&mut OsRng);
        let public = signer.verifying_key().to_bytes();

        assert!(verify_detached(&public[..16], b"msg", "AAAA").is_err());
        assert!(verify_detached(&public, b"msg", "not-base64!!").is_err());
        assert!(verify_detached(&public, b"msg", &STANDARD.encode([0u8; 10])).is_err());
    }
}
