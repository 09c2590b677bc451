// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Envelope (BC-14, ADR-041)
//!
//! The canonical message container that transits the mesh: producer,
//! subject, payload, timestamp, optional labels, and a detached Ed25519
//! signature over a deterministic byte encoding of the other fields.
//!
//! ## Canonical Signing Bytes
//!
//! The signing encoding is fixed and must be reproduced bit-for-bit by
//! every producer and verifier:
//!
//! ```text
//! field := u32-be(len(utf8)) || utf8
//! bytes := field(producer) || field(subject) || field(timestamp)
//!        || field(payload) || field(sorted labels joined by '\n')
//! ```
//!
//! The `signature` field is excluded. The timestamp is carried as the
//! producer's literal RFC3339 UTC string — it is validated but never
//! re-formatted, so the bytes the producer signed are the bytes the
//! gateway verifies.
//!
//! The envelope digest used in audit records is the SHA-256 of the same
//! signing bytes, hex-encoded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Producing AE; must match the session grant subject.
    pub producer: String,

    /// Topic string; also the policy key.
    pub subject: String,

    /// Opaque UTF-8 payload. Producers that carry binary content encode it
    /// themselves (typically base64) before signing.
    pub payload: String,

    /// RFC3339 UTC instant, kept verbatim as signed by the producer.
    #[serde(rename = "ts")]
    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Base64 of the 64-byte Ed25519 signature over [`Envelope::signing_bytes`].
    #[serde(rename = "sig")]
    pub signature: String,

    /// Unknown fields are preserved verbatim for audit fidelity. An empty
    /// map flattens to nothing on the wire.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Envelope {
    /// Parse and schema-check an incoming JSON body.
    pub fn from_json(body: serde_json::Value) -> Result<Self, GatewayError> {
        let env: Envelope = serde_json::from_value(body)
            .map_err(|e| GatewayError::BadRequest(format!("invalid envelope: {e}")))?;
        env.validate()?;
        Ok(env)
    }

    /// Schema validation: required fields non-empty, timestamp parseable.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.producer.is_empty() {
            return Err(GatewayError::BadRequest("envelope missing producer".into()));
        }
        if self.subject.is_empty() {
            return Err(GatewayError::BadRequest("envelope missing subject".into()));
        }
        if self.signature.is_empty() {
            return Err(GatewayError::BadRequest("envelope missing signature".into()));
        }
        chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| GatewayError::BadRequest(format!("invalid envelope timestamp: {e}")))?;
        Ok(())
    }

    /// The deterministic byte encoding the signature covers.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut sorted = self.labels.clone();
        sorted.sort();
        let labels = sorted.join("\n");

        let mut buf = Vec::with_capacity(
            16 + self.producer.len() + self.subject.len() + self.timestamp.len()
                + self.payload.len()
                + labels.len()
                + 4,
        );
        for field in [
            self.producer.as_str(),
            self.subject.as_str(),
            self.timestamp.as_str(),
            self.payload.as_str(),
            labels.as_str(),
        ] {
            buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
            buf.extend_from_slice(field.as_bytes());
        }
        buf
    }

    /// SHA-256 of the signing bytes, hex-encoded. Recorded in the audit log
    /// for every accepted emission.
    pub fn digest_hex(&self) -> String {
        let digest = Sha256::digest(self.signing_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}
