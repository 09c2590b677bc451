// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway error taxonomy.
//!
//! Every denial maps to exactly one variant, one stable HTTP status, and one
//! audit reason string. The presentation layer owns the HTTP mapping; this
//! module owns the reason strings so audit records stay uniform no matter
//! which layer produced the denial.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Missing, malformed, or expired grant or nonce. 401.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Principal registered but not trusted, revoked, or expired. 401.
    #[error("AE '{0}' is not trusted")]
    NotTrusted(String),

    /// Signature verification failed. 401.
    #[error("bad signature: {0}")]
    BadSignature(String),

    /// Subject absent from both static and dynamic policy. 403.
    #[error("unknown subject '{0}'")]
    UnknownSubject(String),

    /// Policy deny for a known subject. 403.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Token subject does not match the envelope producer. 403.
    #[error("token subject '{token_subject}' does not match producer '{producer}'")]
    SubjectMismatch {
        token_subject: String,
        producer: String,
    },

    /// Envelope schema violation or malformed JSON. 400.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Keyring upsert refused because it would lower trust. 409.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown principal on /register. 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unexpected failure; details are logged, never exposed to the caller. 500.
    #[error("internal error")]
    Internal(String),
}

impl GatewayError {
    /// Stable reason string recorded in audit records.
    pub fn audit_reason(&self) -> String {
        match self {
            Self::Unauthenticated(m) => format!("unauthenticated: {m}"),
            Self::NotTrusted(id) => format!("not_trusted: {id}"),
            Self::BadSignature(m) => format!("bad_signature: {m}"),
            Self::UnknownSubject(s) => format!("unknown_subject: {s}"),
            Self::NotAuthorized(m) => format!("not_authorized: {m}"),
            Self::SubjectMismatch {
                token_subject,
                producer,
            } => format!("subject_mismatch: token={token_subject} producer={producer}"),
            Self::BadRequest(m) => format!("bad_request: {m}"),
            Self::Conflict(m) => format!("conflict: {m}"),
            Self::NotFound(m) => format!("not_found: {m}"),
            Self::Internal(_) => "internal".to_string(),
        }
    }
}
