// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Admission Service (BC-14, ADR-041 §3)
//!
//! The dual-crypto admission ceremony by which an AE proves control of its
//! enrolled Ed25519 key and receives a bearer session grant:
//!
//! ```text
//! AE                                   Gateway
//! │  POST /register { ae_id }             │
//! │◀──────────── nonce (32 random bytes) ─┤  at-most-one per AE, short TTL
//! │  POST /verify { ae_id, signed_nonce } │
//! │        1. keyring record usable?      │
//! │        2. Ed25519 over stored nonce?  │
//! │        3. consume nonce (one-shot)    │
//! │        4. untrusted → trusted         │
//! │◀──────────────── session grant (JWT) ─┤
//! ```
//!
//! The same service owns [`AdmissionService::authenticate`], the shared
//! grant check used by every secured route: token validity first, then the
//! keyring — whose roles and trust state always win over anything the
//! token claims.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use tracing::{info, warn};

use crate::domain::audit::{AuditAction, AuditRecord, SYSTEM_ACTOR};
use crate::domain::error::GatewayError;
use crate::domain::expert::{ExpertId, KeyringRecord, RoleSet, TrustState};
use crate::domain::repository::KeyringStore;
use crate::domain::session::SessionClaims;
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::nonce_cache::{NonceCache, NonceError};
use crate::infrastructure::signature;
use crate::infrastructure::token::{IssuedGrant, SessionTokenService};

/// The result of a successful bearer check: the principal plus its
/// authoritative keyring state.
#[derive(Debug, Clone)]
pub struct AuthenticatedExpert {
    pub id: ExpertId,
    /// Roles from the keyring, not the token.
    pub roles: RoleSet,
    pub record: KeyringRecord,
    pub claims: SessionClaims,
}

pub struct AdmissionService {
    keyring: Arc<dyn KeyringStore>,
    nonces: Arc<NonceCache>,
    tokens: Arc<SessionTokenService>,
    audit: Arc<AuditLog>,
    default_profile: String,
}

impl AdmissionService {
    pub fn new(
        keyring: Arc<dyn KeyringStore>,
        nonces: Arc<NonceCache>,
        tokens: Arc<SessionTokenService>,
        audit: Arc<AuditLog>,
        default_profile: String,
    ) -> Self {
        Self {
            keyring,
            nonces,
            tokens,
            audit,
            default_profile,
        }
    }

    /// Issue a challenge nonce for an enrolled AE, replacing any prior one.
    pub async fn issue_challenge(&self, ae_id: &ExpertId) -> Result<String, GatewayError> {
        let record = self
            .keyring
            .get(ae_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("AE '{ae_id}' is not enrolled")))?;

        if record.state == TrustState::Revoked {
            self.audit
                .append(&AuditRecord::denied(
                    ae_id.to_string(),
                    AuditAction::AdmissionChallenge,
                    "revoked",
                ))
                .await?;
            return Err(GatewayError::NotTrusted(ae_id.to_string()));
        }

        let nonce = self.nonces.issue(ae_id);
        self.audit
            .append(&AuditRecord::accepted(
                ae_id.to_string(),
                AuditAction::AdmissionChallenge,
            ))
            .await?;

        info!(ae_id = %ae_id, "admission challenge issued");
        Ok(STANDARD.encode(nonce))
    }

    /// Verify a signed challenge; on success elevate first-time AEs to
    /// trusted and issue a session grant.
    pub async fn verify_challenge(
        &self,
        ae_id: &ExpertId,
        signed_nonce_b64: &str,
    ) -> Result<IssuedGrant, GatewayError> {
        let record = self
            .keyring
            .get(ae_id)
            .await?
            .ok_or_else(|| GatewayError::NotTrusted(ae_id.to_string()))?;

        if record.state == TrustState::Revoked || record.is_expired(Utc::now()) {
            self.reject(ae_id, "revoked or expired").await?;
            return Err(GatewayError::NotTrusted(ae_id.to_string()));
        }

        let nonce = match self.nonces.peek(ae_id) {
            Ok(n) => n,
            Err(NonceError::Expired) => {
                self.reject(ae_id, "nonce expired").await?;
                return Err(GatewayError::Unauthenticated("challenge expired".into()));
            }
            Err(_) => {
                self.reject(ae_id, "no outstanding nonce").await?;
                return Err(GatewayError::Unauthenticated(
                    "no outstanding challenge".into(),
                ));
            }
        };

        if let Err(e) = signature::verify_detached(&record.public_key, &nonce, signed_nonce_b64) {
            warn!(ae_id = %ae_id, "admission signature check failed");
            self.reject(ae_id, e.audit_reason()).await?;
            return Err(e);
        }

        // One-shot: a concurrent verify that lost the race sees a replay.
        self.nonces.consume(ae_id, &nonce).map_err(|_| {
            GatewayError::Unauthenticated("challenge already consumed".into())
        })?;

        if record.state == TrustState::Untrusted {
            self.keyring
                .set_state(ae_id, TrustState::Trusted, SYSTEM_ACTOR, false)
                .await?;
        }

        let grant = self
            .tokens
            .issue(ae_id, &record.roles, &self.default_profile)
            .map_err(GatewayError::from)?;

        self.audit
            .append(&AuditRecord::accepted(
                ae_id.to_string(),
                AuditAction::AdmissionVerified,
            ))
            .await?;

        info!(ae_id = %ae_id, "admission verified, session grant issued");
        Ok(grant)
    }

    /// Shared bearer check for all secured routes.
    ///
    /// Grant validity (Unauthenticated) is checked before keyring trust
    /// (NotTrusted); the returned role set is re-read from the keyring, so
    /// a grant issued under stale roles cannot widen access.
    pub async fn authenticate(
        &self,
        bearer: Option<&str>,
    ) -> Result<AuthenticatedExpert, GatewayError> {
        let token = bearer
            .ok_or_else(|| GatewayError::Unauthenticated("missing bearer token".into()))?;
        let claims = self.tokens.validate(token).map_err(GatewayError::from)?;

        let ae_id = ExpertId::new(claims.sub.clone());
        let record = self
            .keyring
            .get(&ae_id)
            .await?
            .ok_or_else(|| GatewayError::NotTrusted(ae_id.to_string()))?;

        if !record.is_usable(Utc::now()) {
            return Err(GatewayError::NotTrusted(ae_id.to_string()));
        }

        Ok(AuthenticatedExpert {
            id: ae_id,
            roles: record.roles.clone(),
            record,
            claims,
        })
    }

    async fn reject(&self, ae_id: &ExpertId, reason: impl Into<String>) -> Result<(), GatewayError> {
        self.audit
            .append(&AuditRecord::denied(
                ae_id.to_string(),
                AuditAction::AdmissionRejected,
                reason,
            ))
            .await?;
        Ok(())
    }
}
