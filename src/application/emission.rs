// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Verified-Emit Pipeline (BC-14, ADR-041 §4)
//!
//! The single choke-point every emitted envelope passes through. The stage
//! order is load-bearing for security and must not be rearranged: cheap
//! checks run first, and the CPU-bound signature verification runs only
//! after trust and policy have already passed, bounding the compute an
//! unauthorized caller can burn.
//!
//! ```text
//! 1. extract bearer grant            → Unauthenticated
//! 2. validate grant                  → Unauthenticated
//! 3. parse + schema-check envelope   → BadRequest
//! 4. producer == grant subject       → SubjectMismatch
//! 5. keyring record usable           → NotTrusted
//! 6. can_publish (effective policy)  → Forbidden (reason propagated)
//! 7. Ed25519 over canonical bytes    → BadSignature
//! 8. publish to bus                  (best-effort toward subscribers)
//! 9. audit Accepted + digest         (durable before the response)
//! ```
//!
//! Stages 1–7 are side-effect-free on failure except for the audit record
//! every denial writes.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::audit::{AuditAction, AuditRecord};
use crate::domain::envelope::Envelope;
use crate::domain::error::GatewayError;
use crate::domain::expert::ExpertId;
use crate::domain::policy::{PolicyDenial, PolicyEngine};
use crate::domain::repository::KeyringStore;
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::runtime_registry::RuntimeRegistry;
use crate::infrastructure::signature;
use crate::infrastructure::token::SessionTokenService;

/// Acknowledgement returned to the producer after stage 10.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EmitReceipt {
    pub status: &'static str,
    pub subject: String,
    pub delivered: usize,
}

pub struct EmissionService {
    tokens: Arc<SessionTokenService>,
    keyring: Arc<dyn KeyringStore>,
    policy: Arc<PolicyEngine>,
    bus: EventBus,
    audit: Arc<AuditLog>,
    runtime: Arc<RuntimeRegistry>,
}

impl EmissionService {
    pub fn new(
        tokens: Arc<SessionTokenService>,
        keyring: Arc<dyn KeyringStore>,
        policy: Arc<PolicyEngine>,
        bus: EventBus,
        audit: Arc<AuditLog>,
        runtime: Arc<RuntimeRegistry>,
    ) -> Self {
        Self {
            tokens,
            keyring,
            policy,
            bus,
            audit,
            runtime,
        }
    }

    pub async fn emit(
        &self,
        bearer: Option<&str>,
        body: serde_json::Value,
    ) -> Result<EmitReceipt, GatewayError> {
        // Best-known actor for denial audits before authentication settles.
        let claimed_producer = body
            .get("producer")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        // Stage 1: bearer present.
        let token = match bearer {
            Some(t) => t,
            None => {
                let err = GatewayError::Unauthenticated("missing bearer token".into());
                self.reject(&claimed_producer, None, &err).await?;
                return Err(err);
            }
        };

        // Stage 2: grant valid.
        let claims = match self.tokens.validate(token) {
            Ok(c) => c,
            Err(e) => {
                let err = GatewayError::from(e);
                self.reject(&claimed_producer, None, &err).await?;
                return Err(err);
            }
        };

        // Stage 3: envelope schema.
        let envelope = match Envelope::from_json(body) {
            Ok(env) => env,
            Err(err) => {
                self.reject(&claims.sub, None, &err).await?;
                return Err(err);
            }
        };

        // Stage 4: the grant subject is the producer.
        if envelope.producer != claims.sub {
            let err = GatewayError::SubjectMismatch {
                token_subject: claims.sub.clone(),
                producer: envelope.producer.clone(),
            };
            self.reject(&claims.sub, Some(&envelope), &err).await?;
            return Err(err);
        }

        // Stage 5: keyring trust, re-read at decision time.
        let ae_id = ExpertId::new(claims.sub.clone());
        let record = match self.keyring.get(&ae_id).await? {
            Some(rec) if rec.is_usable(Utc::now()) => rec,
            _ => {
                let err = GatewayError::NotTrusted(ae_id.to_string());
                self.reject(&claims.sub, Some(&envelope), &err).await?;
                return Err(err);
            }
        };

        // Stage 6: effective policy, with the keyring's role set.
        let snapshot = self.policy.current();
        if let Err(denial) = snapshot.can_publish(&ae_id, &envelope.subject, &record.roles) {
            let err = match denial {
                PolicyDenial::UnknownSubject(s) => GatewayError::UnknownSubject(s),
                other => GatewayError::NotAuthorized(other.to_string()),
            };
            self.reject(&claims.sub, Some(&envelope), &err).await?;
            return Err(err);
        }

        // Stage 7: signature over the canonical bytes. CPU-bound, runs with
        // no lock held and only for trusted, authorized producers.
        if let Err(err) = signature::verify_detached(
            &record.public_key,
            &envelope.signing_bytes(),
            &envelope.signature,
        ) {
            warn!(ae_id = %ae_id, subject = %envelope.subject, "emit signature check failed");
            self.reject(&claims.sub, Some(&envelope), &err).await?;
            return Err(err);
        }

        // Stage 8: hand off to the bus. Best-effort toward subscribers; the
        // producer's emit has succeeded regardless of fan-out outcome.
        let digest = envelope.digest_hex();
        let subject = envelope.subject.clone();
        let delivered = self.bus.publish(&subject, Arc::new(envelope));

        // Stage 9: durable audit record before the acknowledgement.
        self.audit
            .append(
                &AuditRecord::accepted(claims.sub.clone(), AuditAction::EmitAccepted)
                    .with_subject(subject.clone())
                    .with_digest(digest),
            )
            .await?;

        self.runtime.touch(&ae_id, "emit");
        info!(ae_id = %ae_id, subject = %subject, delivered, "emit accepted");

        // Stage 10.
        Ok(EmitReceipt {
            status: "accepted",
            subject,
            delivered,
        })
    }

    async fn reject(
        &self,
        actor: &str,
        envelope: Option<&Envelope>,
        err: &GatewayError,
    ) -> Result<(), GatewayError> {
        let mut record = AuditRecord::denied(actor, AuditAction::EmitRejected, err.audit_reason());
        if let Some(env) = envelope {
            record = record.with_subject(env.subject.clone()).with_digest(env.digest_hex());
        }
        self.audit.append(&record).await?;
        Ok(())
    }
}
