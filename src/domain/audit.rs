// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Audit record types.
//!
//! One record per state-changing action or denial. Serialized as one JSON
//! object per line; the field declaration order below IS the canonical key
//! order, so serialized records diff cleanly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened. Rendered as dotted snake_case strings in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "admission.challenge")]
    AdmissionChallenge,
    #[serde(rename = "admission.verified")]
    AdmissionVerified,
    #[serde(rename = "admission.rejected")]
    AdmissionRejected,
    #[serde(rename = "keyring.upsert")]
    KeyringUpsert,
    #[serde(rename = "keyring.state_change")]
    KeyringStateChange,
    #[serde(rename = "capability.declared")]
    CapabilityDeclared,
    #[serde(rename = "emit.accepted")]
    EmitAccepted,
    #[serde(rename = "emit.rejected")]
    EmitRejected,
    #[serde(rename = "subscribe.opened")]
    SubscribeOpened,
    #[serde(rename = "subscribe.denied")]
    SubscribeDenied,
    #[serde(rename = "policy.reloaded")]
    PolicyReloaded,
    #[serde(rename = "policy.reload_failed")]
    PolicyReloadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Denied,
}

/// Actor recorded when the gateway itself mutates state (trust elevation,
/// policy reloads).
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditRecord {
    pub fn accepted(actor: impl Into<String>, action: AuditAction) -> Self {
        Self {
            ts: Utc::now(),
            actor: actor.into(),
            action,
            subject: None,
            digest: None,
            decision: Decision::Accepted,
            reason: None,
        }
    }

    pub fn denied(actor: impl Into<String>, action: AuditAction, reason: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            actor: actor.into(),
            action,
            subject: None,
            digest: None,
            decision: Decision::Denied,
            reason: Some(reason.into()),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
