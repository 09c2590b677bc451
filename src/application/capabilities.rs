// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capability declaration service.
//!
//! Authenticated AEs declare what they publish and subscribe to; the
//! latest declaration replaces the prior one and the effective policy is
//! rebuilt before the call returns, so any subsequent request decides
//! against the post-declaration snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::application::admission::AuthenticatedExpert;
use crate::application::policy_watcher::PolicyCoordinator;
use crate::domain::audit::{AuditAction, AuditRecord};
use crate::domain::error::GatewayError;
use crate::domain::expert::ExpertId;
use crate::domain::policy::CapabilityDecl;
use crate::domain::repository::CapabilityStore;
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::runtime_registry::RuntimeRegistry;

pub struct CapabilityService {
    store: Arc<dyn CapabilityStore>,
    coordinator: Arc<PolicyCoordinator>,
    audit: Arc<AuditLog>,
    runtime: Arc<RuntimeRegistry>,
}

impl CapabilityService {
    pub fn new(
        store: Arc<dyn CapabilityStore>,
        coordinator: Arc<PolicyCoordinator>,
        audit: Arc<AuditLog>,
        runtime: Arc<RuntimeRegistry>,
    ) -> Self {
        Self {
            store,
            coordinator,
            audit,
            runtime,
        }
    }

    /// Record the caller's declaration. The session subject is the only AE
    /// a declaration can apply to — the handler never accepts an `ae_id`
    /// from the body.
    pub async fn declare(
        &self,
        expert: &AuthenticatedExpert,
        publishes: BTreeSet<String>,
        subscribes: BTreeSet<String>,
        meta: serde_json::Value,
    ) -> Result<CapabilityDecl, GatewayError> {
        let decl = CapabilityDecl {
            ae_id: expert.id.clone(),
            publishes,
            subscribes,
            meta,
            updated_at: Utc::now(),
        };

        self.store.put(&decl).await?;

        self.audit
            .append(
                &AuditRecord::accepted(expert.id.to_string(), AuditAction::CapabilityDeclared)
                    .with_reason(format!(
                        "publishes={} subscribes={}",
                        decl.publishes.len(),
                        decl.subscribes.len()
                    )),
            )
            .await?;

        // Rebuild before returning: the write's effect is observable by any
        // request that starts after this call completes.
        self.coordinator.rebuild().await?;
        self.runtime.touch(&expert.id, "capabilities");

        info!(
            ae_id = %expert.id,
            publishes = decl.publishes.len(),
            subscribes = decl.subscribes.len(),
            "capabilities declared"
        );
        Ok(decl)
    }

    /// Revocation cascade: drop the AE's declaration and rebuild, so its
    /// dynamically declared subjects stop resolving immediately.
    pub async fn remove_for(&self, ae_id: &ExpertId) -> Result<(), GatewayError> {
        self.store.remove(ae_id).await?;
        self.coordinator.rebuild().await?;
        self.runtime.remove(ae_id);
        Ok(())
    }
}
