// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy Coordinator (BC-14)
//!
//! Owns the last-good static policy and drives snapshot rebuilds:
//!
//! - at startup, a best-effort initial load (a missing or broken file
//!   starts the gateway with an empty ruleset, audited, never a crash)
//! - a background mtime poll that reloads the file on change
//! - an on-demand [`PolicyCoordinator::rebuild`] invoked by capability
//!   writes, so a declaration is visible to the next request before the
//!   write returns
//!
//! A failed reparse keeps the previous good policy in effect and appends a
//! `policy.reload_failed` audit record; in-flight requests never notice.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::audit::{AuditAction, AuditRecord, SYSTEM_ACTOR};
use crate::domain::error::GatewayError;
use crate::domain::policy::{PolicyEngine, StaticPolicy};
use crate::domain::repository::CapabilityStore;
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::policy_loader::StaticPolicyLoader;

pub struct PolicyCoordinator {
    engine: Arc<PolicyEngine>,
    capabilities: Arc<dyn CapabilityStore>,
    audit: Arc<AuditLog>,
    policy_path: PathBuf,
    last_good: tokio::sync::Mutex<StaticPolicy>,
}

impl PolicyCoordinator {
    pub fn new(
        engine: Arc<PolicyEngine>,
        capabilities: Arc<dyn CapabilityStore>,
        audit: Arc<AuditLog>,
        policy_path: PathBuf,
    ) -> Self {
        Self {
            engine,
            capabilities,
            audit,
            policy_path,
            last_good: tokio::sync::Mutex::new(StaticPolicy::default()),
        }
    }

    /// Startup load. Parse failure is downgraded to an empty ruleset so the
    /// service still comes up; dynamic declarations keep working.
    pub async fn load_initial(&self) -> Result<(), GatewayError> {
        match StaticPolicyLoader::parse_file(&self.policy_path) {
            Ok(policy) => {
                info!(path = ?self.policy_path, subjects = policy.subjects.len(), "static policy loaded");
                *self.last_good.lock().await = policy;
            }
            Err(e) => {
                error!(path = ?self.policy_path, error = %e, "static policy unavailable at startup");
                self.audit
                    .append(&AuditRecord::denied(
                        SYSTEM_ACTOR,
                        AuditAction::PolicyReloadFailed,
                        e.to_string(),
                    ))
                    .await?;
            }
        }
        self.rebuild().await
    }

    /// Merge last-good static policy with the current capability table and
    /// install the result. Readers see old or new, never a mix.
    pub async fn rebuild(&self) -> Result<(), GatewayError> {
        let static_policy = self.last_good.lock().await.clone();
        let capabilities = self.capabilities.list().await?;
        self.engine.install(static_policy, capabilities);
        Ok(())
    }

    /// Reparse the policy file. Keeps the previous good policy on failure.
    pub async fn reload_static(&self) -> Result<(), GatewayError> {
        match StaticPolicyLoader::parse_file(&self.policy_path) {
            Ok(policy) => {
                *self.last_good.lock().await = policy;
                self.rebuild().await?;
                self.audit
                    .append(&AuditRecord::accepted(SYSTEM_ACTOR, AuditAction::PolicyReloaded))
                    .await?;
                info!(path = ?self.policy_path, "static policy reloaded");
            }
            Err(e) => {
                warn!(path = ?self.policy_path, error = %e, "static policy reparse failed, keeping previous");
                self.audit
                    .append(&AuditRecord::denied(
                        SYSTEM_ACTOR,
                        AuditAction::PolicyReloadFailed,
                        e.to_string(),
                    ))
                    .await?;
            }
        }
        Ok(())
    }

    /// Background mtime poll. Interval is clamped to at least one second.
    pub fn spawn_watcher(self: Arc<Self>, poll_interval_secs: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_mtime = self.current_mtime();
            let mut ticker =
                tokio::time::interval(Duration::from_secs(poll_interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let mtime = self.current_mtime();
                if mtime != last_mtime {
                    last_mtime = mtime;
                    if let Err(e) = self.reload_static().await {
                        error!(error = %e, "policy reload errored");
                    }
                }
            }
        })
    }

    fn current_mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.policy_path)
            .and_then(|m| m.modified())
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::expert::{ExpertId, RoleSet};
    use crate::infrastructure::capability_store::SqliteCapabilityStore;
    use crate::infrastructure::db::Database;
    use std::io::Write;

    async fn coordinator(
        dir: &tempfile::TempDir,
        policy_path: PathBuf,
    ) -> (Arc<PolicyEngine>, PolicyCoordinator) {
        let db = Database::connect(&dir.path().join("state.db")).await.unwrap();
        let audit = Arc::new(
            AuditLog::open(&dir.path().join("audit.log")).await.unwrap(),
        );
        let engine = Arc::new(PolicyEngine::new());
        let coordinator = PolicyCoordinator::new(
            Arc::clone(&engine),
            Arc::new(SqliteCapabilityStore::new(db)),
            audit,
            policy_path,
        );
        (engine, coordinator)
    }

    #[tokio::test]
    async fn reload_applies_new_static_rules() {
        let dir = tempfile::tempdir().unwrap();
        let policy_path = dir.path().join("policy.yaml");
        std::fs::write(&policy_path, "subjects:\n  fused.track:\n    pubs: [fusion-ae]\n")
            .unwrap();

        let (engine, coordinator) = coordinator(&dir, policy_path.clone()).await;
        coordinator.load_initial().await.unwrap();

        let snap = engine.current();
        assert!(snap
            .can_publish(&ExpertId::new("fusion-ae"), "fused.track", &RoleSet::new())
            .is_ok());

        // Grow the ruleset and reload.
        let mut f = std::fs::OpenOptions::new().append(true).open(&policy_path).unwrap();
        writeln!(f, "  raw.sensor:\n    pubs: [sensor-ae]").unwrap();
        coordinator.reload_static().await.unwrap();

        assert!(engine
            .current()
            .can_publish(&ExpertId::new("sensor-ae"), "raw.sensor", &RoleSet::new())
            .is_ok());
    }

    #[tokio::test]
    async fn failed_reparse_keeps_previous_good_policy() {
        let dir = tempfile::tempdir().unwrap();
        let policy_path = dir.path().join("policy.yaml");
        std::fs::write(&policy_path, "subjects:\n  fused.track:\n    pubs: [fusion-ae]\n")
            .unwrap();

        let (engine, coordinator) = coordinator(&dir, policy_path.clone()).await;
        coordinator.load_initial().await.unwrap();
        let good_version = engine.current().version;

        std::fs::write(&policy_path, "subjects: [broken").unwrap();
        coordinator.reload_static().await.unwrap();

        let snap = engine.current();
        assert_eq!(snap.version, good_version);
        assert!(snap
            .can_publish(&ExpertId::new("fusion-ae"), "fused.track", &RoleSet::new())
            .is_ok());
    }

    #[tokio::test]
    async fn missing_file_at_startup_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, coordinator) =
            coordinator(&dir, dir.path().join("nonexistent.yaml")).await;
        coordinator.load_initial().await.unwrap();
        assert!(engine.current().known_subjects().is_empty());
    }
}
