// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository traits for the persistent stores.
//!
//! Infrastructure provides the SQLite implementations; the application
//! layer depends only on these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::error::GatewayError;
use crate::domain::expert::{ExpertId, KeyringRecord, RoleSet, TrustState};
use crate::domain::policy::CapabilityDecl;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Refused mutation (would lower trust, or an illegal transition).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(m) => GatewayError::Conflict(m),
            StoreError::NotFound(m) => GatewayError::NotFound(m),
            StoreError::Database(m) | StoreError::Serialization(m) => GatewayError::Internal(m),
        }
    }
}

/// Enrollment/update input for a keyring row.
#[derive(Debug, Clone)]
pub struct KeyringUpsert {
    pub ae_id: ExpertId,
    /// Raw 32-byte Ed25519 public key.
    pub public_key: Vec<u8>,
    pub roles: Option<RoleSet>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Persistent AE identity + trust state.
#[async_trait]
pub trait KeyringStore: Send + Sync {
    /// Insert or update a record. Trust state is preserved on update; a new
    /// record starts `untrusted`. Unprivileged callers may not replace the
    /// key of a trusted record or touch a revoked one (Conflict).
    async fn upsert(&self, entry: KeyringUpsert, privileged: bool)
        -> Result<KeyringRecord, StoreError>;

    async fn get(&self, ae_id: &ExpertId) -> Result<Option<KeyringRecord>, StoreError>;

    /// Change trust state, honoring the monotonic transition rules.
    async fn set_state(
        &self,
        ae_id: &ExpertId,
        state: TrustState,
        actor: &str,
        privileged: bool,
    ) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<KeyringRecord>, StoreError>;
}

/// Per-AE dynamic capability declarations.
#[async_trait]
pub trait CapabilityStore: Send + Sync {
    /// Insert or replace the declaration for `decl.ae_id`.
    async fn put(&self, decl: &CapabilityDecl) -> Result<(), StoreError>;

    async fn get(&self, ae_id: &ExpertId) -> Result<Option<CapabilityDecl>, StoreError>;

    async fn list(&self) -> Result<Vec<CapabilityDecl>, StoreError>;

    /// Revocation cascade: drop the AE's declaration entirely.
    async fn remove(&self, ae_id: &ExpertId) -> Result<(), StoreError>;
}
