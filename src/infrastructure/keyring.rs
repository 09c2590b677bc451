// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Keyring Store (BC-14)
//!
//! Durable `KeyringStore` implementation over the `ae_keyring` table.
//! Writes are serialized behind one async mutex and committed in the same
//! transaction scope as their audit record: a mutation becomes visible only
//! if its audit line is durable.
//!
//! Trust-state handling:
//! - a new record always starts `untrusted`
//! - updates preserve the stored state
//! - replacing the public key of a `trusted` record requires privilege and
//!   demotes the record to `untrusted` (the new key must re-admit)
//! - `revoked` records reject every upsert

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

use crate::domain::audit::{AuditAction, AuditRecord};
use crate::domain::expert::{ExpertId, KeyringRecord, RoleSet, TrustState};
use crate::domain::repository::{KeyringStore, KeyringUpsert, StoreError};
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::db::Database;

pub struct SqliteKeyring {
    db: Database,
    audit: Arc<AuditLog>,
    write_lock: tokio::sync::Mutex<()>,
}

impl SqliteKeyring {
    pub fn new(db: Database, audit: Arc<AuditLog>) -> Self {
        Self {
            db,
            audit,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn fetch(&self, ae_id: &ExpertId) -> Result<Option<KeyringRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT ae_id, pubkey, roles, status, expires_at, created_at, updated_at \
             FROM ae_keyring WHERE ae_id = ?",
        )
        .bind(ae_id.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(row_to_record).transpose()
    }
}

fn row_to_record(row: SqliteRow) -> Result<KeyringRecord, StoreError> {
    let ae_id: String = row.get("ae_id");
    let pubkey: Vec<u8> = row.get("pubkey");
    let roles_json: String = row.get("roles");
    let status: String = row.get("status");
    let expires_at: Option<String> = row.get("expires_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    let roles: RoleSet = serde_json::from_str(&roles_json)
        .map_err(|e| StoreError::Serialization(format!("roles for '{ae_id}': {e}")))?;
    let state = TrustState::parse(&status)
        .ok_or_else(|| StoreError::Serialization(format!("unknown status '{status}'")))?;

    Ok(KeyringRecord {
        ae_id: ExpertId::new(ae_id),
        public_key: pubkey,
        roles,
        state,
        expires_at: expires_at.map(|s| parse_instant(&s)).transpose()?,
        created_at: parse_instant(&created_at)?,
        updated_at: parse_instant(&updated_at)?,
    })
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("timestamp '{s}': {e}")))
}

#[async_trait]
impl KeyringStore for SqliteKeyring {
    async fn upsert(
        &self,
        entry: KeyringUpsert,
        privileged: bool,
    ) -> Result<KeyringRecord, StoreError> {
        if entry.public_key.len() != 32 {
            return Err(StoreError::Serialization(format!(
                "public key must be 32 bytes, got {}",
                entry.public_key.len()
            )));
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let existing = self.fetch(&entry.ae_id).await?;

        let record = match existing {
            None => KeyringRecord {
                ae_id: entry.ae_id.clone(),
                public_key: entry.public_key,
                roles: entry
                    .roles
                    .unwrap_or_else(|| ["producer".to_string()].into_iter().collect()),
                state: TrustState::Untrusted,
                expires_at: entry.expires_at,
                created_at: now,
                updated_at: now,
            },
            Some(prev) => {
                if prev.state == TrustState::Revoked {
                    return Err(StoreError::Conflict(format!(
                        "AE '{}' is revoked",
                        entry.ae_id
                    )));
                }
                let key_changed = prev.public_key != entry.public_key;
                if key_changed && prev.state == TrustState::Trusted && !privileged {
                    return Err(StoreError::Conflict(format!(
                        "replacing the key of trusted AE '{}' would lower trust",
                        entry.ae_id
                    )));
                }
                // A new key has not been through admission.
                let state = if key_changed {
                    TrustState::Untrusted
                } else {
                    prev.state
                };
                KeyringRecord {
                    ae_id: prev.ae_id,
                    public_key: entry.public_key,
                    roles: entry.roles.unwrap_or(prev.roles),
                    state,
                    expires_at: entry.expires_at.or(prev.expires_at),
                    created_at: prev.created_at,
                    updated_at: now,
                }
            }
        };

        let roles_json = serde_json::to_string(&record.roles)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO ae_keyring (ae_id, pubkey, roles, status, expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ae_id) DO UPDATE SET
                pubkey = excluded.pubkey,
                roles = excluded.roles,
                status = excluded.status,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.ae_id.as_str())
        .bind(&record.public_key)
        .bind(&roles_json)
        .bind(record.state.as_str())
        .bind(record.expires_at.map(|t| t.to_rfc3339()))
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        // Audit before commit: the row change is durable only together with
        // its audit line.
        self.audit
            .append(
                &AuditRecord::accepted(record.ae_id.to_string(), AuditAction::KeyringUpsert)
                    .with_reason(format!("state={}", record.state)),
            )
            .await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        info!(ae_id = %record.ae_id, state = %record.state, "keyring upsert");
        Ok(record)
    }

    async fn get(&self, ae_id: &ExpertId) -> Result<Option<KeyringRecord>, StoreError> {
        self.fetch(ae_id).await
    }

    async fn set_state(
        &self,
        ae_id: &ExpertId,
        state: TrustState,
        actor: &str,
        privileged: bool,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let record = self
            .fetch(ae_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("AE '{ae_id}'")))?;

        if !record.state.can_transition(state, privileged) {
            return Err(StoreError::Conflict(format!(
                "illegal trust transition {} -> {} for '{ae_id}'",
                record.state, state
            )));
        }

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query("UPDATE ae_keyring SET status = ?, updated_at = ? WHERE ae_id = ?")
            .bind(state.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(ae_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        self.audit
            .append(
                &AuditRecord::accepted(actor, AuditAction::KeyringStateChange)
                    .with_subject(ae_id.to_string())
                    .with_reason(format!("{} -> {}", record.state, state)),
            )
            .await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        info!(ae_id = %ae_id, from = %record.state, to = %state, "keyring state change");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<KeyringRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT ae_id, pubkey, roles, status, expires_at, created_at, updated_at \
             FROM ae_keyring ORDER BY ae_id ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (tempfile::TempDir, SqliteKeyring) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(&dir.path().join("state.db")).await.unwrap();
        let audit = Arc::new(AuditLog::open(&dir.path().join("audit.log")).await.unwrap());
        (dir, SqliteKeyring::new(db, audit))
    }

    fn upsert_for(ae_id: &str, key_byte: u8) -> KeyringUpsert {
        KeyringUpsert {
            ae_id: ExpertId::new(ae_id),
            public_key: vec![key_byte; 32],
            roles: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn new_record_starts_untrusted() {
        let (_dir, keyring) = setup().await;
        let rec = keyring.upsert(upsert_for("fusion-ae", 1), false).await.unwrap();
        assert_eq!(rec.state, TrustState::Untrusted);
        assert!(rec.roles.contains("producer"));
    }

    #[tokio::test]
    async fn upsert_preserves_trust_state() {
        let (_dir, keyring) = setup().await;
        let ae = ExpertId::new("fusion-ae");
        keyring.upsert(upsert_for("fusion-ae", 1), false).await.unwrap();
        keyring
            .set_state(&ae, TrustState::Trusted, "system", false)
            .await
            .unwrap();

        // Same key, new roles: state survives.
        let mut entry = upsert_for("fusion-ae", 1);
        entry.roles = Some(["producer".to_string(), "admin".to_string()].into_iter().collect());
        let rec = keyring.upsert(entry, false).await.unwrap();
        assert_eq!(rec.state, TrustState::Trusted);
        assert!(rec.roles.contains("admin"));
    }

    #[tokio::test]
    async fn unprivileged_key_replacement_on_trusted_record_conflicts() {
        let (_dir, keyring) = setup().await;
        let ae = ExpertId::new("fusion-ae");
        keyring.upsert(upsert_for("fusion-ae", 1), false).await.unwrap();
        keyring
            .set_state(&ae, TrustState::Trusted, "system", false)
            .await
            .unwrap();

        let err = keyring.upsert(upsert_for("fusion-ae", 2), false).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Privileged replacement succeeds but demotes to untrusted.
        let rec = keyring.upsert(upsert_for("fusion-ae", 2), true).await.unwrap();
        assert_eq!(rec.state, TrustState::Untrusted);
    }

    #[tokio::test]
    async fn revocation_requires_privilege_and_is_terminal() {
        let (_dir, keyring) = setup().await;
        let ae = ExpertId::new("fusion-ae");
        keyring.upsert(upsert_for("fusion-ae", 1), false).await.unwrap();

        let err = keyring
            .set_state(&ae, TrustState::Revoked, "rogue", false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        keyring
            .set_state(&ae, TrustState::Revoked, "operator", true)
            .await
            .unwrap();

        let err = keyring
            .set_state(&ae, TrustState::Trusted, "operator", true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = keyring.upsert(upsert_for("fusion-ae", 3), true).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_returns_all_records_sorted() {
        let (_dir, keyring) = setup().await;
        keyring.upsert(upsert_for("b-ae", 1), false).await.unwrap();
        keyring.upsert(upsert_for("a-ae", 2), false).await.unwrap();

        let all = keyring.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].ae_id.as_str(), "a-ae");
        assert_eq!(all[1].ae_id.as_str(), "b-ae");
    }
}
