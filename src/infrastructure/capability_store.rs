// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SQLite capability store. One row per AE; `put` replaces the whole
//! declaration, so the latest write always supersedes prior ones.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::domain::expert::ExpertId;
use crate::domain::policy::CapabilityDecl;
use crate::domain::repository::{CapabilityStore, StoreError};
use crate::infrastructure::db::Database;

pub struct SqliteCapabilityStore {
    db: Database,
}

impl SqliteCapabilityStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_decl(row: SqliteRow) -> Result<CapabilityDecl, StoreError> {
    let ae_id: String = row.get("ae_id");
    let publishes: String = row.get("publishes");
    let subscribes: String = row.get("subscribes");
    let meta: String = row.get("meta");
    let updated_at: String = row.get("updated_at");

    Ok(CapabilityDecl {
        ae_id: ExpertId::new(ae_id),
        publishes: serde_json::from_str(&publishes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        subscribes: serde_json::from_str(&subscribes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        meta: serde_json::from_str(&meta)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
    })
}

#[async_trait]
impl CapabilityStore for SqliteCapabilityStore {
    async fn put(&self, decl: &CapabilityDecl) -> Result<(), StoreError> {
        let publishes = serde_json::to_string(&decl.publishes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let subscribes = serde_json::to_string(&decl.subscribes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let meta = serde_json::to_string(&decl.meta)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO ae_capabilities (ae_id, publishes, subscribes, meta, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(ae_id) DO UPDATE SET
                publishes = excluded.publishes,
                subscribes = excluded.subscribes,
                meta = excluded.meta,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(decl.ae_id.as_str())
        .bind(&publishes)
        .bind(&subscribes)
        .bind(&meta)
        .bind(decl.updated_at.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, ae_id: &ExpertId) -> Result<Option<CapabilityDecl>, StoreError> {
        let row = sqlx::query(
            "SELECT ae_id, publishes, subscribes, meta, updated_at \
             FROM ae_capabilities WHERE ae_id = ?",
        )
        .bind(ae_id.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(row_to_decl).transpose()
    }

    async fn list(&self) -> Result<Vec<CapabilityDecl>, StoreError> {
        let rows = sqlx::query(
            "SELECT ae_id, publishes, subscribes, meta, updated_at \
             FROM ae_capabilities ORDER BY ae_id ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_decl).collect()
    }

    async fn remove(&self, ae_id: &ExpertId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM ae_capabilities WHERE ae_id = ?")
            .bind(ae_id.as_str())
            .execute(self.db.pool())
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}
