// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Connection Pool
//!
//! Wraps `sqlx::SqlitePool` in a thin `Database` newtype injected into the
//! repository implementations. The gateway's whole persisted state (keyring
//! + capabilities) lives in one database file; WAL mode keeps concurrent
//! readers off the single writer's back.

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating database directory {dir:?}"))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("opening state database {path:?}"))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ae_keyring (
                ae_id       TEXT PRIMARY KEY,
                pubkey      BLOB NOT NULL,
                roles       TEXT NOT NULL,
                status      TEXT NOT NULL,
                expires_at  TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating ae_keyring table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ae_capabilities (
                ae_id       TEXT PRIMARY KEY,
                publishes   TEXT NOT NULL,
                subscribes  TEXT NOT NULL,
                meta        TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating ae_capabilities table")?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
