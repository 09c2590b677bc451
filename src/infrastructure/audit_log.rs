// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Append-Only Audit Log (BC-14)
//!
//! Non-repudiable JSONL stream of admission, keyring, policy, and emission
//! events. One serialized [`AuditRecord`] per line, canonical key order
//! (the struct's declaration order), appended under a single writer lock
//! and fsynced before the caller is acknowledged — a crash loses at most
//! the in-flight record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::audit::AuditRecord;
use crate::domain::repository::StoreError;

pub struct AuditLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl AuditLog {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating audit log directory {dir:?}"))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("opening audit log {path:?}"))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Append one record and make it durable before returning.
    ///
    /// A failure here must refuse the surrounding state change, so the error
    /// surfaces as a store error rather than being swallowed.
    pub async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::Database(format!("audit append: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| StoreError::Database(format!("audit flush: {e}")))?;
        writer
            .get_ref()
            .sync_data()
            .await
            .map_err(|e| StoreError::Database(format!("audit fsync: {e}")))?;

        debug!(action = ?record.action, actor = %record.actor, "audit record appended");
        Ok(())
    }

    /// Tail the last `limit` JSONL lines, oldest first. Serves `/audit/recent`.
    pub async fn recent(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        // Hold the writer lock so a concurrent append is not observed torn.
        let _writer = self.writer.lock().await;
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Database(format!("audit read: {e}"))),
        };
        let lines: Vec<&str> = contents.lines().filter(|l| !l.is_empty()).collect();
        let start = lines.len().saturating_sub(limit);
        Ok(lines[start..].iter().map(|l| l.to_string()).collect())
    }
}
