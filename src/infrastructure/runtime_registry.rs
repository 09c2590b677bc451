// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AE liveness tracking.
//!
//! Every authenticated interaction (emit, capability declaration,
//! heartbeat) touches the registry; a background sweep demotes silent AEs
//! from live to stale to dead. Purely observational — liveness never gates
//! a policy decision.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::expert::ExpertId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Live,
    Stale,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEntry {
    pub ae_id: ExpertId,
    pub state: Liveness,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// What produced the last touch: "emit", "capabilities", "heartbeat".
    pub last_source: String,
}

pub struct RuntimeRegistry {
    stale_after: Duration,
    dead_after: Duration,
    entries: Mutex<HashMap<ExpertId, RuntimeEntry>>,
}

impl RuntimeRegistry {
    /// `dead_after` must exceed `stale_after`.
    pub fn new(stale_after_secs: u64, dead_after_secs: u64) -> Self {
        debug_assert!(dead_after_secs > stale_after_secs);
        Self {
            stale_after: Duration::seconds(stale_after_secs as i64),
            dead_after: Duration::seconds(dead_after_secs as i64),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn touch(&self, ae_id: &ExpertId, source: &str) {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        entries
            .entry(ae_id.clone())
            .and_modify(|e| {
                e.state = Liveness::Live;
                e.last_seen = now;
                e.last_source = source.to_string();
            })
            .or_insert_with(|| RuntimeEntry {
                ae_id: ae_id.clone(),
                state: Liveness::Live,
                first_seen: now,
                last_seen: now,
                last_source: source.to_string(),
            });
    }

    /// Reclassify entries by idle time. Called by the background sweeper.
    pub fn sweep(&self) {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        for entry in entries.values_mut() {
            let idle = now - entry.last_seen;
            entry.state = if idle >= self.dead_after {
                Liveness::Dead
            } else if idle >= self.stale_after {
                Liveness::Stale
            } else {
                Liveness::Live
            };
        }
    }

    pub fn snapshot(&self) -> Vec<RuntimeEntry> {
        let mut out: Vec<RuntimeEntry> = self.entries.lock().values().cloned().collect();
        out.sort_by(|a, b| a.ae_id.cmp(&b.ae_id));
        out
    }

    pub fn remove(&self, ae_id: &ExpertId) {
        self.entries.lock().remove(ae_id);
    }
}
