// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Nonce Cache
//!
//! Short-lived admission challenges, one outstanding per AE. Purely
//! in-memory: a restart invalidates outstanding challenges, which is
//! acceptable because the TTL is short and clients simply re-register.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::domain::expert::ExpertId;

pub const NONCE_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NonceError {
    #[error("no outstanding challenge")]
    Missing,
    #[error("challenge expired")]
    Expired,
    #[error("challenge mismatch")]
    Mismatch,
}

struct Entry {
    value: [u8; NONCE_LEN],
    issued_at: Instant,
}

pub struct NonceCache {
    ttl: Duration,
    entries: Mutex<HashMap<ExpertId, Entry>>,
}

impl NonceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh challenge, invalidating any prior one for this AE.
    pub fn issue(&self, ae_id: &ExpertId) -> [u8; NONCE_LEN] {
        let mut value = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut value);
        self.entries.lock().insert(
            ae_id.clone(),
            Entry {
                value,
                issued_at: Instant::now(),
            },
        );
        value
    }

    /// Read the outstanding challenge without consuming it. An expired
    /// entry is removed and reported as such.
    pub fn peek(&self, ae_id: &ExpertId) -> Result<[u8; NONCE_LEN], NonceError> {
        let mut entries = self.entries.lock();
        match entries.get(ae_id) {
            None => Err(NonceError::Missing),
            Some(entry) if entry.issued_at.elapsed() > self.ttl => {
                entries.remove(ae_id);
                Err(NonceError::Expired)
            }
            Some(entry) => Ok(entry.value),
        }
    }

    /// Remove the entry iff `value` matches and the entry is unexpired.
    pub fn consume(&self, ae_id: &ExpertId, value: &[u8]) -> Result<(), NonceError> {
        let mut entries = self.entries.lock();
        match entries.get(ae_id) {
            None => Err(NonceError::Missing),
            Some(entry) if entry.issued_at.elapsed() > self.ttl => {
                entries.remove(ae_id);
                Err(NonceError::Expired)
            }
            Some(entry) if entry.value != value => Err(NonceError::Mismatch),
            Some(_) => {
                entries.remove(ae_id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_replaces_outstanding_challenge() {
        let cache = NonceCache::new(Duration::from_secs(120));
        let ae = ExpertId::new("fusion-ae");

        let first = cache.issue(&ae);
        let second = cache.issue(&ae);
        assert_ne!(first, second);

        // Only the latest challenge is consumable.
        assert_eq!(cache.consume(&ae, &first), Err(NonceError::Mismatch));
        assert_eq!(cache.consume(&ae, &second), Ok(()));
    }

    #[test]
    fn consume_is_one_shot() {
        let cache = NonceCache::new(Duration::from_secs(120));
        let ae = ExpertId::new("fusion-ae");
        let nonce = cache.issue(&ae);

        assert_eq!(cache.consume(&ae, &nonce), Ok(()));
        assert_eq!(cache.consume(&ae, &nonce), Err(NonceError::Missing));
    }

    #[test]
    fn elapsed_ttl_expires_challenge() {
        let cache = NonceCache::new(Duration::from_millis(0));
        let ae = ExpertId::new("fusion-ae");
        let nonce = cache.issue(&ae);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.consume(&ae, &nonce), Err(NonceError::Expired));
        // The expired entry is gone, not retryable.
        assert_eq!(cache.consume(&ae, &nonce), Err(NonceError::Missing));
    }

    #[test]
    fn mismatch_leaves_entry_in_place() {
        let cache = NonceCache::new(Duration::from_secs(120));
        let ae = ExpertId::new("fusion-ae");
        let nonce = cache.issue(&ae);

        assert_eq!(cache.consume(&ae, &[0u8; 32]), Err(NonceError::Mismatch));
        assert_eq!(cache.consume(&ae, &nonce), Ok(()));
    }
}
