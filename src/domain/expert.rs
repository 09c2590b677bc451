// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Atomic Expert Identity (BC-14)
//!
//! Domain types for the principals admitted through the gateway: Atomic
//! Experts (AEs). An AE is identified by its `ExpertId`, carries a set of
//! functional role tags, and is represented in the keyring by a
//! [`KeyringRecord`] holding its Ed25519 public key and trust state.
//!
//! ## Trust State Machine
//!
//! ```text
//! untrusted ──(successful admission)──▶ trusted
//!     │                                   │
//!     └───────(operator revoke)───────────┴──▶ revoked   (terminal)
//! ```
//!
//! Transitions are monotonic: the only downward transition is an
//! operator-issued revocation, and `revoked` is terminal. A record that is
//! revoked, or whose expiry instant has elapsed, must never be used for
//! signature verification or policy decisions.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique principal identifier for an Atomic Expert.
///
/// Used as the session grant subject and as the audit actor key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpertId(String);

impl ExpertId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExpertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExpertId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unordered set of functional role tags (e.g. `producer`, `subscriber`,
/// `admin`). Stored sorted for deterministic serialization.
pub type RoleSet = BTreeSet<String>;

/// Role tag that gates the `/admin/*` and `/audit/*` surfaces.
pub const ADMIN_ROLE: &str = "admin";

/// Trust state of a keyring record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    Untrusted,
    Trusted,
    Revoked,
}

impl TrustState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Untrusted => "untrusted",
            Self::Trusted => "trusted",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "untrusted" => Some(Self::Untrusted),
            "trusted" => Some(Self::Trusted),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    /// Whether a transition from `self` to `to` is permitted.
    ///
    /// Monotonic upward transitions are always allowed; revocation requires
    /// an operator (`privileged`); `revoked` is terminal for everyone.
    pub fn can_transition(&self, to: TrustState, privileged: bool) -> bool {
        match (self, to) {
            (Self::Revoked, _) => false,
            (_, Self::Revoked) => privileged,
            (Self::Untrusted, Self::Trusted) => true,
            (Self::Trusted, Self::Untrusted) => privileged,
            (a, b) => *a == b,
        }
    }
}

impl std::fmt::Display for TrustState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One keyring row: the persistent identity and trust record of an AE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyringRecord {
    pub ae_id: ExpertId,

    /// Raw 32-byte Ed25519 public key.
    #[serde(with = "pubkey_b64")]
    pub public_key: Vec<u8>,

    pub roles: RoleSet,
    pub state: TrustState,

    /// Optional hard expiry; an elapsed expiry makes the record unusable
    /// regardless of state.
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KeyringRecord {
    /// A record is usable for verification iff it is trusted and unexpired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.state == TrustState::Trusted && !self.is_expired(now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }
}

/// Serialize the raw public key as base64 for wire/JSON representations.
mod pubkey_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_transitions_are_monotonic() {
        assert!(TrustState::Untrusted.can_transition(TrustState::Trusted, false));
        assert!(!TrustState::Trusted.can_transition(TrustState::Untrusted, false));
        assert!(TrustState::Trusted.can_transition(TrustState::Untrusted, true));
        assert!(!TrustState::Untrusted.can_transition(TrustState::Revoked, false));
        assert!(TrustState::Trusted.can_transition(TrustState::Revoked, true));
    }

    #[test]
    fn revoked_is_terminal() {
        assert!(!TrustState::Revoked.can_transition(TrustState::Trusted, true));
        assert!(!TrustState::Revoked.can_transition(TrustState::Untrusted, true));
        assert!(!TrustState::Revoked.can_transition(TrustState::Revoked, true));
    }

    #[test]
    fn expired_record_is_unusable() {
        let now = Utc::now();
        let rec = KeyringRecord {
            ae_id: ExpertId::new("fusion-ae"),
            public_key: vec![0u8; 32],
            roles: RoleSet::new(),
            state: TrustState::Trusted,
            expires_at: Some(now - chrono::Duration::seconds(1)),
            created_at: now,
            updated_at: now,
        };
        assert!(!rec.is_usable(now));

        let live = KeyringRecord {
            expires_at: Some(now + chrono::Duration::hours(1)),
            ..rec
        };
        assert!(live.is_usable(now));
    }
}
