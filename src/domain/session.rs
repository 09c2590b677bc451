// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session grant claims and behavior profiles.

use serde::{Deserialize, Serialize};

use crate::domain::expert::RoleSet;

/// JWT claim set carried by a session grant.
///
/// `roles` here reflect the keyring at issue time. They are informational:
/// at decision time the authoritative role set is always re-read from the
/// keyring, so a grant issued under stale roles cannot widen access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub roles: Vec<String>,
    pub profile: String,
}

impl SessionClaims {
    pub fn role_set(&self) -> RoleSet {
        self.roles.iter().cloned().collect()
    }
}

/// A named session-behavior ruleset. Profiles are opaque names resolved
/// from configuration; an unknown profile is an error, never a silent
/// default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProfile {
    /// Grant lifetime in seconds.
    pub session_ttl_secs: u64,
    /// Idle threshold used by the runtime registry to mark an AE stale.
    pub max_idle_secs: u64,
}

pub const DEFAULT_PROFILE: &str = "default";
