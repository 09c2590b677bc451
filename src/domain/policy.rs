// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Effective Policy (BC-14, ADR-042)
//!
//! Pure decision logic for publish/subscribe authorization. Two inputs are
//! merged into an immutable [`PolicySnapshot`]:
//!
//! - **Static policy**: the operator-edited YAML ruleset mapping subjects to
//!   publisher/subscriber membership lists.
//! - **Dynamic capabilities**: per-AE declarations of what the AE intends to
//!   publish and subscribe to, latest declaration superseding prior ones.
//!
//! The effective decision is the UNION of the two: an AE may act on a
//! subject if either the static membership or its own dynamic declaration
//! names it. Subjects absent from both stores deny by default.
//!
//! ## Decision Procedure
//!
//! 1. Subject present in neither store → deny `UnknownSubject`
//! 2. AE listed in the static membership for this subject+direction → allow
//! 3. AE's dynamic declaration names this subject in this direction → allow
//! 4. Otherwise → deny `NotAuthorized`
//!
//! Roles are accepted as input for future role-based rules; the core
//! decision is identity-based. Callers must pass the keyring role set, not
//! the session grant's — the keyring is authoritative.
//!
//! [`PolicyEngine`] publishes snapshots by atomic `Arc` swap: readers clone
//! the current `Arc` and decide against a consistent snapshot; a rebuild is
//! never observable half-applied.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::expert::{ExpertId, RoleSet};

/// One subject's static rule: who may publish, who may subscribe, and the
/// label vocabulary associated with the subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectRule {
    #[serde(default)]
    pub pubs: BTreeSet<String>,
    #[serde(default)]
    pub subs: BTreeSet<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
}

/// The operator-edited ruleset, parsed from the policy YAML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticPolicy {
    #[serde(default)]
    pub subjects: BTreeMap<String, SubjectRule>,

    /// Role attribute bags. Parsed and preserved; not consulted by the core
    /// decision procedure.
    #[serde(default)]
    pub roles: BTreeMap<String, serde_json::Value>,
}

/// A single AE's dynamic capability declaration. The latest declaration for
/// an `ae_id` supersedes any prior one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDecl {
    pub ae_id: ExpertId,
    #[serde(default)]
    pub publishes: BTreeSet<String>,
    #[serde(default)]
    pub subscribes: BTreeSet<String>,
    #[serde(default)]
    pub meta: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Publish,
    Subscribe,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
        }
    }
}

/// Why a decision denied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyDenial {
    #[error("subject '{0}' is not declared in any policy")]
    UnknownSubject(String),

    #[error("'{ae_id}' may not {direction} '{subject}'")]
    NotAuthorized {
        ae_id: String,
        subject: String,
        direction: &'static str,
    },
}

/// Immutable merged view of static policy + dynamic capabilities.
#[derive(Debug, Default)]
pub struct PolicySnapshot {
    static_policy: StaticPolicy,
    dynamic: HashMap<ExpertId, CapabilityDecl>,
    pub version: u64,
    pub built_at: Option<DateTime<Utc>>,
}

impl PolicySnapshot {
    pub fn new(
        static_policy: StaticPolicy,
        capabilities: Vec<CapabilityDecl>,
        version: u64,
    ) -> Self {
        let dynamic = capabilities
            .into_iter()
            .map(|c| (c.ae_id.clone(), c))
            .collect();
        Self {
            static_policy,
            dynamic,
            version,
            built_at: Some(Utc::now()),
        }
    }

    pub fn can_publish(
        &self,
        ae_id: &ExpertId,
        subject: &str,
        roles: &RoleSet,
    ) -> Result<(), PolicyDenial> {
        self.decide(Direction::Publish, ae_id, subject, roles)
    }

    pub fn can_subscribe(
        &self,
        ae_id: &ExpertId,
        subject: &str,
        roles: &RoleSet,
    ) -> Result<(), PolicyDenial> {
        self.decide(Direction::Subscribe, ae_id, subject, roles)
    }

    fn decide(
        &self,
        direction: Direction,
        ae_id: &ExpertId,
        subject: &str,
        _roles: &RoleSet,
    ) -> Result<(), PolicyDenial> {
        // 1. Unknown subject: absent from the static map and from every
        //    dynamic declaration (either direction).
        let known_static = self.static_policy.subjects.contains_key(subject);
        let known_dynamic = self
            .dynamic
            .values()
            .any(|c| c.publishes.contains(subject) || c.subscribes.contains(subject));
        if !known_static && !known_dynamic {
            return Err(PolicyDenial::UnknownSubject(subject.to_string()));
        }

        // 2. Static membership for this subject + direction.
        if let Some(rule) = self.static_policy.subjects.get(subject) {
            let members = match direction {
                Direction::Publish => &rule.pubs,
                Direction::Subscribe => &rule.subs,
            };
            if members.contains(ae_id.as_str()) {
                return Ok(());
            }
        }

        // 3. The AE's own dynamic declaration, matching direction.
        if let Some(decl) = self.dynamic.get(ae_id) {
            let named = match direction {
                Direction::Publish => &decl.publishes,
                Direction::Subscribe => &decl.subscribes,
            };
            if named.contains(subject) {
                return Ok(());
            }
        }

        // 4. Default deny.
        Err(PolicyDenial::NotAuthorized {
            ae_id: ae_id.to_string(),
            subject: subject.to_string(),
            direction: direction.as_str(),
        })
    }

    /// Subjects visible in this snapshot, static and dynamic combined.
    pub fn known_subjects(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> =
            self.static_policy.subjects.keys().cloned().collect();
        for decl in self.dynamic.values() {
            out.extend(decl.publishes.iter().cloned());
            out.extend(decl.subscribes.iter().cloned());
        }
        out
    }
}

/// Publishes [`PolicySnapshot`]s by atomic swap.
///
/// Readers call [`PolicyEngine::current`] and keep the returned `Arc` for
/// the duration of one decision; they never block on a rebuild.
#[derive(Debug)]
pub struct PolicyEngine {
    snapshot: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(PolicySnapshot::default())),
        }
    }

    pub fn current(&self) -> Arc<PolicySnapshot> {
        self.snapshot.read().clone()
    }

    /// Build and install a new snapshot. Version increases monotonically.
    pub fn install(&self, static_policy: StaticPolicy, capabilities: Vec<CapabilityDecl>) {
        let version = self.current().version + 1;
        let next = Arc::new(PolicySnapshot::new(static_policy, capabilities, version));
        *self.snapshot.write() = next;
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}
