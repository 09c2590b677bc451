// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway configuration, assembled from environment variables.
//!
//! `AEGIS_GATEWAY_SECRET` is the one required value: it signs every session
//! grant, and starting without it would silently issue forgeable grants, so
//! its absence is fatal. Everything else has a sensible default.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::domain::session::{SessionProfile, DEFAULT_PROFILE};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HMAC key for session grants. Required.
    pub secret: String,

    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    pub policy_path: PathBuf,
    pub audit_path: PathBuf,

    pub nonce_ttl_secs: u64,
    pub policy_poll_interval_secs: u64,
    pub bus_queue_capacity: usize,

    /// Profile assigned to grants issued by admission.
    pub default_profile: String,
    pub profiles: HashMap<String, SessionProfile>,

    /// Liveness thresholds for the runtime registry.
    pub stale_after_secs: u64,
    pub dead_after_secs: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("AEGIS_GATEWAY_SECRET")
            .context("AEGIS_GATEWAY_SECRET must be set: it signs session grants")?;

        let bind_addr = env_or("AEGIS_GATEWAY_ADDR", "127.0.0.1:8080")
            .parse()
            .context("AEGIS_GATEWAY_ADDR must be a socket address")?;

        Ok(Self {
            secret,
            bind_addr,
            db_path: PathBuf::from(env_or("AEGIS_GATEWAY_DB", "db/gateway_state.db")),
            policy_path: PathBuf::from(env_or("AEGIS_GATEWAY_POLICY", "config/policy.yaml")),
            audit_path: PathBuf::from(env_or("AEGIS_GATEWAY_AUDIT", "logs/gateway_audit.log")),
            nonce_ttl_secs: env_parsed("AEGIS_GATEWAY_NONCE_TTL_SECS", 120)?,
            policy_poll_interval_secs: env_parsed("AEGIS_GATEWAY_POLICY_POLL_SECS", 1)?,
            bus_queue_capacity: env_parsed("AEGIS_GATEWAY_BUS_CAPACITY", 256)?,
            default_profile: DEFAULT_PROFILE.to_string(),
            profiles: default_profiles(),
            stale_after_secs: env_parsed("AEGIS_GATEWAY_STALE_AFTER_SECS", 30)?,
            dead_after_secs: env_parsed("AEGIS_GATEWAY_DEAD_AFTER_SECS", 120)?,
        })
    }
}

/// Baseline profile table. `default` covers interactive AEs; long-running
/// daemons get a day-long grant and a generous idle window.
pub fn default_profiles() -> HashMap<String, SessionProfile> {
    let mut profiles = HashMap::new();
    profiles.insert(
        DEFAULT_PROFILE.to_string(),
        SessionProfile {
            session_ttl_secs: 900,
            max_idle_secs: 600,
        },
    );
    profiles.insert(
        "backend-daemon".to_string(),
        SessionProfile {
            session_ttl_secs: 24 * 3600,
            max_idle_secs: 24 * 3600,
        },
    );
    profiles
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {key}")),
        Err(_) => Ok(default),
    }
}
