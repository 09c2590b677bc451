// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway service entrypoint: configuration, store wiring, background
//! tasks (policy watcher, liveness sweeper), and the HTTP listener.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use aegis_gateway::application::{
    AdmissionService, CapabilityService, EmissionService, PolicyCoordinator,
};
use aegis_gateway::config::GatewayConfig;
use aegis_gateway::domain::policy::PolicyEngine;
use aegis_gateway::domain::repository::{CapabilityStore, KeyringStore};
use aegis_gateway::infrastructure::audit_log::AuditLog;
use aegis_gateway::infrastructure::capability_store::SqliteCapabilityStore;
use aegis_gateway::infrastructure::db::Database;
use aegis_gateway::infrastructure::event_bus::EventBus;
use aegis_gateway::infrastructure::keyring::SqliteKeyring;
use aegis_gateway::infrastructure::nonce_cache::NonceCache;
use aegis_gateway::infrastructure::runtime_registry::RuntimeRegistry;
use aegis_gateway::infrastructure::token::SessionTokenService;
use aegis_gateway::presentation::{app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    info!(addr = %config.bind_addr, db = ?config.db_path, "starting AEGIS gateway");

    let db = Database::connect(&config.db_path).await?;
    let audit = Arc::new(AuditLog::open(&config.audit_path).await?);

    let keyring: Arc<dyn KeyringStore> =
        Arc::new(SqliteKeyring::new(db.clone(), Arc::clone(&audit)));
    let capability_store: Arc<dyn CapabilityStore> =
        Arc::new(SqliteCapabilityStore::new(db.clone()));

    let nonces = Arc::new(NonceCache::new(Duration::from_secs(config.nonce_ttl_secs)));
    let tokens = Arc::new(SessionTokenService::new(
        &config.secret,
        config.profiles.clone(),
    ));
    let policy = Arc::new(PolicyEngine::new());
    let bus = EventBus::new(config.bus_queue_capacity);
    let runtime = Arc::new(RuntimeRegistry::new(
        config.stale_after_secs,
        config.dead_after_secs,
    ));

    let coordinator = Arc::new(PolicyCoordinator::new(
        Arc::clone(&policy),
        Arc::clone(&capability_store),
        Arc::clone(&audit),
        config.policy_path.clone(),
    ));
    coordinator
        .load_initial()
        .await
        .map_err(|e| anyhow::anyhow!("initial policy load: {e}"))?;
    Arc::clone(&coordinator).spawn_watcher(config.policy_poll_interval_secs);

    // Liveness sweeper.
    {
        let runtime = Arc::clone(&runtime);
        let every = Duration::from_secs(config.stale_after_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                runtime.sweep();
            }
        });
    }

    let admission = Arc::new(AdmissionService::new(
        Arc::clone(&keyring),
        nonces,
        Arc::clone(&tokens),
        Arc::clone(&audit),
        config.default_profile.clone(),
    ));
    let emission = Arc::new(EmissionService::new(
        Arc::clone(&tokens),
        Arc::clone(&keyring),
        Arc::clone(&policy),
        bus.clone(),
        Arc::clone(&audit),
        Arc::clone(&runtime),
    ));
    let capabilities = Arc::new(CapabilityService::new(
        Arc::clone(&capability_store),
        Arc::clone(&coordinator),
        Arc::clone(&audit),
        Arc::clone(&runtime),
    ));

    let state = Arc::new(AppState {
        admission,
        emission,
        capabilities,
        policy,
        keyring,
        bus,
        audit,
        runtime,
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "gateway listening");

    axum::serve(listener, app(state))
        .await
        .context("http server terminated")?;
    Ok(())
}
