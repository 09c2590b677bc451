// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared harness for the end-to-end gateway tests: a fully wired router
//! backed by scratch storage, exercised through `tower::ServiceExt`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use http_body_util::BodyExt;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use tower::ServiceExt;

use aegis_gateway::application::{
    AdmissionService, CapabilityService, EmissionService, PolicyCoordinator,
};
use aegis_gateway::config::default_profiles;
use aegis_gateway::domain::envelope::Envelope;
use aegis_gateway::domain::expert::{ExpertId, RoleSet};
use aegis_gateway::domain::policy::PolicyEngine;
use aegis_gateway::domain::repository::{CapabilityStore, KeyringStore, KeyringUpsert};
use aegis_gateway::domain::session::DEFAULT_PROFILE;
use aegis_gateway::infrastructure::audit_log::AuditLog;
use aegis_gateway::infrastructure::capability_store::SqliteCapabilityStore;
use aegis_gateway::infrastructure::db::Database;
use aegis_gateway::infrastructure::event_bus::EventBus;
use aegis_gateway::infrastructure::keyring::SqliteKeyring;
use aegis_gateway::infrastructure::nonce_cache::NonceCache;
use aegis_gateway::infrastructure::runtime_registry::RuntimeRegistry;
use aegis_gateway::infrastructure::signature::sign_detached;
use aegis_gateway::infrastructure::token::SessionTokenService;
use aegis_gateway::presentation::{app, AppState};

pub const TEST_SECRET: &str = "test-secret";

pub struct TestGateway {
    pub router: Router,
    pub state: Arc<AppState>,
    pub tokens: Arc<SessionTokenService>,
    _dir: tempfile::TempDir,
}

pub async fn gateway(policy_yaml: &str) -> TestGateway {
    let dir = tempfile::tempdir().unwrap();
    let policy_path = dir.path().join("policy.yaml");
    std::fs::write(&policy_path, policy_yaml).unwrap();

    let db = Database::connect(&dir.path().join("state.db")).await.unwrap();
    let audit = Arc::new(AuditLog::open(&dir.path().join("audit.log")).await.unwrap());

    let keyring: Arc<dyn KeyringStore> =
        Arc::new(SqliteKeyring::new(db.clone(), Arc::clone(&audit)));
    let capability_store: Arc<dyn CapabilityStore> =
        Arc::new(SqliteCapabilityStore::new(db.clone()));

    let nonces = Arc::new(NonceCache::new(Duration::from_secs(120)));
    let tokens = Arc::new(SessionTokenService::new(TEST_SECRET, default_profiles()));
    let policy = Arc::new(PolicyEngine::new());
    let bus = EventBus::with_default_capacity();
    let runtime = Arc::new(RuntimeRegistry::new(30, 120));

    let coordinator = Arc::new(PolicyCoordinator::new(
        Arc::clone(&policy),
        Arc::clone(&capability_store),
        Arc::clone(&audit),
        policy_path,
    ));
    coordinator.load_initial().await.unwrap();

    let admission = Arc::new(AdmissionService::new(
        Arc::clone(&keyring),
        nonces,
        Arc::clone(&tokens),
        Arc::clone(&audit),
        DEFAULT_PROFILE.to_string(),
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

    TestGateway {
        router: app(Arc::clone(&state)),
        state,
        tokens,
        _dir: dir,
    }
}

impl TestGateway {
    pub async fn post(
        &self,
        path: &str,
        bearer: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn get(&self, path: &str, bearer: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty()).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// Enroll an AE as an operator would: privileged upsert, untrusted
    /// until it completes admission.
    pub async fn enroll(&self, ae_id: &str, roles: &[&str]) -> SigningKey {
        let key = SigningKey::generate(&mut OsRng);
        self.state
            .keyring
            .upsert(
                KeyringUpsert {
                    ae_id: ExpertId::new(ae_id),
                    public_key: key.verifying_key().to_bytes().to_vec(),
                    roles: Some(roles.iter().map(|r| r.to_string()).collect::<RoleSet>()),
                    expires_at: None,
                },
                true,
            )
            .await
            .unwrap();
        key
    }

    /// Run the full admission ceremony and return the session grant.
    pub async fn admit(&self, ae_id: &str, key: &SigningKey) -> String {
        let (status, body) = self
            .post("/register", None, json!({ "ae_id": ae_id }))
            .await;
        assert_eq!(status, StatusCode::OK, "register failed: {body}");
        let nonce = STANDARD
            .decode(body["nonce"].as_str().unwrap())
            .unwrap();

        let signed = sign_detached(key, &nonce);
        let (status, body) = self
            .post(
                "/verify",
                None,
                json!({ "ae_id": ae_id, "signed_nonce": signed }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "verify failed: {body}");
        body["grant"].as_str().unwrap().to_string()
    }

    pub async fn audit_lines(&self) -> Vec<String> {
        self.state.audit.recent(1000).await.unwrap()
    }
}

/// Build a correctly signed envelope for `producer` over `subject`.
pub fn signed_envelope(
    key: &SigningKey,
    producer: &str,
    subject: &str,
    payload: &str,
    labels: &[&str],
) -> Value {
    let mut envelope = Envelope {
        producer: producer.to_string(),
        subject: subject.to_string(),
        payload: payload.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        signature: String::new(),
        extra: BTreeMap::new(),
    };
    envelope.signature = sign_detached(key, &envelope.signing_bytes());
    serde_json::to_value(envelope).unwrap()
}
