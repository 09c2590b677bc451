// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # HTTP Surface (BC-14)
//!
//! Axum router exposing the gateway's public surface: admission
//! (`/register`, `/verify`), the verified emit path (`/emit`), capability
//! declaration (`/ae/capabilities`), heartbeats, long-lived SSE subscriber
//! streams (`/subscribe/{topic}`), and the admin/audit surfaces.
//!
//! The handlers stay thin: every decision lives in the application layer;
//! this module only extracts bearer tokens, shapes JSON, and maps the
//! error taxonomy onto stable status codes.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::application::{AdmissionService, CapabilityService, EmissionService};
use crate::domain::audit::{AuditAction, AuditRecord};
use crate::domain::error::GatewayError;
use crate::domain::expert::{ExpertId, RoleSet, TrustState, ADMIN_ROLE};
use crate::domain::policy::{PolicyDenial, PolicyEngine};
use crate::domain::repository::{KeyringStore, KeyringUpsert};
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::runtime_registry::RuntimeRegistry;

pub struct AppState {
    pub admission: Arc<AdmissionService>,
    pub emission: Arc<EmissionService>,
    pub capabilities: Arc<CapabilityService>,
    pub policy: Arc<PolicyEngine>,
    pub keyring: Arc<dyn KeyringStore>,
    pub bus: EventBus,
    pub audit: Arc<AuditLog>,
    pub runtime: Arc<RuntimeRegistry>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/verify", post(verify))
        .route("/emit", post(emit))
        .route("/capabilities", post(declare_capabilities))
        .route("/ae/capabilities", post(declare_capabilities))
        .route("/ae/heartbeat", post(heartbeat))
        .route("/subscribe/:topic", get(subscribe_topic))
        .route("/admin/keys", get(admin_list_keys))
        .route("/admin/keys/add", post(admin_add_key))
        .route("/admin/keys/revoke", post(admin_revoke_key))
        .route("/admin/runtime", get(admin_runtime))
        .route("/audit/recent", get(audit_recent))
        .route("/healthz", get(healthz))
        .with_state(state)
}

// ============================================================================
// Error mapping
// ============================================================================

pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::Unauthenticated(_)
            | GatewayError::NotTrusted(_)
            | GatewayError::BadSignature(_) => StatusCode::UNAUTHORIZED,
            GatewayError::UnknownSubject(_)
            | GatewayError::NotAuthorized(_)
            | GatewayError::SubjectMismatch { .. } => StatusCode::FORBIDDEN,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self.0 {
            // Never leak internals to the caller.
            GatewayError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

// ============================================================================
// Admission
// ============================================================================

#[derive(Deserialize)]
struct RegisterRequest {
    ae_id: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    let ae_id = ExpertId::new(req.ae_id);
    let nonce = state.admission.issue_challenge(&ae_id).await?;
    Ok(Json(json!({ "ae_id": ae_id, "nonce": nonce })))
}

#[derive(Deserialize)]
struct VerifyRequest {
    ae_id: String,
    signed_nonce: String,
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<Value>, ApiError> {
    let ae_id = ExpertId::new(req.ae_id);
    let grant = state
        .admission
        .verify_challenge(&ae_id, &req.signed_nonce)
        .await?;
    Ok(Json(json!({
        "ae_id": ae_id,
        "verified": true,
        "grant": grant.token,
        "expires_in": grant.expires_in_secs,
    })))
}

// ============================================================================
// Verified emit
// ============================================================================

async fn emit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    // Malformed JSON flows through the pipeline as a schema violation, so
    // it is audited like every other denial — and only after the grant
    // checks, preserving the canonical stage order.
    let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let receipt = state.emission.emit(bearer_token(&headers), value).await?;
    Ok(Json(json!({
        "status": receipt.status,
        "subject": receipt.subject,
        "delivered": receipt.delivered,
    })))
}

// ============================================================================
// Capabilities + heartbeat
// ============================================================================

#[derive(Deserialize)]
struct CapabilityRequest {
    #[serde(default)]
    publishes: Vec<String>,
    #[serde(default)]
    subscribes: Vec<String>,
    #[serde(default)]
    meta: Value,
}

async fn declare_capabilities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CapabilityRequest>,
) -> Result<Json<Value>, ApiError> {
    let expert = state.admission.authenticate(bearer_token(&headers)).await?;
    let decl = state
        .capabilities
        .declare(
            &expert,
            req.publishes.into_iter().collect(),
            req.subscribes.into_iter().collect(),
            req.meta,
        )
        .await?;
    Ok(Json(json!({
        "status": "ok",
        "ae_id": expert.id,
        "capability": decl,
    })))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let expert = state.admission.authenticate(bearer_token(&headers)).await?;
    state.runtime.touch(&expert.id, "heartbeat");
    Ok(Json(json!({ "ok": true, "ae_id": expert.id })))
}

// ============================================================================
// SSE bridge
// ============================================================================

async fn subscribe_topic(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Admission checks in order: grant valid, subject trusted, policy.
    let expert = match state.admission.authenticate(bearer_token(&headers)).await {
        Ok(e) => e,
        Err(e) => {
            state
                .audit
                .append(
                    &AuditRecord::denied("unknown", AuditAction::SubscribeDenied, e.audit_reason())
                        .with_subject(topic.clone()),
                )
                .await
                .map_err(GatewayError::from)?;
            return Err(e.into());
        }
    };

    if let Err(denial) = state
        .policy
        .current()
        .can_subscribe(&expert.id, &topic, &expert.roles)
    {
        let err = match denial {
            PolicyDenial::UnknownSubject(s) => GatewayError::UnknownSubject(s),
            other => GatewayError::NotAuthorized(other.to_string()),
        };
        state
            .audit
            .append(
                &AuditRecord::denied(
                    expert.id.to_string(),
                    AuditAction::SubscribeDenied,
                    err.audit_reason(),
                )
                .with_subject(topic.clone()),
            )
            .await
            .map_err(GatewayError::from)?;
        return Err(err.into());
    }

    state
        .audit
        .append(
            &AuditRecord::accepted(expert.id.to_string(), AuditAction::SubscribeOpened)
                .with_subject(topic.clone()),
        )
        .await
        .map_err(GatewayError::from)?;

    info!(ae_id = %expert.id, topic = %topic, "SSE subscriber admitted");

    // The subscription handle lives inside the stream; client disconnect
    // drops the stream, which drops the handle and releases the bus slot.
    let subscription = state.bus.subscribe(&topic);
    let stream = futures::stream::unfold(subscription, |mut sub| async move {
        let envelope = sub.recv().await?;
        let event = Event::default()
            .event(envelope.subject.clone())
            .data(serde_json::to_string(envelope.as_ref()).unwrap_or_default());
        Some((Ok::<_, Infallible>(event), sub))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

// ============================================================================
// Admin + audit surfaces
// ============================================================================

fn require_admin(expert: &crate::application::AuthenticatedExpert) -> Result<(), GatewayError> {
    if expert.roles.contains(ADMIN_ROLE) {
        Ok(())
    } else {
        Err(GatewayError::NotAuthorized(format!(
            "'{}' lacks the {ADMIN_ROLE} role",
            expert.id
        )))
    }
}

async fn admin_list_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let expert = state.admission.authenticate(bearer_token(&headers)).await?;
    require_admin(&expert)?;
    let keys = state.keyring.list().await.map_err(GatewayError::from)?;
    Ok(Json(json!({ "keys": keys })))
}

#[derive(Deserialize)]
struct AddKeyRequest {
    ae_id: String,
    /// Base64 of the raw 32-byte Ed25519 public key.
    pubkey: String,
    roles: Option<Vec<String>>,
    expires_at: Option<DateTime<Utc>>,
}

async fn admin_add_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AddKeyRequest>,
) -> Result<Json<Value>, ApiError> {
    let expert = state.admission.authenticate(bearer_token(&headers)).await?;
    require_admin(&expert)?;

    use base64::Engine as _;
    let public_key = base64::engine::general_purpose::STANDARD
        .decode(&req.pubkey)
        .map_err(|e| GatewayError::BadRequest(format!("invalid pubkey base64: {e}")))?;
    if public_key.len() != 32 {
        return Err(GatewayError::BadRequest(format!(
            "pubkey must be 32 bytes, got {}",
            public_key.len()
        ))
        .into());
    }

    let record = state
        .keyring
        .upsert(
            KeyringUpsert {
                ae_id: ExpertId::new(req.ae_id),
                public_key,
                roles: req.roles.map(|r| r.into_iter().collect::<RoleSet>()),
                expires_at: req.expires_at,
            },
            true,
        )
        .await
        .map_err(GatewayError::from)?;

    Ok(Json(json!({ "status": "added", "record": record })))
}

#[derive(Deserialize)]
struct RevokeRequest {
    ae_id: String,
}

async fn admin_revoke_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RevokeRequest>,
) -> Result<Json<Value>, ApiError> {
    let expert = state.admission.authenticate(bearer_token(&headers)).await?;
    require_admin(&expert)?;

    let ae_id = ExpertId::new(req.ae_id);
    state
        .keyring
        .set_state(&ae_id, TrustState::Revoked, expert.id.as_str(), true)
        .await
        .map_err(GatewayError::from)?;

    // Cascade: the revoked AE's declared subjects stop resolving now.
    state.capabilities.remove_for(&ae_id).await?;

    info!(ae_id = %ae_id, by = %expert.id, "AE revoked");
    Ok(Json(json!({ "status": "revoked", "ae_id": ae_id })))
}

async fn admin_runtime(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let expert = state.admission.authenticate(bearer_token(&headers)).await?;
    require_admin(&expert)?;
    state.runtime.sweep();
    Ok(Json(json!({ "agents": state.runtime.snapshot() })))
}

#[derive(Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

async fn audit_recent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<Response, ApiError> {
    let expert = state.admission.authenticate(bearer_token(&headers)).await?;
    require_admin(&expert)?;

    let lines = state
        .audit
        .recent(query.limit.unwrap_or(100))
        .await
        .map_err(GatewayError::from)?;
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response())
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
