// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end verified-emit tests: the ten-stage pipeline, policy union
//! semantics, dynamic capability expansion, and the SSE bridge.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use ed25519_dalek::SigningKey;
use http_body_util::BodyExt;
use rand::rngs::OsRng;
use serde_json::json;
use tower::ServiceExt;

use aegis_gateway::domain::expert::{ExpertId, RoleSet};

use common::{gateway, signed_envelope};

const TRACK_POLICY: &str = "subjects:\n  fused.track:\n    pubs: [pub_ae]\n    subs: [sub_ae]\n";

#[tokio::test]
async fn verified_emit_reaches_a_subscriber() {
    let gw = gateway(TRACK_POLICY).await;
    let key = gw.enroll("pub_ae", &["producer"]).await;
    let grant = gw.admit("pub_ae", &key).await;

    let mut subscription = gw.state.bus.subscribe("fused.track");

    let envelope = signed_envelope(&key, "pub_ae", "fused.track", "x", &["cui"]);
    let (status, body) = gw.post("/emit", Some(&grant), envelope).await;
    assert_eq!(status, StatusCode::OK, "emit failed: {body}");
    assert_eq!(body["status"], json!("accepted"));
    assert_eq!(body["subject"], json!("fused.track"));

    let received = subscription.recv().await.unwrap();
    assert_eq!(received.producer, "pub_ae");
    assert_eq!(received.payload, "x");

    // The accepted emit is audited with the envelope digest.
    let audit = gw.audit_lines().await;
    let accepted = audit
        .iter()
        .find(|l| l.contains("emit.accepted"))
        .expect("no emit.accepted audit record");
    assert_eq!(&received.digest_hex(), accepted.split("\"digest\":\"").nth(1).unwrap().split('"').next().unwrap());
}

#[tokio::test]
async fn unknown_subject_is_403() {
    let gw = gateway(TRACK_POLICY).await;
    let key = gw.enroll("pub_ae", &["producer"]).await;
    let grant = gw.admit("pub_ae", &key).await;

    let envelope = signed_envelope(&key, "pub_ae", "nope.subj", "x", &[]);
    let (status, body) = gw.post("/emit", Some(&grant), envelope).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("unknown subject"));

    let audit = gw.audit_lines().await;
    assert!(audit.iter().any(|l| l.contains("unknown_subject")));
}

#[tokio::test]
async fn known_subject_without_membership_is_403_not_authorized() {
    let gw = gateway(TRACK_POLICY).await;
    let key = gw.enroll("other_ae", &["producer"]).await;
    let grant = gw.admit("other_ae", &key).await;

    let envelope = signed_envelope(&key, "other_ae", "fused.track", "x", &[]);
    let (status, body) = gw.post("/emit", Some(&grant), envelope).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("may not publish"));
}

#[tokio::test]
async fn dynamic_capability_expands_the_effective_policy() {
    // No static entry for fusion.topic at all.
    let gw = gateway(TRACK_POLICY).await;
    let key = gw.enroll("pub_ae", &["producer"]).await;
    let grant = gw.admit("pub_ae", &key).await;

    let envelope = signed_envelope(&key, "pub_ae", "fusion.topic", "x", &[]);
    let (status, _) = gw.post("/emit", Some(&grant), envelope.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = gw
        .post(
            "/ae/capabilities",
            Some(&grant),
            json!({ "publishes": ["fusion.topic"], "subscribes": [] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "capability declaration failed: {body}");

    // The write returned, so every subsequent request sees the new policy.
    let (status, body) = gw.post("/emit", Some(&grant), envelope).await;
    assert_eq!(status, StatusCode::OK, "post-declaration emit failed: {body}");
}

#[tokio::test]
async fn repeating_a_capability_declaration_is_idempotent() {
    let gw = gateway(TRACK_POLICY).await;
    let key = gw.enroll("pub_ae", &["producer"]).await;
    let grant = gw.admit("pub_ae", &key).await;

    let body = json!({ "publishes": ["fusion.topic"], "subscribes": ["fused.track"] });
    let (status, _) = gw.post("/ae/capabilities", Some(&grant), body.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let before = gw.state.policy.current();
    let subjects_before = before.known_subjects();

    let (status, _) = gw.post("/ae/capabilities", Some(&grant), body).await;
    assert_eq!(status, StatusCode::OK);

    let after = gw.state.policy.current();
    assert_eq!(subjects_before, after.known_subjects());

    let ae = ExpertId::new("pub_ae");
    let roles = RoleSet::new();
    assert_eq!(
        before.can_publish(&ae, "fusion.topic", &roles).is_ok(),
        after.can_publish(&ae, "fusion.topic", &roles).is_ok(),
    );
    assert_eq!(
        before.can_subscribe(&ae, "fused.track", &roles).is_ok(),
        after.can_subscribe(&ae, "fused.track", &roles).is_ok(),
    );
}

#[tokio::test]
async fn emit_without_bearer_is_401() {
    let gw = gateway(TRACK_POLICY).await;
    let key = gw.enroll("pub_ae", &["producer"]).await;

    let envelope = signed_envelope(&key, "pub_ae", "fused.track", "x", &[]);
    let (status, _) = gw.post("/emit", None, envelope).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn emit_for_a_never_admitted_ae_is_401_not_trusted() {
    let gw = gateway(TRACK_POLICY).await;
    let key = gw.enroll("pub_ae", &["producer"]).await;

    // A syntactically valid grant forged for an AE that never completed
    // admission: the keyring still says untrusted.
    let grant = gw
        .tokens
        .issue(&ExpertId::new("pub_ae"), &RoleSet::new(), "default")
        .unwrap();

    let envelope = signed_envelope(&key, "pub_ae", "fused.track", "x", &[]);
    let (status, body) = gw.post("/emit", Some(&grant.token), envelope).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("not trusted"));
}

#[tokio::test]
async fn producer_must_match_the_grant_subject() {
    let gw = gateway(TRACK_POLICY).await;
    let pub_key = gw.enroll("pub_ae", &["producer"]).await;
    gw.admit("pub_ae", &pub_key).await;

    let rogue_key = gw.enroll("rogue_ae", &["producer"]).await;
    let rogue_grant = gw.admit("rogue_ae", &rogue_key).await;

    // rogue_ae's grant, pub_ae's envelope.
    let envelope = signed_envelope(&pub_key, "pub_ae", "fused.track", "x", &[]);
    let (status, body) = gw.post("/emit", Some(&rogue_grant), envelope).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("does not match"));
}

#[tokio::test]
async fn tampered_envelope_fails_signature_verification() {
    let gw = gateway(TRACK_POLICY).await;
    let key = gw.enroll("pub_ae", &["producer"]).await;
    let grant = gw.admit("pub_ae", &key).await;

    let mut envelope = signed_envelope(&key, "pub_ae", "fused.track", "x", &[]);
    envelope["payload"] = json!("tampered");

    let (status, body) = gw.post("/emit", Some(&grant), envelope).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("signature"));

    // Signed by the wrong key entirely.
    let other = SigningKey::generate(&mut OsRng);
    let envelope = signed_envelope(&other, "pub_ae", "fused.track", "x", &[]);
    let (status, _) = gw.post("/emit", Some(&grant), envelope).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_envelope_is_400_after_auth() {
    let gw = gateway(TRACK_POLICY).await;
    let key = gw.enroll("pub_ae", &["producer"]).await;
    let grant = gw.admit("pub_ae", &key).await;

    let (status, _) = gw
        .post("/emit", Some(&grant), json!({ "not": "an envelope" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Without a grant the same junk is 401: grant checks come first.
    let (status, _) = gw.post("/emit", None, json!({ "not": "an envelope" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sse_subscription_streams_emitted_envelopes() {
    let gw = gateway(TRACK_POLICY).await;
    let pub_key = gw.enroll("pub_ae", &["producer"]).await;
    let pub_grant = gw.admit("pub_ae", &pub_key).await;

    let sub_key = gw.enroll("sub_ae", &["subscriber"]).await;
    let sub_grant = gw.admit("sub_ae", &sub_key).await;

    let request = Request::builder()
        .method("GET")
        .uri("/subscribe/fused.track")
        .header(header::AUTHORIZATION, format!("Bearer {sub_grant}"))
        .body(Body::empty())
        .unwrap();
    let response = gw.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    let mut body = response.into_body();

    // Publish through the verified pipeline, then read it off the stream.
    let envelope = signed_envelope(&pub_key, "pub_ae", "fused.track", "x", &[]);
    let (status, _) = gw.post("/emit", Some(&pub_grant), envelope).await;
    assert_eq!(status, StatusCode::OK);

    let mut buffer = String::new();
    let deadline = tokio::time::Duration::from_secs(5);
    while !buffer.contains("\n\n") {
        let frame = tokio::time::timeout(deadline, body.frame())
            .await
            .expect("timed out waiting for SSE frame")
            .expect("stream ended")
            .expect("stream errored");
        if let Ok(data) = frame.into_data() {
            buffer.push_str(&String::from_utf8_lossy(&data));
        }
    }
    assert!(buffer.contains("event: fused.track"), "frames: {buffer}");
    assert!(buffer.contains("\"producer\":\"pub_ae\""), "frames: {buffer}");
}

#[tokio::test]
async fn sse_admission_is_policy_checked() {
    let gw = gateway(TRACK_POLICY).await;

    // No grant at all.
    let (status, _) = gw.get("/subscribe/fused.track", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Authenticated but not a subscriber of this subject.
    let key = gw.enroll("pub_ae", &["producer"]).await;
    let grant = gw.admit("pub_ae", &key).await;
    let (status, _) = gw.get("/subscribe/fused.track", Some(&grant)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Unknown subject denies by default.
    let (status, _) = gw.get("/subscribe/nope.subj", Some(&grant)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let audit = gw.audit_lines().await;
    assert!(audit.iter().any(|l| l.contains("subscribe.denied")));
}
