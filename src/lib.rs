// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # AEGIS Gateway
//!
//! Admission, authorization, and verified-emission gateway for a mesh of
//! Atomic Experts (AEs). Sits between untrusted AE clients and the
//! in-process event bus; every message that transits the mesh is proven to
//! originate from a registered, trusted, still-authorized AE.
//!
//! # Architecture
//!
//! - **domain** — identity, envelopes, policy decisions, audit types
//! - **application** — admission ceremony, verified-emit pipeline,
//!   capability declarations, policy hot-reload
//! - **infrastructure** — SQLite stores, audit log, nonce cache, crypto,
//!   session tokens, event bus
//! - **presentation** — the axum HTTP surface and SSE bridge

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
