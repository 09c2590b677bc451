// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit_log;
pub mod capability_store;
pub mod db;
pub mod event_bus;
pub mod keyring;
pub mod nonce_cache;
pub mod policy_loader;
pub mod runtime_registry;
pub mod signature;
pub mod token;

pub use audit_log::AuditLog;
pub use db::Database;
pub use event_bus::{BusSubscription, EventBus};
