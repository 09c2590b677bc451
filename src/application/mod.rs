// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod admission;
pub mod capabilities;
pub mod emission;
pub mod policy_watcher;

pub use admission::{AdmissionService, AuthenticatedExpert};
pub use capabilities::CapabilityService;
pub use emission::{EmissionService, EmitReceipt};
pub use policy_watcher::PolicyCoordinator;
