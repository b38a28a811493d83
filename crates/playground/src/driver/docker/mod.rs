// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker runtime driver.
//!
//! Generates a devcontainer build context per app and drives the docker and
//! devcontainer CLIs. This module is pure execution logic - no database access.

mod context;
mod driver;

pub use context::{ContextConfig, ContextManager, DevcontainerConfig, STARTUP_SCRIPT_TARGET};
pub use driver::{DockerDriver, DockerDriverConfig};
