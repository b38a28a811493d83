// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime drivers - container build and lifecycle backends.

pub mod docker;
pub mod mock;
mod traits;

pub use mock::{DriverCall, MockDriver};
pub use traits::*;
