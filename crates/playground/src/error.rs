// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the playground service.

use thiserror::Error;

use crate::app::{AppId, ValidationError};
use crate::config::ConfigError;
use crate::driver::DriverError;
use crate::routes::RouteError;
use crate::store::StoreError;

/// Main error type for the playground service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Request failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// App name already taken.
    #[error("app with name '{0}' already exists")]
    Conflict(String),

    /// No app with this id.
    #[error("App not found: {0}")]
    AppNotFound(AppId),

    /// State store error.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Container runtime error.
    #[error("Runtime error: {0}")]
    Driver(#[from] DriverError),

    /// Proxy route error.
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(name) => Error::Conflict(name),
            other => Error::Store(other),
        }
    }
}

/// Result type alias for playground operations.
pub type Result<T> = std::result::Result<T, Error>;
