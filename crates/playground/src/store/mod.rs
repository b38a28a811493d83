// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App state store.
//!
//! One row per app, keyed by id, with a unique `app_name`. The store is the
//! source of truth for declared configuration and lifecycle status.
//!
//! Two backends share the [`AppStore`] trait:
//! - [`PostgresAppStore`] for production
//! - [`SqliteAppStore`] for tests and single-node setups

mod postgres;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::{App, AppId, AppSpec, AppStatus, OptionalFeature};

pub use postgres::PostgresAppStore;
pub use sqlite::SqliteAppStore;

/// Errors returned by store backends.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The app name is already taken.
    #[error("app with name '{0}' already exists")]
    Conflict(String),

    /// A stored row could not be decoded.
    #[error("corrupt record for app {id}: {details}")]
    Corrupt { id: AppId, details: String },

    /// Underlying database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failure.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Persistence interface for apps.
#[async_trait]
#[allow(missing_docs)]
pub trait AppStore: Send + Sync {
    /// Insert a new app with status `pending`.
    async fn create_app(&self, spec: &AppSpec) -> Result<App, StoreError>;

    async fn get_app(&self, id: AppId) -> Result<Option<App>, StoreError>;

    /// All apps, newest first.
    async fn list_apps(&self) -> Result<Vec<App>, StoreError>;

    /// Replace the declared configuration and set status to `pending`.
    ///
    /// Returns `None` when no app has this id.
    async fn update_app(&self, id: AppId, spec: &AppSpec) -> Result<Option<App>, StoreError>;

    /// Set the lifecycle status. A missing row is not an error.
    async fn update_status(&self, id: AppId, status: AppStatus) -> Result<(), StoreError>;

    /// Delete an app. Returns `false` when no row matched.
    async fn delete_app(&self, id: AppId) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Row shape shared by both backends.
#[derive(Debug, sqlx::FromRow)]
struct AppRow {
    id: i64,
    app_name: String,
    username: String,
    user_home_directory: String,
    dockerfile: String,
    port: i32,
    /// JSON array of feature names
    optional_features: String,
    caddy_config: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppRow> for App {
    type Error = StoreError;

    fn try_from(row: AppRow) -> Result<Self, Self::Error> {
        let corrupt = |details: String| StoreError::Corrupt {
            id: row.id,
            details,
        };

        let port = u16::try_from(row.port).map_err(|_| corrupt(format!("port {}", row.port)))?;
        let optional_features: Vec<OptionalFeature> =
            serde_json::from_str(&row.optional_features)
                .map_err(|e| corrupt(format!("optional_features: {}", e)))?;
        let status: AppStatus = row.status.parse().map_err(corrupt)?;

        Ok(App {
            id: row.id,
            app_name: row.app_name,
            username: row.username,
            user_home_directory: row.user_home_directory,
            dockerfile: row.dockerfile,
            port,
            optional_features,
            caddy_config: row.caddy_config,
            status,
            container_status: None,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn features_json(features: &[OptionalFeature]) -> String {
    serde_json::to_string(features).unwrap_or_else(|_| "[]".to_string())
}

/// Map unique-constraint violations on `app_name` to [`StoreError::Conflict`].
fn map_write_error(e: sqlx::Error, app_name: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e
        && db_err.is_unique_violation()
    {
        return StoreError::Conflict(app_name.to_string());
    }
    StoreError::Database(e)
}
