// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL app store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use super::{AppRow, AppStore, StoreError, features_json, map_write_error};
use crate::app::{App, AppId, AppSpec, AppStatus};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

const APP_COLUMNS: &str = r#"
    id, app_name, username, user_home_directory, dockerfile, port,
    optional_features::TEXT AS optional_features, caddy_config, status,
    created_at, updated_at
"#;

/// App store backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresAppStore {
    pool: PgPool,
}

impl PostgresAppStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AppStore for PostgresAppStore {
    async fn create_app(&self, spec: &AppSpec) -> Result<App, StoreError> {
        let now = Utc::now();
        let row: AppRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO apps (app_name, username, user_home_directory, dockerfile, port,
                              optional_features, caddy_config, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6::JSONB, $7, 'pending', $8, $8)
            RETURNING {}
            "#,
            APP_COLUMNS
        ))
        .bind(&spec.app_name)
        .bind(&spec.username)
        .bind(&spec.user_home_directory)
        .bind(&spec.dockerfile)
        .bind(i32::from(spec.port))
        .bind(features_json(&spec.optional_features))
        .bind(&spec.caddy_config)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &spec.app_name))?;

        row.try_into()
    }

    async fn get_app(&self, id: AppId) -> Result<Option<App>, StoreError> {
        let row: Option<AppRow> =
            sqlx::query_as(&format!("SELECT {} FROM apps WHERE id = $1", APP_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(App::try_from).transpose()
    }

    async fn list_apps(&self) -> Result<Vec<App>, StoreError> {
        let rows: Vec<AppRow> = sqlx::query_as(&format!(
            "SELECT {} FROM apps ORDER BY created_at DESC, id DESC",
            APP_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(App::try_from).collect()
    }

    async fn update_app(&self, id: AppId, spec: &AppSpec) -> Result<Option<App>, StoreError> {
        let row: Option<AppRow> = sqlx::query_as(&format!(
            r#"
            UPDATE apps
            SET app_name = $2, username = $3, user_home_directory = $4, dockerfile = $5,
                port = $6, optional_features = $7::JSONB, caddy_config = $8,
                status = 'pending', updated_at = $9
            WHERE id = $1
            RETURNING {}
            "#,
            APP_COLUMNS
        ))
        .bind(id)
        .bind(&spec.app_name)
        .bind(&spec.username)
        .bind(&spec.user_home_directory)
        .bind(&spec.dockerfile)
        .bind(i32::from(spec.port))
        .bind(features_json(&spec.optional_features))
        .bind(&spec.caddy_config)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &spec.app_name))?;

        row.map(App::try_from).transpose()
    }

    async fn update_status(&self, id: AppId, status: AppStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE apps SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_app(&self, id: AppId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM apps WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
