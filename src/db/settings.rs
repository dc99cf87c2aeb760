//! Global settings row and admin roster.

use crate::config::GlobalConfig;
use crate::error::DatabaseError;
use crate::types::{DestinationId, RequestOrigin};
use crate::{Error, Result};
use sqlx::FromRow;

use super::{AdminRow, Database};

#[derive(FromRow)]
struct GlobalConfigRow {
    admin_broadcast_enabled: bool,
    channel_broadcast_enabled: bool,
    destination_set: String,
    max_file_size_bytes: i64,
}

impl GlobalConfigRow {
    fn into_config(self) -> Result<GlobalConfig> {
        let destination_set: Vec<DestinationId> = serde_json::from_str(&self.destination_set)
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to decode destination set: {}",
                    e
                )))
            })?;

        Ok(GlobalConfig {
            admin_broadcast_enabled: self.admin_broadcast_enabled,
            channel_broadcast_enabled: self.channel_broadcast_enabled,
            destination_set,
            max_file_size_bytes: self.max_file_size_bytes.max(0) as u64,
        })
    }
}

fn encode_destinations(config: &GlobalConfig) -> Result<String> {
    serde_json::to_string(&config.destination_set).map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to encode destination set: {}",
            e
        )))
    })
}

impl Database {
    /// Write `defaults` unless a settings row already exists
    ///
    /// Run once at process start. Returns true when the defaults were written.
    pub async fn ensure_global_defaults(&self, defaults: &GlobalConfig) -> Result<bool> {
        let destinations = encode_destinations(defaults)?;
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO global_config (
                id, admin_broadcast_enabled, channel_broadcast_enabled,
                destination_set, max_file_size_bytes, updated_at
            ) VALUES (1, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(defaults.admin_broadcast_enabled)
        .bind(defaults.channel_broadcast_enabled)
        .bind(destinations)
        .bind(defaults.max_file_size_bytes as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write default settings: {}",
                e
            )))
        })?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            tracing::info!("Initialized global settings with defaults");
        }
        Ok(inserted)
    }

    /// Read the current settings row
    ///
    /// Fails with [`DatabaseError::NotFound`] when
    /// [`ensure_global_defaults`](Self::ensure_global_defaults) never ran.
    pub async fn global_config(&self) -> Result<GlobalConfig> {
        let row = sqlx::query_as::<_, GlobalConfigRow>(
            r#"
            SELECT admin_broadcast_enabled, channel_broadcast_enabled,
                   destination_set, max_file_size_bytes
            FROM global_config
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read settings: {}",
                e
            )))
        })?;

        match row {
            Some(row) => row.into_config(),
            None => Err(Error::Database(DatabaseError::NotFound(
                "global settings have not been initialized".to_string(),
            ))),
        }
    }

    /// Replace the settings row
    pub async fn update_global_config(&self, config: &GlobalConfig) -> Result<()> {
        let destinations = encode_destinations(config)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO global_config (
                id, admin_broadcast_enabled, channel_broadcast_enabled,
                destination_set, max_file_size_bytes, updated_at
            ) VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                admin_broadcast_enabled = excluded.admin_broadcast_enabled,
                channel_broadcast_enabled = excluded.channel_broadcast_enabled,
                destination_set = excluded.destination_set,
                max_file_size_bytes = excluded.max_file_size_bytes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(config.admin_broadcast_enabled)
        .bind(config.channel_broadcast_enabled)
        .bind(destinations)
        .bind(config.max_file_size_bytes as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update settings: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Check whether a user is on the admin roster
    pub async fn is_admin(&self, user_id: i64) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM admins WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to check admin: {}",
                    e
                )))
            })?;

        Ok(found.is_some())
    }

    /// Add a user to the admin roster, refreshing the stored names if present
    pub async fn add_admin(
        &self,
        user_id: i64,
        username: Option<&str>,
        full_name: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO admins (user_id, username, full_name, added_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                full_name = excluded.full_name
            "#,
        )
        .bind(user_id)
        .bind(username)
        .bind(full_name)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to add admin: {}",
                e
            )))
        })?;

        tracing::info!(user_id, "Added admin");
        Ok(())
    }

    /// List the admin roster, oldest first
    pub async fn list_admins(&self) -> Result<Vec<AdminRow>> {
        sqlx::query_as::<_, AdminRow>(
            "SELECT user_id, username, full_name, added_at FROM admins ORDER BY added_at, user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list admins: {}",
                e
            )))
        })
    }

    /// Classify a direct request by its sender
    pub async fn origin_for_user(&self, user_id: i64) -> Result<RequestOrigin> {
        if self.is_admin(user_id).await? {
            Ok(RequestOrigin::Admin)
        } else {
            Ok(RequestOrigin::User)
        }
    }
}
