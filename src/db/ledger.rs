//! Broadcast ledger and the store traits backed by this database.

use crate::config::{ConfigStore, GlobalConfig};
use crate::delivery::DeliveryLedger;
use crate::error::DatabaseError;
use crate::types::DestinationId;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{BroadcastRow, Database};

impl Database {
    /// Check whether an artifact name was ever broadcast
    pub async fn was_broadcast(&self, name: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM broadcasts WHERE name = ? LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query broadcast ledger: {}",
                    e
                )))
            })?;

        Ok(found.is_some())
    }

    /// Append one delivery to the ledger
    pub async fn record_broadcast(
        &self,
        name: &str,
        destination: DestinationId,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO broadcasts (name, destination_id, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(destination.get())
            .bind(timestamp.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to record broadcast: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Ledger entries for one artifact name, in insertion order
    pub async fn broadcasts_for(&self, name: &str) -> Result<Vec<BroadcastRow>> {
        sqlx::query_as::<_, BroadcastRow>(
            "SELECT id, name, destination_id, created_at FROM broadcasts WHERE name = ? ORDER BY id",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list broadcasts: {}",
                e
            )))
        })
    }
}

#[async_trait]
impl DeliveryLedger for Database {
    async fn ledger_has(&self, name: &str) -> Result<bool> {
        self.was_broadcast(name).await
    }

    async fn ledger_insert(
        &self,
        name: &str,
        destination: DestinationId,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.record_broadcast(name, destination, timestamp).await
    }
}

#[async_trait]
impl ConfigStore for Database {
    async fn global_config(&self) -> Result<GlobalConfig> {
        Database::global_config(self).await
    }
}
