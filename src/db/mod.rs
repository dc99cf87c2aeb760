//! Database layer for sharelink-dl
//!
//! SQLite persistence for the runtime settings, the broadcast ledger and the
//! admin roster.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: database lifecycle, schema migrations
//! - [`settings`]: global settings row and admin roster
//! - [`ledger`]: broadcast delivery ledger

use sqlx::{FromRow, sqlite::SqlitePool};

mod ledger;
mod migrations;
mod settings;

/// Admin roster record from database
#[derive(Debug, Clone, FromRow)]
pub struct AdminRow {
    /// Messaging user ID
    pub user_id: i64,
    /// Handle at the time the admin was added
    pub username: Option<String>,
    /// Display name at the time the admin was added
    pub full_name: Option<String>,
    /// Unix timestamp when the admin was added
    pub added_at: i64,
}

/// Broadcast ledger record from database
#[derive(Debug, Clone, FromRow)]
pub struct BroadcastRow {
    /// Unique database ID
    pub id: i64,
    /// Artifact name the entry is keyed by
    pub name: String,
    /// Destination that received the artifact
    pub destination_id: i64,
    /// Unix timestamp of the delivery
    pub created_at: i64,
}

/// Database handle for sharelink-dl
pub struct Database {
    pool: SqlitePool,
}
