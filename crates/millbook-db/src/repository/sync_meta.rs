//! # Sync Metadata Repository
//!
//! Small key/value bookkeeping for the sync engine: per-collection pull
//! cursors and similar engine state that must survive restarts but is not
//! part of the Entity Ledger.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::DbResult;
use millbook_core::EntityKind;

/// Repository for sync engine bookkeeping.
#[derive(Debug, Clone)]
pub struct SyncMetaRepository {
    pool: SqlitePool,
}

impl SyncMetaRepository {
    /// Creates a new SyncMetaRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncMetaRepository { pool }
    }

    /// Gets a raw value by key.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM sync_meta WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    /// Sets a raw value, replacing any previous one.
    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query("INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The pull cursor for one collection: the newest remote `updated_at`
    /// this device has merged. Missing or unparsable cursors read as the
    /// epoch, which re-pulls everything (safe, the merge is idempotent).
    pub async fn get_pull_cursor(&self, kind: EntityKind) -> DbResult<DateTime<Utc>> {
        let key = format!("pull_cursor_{kind}");
        let cursor = self
            .get(&key)
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Ok(cursor)
    }

    /// Advances the pull cursor for one collection.
    pub async fn set_pull_cursor(&self, kind: EntityKind, cursor: DateTime<Utc>) -> DbResult<()> {
        let key = format!("pull_cursor_{kind}");
        self.set(&key, &cursor.to_rfc3339()).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_cursor_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let meta = db.sync_meta();

        // Unset cursor reads as epoch
        let cursor = meta.get_pull_cursor(EntityKind::Customer).await.unwrap();
        assert_eq!(cursor, DateTime::<Utc>::UNIX_EPOCH);

        let now = Utc::now();
        meta.set_pull_cursor(EntityKind::Customer, now).await.unwrap();
        let cursor = meta.get_pull_cursor(EntityKind::Customer).await.unwrap();
        assert_eq!(cursor, now);

        // Cursors are per collection
        let other = meta.get_pull_cursor(EntityKind::Inventory).await.unwrap();
        assert_eq!(other, DateTime::<Utc>::UNIX_EPOCH);
    }
}
