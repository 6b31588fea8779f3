//! SQLite persistence gateway
//!
//! Messages keep an autoincrement `seq` column so that two messages stored
//! within the same microsecond still come back in insertion order.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};
use uuid::Uuid;

use super::{PersistenceGateway, StoreResult};
use crate::error::PersistenceError;
use crate::models::{MessageStats, PersistedMessage, PresenceRecord};

type MessageRow = (String, String, String, String, String);
type PresenceRow = (String, bool, String);

pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Connect using a `sqlite:` URL, creating the database if needed.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?;
        Self::connect_with(options, database_url.contains(":memory:")).await
    }

    /// Open (or create) a database file.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        Self::connect_with(SqliteConnectOptions::new().filename(path), false).await
    }

    async fn connect_with(options: SqliteConnectOptions, in_memory: bool) -> StoreResult<Self> {
        let options = options.create_if_missing(true);

        // Every connection to `:memory:` is its own database, so pin the pool
        // to a single long-lived connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let filename = options.get_filename().to_path_buf();
        let pool = pool_options.connect_with(options).await?;
        let gateway = Self { pool };
        gateway.init_db().await?;

        info!("[Store] SQLite gateway ready at {:?}", filename);
        Ok(gateway)
    }

    async fn init_db(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_pair
             ON messages (sender_id, receiver_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_created ON messages (created_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS presence (
                user_id TEXT PRIMARY KEY,
                is_online INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("bad timestamp {:?}: {}", raw, e)))
}

fn message_from_row(row: MessageRow) -> StoreResult<PersistedMessage> {
    let (id, sender_id, receiver_id, message, created_at) = row;
    Ok(PersistedMessage {
        id,
        sender_id,
        receiver_id,
        message,
        timestamp: parse_ts(&created_at)?,
    })
}

fn presence_from_row(row: PresenceRow) -> StoreResult<PresenceRecord> {
    let (user_id, is_online, last_seen) = row;
    Ok(PresenceRecord {
        user_id,
        is_online,
        last_seen: parse_ts(&last_seen)?,
    })
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn save_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
    ) -> StoreResult<PersistedMessage> {
        let message = PersistedMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            message: body.to_string(),
            // Stored at microsecond precision; keep the returned copy identical.
            timestamp: Utc::now().trunc_subsecs(6),
        };

        sqlx::query(
            "INSERT INTO messages (id, sender_id, receiver_id, body, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(&message.receiver_id)
        .bind(&message.message)
        .bind(format_ts(message.timestamp))
        .execute(&self.pool)
        .await?;

        debug!(message_id = %message.id, sender_id, receiver_id, "[Store] message saved");
        Ok(message)
    }

    async fn set_presence(
        &self,
        user_id: &str,
        is_online: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO presence (user_id, is_online, last_seen) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 is_online = excluded.is_online,
                 last_seen = excluded.last_seen
             WHERE excluded.last_seen >= presence.last_seen",
        )
        .bind(user_id)
        .bind(is_online)
        .bind(format_ts(at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn conversation(&self, a: &str, b: &str) -> StoreResult<Vec<PersistedMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, sender_id, receiver_id, body, created_at
            FROM messages
            WHERE (sender_id = ?1 AND receiver_id = ?2)
               OR (sender_id = ?2 AND receiver_id = ?1)
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<PersistedMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, sender_id, receiver_id, body, created_at
            FROM messages
            WHERE sender_id = ?1 OR receiver_id = ?1
            ORDER BY created_at DESC, seq DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn message_stats(&self, user_id: &str) -> StoreResult<MessageStats> {
        let (total, sent, received): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(sender_id = ?1), 0),
                COALESCE(SUM(receiver_id = ?1), 0)
            FROM messages
            WHERE sender_id = ?1 OR receiver_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(MessageStats {
            total_messages: total,
            sent_messages: sent,
            received_messages: received,
        })
    }

    async fn delete_message(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<PersistedMessage>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT id, sender_id, receiver_id, body, created_at FROM messages
             WHERE id = ?1 AND (sender_id = ?2 OR receiver_id = ?2)",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        message_from_row(row).map(Some)
    }

    async fn presence(&self, user_id: &str) -> StoreResult<Option<PresenceRecord>> {
        let row: Option<PresenceRow> =
            sqlx::query_as("SELECT user_id, is_online, last_seen FROM presence WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(presence_from_row).transpose()
    }

    async fn online_users(&self) -> StoreResult<Vec<PresenceRecord>> {
        let rows: Vec<PresenceRow> = sqlx::query_as(
            "SELECT user_id, is_online, last_seen FROM presence
             WHERE is_online = 1 ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(presence_from_row).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        let _: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
