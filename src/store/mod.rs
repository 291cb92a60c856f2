//! SQLite-backed recipient status store.
//!
//! Rows are seeded externally (an import tool or a plain sqlite
//! shell); campaigns only mutate the status columns. Per-recipient
//! write failures are the caller's problem to log and skip — nothing
//! here aborts a campaign.

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::info;

/// A recipient as loaded for the campaign loop.
#[derive(Debug, Clone, FromRow)]
pub struct Recipient {
    pub id: i64,
    pub email: String,
}

/// Full status row for the status listing. The flag columns are
/// nullable: a freshly imported row has no verdict yet.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StatusRow {
    pub id: i64,
    pub email: String,
    pub is_valid: Option<i64>,
    pub is_sent: Option<i64>,
    pub is_read: Option<i64>,
    pub ip: Option<String>,
    pub agent: Option<String>,
}

#[derive(Clone)]
pub struct RecipientStore {
    pool: SqlitePool,
}

impl RecipientStore {
    /// Open (creating if missing) the store at the given path.
    pub async fn connect(path: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(path = %path, "recipient_store_opened");
        Ok(store)
    }

    /// Open a private in-memory store. Used by tests.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        // one connection only: each sqlite :memory: connection is its
        // own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recipients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                is_valid INTEGER,
                is_sent INTEGER,
                is_read INTEGER,
                read_token TEXT,
                last_sent_at TEXT,
                last_read_at TEXT,
                ip TEXT,
                agent TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a recipient row. Campaigns never create rows; this is
    /// for seeding (imports, tests).
    pub async fn add_recipient(&self, email: &str) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO recipients (email) VALUES (?)")
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// All recipients, for the campaign loop.
    pub async fn list_recipients(&self) -> Result<Vec<Recipient>, sqlx::Error> {
        sqlx::query_as::<_, Recipient>("SELECT id, email FROM recipients ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }

    /// Distinct stored addresses, unfiltered.
    pub async fn addresses(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT DISTINCT email FROM recipients ORDER BY email")
            .fetch_all(&self.pool)
            .await
    }

    /// Status rows, newest first.
    pub async fn status_rows(&self) -> Result<Vec<StatusRow>, sqlx::Error> {
        sqlx::query_as::<_, StatusRow>(
            "SELECT id, email, is_valid, is_sent, is_read, ip, agent \
             FROM recipients ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Look up a row id by its exact stored address.
    pub async fn find_by_address(&self, email: &str) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM recipients WHERE email = ? LIMIT 1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    /// Start a send attempt: reset sent/read state, record the fresh
    /// token and the syntax verdict. Must be awaited before the send —
    /// a pixel fetch can arrive almost immediately after delivery.
    pub async fn begin_attempt(
        &self,
        id: i64,
        token: &str,
        valid_syntax: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE recipients \
             SET is_valid = ?, is_sent = 0, is_read = 0, read_token = ?, last_sent_at = ? \
             WHERE id = ?",
        )
        .bind(valid_syntax)
        .bind(token)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a successful delivery.
    pub async fn mark_sent(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE recipients SET is_sent = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failed delivery with the bounce classifier's verdict
    /// on whether the address is still considered valid.
    pub async fn mark_send_failed(&self, id: i64, still_valid: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE recipients SET is_sent = 0, is_valid = ? WHERE id = ?")
            .bind(still_valid)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark the row holding `token` as read and capture requester
    /// metadata. An unknown or stale token is a no-op returning false,
    /// never an error: the pixel client must not learn anything.
    pub async fn mark_read(
        &self,
        token: &str,
        ip: &str,
        agent: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE recipients \
             SET is_read = 1, last_read_at = ?, ip = ?, agent = ? \
             WHERE read_token = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(ip)
        .bind(agent)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_begin_attempt_resets_state() {
        let store = RecipientStore::in_memory().await.unwrap();
        let id = store.add_recipient("a@example.com").await.unwrap();

        store.begin_attempt(id, "token-1", true).await.unwrap();
        assert!(store.mark_read("token-1", "1.2.3.4", "UA").await.unwrap());

        // a resend must not inherit the stale read status
        store.begin_attempt(id, "token-2", true).await.unwrap();

        let rows = store.status_rows().await.unwrap();
        assert_eq!(rows[0].is_read, Some(0));
        assert_eq!(rows[0].is_sent, Some(0));
    }

    #[tokio::test]
    async fn test_mark_read_requires_current_token() {
        let store = RecipientStore::in_memory().await.unwrap();
        let id = store.add_recipient("a@example.com").await.unwrap();

        store.begin_attempt(id, "old-token", true).await.unwrap();
        store.begin_attempt(id, "new-token", true).await.unwrap();

        assert!(!store.mark_read("old-token", "1.2.3.4", "UA").await.unwrap());
        assert!(store.mark_read("new-token", "1.2.3.4", "UA").await.unwrap());

        let rows = store.status_rows().await.unwrap();
        assert_eq!(rows[0].is_read, Some(1));
        assert_eq!(rows[0].ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(rows[0].agent.as_deref(), Some("UA"));
    }

    #[tokio::test]
    async fn test_mark_read_unknown_token_is_noop() {
        let store = RecipientStore::in_memory().await.unwrap();
        store.add_recipient("a@example.com").await.unwrap();

        let matched = store.mark_read("no-such-token", "1.2.3.4", "UA").await.unwrap();
        assert!(!matched);
    }

    #[tokio::test]
    async fn test_status_rows_newest_first() {
        let store = RecipientStore::in_memory().await.unwrap();
        let first = store.add_recipient("first@example.com").await.unwrap();
        let second = store.add_recipient("second@example.com").await.unwrap();

        let rows = store.status_rows().await.unwrap();
        assert_eq!(rows[0].id, second);
        assert_eq!(rows[1].id, first);
    }

    #[tokio::test]
    async fn test_send_failed_verdicts() {
        let store = RecipientStore::in_memory().await.unwrap();
        let id = store.add_recipient("a@example.com").await.unwrap();
        store.begin_attempt(id, "t", true).await.unwrap();

        store.mark_send_failed(id, false).await.unwrap();
        let rows = store.status_rows().await.unwrap();
        assert_eq!(rows[0].is_valid, Some(0));
        assert_eq!(rows[0].is_sent, Some(0));

        store.mark_send_failed(id, true).await.unwrap();
        let rows = store.status_rows().await.unwrap();
        assert_eq!(rows[0].is_valid, Some(1));
    }

    #[tokio::test]
    async fn test_addresses_deduplicated() {
        let store = RecipientStore::in_memory().await.unwrap();
        store.add_recipient("dup@example.com").await.unwrap();
        store.add_recipient("dup@example.com").await.unwrap();
        store.add_recipient("other@example.com").await.unwrap();

        let addrs = store.addresses().await.unwrap();
        assert_eq!(addrs.len(), 2);
    }

    #[tokio::test]
    async fn test_find_by_address() {
        let store = RecipientStore::in_memory().await.unwrap();
        let id = store.add_recipient("a@example.com").await.unwrap();

        assert_eq!(store.find_by_address("a@example.com").await.unwrap(), Some(id));
        assert_eq!(store.find_by_address("missing@example.com").await.unwrap(), None);
    }
}
