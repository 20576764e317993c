use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use super::schema::{ChatMessage, ChatSession, DatabaseStats, NewMessage};

/// Insert/select/delete surface the request handlers persist through.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_session(&self, title: &str, user_id: Option<&str>) -> anyhow::Result<String>;

    async fn append_message(&self, message: NewMessage) -> anyhow::Result<String>;

    async fn delete_session(&self, session_id: &str) -> anyhow::Result<bool>;

    async fn count_sessions(&self) -> anyhow::Result<i64>;

    async fn count_messages(&self) -> anyhow::Result<i64>;
}

#[derive(Clone)]
pub struct SqliteConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    /// Run `f` on a pooled connection off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))?;
            f(&*conn)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Database task failed: {}", e))?
    }

    pub async fn get_session(&self, session_id: &str) -> anyhow::Result<Option<ChatSession>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, title, user_id, created_at FROM chat_sessions WHERE id = ?1",
                [&session_id],
                |row| Ok(row_to_session(row)),
            )
            .optional()?
            .transpose()
        })
        .await
    }

    pub async fn get_session_messages(&self, session_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, kind, image_url, user_id, created_at
                 FROM chat_messages WHERE session_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let mut rows = stmt.query([&session_id])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(row_to_message(row)?);
            }
            Ok(messages)
        })
        .await
    }

    pub async fn list_sessions_for_user(&self, user_id: &str) -> anyhow::Result<Vec<ChatSession>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, user_id, created_at FROM chat_sessions
                 WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
            )?;
            let mut rows = stmt.query([&user_id])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        Ok(DatabaseStats {
            total_sessions: self.count_sessions().await?,
            total_messages: self.count_messages().await?,
        })
    }

    async fn count_table(&self, table: &'static str) -> anyhow::Result<i64> {
        self.with_conn(move |conn| {
            let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(count)
        })
        .await
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_session(&self, title: &str, user_id: Option<&str>) -> anyhow::Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let title = title.to_string();
        let user_id = user_id.map(str::to_string);

        let id = session_id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_sessions (id, title, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, title, user_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await?;

        debug!("Created chat session {}", session_id);
        Ok(session_id)
    }

    async fn append_message(&self, message: NewMessage) -> anyhow::Result<String> {
        let message_id = Uuid::new_v4().to_string();

        let id = message_id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_messages
                 (id, session_id, role, content, kind, image_url, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    message.session_id,
                    message.role.as_str(),
                    message.content,
                    message.kind.as_str(),
                    message.image_url,
                    message.user_id,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(message_id)
    }

    async fn delete_session(&self, session_id: &str) -> anyhow::Result<bool> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM chat_sessions WHERE id = ?1", [&session_id])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn count_sessions(&self) -> anyhow::Result<i64> {
        self.count_table("chat_sessions").await
    }

    async fn count_messages(&self) -> anyhow::Result<i64> {
        self.count_table("chat_messages").await
    }
}

fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

fn parse_created_at(raw: &str) -> DateTime<Utc> {
    parse_datetime_safe(raw).unwrap_or_else(|| {
        warn!("Failed to parse created_at {:?}", raw);
        Utc::now()
    })
}

fn row_to_session(row: &Row) -> anyhow::Result<ChatSession> {
    Ok(ChatSession {
        id: row.get(0)?,
        title: row.get(1)?,
        user_id: row.get(2)?,
        created_at: parse_created_at(&row.get::<_, String>(3)?),
    })
}

fn row_to_message(row: &Row) -> anyhow::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: row.get::<_, String>(2)?.parse()?,
        content: row.get(3)?,
        kind: row.get::<_, String>(4)?.parse()?,
        image_url: row.get(5)?,
        user_id: row.get(6)?,
        created_at: parse_created_at(&row.get::<_, String>(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_db::{ChatDatabase, MessageKind, MessageRole};

    fn store() -> SqliteConversationStore {
        ChatDatabase::open_in_memory().unwrap().conversations()
    }

    #[tokio::test]
    async fn test_session_and_messages_round_trip() {
        let store = store();
        let session_id = store.create_session("Hello there", Some("user-1")).await.unwrap();

        store
            .append_message(NewMessage::text(&session_id, MessageRole::User, "Hi", Some("user-1")))
            .await
            .unwrap();
        store
            .append_message(NewMessage::text(&session_id, MessageRole::Assistant, "Hello!", Some("user-1")))
            .await
            .unwrap();

        let session = store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.title, "Hello there");
        assert_eq!(session.user_id.as_deref(), Some("user-1"));

        let messages = store.get_session_messages(&session_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].content, "Hello!");
        assert_eq!(messages[1].kind, MessageKind::Text);
    }

    #[tokio::test]
    async fn test_image_message_keeps_url() {
        let store = store();
        let session_id = store.create_session("Fox", None).await.unwrap();
        store
            .append_message(NewMessage::image(&session_id, "https://img.example.com/a.png", None))
            .await
            .unwrap();

        let messages = store.get_session_messages(&session_id).await.unwrap();
        assert_eq!(messages[0].kind, MessageKind::Image);
        assert_eq!(messages[0].image_url.as_deref(), Some("https://img.example.com/a.png"));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_messages() {
        let store = store();
        let session_id = store.create_session("Temp", None).await.unwrap();
        store
            .append_message(NewMessage::text(&session_id, MessageRole::User, "x", None))
            .await
            .unwrap();
        assert_eq!(store.count_messages().await.unwrap(), 1);

        assert!(store.delete_session(&session_id).await.unwrap());
        assert!(!store.delete_session(&session_id).await.unwrap());
        assert_eq!(store.count_sessions().await.unwrap(), 0);
        assert_eq!(store.count_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_message_for_unknown_session_is_rejected() {
        let store = store();
        let result = store
            .append_message(NewMessage::text("missing", MessageRole::User, "x", None))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sessions_listed_per_user() {
        let store = store();
        store.create_session("a", Some("u1")).await.unwrap();
        store.create_session("b", Some("u2")).await.unwrap();
        store.create_session("c", Some("u1")).await.unwrap();

        let sessions = store.list_sessions_for_user("u1").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].title, "c");

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_sessions, 3);
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime_safe("2024-05-01T10:00:00+00:00").is_some());
        assert!(parse_datetime_safe("2024-05-01 10:00:00").is_some());
        assert!(parse_datetime_safe("yesterday").is_none());
    }
}
