//! Durable session storage: sessions, their append-only message logs and the
//! last workflow state snapshot, in SQLite behind a single async mutex.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Workflow,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Workflow => "workflow",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub state: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub session_id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub created_at: String,
}

pub struct SessionStore {
    db: Arc<Mutex<Connection>>,
}

impl SessionStore {
    /// Open (and migrate) the store at `path`. Parent directories are created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening session db at {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Resolve `DATABASE_URL` (plain path or `sqlite://` URL); absent means
    /// the local embedded default under the user's home.
    pub fn open_default(database_url: Option<&str>) -> Result<Self> {
        let path = match database_url {
            Some(url) => {
                let trimmed = url
                    .strip_prefix("sqlite://")
                    .or_else(|| url.strip_prefix("sqlite:"))
                    .unwrap_or(url);
                PathBuf::from(trimmed)
            }
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".deepmedical")
                .join("sessions.db"),
        };
        info!("Session store at {}", path.display());
        Self::open(&path)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                state TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                type TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn create_session(&self, user_id: Option<&str>) -> Result<SessionRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sessions (id, user_id, created_at, updated_at, state)
             VALUES (?1, ?2, ?3, ?3, NULL)",
            params![id, user_id, now],
        )?;
        info!(session_id = %id, "Created session");

        Ok(SessionRecord {
            id,
            user_id: user_id.map(str::to_string),
            created_at: now.clone(),
            updated_at: now,
            state: None,
        })
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                "SELECT id, user_id, created_at, updated_at, state
                 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(record.map(|(id, user_id, created_at, updated_at, state)| {
            SessionRecord {
                id,
                user_id,
                created_at,
                updated_at,
                state: state.and_then(|s| serde_json::from_str(&s).ok()),
            }
        }))
    }

    /// Replace the session's workflow state snapshot.
    pub async fn update_state(&self, session_id: &str, state: &Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE sessions SET state = ?2, updated_at = ?3 WHERE id = ?1",
            params![session_id, state.to_string(), now],
        )?;
        if changed == 0 {
            bail!("session {session_id} not found");
        }
        Ok(())
    }

    /// Append one message. The log is append-only; existing rows are never
    /// touched.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: MessageRole,
        kind: MessageKind,
        content: &str,
    ) -> Result<MessageRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock().await;
        let exists: Option<String> = db
            .query_row(
                "SELECT id FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            bail!("session {session_id} not found");
        }

        db.execute(
            "INSERT INTO messages (id, session_id, role, type, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, session_id, role.as_str(), kind.as_str(), content, now],
        )?;
        db.execute(
            "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
            params![session_id, now],
        )?;

        Ok(MessageRecord {
            id,
            session_id: session_id.to_string(),
            role: role.as_str().to_string(),
            kind: kind.as_str().to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }

    /// All messages of a session in insertion order.
    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, session_id, role, type, content, created_at
             FROM messages WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(MessageRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                role: row.get(2)?,
                kind: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete a session; its messages cascade.
    #[allow(dead_code)]
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(())
    }

    /// Shape messages for the client: content that parses as JSON is inlined
    /// as a JSON value (workflow envelopes), anything else stays raw text.
    pub fn format_messages(messages: &[MessageRecord]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let content: Value = serde_json::from_str(&m.content)
                    .unwrap_or_else(|_| Value::String(m.content.clone()));
                serde_json::json!({
                    "id": m.id,
                    "role": m.role,
                    "type": m.kind,
                    "content": content,
                    "created_at": m.created_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_ids_are_36_chars() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(None).await.unwrap();
        assert_eq!(session.id.len(), 36);
    }

    #[tokio::test]
    async fn messages_round_trip_in_insertion_order() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(Some("u1")).await.unwrap();

        store
            .add_message(&session.id, MessageRole::User, MessageKind::Text, "hi")
            .await
            .unwrap();
        store
            .add_message(
                &session.id,
                MessageRole::Assistant,
                MessageKind::Text,
                "hello",
            )
            .await
            .unwrap();
        store
            .add_message(
                &session.id,
                MessageRole::System,
                MessageKind::Workflow,
                r#"{"workflow": {"title": "plan"}}"#,
            )
            .await
            .unwrap();

        let messages = store.get_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].kind, "workflow");
    }

    #[tokio::test]
    async fn add_message_to_unknown_session_fails() {
        let store = SessionStore::open_in_memory().unwrap();
        let out = store
            .add_message("missing", MessageRole::User, MessageKind::Text, "hi")
            .await;
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn state_snapshot_round_trips() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(None).await.unwrap();

        let state = serde_json::json!({"messages": [{"role": "user", "content": "hi"}]});
        store.update_state(&session.id, &state).await.unwrap();

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, Some(state));
    }

    #[tokio::test]
    async fn update_state_on_unknown_session_fails() {
        let store = SessionStore::open_in_memory().unwrap();
        let out = store.update_state("missing", &serde_json::json!({})).await;
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(None).await.unwrap();
        store
            .add_message(&session.id, MessageRole::User, MessageKind::Text, "hi")
            .await
            .unwrap();

        store.delete_session(&session.id).await.unwrap();
        assert!(store.get_session(&session.id).await.unwrap().is_none());
        assert!(store.get_messages(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn format_messages_inlines_json_content() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(None).await.unwrap();
        store
            .add_message(
                &session.id,
                MessageRole::System,
                MessageKind::Workflow,
                r#"{"workflow": {"id": "w1"}}"#,
            )
            .await
            .unwrap();
        store
            .add_message(&session.id, MessageRole::User, MessageKind::Text, "plain")
            .await
            .unwrap();

        let messages = store.get_messages(&session.id).await.unwrap();
        let formatted = SessionStore::format_messages(&messages);
        assert!(formatted[0]["content"]["workflow"]["id"].is_string());
        assert_eq!(formatted[1]["content"], Value::String("plain".to_string()));
    }

    #[tokio::test]
    async fn updated_at_advances_on_append() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(None).await.unwrap();
        store
            .add_message(&session.id, MessageRole::User, MessageKind::Text, "hi")
            .await
            .unwrap();
        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert!(loaded.updated_at >= session.updated_at);
    }
}
