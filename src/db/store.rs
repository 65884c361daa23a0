//! Session and message store contracts, plus the DuckDB implementation.
//!
//! All DuckDB access goes through one connection guarded by a mutex, and every
//! call runs on the blocking thread pool so request tasks never stall on storage.

use async_trait::async_trait;
use duckdb::Connection;
use tracing::{debug, error};
use uuid::Uuid;

use crate::chat::naming;
use crate::config::DatabaseConfig;
use crate::db::{get_connection, service::DbService, DbPool, Message, Role, Session, SessionSummary};
use crate::error::ChatError;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session. Without a name, a default one is derived from the new id.
    async fn create(&self, name: Option<String>) -> Result<Session, ChatError>;

    /// All sessions, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionSummary>, ChatError>;

    async fn get(&self, id: Uuid) -> Result<Session, ChatError>;

    async fn rename(&self, id: Uuid, name: String) -> Result<Session, ChatError>;

    /// Deletes the session together with all of its messages.
    async fn delete(&self, id: Uuid) -> Result<(), ChatError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends a message with the next sequence number of the session.
    /// Concurrent appends to one session are serialized.
    async fn append(&self, session_id: Uuid, role: Role, content: String) -> Result<Message, ChatError>;

    /// Messages of the session ordered by sequence. Fails with `NotFound` once the
    /// session is gone.
    async fn list(&self, session_id: Uuid) -> Result<Vec<Message>, ChatError>;

    /// Removes every message of the session. `SessionStore::delete` runs the same
    /// deletion inside its own transaction.
    async fn delete_all(&self, session_id: Uuid) -> Result<(), ChatError>;
}

#[derive(Clone)]
pub struct DuckDbStore {
    pool: DbPool,
}

impl DuckDbStore {
    pub fn open(config: &DatabaseConfig) -> Result<Self, ChatError> {
        let pool = get_connection(config).map_err(|e| {
            error!("Failed to open database: {}", e);
            ChatError::from(e)
        })?;
        Ok(Self { pool })
    }

    async fn run<T, F>(&self, op: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, ChatError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .lock()
                .map_err(|_| ChatError::Storage("database connection lock poisoned".to_string()))?;
            op(&mut *conn)
        })
        .await
        .map_err(|e| ChatError::Storage(format!("storage task failed: {e}")))?;

        if let Err(ChatError::Storage(msg)) = &result {
            error!("Storage operation failed: {}", msg);
        }
        result
    }
}

#[async_trait]
impl SessionStore for DuckDbStore {
    async fn create(&self, name: Option<String>) -> Result<Session, ChatError> {
        let id = Uuid::new_v4();
        let name = match name {
            Some(name) => naming::normalize_name(&name)?,
            None => naming::default_name(id),
        };

        let session = self
            .run(move |conn| Ok(DbService::insert_session(conn, id, &name)?))
            .await?;
        debug!(session_id = %session.id, name = %session.name, "session created");
        Ok(session)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, ChatError> {
        self.run(|conn| Ok(DbService::list_sessions(conn)?)).await
    }

    async fn get(&self, id: Uuid) -> Result<Session, ChatError> {
        self.run(move |conn| DbService::get_session(conn, id)?.ok_or(ChatError::NotFound(id)))
            .await
    }

    async fn rename(&self, id: Uuid, name: String) -> Result<Session, ChatError> {
        let name = naming::normalize_name(&name)?;
        self.run(move |conn| {
            DbService::rename_session(conn, id, &name)?.ok_or(ChatError::NotFound(id))
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<(), ChatError> {
        let deleted = self.run(move |conn| Ok(DbService::delete_session(conn, id)?)).await?;
        if !deleted {
            return Err(ChatError::NotFound(id));
        }
        debug!(session_id = %id, "session deleted");
        Ok(())
    }
}

#[async_trait]
impl MessageStore for DuckDbStore {
    async fn append(&self, session_id: Uuid, role: Role, content: String) -> Result<Message, ChatError> {
        self.run(move |conn| {
            DbService::append_message(conn, session_id, role, &content)?
                .ok_or(ChatError::NotFound(session_id))
        })
        .await
    }

    async fn list(&self, session_id: Uuid) -> Result<Vec<Message>, ChatError> {
        self.run(move |conn| {
            DbService::get_messages(conn, session_id)?.ok_or(ChatError::NotFound(session_id))
        })
        .await
    }

    async fn delete_all(&self, session_id: Uuid) -> Result<(), ChatError> {
        self.run(move |conn| {
            DbService::delete_messages(conn, session_id)?;
            Ok(())
        })
        .await
    }
}
