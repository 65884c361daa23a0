use crate::config::DatabaseConfig;
use duckdb::{Connection, Result as DbResult};
use std::sync::{Arc, Mutex};
use tracing::info;

pub type DbPool = Arc<Mutex<Connection>>;

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id VARCHAR PRIMARY KEY,
    name VARCHAR NOT NULL,
    created_at VARCHAR NOT NULL,
    updated_at VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id VARCHAR PRIMARY KEY,
    session_id VARCHAR NOT NULL,
    role VARCHAR NOT NULL,
    content TEXT NOT NULL,
    sequence BIGINT NOT NULL,
    created_at VARCHAR NOT NULL,
    UNIQUE (session_id, sequence)
);
"#;

pub fn get_connection(config: &DatabaseConfig) -> DbResult<DbPool> {
    info!("Connecting to DuckDB at {}", config.path);
    let conn = if config.path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(&config.path)?
    };

    init_schema(&conn, &config.namespace)?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// `namespace` must already be validated as a plain identifier.
pub(crate) fn init_schema(conn: &Connection, namespace: &str) -> DbResult<()> {
    info!(namespace, "Initializing database schema");
    conn.execute_batch(&format!(
        "CREATE SCHEMA IF NOT EXISTS {namespace}; SET schema = '{namespace}';"
    ))?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
