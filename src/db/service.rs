use crate::db::models::{Message, Role, Session, SessionSummary};
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use duckdb::{params, types::Type, Connection, Result as DbResult, Row};
use std::error::Error as StdError;
use std::str::FromStr;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, name, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, session_id, role, content, sequence, created_at";

pub struct DbService;

impl DbService {
    fn parse_column<T>(row: &Row, idx: usize) -> DbResult<T>
    where
        T: FromStr,
        T::Err: StdError + Send + Sync + 'static,
    {
        let raw: String = row.get(idx)?;
        raw.parse::<T>()
            .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn row_to_session(row: &Row) -> DbResult<Session> {
        Ok(Session {
            id: Self::parse_column(row, 0)?,
            name: row.get(1)?,
            created_at: Self::parse_column(row, 2)?,
            updated_at: Self::parse_column(row, 3)?,
        })
    }

    fn row_to_message(row: &Row) -> DbResult<Message> {
        Ok(Message {
            id: Self::parse_column(row, 0)?,
            session_id: Self::parse_column(row, 1)?,
            role: Self::parse_column::<Role>(row, 2)?,
            content: row.get(3)?,
            sequence: row.get(4)?,
            created_at: Self::parse_column(row, 5)?,
        })
    }

    // --- Session Operations ---

    pub fn insert_session(conn: &Connection, id: Uuid, name: &str) -> DbResult<Session> {
        let now = now_micros();
        let ts = format_ts(now);

        conn.execute(
            "INSERT INTO sessions (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
            params![id.to_string(), name, ts, ts],
        )?;

        Ok(Session {
            id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_session(conn: &Connection, id: Uuid) -> DbResult<Option<Session>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
        ))?;
        let mut rows = stmt.query_map(params![id.to_string()], Self::row_to_session)?;

        rows.next().transpose()
    }

    /// Most recently updated first.
    pub fn list_sessions(conn: &Connection) -> DbResult<Vec<SessionSummary>> {
        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, s.created_at, s.updated_at, COUNT(m.id) AS message_count
             FROM sessions s
             LEFT JOIN messages m ON m.session_id = s.id
             GROUP BY s.id, s.name, s.created_at, s.updated_at
             ORDER BY s.updated_at DESC, s.id",
        )?;
        let rows = stmt.query_map(params![], |row| {
            Ok(SessionSummary {
                session: Self::row_to_session(row)?,
                message_count: row.get(4)?,
            })
        })?;

        rows.collect()
    }

    pub fn rename_session(conn: &mut Connection, id: Uuid, name: &str) -> DbResult<Option<Session>> {
        let tx = conn.transaction()?;
        let Some(mut session) = Self::get_session(&tx, id)? else {
            return Ok(None);
        };

        session.updated_at = next_timestamp(session.updated_at);
        session.name = name.to_string();
        tx.execute(
            "UPDATE sessions SET name = ?, updated_at = ? WHERE id = ?",
            params![name, format_ts(session.updated_at), id.to_string()],
        )?;
        tx.commit()?;

        Ok(Some(session))
    }

    /// Removes the session and its messages in one transaction.
    /// Returns `false` when the session does not exist.
    pub fn delete_session(conn: &mut Connection, id: Uuid) -> DbResult<bool> {
        let tx = conn.transaction()?;

        Self::delete_messages(&tx, id)?;
        let deleted = tx.execute("DELETE FROM sessions WHERE id = ?", params![id.to_string()])?;

        tx.commit()?;
        Ok(deleted > 0)
    }

    // --- Message Operations ---

    /// Appends a message with the next sequence number of the session and bumps the
    /// session's `updated_at`. Returns `None` when the session does not exist.
    ///
    /// Callers must hold the connection exclusively for the duration of the call.
    pub fn append_message(
        conn: &mut Connection,
        session_id: Uuid,
        role: Role,
        content: &str,
    ) -> DbResult<Option<Message>> {
        let tx = conn.transaction()?;
        let Some(session) = Self::get_session(&tx, session_id)? else {
            return Ok(None);
        };
        let sid = session_id.to_string();

        let sequence: i64 = tx.query_row(
            "SELECT CAST(COALESCE(MAX(sequence) + 1, 0) AS BIGINT) FROM messages WHERE session_id = ?",
            params![sid],
            |row| row.get(0),
        )?;

        let created_at = next_timestamp(session.updated_at);
        let message = Message {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: content.to_string(),
            sequence,
            created_at,
        };
        let ts = format_ts(created_at);

        tx.execute(
            "INSERT INTO messages (id, session_id, role, content, sequence, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![message.id.to_string(), sid, role.as_str(), content, sequence, ts],
        )?;
        tx.execute(
            "UPDATE sessions SET updated_at = ? WHERE id = ?",
            params![ts, sid],
        )?;
        tx.commit()?;

        Ok(Some(message))
    }

    /// Messages ordered by sequence. Returns `None` when the session does not exist.
    pub fn get_messages(conn: &Connection, session_id: Uuid) -> DbResult<Option<Vec<Message>>> {
        if Self::get_session(conn, session_id)?.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ? ORDER BY sequence ASC"
        ))?;
        let rows = stmt.query_map(params![session_id.to_string()], Self::row_to_message)?;

        rows.collect::<DbResult<Vec<_>>>().map(Some)
    }

    /// Shared by `MessageStore::delete_all` and the session delete cascade.
    pub fn delete_messages(conn: &Connection, session_id: Uuid) -> DbResult<usize> {
        conn.execute(
            "DELETE FROM messages WHERE session_id = ?",
            params![session_id.to_string()],
        )
    }
}

fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A timestamp strictly after `prev`, at microsecond precision.
fn next_timestamp(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_micros();
    if now > prev {
        now
    } else {
        prev + Duration::microseconds(1)
    }
}

/// Fixed-width RFC 3339 in UTC, so string order matches time order.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::connection::init_schema(&conn, "talkgpt").unwrap();
        conn
    }

    #[test]
    fn delete_session_cascades_to_its_messages_only() {
        let mut conn = test_conn();
        let (doomed, kept) = (Uuid::new_v4(), Uuid::new_v4());
        DbService::insert_session(&conn, doomed, "doomed").unwrap();
        DbService::insert_session(&conn, kept, "kept").unwrap();
        DbService::append_message(&mut conn, doomed, Role::User, "x").unwrap();
        DbService::append_message(&mut conn, doomed, Role::Assistant, "y").unwrap();
        DbService::append_message(&mut conn, kept, Role::User, "z").unwrap();

        assert!(DbService::delete_session(&mut conn, doomed).unwrap());

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", params![], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
        assert!(DbService::get_messages(&conn, doomed).unwrap().is_none());
        assert!(!DbService::delete_session(&mut conn, doomed).unwrap());
    }

    #[test]
    fn next_timestamp_is_strictly_increasing() {
        let future = Utc::now().trunc_subsecs(6) + Duration::seconds(60);
        let next = next_timestamp(future);
        assert_eq!(next, future + Duration::microseconds(1));

        let past = Utc::now() - Duration::seconds(60);
        assert!(next_timestamp(past) > past);
    }

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let a = now_micros();
        let b = a + Duration::microseconds(1);
        let c = a + Duration::seconds(10);
        assert!(format_ts(a) < format_ts(b));
        assert!(format_ts(b) < format_ts(c));
        assert_eq!(format_ts(a).parse::<DateTime<Utc>>().unwrap(), a);
    }
}
