//! The client's local mirror database: `Known_users` and `Contacts` track
//! the server's roster views, `Message_history` logs delivered/sent text.
//! Wrapped the same way `chat_core::store::CredentialStore` wraps its
//! `Connection` — one `rusqlite::Connection`, pragmas and schema applied
//! once at `open`.
//!
//! `Contacts` is truncated on startup, mirroring the server's own
//! `Active_users` truncation: a contact mirror is only ever valid as of the
//! last `GET_CONTACTS` round trip, so a stale copy from a previous run is
//! worse than an empty one.

use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("storage/schema.sql");

#[derive(Debug, Error)]
pub enum ClientDbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type ClientDbResult<T> = Result<T, ClientDbError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHistoryEntry {
    pub from_user: String,
    pub to_user: String,
    pub message: String,
    pub date: String,
}

pub struct ClientDb {
    conn: Connection,
}

impl ClientDb {
    pub fn open(path: &Path) -> ClientDbResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> ClientDbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> ClientDbResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        let db = Self { conn };
        db.conn.execute("DELETE FROM Contacts", [])?;
        Ok(db)
    }

    /// Replaces the `Known_users` mirror wholesale with the latest
    /// `USERS_REQUEST` reply.
    pub fn replace_known_users(&self, names: &[String]) -> ClientDbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM Known_users", [])?;
        for name in names {
            tx.execute("INSERT OR IGNORE INTO Known_users (name) VALUES (?1)", params![name])?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn known_users(&self) -> ClientDbResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM Known_users ORDER BY name")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Replaces the `Contacts` mirror wholesale with the latest
    /// `GET_CONTACTS` reply.
    pub fn replace_contacts(&self, names: &[String]) -> ClientDbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM Contacts", [])?;
        for name in names {
            tx.execute("INSERT OR IGNORE INTO Contacts (name) VALUES (?1)", params![name])?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn contacts(&self) -> ClientDbResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM Contacts ORDER BY name")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn record_message(&self, from_user: &str, to_user: &str, message: &str, date: &str) -> ClientDbResult<()> {
        self.conn.execute(
            "INSERT INTO Message_history (from_user, to_user, message, date) VALUES (?1, ?2, ?3, ?4)",
            params![from_user, to_user, message, date],
        )?;
        Ok(())
    }

    pub fn message_history(&self) -> ClientDbResult<Vec<MessageHistoryEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT from_user, to_user, message, date FROM Message_history ORDER BY id")?;
        let rows = stmt.query_map([], |r| {
            Ok(MessageHistoryEntry {
                from_user: r.get(0)?,
                to_user: r.get(1)?,
                message: r.get(2)?,
                date: r.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contacts_mirror_starts_empty_even_if_written_before_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.sqlite3");
        {
            let db = ClientDb::open(&path).unwrap();
            db.replace_contacts(&["bob".to_owned()]).unwrap();
            assert_eq!(db.contacts().unwrap(), vec!["bob".to_owned()]);
        }
        let reopened = ClientDb::open(&path).unwrap();
        assert!(reopened.contacts().unwrap().is_empty(), "Contacts must be truncated on startup");
    }

    #[test]
    fn known_users_mirror_replaces_wholesale() {
        let db = ClientDb::open_in_memory().unwrap();
        db.replace_known_users(&["alice".to_owned(), "bob".to_owned()]).unwrap();
        db.replace_known_users(&["alice".to_owned()]).unwrap();
        assert_eq!(db.known_users().unwrap(), vec!["alice".to_owned()]);
    }

    #[test]
    fn message_history_records_in_order() {
        let db = ClientDb::open_in_memory().unwrap();
        db.record_message("alice", "bob", "aGk=", "t1").unwrap();
        db.record_message("bob", "alice", "eW8=", "t2").unwrap();
        let history = db.message_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from_user, "alice");
        assert_eq!(history[1].from_user, "bob");
    }
}
