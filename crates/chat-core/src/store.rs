//! The durable account store: one relational database per server, wrapping
//! a single `rusqlite::Connection` with an `open`/`apply pragmas`/`apply
//! schema` sequence. The server loop is this store's only caller, so the
//! connection is never shared across threads.

use crate::models::{ActiveUser, KnownUser, LoginHistoryRecord, MessageHistoryRow};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("storage/schema.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account {0:?} is already registered")]
    AlreadyExists(String),
    #[error("account {0:?} is not registered")]
    NotRegistered(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct CredentialStore {
    conn: Connection,
}

impl CredentialStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        let store = Self { conn };
        // Active sessions are strictly an in-memory artefact; the mirrored
        // table must not survive a restart.
        store.conn.execute("DELETE FROM Active_users", [])?;
        Ok(store)
    }

    fn user_id(&self, name: &str) -> StoreResult<Option<i64>> {
        Ok(self
            .conn
            .query_row("SELECT id FROM All_users WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?)
    }

    fn require_user_id(&self, name: &str) -> StoreResult<i64> {
        self.user_id(name)?.ok_or_else(|| StoreError::NotRegistered(name.to_owned()))
    }

    pub fn register(&self, name: &str, password_hash: &[u8]) -> StoreResult<()> {
        if self.user_id(name)?.is_some() {
            return Err(StoreError::AlreadyExists(name.to_owned()));
        }
        let now = now_string();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO All_users (name, last_login, password_hash, pubkey) VALUES (?1, ?2, ?3, NULL)",
            params![name, now, password_hash],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute("INSERT INTO User_history (user_id, sent, accepted) VALUES (?1, 0, 0)", params![id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> StoreResult<()> {
        let Some(id) = self.user_id(name)? else { return Ok(()) };
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM Active_users WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM Login_history WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM User_contacts WHERE user_id = ?1 OR contact = ?1", params![id])?;
        tx.execute("DELETE FROM User_history WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM All_users WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn check(&self, name: &str) -> StoreResult<bool> {
        Ok(self.user_id(name)?.is_some())
    }

    pub fn hash_of(&self, name: &str) -> StoreResult<Vec<u8>> {
        self.conn
            .query_row("SELECT password_hash FROM All_users WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?
            .ok_or_else(|| StoreError::NotRegistered(name.to_owned()))
    }

    pub fn public_key_of(&self, name: &str) -> StoreResult<Option<String>> {
        self.conn
            .query_row("SELECT pubkey FROM All_users WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?
            .ok_or_else(|| StoreError::NotRegistered(name.to_owned()))
    }

    /// Records a successful login: bumps `last_login`, replaces the
    /// public key if it changed, writes an `Active_users` row, and
    /// appends to `Login_history`. Atomic.
    pub fn login(&self, name: &str, ip_address: &str, port: u16, public_key: Option<&str>) -> StoreResult<()> {
        let id = self.require_user_id(name)?;
        let now = now_string();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("UPDATE All_users SET last_login = ?1 WHERE id = ?2", params![now, id])?;
        if let Some(key) = public_key {
            let current: Option<String> =
                tx.query_row("SELECT pubkey FROM All_users WHERE id = ?1", params![id], |r| r.get(0))?;
            if current.as_deref() != Some(key) {
                tx.execute("UPDATE All_users SET pubkey = ?1 WHERE id = ?2", params![key, id])?;
            }
        }
        tx.execute("DELETE FROM Active_users WHERE user_id = ?1", params![id])?;
        tx.execute(
            "INSERT INTO Active_users (user_id, ip_address, port, login_time) VALUES (?1, ?2, ?3, ?4)",
            params![id, ip_address, port, now],
        )?;
        tx.execute(
            "INSERT INTO Login_history (user_id, ip_address, port, date_time) VALUES (?1, ?2, ?3, ?4)",
            params![id, ip_address, port, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Removes the active-session row. Idempotent.
    pub fn logout(&self, name: &str) -> StoreResult<()> {
        let Some(id) = self.user_id(name)? else { return Ok(()) };
        self.conn.execute("DELETE FROM Active_users WHERE user_id = ?1", params![id])?;
        Ok(())
    }

    pub fn count_message(&self, sender: &str, recipient: &str) -> StoreResult<()> {
        let sender_id = self.require_user_id(sender)?;
        let recipient_id = self.require_user_id(recipient)?;
        self.conn.execute("UPDATE User_history SET sent = sent + 1 WHERE user_id = ?1", params![sender_id])?;
        self.conn.execute("UPDATE User_history SET accepted = accepted + 1 WHERE user_id = ?1", params![recipient_id])?;
        Ok(())
    }

    /// Idempotent; silently no-ops when `target` is absent, the edge
    /// already exists, or `target` names `owner` itself — an account may
    /// never appear in its own contact set.
    pub fn add_contact(&self, owner: &str, target: &str) -> StoreResult<()> {
        if owner == target {
            return Ok(());
        }
        let Some(owner_id) = self.user_id(owner)? else { return Ok(()) };
        let Some(target_id) = self.user_id(target)? else { return Ok(()) };
        self.conn.execute(
            "INSERT OR IGNORE INTO User_contacts (user_id, contact) VALUES (?1, ?2)",
            params![owner_id, target_id],
        )?;
        Ok(())
    }

    /// Idempotent; silently no-ops when `target` is absent or the edge
    /// doesn't exist.
    pub fn remove_contact(&self, owner: &str, target: &str) -> StoreResult<()> {
        let Some(owner_id) = self.user_id(owner)? else { return Ok(()) };
        let Some(target_id) = self.user_id(target)? else { return Ok(()) };
        self.conn.execute(
            "DELETE FROM User_contacts WHERE user_id = ?1 AND contact = ?2",
            params![owner_id, target_id],
        )?;
        Ok(())
    }

    pub fn all_users(&self) -> StoreResult<Vec<KnownUser>> {
        let mut stmt = self.conn.prepare("SELECT name, last_login FROM All_users ORDER BY name")?;
        let rows = stmt.query_map([], |r| Ok(KnownUser { name: r.get(0)?, last_login: r.get(1)? }))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn active_users(&self) -> StoreResult<Vec<ActiveUser>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.name, a.ip_address, a.port, a.login_time
             FROM Active_users a JOIN All_users u ON u.id = a.user_id
             ORDER BY u.name",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(ActiveUser { name: r.get(0)?, ip_address: r.get(1)?, port: r.get(2)?, login_time: r.get(3)? })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn login_history(&self, name: Option<&str>) -> StoreResult<Vec<LoginHistoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.name, h.ip_address, h.port, h.date_time
             FROM Login_history h JOIN All_users u ON u.id = h.user_id
             WHERE (?1 IS NULL OR u.name = ?1)
             ORDER BY h.date_time",
        )?;
        let rows = stmt.query_map(params![name], |r| {
            Ok(LoginHistoryRecord { name: r.get(0)?, ip_address: r.get(1)?, port: r.get(2)?, date_time: r.get(3)? })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn contacts_of(&self, name: &str) -> StoreResult<Vec<String>> {
        let Some(owner_id) = self.user_id(name)? else { return Ok(Vec::new()) };
        let mut stmt = self.conn.prepare(
            "SELECT u.name FROM User_contacts c JOIN All_users u ON u.id = c.contact
             WHERE c.user_id = ?1 ORDER BY u.name",
        )?;
        let rows = stmt.query_map(params![owner_id], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn message_history(&self) -> StoreResult<Vec<MessageHistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.name, u.last_login, h.sent, h.accepted
             FROM User_history h JOIN All_users u ON u.id = h.user_id
             ORDER BY u.name",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(MessageHistoryRow { name: r.get(0)?, last_login: r.get(1)?, sent: r.get(2)?, accepted: r.get(3)? })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn now_string() -> String {
    chrono::Utc::now().to_rfc3339()
}
