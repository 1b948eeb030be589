//! The in-memory session table: a bijection between account names and
//! connection handles, mutated only by whatever single task owns it (the
//! server's registry actor — see `services/server`). The generic `C` is the
//! connection handle type; the server binds it to a small `ConnectionId`
//! newtype so this crate stays transport-agnostic.

use std::collections::HashMap;
use std::hash::Hash;

/// `bind`/`unbind_by_name`/`unbind_by_conn`/`conn_of`/`name_of`/`all_names`
/// exactly as spec'd; no locking here because exactly one task is ever
/// allowed to hold a `&mut SessionTable`.
#[derive(Debug, Default)]
pub struct SessionTable<C: Copy + Eq + Hash> {
    by_name: HashMap<String, C>,
    by_conn: HashMap<C, String>,
}

impl<C: Copy + Eq + Hash> SessionTable<C> {
    pub fn new() -> Self {
        Self { by_name: HashMap::new(), by_conn: HashMap::new() }
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Binds `name` to `conn`. Caller must have already checked
    /// `!is_bound(name)`; binding an already-bound name would break the
    /// bijection, so this overwrites both directions and returns the
    /// previously-bound connection, if any, for the caller to evict.
    pub fn bind(&mut self, name: &str, conn: C) -> Option<C> {
        let previous = self.by_name.insert(name.to_owned(), conn);
        if let Some(prev) = previous {
            self.by_conn.remove(&prev);
        }
        self.by_conn.insert(conn, name.to_owned());
        previous
    }

    pub fn unbind_by_name(&mut self, name: &str) -> Option<C> {
        let conn = self.by_name.remove(name)?;
        self.by_conn.remove(&conn);
        Some(conn)
    }

    pub fn unbind_by_conn(&mut self, conn: C) -> Option<String> {
        let name = self.by_conn.remove(&conn)?;
        self.by_name.remove(&name);
        Some(name)
    }

    pub fn conn_of(&self, name: &str) -> Option<C> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, conn: C) -> Option<&str> {
        self.by_conn.get(&conn).map(String::as_str)
    }

    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_is_a_bijection() {
        let mut t: SessionTable<u32> = SessionTable::new();
        t.bind("alice", 1);
        assert_eq!(t.conn_of("alice"), Some(1));
        assert_eq!(t.name_of(1), Some("alice"));
    }

    #[test]
    fn rebinding_a_name_evicts_the_previous_connection() {
        let mut t: SessionTable<u32> = SessionTable::new();
        t.bind("alice", 1);
        let evicted = t.bind("alice", 2);
        assert_eq!(evicted, Some(1));
        assert_eq!(t.name_of(1), None, "stale reverse mapping must be gone");
        assert_eq!(t.conn_of("alice"), Some(2));
    }

    #[test]
    fn unbind_by_name_clears_both_directions() {
        let mut t: SessionTable<u32> = SessionTable::new();
        t.bind("alice", 1);
        assert_eq!(t.unbind_by_name("alice"), Some(1));
        assert_eq!(t.name_of(1), None);
        assert_eq!(t.conn_of("alice"), None);
    }

    #[test]
    fn unbind_by_conn_clears_both_directions() {
        let mut t: SessionTable<u32> = SessionTable::new();
        t.bind("alice", 1);
        assert_eq!(t.unbind_by_conn(1), Some("alice".to_owned()));
        assert_eq!(t.conn_of("alice"), None);
    }

    #[test]
    fn at_most_one_session_per_account() {
        let mut t: SessionTable<u32> = SessionTable::new();
        t.bind("alice", 1);
        assert!(t.is_bound("alice"));
        t.bind("alice", 2);
        assert_eq!(t.all_names().count(), 1);
    }

    #[test]
    fn all_names_reflects_every_live_binding() {
        let mut t: SessionTable<u32> = SessionTable::new();
        t.bind("alice", 1);
        t.bind("bob", 2);
        let mut names: Vec<&str> = t.all_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["alice", "bob"]);
    }
}
