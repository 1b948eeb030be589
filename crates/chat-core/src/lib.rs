//! Durable and in-memory state shared by the JIM server: the sqlite-backed
//! credential store and the in-memory session table. Neither module knows
//! about sockets; `services/server` wires them to live connections.

pub mod models;
pub mod session;
pub mod store;

pub use models::{ActiveUser, KnownUser, LoginHistoryRecord, MessageHistoryRow};
pub use session::SessionTable;
pub use store::{CredentialStore, StoreError, StoreResult};
