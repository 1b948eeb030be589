//! Data-model rows, independent of how they are stored.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownUser {
    pub name: String,
    pub last_login: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUser {
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub login_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginHistoryRecord {
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub date_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHistoryRow {
    pub name: String,
    pub last_login: String,
    pub sent: i64,
    pub accepted: i64,
}
