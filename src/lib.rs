//! Workspace root. Carries no runtime code of its own — it exists to host
//! the end-to-end integration tests under `tests/integration/`. The actual
//! implementation lives in `crates/` (wire protocol, crypto, durable/
//! in-memory server state) and `services/` (the server and client
//! binaries built on top of them).
