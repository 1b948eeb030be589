//! The JIM client transport core: background worker owning one TCP
//! connection, the request/reply correlator, and the local roster/history
//! mirror. `services/client`'s binary is a minimal REPL driving this
//! library; there is no GUI here.

pub mod db;
pub mod events;
pub mod transport;

pub use db::{ClientDb, ClientDbError, ClientDbResult, MessageHistoryEntry};
pub use events::ClientEvent;
pub use transport::{ClientTransport, TransportError};
