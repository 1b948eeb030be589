//! Accept loop: bind once, loop accepting sockets, hand each one off rather
//! than block the loop on it. Each connection gets its own task immediately;
//! all shared-state mutation is centralized in the registry actor rather
//! than in the accept loop itself (see `registry.rs`).

use crate::connection;
use crate::registry::RegistryHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Runs the accept loop until `shutdown` reports `true`. Returns once the
/// listening socket is closed; in-flight connections are left running and
/// observe the same flag independently through the registry's disconnect
/// path.
pub async fn run(listener: TcpListener, registry: RegistryHandle, mut shutdown: watch::Receiver<bool>) {
    info!(addr = ?listener.local_addr().ok(), "accept loop started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("accept loop shutting down");
                    return;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
                        let registry = registry.clone();
                        info!(%addr, conn_id, "accepted connection");
                        tokio::spawn(connection::handle(conn_id, stream, addr, registry));
                    }
                    Err(err) => {
                        warn!(%err, "accept failed");
                    }
                }
            }
        }
    }
}
