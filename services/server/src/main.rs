use chat_core::CredentialStore;
use server::{listener, spawn_registry, validate_port};
use std::env;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let listen_addr = env::var("JIM_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0".to_owned());
    let listen_port: u32 = env::var("JIM_LISTEN_PORT")
        .unwrap_or_else(|_| "7777".to_owned())
        .parse()
        .expect("JIM_LISTEN_PORT must be an integer");
    let listen_port = validate_port(listen_port).unwrap_or_else(|err| {
        eprintln!("fatal: {err}");
        std::process::exit(1);
    });
    let db_path = env::var("JIM_DB_PATH").unwrap_or_else(|_| "jim-server.sqlite3".to_owned());

    info!(db_path = %db_path, "opening credential store");
    let store = CredentialStore::open(&PathBuf::from(&db_path)).expect("failed to open credential store");

    let registry = spawn_registry(store);

    let tcp_listener = TcpListener::bind((listen_addr.as_str(), listen_port))
        .await
        .expect("failed to bind listen socket");
    info!(addr = %listen_addr, port = listen_port, "server listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let accept_task = tokio::spawn(listener::run(tcp_listener, registry, shutdown_rx));

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = accept_task.await;
    info!("server shut down gracefully");
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
