//! End-to-end scenarios: a name collision on the session table, and a
//! wrong-password handshake.

use chat_core::CredentialStore;
use client::ClientTransport;
use server::spawn_registry;
use tokio::net::TcpListener;
use tokio::sync::watch;

async fn spawn_server() -> String {
    let store = CredentialStore::open_in_memory().unwrap();
    store.register("alice", &jim_crypto::hash_password("alice", "p1")).unwrap();
    let registry = spawn_registry(store);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server::listener::run(listener, registry, shutdown_rx));
    std::mem::forget(shutdown_tx);
    addr
}

#[tokio::test]
async fn second_presence_for_a_bound_name_is_rejected_and_first_session_survives() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();

    let (_alice, _events) =
        ClientTransport::connect(&addr, "alice", "p1", None, "t0", &dir.path().join("alice.sqlite3"))
            .await
            .unwrap();

    let second = ClientTransport::connect(&addr, "alice", "p1", None, "t0", &dir.path().join("alice2.sqlite3")).await;
    let err = second.unwrap_err();
    assert!(err.to_string().contains("name already taken"), "unexpected error: {err}");

    // the original session is unaffected: it can still issue requests.
    let users = _alice.user_list_update().await.unwrap();
    assert_eq!(users, vec!["alice".to_owned()]);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();

    let err = ClientTransport::connect(&addr, "alice", "not-p1", None, "t0", &dir.path().join("alice.sqlite3"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("wrong password"), "unexpected error: {err}");
}

#[tokio::test]
async fn unregistered_account_is_rejected() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();

    let err = ClientTransport::connect(&addr, "ghost", "anything", None, "t0", &dir.path().join("ghost.sqlite3"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not registered"), "unexpected error: {err}");
}
