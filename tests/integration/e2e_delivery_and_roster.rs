//! End-to-end scenarios: happy-path delivery, an unknown destination, and
//! contact-add idempotence, all driven through the real client transport
//! against a real (in-process) server.

use chat_core::CredentialStore;
use client::{ClientEvent, ClientTransport};
use server::spawn_registry;
use tokio::net::TcpListener;
use tokio::sync::watch;

async fn spawn_server() -> String {
    let store = CredentialStore::open_in_memory().unwrap();
    store.register("alice", &jim_crypto::hash_password("alice", "p1")).unwrap();
    store.register("bob", &jim_crypto::hash_password("bob", "p2")).unwrap();
    let registry = spawn_registry(store);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server::listener::run(listener, registry, shutdown_rx));
    std::mem::forget(shutdown_tx);
    addr
}

#[tokio::test]
async fn happy_path_delivery_counts_messages() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();

    let (alice, _alice_events) =
        ClientTransport::connect(&addr, "alice", "p1", None, "t0", &dir.path().join("alice.sqlite3"))
            .await
            .unwrap();
    let (_bob, mut bob_events) =
        ClientTransport::connect(&addr, "bob", "p2", None, "t0", &dir.path().join("bob.sqlite3"))
            .await
            .unwrap();

    alice.send_message("bob", "aGk=", "t1").await.unwrap();

    let event = tokio::time::timeout(std::time::Duration::from_secs(2), bob_events.recv())
        .await
        .expect("bob should receive a message before the timeout")
        .unwrap();
    match event {
        ClientEvent::NewMessage(m) => {
            assert_eq!(m.sender, "alice");
            assert_eq!(m.message_text, "aGk=");
        }
        other => panic!("expected NewMessage, got {other:?}"),
    }
}

#[tokio::test]
async fn message_to_unknown_destination_is_rejected_with_400() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();

    let (alice, _events) =
        ClientTransport::connect(&addr, "alice", "p1", None, "t0", &dir.path().join("alice.sqlite3"))
            .await
            .unwrap();

    let err = alice.send_message("charlie", "aGk=", "t1").await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("user not registered"), "unexpected error: {message}");
}

#[tokio::test]
async fn add_contact_twice_is_idempotent() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();

    let (alice, _events) =
        ClientTransport::connect(&addr, "alice", "p1", None, "t0", &dir.path().join("alice.sqlite3"))
            .await
            .unwrap();

    alice.add_contact("bob").await.unwrap();
    alice.add_contact("bob").await.unwrap();

    let contacts = alice.contacts_list_update().await.unwrap();
    assert_eq!(contacts, vec!["bob".to_owned()]);
}
