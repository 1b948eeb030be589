//! End-to-end scenario: an admin deletion broadcasts a 205
//! roster-invalidation to every bound session, including sessions that
//! had nothing to do with the deleted account.

use chat_core::CredentialStore;
use client::{ClientEvent, ClientTransport};
use server::spawn_registry;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::test]
async fn deleting_an_account_resets_every_bound_sessions_roster() {
    let store = CredentialStore::open_in_memory().unwrap();
    store.register("alice", &jim_crypto::hash_password("alice", "p1")).unwrap();
    store.register("bob", &jim_crypto::hash_password("bob", "p2")).unwrap();
    let registry = spawn_registry(store);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server::listener::run(listener, registry.clone(), shutdown_rx));
    std::mem::forget(shutdown_tx);

    let dir = tempfile::tempdir().unwrap();
    let (alice, mut alice_events) =
        ClientTransport::connect(&addr, "alice", "p1", None, "t0", &dir.path().join("alice.sqlite3"))
            .await
            .unwrap();
    alice.add_contact("bob").await.unwrap();
    assert_eq!(alice.contacts_list_update().await.unwrap(), vec!["bob".to_owned()]);

    let (_bob, _bob_events) =
        ClientTransport::connect(&addr, "bob", "p2", None, "t0", &dir.path().join("bob.sqlite3"))
            .await
            .unwrap();

    registry.admin_delete("bob".to_owned()).await.unwrap();

    let event = tokio::time::timeout(std::time::Duration::from_secs(2), alice_events.recv())
        .await
        .expect("alice should be notified before the timeout")
        .unwrap();
    assert!(matches!(event, ClientEvent::RosterInvalidated));

    // alice's roster mirror no longer lists bob once she refreshes it.
    let contacts = alice.contacts_list_update().await.unwrap();
    assert!(contacts.is_empty(), "deleted account must be gone from alice's contacts: {contacts:?}");
}
