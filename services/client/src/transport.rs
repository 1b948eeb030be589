//! Client transport core: owns one TCP socket, performs the handshake, then
//! hands the socket to a single reader/writer task that correlates outbound
//! requests with inbound replies and demultiplexes unsolicited frames to a
//! [`ClientEvent`] channel.
//!
//! A naive client would acquire a socket lock, send, poll for a reply with a
//! short read timeout, then release and sleep. Here the reader/writer task
//! is instead the only thing that ever touches the socket: requesters hand
//! it `(Frame, oneshot::Sender<Frame>)` pairs over a channel and await the
//! oneshot. A `select!` guard (`if pending.is_none()`) admits at most one
//! outstanding request at a time, so requests and replies still serialize —
//! the same observable guarantee a socket lock would give — without ever
//! blocking the task on a timed read.

use crate::db::ClientDb;
use crate::events::ClientEvent;
use jim_protocol::io::{recv_frame, send_frame, FrameIoError};
use jim_protocol::{AccountRef, ContactEdit, Data511, Frame, GetContacts, MessageFrame};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not reach {addr} after {attempts} attempts: {source}")]
    ServerUnreachable { addr: String, attempts: u32, source: std::io::Error },
    #[error("server rejected the handshake: {0}")]
    AuthFailure(String),
    #[error("server rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected frame: {0:?}")]
    UnexpectedFrame(Frame),
    #[error("connection lost")]
    ConnectionLost,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    FrameIo(#[from] FrameIoError),
    #[error(transparent)]
    Db(#[from] crate::db::ClientDbError),
}

enum Outbound {
    /// A request expecting a paired reply frame.
    Request(Frame, oneshot::Sender<Frame>),
    /// Fire-and-forget (EXIT has no reply).
    Notify(Frame),
}

/// Background worker handle plus the request/reply correlator. Cloning is
/// cheap; every clone shares the same underlying socket task.
#[derive(Clone)]
pub struct ClientTransport {
    outbound_tx: mpsc::Sender<Outbound>,
    shutdown_tx: watch::Sender<bool>,
    account_name: String,
    db: Arc<Mutex<ClientDb>>,
}

impl ClientTransport {
    /// Connects to `addr` (up to [`CONNECT_ATTEMPTS`] tries, 1s apart),
    /// performs the PRESENCE/511/511/200 handshake for `account_name`, and
    /// immediately issues `USERS_REQUEST`/`GET_CONTACTS` to hydrate the
    /// local mirror backed by `db_path`.
    pub async fn connect(
        addr: &str,
        account_name: &str,
        password: &str,
        public_key: Option<&str>,
        time: &str,
        db_path: &Path,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), TransportError> {
        let mut stream = connect_with_retry(addr).await?;
        handshake(&mut stream, account_name, password, public_key, time).await?;
        info!(account = account_name, %addr, "handshake complete");

        let db = Arc::new(Mutex::new(ClientDb::open(db_path)?));

        let (outbound_tx, outbound_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run(stream, outbound_rx, event_tx, account_name.to_owned(), db.clone(), shutdown_rx));

        let transport = Self { outbound_tx, shutdown_tx, account_name: account_name.to_owned(), db };

        let users = transport.user_list_update().await?;
        debug!(count = users.len(), "hydrated known-users mirror");
        let contacts = transport.contacts_list_update().await?;
        debug!(count = contacts.len(), "hydrated contacts mirror");

        Ok((transport, event_rx))
    }

    async fn request(&self, frame: Frame) -> Result<Frame, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.outbound_tx
            .send(Outbound::Request(frame, reply_tx))
            .await
            .map_err(|_| TransportError::ConnectionLost)?;
        reply_rx.await.map_err(|_| TransportError::ConnectionLost)
    }

    /// Serializes one MESSAGE frame and blocks for the server's reply.
    /// `text` is opaque bytes the caller has already base64-encoded;
    /// MESSAGE_TEXT is never inspected by this crate either.
    pub async fn send_message(&self, to: &str, text_base64: &str, time: &str) -> Result<(), TransportError> {
        let frame = Frame::Message(MessageFrame {
            sender: self.account_name.clone(),
            destination: to.to_owned(),
            time: time.to_owned(),
            message_text: text_base64.to_owned(),
        });
        match self.request(frame).await? {
            Frame::Ok200 => {
                let db = self.db.lock().await;
                db.record_message(&self.account_name, to, text_base64, time)?;
                Ok(())
            }
            Frame::Bad400(b) => Err(TransportError::Rejected(b.error)),
            other => Err(TransportError::UnexpectedFrame(other)),
        }
    }

    pub async fn add_contact(&self, name: &str) -> Result<(), TransportError> {
        let frame = Frame::AddContact(ContactEdit { user: self.account_name.clone(), account_name: name.to_owned() });
        match self.request(frame).await? {
            Frame::Ok200 => Ok(()),
            other => Err(TransportError::UnexpectedFrame(other)),
        }
    }

    pub async fn remove_contact(&self, name: &str) -> Result<(), TransportError> {
        let frame = Frame::RemoveContact(ContactEdit { user: self.account_name.clone(), account_name: name.to_owned() });
        match self.request(frame).await? {
            Frame::Ok200 => Ok(()),
            other => Err(TransportError::UnexpectedFrame(other)),
        }
    }

    pub async fn request_public_key(&self, name: &str) -> Result<String, TransportError> {
        let frame = Frame::PublicKeyRequest(AccountRef { account_name: name.to_owned() });
        match self.request(frame).await? {
            Frame::Data511(Data511 { data }) => Ok(data),
            Frame::Bad400(b) => Err(TransportError::Rejected(b.error)),
            other => Err(TransportError::UnexpectedFrame(other)),
        }
    }

    /// Refreshes the `Known_users` mirror from the server and returns it.
    pub async fn user_list_update(&self) -> Result<Vec<String>, TransportError> {
        let frame = Frame::UsersRequest(AccountRef { account_name: self.account_name.clone() });
        match self.request(frame).await? {
            Frame::List202(list) => {
                let db = self.db.lock().await;
                db.replace_known_users(&list.list_info)?;
                Ok(list.list_info)
            }
            other => Err(TransportError::UnexpectedFrame(other)),
        }
    }

    /// Refreshes the `Contacts` mirror from the server and returns it.
    pub async fn contacts_list_update(&self) -> Result<Vec<String>, TransportError> {
        let frame = Frame::GetContacts(GetContacts { user: self.account_name.clone() });
        match self.request(frame).await? {
            Frame::List202(list) => {
                let db = self.db.lock().await;
                db.replace_contacts(&list.list_info)?;
                Ok(list.list_info)
            }
            other => Err(TransportError::UnexpectedFrame(other)),
        }
    }

    /// Best-effort EXIT, then stops the reader/writer task. Sleeps briefly
    /// so the reader observes the flag before the caller drops everything.
    pub async fn shutdown(&self) {
        let exit = Frame::Exit(AccountRef { account_name: self.account_name.clone() });
        let _ = self.outbound_tx.send(Outbound::Notify(exit)).await;
        let _ = self.shutdown_tx.send(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn connect_with_retry(addr: &str) -> Result<TcpStream, TransportError> {
    let mut last_err = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                warn!(%addr, attempt, %err, "connect attempt failed");
                last_err = Some(err);
                if attempt < CONNECT_ATTEMPTS {
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(TransportError::ServerUnreachable {
        addr: addr.to_owned(),
        attempts: CONNECT_ATTEMPTS,
        source: last_err.expect("loop ran at least once"),
    })
}

async fn handshake(
    stream: &mut TcpStream,
    account_name: &str,
    password: &str,
    public_key: Option<&str>,
    time: &str,
) -> Result<(), TransportError> {
    let presence = Frame::Presence(jim_protocol::Presence {
        time: time.to_owned(),
        user: jim_protocol::PresenceUser {
            account_name: account_name.to_owned(),
            public_key: public_key.map(str::to_owned),
        },
    });
    send_frame(stream, &presence).await?;

    let challenge = recv_frame(stream).await?;
    let nonce_hex = match challenge {
        Frame::Data511(Data511 { data }) => data,
        Frame::Bad400(b) => return Err(TransportError::AuthFailure(b.error)),
        other => return Err(TransportError::UnexpectedFrame(other)),
    };
    let nonce = jim_crypto::decode_nonce_hex(&nonce_hex).map_err(|_| TransportError::AuthFailure("malformed nonce".to_owned()))?;

    let hash = jim_crypto::hash_password(account_name, password);
    let proof = jim_crypto::hmac_md5_proof(&hash, &nonce);
    let proof_frame = Frame::Data511(Data511 { data: jim_crypto::encode_proof_base64(&proof) });
    send_frame(stream, &proof_frame).await?;

    match recv_frame(stream).await? {
        Frame::Ok200 => Ok(()),
        Frame::Bad400(b) => Err(TransportError::AuthFailure(b.error)),
        other => Err(TransportError::UnexpectedFrame(other)),
    }
}

/// The reader/writer task: the only code that ever touches `stream` after
/// the handshake. See the module doc for the correlator design this plays
/// out.
async fn run(
    mut stream: TcpStream,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    event_tx: mpsc::Sender<ClientEvent>,
    account_name: String,
    db: Arc<Mutex<ClientDb>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending: Option<oneshot::Sender<Frame>> = None;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            outbound = outbound_rx.recv(), if pending.is_none() => {
                match outbound {
                    Some(Outbound::Request(frame, reply)) => {
                        if send_frame(&mut stream, &frame).await.is_err() {
                            let _ = event_tx.send(ClientEvent::ConnectionLost).await;
                            break;
                        }
                        pending = Some(reply);
                    }
                    Some(Outbound::Notify(frame)) => {
                        let _ = send_frame(&mut stream, &frame).await;
                    }
                    None => break,
                }
            }
            incoming = recv_frame(&mut stream) => {
                match incoming {
                    Ok(frame) => handle_incoming(frame, &account_name, &db, &mut pending, &event_tx).await,
                    Err(_) => {
                        let _ = event_tx.send(ClientEvent::ConnectionLost).await;
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_incoming(
    frame: Frame,
    account_name: &str,
    db: &Arc<Mutex<ClientDb>>,
    pending: &mut Option<oneshot::Sender<Frame>>,
    event_tx: &mpsc::Sender<ClientEvent>,
) {
    match frame {
        Frame::Message(ref m) if m.destination == account_name => {
            let db = db.lock().await;
            if let Err(err) = db.record_message(&m.sender, &m.destination, &m.message_text, &m.time) {
                warn!(%err, "failed to record inbound message in local mirror");
            }
            drop(db);
            let _ = event_tx.send(ClientEvent::NewMessage(m.clone())).await;
        }
        Frame::Reset205 => {
            let _ = event_tx.send(ClientEvent::RosterInvalidated).await;
        }
        reply @ (Frame::Ok200 | Frame::List202(_) | Frame::Bad400(_) | Frame::Data511(_)) => {
            if let Some(waiting) = pending.take() {
                let _ = waiting.send(reply);
            } else {
                debug!(?reply, "dropped reply with no matching in-flight request");
            }
        }
        other => debug!(?other, "ignoring unexpected frame shape (e.g. a MESSAGE not addressed to us)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::CredentialStore;
    use server::{spawn_registry, RegistryHandle};
    use tokio::net::TcpListener;

    async fn spawn_test_server() -> (String, RegistryHandle) {
        let store = CredentialStore::open_in_memory().unwrap();
        store.register("alice", &jim_crypto::hash_password("alice", "p1")).unwrap();
        store.register("bob", &jim_crypto::hash_password("bob", "p2")).unwrap();
        let registry = spawn_registry(store);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server::listener::run(listener, registry.clone(), shutdown_rx));
        std::mem::forget(shutdown_tx);
        (addr, registry)
    }

    #[tokio::test]
    async fn connect_hydrates_mirror_and_delivers_message() {
        let (addr, _registry) = spawn_test_server().await;
        let dir = tempfile::tempdir().unwrap();

        let (alice, mut alice_events) = ClientTransport::connect(
            &addr, "alice", "p1", None, "t0", &dir.path().join("alice.sqlite3"),
        )
        .await
        .unwrap();
        let (bob, mut bob_events) = ClientTransport::connect(
            &addr, "bob", "p2", None, "t0", &dir.path().join("bob.sqlite3"),
        )
        .await
        .unwrap();

        let users = alice.user_list_update().await.unwrap();
        assert_eq!(users, vec!["alice".to_owned(), "bob".to_owned()]);

        alice.add_contact("bob").await.unwrap();
        let contacts = alice.contacts_list_update().await.unwrap();
        assert_eq!(contacts, vec!["bob".to_owned()]);

        alice.send_message("bob", "aGk=", "t1").await.unwrap();
        let event = bob_events.recv().await.unwrap();
        match event {
            ClientEvent::NewMessage(m) => {
                assert_eq!(m.sender, "alice");
                assert_eq!(m.message_text, "aGk=");
            }
            other => panic!("expected NewMessage, got {other:?}"),
        }

        alice.shutdown().await;
        bob.shutdown().await;
        // draining ensures no spurious ConnectionLost surprises callers mid-test
        let _ = alice_events.try_recv();
    }

    #[tokio::test]
    async fn wrong_password_surfaces_as_auth_failure() {
        let (addr, _registry) = spawn_test_server().await;
        let dir = tempfile::tempdir().unwrap();
        let err = ClientTransport::connect(&addr, "alice", "wrong", None, "t0", &dir.path().join("c.sqlite3"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::AuthFailure(_)));
    }
}
