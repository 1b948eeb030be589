//! The registry actor: the single task that owns the session table and the
//! credential store, so all mutation of either happens on one executor and
//! no per-structure locking is needed. Connection tasks never touch
//! `SessionTable` or `CredentialStore` directly; they send [`Command`]s
//! over an mpsc channel and wait on a `oneshot` reply.

use chat_core::{CredentialStore, SessionTable, StoreError};
use jim_crypto::proofs_match;
use jim_protocol::Frame;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

pub type ConnId = u64;

/// Handle held by every connection task and by admin callers (CLI, tests).
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

struct PendingAuth {
    name: String,
    public_key: Option<String>,
    addr: String,
    port: u16,
    password_hash: Vec<u8>,
    nonce: Vec<u8>,
}

pub enum BeginAuthOutcome {
    Challenge { nonce: Vec<u8> },
    NameAlreadyTaken,
    NotRegistered,
}

pub enum CompleteAuthOutcome {
    Bound,
    WrongPassword,
}

/// Result of running a bound-connection frame through the dispatcher.
/// `reply` is what the originating connection sends back, if anything;
/// `close_origin` tells the connection task to drop the socket after
/// sending that reply.
pub struct DispatchOutcome {
    pub reply: Option<Frame>,
    pub close_origin: bool,
}

enum Command {
    Connect { conn_id: ConnId, outbox: mpsc::Sender<Frame>, reply: oneshot::Sender<()> },
    BeginAuth { conn_id: ConnId, name: String, public_key: Option<String>, addr: String, port: u16, reply: oneshot::Sender<BeginAuthOutcome> },
    CompleteAuth { conn_id: ConnId, proof: Vec<u8>, reply: oneshot::Sender<CompleteAuthOutcome> },
    Dispatch { conn_id: ConnId, frame: Frame, reply: oneshot::Sender<DispatchOutcome> },
    Disconnected { conn_id: ConnId },
    AdminRegister { name: String, password_hash: Vec<u8>, reply: oneshot::Sender<Result<(), StoreError>> },
    AdminDelete { name: String, reply: oneshot::Sender<Result<(), StoreError>> },
}

impl RegistryHandle {
    pub async fn connect(&self, conn_id: ConnId, outbox: mpsc::Sender<Frame>) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Connect { conn_id, outbox, reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn begin_auth(&self, conn_id: ConnId, name: String, public_key: Option<String>, addr: String, port: u16) -> BeginAuthOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::BeginAuth { conn_id, name, public_key, addr, port, reply }).await.is_err() {
            return BeginAuthOutcome::NotRegistered;
        }
        rx.await.unwrap_or(BeginAuthOutcome::NotRegistered)
    }

    pub async fn complete_auth(&self, conn_id: ConnId, proof: Vec<u8>) -> CompleteAuthOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::CompleteAuth { conn_id, proof, reply }).await.is_err() {
            return CompleteAuthOutcome::WrongPassword;
        }
        rx.await.unwrap_or(CompleteAuthOutcome::WrongPassword)
    }

    pub async fn dispatch(&self, conn_id: ConnId, frame: Frame) -> DispatchOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Dispatch { conn_id, frame, reply }).await.is_err() {
            return DispatchOutcome { reply: None, close_origin: true };
        }
        rx.await.unwrap_or(DispatchOutcome { reply: None, close_origin: true })
    }

    pub async fn disconnected(&self, conn_id: ConnId) {
        let _ = self.tx.send(Command::Disconnected { conn_id }).await;
    }

    pub async fn admin_register(&self, name: String, password_hash: Vec<u8>) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::AdminRegister { name, password_hash, reply }).await.ok();
        rx.await.expect("registry task is alive for the handle's lifetime")
    }

    pub async fn admin_delete(&self, name: String) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::AdminDelete { name, reply }).await.ok();
        rx.await.expect("registry task is alive for the handle's lifetime")
    }
}

/// Spawns the registry actor and returns a handle to it. The task runs
/// until every `RegistryHandle` clone (and the internal sender) is
/// dropped.
pub fn spawn(store: CredentialStore) -> RegistryHandle {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run(store, rx));
    RegistryHandle { tx }
}

async fn run(store: CredentialStore, mut rx: mpsc::Receiver<Command>) {
    let mut sessions: SessionTable<ConnId> = SessionTable::new();
    let mut outboxes: HashMap<ConnId, mpsc::Sender<Frame>> = HashMap::new();
    let mut pending: HashMap<ConnId, PendingAuth> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Connect { conn_id, outbox, reply } => {
                outboxes.insert(conn_id, outbox);
                let _ = reply.send(());
            }
            Command::BeginAuth { conn_id, name, public_key, addr, port, reply } => {
                let outcome = if sessions.is_bound(&name) {
                    BeginAuthOutcome::NameAlreadyTaken
                } else {
                    match store.hash_of(&name) {
                        Ok(password_hash) => {
                            let nonce = jim_crypto::generate_nonce().to_vec();
                            pending.insert(conn_id, PendingAuth { name, public_key, addr, port, password_hash, nonce: nonce.clone() });
                            BeginAuthOutcome::Challenge { nonce }
                        }
                        Err(StoreError::NotRegistered(_)) => BeginAuthOutcome::NotRegistered,
                        Err(err) => {
                            warn!(%err, "store error during auth lookup");
                            BeginAuthOutcome::NotRegistered
                        }
                    }
                };
                let _ = reply.send(outcome);
            }
            Command::CompleteAuth { conn_id, proof, reply } => {
                let outcome = complete_auth(&store, &mut sessions, &mut pending, conn_id, &proof);
                let _ = reply.send(outcome);
            }
            Command::Dispatch { conn_id, frame, reply } => {
                let decision = decide(&store, &mut sessions, conn_id, frame);
                let outcome = match decision {
                    Decision::Done(outcome) => outcome,
                    Decision::TryForward { dest_conn, msg } => {
                        // The outbox lookup and send happen here, never inside an
                        // `async fn` that also holds a `&CredentialStore` live
                        // across the await: rusqlite's `Connection` is not `Sync`,
                        // so a shared reference to it cannot be part of a
                        // suspended future's state.
                        let sent = match outboxes.get(&dest_conn) {
                            Some(outbox) => outbox.send(Frame::Message(msg.clone())).await.is_ok(),
                            None => false,
                        };
                        if sent {
                            if let Err(err) = store.count_message(&msg.sender, &msg.destination) {
                                warn!(%err, "count_message failed");
                            }
                            DispatchOutcome { reply: Some(Frame::Ok200), close_origin: false }
                        } else {
                            evict(&store, &mut sessions, &msg.destination);
                            DispatchOutcome { reply: None, close_origin: false }
                        }
                    }
                };
                let _ = reply.send(outcome);
            }
            Command::Disconnected { conn_id } => {
                pending.remove(&conn_id);
                outboxes.remove(&conn_id);
                if let Some(name) = sessions.unbind_by_conn(conn_id) {
                    if let Err(err) = store.logout(&name) {
                        warn!(%err, account = %name, "logout on disconnect failed");
                    }
                    info!(account = %name, "session evicted");
                }
            }
            Command::AdminRegister { name, password_hash, reply } => {
                let result = store.register(&name, &password_hash);
                if result.is_ok() {
                    broadcast_reset(&store, &mut sessions, &mut outboxes).await;
                }
                let _ = reply.send(result);
            }
            Command::AdminDelete { name, reply } => {
                let result = store.delete(&name);
                if result.is_ok() {
                    if let Some(conn_id) = sessions.conn_of(&name) {
                        sessions.unbind_by_name(&name);
                        outboxes.remove(&conn_id);
                    }
                    broadcast_reset(&store, &mut sessions, &mut outboxes).await;
                }
                let _ = reply.send(result);
            }
        }
    }
}

fn complete_auth(
    store: &CredentialStore,
    sessions: &mut SessionTable<ConnId>,
    pending: &mut HashMap<ConnId, PendingAuth>,
    conn_id: ConnId,
    proof: &[u8],
) -> CompleteAuthOutcome {
    let Some(auth) = pending.remove(&conn_id) else {
        return CompleteAuthOutcome::WrongPassword;
    };
    let expected = jim_crypto::hmac_md5_proof(&auth.password_hash, &auth.nonce);
    if !proofs_match(&expected, proof) {
        return CompleteAuthOutcome::WrongPassword;
    }
    sessions.bind(&auth.name, conn_id);
    if let Err(err) = store.login(&auth.name, &auth.addr, auth.port, auth.public_key.as_deref()) {
        warn!(%err, account = %auth.name, "login record failed after successful handshake");
    }
    info!(account = %auth.name, addr = %auth.addr, port = auth.port, "session bound");
    CompleteAuthOutcome::Bound
}

/// What the `Dispatch` command handler in `run` should do next. Kept
/// separate from `DispatchOutcome` because forwarding a MESSAGE needs an
/// `.await` on the destination's outbox, which must happen in `run`
/// itself rather than inside a function holding a `&CredentialStore`
/// (see the comment at the `TryForward` call site).
enum Decision {
    Done(DispatchOutcome),
    TryForward { dest_conn: ConnId, msg: jim_protocol::MessageFrame },
}

fn decide(store: &CredentialStore, sessions: &mut SessionTable<ConnId>, conn_id: ConnId, frame: Frame) -> Decision {
    let Some(origin_name) = sessions.name_of(conn_id).map(str::to_owned) else {
        return Decision::Done(DispatchOutcome { reply: Some(bad_request("not authenticated")), close_origin: true });
    };

    match frame {
        Frame::Message(msg) => {
            if msg.sender != origin_name {
                return close_on_origin_mismatch();
            }
            match sessions.conn_of(&msg.destination) {
                Some(dest_conn) => Decision::TryForward { dest_conn, msg },
                // Not currently bound, whether registered-but-offline or
                // unknown: messages to absent recipients are rejected, not
                // queued. The no-reply path is reserved for a destination
                // that *was* bound but whose send failed (see TryForward's
                // caller in `run`), which still needs eviction, not a 400.
                None => Decision::Done(DispatchOutcome { reply: Some(bad_request("user not registered")), close_origin: false }),
            }
        }
        Frame::GetContacts(req) => {
            if req.user != origin_name {
                return close_on_origin_mismatch();
            }
            let contacts = store.contacts_of(&req.user).unwrap_or_default();
            Decision::Done(DispatchOutcome { reply: Some(Frame::List202(jim_protocol::ListInfo { list_info: contacts })), close_origin: false })
        }
        Frame::AddContact(edit) => {
            if edit.user != origin_name {
                return close_on_origin_mismatch();
            }
            if let Err(err) = store.add_contact(&edit.user, &edit.account_name) {
                warn!(%err, "add_contact failed");
            }
            Decision::Done(DispatchOutcome { reply: Some(Frame::Ok200), close_origin: false })
        }
        Frame::RemoveContact(edit) => {
            if edit.user != origin_name {
                return close_on_origin_mismatch();
            }
            if let Err(err) = store.remove_contact(&edit.user, &edit.account_name) {
                warn!(%err, "remove_contact failed");
            }
            Decision::Done(DispatchOutcome { reply: Some(Frame::Ok200), close_origin: false })
        }
        Frame::UsersRequest(req) => {
            if req.account_name != origin_name {
                return close_on_origin_mismatch();
            }
            let names = store.all_users().unwrap_or_default().into_iter().map(|u| u.name).collect();
            Decision::Done(DispatchOutcome { reply: Some(Frame::List202(jim_protocol::ListInfo { list_info: names })), close_origin: false })
        }
        Frame::PublicKeyRequest(req) => {
            // ACCOUNT_NAME here names the lookup target, not the origin —
            // unlike USERS_REQUEST/EXIT/roster queries, a public-key
            // request is not owner-scoped, so no origin match is required.
            let outcome = match store.public_key_of(&req.account_name) {
                Ok(Some(key)) => DispatchOutcome { reply: Some(Frame::Data511(jim_protocol::Data511 { data: key })), close_origin: false },
                Ok(None) => DispatchOutcome { reply: Some(bad_request("no public key")), close_origin: false },
                Err(_) => DispatchOutcome { reply: Some(bad_request("no public key")), close_origin: false },
            };
            Decision::Done(outcome)
        }
        Frame::Exit(req) => {
            if req.account_name != origin_name {
                return close_on_origin_mismatch();
            }
            evict(store, sessions, &origin_name);
            Decision::Done(DispatchOutcome { reply: None, close_origin: true })
        }
        _ => Decision::Done(DispatchOutcome { reply: Some(bad_request("bad request")), close_origin: true }),
    }
}

fn close_on_origin_mismatch() -> Decision {
    Decision::Done(DispatchOutcome { reply: Some(bad_request("bad request")), close_origin: true })
}

fn evict(store: &CredentialStore, sessions: &mut SessionTable<ConnId>, name: &str) {
    sessions.unbind_by_name(name);
    if let Err(err) = store.logout(name) {
        warn!(%err, account = %name, "logout during eviction failed");
    }
}

fn bad_request(message: &str) -> Frame {
    Frame::Bad400(jim_protocol::BadRequest { error: message.to_owned() })
}

/// Broadcasts a 205 roster-invalidation to every bound session. A failed
/// send (the connection task's outbox is gone or its buffer is closed)
/// evicts that session just like a failed MESSAGE forward does.
async fn broadcast_reset(store: &CredentialStore, sessions: &mut SessionTable<ConnId>, outboxes: &mut HashMap<ConnId, mpsc::Sender<Frame>>) {
    let bound: Vec<(String, ConnId)> = sessions.all_names().map(|name| (name.to_owned(), sessions.conn_of(name).unwrap())).collect();
    for (name, conn_id) in bound {
        let sent = match outboxes.get(&conn_id) {
            Some(outbox) => outbox.send(Frame::Reset205).await.is_ok(),
            None => false,
        };
        if !sent {
            evict(store, sessions, &name);
            outboxes.remove(&conn_id);
        }
    }
}
