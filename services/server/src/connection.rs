//! Per-connection task: owns one socket, drives the PRESENCE handshake,
//! then alternates between frames arriving on the wire and frames the
//! registry pushes for delivery (a forwarded MESSAGE, or a 205
//! roster-invalidation broadcast). Every state mutation is delegated to the
//! registry actor; this task never touches `SessionTable` or
//! `CredentialStore` directly — only the registry is ever allowed to write.

use crate::registry::{BeginAuthOutcome, CompleteAuthOutcome, ConnId, RegistryHandle};
use jim_protocol::io::{recv_frame, send_frame, FrameIoError};
use jim_protocol::{Data511, Frame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn handle(conn_id: ConnId, mut stream: TcpStream, peer_addr: std::net::SocketAddr, registry: RegistryHandle) {
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Frame>(32);
    registry.connect(conn_id, outbox_tx).await;

    match authenticate(conn_id, &mut stream, peer_addr, &registry).await {
        Ok(name) => info!(account = %name, %peer_addr, "handshake complete"),
        Err(reason) => {
            debug!(%peer_addr, %reason, "handshake failed");
            registry.disconnected(conn_id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = recv_frame(&mut stream) => {
                match incoming {
                    Ok(frame) => {
                        let outcome = registry.dispatch(conn_id, frame).await;
                        if let Some(reply) = outcome.reply {
                            if send_frame(&mut stream, &reply).await.is_err() {
                                break;
                            }
                        }
                        if outcome.close_origin {
                            break;
                        }
                    }
                    Err(FrameIoError::Closed) => break,
                    Err(err) => {
                        warn!(%err, %peer_addr, "frame decode/IO error, evicting connection");
                        break;
                    }
                }
            }
            pushed = outbox_rx.recv() => {
                match pushed {
                    Some(frame) => {
                        if send_frame(&mut stream, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    registry.disconnected(conn_id).await;
}

async fn authenticate(
    conn_id: ConnId,
    stream: &mut TcpStream,
    peer_addr: std::net::SocketAddr,
    registry: &RegistryHandle,
) -> Result<String, &'static str> {
    let first = recv_frame(stream).await.map_err(|_| "io error awaiting presence")?;
    let Frame::Presence(presence) = first else {
        let _ = send_frame(stream, &bad_request("bad request")).await;
        return Err("first frame was not presence");
    };
    let name = presence.user.account_name;
    let public_key = presence.user.public_key;

    let outcome = registry
        .begin_auth(conn_id, name.clone(), public_key, peer_addr.ip().to_string(), peer_addr.port())
        .await;
    let nonce = match outcome {
        BeginAuthOutcome::Challenge { nonce } => nonce,
        BeginAuthOutcome::NameAlreadyTaken => {
            let _ = send_frame(stream, &bad_request("name already taken")).await;
            return Err("name already taken");
        }
        BeginAuthOutcome::NotRegistered => {
            let _ = send_frame(stream, &bad_request("not registered")).await;
            return Err("not registered");
        }
    };

    let challenge = Frame::Data511(Data511 { data: jim_crypto::encode_nonce_hex(&nonce) });
    send_frame(stream, &challenge).await.map_err(|_| "io error sending challenge")?;

    let second = recv_frame(stream).await.map_err(|_| "io error awaiting proof")?;
    let Frame::Data511(proof_frame) = second else {
        let _ = send_frame(stream, &bad_request("bad request")).await;
        return Err("second frame was not a proof");
    };
    let proof = jim_crypto::decode_proof_base64(&proof_frame.data).map_err(|_| "malformed proof encoding")?;

    match registry.complete_auth(conn_id, proof).await {
        CompleteAuthOutcome::Bound => {
            send_frame(stream, &Frame::Ok200).await.map_err(|_| "io error sending 200")?;
            Ok(name)
        }
        CompleteAuthOutcome::WrongPassword => {
            let _ = send_frame(stream, &bad_request("wrong password")).await;
            Err("wrong password")
        }
    }
}

fn bad_request(message: &str) -> Frame {
    Frame::Bad400(jim_protocol::BadRequest { error: message.to_owned() })
}
