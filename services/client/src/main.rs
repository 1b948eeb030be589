//! Minimal line-oriented driver for [`client::ClientTransport`]. There is no
//! GUI here — this binary exists so the transport core is independently
//! runnable and testable from a shell.

use base64::Engine;
use clap::Parser;
use client::{ClientEvent, ClientTransport};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jim-client", about = "Minimal JIM chat client transport driver")]
struct Args {
    /// host:port of the JIM server.
    #[arg(long, env = "JIM_SERVER_ADDR", default_value = "127.0.0.1:7777")]
    addr: String,
    /// Account name to authenticate as.
    #[arg(long, env = "JIM_ACCOUNT")]
    account: String,
    /// Account password (used to derive the PBKDF2 hash client-side).
    #[arg(long, env = "JIM_PASSWORD")]
    password: String,
    /// Path to this account's local mirror database.
    #[arg(long, env = "JIM_CLIENT_DB")]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let db_path = args.db.unwrap_or_else(|| PathBuf::from(format!("{}.sqlite3", args.account)));

    let time = chrono::Utc::now().to_rfc3339();
    let (transport, mut events) = match ClientTransport::connect(&args.addr, &args.account, &args.password, None, &time, &db_path).await {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("fatal: {err}");
            std::process::exit(1);
        }
    };
    info!(account = %args.account, addr = %args.addr, "connected");

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::NewMessage(m) => {
                    let text = base64::engine::general_purpose::STANDARD
                        .decode(&m.message_text)
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                        .unwrap_or_else(|_| "<undecodable payload>".to_owned());
                    println!("{}: {}", m.sender, text);
                }
                ClientEvent::RosterInvalidated => {
                    println!("(roster changed on the server; run `users` or `contacts` to refresh)");
                }
                ClientEvent::ConnectionLost => {
                    warn!("connection lost");
                    println!("(connection lost)");
                    break;
                }
            }
        }
    });

    println!("commands: send <user> <text> | users | contacts | addcontact <name> | removecontact <name> | pubkey <name> | exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.splitn(3, ' ');
        match parts.next().unwrap_or_default() {
            "send" => {
                let (Some(to), Some(text)) = (parts.next(), parts.next()) else {
                    println!("usage: send <user> <text>");
                    continue;
                };
                let encoded = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
                let time = chrono::Utc::now().to_rfc3339();
                if let Err(err) = transport.send_message(to, &encoded, &time).await {
                    error!(%err, "send failed");
                }
            }
            "users" => match transport.user_list_update().await {
                Ok(names) => println!("{}", names.join(", ")),
                Err(err) => error!(%err, "users request failed"),
            },
            "contacts" => match transport.contacts_list_update().await {
                Ok(names) => println!("{}", names.join(", ")),
                Err(err) => error!(%err, "contacts request failed"),
            },
            "addcontact" => {
                if let Some(name) = parts.next() {
                    if let Err(err) = transport.add_contact(name).await {
                        error!(%err, "add_contact failed");
                    }
                }
            }
            "removecontact" => {
                if let Some(name) = parts.next() {
                    if let Err(err) = transport.remove_contact(name).await {
                        error!(%err, "remove_contact failed");
                    }
                }
            }
            "pubkey" => {
                if let Some(name) = parts.next() {
                    match transport.request_public_key(name).await {
                        Ok(key) => println!("{key}"),
                        Err(err) => error!(%err, "public key request failed"),
                    }
                }
            }
            "exit" => break,
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    transport.shutdown().await;
}
