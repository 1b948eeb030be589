//! The JIM wire protocol: one UTF-8 JSON object per frame.
//!
//! A frame is tagged by whichever of `ACTION` or `RESPONSE` it carries.
//! [`Frame`] is the single encode/decode boundary against JSON — once a
//! byte slice has become a `Frame`, nothing downstream probes string keys
//! again.

use serde::{Deserialize, Serialize};

pub mod io;

/// Default maximum frame size in bytes. One frame is delivered in a single
/// stream write and read by a single stream read of up to this many bytes;
/// there is no length prefix and no delimiter.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024;

/// Declared text encoding of every frame on the wire.
pub const ENCODING: &str = "utf-8";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame bytes are not valid UTF-8 JSON")]
    MalformedFrame,
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame carries neither ACTION nor RESPONSE")]
    Untagged,
    #[error("unrecognized action {0:?}")]
    UnknownAction(String),
    #[error("unrecognized response code {0}")]
    UnknownResponse(i64),
    #[error("frame missing or mistyped field {0:?}")]
    InvalidShape(&'static str),
    #[error("encoded frame is {actual} bytes, exceeds the {max}-byte limit")]
    TooLarge { max: usize, actual: usize },
}

/// Identity of a user announced during the PRESENCE handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUser {
    pub account_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// `{ACTION:"presence", TIME, USER:{ACCOUNT_NAME, PUBLIC_KEY}}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub time: String,
    pub user: PresenceUser,
}

/// `{ACTION:"msg", SENDER, DESTINATION, TIME, MESSAGE_TEXT}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    pub sender: String,
    pub destination: String,
    pub time: String,
    pub message_text: String,
}

/// `{ACTION:"get_contacts", USER}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetContacts {
    pub user: String,
}

/// `{ACTION:"add_contact"|"remove_contact", USER, ACCOUNT_NAME}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactEdit {
    pub user: String,
    pub account_name: String,
}

/// `{ACTION:"users_request"|"pubkey_need"|"exit", ACCOUNT_NAME}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRef {
    pub account_name: String,
}

/// `{RESPONSE:202, LIST_INFO:[...]}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListInfo {
    pub list_info: Vec<String>,
}

/// `{RESPONSE:400, ERROR:"..."}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadRequest {
    pub error: String,
}

/// `{RESPONSE:511, DATA:"..."}`. Overloaded across three contexts: the
/// server's nonce challenge, the client's HMAC proof, and a public-key
/// reply — the bound connection state at the time a frame is read tells
/// the dispatcher which of the three it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data511 {
    pub data: String,
}

/// A decoded JIM frame, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    // client -> server requests
    Presence(Presence),
    Message(MessageFrame),
    GetContacts(GetContacts),
    AddContact(ContactEdit),
    RemoveContact(ContactEdit),
    UsersRequest(AccountRef),
    PublicKeyRequest(AccountRef),
    Exit(AccountRef),
    // server -> client replies (and the client's 511 proof, which shares
    // the Data511 shape)
    Ok200,
    List202(ListInfo),
    Reset205,
    Bad400(BadRequest),
    Data511(Data511),
}

mod field {
    pub const ACTION: &str = "ACTION";
    pub const RESPONSE: &str = "RESPONSE";
    pub const TIME: &str = "TIME";
    pub const USER: &str = "USER";
    pub const ACCOUNT_NAME: &str = "ACCOUNT_NAME";
    pub const SENDER: &str = "SENDER";
    pub const DESTINATION: &str = "DESTINATION";
    pub const MESSAGE_TEXT: &str = "MESSAGE_TEXT";
    pub const ERROR: &str = "ERROR";
    pub const DATA: &str = "DATA";
    pub const LIST_INFO: &str = "LIST_INFO";
    pub const PUBLIC_KEY: &str = "PUBLIC_KEY";
}

mod action {
    pub const PRESENCE: &str = "presence";
    pub const MESSAGE: &str = "msg";
    pub const EXIT: &str = "exit";
    pub const GET_CONTACTS: &str = "get_contacts";
    pub const ADD_CONTACT: &str = "add_contact";
    pub const REMOVE_CONTACT: &str = "remove_contact";
    pub const USERS_REQUEST: &str = "users_request";
    pub const PUBLIC_KEY_REQUEST: &str = "pubkey_need";
}

type Obj = serde_json::Map<String, serde_json::Value>;

fn get_str(obj: &Obj, key: &'static str) -> Result<String, FrameError> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .ok_or(FrameError::InvalidShape(key))
}

fn get_str_opt(obj: &Obj, key: &'static str) -> Option<String> {
    obj.get(key).and_then(|v| v.as_str()).map(str::to_owned)
}

fn get_i64(obj: &Obj, key: &'static str) -> Result<i64, FrameError> {
    obj.get(key)
        .and_then(serde_json::Value::as_i64)
        .ok_or(FrameError::InvalidShape(key))
}

impl Frame {
    /// Decode one JSON object from `bytes`. `bytes` must be the exact
    /// payload of a single stream read — the codec does not buffer or
    /// split frames.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FrameError::MalformedFrame)?;
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| FrameError::MalformedFrame)?;
        let obj = value.as_object().ok_or(FrameError::NotAnObject)?;
        if let Some(action) = obj.get(field::ACTION).and_then(|v| v.as_str()) {
            return Self::decode_action(action, obj);
        }
        if let Some(response) = obj.get(field::RESPONSE).and_then(serde_json::Value::as_i64) {
            return Self::decode_response(response, obj);
        }
        Err(FrameError::Untagged)
    }

    fn decode_action(action: &str, obj: &Obj) -> Result<Self, FrameError> {
        match action {
            action::PRESENCE => {
                let time = get_str(obj, field::TIME)?;
                let user_val = obj.get(field::USER).ok_or(FrameError::InvalidShape(field::USER))?;
                let user_obj = user_val.as_object().ok_or(FrameError::InvalidShape(field::USER))?;
                let account_name = get_str(user_obj, field::ACCOUNT_NAME)?;
                let public_key = get_str_opt(user_obj, field::PUBLIC_KEY);
                Ok(Frame::Presence(Presence {
                    time,
                    user: PresenceUser { account_name, public_key },
                }))
            }
            action::MESSAGE => Ok(Frame::Message(MessageFrame {
                sender: get_str(obj, field::SENDER)?,
                destination: get_str(obj, field::DESTINATION)?,
                time: get_str(obj, field::TIME)?,
                message_text: get_str(obj, field::MESSAGE_TEXT)?,
            })),
            action::GET_CONTACTS => Ok(Frame::GetContacts(GetContacts { user: get_str(obj, field::USER)? })),
            action::ADD_CONTACT => Ok(Frame::AddContact(ContactEdit {
                user: get_str(obj, field::USER)?,
                account_name: get_str(obj, field::ACCOUNT_NAME)?,
            })),
            action::REMOVE_CONTACT => Ok(Frame::RemoveContact(ContactEdit {
                user: get_str(obj, field::USER)?,
                account_name: get_str(obj, field::ACCOUNT_NAME)?,
            })),
            action::USERS_REQUEST => Ok(Frame::UsersRequest(AccountRef { account_name: get_str(obj, field::ACCOUNT_NAME)? })),
            action::PUBLIC_KEY_REQUEST => Ok(Frame::PublicKeyRequest(AccountRef { account_name: get_str(obj, field::ACCOUNT_NAME)? })),
            action::EXIT => Ok(Frame::Exit(AccountRef { account_name: get_str(obj, field::ACCOUNT_NAME)? })),
            other => Err(FrameError::UnknownAction(other.to_owned())),
        }
    }

    fn decode_response(response: i64, obj: &Obj) -> Result<Self, FrameError> {
        match response {
            200 => Ok(Frame::Ok200),
            202 => {
                let list = obj
                    .get(field::LIST_INFO)
                    .and_then(serde_json::Value::as_array)
                    .ok_or(FrameError::InvalidShape(field::LIST_INFO))?;
                let names = list
                    .iter()
                    .map(|v| v.as_str().map(str::to_owned))
                    .collect::<Option<Vec<_>>>()
                    .ok_or(FrameError::InvalidShape(field::LIST_INFO))?;
                Ok(Frame::List202(ListInfo { list_info: names }))
            }
            205 => Ok(Frame::Reset205),
            400 => Ok(Frame::Bad400(BadRequest { error: get_str(obj, field::ERROR).unwrap_or_default() })),
            511 => Ok(Frame::Data511(Data511 { data: get_str(obj, field::DATA)? })),
            other => Err(FrameError::UnknownResponse(other)),
        }
    }

    /// Encode this frame as a JSON object. Fails if the encoded payload
    /// would exceed `max_bytes`.
    pub fn encode(&self, max_bytes: usize) -> Result<Vec<u8>, FrameError> {
        let value = self.to_json();
        let bytes = serde_json::to_vec(&value).map_err(|_| FrameError::NotAnObject)?;
        if bytes.len() > max_bytes {
            return Err(FrameError::TooLarge { max: max_bytes, actual: bytes.len() });
        }
        Ok(bytes)
    }

    fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Frame::Presence(p) => {
                let mut user = serde_json::Map::new();
                user.insert(field::ACCOUNT_NAME.to_owned(), json!(p.user.account_name));
                if let Some(key) = &p.user.public_key {
                    user.insert(field::PUBLIC_KEY.to_owned(), json!(key));
                }
                json!({ field::ACTION: action::PRESENCE, field::TIME: p.time, field::USER: user })
            }
            Frame::Message(m) => json!({
                field::ACTION: action::MESSAGE,
                field::SENDER: m.sender,
                field::DESTINATION: m.destination,
                field::TIME: m.time,
                field::MESSAGE_TEXT: m.message_text,
            }),
            Frame::GetContacts(g) => json!({ field::ACTION: action::GET_CONTACTS, field::USER: g.user }),
            Frame::AddContact(c) => json!({
                field::ACTION: action::ADD_CONTACT,
                field::USER: c.user,
                field::ACCOUNT_NAME: c.account_name,
            }),
            Frame::RemoveContact(c) => json!({
                field::ACTION: action::REMOVE_CONTACT,
                field::USER: c.user,
                field::ACCOUNT_NAME: c.account_name,
            }),
            Frame::UsersRequest(a) => json!({ field::ACTION: action::USERS_REQUEST, field::ACCOUNT_NAME: a.account_name }),
            Frame::PublicKeyRequest(a) => json!({ field::ACTION: action::PUBLIC_KEY_REQUEST, field::ACCOUNT_NAME: a.account_name }),
            Frame::Exit(a) => json!({ field::ACTION: action::EXIT, field::ACCOUNT_NAME: a.account_name }),
            Frame::Ok200 => json!({ field::RESPONSE: 200 }),
            Frame::List202(l) => json!({ field::RESPONSE: 202, field::LIST_INFO: l.list_info }),
            Frame::Reset205 => json!({ field::RESPONSE: 205 }),
            Frame::Bad400(b) => json!({ field::RESPONSE: 400, field::ERROR: b.error }),
            Frame::Data511(d) => json!({ field::RESPONSE: 511, field::DATA: d.data }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_presence() {
        let frame = Frame::Presence(Presence {
            time: "t".to_owned(),
            user: PresenceUser { account_name: "alice".to_owned(), public_key: Some("key".to_owned()) },
        });
        let bytes = frame.encode(DEFAULT_MAX_FRAME_BYTES).unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn round_trips_message() {
        let frame = Frame::Message(MessageFrame {
            sender: "alice".to_owned(),
            destination: "bob".to_owned(),
            time: "t".to_owned(),
            message_text: "aGk=".to_owned(),
        });
        let bytes = frame.encode(DEFAULT_MAX_FRAME_BYTES).unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn decode_rejects_non_utf8() {
        let bytes = [0xff, 0xfe, 0xfd];
        assert_eq!(Frame::decode(&bytes).unwrap_err(), FrameError::MalformedFrame);
    }

    #[test]
    fn decode_rejects_non_object() {
        let bytes = b"[1,2,3]";
        assert_eq!(Frame::decode(bytes).unwrap_err(), FrameError::NotAnObject);
    }

    #[test]
    fn decode_rejects_untagged_object() {
        let bytes = b"{\"foo\":1}";
        assert_eq!(Frame::decode(bytes).unwrap_err(), FrameError::Untagged);
    }

    #[test]
    fn decode_rejects_unknown_action() {
        let bytes = br#"{"ACTION":"nonsense"}"#;
        assert_eq!(Frame::decode(bytes).unwrap_err(), FrameError::UnknownAction("nonsense".to_owned()));
    }

    #[test]
    fn encode_enforces_max_size() {
        let huge = "x".repeat(2000);
        let frame = Frame::Bad400(BadRequest { error: huge });
        assert!(matches!(frame.encode(DEFAULT_MAX_FRAME_BYTES), Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn list202_round_trips_empty_list() {
        let frame = Frame::List202(ListInfo { list_info: vec![] });
        let bytes = frame.encode(DEFAULT_MAX_FRAME_BYTES).unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }
}
