//! Chat wire protocol: newline-delimited compact JSON over TCP.
//!
//! Each inbound line is one [`Command`], tagged by its `command` field.
//! Each outbound line is one [`Outgoing`]: either an [`Ack`] for the
//! requester or an [`Event`] pushed to one or many clients. One JSON
//! object per line, UTF-8, no framing beyond `\n`.

use serde::{Deserialize, Serialize};

/// Client request, decoded once from an inbound frame.
///
/// Missing string fields decode as empty strings: the desktop client
/// hand-builds its frames and the server has always tolerated absent keys.
/// Unknown extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Login {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    Register {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    SendMessage {
        #[serde(default)]
        message: String,
    },
    GetHistory {
        #[serde(default)]
        limit: Option<i64>,
    },
    GetOnlineUsers,
}

impl Command {
    /// Decode a command from an already-parsed frame.
    ///
    /// Fails on a missing/unknown `command` tag or a wrong-typed field;
    /// the caller answers those with an `unknown command` ack.
    pub fn from_frame(frame: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(frame)
    }
}

/// Server push event, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// One chat line: live broadcast or a `History` entry.
    Message {
        sender: String,
        content: String,
        timestamp: String,
    },
    /// Join/leave announcement.
    System { content: String, timestamp: String },
    /// Replay of recent messages, oldest first.
    History { messages: Vec<Event> },
    /// Presence snapshot. `users` is sorted ascending.
    OnlineUsers { count: usize, users: Vec<String> },
}

impl Event {
    /// System announcement stamped with the current time.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
            timestamp: now_iso8601(),
        }
    }
}

/// Command acknowledgement, unicast to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: Status,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

impl Ack {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
        }
    }
}

/// Anything the server writes to a client, one JSON line per item.
///
/// Untagged: an `Ack` serializes as `{"status":...,"message":...}` and an
/// `Event` as `{"type":...}`, exactly as the client expects. This is the
/// item type of the outbound channel and the codec's encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outgoing {
    Ack(Ack),
    Event(Event),
}

impl From<Ack> for Outgoing {
    fn from(ack: Ack) -> Self {
        Self::Ack(ack)
    }
}

impl From<Event> for Outgoing {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

/// Current UTC time in the wire's second-resolution ISO 8601 format.
pub fn now_iso8601() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
