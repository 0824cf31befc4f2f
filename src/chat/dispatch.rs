/// Command dispatch: one inbound frame in, acks and broadcasts out.
///
/// Each connection task hands frames here together with its outbound
/// channel. Every outcome, including the requester's own unicasts, travels
/// through that channel, so a client observes responses in exactly the
/// order they were produced. Dispatch never fails; bad input becomes an
/// error ack and the connection keeps serving.
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::protocol::{Ack, Command, Event, Outgoing};
use super::registry::{ConnId, Registry};
use crate::store::{Store, StoredMessage};

/// History page served on login and whenever a requested limit is missing
/// or out of range.
const DEFAULT_HISTORY_LIMIT: i64 = 50;
/// Largest history page a client may request.
const MAX_HISTORY_LIMIT: i64 = 200;

pub struct Dispatcher {
    registry: Arc<Registry>,
    store: Store,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, store: Store) -> Self {
        Self { registry, store }
    }

    /// Process one frame from a connection.
    ///
    /// A frame that is not a JSON object is answered with a best-effort
    /// `malformed frame` ack and skipped; one bad client frame must not
    /// cost anyone their session. A JSON object that fails command decoding
    /// gets `unknown command`.
    pub async fn dispatch(
        &self,
        conn_id: ConnId,
        tx: &mpsc::UnboundedSender<Outgoing>,
        frame: &[u8],
    ) {
        let value: serde_json::Value = match serde_json::from_slice(frame) {
            Ok(v) => v,
            Err(e) => {
                warn!(conn = %conn_id, "malformed frame: {e}");
                reply(tx, Ack::error("malformed frame"));
                return;
            }
        };
        if !value.is_object() {
            warn!(conn = %conn_id, "malformed frame: not a JSON object");
            reply(tx, Ack::error("malformed frame"));
            return;
        }

        let command = match Command::from_frame(value) {
            Ok(c) => c,
            Err(e) => {
                warn!(conn = %conn_id, "unrecognized command: {e}");
                reply(tx, Ack::error("unknown command"));
                return;
            }
        };

        match command {
            Command::Login { username, password } => {
                self.login(conn_id, tx, &username, &password).await;
            }
            Command::Register { username, password } => self.register(tx, &username, &password),
            Command::SendMessage { message } => self.send_message(conn_id, tx, &message).await,
            Command::GetHistory { limit } => self.get_history(conn_id, tx, limit).await,
            Command::GetOnlineUsers => self.get_online_users(conn_id, tx).await,
        }
    }

    /// Disconnect cleanup. Quiet for connections that never authenticated,
    /// and on repeat calls for the same connection.
    pub async fn disconnect(&self, conn_id: ConnId) {
        let Some(username) = self.registry.remove(conn_id).await else {
            return;
        };
        info!(conn = %conn_id, user = %username, "logged out");

        self.registry
            .broadcast(Event::system(format!("{username} has left the chat")).into())
            .await;
        self.broadcast_online_users().await;
    }

    async fn login(
        &self,
        conn_id: ConnId,
        tx: &mpsc::UnboundedSender<Outgoing>,
        username: &str,
        password: &str,
    ) {
        if self.registry.username_of(conn_id).await.is_some() {
            reply(tx, Ack::error("already logged in"));
            return;
        }

        // Credentials first; the online check only happens for valid ones.
        match self.store.verify_credentials(username, password) {
            Ok(true) => {}
            Ok(false) => {
                reply(tx, Ack::error("invalid login or password"));
                return;
            }
            Err(e) => {
                warn!(conn = %conn_id, "credential check failed: {e}");
                reply(tx, Ack::error("invalid login or password"));
                return;
            }
        }

        if self
            .registry
            .register(conn_id, username, tx.clone())
            .await
            .is_err()
        {
            reply(tx, Ack::error("user already online"));
            return;
        }

        info!(conn = %conn_id, user = %username, "logged in");

        // The requester is registered by now and receives the join
        // announcement too, ahead of their history and ack.
        self.registry
            .broadcast(Event::system(format!("{username} has joined the chat")).into())
            .await;
        reply(tx, self.history_event(DEFAULT_HISTORY_LIMIT));
        self.broadcast_online_users().await;
        reply(tx, Ack::ok("success login"));
    }

    fn register(&self, tx: &mpsc::UnboundedSender<Outgoing>, username: &str, password: &str) {
        match self.store.create_user(username, password) {
            Ok(()) => {
                info!(user = %username, "registered");
                reply(tx, Ack::ok("success register"));
            }
            Err(e) => {
                // One generic rejection regardless of cause.
                warn!(user = %username, "register failed: {e}");
                reply(tx, Ack::error("unsuccessful register"));
            }
        }
    }

    async fn send_message(
        &self,
        conn_id: ConnId,
        tx: &mpsc::UnboundedSender<Outgoing>,
        message: &str,
    ) {
        let Some(sender) = self.registry.username_of(conn_id).await else {
            reply(tx, Ack::error("not authenticated"));
            return;
        };

        let content = message.trim();
        if content.is_empty() {
            reply(tx, Ack::error("empty message"));
            return;
        }

        let stored = match self.store.save_message(&sender, content) {
            Ok(m) => m,
            Err(e) => {
                warn!(user = %sender, "save failed: {e}");
                reply(tx, Ack::error("failed to save message"));
                return;
            }
        };

        // The broadcast is the confirmation; no unicast ack on success.
        self.registry.broadcast(message_event(stored).into()).await;
    }

    async fn get_history(
        &self,
        conn_id: ConnId,
        tx: &mpsc::UnboundedSender<Outgoing>,
        limit: Option<i64>,
    ) {
        if self.registry.username_of(conn_id).await.is_none() {
            reply(tx, Ack::error("not authenticated"));
            return;
        }

        reply(tx, self.history_event(clamp_limit(limit)));
    }

    async fn get_online_users(&self, conn_id: ConnId, tx: &mpsc::UnboundedSender<Outgoing>) {
        if self.registry.username_of(conn_id).await.is_none() {
            reply(tx, Ack::error("not authenticated"));
            return;
        }

        reply(tx, self.online_users_event().await);
    }

    /// Recent messages as a history event, oldest first. A failed read is
    /// logged and served as an empty page.
    fn history_event(&self, limit: i64) -> Event {
        let mut messages = match self.store.recent_messages(limit) {
            Ok(m) => m,
            Err(e) => {
                warn!("history fetch failed: {e}");
                Vec::new()
            }
        };
        messages.reverse();
        Event::History {
            messages: messages.into_iter().map(message_event).collect(),
        }
    }

    async fn online_users_event(&self) -> Event {
        let users = self.registry.online_users().await;
        Event::OnlineUsers {
            count: users.len(),
            users,
        }
    }

    async fn broadcast_online_users(&self) {
        let event = self.online_users_event().await;
        self.registry.broadcast(event.into()).await;
    }
}

/// Missing and out-of-range limits silently fall back to the default page.
fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(l) if (1..=MAX_HISTORY_LIMIT).contains(&l) => l,
        _ => DEFAULT_HISTORY_LIMIT,
    }
}

fn message_event(m: StoredMessage) -> Event {
    Event::Message {
        sender: m.sender,
        content: m.content,
        timestamp: m.timestamp,
    }
}

/// Best-effort unicast: a closed receiver means that connection's task is
/// already unwinding.
fn reply(tx: &mpsc::UnboundedSender<Outgoing>, outgoing: impl Into<Outgoing>) {
    let _ = tx.send(outgoing.into());
}
