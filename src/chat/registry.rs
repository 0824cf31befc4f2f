/// Presence: the authoritative mapping between live connections and
/// authenticated usernames, plus each session's outbound channel. The one
/// piece of state shared across connections.
use std::collections::HashMap;
use std::fmt;

use tokio::sync::{mpsc, RwLock};

use super::protocol::Outgoing;

/// Identity of one live connection, allocated by the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Login rejected: the username already has a live session.
#[derive(Debug, thiserror::Error)]
#[error("user already online")]
pub struct AlreadyOnline;

#[derive(Debug)]
struct Session {
    username: String,
    tx: mpsc::UnboundedSender<Outgoing>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<ConnId, Session>,
    by_name: HashMap<String, ConnId>,
}

/// Shared presence state. One lock over both maps: login and disconnect
/// observe and mutate them as a single critical section.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `username` to this connection.
    ///
    /// The check and the insert happen under one write lock, so two racing
    /// logins for the same name cannot both win. Fails without mutating
    /// anything if the name is taken or the connection already has a session.
    pub async fn register(
        &self,
        conn_id: ConnId,
        username: &str,
        tx: mpsc::UnboundedSender<Outgoing>,
    ) -> Result<(), AlreadyOnline> {
        let mut inner = self.inner.write().await;
        if inner.by_name.contains_key(username) || inner.sessions.contains_key(&conn_id) {
            return Err(AlreadyOnline);
        }
        inner.by_name.insert(username.to_owned(), conn_id);
        inner.sessions.insert(
            conn_id,
            Session {
                username: username.to_owned(),
                tx,
            },
        );
        Ok(())
    }

    /// Drop this connection's session if it has one, returning the username
    /// that was bound. Returns `None` on repeat calls, which makes
    /// disconnect cleanup idempotent.
    pub async fn remove(&self, conn_id: ConnId) -> Option<String> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.remove(&conn_id)?;
        inner.by_name.remove(&session.username);
        Some(session.username)
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.inner.read().await.by_name.contains_key(username)
    }

    pub async fn username_of(&self, conn_id: ConnId) -> Option<String> {
        self.inner
            .read()
            .await
            .sessions
            .get(&conn_id)
            .map(|s| s.username.clone())
    }

    /// Online usernames, lexicographically ascending.
    pub async fn online_users(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut users: Vec<String> = inner.by_name.keys().cloned().collect();
        users.sort();
        users
    }

    /// Deliver to every authenticated connection, best-effort, from one
    /// consistent snapshot. A closed receiver is skipped: that connection's
    /// task is already unwinding and runs its own disconnect cleanup.
    pub async fn broadcast(&self, outgoing: Outgoing) {
        let inner = self.inner.read().await;
        for session in inner.sessions.values() {
            let _ = session.tx.send(outgoing.clone());
        }
    }
}
