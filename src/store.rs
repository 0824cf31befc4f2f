//! SQLite persistence: user accounts and message history.
//!
//! A thin gateway around one connection behind a mutex (rusqlite is not
//! Send). Every operation is a short synchronous transaction; callers treat
//! any [`StoreError`] as the command's generic failure and keep serving.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::chat::protocol::now_iso8601;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    password TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender TEXT NOT NULL REFERENCES users(username),
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
"#;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("empty username or password")]
    EmptyCredentials,

    #[error("username already taken: {0}")]
    UsernameTaken(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// One persisted chat message. Immutable once saved; the timestamp is
/// assigned by the server at save time, never client-supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub sender: String,
    pub content: String,
    pub timestamp: String,
}

/// Thread-safe SQLite connection wrapper.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Self::prepare(&conn)?;

        info!(path = %path.display(), "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Self::prepare(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    fn prepare(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(PRAGMAS)
            .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StoreError::Database(format!("schema: {e}")))?;
        Ok(())
    }

    /// Execute a closure with the database connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check a username/password pair against the users table.
    ///
    /// `Ok(false)` covers both unknown user and wrong password; callers never
    /// learn which. Passwords are stored and compared in clear text: the
    /// existing databases and the desktop client depend on that contract.
    pub fn verify_credentials(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT password FROM users WHERE username = ?1",
                    [username],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(stored.is_some_and(|stored| stored == password))
        })
    }

    /// Create an account. Fails on empty fields or a taken username.
    pub fn create_user(&self, username: &str, password: &str) -> Result<(), StoreError> {
        if username.is_empty() || password.is_empty() {
            return Err(StoreError::EmptyCredentials);
        }

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, created_at) VALUES (?1, ?2, ?3)",
                params![username, password, now_iso8601()],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::UsernameTaken(username.to_owned())
                }
                other => StoreError::Database(other.to_string()),
            })?;
            Ok(())
        })
    }

    /// Persist one message, stamping it with the current time. Returns the
    /// stored row so the caller broadcasts the same timestamp history will
    /// later report.
    pub fn save_message(&self, sender: &str, content: &str) -> Result<StoredMessage, StoreError> {
        let timestamp = now_iso8601();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender, content, timestamp) VALUES (?1, ?2, ?3)",
                params![sender, content, &timestamp],
            )?;
            Ok(())
        })?;

        Ok(StoredMessage {
            sender: sender.to_owned(),
            content: content.to_owned(),
            timestamp,
        })
    }

    /// Up to `limit` most recent messages, newest first. Ordered by insert
    /// id, which stays stable when second-resolution timestamps collide.
    pub fn recent_messages(&self, limit: i64) -> Result<Vec<StoredMessage>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender, content, timestamp FROM messages ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], |row| {
                Ok(StoredMessage {
                    sender: row.get(0)?,
                    content: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(StoreError::from)
        })
    }
}
