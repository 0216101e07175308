// Credential persistence
// A single-record key-value store backed by SQLite

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::auth::types::Credential;

/// Key under which the single credential record is stored
const CREDENTIAL_KEY: &str = "spotify:token";

/// Durable storage for the one connected account's credential.
///
/// The store is the single source of truth: the manager re-reads on every
/// call and holds no cached copy. Reads that fail at the store layer
/// (missing table, malformed blob, record missing a required field) surface
/// as absent; write failures propagate to the caller.
///
/// The single-record read-modify-write is not atomic. Concurrent requests
/// can both observe an expiring credential, both refresh, and both write -
/// last-writer-wins. Accepted for a single-user system: a fresh credential
/// from either writer is itself valid.
pub trait CredentialStore: Send + Sync {
    /// Read the stored credential, if any
    fn get(&self) -> Option<Credential>;

    /// Persist the credential (full overwrite)
    fn put(&self, credential: &Credential) -> Result<()>;
}

/// SQLite-backed store holding the credential as a JSON blob in a
/// key-value table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`, creating parent directories
    /// and the key-value table as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;

        Self::init(conn)
    }

    /// Open an in-memory store (tests, ephemeral runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CredentialStore for SqliteStore {
    fn get(&self) -> Option<Credential> {
        let conn = self.conn.lock().ok()?;

        let blob: String = conn
            .query_row(
                "SELECT value FROM auth_kv WHERE key = ?",
                [CREDENTIAL_KEY],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                tracing::warn!("Credential read failed, treating as absent: {}", e);
                None
            })?;

        match serde_json::from_str::<Credential>(&blob) {
            Ok(credential) => Some(credential),
            Err(e) => {
                tracing::warn!("Stored credential is malformed, treating as absent: {}", e);
                None
            }
        }
    }

    fn put(&self, credential: &Credential) -> Result<()> {
        let blob = serde_json::to_string(credential).context("Failed to serialize credential")?;

        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;

        conn.execute(
            "INSERT OR REPLACE INTO auth_kv (key, value) VALUES (?, ?)",
            [CREDENTIAL_KEY, blob.as_str()],
        )
        .context("Failed to write credential")?;

        Ok(())
    }
}

/// In-memory store used by tests and `--ephemeral` runs. Contents are lost
/// on shutdown, so every restart requires a fresh login.
#[derive(Default)]
pub struct MemoryStore {
    credential: Mutex<Option<Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct pre-seeded with a credential
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self) -> Option<Credential> {
        self.credential.lock().ok()?.clone()
    }

    fn put(&self, credential: &Credential) -> Result<()> {
        let mut slot = self
            .credential
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        *slot = Some(credential.clone());
        Ok(())
    }
}
