//! Persistent ticket storage.
//!
//! The authority refuses to issue a second ticket for a service while the
//! first one is still valid (`coe.alreadyAuthenticated`). A process that
//! restarts without remembering its tickets is locked out until they expire,
//! so issued tickets can be persisted through a [`TicketStore`].
//!
//! The manager treats the store as best effort: load failures fall back to
//! authenticating, and save failures are logged without failing the caller.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::{
    error::{Result, TicketError},
    types::{Environment, Ticket, TicketKey},
};

/// Durable storage for issued tickets.
#[async_trait]
pub trait TicketStore: Send + Sync + 'static {
    /// Loads the ticket stored under `key`, if any.
    ///
    /// Returns `Ok(None)` when nothing is stored or the stored ticket belongs
    /// to a different key. Usability is not checked.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Store`] if the stored data cannot be read or
    /// decoded.
    async fn load(&self, key: &TicketKey) -> Result<Option<Ticket>>;

    /// Persists `ticket` under `key`, replacing any previous ticket.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Store`] if the ticket cannot be written.
    async fn save(&self, key: &TicketKey, ticket: &Ticket) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredTicket {
    environment: Environment,
    service: String,
    ticket: Ticket,
}

/// [`TicketStore`] keeping one JSON file per key in a directory.
///
/// Files are named `{environment}-{service}-{identity}.json`, with the
/// service passed through [`encode_service`] so distinct keys never share
/// a file. Writes go to a temporary file, created owner-only on Unix, that
/// is renamed into place.
#[derive(Debug)]
pub struct FileTicketStore {
    dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileTicketStore {
    /// Creates a store rooted at `dir`. The directory is created on first
    /// save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), tmp_counter: AtomicU64::new(0) }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file path used for `key`.
    #[must_use]
    pub fn path_for(&self, key: &TicketKey) -> PathBuf {
        self.dir.join(file_name(key))
    }
}

/// Encodes a service name for use in a file name.
///
/// Bytes in `[A-Za-z0-9_-]` are kept; every other byte of the UTF-8
/// encoding, `%` included, becomes `%XX` (uppercase hex). The encoding is
/// reversible, so different services always get different names.
#[must_use]
pub fn encode_service(service: &str) -> String {
    use std::fmt::Write;

    let mut encoded = String::with_capacity(service.len());
    for byte in service.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

fn file_name(key: &TicketKey) -> String {
    format!("{}-{}-{}.json", key.environment(), encode_service(key.service()), key.identity())
}

#[async_trait]
impl TicketStore for FileTicketStore {
    #[tracing::instrument(name = "ticket_store_load", skip(self), fields(key = %key))]
    async fn load(&self, key: &TicketKey) -> Result<Option<Ticket>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TicketError::store_with_source(
                    format!("failed to read {}", path.display()),
                    e,
                ));
            },
        };

        let stored: StoredTicket = serde_json::from_slice(&bytes).map_err(|e| {
            TicketError::store_with_source(format!("failed to decode {}", path.display()), e)
        })?;

        if stored.environment != key.environment()
            || stored.service != key.service()
            || stored.ticket.identity != key.identity()
        {
            tracing::warn!(path = %path.display(), "Stored ticket belongs to a different key");
            return Ok(None);
        }

        Ok(Some(stored.ticket))
    }

    #[tracing::instrument(name = "ticket_store_save", skip(self, ticket), fields(key = %key))]
    async fn save(&self, key: &TicketKey, ticket: &Ticket) -> Result<()> {
        let stored = StoredTicket {
            environment: key.environment(),
            service: key.service().to_owned(),
            ticket: ticket.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&stored)
            .map_err(|e| TicketError::store_with_source("failed to encode ticket", e))?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            TicketError::store_with_source(format!("failed to create {}", self.dir.display()), e)
        })?;

        let path = self.path_for(key);
        let tmp = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            file_name(key),
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        let write = async {
            let mut options = tokio::fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            options.mode(0o600);
            let mut file = options.open(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(TicketError::store_with_source(
                format!("failed to write {}", path.display()),
                e,
            ));
        }
        Ok(())
    }
}
