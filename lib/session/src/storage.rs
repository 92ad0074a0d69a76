//! Durable storage for the session credential.
//!
//! The persisted layout is three keys: `access_token`, `refresh_token`
//! and an optional `portal_type`. A reload reads them back so the user
//! does not have to sign in again.

use async_trait::async_trait;
use rava_core::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::credential::Credential;
use crate::error::StoreError;
use crate::role::Portal;

/// Persisted form of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_type: Option<String>,
}

impl StoredSession {
    /// Builds the persisted form of a credential and its portal.
    #[must_use]
    pub fn new(credential: &Credential, portal: Portal) -> Self {
        Self {
            access_token: credential.access_token().to_string(),
            refresh_token: credential.refresh_token().to_string(),
            portal_type: portal.persisted_marker().map(str::to_string),
        }
    }

    #[must_use]
    pub fn credential(&self) -> Credential {
        Credential::new(self.access_token.clone(), self.refresh_token.clone())
    }

    /// Portal recorded at login, if one was recorded.
    #[must_use]
    pub fn portal(&self) -> Option<Portal> {
        Portal::from_marker(self.portal_type.as_deref())
    }
}

/// Trait for credential persistence.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads the stored session, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read or decoded.
    async fn load(&self) -> Result<Option<StoredSession>, StoreError>;

    /// Replaces the stored session.
    async fn save(&self, session: &StoredSession) -> Result<(), StoreError>;

    /// Removes the stored session. Removing nothing is not an error.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory store for tests and short-lived clients.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Option<StoredSession>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds a session.
    #[must_use]
    pub fn with_session(session: StoredSession) -> Self {
        Self {
            inner: Mutex::new(Some(session)),
        }
    }

    /// Returns a copy of what is currently stored.
    #[must_use]
    pub fn snapshot(&self) -> Option<StoredSession> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn set(&self, value: Option<StoredSession>) {
        *self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = value;
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self) -> Result<Option<StoredSession>, StoreError> {
        Ok(self.snapshot())
    }

    async fn save(&self, session: &StoredSession) -> Result<(), StoreError> {
        self.set(Some(session.clone()));
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.set(None);
        Ok(())
    }
}

/// JSON file store.
///
/// Writes go to a sibling temp file which is then renamed over the
/// target, so a crash never leaves a half-written credential behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, err: &std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            details: err.to_string(),
        }
    }
}

/// Writes `bytes` to a fresh owner-only temp file beside `path`, then
/// renames it over `path`. Each write gets its own temp file, so
/// overlapping saves never trip over each other.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn load(&self) -> Result<Option<StoredSession>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(&e).into()),
        };

        let session = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            details: e.to_string(),
        })?;
        Ok(Some(session))
    }

    async fn save(&self, session: &StoredSession) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(session).map_err(|e| StoreError::Corrupt {
            details: e.to_string(),
        })?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_private(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io {
                path: self.path.display().to_string(),
                details: e.to_string(),
            })?
            .map_err(|e| self.io_error(&e))?;

        debug!(path = %self.path.display(), "stored session credential");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(&e).into()),
        }
    }
}
