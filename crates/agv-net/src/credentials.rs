//! Persistent network credentials.
//!
//! Credentials live under a single `[agvnet]` table:
//!
//! ```toml
//! [agvnet]
//! ssid = "Depot-5G"
//! password = "..."
//! ```
//!
//! [`FileCredentialStore`] writes that table to disk with owner-only
//! permissions.  [`MemoryCredentialStore`] keeps it in RAM for tests and
//! for runs that should forget everything on exit.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use agv_types::{AgvError, Credentials};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Storage namespace for the saved network.
pub const NAMESPACE: &str = "agvnet";

/// Load / save / clear the single saved network.
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Credentials>, AgvError>;

    /// Replace the saved network.
    fn save(&self, credentials: &Credentials) -> Result<(), AgvError>;

    /// Forget the saved network.  Clearing an empty store is not an error.
    fn clear(&self) -> Result<(), AgvError>;
}

#[derive(Deserialize)]
struct StoreFile {
    agvnet: Option<Credentials>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    agvnet: &'a Credentials,
}

// ---------------------------------------------------------------------------
// FileCredentialStore
// ---------------------------------------------------------------------------

/// TOML file store.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credentials>, AgvError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no credential file");
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            AgvError::Storage(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let file: StoreFile = toml::from_str(&raw).map_err(|e| {
            AgvError::Storage(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(file.agvnet)
    }

    fn save(&self, credentials: &Credentials) -> Result<(), AgvError> {
        // Only a directory created here is restricted; an existing parent
        // keeps whatever mode its owner gave it.
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty())
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                AgvError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                    AgvError::Storage(format!("failed to restrict {}: {e}", parent.display()))
                })?;
            }
        }

        let raw = toml::to_string_pretty(&StoreFileRef { agvnet: credentials })
            .map_err(|e| AgvError::Storage(format!("failed to serialize credentials: {e}")))?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .and_then(|mut f| f.write_all(raw.as_bytes()))
                .map_err(|e| {
                    AgvError::Storage(format!("failed to write {}: {e}", self.path.display()))
                })?;
        }
        #[cfg(not(unix))]
        fs::write(&self.path, raw).map_err(|e| {
            AgvError::Storage(format!("failed to write {}: {e}", self.path.display()))
        })?;

        info!(ssid = credentials.network_name(), "network credentials saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), AgvError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "network credentials cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgvError::Storage(format!(
                "failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryCredentialStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    saved: Mutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `credentials`.
    pub fn with(credentials: Credentials) -> Self {
        Self {
            saved: Mutex::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credentials>, AgvError> {
        Ok(self.saved.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, credentials: &Credentials) -> Result<(), AgvError> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), AgvError> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
