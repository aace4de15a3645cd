//! On-disk credential persistence.
//!
//! The credential is stored as pretty-printed JSON. Writes go to a temporary
//! file in the same directory which is synced and then renamed over the
//! target, so a crash leaves either the old or the new credential, never a
//! torn one. On Unix the file is readable by the owner only.

use std::io::Write;
use std::path::{Path, PathBuf};

use subauth_engine::error::Result as EngineResult;
use subauth_engine::{AuthEngineError, Credential, CredentialPersistence};

use crate::error::{ConfigError, Result};

/// [`CredentialPersistence`] backed by a single JSON file.
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

    /// Read the stored credential. A missing file is `None`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::CorruptCredentials`] if the file does not parse,
    /// [`ConfigError::Read`] if it cannot be read.
    pub fn read(&self) -> Result<Option<Credential>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::CorruptCredentials {
                path: self.path.clone(),
                source,
            })
    }

    /// Atomically replace the stored credential.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Write`] if any step of the write fails.
    pub fn write(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_vec_pretty(credential)?;
        self.write_bytes(&json).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    /// Remove the stored credential. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Write`] if the file exists but cannot be removed.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "credential file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ConfigError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        create_private_dir(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        restrict_permissions(tmp.as_file())?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl CredentialPersistence for FileCredentialStore {
    fn load(&self) -> EngineResult<Option<Credential>> {
        self.read().map_err(into_engine)
    }

    fn save(&self, credential: &Credential) -> EngineResult<()> {
        self.write(credential).map_err(into_engine)
    }

    fn clear(&self) -> EngineResult<()> {
        self.remove().map_err(into_engine)
    }
}

fn into_engine(err: ConfigError) -> AuthEngineError {
    AuthEngineError::Persistence {
        reason: err.to_string(),
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.exists() {
        return Ok(());
    }
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(unix)]
fn restrict_permissions(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
