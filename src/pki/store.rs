use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{Identity, PkiError, Result};

/// On-disk home of the client certificate and private key.
///
/// Both files are staged as owner-only temporaries next to their targets,
/// synced, and only then renamed into place. A crash before the renames
/// leaves the previous pair untouched; the remaining window is the gap
/// between the two renames.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CredentialStore {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    pub fn from_identity(identity: &Identity) -> Self {
        Self::new(&identity.cert_path, &identity.key_path)
    }

    /// Replace the stored pair with a new certificate and key
    pub fn save(&self, certificate_pem: &str, key_pem: &str) -> Result<()> {
        for path in [&self.cert_path, &self.key_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| {
                    PkiError::persistence(parent, format!("failed to create directory: {}", e))
                })?;
            }
        }

        let cert_tmp = staging_path(&self.cert_path);
        let key_tmp = staging_path(&self.key_path);

        let staged = write_private(&cert_tmp, certificate_pem.as_bytes())
            .map_err(|e| PkiError::persistence(&self.cert_path, e))
            .and_then(|_| {
                write_private(&key_tmp, key_pem.as_bytes())
                    .map_err(|e| PkiError::persistence(&self.key_path, e))
            });

        if let Err(e) = staged {
            discard(&cert_tmp);
            discard(&key_tmp);
            return Err(e);
        }

        // Certificate first, then key
        if let Err(e) = fs::rename(&cert_tmp, &self.cert_path) {
            discard(&cert_tmp);
            discard(&key_tmp);
            return Err(PkiError::persistence(&self.cert_path, e));
        }
        if let Err(e) = fs::rename(&key_tmp, &self.key_path) {
            discard(&key_tmp);
            return Err(PkiError::persistence(&self.key_path, e));
        }
        sync_parent(&self.cert_path);
        sync_parent(&self.key_path);

        info!(
            cert = %self.cert_path.display(),
            key = %self.key_path.display(),
            "Stored client credential"
        );
        Ok(())
    }

    /// Read back the certificate and key PEM
    pub fn load(&self) -> Result<(String, String)> {
        let certificate_pem = fs::read_to_string(&self.cert_path)
            .map_err(|e| PkiError::persistence(&self.cert_path, e))?;
        let key_pem = fs::read_to_string(&self.key_path)
            .map_err(|e| PkiError::persistence(&self.key_path, e))?;
        Ok((certificate_pem, key_pem))
    }
}

/// `dir/.name.tmp` beside the target so the rename never crosses filesystems
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credential".to_string());
    target.with_file_name(format!(".{}.tmp", name))
}

/// Write `contents` to `path` as an owner-only file and flush it to disk
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // mode() only applies on creation; a leftover temp keeps its old bits
    set_permission_0600(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    debug!(path = %path.display(), bytes = contents.len(), "Staged credential file");
    Ok(())
}

#[cfg(unix)]
fn set_permission_0600(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_permission_0600(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn discard(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}

/// Persist the renames themselves; best effort, not every platform allows it
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            debug!(dir = %parent.display(), error = %e, "Directory sync skipped");
        }
    }
}
