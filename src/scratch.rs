//! Scoped temporary storage for plaintext handed to an external sealer
//!
//! Files are created owner-only inside a private temporary directory. On drop
//! every file written through [`ScratchDir`] is overwritten with zeros before
//! the directory is removed, on success and failure paths alike.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::warn;

/// Temporary directory that wipes its contents when dropped
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
    written: Vec<(PathBuf, usize)>,
}

impl ScratchDir {
    /// Create a fresh private directory under the system temp dir
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("reencrypt-").tempdir()?;
        restrict_dir(dir.path())?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    /// Directory path
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `bytes` to a new owner-only file named `name`
    pub fn write_secret(&mut self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        let mut file = create_private(&path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        self.written.push((path.clone(), bytes.len()));
        Ok(path)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        for (path, len) in &self.written {
            if let Err(e) = wipe(path, *len) {
                warn!(path = %path.display(), error = %e, "Failed to wipe scratch file");
            }
        }
    }
}

fn wipe(path: &Path, len: usize) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(&vec![0u8; len])?;
    file.sync_all()
}

#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
