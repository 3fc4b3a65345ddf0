//! Scoped temp-file writes with atomic replace on success.
//!
//! Every file the workspace produces (containers, restored plaintext, the
//! custody store, authority PEM files) goes through [`AtomicFile`]: bytes are
//! written to a hidden temp file in the destination directory, which is
//! renamed over the destination in [`AtomicFile::commit`]. Dropping an
//! uncommitted `AtomicFile` removes the temp file, so a failed or cancelled
//! operation never leaves a partial file under the final name.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{EncxError, EncxResult, IoResultExt};

pub struct AtomicFile {
    inner: BufWriter<NamedTempFile>,
    dest: PathBuf,
    overwrite: bool,
}

impl AtomicFile {
    /// Open a temp file next to `dest`.
    ///
    /// With `overwrite == false` an existing destination is rejected up front
    /// and again at commit time, in case it appeared in between.
    pub fn create(dest: &Path, overwrite: bool) -> EncxResult<Self> {
        if !overwrite && dest.exists() {
            return Err(EncxError::DestinationExists(dest.to_path_buf()));
        }

        let dir = parent_dir(dest);
        std::fs::create_dir_all(&dir).at_path(&dir)?;

        let tmp = tempfile::Builder::new()
            .prefix(".encx-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .at_path(&dir)?;

        Ok(Self {
            inner: BufWriter::new(tmp),
            dest: dest.to_path_buf(),
            overwrite,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.dest
    }

    /// Flush, fsync, and move the temp file into place.
    pub fn commit(self) -> EncxResult<PathBuf> {
        let dest = self.dest;
        let tmp = self
            .inner
            .into_inner()
            .map_err(|e| EncxError::io(&dest, e.into_error()))?;
        tmp.as_file().sync_all().at_path(&dest)?;

        let persisted = if self.overwrite {
            tmp.persist(&dest)
        } else {
            tmp.persist_noclobber(&dest)
        };

        match persisted {
            Ok(_) => {
                tracing::debug!(dest = %dest.display(), "atomic write committed");
                Ok(dest)
            }
            // The PersistError still owns the temp file, dropping it cleans up.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(EncxError::DestinationExists(dest))
            }
            Err(e) => Err(EncxError::io(&dest, e.error)),
        }
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Replace `dest` with `bytes` in one step.
pub fn write_atomic(dest: &Path, bytes: &[u8], overwrite: bool) -> EncxResult<()> {
    let mut file = AtomicFile::create(dest, overwrite)?;
    file.write_all(bytes).at_path(dest)?;
    file.commit()?;
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
