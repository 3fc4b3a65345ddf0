//! Sequential multi-file operation with per-file outcomes

use std::path::{Path, PathBuf};

use tracing::warn;

use encx_core::{CancelFlag, EncxError, ProgressFn};
use encx_crypto::StreamHooks;

use crate::material::KeyMaterial;
use crate::pipeline::{DecryptOutcome, EncryptOutcome, Pipeline};

/// What happened to each file of a batch. Files after a cancellation are
/// listed in `skipped`.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub succeeded: Vec<(PathBuf, T)>,
    pub failed: Vec<(PathBuf, EncxError)>,
    pub skipped: Vec<PathBuf>,
}

impl<T> BatchReport<T> {
    fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

impl Pipeline {
    /// Encrypt each file with a fresh random key. One failure does not stop the batch.
    pub fn encrypt_files(
        &self,
        inputs: &[PathBuf],
        progress: Option<&ProgressFn>,
        cancel: Option<&CancelFlag>,
    ) -> BatchReport<EncryptOutcome> {
        run_batch(inputs, cancel, |path| {
            self.encrypt(path, None, StreamHooks { progress, cancel })
        })
    }

    /// Encrypt each file under one supplied key. Every container still gets its
    /// own random nonce.
    pub fn encrypt_files_with_key(
        &self,
        inputs: &[PathBuf],
        key: &[u8],
        progress: Option<&ProgressFn>,
        cancel: Option<&CancelFlag>,
    ) -> BatchReport<EncryptOutcome> {
        run_batch(inputs, cancel, |path| {
            self.encrypt(path, Some(key), StreamHooks { progress, cancel })
        })
    }

    /// Decrypt each container using the custody store for key material.
    pub fn decrypt_files(
        &self,
        inputs: &[PathBuf],
        progress: Option<&ProgressFn>,
        cancel: Option<&CancelFlag>,
    ) -> BatchReport<DecryptOutcome> {
        run_batch(inputs, cancel, |path| {
            self.decrypt(path, None::<KeyMaterial>, StreamHooks { progress, cancel })
        })
    }
}

fn run_batch<T>(
    inputs: &[PathBuf],
    cancel: Option<&CancelFlag>,
    mut op: impl FnMut(&Path) -> Result<T, EncxError>,
) -> BatchReport<T> {
    let mut report = BatchReport::new();

    for (i, path) in inputs.iter().enumerate() {
        if cancel.is_some_and(CancelFlag::is_cancelled) {
            report.skipped.extend(inputs[i..].iter().cloned());
            break;
        }
        match op(path) {
            Ok(outcome) => report.succeeded.push((path.clone(), outcome)),
            Err(e) => {
                warn!(path = %path.display(), "{e}");
                report.failed.push((path.clone(), e));
            }
        }
    }
    report
}
