//! Streaming file encryption and decryption within a memory budget
//!
//! Only one chunk buffer is alive at a time. Output always goes through an
//! [`AtomicFile`], so a failed tag, an integrity mismatch, or a cancellation
//! leaves nothing under the destination name.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use encx_core::atomic::AtomicFile;
use encx_core::config::EngineSettings;
use encx_core::types::{NONCE_LEN, TAG_LEN};
use encx_core::{CancelFlag, CustodyRecord, EncxError, EncxResult, IoResultExt, ProgressFn};

use crate::cipher::{chunk_nonce, ChunkCipher};
use crate::container::{self, ContainerHeader, HEADER_LEN};
use crate::hash;
use crate::keys::{self, SymmetricKey};

/// Smallest chunk the engine will use, however tight the budget
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Largest chunk, regardless of budget
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Budget divisor: one chunk buffer plus headroom for reader/writer buffers
pub const MEMORY_FACTOR: usize = 2;

/// Chunk size for a given memory budget.
pub fn chunk_size_for_budget(budget: usize) -> usize {
    (budget / MEMORY_FACTOR).clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

/// Optional observers for a long-running stream operation.
#[derive(Default, Clone, Copy)]
pub struct StreamHooks<'a> {
    pub progress: Option<&'a ProgressFn>,
    pub cancel: Option<&'a CancelFlag>,
}

impl StreamHooks<'_> {
    fn checkpoint(&self) -> EncxResult<()> {
        match self.cancel {
            Some(flag) if flag.is_cancelled() => Err(EncxError::Cancelled),
            _ => Ok(()),
        }
    }

    fn report(&self, done: u64, total: u64, label: &str) {
        if let Some(progress) = self.progress {
            progress(done, total, label);
        }
    }
}

/// Result of a successful encryption
#[derive(Debug)]
pub struct Sealed {
    pub output: PathBuf,
    pub record: CustodyRecord,
    pub chunks: u64,
    pub bytes: u64,
}

/// Result of a successful decryption
#[derive(Debug)]
pub struct Opened {
    pub output: PathBuf,
    pub file_hash: String,
    pub chunks: u64,
    pub bytes: u64,
}

/// Result of authenticating a container without writing plaintext
#[derive(Debug)]
pub struct Verified {
    pub file_hash: String,
    pub chunks: u64,
    pub bytes: u64,
}

/// `report.pdf` → `report.pdf.encex`
pub fn container_path(input: &Path, extension: &str) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(extension);
    PathBuf::from(name)
}

/// `report.pdf.encex` → `report.pdf`
pub fn plaintext_path(input: &Path, extension: &str) -> EncxResult<PathBuf> {
    let name = input.to_string_lossy();
    match name.strip_suffix(extension) {
        Some(stem) if !stem.is_empty() && !stem.ends_with(|c: char| c == '/' || c == '\\') => {
            Ok(PathBuf::from(stem))
        }
        _ => Err(EncxError::CorruptContainer(format!(
            "{} does not end with {extension}",
            input.display()
        ))),
    }
}

/// Encrypt `input` into `input + extension`.
///
/// A random key is generated when `key` is `None`; the nonce is always fresh.
/// The returned record carries the plaintext hash, key, base nonce and the
/// final chunk's tag.
pub fn encrypt_file(
    input: &Path,
    key: Option<SymmetricKey>,
    settings: &EngineSettings,
    hooks: StreamHooks<'_>,
) -> EncxResult<Sealed> {
    let algorithm = settings.algorithm;
    let key = match key {
        Some(k) => SymmetricKey::from_bytes(algorithm, k.as_bytes())?,
        None => SymmetricKey::generate(algorithm),
    };

    let chunk_size = chunk_size_for_budget(settings.memory_budget);
    let file_hash = hash::digest_in_blocks(input, chunk_size.min(hash::READ_BLOCK))?;
    let plaintext_hash = hash::from_hex(&file_hash)
        .ok_or_else(|| EncxError::CorruptContainer(format!("bad digest {file_hash}")))?;
    let plaintext_len = std::fs::metadata(input).at_path(input)?.len();

    let nonce = keys::generate_nonce();
    let header = ContainerHeader::new(
        algorithm,
        chunk_size as u32,
        nonce,
        plaintext_hash,
        plaintext_len,
    )?;
    let header_bytes = header.to_bytes();
    let cipher = ChunkCipher::new(algorithm, &key)?;

    let output = container_path(input, &settings.extension);
    let mut reader = File::open(input).at_path(input)?;
    let mut out = AtomicFile::create(&output, settings.overwrite)?;
    out.write_all(&header_bytes).at_path(&output)?;

    debug!(
        input = %input.display(),
        %algorithm,
        chunk_size,
        chunks = header.chunk_count,
        "encrypting"
    );

    let label = display_name(input);
    let mut buf = vec![0u8; header.chunk_len(0)];
    let mut hasher = Sha256::new();
    let mut final_tag = [0u8; TAG_LEN];
    let mut done = 0u64;

    for index in 0..header.chunk_count {
        hooks.checkpoint()?;

        let chunk = &mut buf[..header.chunk_len(index)];
        reader.read_exact(chunk).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                source_changed(&file_hash)
            } else {
                EncxError::io(input, e)
            }
        })?;
        hasher.update(&*chunk);

        let last = index + 1 == header.chunk_count;
        let tag = cipher.seal_in_place(&chunk_nonce(&nonce, index as u32, last), &header_bytes, chunk)?;
        out.write_all(chunk).at_path(&output)?;
        out.write_all(&tag).at_path(&output)?;
        if last {
            final_tag = tag;
        }

        done += chunk.len() as u64;
        hooks.report(done, plaintext_len, &label);
    }

    // The source must not have grown or changed since the hashing pass.
    let mut extra = [0u8; 1];
    if reader.read(&mut extra).at_path(input)? != 0 {
        return Err(source_changed(&file_hash));
    }
    let streamed = hash::to_hex(&hasher.finalize());
    if streamed != file_hash {
        warn!(input = %input.display(), "plaintext changed while encrypting");
        return Err(EncxError::IntegrityMismatch {
            expected: file_hash,
            actual: streamed,
        });
    }

    let output = out.commit()?;
    info!(
        input = %input.display(),
        output = %output.display(),
        chunks = header.chunk_count,
        bytes = plaintext_len,
        "encrypted"
    );

    let record = CustodyRecord {
        file_hash,
        key: key.as_bytes().to_vec(),
        nonce: nonce.to_vec(),
        tag: final_tag.to_vec(),
        source_address: output.to_string_lossy().into_owned(),
        algorithm,
        created_at: unix_now(),
    };

    Ok(Sealed {
        output,
        record,
        chunks: header.chunk_count,
        bytes: plaintext_len,
    })
}

/// Decrypt `input` (which must carry the configured extension) next to itself.
///
/// `expected_hash` is the plaintext hash from the custody record, if any;
/// the recovered plaintext must match it and the hash in the header.
pub fn decrypt_file(
    input: &Path,
    key: &SymmetricKey,
    nonce: &[u8],
    expected_hash: Option<&str>,
    settings: &EngineSettings,
    hooks: StreamHooks<'_>,
) -> EncxResult<Opened> {
    let output = plaintext_path(input, &settings.extension)?;
    let (mut reader, header, header_bytes) = open_container(input)?;

    let allowed = chunk_size_for_budget(settings.memory_budget);
    if header.chunk_size as usize > allowed {
        return Err(EncxError::Config(format!(
            "{} uses {}-byte chunks but the memory budget allows {allowed}; \
             raise memory_budget_bytes to at least {}",
            input.display(),
            header.chunk_size,
            header.chunk_size as usize * MEMORY_FACTOR
        )));
    }

    let mut out = AtomicFile::create(&output, settings.overwrite)?;
    let file_hash = open_chunks(
        &mut reader,
        input,
        &header,
        &header_bytes,
        key,
        nonce,
        &mut out,
        &output,
        hooks,
    )?;
    check_expected(&file_hash, expected_hash)?;

    let output = out.commit()?;
    info!(
        input = %input.display(),
        output = %output.display(),
        chunks = header.chunk_count,
        bytes = header.plaintext_len,
        "decrypted"
    );

    Ok(Opened {
        output,
        file_hash,
        chunks: header.chunk_count,
        bytes: header.plaintext_len,
    })
}

/// Authenticate every chunk and recompute the plaintext hash, discarding output.
pub fn verify_container(
    input: &Path,
    key: &SymmetricKey,
    nonce: &[u8],
    expected_hash: Option<&str>,
) -> EncxResult<Verified> {
    let (mut reader, header, header_bytes) = open_container(input)?;
    let file_hash = open_chunks(
        &mut reader,
        input,
        &header,
        &header_bytes,
        key,
        nonce,
        &mut io::sink(),
        input,
        StreamHooks::default(),
    )?;
    check_expected(&file_hash, expected_hash)?;

    debug!(input = %input.display(), "container verified");
    Ok(Verified {
        file_hash,
        chunks: header.chunk_count,
        bytes: header.plaintext_len,
    })
}

fn open_container(input: &Path) -> EncxResult<(File, ContainerHeader, [u8; HEADER_LEN])> {
    let mut reader = File::open(input).at_path(input)?;
    let actual_len = reader.metadata().at_path(input)?.len();
    let (header, raw) = ContainerHeader::read_from(&mut reader)?;

    let expected_len = header.container_len();
    if actual_len < expected_len {
        return Err(EncxError::CorruptContainer(format!(
            "truncated: {actual_len} bytes, header declares {expected_len}"
        )));
    }
    if actual_len > expected_len {
        return Err(EncxError::CorruptContainer(format!(
            "{} trailing bytes after the final chunk",
            actual_len - expected_len
        )));
    }
    Ok((reader, header, raw))
}

#[allow(clippy::too_many_arguments)]
fn open_chunks<W: Write>(
    reader: &mut File,
    input: &Path,
    header: &ContainerHeader,
    header_bytes: &[u8; HEADER_LEN],
    key: &SymmetricKey,
    nonce: &[u8],
    sink: &mut W,
    sink_path: &Path,
    hooks: StreamHooks<'_>,
) -> EncxResult<String> {
    let nonce: [u8; NONCE_LEN] = keys::nonce_from_slice(nonce)?;
    if key.len() != header.algorithm.key_len() {
        return Err(EncxError::InvalidKeyMaterial(format!(
            "container uses {} ({}-bit key), got a {}-bit key",
            header.algorithm,
            header.algorithm.key_bits(),
            key.len() * 8
        )));
    }
    let cipher = ChunkCipher::new(header.algorithm, key)?;

    let label = display_name(input);
    let mut buf = vec![0u8; header.chunk_len(0) + TAG_LEN];
    let mut hasher = Sha256::new();
    let mut done = 0u64;

    for index in 0..header.chunk_count {
        hooks.checkpoint()?;

        let len = header.chunk_len(index);
        let frame = &mut buf[..len + TAG_LEN];
        reader.read_exact(frame).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                EncxError::CorruptContainer(format!("truncated at chunk {index}"))
            } else {
                EncxError::io(input, e)
            }
        })?;

        let (chunk, tag) = frame.split_at_mut(len);
        let tag: [u8; TAG_LEN] = (&*tag).try_into().map_err(|_| {
            EncxError::CorruptContainer(format!("short tag at chunk {index}"))
        })?;

        let last = index + 1 == header.chunk_count;
        if !cipher.open_in_place(&chunk_nonce(&nonce, index as u32, last), header_bytes, chunk, &tag) {
            return Err(EncxError::AuthenticationFailure { chunk: index });
        }

        hasher.update(&*chunk);
        sink.write_all(chunk).at_path(sink_path)?;

        done += len as u64;
        hooks.report(done, header.plaintext_len, &label);
    }

    let file_hash = hash::to_hex(&hasher.finalize());
    let recorded = header.plaintext_hash_hex();
    if file_hash != recorded {
        return Err(EncxError::IntegrityMismatch {
            expected: recorded,
            actual: file_hash,
        });
    }
    Ok(file_hash)
}

fn check_expected(actual: &str, expected: Option<&str>) -> EncxResult<()> {
    match expected {
        Some(expected) if expected != actual => Err(EncxError::IntegrityMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
        _ => Ok(()),
    }
}

fn source_changed(file_hash: &str) -> EncxError {
    EncxError::IntegrityMismatch {
        expected: file_hash.to_string(),
        actual: "source changed during encryption".into(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
