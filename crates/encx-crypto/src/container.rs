//! Container header codec and chunk geometry

use std::io::Read;
use std::path::Path;

use encx_core::types::{NONCE_LEN, TAG_LEN};
use encx_core::{Algorithm, EncxError, EncxResult, IoResultExt};

use crate::hash;
use crate::stream::MAX_CHUNK_SIZE;

pub const MAGIC: &[u8; 4] = b"ENCX";
pub const FORMAT_VERSION: u8 = 1;

/// magic(4) + version(1) + algorithm(1) + chunk_size(4) + nonce(12) + hash(32) + len(8) + count(8)
pub const HEADER_LEN: usize = 4 + 1 + 1 + 4 + NONCE_LEN + 32 + 8 + 8;

/// Chunk indices are 32-bit in the nonce derivation.
pub const MAX_CHUNKS: u64 = 1 << 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub algorithm: Algorithm,
    pub chunk_size: u32,
    pub nonce: [u8; NONCE_LEN],
    pub plaintext_hash: [u8; 32],
    pub plaintext_len: u64,
    pub chunk_count: u64,
}

impl ContainerHeader {
    pub fn new(
        algorithm: Algorithm,
        chunk_size: u32,
        nonce: [u8; NONCE_LEN],
        plaintext_hash: [u8; 32],
        plaintext_len: u64,
    ) -> EncxResult<Self> {
        if chunk_size == 0 {
            return Err(EncxError::CorruptContainer("chunk size must be > 0".into()));
        }
        if chunk_size as usize > MAX_CHUNK_SIZE {
            return Err(EncxError::CorruptContainer(format!(
                "chunk size {chunk_size} exceeds the {MAX_CHUNK_SIZE}-byte maximum"
            )));
        }
        let chunk_count = chunk_count(plaintext_len, chunk_size);
        if chunk_count > MAX_CHUNKS {
            return Err(EncxError::CorruptContainer(format!(
                "{chunk_count} chunks exceed the 2^32 limit; raise the memory budget"
            )));
        }
        if checked_container_len(plaintext_len, chunk_count).is_none() {
            return Err(EncxError::CorruptContainer(format!(
                "plaintext length {plaintext_len} does not fit a container"
            )));
        }
        Ok(Self {
            algorithm,
            chunk_size,
            nonce,
            plaintext_hash,
            plaintext_len,
            chunk_count,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut at = 0;
        let mut put = |bytes: &[u8]| {
            out[at..at + bytes.len()].copy_from_slice(bytes);
            at += bytes.len();
        };
        put(MAGIC);
        put(&[FORMAT_VERSION, self.algorithm.id()]);
        put(&self.chunk_size.to_be_bytes());
        put(&self.nonce);
        put(&self.plaintext_hash);
        put(&self.plaintext_len.to_be_bytes());
        put(&self.chunk_count.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> EncxResult<Self> {
        if &bytes[0..4] != MAGIC {
            return Err(EncxError::CorruptContainer("bad magic, not an encx container".into()));
        }
        if bytes[4] != FORMAT_VERSION {
            return Err(EncxError::CorruptContainer(format!(
                "unsupported format version {}",
                bytes[4]
            )));
        }
        let algorithm = Algorithm::from_id(bytes[5]).ok_or_else(|| {
            EncxError::CorruptContainer(format!("unknown algorithm id {}", bytes[5]))
        })?;

        let chunk_size = u32::from_be_bytes(field(bytes, 6));
        let nonce: [u8; NONCE_LEN] = field(bytes, 10);
        let plaintext_hash: [u8; 32] = field(bytes, 22);
        let plaintext_len = u64::from_be_bytes(field(bytes, 54));
        let declared_count = u64::from_be_bytes(field(bytes, 62));

        let header = Self::new(algorithm, chunk_size, nonce, plaintext_hash, plaintext_len)?;
        if header.chunk_count != declared_count {
            return Err(EncxError::CorruptContainer(format!(
                "declared {declared_count} chunks, geometry implies {}",
                header.chunk_count
            )));
        }
        Ok(header)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> EncxResult<(Self, [u8; HEADER_LEN])> {
        let mut raw = [0u8; HEADER_LEN];
        reader.read_exact(&mut raw).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                EncxError::CorruptContainer("truncated header".into())
            } else {
                EncxError::CorruptContainer(format!("reading header: {e}"))
            }
        })?;
        Ok((Self::from_bytes(&raw)?, raw))
    }

    /// Plaintext length of chunk `index`; every chunk but the last is full.
    pub fn chunk_len(&self, index: u64) -> usize {
        if index + 1 < self.chunk_count {
            self.chunk_size as usize
        } else {
            (self.plaintext_len - self.chunk_size as u64 * (self.chunk_count - 1)) as usize
        }
    }

    /// Exact on-disk size of a well-formed container with this header.
    ///
    /// Saturates for a header that did not come through [`ContainerHeader::new`].
    pub fn container_len(&self) -> u64 {
        checked_container_len(self.plaintext_len, self.chunk_count).unwrap_or(u64::MAX)
    }

    pub fn plaintext_hash_hex(&self) -> String {
        hash::to_hex(&self.plaintext_hash)
    }
}

/// Number of chunks for a plaintext; an empty file still gets one (empty) chunk.
pub fn chunk_count(plaintext_len: u64, chunk_size: u32) -> u64 {
    plaintext_len.div_ceil(chunk_size as u64).max(1)
}

fn checked_container_len(plaintext_len: u64, chunk_count: u64) -> Option<u64> {
    chunk_count
        .checked_mul(TAG_LEN as u64)?
        .checked_add(plaintext_len)?
        .checked_add(HEADER_LEN as u64)
}

/// Read and validate the header of a container on disk.
pub fn read_header(path: &Path) -> EncxResult<ContainerHeader> {
    let mut file = std::fs::File::open(path).at_path(path)?;
    ContainerHeader::read_from(&mut file).map(|(header, _)| header)
}

fn field<const N: usize>(bytes: &[u8; HEADER_LEN], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}
