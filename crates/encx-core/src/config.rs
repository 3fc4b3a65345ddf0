use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EncxError, EncxResult};
use crate::types::Algorithm;

/// Top-level configuration (loaded from encx.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncxConfig {
    pub engine: EngineConfig,
    pub policy: PolicyConfig,
    pub store: StoreConfig,
    pub authority: AuthorityConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherFamily {
    AesGcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// AEAD family: "aes-gcm" or "chacha20-poly1305"
    pub cipher: CipherFamily,
    /// Key size for generated keys: 128, 192 or 256 (chacha20-poly1305: 256 only)
    pub key_size_bits: u16,
    /// Peak memory the engine may use for chunk buffers
    pub memory_budget_bytes: u64,
    /// Suffix appended to encrypted files
    pub extension: String,
}

/// Policy flags applied around encrypt/decrypt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Reject a record whose key+nonce is already held for another file
    pub check_duplicate_key_material: bool,
    /// Persist the custody record after encryption
    pub store_record_after_encrypt: bool,
    /// Remove the plaintext once the container is written and verified
    pub delete_source_after_encrypt: bool,
    /// Remove the container once the plaintext is restored and verified
    pub delete_container_after_decrypt: bool,
    /// Drop the custody record after a verified decryption
    pub delete_record_after_decrypt: bool,
    /// Replace existing destination files instead of failing
    pub overwrite_existing: bool,
    /// Authenticate the fresh container before deleting the source
    pub verify_before_delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Custody store JSON file
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Directory holding the root key and certificate
    pub dir: PathBuf,
    pub common_name: String,
    pub organization: String,
    /// Two-letter country code; empty to omit
    pub country: String,
    pub root_validity_days: u32,
    pub leaf_validity_days: u32,
    /// How far notBefore is moved into the past to absorb clock skew
    pub backdate_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Engine parameters after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub algorithm: Algorithm,
    pub memory_budget: usize,
    pub extension: String,
    pub overwrite: bool,
}

impl EngineSettings {
    pub fn new(algorithm: Algorithm, memory_budget: usize) -> Self {
        Self {
            algorithm,
            memory_budget,
            extension: DEFAULT_EXTENSION.into(),
            overwrite: false,
        }
    }
}

pub const DEFAULT_EXTENSION: &str = ".encex";

impl EncxConfig {
    /// Load from a TOML file, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> EncxResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| EncxError::io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| EncxError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Validate engine options and resolve them to concrete settings.
    pub fn engine_settings(&self) -> EncxResult<EngineSettings> {
        let algorithm = resolve_algorithm(self.engine.cipher, self.engine.key_size_bits)?;

        if self.engine.memory_budget_bytes == 0 {
            return Err(EncxError::Config("memory_budget_bytes must be > 0".into()));
        }
        let memory_budget = usize::try_from(self.engine.memory_budget_bytes)
            .map_err(|_| EncxError::Config("memory_budget_bytes exceeds address space".into()))?;

        let ext = &self.engine.extension;
        if ext.len() < 2 || !ext.starts_with('.') || ext.contains(|c: char| c == '/' || c == '\\') {
            return Err(EncxError::Config(format!(
                "extension must look like '.ext', got '{ext}'"
            )));
        }

        Ok(EngineSettings {
            algorithm,
            memory_budget,
            extension: ext.clone(),
            overwrite: self.policy.overwrite_existing,
        })
    }
}

/// Map a cipher family and key size onto a concrete algorithm.
pub fn resolve_algorithm(family: CipherFamily, key_size_bits: u16) -> EncxResult<Algorithm> {
    match (family, key_size_bits) {
        (CipherFamily::AesGcm, 128) => Ok(Algorithm::Aes128Gcm),
        (CipherFamily::AesGcm, 192) => Ok(Algorithm::Aes192Gcm),
        (CipherFamily::AesGcm, 256) => Ok(Algorithm::Aes256Gcm),
        (CipherFamily::ChaCha20Poly1305, 256) => Ok(Algorithm::ChaCha20Poly1305),
        (family, bits) => Err(EncxError::Config(format!(
            "unsupported key size {bits} for {family:?}"
        ))),
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_tilde(&self.path)
    }
}

impl AuthorityConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        expand_tilde(&self.dir)
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cipher: CipherFamily::AesGcm,
            key_size_bits: 256,
            memory_budget_bytes: 64 * 1024 * 1024,
            extension: DEFAULT_EXTENSION.into(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            check_duplicate_key_material: true,
            store_record_after_encrypt: true,
            delete_source_after_encrypt: false,
            delete_container_after_decrypt: false,
            delete_record_after_decrypt: false,
            overwrite_existing: false,
            verify_before_delete: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/encx/custody.json"),
        }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/encx/ca"),
            common_name: "encx Local Root CA".into(),
            organization: "encx".into(),
            country: String::new(),
            root_validity_days: 3650,
            leaf_validity_days: 825,
            backdate_minutes: 5,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
