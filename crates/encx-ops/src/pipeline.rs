//! Encrypt/decrypt pipeline with custody policy
//!
//! Encrypt:
//!   1. stream-encrypt into `<file><ext>` (atomic, nothing left on failure)
//!   2. save the custody record, optionally rejecting reused key material;
//!      a record still held by another live container is never replaced
//!   3. optionally authenticate the new container, then delete the source
//!
//! Decrypt:
//!   1. take the supplied key/nonce, or look the record up by the plaintext
//!      hash recorded in the container header
//!   2. stream-decrypt, checking every tag and the recovered hash
//!   3. optionally delete the custody record (only the one this container
//!      holds) and/or the container
//!
//! Post-success deletions that fail are logged and reported in the outcome;
//! they never turn a completed operation into an error.

use std::path::Path;

use tracing::{debug, info, warn};

use encx_core::config::{EncxConfig, EngineSettings, PolicyConfig};
use encx_core::{CustodyRecord, EncxError, EncxResult};
use encx_crypto::{
    read_header, stream, Opened, Sealed, StreamHooks, SymmetricKey, Verified,
};
use encx_store::CustodyStore;

use crate::material::{KeyMaterial, MaterialSource};

#[derive(Debug)]
pub struct EncryptOutcome {
    pub sealed: Sealed,
    pub stored: bool,
    pub source_deleted: bool,
}

#[derive(Debug)]
pub struct DecryptOutcome {
    pub opened: Opened,
    pub source: MaterialSource,
    pub container_deleted: bool,
    pub record_deleted: bool,
}

pub struct Pipeline {
    settings: EngineSettings,
    policy: PolicyConfig,
    store: CustodyStore,
}

impl Pipeline {
    pub fn new(settings: EngineSettings, policy: PolicyConfig, store: CustodyStore) -> Self {
        Self {
            settings,
            policy,
            store,
        }
    }

    /// Validate `config` and open the configured store.
    pub fn from_config(config: &EncxConfig) -> EncxResult<Self> {
        let settings = config.engine_settings()?;
        let store = CustodyStore::open(&config.store.resolved_path())?;
        Ok(Self::new(settings, config.policy.clone(), store))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut EngineSettings {
        &mut self.settings
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut PolicyConfig {
        &mut self.policy
    }

    pub fn store(&self) -> &CustodyStore {
        &self.store
    }

    /// Encrypt one file. `key` must match the configured algorithm's length;
    /// a random key is generated when it is `None`.
    pub fn encrypt(
        &self,
        input: &Path,
        key: Option<&[u8]>,
        hooks: StreamHooks<'_>,
    ) -> EncxResult<EncryptOutcome> {
        let key = key
            .map(|k| SymmetricKey::from_bytes(self.settings.algorithm, k))
            .transpose()?;
        let sealed = stream::encrypt_file(input, key, &self.settings, hooks)?;

        let stored = if self.policy.store_record_after_encrypt {
            if let Err(e) = self
                .store
                .claim(&sealed.record, self.policy.check_duplicate_key_material)
            {
                // A container whose key was never recorded is unrecoverable.
                discard(&sealed.output);
                return Err(e);
            }
            true
        } else {
            false
        };

        let mut source_deleted = false;
        if self.policy.delete_source_after_encrypt {
            if self.policy.verify_before_delete {
                let key = SymmetricKey::from_bytes(sealed.record.algorithm, &sealed.record.key)?;
                stream::verify_container(
                    &sealed.output,
                    &key,
                    &sealed.record.nonce,
                    Some(&sealed.record.file_hash),
                )?;
            }
            source_deleted = remove_after_success(input, "source");
        }

        info!(
            input = %input.display(),
            output = %sealed.output.display(),
            stored,
            source_deleted,
            "encrypt complete"
        );
        Ok(EncryptOutcome {
            sealed,
            stored,
            source_deleted,
        })
    }

    /// Decrypt one container with supplied material, or with the custody
    /// record found through the container's recorded plaintext hash.
    pub fn decrypt(
        &self,
        input: &Path,
        material: Option<KeyMaterial>,
        hooks: StreamHooks<'_>,
    ) -> EncxResult<DecryptOutcome> {
        let header = read_header(input)?;

        let (material, expected_hash, source) = match material {
            Some(m) => (m, None, MaterialSource::Supplied),
            None => {
                let hash = header.plaintext_hash_hex();
                let record = self.store.search(&hash)?.ok_or_else(|| {
                    EncxError::InvalidKeyMaterial(format!(
                        "no key supplied and no custody record for {hash}"
                    ))
                })?;
                debug!(hash = %record.file_hash, "using key material from custody store");
                (
                    KeyMaterial::from_record(&record),
                    Some(record.file_hash.clone()),
                    MaterialSource::Store,
                )
            }
        };

        let key = material.key_for(header.algorithm)?;
        let opened = stream::decrypt_file(
            input,
            &key,
            material.nonce(),
            expected_hash.as_deref(),
            &self.settings,
            hooks,
        )?;

        let record_deleted = if self.policy.delete_record_after_decrypt {
            match self.store.delete_held_by(&opened.file_hash, input) {
                Ok(true) => true,
                Ok(false) => {
                    debug!(hash = %opened.file_hash, "no custody record held by this container");
                    false
                }
                Err(e) => {
                    warn!(hash = %opened.file_hash, "failed to delete custody record: {e}");
                    false
                }
            }
        } else {
            false
        };

        let container_deleted = self.policy.delete_container_after_decrypt
            && remove_after_success(input, "container");

        info!(
            input = %input.display(),
            output = %opened.output.display(),
            ?source,
            container_deleted,
            record_deleted,
            "decrypt complete"
        );
        Ok(DecryptOutcome {
            opened,
            source,
            container_deleted,
            record_deleted,
        })
    }

    /// Authenticate a container without writing plaintext.
    pub fn verify(&self, input: &Path, material: Option<KeyMaterial>) -> EncxResult<Verified> {
        let header = read_header(input)?;
        let (material, expected) = match material {
            Some(m) => (m, None),
            None => {
                let record = self.lookup_record(input)?.ok_or_else(|| {
                    EncxError::InvalidKeyMaterial(format!(
                        "no key supplied and no custody record for {}",
                        header.plaintext_hash_hex()
                    ))
                })?;
                (KeyMaterial::from_record(&record), Some(record.file_hash.clone()))
            }
        };
        let key = material.key_for(header.algorithm)?;
        stream::verify_container(input, &key, material.nonce(), expected.as_deref())
    }

    /// Find the custody record for a container via the plaintext hash in its header.
    pub fn lookup_record(&self, container: &Path) -> EncxResult<Option<CustodyRecord>> {
        let header = read_header(container)?;
        self.store.search(&header.plaintext_hash_hex())
    }
}

fn remove_after_success(path: &Path, what: &str) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "deleted {what}");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), "failed to delete {what}: {e}");
            false
        }
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), "failed to remove unrecorded container: {e}");
    }
}
