//! Custody store: plaintext hash → key, nonce and tag
//!
//! Layout on disk (pretty JSON, readable with any editor):
//!
//! ```json
//! { "version": 1, "records": { "<sha256 hex>": { "file_hash": ..., "key": "<b64>", ... } } }
//! ```
//!
//! Every operation loads the file, and every mutation writes it back through
//! a temp file in the same directory followed by a rename. A `RwLock` held
//! across the whole load-modify-write cycle serializes mutations while
//! letting searches overlap each other.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use encx_core::atomic::write_atomic;
use encx_core::{CustodyRecord, EncxError, EncxResult, IoResultExt};

pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    records: BTreeMap<String, CustodyRecord>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            records: BTreeMap::new(),
        }
    }
}

/// Handle to a custody store file. Cheap to create; holds no records in memory.
pub struct CustodyStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl CustodyStore {
    /// Open the store at `path`. A missing file is an empty store and is only
    /// created by the first mutation.
    pub fn open(path: &Path) -> EncxResult<Self> {
        let store = Self {
            path: path.to_path_buf(),
            lock: RwLock::new(()),
        };
        // Surface a corrupt file now rather than on first use.
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the record for `record.file_hash`.
    ///
    /// With `check_duplicates`, a record carrying the same key and nonce under
    /// a different hash is rejected with `DuplicateKeyMaterial`.
    pub fn save(&self, record: &CustodyRecord, check_duplicates: bool) -> EncxResult<()> {
        self.insert(record, check_duplicates, false)
    }

    /// Like [`save`](Self::save), but refuses to replace a record whose
    /// container is a different file that still exists. Two identical
    /// plaintexts share a hash; the first one keeps the slot.
    pub fn claim(&self, record: &CustodyRecord, check_duplicates: bool) -> EncxResult<()> {
        self.insert(record, check_duplicates, true)
    }

    /// Look up the record for a plaintext hash. Absence is `Ok(None)`.
    pub fn search(&self, file_hash: &str) -> EncxResult<Option<CustodyRecord>> {
        let _guard = self.lock.read();
        let mut file = self.load()?;
        Ok(file.records.remove(file_hash))
    }

    /// Remove the record for a plaintext hash. Returns whether one existed.
    pub fn delete(&self, file_hash: &str) -> EncxResult<bool> {
        self.remove_where(file_hash, |_| true)
    }

    /// Remove the record for `file_hash` only if its container is `container`.
    pub fn delete_held_by(&self, file_hash: &str, container: &Path) -> EncxResult<bool> {
        self.remove_where(file_hash, |r| same_file(Path::new(&r.source_address), container))
    }

    /// All records, ordered by hash.
    pub fn list(&self) -> EncxResult<Vec<CustodyRecord>> {
        let _guard = self.lock.read();
        Ok(self.load()?.records.into_values().collect())
    }

    pub fn len(&self) -> EncxResult<usize> {
        let _guard = self.lock.read();
        Ok(self.load()?.records.len())
    }

    pub fn is_empty(&self) -> EncxResult<bool> {
        Ok(self.len()? == 0)
    }

    fn insert(
        &self,
        record: &CustodyRecord,
        check_duplicates: bool,
        keep_live_holder: bool,
    ) -> EncxResult<()> {
        record.validate()?;

        let _guard = self.lock.write();
        let mut file = self.load()?;

        if keep_live_holder {
            if let Some(existing) = file.records.get(&record.file_hash) {
                let holder = Path::new(&existing.source_address);
                if !same_file(holder, Path::new(&record.source_address)) && holder.exists() {
                    return Err(EncxError::RecordConflict {
                        file_hash: record.file_hash.clone(),
                        holder: existing.source_address.clone(),
                    });
                }
            }
        }

        if check_duplicates {
            if let Some(existing) = file
                .records
                .values()
                .find(|r| r.file_hash != record.file_hash && r.shares_key_material(record))
            {
                return Err(EncxError::DuplicateKeyMaterial {
                    existing_hash: existing.file_hash.clone(),
                });
            }
        }

        let replaced = file
            .records
            .insert(record.file_hash.clone(), record.clone())
            .is_some();
        self.flush(&file)?;

        debug!(hash = %record.file_hash, replaced, "custody record saved");
        Ok(())
    }

    fn remove_where(
        &self,
        file_hash: &str,
        pred: impl FnOnce(&CustodyRecord) -> bool,
    ) -> EncxResult<bool> {
        let _guard = self.lock.write();
        let mut file = self.load()?;

        match file.records.get(file_hash) {
            Some(r) if pred(r) => {}
            _ => return Ok(false),
        }
        file.records.remove(file_hash);
        self.flush(&file)?;

        debug!(hash = %file_hash, "custody record deleted");
        Ok(true)
    }

    fn load(&self) -> EncxResult<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let content = std::fs::read_to_string(&self.path).at_path(&self.path)?;
        if content.trim().is_empty() {
            return Ok(StoreFile::default());
        }

        let file: StoreFile = serde_json::from_str(&content)
            .map_err(|e| EncxError::CorruptStore(format!("{}: {e}", self.path.display())))?;

        if file.version != STORE_FORMAT_VERSION {
            return Err(EncxError::CorruptStore(format!(
                "unsupported store version {} (expected {STORE_FORMAT_VERSION})",
                file.version
            )));
        }
        for (hash, record) in &file.records {
            if *hash != record.file_hash {
                return Err(EncxError::CorruptStore(format!(
                    "entry {hash} holds a record for {}",
                    record.file_hash
                )));
            }
            record
                .validate()
                .map_err(|e| EncxError::CorruptStore(format!("entry {hash}: {e}")))?;
        }
        Ok(file)
    }

    fn flush(&self, file: &StoreFile) -> EncxResult<()> {
        let json = serde_json::to_vec_pretty(file)
            .map_err(|e| EncxError::CorruptStore(format!("serializing store: {e}")))?;
        write_atomic(&self.path, &json, true)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encx_core::{Algorithm, ErrorKind};
    use std::sync::Arc;

    fn hash_of(n: u8) -> String {
        format!("{n:02x}").repeat(32)
    }

    fn record(n: u8, key: u8, nonce: u8) -> CustodyRecord {
        CustodyRecord {
            file_hash: hash_of(n),
            key: vec![key; 32],
            nonce: vec![nonce; 12],
            tag: vec![0xEE; 16],
            source_address: format!("/tmp/file{n}.encex"),
            algorithm: Algorithm::Aes256Gcm,
            created_at: 1_700_000_000,
        }
    }

    fn temp_store() -> (tempfile::TempDir, CustodyStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CustodyStore::open(&dir.path().join("custody.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let (_dir, store) = temp_store();
        assert!(store.is_empty().unwrap());
        assert!(!store.path().exists());
        assert_eq!(store.search(&hash_of(1)).unwrap(), None);
    }

    #[test]
    fn test_save_search_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("custody.json");
        {
            let store = CustodyStore::open(&path).unwrap();
            store.save(&record(1, 0xAA, 0x01), true).unwrap();
        }

        let reopened = CustodyStore::open(&path).unwrap();
        let found = reopened.search(&hash_of(1)).unwrap().unwrap();
        assert_eq!(found, record(1, 0xAA, 0x01));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"version\": 1"));
        assert!(text.contains(&hash_of(1)));
    }

    #[test]
    fn test_duplicate_key_material_rejected() {
        let (_dir, store) = temp_store();
        store.save(&record(1, 0xAA, 0x01), true).unwrap();

        let err = store.save(&record(2, 0xAA, 0x01), true).unwrap_err();
        match err {
            EncxError::DuplicateKeyMaterial { existing_hash } => {
                assert_eq!(existing_hash, hash_of(1))
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(store.len().unwrap(), 1);

        // Same key with a different nonce is not a duplicate.
        store.save(&record(3, 0xAA, 0x02), true).unwrap();
        // With the check off the duplicate goes in.
        store.save(&record(2, 0xAA, 0x01), false).unwrap();
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_same_hash_replaces() {
        let (_dir, store) = temp_store();
        store.save(&record(1, 0xAA, 0x01), true).unwrap();
        store.save(&record(1, 0xAA, 0x01), true).unwrap();
        store.save(&record(1, 0xBB, 0x02), true).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.search(&hash_of(1)).unwrap().unwrap().key, vec![0xBB; 32]);
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let (_dir, store) = temp_store();
        assert!(!store.delete(&hash_of(9)).unwrap());
        assert!(!store.path().exists());

        store.save(&record(1, 0xAA, 0x01), true).unwrap();
        assert!(store.delete(&hash_of(1)).unwrap());
        assert!(!store.delete(&hash_of(1)).unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_claim_keeps_a_live_holder() {
        let (dir, store) = temp_store();
        let first = dir.path().join("a.txt.encex");
        let second = dir.path().join("b.txt.encex");
        std::fs::write(&first, b"container a").unwrap();

        let mut a = record(1, 0xAA, 0x01);
        a.source_address = first.to_string_lossy().into_owned();
        store.claim(&a, true).unwrap();

        let mut b = record(1, 0xBB, 0x02);
        b.source_address = second.to_string_lossy().into_owned();
        let err = store.claim(&b, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordConflict);
        assert_eq!(store.search(&hash_of(1)).unwrap().unwrap().key, vec![0xAA; 32]);

        // Re-claiming for the same container replaces the record.
        let mut a2 = record(1, 0xCC, 0x03);
        a2.source_address = a.source_address.clone();
        store.claim(&a2, true).unwrap();

        // Once the holder is gone its slot can be taken.
        std::fs::remove_file(&first).unwrap();
        store.claim(&b, true).unwrap();
        assert_eq!(store.search(&hash_of(1)).unwrap().unwrap().key, vec![0xBB; 32]);
    }

    #[test]
    fn test_delete_held_by_checks_the_container() {
        let (dir, store) = temp_store();
        let mut r = record(1, 0xAA, 0x01);
        r.source_address = dir.path().join("a.txt.encex").to_string_lossy().into_owned();
        store.save(&r, true).unwrap();

        assert!(!store
            .delete_held_by(&hash_of(1), &dir.path().join("b.txt.encex"))
            .unwrap());
        assert_eq!(store.len().unwrap(), 1);
        assert!(store
            .delete_held_by(&hash_of(1), &dir.path().join("a.txt.encex"))
            .unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_list_ordered_by_hash() {
        let (_dir, store) = temp_store();
        for n in [7u8, 2, 5] {
            store.save(&record(n, n, n), true).unwrap();
        }
        let hashes: Vec<String> = store
            .list()
            .unwrap()
            .iter()
            .map(|r| r.file_hash.clone())
            .collect();
        assert_eq!(hashes, vec![hash_of(2), hash_of(5), hash_of(7)]);
    }

    #[test]
    fn test_invalid_record_rejected() {
        let (_dir, store) = temp_store();
        let mut bad = record(1, 0xAA, 0x01);
        bad.key.truncate(16);
        assert_eq!(
            store.save(&bad, true).unwrap_err().kind(),
            ErrorKind::InvalidKeyMaterial
        );

        let mut upper = record(1, 0xAA, 0x01);
        upper.file_hash = upper.file_hash.to_uppercase().replace('1', "A");
        assert!(store.save(&upper, true).is_err());
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.json");

        std::fs::write(&path, "{ not json").unwrap();
        let err = CustodyStore::open(&path).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptStore);

        std::fs::write(&path, r#"{"version": 99, "records": {}}"#).unwrap();
        assert_eq!(
            CustodyStore::open(&path).err().unwrap().kind(),
            ErrorKind::CorruptStore
        );
    }

    #[test]
    fn test_mismatched_entry_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.json");
        let store = CustodyStore::open(&path).unwrap();
        store.save(&record(1, 0xAA, 0x01), true).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let (first, rest) = text.split_once(&hash_of(1)).unwrap();
        std::fs::write(&path, format!("{first}{}{rest}", hash_of(2))).unwrap();

        assert_eq!(store.len().unwrap_err().kind(), ErrorKind::CorruptStore);
    }

    #[test]
    fn test_concurrent_saves_all_land() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..16u8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.save(&record(n, n, n), true).unwrap();
                    store.search(&hash_of(n)).unwrap().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len().unwrap(), 16);
    }
}
