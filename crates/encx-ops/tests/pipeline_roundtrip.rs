//! Integration tests: encrypt → store → decrypt through the collaborator API
//!
//! Everything runs in a temp directory with its own custody store.

use std::path::{Path, PathBuf};

use encx_core::config::{EngineSettings, PolicyConfig};
use encx_core::{Algorithm, CancelFlag, ErrorKind, ProgressFn};
use encx_ops::{CustodyStore, KeyMaterial, MaterialSource, Pipeline, StreamHooks};
use proptest::prelude::*;
use tempfile::TempDir;

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

fn make_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 31 % 251) as u8).collect()
}

fn pipeline(dir: &Path, budget: usize, policy: PolicyConfig) -> Pipeline {
    let store = CustodyStore::open(&dir.join("state").join("custody.json")).unwrap();
    Pipeline::new(EngineSettings::new(Algorithm::Aes256Gcm, budget), policy, store)
}

#[test]
fn ten_kib_file_five_chunks_with_store_lookup() {
    let tmp = TempDir::new().unwrap();
    let p = pipeline(tmp.path(), 4096, PolicyConfig::default());
    let data = make_data(10 * 1024);
    let src = write_test_file(tmp.path(), "report.bin", &data);

    let enc = p.encrypt(&src, None, StreamHooks::default()).unwrap();
    assert_eq!(enc.sealed.chunks, 5);
    assert!(enc.stored);
    assert!(!enc.source_deleted);
    assert_eq!(enc.sealed.output, tmp.path().join("report.bin.encex"));
    assert_eq!(
        std::fs::metadata(&enc.sealed.output).unwrap().len(),
        (encx_crypto::HEADER_LEN + data.len() + 5 * encx_crypto::TAG_LEN) as u64
    );
    assert_eq!(std::fs::metadata(&enc.sealed.output).unwrap().len(), 10_390);
    let header = encx_crypto::read_header(&enc.sealed.output).unwrap();
    assert_eq!(header.chunk_size, 2048);
    assert_eq!(header.chunk_count, 5);
    assert_eq!(p.store().len().unwrap(), 1);

    let hash = encx_crypto::digest_bytes(&data);
    let record = p.store().search(&hash).unwrap().expect("record stored");
    assert_eq!(record.key.len(), 32);
    assert_eq!(record.nonce.len(), 12);
    assert_eq!(record.tag.len(), 16);
    assert_eq!(
        p.lookup_record(&enc.sealed.output).unwrap().unwrap().file_hash,
        hash
    );

    std::fs::remove_file(&src).unwrap();
    let dec = p.decrypt(&enc.sealed.output, None, StreamHooks::default()).unwrap();
    assert_eq!(dec.source, MaterialSource::Store);
    assert_eq!(dec.opened.output, src);
    assert_eq!(std::fs::read(&src).unwrap(), data);
    assert!(!dec.record_deleted);
    assert!(p.store().search(&hash).unwrap().is_some());
}

#[test]
fn supplied_material_decrypts_without_store() {
    let tmp = TempDir::new().unwrap();
    let policy = PolicyConfig {
        store_record_after_encrypt: false,
        ..PolicyConfig::default()
    };
    let p = pipeline(tmp.path(), 2048, policy);
    let src = write_test_file(tmp.path(), "note.txt", b"supplied key round trip");

    let enc = p.encrypt(&src, Some(&[0x42; 32]), StreamHooks::default()).unwrap();
    assert!(p.store().is_empty().unwrap());
    std::fs::remove_file(&src).unwrap();

    let material = KeyMaterial::new(&enc.sealed.record.key, &enc.sealed.record.nonce);
    let dec = p
        .decrypt(&enc.sealed.output, Some(material), StreamHooks::default())
        .unwrap();
    assert_eq!(dec.source, MaterialSource::Supplied);
    assert_eq!(std::fs::read(&src).unwrap(), b"supplied key round trip");
}

#[test]
fn wrong_supplied_key_leaves_nothing_behind() {
    let tmp = TempDir::new().unwrap();
    let p = pipeline(tmp.path(), 2048, PolicyConfig::default());
    let src = write_test_file(tmp.path(), "x.bin", &make_data(5000));
    let enc = p.encrypt(&src, None, StreamHooks::default()).unwrap();
    std::fs::remove_file(&src).unwrap();

    let wrong = KeyMaterial::new(&[0u8; 32], &enc.sealed.record.nonce);
    let err = p
        .decrypt(&enc.sealed.output, Some(wrong), StreamHooks::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
    assert!(!src.exists());

    let short = KeyMaterial::new(&[0u8; 16], &enc.sealed.record.nonce);
    let err = p
        .decrypt(&enc.sealed.output, Some(short), StreamHooks::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidKeyMaterial);
}

#[test]
fn duplicate_key_material_policy() {
    let tmp = TempDir::new().unwrap();
    let p = pipeline(tmp.path(), 4096, PolicyConfig::default());
    let a = write_test_file(tmp.path(), "a.txt", b"alpha");
    let enc = p.encrypt(&a, None, StreamHooks::default()).unwrap();

    let mut reused = enc.sealed.record.clone();
    reused.file_hash = encx_crypto::digest_bytes(b"some other plaintext");
    let err = p.store().save(&reused, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateKeyMaterial);
    assert_eq!(p.store().len().unwrap(), 1);

    p.store().save(&reused, false).unwrap();
    assert_eq!(p.store().len().unwrap(), 2);
}

#[test]
fn delete_policies_apply_only_after_success() {
    let tmp = TempDir::new().unwrap();
    let policy = PolicyConfig {
        delete_source_after_encrypt: true,
        delete_container_after_decrypt: true,
        delete_record_after_decrypt: true,
        ..PolicyConfig::default()
    };
    let p = pipeline(tmp.path(), 4096, policy);
    let data = make_data(9000);
    let src = write_test_file(tmp.path(), "doc.pdf", &data);

    let enc = p.encrypt(&src, None, StreamHooks::default()).unwrap();
    assert!(enc.source_deleted);
    assert!(!src.exists());

    // A tampered container must not be deleted, nor its record dropped.
    let pristine = std::fs::read(&enc.sealed.output).unwrap();
    let mut tampered = pristine.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x80;
    std::fs::write(&enc.sealed.output, &tampered).unwrap();
    let err = p.decrypt(&enc.sealed.output, None, StreamHooks::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
    assert!(enc.sealed.output.exists());
    assert!(!src.exists());
    assert_eq!(p.store().len().unwrap(), 1);

    std::fs::write(&enc.sealed.output, &pristine).unwrap();
    let dec = p.decrypt(&enc.sealed.output, None, StreamHooks::default()).unwrap();
    assert!(dec.container_deleted);
    assert!(dec.record_deleted);
    assert!(!enc.sealed.output.exists());
    assert!(p.store().is_empty().unwrap());
    assert_eq!(std::fs::read(&src).unwrap(), data);
}

#[test]
fn identical_plaintexts_never_orphan_a_container() {
    let tmp = TempDir::new().unwrap();
    let policy = PolicyConfig {
        delete_source_after_encrypt: true,
        ..PolicyConfig::default()
    };
    let p = pipeline(tmp.path(), 4096, policy);
    let a = write_test_file(tmp.path(), "a.txt", b"same bytes");
    let b = write_test_file(tmp.path(), "b.txt", b"same bytes");

    let enc_a = p.encrypt(&a, None, StreamHooks::default()).unwrap();
    assert!(enc_a.source_deleted);

    // b's container would need a record slot a still holds.
    let err = p.encrypt(&b, None, StreamHooks::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecordConflict);
    assert!(b.exists(), "source kept when its record could not be saved");
    assert!(!tmp.path().join("b.txt.encex").exists());
    assert_eq!(p.store().len().unwrap(), 1);

    let dec = p.decrypt(&enc_a.sealed.output, None, StreamHooks::default()).unwrap();
    assert_eq!(std::fs::read(&dec.opened.output).unwrap(), b"same bytes");
}

#[test]
fn record_deletion_is_limited_to_its_own_container() {
    let tmp = TempDir::new().unwrap();
    let policy = PolicyConfig {
        delete_record_after_decrypt: true,
        ..PolicyConfig::default()
    };
    let mut p = pipeline(tmp.path(), 4096, policy);
    let a = write_test_file(tmp.path(), "a.txt", b"twin content");
    let b = write_test_file(tmp.path(), "b.txt", b"twin content");

    let enc_a = p.encrypt(&a, None, StreamHooks::default()).unwrap();
    p.policy_mut().store_record_after_encrypt = false;
    let enc_b = p.encrypt(&b, None, StreamHooks::default()).unwrap();
    assert!(!enc_b.stored);
    std::fs::remove_file(&b).unwrap();

    let material = KeyMaterial::new(&enc_b.sealed.record.key, &enc_b.sealed.record.nonce);
    let dec = p
        .decrypt(&enc_b.sealed.output, Some(material), StreamHooks::default())
        .unwrap();
    assert!(!dec.record_deleted);
    let kept = p.store().search(&enc_a.sealed.record.file_hash).unwrap().unwrap();
    assert_eq!(kept.key, enc_a.sealed.record.key);

    std::fs::remove_file(&a).unwrap();
    let dec = p.decrypt(&enc_a.sealed.output, None, StreamHooks::default()).unwrap();
    assert!(dec.record_deleted);
    assert!(p.store().is_empty().unwrap());
}

#[test]
fn cancelled_decrypt_keeps_container_and_record() {
    let tmp = TempDir::new().unwrap();
    let policy = PolicyConfig {
        delete_container_after_decrypt: true,
        delete_record_after_decrypt: true,
        ..PolicyConfig::default()
    };
    let p = pipeline(tmp.path(), 2048, policy);
    let src = write_test_file(tmp.path(), "big.bin", &make_data(6000));
    let enc = p.encrypt(&src, None, StreamHooks::default()).unwrap();
    std::fs::remove_file(&src).unwrap();
    let pristine = std::fs::read(&enc.sealed.output).unwrap();

    let flag = CancelFlag::new();
    let trigger = flag.clone();
    let progress: ProgressFn = Box::new(move |done, total, _msg| {
        assert_eq!(total, 6000);
        if done >= 3072 {
            trigger.cancel();
        }
    });
    let hooks = StreamHooks {
        progress: Some(&progress),
        cancel: Some(&flag),
    };

    let err = p.decrypt(&enc.sealed.output, None, hooks).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!src.exists());
    assert_eq!(std::fs::read(&enc.sealed.output).unwrap(), pristine);
    assert_eq!(p.store().len().unwrap(), 1);

    let mut names: Vec<String> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["big.bin.encex".to_string(), "state".to_string()]);
}

#[test]
fn existing_destination_is_rejected_unless_overwrite() {
    let tmp = TempDir::new().unwrap();
    let mut p = pipeline(tmp.path(), 4096, PolicyConfig::default());
    let src = write_test_file(tmp.path(), "keep.txt", b"original");
    let enc = p.encrypt(&src, None, StreamHooks::default()).unwrap();

    // Plaintext still present: decrypting would clobber it.
    let err = p.decrypt(&enc.sealed.output, None, StreamHooks::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DestinationExists);
    assert_eq!(std::fs::read(&src).unwrap(), b"original");

    p.settings_mut().overwrite = true;
    p.decrypt(&enc.sealed.output, None, StreamHooks::default()).unwrap();
    assert_eq!(std::fs::read(&src).unwrap(), b"original");
}

#[test]
fn verify_uses_store_and_reports_tampering() {
    let tmp = TempDir::new().unwrap();
    let p = pipeline(tmp.path(), 2048, PolicyConfig::default());
    let src = write_test_file(tmp.path(), "v.bin", &make_data(3000));
    let enc = p.encrypt(&src, None, StreamHooks::default()).unwrap();

    let v = p.verify(&enc.sealed.output, None).unwrap();
    assert_eq!(v.bytes, 3000);
    assert_eq!(v.chunks, 3);

    let mut bytes = std::fs::read(&enc.sealed.output).unwrap();
    bytes[encx_crypto::HEADER_LEN + 5] ^= 1;
    std::fs::write(&enc.sealed.output, &bytes).unwrap();
    let err = p.verify(&enc.sealed.output, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
}

#[test]
fn batch_reports_each_file() {
    let tmp = TempDir::new().unwrap();
    let p = pipeline(tmp.path(), 4096, PolicyConfig::default());
    let good_a = write_test_file(tmp.path(), "a.txt", b"aaa");
    let good_b = write_test_file(tmp.path(), "b.txt", b"bbb");
    let missing = tmp.path().join("missing.txt");

    let report = p.encrypt_files(&[good_a.clone(), missing.clone(), good_b.clone()], None, None);
    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, missing);
    assert_eq!(report.failed[0].1.kind(), ErrorKind::Io);
    assert!(!report.is_clean());

    std::fs::remove_file(&good_a).unwrap();
    std::fs::remove_file(&good_b).unwrap();
    let containers: Vec<PathBuf> = report
        .succeeded
        .iter()
        .map(|(_, o)| o.sealed.output.clone())
        .collect();
    let report = p.decrypt_files(&containers, None, None);
    assert!(report.is_clean());
    assert_eq!(std::fs::read(&good_b).unwrap(), b"bbb");
}

#[test]
fn batch_with_shared_key_uses_distinct_nonces() {
    let tmp = TempDir::new().unwrap();
    let p = pipeline(tmp.path(), 4096, PolicyConfig::default());
    let a = write_test_file(tmp.path(), "a.txt", b"first file");
    let b = write_test_file(tmp.path(), "b.txt", b"second file");
    let key = [0x42u8; 32];

    let report = p.encrypt_files_with_key(&[a, b], &key, None, None);
    assert!(report.is_clean());
    let records: Vec<_> = report.succeeded.iter().map(|(_, o)| &o.sealed.record).collect();
    assert_eq!(records[0].key, key.to_vec());
    assert_eq!(records[1].key, key.to_vec());
    assert_ne!(records[0].nonce, records[1].nonce);

    let short = write_test_file(tmp.path(), "c.txt", b"third");
    let report = p.encrypt_files_with_key(&[short], &[0u8; 16], None, None);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].1.kind(), ErrorKind::InvalidKeyMaterial);
}

#[test]
fn batch_stops_after_cancel() {
    let tmp = TempDir::new().unwrap();
    let p = pipeline(tmp.path(), 2048, PolicyConfig::default());
    let files: Vec<PathBuf> = (0..3)
        .map(|i| write_test_file(tmp.path(), &format!("f{i}.bin"), &make_data(4096)))
        .collect();

    let flag = CancelFlag::new();
    let trigger = flag.clone();
    let progress: ProgressFn = Box::new(move |done, _total, _msg| {
        if done >= 2048 {
            trigger.cancel();
        }
    });

    let report = p.encrypt_files(&files, Some(&progress), Some(&flag));
    assert!(report.succeeded.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].1.kind(), ErrorKind::Cancelled);
    assert_eq!(report.skipped, files[1..].to_vec());
    assert!(p.store().is_empty().unwrap());
    for f in &files {
        assert!(!encx_crypto::container_path(f, ".encex").exists());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn roundtrip_any_budget_any_cipher(
        data in proptest::collection::vec(any::<u8>(), 0..=12_000),
        budget in 1usize..=16_384,
        alg in prop_oneof![
            Just(Algorithm::Aes128Gcm),
            Just(Algorithm::Aes192Gcm),
            Just(Algorithm::Aes256Gcm),
            Just(Algorithm::ChaCha20Poly1305),
        ],
    ) {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(tmp.path(), budget, PolicyConfig::default());
        p.settings_mut().algorithm = alg;
        let src = write_test_file(tmp.path(), "prop.bin", &data);

        let enc = p.encrypt(&src, None, StreamHooks::default()).unwrap();
        std::fs::remove_file(&src).unwrap();
        p.decrypt(&enc.sealed.output, None, StreamHooks::default()).unwrap();

        prop_assert_eq!(std::fs::read(&src).unwrap(), data);
    }
}
