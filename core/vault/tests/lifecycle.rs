mod common;

use common::{manager, manager_with, fast_settings, write_file, PASSWORD};
use hiddenvault_common::{Error, FileId};
use hiddenvault_vault::{AuditAction, AuditOutcome, VaultSettings};
use tempfile::TempDir;

#[tokio::test]
async fn test_end_to_end_tamper_detection() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("personal.vault");
    let manager = manager();

    manager.create(&vault_path, PASSWORD, "Personal").await.unwrap();
    let (vault_id, entries) = manager.open(&vault_path, PASSWORD).await.unwrap();
    assert!(entries.is_empty());

    let source = write_file(dir.path(), "hello.txt", b"hello-world");
    let file_id = manager
        .import_file(&vault_id, &source, vec![], false)
        .await
        .unwrap();

    let entries = manager.list_entries(&vault_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, file_id);
    assert_eq!(entries[0].size, 11);
    assert_eq!(entries[0].file_name, "hello.txt");
    assert_eq!(entries[0].mime_type, "text/plain");

    let out = dir.path().join("out.txt");
    manager.export_file(&vault_id, file_id, &out).await.unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), b"hello-world");

    // The only blob sits at the end of the file.
    let mut bytes = std::fs::read(&vault_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    std::fs::write(&vault_path, bytes).unwrap();

    let tampered_out = dir.path().join("tampered.txt");
    let result = manager.export_file(&vault_id, file_id, &tampered_out).await;
    assert!(matches!(result, Err(Error::TamperDetected(id)) if id == file_id));
    assert!(!tampered_out.exists());

    let log = manager.audit_log(&vault_id).await.unwrap();
    let last_event = log.last().unwrap();
    assert_eq!(last_event.action, AuditAction::Export);
    assert_eq!(last_event.file_id, Some(file_id));
    assert!(matches!(last_event.outcome, AuditOutcome::Failure { .. }));
}

#[tokio::test]
async fn test_import_many_files_roundtrip() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("many.vault");
    let manager = manager();
    manager.create(&vault_path, PASSWORD, "Many").await.unwrap();
    let (vault_id, _) = manager.open(&vault_path, PASSWORD).await.unwrap();

    let mut imported = Vec::new();
    for i in 0..6usize {
        // Sizes straddle the chunk boundary, including empty and multi-chunk.
        let len = [0, 1, 1000, 65536, 65537, 200_000][i];
        let data: Vec<u8> = (0..len).map(|b| (b * 7 + i) as u8).collect();
        let source = write_file(dir.path(), &format!("f{}.bin", i), &data);
        let id = manager
            .import_file(&vault_id, &source, vec![format!("batch-{}", i)], false)
            .await
            .unwrap();
        imported.push((id, data));
    }

    for (id, data) in &imported {
        let out = dir.path().join(format!("{}.out", id));
        manager.export_file(&vault_id, *id, &out).await.unwrap();
        assert_eq!(&std::fs::read(&out).unwrap(), data);
    }

    let entries = manager.list_entries(&vault_id).await.unwrap();
    assert_eq!(entries.len(), 6);
    assert_eq!(entries[3].size, 65536);
    assert_eq!(entries[2].tags, vec!["batch-2".to_string()]);
}

#[tokio::test]
async fn test_entries_survive_reopen_and_manifest_growth() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("grow.vault");
    let manager = manager_with(VaultSettings {
        initial_manifest_capacity: 0,
        ..fast_settings()
    });
    manager.create(&vault_path, PASSWORD, "Grow").await.unwrap();
    let (vault_id, _) = manager.open(&vault_path, PASSWORD).await.unwrap();
    let capacity_before = manager.inspect(&vault_path).await.unwrap().manifest_capacity;

    let mut ids = Vec::new();
    for i in 0..30 {
        let source = write_file(dir.path(), &format!("note-{}.txt", i), format!("note {}", i).as_bytes());
        ids.push(manager.import_file(&vault_id, &source, vec![], false).await.unwrap());
    }
    assert!(manager.inspect(&vault_path).await.unwrap().manifest_capacity > capacity_before);

    manager.lock(&vault_id).await.unwrap();
    let (reopened, entries) = manager.open(&vault_path, PASSWORD).await.unwrap();
    assert_eq!(reopened, vault_id);
    assert_eq!(entries.len(), 30);

    for (i, id) in ids.iter().enumerate() {
        let out = dir.path().join(format!("note-{}.out", i));
        manager.export_file(&vault_id, *id, &out).await.unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), format!("note {}", i));
    }
}

#[tokio::test]
async fn test_delete_removes_entry() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("del.vault");
    let manager = manager();
    manager.create(&vault_path, PASSWORD, "Del").await.unwrap();
    let (vault_id, _) = manager.open(&vault_path, PASSWORD).await.unwrap();

    let source = write_file(dir.path(), "a.txt", b"to be deleted");
    let file_id = manager.import_file(&vault_id, &source, vec![], false).await.unwrap();

    manager.delete_entry(&vault_id, file_id).await.unwrap();
    assert!(manager.list_entries(&vault_id).await.unwrap().is_empty());

    let out = dir.path().join("a.out");
    assert!(matches!(
        manager.export_file(&vault_id, file_id, &out).await,
        Err(Error::FileNotFound(id)) if id == file_id
    ));
    assert!(matches!(
        manager.delete_entry(&vault_id, file_id).await,
        Err(Error::FileNotFound(_))
    ));
    assert!(matches!(
        manager.delete_entry(&vault_id, FileId::generate()).await,
        Err(Error::FileNotFound(_))
    ));
}

#[tokio::test]
async fn test_wrong_password_then_correct() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("pw.vault");
    let manager = manager();
    manager.create(&vault_path, PASSWORD, "Pw").await.unwrap();

    assert!(matches!(
        manager.open(&vault_path, b"not-the-password").await,
        Err(Error::AuthenticationFailed)
    ));
    assert!(manager.open(&vault_path, PASSWORD).await.is_ok());
}

#[tokio::test]
async fn test_corrupted_manifest_cannot_unlock() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("corrupt.vault");
    let manager = manager();
    manager.create(&vault_path, PASSWORD, "Corrupt").await.unwrap();

    let summary = manager.inspect(&vault_path).await.unwrap();
    let mut bytes = std::fs::read(&vault_path).unwrap();
    // With no blobs the file ends with both manifest slots; slot 0 is current.
    let manifest_start = bytes.len() - 2 * summary.manifest_capacity as usize;
    bytes[manifest_start + 30] ^= 0xFF;
    std::fs::write(&vault_path, bytes).unwrap();

    assert!(matches!(
        manager.open(&vault_path, PASSWORD).await,
        Err(Error::AuthenticationFailed)
    ));
}

#[tokio::test]
async fn test_missing_and_garbage_files() {
    let dir = TempDir::new().unwrap();
    let manager = manager();

    assert!(matches!(
        manager.open(&dir.path().join("absent.vault"), PASSWORD).await,
        Err(Error::NotFound(_))
    ));

    let garbage = write_file(dir.path(), "garbage.vault", b"definitely not a vault");
    assert!(matches!(
        manager.open(&garbage, PASSWORD).await,
        Err(Error::CorruptedContainer(_))
    ));
}

#[tokio::test]
async fn test_import_size_limit_and_delete_source() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("small.vault");
    let manager = manager_with(VaultSettings {
        max_vault_size: 100,
        ..fast_settings()
    });
    manager.create(&vault_path, PASSWORD, "Small").await.unwrap();
    let (vault_id, _) = manager.open(&vault_path, PASSWORD).await.unwrap();

    let big = write_file(dir.path(), "big.bin", &[7u8; 200]);
    assert!(matches!(
        manager.import_file(&vault_id, &big, vec![], false).await,
        Err(Error::VaultFull { limit: 100, .. })
    ));
    assert!(manager.list_entries(&vault_id).await.unwrap().is_empty());
    assert_eq!(manager.inspect(&vault_path).await.unwrap().blob_region_len, 0);

    let small = write_file(dir.path(), "small.bin", &[1u8; 50]);
    manager.import_file(&vault_id, &small, vec![], true).await.unwrap();
    assert!(!small.exists());

    let missing = dir.path().join("missing.bin");
    assert!(matches!(
        manager.import_file(&vault_id, &missing, vec![], false).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_pagination() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("page.vault");
    let manager = manager();
    manager.create(&vault_path, PASSWORD, "Page").await.unwrap();
    let (vault_id, _) = manager.open(&vault_path, PASSWORD).await.unwrap();

    for i in 0..5 {
        let source = write_file(dir.path(), &format!("{}.txt", i), b"x");
        manager.import_file(&vault_id, &source, vec![], false).await.unwrap();
    }

    let page = manager.list_entries_page(&vault_id, 3, 10).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.entries.len(), 2);
    assert_eq!(page.entries[0].file_name, "3.txt");
}

#[tokio::test]
async fn test_vaults_are_isolated() {
    let dir = TempDir::new().unwrap();
    let path_a = dir.path().join("a.vault");
    let path_b = dir.path().join("b.vault");
    let manager = manager();
    manager.create(&path_a, PASSWORD, "A").await.unwrap();
    manager.create(&path_b, b"another-password", "B").await.unwrap();

    let (id_a, _) = manager.open(&path_a, PASSWORD).await.unwrap();
    let (id_b, _) = manager.open(&path_b, b"another-password").await.unwrap();
    assert_ne!(id_a, id_b);

    let source = write_file(dir.path(), "only-a.txt", b"a");
    let file_id = manager.import_file(&id_a, &source, vec![], false).await.unwrap();
    assert!(manager.list_entries(&id_b).await.unwrap().is_empty());

    let out = dir.path().join("x");
    assert!(matches!(
        manager.export_file(&id_b, file_id, &out).await,
        Err(Error::FileNotFound(_))
    ));

    manager.lock(&id_a).await.unwrap();
    assert!(matches!(
        manager.list_entries(&id_a).await,
        Err(Error::VaultLocked(_))
    ));
    assert!(manager.list_entries(&id_b).await.is_ok());
}

#[tokio::test]
async fn test_repeated_open_reuses_session() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("again.vault");
    let manager = manager();
    manager.create(&vault_path, PASSWORD, "Again").await.unwrap();

    let (vault_id, _) = manager.open(&vault_path, PASSWORD).await.unwrap();
    let source = write_file(dir.path(), "a.txt", b"a");
    manager.import_file(&vault_id, &source, vec![], false).await.unwrap();

    let (again, entries) = manager.open(&vault_path, PASSWORD).await.unwrap();
    assert_eq!(again, vault_id);
    assert_eq!(entries.len(), 1);

    // A wrong password is still rejected and leaves the session alive.
    assert!(matches!(
        manager.open(&vault_path, b"wrong-password").await,
        Err(Error::AuthenticationFailed)
    ));
    assert!(manager.is_unlocked(&vault_id).await);

    // A copy carries the same vault id but is a different container.
    let copy = dir.path().join("copy.vault");
    std::fs::copy(&vault_path, &copy).unwrap();
    assert!(matches!(
        manager.open(&copy, PASSWORD).await,
        Err(Error::AlreadyOpen(id)) if id == vault_id
    ));
}

#[tokio::test]
async fn test_lock_all_and_reopen_records_events() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("events.vault");
    let manager = manager();
    manager.create(&vault_path, PASSWORD, "Events").await.unwrap();
    let (vault_id, _) = manager.open(&vault_path, PASSWORD).await.unwrap();

    manager.lock_all().await;
    assert!(!manager.is_unlocked(&vault_id).await);

    manager.open(&vault_path, PASSWORD).await.unwrap();
    let actions: Vec<AuditAction> = manager
        .audit_log(&vault_id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::Created,
            AuditAction::Unlock,
            AuditAction::Lock,
            AuditAction::Unlock
        ]
    );
}

#[tokio::test]
async fn test_compaction_reclaims_orphans() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("compact.vault");
    let manager = manager();
    manager.create(&vault_path, PASSWORD, "Compact").await.unwrap();
    let (vault_id, _) = manager.open(&vault_path, PASSWORD).await.unwrap();

    let mut ids = Vec::new();
    for (name, data) in [("a", vec![1u8; 300]), ("b", vec![2u8; 5000]), ("c", vec![3u8; 700])] {
        let source = write_file(dir.path(), name, &data);
        ids.push((manager.import_file(&vault_id, &source, vec![], false).await.unwrap(), data));
    }

    let deleted = manager.list_entries(&vault_id).await.unwrap()[1].clone();
    manager.delete_entry(&vault_id, deleted.id).await.unwrap();
    let before = manager.inspect(&vault_path).await.unwrap().blob_region_len;

    let reclaimed = manager.compact(&vault_id).await.unwrap();
    assert_eq!(reclaimed, deleted.blob_len);
    assert_eq!(
        manager.inspect(&vault_path).await.unwrap().blob_region_len,
        before - deleted.blob_len
    );

    for (id, data) in [&ids[0], &ids[2]] {
        let out = dir.path().join(format!("{}.out", id));
        manager.export_file(&vault_id, *id, &out).await.unwrap();
        assert_eq!(&std::fs::read(&out).unwrap(), data);
    }

    // Offsets survive a reopen.
    manager.lock(&vault_id).await.unwrap();
    manager.open(&vault_path, PASSWORD).await.unwrap();
    let out = dir.path().join("c.again");
    manager.export_file(&vault_id, ids[2].0, &out).await.unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), ids[2].1);
}

#[tokio::test]
async fn test_compact_on_delete() {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("auto.vault");
    let manager = manager_with(VaultSettings {
        compact_on_delete: true,
        ..fast_settings()
    });
    manager.create(&vault_path, PASSWORD, "Auto").await.unwrap();
    let (vault_id, _) = manager.open(&vault_path, PASSWORD).await.unwrap();

    let source = write_file(dir.path(), "a", &[9u8; 1000]);
    let file_id = manager.import_file(&vault_id, &source, vec![], false).await.unwrap();
    manager.delete_entry(&vault_id, file_id).await.unwrap();

    assert_eq!(manager.inspect(&vault_path).await.unwrap().blob_region_len, 0);
}
