mod common;

use common::{manager, write_file, PASSWORD};
use hiddenvault_common::Error;
use hiddenvault_vault::VaultManager;
use tempfile::TempDir;

const DECOY_PASSWORD: &[u8] = b"harmless-holiday-pics";

#[tokio::test]
async fn test_decoy_is_independent_vault() {
    let dir = TempDir::new().unwrap();
    let main_path = dir.path().join("main.vault");
    let manager = manager();
    let (main_id, _) = manager.create(&main_path, PASSWORD, "Main").await.unwrap();

    let (decoy_id, decoy_codes) = manager
        .create_decoy(&main_path, DECOY_PASSWORD, "Photos")
        .await
        .unwrap();
    assert_ne!(decoy_id, main_id);
    assert_eq!(decoy_codes.len(), 4);

    let decoy_path = VaultManager::decoy_path(&main_path).unwrap();
    assert!(decoy_path.exists());
    assert_eq!(
        manager.inspect(&main_path).await.unwrap().decoy,
        Some(decoy_path.clone())
    );
    let decoy_summary = manager.inspect(&decoy_path).await.unwrap();
    assert_eq!(decoy_summary.name, "Photos");
    assert_eq!(decoy_summary.decoy, None);

    // Each password opens only its own vault.
    assert!(matches!(
        manager.open(&main_path, DECOY_PASSWORD).await,
        Err(Error::AuthenticationFailed)
    ));
    assert!(matches!(
        manager.open(&decoy_path, PASSWORD).await,
        Err(Error::AuthenticationFailed)
    ));
    let (opened_decoy, _) = manager.open(&decoy_path, DECOY_PASSWORD).await.unwrap();
    assert_eq!(opened_decoy, decoy_id);
    let (opened_main, _) = manager.open(&main_path, PASSWORD).await.unwrap();
    assert_eq!(opened_main, main_id);

    assert!(matches!(
        manager.create_decoy(&main_path, DECOY_PASSWORD, "Again").await,
        Err(Error::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_decoy_created_while_main_is_open() {
    let dir = TempDir::new().unwrap();
    let main_path = dir.path().join("open.vault");
    let manager = manager();
    let (main_id, _) = manager.create(&main_path, PASSWORD, "Open").await.unwrap();
    manager.open(&main_path, PASSWORD).await.unwrap();

    let source = write_file(dir.path(), "secret.txt", b"real secret");
    let file_id = manager.import_file(&main_id, &source, vec![], false).await.unwrap();

    manager
        .create_decoy(&main_path, DECOY_PASSWORD, "Decoy")
        .await
        .unwrap();

    // The header rewrite went through the open session.
    let second = write_file(dir.path(), "second.txt", b"after link");
    let second_id = manager.import_file(&main_id, &second, vec![], false).await.unwrap();
    for (id, expected) in [(file_id, &b"real secret"[..]), (second_id, &b"after link"[..])] {
        let out = dir.path().join(format!("{}.out", id));
        manager.export_file(&main_id, id, &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), expected);
    }

    manager.lock(&main_id).await.unwrap();
    let (_, entries) = manager.open(&main_path, PASSWORD).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(manager.inspect(&main_path).await.unwrap().decoy.is_some());
}

#[tokio::test]
async fn test_decoy_requires_main_vault() {
    let dir = TempDir::new().unwrap();
    let manager = manager();
    assert!(matches!(
        manager
            .create_decoy(&dir.path().join("missing.vault"), DECOY_PASSWORD, "D")
            .await,
        Err(Error::NotFound(_))
    ));
}
