//! Integration tests for SqliteStateRepository
//!
//! Each test opens a fresh in-memory database.

use chrono::{Duration, TimeZone, Utc};

use echodrive_cache::{DatabasePool, SqliteStateRepository};
use echodrive_core::domain::{Conflict, DriveItem, DrivePath, ItemKind, RemoteState};
use echodrive_core::ports::IStateRepository;

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> SqliteStateRepository {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteStateRepository::new(pool.pool().clone())
}

fn path(s: &str) -> DrivePath {
    DrivePath::new(s).unwrap()
}

fn file_state(drive: &str, p: &str, hash: &str) -> RemoteState {
    let modified = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 45).single().unwrap();
    let item = DriveItem::file(path(p), 2048, modified);
    RemoteState::capture(drive, &item, hash, true)
}

// ============================================================================
// State tests
// ============================================================================

#[tokio::test]
async fn test_upsert_and_get_state() {
    let repo = setup().await;
    let state = file_state("local", "/docs/report.txt", "aGFzaA==");

    repo.upsert_state(&state).await.unwrap();

    let loaded = repo
        .get_state("local", "/docs/report.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, state);
}

#[tokio::test]
async fn test_get_missing_state_returns_none() {
    let repo = setup().await;
    assert!(repo.get_state("local", "/nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_states_are_namespaced_by_drive() {
    let repo = setup().await;
    repo.upsert_state(&file_state("local", "/a.txt", "one"))
        .await
        .unwrap();
    repo.upsert_state(&file_state("mirror", "/a.txt", "two"))
        .await
        .unwrap();

    let local = repo.get_state("local", "/a.txt").await.unwrap().unwrap();
    let mirror = repo.get_state("mirror", "/a.txt").await.unwrap().unwrap();
    assert_eq!(local.content_hash, "one");
    assert_eq!(mirror.content_hash, "two");
    assert_eq!(repo.list_states("local").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_upsert_replaces_existing_state() {
    let repo = setup().await;
    let mut state = file_state("local", "/a.txt", "old");
    repo.upsert_state(&state).await.unwrap();

    state.content_hash = "new".to_string();
    state.size = 7;
    state.last_modified = state.last_modified + Duration::seconds(30);
    repo.upsert_state(&state).await.unwrap();

    let states = repo.list_states("local").await.unwrap();
    assert_eq!(states, vec![state]);
}

#[tokio::test]
async fn test_id_keyed_state_round_trips() {
    let repo = setup().await;
    let modified = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().unwrap();
    let item = DriveItem::folder(path("/Photos"), modified).with_id("ID-42");
    let state = RemoteState::capture("cloud", &item, "", false);

    repo.upsert_state(&state).await.unwrap();

    let loaded = repo.get_state("cloud", "ID-42").await.unwrap().unwrap();
    assert_eq!(loaded.id, "ID-42");
    assert_eq!(loaded.kind, ItemKind::Folder);
    assert!(!loaded.is_local);
    assert_eq!(loaded.to_item().path, path("/Photos"));
}

#[tokio::test]
async fn test_delete_state() {
    let repo = setup().await;
    repo.upsert_state(&file_state("local", "/a.txt", "h"))
        .await
        .unwrap();

    repo.delete_state("local", "/a.txt").await.unwrap();
    assert!(repo.get_state("local", "/a.txt").await.unwrap().is_none());

    // Deleting an absent key is fine
    repo.delete_state("local", "/a.txt").await.unwrap();
}

#[tokio::test]
async fn test_list_states_is_ordered_by_path() {
    let repo = setup().await;
    for p in ["/b.txt", "/a/z.txt", "/a"] {
        repo.upsert_state(&file_state("local", p, "h")).await.unwrap();
    }

    let paths: Vec<String> = repo
        .list_states("local")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.path.to_string())
        .collect();
    assert_eq!(paths, vec!["/a", "/a/z.txt", "/b.txt"]);
}

#[tokio::test]
async fn test_find_state_at_path_ignores_key() {
    let repo = setup().await;
    let modified = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().unwrap();
    let item = DriveItem::file(path("/a.txt"), 3, modified).with_id("OLD-1");
    repo.upsert_state(&RemoteState::capture("cloud", &item, "h", false))
        .await
        .unwrap();
    repo.upsert_state(&file_state("local", "/a.txt", "h"))
        .await
        .unwrap();

    let found = repo
        .find_state_at("cloud", &path("/a.txt"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.key, "OLD-1");
    assert!(repo
        .find_state_at("cloud", &path("/b.txt"))
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Conflict tests
// ============================================================================

fn conflict(drive: &str) -> Conflict {
    Conflict::new(
        drive,
        path("/notes.md"),
        path("/notes (Conflicted Copy 2026-03-01 123045).md"),
    )
}

#[tokio::test]
async fn test_save_get_and_delete_conflict() {
    let repo = setup().await;
    let c = conflict("mirror");

    repo.save_conflict(&c).await.unwrap();

    let loaded = repo
        .get_conflict("mirror", &c.conflict_path)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.original_path, c.original_path);
    assert_eq!(loaded.detected_at.timestamp(), c.detected_at.timestamp());

    repo.delete_conflict("mirror", &c.conflict_path).await.unwrap();
    assert!(repo
        .get_conflict("mirror", &c.conflict_path)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_conflicts_keyed_by_drive_and_path() {
    let repo = setup().await;
    repo.save_conflict(&conflict("local")).await.unwrap();
    repo.save_conflict(&conflict("mirror")).await.unwrap();
    // Same key again replaces
    repo.save_conflict(&conflict("mirror")).await.unwrap();

    let all = repo.list_conflicts().await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_flush_succeeds_on_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let pool = DatabasePool::new(&dir.path().join("state.db")).await.unwrap();
    let repo = SqliteStateRepository::new(pool.pool().clone());

    repo.upsert_state(&file_state("local", "/a.txt", "h"))
        .await
        .unwrap();
    repo.flush().await.unwrap();

    drop(repo);
    drop(pool);

    let reopened = DatabasePool::new(&dir.path().join("state.db")).await.unwrap();
    let repo = SqliteStateRepository::new(reopened.pool().clone());
    assert!(repo.get_state("local", "/a.txt").await.unwrap().is_some());
}

#[tokio::test]
async fn test_flush_on_in_memory_database() {
    let repo = setup().await;
    repo.flush().await.unwrap();
}
