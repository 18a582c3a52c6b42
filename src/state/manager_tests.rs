//! Tests for StateManager

use super::*;
use serde_json::json;
use tempfile::tempdir;

// ============================================================================
// Construction Tests
// ============================================================================

#[test]
fn test_state_manager_new() {
    let manager = StateManager::new("/tmp/test-state.json");
    assert!(!manager.is_in_memory());
    assert_eq!(manager.path().to_str().unwrap(), "/tmp/test-state.json");
}

#[test]
fn test_state_manager_in_memory() {
    let manager = StateManager::in_memory();
    assert!(manager.is_in_memory());
}

#[tokio::test]
async fn test_from_json_inline() {
    let manager =
        StateManager::from_json(r#"{"streams": {"messages": {"cursor": 1001}}}"#).unwrap();
    assert!(manager.is_in_memory());
    assert_eq!(manager.get_cursor("messages").await, Some(json!(1001)));
}

#[tokio::test]
async fn test_from_json_empty_string_is_empty_state() {
    let manager = StateManager::from_json("  ").unwrap();
    assert!(manager.snapshot().await.streams.is_empty());
}

#[test]
fn test_from_json_invalid() {
    let err = StateManager::from_json("{ nope").unwrap_err();
    assert!(err.to_string().contains("State error"));
}

// ============================================================================
// Cursor Tests
// ============================================================================

#[tokio::test]
async fn test_get_set_cursor() {
    let manager = StateManager::in_memory();
    assert!(manager.get_cursor("blocks").await.is_none());

    manager.set_cursor("blocks", json!(100)).await.unwrap();
    manager.set_cursor("blocks", json!(120)).await.unwrap();

    assert_eq!(manager.get_cursor("blocks").await, Some(json!(120)));
}

#[tokio::test]
async fn test_multiple_stream_cursors() {
    let manager = StateManager::in_memory();

    manager
        .set_cursor("posts", json!("2024-05-01T00:00:00Z"))
        .await
        .unwrap();
    manager.set_cursor("messages", json!(77)).await.unwrap();

    assert_eq!(
        manager.get_cursor("posts").await,
        Some(json!("2024-05-01T00:00:00Z"))
    );
    assert_eq!(manager.get_cursor("messages").await, Some(json!(77)));
}

// ============================================================================
// Partition Tests
// ============================================================================

#[tokio::test]
async fn test_partition_completed() {
    let manager = StateManager::in_memory();
    assert!(!manager.is_partition_completed("stream", "p1").await);

    manager
        .mark_partition_completed("stream", "p1")
        .await
        .unwrap();

    assert!(manager.is_partition_completed("stream", "p1").await);
    assert!(!manager.is_partition_completed("stream", "p2").await);
}

#[tokio::test]
async fn test_partition_cursor() {
    let manager = StateManager::in_memory();
    assert!(manager.get_partition_cursor("stream", "p1").await.is_none());

    manager
        .set_partition_cursor("stream", "p1", json!("19000000"))
        .await
        .unwrap();

    assert_eq!(
        manager.get_partition_cursor("stream", "p1").await,
        Some(json!("19000000"))
    );
}

#[tokio::test]
async fn test_apply_partition_updates() {
    let manager = StateManager::in_memory();
    manager
        .apply_partition_updates(
            "token_transaction",
            vec![
                PartitionUpdate::new("treasury", json!(10)),
                PartitionUpdate::new("ops", json!(20)),
                PartitionUpdate::new("treasury", json!(15)),
            ],
        )
        .await
        .unwrap();

    assert_eq!(
        manager
            .get_partition_cursor("token_transaction", "treasury")
            .await,
        Some(json!(15))
    );
    assert_eq!(
        manager.get_partition_cursor("token_transaction", "ops").await,
        Some(json!(20))
    );
}

// ============================================================================
// Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    let manager = StateManager::without_auto_save(&path);
    manager.set_cursor("blocks", json!(500)).await.unwrap();
    manager
        .mark_partition_completed("blocks", "p1")
        .await
        .unwrap();
    assert!(!path.exists());
    manager.save().await.unwrap();

    let manager2 = StateManager::new(&path);
    manager2.load().await.unwrap();

    assert_eq!(manager2.get_cursor("blocks").await, Some(json!(500)));
    assert!(manager2.is_partition_completed("blocks", "p1").await);
    assert!(!path.with_extension("tmp").exists());
}

#[tokio::test]
async fn test_load_nonexistent_file() {
    let dir = tempdir().unwrap();
    let manager = StateManager::new(dir.path().join("nonexistent.json"));
    manager.load().await.unwrap();
    assert!(manager.get_cursor("blocks").await.is_none());
}

#[tokio::test]
async fn test_auto_save() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("auto_state.json");

    let manager = StateManager::new(&path);
    manager.set_cursor("messages", json!(9)).await.unwrap();

    let manager2 = StateManager::from_file(&path).unwrap();
    assert_eq!(manager2.get_cursor("messages").await, Some(json!(9)));
}

#[tokio::test]
async fn test_save_in_memory_noop() {
    let manager = StateManager::in_memory();
    manager.set_cursor("blocks", json!(1)).await.unwrap();
    manager.save().await.unwrap();
}

#[tokio::test]
async fn test_load_invalid_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("invalid.json");
    tokio::fs::write(&path, "{ invalid json }").await.unwrap();

    let manager = StateManager::new(&path);
    assert!(manager.load().await.is_err());
}

// ============================================================================
// Clear / Access Tests
// ============================================================================

#[tokio::test]
async fn test_clear_stream() {
    let manager = StateManager::in_memory();
    manager.set_cursor("a", json!(1)).await.unwrap();
    manager.set_cursor("b", json!(2)).await.unwrap();

    manager.clear_stream("a").await.unwrap();
    assert!(manager.get_cursor("a").await.is_none());
    assert_eq!(manager.get_cursor("b").await, Some(json!(2)));

    manager.clear().await.unwrap();
    assert!(manager.get_cursor("b").await.is_none());
}

#[tokio::test]
async fn test_state_write_access_and_snapshot() {
    let manager = StateManager::in_memory();
    {
        let mut state = manager.state_mut().await;
        state.set_cursor("posts", json!("2024-01-01"));
    }

    let snapshot = manager.snapshot().await;
    manager.set_cursor("posts", json!("2024-02-01")).await.unwrap();

    assert_eq!(snapshot.get_cursor("posts"), Some(&json!("2024-01-01")));
    assert_eq!(
        manager.state().await.get_cursor("posts"),
        Some(&json!("2024-02-01"))
    );
}

#[tokio::test]
async fn test_clone_shares_state() {
    let manager = StateManager::in_memory();
    let cloned = manager.clone();

    manager.set_cursor("blocks", json!(3)).await.unwrap();
    assert_eq!(cloned.get_cursor("blocks").await, Some(json!(3)));
}

#[tokio::test]
async fn test_checkpoint_writes_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("checkpoint_state.json");

    let manager = StateManager::without_auto_save(&path);
    manager.set_cursor("blocks", json!(7)).await.unwrap();
    manager.checkpoint().await.unwrap();

    let written = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(written.contains("\"blocks\""));
    assert_eq!(
        manager.to_json().await.unwrap(),
        r#"{"streams":{"blocks":{"cursor":7}}}"#
    );
}
