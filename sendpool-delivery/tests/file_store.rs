//! RON file store persistence.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;
use sendpool_delivery::{FileMailboxStore, Mailbox, MailboxStore, StoreConfig, StoreError, store};

fn mailbox(id: &str) -> Mailbox {
    Mailbox::new(id, "smtp.example.com", 587, format!("{id}@example.com"))
        .with_credentials(id, "hunter2")
        .with_limit(100)
}

#[tokio::test]
async fn missing_file_opens_empty_and_creates_parent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("pool.ron");

    let store = FileMailboxStore::open(&path).await.unwrap();

    assert!(store.list().await.unwrap().is_empty());
    assert!(path.parent().unwrap().is_dir());
    assert_eq!(store.path(), path.as_path());
}

#[tokio::test]
async fn counters_and_exclusions_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.ron");
    let now = Utc::now();

    {
        let store = FileMailboxStore::open(&path).await.unwrap();
        store.insert(mailbox("a")).await.unwrap();
        store.insert(mailbox("b")).await.unwrap();
        store.record_success("a", now).await.unwrap();
        store.record_success("a", now).await.unwrap();
        store
            .record_failure("b", "connection refused", now, Duration::from_secs(600))
            .await
            .unwrap();
    }

    let reopened = FileMailboxStore::open(&path).await.unwrap();
    let a = reopened.get("a").await.unwrap().unwrap();
    assert_eq!(a.sent_count_window, 2);
    assert_eq!(a.total_sent, 2);
    assert_eq!(a.password.as_deref(), Some("hunter2"));

    let b = reopened.get("b").await.unwrap().unwrap();
    assert_eq!(b.last_error.unwrap().message, "connection refused");
    assert!(b.excluded_until.is_some_and(|until| until > now));
}

#[tokio::test]
async fn writes_leave_no_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.ron");

    let store = FileMailboxStore::open(&path).await.unwrap();
    store.insert(mailbox("a")).await.unwrap();
    store.record_success("a", Utc::now()).await.unwrap();

    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["pool.ron".to_string()]);
}

#[tokio::test]
async fn window_reset_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.ron");
    let now = Utc::now();

    {
        let store = FileMailboxStore::open(&path).await.unwrap();
        let mut stale = mailbox("stale");
        stale.window_started_at = now - TimeDelta::days(2);
        stale.sent_count_window = 40;
        store.insert(stale).await.unwrap();

        let reset = store
            .reset_elapsed_windows(now, Duration::from_secs(86_400))
            .await
            .unwrap();
        assert_eq!(reset, 1);
    }

    let reopened = FileMailboxStore::open(&path).await.unwrap();
    let stale = reopened.get("stale").await.unwrap().unwrap();
    assert_eq!(stale.sent_count_window, 0);
    assert_eq!(stale.window_started_at, now);
}

#[tokio::test]
async fn corrupt_file_is_a_serialization_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.ron");
    std::fs::write(&path, "this is not ron (").unwrap();

    let result = FileMailboxStore::open(&path).await;

    assert!(matches!(result, Err(StoreError::Serialization(_))));
}

#[tokio::test]
async fn seeding_a_file_store_keeps_counters() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::File {
        path: dir.path().join("pool.ron"),
    };

    let pool = config.open().await.unwrap();
    store::seed(pool.as_ref(), &[mailbox("a")]).await.unwrap();
    pool.record_success("a", Utc::now()).await.unwrap();

    let reconfigured = mailbox("a").with_priority(7);
    let pool = config.open().await.unwrap();
    store::seed(pool.as_ref(), &[reconfigured]).await.unwrap();

    let a = pool.get("a").await.unwrap().unwrap();
    assert_eq!(a.priority, 7);
    assert_eq!(a.sent_count_window, 1);
}

#[tokio::test]
async fn reseeding_drops_mailboxes_removed_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::File {
        path: dir.path().join("pool.ron"),
    };

    let pool = config.open().await.unwrap();
    store::seed(pool.as_ref(), &[mailbox("old"), mailbox("new")])
        .await
        .unwrap();

    let pool = config.open().await.unwrap();
    store::seed(pool.as_ref(), &[mailbox("new")]).await.unwrap();
    assert!(pool.get("old").await.unwrap().is_none());

    let reopened = config.open().await.unwrap();
    let ids: Vec<String> = reopened
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["new"]);
}

#[tokio::test]
async fn failed_write_leaves_memory_matching_disk() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let path = state.join("pool.ron");

    let store = FileMailboxStore::open(&path).await.unwrap();
    store.insert(mailbox("a")).await.unwrap();

    std::fs::remove_dir_all(&state).unwrap();

    assert!(matches!(
        store.record_success("a", Utc::now()).await,
        Err(StoreError::Io(_))
    ));
    assert!(matches!(store.remove("a").await, Err(StoreError::Io(_))));
    assert!(store.insert(mailbox("b")).await.is_err());

    let a = store.get("a").await.unwrap().unwrap();
    assert_eq!(a.sent_count_window, 0);
    assert_eq!(a.total_sent, 0);
    assert!(store.get("b").await.unwrap().is_none());

    std::fs::create_dir_all(&state).unwrap();
    store.record_success("a", Utc::now()).await.unwrap();

    let reopened = FileMailboxStore::open(&path).await.unwrap();
    assert_eq!(reopened.get("a").await.unwrap().unwrap().sent_count_window, 1);
}
