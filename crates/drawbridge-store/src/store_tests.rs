use super::*;
use crate::persistence::FilePersistence;
use drawbridge_protocols::TargetDescriptor;
use tempfile::TempDir;

fn draft(selector: &str) -> AnnotationDraft {
    AnnotationDraft::element(
        TargetDescriptor::new(selector).with_text("Get Started"),
        "make it pop",
    )
    .with_pathname("/")
}

fn resolve(summary: &str) -> LifecycleEvent {
    LifecycleEvent::Resolve {
        summary: summary.to_string(),
    }
}

#[tokio::test]
async fn test_submit_assigns_id_and_pending() {
    let store = AnnotationStore::in_memory();
    let annotation = store.submit(draft(".btn")).await.unwrap();

    assert!(!annotation.id.is_empty());
    assert_eq!(annotation.state, AnnotationState::Pending);
    assert_eq!(store.get(&annotation.id).await.unwrap(), annotation);
}

#[tokio::test]
async fn test_submit_keeps_client_id_and_rejects_duplicate() {
    let store = AnnotationStore::in_memory();
    let annotation = store.submit(draft(".btn").with_id("client-1")).await.unwrap();
    assert_eq!(annotation.id, "client-1");

    let err = store.submit(draft(".other").with_id("client-1")).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_resubmit_retries_failed_and_terminal_records() {
    let store = AnnotationStore::in_memory();
    let annotation = store.resubmit(draft(".btn").with_id("client-1")).await.unwrap();
    assert_eq!(annotation.attempts, 0);

    // Never attempted, or in flight: still a duplicate.
    let err = store.resubmit(draft(".btn").with_id("client-1")).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
    store.transition("client-1", LifecycleEvent::Acknowledge).await.unwrap();
    let err = store.resubmit(draft(".btn").with_id("client-1")).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));

    let fail = LifecycleEvent::Fail {
        reason: "timed out".to_string(),
    };
    store.transition("client-1", fail).await.unwrap();
    let retried = store.resubmit(draft(".btn").with_id("client-1")).await.unwrap();
    assert_eq!(retried.state, AnnotationState::Pending);
    assert_eq!(retried.attempts, 1);

    store.transition("client-1", LifecycleEvent::Acknowledge).await.unwrap();
    store.transition("client-1", resolve("done")).await.unwrap();
    store.mark_reverted("client-1").await.unwrap();
    let reopened = store.resubmit(draft(".btn").with_id("client-1")).await.unwrap();
    assert_eq!(reopened.state, AnnotationState::Pending);
    assert!(reopened.resolution.is_none());
    assert!(reopened.reverted_at.is_none());
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_submit_rejects_unsafe_id() {
    let store = AnnotationStore::in_memory();
    for bad in ["../etc", "", ".hidden", "a/b"] {
        let err = store.submit(draft(".btn").with_id(bad)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidId(_)), "{bad}");
    }
}

#[tokio::test]
async fn test_get_unknown_is_not_found() {
    let store = AnnotationStore::in_memory();
    let err = store.get("nope").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_pending_cannot_resolve_directly() {
    let store = AnnotationStore::in_memory();
    let annotation = store.submit(draft(".btn")).await.unwrap();

    let err = store.transition(&annotation.id, resolve("done")).await.unwrap_err();
    assert!(err.is_invalid_transition());

    let unchanged = store.get(&annotation.id).await.unwrap();
    assert_eq!(unchanged.state, AnnotationState::Pending);
    assert_eq!(unchanged.updated_at, annotation.updated_at);
    assert!(unchanged.resolution.is_none());
}

#[tokio::test]
async fn test_full_lifecycle() {
    let store = AnnotationStore::in_memory();
    let id = store.submit(draft(".btn")).await.unwrap().id;

    let acked = store.transition(&id, LifecycleEvent::Acknowledge).await.unwrap();
    assert_eq!(acked.state, AnnotationState::Acknowledged);

    let resolved = store.transition(&id, resolve("done")).await.unwrap();
    assert_eq!(resolved.state, AnnotationState::Resolved);
    assert_eq!(resolved.resolution.as_deref(), Some("done"));

    let err = store.transition(&id, LifecycleEvent::Acknowledge).await.unwrap_err();
    assert!(err.is_invalid_transition());
}

#[tokio::test]
async fn test_transition_unknown_is_not_found() {
    let store = AnnotationStore::in_memory();
    let err = store.transition("ghost", LifecycleEvent::Acknowledge).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_preserves_insertion_order_and_filters() {
    let store = AnnotationStore::in_memory();
    let a = store.submit(draft(".a")).await.unwrap();
    let b = store.submit(draft(".b").with_pathname("/pricing")).await.unwrap();
    let c = store.submit(draft(".c")).await.unwrap();
    store.transition(&b.id, LifecycleEvent::Acknowledge).await.unwrap();

    let all: Vec<String> = store.list(&ListFilter::all()).await.into_iter().map(|x| x.id).collect();
    assert_eq!(all, vec![a.id.clone(), b.id.clone(), c.id.clone()]);

    let pending: Vec<String> = store
        .list(&ListFilter::pending())
        .await
        .into_iter()
        .map(|x| x.id)
        .collect();
    assert_eq!(pending, vec![a.id.clone(), c.id.clone()]);

    let pricing = store.list(&ListFilter::all().with_pathname("/pricing")).await;
    assert_eq!(pricing.len(), 1);
    assert_eq!(pricing[0].id, b.id);
}

#[tokio::test]
async fn test_concurrent_submits_get_distinct_ids() {
    let store = Arc::new(AnnotationStore::in_memory());

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.submit(draft(&format!(".item-{i}"))).await.unwrap()
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().id);
    }

    let listed: Vec<String> = store.list(&ListFilter::all()).await.into_iter().map(|a| a.id).collect();
    assert_eq!(listed.len(), 16);
    let mut unique = listed.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 16);
    for id in &ids {
        assert!(listed.contains(id));
    }
}

#[tokio::test]
async fn test_sequential_submits_listed_in_submission_order() {
    let store = AnnotationStore::in_memory();
    let first = store.submit(draft(".first")).await.unwrap();
    let second = store.submit(draft(".second")).await.unwrap();

    let listed = store.list(&ListFilter::all()).await;
    assert_eq!(listed[0].id, first.id);
    assert_eq!(listed[1].id, second.id);
}

#[tokio::test]
async fn test_fail_and_reset_return_to_pending() {
    let store = AnnotationStore::in_memory();
    let id = store.submit(draft(".btn")).await.unwrap().id;

    store.transition(&id, LifecycleEvent::Acknowledge).await.unwrap();
    let failed = store
        .transition(&id, LifecycleEvent::Fail { reason: "exit 1".to_string() })
        .await
        .unwrap();
    assert_eq!(failed.state, AnnotationState::Pending);
    assert_eq!(failed.attempts, 1);

    store
        .transition(&id, LifecycleEvent::Dismiss { reason: "nah".to_string() })
        .await
        .unwrap();
    let reset = store.transition(&id, LifecycleEvent::Reset).await.unwrap();
    assert!(reset.is_pending());
}

#[tokio::test]
async fn test_mark_reverted_keeps_state() {
    let store = AnnotationStore::in_memory();
    let id = store.submit(draft(".btn")).await.unwrap().id;

    let reverted = store.mark_reverted(&id).await.unwrap();
    assert!(reverted.reverted_at.is_some());
    assert_eq!(reverted.state, AnnotationState::Pending);
}

#[tokio::test]
async fn test_counts() {
    let store = AnnotationStore::in_memory();
    let a = store.submit(draft(".a")).await.unwrap();
    store.submit(draft(".b")).await.unwrap();
    store.transition(&a.id, LifecycleEvent::Acknowledge).await.unwrap();

    let counts = store.counts().await;
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.acknowledged, 1);
    assert_eq!(counts.total(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_watch_times_out_with_no_work() {
    let store = AnnotationStore::in_memory();
    let started = tokio::time::Instant::now();

    let result = store.watch_pending(Duration::from_secs(30)).await;
    assert!(result.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(started.elapsed() < Duration::from_secs(31));
}

#[tokio::test]
async fn test_watch_returns_existing_pending_immediately() {
    let store = AnnotationStore::in_memory();
    let a = store.submit(draft(".a")).await.unwrap();

    let result = store.watch_pending(Duration::from_secs(60)).await;
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, a.id);
}

#[tokio::test]
async fn test_watch_wakes_on_submit() {
    let store = Arc::new(AnnotationStore::in_memory());

    let watcher = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.watch_pending(Duration::from_secs(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let submitted = store.submit(draft(".late")).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), watcher)
        .await
        .expect("watch should return promptly")
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].id, submitted.id);
}

#[tokio::test]
async fn test_subscription_ignores_non_pending_changes() {
    let store = AnnotationStore::in_memory();
    let id = store.submit(draft(".a")).await.unwrap().id;

    let mut subscription = store.subscribe();
    store.transition(&id, LifecycleEvent::Acknowledge).await.unwrap();
    assert!(subscription.next(Duration::from_millis(50)).await.is_none());

    store
        .transition(&id, LifecycleEvent::Fail { reason: "timeout".to_string() })
        .await
        .unwrap();
    let next = subscription.next(Duration::from_millis(50)).await.unwrap();
    assert_eq!(next.id, id);
}

#[tokio::test]
async fn test_file_backed_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("annotations");

    let (first, second) = {
        let backend = Arc::new(FilePersistence::new(&path).await.unwrap());
        let store = AnnotationStore::open(backend).await.unwrap();
        let first = store.submit(draft(".a")).await.unwrap();
        let second = store.submit(draft(".b")).await.unwrap();
        store.transition(&second.id, LifecycleEvent::Acknowledge).await.unwrap();
        (first, second)
    };

    let backend = Arc::new(FilePersistence::new(&path).await.unwrap());
    let store = AnnotationStore::open(backend).await.unwrap();
    let listed = store.list(&ListFilter::all()).await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, first.id);
    assert_eq!(listed[1].id, second.id);
    assert_eq!(listed[1].state, AnnotationState::Acknowledged);

    let third = store.submit(draft(".c")).await.unwrap();
    assert_eq!(store.list(&ListFilter::all()).await[2].id, third.id);
}

#[tokio::test]
async fn test_open_fails_on_corrupt_record() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("bad.json"), b"[1, 2").unwrap();

    let backend = Arc::new(FilePersistence::new(temp_dir.path()).await.unwrap());
    let result = AnnotationStore::open(backend).await;
    assert!(matches!(result, Err(StoreError::Corrupt { .. })));
}
