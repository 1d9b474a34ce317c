//! Watcher pipeline tests: events are injected directly (no OS watcher),
//! so the debounce/batch/worker plumbing and the event→action mapping are
//! exercised deterministically.

mod helpers;

use std::future::Future;
use std::time::Duration;

use helpers::TestHarness;
use mydocs_mcp::watcher::{DocumentWatcher, FileEvent, WatcherState};
use serde_json::json;

async fn wait_for<F, Fut>(mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if probe().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

fn start_watcher(h: &TestHarness) -> DocumentWatcher {
    DocumentWatcher::start(
        h.ctx.store.clone(),
        h.ctx.parsers.clone(),
        h.ctx.config.clone(),
        false,
    )
    .expect("start watcher")
}

#[tokio::test]
async fn created_event_indexes_the_file() {
    let h = TestHarness::new();
    let watcher = start_watcher(&h);

    let path = h.write_doc("fresh.md", "watched content arrives\n");
    watcher.inject(FileEvent::Created(path.clone())).await;

    let store = h.ctx.store.clone();
    let found = wait_for(|| {
        let store = store.clone();
        let path = path.clone();
        async move { store.get_by_path(&path.to_string_lossy()).await.is_ok() }
    })
    .await;
    assert!(found, "created file was not indexed in time");
    assert_eq!(watcher.error_count(), 0);
    assert_eq!(watcher.state(), WatcherState::Running);
    watcher.stop().await;
    assert_eq!(watcher.state(), WatcherState::Stopped);
}

#[tokio::test]
async fn modified_event_reindexes_changed_content() {
    let h = TestHarness::new();
    let path = h.write_doc("notes.md", "first revision\n");
    let watcher = start_watcher(&h);

    // Initial rescan picks the file up.
    let store = h.ctx.store.clone();
    let indexed = wait_for(|| {
        let store = store.clone();
        let path = path.clone();
        async move { store.get_by_path(&path.to_string_lossy()).await.is_ok() }
    })
    .await;
    assert!(indexed);

    h.write_doc("notes.md", "second revision with more words\n");
    watcher.inject(FileEvent::Modified(path.clone())).await;

    let store = h.ctx.store.clone();
    let updated = wait_for(|| {
        let store = store.clone();
        let path = path.clone();
        async move {
            store
                .get_by_path(&path.to_string_lossy())
                .await
                .map(|d| d.normalized_text.contains("second revision"))
                .unwrap_or(false)
        }
    })
    .await;
    assert!(updated, "modified file was not reindexed");
    watcher.stop().await;
}

#[tokio::test]
async fn move_preserves_document_id() {
    let h = TestHarness::new();
    let from = h.write_doc("guide.md", "Docker setup instructions\n");
    let watcher = start_watcher(&h);

    let store = h.ctx.store.clone();
    let from_str = from.to_string_lossy().into_owned();
    let probe = from_str.clone();
    assert!(
        wait_for(|| {
            let store = store.clone();
            let probe = probe.clone();
            async move { store.get_by_path(&probe).await.is_ok() }
        })
        .await
    );
    let original_id = h.ctx.store.get_by_path(&from_str).await.unwrap().id;

    let to = h.root.join("installation.md");
    std::fs::rename(&from, &to).unwrap();
    watcher
        .inject(FileEvent::Moved { from: from.clone(), to: to.clone() })
        .await;

    let store = h.ctx.store.clone();
    let to_str = to.to_string_lossy().into_owned();
    let probe = to_str.clone();
    assert!(
        wait_for(|| {
            let store = store.clone();
            let probe = probe.clone();
            async move { store.get_by_path(&probe).await.is_ok() }
        })
        .await,
        "moved document did not re-key"
    );

    let moved = h.ctx.store.get_by_path(&to_str).await.unwrap();
    assert_eq!(moved.id, original_id, "move must preserve the document id");
    assert!(h.ctx.store.get_by_path(&from_str).await.is_err());

    // The search surface agrees with the tool layer.
    let results = h.call_tool_ok("searchDocuments", json!({ "query": "docker" })).await;
    let hits = results["results"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["path"], to_str);
    assert_eq!(hits[0]["document_id"].as_i64().unwrap(), original_id);
    watcher.stop().await;
}

#[tokio::test]
async fn delete_event_removes_the_document() {
    let h = TestHarness::new();
    let path = h.write_doc("gone.md", "soon to be removed\n");
    let watcher = start_watcher(&h);

    let store = h.ctx.store.clone();
    let path_probe = path.clone();
    assert!(
        wait_for(|| {
            let store = store.clone();
            let path = path_probe.clone();
            async move { store.get_by_path(&path.to_string_lossy()).await.is_ok() }
        })
        .await
    );

    std::fs::remove_file(&path).unwrap();
    watcher.inject(FileEvent::Deleted(path.clone())).await;

    let store = h.ctx.store.clone();
    let removed = wait_for(|| {
        let store = store.clone();
        let path = path.clone();
        async move { store.get_by_path(&path.to_string_lossy()).await.is_err() }
    })
    .await;
    assert!(removed, "deleted file stayed in the index");

    let (_, stable) = h
        .call_tool_err("getDocument", json!({ "file_path": path.to_str().unwrap() }))
        .await;
    assert_eq!(stable, "DOCUMENT_NOT_FOUND");
    watcher.stop().await;
}

#[tokio::test]
async fn move_off_whitelist_deletes_the_document() {
    let h = TestHarness::new();
    let from = h.write_doc("keep.md", "content leaving the whitelist\n");
    let watcher = start_watcher(&h);

    let store = h.ctx.store.clone();
    let from_probe = from.clone();
    assert!(
        wait_for(|| {
            let store = store.clone();
            let path = from_probe.clone();
            async move { store.get_by_path(&path.to_string_lossy()).await.is_ok() }
        })
        .await
    );

    let to = h.root.join("keep.bak");
    std::fs::rename(&from, &to).unwrap();
    watcher.inject(FileEvent::Moved { from: from.clone(), to }).await;

    let store = h.ctx.store.clone();
    let removed = wait_for(|| {
        let store = store.clone();
        let path = from.clone();
        async move { store.get_by_path(&path.to_string_lossy()).await.is_err() }
    })
    .await;
    assert!(removed, "off-whitelist move should delete the source document");
    watcher.stop().await;
}

#[tokio::test]
async fn startup_rescan_indexes_existing_and_drops_stale() {
    let h = TestHarness::new();

    // Pre-index a document whose file then disappears.
    let stale = h.write_doc("stale.md", "stale entry\n");
    h.call_tool_ok("indexDocument", json!({ "file_path": stale.to_str().unwrap() }))
        .await;
    std::fs::remove_file(&stale).unwrap();

    // And a file that exists but was never indexed.
    let fresh = h.write_doc("fresh.md", "fresh entry\n");

    let watcher = start_watcher(&h);

    let store = h.ctx.store.clone();
    let fresh_probe = fresh.clone();
    assert!(
        wait_for(|| {
            let store = store.clone();
            let path = fresh_probe.clone();
            async move { store.get_by_path(&path.to_string_lossy()).await.is_ok() }
        })
        .await,
        "rescan should index files already on disk"
    );

    let store = h.ctx.store.clone();
    let stale_probe = stale.clone();
    assert!(
        wait_for(|| {
            let store = store.clone();
            let path = stale_probe.clone();
            async move { store.get_by_path(&path.to_string_lossy()).await.is_err() }
        })
        .await,
        "rescan should drop documents whose files are gone"
    );
    watcher.stop().await;
}

#[tokio::test]
async fn per_event_failures_are_counted_not_fatal() {
    let h = TestHarness::new_with(|c| c.max_document_bytes = 32);
    let watcher = start_watcher(&h);

    let big = h.write_doc("big.md", &"word ".repeat(50));
    watcher.inject(FileEvent::Created(big)).await;

    let errors_seen = wait_for(|| {
        let count = watcher.error_count();
        async move { count >= 1 }
    })
    .await;
    assert!(errors_seen, "oversized file should be a counted failure");
    assert_eq!(watcher.state(), WatcherState::Running);

    // The watcher keeps processing after the failure.
    let ok = h.write_doc("small.md", "fits fine\n");
    watcher.inject(FileEvent::Created(ok.clone())).await;
    let store = h.ctx.store.clone();
    assert!(
        wait_for(|| {
            let store = store.clone();
            let path = ok.clone();
            async move { store.get_by_path(&path.to_string_lossy()).await.is_ok() }
        })
        .await
    );
    watcher.stop().await;
}

#[tokio::test]
async fn debounce_coalesces_bursts_into_one_index() {
    let h = TestHarness::new();
    let watcher = start_watcher(&h);

    let path = h.write_doc("burst.md", "final content after burst\n");
    // Editors often emit several writes per save; all land within the
    // debounce window and collapse into one event.
    for _ in 0..5 {
        watcher.inject(FileEvent::Modified(path.clone())).await;
    }

    let store = h.ctx.store.clone();
    let indexed = wait_for(|| {
        let store = store.clone();
        let path = path.clone();
        async move { store.get_by_path(&path.to_string_lossy()).await.is_ok() }
    })
    .await;
    assert!(indexed);
    assert_eq!(watcher.error_count(), 0);
    watcher.stop().await;
}
