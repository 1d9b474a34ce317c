//! Filesystem watcher: keeps the store synchronized with the document root.
//!
//! Raw notify events are mapped to [`FileEvent`]s, filtered against the
//! extension whitelist and ignore patterns, debounced per path
//! (latest-wins), and collected into batches that a bounded worker pool
//! applies through the same `index_file` contract the MCP tool uses.
//! Editors that save in several syscalls therefore cost one reindex, not
//! five.
//!
//! Every action runs inside an error boundary: failures are logged with
//! path context and counted, and the watcher keeps running. Losing the OS
//! watch handle triggers a drain, a full rescan of the root, and a resume.
//!
//! State machine: `Stopped → Starting → Running → Draining → Stopped`,
//! with `Draining → Starting` on rescans.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ignore::WalkBuilder;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::Instant;

use crate::config::ServerConfig;
use crate::error::{AppError, ErrorCode, ToolError};
use crate::parser::{file_type_of, ParserRegistry};
use crate::store::DocumentStore;
use crate::tools::index_file;

/// Force a batch dispatch once this many debounced events pile up.
const BATCH_MAX_EVENTS: usize = 128;

/// Depth of the raw event channel between notify and the coalescer.
const EVENT_QUEUE_DEPTH: usize = 1024;

// ---------------------------------------------------------------------------
// Events and state
// ---------------------------------------------------------------------------

/// Normalized filesystem event, after whitelist/ignore filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
}

impl FileEvent {
    /// Coalescing key: the path whose index entry the event affects.
    fn key(&self) -> &Path {
        match self {
            FileEvent::Created(p) | FileEvent::Modified(p) | FileEvent::Deleted(p) => p,
            FileEvent::Moved { to, .. } => to,
        }
    }
}

enum WatchSignal {
    File(FileEvent),
    /// The OS watch handle reported a fatal error; rescan and resume.
    Rescan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Draining = 3,
}

struct StateCell(AtomicU8);

impl StateCell {
    fn set(&self, state: WatcherState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> WatcherState {
        match self.0.load(Ordering::Acquire) {
            1 => WatcherState::Starting,
            2 => WatcherState::Running,
            3 => WatcherState::Draining,
            _ => WatcherState::Stopped,
        }
    }
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Shell-style glob match supporting `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[char], text: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('*', rest)) => {
                (0..=text.len()).any(|skip| inner(rest, &text[skip..]))
            }
            Some(('?', rest)) => match text.split_first() {
                Some((_, t)) => inner(rest, t),
                None => false,
            },
            Some((c, rest)) => match text.split_first() {
                Some((t, ts)) if t == c => inner(rest, ts),
                _ => false,
            },
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    inner(&pattern, &text)
}

/// Whitelist and ignore-pattern gate, applied before any work is queued.
pub fn should_track(config: &ServerConfig, path: &Path) -> bool {
    if !config.allows_extension(&file_type_of(path)) {
        return false;
    }
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let relative = path
        .strip_prefix(&config.document_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    for pattern in &config.watch_ignore_patterns {
        if glob_match(pattern, file_name) || glob_match(pattern, &relative) {
            return false;
        }
    }
    // Hidden ancestors are excluded regardless of patterns.
    !relative.split('/').any(|part| part.starts_with('.') && part.len() > 1)
}

/// Map one raw notify event to zero or more [`FileEvent`]s.
pub fn map_notify_event(event: &Event) -> Vec<FileEvent> {
    match event.kind {
        EventKind::Create(_) => {
            event.paths.iter().cloned().map(FileEvent::Created).collect()
        }
        EventKind::Remove(_) => {
            event.paths.iter().cloned().map(FileEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            vec![FileEvent::Moved {
                from: event.paths[0].clone(),
                to: event.paths[1].clone(),
            }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().cloned().map(FileEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().cloned().map(FileEvent::Created).collect()
        }
        EventKind::Modify(_) => {
            event.paths.iter().cloned().map(FileEvent::Modified).collect()
        }
        _ => vec![],
    }
}

/// Apply whitelist rules to a mapped event. A move whose target falls off
/// the whitelist degrades to a delete of the source.
fn normalize_event(config: &ServerConfig, event: FileEvent) -> Option<FileEvent> {
    match event {
        FileEvent::Created(p) => should_track(config, &p).then_some(FileEvent::Created(p)),
        FileEvent::Modified(p) => should_track(config, &p).then_some(FileEvent::Modified(p)),
        FileEvent::Deleted(p) => should_track(config, &p).then_some(FileEvent::Deleted(p)),
        FileEvent::Moved { from, to } => {
            if should_track(config, &to) {
                Some(FileEvent::Moved { from, to })
            } else if should_track(config, &from) {
                Some(FileEvent::Deleted(from))
            } else {
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Watcher handle
// ---------------------------------------------------------------------------

struct WatchDeps {
    store: Arc<DocumentStore>,
    parsers: Arc<ParserRegistry>,
    config: Arc<ServerConfig>,
    errors: Arc<AtomicU64>,
    workers: Arc<Semaphore>,
}

pub struct DocumentWatcher {
    signal_tx: mpsc::Sender<WatchSignal>,
    shutdown_tx: watch::Sender<bool>,
    state: Arc<StateCell>,
    errors: Arc<AtomicU64>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    // Dropping the handle stops OS notifications.
    _os_watcher: Option<RecommendedWatcher>,
}

impl DocumentWatcher {
    /// Start the watcher pipeline. With `attach_os_watcher` false only the
    /// coalescer and workers run; events arrive via [`DocumentWatcher::inject`]
    /// (the test path, and the path used when `watch_enabled` is off but a
    /// startup rescan is still wanted).
    pub fn start(
        store: Arc<DocumentStore>,
        parsers: Arc<ParserRegistry>,
        config: Arc<ServerConfig>,
        attach_os_watcher: bool,
    ) -> Result<Self, AppError> {
        let (signal_tx, signal_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(StateCell(AtomicU8::new(WatcherState::Stopped as u8)));
        let errors = Arc::new(AtomicU64::new(0));

        let os_watcher = if attach_os_watcher {
            Some(spawn_os_watcher(&config, signal_tx.clone())?)
        } else {
            None
        };

        let deps = Arc::new(WatchDeps {
            store,
            parsers,
            config: Arc::clone(&config),
            errors: Arc::clone(&errors),
            workers: Arc::new(Semaphore::new(config.watch_concurrency)),
        });
        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            run_loop(deps, signal_rx, shutdown_rx, task_state).await;
        });

        Ok(Self {
            signal_tx,
            shutdown_tx,
            state,
            errors,
            task: Mutex::new(Some(task)),
            _os_watcher: os_watcher,
        })
    }

    /// Feed an event into the pipeline, as the OS watcher would.
    pub async fn inject(&self, event: FileEvent) {
        let _ = self.signal_tx.send(WatchSignal::File(event)).await;
    }

    pub fn state(&self) -> WatcherState {
        self.state.get()
    }

    /// Per-event failures since start.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Drain pending events and stop.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn spawn_os_watcher(
    config: &ServerConfig,
    tx: mpsc::Sender<WatchSignal>,
) -> Result<RecommendedWatcher, AppError> {
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                for mapped in map_notify_event(&event) {
                    let _ = tx.blocking_send(WatchSignal::File(mapped));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "os watch handle error, scheduling rescan");
                let _ = tx.blocking_send(WatchSignal::Rescan);
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| AppError::Config(format!("cannot create file watcher: {e}")))?;

    watcher
        .watch(&config.document_root, RecursiveMode::Recursive)
        .map_err(|e| {
            AppError::Config(format!(
                "cannot watch {}: {e}",
                config.document_root.display()
            ))
        })?;
    tracing::info!(root = %config.document_root.display(), "watching document root");
    Ok(watcher)
}

// ---------------------------------------------------------------------------
// Coalescing loop
// ---------------------------------------------------------------------------

async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_loop(
    deps: Arc<WatchDeps>,
    mut rx: mpsc::Receiver<WatchSignal>,
    mut shutdown_rx: watch::Receiver<bool>,
    state: Arc<StateCell>,
) {
    state.set(WatcherState::Starting);
    rescan(&deps).await;
    state.set(WatcherState::Running);

    let debounce = Duration::from_millis(deps.config.watch_debounce_ms.max(1));
    let batch_window = Duration::from_millis(deps.config.watch_batch_ms.max(1));

    // Per-path debounce (latest event wins) feeding a global batch.
    let mut pending: HashMap<PathBuf, (FileEvent, Instant)> = HashMap::new();
    let mut batch: Vec<FileEvent> = Vec::new();
    let mut batch_deadline: Option<Instant> = None;

    loop {
        let next_deadline = {
            let earliest = pending.values().map(|(_, d)| *d).min();
            match (earliest, batch_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, b) => b,
            }
        };

        tokio::select! {
            _ = shutdown_rx.changed() => {
                state.set(WatcherState::Draining);
                batch.extend(pending.drain().map(|(_, (event, _))| event));
                dispatch_batch(&deps, std::mem::take(&mut batch)).await;
                break;
            }
            signal = rx.recv() => match signal {
                None => break,
                Some(WatchSignal::Rescan) => {
                    state.set(WatcherState::Draining);
                    batch.extend(pending.drain().map(|(_, (event, _))| event));
                    dispatch_batch(&deps, std::mem::take(&mut batch)).await;
                    batch_deadline = None;
                    state.set(WatcherState::Starting);
                    rescan(&deps).await;
                    state.set(WatcherState::Running);
                }
                Some(WatchSignal::File(raw)) => {
                    if let Some(event) = normalize_event(&deps.config, raw) {
                        let key = event.key().to_path_buf();
                        pending.insert(key, (event, Instant::now() + debounce));
                    }
                }
            },
            _ = maybe_sleep(next_deadline), if next_deadline.is_some() => {
                let now = Instant::now();
                let ready: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, (_, deadline))| *deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in ready {
                    if let Some((event, _)) = pending.remove(&path) {
                        if batch.is_empty() {
                            batch_deadline = Some(now + batch_window);
                        }
                        batch.push(event);
                    }
                }

                let window_closed = batch_deadline.map(|d| d <= now).unwrap_or(false);
                if !batch.is_empty() && (window_closed || batch.len() >= BATCH_MAX_EVENTS) {
                    batch_deadline = None;
                    dispatch_batch(&deps, std::mem::take(&mut batch)).await;
                }
            }
        }
    }

    state.set(WatcherState::Stopped);
}

async fn dispatch_batch(deps: &Arc<WatchDeps>, batch: Vec<FileEvent>) {
    if batch.is_empty() {
        return;
    }
    tracing::debug!(events = batch.len(), "dispatching watcher batch");
    for event in batch {
        let permit = match Arc::clone(&deps.workers).acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };
        let deps = Arc::clone(deps);
        tokio::spawn(async move {
            handle_event(&deps, event).await;
            drop(permit);
        });
    }
}

/// Error boundary for one event: log with path context, count, continue.
async fn handle_event(deps: &WatchDeps, event: FileEvent) {
    let path = event.key().to_path_buf();
    if let Err(e) = apply_event(deps, event).await {
        if e.code == ErrorCode::FileNotFound {
            // The file vanished between the event and the action.
            tracing::debug!(path = %path.display(), "skipping event for vanished file");
            return;
        }
        deps.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            path = %path.display(),
            code = e.code.as_str(),
            "watcher action failed: {}",
            e.message
        );
    }
}

async fn apply_event(deps: &WatchDeps, event: FileEvent) -> Result<(), ToolError> {
    match event {
        FileEvent::Created(path) | FileEvent::Modified(path) => {
            index_file(&deps.store, &deps.parsers, &deps.config, &path, false).await?;
            Ok(())
        }
        FileEvent::Deleted(path) => {
            // Absent documents are a no-op, not an error.
            deps.store.delete_document(&path.to_string_lossy()).await?;
            Ok(())
        }
        FileEvent::Moved { from, to } => {
            let renamed = deps
                .store
                .rename_document(&from.to_string_lossy(), &to.to_string_lossy())
                .await?;
            if !renamed {
                // The source was never indexed; treat the move as a create.
                index_file(&deps.store, &deps.parsers, &deps.config, &to, false).await?;
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Rescan
// ---------------------------------------------------------------------------

/// Walk the document root, index everything trackable, and drop stored
/// documents whose files are gone. Runs at start and after watch-handle
/// loss.
async fn rescan(deps: &Arc<WatchDeps>) {
    let config = Arc::clone(&deps.config);
    let walked = tokio::task::spawn_blocking(move || walk_root(&config)).await;
    let files = match walked {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(error = %e, "rescan walk failed");
            return;
        }
    };

    let on_disk: HashSet<String> =
        files.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    let root = deps.config.document_root.to_string_lossy().into_owned();
    match deps.store.list_paths(&root).await {
        Ok(indexed) => {
            for stale in indexed.into_iter().filter(|p| !on_disk.contains(p)) {
                if let Err(e) = deps.store.delete_document(&stale).await {
                    deps.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(path = stale, "stale cleanup failed: {}", e.message);
                }
            }
        }
        Err(e) => tracing::warn!("could not list indexed paths for rescan: {}", e.message),
    }

    let mut tasks = tokio::task::JoinSet::new();
    for path in files {
        let permit = match Arc::clone(&deps.workers).acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let deps = Arc::clone(deps);
        tasks.spawn(async move {
            handle_event(&deps, FileEvent::Created(path)).await;
            drop(permit);
        });
    }
    while tasks.join_next().await.is_some() {}
    tracing::info!(root = %deps.config.document_root.display(), "rescan complete");
}

/// Collect trackable files under the root with a parallel walk.
fn walk_root(config: &ServerConfig) -> Vec<PathBuf> {
    let results: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
    WalkBuilder::new(&config.document_root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .threads(rayon::current_num_threads().min(8))
        .build_parallel()
        .run(|| {
            Box::new(|entry| {
                if let Ok(entry) = entry {
                    if entry.file_type().is_some_and(|ft| ft.is_file())
                        && should_track(config, entry.path())
                    {
                        if let Ok(mut results) = results.lock() {
                            results.push(entry.path().to_path_buf());
                        }
                    }
                }
                ignore::WalkState::Continue
            })
        });
    results.into_inner().unwrap_or_default()
}
