use crate::builder::IndexBuilder;
use crate::config::IndexerConfig;
use crate::error::IndexError;
use crate::error::Result;
use crate::filter::PathFilter;
use crate::model::IndexEntry;
use crate::store::IndexStore;
use notify::Config as NotifyConfig;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use quill_embeddings::EmbeddingService;
use quill_vectors::VectorRecord;
use quill_vectors::VectorStore;
use quill_workspace::FileChangeSet;
use quill_workspace::PrivacyGate;
use quill_workspace::SecretDetector;
use quill_workspace::WorkspaceContext;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc as std_mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::sync::Semaphore;
use tokio::time::Sleep;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::warn;

const THROTTLE_SLICE: Duration = Duration::from_millis(100);
const WATCH_POLL: Duration = Duration::from_millis(250);

/// Lifecycle state of the index. `Disabled` is the configuration
/// off-switch; the query engine's latency self-disable is a separate
/// state owned by the retrieval crate so diagnostics can tell the two
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Building,
    Ready,
    Failed,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct IndexStatus {
    pub state: IndexState,
    pub files: usize,
    pub updated_at: Option<SystemTime>,
}

struct StatusInner {
    state: IndexState,
    updated_at: Option<SystemTime>,
}

struct Inner {
    workspace: WorkspaceContext,
    config: IndexerConfig,
    builder: IndexBuilder,
    store: Arc<RwLock<IndexStore>>,
    status: RwLock<StatusInner>,
    build_lock: Mutex<()>,
    dirty: std::sync::Mutex<HashSet<String>>,
    persist_dirty: AtomicBool,
    rebuild_epoch: AtomicU64,
    vectors: Option<Arc<VectorStore>>,
    shutdown: CancellationToken,
}

/// Owns the index for one workspace: loads persisted state on open,
/// runs the initial build, subscribes to filesystem events and applies
/// debounced incremental refreshes under a CPU budget. Deletions are
/// applied immediately; create/update events coalesce for
/// `refresh_debounce` before a refresh, and index writes coalesce for
/// `persist_debounce` on top of that.
#[derive(Clone)]
pub struct IndexCoordinator {
    inner: Arc<Inner>,
}

impl IndexCoordinator {
    pub async fn open(
        workspace: WorkspaceContext,
        config: IndexerConfig,
        embedder: Option<Arc<EmbeddingService>>,
        secrets: SecretDetector,
        privacy: PrivacyGate,
        vectors: Option<Arc<VectorStore>>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|err| IndexError::Walk(format!("invalid indexer config: {err}")))?;
        let filter = Arc::new(PathFilter::new(&config.exclude_globs)?);
        let builder = IndexBuilder::new(
            workspace.root(),
            filter,
            config.clone(),
            embedder,
            secrets,
            privacy,
        );

        let enabled = config.enabled;
        let store = if enabled {
            IndexStore::load(workspace.storage_dir(), workspace.root())?
        } else {
            IndexStore::new()
        };
        let loaded_files = store.len();
        let state = if !enabled {
            IndexState::Disabled
        } else if loaded_files == 0 {
            IndexState::Building
        } else {
            IndexState::Ready
        };

        let coordinator = Self {
            inner: Arc::new(Inner {
                workspace,
                config,
                builder,
                store: Arc::new(RwLock::new(store)),
                status: RwLock::new(StatusInner {
                    state,
                    updated_at: None,
                }),
                build_lock: Mutex::new(()),
                dirty: std::sync::Mutex::new(HashSet::new()),
                persist_dirty: AtomicBool::new(false),
                rebuild_epoch: AtomicU64::new(0),
                vectors,
                shutdown: CancellationToken::new(),
            }),
        };
        if enabled && coordinator.inner.config.auto_refresh {
            coordinator.spawn_initial_build(loaded_files == 0);
            coordinator.spawn_watcher();
            coordinator.spawn_persist_loop();
        }
        Ok(coordinator)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Shared store handle for the query engine.
    pub fn store(&self) -> Arc<RwLock<IndexStore>> {
        self.inner.store.clone()
    }

    /// Incremented after every full rebuild; the query engine uses this
    /// to clear its degraded mode.
    pub fn rebuild_epoch(&self) -> u64 {
        self.inner.rebuild_epoch.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub async fn status(&self) -> IndexStatus {
        let guard = self.inner.status.read().await;
        let files = self.inner.store.read().await.len();
        IndexStatus {
            state: guard.state,
            files,
            updated_at: guard.updated_at,
        }
    }

    /// Full rebuild: walk, rebuild every entry, swap the store, persist
    /// immediately and bump the rebuild epoch.
    pub async fn rebuild_index(&self) -> Result<IndexStatus> {
        if !self.inner.config.enabled {
            return Err(IndexError::Disabled);
        }
        let _guard = self.inner.build_lock.lock().await;
        self.set_state(IndexState::Building).await;

        let result = self.build_all().await;
        let store = match result {
            Ok(store) => store,
            Err(err) => {
                self.set_state(IndexState::Failed).await;
                return Err(err);
            }
        };

        if let Err(err) = store.save(self.inner.workspace.storage_dir()) {
            self.set_state(IndexState::Failed).await;
            return Err(err);
        }
        if let Some(vectors) = &self.inner.vectors {
            for uri in store.uris() {
                if let Some((_, entry)) = store.get_by_uri(&uri) {
                    let records = vector_records(&entry);
                    if !records.is_empty()
                        && let Err(err) = vectors.upsert_path(&uri, records).await
                    {
                        warn!("vector upsert failed for {uri}: {err}");
                    }
                }
            }
        }

        {
            let mut guard = self.inner.store.write().await;
            *guard = store;
        }
        self.inner.dirty.lock().map(|mut d| d.clear()).ok();
        self.inner.persist_dirty.store(false, Ordering::Release);
        self.inner.rebuild_epoch.fetch_add(1, Ordering::AcqRel);
        self.set_state(IndexState::Ready).await;
        Ok(self.status().await)
    }

    /// Kick off a background rebuild when the index is cold, optionally
    /// limited to one subtree. Returns immediately; queries served in
    /// the meantime may be empty.
    pub async fn warm_index(&self, root: Option<&Path>) {
        if !self.inner.config.enabled {
            return;
        }
        match root {
            Some(subtree) => {
                let prefix = self
                    .inner
                    .workspace
                    .relative_display(&self.inner.workspace.root().join(subtree));
                if let Ok(uris) = self.inner.builder.discover() {
                    let mut dirty = match self.inner.dirty.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    for uri in uris {
                        if uri.starts_with(&prefix) {
                            dirty.insert(uri);
                        }
                    }
                }
                let this = self.clone();
                tokio::spawn(async move {
                    this.refresh_dirty().await;
                    this.persist_if_dirty().await;
                });
            }
            None => {
                if self.inner.store.read().await.is_empty() {
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = this.rebuild_index().await {
                            warn!("background warm rebuild failed: {err}");
                        }
                    });
                }
            }
        }
    }

    /// Apply one batch of filesystem events: deletions drop entries and
    /// inverted-index references immediately, creates/updates are
    /// marked dirty for the debounced refresh.
    pub async fn apply_events(&self, changes: FileChangeSet) {
        if !self.inner.config.enabled || changes.is_empty() {
            return;
        }
        for path in &changes.deleted {
            let Some(uri) = self.to_uri(path) else { continue };
            let removed = {
                let mut store = self.inner.store.write().await;
                store.remove_uri(&uri)
            };
            if removed.is_some() {
                if let Some(vectors) = &self.inner.vectors
                    && let Err(err) = vectors.remove_path(&uri).await
                {
                    warn!("vector removal failed for {uri}: {err}");
                }
                self.inner.persist_dirty.store(true, Ordering::Release);
            }
            // A pending refresh for a deleted path would recreate it.
            if let Ok(mut dirty) = self.inner.dirty.lock() {
                dirty.remove(&uri);
            }
        }

        let mut dirty = match self.inner.dirty.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for path in changes.added.iter().chain(&changes.updated) {
            if let Some(uri) = self.to_uri(path)
                && self.inner.builder.is_eligible(&uri)
            {
                dirty.insert(uri);
            }
        }
    }

    /// Refresh everything currently marked dirty, in parallel batches
    /// under the CPU budget. Later events for a URI supersede earlier
    /// pending ones because the dirty set deduplicates.
    pub async fn refresh_dirty(&self) {
        let pending: Vec<String> = {
            let mut dirty = match self.inner.dirty.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            dirty.drain().collect()
        };
        if pending.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.inner.config.parallelism.max(1)));
        let mut throttle = CpuThrottle::new(self.inner.config.cpu_budget);
        let mut tasks = Vec::with_capacity(pending.len());
        for uri in pending {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = self.clone();
            tasks.push(tokio::spawn(async move {
                let started = Instant::now();
                let result = this
                    .inner
                    .builder
                    .build_entry(&uri, &this.inner.shutdown.child_token())
                    .await;
                drop(permit);
                (uri, result, started.elapsed())
            }));
        }

        let mut changed = false;
        for task in tasks {
            let (uri, result, work) = match task.await {
                Ok(done) => done,
                Err(err) => {
                    warn!("refresh task panicked: {err}");
                    continue;
                }
            };
            throttle.charge(work).await;
            match result {
                Ok(Ok(Some(entry))) => {
                    let records = vector_records(&entry);
                    {
                        let mut store = self.inner.store.write().await;
                        store.upsert(entry);
                    }
                    if let Some(vectors) = &self.inner.vectors
                        && !records.is_empty()
                        && let Err(err) = vectors.upsert_path(&uri, records).await
                    {
                        warn!("vector upsert failed for {uri}: {err}");
                    }
                    changed = true;
                }
                Ok(Ok(None)) | Ok(Err(_)) => {
                    // Vanished or unreadable: drop any stale entry. A
                    // single bad file never fails the refresh.
                    let removed = {
                        let mut store = self.inner.store.write().await;
                        store.remove_uri(&uri)
                    };
                    if removed.is_some() {
                        changed = true;
                    }
                }
                Err(err) => {
                    warn!("refresh failed for {uri}: {err}");
                }
            }
        }

        if changed {
            self.inner.persist_dirty.store(true, Ordering::Release);
            self.touch().await;
        }
    }

    /// Write the store to disk when something changed since the last
    /// persist.
    pub async fn persist_if_dirty(&self) {
        if !self.inner.persist_dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let store = self.inner.store.read().await;
        if let Err(err) = store.save(self.inner.workspace.storage_dir()) {
            warn!("index persist failed: {err}");
            self.inner.persist_dirty.store(true, Ordering::Release);
        }
    }

    async fn build_all(&self) -> Result<IndexStore> {
        let uris = {
            let builder = self.inner.builder.clone();
            tokio::task::spawn_blocking(move || builder.discover())
                .await
                .map_err(|err| IndexError::Walk(err.to_string()))??
        };

        let semaphore = Arc::new(Semaphore::new(self.inner.config.parallelism.max(1)));
        let mut throttle = CpuThrottle::new(self.inner.config.cpu_budget);
        let mut tasks = Vec::with_capacity(uris.len());
        for uri in uris {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = self.clone();
            tasks.push(tokio::spawn(async move {
                let started = Instant::now();
                let result = this
                    .inner
                    .builder
                    .build_entry(&uri, &this.inner.shutdown.child_token())
                    .await;
                drop(permit);
                (uri, result, started.elapsed())
            }));
        }

        let mut store = IndexStore::new();
        for task in tasks {
            let (uri, result, work) = match task.await {
                Ok(done) => done,
                Err(err) => {
                    warn!("build task panicked: {err}");
                    continue;
                }
            };
            throttle.charge(work).await;
            match result {
                Ok(Ok(Some(entry))) => {
                    store.upsert(entry);
                }
                Ok(Ok(None)) => {}
                Ok(Err(skipped)) => {
                    tracing::debug!("skipped {}: {:?}", skipped.uri, skipped.reason);
                }
                Err(err) => warn!("failed to index {uri}: {err}"),
            }
        }
        Ok(store)
    }

    fn to_uri(&self, path: &Path) -> Option<String> {
        let rel = if path.is_absolute() {
            path.strip_prefix(self.inner.workspace.root()).ok()?
        } else {
            path
        };
        let uri = rel.to_string_lossy().replace('\\', "/");
        if uri.is_empty() { None } else { Some(uri) }
    }

    async fn set_state(&self, state: IndexState) {
        let mut guard = self.inner.status.write().await;
        guard.state = state;
        guard.updated_at = Some(SystemTime::now());
    }

    async fn touch(&self) {
        let mut guard = self.inner.status.write().await;
        guard.updated_at = Some(SystemTime::now());
    }

    fn spawn_initial_build(&self, cold: bool) {
        if !cold {
            return;
        }
        let this = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            if shutdown.is_cancelled() {
                return;
            }
            if let Err(err) = this.rebuild_index().await
                && !shutdown.is_cancelled()
            {
                error!("initial index build failed: {err}");
            }
        });
    }

    fn spawn_watcher(&self) {
        let this = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let root = self.inner.workspace.root().to_path_buf();
        let refresh_debounce = self.inner.config.refresh_debounce;
        tokio::spawn(async move {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let thread_shutdown = shutdown.clone();
            let watch_root = root.clone();
            std::thread::spawn(move || {
                if let Err(err) = watch_workspace(watch_root, tx, thread_shutdown.clone())
                    && !thread_shutdown.is_cancelled()
                {
                    error!("workspace watcher error: {err:?}");
                }
            });

            let mut flush_timer: Option<Pin<Box<Sleep>>> = None;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    maybe = rx.recv() => {
                        let Some(changes) = maybe else { break };
                        let has_refresh_work =
                            !changes.added.is_empty() || !changes.updated.is_empty();
                        this.apply_events(changes).await;
                        if has_refresh_work && flush_timer.is_none() {
                            flush_timer = Some(Box::pin(sleep(refresh_debounce)));
                        }
                    }
                    _ = async {
                        if let Some(timer) = &mut flush_timer {
                            timer.await;
                        }
                    }, if flush_timer.is_some() => {
                        flush_timer = None;
                        if shutdown.is_cancelled() {
                            break;
                        }
                        this.refresh_dirty().await;
                    }
                }
            }
        });
    }

    fn spawn_persist_loop(&self) {
        let this = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let debounce = self.inner.config.persist_debounce;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        this.persist_if_dirty().await;
                        break;
                    }
                    _ = sleep(debounce) => {
                        this.persist_if_dirty().await;
                    }
                }
            }
        });
    }
}

/// Wall-time budgeted throttle: every 100 ms slice, if accumulated work
/// exceeds `budget` of the slice, sleep long enough that the ratio
/// drops back under the budget.
struct CpuThrottle {
    budget: f64,
    slice_start: Instant,
    worked: Duration,
}

impl CpuThrottle {
    fn new(budget: f64) -> Self {
        Self {
            budget: budget.clamp(0.01, 1.0),
            slice_start: Instant::now(),
            worked: Duration::ZERO,
        }
    }

    async fn charge(&mut self, work: Duration) {
        self.worked += work;
        let elapsed = self.slice_start.elapsed();
        if elapsed >= THROTTLE_SLICE {
            self.slice_start = Instant::now();
            self.worked = Duration::ZERO;
            return;
        }
        let allowed = self.budget * elapsed.as_secs_f64();
        if self.worked.as_secs_f64() > allowed {
            let target_wall = self.worked.as_secs_f64() / self.budget;
            let deficit = target_wall - elapsed.as_secs_f64();
            if deficit > 0.0 {
                sleep(Duration::from_secs_f64(deficit.min(1.0))).await;
            }
            self.slice_start = Instant::now();
            self.worked = Duration::ZERO;
        }
    }
}

fn vector_records(entry: &IndexEntry) -> Vec<VectorRecord> {
    entry
        .chunks
        .iter()
        .filter_map(|chunk| {
            chunk.embedding.as_ref().map(|vector| VectorRecord {
                path: entry.uri.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                vector: vector.clone(),
            })
        })
        .collect()
}

fn watch_workspace(
    root: PathBuf,
    tx: tokio::sync::mpsc::UnboundedSender<FileChangeSet>,
    shutdown: CancellationToken,
) -> notify::Result<()> {
    let (watch_tx, watch_rx) = std_mpsc::channel();
    let mut watcher = RecommendedWatcher::new(watch_tx, NotifyConfig::default())?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match watch_rx.recv_timeout(WATCH_POLL) {
            Ok(Ok(event)) => {
                let mut changes = FileChangeSet::default();
                for path in event.paths {
                    if path.exists() {
                        changes.updated.push(path);
                    } else {
                        changes.deleted.push(path);
                    }
                }
                if !changes.is_empty() && tx.send(changes).is_err() {
                    break;
                }
            }
            Ok(Err(err)) => warn!("watcher error: {err:?}"),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}
