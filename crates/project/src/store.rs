use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use workbench_core::path::{self, PathError};
use workbench_core::{
    ContentClassifier, Dirent, FileEntry, FileMap, FileModifications, ModificationTracker, Observable,
    DEFAULT_SAMPLE_LEN,
};
use workbench_sandbox::{Sandbox, SandboxError, WatchFilter};

use crate::watcher::{ProjectWatcher, DEFAULT_COALESCE_WINDOW};

/// Errors raised by the project store.
/// 專案儲存區的錯誤。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    InvalidPath(#[from] PathError),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl StoreError {
    /// Returns `true` for failures that indicate a bug rather than an I/O problem.
    pub fn is_invariant(&self) -> bool {
        matches!(self, StoreError::Invariant(_))
    }
}

/// Tunables for the store's watch subscription and classifier.
/// 監看與內容分類的設定。
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    pub filter: WatchFilter,
    pub coalesce_window: Duration,
    pub sample_len: usize,
}

impl StoreOptions {
    pub fn for_work_dir(work_dir: &str) -> Self {
        Self {
            filter: WatchFilter::for_work_dir(work_dir),
            coalesce_window: DEFAULT_COALESCE_WINDOW,
            sample_len: DEFAULT_SAMPLE_LEN,
        }
    }
}

/// Owns the canonical file map, its watcher and the modification baselines.
/// 擁有標準檔案對照表、監看器與修改基準。
pub struct ProjectStore {
    sandbox: Arc<dyn Sandbox>,
    options: StoreOptions,
    files: Arc<Observable<FileMap>>,
    watcher: Arc<ProjectWatcher>,
    tracker: Mutex<ModificationTracker>,
    save_locks: SaveLocks,
    watching: AtomicBool,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProjectStore {
    pub fn new(sandbox: Arc<dyn Sandbox>, options: StoreOptions) -> Self {
        Self::with_tracker(sandbox, options, ModificationTracker::new())
    }

    /// Uses a caller-supplied tracker, e.g. one with a custom diff function.
    pub fn with_tracker(sandbox: Arc<dyn Sandbox>, options: StoreOptions, tracker: ModificationTracker) -> Self {
        let files = Arc::new(Observable::default());
        let watcher = Arc::new(ProjectWatcher::new(
            Arc::clone(&files),
            ContentClassifier::new(options.sample_len),
        ));
        Self {
            sandbox,
            options,
            files,
            watcher,
            tracker: Mutex::new(tracker),
            save_locks: Mutex::new(HashMap::new()),
            watching: AtomicBool::new(false),
            watch_task: Mutex::new(None),
        }
    }

    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    pub fn work_dir(&self) -> &str {
        self.sandbox.work_dir()
    }

    pub fn files(&self) -> &Arc<Observable<FileMap>> {
        &self.files
    }

    pub fn files_count(&self) -> usize {
        self.watcher.file_count()
    }

    pub fn watcher(&self) -> &Arc<ProjectWatcher> {
        &self.watcher
    }

    /// Subscribes to the sandbox change stream. Later calls are no-ops.
    /// 訂閱沙箱變更；重複呼叫不會再次訂閱。
    pub async fn watch(&self) -> Result<(), StoreError> {
        if self.watching.swap(true, Ordering::SeqCst) {
            tracing::debug!("project store is already watching");
            return Ok(());
        }
        let subscription = match self.sandbox.watch_paths(self.options.filter.clone()).await {
            Ok(subscription) => subscription,
            Err(err) => {
                self.watching.store(false, Ordering::SeqCst);
                tracing::error!(error = %err, "failed to start watching the sandbox");
                return Err(err.into());
            }
        };
        tracing::info!(work_dir = self.work_dir(), "watching sandbox");
        let task = tokio::spawn(Arc::clone(&self.watcher).run(subscription, self.options.coalesce_window));
        *lock(&self.watch_task) = Some(task);
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Returns the live file at `path`; folders and tombstones yield `None`.
    pub fn get_file(&self, path: &str) -> Option<FileEntry> {
        self.files.get().file(path).cloned()
    }

    /// Writes `content` through the sandbox, records the pre-write baseline
    /// and optimistically updates the map.
    /// 透過沙箱寫入檔案，記錄基準並先行更新對照表。
    pub async fn save_file(&self, file_path: &str, content: &str) -> Result<(), StoreError> {
        let relative = path::relative_to(self.work_dir(), file_path)?.to_string();
        let file_path = path::normalize(file_path);

        let gate = self.save_gate(file_path);
        let _held = gate.mutex.lock().await;

        let Some(original) = self.get_file(file_path) else {
            tracing::error!(path = file_path, "save requested for a file that is not in the project");
            return Err(StoreError::Invariant(format!(
                "cannot save '{file_path}': no live file at that path"
            )));
        };

        if let Err(err) = self.sandbox.write_file(&relative, content.as_bytes()).await {
            tracing::error!(path = file_path, error = %err, "failed to write file");
            return Err(err.into());
        }

        lock(&self.tracker).track(file_path, original.content());
        self.files
            .update(|files| files.set(file_path, Dirent::File(FileEntry::text(content))));
        tracing::info!(path = file_path, bytes = content.len(), "file saved");
        Ok(())
    }

    fn save_gate(&self, file_path: &str) -> SaveGate<'_> {
        let mut locks = lock(&self.save_locks);
        let mutex = Arc::clone(locks.entry(file_path.to_string()).or_default());
        SaveGate {
            locks: &self.save_locks,
            path: file_path.to_string(),
            mutex,
        }
    }

    pub fn get_file_modifications(&self) -> FileModifications {
        let files = self.files.get();
        lock(&self.tracker).modifications(&files)
    }

    pub fn reset_file_modifications(&self) {
        lock(&self.tracker).reset();
    }

    pub fn baseline(&self, file_path: &str) -> Option<String> {
        lock(&self.tracker).baseline(file_path).map(str::to_string)
    }
}

type SaveLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// 單一路徑的儲存閘門；最後一個持有者離開時移除。 / Per-path save gate, dropped from the map by its last holder.
struct SaveGate<'a> {
    locks: &'a SaveLocks,
    path: String,
    mutex: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for SaveGate<'_> {
    fn drop(&mut self) {
        let mut locks = lock(self.locks);
        // Ours plus the map's; clones only happen under this lock.
        if Arc::strong_count(&self.mutex) == 2 {
            locks.remove(&self.path);
        }
    }
}

impl Drop for ProjectStore {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.watch_task).take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ProjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectStore")
            .field("work_dir", &self.work_dir())
            .field("options", &self.options)
            .field("files_count", &self.files_count())
            .field("watching", &self.is_watching())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
