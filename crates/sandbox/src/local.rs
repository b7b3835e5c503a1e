use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use walkdir::WalkDir;
use workbench_core::path;

use crate::error::SandboxError;
use crate::event::{CompiledFilter, PathWatcherEvent, WatchBatch, WatchEventKind, WatchFilter, WatchSubscription};
use crate::process::{ExecCommand, ExecOutput, ProcessExecutor};
use crate::{clean_relative, DirEntry, ReadDirOptions, Sandbox};

/// 原子寫入使用的暫存檔後綴，監看時忽略。 / Suffix of atomic-write temp files; never reported by watches.
const TEMP_SUFFIX: &str = ".workbench-tmp";

/// 將本機資料夾映射為沙箱工作目錄。 / Maps a real directory onto the virtual work dir.
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    root: PathBuf,
    work_dir: String,
}

impl LocalSandbox {
    /// `root` must exist; it is canonicalized so watch events resolve against it.
    pub fn new(root: impl AsRef<Path>, work_dir: impl Into<String>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root).map_err(|source| SandboxError::io(root.display().to_string(), source))?;
        let work_dir = work_dir.into();
        Ok(Self {
            root,
            work_dir: path::normalize(&work_dir).to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, rel: &str) -> Result<(String, PathBuf), SandboxError> {
        let rel = clean_relative(rel)?;
        let mut full = self.root.clone();
        for segment in rel.split('/').filter(|segment| !segment.is_empty()) {
            full.push(segment);
        }
        Ok((rel, full))
    }
}

/// Writes data atomically via a temporary sibling followed by rename.
/// 以臨時檔案搭配 rename 實現原子寫入。
async fn write_atomic(target: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(TEMP_SUFFIX);
    let tmp_path = target.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, data).await?;
    if let Err(err) = tokio::fs::rename(&tmp_path, target).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    Ok(())
}

fn is_temp(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(TEMP_SUFFIX))
}

fn relative_string(root: &Path, full: &Path) -> Option<String> {
    let rest = full.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in rest.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_str()?),
            _ => return None,
        }
    }
    Some(segments.join("/"))
}

/// 追蹤已知路徑，將 notify 事件轉換為沙箱事件。 / Translates notify events into sandbox events.
///
/// Remembers which paths are known and whether they are folders, so that
/// ambiguous removals resolve to the right kind and re-creations of a known
/// file are reported as changes.
struct Tracker {
    root: PathBuf,
    work_dir: String,
    filter: CompiledFilter,
    known: Mutex<HashMap<PathBuf, bool>>,
}

impl Tracker {
    fn known(&self) -> MutexGuard<'_, HashMap<PathBuf, bool>> {
        self.known.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn virtual_path(&self, full: &Path) -> Option<String> {
        if is_temp(full) {
            return None;
        }
        let rel = relative_string(&self.root, full)?;
        if rel.is_empty() {
            return None;
        }
        let virtual_path = path::join(&self.work_dir, &rel);
        self.filter.matches(&virtual_path).then_some(virtual_path)
    }

    fn file_event(&self, kind: WatchEventKind, full: &Path, virtual_path: String) -> Option<PathWatcherEvent> {
        let event = PathWatcherEvent::new(kind, virtual_path);
        if !self.filter.include_content() {
            return Some(event);
        }
        match std::fs::read(full) {
            Ok(bytes) => Some(event.with_buffer(bytes)),
            Err(err) => {
                tracing::debug!(path = %full.display(), error = %err, "file vanished before it could be read");
                None
            }
        }
    }

    /// 掃描子樹，回報尚未知道的項目。 / Walks a subtree and reports entries not yet known.
    fn scan(&self, from: &Path) -> WatchBatch {
        let mut batch = Vec::new();
        let walker = WalkDir::new(from)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || self.virtual_path(entry.path()).is_some());
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry during scan");
                    continue;
                }
            };
            let full = entry.path();
            let Some(virtual_path) = self.virtual_path(full) else {
                continue;
            };
            let is_dir = entry.file_type().is_dir();
            if self.known().insert(full.to_path_buf(), is_dir).is_some() {
                continue;
            }
            if is_dir {
                batch.push(PathWatcherEvent::new(WatchEventKind::AddDir, virtual_path));
            } else if let Some(event) = self.file_event(WatchEventKind::AddFile, full, virtual_path) {
                batch.push(event);
            }
        }
        batch
    }

    fn appeared(&self, full: &Path, batch: &mut WatchBatch) {
        let Some(virtual_path) = self.virtual_path(full) else {
            return;
        };
        let Ok(metadata) = std::fs::metadata(full) else {
            return;
        };
        if metadata.is_dir() {
            let previously = self.known().insert(full.to_path_buf(), true);
            if previously != Some(true) {
                batch.push(PathWatcherEvent::new(WatchEventKind::AddDir, virtual_path));
            }
            batch.extend(self.scan(full));
            return;
        }
        let previously = self.known().insert(full.to_path_buf(), false);
        let kind = if previously == Some(false) {
            WatchEventKind::Change
        } else {
            WatchEventKind::AddFile
        };
        if let Some(event) = self.file_event(kind, full, virtual_path) {
            batch.push(event);
        }
    }

    fn vanished(&self, full: &Path, batch: &mut WatchBatch) {
        let Some(virtual_path) = self.virtual_path(full) else {
            return;
        };
        let mut known = self.known();
        let Some(is_dir) = known.remove(full) else {
            return;
        };
        if !is_dir {
            batch.push(PathWatcherEvent::new(WatchEventKind::RemoveFile, virtual_path));
            return;
        }
        let mut children: Vec<(PathBuf, bool)> = known
            .iter()
            .filter(|(candidate, _)| candidate.starts_with(full))
            .map(|(candidate, is_dir)| (candidate.clone(), *is_dir))
            .collect();
        children.sort_by(|a, b| b.0.cmp(&a.0));
        for (child, child_is_dir) in children {
            known.remove(&child);
            let Some(child_path) = self.virtual_path(&child) else {
                continue;
            };
            let kind = if child_is_dir {
                WatchEventKind::RemoveDir
            } else {
                WatchEventKind::RemoveFile
            };
            batch.push(PathWatcherEvent::new(kind, child_path));
        }
        batch.push(PathWatcherEvent::new(WatchEventKind::RemoveDir, virtual_path));
    }

    fn translate(&self, event: notify::Event) -> WatchBatch {
        let mut batch = Vec::new();
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for full in &event.paths {
                    self.appeared(full, &mut batch);
                }
            }
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for full in &event.paths {
                    self.vanished(full, &mut batch);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
                self.vanished(&event.paths[0], &mut batch);
                self.appeared(&event.paths[1], &mut batch);
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for full in &event.paths {
                    if full.exists() {
                        self.appeared(full, &mut batch);
                    } else {
                        self.vanished(full, &mut batch);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Modify(_) => {
                for full in &event.paths {
                    if !full.is_dir() {
                        self.appeared(full, &mut batch);
                    }
                }
            }
            _ => {}
        }
        batch
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn work_dir(&self) -> &str {
        &self.work_dir
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let (rel, full) = self.resolve(path)?;
        if tokio::fs::metadata(&full)
            .await
            .map_err(|source| SandboxError::io(rel.clone(), source))?
            .is_dir()
        {
            return Err(SandboxError::IsDirectory(rel));
        }
        tokio::fs::read(&full)
            .await
            .map_err(|source| SandboxError::io(rel, source))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), SandboxError> {
        let (rel, full) = self.resolve(path)?;
        if rel.is_empty() {
            return Err(SandboxError::IsDirectory(rel));
        }
        if let Some(parent) = full.parent() {
            match tokio::fs::metadata(parent).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(SandboxError::NotDirectory(rel)),
                Err(source) => return Err(SandboxError::io(rel, source)),
            }
        }
        if tokio::fs::metadata(&full).await.is_ok_and(|meta| meta.is_dir()) {
            return Err(SandboxError::IsDirectory(rel));
        }
        write_atomic(&full, data)
            .await
            .map_err(|source| SandboxError::io(rel, source))
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), SandboxError> {
        let (rel, full) = self.resolve(path)?;
        let result = if recursive {
            tokio::fs::create_dir_all(&full).await
        } else {
            tokio::fs::create_dir(&full).await
        };
        result.map_err(|source| SandboxError::io(rel, source))
    }

    async fn read_dir(&self, path: &str, options: ReadDirOptions) -> Result<Vec<DirEntry>, SandboxError> {
        let (rel, full) = self.resolve(path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|source| SandboxError::io(rel.clone(), source))?;
        if !meta.is_dir() {
            return Err(SandboxError::NotDirectory(rel));
        }
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut walker = WalkDir::new(&full).min_depth(1).sort_by_file_name();
            if !options.recursive {
                walker = walker.max_depth(1);
            }
            let mut entries = Vec::new();
            for entry in walker {
                let entry = entry.map_err(|err| {
                    let path = err
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| rel.clone());
                    SandboxError::io(path, std::io::Error::from(err))
                })?;
                if is_temp(entry.path()) {
                    continue;
                }
                if let Some(path) = relative_string(&root, entry.path()) {
                    entries.push(DirEntry {
                        path,
                        is_dir: entry.file_type().is_dir(),
                    });
                }
            }
            entries.sort();
            Ok(entries)
        })
        .await
        .map_err(|err| SandboxError::Task(err.to_string()))?
    }

    async fn exec(&self, command: ExecCommand) -> Result<ExecOutput, SandboxError> {
        let (_, cwd) = self.resolve(command.working_dir.as_deref().unwrap_or(""))?;
        tracing::debug!(command = %command.display(), cwd = %cwd.display(), "executing command");
        ProcessExecutor::execute(&command, &cwd).await
    }

    async fn watch_paths(&self, filter: WatchFilter) -> Result<WatchSubscription, SandboxError> {
        let tracker = Arc::new(Tracker {
            root: self.root.clone(),
            work_dir: self.work_dir.clone(),
            filter: filter.compile()?,
            known: Mutex::new(HashMap::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();

        let scanner = Arc::clone(&tracker);
        let initial = tokio::task::spawn_blocking(move || scanner.scan(&scanner.root))
            .await
            .map_err(|err| SandboxError::Task(err.to_string()))?;
        tracing::debug!(entries = initial.len(), root = %self.root.display(), "initial scan complete");
        if !initial.is_empty() {
            let _ = tx.send(initial);
        }

        let handler = Arc::clone(&tracker);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let batch = handler.translate(event);
                    if !batch.is_empty() {
                        let _ = tx.send(batch);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "watch backend reported an error"),
            },
            Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        Ok(WatchSubscription::new(rx).with_guard(watcher))
    }
}
