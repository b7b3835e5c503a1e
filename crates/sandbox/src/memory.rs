use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use workbench_core::path;

use crate::error::SandboxError;
use crate::event::{CompiledFilter, PathWatcherEvent, WatchBatch, WatchEventKind, WatchFilter, WatchSubscription};
use crate::process::{ExecCommand, ExecOutput};
use crate::{clean_relative, DirEntry, ReadDirOptions, Sandbox};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

struct Subscriber {
    filter: CompiledFilter,
    tx: mpsc::UnboundedSender<WatchBatch>,
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    subscribers: Vec<Subscriber>,
    executed: Vec<ExecCommand>,
    responses: VecDeque<ExecOutput>,
    failing_writes: HashSet<String>,
}

/// 記憶體內的沙箱。 / An in-memory sandbox that emits watch events for every mutation.
///
/// Commands are recorded rather than run; each `exec` answers with the next
/// queued [`ExecOutput`] or a successful empty one.
pub struct MemorySandbox {
    work_dir: String,
    inner: Mutex<Inner>,
}

impl MemorySandbox {
    pub fn new(work_dir: impl Into<String>) -> Self {
        let work_dir = work_dir.into();
        Self {
            work_dir: path::normalize(&work_dir).to_string(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn virtual_path(&self, rel: &str) -> String {
        path::join(&self.work_dir, rel)
    }

    /// 模擬外部寫入，必要時建立父目錄。 / Simulates an external write, creating missing parents.
    pub fn put_file(&self, rel: &str, data: impl Into<Vec<u8>>) -> Result<(), SandboxError> {
        let rel = clean_relative(rel)?;
        let mut inner = self.lock();
        let mut events = Vec::new();
        if let Some(parent) = parent_of(&rel) {
            self.create_dirs(&mut inner, parent, &mut events)?;
        }
        events.push(self.store_file(&mut inner, &rel, data.into())?);
        self.emit(&mut inner, events);
        Ok(())
    }

    /// 模擬外部刪除。 / Simulates an external delete of a file or a whole folder.
    pub fn remove(&self, rel: &str) -> Result<(), SandboxError> {
        let rel = clean_relative(rel)?;
        let mut inner = self.lock();
        let is_dir = inner.nodes.get(&rel).map(|node| matches!(node, Node::Dir));
        let events = match is_dir {
            None => return Err(SandboxError::NotFound(rel)),
            Some(false) => {
                inner.nodes.remove(&rel);
                vec![PathWatcherEvent::new(WatchEventKind::RemoveFile, self.virtual_path(&rel))]
            }
            Some(true) => {
                let prefix = format!("{rel}/");
                let doomed: Vec<(String, bool)> = inner
                    .nodes
                    .iter()
                    .filter(|(key, _)| key.starts_with(&prefix))
                    .map(|(key, node)| (key.clone(), matches!(node, Node::Dir)))
                    .collect();
                let mut events = Vec::with_capacity(doomed.len() + 1);
                for (key, is_dir) in doomed.into_iter().rev() {
                    inner.nodes.remove(&key);
                    let kind = if is_dir {
                        WatchEventKind::RemoveDir
                    } else {
                        WatchEventKind::RemoveFile
                    };
                    events.push(PathWatcherEvent::new(kind, self.virtual_path(&key)));
                }
                inner.nodes.remove(&rel);
                events.push(PathWatcherEvent::new(WatchEventKind::RemoveDir, self.virtual_path(&rel)));
                events
            }
        };
        self.emit(&mut inner, events);
        Ok(())
    }

    /// 讓之後對 `rel` 的寫入失敗。 / Makes later writes to `rel` fail with a permission error.
    pub fn fail_writes_to(&self, rel: &str) {
        self.lock().failing_writes.insert(rel.trim_matches('/').to_string());
    }

    pub fn clear_write_failures(&self) {
        self.lock().failing_writes.clear();
    }

    pub fn push_exec_output(&self, output: ExecOutput) {
        self.lock().responses.push_back(output);
    }

    pub fn executed(&self) -> Vec<ExecCommand> {
        self.lock().executed.clone()
    }

    pub fn file(&self, rel: &str) -> Option<Vec<u8>> {
        match self.lock().nodes.get(rel.trim_matches('/')) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, rel: &str) -> bool {
        let rel = rel.trim_matches('/');
        rel.is_empty() || matches!(self.lock().nodes.get(rel), Some(Node::Dir))
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|subscriber| !subscriber.tx.is_closed());
        inner.subscribers.len()
    }

    fn create_dirs(
        &self,
        inner: &mut Inner,
        rel: &str,
        events: &mut Vec<PathWatcherEvent>,
    ) -> Result<(), SandboxError> {
        let mut current = String::new();
        for segment in rel.split('/').filter(|segment| !segment.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            match inner.nodes.get(&current) {
                Some(Node::Dir) => {}
                Some(Node::File(_)) => return Err(SandboxError::NotDirectory(current)),
                None => {
                    inner.nodes.insert(current.clone(), Node::Dir);
                    events.push(PathWatcherEvent::new(WatchEventKind::AddDir, self.virtual_path(&current)));
                }
            }
        }
        Ok(())
    }

    fn store_file(&self, inner: &mut Inner, rel: &str, data: Vec<u8>) -> Result<PathWatcherEvent, SandboxError> {
        let kind = match inner.nodes.get(rel) {
            Some(Node::Dir) => return Err(SandboxError::IsDirectory(rel.to_string())),
            Some(Node::File(_)) => WatchEventKind::Change,
            None => WatchEventKind::AddFile,
        };
        inner.nodes.insert(rel.to_string(), Node::File(data.clone()));
        Ok(PathWatcherEvent::new(kind, self.virtual_path(rel)).with_buffer(data))
    }

    fn emit(&self, inner: &mut Inner, events: Vec<PathWatcherEvent>) {
        if events.is_empty() {
            return;
        }
        inner.subscribers.retain(|subscriber| {
            let batch: WatchBatch = events
                .iter()
                .filter(|event| subscriber.filter.matches(&event.path))
                .map(|event| shape_for(&subscriber.filter, event.clone()))
                .collect();
            if batch.is_empty() {
                return !subscriber.tx.is_closed();
            }
            subscriber.tx.send(batch).is_ok()
        });
    }
}

fn shape_for(filter: &CompiledFilter, mut event: PathWatcherEvent) -> PathWatcherEvent {
    if !filter.include_content() {
        event.buffer = None;
    }
    event
}

fn parent_of(rel: &str) -> Option<&str> {
    rel.rfind('/').map(|idx| &rel[..idx])
}

#[async_trait]
impl Sandbox for MemorySandbox {
    fn work_dir(&self) -> &str {
        &self.work_dir
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let rel = clean_relative(path)?;
        match self.lock().nodes.get(&rel) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(Node::Dir) => Err(SandboxError::IsDirectory(rel)),
            None if rel.is_empty() => Err(SandboxError::IsDirectory(rel)),
            None => Err(SandboxError::NotFound(rel)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), SandboxError> {
        let rel = clean_relative(path)?;
        if rel.is_empty() {
            return Err(SandboxError::IsDirectory(rel));
        }
        let mut inner = self.lock();
        if inner.failing_writes.contains(&rel) {
            return Err(SandboxError::io(
                rel,
                io::Error::new(io::ErrorKind::PermissionDenied, "write rejected"),
            ));
        }
        if let Some(parent) = parent_of(&rel) {
            match inner.nodes.get(parent) {
                Some(Node::Dir) => {}
                Some(Node::File(_)) => return Err(SandboxError::NotDirectory(parent.to_string())),
                None => return Err(SandboxError::NotFound(parent.to_string())),
            }
        }
        let event = self.store_file(&mut inner, &rel, data.to_vec())?;
        self.emit(&mut inner, vec![event]);
        Ok(())
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), SandboxError> {
        let rel = clean_relative(path)?;
        if rel.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        match inner.nodes.get(&rel) {
            Some(Node::File(_)) => return Err(SandboxError::NotDirectory(rel)),
            Some(Node::Dir) if recursive => return Ok(()),
            Some(Node::Dir) => {
                return Err(SandboxError::io(
                    rel,
                    io::Error::new(io::ErrorKind::AlreadyExists, "folder exists"),
                ))
            }
            None => {}
        }
        if !recursive {
            if let Some(parent) = parent_of(&rel) {
                if !matches!(inner.nodes.get(parent), Some(Node::Dir)) {
                    return Err(SandboxError::NotFound(parent.to_string()));
                }
            }
        }
        let mut events = Vec::new();
        self.create_dirs(&mut inner, &rel, &mut events)?;
        self.emit(&mut inner, events);
        Ok(())
    }

    async fn read_dir(&self, path: &str, options: ReadDirOptions) -> Result<Vec<DirEntry>, SandboxError> {
        let rel = clean_relative(path)?;
        let inner = self.lock();
        if !rel.is_empty() {
            match inner.nodes.get(&rel) {
                Some(Node::Dir) => {}
                Some(Node::File(_)) => return Err(SandboxError::NotDirectory(rel)),
                None => return Err(SandboxError::NotFound(rel)),
            }
        }
        let prefix = if rel.is_empty() {
            String::new()
        } else {
            format!("{rel}/")
        };
        Ok(inner
            .nodes
            .iter()
            .filter_map(|(key, node)| {
                let rest = key.strip_prefix(&prefix)?;
                if rest.is_empty() || (!options.recursive && rest.contains('/')) {
                    return None;
                }
                Some(DirEntry {
                    path: key.clone(),
                    is_dir: matches!(node, Node::Dir),
                })
            })
            .collect())
    }

    async fn exec(&self, command: ExecCommand) -> Result<ExecOutput, SandboxError> {
        let mut inner = self.lock();
        tracing::debug!(command = %command.display(), "recording command");
        inner.executed.push(command);
        Ok(inner.responses.pop_front().unwrap_or_else(|| ExecOutput {
            exit_code: Some(0),
            ..ExecOutput::default()
        }))
    }

    async fn watch_paths(&self, filter: WatchFilter) -> Result<WatchSubscription, SandboxError> {
        let compiled = filter.compile()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let initial: WatchBatch = inner
            .nodes
            .iter()
            .map(|(key, node)| match node {
                Node::Dir => PathWatcherEvent::new(WatchEventKind::AddDir, self.virtual_path(key)),
                Node::File(data) => {
                    PathWatcherEvent::new(WatchEventKind::AddFile, self.virtual_path(key)).with_buffer(data.clone())
                }
            })
            .filter(|event| compiled.matches(&event.path))
            .map(|event| shape_for(&compiled, event))
            .collect();
        if !initial.is_empty() {
            let _ = tx.send(initial);
        }
        inner.subscribers.push(Subscriber { filter: compiled, tx });
        Ok(WatchSubscription::new(rx))
    }
}
