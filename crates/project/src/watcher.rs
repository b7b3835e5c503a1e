use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use workbench_core::path;
use workbench_core::{ContentClassifier, Dirent, FileEntry, FileMap, Observable};
use workbench_sandbox::{PathWatcherEvent, WatchBatch, WatchEventKind, WatchSubscription};

/// Default coalescing window applied to incoming watch batches.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Counters describing one applied batch.
/// 單一批次套用後的統計。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub applied: usize,
    pub dropped: usize,
}

/// Applies sandbox change events to the canonical file map.
/// 將沙箱變更事件套用到標準檔案對照表。
#[derive(Debug)]
pub struct ProjectWatcher {
    files: Arc<Observable<FileMap>>,
    classifier: ContentClassifier,
    file_count: AtomicUsize,
}

impl ProjectWatcher {
    pub fn new(files: Arc<Observable<FileMap>>, classifier: ContentClassifier) -> Self {
        Self {
            files,
            classifier,
            file_count: AtomicUsize::new(0),
        }
    }

    /// Running count of `add_file` minus `remove_file` events.
    /// 目前的檔案數量。
    pub fn file_count(&self) -> usize {
        self.file_count.load(Ordering::SeqCst)
    }

    /// Applies one coalesced batch in arrival order and publishes once.
    /// 依序套用一整批事件，並只通知一次。
    pub fn apply_batch(&self, events: &[PathWatcherEvent]) -> BatchSummary {
        let summary = self.files.update(|files| {
            let mut summary = BatchSummary::default();
            for event in events {
                if self.apply_event(files, event) {
                    summary.applied += 1;
                } else {
                    summary.dropped += 1;
                }
            }
            summary
        });
        tracing::debug!(
            applied = summary.applied,
            dropped = summary.dropped,
            file_count = self.file_count(),
            "applied watch batch"
        );
        summary
    }

    fn apply_event(&self, files: &mut FileMap, event: &PathWatcherEvent) -> bool {
        let target = path::normalize(&event.path);
        match event.kind {
            WatchEventKind::AddDir => {
                files.set(target, Dirent::Folder);
            }
            WatchEventKind::RemoveDir => {
                let nested = files.tombstone_tree(target);
                tracing::trace!(path = target, nested, "folder removed");
            }
            WatchEventKind::AddFile => {
                self.file_count.fetch_add(1, Ordering::SeqCst);
                let entry = FileEntry::from(self.classifier.classify(event.buffer.as_deref()));
                files.set(target, Dirent::File(entry));
            }
            WatchEventKind::Change => {
                if !files.contains_live(target) {
                    tracing::debug!(path = target, "dropping change for a path with no live entry");
                    return false;
                }
                let entry = FileEntry::from(self.classifier.classify(event.buffer.as_deref()));
                files.set(target, Dirent::File(entry));
            }
            WatchEventKind::RemoveFile => {
                let _ = self
                    .file_count
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| Some(count.saturating_sub(1)));
                files.tombstone(target);
            }
            WatchEventKind::UpdateDirectory => return false,
        }
        true
    }

    /// Drains a watch stream, coalescing batches that arrive within `window`
    /// of the first buffered one. Returns when the stream closes.
    pub async fn run(self: Arc<Self>, mut subscription: WatchSubscription, window: Duration) {
        while let Some(first) = subscription.next_batch().await {
            let mut buffered: WatchBatch = first;
            let deadline = Instant::now() + window;
            let mut closed = false;
            loop {
                match tokio::time::timeout_at(deadline, subscription.next_batch()).await {
                    Ok(Some(batch)) => buffered.extend(batch),
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }
            self.apply_batch(&buffered);
            if closed {
                break;
            }
        }
        tracing::debug!("watch stream closed");
    }
}
