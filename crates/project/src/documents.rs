use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use workbench_core::{DocumentCache, EditorDocument, FileMap, FileModifications, Observable, ScrollPosition};

use crate::store::{ProjectStore, StoreError};

/// Paths whose editor buffer differs from the store's current content.
pub type UnsavedSet = BTreeSet<String>;

/// Mediates between editor buffers and the project store; the only writer of
/// the unsaved set.
/// 協調編輯緩衝與專案儲存區，並且是未儲存集合的唯一寫入者。
///
/// Buffer writes and the unsaved decision that goes with them happen under one
/// coordinator lock, so a resync arriving from the watcher thread sees either
/// the edit together with its unsaved flag or neither.
#[derive(Debug)]
pub struct DocumentCoordinator {
    store: Arc<ProjectStore>,
    cache: Arc<DocumentCache>,
    unsaved: Observable<UnsavedSet>,
    sync: Mutex<()>,
}

impl DocumentCoordinator {
    pub fn new(store: Arc<ProjectStore>, cache: Arc<DocumentCache>) -> Self {
        Self {
            store,
            cache,
            unsaved: Observable::default(),
            sync: Mutex::new(()),
        }
    }

    fn sync(&self) -> MutexGuard<'_, ()> {
        self.sync.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn store(&self) -> &Arc<ProjectStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    pub fn unsaved(&self) -> &Observable<UnsavedSet> {
        &self.unsaved
    }

    pub fn is_unsaved(&self, path: &str) -> bool {
        self.unsaved.get().contains(path)
    }

    /// Reconciles buffers with a new file map snapshot.
    /// 以新的檔案對照表同步緩衝區。
    pub fn set_documents(&self, files: &FileMap) {
        let _sync = self.sync();
        let unsaved = self.unsaved.get();
        self.cache.set_documents(files, |path| unsaved.contains(path));

        let documents = self.cache.snapshot();
        self.unsaved.update_if(|set| {
            let before = set.len();
            set.retain(|path| match (documents.get(path), files.file(path)) {
                (Some(document), Some(file)) => document.value != file.content(),
                (Some(_), None) => true,
                (None, _) => false,
            });
            set.len() != before
        });

        if self.cache.selected_file().is_none() && self.store.files_count() > 0 {
            if let Some((first, _)) = files.files().next() {
                tracing::debug!(path = first, "selecting first file");
                self.cache.set_selected_file(Some(first));
            }
        }
    }

    /// Edits the selected buffer and recomputes its unsaved flag.
    /// 更新目前文件的內容並重新判斷是否未儲存。
    pub fn set_current_document_content(&self, new_content: &str) {
        let _sync = self.sync();
        let Some(path) = self.cache.selected_file() else {
            return;
        };
        if self.cache.document(&path).is_none() {
            return;
        }
        let current = self.store.get_file(&path);
        let unsaved = current.is_some_and(|file| file.content() != new_content);

        self.cache.update_file(&path, new_content);
        self.unsaved.update_if(|set| {
            if unsaved {
                set.insert(path.clone())
            } else {
                set.remove(&path)
            }
        });
    }

    pub fn set_current_document_scroll_position(&self, position: ScrollPosition) {
        if let Some(path) = self.cache.selected_file() {
            self.cache.update_scroll_position(&path, position);
        }
    }

    /// Selects `path`, opening a buffer when it is a live file without one.
    pub fn set_selected_file(&self, path: Option<&str>) {
        let _sync = self.sync();
        if let Some(path) = path {
            if let Some(file) = self.store.get_file(path) {
                self.cache.ensure_document(path, file.content(), file.is_binary());
            }
        }
        self.cache.set_selected_file(path);
    }

    pub fn current_document(&self) -> Option<EditorDocument> {
        self.cache.current_document()
    }

    /// Saves the buffer for `path`; a path without a buffer is a no-op.
    /// 儲存指定路徑的緩衝內容。
    pub async fn save_file(&self, path: &str) -> Result<(), StoreError> {
        let Some(document) = self.cache.document(path) else {
            return Ok(());
        };
        self.store.save_file(path, &document.value).await?;

        let _sync = self.sync();
        // An edit made while the write was in flight stays unsaved.
        let edited_since = match (self.cache.document(path), self.store.get_file(path)) {
            (Some(current), Some(file)) => current.value != file.content(),
            _ => false,
        };
        if !edited_since {
            self.unsaved.update_if(|set| set.remove(path));
        }
        Ok(())
    }

    pub async fn save_current_document(&self) -> Result<(), StoreError> {
        match self.cache.selected_file() {
            Some(path) => self.save_file(&path).await,
            None => Ok(()),
        }
    }

    /// Saves every unsaved buffer, stopping at the first failure.
    pub async fn save_all_files(&self) -> Result<(), StoreError> {
        let pending = self.unsaved.get();
        for path in pending.iter() {
            self.save_file(path).await?;
        }
        Ok(())
    }

    /// Discards edits to the selected buffer.
    /// 捨棄目前文件的修改。
    pub fn reset_current_document(&self) {
        let Some(path) = self.cache.selected_file() else {
            return;
        };
        if let Some(file) = self.store.get_file(&path) {
            self.set_current_document_content(file.content());
        }
    }

    pub fn get_file_modifications(&self) -> FileModifications {
        self.store.get_file_modifications()
    }

    pub fn reset_all_file_modifications(&self) {
        self.store.reset_file_modifications();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use workbench_sandbox::{MemorySandbox, PathWatcherEvent, WatchEventKind};

    const WORK_DIR: &str = "/home/workspace";
    const A: &str = "/home/workspace/a.txt";
    const B: &str = "/home/workspace/b.txt";

    struct Fixture {
        sandbox: Arc<MemorySandbox>,
        coordinator: DocumentCoordinator,
    }

    impl Fixture {
        fn new(files: &[(&str, &str)]) -> Self {
            let sandbox = Arc::new(MemorySandbox::new(WORK_DIR));
            let store = Arc::new(ProjectStore::new(
                Arc::<MemorySandbox>::clone(&sandbox),
                StoreOptions::for_work_dir(WORK_DIR),
            ));
            let events: Vec<_> = files
                .iter()
                .map(|(path, content)| {
                    let rel = path.trim_start_matches("/home/workspace/");
                    sandbox.put_file(rel, *content).unwrap();
                    PathWatcherEvent::new(WatchEventKind::AddFile, *path).with_buffer(content.as_bytes().to_vec())
                })
                .collect();
            store.watcher().apply_batch(&events);
            let coordinator = DocumentCoordinator::new(store, Arc::new(DocumentCache::new()));
            coordinator.set_documents(&coordinator.store().files().get());
            Self { sandbox, coordinator }
        }

        fn sync(&self) {
            self.coordinator.set_documents(&self.coordinator.store().files().get());
        }

        fn assert_unsaved_matches_buffers(&self) {
            let files = self.coordinator.store().files().get();
            for (path, document) in self.coordinator.cache().snapshot().iter() {
                let differs = files.file(path).is_some_and(|file| file.content() != document.value);
                assert_eq!(self.coordinator.is_unsaved(path), differs, "unsaved flag for {path}");
            }
        }
    }

    #[test]
    fn first_file_is_selected_by_default() {
        let fixture = Fixture::new(&[(B, "b"), (A, "a")]);
        assert_eq!(fixture.coordinator.cache().selected_file().as_deref(), Some(A));
    }

    #[test]
    fn unsaved_tracks_buffer_differences() {
        let fixture = Fixture::new(&[(A, "hello")]);
        let coordinator = &fixture.coordinator;

        for content in ["hello!", "hello", "", "hello", "other"] {
            coordinator.set_current_document_content(content);
            fixture.assert_unsaved_matches_buffers();
        }
        assert!(coordinator.is_unsaved(A));
    }

    #[test]
    fn content_edit_without_selection_is_ignored() {
        let fixture = Fixture::new(&[]);
        fixture.coordinator.set_current_document_content("x");
        assert!(fixture.coordinator.unsaved().get().is_empty());
    }

    #[tokio::test]
    async fn save_then_reset_keeps_saved_content() {
        let fixture = Fixture::new(&[(A, "orig")]);
        let coordinator = &fixture.coordinator;

        coordinator.set_current_document_content("X");
        coordinator.save_current_document().await.unwrap();
        fixture.sync();
        coordinator.reset_current_document();

        assert_eq!(coordinator.current_document().unwrap().value, "X");
        assert!(!coordinator.is_unsaved(A));
        assert_eq!(fixture.sandbox.file("a.txt").unwrap(), b"X");
    }

    #[test]
    fn reset_discards_edits() {
        let fixture = Fixture::new(&[(A, "orig")]);
        fixture.coordinator.set_current_document_content("draft");
        fixture.coordinator.reset_current_document();
        assert_eq!(fixture.coordinator.current_document().unwrap().value, "orig");
        assert!(!fixture.coordinator.is_unsaved(A));
    }

    #[test]
    fn external_change_matching_the_buffer_clears_unsaved() {
        let fixture = Fixture::new(&[(A, "orig")]);
        fixture.coordinator.set_current_document_content("draft");
        fixture.coordinator.store().watcher().apply_batch(&[
            PathWatcherEvent::new(WatchEventKind::Change, A).with_buffer(b"draft".to_vec()),
        ]);
        fixture.sync();
        assert!(!fixture.coordinator.is_unsaved(A));
    }

    #[test]
    fn dirty_buffers_survive_external_changes() {
        let fixture = Fixture::new(&[(A, "orig")]);
        fixture.coordinator.set_current_document_content("draft");
        fixture.coordinator.store().watcher().apply_batch(&[
            PathWatcherEvent::new(WatchEventKind::Change, A).with_buffer(b"external".to_vec()),
        ]);
        fixture.sync();
        assert_eq!(fixture.coordinator.current_document().unwrap().value, "draft");
        assert!(fixture.coordinator.is_unsaved(A));
    }

    #[test]
    fn user_edits_survive_concurrent_resyncs() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let fixture = Fixture::new(&[(A, "orig")]);
        let coordinator = &fixture.coordinator;
        let stop = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut round = 0u64;
                while !stop.load(Ordering::SeqCst) {
                    round += 1;
                    let external = format!("ext{round}");
                    coordinator.store().watcher().apply_batch(&[
                        PathWatcherEvent::new(WatchEventKind::Change, A).with_buffer(external.into_bytes()),
                    ]);
                    coordinator.set_documents(&coordinator.store().files().get());
                }
            });

            let mut lost = 0;
            for i in 0..5_000 {
                coordinator.reset_current_document();
                let edit = format!("user{i}");
                coordinator.set_current_document_content(&edit);
                if coordinator.current_document().map(|document| document.value) != Some(edit) {
                    lost += 1;
                }
            }
            stop.store(true, Ordering::SeqCst);
            assert_eq!(lost, 0, "resync overwrote unsaved edits / 同步覆寫了未儲存的編輯");
        });

        assert!(coordinator.is_unsaved(A));
    }

    #[test]
    fn removed_files_leave_the_unsaved_set() {
        let fixture = Fixture::new(&[(A, "orig")]);
        fixture.coordinator.set_current_document_content("draft");
        fixture
            .coordinator
            .store()
            .watcher()
            .apply_batch(&[PathWatcherEvent::new(WatchEventKind::RemoveFile, A)]);
        fixture.sync();
        assert!(!fixture.coordinator.is_unsaved(A));
        assert!(fixture.coordinator.cache().document(A).is_none());
    }

    #[tokio::test]
    async fn save_all_stops_at_first_failure() {
        let fixture = Fixture::new(&[(A, "a"), (B, "b")]);
        let coordinator = &fixture.coordinator;
        coordinator.set_current_document_content("a2");
        coordinator.set_selected_file(Some(B));
        coordinator.set_current_document_content("b2");
        fixture.sandbox.fail_writes_to("a.txt");

        let err = coordinator.save_all_files().await.unwrap_err();

        assert!(matches!(err, StoreError::Sandbox(_)));
        assert!(coordinator.is_unsaved(A));
        assert!(coordinator.is_unsaved(B));

        fixture.sandbox.clear_write_failures();
        coordinator.save_all_files().await.unwrap();
        assert!(coordinator.unsaved().get().is_empty());
        assert_eq!(fixture.sandbox.file("b.txt").unwrap(), b"b2");
    }

    #[tokio::test]
    async fn saving_without_a_buffer_is_a_noop() {
        let fixture = Fixture::new(&[]);
        fixture.coordinator.save_file(A).await.unwrap();
        assert!(fixture.sandbox.file("a.txt").is_none());
    }

    #[test]
    fn scroll_position_follows_selection() {
        let fixture = Fixture::new(&[(A, "a")]);
        fixture
            .coordinator
            .set_current_document_scroll_position(ScrollPosition::new(10.0, 2.0));
        assert_eq!(
            fixture.coordinator.current_document().unwrap().scroll,
            ScrollPosition::new(10.0, 2.0)
        );
    }
}
