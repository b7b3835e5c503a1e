use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::file_map::{EntryState, FileMap};
use crate::observable::Observable;

/// 捲動位置。 / Scroll offset of an editor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub top: f64,
    pub left: f64,
}

impl ScrollPosition {
    pub fn new(top: f64, left: f64) -> Self {
        Self { top, left }
    }
}

/// 單一檔案的編輯緩衝。 / The open editor buffer for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorDocument {
    pub file_path: String,
    pub value: String,
    #[serde(default)]
    pub scroll: ScrollPosition,
    #[serde(default)]
    pub is_binary: bool,
}

impl EditorDocument {
    pub fn new(file_path: impl Into<String>, value: impl Into<String>, is_binary: bool) -> Self {
        Self {
            file_path: file_path.into(),
            value: value.into(),
            scroll: ScrollPosition::default(),
            is_binary,
        }
    }
}

pub type Documents = BTreeMap<String, EditorDocument>;

/// 以路徑索引的編輯緩衝與目前選取的路徑。 / Editor buffers keyed by path plus the selected path.
#[derive(Debug, Default)]
pub struct DocumentCache {
    documents: Observable<Documents>,
    selected: Observable<Option<String>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> &Observable<Documents> {
        &self.documents
    }

    pub fn selected(&self) -> &Observable<Option<String>> {
        &self.selected
    }

    pub fn selected_file(&self) -> Option<String> {
        self.selected.get().as_ref().clone()
    }

    pub fn document(&self, path: &str) -> Option<EditorDocument> {
        self.documents.get().get(path).cloned()
    }

    /// 目前選取的文件。 / The buffer for the selected path, if both exist.
    pub fn current_document(&self) -> Option<EditorDocument> {
        let selected = self.selected.get();
        let path = selected.as_deref()?;
        self.document(path)
    }

    /// 與檔案對照表同步緩衝區。 / Reconciles buffers with the file map.
    ///
    /// Live files without a buffer get one. Existing buffers follow the
    /// canonical content unless `is_dirty` reports an in-progress edit, in
    /// which case the buffer is left untouched. Scroll state is kept.
    /// Buffers for tombstoned paths are dropped. Returns the dropped paths.
    pub fn set_documents(&self, files: &FileMap, is_dirty: impl Fn(&str) -> bool) -> Vec<String> {
        let mut dropped = Vec::new();
        self.documents.update_if(|documents| {
            let mut changed = false;
            for (path, file) in files.files() {
                match documents.get_mut(path) {
                    Some(document) => {
                        if is_dirty(path) {
                            continue;
                        }
                        if document.value != file.content() || document.is_binary != file.is_binary() {
                            document.value = file.content().to_string();
                            document.is_binary = file.is_binary();
                            changed = true;
                        }
                    }
                    None => {
                        documents.insert(
                            path.to_string(),
                            EditorDocument::new(path, file.content(), file.is_binary()),
                        );
                        changed = true;
                    }
                }
            }

            documents.retain(|path, _| {
                let keep = !matches!(files.state(path), EntryState::Removed)
                    && !matches!(files.state(path), EntryState::Present(dirent) if !dirent.is_file());
                if !keep {
                    dropped.push(path.clone());
                }
                keep
            });
            changed || !dropped.is_empty()
        });
        dropped
    }

    /// 為尚未開啟的檔案建立緩衝區。 / Opens a buffer for `path` if it has none.
    pub fn ensure_document(&self, path: &str, content: &str, is_binary: bool) {
        self.documents.update_if(|documents| {
            if documents.contains_key(path) {
                return false;
            }
            documents.insert(path.to_string(), EditorDocument::new(path, content, is_binary));
            true
        });
    }

    pub fn update_file(&self, path: &str, value: &str) -> bool {
        self.documents.update_if(|documents| match documents.get_mut(path) {
            Some(document) if document.value != value => {
                document.value = value.to_string();
                true
            }
            _ => false,
        })
    }

    pub fn update_scroll_position(&self, path: &str, position: ScrollPosition) -> bool {
        self.documents.update_if(|documents| match documents.get_mut(path) {
            Some(document) if document.scroll != position => {
                document.scroll = position;
                true
            }
            _ => false,
        })
    }

    pub fn set_selected_file(&self, path: Option<&str>) {
        let next = path.map(str::to_string);
        self.selected.update_if(|selected| {
            if *selected == next {
                return false;
            }
            *selected = next;
            true
        });
    }

    pub fn snapshot(&self) -> Arc<Documents> {
        self.documents.get()
    }
}
