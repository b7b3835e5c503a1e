use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::content::Classified;
use crate::path;

/// 檔案項目；二進位檔案的內容必為空字串。 / A file entry; binary files always carry empty content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    content: String,
    is_binary: bool,
}

impl FileEntry {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_binary: false,
        }
    }

    pub fn binary() -> Self {
        Self {
            content: String::new(),
            is_binary: true,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_binary(&self) -> bool {
        self.is_binary
    }
}

impl From<Classified> for FileEntry {
    fn from(value: Classified) -> Self {
        if value.is_binary {
            Self::binary()
        } else {
            Self::text(value.content)
        }
    }
}

/// 檔案系統項目。 / A filesystem entry: a file with content or a folder without payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Dirent {
    File(FileEntry),
    Folder,
}

impl Dirent {
    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Dirent::File(file) => Some(file),
            Dirent::Folder => None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Dirent::File(_))
    }
}

/// 查詢路徑時的狀態。 / Lookup state of a path, distinguishing "removed" from "never seen".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState<'a> {
    Unknown,
    Removed,
    Present(&'a Dirent),
}

/// 標準檔案對照表；`None` 代表墓碑。 / The canonical path → entry map, where `None` is a tombstone.
///
/// Keys are never dropped once observed: removals write a tombstone so readers
/// can tell a deleted path apart from one that never existed. Iteration is in
/// ascending path order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMap {
    entries: BTreeMap<String, Option<Dirent>>,
}

impl FileMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, path: &str) -> EntryState<'_> {
        match self.entries.get(path) {
            None => EntryState::Unknown,
            Some(None) => EntryState::Removed,
            Some(Some(dirent)) => EntryState::Present(dirent),
        }
    }

    /// 取得仍存在的項目。 / Returns the live entry at `path`, if any.
    pub fn get(&self, path: &str) -> Option<&Dirent> {
        self.entries.get(path).and_then(Option::as_ref)
    }

    /// 只在項目為檔案時回傳。 / Returns the entry only when it is a file.
    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.get(path).and_then(Dirent::as_file)
    }

    pub fn contains_live(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn is_tombstoned(&self, path: &str) -> bool {
        matches!(self.entries.get(path), Some(None))
    }

    pub fn set(&mut self, path: impl Into<String>, dirent: Dirent) {
        self.entries.insert(path.into(), Some(dirent));
    }

    pub fn tombstone(&mut self, path: impl Into<String>) {
        self.entries.insert(path.into(), None);
    }

    /// 將資料夾與其下所有路徑標記為已移除。 / Tombstones a folder and every known path below it.
    pub fn tombstone_tree(&mut self, dir: &str) -> usize {
        let mut removed = 0;
        for (key, entry) in self.entries.iter_mut() {
            if path::is_strictly_under(dir, key) && entry.is_some() {
                *entry = None;
                removed += 1;
            }
        }
        self.tombstone(dir);
        removed
    }

    /// 依路徑順序列出所有項目（含墓碑）。 / Iterates every key in path order, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Dirent>)> {
        self.entries
            .iter()
            .map(|(path, entry)| (path.as_str(), entry.as_ref()))
    }

    /// 依路徑順序列出存在的檔案。 / Iterates live files in path order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.entries.iter().filter_map(|(path, entry)| {
            entry
                .as_ref()
                .and_then(Dirent::as_file)
                .map(|file| (path.as_str(), file))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Dirent)> for FileMap {
    fn from_iter<I: IntoIterator<Item = (String, Dirent)>>(iter: I) -> Self {
        let mut map = FileMap::new();
        for (path, dirent) in iter {
            map.set(path, dirent);
        }
        map
    }
}
