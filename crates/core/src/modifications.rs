use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::file_map::FileMap;

/// 傳給 AI 的修改區塊標籤名稱。 / Tag wrapping rendered modifications in the outgoing AI context.
pub const MODIFICATIONS_TAG_NAME: &str = "file_modifications";

const DIFF_CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationKind {
    /// 相對於基準的統一差異。 / Unified diff against the baseline.
    Diff,
    /// 整檔取代。 / Full replacement content.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileModification {
    #[serde(rename = "type")]
    pub kind: ModificationKind,
    pub content: String,
}

pub type FileModifications = BTreeMap<String, FileModification>;

/// 可替換的差異計算函式。 / Pluggable diff collaborator: current map × baselines → modifications.
pub type DiffFn = fn(&FileMap, &BTreeMap<String, String>) -> FileModifications;

/// 記錄每個路徑第一次寫入前的內容。 / Remembers each path's content as of its first write in a session.
#[derive(Debug, Clone)]
pub struct ModificationTracker {
    baselines: BTreeMap<String, String>,
    diff: DiffFn,
}

impl Default for ModificationTracker {
    fn default() -> Self {
        Self::with_diff(compute_file_modifications)
    }
}

impl ModificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_diff(diff: DiffFn) -> Self {
        Self {
            baselines: BTreeMap::new(),
            diff,
        }
    }

    /// 第一次記錄者優先，之後的呼叫不覆寫。 / First capture wins; later calls for the same path are ignored.
    pub fn track(&mut self, path: &str, original: &str) -> bool {
        if self.baselines.contains_key(path) {
            return false;
        }
        self.baselines.insert(path.to_string(), original.to_string());
        true
    }

    pub fn baseline(&self, path: &str) -> Option<&str> {
        self.baselines.get(path).map(String::as_str)
    }

    pub fn tracked_paths(&self) -> impl Iterator<Item = &str> {
        self.baselines.keys().map(String::as_str)
    }

    pub fn modifications(&self, files: &FileMap) -> FileModifications {
        (self.diff)(files, &self.baselines)
    }

    pub fn reset(&mut self) {
        self.baselines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }
}

/// 預設的差異計算：以行為單位產生統一差異。 / Default diff collaborator producing line-based unified diffs.
///
/// Binary files always produce a full-file modification. Unchanged files are
/// omitted. When the diff would be longer than the file itself the full
/// content is sent instead.
pub fn compute_file_modifications(
    files: &FileMap,
    baselines: &BTreeMap<String, String>,
) -> FileModifications {
    let mut modifications = FileModifications::new();
    for (path, original) in baselines {
        let Some(file) = files.file(path) else {
            continue;
        };

        if file.is_binary() {
            modifications.insert(
                path.clone(),
                FileModification {
                    kind: ModificationKind::File,
                    content: file.content().to_string(),
                },
            );
            continue;
        }

        let Some(diff) = unified_diff(original, file.content()) else {
            continue;
        };

        let modification = if diff.len() > file.content().len() {
            FileModification {
                kind: ModificationKind::File,
                content: file.content().to_string(),
            }
        } else {
            FileModification {
                kind: ModificationKind::Diff,
                content: diff,
            }
        };
        modifications.insert(path.clone(), modification);
    }
    modifications
}

/// 相同內容回傳 `None`。 / Hunks-only unified diff, `None` when both sides are equal.
pub fn unified_diff(old: &str, new: &str) -> Option<String> {
    if old == new {
        return None;
    }
    let diff = TextDiff::from_lines(old, new);
    let rendered = diff
        .unified_diff()
        .context_radius(DIFF_CONTEXT_LINES)
        .to_string();
    if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    }
}

/// 將修改集合轉成送給模型的文字區塊。 / Renders modifications as the block prepended to the next user message.
pub fn render_modifications(modifications: &FileModifications) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<{MODIFICATIONS_TAG_NAME}>");
    for (path, modification) in modifications {
        let tag = match modification.kind {
            ModificationKind::Diff => "diff",
            ModificationKind::File => "file",
        };
        let _ = writeln!(out, "<{tag} path=\"{path}\">");
        out.push_str(&modification.content);
        if !modification.content.ends_with('\n') {
            out.push('\n');
        }
        let _ = writeln!(out, "</{tag}>");
    }
    let _ = write!(out, "</{MODIFICATIONS_TAG_NAME}>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_map::{Dirent, FileEntry};

    fn map_with(path: &str, entry: FileEntry) -> FileMap {
        let mut files = FileMap::new();
        files.set(path, Dirent::File(entry));
        files
    }

    #[test]
    fn first_capture_wins() {
        let mut tracker = ModificationTracker::new();
        assert!(tracker.track("/w/p", "orig"));
        assert!(!tracker.track("/w/p", "other"));
        assert_eq!(tracker.baseline("/w/p"), Some("orig"));
    }

    #[test]
    fn reset_clears_baselines() {
        let mut tracker = ModificationTracker::new();
        tracker.track("/w/p", "orig");
        tracker.reset();
        assert!(tracker.is_empty());
        assert!(tracker.track("/w/p", "again"));
        assert_eq!(tracker.baseline("/w/p"), Some("again"));
    }

    #[test]
    fn unchanged_files_are_omitted() {
        let mut tracker = ModificationTracker::new();
        tracker.track("/w/a.txt", "same\n");
        let files = map_with("/w/a.txt", FileEntry::text("same\n"));
        assert!(tracker.modifications(&files).is_empty());
    }

    #[test]
    fn small_edit_in_large_file_is_a_diff() {
        let original: String = (0..50).map(|i| format!("line {i}\n")).collect();
        let updated = original.replace("line 25\n", "line twenty-five\n");
        let mut tracker = ModificationTracker::new();
        tracker.track("/w/big.txt", &original);

        let mods = tracker.modifications(&map_with("/w/big.txt", FileEntry::text(updated)));
        let modification = &mods["/w/big.txt"];
        assert_eq!(modification.kind, ModificationKind::Diff);
        assert!(modification.content.contains("-line 25"));
        assert!(modification.content.contains("+line twenty-five"));
    }

    #[test]
    fn diff_longer_than_content_sends_full_file() {
        let mut tracker = ModificationTracker::new();
        tracker.track("/w/a.txt", "hi");
        let mods = tracker.modifications(&map_with("/w/a.txt", FileEntry::text("bye")));
        assert_eq!(
            mods["/w/a.txt"],
            FileModification {
                kind: ModificationKind::File,
                content: "bye".into(),
            }
        );
    }

    #[test]
    fn binary_files_always_send_full_file() {
        let mut tracker = ModificationTracker::new();
        tracker.track("/w/logo.png", "");
        let mods = tracker.modifications(&map_with("/w/logo.png", FileEntry::binary()));
        assert_eq!(mods["/w/logo.png"].kind, ModificationKind::File);
    }

    #[test]
    fn removed_files_are_skipped() {
        let mut tracker = ModificationTracker::new();
        tracker.track("/w/a.txt", "hi");
        let mut files = FileMap::new();
        files.tombstone("/w/a.txt");
        assert!(tracker.modifications(&files).is_empty());
    }

    #[test]
    fn custom_diff_collaborator_is_used() {
        fn everything_changed(
            files: &FileMap,
            baselines: &BTreeMap<String, String>,
        ) -> FileModifications {
            baselines
                .keys()
                .filter_map(|path| {
                    files.file(path).map(|file| {
                        (
                            path.clone(),
                            FileModification {
                                kind: ModificationKind::File,
                                content: file.content().to_string(),
                            },
                        )
                    })
                })
                .collect()
        }

        let mut tracker = ModificationTracker::with_diff(everything_changed);
        tracker.track("/w/a.txt", "same");
        let mods = tracker.modifications(&map_with("/w/a.txt", FileEntry::text("same")));
        assert_eq!(mods.len(), 1);
    }

    #[test]
    fn render_wraps_entries_in_tag() {
        let mut mods = FileModifications::new();
        mods.insert(
            "/w/a.txt".into(),
            FileModification {
                kind: ModificationKind::File,
                content: "bye".into(),
            },
        );
        let rendered = render_modifications(&mods);
        assert_eq!(
            rendered,
            "<file_modifications>\n<file path=\"/w/a.txt\">\nbye\n</file>\n</file_modifications>"
        );
    }
}
