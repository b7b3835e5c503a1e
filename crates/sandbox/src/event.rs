use std::any::Any;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SandboxError;

/// 監看事件種類。 / Kind of change reported by a sandbox watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    AddDir,
    RemoveDir,
    AddFile,
    Change,
    RemoveFile,
    UpdateDirectory,
}

/// 單一路徑的變更事件。 / One change event; `buffer` carries file bytes when content is included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathWatcherEvent {
    pub kind: WatchEventKind,
    pub path: String,
    pub buffer: Option<Vec<u8>>,
}

impl PathWatcherEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            buffer: None,
        }
    }

    pub fn with_buffer(mut self, buffer: Vec<u8>) -> Self {
        self.buffer = Some(buffer);
        self
    }
}

pub type WatchBatch = Vec<PathWatcherEvent>;

/// 監看的包含與排除樣式。 / Include/exclude glob patterns for a watch stream.
///
/// `**` matches across separators, `*` and `?` stay within one segment.
/// An exclude pattern also hides everything below a matching directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    #[serde(default = "default_include_content")]
    pub include_content: bool,
}

fn default_include_content() -> bool {
    true
}

impl WatchFilter {
    /// 預設的工作目錄監看樣式。 / The default recursive filter for a work dir.
    pub fn for_work_dir(work_dir: &str) -> Self {
        let root = workbench_core::path::normalize(work_dir);
        let include = if root == "/" {
            "/**".to_string()
        } else {
            format!("{root}/**")
        };
        Self {
            include: vec![include],
            exclude: vec!["**/node_modules".into(), "**/.git".into()],
            include_content: true,
        }
    }

    pub fn compile(&self) -> Result<CompiledFilter, SandboxError> {
        Ok(CompiledFilter {
            include: compile_all(&self.include)?,
            exclude: compile_all(&self.exclude)?,
            include_content: self.include_content,
        })
    }
}

/// 已編譯的樣式。 / A filter with its globs compiled to anchored regexes.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    include_content: bool,
}

impl CompiledFilter {
    pub fn include_content(&self) -> bool {
        self.include_content
    }

    pub fn matches(&self, path: &str) -> bool {
        if !self.include.iter().any(|re| re.is_match(path)) {
            return false;
        }
        !ancestors_and_self(path).any(|candidate| self.exclude.iter().any(|re| re.is_match(candidate)))
    }
}

fn ancestors_and_self(path: &str) -> impl Iterator<Item = &str> {
    path.char_indices()
        .filter(|(idx, ch)| *ch == '/' && *idx > 0)
        .map(move |(idx, _)| &path[..idx])
        .chain(std::iter::once(path))
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, SandboxError> {
    patterns.iter().map(|pattern| glob_to_regex(pattern)).collect()
}

fn glob_to_regex(pattern: &str) -> Result<Regex, SandboxError> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // `**/` also matches zero directories.
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|source| SandboxError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// 監看訂閱；丟棄時停止監看。 / A live watch stream. Dropping it stops the watch.
pub struct WatchSubscription {
    rx: mpsc::UnboundedReceiver<WatchBatch>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl WatchSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<WatchBatch>) -> Self {
        Self { rx, _guard: None }
    }

    /// 綁定需與訂閱同生命週期的資源。 / Ties a resource (such as an OS watcher) to this subscription.
    pub fn with_guard(mut self, guard: impl Any + Send) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    /// 等待下一批事件；來源關閉時回傳 `None`。 / Waits for the next batch, `None` once the source is gone.
    pub async fn next_batch(&mut self) -> Option<WatchBatch> {
        self.rx.recv().await
    }

    pub fn try_next_batch(&mut self) -> Option<WatchBatch> {
        self.rx.try_recv().ok()
    }
}

impl std::fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("guarded", &self._guard.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_hides_node_modules_and_git() {
        let filter = WatchFilter::for_work_dir("/home/workspace").compile().unwrap();
        assert!(filter.matches("/home/workspace/src/index.ts"));
        assert!(filter.matches("/home/workspace/package.json"));
        assert!(!filter.matches("/home/workspace"));
        assert!(!filter.matches("/home/workspace/node_modules"));
        assert!(!filter.matches("/home/workspace/node_modules/react/index.js"));
        assert!(!filter.matches("/home/workspace/.git/HEAD"));
        assert!(!filter.matches("/etc/hosts"));
    }

    #[test]
    fn single_star_stays_within_a_segment() {
        let filter = WatchFilter {
            include: vec!["/w/*.txt".into()],
            exclude: vec![],
            include_content: false,
        }
        .compile()
        .unwrap();
        assert!(filter.matches("/w/a.txt"));
        assert!(!filter.matches("/w/sub/a.txt"));
        assert!(!filter.include_content());
    }

    #[test]
    fn double_star_slash_matches_zero_directories() {
        let filter = WatchFilter {
            include: vec!["/w/**/*.rs".into()],
            exclude: vec![],
            include_content: true,
        }
        .compile()
        .unwrap();
        assert!(filter.matches("/w/main.rs"));
        assert!(filter.matches("/w/src/bin/tool.rs"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let filter = WatchFilter {
            include: vec!["/w/a+b.(x)".into()],
            exclude: vec![],
            include_content: true,
        }
        .compile()
        .unwrap();
        assert!(filter.matches("/w/a+b.(x)"));
        assert!(!filter.matches("/w/aab.(x)"));
    }
}
