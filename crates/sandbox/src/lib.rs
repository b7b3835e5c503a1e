//! Sandbox collaborators: the filesystem and process surface the workbench
//! mirrors. Paths passed to a [`Sandbox`] are relative to its work dir; paths
//! reported by watch streams are absolute virtual paths under the work dir.

pub mod error;
pub mod event;
pub mod local;
pub mod memory;
pub mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::SandboxError;
pub use event::{
    CompiledFilter, PathWatcherEvent, WatchBatch, WatchEventKind, WatchFilter, WatchSubscription,
};
pub use local::LocalSandbox;
pub use memory::MemorySandbox;
pub use process::{ExecCommand, ExecOutput, ProcessExecutor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadDirOptions {
    pub recursive: bool,
}

/// 目錄列舉結果。 / One entry returned by [`Sandbox::read_dir`], relative to the work dir.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirEntry {
    pub path: String,
    pub is_dir: bool,
}

/// 沙箱介面。 / The sandbox handle shared by the project store and action runners.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// 虛擬工作目錄，例如 `/home/workspace`。 / Absolute virtual work dir.
    fn work_dir(&self) -> &str;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError>;

    /// 覆寫或建立檔案；父目錄必須存在。 / Creates or replaces a file. The parent folder must exist.
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), SandboxError>;

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), SandboxError>;

    async fn read_dir(&self, path: &str, options: ReadDirOptions) -> Result<Vec<DirEntry>, SandboxError>;

    async fn exec(&self, command: ExecCommand) -> Result<ExecOutput, SandboxError>;

    /// 開始遞迴監看；第一批事件為目前內容。 / Starts a recursive watch. The first batch lists existing entries.
    async fn watch_paths(&self, filter: WatchFilter) -> Result<WatchSubscription, SandboxError>;
}

/// 驗證並正規化相對路徑。 / Validates a work-dir relative path and strips redundant separators.
///
/// Absolute paths and `..` segments are rejected; the empty string is the work
/// dir itself.
pub fn clean_relative(path: &str) -> Result<String, SandboxError> {
    if path.starts_with('/') {
        return Err(SandboxError::Escape(path.to_string()));
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(SandboxError::Escape(path.to_string())),
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_relative_collapses_and_rejects() {
        assert_eq!(clean_relative("src//lib/./a.rs").unwrap(), "src/lib/a.rs");
        assert_eq!(clean_relative("").unwrap(), "");
        assert!(matches!(clean_relative("../etc"), Err(SandboxError::Escape(_))));
        assert!(matches!(clean_relative("/etc"), Err(SandboxError::Escape(_))));
    }
}
