use std::io;

use thiserror::Error;
use workbench_core::PathError;

/// 沙箱操作錯誤。 / Errors raised by sandbox implementations.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    InvalidPath(#[from] PathError),
    #[error("ENOENT: no such file or directory, '{0}'")]
    NotFound(String),
    #[error("EISDIR: illegal operation on a directory, '{0}'")]
    IsDirectory(String),
    #[error("ENOTDIR: not a directory, '{0}'")]
    NotDirectory(String),
    #[error("EINVAL: '{0}' escapes the work directory")]
    Escape(String),
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("invalid watch pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("sandbox task failed: {0}")]
    Task(String),
}

impl SandboxError {
    pub(crate) fn io(path: impl Into<String>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return SandboxError::NotFound(path.into());
        }
        SandboxError::Io {
            path: path.into(),
            source,
        }
    }
}
