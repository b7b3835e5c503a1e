pub mod content;
pub mod document;
pub mod file_map;
pub mod modifications;
pub mod observable;
pub mod path;

pub use content::{Classified, ContentClassifier, DEFAULT_SAMPLE_LEN};
pub use document::{DocumentCache, Documents, EditorDocument, ScrollPosition};
pub use file_map::{Dirent, EntryState, FileEntry, FileMap};
pub use modifications::{
    compute_file_modifications, render_modifications, unified_diff, DiffFn, FileModification,
    FileModifications, ModificationKind, ModificationTracker, MODIFICATIONS_TAG_NAME,
};
pub use observable::{Observable, SubscriptionId};
pub use path::PathError;

/// 沙箱內的預設工作目錄。 / Default work directory inside the sandbox.
pub const WORK_DIR: &str = "/home/workspace";
