//! Canonical project state for the workbench: the file map mirrored from the
//! sandbox, the watcher feeding it, and the coordinator that keeps editor
//! buffers and the unsaved set consistent with it.
//! 工作台的專案狀態：沙箱鏡像的檔案對照表、監看器與文件協調器。

pub mod documents;
pub mod store;
pub mod watcher;

pub use documents::{DocumentCoordinator, UnsavedSet};
pub use store::{ProjectStore, StoreError, StoreOptions};
pub use watcher::{BatchSummary, ProjectWatcher, DEFAULT_COALESCE_WINDOW};
