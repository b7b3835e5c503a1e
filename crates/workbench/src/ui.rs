use serde::{Deserialize, Serialize};
use workbench_core::Observable;

/// 工作台目前的檢視。 / Which pane the workbench shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkbenchView {
    #[default]
    Code,
    Preview,
}

#[derive(Debug, Default)]
pub struct WorkbenchUi {
    show_workbench: Observable<bool>,
    current_view: Observable<WorkbenchView>,
}

impl WorkbenchUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_workbench(&self) -> &Observable<bool> {
        &self.show_workbench
    }

    pub fn current_view(&self) -> &Observable<WorkbenchView> {
        &self.current_view
    }

    pub fn set_show_workbench(&self, show: bool) -> bool {
        self.show_workbench.update_if(|current| replace_if_changed(current, show))
    }

    pub fn set_current_view(&self, view: WorkbenchView) -> bool {
        self.current_view.update_if(|current| replace_if_changed(current, view))
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, next: T) -> bool {
    if *slot == next {
        return false;
    }
    *slot = next;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn defaults_hide_the_workbench_on_code_view() {
        let ui = WorkbenchUi::new();
        assert!(!*ui.show_workbench().get());
        assert_eq!(*ui.current_view().get(), WorkbenchView::Code);
    }

    #[test]
    fn setting_the_same_value_does_not_notify() {
        let ui = WorkbenchUi::new();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        ui.current_view().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(ui.set_current_view(WorkbenchView::Preview));
        assert!(!ui.set_current_view(WorkbenchView::Preview));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn views_serialize_as_lowercase_names() {
        assert_eq!(serde_json::to_string(&WorkbenchView::Preview).unwrap(), "\"preview\"");
        let parsed: WorkbenchView = serde_json::from_str("\"code\"").unwrap();
        assert_eq!(parsed, WorkbenchView::Code);
    }
}
