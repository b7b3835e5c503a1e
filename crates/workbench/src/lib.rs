//! The workbench context object: project store, editor buffers, artifacts and
//! UI flags wired together behind one explicitly constructed handle.
//! 工作台情境物件：將專案儲存區、編輯緩衝、成品與介面旗標組合在一起。

pub mod artifacts;
pub mod ui;

use std::sync::{Arc, Weak};

use workbench_core::{
    render_modifications, DocumentCache, Documents, EditorDocument, FileMap, FileModifications,
    Observable, ScrollPosition, SubscriptionId,
};
use workbench_project::{DocumentCoordinator, ProjectStore, StoreError, StoreOptions, UnsavedSet};
use workbench_runexec::{ActionCallbackData, RunnerFactory, SandboxRunnerFactory};
use workbench_sandbox::{Sandbox, WatchFilter};
use workbench_settings::WorkbenchConfig;

pub use artifacts::{
    ArtifactCallbackData, ArtifactError, ArtifactRegistry, ArtifactState, ArtifactUpdate, Artifacts,
    RegistryOutcome,
};
pub use ui::{WorkbenchUi, WorkbenchView};

/// 由設定推導出專案儲存區選項。 / Derives store options from a sanitized config.
pub fn store_options(config: &WorkbenchConfig) -> StoreOptions {
    StoreOptions {
        filter: WatchFilter {
            include: config.watch.include.clone(),
            exclude: config.watch.exclude.clone(),
            include_content: config.watch.include_content,
        },
        coalesce_window: config.watch.coalesce_window(),
        sample_len: config.classifier.sample_len,
    }
}

/// 工作台狀態的唯一入口。 / Single entry point to the workbench state.
///
/// Every file-map publication is forwarded to the document coordinator, so
/// buffers and the unsaved set follow the sandbox without extra calls.
pub struct Workbench {
    config: WorkbenchConfig,
    store: Arc<ProjectStore>,
    coordinator: Arc<DocumentCoordinator>,
    artifacts: ArtifactRegistry,
    ui: WorkbenchUi,
    files_subscription: SubscriptionId,
}

impl Workbench {
    pub fn new(sandbox: Arc<dyn Sandbox>, config: WorkbenchConfig) -> Self {
        Self::with_runner_factory(sandbox, config, Arc::new(SandboxRunnerFactory))
    }

    pub fn with_runner_factory(
        sandbox: Arc<dyn Sandbox>,
        mut config: WorkbenchConfig,
        factory: Arc<dyn RunnerFactory>,
    ) -> Self {
        config.sanitize();
        let configured = config.work_dir.clone();
        if config.rebase_work_dir(sandbox.work_dir()) {
            tracing::warn!(
                configured = %configured,
                sandbox = sandbox.work_dir(),
                include = ?config.watch.include,
                "configured work dir differs from the sandbox; using the sandbox's"
            );
        }
        let store = Arc::new(ProjectStore::new(Arc::clone(&sandbox), store_options(&config)));
        let coordinator = Arc::new(DocumentCoordinator::new(
            Arc::clone(&store),
            Arc::new(DocumentCache::new()),
        ));

        let weak: Weak<DocumentCoordinator> = Arc::downgrade(&coordinator);
        let files_subscription = store.files().subscribe(move |files| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.set_documents(files);
            }
        });

        Self {
            config,
            store,
            coordinator,
            artifacts: ArtifactRegistry::new(sandbox, factory),
            ui: WorkbenchUi::new(),
            files_subscription,
        }
    }

    /// 開始監看沙箱。 / Starts mirroring the sandbox; repeated calls are no-ops.
    pub async fn start(&self) -> Result<(), StoreError> {
        self.store.watch().await
    }

    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ProjectStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<DocumentCoordinator> {
        &self.coordinator
    }

    pub fn artifact_registry(&self) -> &ArtifactRegistry {
        &self.artifacts
    }

    pub fn ui(&self) -> &WorkbenchUi {
        &self.ui
    }

    // Read surface.

    pub fn files(&self) -> &Arc<Observable<FileMap>> {
        self.store.files()
    }

    pub fn files_count(&self) -> usize {
        self.store.files_count()
    }

    pub fn unsaved(&self) -> &Observable<UnsavedSet> {
        self.coordinator.unsaved()
    }

    pub fn documents(&self) -> &Observable<Documents> {
        self.coordinator.cache().documents()
    }

    pub fn selected(&self) -> &Observable<Option<String>> {
        self.coordinator.cache().selected()
    }

    pub fn selected_file(&self) -> Option<String> {
        self.coordinator.cache().selected_file()
    }

    pub fn current_document(&self) -> Option<EditorDocument> {
        self.coordinator.current_document()
    }

    pub fn artifacts(&self) -> &Observable<Artifacts> {
        self.artifacts.artifacts()
    }

    pub fn first_artifact(&self) -> Option<ArtifactState> {
        self.artifacts.first_artifact()
    }

    pub fn show_workbench(&self) -> &Observable<bool> {
        self.ui.show_workbench()
    }

    pub fn current_view(&self) -> &Observable<WorkbenchView> {
        self.ui.current_view()
    }

    // Write surface.

    pub fn set_show_workbench(&self, show: bool) {
        self.ui.set_show_workbench(show);
    }

    pub fn set_current_view(&self, view: WorkbenchView) {
        self.ui.set_current_view(view);
    }

    pub fn set_selected_file(&self, path: Option<&str>) {
        self.coordinator.set_selected_file(path);
    }

    pub fn set_current_document_content(&self, content: &str) {
        self.coordinator.set_current_document_content(content);
    }

    pub fn set_current_document_scroll_position(&self, position: ScrollPosition) {
        self.coordinator.set_current_document_scroll_position(position);
    }

    pub fn reset_current_document(&self) {
        self.coordinator.reset_current_document();
    }

    pub async fn save_file(&self, path: &str) -> Result<(), StoreError> {
        self.coordinator.save_file(path).await
    }

    pub async fn save_current_document(&self) -> Result<(), StoreError> {
        self.coordinator.save_current_document().await
    }

    pub async fn save_all_files(&self) -> Result<(), StoreError> {
        self.coordinator.save_all_files().await
    }

    pub fn get_file_modifications(&self) -> FileModifications {
        self.coordinator.get_file_modifications()
    }

    pub fn reset_all_file_modifications(&self) {
        self.coordinator.reset_all_file_modifications();
    }

    pub fn add_artifact(&self, data: ArtifactCallbackData) -> RegistryOutcome {
        self.artifacts.add_artifact(data)
    }

    pub fn update_artifact(&self, message_id: &str, update: ArtifactUpdate) -> RegistryOutcome {
        self.artifacts.update_artifact(message_id, update)
    }

    pub fn add_action(&self, data: ActionCallbackData) -> RegistryOutcome {
        self.artifacts.add_action(data)
    }

    pub async fn run_action(&self, data: ActionCallbackData) -> Result<RegistryOutcome, ArtifactError> {
        self.artifacts.run_action(data).await
    }

    /// 送出訊息前儲存檔案並附上修改內容。 / Saves pending edits and prefixes `input` with the
    /// rendered modifications, resetting the baselines when any were sent.
    pub async fn prepare_message(&self, input: &str) -> Result<String, StoreError> {
        self.save_all_files().await?;
        let modifications = self.get_file_modifications();
        if modifications.is_empty() {
            return Ok(input.to_string());
        }
        tracing::debug!(files = modifications.len(), "attaching file modifications to message");
        let block = render_modifications(&modifications);
        self.reset_all_file_modifications();
        Ok(format!("{block}\n\n{input}"))
    }
}

impl Drop for Workbench {
    fn drop(&mut self) {
        self.store.files().unsubscribe(self.files_subscription);
    }
}

impl std::fmt::Debug for Workbench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workbench")
            .field("store", &self.store)
            .field("artifacts", &self.artifacts)
            .finish()
    }
}
