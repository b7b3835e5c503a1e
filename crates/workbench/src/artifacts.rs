use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use workbench_core::Observable;
use workbench_runexec::{ActionCallbackData, ActionRunner, RunError, RunnerFactory};
use workbench_sandbox::Sandbox;

/// 成品登錄的錯誤。 / Errors raised by the artifact registry.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Run(#[from] RunError),
}

impl ArtifactError {
    pub fn is_invariant(&self) -> bool {
        matches!(self, ArtifactError::Invariant(_))
    }
}

/// 容忍型操作的結果。 / Outcome of tolerant registry operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryOutcome {
    Applied,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCallbackData {
    pub message_id: String,
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactUpdate {
    pub title: Option<String>,
    pub closed: Option<bool>,
}

/// 一則訊息產生的成品。 / The artifact produced by one assistant message.
#[derive(Clone)]
pub struct ArtifactState {
    pub id: String,
    pub title: String,
    pub closed: bool,
    pub runner: Arc<dyn ActionRunner>,
}

impl std::fmt::Debug for ArtifactState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactState")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("closed", &self.closed)
            .field("actions", &self.runner.actions().get().len())
            .finish()
    }
}

/// 依訊息代號索引並保留插入順序。 / Artifacts keyed by message id, remembering insertion order.
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    order: Vec<String>,
    entries: BTreeMap<String, ArtifactState>,
}

impl Artifacts {
    pub fn get(&self, message_id: &str) -> Option<&ArtifactState> {
        self.entries.get(message_id)
    }

    pub fn first(&self) -> Option<&ArtifactState> {
        self.order.first().and_then(|id| self.entries.get(id))
    }

    /// 依插入順序列出。 / Iterates `(message_id, artifact)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArtifactState)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|artifact| (id.as_str(), artifact)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// 管理 AI 產生的成品與各自的執行器。 / Tracks AI-issued artifacts and their runners.
pub struct ArtifactRegistry {
    sandbox: Arc<dyn Sandbox>,
    factory: Arc<dyn RunnerFactory>,
    artifacts: Observable<Artifacts>,
}

impl ArtifactRegistry {
    pub fn new(sandbox: Arc<dyn Sandbox>, factory: Arc<dyn RunnerFactory>) -> Self {
        Self {
            sandbox,
            factory,
            artifacts: Observable::default(),
        }
    }

    pub fn artifacts(&self) -> &Observable<Artifacts> {
        &self.artifacts
    }

    pub fn artifact(&self, message_id: &str) -> Option<ArtifactState> {
        self.artifacts.get().get(message_id).cloned()
    }

    pub fn first_artifact(&self) -> Option<ArtifactState> {
        self.artifacts.get().first().cloned()
    }

    /// 同一訊息重複登錄時忽略。 / Registers an artifact; a message id seen before is ignored.
    pub fn add_artifact(&self, data: ArtifactCallbackData) -> RegistryOutcome {
        let added = self.artifacts.update_if(|artifacts| {
            if artifacts.entries.contains_key(&data.message_id) {
                return false;
            }
            let runner = self.factory.create(Arc::clone(&self.sandbox));
            artifacts.order.push(data.message_id.clone());
            artifacts.entries.insert(
                data.message_id.clone(),
                ArtifactState {
                    id: data.id.clone(),
                    title: data.title.clone(),
                    closed: false,
                    runner,
                },
            );
            true
        });
        if added {
            tracing::debug!(message_id = %data.message_id, artifact = %data.id, "artifact registered");
            RegistryOutcome::Applied
        } else {
            tracing::debug!(message_id = %data.message_id, "duplicate artifact ignored");
            RegistryOutcome::Ignored
        }
    }

    pub fn update_artifact(&self, message_id: &str, update: ArtifactUpdate) -> RegistryOutcome {
        let applied = self.artifacts.update_if(|artifacts| {
            let Some(artifact) = artifacts.entries.get_mut(message_id) else {
                return false;
            };
            if let Some(title) = &update.title {
                artifact.title = title.clone();
            }
            if let Some(closed) = update.closed {
                artifact.closed = closed;
            }
            true
        });
        if applied {
            RegistryOutcome::Applied
        } else {
            RegistryOutcome::Ignored
        }
    }

    pub fn add_action(&self, data: ActionCallbackData) -> RegistryOutcome {
        let Some(artifact) = self.artifact(&data.message_id) else {
            tracing::debug!(message_id = %data.message_id, action = %data.action_id, "action for unknown artifact ignored");
            return RegistryOutcome::Ignored;
        };
        artifact.runner.add_action(data);
        RegistryOutcome::Applied
    }

    pub async fn run_action(&self, data: ActionCallbackData) -> Result<RegistryOutcome, ArtifactError> {
        let Some(artifact) = self.artifact(&data.message_id) else {
            tracing::error!(message_id = %data.message_id, action = %data.action_id, "run requested for unknown artifact");
            return Err(ArtifactError::Invariant(format!(
                "artifact for message '{}' not found",
                data.message_id
            )));
        };
        artifact.runner.run_action(data).await?;
        Ok(RegistryOutcome::Applied)
    }
}

impl std::fmt::Debug for ArtifactRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactRegistry")
            .field("artifacts", &self.artifacts.get().len())
            .finish()
    }
}
