//! Action execution for AI-issued artifacts.
//! （執行 AI 產生的成品動作。）
//!
//! An artifact owns one [`ActionRunner`]. Actions are registered as they are
//! parsed and run on request; the default [`SandboxActionRunner`] writes
//! files and runs shell commands through the sandbox, one action at a time in
//! submission order, and publishes each action's status.
//! 每個成品擁有一個執行器；預設執行器透過沙箱寫檔或執行指令，依提交順序逐一執行並公開狀態。

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use workbench_core::path::{self, PathError};
use workbench_core::Observable;
use workbench_sandbox::{clean_relative, ExecCommand, Sandbox, SandboxError};

/// Errors that may surface while running an action.
/// （執行動作時可能發生的錯誤。）
#[derive(Debug, Error)]
pub enum RunError {
    #[error("action '{0}' was never registered")]
    UnknownAction(String),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    InvalidPath(#[from] PathError),
    #[error("command `{command}` exited with {exit_code:?}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
    },
}

/// What an action does.
/// （動作內容。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    /// Writes `content` to `file_path` (absolute or work-dir relative).
    File { file_path: String, content: String },
    /// Runs `content` as a shell script in the work dir.
    Shell { content: String },
}

/// Event data attached to an action by the message parser.
/// （解析器附帶的動作資料。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCallbackData {
    pub message_id: String,
    pub artifact_id: String,
    pub action_id: String,
    pub action: ActionPayload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Complete,
    Failed { error: String },
}

impl ActionStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, ActionStatus::Complete | ActionStatus::Failed { .. })
    }
}

/// Observable per-action record.
/// （可觀察的動作狀態。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionState {
    /// Registration order within the runner.
    pub seq: usize,
    pub action: ActionPayload,
    pub status: ActionStatus,
    #[serde(default)]
    pub output: Option<String>,
}

pub type ActionMap = BTreeMap<String, ActionState>;

/// Executes the actions of one artifact.
/// （執行單一成品的動作。）
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Registers an action; re-registering an id is ignored.
    fn add_action(&self, data: ActionCallbackData);

    /// Runs a registered action. Actions that already ran are not repeated.
    async fn run_action(&self, data: ActionCallbackData) -> Result<(), RunError>;

    fn actions(&self) -> &Observable<ActionMap>;
}

/// Creates one runner per artifact.
/// （為每個成品建立執行器。）
pub trait RunnerFactory: Send + Sync {
    fn create(&self, sandbox: Arc<dyn Sandbox>) -> Arc<dyn ActionRunner>;
}

impl<F> RunnerFactory for F
where
    F: Fn(Arc<dyn Sandbox>) -> Arc<dyn ActionRunner> + Send + Sync,
{
    fn create(&self, sandbox: Arc<dyn Sandbox>) -> Arc<dyn ActionRunner> {
        self(sandbox)
    }
}

/// Factory producing [`SandboxActionRunner`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxRunnerFactory;

impl RunnerFactory for SandboxRunnerFactory {
    fn create(&self, sandbox: Arc<dyn Sandbox>) -> Arc<dyn ActionRunner> {
        Arc::new(SandboxActionRunner::new(sandbox))
    }
}

/// Default runner executing actions against a sandbox.
/// （透過沙箱執行動作的預設執行器。）
pub struct SandboxActionRunner {
    sandbox: Arc<dyn Sandbox>,
    actions: Observable<ActionMap>,
    /// Ids handed to `run_action`, queued or finished.
    claimed: Mutex<HashSet<String>>,
    lane: tokio::sync::Mutex<()>,
}

impl SandboxActionRunner {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            sandbox,
            actions: Observable::default(),
            claimed: Mutex::new(HashSet::new()),
            lane: tokio::sync::Mutex::new(()),
        }
    }

    pub fn status(&self, action_id: &str) -> Option<ActionStatus> {
        self.actions.get().get(action_id).map(|state| state.status.clone())
    }

    fn claimed(&self) -> MutexGuard<'_, HashSet<String>> {
        self.claimed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, action_id: &str, status: ActionStatus, output: Option<String>) {
        self.actions.update(|actions| {
            if let Some(state) = actions.get_mut(action_id) {
                state.status = status;
                if output.is_some() {
                    state.output = output;
                }
            }
        });
    }

    fn relative_target(&self, file_path: &str) -> Result<String, RunError> {
        if file_path.starts_with('/') {
            let relative = path::relative_to(self.sandbox.work_dir(), file_path)?;
            Ok(clean_relative(relative)?)
        } else {
            Ok(clean_relative(file_path)?)
        }
    }

    async fn execute(&self, action: &ActionPayload) -> Result<Option<String>, RunError> {
        match action {
            ActionPayload::File { file_path, content } => {
                let relative = self.relative_target(file_path)?;
                if let Some(idx) = relative.rfind('/') {
                    self.sandbox.mkdir(&relative[..idx], true).await?;
                }
                self.sandbox.write_file(&relative, content.as_bytes()).await?;
                tracing::debug!(path = %relative, bytes = content.len(), "file action written");
                Ok(None)
            }
            ActionPayload::Shell { content } => {
                let command = ExecCommand::shell(content.clone());
                let output = self.sandbox.exec(command.clone()).await?;
                let mut text = output.stdout_lossy();
                text.push_str(&output.stderr_lossy());
                if !output.success() {
                    tracing::warn!(command = %content, exit_code = ?output.exit_code, "shell action failed");
                    return Err(RunError::CommandFailed {
                        command: command.display(),
                        exit_code: output.exit_code,
                    });
                }
                Ok(Some(text))
            }
        }
    }
}

impl std::fmt::Debug for SandboxActionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxActionRunner")
            .field("work_dir", &self.sandbox.work_dir())
            .field("actions", &self.actions.get().len())
            .finish()
    }
}

#[async_trait]
impl ActionRunner for SandboxActionRunner {
    fn add_action(&self, data: ActionCallbackData) {
        self.actions.update_if(|actions| {
            if actions.contains_key(&data.action_id) {
                return false;
            }
            let seq = actions.len();
            actions.insert(
                data.action_id.clone(),
                ActionState {
                    seq,
                    action: data.action.clone(),
                    status: ActionStatus::Pending,
                    output: None,
                },
            );
            true
        });
    }

    async fn run_action(&self, data: ActionCallbackData) -> Result<(), RunError> {
        let action_id = data.action_id.clone();
        if !self.actions.get().contains_key(&action_id) {
            tracing::error!(action = %action_id, artifact = %data.artifact_id, "run requested for unknown action");
            return Err(RunError::UnknownAction(action_id));
        }
        if !self.claimed().insert(action_id.clone()) {
            tracing::debug!(action = %action_id, "action already queued or ran");
            return Ok(());
        }

        // Stays pending while earlier actions hold the lane.
        let _lane = self.lane.lock().await;
        self.actions.update(|actions| {
            if let Some(state) = actions.get_mut(&action_id) {
                // The final parsed payload supersedes the one seen at registration.
                state.action = data.action.clone();
                state.status = ActionStatus::Running;
            }
        });
        match self.execute(&data.action).await {
            Ok(output) => {
                self.set_status(&action_id, ActionStatus::Complete, output);
                Ok(())
            }
            Err(err) => {
                self.set_status(
                    &action_id,
                    ActionStatus::Failed {
                        error: err.to_string(),
                    },
                    None,
                );
                Err(err)
            }
        }
    }

    fn actions(&self) -> &Observable<ActionMap> {
        &self.actions
    }
}
