use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_VERSION: u32 = 1;

pub const DEFAULT_WORK_DIR: &str = "/home/workspace";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize config {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbenchConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_work_dir() -> String {
    DEFAULT_WORK_DIR.to_string()
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            work_dir: default_work_dir(),
            watch: WatchConfig::default(),
            classifier: ClassifierConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl WorkbenchConfig {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = CONFIG_VERSION;
        }
        let trimmed = self.work_dir.trim().trim_end_matches('/');
        self.work_dir = if !trimmed.starts_with('/') {
            default_work_dir()
        } else {
            trimmed.to_string()
        };
        self.watch.sanitize(&self.work_dir);
        self.classifier.sanitize();
        self.logging.sanitize();
    }

    /// 改用指定的工作目錄，並改寫以舊目錄為根的 include 樣式。 / Moves the config onto
    /// `work_dir`, rewriting include patterns rooted at the old one. Returns `false` when
    /// nothing changed.
    pub fn rebase_work_dir(&mut self, work_dir: &str) -> bool {
        self.sanitize();
        let target = work_dir.trim().trim_end_matches('/');
        if target == self.work_dir || !target.starts_with('/') {
            return false;
        }
        let previous = std::mem::replace(&mut self.work_dir, target.to_string());
        for pattern in &mut self.watch.include {
            if let Some(rest) = pattern.strip_prefix(previous.as_str()) {
                if rest.is_empty() || rest.starts_with('/') {
                    *pattern = format!("{target}{rest}");
                }
            }
        }
        self.sanitize();
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_coalesce_window")]
    pub coalesce_window_ms: u64,
    /// Empty means "everything under the work dir".
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    #[serde(default = "default_true")]
    pub include_content: bool,
}

fn default_coalesce_window() -> u64 {
    100
}

fn default_exclude() -> Vec<String> {
    vec!["**/node_modules".to_string(), "**/.git".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: default_coalesce_window(),
            include: Vec::new(),
            exclude: default_exclude(),
            include_content: true,
        }
    }
}

impl WatchConfig {
    fn sanitize(&mut self, work_dir: &str) {
        if self.coalesce_window_ms == 0 {
            self.coalesce_window_ms = default_coalesce_window();
        }
        self.coalesce_window_ms = self.coalesce_window_ms.clamp(1, 5000);
        self.include.retain(|pattern| !pattern.trim().is_empty());
        self.exclude.retain(|pattern| !pattern.trim().is_empty());
        if self.include.is_empty() {
            self.include.push(format!("{work_dir}/**"));
        }
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_sample_len")]
    pub sample_len: usize,
}

fn default_sample_len() -> usize {
    100
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            sample_len: default_sample_len(),
        }
    }
}

impl ClassifierConfig {
    fn sanitize(&mut self) {
        if self.sample_len == 0 {
            self.sample_len = default_sample_len();
        }
        self.sample_len = self.sample_len.clamp(1, 65_536);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl LoggingConfig {
    fn sanitize(&mut self) {
        if self.filter.trim().is_empty() {
            self.filter = default_filter();
        }
    }
}

/// 設定檔與其目前內容。 / A config file and its sanitized contents.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    data: WorkbenchConfig,
    on_disk: bool,
}

impl ConfigStore {
    /// Reads `path`; a missing file yields defaults and is not created.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let (mut data, on_disk) = match fs::read_to_string(&path) {
            Ok(contents) => {
                let data = serde_json::from_str::<WorkbenchConfig>(&contents).map_err(|source| {
                    ConfigError::Parse {
                        path: path.clone(),
                        source,
                    }
                })?;
                (data, true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => (WorkbenchConfig::default(), false),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        data.sanitize();
        Ok(Self { path, data, on_disk })
    }

    pub fn config(&self) -> &WorkbenchConfig {
        &self.data
    }

    pub fn into_config(self) -> WorkbenchConfig {
        self.data
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 檔案是否已存在。 / Whether the file exists on disk.
    pub fn is_persisted(&self) -> bool {
        self.on_disk
    }

    /// Applies `op` to a copy and writes it back when the sanitized result
    /// differs, or when the file does not exist yet. Returns whether it wrote.
    /// 修改設定；內容有變或檔案尚不存在時才寫入。
    pub fn edit(&mut self, op: impl FnOnce(&mut WorkbenchConfig)) -> Result<bool, ConfigError> {
        let mut next = self.data.clone();
        op(&mut next);
        next.sanitize();
        if next == self.data && self.on_disk {
            return Ok(false);
        }
        write_atomic(&self.path, &next)?;
        self.data = next;
        self.on_disk = true;
        Ok(true)
    }
}

fn write_atomic(path: &Path, config: &WorkbenchConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut payload = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    payload.push('\n');

    let mut tmp_name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    tmp_name.push(".workbench-tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, payload).map_err(|source| ConfigError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        ConfigError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}
