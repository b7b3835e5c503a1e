pub mod config;

pub use config::{
    ClassifierConfig, ConfigError, ConfigStore, LoggingConfig, WatchConfig, WorkbenchConfig,
    DEFAULT_WORK_DIR,
};
