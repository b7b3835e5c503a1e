use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;
use workbench::Workbench;
use workbench_core::{path, render_modifications, Dirent, FileMap};
use workbench_sandbox::LocalSandbox;
use workbench_settings::{ConfigStore, LoggingConfig, WorkbenchConfig};

#[derive(Parser)]
#[command(
    name = "workbench-cli",
    about = "Mirror a project directory the way the workbench sees it",
    author,
    version
)]
struct Cli {
    /// 設定檔路徑；不存在時採用預設值。 / Config file (defaults are used when it does not exist).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// 以 JSON 格式輸出日誌。 / Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 鏡像目錄一次並列出檔案表。 / Mirror a directory once and print its file map.
    Snapshot(SnapshotArgs),
    /// 持續鏡像一段時間並記錄每批變更。 / Mirror a directory for a while, logging every batch.
    Watch(WatchArgs),
    /// 透過專案儲存區寫入檔案並輸出修改區塊。 / Save a file through the store and print the modifications block.
    Edit(EditArgs),
    /// 檢視或修改設定檔。 / Show or change the config file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// 輸出整理後的有效設定。 / Print the effective, sanitized config as JSON.
    Show,
    /// 修改設定並寫回 `--config` 指定的檔案。 / Change settings and write them to the `--config` file.
    Set(ConfigSetArgs),
}

#[derive(Args)]
struct ConfigSetArgs {
    #[arg(long, value_name = "DIR")]
    work_dir: Option<String>,
    #[arg(long, value_name = "MS")]
    coalesce_ms: Option<u64>,
    /// 取代 include 樣式（可重複）。 / Replaces the include patterns (repeatable).
    #[arg(long, value_name = "GLOB")]
    include: Vec<String>,
    /// 取代 exclude 樣式（可重複）。 / Replaces the exclude patterns (repeatable).
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,
    #[arg(long, value_name = "BOOL")]
    include_content: Option<bool>,
    #[arg(long, value_name = "BYTES")]
    sample_len: Option<usize>,
    #[arg(long, value_name = "FILTER")]
    log_filter: Option<String>,
    #[arg(long = "json-logs", value_name = "BOOL")]
    json_logs: Option<bool>,
}

#[derive(Args)]
struct MirrorArgs {
    /// 要鏡像的目錄。 / Directory to mirror.
    #[arg(value_name = "DIR")]
    root: PathBuf,
    /// 等待初始掃描的上限（毫秒）。 / Upper bound on the wait for the initial scan, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    settle_ms: u64,
}

#[derive(Args)]
struct SnapshotArgs {
    #[command(flatten)]
    mirror: MirrorArgs,
    /// 以 JSON 輸出完整檔案表。 / Print the whole file map as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct WatchArgs {
    #[command(flatten)]
    mirror: MirrorArgs,
    /// 監看時間（毫秒）。 / How long to keep watching, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    duration_ms: u64,
}

#[derive(Args)]
struct EditArgs {
    #[command(flatten)]
    mirror: MirrorArgs,
    /// 相對於目錄的檔案路徑。 / File path relative to the directory.
    #[arg(value_name = "FILE")]
    file: String,
    /// 新的檔案內容。 / New file content.
    #[arg(long, conflicts_with = "from", required_unless_present = "from")]
    content: Option<String>,
    /// 從本機檔案讀取新內容。 / Read the new content from a local file.
    #[arg(long, value_name = "PATH")]
    from: Option<PathBuf>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli {
        config: config_path,
        log_json,
        command,
    } = Cli::parse();
    let config = load_config(config_path.as_deref())?;
    init_tracing(&config.logging, log_json)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(async move {
        match command {
            Commands::Snapshot(args) => execute_snapshot(args, config).await,
            Commands::Watch(args) => execute_watch(args, config).await,
            Commands::Edit(args) => execute_edit(args, config).await,
            Commands::Config(sub) => execute_config(sub, config, config_path.as_deref()),
        }
    })
}

fn load_config(path: Option<&Path>) -> Result<WorkbenchConfig> {
    match path {
        Some(path) => {
            let store = ConfigStore::load(path)
                .with_context(|| format!("load config '{}'", path.display()))?;
            Ok(store.into_config())
        }
        None => {
            let mut config = WorkbenchConfig::default();
            config.sanitize();
            Ok(config)
        }
    }
}

fn execute_config(command: ConfigCommand, config: WorkbenchConfig, path: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let rendered = serde_json::to_string_pretty(&config).context("serialize config")?;
            println!("{rendered}");
        }
        ConfigCommand::Set(args) => {
            let Some(path) = path else {
                bail!("config set needs --config FILE");
            };
            let mut store = ConfigStore::load(path)
                .with_context(|| format!("load config '{}'", path.display()))?;
            let wrote = store
                .edit(|config| apply_settings(config, args))
                .with_context(|| format!("write config '{}'", path.display()))?;
            let verb = if wrote { "updated" } else { "unchanged" };
            println!("{verb} {}", path.display());
        }
    }
    Ok(())
}

fn apply_settings(config: &mut WorkbenchConfig, args: ConfigSetArgs) {
    if let Some(work_dir) = args.work_dir {
        if !config.rebase_work_dir(&work_dir) {
            config.work_dir = work_dir;
        }
    }
    if let Some(ms) = args.coalesce_ms {
        config.watch.coalesce_window_ms = ms;
    }
    if !args.include.is_empty() {
        config.watch.include = args.include;
    }
    if !args.exclude.is_empty() {
        config.watch.exclude = args.exclude;
    }
    if let Some(include_content) = args.include_content {
        config.watch.include_content = include_content;
    }
    if let Some(sample_len) = args.sample_len {
        config.classifier.sample_len = sample_len;
    }
    if let Some(filter) = args.log_filter {
        config.logging.filter = filter;
    }
    if let Some(json) = args.json_logs {
        config.logging.json = json;
    }
}

fn init_tracing(logging: &LoggingConfig, force_json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .with_context(|| format!("invalid log filter '{}'", logging.filter))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if logging.json || force_json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
    installed.map_err(|err| anyhow::anyhow!("install log subscriber: {err}"))
}

/// 建立工作台並等待初始掃描。 / Builds a workbench over `root` and waits for its initial scan.
async fn open_mirror(args: &MirrorArgs, config: WorkbenchConfig) -> Result<Workbench> {
    if !args.root.is_dir() {
        bail!("'{}' is not a directory", args.root.display());
    }
    let sandbox = LocalSandbox::new(&args.root, config.work_dir.clone())
        .with_context(|| format!("open '{}'", args.root.display()))?;
    let workbench = Workbench::new(Arc::new(sandbox), config);

    let published = Arc::new(Notify::new());
    let signal = Arc::clone(&published);
    let id = workbench.files().subscribe(move |_| signal.notify_one());
    workbench.start().await.context("start watching")?;
    if tokio::time::timeout(Duration::from_millis(args.settle_ms), published.notified())
        .await
        .is_err()
    {
        tracing::debug!(settle_ms = args.settle_ms, "no initial batch arrived; directory may be empty");
    }
    workbench.files().unsubscribe(id);
    Ok(workbench)
}

async fn execute_snapshot(args: SnapshotArgs, config: WorkbenchConfig) -> Result<()> {
    let workbench = open_mirror(&args.mirror, config).await?;
    let files = workbench.files().get();
    if args.json {
        let rendered = serde_json::to_string_pretty(files.as_ref()).context("serialize file map")?;
        println!("{rendered}");
    } else {
        print_listing(&files);
        println!("{} file(s)", workbench.files_count());
    }
    Ok(())
}

async fn execute_watch(args: WatchArgs, config: WorkbenchConfig) -> Result<()> {
    let workbench = open_mirror(&args.mirror, config).await?;
    println!("watching {} ({} file(s))", args.mirror.root.display(), workbench.files_count());

    let batches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&batches);
    let id = workbench.files().subscribe(move |files| {
        let batch = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let live = files.iter().filter(|(_, entry)| entry.is_some()).count();
        tracing::info!(batch, live, "file map updated");
    });
    tokio::time::sleep(Duration::from_millis(args.duration_ms)).await;
    workbench.files().unsubscribe(id);

    println!(
        "{} batch(es), {} file(s)",
        batches.load(Ordering::SeqCst),
        workbench.files_count()
    );
    Ok(())
}

async fn execute_edit(args: EditArgs, config: WorkbenchConfig) -> Result<()> {
    let content = match (&args.content, &args.from) {
        (Some(content), _) => content.clone(),
        (None, Some(source)) => fs::read_to_string(source)
            .with_context(|| format!("read '{}'", source.display()))?,
        (None, None) => bail!("either --content or --from is required"),
    };
    let workbench = open_mirror(&args.mirror, config).await?;
    let target = path::join(&workbench.config().work_dir, &args.file);
    if workbench.files().get().file(&target).is_none() {
        bail!("'{}' is not a known file in the mirror", args.file);
    }

    workbench.set_selected_file(Some(&target));
    workbench.set_current_document_content(&content);
    workbench
        .save_current_document()
        .await
        .with_context(|| format!("save '{target}'"))?;

    let modifications = workbench.get_file_modifications();
    if modifications.is_empty() {
        println!("no modifications");
    } else {
        println!("{}", render_modifications(&modifications));
    }
    Ok(())
}

fn print_listing(files: &FileMap) {
    for (path, entry) in files.iter() {
        match entry {
            Some(Dirent::Folder) => println!("dir     {path}"),
            Some(Dirent::File(file)) if file.is_binary() => println!("binary  {path}"),
            Some(Dirent::File(file)) => println!("file    {path} ({} bytes)", file.content().len()),
            None => println!("removed {path}"),
        }
    }
}
