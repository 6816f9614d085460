use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod sync;
mod watch;

use api::ApiClient;
use cdp_proto::{Block, FileType, Query};
use config::Config;
use db::DedupCache;

#[derive(Parser)]
#[command(name = "cdp-client")]
#[command(about = "Continuous data protection backup client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the configured block size for this invocation
    #[arg(long, global = true)]
    block_size: Option<usize>,

    /// Suppress per-file progress output
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the configured directories once, uploading changed files
    Backup {
        /// Run in the background instead of blocking the shell
        #[arg(long)]
        foreground: bool,
    },
    /// Run an initial backup, then watch for changes and upload continuously
    Watch,
    /// Stop a backgrounded watch/backup process
    Down,
    /// Show whether a backgrounded process is running
    Status,
    /// List files recorded for this host
    Ls {
        /// Case-insensitive filename substring filter
        #[arg(long)]
        filename: Option<String>,
        /// Keep only the newest record per (path, type)
        #[arg(long)]
        latest_only: bool,
    },
    /// Reconstruct files from the server into a local directory
    Restore {
        /// Directory to write recovered files into
        out_dir: String,
        /// Only restore the newest version of each path
        #[arg(long, default_value_t = true)]
        latest_only: bool,
    },
}

fn pid_file() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cdp-client.pid")
}

fn is_running() -> Option<u32> {
    let pid_path = pid_file();
    if pid_path.exists() {
        if let Ok(pid_str) = fs::read_to_string(&pid_path) {
            if let Ok(pid) = pid_str.trim().parse::<u32>() {
                #[cfg(unix)]
                {
                    let result = Command::new("kill")
                        .args(["-0", &pid.to_string()])
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status();
                    if result.map(|s| s.success()).unwrap_or(false) {
                        return Some(pid);
                    }
                }
                #[cfg(not(unix))]
                {
                    return Some(pid);
                }
            }
        }
        let _ = fs::remove_file(&pid_path);
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Down = cli.command {
        return stop_background();
    }
    if let Commands::Backup { foreground: false } = cli.command {
        return start_daemon("backup");
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cdp_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?.with_overrides(cli.block_size, cli.quiet);

    match cli.command {
        Commands::Backup { .. } => run_backup_command(&config).await?,
        Commands::Watch => run_watch_command(&config).await?,
        Commands::Down => unreachable!(),
        Commands::Status => show_status(&config),
        Commands::Ls {
            filename,
            latest_only,
        } => run_ls(&config, filename, latest_only).await?,
        Commands::Restore {
            out_dir,
            latest_only,
        } => run_restore(&config, &out_dir, latest_only).await?,
    }

    Ok(())
}

fn dedup_cache_path() -> anyhow::Result<PathBuf> {
    let dir = Config::config_path()?
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(dir.join("dedup_cache.db"))
}

async fn run_backup_command(config: &Config) -> anyhow::Result<()> {
    let cache = DedupCache::open(&dedup_cache_path()?)?;
    let pid_path = pid_file();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;

    let result = sync::run_backup(config, &cache).await;
    let _ = fs::remove_file(&pid_path);

    let summary = result?;
    if !config.quiet {
        println!(
            "{} uploaded, {} skipped, {} failed",
            summary.uploaded, summary.skipped, summary.failed
        );
    }
    Ok(())
}

async fn run_watch_command(config: &Config) -> anyhow::Result<()> {
    let cache = DedupCache::open(&dedup_cache_path()?)?;
    let pid_path = pid_file();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;

    let result = watch::run_watch(config, &cache).await;
    let _ = fs::remove_file(&pid_path);
    result
}

fn start_daemon(subcommand: &str) -> anyhow::Result<()> {
    if let Some(pid) = is_running() {
        println!("cdp-client already running (pid {})", pid);
        return Ok(());
    }

    let exe = std::env::current_exe()?;
    let child = Command::new(&exe)
        .args([subcommand, "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    println!("cdp-client running in background (pid {})", child.id());
    Ok(())
}

fn stop_background() -> anyhow::Result<()> {
    if let Some(pid) = is_running() {
        #[cfg(unix)]
        {
            Command::new("kill").args([&pid.to_string()]).status()?;
        }
        #[cfg(not(unix))]
        {
            Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/F"])
                .status()?;
        }
        let _ = fs::remove_file(pid_file());
        println!("cdp-client stopped");
    } else {
        println!("cdp-client not running");
    }
    Ok(())
}

fn show_status(config: &Config) {
    match (&config.server_url, &config.host) {
        (Some(server), Some(host)) => {
            println!("server: {}", server);
            println!("host: {}", host);
            println!("directories: {}", config.dir_list.join(", "));
        }
        _ => println!("not configured; set server_url and host in the config file"),
    }
    match is_running() {
        Some(pid) => println!("running (pid {})", pid),
        None => println!("not running"),
    }
}

async fn run_ls(config: &Config, filename: Option<String>, latest_only: bool) -> anyhow::Result<()> {
    let host = config.require_host()?;
    let api = ApiClient::new(config.require_server()?);

    let mut query = Query::new(host).with_latest_only(latest_only);
    if let Some(f) = filename {
        query = query.with_filename(f);
    }

    let files = api.list_files(&query).await?;
    if files.is_empty() {
        println!("no files");
        return Ok(());
    }
    for record in files {
        println!(
            "{:>12}  {}  {}",
            record.size,
            record.mtime,
            record.path
        );
    }
    Ok(())
}

async fn run_restore(config: &Config, out_dir: &str, latest_only: bool) -> anyhow::Result<()> {
    let host = config.require_host()?;
    let api = ApiClient::new(config.require_server()?);
    let out_root = PathBuf::from(out_dir);
    fs::create_dir_all(&out_root)?;

    let query = Query::new(host).with_latest_only(latest_only);
    let records = api.list_files(&query).await?;

    let mut restored = 0;
    let mut failed = 0;
    for record in &records {
        if record.file_type != FileType::Regular {
            continue;
        }
        match restore_one(&api, &out_root, record).await {
            Ok(()) => {
                restored += 1;
                println!("restored: {}", record.path);
            }
            Err(e) => {
                failed += 1;
                eprintln!("failed: {}: {}", record.path, e);
            }
        }
    }

    println!("{} restored, {} failed", restored, failed);
    Ok(())
}

async fn restore_one(
    api: &ApiClient,
    out_root: &std::path::Path,
    record: &cdp_proto::FileMeta,
) -> anyhow::Result<()> {
    let mut content = Vec::with_capacity(record.size.max(0) as usize);
    for hash in &record.hashes {
        let block: Block = api.retrieve_block(hash).await?;
        content.extend(block.decode_and_verify()?);
    }

    let relative = record.path.trim_start_matches('/');
    let dest = out_root.join(relative);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&dest, &content)?;
    Ok(())
}
