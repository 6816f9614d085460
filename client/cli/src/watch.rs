//! Continuous monitor mode (SPEC_FULL.md "CLI": `cdp-client watch`).
//!
//! Grounded on the teacher's `watch.rs`/`sync.rs::watch_and_sync`: same
//! `notify::recommended_watcher` + debounce-by-timer shape, same periodic
//! full-rescan fallback (notify can coalesce or drop events under load).
//! Replaces the teacher's per-event gRPC push with the backup pipeline (C8)
//! run against the single changed file, and drops the "remote changes" half
//! entirely — this client only ever pushes.

use crate::config::Config;
use crate::db::DedupCache;
use crate::sync::{load_ignore_patterns, run_backup, should_ignore, to_remote_path};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DEBOUNCE: Duration = Duration::from_millis(500);
const RESCAN_INTERVAL: Duration = Duration::from_secs(3600);

/// Run an initial backup, then watch `config.dir_list` for changes and back
/// up files as they settle; periodically falls back to a full rescan so a
/// dropped filesystem event can't leave a file permanently un-backed-up.
pub async fn run_watch(config: &Config, cache: &DedupCache) -> anyhow::Result<()> {
    if config.dir_list.is_empty() {
        anyhow::bail!("no directories configured; set dir_list in the config file");
    }

    info!("running initial backup before watching");
    let summary = run_backup(config, cache).await?;
    info!(
        "initial backup: {} uploaded, {} skipped, {} failed",
        summary.uploaded, summary.skipped, summary.failed
    );

    let roots: Vec<PathBuf> = config.dir_list.iter().map(PathBuf::from).collect();
    let (tx, rx) = std::sync::mpsc::channel();

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    })?;
    for root in &roots {
        if root.exists() {
            watcher.watch(root, RecursiveMode::Recursive)?;
        }
    }

    info!("watching {} director{}", roots.len(), if roots.len() == 1 { "y" } else { "ies" });

    let mut pending: HashSet<PathBuf> = HashSet::new();
    let mut last_event = Instant::now();
    let mut last_rescan = Instant::now();

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                for path in event.paths {
                    if path.is_file() {
                        pending.insert(path);
                    }
                }
                last_event = Instant::now();
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if !pending.is_empty() && last_event.elapsed() >= DEBOUNCE {
                    backup_pending(config, cache, &roots, pending.drain()).await;
                }
                if last_rescan.elapsed() >= RESCAN_INTERVAL {
                    info!("periodic full rescan");
                    if let Err(e) = run_backup(config, cache).await {
                        warn!("periodic rescan failed: {}", e);
                    }
                    cache.set_watch_cursor(&chrono::Utc::now().to_rfc3339())?;
                    last_rescan = Instant::now();
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

async fn backup_pending(
    config: &Config,
    cache: &DedupCache,
    roots: &[PathBuf],
    paths: std::collections::hash_set::Drain<'_, PathBuf>,
) {
    let host = match config.require_host() {
        Ok(h) => h.to_string(),
        Err(e) => {
            warn!("cannot back up changed files: {}", e);
            return;
        }
    };
    let server_url = match config.require_server() {
        Ok(u) => u,
        Err(e) => {
            warn!("cannot back up changed files: {}", e);
            return;
        }
    };
    let api = crate::api::ApiClient::new(server_url);

    for path in paths {
        if !path.exists() {
            continue;
        }
        let Some(root) = roots.iter().find(|r| path.starts_with(r)) else {
            continue;
        };
        let ignore_patterns = load_ignore_patterns(root);
        if should_ignore(&path, root, &ignore_patterns) {
            continue;
        }
        let remote = to_remote_path(root, &path);
        match crate::sync::backup_one_file(&api, cache, &host, root, &path, config.block_size)
            .await
        {
            Ok(_) => info!("synced: {}", remote),
            Err(e) => warn!("sync failed {}: {}", remote, e),
        }
    }
}
