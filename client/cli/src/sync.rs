//! One-shot backup pipeline (spec.md §4.8, C8): walk the configured
//! directories and run each regular file through the six-step pipeline.
//!
//! Grounded on the teacher's `sync.rs` for the directory walk, ignore-pattern
//! handling, and `to_remote_path` shape; the body of the per-file pipeline is
//! new (the teacher compares a local `blake3_hash` against its own sqlite
//! cache and pushes whole files over gRPC — this pipeline instead dedup-checks
//! against the server's FileMeta, chunks, and asks `needed_hashes` before
//! uploading anything, per spec.md §4.8).

use crate::api::ApiClient;
use crate::config::Config;
use crate::db::DedupCache;
use cdp_proto::chunk::{self, Block, CompressionKind};
use cdp_proto::{FileMeta, FileType, Hash, Query};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".DS_Store",
    ".Spotlight-V100",
    ".Trashes",
    "._*",
    "Thumbs.db",
    "desktop.ini",
    ".git",
    ".git/",
    "node_modules/",
];

#[derive(Debug, Default)]
pub struct BackupSummary {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub enum Outcome {
    Uploaded,
    Skipped,
}

/// Walk every directory in `config.dir_list` and back up each regular file.
pub async fn run_backup(config: &Config, cache: &DedupCache) -> anyhow::Result<BackupSummary> {
    let host = config.require_host()?.to_string();
    let api = ApiClient::new(config.require_server()?);
    let mut summary = BackupSummary::default();

    if config.dir_list.is_empty() {
        anyhow::bail!("no directories configured; set dir_list in the config file");
    }

    for dir in &config.dir_list {
        let root = PathBuf::from(dir);
        if !root.exists() {
            warn!("configured directory does not exist: {}", dir);
            continue;
        }
        let ignore_patterns = load_ignore_patterns(&root);

        let walker = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());

        for entry in walker {
            let path = entry.path();
            if should_ignore(path, &root, &ignore_patterns) {
                continue;
            }
            match backup_one_file(&api, cache, &host, &root, path, config.block_size).await {
                Ok(Outcome::Uploaded) => summary.uploaded += 1,
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    warn!("backup failed {}: {}", path.display(), e);
                    summary.failed += 1;
                }
            }
        }
    }

    info!(
        "backup complete: {} uploaded, {} skipped, {} failed",
        summary.uploaded, summary.skipped, summary.failed
    );
    Ok(summary)
}

/// Run the six-step pipeline (spec.md §4.8) for a single file.
pub async fn backup_one_file(
    api: &ApiClient,
    cache: &DedupCache,
    host: &str,
    root: &Path,
    path: &Path,
    block_size: usize,
) -> anyhow::Result<Outcome> {
    let metadata = std::fs::metadata(path)?;

    // Step 1: stat the file; construct a tentative FileMeta with empty hashes.
    let mut meta = build_tentative_meta(host, root, path, &metadata)?;

    // Step 2: skip if an identical record already exists.
    if already_backed_up(api, &meta).await? {
        return Ok(Outcome::Skipped);
    }

    // Step 3: chunk the file, populate FileMeta.hashes in file order.
    let file = std::fs::File::open(path)?;
    let mut blocks = Vec::new();
    for item in chunk::chunk(file, block_size) {
        let (_, raw) = item?;
        blocks.push(Block::from_raw(&raw, CompressionKind::Zstd)?);
    }
    meta.hashes = blocks.iter().map(|b| b.hash).collect();

    // Step 4: filter through the local dedup cache, then confirm with the
    // server's authoritative needed_hashes.
    let unseen = cache.filter_unseen(&meta.hashes)?;
    let upload_list: HashSet<Hash> = api.needed_hashes(&unseen).await?.into_iter().collect();

    // Step 5: upload exactly the blocks the server reports missing.
    for block in &blocks {
        if upload_list.contains(&block.hash) {
            api.store_block(block).await?;
            cache.insert(&block.hash)?;
        }
    }

    // Step 6: only now send the FileMeta — all store_blocks precede it.
    api.store_filemeta(&meta).await?;
    info!("backed up: {} ({} blocks)", meta.path, meta.hashes.len());
    Ok(Outcome::Uploaded)
}

/// Ask the metadata backend whether an equivalent record already exists
/// (spec.md §4.8 step 2, identity per `FileMeta::same_identity`).
async fn already_backed_up(api: &ApiClient, tentative: &FileMeta) -> anyhow::Result<bool> {
    let query = Query::new(tentative.host.clone()).with_filename(tentative.name.clone());
    let existing = api.list_files(&query).await?;
    Ok(existing.iter().any(|record| record.same_identity(tentative)))
}

#[cfg(unix)]
fn stat_identity(metadata: &std::fs::Metadata) -> (i64, i64, i64, i64, i64, i64, i64) {
    use std::os::unix::fs::MetadataExt;
    (
        metadata.ino() as i64,
        metadata.mode() as i64,
        metadata.uid() as i64,
        metadata.gid() as i64,
        metadata.atime(),
        metadata.ctime(),
        metadata.mtime(),
    )
}

#[cfg(not(unix))]
fn stat_identity(metadata: &std::fs::Metadata) -> (i64, i64, i64, i64, i64, i64, i64) {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    (0, 0, 0, 0, mtime, mtime, mtime)
}

/// Build a tentative `FileMeta` with an empty hash list (spec.md §4.8 step 1).
/// Owner/group name resolution is not attempted (the teacher's dependency
/// stack has no `/etc/passwd` lookup crate); they carry the numeric id.
fn build_tentative_meta(
    host: &str,
    root: &Path,
    path: &Path,
    metadata: &std::fs::Metadata,
) -> anyhow::Result<FileMeta> {
    let (inode, mode, uid, gid, atime, ctime, mtime) = stat_identity(metadata);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(FileMeta {
        host: host.to_string(),
        path: to_remote_path(root, path),
        name,
        file_type: FileType::Regular,
        mode,
        uid,
        gid,
        owner: uid.to_string(),
        group: gid.to_string(),
        inode,
        size: metadata.len() as i64,
        atime,
        ctime,
        mtime,
        link: None,
        hashes: Vec::new(),
    })
}

/// Convert a local filesystem path to a path relative to the configured
/// backup root, root-anchored with `/`.
pub fn to_remote_path(root: &Path, local_path: &Path) -> String {
    let relative = local_path.strip_prefix(root).unwrap_or(local_path);
    format!("/{}", relative.to_string_lossy().replace('\\', "/"))
}

/// Load ignore patterns from `.cdpignore` plus the built-in defaults.
pub fn load_ignore_patterns(root: &Path) -> Vec<String> {
    let mut patterns: Vec<String> = DEFAULT_IGNORE_PATTERNS
        .iter()
        .map(|s| s.to_string())
        .collect();

    let ignore_file = root.join(".cdpignore");
    if let Ok(content) = std::fs::read_to_string(&ignore_file) {
        for line in content.lines() {
            let trimmed = line.trim();
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                patterns.push(trimmed.to_string());
            }
        }
    }

    patterns
}

/// Check if a path matches any ignore pattern.
pub fn should_ignore(path: &Path, root: &Path, patterns: &[String]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let relative_str = relative.to_string_lossy();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    for pattern in patterns {
        if pattern.ends_with('/') {
            let dir_name = &pattern[..pattern.len() - 1];
            for component in relative.components() {
                if component.as_os_str().to_string_lossy() == dir_name {
                    return true;
                }
            }
        } else if pattern.contains('*') {
            if glob_match(pattern, &filename) || glob_match(pattern, &relative_str) {
                return true;
            }
        } else if filename == *pattern || relative_str == *pattern {
            return true;
        }
    }

    false
}

/// Simple glob pattern matching (supports `*` and `?`).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_bytes = pattern.as_bytes();
    let text_bytes = text.as_bytes();

    let mut pi = 0;
    let mut ti = 0;
    let mut star_pi: Option<usize> = None;
    let mut star_ti: Option<usize> = None;

    while ti < text_bytes.len() {
        if pi < pattern_bytes.len()
            && (pattern_bytes[pi] == b'?' || pattern_bytes[pi] == text_bytes[ti])
        {
            pi += 1;
            ti += 1;
        } else if pi < pattern_bytes.len() && pattern_bytes[pi] == b'*' {
            star_pi = Some(pi);
            star_ti = Some(ti);
            pi += 1;
        } else if let (Some(sp), Some(st)) = (star_pi, star_ti) {
            pi = sp + 1;
            star_ti = Some(st + 1);
            ti = st + 1;
        } else {
            return false;
        }
    }

    while pi < pattern_bytes.len() && pattern_bytes[pi] == b'*' {
        pi += 1;
    }

    pi == pattern_bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_remote_path_is_root_anchored() {
        let root = Path::new("/home/alice/docs");
        let file = Path::new("/home/alice/docs/a/b.txt");
        assert_eq!(to_remote_path(root, file), "/a/b.txt");
    }

    #[test]
    fn should_ignore_matches_exact_filename() {
        let root = Path::new("/data");
        let patterns = load_ignore_patterns(root);
        assert!(should_ignore(Path::new("/data/.DS_Store"), root, &patterns));
        assert!(!should_ignore(Path::new("/data/report.pdf"), root, &patterns));
    }

    #[test]
    fn should_ignore_matches_glob_pattern() {
        let patterns = vec!["._*".to_string()];
        let root = Path::new("/data");
        assert!(should_ignore(Path::new("/data/._resource"), root, &patterns));
    }

    #[test]
    fn should_ignore_matches_directory_component() {
        let patterns = vec!["node_modules/".to_string()];
        let root = Path::new("/data");
        assert!(should_ignore(
            Path::new("/data/project/node_modules/pkg/index.js"),
            root,
            &patterns
        ));
    }

    #[cfg(unix)]
    #[test]
    fn build_tentative_meta_reads_real_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::write(&file_path, b"hello pipeline").unwrap();
        let metadata = std::fs::metadata(&file_path).unwrap();

        let meta = build_tentative_meta("hostA", dir.path(), &file_path, &metadata).unwrap();
        assert_eq!(meta.host, "hostA");
        assert_eq!(meta.path, "/a.txt");
        assert_eq!(meta.name, "a.txt");
        assert_eq!(meta.size, 14);
        assert!(meta.hashes.is_empty());
        assert_eq!(meta.file_type, FileType::Regular);
    }
}
