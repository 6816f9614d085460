//! The reserved `file` backend variant (spec §4.4 design note, §9).
//!
//! A filesystem-backed implementation of all five operations: content-
//! addressed block storage with directory sharding (grounded on the
//! teacher's `storage::blob::BlobStore`, adapted from BLAKE3 to the SHA-256
//! hashes this spec requires), and one append-only JSON-lines log of
//! `FileMeta` records per host. Used for local development, the `file`
//! config option, and the test suite — the natural from-scratch stand-in
//! for a CAS/document store that doesn't need network infrastructure.

use super::{Backend, BackendCapabilities, BackendError};
use async_trait::async_trait;
use cdp_proto::{Block, CompressionKind, FileMeta, Hash, Query};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub struct FileBackend {
    base_path: PathBuf,
}

impl FileBackend {
    pub fn new(base_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(base_path.join("blocks"))?;
        std::fs::create_dir_all(base_path.join("filemeta"))?;
        Ok(FileBackend { base_path })
    }

    fn block_path(&self, hash: &Hash) -> PathBuf {
        let hex = hash.to_hex();
        let shard = &hex[..2];
        self.base_path.join("blocks").join(shard).join(hex)
    }

    fn host_log_path(&self, host: &str) -> PathBuf {
        // Host names are trusted input from the server's own client
        // protocol, not attacker-controlled path fragments from a
        // multi-tenant web boundary, but we still avoid writing outside
        // the filemeta directory for any host containing a separator.
        let safe_host: String = host
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.base_path
            .join("filemeta")
            .join(format!("{safe_host}.jsonl"))
    }

    fn write_block_sync(path: &Path, block: &Block) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&temp_path)?;
            file.write_all(&[block.compression_kind.to_wire() as u8])?;
            file.write_all(&block.uncompressed_length.to_le_bytes())?;
            file.write_all(&block.payload)?;
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn read_block_sync(path: &Path) -> std::io::Result<(CompressionKind, u64, Vec<u8>)> {
        let mut file = std::fs::File::open(path)?;
        let mut header = [0u8; 9];
        file.read_exact(&mut header)?;
        let kind = CompressionKind::from_wire(header[0] as i32);
        let uncompressed_length = u64::from_le_bytes(header[1..9].try_into().unwrap());
        let mut payload = Vec::new();
        file.read_to_end(&mut payload)?;
        Ok((kind, uncompressed_length, payload))
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn store_block(&self, block: Block) -> Result<(), BackendError> {
        let path = self.block_path(&block.hash);
        tokio::task::spawn_blocking(move || Self::write_block_sync(&path, &block))
            .await
            .map_err(|e| BackendError::Internal(e.to_string()))?
            .map_err(|e| BackendError::Internal(e.to_string()))
    }

    async fn store_filemeta(&self, record: FileMeta) -> Result<(), BackendError> {
        let path = self.host_log_path(&record.host);
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            let line = serde_json::to_string(&record)?;
            writeln!(file, "{line}")?;
            Ok(())
        })
        .await
        .map_err(|e| BackendError::Internal(e.to_string()))?
        .map_err(|e| BackendError::Internal(e.to_string()))
    }

    async fn needed_hashes(&self, candidates: &[Hash]) -> Result<Vec<Hash>, BackendError> {
        let mut seen = std::collections::HashSet::new();
        let mut needed = Vec::new();
        for hash in candidates {
            if !seen.insert(*hash) {
                continue;
            }
            if !self.block_path(hash).exists() {
                needed.push(*hash);
            }
        }
        Ok(needed)
    }

    async fn retrieve_block(&self, hash: &Hash) -> Result<Block, BackendError> {
        let path = self.block_path(hash);
        let hash = *hash;
        let result = tokio::task::spawn_blocking(move || Self::read_block_sync(&path))
            .await
            .map_err(|e| BackendError::Internal(e.to_string()))?;

        match result {
            Ok((compression_kind, uncompressed_length, payload)) => Ok(Block {
                hash,
                payload,
                uncompressed_length,
                compression_kind,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(hash.to_hex()))
            }
            Err(e) => Err(BackendError::Corrupt(e.to_string())),
        }
    }

    async fn list_files(&self, query: &Query) -> Result<Vec<FileMeta>, BackendError> {
        let path = self.host_log_path(&query.host);
        let records: Vec<FileMeta> = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<FileMeta>> {
            if !path.exists() {
                return Ok(Vec::new());
            }
            let text = std::fs::read_to_string(&path)?;
            let mut out = Vec::new();
            for line in text.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(meta) = serde_json::from_str::<FileMeta>(line) {
                    out.push(meta);
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| BackendError::Internal(e.to_string()))?
        .map_err(|e| BackendError::Internal(e.to_string()))?;

        Ok(crate::query_filter::apply(records, query))
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            store_block: true,
            store_filemeta: true,
            needed_hashes: true,
            retrieve_block: true,
            list_files: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_proto::FileType;

    fn sample_block(content: &[u8]) -> Block {
        Block::from_raw(content, CompressionKind::None).unwrap()
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let block = sample_block(b"hello block");

        backend.store_block(block.clone()).await.unwrap();
        let fetched = backend.retrieve_block(&block.hash).await.unwrap();
        assert_eq!(fetched.decode_and_verify().unwrap(), b"hello block");
    }

    #[tokio::test]
    async fn retrieve_missing_block_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let hash = Hash::of(b"never stored");
        let err = backend.retrieve_block(&hash).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn store_block_is_idempotent() {
        // spec §8 property 3
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let block = sample_block(b"dedup me");

        backend.store_block(block.clone()).await.unwrap();
        backend.store_block(block.clone()).await.unwrap();

        let needed = backend.needed_hashes(&[block.hash]).await.unwrap();
        assert!(needed.is_empty());
    }

    #[tokio::test]
    async fn needed_hashes_preserves_order_and_dedups() {
        // spec §8 property 4, E5
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();

        let h1 = Hash::of(b"one");
        let h2 = Hash::of(b"two");
        let h3 = Hash::of(b"three");

        backend
            .store_block(Block::from_raw(b"two", CompressionKind::None).unwrap())
            .await
            .unwrap();

        let needed = backend.needed_hashes(&[h1, h2, h1, h3]).await.unwrap();
        assert_eq!(needed, vec![h1, h3]);
    }

    fn sample_meta(host: &str, path: &str, mtime: i64) -> FileMeta {
        FileMeta {
            host: host.into(),
            path: path.into(),
            name: path.trim_start_matches('/').into(),
            file_type: FileType::Regular,
            mode: 0o644,
            uid: 0,
            gid: 0,
            owner: "root".into(),
            group: "root".into(),
            inode: 1,
            size: 0,
            atime: mtime,
            ctime: mtime,
            mtime,
            link: None,
            hashes: vec![],
        }
    }

    #[tokio::test]
    async fn list_files_latest_only_e4() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();

        // spec §8 E4: three versions at 2022-06-01, 2022-12-15, 2023-05-01
        backend
            .store_filemeta(sample_meta("hostA", "/a.txt", 1654041600))
            .await
            .unwrap();
        backend
            .store_filemeta(sample_meta("hostA", "/a.txt", 1671062400))
            .await
            .unwrap();
        backend
            .store_filemeta(sample_meta("hostA", "/a.txt", 1683072000))
            .await
            .unwrap();

        let query = Query::new("hostA")
            .with_before_mtime(1672531200) // 2023-01-01
            .with_latest_only(true);

        let results = backend.list_files(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].mtime, 1671062400);
    }

    #[tokio::test]
    async fn store_filemeta_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();

        backend
            .store_filemeta(sample_meta("hostA", "/a.txt", 100))
            .await
            .unwrap();
        backend
            .store_filemeta(sample_meta("hostA", "/a.txt", 100))
            .await
            .unwrap();

        let all = backend.list_files(&Query::new("hostA")).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
