//! Server dispatcher (spec §4.7).
//!
//! Holds the two backend handles chosen by configuration and routes each
//! request type to the one that implements it: blocks go to `data`,
//! filemeta and queries go to `meta`. Construction is the only place
//! capability validation (C4) runs — once a `Dispatcher` exists, every
//! route on it is known to be implemented by some backend.

use crate::backend::{validate_capabilities, Backend, BackendError};
use cdp_proto::{Block, FileMeta, Hash, Query};
use std::sync::Arc;

pub struct Dispatcher {
    meta: Arc<dyn Backend>,
    data: Arc<dyn Backend>,
}

/// Coarse counts surfaced by the stats endpoint (§9 supplemented feature,
/// grounded in `libsauvegarde/database.c`'s row-count queries).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerStats {
    pub meta_backend_capabilities: crate::backend::BackendCapabilities,
    pub data_backend_capabilities: crate::backend::BackendCapabilities,
}

impl Dispatcher {
    pub fn new(meta: Arc<dyn Backend>, data: Arc<dyn Backend>) -> Result<Self, BackendError> {
        validate_capabilities(meta.capabilities(), data.capabilities())?;
        Ok(Dispatcher { meta, data })
    }

    pub async fn store_block(&self, block: Block) -> Result<(), BackendError> {
        self.route_for_store_block()
            .store_block(block)
            .await
            .map_err(BackendError::into_client_facing)
    }

    pub async fn store_filemeta(&self, record: FileMeta) -> Result<(), BackendError> {
        self.route_for_store_filemeta()
            .store_filemeta(record)
            .await
            .map_err(BackendError::into_client_facing)
    }

    pub async fn needed_hashes(&self, candidates: &[Hash]) -> Result<Vec<Hash>, BackendError> {
        self.route_for_needed_hashes()
            .needed_hashes(candidates)
            .await
            .map_err(BackendError::into_client_facing)
    }

    pub async fn retrieve_block(&self, hash: &Hash) -> Result<Block, BackendError> {
        self.route_for_retrieve_block()
            .retrieve_block(hash)
            .await
            .map_err(BackendError::into_client_facing)
    }

    pub async fn list_files(&self, query: &Query) -> Result<Vec<FileMeta>, BackendError> {
        self.route_for_list_files()
            .list_files(query)
            .await
            .map_err(BackendError::into_client_facing)
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            meta_backend_capabilities: self.meta.capabilities(),
            data_backend_capabilities: self.data.capabilities(),
        }
    }

    /// Release the backend handles. Dropping the last `Arc` clone is enough
    /// for in-process backends; this exists so callers have one place to
    /// hook future explicit-shutdown logic (e.g. flushing a connection pool).
    pub fn close(self) {
        drop(self.meta);
        drop(self.data);
    }

    fn route_for_store_block(&self) -> &Arc<dyn Backend> {
        if self.data.capabilities().store_block {
            &self.data
        } else {
            &self.meta
        }
    }

    fn route_for_store_filemeta(&self) -> &Arc<dyn Backend> {
        if self.meta.capabilities().store_filemeta {
            &self.meta
        } else {
            &self.data
        }
    }

    fn route_for_needed_hashes(&self) -> &Arc<dyn Backend> {
        if self.data.capabilities().needed_hashes {
            &self.data
        } else {
            &self.meta
        }
    }

    fn route_for_retrieve_block(&self) -> &Arc<dyn Backend> {
        if self.data.capabilities().retrieve_block {
            &self.data
        } else {
            &self.meta
        }
    }

    fn route_for_list_files(&self) -> &Arc<dyn Backend> {
        if self.meta.capabilities().list_files {
            &self.meta
        } else {
            &self.data
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::file_backend::FileBackend;

    async fn dispatcher_over_tempdir() -> (Dispatcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileBackend::new(dir.path()).unwrap());
        let dispatcher = Dispatcher::new(backend.clone(), backend).unwrap();
        (dispatcher, dir)
    }

    #[tokio::test]
    async fn construction_fails_when_capabilities_are_incomplete() {
        struct NoOp;
        #[async_trait::async_trait]
        impl Backend for NoOp {
            fn capabilities(&self) -> crate::backend::BackendCapabilities {
                Default::default()
            }
        }
        let noop: Arc<dyn Backend> = Arc::new(NoOp);
        let err = Dispatcher::new(noop.clone(), noop).unwrap_err();
        assert!(matches!(err, BackendError::MissingCapability(_)));
    }

    #[tokio::test]
    async fn round_trips_a_block_through_the_dispatcher() {
        let (dispatcher, _dir) = dispatcher_over_tempdir().await;
        let block = cdp_proto::Block::from_raw(b"dispatch me", cdp_proto::CompressionKind::None).unwrap();
        dispatcher.store_block(block.clone()).await.unwrap();
        let fetched = dispatcher.retrieve_block(&block.hash).await.unwrap();
        assert_eq!(fetched.hash, block.hash);
    }
}
