//! Construction of the shared components from a [`Config`].
//!
//! Everything is built once here and handed out as `Arc`s; nothing is
//! created lazily behind a global. The document cache maintenance loop only
//! runs between [`Services::start_maintenance`] and [`Services::shutdown`].

use std::sync::Arc;

use ragcache_core::chunk::Chunker;
use ragcache_core::embedding::EmbeddingProvider;
use ragcache_core::store::VectorStore;
use ragcache_core::Result;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::document_cache::{DocumentCache, DocumentCacheOptions, MaintenanceHandle};
use crate::embedding_cache::{EmbeddingCache, EmbeddingCacheOptions};
use crate::ingest::Ingestor;
use crate::retriever::Retriever;
use crate::store::open_store;

pub struct Services {
    pub config: Config,
    pub embeddings: Arc<EmbeddingCache>,
    pub documents: Arc<DocumentCache>,
    pub store: Arc<dyn VectorStore>,
    pub ingestor: Ingestor,
    pub retriever: Retriever,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl Services {
    /// Build every component. The provider is passed in so callers (and
    /// tests) decide which one backs the embedding cache.
    pub async fn build(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        let dims = provider.dims();

        let embeddings = Arc::new(
            EmbeddingCache::open(provider, EmbeddingCacheOptions::from_config(&config)).await?,
        );
        let documents =
            Arc::new(DocumentCache::open(DocumentCacheOptions::from_config(&config)).await?);
        let store = open_store(&config.vector_store, dims).await?;

        let chunker = Chunker::new(config.chunking.chunker_config())?;
        let ingestor = Ingestor::new(chunker, embeddings.clone(), store.clone())
            .with_document_cache(documents.clone());
        let retriever = Retriever::new(embeddings.clone(), store.clone(), &config.retrieval);

        info!(
            model = embeddings.model_name(),
            dims,
            backend = store.backend(),
            "services ready"
        );
        Ok(Self {
            config,
            embeddings,
            documents,
            store,
            ingestor,
            retriever,
            maintenance: Mutex::new(None),
        })
    }

    /// Start the periodic document cache sweep. Calling it again while the
    /// loop runs is a no-op.
    pub async fn start_maintenance(&self) {
        let mut slot = self.maintenance.lock().await;
        if slot.is_none() {
            let interval = self.config.cache.cleanup_interval();
            *slot = Some(self.documents.start_maintenance(interval));
        }
    }

    pub async fn maintenance_running(&self) -> bool {
        self.maintenance.lock().await.is_some()
    }

    /// Stop background work. Caches are already durable after every write.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.maintenance.lock().await.take() {
            handle.stop().await;
        }
        info!("services shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use ragcache_core::models::SourceDocument;
    use tempfile::TempDir;

    fn config(tmp: &TempDir, backend: &str) -> Config {
        let mut config = Config::default();
        config.cache.document_dir = tmp.path().join("document_cache");
        config.cache.embedding_dir = tmp.path().join("embeddings_cache");
        config.vector_store.path = tmp.path().join("band_docs");
        config.vector_store.backend = backend.to_string();
        config.embedding.dims = 8;
        config.retrieval.min_score = -1.0;
        config
    }

    #[tokio::test]
    async fn test_build_ingest_retrieve() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MockProvider::new(8));
        let services = Services::build(config(&tmp, "flat"), provider.clone())
            .await
            .unwrap();

        let doc = SourceDocument::new("bio.md", "The band formed in a garage.");
        services.ingestor.ingest(&doc).await.unwrap();

        let passages = services
            .retriever
            .retrieve("The band formed in a garage.", 3)
            .await
            .unwrap();
        assert_eq!(passages[0].record_id, "bio.md#0");
        assert!(services.documents.get("bio.md").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_maintenance_start_and_shutdown() {
        let tmp = TempDir::new().unwrap();
        let services = Services::build(config(&tmp, "sqlite"), Arc::new(MockProvider::new(8)))
            .await
            .unwrap();
        assert!(!services.maintenance_running().await);
        services.start_maintenance().await;
        services.start_maintenance().await;
        assert!(services.maintenance_running().await);
        services.shutdown().await;
        assert!(!services.maintenance_running().await);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp, "flat");
        cfg.chunking.overlap = cfg.chunking.chunk_size;
        let result = Services::build(cfg, Arc::new(MockProvider::new(8))).await;
        assert!(result.is_err());
    }
}
