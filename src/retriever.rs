//! Query-time retrieval: embed the query through the cache, search the
//! store, keep what is relevant enough.

use std::sync::Arc;
use std::time::Duration;

use ragcache_core::models::ScoredPassage;
use ragcache_core::store::VectorStore;
use ragcache_core::{Error, Result};
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::embedding_cache::{EmbedOptions, EmbeddingCache};

/// Rendered in place of passages when nothing relevant was found.
pub const NO_CONTEXT: &str = "No relevant context available.";

pub struct Retriever {
    embeddings: Arc<EmbeddingCache>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
    min_score: f32,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        embeddings: Arc<EmbeddingCache>,
        store: Arc<dyn VectorStore>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embeddings,
            store,
            top_k: config.top_k,
            min_score: config.min_score,
            timeout: config.timeout(),
        }
    }

    /// Default number of passages when the caller does not ask for one.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Up to `k` passages for `query`, most relevant first, each scoring at
    /// least the configured `min_score`.
    ///
    /// A blank query or an empty store returns no passages without calling
    /// the embedding provider.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>> {
        self.retrieve_with(query, k, EmbedOptions::default()).await
    }

    pub async fn retrieve_with(
        &self,
        query: &str,
        k: usize,
        options: EmbedOptions,
    ) -> Result<Vec<ScoredPassage>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if self.store.is_empty().await? {
            debug!("vector store is empty, nothing to retrieve");
            return Ok(Vec::new());
        }

        let vector = self.embeddings.embed_query_with(query, options).await?;
        let hits = tokio::time::timeout(self.timeout, self.store.search(&vector, k))
            .await
            .map_err(|_| Error::Timeout {
                operation: "vector store search",
                after: self.timeout,
            })??;

        let passages: Vec<ScoredPassage> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.min_score)
            .map(|hit| ScoredPassage {
                record_id: hit.record.id,
                text: hit.record.text,
                metadata: hit.record.metadata,
                score: hit.score,
            })
            .collect();
        debug!(k, returned = passages.len(), "retrieval finished");
        Ok(passages)
    }

    /// Like [`retrieve`](Self::retrieve), but a broken store or cache
    /// degrades to "no context" instead of failing the request. Provider
    /// failures and timeouts still propagate.
    pub async fn retrieve_or_degrade(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>> {
        self.retrieve_or_degrade_with(query, k, EmbedOptions::default())
            .await
    }

    pub async fn retrieve_or_degrade_with(
        &self,
        query: &str,
        k: usize,
        options: EmbedOptions,
    ) -> Result<Vec<ScoredPassage>> {
        match self.retrieve_with(query, k, options).await {
            Ok(passages) => Ok(passages),
            Err(e) if e.is_provider_outage() => Err(e),
            Err(e) => {
                warn!(error = %e, backend = self.store.backend(), "retrieval failed, continuing without context");
                Ok(Vec::new())
            }
        }
    }
}

/// Display name for a passage's source.
pub fn passage_title(passage: &ScoredPassage) -> &str {
    passage
        .metadata
        .title
        .as_deref()
        .unwrap_or(passage.record_id.as_str())
}

/// Render passages as a prompt context block.
pub fn format_context(passages: &[ScoredPassage]) -> String {
    if passages.is_empty() {
        return NO_CONTEXT.to_string();
    }
    passages
        .iter()
        .map(|p| {
            format!(
                "[Source: {} (Relevance: {:.2})]\n{}",
                passage_title(p),
                p.score,
                p.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding_cache::EmbeddingCacheOptions;
    use crate::testing::{mock_vector, MockProvider};
    use async_trait::async_trait;
    use ragcache_core::models::{Metadata, VectorRecord};
    use ragcache_core::store::memory::InMemoryVectorStore;
    use ragcache_core::store::{DeleteSupport, SearchHit};
    use tempfile::TempDir;

    const DIMS: usize = 16;

    fn retrieval_config(min_score: f32) -> RetrievalConfig {
        RetrievalConfig {
            top_k: 3,
            min_score,
            timeout_secs: 5,
        }
    }

    async fn cache(tmp: &TempDir, provider: &Arc<MockProvider>) -> Arc<EmbeddingCache> {
        let options = EmbeddingCacheOptions {
            dir: tmp.path().to_path_buf(),
            batch_size: 10,
            timeout: Duration::from_secs(5),
        };
        Arc::new(EmbeddingCache::open(provider.clone(), options).await.unwrap())
    }

    async fn seeded_store(texts: &[&str]) -> Arc<InMemoryVectorStore> {
        let store = InMemoryVectorStore::new(DIMS);
        let records = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut r = VectorRecord::new(format!("doc#{}", i), mock_vector(t, DIMS), *t);
                r.metadata = Metadata::with_title(format!("Doc {}", i));
                r
            })
            .collect();
        store.add(records).await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_empty_store_returns_nothing_without_embedding() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MockProvider::new(DIMS));
        let store = Arc::new(InMemoryVectorStore::new(DIMS));
        let retriever = Retriever::new(cache(&tmp, &provider).await, store, &retrieval_config(0.0));

        assert!(retriever.retrieve("anything", 3).await.unwrap().is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_query_returns_nothing() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MockProvider::new(DIMS));
        let store = seeded_store(&["tour dates"]).await;
        let retriever = Retriever::new(cache(&tmp, &provider).await, store, &retrieval_config(0.0));

        assert!(retriever.retrieve("   ", 3).await.unwrap().is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MockProvider::new(DIMS));
        let store = seeded_store(&["tour dates", "album credits", "merch prices"]).await;
        let retriever =
            Retriever::new(cache(&tmp, &provider).await, store, &retrieval_config(-1.0));

        let passages = retriever.retrieve("album credits", 2).await.unwrap();
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].record_id, "doc#1");
        assert!((passages[0].score - 1.0).abs() < 1e-5);
        assert!(passages[0].score >= passages[1].score);
    }

    #[tokio::test]
    async fn test_min_score_filters() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MockProvider::new(DIMS));
        let store = seeded_store(&["tour dates", "album credits", "merch prices"]).await;
        let retriever =
            Retriever::new(cache(&tmp, &provider).await, store, &retrieval_config(0.999));

        let passages = retriever.retrieve("merch prices", 3).await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "merch prices");
    }

    #[tokio::test]
    async fn test_uncached_query_embeds_every_time() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MockProvider::new(DIMS));
        let store = seeded_store(&["tour dates", "album credits"]).await;
        let embeddings = cache(&tmp, &provider).await;
        let retriever = Retriever::new(embeddings.clone(), store, &retrieval_config(-1.0));

        for _ in 0..2 {
            let passages = retriever
                .retrieve_with("album credits", 1, EmbedOptions::uncached())
                .await
                .unwrap();
            assert_eq!(passages[0].record_id, "doc#1");
        }
        assert_eq!(provider.call_count(), 2);
        assert!(embeddings.is_empty().await);
    }

    #[tokio::test]
    async fn test_provider_failure_propagates_in_degrade_mode() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MockProvider::new(DIMS));
        provider.set_failing(true);
        let store = seeded_store(&["tour dates"]).await;
        let retriever = Retriever::new(cache(&tmp, &provider).await, store, &retrieval_config(0.0));

        let err = retriever.retrieve_or_degrade("tour", 3).await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }

    /// Store whose search fails or stalls.
    struct BrokenStore {
        stall: Option<Duration>,
    }

    #[async_trait]
    impl VectorStore for BrokenStore {
        fn backend(&self) -> &'static str {
            "broken"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        fn delete_support(&self) -> DeleteSupport {
            DeleteSupport::Unsupported
        }
        async fn add(&self, _records: Vec<VectorRecord>) -> Result<()> {
            Ok(())
        }
        async fn search(&self, _query: &[f32], _k: usize) -> Result<Vec<SearchHit>> {
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            Err(Error::storage("index unreadable"))
        }
        async fn delete(&self, _id: &str) -> Result<bool> {
            Ok(false)
        }
        async fn ids_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn len(&self) -> Result<usize> {
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_empty() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MockProvider::new(DIMS));
        let store = Arc::new(BrokenStore { stall: None });
        let retriever = Retriever::new(cache(&tmp, &provider).await, store, &retrieval_config(0.0));

        assert!(retriever.retrieve("tour", 3).await.is_err());
        let passages = retriever.retrieve_or_degrade("tour", 3).await.unwrap();
        assert!(passages.is_empty());
        assert_eq!(format_context(&passages), NO_CONTEXT);
    }

    #[tokio::test]
    async fn test_store_timeout_is_distinct() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(MockProvider::new(DIMS));
        let store = Arc::new(BrokenStore {
            stall: Some(Duration::from_millis(500)),
        });
        let mut retriever =
            Retriever::new(cache(&tmp, &provider).await, store, &retrieval_config(0.0));
        retriever.timeout = Duration::from_millis(20);

        let err = retriever.retrieve_or_degrade("tour", 3).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                operation: "vector store search",
                ..
            }
        ));
    }

    #[test]
    fn test_format_context() {
        let passages = vec![
            ScoredPassage {
                record_id: "a#0".into(),
                text: "Formed in 2009.".into(),
                metadata: Metadata::with_title("Band History"),
                score: 0.8734,
            },
            ScoredPassage {
                record_id: "b#2".into(),
                text: "Second album.".into(),
                metadata: Metadata::default(),
                score: 0.5,
            },
        ];
        assert_eq!(
            format_context(&passages),
            "[Source: Band History (Relevance: 0.87)]\nFormed in 2009.\n\n\
             [Source: b#2 (Relevance: 0.50)]\nSecond album."
        );
        assert_eq!(format_context(&[]), NO_CONTEXT);
    }
}
