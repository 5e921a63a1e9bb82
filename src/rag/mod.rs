//! Single-hop knowledge-base retrieval.
//!
//! A [`Retriever`] answers one similarity query with the top-k snippets and
//! accepts [`KbChunk`] upserts from the ingest path. Two backends exist: a
//! SQLite FTS5 index on local disk and a hosted Pinecone index queried with
//! embeddings.

#[cfg(feature = "idocstore")]
pub mod docstore;
pub mod embed;
pub mod ingest;
pub mod pinecone;

use serde::Serialize;
use thiserror::Error;

use crate::config::{RagConfig, Secrets};

pub use ingest::{IngestOptions, IngestStats, KbChunk, chunk_document, ingest_dir, load_markdown_docs};

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RagError {
    #[error("retrieval misconfigured: {0}")]
    Config(String),
    #[error("knowledge store error: {0}")]
    Store(String),
    #[error("retrieval request failed: {0}")]
    Request(String),
    #[error("retrieval request timed out: {0}")]
    Timeout(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RagError::Timeout(e.to_string())
        } else {
            RagError::Request(e.to_string())
        }
    }
}

// ── Hits ──────────────────────────────────────────────────────────────────────

/// One retrieved snippet. Higher `score` is more relevant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub source: String,
    pub chunk_index: usize,
    pub text: String,
}

/// Render hits as the context block handed to the model.
pub fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| format!("- ({:.3}) {}#{}\n{}", h.score, h.source, h.chunk_index, h.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Retriever ─────────────────────────────────────────────────────────────────

/// Enum dispatch over the configured backend.
#[derive(Debug, Clone)]
pub enum Retriever {
    #[cfg(feature = "idocstore")]
    Local(docstore::DocStore),
    Pinecone(pinecone::PineconeIndex),
}

impl Retriever {
    pub fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "idocstore")]
            Retriever::Local(_) => "local",
            Retriever::Pinecone(_) => "pinecone",
        }
    }

    /// Top `top_k` snippets for `query`. A blank query returns no hits.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, RagError> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        match self {
            #[cfg(feature = "idocstore")]
            Retriever::Local(store) => {
                let store = store.clone();
                let query = query.to_string();
                tokio::task::spawn_blocking(move || store.search(&query, top_k))
                    .await
                    .map_err(|e| RagError::Store(format!("search task failed: {e}")))?
            }
            Retriever::Pinecone(index) => index.search(query, top_k).await,
        }
    }

    /// Insert or replace `chunks` by id. Returns the number written.
    pub async fn upsert(&self, chunks: &[KbChunk]) -> Result<usize, RagError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        match self {
            #[cfg(feature = "idocstore")]
            Retriever::Local(store) => {
                let store = store.clone();
                let chunks = chunks.to_vec();
                tokio::task::spawn_blocking(move || store.upsert(&chunks))
                    .await
                    .map_err(|e| RagError::Store(format!("upsert task failed: {e}")))?
            }
            Retriever::Pinecone(index) => index.upsert(chunks).await,
        }
    }
}

/// Build the configured retriever; `backend = "none"` yields `None`.
pub fn build(config: &RagConfig, secrets: &Secrets) -> Result<Option<Retriever>, RagError> {
    match config.backend.as_str() {
        "none" | "" => Ok(None),
        #[cfg(feature = "idocstore")]
        "local" => Ok(Some(Retriever::Local(docstore::DocStore::open(&config.local_dir)?))),
        #[cfg(not(feature = "idocstore"))]
        "local" => Err(RagError::Config(
            "backend 'local' needs the idocstore feature".into(),
        )),
        "pinecone" => {
            let api_key = secrets
                .pinecone_api_key
                .clone()
                .ok_or_else(|| RagError::Config("PINECONE_API_KEY is not set".into()))?;
            if config.pinecone.index_host.is_empty() {
                return Err(RagError::Config("[rag.pinecone] index_host is empty".into()));
            }
            let embedder = embed::Embedder::new(
                config.embedding.url.clone(),
                config.embedding.model.clone(),
                config.embedding.timeout_seconds,
                secrets.embedding_api_key.clone(),
            )?;
            let index = pinecone::PineconeIndex::new(
                config.pinecone.index_host.clone(),
                config.pinecone.namespace.clone(),
                api_key,
                config.embedding.timeout_seconds,
                embedder,
            )?;
            Ok(Some(Retriever::Pinecone(index)))
        }
        other => Err(RagError::Config(format!("unknown backend '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn hits_render_with_score_and_location() {
        let hits = vec![
            SearchHit { score: 0.91234, source: "db.md".into(), chunk_index: 3, text: "raise pool\n".into() },
            SearchHit { score: 0.5, source: "net.md".into(), chunk_index: 0, text: "check dns".into() },
        ];
        assert_eq!(format_hits(&hits), "- (0.912) db.md#3\nraise pool\n\n- (0.500) net.md#0\ncheck dns");
        assert_eq!(format_hits(&[]), "");
    }

    #[test]
    fn none_backend_builds_nothing() {
        let cfg = Config::offline().unwrap();
        assert!(build(&cfg.rag, &Secrets::default()).unwrap().is_none());
    }

    #[test]
    fn pinecone_without_key_is_a_config_error() {
        let mut cfg = Config::offline().unwrap().rag;
        cfg.backend = "pinecone".into();
        cfg.pinecone.index_host = "https://kb.svc.pinecone.io".into();
        let err = build(&cfg, &Secrets::default()).unwrap_err();
        assert!(err.to_string().contains("PINECONE_API_KEY"));
    }

    #[test]
    fn pinecone_without_host_is_a_config_error() {
        let mut cfg = Config::offline().unwrap().rag;
        cfg.backend = "pinecone".into();
        let secrets = Secrets { pinecone_api_key: Some("pc-key".into()), ..Secrets::default() };
        assert!(matches!(build(&cfg, &secrets), Err(RagError::Config(_))));
    }

    #[tokio::test]
    async fn blank_query_short_circuits() {
        let mut cfg = Config::offline().unwrap().rag;
        cfg.backend = "pinecone".into();
        cfg.pinecone.index_host = "http://127.0.0.1:9".into();
        let secrets = Secrets { pinecone_api_key: Some("pc-key".into()), ..Secrets::default() };
        let retriever = build(&cfg, &secrets).unwrap().unwrap();
        assert_eq!(retriever.name(), "pinecone");
        assert!(retriever.search("   ", 3).await.unwrap().is_empty());
        assert_eq!(retriever.upsert(&[]).await.unwrap(), 0);
    }
}
