//! Pinecone data-plane client: `POST /query` and `POST /vectors/upsert`.
//!
//! Vector metadata carries `source`, `chunk_index`, `text` and `doc_type`,
//! which is all a [`SearchHit`] needs, so no second lookup is made.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error};

use super::embed::Embedder;
use super::{KbChunk, RagError, SearchHit};

const API_VERSION: &str = "2024-07";

#[derive(Debug, Clone)]
pub struct PineconeIndex {
    client: Client,
    index_host: String,
    namespace: String,
    api_key: String,
    embedder: Embedder,
}

impl PineconeIndex {
    pub fn new(
        index_host: String,
        namespace: String,
        api_key: String,
        timeout_seconds: u64,
        embedder: Embedder,
    ) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| RagError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, index_host, namespace, api_key, embedder })
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, RagError> {
        let vector = self
            .embedder
            .embed(&[query])
            .await?
            .pop()
            .ok_or_else(|| RagError::Request("no embedding returned for query".into()))?;

        let payload = QueryRequest {
            vector,
            top_k,
            namespace: (!self.namespace.is_empty()).then_some(self.namespace.as_str()),
            include_metadata: true,
        };
        let parsed: QueryResponse = self.post("/query", &payload).await?;
        debug!(matches = parsed.matches.len(), "pinecone query answered");
        Ok(parsed.matches.into_iter().map(hit_from_match).collect())
    }

    pub async fn upsert(&self, chunks: &[KbChunk]) -> Result<usize, RagError> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let records: Vec<Value> = chunks
            .iter()
            .zip(vectors)
            .map(|(c, values)| {
                json!({
                    "id": c.id,
                    "values": values,
                    "metadata": {
                        "source": c.source,
                        "chunk_index": c.chunk_index,
                        "text": c.text,
                        "doc_type": c.doc_type,
                    },
                })
            })
            .collect();

        let mut payload = json!({ "vectors": records });
        if !self.namespace.is_empty() {
            payload["namespace"] = Value::String(self.namespace.clone());
        }
        let parsed: UpsertResponse = self.post("/vectors/upsert", &payload).await?;
        Ok(parsed.upserted_count.unwrap_or(chunks.len()))
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, RagError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.index_host);
        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(%url, error = %e, "pinecone request failed (transport)");
                RagError::from_transport(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %url, "pinecone returned HTTP error");
            return Err(RagError::Request(format!("pinecone HTTP {status}: {body}")));
        }
        response
            .json::<R>()
            .await
            .map_err(|e| RagError::Request(format!("failed to parse pinecone response: {e}")))
    }
}

fn hit_from_match(m: QueryMatch) -> SearchHit {
    let meta = m.metadata.unwrap_or_default();
    let text_of = |key: &str| meta.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    // Pinecone stores numeric metadata as floats.
    let chunk_index = meta
        .get("chunk_index")
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .unwrap_or(0) as usize;
    let source = text_of("source");
    SearchHit {
        score: m.score,
        source: if source.is_empty() { m.id } else { source },
        chunk_index,
        text: text_of("text"),
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: Vec<f32>,
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: Option<usize>,
}
