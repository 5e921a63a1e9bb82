//! OpenAI-compatible `/embeddings` client used by the Pinecone backend.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::RagError;

#[derive(Debug, Clone)]
pub struct Embedder {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl Embedder {
    pub fn new(
        url: String,
        model: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| RagError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url, model, api_key })
    }

    /// One vector per input, in input order.
    pub async fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let payload = EmbeddingRequest { model: &self.model, input: inputs };
        debug!(model = %self.model, inputs = inputs.len(), "requesting embeddings");

        let mut req = self.client.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(|e| {
            error!(url = %self.url, error = %e, "embedding request failed (transport)");
            RagError::from_transport(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Request(format!("embeddings HTTP {status}: {body}")));
        }

        let parsed = response
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| RagError::Request(format!("failed to parse embeddings response: {e}")))?;
        order_vectors(parsed, inputs.len())
    }
}

fn order_vectors(parsed: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, RagError> {
    let mut data = parsed.data;
    if data.len() != expected {
        return Err(RagError::Request(format!(
            "embeddings returned {} vectors for {expected} inputs",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_follow_input_order() {
        let body = r#"{"data":[{"index":1,"embedding":[0.5]},{"index":0,"embedding":[0.1,0.2]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        let vecs = order_vectors(parsed, 2).unwrap();
        assert_eq!(vecs, vec![vec![0.1, 0.2], vec![0.5]]);
    }

    #[test]
    fn count_mismatch_is_an_error() {
        let parsed: EmbeddingResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(order_vectors(parsed, 1).is_err());
    }

    #[tokio::test]
    async fn empty_input_makes_no_request() {
        let e = Embedder::new("http://127.0.0.1:9/v1/embeddings".into(), "m".into(), 1, None).unwrap();
        assert!(e.embed(&[]).await.unwrap().is_empty());
    }
}
