//! Retrieval Collaborator — top-K similar reference snippets from Qdrant.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("retrieval service unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },
}

/// A reference snippet returned by vector search. Consumed read-only by the
/// pipeline and discarded after the stage completes; never persisted.
#[derive(Debug, Clone)]
pub struct Snippet {
    pub text: String,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Returns the `top_k` snippets most similar to `vector`, creating the
    /// named collection (cosine distance, dimensionality of the query) on
    /// first use.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Snippet>, RetrievalError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    payload: serde_json::Value,
}

/// Qdrant REST retriever.
pub struct QdrantRetriever {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection_ready: OnceCell<()>,
}

impl QdrantRetriever {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
            api_key,
            collection_ready: OnceCell::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    /// Creates the collection if it does not exist yet, sized to the query
    /// vector's dimensionality.
    async fn ensure_collection(
        &self,
        collection: &str,
        vector_size: usize,
    ) -> Result<(), RetrievalError> {
        let exists = self
            .request(reqwest::Method::GET, &format!("/collections/{collection}"))
            .send()
            .await?;
        if exists.status().is_success() {
            return Ok(());
        }

        info!("creating retrieval collection '{collection}' ({vector_size} dims)");
        let response = self
            .request(reqwest::Method::PUT, &format!("/collections/{collection}"))
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Unavailable {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Retriever for QdrantRetriever {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Snippet>, RetrievalError> {
        self.collection_ready
            .get_or_try_init(|| self.ensure_collection(collection, vector.len()))
            .await?;

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/search"),
            )
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Unavailable {
                status: status.as_u16(),
                message,
            });
        }

        let body: SearchResponse = response.json().await?;
        Ok(body
            .result
            .into_iter()
            .map(|hit| {
                let text = hit
                    .payload
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                Snippet {
                    text,
                    metadata: hit.payload,
                }
            })
            .collect())
    }
}
