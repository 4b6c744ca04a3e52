use anyhow::Result;
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

pub const EMBEDDING_DIM: u64 = 384;

/// One embedded passage headed for the shared collection. The metadata
/// tag (`tenant_id`, `title`, `source`) is the only tenant partition in
/// the index, so every record must carry it.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub text: String,
    pub tenant_id: String,
    pub title: String,
    pub source: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub text: String,
    pub title: String,
    pub score: f32,
}

/// Contract over the shared vector index: idempotent collection setup,
/// upsert with metadata, tenant-filtered similarity search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn ensure_ready(&self) -> Result<()>;

    async fn upsert(&self, chunks: Vec<ChunkRecord>) -> Result<()>;

    async fn search(
        &self,
        vector: Vec<f32>,
        tenant_id: &str,
        top_k: u64,
    ) -> Result<Vec<ScoredChunk>>;
}

pub struct QdrantIndex {
    client: Qdrant,
    collection_name: String,
}

impl QdrantIndex {
    pub fn connect(url: &str, collection_name: &str) -> Result<Self> {
        tracing::info!("Building Qdrant client for URL: {}", url);
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| anyhow::anyhow!("Qdrant client build failed: {}", e))?;

        Ok(Self {
            client,
            collection_name: collection_name.to_string(),
        })
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_ready(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection_name).await? {
            return Ok(());
        }

        let created = self
            .client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name)
                    .vectors_config(VectorParamsBuilder::new(EMBEDDING_DIM, Distance::Cosine)),
            )
            .await;

        if let Err(e) = created {
            // Another worker may have created it between the check and
            // the create call; re-check before treating this as fatal.
            if self.client.collection_exists(&self.collection_name).await? {
                tracing::debug!("Collection created concurrently: {}", self.collection_name);
                return Ok(());
            }
            return Err(e.into());
        }

        tracing::info!("Created Qdrant collection: {}", self.collection_name);
        Ok(())
    }

    async fn upsert(&self, chunks: Vec<ChunkRecord>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = chunks
            .into_iter()
            .map(|chunk| {
                let mut payload = JsonMap::new();
                payload.insert("text".to_string(), JsonValue::String(chunk.text));
                payload.insert("tenant_id".to_string(), JsonValue::String(chunk.tenant_id));
                payload.insert("title".to_string(), JsonValue::String(chunk.title));
                payload.insert("source".to_string(), JsonValue::String(chunk.source));
                PointStruct::new(chunk.id.to_string(), chunk.vector, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points))
            .await?;

        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        tenant_id: &str,
        top_k: u64,
    ) -> Result<Vec<ScoredChunk>> {
        let filter = Filter::must([Condition::matches("tenant_id", tenant_id.to_string())]);

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection_name, vector, top_k)
                    .filter(filter)
                    .with_payload(true),
            )
            .await?;

        let mut results = Vec::new();
        for point in response.result {
            let text = point
                .payload
                .get("text")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let title = point
                .payload
                .get("title")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_default();

            if let Some(text) = text {
                results.push(ScoredChunk {
                    text,
                    title,
                    score: point.score,
                });
            }
        }

        Ok(results)
    }
}
