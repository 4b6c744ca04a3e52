pub mod completion;
pub mod embeddings;
pub mod vector_store;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::indexer::chunker::{split_text, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::indexer::extractor::{extract_text, SupportedFormat};
use crate::tasks::DocumentIngestor;
use self::completion::Completer;
use self::embeddings::Embedder;
use self::vector_store::{ChunkRecord, VectorIndex};

/// Number of chunks retrieved per question.
const TOP_K: u64 = 5;

/// Embedding requests are sent to the model in batches of this size.
const EMBED_BATCH_SIZE: usize = 32;

/// Returned verbatim when retrieval finds nothing or the model produces
/// an empty answer.
pub const NO_INFORMATION_FALLBACK: &str =
    "Sorry, I could not find relevant information to answer your question \
     in the available documents.";

/// Some model stacks report an empty retrieval result as this literal
/// string instead of an empty answer.
const EMPTY_RESPONSE_MARKER: &str = "Empty Response";

/// Ingestion and question answering over injected capabilities, so tests
/// can substitute fakes for the embedding model, index and LLM.
pub struct RagEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    completer: Arc<dyn Completer>,
}

impl RagEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        completer: Arc<dyn Completer>,
    ) -> Self {
        Self {
            embedder,
            index,
            completer,
        }
    }

    /// Chunk, embed and store one document under the given tenant.
    /// Returns the number of chunks written. A document with no
    /// extractable text is a successful no-op, not an error.
    ///
    /// All-or-nothing per invocation: any failure propagates to the
    /// caller, which owns the retry policy. Point ids are deterministic
    /// per (tenant, source, chunk index), so a retried invocation
    /// re-upserts the same points instead of duplicating them.
    pub async fn ingest_file(&self, path: &Path, tenant_id: Uuid, title: &str) -> Result<usize> {
        let format = SupportedFormat::from_path(path)
            .ok_or_else(|| anyhow::anyhow!("Unsupported file format: {}", path.display()))?;
        let text = extract_text(path, format)?;

        let passages = split_text(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
        if passages.is_empty() {
            tracing::warn!("No text extracted from {}", path.display());
            return Ok(0);
        }

        self.index.ensure_ready().await?;

        let tenant_tag = tenant_id.to_string();
        let source = path.to_string_lossy().to_string();
        let chunk_count = passages.len();

        for batch in passages.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = self.embedder.embed_batch(texts)?;

            let records: Vec<ChunkRecord> = batch
                .iter()
                .zip(vectors.into_iter())
                .map(|(passage, vector)| ChunkRecord {
                    id: chunk_point_id(&tenant_tag, &source, passage.index),
                    text: passage.text.clone(),
                    tenant_id: tenant_tag.clone(),
                    title: title.to_string(),
                    source: source.clone(),
                    vector,
                })
                .collect();

            self.index.upsert(records).await?;
        }

        tracing::info!(
            "Ingested {} chunks from {} for tenant {}",
            chunk_count,
            path.display(),
            tenant_tag
        );
        Ok(chunk_count)
    }

    /// Answer a question from the tenant's own chunks. Retrieval and
    /// completion errors propagate; answer normalization never fails.
    pub async fn answer(&self, question: &str, tenant_id: Uuid) -> Result<String> {
        self.index.ensure_ready().await?;

        let query_vector = self.embedder.embed(question)?;
        let hits = self
            .index
            .search(query_vector, &tenant_id.to_string(), TOP_K)
            .await?;

        if hits.is_empty() {
            tracing::info!("No chunks retrieved for tenant {}", tenant_id);
            return Ok(NO_INFORMATION_FALLBACK.to_string());
        }

        let prompt = build_prompt(question, &hits);
        let raw = self.completer.complete(&prompt).await?;

        Ok(normalize_answer(&raw))
    }
}

#[async_trait]
impl DocumentIngestor for RagEngine {
    async fn ingest_file(&self, path: &Path, tenant_id: Uuid, title: &str) -> Result<usize> {
        RagEngine::ingest_file(self, path, tenant_id, title).await
    }
}

/// Deterministic point id so retried ingestions overwrite rather than
/// duplicate previously written chunks.
fn chunk_point_id(tenant_tag: &str, source: &str, index: usize) -> Uuid {
    let name = format!("{}/{}/{}", tenant_tag, source, index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

fn build_prompt(question: &str, hits: &[vector_store::ScoredChunk]) -> String {
    let context = hits
        .iter()
        .map(|hit| hit.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Context information is below.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, \
         answer the query.\n\
         Query: {}\n\
         Answer:",
        context, question
    )
}

fn normalize_answer(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == EMPTY_RESPONSE_MARKER {
        NO_INFORMATION_FALLBACK.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::vector_store::{ChunkRecord, ScoredChunk, VectorIndex};
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Maps each text to a crude but deterministic vector so similar
    /// strings land near each other.
    struct FakeEmbedder;

    fn fake_vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        vec![
            lower.matches("rust").count() as f32,
            lower.matches("coffee").count() as f32,
            lower.matches("cat").count() as f32,
            1.0,
        ]
    }

    impl Embedder for FakeEmbedder {
        fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| fake_vector(t)).collect())
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed_batch(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("embedding service unavailable")
        }
    }

    /// In-memory stand-in for the shared collection, scored by dot
    /// product and filtered by the tenant tag like the real index.
    #[derive(Default)]
    struct FakeIndex {
        records: Mutex<Vec<ChunkRecord>>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn ensure_ready(&self) -> Result<()> {
            Ok(())
        }

        async fn upsert(&self, chunks: Vec<ChunkRecord>) -> Result<()> {
            let mut records = self.records.lock().unwrap();
            for chunk in chunks {
                records.retain(|existing| existing.id != chunk.id);
                records.push(chunk);
            }
            Ok(())
        }

        async fn search(
            &self,
            vector: Vec<f32>,
            tenant_id: &str,
            top_k: u64,
        ) -> Result<Vec<ScoredChunk>> {
            let records = self.records.lock().unwrap();
            let mut hits: Vec<ScoredChunk> = records
                .iter()
                .filter(|r| r.tenant_id == tenant_id)
                .map(|r| ScoredChunk {
                    text: r.text.clone(),
                    title: r.title.clone(),
                    score: r
                        .vector
                        .iter()
                        .zip(vector.iter())
                        .map(|(a, b)| a * b)
                        .sum(),
                })
                .collect();
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(top_k as usize);
            Ok(hits)
        }
    }

    struct CannedCompleter {
        reply: String,
    }

    #[async_trait]
    impl Completer for CannedCompleter {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.reply.clone())
        }
    }

    struct EchoPromptCompleter;

    #[async_trait]
    impl Completer for EchoPromptCompleter {
        async fn complete(&self, prompt: &str) -> Result<String> {
            Ok(prompt.to_string())
        }
    }

    fn engine_with(completer: Arc<dyn Completer>) -> (RagEngine, Arc<FakeIndex>) {
        let index = Arc::new(FakeIndex::default());
        let engine = RagEngine::new(Arc::new(FakeEmbedder), index.clone(), completer);
        (engine, index)
    }

    fn write_fixture(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", content).unwrap();
        path
    }

    #[tokio::test]
    async fn ingest_counts_and_tags_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "doc.txt", "Rust is a systems language.");
        let tenant = Uuid::new_v4();

        let (engine, index) = engine_with(Arc::new(CannedCompleter {
            reply: "ok".to_string(),
        }));
        let count = engine.ingest_file(&path, tenant, "Rust notes").await.unwrap();

        assert_eq!(count, 1);
        let records = index.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tenant_id, tenant.to_string());
        assert_eq!(records[0].title, "Rust notes");
    }

    #[tokio::test]
    async fn empty_document_returns_zero_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "blank.txt", "   \n\n  ");
        let tenant = Uuid::new_v4();

        let (engine, index) = engine_with(Arc::new(CannedCompleter {
            reply: "ok".to_string(),
        }));
        let count = engine.ingest_file(&path, tenant, "Blank").await.unwrap();

        assert_eq!(count, 0);
        assert!(index.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reingesting_the_same_file_does_not_duplicate_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "doc.txt", "Rust is a systems language.");
        let tenant = Uuid::new_v4();

        let (engine, index) = engine_with(Arc::new(CannedCompleter {
            reply: "ok".to_string(),
        }));
        engine.ingest_file(&path, tenant, "Rust notes").await.unwrap();
        engine.ingest_file(&path, tenant, "Rust notes").await.unwrap();

        assert_eq!(index.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "doc.txt", "Rust is a systems language.");

        let index = Arc::new(FakeIndex::default());
        let engine = RagEngine::new(
            Arc::new(FailingEmbedder),
            index.clone(),
            Arc::new(CannedCompleter {
                reply: "ok".to_string(),
            }),
        );

        let result = engine.ingest_file(&path, Uuid::new_v4(), "Doc").await;
        assert!(result.is_err());
        assert!(index.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tenants_never_see_each_others_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let alice_doc = write_fixture(&dir, "alice.txt", "Alice brews coffee every morning.");
        let bob_doc = write_fixture(&dir, "bob.txt", "Bob writes Rust in the evening.");
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (engine, _) = engine_with(Arc::new(EchoPromptCompleter));
        engine.ingest_file(&alice_doc, alice, "Alice").await.unwrap();
        engine.ingest_file(&bob_doc, bob, "Bob").await.unwrap();

        // Bob asks about coffee; the only coffee chunk belongs to Alice,
        // so it must not leak into Bob's prompt.
        let answer = engine.answer("who brews coffee", bob).await.unwrap();
        assert!(!answer.contains("Alice brews coffee"));
        assert!(answer.contains("Bob writes Rust"));

        let answer = engine.answer("who brews coffee", alice).await.unwrap();
        assert!(answer.contains("Alice brews coffee"));
    }

    #[tokio::test]
    async fn empty_tenant_gets_exact_fallback() {
        let (engine, _) = engine_with(Arc::new(CannedCompleter {
            reply: "should never be called".to_string(),
        }));

        let answer = engine.answer("anything", Uuid::new_v4()).await.unwrap();
        assert_eq!(answer, NO_INFORMATION_FALLBACK);
    }

    #[tokio::test]
    async fn empty_response_marker_becomes_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "doc.txt", "Rust is a systems language.");
        let tenant = Uuid::new_v4();

        let (engine, _) = engine_with(Arc::new(CannedCompleter {
            reply: "  Empty Response  ".to_string(),
        }));
        engine.ingest_file(&path, tenant, "Doc").await.unwrap();

        let answer = engine.answer("what is rust", tenant).await.unwrap();
        assert_eq!(answer, NO_INFORMATION_FALLBACK);
    }

    #[tokio::test]
    async fn blank_completion_becomes_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "doc.txt", "Rust is a systems language.");
        let tenant = Uuid::new_v4();

        let (engine, _) = engine_with(Arc::new(CannedCompleter {
            reply: "   ".to_string(),
        }));
        engine.ingest_file(&path, tenant, "Doc").await.unwrap();

        let answer = engine.answer("what is rust", tenant).await.unwrap();
        assert_eq!(answer, NO_INFORMATION_FALLBACK);
    }

    #[tokio::test]
    async fn real_answers_are_trimmed_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "doc.txt", "Rust is a systems language.");
        let tenant = Uuid::new_v4();

        let (engine, _) = engine_with(Arc::new(CannedCompleter {
            reply: "  Rust is a systems language.  ".to_string(),
        }));
        engine.ingest_file(&path, tenant, "Doc").await.unwrap();

        let answer = engine.answer("what is rust", tenant).await.unwrap();
        assert_eq!(answer, "Rust is a systems language.");
    }

    #[test]
    fn prompt_contains_context_and_question() {
        let hits = vec![ScoredChunk {
            text: "Chunk one.".to_string(),
            title: "Doc".to_string(),
            score: 1.0,
        }];
        let prompt = build_prompt("what is this", &hits);
        assert!(prompt.contains("Chunk one."));
        assert!(prompt.contains("Query: what is this"));
    }

    #[test]
    fn point_ids_are_stable_per_chunk() {
        let a = chunk_point_id("tenant", "file.pdf", 0);
        let b = chunk_point_id("tenant", "file.pdf", 0);
        let c = chunk_point_id("tenant", "file.pdf", 1);
        let d = chunk_point_id("other", "file.pdf", 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
