use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::Knowledge;

/// Capability implemented by the RAG engine: chunk, embed and store one
/// document, returning the chunk count.
#[async_trait]
pub trait DocumentIngestor: Send + Sync {
    async fn ingest_file(&self, path: &Path, tenant_id: Uuid, title: &str) -> Result<usize>;
}

/// Capability implemented by the metadata store: record one ingested
/// document. Called strictly after ingestion succeeds.
#[async_trait]
pub trait KnowledgeSink: Send + Sync {
    async fn create_knowledge(&self, user_id: Uuid, title: &str) -> Result<Knowledge>;
}

#[derive(Debug, Error)]
pub enum IngestTaskError {
    /// The source file disappeared before the task ran. Permanent: the
    /// input will not reappear on retry.
    #[error("Source file not found: {}", .0.display())]
    MissingInput(PathBuf),
}

/// Terminal state of one ingestion task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { chunk_count: usize },
    MissingInput,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub cleanup_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            cleanup_retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Fire-and-forget ingestion: returns the task handle immediately and
/// never blocks the caller on completion.
pub fn schedule_ingest(
    ingestor: Arc<dyn DocumentIngestor>,
    sink: Arc<dyn KnowledgeSink>,
    tenant_id: Uuid,
    path: PathBuf,
    title: String,
    policy: RetryPolicy,
) -> JoinHandle<TaskOutcome> {
    tokio::spawn(run_ingest(ingestor, sink, tenant_id, path, title, policy))
}

/// Execute one ingestion task to a terminal state.
///
/// The Knowledge record is created only after ingestion succeeds, so a
/// visible record always implies indexed content. Any error from the
/// pipeline or the record write is retried with exponential backoff up
/// to `max_retries` times; re-ingestion on retry is safe because chunk
/// upserts are idempotent. The source file is removed on every terminal
/// path, and cleanup failures never change the reported outcome.
async fn run_ingest(
    ingestor: Arc<dyn DocumentIngestor>,
    sink: Arc<dyn KnowledgeSink>,
    tenant_id: Uuid,
    path: PathBuf,
    title: String,
    policy: RetryPolicy,
) -> TaskOutcome {
    if !path.exists() {
        tracing::error!("{}", IngestTaskError::MissingInput(path.clone()));
        return TaskOutcome::MissingInput;
    }

    let mut attempt = 0;
    let outcome = loop {
        match ingest_once(&*ingestor, &*sink, tenant_id, &path, &title).await {
            Ok(chunk_count) => break TaskOutcome::Succeeded { chunk_count },
            Err(e) if attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                attempt += 1;
                tracing::warn!(
                    "Ingestion attempt {} for {} failed, retrying in {:?}: {}",
                    attempt,
                    path.display(),
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::error!(
                    "Ingestion of {} failed after {} attempts: {}",
                    path.display(),
                    attempt + 1,
                    e
                );
                break TaskOutcome::Exhausted;
            }
        }
    };

    cleanup_source_file(&path, &policy).await;
    outcome
}

async fn ingest_once(
    ingestor: &dyn DocumentIngestor,
    sink: &dyn KnowledgeSink,
    tenant_id: Uuid,
    path: &Path,
    title: &str,
) -> Result<usize> {
    let chunk_count = ingestor.ingest_file(path, tenant_id, title).await?;
    sink.create_knowledge(tenant_id, title).await?;
    Ok(chunk_count)
}

/// Best-effort removal of the uploaded file. Retries once after a short
/// delay, then gives up; failures are logged and swallowed so they can
/// never mask the ingestion result.
async fn cleanup_source_file(path: &Path, policy: &RetryPolicy) {
    if !path.exists() {
        return;
    }

    if let Err(first) = tokio::fs::remove_file(path).await {
        tracing::warn!("Failed to remove {}: {}", path.display(), first);
        tokio::time::sleep(policy.cleanup_retry_delay).await;
        if let Err(second) = tokio::fs::remove_file(path).await {
            tracing::warn!("Giving up on removing {}: {}", path.display(), second);
        }
    }
}
