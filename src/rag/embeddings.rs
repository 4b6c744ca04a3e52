use std::path::Path;

use anyhow::Result;
use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};

use super::vector_store::EMBEDDING_DIM;

/// Text-to-vector capability. Ingestion and question answering must use
/// the same implementation or retrieval quality silently degrades.
pub trait Embedder: Send + Sync {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(vec![text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedding model returned no vector"))
    }
}

/// Local ONNX embedding model loaded through fastembed.
pub struct FastembedEmbedder {
    model: TextEmbedding,
}

impl FastembedEmbedder {
    pub fn load(model_dir: &Path) -> Result<Self> {
        tracing::info!("Loading embedding model from {}", model_dir.display());

        if !model_dir.exists() {
            anyhow::bail!("Model directory not found: {}", model_dir.display());
        }

        let read = |name: &str| -> Result<Vec<u8>> {
            std::fs::read(model_dir.join(name))
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", name, e))
        };

        let user_model = UserDefinedEmbeddingModel {
            onnx_file: read("model.onnx")?,
            tokenizer_files: TokenizerFiles {
                tokenizer_file: read("tokenizer.json")?,
                config_file: read("config.json")?,
                special_tokens_map_file: read("special_tokens_map.json")?,
                tokenizer_config_file: read("tokenizer_config.json")?,
            },
        };

        let model =
            TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
                .map_err(|e| anyhow::anyhow!("Failed to initialize embedding model: {}", e))?;

        // Probe once so a model with the wrong vector width fails here
        // instead of surfacing later as an upsert error.
        let probe = model.embed(vec!["dimension probe".to_string()], None)?;
        check_dimension(probe.first().map(|v| v.len()).unwrap_or(0))?;

        tracing::info!("Embedding model ready");
        Ok(Self { model })
    }
}

fn check_dimension(dims: usize) -> Result<()> {
    if dims as u64 != EMBEDDING_DIM {
        anyhow::bail!(
            "Embedding model produces {}-dim vectors, collection expects {}",
            dims,
            EMBEDDING_DIM
        );
    }
    Ok(())
}

impl Embedder for FastembedEmbedder {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let vectors = self.model.embed(texts, None)?;
        Ok(vectors)
    }
}
