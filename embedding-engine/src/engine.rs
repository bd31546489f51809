use crate::assets::ModelAssets;
use crate::Embedder;
use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use mindfeed_core::{CoreError, EmbeddingError, ModelConfig};
use serde::Deserialize;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// The one field of `config.json` the engine needs; candle keeps its own copy private.
#[derive(Debug, Deserialize)]
struct ModelDims {
    hidden_size: usize,
}

fn hidden_size(raw_config: &str) -> Result<usize, serde_json::Error> {
    serde_json::from_str::<ModelDims>(raw_config).map(|dims| dims.hidden_size)
}

struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    hidden_size: usize,
}

/// Sentence embeddings from a local BERT checkpoint, loaded on first use.
pub struct EmbeddingEngine {
    assets: ModelAssets,
    max_tokens: usize,
    loaded: OnceCell<Arc<LoadedModel>>,
}

impl EmbeddingEngine {
    pub fn new(assets: ModelAssets, max_tokens: usize) -> Self {
        Self {
            assets,
            max_tokens: max_tokens.max(2),
            loaded: OnceCell::new(),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(ModelAssets::from_config(config), config.max_tokens)
    }

    async fn model(&self) -> Result<Arc<LoadedModel>, CoreError> {
        let loaded = self
            .loaded
            .get_or_try_init(|| async {
                self.assets.require()?;
                let assets = self.assets.clone();
                let model = tokio::task::spawn_blocking(move || load_model(&assets))
                    .await
                    .map_err(|e| CoreError::internal(format!("model loader panicked: {}", e)))??;
                Ok::<_, CoreError>(Arc::new(model))
            })
            .await?;
        Ok(loaded.clone())
    }
}

fn load_failed(assets: &ModelAssets) -> impl Fn(String) -> EmbeddingError + '_ {
    move |reason| {
        debug!("Model load error: {}", reason);
        EmbeddingError::ModelLoadingFailed {
            model_path: assets.dir().display().to_string(),
        }
    }
}

fn load_model(assets: &ModelAssets) -> Result<LoadedModel, EmbeddingError> {
    let fail = load_failed(assets);
    info!("Loading embedding model from {}", assets.dir().display());

    let device = Device::Cpu;
    let raw_config =
        std::fs::read_to_string(assets.config_path()).map_err(|e| fail(e.to_string()))?;
    let config: BertConfig = serde_json::from_str(&raw_config).map_err(|e| fail(e.to_string()))?;
    let dims = hidden_size(&raw_config).map_err(|e| fail(e.to_string()))?;

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[assets.weights_path()], DTYPE, &device)
            .map_err(|e| fail(e.to_string()))?
    };
    let model = BertModel::load(vb, &config).map_err(|e| fail(e.to_string()))?;
    let tokenizer =
        Tokenizer::from_file(assets.tokenizer_path()).map_err(|e| fail(e.to_string()))?;

    info!("Embedding model ready ({} dims)", dims);
    Ok(LoadedModel {
        model,
        tokenizer,
        device,
        hidden_size: dims,
    })
}

fn embed(loaded: &LoadedModel, text: &str, max_tokens: usize) -> Result<Vec<f32>, EmbeddingError> {
    let inference = |e: candle_core::Error| EmbeddingError::InferenceFailed {
        reason: e.to_string(),
    };

    let encoding = loaded
        .tokenizer
        .encode(text, true)
        .map_err(|_| EmbeddingError::TokenizationFailed {
            text_length: text.len(),
        })?;

    let mut ids = encoding.get_ids().to_vec();
    let mut type_ids = encoding.get_type_ids().to_vec();
    if ids.len() > max_tokens {
        // Keep the trailing [SEP]
        let sep = ids[ids.len() - 1];
        ids.truncate(max_tokens - 1);
        ids.push(sep);
        type_ids.truncate(max_tokens);
    }
    let n_tokens = ids.len();

    let input_ids = Tensor::new(ids.as_slice(), &loaded.device)
        .and_then(|t| t.unsqueeze(0))
        .map_err(inference)?;
    let token_type_ids = Tensor::new(type_ids.as_slice(), &loaded.device)
        .and_then(|t| t.unsqueeze(0))
        .map_err(inference)?;

    let output = loaded
        .model
        .forward(&input_ids, &token_type_ids)
        .map_err(inference)?;

    // Mean over tokens, then L2 normalise
    let pooled = (output.sum(1).map_err(inference)? / n_tokens as f64).map_err(inference)?;
    let norm = pooled
        .sqr()
        .and_then(|t| t.sum_keepdim(1))
        .and_then(|t| t.sqrt())
        .map_err(inference)?;
    let normalized = pooled.broadcast_div(&norm).map_err(inference)?;

    let vector: Vec<f32> = normalized
        .squeeze(0)
        .and_then(|t| t.to_vec1())
        .map_err(inference)?;

    if vector.len() != loaded.hidden_size {
        return Err(EmbeddingError::DimensionMismatch {
            expected: loaded.hidden_size,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

#[async_trait]
impl Embedder for EmbeddingEngine {
    async fn ensure_ready(&self) -> Result<(), CoreError> {
        self.model().await.map(|_| ())
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput.into());
        }

        let loaded = self.model().await?;
        let text = text.to_string();
        let max_tokens = self.max_tokens;
        let vector = tokio::task::spawn_blocking(move || embed(&loaded, &text, max_tokens))
            .await
            .map_err(|e| CoreError::internal(format!("embedding task panicked: {}", e)))??;
        Ok(vector)
    }

    fn dimension(&self) -> Option<usize> {
        self.loaded.get().map(|m| m.hidden_size)
    }
}
