// Location: src/model/loader.rs

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::Cache;

use super::{Gpt2Config, Gpt2Model, Gpt2Runtime, TextTokenizer};
use crate::bounds::PAD_TOKEN_ID;
use crate::config::ModelConfig;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Files making up one model checkpoint on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

/// Locates model files (a local directory or the Hugging Face hub cache)
/// and builds a [`Gpt2Runtime`] from them.
#[derive(Debug, Clone)]
pub struct ModelLoader {
    model_id: String,
    cache_dir: Option<PathBuf>,
}

impl ModelLoader {
    pub fn new(model_id: impl Into<String>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            model_id: model_id.into(),
            cache_dir,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.model_id.clone(), config.cache_dir.clone())
    }

    /// Resolve the checkpoint files without touching the network: either
    /// `model_id` is a local directory, or every file must already be in the
    /// hub cache.
    pub fn resolve(&self) -> Result<ModelFiles> {
        let local = Path::new(&self.model_id);
        if local.is_dir() {
            tracing::info!(path = %local.display(), "loading model from local directory");
            return resolve_local(local);
        }

        let cache = match &self.cache_dir {
            Some(dir) => Cache::new(dir.clone()),
            None => Cache::default(),
        };
        tracing::info!(
            model = %self.model_id,
            cache = %cache.path().display(),
            "loading model from hub cache"
        );
        let repo = cache.model(self.model_id.clone());
        let cached = |name: &str| {
            repo.get(name).ok_or_else(|| {
                anyhow!(
                    "{} for '{}' not found in {}",
                    name,
                    self.model_id,
                    cache.path().display()
                )
            })
        };

        let config = cached(CONFIG_FILE)?;
        let tokenizer = cached(TOKENIZER_FILE)?;
        let weights = match repo.get(WEIGHTS_FILE) {
            Some(path) => vec![path],
            None => {
                let index = cached(WEIGHTS_INDEX_FILE)
                    .context("cache holds neither model.safetensors nor a shard index")?;
                shard_names(&index)?
                    .iter()
                    .map(|name| cached(name.as_str()))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        Ok(ModelFiles {
            config,
            tokenizer,
            weights,
        })
    }

    /// Resolve the files and build the runtime on `device`
    pub fn load(&self, device: &Device) -> Result<Gpt2Runtime> {
        let files = self.resolve()?;
        load_files(&files, device)
    }
}

fn resolve_local(dir: &Path) -> Result<ModelFiles> {
    let config = existing(dir.join(CONFIG_FILE))?;
    let tokenizer = existing(dir.join(TOKENIZER_FILE))?;

    let single = dir.join(WEIGHTS_FILE);
    let weights = if single.is_file() {
        vec![single]
    } else {
        let index = existing(dir.join(WEIGHTS_INDEX_FILE))
            .context("directory holds neither model.safetensors nor a shard index")?;
        shard_names(&index)?
            .into_iter()
            .map(|name| existing(dir.join(name)))
            .collect::<Result<Vec<_>>>()?
    };

    Ok(ModelFiles {
        config,
        tokenizer,
        weights,
    })
}

fn existing(path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(anyhow!("missing model file {}", path.display()))
    }
}

/// Distinct shard file names listed in a safetensors index, in order
fn shard_names(index: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(index)
        .with_context(|| format!("failed to read {}", index.display()))?;
    let json: serde_json::Value = serde_json::from_str(&raw)?;
    let weight_map = json
        .get("weight_map")
        .and_then(|map| map.as_object())
        .ok_or_else(|| anyhow!("{} has no weight_map", index.display()))?;

    let shards: BTreeSet<String> = weight_map
        .values()
        .filter_map(|file| file.as_str().map(str::to_string))
        .collect();
    if shards.is_empty() {
        return Err(anyhow!("{} lists no shards", index.display()));
    }
    Ok(shards.into_iter().collect())
}

/// Build a runtime from resolved checkpoint files
pub fn load_files(files: &ModelFiles, device: &Device) -> Result<Gpt2Runtime> {
    let raw = fs::read_to_string(&files.config)
        .with_context(|| format!("failed to read {}", files.config.display()))?;
    let config = Gpt2Config::from_json(&raw).context("unsupported model config")?;
    tracing::info!(
        vocab_size = config.vocab_size,
        n_layer = config.n_layer,
        n_embd = config.n_embd,
        context = config.n_positions,
        "parsed model config"
    );

    let tokenizer = TextTokenizer::from_file(&files.tokenizer)?;

    tracing::info!(shards = files.weights.len(), "loading safetensors weights");
    // Safety: the weight files are not modified while the model is alive.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, DType::F32, device)? };
    let model = Gpt2Model::load(vb, &config).context("failed to build the model graph")?;

    Ok(Gpt2Runtime::new(model, tokenizer, PAD_TOKEN_ID))
}
