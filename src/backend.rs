use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{llama, mistral, qwen2, qwen3};
use serde::Deserialize;
use serde_json::Value;

use crate::engine::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Llama,
    Mistral,
    Qwen2,
    Qwen3,
}

#[derive(Deserialize)]
struct ArchitectureProbe {
    model_type: Option<String>,
}

impl Architecture {
    /// Reads `model_type` from a Hugging Face `config.json`.
    pub fn detect(config: &Value) -> Result<Self, EngineError> {
        let probe = ArchitectureProbe::deserialize(config)
            .map_err(|e| EngineError::UnsupportedArchitecture(format!("unreadable config: {}", e)))?;
        let model_type = probe.model_type.unwrap_or_default();

        match model_type.as_str() {
            "llama" => Ok(Self::Llama),
            "mistral" => Ok(Self::Mistral),
            "qwen2" => Ok(Self::Qwen2),
            "qwen3" => Ok(Self::Qwen3),
            other => Err(EngineError::UnsupportedArchitecture(other.to_string())),
        }
    }
}

pub enum RuntimeModel {
    Llama {
        model: llama::Llama,
        config: llama::Config,
        cache: llama::Cache,
        dtype: DType,
        device: Device,
    },
    Mistral(mistral::Model),
    Qwen2(qwen2::ModelForCausalLM),
    Qwen3(qwen3::ModelForCausalLM),
}

impl RuntimeModel {
    pub fn load(
        config: &Value,
        weights: &[PathBuf],
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let arch = Architecture::detect(config)?;
        tracing::info!(?arch, ?dtype, shards = weights.len(), "loading weights");

        // SAFETY: the safetensors files are not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(weights, dtype, device)? };

        let model = match arch {
            Architecture::Llama => {
                let cfg: llama::LlamaConfig = serde_json::from_value(config.clone())
                    .context("invalid llama config.json")?;
                let config = cfg.into_config(false);
                let model = llama::Llama::load(vb, &config)?;
                let cache = llama::Cache::new(true, dtype, &config, device)?;
                Self::Llama {
                    model,
                    config,
                    cache,
                    dtype,
                    device: device.clone(),
                }
            }
            Architecture::Mistral => {
                let cfg: mistral::Config = serde_json::from_value(config.clone())
                    .context("invalid mistral config.json")?;
                Self::Mistral(mistral::Model::new(&cfg, vb)?)
            }
            Architecture::Qwen2 => {
                let cfg: qwen2::Config = serde_json::from_value(config.clone())
                    .context("invalid qwen2 config.json")?;
                Self::Qwen2(qwen2::ModelForCausalLM::new(&cfg, vb)?)
            }
            Architecture::Qwen3 => {
                let cfg: qwen3::Config = serde_json::from_value(config.clone())
                    .context("invalid qwen3 config.json")?;
                Self::Qwen3(qwen3::ModelForCausalLM::new(&cfg, vb)?)
            }
        };

        Ok(model)
    }

    /// Runs `input` (shape `[1, seq]`) starting at `position` and returns the
    /// f32 logits of the last position as a 1-D tensor.
    pub fn forward(&mut self, input: &Tensor, position: usize) -> Result<Tensor> {
        let logits = match self {
            Self::Llama { model, cache, .. } => model.forward(input, position, cache)?,
            Self::Mistral(model) => model.forward(input, position)?,
            Self::Qwen2(model) => model.forward(input, position)?,
            Self::Qwen3(model) => model.forward(input, position)?,
        };
        Ok(logits.flatten_all()?.to_dtype(DType::F32)?)
    }

    /// Drops all KV state so the next sequence starts from position zero.
    pub fn clear_kv_cache(&mut self) -> Result<()> {
        match self {
            Self::Llama {
                config,
                cache,
                dtype,
                device,
                ..
            } => {
                *cache = llama::Cache::new(true, *dtype, config, device)?;
            }
            Self::Mistral(model) => model.clear_kv_cache(),
            Self::Qwen2(model) => model.clear_kv_cache(),
            Self::Qwen3(model) => model.clear_kv_cache(),
        }
        Ok(())
    }
}
