use anyhow::{Error as E, Result};
use candle_core::{Device, Tensor};
use serde_json::Value;

use crate::backend::RuntimeModel;
use crate::prompting::ChatMessage;

use super::decode::{decode_sequence, DecodeLimits};
use super::files::FileSource;
use super::tokenizer::{load_tokenizer, read_json, resolve_eos_ids};
use super::{CandleEngine, CompletionOutput, EngineError, EngineOptions, InferenceEngine, SamplingParams};

impl CandleEngine {
    /// Pick the device the engine runs on: Metal when built with it, otherwise
    /// CUDA ordinal 0 when available, otherwise the CPU.
    pub fn device() -> Result<Device> {
        #[cfg(feature = "metal")]
        {
            if candle_core::utils::metal_is_available() {
                return Ok(Device::new_metal(0)?);
            }
        }
        Ok(Device::cuda_if_available(0)?)
    }

    pub fn load(options: EngineOptions, device: Device) -> Result<Self> {
        options.validate()?;
        tracing::info!(
            model = %options.model,
            tokenizer = %options.tokenizer,
            dtype = ?options.dtype,
            max_model_len = options.max_model_len,
            gpu_memory_utilization = options.gpu_memory_utilization,
            "ENGINE: loading model"
        );
        if options.tensor_parallel_size > 1 {
            tracing::warn!(
                requested = options.tensor_parallel_size,
                "ENGINE: tensor parallelism is not available, running on a single device"
            );
        }

        let model_files = FileSource::resolve(&options.model, options.revision.as_deref())?;
        let config = read_json(&model_files.get("config.json")?)?;
        let generation_config = match model_files.get_optional("generation_config.json") {
            Some(path) => read_json(&path)?,
            None => Value::Null,
        };
        let weights = model_files.safetensors()?;
        let model = RuntimeModel::load(&config, &weights, options.dtype, &device)?;

        tracing::info!("ENGINE: weights loaded, loading tokenizer");
        let tokenizer_files =
            FileSource::resolve(&options.tokenizer, options.tokenizer_revision.as_deref())?;
        let bundle = load_tokenizer(&tokenizer_files)?;
        let eos_token_ids = resolve_eos_ids(
            &bundle.tokenizer,
            bundle.eos_token.as_deref(),
            &[&config, &generation_config],
        );
        tracing::info!(
            eos = ?eos_token_ids,
            chat_template = bundle.chat_template.is_some(),
            "ENGINE: model and tokenizer ready"
        );

        Ok(Self {
            model,
            tokenizer: bundle.tokenizer,
            chat_template: bundle.chat_template,
            device,
            eos_token_ids,
            max_model_len: options.max_model_len,
            seed: options.seed,
            requests_served: 0,
        })
    }

    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        Ok(self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(E::msg)?
            .get_ids()
            .to_vec())
    }

    fn generate_one(&mut self, prompt_tokens: &[u32], params: &SamplingParams) -> Result<CompletionOutput> {
        let seed = self.seed.wrapping_add(self.requests_served);
        self.requests_served += 1;
        let mut logits_processor = params.logits_processor(seed);

        self.model.clear_kv_cache()?;

        let limits = DecodeLimits {
            max_model_len: self.max_model_len,
            eos_token_ids: &self.eos_token_ids,
        };
        let device = &self.device;
        let tokenizer = &self.tokenizer;
        let model = &mut self.model;
        let output = decode_sequence(
            prompt_tokens,
            params,
            &limits,
            &mut logits_processor,
            |tokens, index_pos| {
                let input = Tensor::new(tokens, device)?.unsqueeze(0)?;
                model.forward(&input, index_pos)
            },
            |ids| tokenizer.decode(ids, true).map_err(E::msg),
        )?;

        tracing::debug!(
            prompt_len = prompt_tokens.len(),
            generated = output.token_ids.len(),
            cumulative_logprob = output.cumulative_logprob,
            "ENGINE: sequence finished"
        );
        Ok(output)
    }
}

impl InferenceEngine for CandleEngine {
    fn generate(&mut self, prompts: &[String], params: &SamplingParams) -> Result<Vec<CompletionOutput>> {
        let mut outputs = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let tokens = self.encode(prompt, true)?;
            outputs.push(self.generate_one(&tokens, params)?);
        }
        Ok(outputs)
    }

    fn chat(&mut self, conversations: &[Vec<ChatMessage>], params: &SamplingParams) -> Result<Vec<CompletionOutput>> {
        let mut outputs = Vec::with_capacity(conversations.len());
        for messages in conversations {
            let rendered = self
                .chat_template
                .as_ref()
                .ok_or(EngineError::MissingChatTemplate)?
                .render(messages)?;
            // The template already carries any BOS marker it wants.
            let tokens = self.encode(&rendered, false)?;
            outputs.push(self.generate_one(&tokens, params)?);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::CandleEngine;

    #[test]
    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    fn plain_build_runs_on_cpu() {
        assert!(CandleEngine::device().unwrap().is_cpu());
    }
}
