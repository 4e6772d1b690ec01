use anyhow::{Error as E, Result};

use crate::cli::ModelConfig;
use crate::engine::{
    select_dtype, CandleEngine, CompletionOutput, EngineOptions, InferenceEngine, SamplingParams,
    GPU_MEMORY_UTILIZATION, MAX_MODEL_LEN,
};
use crate::harness::stop_at_stop_token;
use crate::prompting::{PromptBatch, PromptMode};

/// One finished completion as handed to the harness.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Generated text, cut at the first stop string.
    pub text: String,
    /// Cumulative log-probability over the whole generation, including any
    /// tokens past the stop string.
    pub score: f64,
    /// Every generated token id, including any past the stop string.
    pub token_ids: Vec<u32>,
}

/// Owns an inference engine and turns harness prompt batches into completions.
pub struct CompletionModel<T: InferenceEngine> {
    engine: T,
    mode: PromptMode,
}

impl CompletionModel<CandleEngine> {
    /// Loads the checkpoint named by `config`. Blocking; failure is fatal to the caller.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let device = CandleEngine::device()?;
        let dtype = select_dtype(device.supports_bf16());
        let options = EngineOptions {
            model: config.name().to_string(),
            tokenizer: config.tokenizer_name().to_string(),
            dtype,
            revision: config.revision().map(str::to_string),
            tokenizer_revision: config.tokenizer_revision().map(str::to_string),
            max_model_len: MAX_MODEL_LEN,
            tensor_parallel_size: config.num_gpus(),
            gpu_memory_utilization: GPU_MEMORY_UTILIZATION,
            seed: config.seed(),
        };
        let engine = CandleEngine::load(options, device)?;
        Ok(Self::new(engine, PromptMode::from_nothink_flag(config.use_nothink_sysprompt())))
    }
}

impl<T: InferenceEngine> CompletionModel<T> {
    pub fn new(engine: T, mode: PromptMode) -> Self {
        Self { engine, mode }
    }

    pub fn completions(
        &mut self,
        prompts: &[String],
        max_tokens: usize,
        temperature: f64,
        top_p: f64,
        stop: &[String],
    ) -> Result<Vec<Completion>> {
        let params = SamplingParams {
            temperature,
            top_p,
            max_tokens,
            stop: stop.to_vec(),
        };

        let outputs = match self.mode.format(prompts) {
            PromptBatch::Plain(texts) => self.engine.generate(&texts, &params)?,
            PromptBatch::Chat(conversations) => self.engine.chat(&conversations, &params)?,
        };

        if outputs.len() != prompts.len() {
            return Err(E::msg(format!(
                "engine returned {} outputs for {} prompts",
                outputs.len(),
                prompts.len()
            )));
        }

        Ok(outputs
            .into_iter()
            .map(|CompletionOutput { text, cumulative_logprob, token_ids }| Completion {
                text: stop_at_stop_token(&text, stop).to_string(),
                score: cumulative_logprob,
                token_ids,
            })
            .collect())
    }
}
