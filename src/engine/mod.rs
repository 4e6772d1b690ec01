mod chat_template;
mod decode;
mod files;
mod lifecycle;
mod sampling;
mod tokenizer;

use std::collections::HashSet;

use anyhow::Result;
use candle_core::{DType, Device};
use thiserror::Error;
use tokenizers::Tokenizer;

use crate::backend::RuntimeModel;
use crate::prompting::ChatMessage;

pub use chat_template::ChatTemplate;
pub use sampling::SamplingParams;

/// Context window every engine instance is bounded to.
pub const MAX_MODEL_LEN: usize = 2048;
/// Fraction of accelerator memory the engine is allowed to claim.
pub const GPU_MEMORY_UTILIZATION: f64 = 0.95;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported model architecture '{0}' (supported: llama, mistral, qwen2, qwen3)")]
    UnsupportedArchitecture(String),

    #[error("tokenizer has no chat template; chat prompts cannot be rendered")]
    MissingChatTemplate,

    #[error("prompt encodes to zero tokens")]
    EmptyPrompt,

    #[error("prompt is {prompt_len} tokens, which does not fit max_model_len={max_model_len}")]
    PromptTooLong { prompt_len: usize, max_model_len: usize },

    #[error("invalid engine option: {0}")]
    InvalidOption(String),
}

/// What the engine reports for one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutput {
    pub text: String,
    pub cumulative_logprob: f64,
    pub token_ids: Vec<u32>,
}

/// The two generation entry points the completion adapter relies on. Both
/// return exactly one output per input, in input order.
pub trait InferenceEngine {
    /// Free-form continuation of raw prompt text.
    fn generate(&mut self, prompts: &[String], params: &SamplingParams) -> Result<Vec<CompletionOutput>>;

    /// Continuation of conversations rendered through the model's chat template.
    fn chat(&mut self, conversations: &[Vec<ChatMessage>], params: &SamplingParams) -> Result<Vec<CompletionOutput>>;
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub model: String,
    pub tokenizer: String,
    pub dtype: DType,
    pub revision: Option<String>,
    pub tokenizer_revision: Option<String>,
    pub max_model_len: usize,
    pub tensor_parallel_size: usize,
    pub gpu_memory_utilization: f64,
    pub seed: u64,
}

impl EngineOptions {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tensor_parallel_size == 0 {
            return Err(EngineError::InvalidOption(
                "tensor_parallel_size must be >= 1".to_string(),
            ));
        }
        if !(self.gpu_memory_utilization > 0.0 && self.gpu_memory_utilization <= 1.0) {
            return Err(EngineError::InvalidOption(format!(
                "gpu_memory_utilization must be in (0, 1], got {}",
                self.gpu_memory_utilization
            )));
        }
        if self.max_model_len == 0 {
            return Err(EngineError::InvalidOption(
                "max_model_len must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Prefer bfloat16 when the device can run it, fall back to float16.
pub fn select_dtype(bf16_supported: bool) -> DType {
    if bf16_supported {
        DType::BF16
    } else {
        DType::F16
    }
}

/// Candle-backed engine holding a single loaded checkpoint.
pub struct CandleEngine {
    pub(super) model: RuntimeModel,
    pub(super) tokenizer: Tokenizer,
    pub(super) chat_template: Option<ChatTemplate>,
    pub(super) device: Device,
    pub(super) eos_token_ids: HashSet<u32>,
    pub(super) max_model_len: usize,
    pub(super) seed: u64,
    pub(super) requests_served: u64,
}

#[cfg(test)]
mod tests {
    use candle_core::DType;

    use super::{select_dtype, EngineError, EngineOptions, GPU_MEMORY_UTILIZATION, MAX_MODEL_LEN};

    fn options() -> EngineOptions {
        EngineOptions {
            model: "org/model".to_string(),
            tokenizer: "org/model".to_string(),
            dtype: DType::F16,
            revision: None,
            tokenizer_revision: None,
            max_model_len: MAX_MODEL_LEN,
            tensor_parallel_size: 1,
            gpu_memory_utilization: GPU_MEMORY_UTILIZATION,
            seed: 7,
        }
    }

    #[test]
    fn dtype_follows_bf16_support() {
        assert_eq!(select_dtype(false), DType::F16);
        assert_eq!(select_dtype(true), DType::BF16);
    }

    #[test]
    fn default_options_are_valid() {
        assert!(options().validate().is_ok());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let mut opts = options();
        opts.tensor_parallel_size = 0;
        assert!(matches!(opts.validate(), Err(EngineError::InvalidOption(_))));
    }

    #[test]
    fn memory_fraction_must_be_a_fraction() {
        let mut opts = options();
        opts.gpu_memory_utilization = 1.5;
        assert!(opts.validate().is_err());
        opts.gpu_memory_utilization = 0.0;
        assert!(opts.validate().is_err());
    }
}
