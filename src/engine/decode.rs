use std::collections::HashSet;

use anyhow::Result;
use candle_core::{Tensor, D};
use candle_transformers::generation::LogitsProcessor;

use super::{CompletionOutput, EngineError, SamplingParams};

/// Bounds a single sequence is decoded under.
pub(super) struct DecodeLimits<'a> {
    pub max_model_len: usize,
    pub eos_token_ids: &'a HashSet<u32>,
}

/// New tokens a prompt may receive: `min(max_tokens, max_model_len - prompt_len)`.
pub(super) fn token_budget(prompt_len: usize, max_tokens: usize, max_model_len: usize) -> Result<usize, EngineError> {
    if prompt_len == 0 {
        return Err(EngineError::EmptyPrompt);
    }
    if prompt_len >= max_model_len {
        return Err(EngineError::PromptTooLong {
            prompt_len,
            max_model_len,
        });
    }
    Ok(max_tokens.min(max_model_len - prompt_len))
}

/// Prefills the prompt, then feeds back one sampled token per step.
///
/// `forward` maps `(input tokens, position)` to next-token logits of shape
/// `[vocab]` in f32; `detokenize` renders generated ids as text. A sampled eos
/// id ends the sequence and is counted in ids and score but never rendered.
pub(super) fn decode_sequence<F, T>(
    prompt_tokens: &[u32],
    params: &SamplingParams,
    limits: &DecodeLimits<'_>,
    logits_processor: &mut LogitsProcessor,
    mut forward: F,
    mut detokenize: T,
) -> Result<CompletionOutput>
where
    F: FnMut(&[u32], usize) -> Result<Tensor>,
    T: FnMut(&[u32]) -> Result<String>,
{
    let budget = token_budget(prompt_tokens.len(), params.max_tokens, limits.max_model_len)?;

    let mut generated: Vec<u32> = Vec::with_capacity(budget);
    let mut cumulative_logprob = 0f64;
    let mut text = String::new();
    let mut index_pos = 0;
    let mut input_tokens = prompt_tokens.to_vec();

    while generated.len() < budget {
        let logits = forward(&input_tokens, index_pos)?;
        index_pos += input_tokens.len();

        let next_token = logits_processor.sample(&logits)?;
        let logprobs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        cumulative_logprob += logprobs.get(next_token as usize)?.to_scalar::<f32>()? as f64;
        generated.push(next_token);

        if limits.eos_token_ids.contains(&next_token) {
            break;
        }

        text = detokenize(&generated)?;
        if params.find_stop(&text).is_some() {
            break;
        }

        input_tokens = vec![next_token];
    }

    Ok(CompletionOutput {
        text,
        cumulative_logprob,
        token_ids: generated,
    })
}
