//! Benchmark driver: reads problems, asks a completion callback for as many
//! completions as each problem still needs, and saves them per problem.

mod dataset;
mod store;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use thiserror::Error;

use crate::completions::Completion;

pub use dataset::{load_problems, Problem};
pub use store::CompletionsFile;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("model name '{0}' must not contain hyphens")]
    InvalidModelName(String),

    #[error("completion callback returned {got} results for a batch of {expected}")]
    CompletionCountMismatch { expected: usize, got: usize },

    #[error("malformed dataset row at line {line}: {detail}")]
    MalformedDataset { line: usize, detail: String },
}

/// Flags every completion binary shares.
#[derive(Args, Debug, Clone)]
pub struct HarnessArgs {
    /// Directory for the per-problem result files, derived from the dataset,
    /// model name and temperature when omitted
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Parent directory for the output directory
    #[arg(long = "output-dir-prefix")]
    pub output_dir_prefix: Option<PathBuf>,

    /// Problems as a JSON array or JSON Lines file
    #[arg(long)]
    pub dataset: PathBuf,

    #[arg(long)]
    pub temperature: f64,

    /// Index of the first problem to process
    #[arg(long = "input-start-index")]
    pub input_start_index: Option<usize>,

    /// Number of problems to process
    #[arg(long = "input-limit")]
    pub input_limit: Option<usize>,

    /// Completions wanted per problem
    #[arg(long = "completion-limit", default_value_t = 200)]
    pub completion_limit: usize,

    /// Prompts per call to the model
    #[arg(long = "batch-size", default_value_t = 16)]
    pub batch_size: usize,

    /// Text prepended to every prompt before it is sent to the model
    #[arg(long = "prompt-prefix")]
    pub prompt_prefix: Option<String>,

    #[arg(long = "max-tokens", default_value_t = 1024)]
    pub max_tokens: usize,

    #[arg(long = "top-p", default_value_t = 0.95)]
    pub top_p: f64,
}

/// Cuts `text` at the earliest occurrence of any stop string.
pub fn stop_at_stop_token<'a>(text: &'a str, stop_tokens: &[String]) -> &'a str {
    let end = stop_tokens
        .iter()
        .filter_map(|stop| text.find(stop.as_str()))
        .min()
        .unwrap_or(text.len());
    &text[..end]
}

/// Renders a float the way result directory names have always spelled it
/// (`0.2`, `1.0`).
fn format_temperature(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn output_dir(args: &HarnessArgs, model_name: &str) -> PathBuf {
    let dir = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => {
            let file_name = args
                .dataset
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("dataset");
            let stem = file_name.split('.').next().unwrap_or(file_name);
            PathBuf::from(format!(
                "{}-{}-{}",
                stem,
                model_name,
                format_temperature(args.temperature)
            ))
        }
    };

    match &args.output_dir_prefix {
        Some(prefix) => prefix.join(dir),
        None => dir,
    }
}

/// Drives a full run. `completions_fn` receives `(prompts, max_tokens,
/// temperature, top_p, stop)` and must return one completion per prompt, in order.
pub fn make_main<F>(args: &HarnessArgs, model_name: &str, mut completions_fn: F) -> Result<()>
where
    F: FnMut(&[String], usize, f64, f64, &[String]) -> Result<Vec<Completion>>,
{
    if model_name.contains('-') {
        return Err(HarnessError::InvalidModelName(model_name.to_string()).into());
    }

    let exp_dir = output_dir(args, model_name);
    std::fs::create_dir_all(&exp_dir)
        .with_context(|| format!("failed to create {}", exp_dir.display()))?;

    let problems = dataset::select_range(
        load_problems(&args.dataset)?,
        args.input_start_index,
        args.input_limit,
    );

    let mut records = problems
        .iter()
        .map(|p| store::read_or_create(&exp_dir, p, args.temperature, args.top_p, args.max_tokens))
        .collect::<Result<Vec<_>>>()?;

    let queue = pending_work(&records, args.completion_limit);
    let batch_size = args.batch_size.max(1);
    let total_batches = queue.len().div_ceil(batch_size);
    tracing::info!(
        output_dir = %exp_dir.display(),
        problems = records.len(),
        pending = queue.len(),
        batches = total_batches,
        "HARNESS: starting"
    );

    for (batch_idx, batch) in queue.chunks(batch_size).enumerate() {
        let prompts: Vec<String> = batch
            .iter()
            .map(|&i| match &args.prompt_prefix {
                Some(prefix) => format!("{}{}", prefix, records[i].prompt),
                None => records[i].prompt.clone(),
            })
            .collect();
        let stop = records[batch[0]].stop_tokens.clone();

        let results = completions_fn(&prompts, args.max_tokens, args.temperature, args.top_p, &stop)?;
        if results.len() != batch.len() {
            return Err(HarnessError::CompletionCountMismatch {
                expected: batch.len(),
                got: results.len(),
            }
            .into());
        }

        let mut modified: Vec<usize> = Vec::new();
        for (&i, completion) in batch.iter().zip(results) {
            let record = &mut records[i];
            record.completions.push(completion.text);
            record.tokens.push(completion.token_ids);
            record.cumlogprobs.push(completion.score);
            if !modified.contains(&i) {
                modified.push(i);
            }
        }
        for i in modified {
            store::write(&exp_dir, &records[i])?;
        }

        tracing::info!(batch = batch_idx + 1, of = total_batches, "HARNESS: batch saved");
    }

    Ok(())
}

/// Indices into `records`, one per completion still owed.
fn pending_work(records: &[CompletionsFile], completion_limit: usize) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .flat_map(|(i, r)| std::iter::repeat(i).take(completion_limit.saturating_sub(r.completions.len())))
        .collect()
}
