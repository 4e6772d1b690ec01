use anyhow::Result;
use clap::Parser;

use crate::harness::HarnessArgs;

/// Produce completions for a benchmark dataset with roughly any causal LM checkpoint.
#[derive(Parser, Debug)]
#[command(name = "automodel", version, about)]
pub struct Args {
    #[command(flatten)]
    pub harness: HarnessArgs,

    /// Model to load: a Hugging Face Hub id or a local checkpoint directory
    #[arg(long)]
    pub name: String,

    /// Model revision pin
    #[arg(long)]
    pub revision: Option<String>,

    /// Tokenizer to load, defaults to the model
    #[arg(long = "tokenizer_name")]
    pub tokenizer_name: Option<String>,

    /// Tokenizer revision pin
    #[arg(long = "tokenizer_revision")]
    pub tokenizer_revision: Option<String>,

    /// Use this instead of the name derived from --name for output files
    #[arg(long = "name-override")]
    pub name_override: Option<String>,

    /// Wrap each prompt in a chat with a "/nothink" system message
    #[arg(long = "use-qwen3-nothink-sysprompt")]
    pub use_qwen3_nothink_sysprompt: bool,

    /// Accelerator parallelism degree
    #[arg(long = "num-gpus", default_value_t = 1)]
    pub num_gpus: usize,

    /// Base sampling seed, random when omitted
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Model-side configuration, fixed once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    name: String,
    revision: Option<String>,
    tokenizer_name: String,
    tokenizer_revision: Option<String>,
    num_gpus: usize,
    use_nothink_sysprompt: bool,
    name_override: Option<String>,
    seed: u64,
}

impl ModelConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let seed = match args.seed {
            Some(seed) => seed,
            None => random_seed()?,
        };

        Ok(Self {
            name: args.name.clone(),
            revision: args.revision.clone(),
            tokenizer_name: args.tokenizer_name.clone().unwrap_or_else(|| args.name.clone()),
            tokenizer_revision: args.tokenizer_revision.clone(),
            num_gpus: args.num_gpus,
            use_nothink_sysprompt: args.use_qwen3_nothink_sysprompt,
            name_override: args.name_override.clone(),
            seed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn tokenizer_name(&self) -> &str {
        &self.tokenizer_name
    }

    pub fn tokenizer_revision(&self) -> Option<&str> {
        self.tokenizer_revision.as_deref()
    }

    pub fn num_gpus(&self) -> usize {
        self.num_gpus
    }

    pub fn use_nothink_sysprompt(&self) -> bool {
        self.use_nothink_sysprompt
    }

    pub fn name_override(&self) -> Option<&str> {
        self.name_override.as_deref()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

fn random_seed() -> Result<u64> {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow::anyhow!("failed to draw a random seed: {}", e))?;
    Ok(u64::from_le_bytes(buf))
}

/// Output name for result files: the override verbatim, otherwise the model
/// id with `/` and `-` turned into `_` (the harness rejects both).
pub fn derive_output_name(config: &ModelConfig) -> String {
    match config.name_override() {
        Some(name) => name.to_string(),
        None => config.name().replace(['/', '-'], "_"),
    }
}
