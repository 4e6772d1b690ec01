use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use automodel_completions::cli::{derive_output_name, Args, ModelConfig};
use automodel_completions::completions::CompletionModel;
use automodel_completions::harness::make_main;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = ModelConfig::from_args(&args)?;

    let mut model = CompletionModel::load(&config)?;
    let name = derive_output_name(&config);
    tracing::info!(model = config.name(), output_name = %name, seed = config.seed(), "ready");

    make_main(&args.harness, &name, |prompts, max_tokens, temperature, top_p, stop| {
        model.completions(prompts, max_tokens, temperature, top_p, stop)
    })
}
