use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use convnet::prelude::*;

/// Evaluate a convolutional network on one input sample.
///
/// Prints the model summary, the sample label, the output vector and the
/// index of its largest value.
#[derive(Parser, Debug)]
#[command(name = "convnet-infer", version)]
struct Cli {
    /// Model description (.json)
    #[arg(long)]
    model: PathBuf,

    /// A sample .safetensors file or a directory of them
    #[arg(long)]
    data: PathBuf,

    /// Index of the sample to evaluate
    #[arg(long, default_value_t = 0)]
    item: usize,

    /// Largest convolution workspace in bytes
    #[arg(long, value_name = "BYTES", conflicts_with = "no_workspace")]
    workspace_limit: Option<usize>,

    /// Only use convolution algorithms that need no workspace
    #[arg(long)]
    no_workspace: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn context_config(&self) -> ContextConfig {
        let preference = if self.no_workspace {
            ConvolutionPreference::NoWorkspace
        } else if let Some(limit) = self.workspace_limit {
            ConvolutionPreference::WorkspaceLimit(limit)
        } else {
            ConvolutionPreference::PreferFastest
        };
        ContextConfig::new().convolution_preference(preference)
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let ctx = args
        .context_config()
        .init::<InferenceBackend>(Default::default());

    let mut model = ModelGraph::load(&args.model, ctx)
        .with_context(|| format!("loading model {}", args.model.display()))?;

    let source = SafetensorsDataSource::open(&args.data)
        .with_context(|| format!("opening data {}", args.data.display()))?;
    let sample = source
        .get(args.item)
        .with_context(|| format!("reading item {}", args.item))?;
    let input = sample.to_nchw()?;
    let shape = input
        .feature_shape()
        .context("sample did not convert to a 4-D feature map")?;

    model
        .configure(shape)
        .with_context(|| format!("configuring model for input {}", shape))?;
    let output = model.evaluate_host(&input).context("evaluating model")?;

    println!("{}", model);
    println!("item {} of {}: {}", args.item, source.len(), sample.label);
    println!("output {:?}: {:?}", output.shape(), output.data());
    if let Some(best) = output.argmax() {
        println!("argmax: {}", best);
    }
    Ok(())
}
