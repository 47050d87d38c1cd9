use std::path::PathBuf;

use clap::Parser;
use text_orienter::{OrienterConfig, build_orienter};

#[derive(Parser)]
struct Cli {
    /// Image holding a single text line.
    #[arg(short, long, value_name = "FILE")]
    input: String,

    /// Orientation model; omit to use the heuristic.
    #[arg(long)]
    model: Option<PathBuf>,

    #[arg(long, default_value_t = 0.7)]
    threshold: f32,

    /// Force the transition-count heuristic.
    #[arg(long)]
    heuristic: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = OrienterConfig {
        model_path: cli.model.clone().unwrap_or_default(),
        confidence_threshold: cli.threshold,
        heuristic_only: cli.heuristic || cli.model.is_none(),
        ..OrienterConfig::default()
    };
    let orienter = build_orienter(&config)?;

    let image = image::open(&cli.input)?.to_rgb8();
    let result = orienter.predict(&image)?;
    println!("{}° ({:.3})", result.angle, result.confidence);

    Ok(())
}
