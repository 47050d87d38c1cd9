use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use text_recognizer::{
    BoundingBox, DecodingMethod, DetectedRegion, GpuConfig, Recognizer, RecognizerConfig,
};

#[derive(Parser)]
struct Cli {
    /// Image holding a single text line.
    #[arg(short, long, value_name = "FILE")]
    input: String,

    #[arg(long, default_value = "models/rec_mobile.onnx")]
    model: PathBuf,

    /// Dictionary file; repeat to merge several.
    #[arg(long, required = true)]
    dict: Vec<PathBuf>,

    /// Model input height; 0 adopts the model's.
    #[arg(long, default_value_t = 48)]
    height: u32,

    /// greedy or beam_search
    #[arg(long, default_value = "greedy")]
    decoding: String,

    #[arg(long, default_value_t = 10)]
    beam_width: usize,

    /// Post-process language hint (en, de, fr, ...).
    #[arg(long, default_value = "")]
    language: String,

    #[arg(long)]
    gpu: bool,

    /// Print per-stage timings.
    #[arg(long)]
    timings: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RecognizerConfig {
        model_path: cli.model,
        dict_paths: cli.dict,
        image_height: cli.height,
        decoding_method: DecodingMethod::from_str(&cli.decoding)?,
        beam_width: cli.beam_width,
        language: cli.language,
        gpu: GpuConfig {
            enabled: cli.gpu,
            ..GpuConfig::default()
        },
        ..RecognizerConfig::default()
    };
    let recognizer = Recognizer::new(config)?;

    let image = image::open(&cli.input)?;
    let region = DetectedRegion::from_bbox(
        BoundingBox::new(0.0, 0.0, image.width() as f32, image.height() as f32),
        1.0,
    );
    let result = recognizer.recognize_region(&image, &region)?;

    println!("{} ({:.3})", result.text, result.confidence);
    if cli.timings {
        println!(
            "preprocess {}us, model {}us, decode {}us, total {}us",
            result.timings.preprocess_ns / 1_000,
            result.timings.model_ns / 1_000,
            result.timings.decode_ns / 1_000,
            result.timings.total_ns / 1_000,
        );
    }

    Ok(())
}
