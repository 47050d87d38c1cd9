use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ocr_pipeline::OcrPipeline;
use ocr_pipeline::accuracy::AccuracyReport;
use text_orienter::{OrienterConfig, build_orienter};
use text_recognizer::{
    BoundingBox, DecodingMethod, DetectedRegion, GpuConfig, Recognizer, RecognizerConfig,
};

#[derive(Parser)]
#[command(about = "Recognize text regions in a page image")]
struct Cli {
    /// Page image.
    #[arg(short, long, value_name = "FILE")]
    image: String,

    /// JSON file with detected regions; omit to treat the whole image as
    /// one region.
    #[arg(long, value_name = "FILE")]
    regions: Option<PathBuf>,

    #[arg(long, default_value = "models/rec_mobile.onnx")]
    model: PathBuf,

    /// Dictionary file; repeat to merge several.
    #[arg(long, required = true)]
    dict: Vec<PathBuf>,

    /// Output-side filter dictionary.
    #[arg(long)]
    filter_dict: Vec<PathBuf>,

    /// Text-line orientation model; omit to go without a classifier.
    #[arg(long)]
    orienter_model: Option<PathBuf>,

    /// Use the orientation heuristic instead of a model.
    #[arg(long)]
    heuristic_orienter: bool,

    /// Post-process language hint.
    #[arg(long, default_value = "")]
    language: String,

    /// greedy or beam_search
    #[arg(long, default_value = "greedy")]
    decoding: String,

    #[arg(long, default_value_t = 10)]
    beam_width: usize,

    #[arg(long, default_value_t = 48)]
    height: u32,

    #[arg(long)]
    gpu: bool,

    /// Emit results as a JSON array.
    #[arg(long)]
    json: bool,

    /// Compare against a ground-truth transcript and print CER/WER.
    #[arg(long)]
    ground_truth: Option<String>,
}

fn load_regions(cli: &Cli, image: &image::DynamicImage) -> anyhow::Result<Vec<DetectedRegion>> {
    match &cli.regions {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read regions file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid regions file {}", path.display()))
        }
        None => Ok(vec![DetectedRegion::from_bbox(
            BoundingBox::new(0.0, 0.0, image.width() as f32, image.height() as f32),
            1.0,
        )]),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = RecognizerConfig {
        model_path: cli.model.clone(),
        dict_paths: cli.dict.clone(),
        filter_dict_paths: cli.filter_dict.clone(),
        image_height: cli.height,
        language: cli.language.clone(),
        decoding_method: DecodingMethod::from_str(&cli.decoding)?,
        beam_width: cli.beam_width,
        gpu: GpuConfig {
            enabled: cli.gpu,
            ..GpuConfig::default()
        },
        ..RecognizerConfig::default()
    };
    let recognizer = Arc::new(Recognizer::new(config)?);

    let mut builder = OcrPipeline::builder().recognizer(Arc::clone(&recognizer));
    if cli.orienter_model.is_some() || cli.heuristic_orienter {
        let orienter_config = OrienterConfig {
            model_path: cli.orienter_model.clone().unwrap_or_default(),
            heuristic_only: cli.heuristic_orienter || cli.orienter_model.is_none(),
            gpu: GpuConfig {
                enabled: cli.gpu,
                ..GpuConfig::default()
            },
            ..OrienterConfig::default()
        };
        builder = builder.orienter(build_orienter(&orienter_config)?);
    }
    let pipeline = builder.build()?;

    let image = image::open(&cli.image).with_context(|| format!("cannot open {}", cli.image))?;
    let regions = load_regions(&cli, &image)?;
    let results = pipeline.process_regions(&image, regions)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            println!(
                "[{:.0},{:.0} {:.0}x{:.0}] {} ({:.3})",
                result.region.bbox.x,
                result.region.bbox.y,
                result.region.bbox.width,
                result.region.bbox.height,
                result.recognition.text,
                result.recognition.confidence,
            );
        }
    }

    if let Some(ground_truth) = &cli.ground_truth {
        let predicted: Vec<&str> = results.iter().map(|r| r.recognition.text.as_str()).collect();
        let report = AccuracyReport::compare(ground_truth, &predicted.join(" "));
        println!("CER {:.4}, WER {:.4}", report.cer, report.wer);
    }

    recognizer.close();
    Ok(())
}
