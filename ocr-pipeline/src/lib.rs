//! Image-level OCR request handling.
//!
//! Composes an external text detector with the recognition engine and an
//! optional page rectifier. Detection itself lives behind a trait; this
//! crate only orchestrates.

pub mod accuracy;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::DynamicImage;
use tracing::{debug, info};

use text_recognizer::error::RecognitionError;
use text_recognizer::{DetectedRegion, RecognitionResult, Recognizer, Result};

/// Produces text regions for a page image.
pub trait TextDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedRegion>>;
}

/// Detector stand-in that returns a fixed region list, for callers that
/// bring their own geometry (tests, CLI region files, external detectors).
pub struct StaticRegions(pub Vec<DetectedRegion>);

impl TextDetector for StaticRegions {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<DetectedRegion>> {
        Ok(self.0.clone())
    }
}

/// Document-level rectification hook, applied to the page before detection.
pub type Rectifier = Box<dyn Fn(&mut DynamicImage) + Send + Sync>;

/// Cooperative cancellation checked between pipeline stages and regions.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RecognitionError::Configuration("request cancelled".into()));
        }
        Ok(())
    }
}

/// One recognized region with its geometry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineResult {
    #[serde(flatten)]
    pub recognition: RecognitionResult,
    pub region: DetectedRegion,
}

pub struct OcrPipeline {
    detector: Box<dyn TextDetector>,
    recognizer: Arc<Recognizer>,
    rectifier: Option<Rectifier>,
    cancel: CancelToken,
}

impl OcrPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Rectify, detect, then recognize all regions in one batch.
    pub fn process(&self, image: &DynamicImage) -> Result<Vec<PipelineResult>> {
        self.cancel.check()?;
        let mut image = image.clone();
        if let Some(rectifier) = &self.rectifier {
            rectifier(&mut image);
        }

        self.cancel.check()?;
        let regions = self.detector.detect(&image)?;
        debug!(regions = regions.len(), "detection done");

        self.process_regions(&image, regions)
    }

    /// Recognize pre-detected regions; one failing region fails the call.
    pub fn process_regions(
        &self,
        image: &DynamicImage,
        regions: Vec<DetectedRegion>,
    ) -> Result<Vec<PipelineResult>> {
        self.cancel.check()?;
        if regions.is_empty() {
            return Ok(Vec::new());
        }
        let recognized = self.recognizer.recognize_batch(image, &regions)?;
        info!(regions = regions.len(), "recognition done");
        Ok(regions
            .into_iter()
            .zip(recognized)
            .map(|(region, recognition)| PipelineResult { recognition, region })
            .collect())
    }

    /// Per-region isolation: a failing region yields an empty result
    /// instead of failing its neighbours.
    pub fn process_isolated(
        &self,
        image: &DynamicImage,
        regions: Vec<DetectedRegion>,
    ) -> Result<Vec<PipelineResult>> {
        let mut results = Vec::with_capacity(regions.len());
        for region in regions {
            self.cancel.check()?;
            let recognition = match self.recognizer.recognize_region(image, &region) {
                Ok(result) => result,
                Err(err) => {
                    debug!(error = %err, "region failed, emitting empty result");
                    RecognitionResult::default()
                }
            };
            results.push(PipelineResult { recognition, region });
        }
        Ok(results)
    }

    pub fn recognizer(&self) -> &Arc<Recognizer> {
        &self.recognizer
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    detector: Option<Box<dyn TextDetector>>,
    recognizer: Option<Arc<Recognizer>>,
    orienter: Option<Arc<dyn text_recognizer::LineOrienter>>,
    rectifier: Option<Rectifier>,
    cancel: Option<CancelToken>,
}

impl PipelineBuilder {
    pub fn detector(mut self, detector: Box<dyn TextDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn recognizer(mut self, recognizer: Arc<Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn orienter(mut self, orienter: Arc<dyn text_recognizer::LineOrienter>) -> Self {
        self.orienter = Some(orienter);
        self
    }

    pub fn rectifier(mut self, rectifier: Rectifier) -> Self {
        self.rectifier = Some(rectifier);
        self
    }

    pub fn cancellation(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<OcrPipeline> {
        let recognizer = self.recognizer.ok_or_else(|| {
            RecognitionError::Configuration("pipeline needs a recognizer".into())
        })?;
        if let Some(orienter) = self.orienter {
            recognizer.set_textline_orienter(Some(orienter));
        }
        Ok(OcrPipeline {
            detector: self
                .detector
                .unwrap_or_else(|| Box::new(StaticRegions(Vec::new()))),
            recognizer,
            rectifier: self.rectifier,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}
