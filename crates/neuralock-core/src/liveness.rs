//! The liveness check: dots → heatmap → reference → similarity verdict.

use crate::config::{ConfigError, LivenessConfig};
use crate::depth::{estimate_face_depth, DepthEstimate, DepthModel, FaceDetector};
use crate::dots::{DotExtractor, SignalAssessment};
use crate::error::LivenessError;
use crate::frame::Frame;
use crate::heatmap::{HeatMap, HeatmapBuilder};
use crate::pseudo_depth::{PseudoDepthMap, PseudoDepthSynthesizer};
use crate::similarity::SimilarityScorer;
use crate::types::{Confidence, DotSet, FaceRegion, LivenessVerdict, ReferenceSource, SCORE_SENTINEL};

/// Runs liveness checks with one immutable configuration.
///
/// Holds no per-check state, so one checker can serve concurrent access
/// attempts as long as each passes its own frame.
pub struct LivenessChecker {
    config: LivenessConfig,
    extractor: DotExtractor,
    synthesizer: PseudoDepthSynthesizer,
    heatmaps: HeatmapBuilder,
    scorer: SimilarityScorer,
    depth_model: Option<Box<dyn DepthModel>>,
}

impl LivenessChecker {
    pub fn new(config: LivenessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            extractor: DotExtractor::new(&config),
            synthesizer: PseudoDepthSynthesizer::new(config.pseudo_depth.clone()),
            heatmaps: HeatmapBuilder::new(config.heatmap.interpolation),
            scorer: SimilarityScorer::new(&config.scoring),
            depth_model: None,
            config,
        })
    }

    /// Attach the monocular depth model used when the reference is `monocular_model`.
    pub fn with_depth_model(mut self, model: Box<dyn DepthModel>) -> Self {
        self.depth_model = Some(model);
        self
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    pub fn extractor(&self) -> &DotExtractor {
        &self.extractor
    }

    pub fn has_depth_model(&self) -> bool {
        self.depth_model.is_some()
    }

    /// Decide whether the face in `region` of an IR capture is live.
    ///
    /// Only malformed input is an error. Weak signal lowers the verdict's
    /// confidence, and any scoring failure yields a rejected verdict.
    pub fn check_liveness(
        &self,
        frame: &Frame,
        region: &FaceRegion,
    ) -> Result<LivenessVerdict, LivenessError> {
        let region = clamp_region(frame, region)?;

        let dark = frame.is_dark();
        if dark {
            tracing::warn!(brightness = frame.avg_brightness(), "dark frame; IR emitter may be off");
        }

        let dots = self.extractor.extract(frame, &region);
        let signal = SignalAssessment::assess(&dots, &self.config.signal, dark);
        let heatmap = self.heatmaps.build(&dots, &region);

        let reference = match self.config.scoring.reference {
            ReferenceSource::PseudoDepth => self.pseudo_reference(frame, &region),
            ReferenceSource::MonocularModel => match &self.depth_model {
                Some(model) => match estimate_face_depth(model.as_ref(), frame, &region) {
                    Ok(estimate) => estimate,
                    Err(e) => {
                        tracing::warn!(model = model.name(), error = %e, "depth model failed; rejecting");
                        let mut verdict = LivenessVerdict::rejected(
                            self.scorer.metric(),
                            ReferenceSource::MonocularModel,
                            e.to_string(),
                        );
                        verdict.dot_count = dots.len();
                        verdict.pattern = signal.pattern;
                        return Ok(verdict);
                    }
                },
                None => {
                    tracing::warn!("no depth model attached; falling back to pseudo-depth reference");
                    self.pseudo_reference(frame, &region)
                }
            },
        };

        Ok(self.score(&dots, &heatmap, &reference, signal))
    }

    /// Detect faces, take the largest, and check it.
    pub fn check_detected(
        &self,
        frame: &Frame,
        detector: &dyn FaceDetector,
    ) -> Result<LivenessVerdict, LivenessError> {
        let faces = detector.detect(frame)?;
        let primary = faces
            .iter()
            .max_by_key(|r| r.area())
            .ok_or(LivenessError::NoFaceDetected)?;
        tracing::debug!(faces = faces.len(), primary = %primary, "face detection");
        self.check_liveness(frame, primary)
    }

    /// Score an already-extracted dot set against a reference.
    ///
    /// `region` is clamped to a frame of `frame_size` (`width`, `height`),
    /// the frame the dots came from.
    pub fn evaluate(
        &self,
        dots: &DotSet,
        region: &FaceRegion,
        frame_size: (u32, u32),
        reference: &DepthEstimate,
    ) -> Result<LivenessVerdict, LivenessError> {
        let (width, height) = frame_size;
        let region = clamp_to_frame(region, width, height)?;
        let signal = SignalAssessment::assess(dots, &self.config.signal, false);
        let heatmap = self.heatmaps.build(dots, &region);
        Ok(self.score(dots, &heatmap, reference, signal))
    }

    /// Pseudo-depth rendering of the face crop.
    pub fn pseudo_depth(&self, frame: &Frame, region: &FaceRegion) -> Result<PseudoDepthMap, LivenessError> {
        let region = clamp_region(frame, region)?;
        Ok(self.synthesizer.synthesize(&frame.crop(&region).to_gray()))
    }

    fn pseudo_reference(&self, frame: &Frame, region: &FaceRegion) -> DepthEstimate {
        self.synthesizer
            .synthesize(&frame.crop(region).to_gray())
            .to_depth_estimate()
    }

    fn score(
        &self,
        dots: &DotSet,
        heatmap: &HeatMap,
        reference: &DepthEstimate,
        signal: SignalAssessment,
    ) -> LivenessVerdict {
        if signal.confidence == Confidence::Low {
            tracing::warn!(
                dots = signal.dot_count,
                dense = signal.neighbors.dense_dots,
                dark = signal.dark_frame,
                "low-confidence dot signal"
            );
        }

        // pseudo-depth references are renderings; compare like with like
        let rendered;
        let values = if reference.source == ReferenceSource::PseudoDepth && heatmap.is_finite() {
            rendered = heatmap.rendered_luma();
            &rendered
        } else {
            heatmap.values()
        };

        let verdict = match self.scorer.score(values, &reference.map) {
            Ok(outcome) => LivenessVerdict {
                is_live: outcome.is_live,
                score: outcome.score,
                metric: outcome.metric,
                confidence: signal.confidence,
                dot_count: dots.len(),
                reference: reference.source,
                compared_dims: Some(outcome.compared_dims),
                pattern: signal.pattern,
                failure: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "similarity scoring failed; rejecting");
                LivenessVerdict {
                    is_live: false,
                    score: SCORE_SENTINEL,
                    metric: self.scorer.metric(),
                    confidence: signal.confidence,
                    dot_count: dots.len(),
                    reference: reference.source,
                    compared_dims: None,
                    pattern: signal.pattern,
                    failure: Some(e.to_string()),
                }
            }
        };

        tracing::info!(
            live = verdict.is_live,
            score = verdict.score,
            metric = %verdict.metric,
            confidence = ?verdict.confidence,
            dots = verdict.dot_count,
            reference = ?verdict.reference,
            pattern = ?verdict.pattern,
            "liveness verdict"
        );
        verdict
    }
}

fn clamp_region(frame: &Frame, region: &FaceRegion) -> Result<FaceRegion, LivenessError> {
    clamp_to_frame(region, frame.width(), frame.height())
}

fn clamp_to_frame(region: &FaceRegion, width: u32, height: u32) -> Result<FaceRegion, LivenessError> {
    if width == 0 || height == 0 {
        return Err(LivenessError::EmptyFrame { width, height });
    }
    region.clamp_to(width, height).ok_or(LivenessError::DegenerateRegion {
        region: *region,
        frame_width: width,
        frame_height: height,
    })
}
