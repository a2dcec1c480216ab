use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::{
    errors::{Result, ScanError},
    mocks::mock_detections,
    model::{Device, DeviceRequest, ModelInfo, ModelState, OnnxRegionModel},
    ranking::{passes_threshold, to_percent},
    result::{Detection, DetectionOutcome, RankedResults, Region},
    traits::{RawBox, RegionModel},
    vocabulary::{resolve_vocabulary, synthesized_label, DEFAULT_DETECTOR_LABELS},
};

pub const DEFAULT_DETECTOR_THRESHOLD: f32 = 0.5;
pub const DEFAULT_DETECTOR_MODEL: &str = "models/rash_model.onnx";

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    /// Minimum confidence fraction a box needs to be reported.
    pub confidence_threshold: f32,
    pub device: DeviceRequest,
    pub device_id: i32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_DETECTOR_MODEL),
            confidence_threshold: DEFAULT_DETECTOR_THRESHOLD,
            device: DeviceRequest::Auto,
            device_id: 0,
        }
    }
}

enum Strategy {
    RealModel(Box<dyn RegionModel>),
    MockModel,
}

impl Strategy {
    fn detect(&self, image_path: &Path, state: &ModelState) -> Result<DetectionOutcome> {
        match self {
            Strategy::MockModel => Ok(DetectionOutcome::mocked(mock_detections())),
            Strategy::RealModel(model) => {
                let raw = model.predict(image_path, state.threshold)?;
                Ok(DetectionOutcome::found(parse_detections(
                    &raw,
                    state.threshold,
                    &state.class_labels,
                )))
            }
        }
    }
}

/// Region detector handle: loaded once, then shared read-only by every
/// `detect` call.
pub struct RegionDetector {
    config: DetectorConfig,
    state: ModelState,
    strategy: Strategy,
}

impl RegionDetector {
    /// Loads the configured artifact. A missing or broken artifact leaves the
    /// detector in mock mode instead of failing.
    pub fn load(config: DetectorConfig) -> Self {
        let (strategy, state) = load_strategy(&config);
        Self {
            config,
            state,
            strategy,
        }
    }

    /// Wraps an already constructed model.
    pub fn with_model(model: Box<dyn RegionModel>, config: DetectorConfig) -> Self {
        let class_labels = resolve_vocabulary(
            model.label_metadata().as_ref(),
            model.class_count(),
            &DEFAULT_DETECTOR_LABELS,
        );
        let state = ModelState {
            loaded: true,
            path: config.model_path.clone(),
            device: None,
            class_labels,
            threshold: config.confidence_threshold,
        };
        Self {
            config,
            state,
            strategy: Strategy::RealModel(model),
        }
    }

    /// A detector that always serves the fixed mock detections.
    pub fn mock(config: DetectorConfig) -> Self {
        let state = unloaded_state(&config);
        Self {
            config,
            state,
            strategy: Strategy::MockModel,
        }
    }

    /// Re-runs the load procedure against the stored configuration.
    pub fn reload(&mut self) {
        let (strategy, state) = load_strategy(&self.config);
        self.strategy = strategy;
        self.state = state;
    }

    pub fn is_loaded(&self) -> bool {
        self.state.loaded
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn info(&self) -> ModelInfo {
        self.state.info("YOLOv8")
    }

    /// Detects rash regions in one image.
    ///
    /// Never returns an error: failures are reported through the outcome's
    /// `success`, `error_kind` and `error` fields.
    pub fn detect(&self, image_path: &Path) -> DetectionOutcome {
        if !image_path.exists() {
            return DetectionOutcome::failed(&ScanError::NotFound {
                path: image_path.to_path_buf(),
            });
        }

        let started = Instant::now();
        let outcome = match self.strategy.detect(image_path, &self.state) {
            Ok(outcome) => outcome,
            Err(e) => DetectionOutcome::failed(&e.into_inference_failure("Detection")),
        };
        debug!(
            path = %image_path.display(),
            detections = outcome.detections.len(),
            mock = outcome.mock,
            elapsed = ?started.elapsed(),
            "Detection finished"
        );
        outcome
    }
}

fn unloaded_state(config: &DetectorConfig) -> ModelState {
    ModelState {
        loaded: false,
        path: config.model_path.clone(),
        device: None,
        class_labels: DEFAULT_DETECTOR_LABELS.iter().map(|l| l.to_string()).collect(),
        threshold: config.confidence_threshold,
    }
}

fn load_strategy(config: &DetectorConfig) -> (Strategy, ModelState) {
    if !config.model_path.exists() {
        warn!(
            "Detection model not found: {}; using mock mode until it is available",
            config.model_path.display()
        );
        return (Strategy::MockModel, unloaded_state(config));
    }

    let device = Device::select(config.device, config.device_id);
    match OnnxRegionModel::load(&config.model_path, device) {
        Ok(model) => {
            let class_labels = resolve_vocabulary(
                model.label_metadata().as_ref(),
                model.class_count(),
                &DEFAULT_DETECTOR_LABELS,
            );
            info!(
                "Detection model loaded on {device}: {} classes {:?}",
                class_labels.len(),
                class_labels
            );
            let state = ModelState {
                loaded: true,
                path: config.model_path.clone(),
                device: Some(device),
                class_labels,
                threshold: config.confidence_threshold,
            };
            (Strategy::RealModel(Box::new(model)), state)
        }
        Err(e) => {
            warn!("Failed to load detection model: {e}; using mock mode");
            let mut state = unloaded_state(config);
            state.device = Some(device);
            (Strategy::MockModel, state)
        }
    }
}

/// Converts raw model boxes into ranked detections.
///
/// Boxes under `threshold` are dropped even if the model was already asked
/// to respect it. Class indexes outside `labels` become `class_<id>`.
pub fn parse_detections(
    raw: &[RawBox],
    threshold: f32,
    labels: &[String],
) -> RankedResults<Detection> {
    let detections = raw
        .iter()
        .filter(|b| passes_threshold(b.confidence, threshold))
        .map(|b| Detection {
            label: labels
                .get(b.class_id)
                .cloned()
                .unwrap_or_else(|| synthesized_label(b.class_id)),
            confidence: to_percent(b.confidence),
            region: Region {
                x: b.x1 as i32,
                y: b.y1 as i32,
                width: (b.x2 - b.x1) as i32,
                height: (b.y2 - b.y1) as i32,
            },
        })
        .collect();
    RankedResults::from_unsorted(detections)
}
