use std::path::{Path, PathBuf};
use std::time::Instant;

use image::RgbImage;
use ndarray::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    errors::{Result, ScanError},
    mocks::mock_predictions,
    model::{Device, DeviceRequest, ModelInfo, ModelState, OnnxClassificationModel},
    preprocess::{open_image, View},
    quality::QualityGate,
    ranking::{mean_distribution, passes_threshold, softmax, to_percent, top_k},
    result::{ClassificationOutcome, Prediction, RankedResults},
    traits::ClassificationModel,
    vocabulary::{resolve_vocabulary, synthesized_label, DEFAULT_CLASSIFIER_LABELS},
};

pub const DEFAULT_CLASSIFIER_THRESHOLD: f32 = 0.01;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_CLASSIFIER_MODEL: &str = "models/swin_best.onnx";

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    /// Minimum probability fraction a class needs to be reported.
    pub confidence_threshold: f32,
    pub device: DeviceRequest,
    pub device_id: i32,
    pub quality: QualityGate,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_CLASSIFIER_MODEL),
            confidence_threshold: DEFAULT_CLASSIFIER_THRESHOLD,
            device: DeviceRequest::Auto,
            device_id: 0,
            quality: QualityGate::default(),
        }
    }
}

enum Strategy {
    RealModel(Box<dyn ClassificationModel>),
    MockModel,
}

impl Strategy {
    fn classify(
        &self,
        image_path: &Path,
        k: usize,
        use_tta: bool,
        state: &ModelState,
        gate: &QualityGate,
    ) -> Result<ClassificationOutcome> {
        let model = match self {
            Strategy::MockModel => return Ok(ClassificationOutcome::mocked(mock_predictions(k))),
            Strategy::RealModel(model) => model.as_ref(),
        };

        if !image_path.exists() {
            return Err(ScanError::NotFound {
                path: image_path.to_path_buf(),
            });
        }
        let image = open_image(image_path)?;
        gate.check(&image)?;
        let rgb = image.to_rgb8();

        let probabilities = if use_tta {
            averaged_probabilities(model, &rgb)?
        } else {
            view_probabilities(model, View::Identity, &rgb)?
        };

        Ok(ClassificationOutcome::found(rank_predictions(
            probabilities.view(),
            k,
            state.threshold,
            &state.class_labels,
        )))
    }
}

fn view_probabilities(
    model: &dyn ClassificationModel,
    view: View,
    image: &RgbImage,
) -> Result<Array1<f32>> {
    let logits = model.logits(view.tensor(image).view())?;
    if logits.nrows() == 0 {
        return Err(ScanError::InferenceFailure {
            stage: "Classification",
            message: "model returned an empty batch".to_string(),
        });
    }
    Ok(softmax(logits.row(0)))
}

/// Mean of the per-view probability vectors over every TTA view.
fn averaged_probabilities(
    model: &dyn ClassificationModel,
    image: &RgbImage,
) -> Result<Array1<f32>> {
    let per_view = View::TTA
        .iter()
        .map(|&view| view_probabilities(model, view, image))
        .collect::<Result<Vec<_>>>()?;
    mean_distribution(&per_view).ok_or_else(|| ScanError::InferenceFailure {
        stage: "Classification",
        message: "views produced probability vectors of different lengths".to_string(),
    })
}

/// Top `min(k, |labels|)` classes of `probabilities`, minus any under
/// `threshold`, as percentages.
pub fn rank_predictions(
    probabilities: ArrayView1<f32>,
    k: usize,
    threshold: f32,
    labels: &[String],
) -> RankedResults<Prediction> {
    let predictions = top_k(probabilities, k.min(labels.len()))
        .into_iter()
        .filter(|&(_, p)| passes_threshold(p, threshold))
        .map(|(index, p)| Prediction {
            label: labels
                .get(index)
                .cloned()
                .unwrap_or_else(|| synthesized_label(index)),
            confidence: to_percent(p),
        })
        .collect();
    RankedResults::from_unsorted(predictions)
}

/// Whole-image classifier handle: loaded once, then shared read-only by
/// every `classify` call.
pub struct WholeImageClassifier {
    config: ClassifierConfig,
    state: ModelState,
    strategy: Strategy,
}

impl WholeImageClassifier {
    /// Loads the configured artifact. A missing or broken artifact leaves the
    /// classifier in mock mode instead of failing.
    pub fn load(config: ClassifierConfig) -> Self {
        let (strategy, state) = load_strategy(&config);
        Self {
            config,
            state,
            strategy,
        }
    }

    /// Wraps an already constructed model, bypassing artifact loading.
    ///
    /// The vocabulary is resolved from the model's own metadata and class
    /// count exactly as for a loaded artifact. No device is recorded.
    pub fn with_model(model: Box<dyn ClassificationModel>, config: ClassifierConfig) -> Self {
        let class_labels = resolve_vocabulary(
            model.label_metadata().as_ref(),
            model.class_count(),
            &DEFAULT_CLASSIFIER_LABELS,
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

    /// A classifier that always serves the fixed mock predictions.
    pub fn mock(config: ClassifierConfig) -> Self {
        let state = unloaded_state(&config);
        Self {
            config,
            state,
            strategy: Strategy::MockModel,
        }
    }

    /// Re-runs the load procedure against the stored configuration,
    /// replacing the current strategy.
    ///
    /// # Why `&mut self`
    ///
    /// Every `classify` call reads the state without locking, so a reload
    /// must have exclusive access to the handle.
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
        self.state.info("Swin Transformer")
    }

    /// Classifies one image into at most `top_k` ranked predictions.
    ///
    /// In mock mode the fixed table is returned without touching the file.
    /// Otherwise a missing file reports `NotFound`. With `use_tta` the
    /// probabilities of four deterministic views are averaged before ranking,
    /// at roughly four times the cost. Failures are reported through the
    /// outcome, never as an error.
    pub fn classify(&self, image_path: &Path, top_k: usize, use_tta: bool) -> ClassificationOutcome {
        let started = Instant::now();
        let outcome = match self.strategy.classify(
            image_path,
            top_k,
            use_tta,
            &self.state,
            &self.config.quality,
        ) {
            Ok(outcome) => outcome,
            Err(e) => ClassificationOutcome::failed(&e.into_inference_failure("Classification")),
        };
        debug!(
            path = %image_path.display(),
            predictions = outcome.predictions.len(),
            use_tta,
            mock = outcome.mock,
            elapsed = ?started.elapsed(),
            "Classification finished"
        );
        outcome
    }
}

fn unloaded_state(config: &ClassifierConfig) -> ModelState {
    ModelState {
        loaded: false,
        path: config.model_path.clone(),
        device: None,
        class_labels: DEFAULT_CLASSIFIER_LABELS
            .iter()
            .map(|l| l.to_string())
            .collect(),
        threshold: config.confidence_threshold,
    }
}

fn load_strategy(config: &ClassifierConfig) -> (Strategy, ModelState) {
    if !config.model_path.exists() {
        warn!(
            "Classification model not found: {}; using mock mode until it is available",
            config.model_path.display()
        );
        return (Strategy::MockModel, unloaded_state(config));
    }

    let device = Device::select(config.device, config.device_id);
    info!("Classification device: {device}");
    match OnnxClassificationModel::load(&config.model_path, device) {
        Ok(model) => {
            let class_labels = resolve_vocabulary(
                model.label_metadata().as_ref(),
                model.class_count(),
                &DEFAULT_CLASSIFIER_LABELS,
            );
            info!(
                "Classification model loaded: {} classes on {device}",
                class_labels.len()
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
            warn!("Failed to load classification model: {e}; using mock mode");
            let mut state = unloaded_state(config);
            state.device = Some(device);
            (Strategy::MockModel, state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("condition_{i}")).collect()
    }

    #[test]
    fn test_rank_predictions_caps_at_vocabulary() {
        let probs = array![0.5_f32, 0.3, 0.2];
        let ranked = rank_predictions(probs.view(), 10, 0.01, &labels(3));
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn test_rank_predictions_drops_below_threshold() {
        let probs = array![0.005_f32, 0.9, 0.095];
        let ranked = rank_predictions(probs.view(), 5, 0.01, &labels(3));
        let labels: Vec<_> = ranked.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["condition_1", "condition_2"]);
        assert_eq!(ranked.as_slice()[0].confidence, 90.0);
        assert_eq!(ranked.as_slice()[1].confidence, 9.5);
    }

    #[test]
    fn test_rank_predictions_synthesizes_missing_labels() {
        let probs = array![0.1_f32, 0.2, 0.7];
        let ranked = rank_predictions(probs.view(), 1, 0.01, &labels(3)[..2]);
        // only two labels: k is capped to 2 and index 2 is out of range
        assert_eq!(ranked.primary().map(|p| p.label.as_str()), Some("class_2"));
    }

    #[test]
    fn test_mock_classifier_ignores_image_content() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("anything.png");
        std::fs::write(&path, b"not decoded in mock mode")?;

        let classifier = WholeImageClassifier::mock(ClassifierConfig::default());
        let outcome = classifier.classify(&path, 2, true);
        assert!(outcome.success && outcome.mock);
        let labels: Vec<_> = outcome.predictions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["atopic_dermatitis", "melanocytic_nevus"]);
        Ok(())
    }
}
