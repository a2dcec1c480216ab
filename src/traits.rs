use std::path::Path;

use ndarray::prelude::*;

use crate::errors::Result;
use crate::explanation::ExplanationRequest;
use crate::vocabulary::LabelMetadata;

/// A box as emitted by a region model: absolute pixel corners, a class
/// index and the raw confidence fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: usize,
    pub confidence: f32,
}

/// Object-detection style model.
///
/// # Why a path, not pixels
///
/// Region models decode and resize the file themselves, at their own input
/// size, so the caller never needs to know it. Box coordinates come back in
/// source image pixels.
pub trait RegionModel: Send + Sync {
    /// Runs the model on one image file, asking it to drop boxes scoring
    /// below `confidence_threshold`.
    fn predict(&self, image_path: &Path, confidence_threshold: f32) -> Result<Vec<RawBox>>;

    /// Number of classes the artifact declares, when known.
    fn class_count(&self) -> Option<usize> {
        None
    }

    /// Labels embedded in the artifact, when present.
    fn label_metadata(&self) -> Option<LabelMetadata> {
        None
    }
}

/// Whole-image classification model.
///
/// Implementations only map a normalized batch to logits. Decoding, the
/// quality gate, view rendering and softmax all happen in the classifier, so
/// a stub implementation sees exactly what an ONNX session would.
pub trait ClassificationModel: Send + Sync {
    /// Raw logits shaped `[batch, classes]` for a normalized `[batch, 3, H, W]` input.
    fn logits(&self, batch: ArrayView4<f32>) -> Result<Array2<f32>>;

    fn class_count(&self) -> Option<usize> {
        None
    }

    fn label_metadata(&self) -> Option<LabelMetadata> {
        None
    }
}

/// Text generation collaborator that turns ranked findings into prose.
pub trait ExplanationGenerator: Send + Sync {
    fn explain(&self, request: &ExplanationRequest) -> Result<String>;
}
