use serde::Serialize;

use crate::errors::{ErrorKind, ScanError};
use crate::ranking;

/// Axis-aligned box in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A labelled region proposed by the region detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    /// Percentage in `[0, 100]`, two decimals.
    pub confidence: f32,
    pub region: Region,
}

/// A whole-image label proposed by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    /// Percentage in `[0, 100]`, two decimals.
    pub confidence: f32,
}

/// Common view over detections and predictions.
pub trait Scored {
    fn label(&self) -> &str;
    fn confidence(&self) -> f32;
}

impl Scored for Detection {
    fn label(&self) -> &str {
        &self.label
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }
}

impl Scored for Prediction {
    fn label(&self) -> &str {
        &self.label
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Results ordered by non-increasing confidence.
///
/// The only way to build one is through [`RankedResults::from_unsorted`],
/// which performs a stable sort, so equal confidences keep their input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RankedResults<T>(Vec<T>);

impl<T: Scored> RankedResults<T> {
    pub fn from_unsorted(mut items: Vec<T>) -> Self {
        ranking::sort_descending(&mut items);
        Self(items)
    }

    pub fn primary(&self) -> Option<&T> {
        self.0.first()
    }

    pub fn truncated(mut self, len: usize) -> Self {
        self.0.truncate(len);
        self
    }
}

impl<T> RankedResults<T> {
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0
    }
}

impl<T> Default for RankedResults<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a, T> IntoIterator for &'a RankedResults<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Response of [`crate::RegionDetector::detect`].
#[derive(Debug, Clone, Serialize)]
pub struct DetectionOutcome {
    pub success: bool,
    pub detections: RankedResults<Detection>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub mock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectionOutcome {
    pub fn found(detections: RankedResults<Detection>) -> Self {
        Self {
            success: true,
            detections,
            mock: false,
            error_kind: None,
            error: None,
        }
    }

    pub fn mocked(detections: RankedResults<Detection>) -> Self {
        Self {
            mock: true,
            ..Self::found(detections)
        }
    }

    pub fn failed(err: &ScanError) -> Self {
        Self {
            success: false,
            detections: RankedResults::empty(),
            mock: false,
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
        }
    }
}

/// Response of [`crate::WholeImageClassifier::classify`].
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationOutcome {
    pub success: bool,
    pub predictions: RankedResults<Prediction>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub mock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassificationOutcome {
    pub fn found(predictions: RankedResults<Prediction>) -> Self {
        Self {
            success: true,
            predictions,
            mock: false,
            error_kind: None,
            error: None,
        }
    }

    pub fn mocked(predictions: RankedResults<Prediction>) -> Self {
        Self {
            mock: true,
            ..Self::found(predictions)
        }
    }

    pub fn failed(err: &ScanError) -> Self {
        Self {
            success: false,
            predictions: RankedResults::empty(),
            mock: false,
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
        }
    }
}
