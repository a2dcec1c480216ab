pub mod classifier;
pub mod config;
pub mod detector;
pub mod errors;
pub mod explanation;
pub mod mocks;
pub mod model;
pub mod preprocess;
pub mod quality;
pub mod ranking;
pub mod result;
pub mod traits;
pub mod vocabulary;

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub use classifier::{ClassifierConfig, WholeImageClassifier};
pub use config::{Config, Mode};
pub use detector::{DetectorConfig, RegionDetector};
pub use errors::{ErrorKind, Result, ScanError};
pub use explanation::{ChatTurn, ExplanationRequest};
pub use model::{Device, DeviceRequest, ModelInfo};
pub use result::*;
pub use traits::*;

/// Everything reported for one input image.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationOutcome>,
    /// Present only when some strategy produced at least one valid finding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<ExplanationRequest>,
}

/// Both strategy handles, loaded once and shared by every scan.
pub struct Scanner {
    detector: Option<RegionDetector>,
    classifier: Option<WholeImageClassifier>,
    top_k: usize,
    use_tta: bool,
    context: Option<String>,
}

impl Scanner {
    pub fn new(
        detector: Option<RegionDetector>,
        classifier: Option<WholeImageClassifier>,
        top_k: usize,
        use_tta: bool,
    ) -> Self {
        Self {
            detector,
            classifier,
            top_k,
            use_tta,
            context: None,
        }
    }

    /// Loads the handles `config.mode` asks for.
    pub fn from_config(config: &Config) -> Self {
        let detector = config
            .mode
            .detects()
            .then(|| RegionDetector::load(config.detector_config()));
        let classifier = config
            .mode
            .classifies()
            .then(|| WholeImageClassifier::load(config.classifier_config()));
        Self::new(detector, classifier, config.top_k, config.use_tta())
            .with_context(config.context.clone())
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn model_info(&self) -> Vec<ModelInfo> {
        self.detector
            .iter()
            .map(RegionDetector::info)
            .chain(self.classifier.iter().map(WholeImageClassifier::info))
            .collect()
    }

    pub fn scan(&self, image_path: &Path) -> ScanReport {
        let detection = self.detector.as_ref().map(|d| d.detect(image_path));
        let classification = self
            .classifier
            .as_ref()
            .map(|c| c.classify(image_path, self.top_k, self.use_tta));

        let explanation = self.explanation_request(
            detection.as_ref().map(|d| d.detections.as_slice()),
            classification.as_ref().map(|c| c.predictions.as_slice()),
        );
        let explanation = match explanation {
            Ok(request) => Some(request),
            Err(e) => {
                debug!(path = %image_path.display(), "No explanation request: {e}");
                None
            }
        };

        ScanReport {
            path: image_path.to_path_buf(),
            detection,
            classification,
            explanation,
        }
    }

    /// Detections are preferred as they carry the localized finding. When
    /// they are missing or fail validation, the predictions are tried.
    fn explanation_request(
        &self,
        detections: Option<&[Detection]>,
        predictions: Option<&[Prediction]>,
    ) -> Result<ExplanationRequest> {
        let context = self.context.as_deref();
        let from_detections = match detections {
            Some(d) if !d.is_empty() => ExplanationRequest::new(d, context),
            _ => Err(ScanError::Validation {
                field: "detections".to_string(),
                reason: "no detections to explain".to_string(),
            }),
        };
        from_detections.or_else(|detections_error| match predictions {
            Some(p) if !p.is_empty() => ExplanationRequest::new(p, context),
            _ => Err(detections_error),
        })
    }
}

pub fn is_supported_image_format(path: &Path) -> bool {
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        matches!(
            extension.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp"
        )
    } else {
        false
    }
}

/// Expands files and directories into the list of images to scan.
///
/// Files named explicitly are kept as given, even when they do not exist, so
/// that each one still gets a report. Directories are walked recursively and
/// filtered by extension.
pub fn collect_images(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            images.push(input.clone());
            continue;
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(input) {
            let entry = entry.map_err(|e| ScanError::FileSystem {
                path: input.clone(),
                operation: "directory walk".to_string(),
                source: e.into(),
            })?;
            let path = entry.path();
            if path.is_file() && is_supported_image_format(path) {
                found.push(path.to_path_buf());
            }
        }
        found.sort();
        images.extend(found);
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_supported_formats() {
        let test_cases = vec![
            ("test.jpg", true),
            ("test.JPEG", true),
            ("test.png", true),
            ("test.webp", true),
            ("test.gif", true),
            ("test.bmp", true),
            ("test.tiff", false),
            ("test.txt", false),
            ("test", false),
        ];

        for (filename, expected) in test_cases {
            assert_eq!(is_supported_image_format(Path::new(filename)), expected, "{filename}");
        }
    }

    #[test]
    fn test_collect_images() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let subdir = temp_dir.path().join("arm");
        fs::create_dir_all(&subdir)?;
        fs::write(subdir.join("b.png"), b"")?;
        fs::write(temp_dir.path().join("a.jpg"), b"")?;
        fs::write(temp_dir.path().join("notes.txt"), b"")?;

        let explicit = PathBuf::from("missing.jpg");
        let images = collect_images(&[temp_dir.path().to_path_buf(), explicit.clone()])?;

        assert_eq!(
            images,
            vec![temp_dir.path().join("a.jpg"), subdir.join("b.png"), explicit]
        );
        Ok(())
    }

    #[test]
    fn test_mock_scan_builds_explanation() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("photo.jpg");
        fs::write(&path, b"mock mode never decodes this")?;

        let scanner = Scanner::new(
            Some(RegionDetector::mock(DetectorConfig::default())),
            Some(WholeImageClassifier::mock(ClassifierConfig::default())),
            5,
            true,
        )
        .with_context(Some("  flaky patches ".to_string()));
        let report = scanner.scan(&path);

        let explanation = report.explanation.as_ref().map(|e| e.primary().label.clone());
        assert_eq!(explanation.as_deref(), Some("eczema"));
        assert_eq!(
            report.explanation.as_ref().and_then(|e| e.user_context()),
            Some("flaky patches")
        );
        assert_eq!(scanner.model_info().len(), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_detections_fall_back_to_predictions() -> Result<()> {
        let scanner = Scanner::new(None, None, 5, true);
        let detections = vec![Detection {
            label: "unknown".to_string(),
            confidence: 91.0,
            region: Region {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            },
        }];
        let predictions = vec![Prediction {
            label: "psoriasis".to_string(),
            confidence: 64.2,
        }];

        let request = scanner
            .explanation_request(Some(detections.as_slice()), Some(predictions.as_slice()))?;
        assert_eq!(request.primary().label, "psoriasis");

        assert!(matches!(
            scanner.explanation_request(Some(detections.as_slice()), Some(&[][..])),
            Err(ScanError::Validation { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_missing_file_has_no_explanation() {
        let scanner = Scanner::new(
            Some(RegionDetector::mock(DetectorConfig::default())),
            None,
            5,
            true,
        );
        let report = scanner.scan(Path::new("no/such/file.png"));
        assert!(report.classification.is_none());
        assert!(report.explanation.is_none());
        assert_eq!(
            report.detection.and_then(|d| d.error_kind),
            Some(ErrorKind::NotFound)
        );
    }
}
