use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the rash inference pipeline.
///
/// The first five variants are the caller-facing taxonomy carried by every
/// outcome. The remaining ones describe where an unexpected failure happened
/// and are reported to callers as [`ErrorKind::InferenceFailure`].
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Image file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Unable to read the image file. Please ensure it's a valid image format (JPG, PNG, GIF, or WebP).")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Image is too small. Please upload a larger, clearer image (minimum {min}x{min} pixels).")]
    TooSmall { width: u32, height: u32, min: u32 },

    #[error("Image appears to be too blurry or low quality. Please upload a clearer, well-focused image.")]
    TooBlurry { variance: f64, min_variance: f64 },

    #[error("{stage} error: {message}")]
    InferenceFailure { stage: &'static str, message: String },

    #[error("Model artifact not found: {}", path.display())]
    ModelUnavailable { path: PathBuf },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ScanError>;

/// The error taxonomy exposed in outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unreadable,
    TooSmall,
    TooBlurry,
    InferenceFailure,
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unreadable { .. } => ErrorKind::Unreadable,
            Self::TooSmall { .. } => ErrorKind::TooSmall,
            Self::TooBlurry { .. } => ErrorKind::TooBlurry,
            _ => ErrorKind::InferenceFailure,
        }
    }

    /// Rewraps anything outside the caller-correctable taxonomy as an
    /// `InferenceFailure` tagged with `stage`, keeping the full source chain
    /// in the message.
    pub fn into_inference_failure(self, stage: &'static str) -> Self {
        match self.kind() {
            ErrorKind::InferenceFailure => match self {
                Self::InferenceFailure { .. } => self,
                other => Self::InferenceFailure {
                    stage,
                    message: describe_chain(&other),
                },
            },
            _ => self,
        }
    }
}

fn describe_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for ScanError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for ScanError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors only arise while reshaping model inputs and outputs.
impl From<ndarray::ShapeError> for ScanError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
