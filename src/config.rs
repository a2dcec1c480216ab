use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::classifier::{
    ClassifierConfig, DEFAULT_CLASSIFIER_MODEL, DEFAULT_CLASSIFIER_THRESHOLD, DEFAULT_TOP_K,
};
use crate::detector::{DetectorConfig, DEFAULT_DETECTOR_MODEL, DEFAULT_DETECTOR_THRESHOLD};
use crate::model::DeviceRequest;
use crate::quality::QualityGate;

/// Which strategies run on every input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    Detect,
    Classify,
    #[default]
    Both,
}

impl Mode {
    pub const fn detects(self) -> bool {
        matches!(self, Mode::Detect | Mode::Both)
    }

    pub const fn classifies(self) -> bool {
        matches!(self, Mode::Classify | Mode::Both)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image files or directories to scan.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Mode::Both)]
    pub mode: Mode,

    #[arg(long, default_value = DEFAULT_DETECTOR_MODEL)]
    pub detector_model: PathBuf,

    #[arg(long, default_value = DEFAULT_CLASSIFIER_MODEL)]
    pub classifier_model: PathBuf,

    #[arg(long, default_value_t = DEFAULT_DETECTOR_THRESHOLD, value_parser = check_threshold)]
    pub detector_threshold: f32,

    #[arg(long, default_value_t = DEFAULT_CLASSIFIER_THRESHOLD, value_parser = check_threshold)]
    pub classifier_threshold: f32,

    #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Classify a single view instead of averaging four.
    #[arg(long)]
    pub no_tta: bool,

    #[arg(long, value_enum, default_value_t = DeviceRequest::Auto)]
    pub device: DeviceRequest,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Free-text description forwarded with the explanation request.
    #[arg(short, long)]
    pub context: Option<String>,

    #[arg(long)]
    pub pretty: bool,

    #[arg(short, long)]
    pub verbose: bool,

    #[arg(short, long)]
    pub num_threads: Option<usize>,
}

impl Config {
    pub const fn use_tta(&self) -> bool {
        !self.no_tta
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            model_path: self.detector_model.clone(),
            confidence_threshold: self.detector_threshold,
            device: self.device,
            device_id: self.device_id,
        }
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            model_path: self.classifier_model.clone(),
            confidence_threshold: self.classifier_threshold,
            device: self.device,
            device_id: self.device_id,
            quality: QualityGate::default(),
        }
    }
}

fn check_threshold(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{value} is outside [0, 1]"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() -> Result<(), clap::Error> {
        let config = Config::try_parse_from(["rash-scan", "photo.jpg"])?;
        assert_eq!(config.mode, Mode::Both);
        assert_eq!(config.detector_threshold, 0.5);
        assert_eq!(config.classifier_threshold, 0.01);
        assert_eq!(config.top_k, 5);
        assert!(config.use_tta());
        assert_eq!(config.device, DeviceRequest::Auto);
        assert_eq!(
            config.classifier_config().model_path,
            PathBuf::from("models/swin_best.onnx")
        );
        Ok(())
    }

    #[test]
    fn test_threshold_range_enforced() {
        assert!(Config::try_parse_from(["rash-scan", "--detector-threshold", "1.5", "a.jpg"]).is_err());
        assert!(Config::try_parse_from(["rash-scan", "--classifier-threshold", "x", "a.jpg"]).is_err());
        assert!(check_threshold("0").is_ok());
        assert!(check_threshold("1").is_ok());
    }

    #[test]
    fn test_mode_selection() -> Result<(), clap::Error> {
        let config = Config::try_parse_from(["rash-scan", "--mode", "classify", "--no-tta", "dir"])?;
        assert!(!config.mode.detects());
        assert!(config.mode.classifies());
        assert!(!config.use_tta());
        Ok(())
    }
}
