use std::{fmt, path::Path, path::PathBuf};

use image::{imageops, imageops::FilterType, GenericImageView, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider},
    session::{builder::SessionBuilder, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    errors::{Result, ScanError},
    preprocess::open_image,
    traits::{ClassificationModel, RawBox, RegionModel},
    vocabulary::{parse_class_to_idx, parse_names, LabelMetadata},
};

/// Default IoU above which overlapping boxes of the same class are suppressed.
pub const NMS_IOU_THRESHOLD: f32 = 0.7;
const DEFAULT_DETECTOR_INPUT: u32 = 640;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DeviceRequest {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// The compute device a model runs on, fixed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda { device_id: i32 },
}

impl Device {
    /// Picks the device a session will actually run on. CUDA is only chosen
    /// when its execution provider reports itself available, whether it was
    /// requested explicitly or through `auto`.
    pub fn select(request: DeviceRequest, device_id: i32) -> Self {
        let cuda_available = request != DeviceRequest::Cpu && cuda_available(device_id);
        Self::resolve(request, device_id, cuda_available)
    }

    fn resolve(request: DeviceRequest, device_id: i32, cuda_available: bool) -> Self {
        match request {
            DeviceRequest::Cpu => Device::Cpu,
            DeviceRequest::Auto | DeviceRequest::Cuda if cuda_available => {
                Device::Cuda { device_id }
            }
            DeviceRequest::Auto => Device::Cpu,
            DeviceRequest::Cuda => {
                warn!("CUDA device {device_id} requested but unavailable; falling back to CPU");
                Device::Cpu
            }
        }
    }
}

fn cuda_available(device_id: i32) -> bool {
    matches!(
        CUDAExecutionProvider::default()
            .with_device_id(device_id)
            .is_available(),
        Ok(true)
    )
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda { device_id } => write!(f, "cuda:{device_id}"),
        }
    }
}

/// Load-time facts about one strategy's model, read-only afterwards.
#[derive(Debug, Clone)]
pub struct ModelState {
    pub loaded: bool,
    pub path: PathBuf,
    pub device: Option<Device>,
    pub class_labels: Vec<String>,
    pub threshold: f32,
}

impl ModelState {
    pub fn info(&self, model_type: &'static str) -> ModelInfo {
        let device = self
            .device
            .map_or_else(|| "unknown".to_string(), |d| d.to_string());
        if self.loaded {
            ModelInfo {
                loaded: true,
                model_path: self.path.clone(),
                device,
                classes: Some(self.class_labels.clone()),
                confidence_threshold: Some(self.threshold),
                model_type,
                message: None,
            }
        } else {
            ModelInfo {
                loaded: false,
                model_path: self.path.clone(),
                device,
                classes: None,
                confidence_threshold: None,
                model_type,
                message: Some("Model not loaded - using mock mode".to_string()),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub loaded: bool,
    pub model_path: PathBuf,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f32>,
    pub model_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn model_error<E>(operation: impl Into<String>) -> impl FnOnce(E) -> ScanError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let operation = operation.into();
    move |e| ScanError::Model {
        operation,
        source: Box::new(e),
    }
}

fn build_session(model_path: &Path, device: Device) -> Result<Session> {
    if !model_path.exists() {
        return Err(ScanError::ModelUnavailable {
            path: model_path.to_path_buf(),
        });
    }

    let providers = match device {
        Device::Cuda { device_id } => vec![
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ],
        Device::Cpu => vec![CPUExecutionProvider::default().build()],
    };

    SessionBuilder::new()
        .map_err(model_error("session builder initialization"))?
        .with_execution_providers(providers)
        .map_err(model_error("execution provider setup"))?
        .with_memory_pattern(true)
        .map_err(model_error("memory pattern setup"))?
        .commit_from_file(model_path)
        .map_err(model_error(format!(
            "model file load: {}",
            model_path.display()
        )))
}

fn output_dims(session: &Session) -> Option<Vec<i64>> {
    session
        .outputs
        .first()?
        .output_type
        .tensor_shape()
        .map(|shape| shape.iter().copied().collect())
}

fn read_label_metadata(session: &Session) -> Option<LabelMetadata> {
    let metadata = session.metadata().ok()?;
    if let Some(names) = metadata.custom("names").ok().flatten() {
        if let Some(labels) = parse_names(&names) {
            return Some(labels);
        }
    }
    metadata
        .custom("class_to_idx")
        .ok()
        .flatten()
        .and_then(|raw| parse_class_to_idx(&raw))
}

fn first_output_f32(session: &mut Session, input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
    let outputs = session.run(ort::inputs![TensorRef::from_array_view(
        &input.as_standard_layout()
    )?])?;
    Ok(outputs[0].try_extract_array::<f32>()?.to_owned())
}

/// YOLOv8-style detector exported to ONNX.
///
/// Expects a single `[1, 4 + C, N]` output of centre boxes followed by one
/// score per class, in model input pixels.
pub struct OnnxRegionModel {
    session: Mutex<Session>,
    input_size: u32,
    class_count: Option<usize>,
    labels: Option<LabelMetadata>,
    iou_threshold: f32,
}

impl OnnxRegionModel {
    pub fn load(model_path: &Path, device: Device) -> Result<Self> {
        info!("Loading detection model from {}", model_path.display());
        let session = build_session(model_path, device)?;

        let input_size = session
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_shape())
            .and_then(|shape| shape.get(2).copied())
            .filter(|&side| side > 0)
            .map_or(DEFAULT_DETECTOR_INPUT, |side| side as u32);
        let class_count = output_dims(&session)
            .and_then(|dims| dims.get(1).copied())
            .filter(|&rows| rows > 4)
            .map(|rows| rows as usize - 4);
        let labels = read_label_metadata(&session);
        debug!(input_size, ?class_count, "Detection model inspected");

        Ok(Self {
            session: Mutex::new(session),
            input_size,
            class_count,
            labels,
            iou_threshold: NMS_IOU_THRESHOLD,
        })
    }
}

impl RegionModel for OnnxRegionModel {
    fn predict(&self, image_path: &Path, confidence_threshold: f32) -> Result<Vec<RawBox>> {
        let image = open_image(image_path)?;
        let (width, height) = image.dimensions();
        let resized = imageops::resize(
            &image.to_rgb8(),
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );
        let tensor = unit_tensor(&resized);

        let output = {
            let mut session = self.session.lock();
            first_output_f32(&mut session, tensor.view())?
        };
        let output = output.into_dimensionality::<Ix3>()?;

        let scale = (
            width as f32 / self.input_size as f32,
            height as f32 / self.input_size as f32,
        );
        let boxes = decode_yolo(output.view(), confidence_threshold, scale);
        Ok(non_max_suppression(boxes, self.iou_threshold))
    }

    fn class_count(&self) -> Option<usize> {
        self.class_count
    }

    fn label_metadata(&self) -> Option<LabelMetadata> {
        self.labels.clone()
    }
}

/// Whole-image classifier exported to ONNX; the first output holds
/// `[batch, classes]` logits.
pub struct OnnxClassificationModel {
    session: Mutex<Session>,
    class_count: Option<usize>,
    labels: Option<LabelMetadata>,
}

impl OnnxClassificationModel {
    pub fn load(model_path: &Path, device: Device) -> Result<Self> {
        info!("Loading classification model from {}", model_path.display());
        let session = build_session(model_path, device)?;

        let class_count = output_dims(&session)
            .and_then(|dims| dims.last().copied())
            .filter(|&classes| classes > 0)
            .map(|classes| classes as usize);
        let labels = read_label_metadata(&session);
        debug!(?class_count, "Classification model inspected");

        Ok(Self {
            session: Mutex::new(session),
            class_count,
            labels,
        })
    }
}

impl ClassificationModel for OnnxClassificationModel {
    fn logits(&self, batch: ArrayView4<f32>) -> Result<Array2<f32>> {
        let output = {
            let mut session = self.session.lock();
            first_output_f32(&mut session, batch)?
        };
        Ok(output.into_dimensionality::<Ix2>()?)
    }

    fn class_count(&self) -> Option<usize> {
        self.class_count
    }

    fn label_metadata(&self) -> Option<LabelMetadata> {
        self.labels.clone()
    }
}

fn unit_tensor(image: &RgbImage) -> Array4<f32> {
    image
        .as_ndarray3()
        .mapv(|v| f32::from(v) / 255.0)
        .insert_axis(Axis(0))
}

/// Decodes a `[1, 4 + C, N]` output into corner boxes scaled to source
/// pixels, keeping the best class per box when it reaches `threshold`.
pub fn decode_yolo(output: ArrayView3<f32>, threshold: f32, scale: (f32, f32)) -> Vec<RawBox> {
    if output.shape()[0] == 0 {
        warn!("Detection output has an empty batch");
        return Vec::new();
    }
    let rows = output.shape()[1];
    if rows <= 4 {
        warn!(rows, "Detection output carries no class scores");
        return Vec::new();
    }
    let (scale_x, scale_y) = scale;

    output
        .index_axis(Axis(0), 0)
        .axis_iter(Axis(1))
        .filter_map(|column| {
            let (class_id, confidence) = column
                .slice(s![4..])
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, candidate| {
                    if candidate.1 > best.1 {
                        candidate
                    } else {
                        best
                    }
                });
            if confidence < threshold {
                return None;
            }

            let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
            Some(RawBox {
                x1: (cx - w / 2.0) * scale_x,
                y1: (cy - h / 2.0) * scale_y,
                x2: (cx + w / 2.0) * scale_x,
                y2: (cy + h / 2.0) * scale_y,
                class_id,
                confidence,
            })
        })
        .collect()
}

fn iou(a: &RawBox, b: &RawBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    let intersection = if x2 > x1 && y2 > y1 {
        (x2 - x1) * (y2 - y1)
    } else {
        0.0
    };
    let area = |r: &RawBox| (r.x2 - r.x1) * (r.y2 - r.y1);
    let union = area(a) + area(b) - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Per-class NMS. Survivors are returned highest confidence first.
pub fn non_max_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; boxes.len()];
    let mut keep = Vec::new();
    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(boxes[i]);
        for j in (i + 1)..boxes.len() {
            if !suppressed[j]
                && boxes[i].class_id == boxes[j].class_id
                && iou(&boxes[i], &boxes[j]) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize, confidence: f32) -> RawBox {
        RawBox {
            x1,
            y1,
            x2,
            y2,
            class_id,
            confidence,
        }
    }

    #[test]
    fn test_decode_yolo_scales_and_filters() {
        // two candidates, two classes: rows are cx, cy, w, h, score0, score1
        let output = array![[
            [100.0_f32, 300.0],
            [100.0, 300.0],
            [40.0, 20.0],
            [20.0, 20.0],
            [0.1, 0.2],
            [0.8, 0.3],
        ]];
        let boxes = decode_yolo(output.view(), 0.5, (2.0, 0.5));
        assert_eq!(boxes, vec![raw(160.0, 45.0, 240.0, 55.0, 1, 0.8)]);
    }

    #[test]
    fn test_decode_yolo_without_class_rows() {
        let output = Array3::<f32>::zeros((1, 4, 10));
        assert!(decode_yolo(output.view(), 0.5, (1.0, 1.0)).is_empty());
    }

    #[test]
    fn test_decode_yolo_empty_batch() {
        let output = Array3::<f32>::zeros((0, 9, 10));
        assert!(decode_yolo(output.view(), 0.5, (1.0, 1.0)).is_empty());
    }

    #[test]
    fn test_nms_is_per_class() {
        let boxes = vec![
            raw(0.0, 0.0, 10.0, 10.0, 0, 0.6),
            raw(0.0, 0.0, 10.0, 10.0, 0, 0.9),
            raw(0.0, 0.0, 10.0, 10.0, 1, 0.7),
            raw(50.0, 50.0, 60.0, 60.0, 0, 0.5),
        ];
        let kept = non_max_suppression(boxes, 0.7);
        let confidences: Vec<_> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7, 0.5]);
    }

    #[test]
    fn test_missing_artifact_is_model_unavailable() {
        let result = OnnxClassificationModel::load(Path::new("does/not/exist.onnx"), Device::Cpu);
        assert!(matches!(result, Err(ScanError::ModelUnavailable { .. })));
    }

    #[test]
    fn test_unloaded_model_info() {
        let state = ModelState {
            loaded: false,
            path: "models/swin_best.onnx".into(),
            device: None,
            class_labels: vec![],
            threshold: 0.01,
        };
        let info = state.info("Swin Transformer");
        assert!(!info.loaded);
        assert_eq!(info.device, "unknown");
        assert!(info.classes.is_none());
        assert_eq!(
            info.message.as_deref(),
            Some("Model not loaded - using mock mode")
        );
    }

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Cuda { device_id: 1 }.to_string(), "cuda:1");
        assert_eq!(Device::select(DeviceRequest::Cpu, 0), Device::Cpu);
    }

    #[test]
    fn test_explicit_cuda_requires_provider() {
        assert_eq!(Device::resolve(DeviceRequest::Cuda, 2, false), Device::Cpu);
        assert_eq!(
            Device::resolve(DeviceRequest::Cuda, 2, true),
            Device::Cuda { device_id: 2 }
        );
        assert_eq!(Device::resolve(DeviceRequest::Auto, 0, false), Device::Cpu);
        assert_eq!(Device::resolve(DeviceRequest::Cpu, 0, true), Device::Cpu);
    }
}
