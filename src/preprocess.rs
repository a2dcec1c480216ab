use std::path::Path;

use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;

use crate::errors::{Result, ScanError};

pub const INPUT_SIZE: u32 = 256;
/// Edge length the centre-crop view is resized to before cropping back to
/// [`INPUT_SIZE`].
pub const CROP_RESIZE: u32 = 282;
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

pub fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|source| ScanError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// One deterministic view of the input used for test-time augmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Identity,
    HorizontalFlip,
    VerticalFlip,
    CenterCrop,
}

impl View {
    pub const TTA: [View; 4] = [
        View::Identity,
        View::HorizontalFlip,
        View::VerticalFlip,
        View::CenterCrop,
    ];

    /// Produces an `INPUT_SIZE` square image for this view.
    pub fn render(self, image: &RgbImage) -> RgbImage {
        match self {
            View::Identity => resize_square(image, INPUT_SIZE),
            View::HorizontalFlip => imageops::flip_horizontal(&resize_square(image, INPUT_SIZE)),
            View::VerticalFlip => imageops::flip_vertical(&resize_square(image, INPUT_SIZE)),
            View::CenterCrop => {
                let enlarged = resize_square(image, CROP_RESIZE);
                let offset = (CROP_RESIZE - INPUT_SIZE) / 2;
                imageops::crop_imm(&enlarged, offset, offset, INPUT_SIZE, INPUT_SIZE).to_image()
            }
        }
    }

    pub fn tensor(self, image: &RgbImage) -> Array4<f32> {
        normalize(&self.render(image))
    }
}

pub fn resize_square(image: &RgbImage, size: u32) -> RgbImage {
    imageops::resize(image, size, size, FilterType::Triangle)
}

/// Scales to `[0, 1]`, applies per-channel mean/std and lays the pixels out
/// as a `1 x 3 x H x W` batch.
pub fn normalize(image: &RgbImage) -> Array4<f32> {
    let mut tensor = image
        .as_ndarray3()
        .mapv(|v| f32::from(v) / 255.0)
        .insert_axis(Axis(0));

    for (c, mut channel) in tensor.axis_iter_mut(Axis(1)).enumerate() {
        channel.mapv_inplace(|v| (v - MEAN[c]) / STD[c]);
    }
    tensor
}
