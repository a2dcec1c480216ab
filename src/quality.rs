use image::{DynamicImage, GenericImageView, GrayImage, Luma, RgbImage};
use imageproc::{filter::laplacian_filter, map::map_colors};

use crate::errors::{Result, ScanError};

pub const MIN_DIMENSION: u32 = 50;
pub const MIN_SHARPNESS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    TooSmall { width: u32, height: u32 },
    TooBlurry { variance: f64 },
}

/// Result of the pre-inference image checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityVerdict {
    Ok,
    Rejected(Rejection),
}

impl QualityVerdict {
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Minimum-dimension and sharpness checks run before classification.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    pub min_dimension: u32,
    pub min_sharpness: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            min_dimension: MIN_DIMENSION,
            min_sharpness: MIN_SHARPNESS,
        }
    }
}

impl QualityGate {
    /// Dimensions are checked first; the sharpness check never runs on an
    /// undersized image.
    pub fn evaluate(&self, image: &DynamicImage) -> QualityVerdict {
        let (width, height) = image.dimensions();
        if width < self.min_dimension || height < self.min_dimension {
            return QualityVerdict::Rejected(Rejection::TooSmall { width, height });
        }

        let variance = laplacian_variance(&bt601_gray(&image.to_rgb8()));
        if variance < self.min_sharpness {
            return QualityVerdict::Rejected(Rejection::TooBlurry { variance });
        }

        QualityVerdict::Ok
    }

    pub fn check(&self, image: &DynamicImage) -> Result<()> {
        match self.evaluate(image) {
            QualityVerdict::Ok => Ok(()),
            QualityVerdict::Rejected(Rejection::TooSmall { width, height }) => {
                Err(ScanError::TooSmall {
                    width,
                    height,
                    min: self.min_dimension,
                })
            }
            QualityVerdict::Rejected(Rejection::TooBlurry { variance }) => {
                Err(ScanError::TooBlurry {
                    variance,
                    min_variance: self.min_sharpness,
                })
            }
        }
    }
}

/// Grayscale with BT.601 weights (0.299, 0.587, 0.114) in the 14-bit fixed
/// point OpenCV's `RGB2GRAY` uses.
///
/// `image`'s own `to_luma8` uses BT.709 weights, which map some saturated
/// colours onto the same gray as their neighbours and hide the texture the
/// sharpness threshold is calibrated on.
pub fn bt601_gray(image: &RgbImage) -> GrayImage {
    map_colors(image, |p| {
        let [r, g, b] = p.0.map(u32::from);
        Luma([((r * 4899 + g * 9617 + b * 1868 + (1 << 13)) >> 14) as u8])
    })
}

/// Variance of the 4-neighbour Laplacian over every pixel of `gray`.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let laplacian = laplacian_filter(gray);
    let count = laplacian.width() as usize * laplacian.height() as usize;
    if count == 0 {
        return 0.0;
    }

    let (sum, sum_sq) = laplacian.pixels().fold((0.0_f64, 0.0_f64), |(s, sq), p| {
        let v = f64::from(p.0[0]);
        (s + v, sq + v * v)
    });
    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn checkerboard(size: u32, cell: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(size, size, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }

    #[test]
    fn test_small_image_rejected_before_blur_check() {
        let black = DynamicImage::ImageRgb8(RgbImage::new(10, 10));
        assert_eq!(
            QualityGate::default().evaluate(&black),
            QualityVerdict::Rejected(Rejection::TooSmall {
                width: 10,
                height: 10
            })
        );
    }

    #[test]
    fn test_one_short_side_is_enough() {
        let strip = DynamicImage::ImageRgb8(RgbImage::new(400, 49));
        assert!(matches!(
            QualityGate::default().evaluate(&strip),
            QualityVerdict::Rejected(Rejection::TooSmall { .. })
        ));
    }

    #[test]
    fn test_flat_gray_is_blurry() {
        let gray = DynamicImage::ImageRgb8(RgbImage::from_pixel(256, 256, Rgb([128, 128, 128])));
        let verdict = QualityGate::default().evaluate(&gray);
        assert_eq!(
            verdict,
            QualityVerdict::Rejected(Rejection::TooBlurry { variance: 0.0 })
        );
        assert!(matches!(
            QualityGate::default().check(&gray),
            Err(ScanError::TooBlurry { .. })
        ));
    }

    #[test]
    fn test_sharp_image_passes() {
        let image = checkerboard(128, 8);
        assert!(laplacian_variance(&image.to_luma8()) > MIN_SHARPNESS);
        assert!(QualityGate::default().evaluate(&image).is_ok());
    }

    #[test]
    fn test_bt601_weights() {
        let image = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([0, 255, 0]),
            _ => Rgb([54, 54, 54]),
        });
        let gray = bt601_gray(&image);
        assert_eq!(gray.as_raw(), &vec![76, 150, 54]);
    }

    #[test]
    fn test_red_on_gray_texture_passes() {
        // BT.709 maps both colours to 54, which reads as a flat image
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(128, 128, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([255, 0, 0])
            } else {
                Rgb([54, 54, 54])
            }
        }));
        assert_eq!(laplacian_variance(&image.to_luma8()), 0.0);
        assert!(laplacian_variance(&bt601_gray(&image.to_rgb8())) > MIN_SHARPNESS);
        assert!(QualityGate::default().evaluate(&image).is_ok());
    }

    #[test]
    fn test_laplacian_variance_of_single_spike() {
        let mut gray = GrayImage::from_pixel(5, 5, Luma([0]));
        gray.put_pixel(2, 2, Luma([10]));
        // centre -40, four neighbours +10: mean 0, mean square 2000 / 25
        let variance = laplacian_variance(&gray);
        assert!((variance - 80.0).abs() < 1e-9);
    }
}
