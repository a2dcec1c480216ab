//! Fixed outputs served while no trained model is loaded.
//!
//! Both tables are already in descending confidence order and never depend
//! on the input image.

use crate::result::{Detection, Prediction, RankedResults, Region};

const MOCK_DETECTIONS: [(&str, f32, Region); 5] = [
    ("eczema", 85.5, region(100, 150, 200, 180)),
    ("psoriasis", 72.3, region(95, 145, 210, 190)),
    ("contact_dermatitis", 58.7, region(105, 155, 195, 175)),
    ("atopic_dermatitis", 45.2, region(98, 148, 205, 185)),
    ("seborrheic_dermatitis", 32.8, region(102, 152, 198, 178)),
];

const MOCK_PREDICTIONS: [(&str, f32); 5] = [
    ("atopic_dermatitis", 85.5),
    ("melanocytic_nevus", 72.3),
    ("benign_keratosis", 58.7),
    ("vascular_lesion", 45.2),
    ("dermatofibroma", 32.8),
];

const fn region(x: i32, y: i32, width: i32, height: i32) -> Region {
    Region {
        x,
        y,
        width,
        height,
    }
}

pub fn mock_detections() -> RankedResults<Detection> {
    RankedResults::from_unsorted(
        MOCK_DETECTIONS
            .iter()
            .map(|&(label, confidence, region)| Detection {
                label: label.to_string(),
                confidence,
                region,
            })
            .collect(),
    )
}

/// The first `top_k` entries of the fixed prediction table.
pub fn mock_predictions(top_k: usize) -> RankedResults<Prediction> {
    RankedResults::from_unsorted(
        MOCK_PREDICTIONS
            .iter()
            .take(top_k)
            .map(|&(label, confidence)| Prediction {
                label: label.to_string(),
                confidence,
            })
            .collect(),
    )
}
