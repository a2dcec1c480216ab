//! Class label vocabulary resolution.
//!
//! Labels come from metadata embedded in the model artifact when it is
//! complete, otherwise from a default list when the artifact's class count
//! agrees with it, otherwise they are synthesized as `class_<i>`.

use std::collections::BTreeMap;

/// Class index to label, as declared by a model artifact.
pub type LabelMetadata = BTreeMap<usize, String>;

pub const DEFAULT_DETECTOR_LABELS: [&str; 5] =
    ["eczema", "psoriasis", "dermatitis", "acne", "rash"];

pub const DEFAULT_CLASSIFIER_LABELS: [&str; 9] = [
    "atopic_dermatitis",
    "basal_cell_carcinoma",
    "benign_keratosis",
    "dermatofibroma",
    "melanocytic_nevus",
    "melanoma",
    "squamous_cell_carcinoma",
    "tinea_ringworm",
    "vascular_lesion",
];

pub fn synthesized_label(index: usize) -> String {
    format!("class_{index}")
}

/// Resolves the ordered vocabulary for a model.
///
/// `declared_count` is the number of classes the artifact's output layer
/// carries, when known.
pub fn resolve_vocabulary(
    metadata: Option<&LabelMetadata>,
    declared_count: Option<usize>,
    defaults: &[&str],
) -> Vec<String> {
    if let Some(labels) = metadata.and_then(|m| complete_labels(m, declared_count)) {
        return labels;
    }

    match declared_count {
        Some(count) if count != defaults.len() => (0..count).map(synthesized_label).collect(),
        _ => defaults.iter().map(|label| label.to_string()).collect(),
    }
}

fn complete_labels(metadata: &LabelMetadata, declared_count: Option<usize>) -> Option<Vec<String>> {
    let count = declared_count.unwrap_or(metadata.len());
    if count == 0 {
        return None;
    }
    (0..count).map(|i| metadata.get(&i).cloned()).collect()
}

/// Parses a `names` metadata entry.
///
/// Accepts a JSON array of labels, a JSON object keyed by index, or the
/// Python dict literal Ultralytics writes (`{0: 'eczema', 1: 'acne'}`).
pub fn parse_names(raw: &str) -> Option<LabelMetadata> {
    let parsed: Option<LabelMetadata> = if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
        Some(list.into_iter().enumerate().collect())
    } else if let Ok(map) = serde_json::from_str::<BTreeMap<String, String>>(raw) {
        map.into_iter()
            .map(|(k, v)| k.trim().parse().ok().map(|i| (i, v)))
            .collect()
    } else {
        parse_python_dict(raw)
    };
    parsed.filter(|labels| !labels.is_empty())
}

/// Parses a `class_to_idx` metadata entry (`{"label": index}`) into an
/// index to label map.
pub fn parse_class_to_idx(raw: &str) -> Option<LabelMetadata> {
    let map = serde_json::from_str::<BTreeMap<String, usize>>(raw).ok()?;
    let labels: LabelMetadata = map.into_iter().map(|(label, i)| (i, label)).collect();
    (!labels.is_empty()).then_some(labels)
}

fn parse_python_dict(raw: &str) -> Option<LabelMetadata> {
    let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut labels = LabelMetadata::new();
    let mut rest = body.trim_start();

    while !rest.is_empty() {
        let (key, after_key) = rest.split_once(':')?;
        let index: usize = key.trim().parse().ok()?;

        let after_key = after_key.trim_start();
        let quote = after_key.chars().next().filter(|c| *c == '\'' || *c == '"')?;
        let value_and_rest = &after_key[1..];
        let end = value_and_rest.find(quote)?;
        labels.insert(index, value_and_rest[..end].to_string());

        rest = value_and_rest[end + 1..]
            .trim_start()
            .trim_start_matches(',')
            .trim_start();
    }

    Some(labels)
}
