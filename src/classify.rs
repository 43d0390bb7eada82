//! Maps continuous 0-5 scores to six ordinal enablement classes.

use crate::grid::Raster;

/// Class labels, indexed by class number.
pub const CLASS_LABELS: [&str; 6] = [
    "Not Enabling",
    "Very Low Enabling",
    "Low Enabling",
    "Moderately Enabling",
    "Enabling",
    "Highly Enabling",
];

/// Classify a continuous score. Inputs are clamped into [0, 5] first.
///
/// Boundaries are half-open at the upper end of each class except the top:
/// 0.00-0.50 -> 0, then 1.50 -> 1, 2.50 -> 2, 3.50 -> 3, 4.50 -> 4, and
/// everything above through 5.00 inclusive -> 5.
pub fn classify_score(score: f64) -> u8 {
    let s = score.clamp(0.0, 5.0);
    if s <= 0.5 {
        0
    } else if s <= 1.5 {
        1
    } else if s <= 2.5 {
        2
    } else if s <= 3.5 {
        3
    } else if s <= 4.5 {
        4
    } else {
        5
    }
}

pub fn class_label(class: u8) -> &'static str {
    CLASS_LABELS[usize::from(class).min(5)]
}

/// Per-cell classification of a score raster; nodata cells stay nodata.
pub fn classify_raster(raster: &Raster) -> Raster {
    let mut out = raster.clone();
    for v in &mut out.data {
        if (*v - raster.nodata).abs() >= f32::EPSILON && !v.is_nan() {
            *v = classify_score(f64::from(*v)) as f32;
        }
    }
    out
}
