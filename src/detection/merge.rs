/*!
 * Suppression merge of overlapping detections from different slices.
 */

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::page::Region;

/// Overlap thresholds for the suppression merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_containment_threshold")]
    pub containment_threshold: f32,
}

fn default_iou_threshold() -> f32 {
    0.5
}

fn default_containment_threshold() -> f32 {
    0.8
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            iou_threshold: default_iou_threshold(),
            containment_threshold: default_containment_threshold(),
        }
    }
}

impl MergeConfig {
    pub fn overlaps(&self, a: &Region, b: &Region) -> bool {
        a.bbox.iou(&b.bbox) >= self.iou_threshold
            || a.bbox.containment(&b.bbox) >= self.containment_threshold
    }
}

const CONFIDENCE_EPSILON: f32 = 1e-6;

fn text_len(region: &Region) -> usize {
    region.normalized_text.chars().count()
}

/// Highest confidence first, then earlier on the page, then longer text
fn merge_order(a: &Region, b: &Region) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(a.bbox.y1.total_cmp(&b.bbox.y1))
        .then(a.bbox.x1.total_cmp(&b.bbox.x1))
        .then_with(|| text_len(b).cmp(&text_len(a)))
        .then_with(|| a.id.cmp(&b.id))
}

/// Page order: top to bottom, left to right
pub fn page_order(a: &Region, b: &Region) -> Ordering {
    a.bbox
        .y1
        .total_cmp(&b.bbox.y1)
        .then(a.bbox.x1.total_cmp(&b.bbox.x1))
        .then_with(|| a.id.cmp(&b.id))
}

/// Merge overlapping detections, keeping the most confident of each group
///
/// A candidate overlapping a kept region is dropped, except when it
/// overlaps exactly one kept region of equal confidence and carries longer
/// text, in which case it takes that region's place. The result has no two
/// regions above either threshold, so merging it again changes nothing.
pub fn merge(mut regions: Vec<Region>, config: &MergeConfig) -> Vec<Region> {
    regions.sort_by(merge_order);

    let mut kept: Vec<Region> = Vec::with_capacity(regions.len());
    for candidate in regions {
        let overlapping: Vec<usize> = kept
            .iter()
            .enumerate()
            .filter(|(_, k)| config.overlaps(k, &candidate))
            .map(|(i, _)| i)
            .collect();

        match overlapping.as_slice() {
            [] => kept.push(candidate),
            [only] => {
                let incumbent = &kept[*only];
                let same_confidence =
                    (incumbent.confidence - candidate.confidence).abs() < CONFIDENCE_EPSILON;
                if same_confidence && text_len(&candidate) > text_len(incumbent) {
                    kept[*only] = candidate;
                }
            }
            _ => {}
        }
    }

    kept.sort_by(page_order);
    kept
}
