use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::edges::EdgeGroup;
use super::ContinuityConfig;

/// A bottom group on one page matched to a top group on the next
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgePair {
    pub bottom_index: usize,
    pub top_index: usize,
    pub overlap: f32,
}

/// Pair bottom groups with top groups by horizontal overlap
///
/// Candidates at or above `min_overlap_ratio` are accepted greedily,
/// best overlap first, and each group is used at most once. This is not an
/// optimal assignment; crowded edges can pair a group with its second-best
/// partner.
pub fn match_groups(bottom: &[EdgeGroup], top: &[EdgeGroup], config: &ContinuityConfig) -> Vec<EdgePair> {
    let mut candidates: Vec<EdgePair> = Vec::new();
    for (bottom_index, b) in bottom.iter().enumerate() {
        for (top_index, t) in top.iter().enumerate() {
            let overlap = b.bbox.horizontal_overlap_ratio(&t.bbox);
            if overlap >= config.min_overlap_ratio {
                candidates.push(EdgePair {
                    bottom_index,
                    top_index,
                    overlap,
                });
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.overlap
            .total_cmp(&a.overlap)
            .then(a.bottom_index.cmp(&b.bottom_index))
            .then(a.top_index.cmp(&b.top_index))
    });

    let mut used_bottom = vec![false; bottom.len()];
    let mut used_top = vec![false; top.len()];
    let mut pairs = Vec::new();
    for candidate in candidates {
        if used_bottom[candidate.bottom_index] || used_top[candidate.top_index] {
            continue;
        }
        used_bottom[candidate.bottom_index] = true;
        used_top[candidate.top_index] = true;
        pairs.push(candidate);
    }
    pairs.sort_by_key(|p| p.bottom_index);
    pairs
}

/// Deterministic id for a carrier page and its bottom group
///
/// The hash covers the page id, the first token and the group's column
/// rank. No pixel coordinate goes in, so jitter of either box cannot
/// change the id.
pub fn pair_id(carrier_page: &str, bottom_group: &EdgeGroup) -> String {
    let mut hasher = Sha256::new();
    hasher.update(carrier_page.as_bytes());
    hasher.update(b"|");
    hasher.update(bottom_group.first_token().as_bytes());
    hasher.update(b"|");
    hasher.update(bottom_group.column.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}
