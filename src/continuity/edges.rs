use serde::{Deserialize, Serialize};

use crate::detection::consolidate::join_fragments;
use crate::page::{BBox, PageContext, Region};

use super::ContinuityConfig;

/// Page boundary a group sits against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Top,
    Bottom,
}

/// Regions along one page edge that read as one piece of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeGroup {
    pub edge: Edge,
    /// Member ids in reading order, the first one leads
    pub region_ids: Vec<String>,
    pub bbox: BBox,
    /// Member texts joined in reading order
    pub text: String,
    /// Left-to-right rank among the groups of the same edge
    pub column: usize,
}

impl EdgeGroup {
    pub fn leader_id(&self) -> &str {
        self.region_ids.first().map(String::as_str).unwrap_or("")
    }

    /// First whitespace-separated token, at most eight characters
    pub fn first_token(&self) -> String {
        self.text
            .split_whitespace()
            .next()
            .unwrap_or("")
            .chars()
            .take(8)
            .collect()
    }
}

fn eligible(region: &Region) -> bool {
    !region.is_watermark
        && !region.skip_translation
        && !region.continuity.is_linked()
        && !region.bbox.is_degenerate()
        && !region.normalized_text.is_empty()
}

fn in_margin(region: &Region, edge: Edge, margin: f32, page_height: f32) -> bool {
    match edge {
        Edge::Top => region.bbox.y1 <= margin,
        Edge::Bottom => region.bbox.y2 >= page_height - margin,
    }
}

fn median_height(regions: &[&Region]) -> f32 {
    let mut heights: Vec<f32> = regions.iter().map(|r| r.bbox.height()).collect();
    if heights.is_empty() {
        return 0.0;
    }
    heights.sort_by(|a, b| a.total_cmp(b));
    heights[heights.len() / 2]
}

/// Candidate groups along the top or bottom edge of a page
///
/// Regions inside the margin are clustered when they overlap horizontally
/// and sit within `group_gap_factor` median text heights of each other.
pub fn edge_groups(context: &PageContext, edge: Edge, config: &ContinuityConfig) -> Vec<EdgeGroup> {
    if context.height == 0 {
        return Vec::new();
    }
    let margin = config.edge_margin(context.height);
    let page_height = context.height as f32;

    let mut candidates: Vec<&Region> = context
        .regions
        .iter()
        .filter(|r| eligible(r) && in_margin(r, edge, margin, page_height))
        .collect();
    candidates.sort_by(|a, b| {
        a.bbox
            .y1
            .total_cmp(&b.bbox.y1)
            .then(a.bbox.x1.total_cmp(&b.bbox.x1))
            .then_with(|| a.id.cmp(&b.id))
    });
    let max_gap = config.group_gap_factor * median_height(&candidates);

    let mut clusters: Vec<(BBox, Vec<&Region>)> = Vec::new();
    for region in candidates {
        let joined = clusters.iter_mut().find(|(bbox, _)| {
            bbox.horizontal_overlap_ratio(&region.bbox) > 0.0 && bbox.vertical_gap(&region.bbox) <= max_gap
        });
        match joined {
            Some((bbox, members)) => {
                *bbox = bbox.union(&region.bbox);
                members.push(region);
            }
            None => clusters.push((region.bbox, vec![region])),
        }
    }

    let mut groups: Vec<EdgeGroup> = clusters
        .into_iter()
        .map(|(bbox, members)| EdgeGroup {
            edge,
            region_ids: members.iter().map(|r| r.id.clone()).collect(),
            bbox,
            text: join_fragments(members.iter().map(|r| r.normalized_text.as_str())),
            column: 0,
        })
        .collect();

    let mut by_x: Vec<usize> = (0..groups.len()).collect();
    by_x.sort_by(|&a, &b| {
        groups[a]
            .bbox
            .center()
            .0
            .total_cmp(&groups[b].bbox.center().0)
            .then(a.cmp(&b))
    });
    for (rank, index) in by_x.into_iter().enumerate() {
        groups[index].column = rank;
    }
    groups
}
