/*!
 * Cross-page continuity.
 *
 * Text that runs off the bottom of one page and continues at the top of
 * the next is detected, translated once as a whole and split again: the
 * first half renders on the carrier page, the second half is handed to the
 * next page through the carryover store.
 *
 * - `edges`: candidate groups along the top and bottom margins
 * - `matcher`: greedy pairing of bottom and top groups, pair ids
 * - `split`: local split of a joint translation
 * - `carryover`: in-memory hand-off store with TTL and capacity
 * - `journal`: optional SQLite append-only log of carryover events
 * - `engine`: linking, carrier translation and carryover application
 */

use serde::{Deserialize, Serialize};

pub mod carryover;
pub mod edges;
pub mod engine;
pub mod journal;
pub mod matcher;
pub mod split;

pub use carryover::{CarryoverEntry, CarryoverStore};
pub use edges::{edge_groups, Edge, EdgeGroup};
pub use engine::{ContinuityEngine, LinkReport, LinkedPair};
pub use journal::{CarryoverJournal, JournalEvent, JournalRecord};
pub use matcher::{match_groups, pair_id, EdgePair};
pub use split::split_translation;

/// Edge detection and matching thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Margin height as a share of the page height
    #[serde(default = "default_edge_margin_ratio")]
    pub edge_margin_ratio: f32,

    /// Lower bound on the margin height in pixels
    #[serde(default = "default_edge_margin_min_px")]
    pub edge_margin_min_px: f32,

    /// Horizontal overlap over the narrower width needed to pair two groups
    #[serde(default = "default_min_overlap_ratio")]
    pub min_overlap_ratio: f32,

    /// Vertical gap allowed inside a group, in median text heights
    #[serde(default = "default_group_gap_factor")]
    pub group_gap_factor: f32,
}

fn default_true() -> bool {
    true
}

fn default_edge_margin_ratio() -> f32 {
    0.12
}

fn default_edge_margin_min_px() -> f32 {
    48.0
}

fn default_min_overlap_ratio() -> f32 {
    0.5
}

fn default_group_gap_factor() -> f32 {
    1.5
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            edge_margin_ratio: default_edge_margin_ratio(),
            edge_margin_min_px: default_edge_margin_min_px(),
            min_overlap_ratio: default_min_overlap_ratio(),
            group_gap_factor: default_group_gap_factor(),
        }
    }
}

impl ContinuityConfig {
    /// Margin height in pixels for a page
    pub fn edge_margin(&self, page_height: u32) -> f32 {
        (self.edge_margin_ratio * page_height as f32).max(self.edge_margin_min_px)
    }
}
