use serde::{Deserialize, Serialize};

use crate::translation::TranslationStats;

/// Counters collected while a page moves through the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetrics {
    /// Bands and edge bands sent to OCR
    pub slices_total: usize,
    /// Slices whose recognition failed and contributed nothing
    pub slices_failed: usize,
    pub raw_detections: usize,
    pub regions_after_merge: usize,
    pub regions_after_consolidation: usize,
    pub translated_regions: usize,
    pub failed_regions: usize,
    pub quality_retries: usize,
    pub carryover_put: usize,
    pub carryover_consumed: usize,
    pub carryover_missed: usize,
    pub translation: TranslationStats,
}

impl PageMetrics {
    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "slices {}/{} ok, regions {} -> {} -> {}, translated {} failed {}, calls {} (fallback {}), carryover put {} consumed {} missed {}",
            self.slices_total - self.slices_failed.min(self.slices_total),
            self.slices_total,
            self.raw_detections,
            self.regions_after_merge,
            self.regions_after_consolidation,
            self.translated_regions,
            self.failed_regions,
            self.translation.provider_calls,
            self.translation.fallback_calls,
            self.carryover_put,
            self.carryover_consumed,
            self.carryover_missed,
        )
    }
}
