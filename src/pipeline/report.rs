/*!
 * Per-page JSON quality report.
 *
 * Written to `<report_dir>/<page_id>.quality.json` once a page reaches a
 * terminal status, including failed pages. Write failures are logged and
 * swallowed.
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorCode;
use crate::page::{ContinuityRole, PageContext, PageStatus};
use crate::translation::{follow_up, FollowUpAction, QualityConfig};

use super::metrics::PageMetrics;
use super::stages::Stage;

/// One region line of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionReport {
    pub id: String,
    pub source_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUpAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuity_role: Option<ContinuityRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<String>,
}

/// Quality report for one page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub page_id: String,
    pub page_index: usize,
    pub source_language: String,
    pub target_language: String,
    pub status: PageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Seconds spent per stage
    pub timings: BTreeMap<Stage, f64>,
    pub metrics: PageMetrics,
    pub continuity: serde_json::Value,
    pub regions: Vec<RegionReport>,
    pub generated_at: DateTime<Utc>,
}

impl QualityReport {
    pub fn from_context(context: &PageContext, quality: &QualityConfig) -> Self {
        let regions = context
            .regions
            .iter()
            .filter(|r| !r.is_watermark)
            .map(|r| RegionReport {
                id: r.id.clone(),
                source_text: r.source_text.clone(),
                target_text: r.target_text.clone(),
                confidence: r.confidence,
                quality_score: r.quality_score,
                follow_up: follow_up(r, &context.languages, quality),
                continuity_role: r.continuity.role,
                pair_id: r.continuity.pair_id.clone(),
            })
            .collect();

        Self {
            page_id: context.id.clone(),
            page_index: context.page_index,
            source_language: context.languages.source.clone(),
            target_language: context.languages.target.clone(),
            status: context.status,
            error_code: context.error_code,
            error_message: context.error_message.clone(),
            timings: context.timings.clone(),
            metrics: context.metrics.clone(),
            continuity: context.continuity_debug.clone(),
            regions,
            generated_at: Utc::now(),
        }
    }

    /// Regions that recommend a follow-up action
    pub fn flagged(&self) -> impl Iterator<Item = &RegionReport> {
        self.regions.iter().filter(|r| r.follow_up.is_some())
    }

    /// Serialize into `dir`, returning the written path
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create report directory: {:?}", dir))?;
        let path = report_path(dir, &self.page_id);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize quality report")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write quality report: {:?}", path))?;
        Ok(path)
    }
}

/// `<dir>/<page_id>.quality.json`
pub fn report_path(dir: &Path, page_id: &str) -> PathBuf {
    dir.join(format!("{}.quality.json", page_id))
}

/// Write the report for a page, logging instead of failing
pub fn write_quality_report(context: &PageContext, quality: &QualityConfig, dir: &Path) -> Option<PathBuf> {
    let report = QualityReport::from_context(context, quality);
    match report.write_to(dir) {
        Ok(path) => {
            debug!("Page {}: quality report written to {:?}", context.id, path);
            Some(path)
        }
        Err(e) => {
            warn!("Page {}: quality report not written: {:#}", context.id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{BBox, LanguagePair, Region};
    use tempfile::tempdir;

    fn context() -> PageContext {
        let mut ok = Region::new("p-000", BBox::new(0.0, 0.0, 100.0, 20.0), "こんにちは", 0.95);
        ok.target_text = Some("Hello".into());
        let mut failed = Region::new("p-001", BBox::new(0.0, 40.0, 100.0, 60.0), "さようなら", 0.9);
        failed.mark_failed();
        PageContext::new("p", 0, LanguagePair::new("ja", "en")).with_regions(vec![ok, failed])
    }

    #[test]
    fn test_writeQualityReport_shouldUsePageIdFileName() {
        let dir = tempdir().unwrap();
        let path = write_quality_report(&context(), &QualityConfig::default(), dir.path()).unwrap();
        assert_eq!(path, dir.path().join("p.quality.json"));

        let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed["regions"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["regions"][1]["follow_up"], "retry-translation");
    }

    #[test]
    fn test_writeQualityReport_unwritable_shouldSwallowError() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        assert!(write_quality_report(&context(), &QualityConfig::default(), &blocker.join("sub")).is_none());
    }

    #[test]
    fn test_flagged_shouldListRegionsWithFollowUp() {
        let report = QualityReport::from_context(&context(), &QualityConfig::default());
        let flagged: Vec<_> = report.flagged().map(|r| r.id.as_str()).collect();
        assert!(flagged.contains(&"p-001"));
    }
}
