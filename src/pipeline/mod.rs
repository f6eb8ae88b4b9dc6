/*!
 * Page pipeline: stage sequencing, batch phases and per-page reports.
 *
 * - `stages`: stage identifiers and the image collaborator traits
 * - `metrics`: per-page counters
 * - `orchestrator`: single-page and batch processing
 * - `report`: JSON quality reports
 */

pub mod metrics;
pub mod orchestrator;
pub mod report;
pub mod stages;

pub use metrics::PageMetrics;
pub use orchestrator::{PageOutcome, PagePipeline, PageResult, PipelineConfig, StatusCallback, StatusUpdate};
pub use report::{report_path, write_quality_report, QualityReport, RegionReport};
pub use stages::{erase_targets, render_targets, BoxFillEraser, Eraser, Renderer, Stage, Upscaler};
