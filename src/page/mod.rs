/*!
 * Page data model shared by every pipeline stage.
 *
 * - `geometry`: bounding boxes and overlap measures
 * - `region`: detected text regions and their continuity annotations
 * - `context`: per-page working state
 */

pub mod context;
pub mod geometry;
pub mod region;

pub use context::{LanguagePair, PageContext, PageStatus};
pub use geometry::BBox;
pub use region::{
    normalize_text, ContinuityMeta, ContinuityRole, EdgeRole, InpaintMode, Region,
    FAILED_TRANSLATION,
};
