/*!
 * Text detection: tiling, OCR dispatch, merging and consolidation.
 *
 * - `tiling`: band planning and coordinate remapping
 * - `ocr`: the engine capability and the registry gating every engine
 * - `merge`: suppression merge across slices
 * - `consolidate`: noise filtering, clustering and same-line joining
 * - `sidecar`: engine replaying `<image>.ocr.json` detections
 * - `detector`: runs the whole chain for one page
 */

pub mod consolidate;
pub mod detector;
pub mod merge;
pub mod ocr;
pub mod sidecar;
pub mod tiling;

pub use consolidate::{consolidate, dedupe, filter, merge_same_line, ConsolidationConfig};
pub use detector::{DetectionSummary, TiledDetector};
pub use merge::{merge, MergeConfig};
pub use ocr::{OcrEngine, OcrEngineFactory, OcrRegistry, RawDetection};
pub use sidecar::{sidecar_path, SidecarOcr, SidecarOcrFactory, SidecarStore};
pub use tiling::{remap, tile, PageSlice, SliceKind, SliceSpec, TileConfig};
