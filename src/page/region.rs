use serde::{Deserialize, Serialize};

use super::geometry::BBox;

/// Target text recorded when every translation attempt for a region failed
pub const FAILED_TRANSLATION: &str = "[translation failed]";

/// How the eraser treats a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InpaintMode {
    /// Erase the original glyphs and render the translation
    #[default]
    Replace,
    /// Erase only, nothing is rendered in place
    EraseOnly,
}

/// Position of a region relative to a page boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRole {
    #[default]
    None,
    CurrentBottom,
    CurrentTop,
    NextTop,
}

/// Which side of a cross-page pair a region leads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityRole {
    /// Leads the bottom group and translates the joint text
    Carrier,
    /// Leads the top group on the next page and consumes the carried half
    Consumer,
}

/// Cross-page continuity annotations on a region
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuityMeta {
    pub edge_role: EdgeRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ContinuityRole>,
    /// Source text on each side of the page break, set on pair leaders
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub carried_fragments: Vec<String>,
    /// Bottom text followed by top text, set on a carrier leader
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joint_source: Option<String>,
    /// Leader id when this region was folded into a group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouped_under: Option<String>,
}

impl ContinuityMeta {
    pub fn is_linked(&self) -> bool {
        self.pair_id.is_some()
    }
}

/// A detected text region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub bbox: BBox,
    /// Looser box used for rendering grouped text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_box: Option<BBox>,
    pub source_text: String,
    pub normalized_text: String,
    /// `None` before translation, empty when intentionally unrendered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,
    pub confidence: f32,
    #[serde(default)]
    pub is_sound_effect: bool,
    #[serde(default)]
    pub is_watermark: bool,
    #[serde(default)]
    pub inpaint_mode: InpaintMode,
    #[serde(default)]
    pub continuity: ContinuityMeta,
    #[serde(default)]
    pub skip_translation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
}

impl Region {
    pub fn new(id: impl Into<String>, bbox: BBox, text: impl Into<String>, confidence: f32) -> Self {
        let source_text = text.into();
        let normalized_text = normalize_text(&source_text);
        Self {
            id: id.into(),
            bbox,
            render_box: None,
            source_text,
            normalized_text,
            target_text: None,
            confidence: confidence.clamp(0.0, 1.0),
            is_sound_effect: false,
            is_watermark: false,
            inpaint_mode: InpaintMode::Replace,
            continuity: ContinuityMeta::default(),
            skip_translation: false,
            quality_score: None,
        }
    }

    /// Replace the source text and refresh the normalized form
    pub fn set_source_text(&mut self, text: impl Into<String>) {
        self.source_text = text.into();
        self.normalized_text = normalize_text(&self.source_text);
    }

    /// Text handed to the translator
    pub fn translation_input(&self) -> &str {
        self.continuity
            .joint_source
            .as_deref()
            .unwrap_or(&self.normalized_text)
    }

    /// Every region is erased, including skipped ones in erase-only mode
    pub fn should_erase(&self) -> bool {
        !self.bbox.is_degenerate()
    }

    /// Has non-empty target text that is not the failure sentinel
    pub fn is_renderable(&self) -> bool {
        self.inpaint_mode == InpaintMode::Replace
            && matches!(self.target_text.as_deref(), Some(t) if !t.is_empty() && t != FAILED_TRANSLATION)
    }

    pub fn is_failed(&self) -> bool {
        self.target_text.as_deref() == Some(FAILED_TRANSLATION)
    }

    /// Needs a translation from the batching engine
    pub fn needs_translation(&self) -> bool {
        !self.skip_translation && self.target_text.is_none()
    }

    pub fn mark_failed(&mut self) {
        self.target_text = Some(FAILED_TRANSLATION.to_string());
        self.quality_score = Some(0.0);
    }

    /// Erase-only, skipped and intentionally unrendered
    pub fn silence(&mut self) {
        self.inpaint_mode = InpaintMode::EraseOnly;
        self.skip_translation = true;
        self.target_text = Some(String::new());
    }

    /// Box the renderer should fill
    pub fn layout_box(&self) -> BBox {
        self.render_box.unwrap_or(self.bbox)
    }
}

/// Collapse internal whitespace runs and trim
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
