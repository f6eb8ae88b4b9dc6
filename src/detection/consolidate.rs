/*!
 * Region consolidation and noise filtering.
 *
 * Runs after the suppression merge:
 * - `filter` drops OCR noise and flags watermarks and sound effects
 * - `dedupe` collapses geometric clusters to one representative
 * - `merge_same_line` joins fragments of one text line
 */

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::language_utils::is_cjk_char;
use crate::page::{BBox, Region};

use super::merge::page_order;

static PUNCT_OR_NUMERIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{N}\p{P}\p{S}\s]+$").expect("Invalid punctuation regex")
});

static CAPTION_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\.{2,}|…+|[!?！？]{1,3}|\.{2,}[!?！？]+|\d{1,2}:\d{2}|\d{4}|\d+%)$")
        .expect("Invalid caption regex")
});

/// Parameters for filtering, deduplication and same-line merging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Alphabetic tokens up to this many characters count as short
    #[serde(default = "default_short_token_len")]
    pub short_token_len: usize,

    /// Short tokens below this confidence are dropped
    #[serde(default = "default_short_token_min_confidence")]
    pub short_token_min_confidence: f32,

    /// Text matching any of these is dropped
    #[serde(default = "default_noise_patterns")]
    pub noise_patterns: Vec<String>,

    /// Text matching any of these is kept, erased and never translated
    #[serde(default = "default_watermark_patterns")]
    pub watermark_patterns: Vec<String>,

    /// Text matching any of these is flagged as a sound effect
    #[serde(default = "default_sound_effect_patterns")]
    pub sound_effect_patterns: Vec<String>,

    /// Whether sound effects are sent for translation
    #[serde(default)]
    pub translate_sound_effects: bool,

    #[serde(default = "default_dedupe_iou")]
    pub dedupe_iou: f32,

    #[serde(default = "default_dedupe_containment")]
    pub dedupe_containment: f32,

    /// Centers closer than this times the mean diagonal cluster together
    #[serde(default = "default_center_distance_factor")]
    pub center_distance_factor: f32,

    /// Vertical center tolerance as a multiple of the median text height
    #[serde(default = "default_same_line_tolerance")]
    pub same_line_tolerance: f32,

    /// Largest horizontal gap as a multiple of the median text height
    #[serde(default = "default_same_line_max_gap")]
    pub same_line_max_gap: f32,
}

fn default_short_token_len() -> usize {
    2
}

fn default_short_token_min_confidence() -> f32 {
    0.6
}

fn default_noise_patterns() -> Vec<String> {
    vec![r"^[|_\-=~^`'\x22]+$".to_string()]
}

fn default_watermark_patterns() -> Vec<String> {
    vec![
        r"(?i)\bwww\.".to_string(),
        r"(?i)\.(com|net|org|io)\b".to_string(),
        r"(?i)\b(scans?|scanlation|translated by)\b".to_string(),
    ]
}

fn default_sound_effect_patterns() -> Vec<String> {
    vec![
        r"^[ァ-ヺー゛゜ッ]{1,6}[!！]*$".to_string(),
        r"^(?i)(ba+m|bo+m|cra+sh|wha+m|thu+d)[!]*$".to_string(),
    ]
}

fn default_dedupe_iou() -> f32 {
    0.3
}

fn default_dedupe_containment() -> f32 {
    0.7
}

fn default_center_distance_factor() -> f32 {
    0.2
}

fn default_same_line_tolerance() -> f32 {
    0.5
}

fn default_same_line_max_gap() -> f32 {
    1.0
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            short_token_len: default_short_token_len(),
            short_token_min_confidence: default_short_token_min_confidence(),
            noise_patterns: default_noise_patterns(),
            watermark_patterns: default_watermark_patterns(),
            sound_effect_patterns: default_sound_effect_patterns(),
            translate_sound_effects: false,
            dedupe_iou: default_dedupe_iou(),
            dedupe_containment: default_dedupe_containment(),
            center_distance_factor: default_center_distance_factor(),
            same_line_tolerance: default_same_line_tolerance(),
            same_line_max_gap: default_same_line_max_gap(),
        }
    }
}

/// Compiled pattern sets; invalid patterns are skipped with a warning
struct Patterns {
    noise: Vec<Regex>,
    watermark: Vec<Regex>,
    sound_effect: Vec<Regex>,
}

fn compile(patterns: &[String], kind: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Ignoring invalid {} pattern '{}': {}", kind, p, e);
                None
            }
        })
        .collect()
}

impl Patterns {
    fn new(config: &ConsolidationConfig) -> Self {
        Self {
            noise: compile(&config.noise_patterns, "noise"),
            watermark: compile(&config.watermark_patterns, "watermark"),
            sound_effect: compile(&config.sound_effect_patterns, "sound effect"),
        }
    }
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

/// Dialogue punctuation and caption numerics survive the numeric filter
pub fn is_caption_like(text: &str) -> bool {
    CAPTION_LIKE.is_match(text.trim())
}

fn is_short_alphabetic(text: &str, max_len: usize) -> bool {
    let count = text.chars().count();
    count > 0 && count <= max_len && text.chars().all(char::is_alphabetic)
}

/// Drop noise and flag watermarks and sound effects
pub fn filter(regions: Vec<Region>, config: &ConsolidationConfig) -> Vec<Region> {
    let patterns = Patterns::new(config);
    let before = regions.len();

    let kept: Vec<Region> = regions
        .into_iter()
        .filter_map(|mut region| {
            let text = region.normalized_text.clone();
            if region.bbox.is_degenerate() || text.is_empty() {
                return None;
            }
            if is_short_alphabetic(&text, config.short_token_len)
                && region.confidence < config.short_token_min_confidence
            {
                return None;
            }
            if PUNCT_OR_NUMERIC.is_match(&text) && !is_caption_like(&text) {
                return None;
            }
            if any_match(&patterns.noise, &text) {
                return None;
            }
            if any_match(&patterns.watermark, &text) {
                region.is_watermark = true;
                region.silence();
                return Some(region);
            }
            if any_match(&patterns.sound_effect, &text) {
                region.is_sound_effect = true;
                if !config.translate_sound_effects {
                    region.skip_translation = true;
                    region.target_text = Some(String::new());
                }
            }
            Some(region)
        })
        .collect();

    debug!("Noise filter kept {}/{} regions", kept.len(), before);
    kept
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    let mut node = i;
    while parent[node] != root {
        let next = parent[node];
        parent[node] = root;
        node = next;
    }
    root
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[rb.max(ra)] = ra.min(rb);
    }
}

fn representative_score(region: &Region) -> f32 {
    region.confidence * region.bbox.area() * region.normalized_text.chars().count() as f32
}

/// Collapse geometric clusters to their best member
pub fn dedupe(regions: Vec<Region>, config: &ConsolidationConfig) -> Vec<Region> {
    let n = regions.len();
    if n < 2 {
        return regions;
    }

    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            let a = &regions[i].bbox;
            let b = &regions[j].bbox;
            let reach = config.center_distance_factor * (a.diagonal() + b.diagonal()) / 2.0;
            if a.iou(b) >= config.dedupe_iou
                || a.containment(b) >= config.dedupe_containment
                || a.center_distance(b) < reach
            {
                union(&mut parent, i, j);
            }
        }
    }

    let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        let root = find(&mut parent, i);
        clusters[root].push(i);
    }

    let mut slots: Vec<Option<Region>> = regions.into_iter().map(Some).collect();
    let mut out = Vec::new();
    for members in clusters.into_iter().filter(|c| !c.is_empty()) {
        let best = pick_representative(&members, &slots);
        if members.len() > 1 {
            debug!("Deduplicated cluster of {} regions", members.len());
        }
        if let Some(region) = slots[best].take() {
            out.push(region);
        }
    }

    out.sort_by(page_order);
    out
}

fn pick_representative(members: &[usize], slots: &[Option<Region>]) -> usize {
    let region = |i: usize| slots[i].as_ref();
    let top_score = members
        .iter()
        .filter_map(|&i| region(i).map(representative_score))
        .fold(f32::MIN, f32::max);

    let tied: Vec<usize> = members
        .iter()
        .copied()
        .filter(|&i| {
            region(i)
                .map(|r| (representative_score(r) - top_score).abs() <= top_score.abs() * 1e-4)
                .unwrap_or(false)
        })
        .collect();

    let containment_count = |i: usize| -> usize {
        let Some(candidate) = region(i) else {
            return 0;
        };
        members
            .iter()
            .filter(|&&j| j != i)
            .filter_map(|&j| region(j))
            .filter(|other| candidate.normalized_text.contains(other.normalized_text.as_str()))
            .count()
    };

    tied.iter()
        .copied()
        .max_by_key(|&i| (containment_count(i), std::cmp::Reverse(i)))
        .or_else(|| members.first().copied())
        .unwrap_or(0)
}

fn median(mut values: Vec<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn joins_without_space(left: &str, right: &str) -> bool {
    match (left.chars().last(), right.chars().next()) {
        (Some(a), Some(b)) => is_cjk_char(a) && is_cjk_char(b),
        _ => true,
    }
}

/// Concatenate text fragments left to right
pub fn join_fragments<'a>(fragments: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for fragment in fragments {
        if fragment.is_empty() {
            continue;
        }
        if !out.is_empty() && !joins_without_space(&out, fragment) {
            out.push(' ');
        }
        out.push_str(fragment);
    }
    out
}

fn mergeable(region: &Region) -> bool {
    !region.is_watermark && !region.is_sound_effect && !region.skip_translation
}

/// Join regions that sit on the same text line
pub fn merge_same_line(regions: Vec<Region>, config: &ConsolidationConfig) -> Vec<Region> {
    if regions.len() < 2 {
        return regions;
    }
    let median_height = median(regions.iter().map(|r| r.bbox.height()).collect());
    if median_height <= 0.0 {
        return regions;
    }
    let tolerance = config.same_line_tolerance * median_height;
    let max_gap = config.same_line_max_gap * median_height;

    let (mut candidates, passthrough): (Vec<Region>, Vec<Region>) =
        regions.into_iter().partition(mergeable);
    candidates.sort_by(|a, b| a.bbox.x1.total_cmp(&b.bbox.x1).then_with(|| a.id.cmp(&b.id)));

    let mut lines: Vec<(BBox, Vec<Region>)> = Vec::new();
    for region in candidates {
        let (_, cy) = region.bbox.center();
        let slot = lines.iter_mut().find(|(line_box, _)| {
            let (_, line_cy) = line_box.center();
            (cy - line_cy).abs() <= tolerance && line_box.horizontal_gap(&region.bbox) <= max_gap
        });
        match slot {
            Some((line_box, members)) => {
                *line_box = line_box.union(&region.bbox);
                members.push(region);
            }
            None => lines.push((region.bbox, vec![region])),
        }
    }

    let mut out: Vec<Region> = lines
        .into_iter()
        .map(|(line_box, members)| combine_line(line_box, members))
        .collect();
    out.extend(passthrough);
    out.sort_by(page_order);
    out
}

fn combine_line(line_box: BBox, mut members: Vec<Region>) -> Region {
    if members.len() == 1 {
        return members.remove(0);
    }
    members.sort_by(|a, b| a.bbox.x1.total_cmp(&b.bbox.x1));

    let text = join_fragments(members.iter().map(|r| r.normalized_text.as_str()));
    let weights: Vec<f32> = members
        .iter()
        .map(|r| r.normalized_text.chars().count().max(1) as f32)
        .collect();
    let total: f32 = weights.iter().sum();
    let confidence = members
        .iter()
        .zip(&weights)
        .map(|(r, w)| r.confidence * w)
        .sum::<f32>()
        / total;

    debug!("Joined {} fragments on one line: '{}'", members.len(), text);
    let mut leader = members.remove(0);
    leader.bbox = line_box;
    leader.set_source_text(text);
    leader.confidence = confidence;
    leader
}

/// Filter, dedupe and join same-line fragments
pub fn consolidate(regions: Vec<Region>, config: &ConsolidationConfig) -> Vec<Region> {
    let filtered = filter(regions, config);
    let deduped = dedupe(filtered, config);
    merge_same_line(deduped, config)
}
