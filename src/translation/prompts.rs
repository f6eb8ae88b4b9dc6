/*!
 * Prompt builders for page translation.
 *
 * Two layouts are produced:
 * - numbered: one `<n>. <text>` line per item, items last
 * - pair: the halves of a sentence split across two pages, labelled
 *   with `TOP:` and `BOTTOM:`, answered as one JSON object
 *
 * Instruction lines never start with a number so the numbered parser can
 * read a prompt back without picking up instructions as items.
 */

use crate::language_utils::display_name;
use crate::page::LanguagePair;

/// Label of the first half of a pair prompt
pub const PAIR_TOP_LABEL: &str = "TOP:";

/// Label of the second half of a pair prompt
pub const PAIR_BOTTOM_LABEL: &str = "BOTTOM:";

/// Default system prompt, placeholders `{source_language}` and `{target_language}`
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional comic and manga translator. Translate speech bubbles, captions and narration from {source_language} to {target_language}. Keep the tone and register of each line, keep it short enough to fit its bubble, and never add commentary.";

/// Expected layout of a batch response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// `<n>. <translation>` lines
    #[default]
    Numbered,
    /// A JSON array of strings in item order
    JsonArray,
}

/// Builds system and user prompts for the batching engine
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_template: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl PromptBuilder {
    pub fn new(system_template: impl Into<String>) -> Self {
        let system_template = system_template.into();
        let system_template = if system_template.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            system_template
        };
        Self { system_template }
    }

    /// Render the system prompt for a language pair
    pub fn system(&self, languages: &LanguagePair) -> String {
        self.system_template
            .replace("{source_language}", &display_name(&languages.source))
            .replace("{target_language}", &display_name(&languages.target))
    }

    /// Numbered batch prompt
    ///
    /// `contexts` holds an optional note per item, matched by position.
    /// The strict variant repeats the output contract with the exact count.
    pub fn numbered(
        &self,
        items: &[&str],
        contexts: &[Option<&str>],
        format: ResponseFormat,
        languages: &LanguagePair,
        strict: bool,
    ) -> String {
        let source = display_name(&languages.source);
        let target = display_name(&languages.target);
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "Translate each numbered item from {} to {}.\n",
            source, target
        ));
        match format {
            ResponseFormat::Numbered => {
                prompt.push_str("- Answer with one line per item, keeping its number: `<number>. <translation>`.\n");
            }
            ResponseFormat::JsonArray => {
                prompt.push_str(&format!(
                    "- Answer with a JSON array of exactly {} strings, in item order.\n",
                    items.len()
                ));
            }
        }
        prompt.push_str("- Do not merge, split or skip items.\n");
        prompt.push_str("- Output nothing except the translations.\n");
        if strict {
            prompt.push_str(&format!(
                "- STRICT: your previous answer was incomplete. Every item from 1 to {} must appear exactly once.\n",
                items.len()
            ));
            prompt.push_str(&format!(
                "- STRICT: never copy the {} text, always write {}.\n",
                source, target
            ));
        }

        let notes: Vec<String> = contexts
            .iter()
            .enumerate()
            .filter_map(|(i, note)| note.map(|n| format!("- item {}: {}", i + 1, n)))
            .collect();
        if !notes.is_empty() {
            prompt.push_str("Notes:\n");
            for note in notes {
                prompt.push_str(&note);
                prompt.push('\n');
            }
        }

        prompt.push('\n');
        for (i, item) in items.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, single_line(item)));
        }
        prompt
    }

    /// Pair prompt for text split across a page boundary
    pub fn pair(&self, top: &str, bottom: &str, languages: &LanguagePair) -> String {
        let source = display_name(&languages.source);
        let target = display_name(&languages.target);
        format!(
            "The two fragments below are one {source} sentence split across the bottom of one page and the top of the next.\n\
             Translate the whole sentence to {target}, then split your translation where the page break falls.\n\
             Answer with a single line of JSON: {{\"top\": \"<first part>\", \"bottom\": \"<second part>\"}}\n\
             {PAIR_TOP_LABEL} {top}\n\
             {PAIR_BOTTOM_LABEL} {bottom}\n",
            source = source,
            target = target,
            top = single_line(top),
            bottom = single_line(bottom),
        )
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
