/*!
 * Plausibility checks on provider output.
 *
 * Rejected items are never written to a region; the batching engine retries
 * them on the next fallback slot and marks them failed on exhaustion.
 */

use serde::{Deserialize, Serialize};

use crate::language_utils::{is_cjk_language, script_share, scripts_differ, scripts_for_language, Script};
use crate::page::{LanguagePair, FAILED_TRANSLATION};

/// Why an output item was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Empty or whitespace only
    Empty,
    /// Same text as the source
    EchoedSource,
    /// Mostly written in a script only the source language uses
    SourceScript,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Empty => "empty output",
            Self::EchoedSource => "output echoes the source",
            Self::SourceScript => "output is in the source script",
        };
        write!(f, "{}", text)
    }
}

/// Thresholds for output validation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationRules {
    /// Share of source-only letters above which CJK-target output is rejected
    pub source_script_tolerance: f32,
    /// Same-script echoes up to this many characters are accepted
    pub short_word_chars: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            source_script_tolerance: 0.5,
            short_word_chars: 3,
        }
    }
}

fn comparable(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Validate one translated item against its source
///
/// Returns the trimmed translation when accepted.
pub fn validate_translation(
    source: &str,
    output: &str,
    languages: &LanguagePair,
    rules: &ValidationRules,
) -> Result<String, Rejection> {
    let output = output.trim();
    if output.is_empty() || output == FAILED_TRANSLATION {
        return Err(Rejection::Empty);
    }

    if is_cjk_language(&languages.target) {
        let target_scripts = scripts_for_language(&languages.target);
        let source_only: Vec<Script> = scripts_for_language(&languages.source)
            .iter()
            .copied()
            .filter(|s| !target_scripts.contains(s))
            .collect();
        if !source_only.is_empty() && script_share(output, &source_only) > rules.source_script_tolerance {
            return Err(Rejection::SourceScript);
        }
    }

    let source_cmp = comparable(source);
    if !source_cmp.is_empty() && source_cmp == comparable(output) {
        let differ = scripts_differ(&languages.source, &languages.target);
        if differ || source_cmp.chars().count() > rules.short_word_chars {
            return Err(Rejection::EchoedSource);
        }
    }

    Ok(output.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ValidationRules {
        ValidationRules::default()
    }

    #[test]
    fn test_validate_empty_shouldReject() {
        let langs = LanguagePair::new("ja", "en");
        assert_eq!(validate_translation("こんにちは", "  ", &langs, &rules()), Err(Rejection::Empty));
        assert_eq!(
            validate_translation("こんにちは", FAILED_TRANSLATION, &langs, &rules()),
            Err(Rejection::Empty)
        );
    }

    #[test]
    fn test_validate_echoAcrossScripts_shouldReject() {
        let langs = LanguagePair::new("ja", "en");
        assert_eq!(validate_translation("えっ", "えっ", &langs, &rules()), Err(Rejection::EchoedSource));
    }

    #[test]
    fn test_validate_shortSameScriptEcho_shouldAccept() {
        let langs = LanguagePair::new("fr", "en");
        assert_eq!(validate_translation("OK", "OK", &langs, &rules()), Ok("OK".to_string()));
        assert_eq!(
            validate_translation("Bonjour", "bonjour", &langs, &rules()),
            Err(Rejection::EchoedSource)
        );
    }

    #[test]
    fn test_validate_latinOutputForCjkTarget_shouldReject() {
        let langs = LanguagePair::new("en", "ja");
        assert_eq!(
            validate_translation("Good morning", "Good morning!", &langs, &rules()),
            Err(Rejection::SourceScript)
        );
        assert_eq!(
            validate_translation("Good morning", "おはようございます、Mr.", &langs, &rules()),
            Ok("おはようございます、Mr.".to_string())
        );
    }

    #[test]
    fn test_validate_kanaOutputForChineseTarget_shouldReject() {
        let langs = LanguagePair::new("ja", "zh");
        assert_eq!(
            validate_translation("ありがとう", "ありがとう!", &langs, &rules()),
            Err(Rejection::SourceScript)
        );
        assert_eq!(validate_translation("ありがとう", "谢谢", &langs, &rules()), Ok("谢谢".to_string()));
    }
}
