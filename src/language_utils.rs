use anyhow::{Result, anyhow};
use isolang::Language;

// Language and script utilities
//
// ISO 639 code handling for configuration and prompts, plus the coarse
// script classification used to validate provider output and to join
// same-line text fragments.

/// ISO 639-2/B codes that differ from their 639-2/T form
const BIBLIOGRAPHIC_CODES: &[(&str, &str)] = &[
    ("fre", "fra"),
    ("ger", "deu"),
    ("dut", "nld"),
    ("gre", "ell"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("ice", "isl"),
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("per", "fas"),
    ("geo", "kat"),
    ("may", "msa"),
    ("mac", "mkd"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("wel", "cym"),
];

fn bibliographic_to_terminology(code: &str) -> Option<&'static str> {
    BIBLIOGRAPHIC_CODES
        .iter()
        .find(|(b, _)| *b == code)
        .map(|(_, t)| *t)
}

/// Normalize a language code to ISO 639-2/T (3-letter) format
pub fn normalize_to_part2t(code: &str) -> Result<String> {
    let normalized_code = code.trim().to_lowercase();

    match normalized_code.len() {
        2 => {
            if let Some(lang) = Language::from_639_1(&normalized_code) {
                return Ok(lang.to_639_3().to_string());
            }
        }
        3 => {
            if Language::from_639_3(&normalized_code).is_some() {
                return Ok(normalized_code);
            }
            if let Some(terminology) = bibliographic_to_terminology(&normalized_code) {
                return Ok(terminology.to_string());
            }
        }
        _ => {}
    }

    Err(anyhow!("Invalid language code: {}", code))
}

/// Check if two language codes represent the same language
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (normalize_to_part2t(code1), normalize_to_part2t(code2)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Get the English language name from a code
pub fn get_language_name(code: &str) -> Result<String> {
    let normalized = normalize_to_part2t(code)?;
    let lang = Language::from_639_3(&normalized)
        .ok_or_else(|| anyhow!("Failed to get language from code: {}", normalized))?;

    Ok(lang.to_name().to_string())
}

/// Display name for prompts, falling back to the raw code
pub fn display_name(code: &str) -> String {
    get_language_name(code).unwrap_or_else(|_| code.to_string())
}

/// Coarse writing system classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    Latin,
    Cyrillic,
    Han,
    Kana,
    Hangul,
    Other,
}

impl Script {
    pub fn is_cjk(&self) -> bool {
        matches!(self, Self::Han | Self::Kana | Self::Hangul)
    }
}

/// Script of a single letter, `None` for non-letters
pub fn script_of(c: char) -> Option<Script> {
    if !c.is_alphabetic() {
        return None;
    }
    let script = match c as u32 {
        0x0041..=0x024F | 0x1E00..=0x1EFF => Script::Latin,
        0x0400..=0x052F => Script::Cyrillic,
        0x3040..=0x30FF | 0x31F0..=0x31FF | 0xFF66..=0xFF9F => Script::Kana,
        0x1100..=0x11FF | 0x3130..=0x318F | 0xAC00..=0xD7AF => Script::Hangul,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2FA1F => Script::Han,
        _ => Script::Other,
    };
    Some(script)
}

/// Whether a character belongs to a CJK script or CJK punctuation
pub fn is_cjk_char(c: char) -> bool {
    script_of(c).map(|s| s.is_cjk()).unwrap_or(false)
        || matches!(c as u32, 0x3000..=0x303F | 0xFF01..=0xFF60)
}

/// Whether the language is written in a CJK script
pub fn is_cjk_language(code: &str) -> bool {
    matches!(
        normalize_to_part2t(code).as_deref(),
        Ok("jpn") | Ok("zho") | Ok("kor") | Ok("yue") | Ok("cmn")
    )
}

/// Scripts a language is normally written in
pub fn scripts_for_language(code: &str) -> &'static [Script] {
    match normalize_to_part2t(code).as_deref() {
        Ok("jpn") => &[Script::Kana, Script::Han],
        Ok("zho") | Ok("yue") | Ok("cmn") => &[Script::Han],
        Ok("kor") => &[Script::Hangul, Script::Han],
        Ok("rus") | Ok("ukr") | Ok("bel") | Ok("bul") | Ok("srp") | Ok("mkd") => {
            &[Script::Cyrillic]
        }
        Ok(_) => &[Script::Latin],
        Err(_) => &[],
    }
}

/// Whether two languages share no script
pub fn scripts_differ(source: &str, target: &str) -> bool {
    let source = scripts_for_language(source);
    let target = scripts_for_language(target);
    !source.is_empty() && !target.is_empty() && !source.iter().any(|s| target.contains(s))
}

/// Share of letters in `text` written in one of `scripts`
pub fn script_share(text: &str, scripts: &[Script]) -> f32 {
    let mut letters = 0usize;
    let mut matching = 0usize;
    for script in text.chars().filter_map(script_of) {
        letters += 1;
        if scripts.contains(&script) {
            matching += 1;
        }
    }
    if letters == 0 {
        0.0
    } else {
        matching as f32 / letters as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizeToPart2t_shouldHandleAllForms() {
        assert_eq!(normalize_to_part2t("ja").unwrap(), "jpn");
        assert_eq!(normalize_to_part2t("ger").unwrap(), "deu");
        assert_eq!(normalize_to_part2t("eng").unwrap(), "eng");
        assert!(normalize_to_part2t("xx").is_err());
    }

    #[test]
    fn test_scriptsDiffer_shouldCompareWritingSystems() {
        assert!(scripts_differ("ja", "en"));
        assert!(scripts_differ("en", "ko"));
        assert!(!scripts_differ("en", "fr"));
        assert!(!scripts_differ("ja", "zh"));
    }

    #[test]
    fn test_scriptShare_shouldIgnorePunctuation() {
        let share = script_share("Hello, 世界!", &[Script::Latin]);
        assert!((share - 5.0 / 7.0).abs() < 1e-6);
        assert_eq!(script_share("...", &[Script::Latin]), 0.0);
    }

    #[test]
    fn test_isCjkLanguage_shouldAcceptTwoAndThreeLetterCodes() {
        assert!(is_cjk_language("ja"));
        assert!(is_cjk_language("kor"));
        assert!(!is_cjk_language("en"));
    }
}
