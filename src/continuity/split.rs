/// Characters that can end a sentence in either script
const SENTENCE_ENDS: &[char] = &['.', '!', '?', '…', '。', '！', '？', '」', '』'];

/// Split a joint translation into a top half and a bottom half
///
/// Cuts after the sentence-ending punctuation closest to the middle, or at
/// the character midpoint when there is none. Both halves are non-empty
/// unless the input is; a one-character input is placed in both.
pub fn split_translation(text: &str) -> (String, String) {
    let text = text.trim();
    let chars: Vec<char> = text.chars().collect();
    match chars.len() {
        0 => return (String::new(), String::new()),
        1 => return (text.to_string(), text.to_string()),
        _ => {}
    }

    let midpoint = chars.len() / 2;
    let cut = chars
        .iter()
        .enumerate()
        // cut after the punctuation, never at the very end
        .filter(|(i, c)| SENTENCE_ENDS.contains(c) && i + 1 < chars.len())
        .map(|(i, _)| i + 1)
        .min_by_key(|cut| cut.abs_diff(midpoint))
        .unwrap_or(midpoint);

    let top: String = chars[..cut].iter().collect::<String>().trim().to_string();
    let bottom: String = chars[cut..].iter().collect::<String>().trim().to_string();
    if top.is_empty() || bottom.is_empty() {
        let top: String = chars[..midpoint].iter().collect();
        let bottom: String = chars[midpoint..].iter().collect();
        return (top, bottom);
    }
    (top, bottom)
}
