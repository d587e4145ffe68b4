//! Tokenization and sentence splitting for the sparse channel.

/// Units longer than this (in characters) are split again on list separators.
pub const MAX_SENTENCE_CHARS: usize = 420;

/// Lowercase and keep `[a-z0-9]+` runs. Digits are kept so phone numbers
/// and plan ids stay searchable; all punctuation is dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Split text into atomic sentence units.
///
/// Whitespace is collapsed, then the text is cut after `.`, `!` or `?` when
/// the next word starts with an ASCII uppercase letter or digit. Any unit
/// longer than [`MAX_SENTENCE_CHARS`] is further cut on `;`, ` • ` and ` - `.
pub fn split_sentences(text: &str) -> Vec<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = collapsed.chars().collect();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 2 < chars.len() {
        let boundary = matches!(chars[i], '.' | '!' | '?')
            && chars[i + 1] == ' '
            && (chars[i + 2].is_ascii_uppercase() || chars[i + 2].is_ascii_digit());
        if boundary {
            parts.push(chars[start..=i].iter().collect::<String>());
            start = i + 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    parts.push(chars[start..].iter().collect::<String>());

    let mut out = Vec::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part.chars().count() > MAX_SENTENCE_CHARS {
            out.extend(split_long_unit(part));
        } else {
            out.push(part.to_string());
        }
    }
    out
}

fn split_long_unit(unit: &str) -> Vec<String> {
    unit.split(';')
        .flat_map(|piece| piece.split(" • "))
        .flat_map(|piece| piece.split(" - "))
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(String::from)
        .collect()
}
