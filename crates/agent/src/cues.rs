//! Lexical cues shared by the classifier and the router.
//!
//! Everything here is deterministic and model-independent: these checks
//! decide overrides that must not depend on what an LLM returned.

use regex::Regex;
use std::sync::LazyLock;
use tracing::error;

static RE_URL: LazyLock<Option<Regex>> = LazyLock::new(|| compile("url", r#"https?://[^\s<>"')\]]+"#));

static RE_SEARCH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(
        "search",
        r"(?i)\b(search (for|the web|online|the internet)|web search|google|scrape|look (it |this |that )?up online|find (it |this )?online|browse (to|the web))\b",
    )
});

static RE_CAPABILITY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(
        "capability",
        r"(?i)\b(what (can|do) you (do|help( me)? with|know)|how can you help|what are (you|your capabilities)|who are you|what (documents|sources|topics) do you (have|cover))\b",
    )
});

/// Leading phrases that only make sense against the previous turn.
const CONTINUATION_LEADS: &[&str] = &[
    "how about",
    "what about",
    "and for",
    "and in",
    "and what",
    "same for",
    "same question",
    "what if",
    "and if",
    "also for",
];

const ANAPHORA: &[&str] = &[
    "it", "its", "they", "them", "their", "theirs", "that", "this", "those", "these", "he", "she", "his",
    "her", "there", "same",
];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "do", "does", "did", "for", "of", "in", "on", "to", "and",
    "or", "what", "how", "about", "with", "at", "by", "be", "can", "i", "me", "my", "you", "your", "we",
];

/// Compile a built-in pattern. A pattern that fails is logged and its cue
/// never fires.
pub(crate) fn compile(name: &str, pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .inspect_err(|e| error!(pattern = name, error = %e, "Built-in pattern failed to compile"))
        .ok()
}

/// Cues read from the user's own words, before a planner rewrote them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageCues {
    pub url: Option<String>,
    pub search: bool,
}

impl MessageCues {
    pub fn of(message: &str) -> Self {
        Self {
            url: first_url(message),
            search: has_search_phrase(message),
        }
    }
}

fn is_match(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

/// Lowercased word tokens, keeping `$` amounts and digits.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '$' || c == '\''))
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Words that carry meaning on their own.
pub fn content_words(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()) && !ANAPHORA.contains(&w.as_str()))
        .collect()
}

/// The first http(s) URL in `text`, trailing punctuation removed.
pub fn first_url(text: &str) -> Option<String> {
    let re = RE_URL.as_ref()?;
    re.find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']).to_string())
}

/// An explicit request to go to the web ("search for", "scrape", ...).
pub fn has_search_phrase(text: &str) -> bool {
    is_match(&RE_SEARCH, text)
}

/// `text` with any explicit search instruction removed.
pub fn strip_search_phrase(text: &str) -> String {
    let stripped = match RE_SEARCH.as_ref() {
        Some(re) => re.replace_all(text, " ").into_owned(),
        None => text.to_string(),
    };
    let stripped = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if stripped.is_empty() { text.trim().to_string() } else { stripped }
}

/// "What can you do?" and friends.
pub fn is_capability_question(text: &str) -> bool {
    is_match(&RE_CAPABILITY, text)
}

/// Starts with a continuation lead or leans on a pronoun for its subject.
pub fn is_anaphoric(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    if CONTINUATION_LEADS.iter().any(|lead| lower.starts_with(lead)) {
        return true;
    }
    words(text).iter().any(|w| ANAPHORA.contains(&w.as_str()))
}

/// Too few content words to stand as a retrieval query by itself.
pub fn is_underspecified(text: &str) -> bool {
    content_words(text).len() <= 3
}

/// `text` without its continuation lead, e.g. "how about for Texas" -> "Texas".
pub fn strip_continuation(text: &str) -> String {
    let trimmed = text.trim().trim_end_matches(['?', '.', '!']);
    let lower = trimmed.to_lowercase();
    let mut rest = trimmed;
    for lead in CONTINUATION_LEADS {
        if lower.starts_with(lead) {
            rest = trimmed.get(lead.len()..).unwrap_or_default();
            break;
        }
    }
    let rest = rest.trim();
    let rest = ["for ", "in ", "with "]
        .iter()
        .find_map(|p| {
            rest.to_lowercase()
                .starts_with(p)
                .then(|| rest.get(p.len()..).unwrap_or_default().trim())
        })
        .unwrap_or(rest);
    rest.to_string()
}

/// Lowercase, punctuation-free form for phrase comparison.
pub fn normalize(text: &str) -> String {
    words(text).join(" ")
}

/// The whole message is `phrase`, possibly with a word or two of padding
/// ("ok stop", "please try again").
pub fn matches_phrase(message: &str, phrases: &[String]) -> bool {
    let normalized = normalize(message);
    if normalized.is_empty() {
        return false;
    }
    let count = normalized.split(' ').count();
    phrases.iter().any(|phrase| {
        let phrase = normalize(phrase);
        if phrase.is_empty() {
            return false;
        }
        let phrase_words = phrase.split(' ').count();
        let padded = format!(" {normalized} ");
        padded.contains(&format!(" {phrase} ")) && count <= phrase_words + 2
    })
}

/// Jaccard overlap of content words.
pub fn overlap(a: &str, b: &str) -> f64 {
    let a: std::collections::HashSet<String> = content_words(a).into_iter().collect();
    let b: std::collections::HashSet<String> = content_words(b).into_iter().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count() as f64;
    shared / a.union(&b).count() as f64
}
