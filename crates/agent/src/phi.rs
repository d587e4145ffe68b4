//! Patient-identifier detection.
//!
//! A sub-question that names a specific patient or member is refused before
//! routing, whatever the planner declared for it. Detection covers medical
//! record numbers, member/Medicaid/subscriber ids, and a person's name given
//! together with a date of birth.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::cues::compile;
use crate::jurisdiction;

static RE_MRN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile("mrn", r"(?i)\b(mrn|medical record (number|no\.?|#))\s*(is|:|#)?\s*[a-z0-9-]*\d[a-z0-9-]*")
});

static RE_MEMBER_ID: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(
        "member_id",
        r"(?i)\b(member|medicaid|medicare|subscriber|recipient|policy|patient|insurance)\s*(id|identifier|number|no\.?|#)\s*(is|:|#)?\s*[a-z0-9-]*\d[a-z0-9-]{3,}",
    )
});

static RE_DOB_CUE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile("dob", r"(?i)\b(dob|d\.o\.b\.?|date of birth|birth ?date|born (on|in))\b"));

static RE_DATE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile("date", r"(?i)\b(\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\d{4}-\d{2}-\d{2}|(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.? \d{1,2},? \d{4})\b")
});

static RE_NAME_CUE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile("name", r"(?:(?i:\b(?:patient|member|named|name is|name:|mr\.?|mrs\.?|ms\.?))\s+)([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)")
});

/// Capitalized words that start sentences or name programs, never people.
const NOT_NAMES: &[&str] = &[
    "What", "When", "Where", "Which", "Who", "Why", "How", "Does", "Do", "Is", "Are", "Can", "Could",
    "Would", "Should", "Will", "The", "A", "An", "Please", "Tell", "Show", "Find", "Check", "Search",
    "Medicaid", "Medicare", "Health", "Healthcare", "Care", "Plan", "Plans", "Program", "Managed",
    "Member", "Members", "Patient", "Date", "Birth", "Department", "Services", "Insurance", "Chip",
];

/// Which kind of identifier was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    MedicalRecordNumber,
    MemberId,
    NameWithBirthDate,
}

fn is_match(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

fn looks_like_person(first: &str, second: &str) -> bool {
    let reserved = |w: &str| NOT_NAMES.contains(&w) || jurisdiction::is_known_name(w);
    !reserved(first) && !reserved(second) && !jurisdiction::is_known_name(&format!("{first} {second}"))
}

fn mentions_person(text: &str) -> bool {
    if is_match(&RE_NAME_CUE, text) {
        return true;
    }
    let capitalized = |w: &str| {
        let mut chars = w.chars();
        chars.next().is_some_and(|c| c.is_ascii_uppercase())
            && w.len() > 1
            && chars.all(|c| c.is_ascii_lowercase())
    };
    let tokens: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .collect();
    tokens
        .windows(2)
        .any(|pair| capitalized(pair[0]) && capitalized(pair[1]) && looks_like_person(pair[0], pair[1]))
}

/// The first patient identifier found in `text`, if any.
pub fn detect(text: &str) -> Option<IdentifierKind> {
    if is_match(&RE_MRN, text) {
        return Some(IdentifierKind::MedicalRecordNumber);
    }
    if is_match(&RE_MEMBER_ID, text) {
        return Some(IdentifierKind::MemberId);
    }
    let has_birth_date = is_match(&RE_DOB_CUE, text) || is_match(&RE_DATE, text);
    if has_birth_date && mentions_person(text) {
        return Some(IdentifierKind::NameWithBirthDate);
    }
    None
}

pub fn contains_patient_identifier(text: &str) -> bool {
    detect(text).is_some()
}
