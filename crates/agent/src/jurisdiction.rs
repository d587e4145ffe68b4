//! Jurisdiction extraction: which state, payer and program a question is
//! about.
//!
//! States become retrieval filter tags (the corpus is tagged by state);
//! payers and programs only shape the rewritten query text.

use serde::{Deserialize, Serialize};

const STATES: &[&str] = &[
    "Alabama", "Alaska", "Arizona", "Arkansas", "California", "Colorado", "Connecticut", "Delaware",
    "District of Columbia", "Florida", "Georgia", "Hawaii", "Idaho", "Illinois", "Indiana", "Iowa", "Kansas",
    "Kentucky", "Louisiana", "Maine", "Maryland", "Massachusetts", "Michigan", "Minnesota", "Mississippi",
    "Missouri", "Montana", "Nebraska", "Nevada", "New Hampshire", "New Jersey", "New Mexico", "New York",
    "North Carolina", "North Dakota", "Ohio", "Oklahoma", "Oregon", "Pennsylvania", "Rhode Island",
    "South Carolina", "South Dakota", "Tennessee", "Texas", "Utah", "Vermont", "Virginia", "Washington",
    "West Virginia", "Wisconsin", "Wyoming",
];

/// `(canonical name, aliases)`; aliases are matched case-insensitively.
const PAYERS: &[(&str, &[&str])] = &[
    ("United Healthcare", &["united healthcare", "unitedhealthcare", "united health care", "uhc"]),
    ("Aetna", &["aetna"]),
    ("Humana", &["humana"]),
    ("Cigna", &["cigna"]),
    ("Molina", &["molina"]),
    ("Centene", &["centene"]),
    ("Anthem", &["anthem", "elevance"]),
    ("WellCare", &["wellcare", "well care"]),
    ("Sunshine Health", &["sunshine health"]),
    ("Simply Healthcare", &["simply healthcare"]),
    ("Blue Cross Blue Shield", &["blue cross", "bcbs", "blue shield"]),
    ("Kaiser Permanente", &["kaiser"]),
    ("Amerigroup", &["amerigroup"]),
];

const PROGRAMS: &[(&str, &[&str])] = &[
    ("Medicaid", &["medicaid"]),
    ("Medicare", &["medicare"]),
    ("CHIP", &["chip", "children's health insurance program"]),
    ("Marketplace", &["marketplace", "aca exchange"]),
];

/// The jurisdiction a piece of text names, in canonical spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub states: Vec<String>,
    pub payers: Vec<String>,
    pub programs: Vec<String>,
}

/// Whole-word, case-insensitive containment.
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    let padded = format!(" {haystack} ");
    padded.contains(&format!(" {needle} "))
}

fn normalized(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl Jurisdiction {
    pub fn extract(text: &str) -> Self {
        let text = normalized(text);
        let mut found = Self::default();

        for state in STATES {
            let name = state.to_lowercase();
            if contains_phrase(&text, &name) {
                // "West Virginia" also contains "Virginia"
                if *state == "Virginia" && contains_phrase(&text, "west virginia") {
                    continue;
                }
                if *state == "Washington" && contains_phrase(&text, "washington dc") {
                    continue;
                }
                found.states.push(state.to_string());
            }
        }
        for (name, aliases) in PAYERS {
            if aliases.iter().any(|a| contains_phrase(&text, a)) {
                found.payers.push(name.to_string());
            }
        }
        for (name, aliases) in PROGRAMS {
            if aliases.iter().any(|a| contains_phrase(&text, a)) {
                found.programs.push(name.to_string());
            }
        }
        found
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty() && self.payers.is_empty() && self.programs.is_empty()
    }

    /// Overlay `newer` on `self`: each category the newer text names
    /// replaces the older one.
    pub fn overlay(&self, newer: &Jurisdiction) -> Jurisdiction {
        let pick = |old: &Vec<String>, new: &Vec<String>| if new.is_empty() { old.clone() } else { new.clone() };
        Jurisdiction {
            states: pick(&self.states, &newer.states),
            payers: pick(&self.payers, &newer.payers),
            programs: pick(&self.programs, &newer.programs),
        }
    }

    /// Retrieval filter tags: lowercase, hyphenated state names.
    pub fn filter_tags(&self) -> Vec<String> {
        self.states
            .iter()
            .map(|s| s.to_lowercase().replace(' ', "-"))
            .collect()
    }

    /// Human-readable summary, e.g. "Florida Medicaid, United Healthcare".
    pub fn summary(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let place = self
            .states
            .iter()
            .chain(self.programs.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        let parts: Vec<String> = std::iter::once(place)
            .chain(self.payers.iter().cloned())
            .filter(|p| !p.is_empty())
            .collect();
        Some(parts.join(", "))
    }
}

/// Whether `word` is a known state, payer or program name.
pub fn is_known_name(word: &str) -> bool {
    let lower = normalized(word);
    if lower.is_empty() {
        return false;
    }
    STATES.iter().any(|s| s.to_lowercase() == lower || s.to_lowercase().split(' ').any(|w| w == lower))
        || PAYERS
            .iter()
            .any(|(name, aliases)| name.to_lowercase().split(' ').any(|w| w == lower) || aliases.contains(&lower.as_str()))
        || PROGRAMS.iter().any(|(_, aliases)| aliases.contains(&lower.as_str()))
}

/// Remove every whole-word, case-insensitive occurrence of the names in
/// `drop` from `text`, along with any aliases of those names.
pub fn strip_names(text: &str, drop: &Jurisdiction) -> String {
    let mut needles: Vec<String> = Vec::new();
    for state in &drop.states {
        needles.push(state.to_lowercase());
    }
    for payer in &drop.payers {
        if let Some((_, aliases)) = PAYERS.iter().find(|(name, _)| *name == payer.as_str()) {
            needles.extend(aliases.iter().map(|a| a.to_string()));
        }
    }
    for program in &drop.programs {
        if let Some((_, aliases)) = PROGRAMS.iter().find(|(name, _)| *name == program.as_str()) {
            needles.extend(aliases.iter().map(|a| a.to_string()));
        }
    }
    // Longest first so "west virginia" goes before "virginia"
    needles.sort_by_key(|n| std::cmp::Reverse(n.len()));

    let mut words: Vec<&str> = text.split_whitespace().collect();
    for needle in &needles {
        let needle_words: Vec<&str> = needle.split(' ').collect();
        let n = needle_words.len();
        let mut i = 0;
        while i + n <= words.len() {
            let window_matches = words[i..i + n].iter().zip(&needle_words).all(|(w, nw)| {
                normalized(w) == *nw
            });
            if window_matches {
                words.drain(i..i + n);
            } else {
                i += 1;
            }
        }
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_states_payers_and_programs() {
        let j = Jurisdiction::extract("Does Florida Medicaid through United Healthcare cover rides?");
        assert_eq!(j.states, vec!["Florida"]);
        assert_eq!(j.payers, vec!["United Healthcare"]);
        assert_eq!(j.programs, vec!["Medicaid"]);
        assert_eq!(j.filter_tags(), vec!["florida"]);
        assert_eq!(j.summary().as_deref(), Some("Florida Medicaid, United Healthcare"));
    }

    #[test]
    fn compound_state_names() {
        let j = Jurisdiction::extract("CHIP in West Virginia vs New York");
        assert_eq!(j.states, vec!["New York", "West Virginia"]);
        assert_eq!(j.filter_tags(), vec!["new-york", "west-virginia"]);
        assert_eq!(j.programs, vec!["CHIP"]);
    }

    #[test]
    fn nothing_named() {
        let j = Jurisdiction::extract("what is a deductible");
        assert!(j.is_empty());
        assert_eq!(j.summary(), None);
    }

    #[test]
    fn overlay_replaces_per_category() {
        let old = Jurisdiction::extract("Florida Medicaid");
        let new = Jurisdiction::extract("how about for UHC");
        let merged = old.overlay(&new);
        assert_eq!(merged.states, vec!["Florida"]);
        assert_eq!(merged.payers, vec!["United Healthcare"]);
        assert_eq!(merged.programs, vec!["Medicaid"]);
    }

    #[test]
    fn known_names() {
        assert!(is_known_name("Florida"));
        assert!(is_known_name("Healthcare"));
        assert!(is_known_name("United"));
        assert!(!is_known_name("John"));
    }

    #[test]
    fn strips_replaced_names() {
        let old = Jurisdiction::extract("Texas UHC");
        assert_eq!(
            strip_names("What is the CHIP income limit in Texas? Ask United Healthcare", &old),
            "What is the CHIP income limit in Ask"
        );
        let west = Jurisdiction::extract("West Virginia");
        assert_eq!(strip_names("rides in West Virginia", &west), "rides in");
    }
}
