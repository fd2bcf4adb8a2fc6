//! Query Optimizer (Component D, §4.D). A pure function over strings: no
//! I/O, no shared state — every call is independently testable.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Intent signals detected in a query, passed forward as hints. They never
/// change the outgoing query text unless an adapter supports typed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryIntent {
    pub author: bool,
    pub series: bool,
}

/// The result of optimizing a raw query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedQuery {
    /// The query as it should be sent to adapters — trimmed, whitespace
    /// collapsed, original casing preserved.
    pub outgoing: String,
    /// Lowercased, stop-word-stripped, synonym-expanded form used only for
    /// internal analysis (fingerprinting, relevance scoring).
    pub analysis: String,
    pub intent: QueryIntent,
}

static ABBREVIATIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("scifi", "science fiction"),
        ("sf", "science fiction"),
        ("ya", "young adult"),
        ("nf", "non fiction"),
    ])
});

static STOP_WORDS: Lazy<std::collections::HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "of", "in", "on", "and", "or", "to", "for", "with", "is", "at",
    ]
    .into_iter()
    .collect()
});

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn detect_intent(trimmed: &str) -> QueryIntent {
    let lower = trimmed.to_ascii_lowercase();
    let author = lower.starts_with("by ") || lower.contains("author:");
    let series = ["series", "book ", "volume", "part "]
        .iter()
        .any(|kw| lower.contains(kw))
        || regex_has_book_number(&lower);
    QueryIntent { author, series }
}

/// Matches a trailing "book N" pattern without pulling in a full regex
/// engine dependency for one check — `book` already triggers via the
/// substring probe above, this only tightens the "book N" shape.
fn regex_has_book_number(lower: &str) -> bool {
    if let Some(idx) = lower.find("book ") {
        let rest = &lower[idx + 5..];
        return rest.chars().next().is_some_and(|c| c.is_ascii_digit());
    }
    false
}

/// Expand known abbreviations token-by-token in the analysed copy.
fn expand_abbreviations(tokens: &[&str]) -> Vec<String> {
    tokens
        .iter()
        .map(|t| {
            ABBREVIATIONS
                .get(t)
                .map(|expanded| expanded.to_string())
                .unwrap_or_else(|| t.to_string())
        })
        .collect()
}

fn strip_stop_words(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| !STOP_WORDS.contains(t.as_str()))
        .cloned()
        .collect()
}

/// Normalize and analyse a raw query, per §4.D's ordered operations: trim,
/// collapse whitespace, lowercase-for-analysis, expand abbreviations, strip
/// stop-words (falling back to the trimmed original if stripping empties the
/// result), and detect intent.
pub fn optimize(raw: &str) -> OptimizedQuery {
    let trimmed = collapse_whitespace(raw.trim());
    let lower = trimmed.to_ascii_lowercase();
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    let expanded = expand_abbreviations(&tokens);
    // Re-split since an expansion can introduce multiple words.
    let expanded_tokens: Vec<String> = expanded
        .iter()
        .flat_map(|s| s.split_whitespace().map(str::to_string))
        .collect();
    let stripped = strip_stop_words(&expanded_tokens);
    let analysis = if stripped.is_empty() {
        trimmed.to_ascii_lowercase()
    } else {
        stripped.join(" ")
    };
    let intent = detect_intent(&trimmed);

    OptimizedQuery {
        outgoing: trimmed,
        analysis,
        intent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trims_and_collapses_whitespace() {
        let q = optimize("  foundation   asimov  ");
        assert_eq!(q.outgoing, "foundation asimov");
    }

    #[test]
    fn test_preserves_outgoing_casing() {
        let q = optimize("The Hobbit");
        assert_eq!(q.outgoing, "The Hobbit");
        assert_eq!(q.analysis, "hobbit");
    }

    #[test]
    fn test_expands_known_abbreviations() {
        let q = optimize("scifi anthology");
        assert!(q.analysis.contains("science fiction"));
    }

    #[test]
    fn test_stop_word_stripping_falls_back_when_empty() {
        let q = optimize("the of");
        assert_eq!(q.analysis, "the of");
    }

    #[test]
    fn test_detects_author_intent() {
        assert!(optimize("by Isaac Asimov").intent.author);
        assert!(optimize("author:asimov").intent.author);
        assert!(!optimize("foundation").intent.author);
    }

    #[test]
    fn test_detects_series_intent() {
        assert!(optimize("Foundation series").intent.series);
        assert!(optimize("Dune book 2").intent.series);
        assert!(optimize("Wheel of Time volume one").intent.series);
        assert!(!optimize("Foundation").intent.series);
    }
}
