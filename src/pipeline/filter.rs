//! Deterministic post-processing of drafted replies.
//!
//! Order: excluded characters, excluded whole words (case-insensitive),
//! whitespace collapse, then the length cap. The pass is repeated until the
//! text stops changing, so the filter is idempotent.

use regex::Regex;
use tracing::warn;

use crate::policy::ResponseFilter;

/// Marker appended when a reply is cut to the length cap.
const ELLIPSIS: char = '…';

/// Compiled form of a [`ResponseFilter`].
pub struct ContentFilter {
    enabled: bool,
    characters: Vec<String>,
    words: Vec<Regex>,
    max_length: Option<usize>,
}

impl ContentFilter {
    pub fn new(config: &ResponseFilter) -> Self {
        let words = config
            .excluded_words
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .filter_map(|w| {
                match Regex::new(&word_pattern(w)) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(word = w, error = %e, "Skipping unusable excluded word");
                        None
                    }
                }
            })
            .collect();

        Self {
            enabled: config.enabled,
            characters: config
                .excluded_characters
                .iter()
                .filter(|c| !c.is_empty())
                .cloned()
                .collect(),
            words,
            max_length: config.max_length.filter(|&n| n > 0),
        }
    }

    /// Filter `text`. Applying the result again returns it unchanged.
    pub fn apply(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        let mut current = self.pass(text);
        loop {
            let next = self.pass(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn pass(&self, text: &str) -> String {
        let mut out = text.to_string();
        for c in &self.characters {
            out = out.replace(c.as_str(), "");
        }
        for re in &self.words {
            out = re.replace_all(&out, "").into_owned();
        }
        let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
        match self.max_length {
            Some(max) => truncate(&collapsed, max),
            None => collapsed,
        }
    }
}

/// Case-insensitive whole-word pattern. `\b` only holds next to a word
/// character, so entries like `#ad` or `c++` are anchored on their word side only.
fn word_pattern(word: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let lead = if is_word(word.chars().next()) { r"\b" } else { "" };
    let trail = if is_word(word.chars().next_back()) { r"\b" } else { "" };
    format!("(?i){lead}{}{trail}", regex::escape(word))
}

/// Cut to at most `max` characters, preferring a word boundary.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 1 {
        return ELLIPSIS.to_string();
    }
    let head: String = text.chars().take(max - 1).collect();
    let cut = match head.rfind(' ') {
        Some(idx) if idx > head.len() / 2 => &head[..idx],
        _ => head.as_str(),
    };
    let mut out = cut.trim_end().to_string();
    out.push(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(words: &[&str], chars: &[&str], max: Option<usize>) -> ContentFilter {
        ContentFilter::new(&ResponseFilter {
            enabled: true,
            excluded_words: words.iter().map(|s| s.to_string()).collect(),
            excluded_characters: chars.iter().map(|s| s.to_string()).collect(),
            max_length: max,
        })
    }

    #[test]
    fn removes_words_case_insensitively() {
        let f = filter(&["honestly", "literally"], &[], None);
        assert_eq!(
            f.apply("Honestly, you LITERALLY crushed it"),
            ", you crushed it"
        );
        // Whole words only
        assert_eq!(f.apply("literallyness stays"), "literallyness stays");
    }

    #[test]
    fn removes_words_with_symbol_edges() {
        let f = filter(&["#ad", "c++"], &[], None);
        assert_eq!(f.apply("Loving this shake #ad"), "Loving this shake");
        assert_eq!(f.apply("I write C++ at work"), "I write at work");
        // The word side stays anchored.
        assert_eq!(f.apply("#adventure awaits"), "#adventure awaits");
    }

    #[test]
    fn removes_characters() {
        let f = filter(&[], &["!", "*"], None);
        assert_eq!(f.apply("Great *work* today!!"), "Great work today");
    }

    #[test]
    fn collapses_whitespace() {
        let f = filter(&[], &[], None);
        assert_eq!(f.apply("  lots \n\n of\tspace  "), "lots of space");
    }

    #[test]
    fn truncates_on_word_boundary() {
        let f = filter(&[], &[], Some(20));
        let out = f.apply("Protein at every meal keeps you full longer");
        assert!(out.chars().count() <= 20);
        assert!(out.ends_with(ELLIPSIS));
        assert_eq!(out, "Protein at every…");
    }

    #[test]
    fn idempotent_even_when_marker_is_excluded() {
        let f = filter(&["meal"], &["…", "!"], Some(16));
        let once = f.apply("Protein at every meal keeps you full!!");
        let twice = f.apply(&once);
        assert_eq!(once, twice);
        assert!(once.chars().count() <= 16);
    }

    #[test]
    fn idempotent_on_plain_text() {
        let f = filter(&["damn"], &["#"], Some(300));
        let text = "Nice #work on the damn squats — keep it up";
        let once = f.apply(text);
        assert_eq!(f.apply(&once), once);
    }

    #[test]
    fn disabled_filter_is_identity() {
        let f = ContentFilter::new(&ResponseFilter {
            enabled: false,
            excluded_words: vec!["x".into()],
            ..ResponseFilter::default()
        });
        assert_eq!(f.apply("  x  y "), "  x  y ");
    }
}
