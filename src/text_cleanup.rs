// Text cleanup module
// Applies regex patterns to clean up track titles before token matching

use regex::Regex;

/// Applies a list of regex patterns to scrub destination-specific noise out
/// of a title before it is tokenized for matching.
pub struct TextCleaner {
    patterns: Vec<Regex>,
}

impl TextCleaner {
    /// Create a cleaner from raw patterns. Invalid patterns are skipped with
    /// a warning rather than failing the whole cleaner.
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Invalid regex pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    /// Cleaner that strips "featuring" credits, for destinations that embed
    /// guest artists in the track title.
    pub fn feat_stripper() -> Self {
        Self::new(&[
            r"(?i)\s*\(?\s*(?:feat\.?|ft\.?|featuring)\s+[^)]*\)?".to_string(),
        ])
    }

    /// Clean a text string by applying all patterns
    pub fn clean(&self, text: &str) -> String {
        let mut result = text.to_string();
        for pattern in &self.patterns {
            result = pattern.replace_all(&result, "").to_string();
        }

        // Collapse whatever whitespace the removals left behind
        result.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Clean an optional string
    pub fn clean_option(&self, text: Option<String>) -> Option<String> {
        text.map(|s| self.clean(&s))
    }
}
