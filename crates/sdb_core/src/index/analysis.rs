//! Text analysis.

use super::mapping::Analyzer;

/// A term and its position within the field value.
pub(crate) type Token = (String, u32);

impl Analyzer {
    /// Splits `text` into terms.
    #[must_use]
    pub fn terms(self, text: &str) -> Vec<String> {
        self.tokens(text).into_iter().map(|(t, _)| t).collect()
    }

    pub(crate) fn tokens(self, text: &str) -> Vec<Token> {
        match self {
            Self::Keyword => {
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![(text.to_string(), 0)]
                }
            }
            Self::Standard => text
                .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
                .filter(|t| !t.is_empty())
                .zip(0u32..)
                .map(|(t, pos)| (t.to_lowercase(), pos))
                .collect(),
        }
    }
}
