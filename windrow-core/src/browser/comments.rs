use std::collections::HashSet;

use regex::Regex;

use crate::harvest::models::Comment;

use super::page_model::{CommentRules, RawCommentBlock};

/// Separates comment text from interface chrome. The rules are data supplied
/// by the page model, so a different site swaps rules without touching the
/// traversal or the extractors.
#[derive(Debug)]
pub struct CommentClassifier {
    rules: CommentRules,
    count_line_regex: Regex,
}

impl CommentClassifier {
    pub fn new(rules: CommentRules) -> Self {
        let count_line_regex = Regex::new(r"^([\d.,]+)\s*([KMB]?)$").expect("valid regex");
        Self {
            rules,
            count_line_regex,
        }
    }

    /// Whether a candidate line is interface chrome rather than comment text.
    pub fn is_chrome_line(&self, line: &str, author: Option<&str>) -> bool {
        let trimmed = line.trim();
        let length = trimmed.chars().count();
        if length < 4 {
            return true;
        }
        let lower = trimmed.to_lowercase();
        if let Some(author) = author {
            if lower == author.to_lowercase() {
                return true;
            }
        }
        if self.rules.ui_words.iter().any(|word| lower == *word) {
            return true;
        }
        if length < 20 {
            if self
                .rules
                .ui_phrases
                .iter()
                .any(|phrase| lower.contains(phrase))
            {
                return true;
            }
        }
        let numeric = trimmed.replace([',', '.'], "");
        if !numeric.is_empty() && numeric.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
        if length < 15 {
            if self
                .rules
                .time_words
                .iter()
                .any(|word| lower.contains(word))
            {
                return true;
            }
        }
        false
    }

    /// Deduplicated (author, text) pairs from raw blocks. Blocks attributed to
    /// `skip_identity` are dropped so the creator byline does not surface as a
    /// comment.
    pub fn classify(&self, blocks: &[RawCommentBlock], skip_identity: Option<&str>) -> Vec<Comment> {
        let mut comments = Vec::new();
        let mut seen = HashSet::new();
        for block in blocks {
            let author = block
                .author_identity
                .as_deref()
                .filter(|value| !value.trim().is_empty())
                .or_else(|| {
                    block
                        .author_display
                        .as_deref()
                        .filter(|value| !value.trim().is_empty())
                });
            let Some(author) = author else {
                continue;
            };
            if skip_identity.is_some_and(|skip| skip == author) {
                continue;
            }
            let text = block
                .lines
                .iter()
                .map(|line| line.trim())
                .filter(|line| !self.is_chrome_line(line, Some(author)))
                .filter(|line| line.chars().count() >= self.rules.min_length)
                .max_by_key(|line| line.len());
            let Some(text) = text else {
                continue;
            };
            let key = (author.to_string(), text.to_string());
            if seen.insert(key) {
                comments.push(Comment {
                    author: author.to_string(),
                    text: text.to_string(),
                    like_count: self.like_count(block),
                });
            }
        }
        comments
    }

    // First standalone count line in the block, if any.
    fn like_count(&self, block: &RawCommentBlock) -> u64 {
        block
            .lines
            .iter()
            .find_map(|line| self.parse_count_line(line.trim()))
            .unwrap_or(0)
    }

    fn parse_count_line(&self, line: &str) -> Option<u64> {
        let caps = self.count_line_regex.captures(line)?;
        let number: f64 = caps
            .get(1)
            .and_then(|m| m.as_str().replace(',', "").parse().ok())?;
        let multiplier = match caps.get(2).map(|m| m.as_str()) {
            Some("K") => 1_000.0,
            Some("M") => 1_000_000.0,
            Some("B") => 1_000_000_000.0,
            _ => 1.0,
        };
        Some((number * multiplier).round() as u64)
    }
}
