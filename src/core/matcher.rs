//! Answer Matching
//!
//! Provides a pluggable trait for deciding when two candidate outputs state
//! the same answer. Majority voting groups candidates by their canonical form,
//! so the matcher defines what "the same answer" means.
//!
//! # Matchers
//!
//! - `ExactMatcher`: whitespace-normalized string equality
//! - `AnswerMatcher`: extracts the final answer from a reasoning trace
//!   (`\boxed{..}`, "the answer is ..", or the last non-empty line) and
//!   compares it case-insensitively without trailing punctuation

use std::sync::Arc;

/// Trait for comparing candidate outputs during voting.
///
/// All implementations must be `Send + Sync` so aggregators can be shared
/// across sampling tasks.
pub trait CandidateMatcher: Send + Sync + std::fmt::Debug {
    /// Normalize an output into the key used for vote counting.
    fn canonicalize(&self, response: &str) -> String;

    /// Check if two outputs should share votes.
    fn are_equivalent(&self, a: &str, b: &str) -> bool {
        self.canonicalize(a) == self.canonicalize(b)
    }

    /// Human-readable name for this matcher type.
    fn matcher_type(&self) -> &str;
}

/// Exact string matcher.
///
/// Canonicalizes by trimming and collapsing internal whitespace runs to
/// single spaces.
#[derive(Debug, Clone, Default)]
pub struct ExactMatcher;

impl ExactMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl CandidateMatcher for ExactMatcher {
    fn canonicalize(&self, response: &str) -> String {
        collapse_whitespace(response)
    }

    fn matcher_type(&self) -> &str {
        "exact"
    }
}

/// Final-answer matcher for reasoning traces.
#[derive(Debug, Clone, Default)]
pub struct AnswerMatcher;

impl AnswerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Pull the final answer out of a trace, before normalization
    pub fn extract(response: &str) -> &str {
        if let Some(boxed) = extract_boxed(response) {
            return boxed;
        }
        if let Some(stated) = extract_stated_answer(response) {
            return stated;
        }
        response
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
    }
}

impl CandidateMatcher for AnswerMatcher {
    fn canonicalize(&self, response: &str) -> String {
        let answer = Self::extract(response)
            .trim()
            .trim_matches('$')
            .trim_end_matches(&['.', '!', ';', ','][..])
            .trim();
        collapse_whitespace(answer).to_lowercase()
    }

    fn matcher_type(&self) -> &str {
        "answer"
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content of the last `\boxed{...}`, honoring nested braces
fn extract_boxed(response: &str) -> Option<&str> {
    const MARKER: &str = "\\boxed{";
    let start = response.rfind(MARKER)? + MARKER.len();
    let mut depth = 1usize;
    for (offset, ch) in response[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&response[start..start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Text after the last "answer is" / "answer:" up to the end of that line
fn extract_stated_answer(response: &str) -> Option<&str> {
    // ASCII lowercasing keeps byte offsets aligned with `response`
    let lowered = response.to_ascii_lowercase();
    let (pos, marker_len) = ["answer is", "answer:"]
        .iter()
        .filter_map(|marker| lowered.rfind(marker).map(|pos| (pos, marker.len())))
        .max_by_key(|(pos, _)| *pos)?;
    let rest = &response[pos + marker_len..];
    let line = rest.lines().next().unwrap_or("").trim();
    let line = line.trim_start_matches(':').trim();
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Create the exact matcher wrapped in Arc.
pub fn default_matcher() -> Arc<dyn CandidateMatcher> {
    Arc::new(ExactMatcher::new())
}

/// Create the final-answer matcher wrapped in Arc.
pub fn answer_matcher() -> Arc<dyn CandidateMatcher> {
    Arc::new(AnswerMatcher::new())
}
