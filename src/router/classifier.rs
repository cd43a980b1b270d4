//! Heuristic complexity classification
//!
//! Pure CPU logic over the request text, no I/O. Signals push a score toward
//! Simple or Complex:
//! - token estimate (chars/4)
//! - complexity and simplicity keywords, matched at word boundaries
//! - structure: list items, code fences, questions, line count
//!
//! The decision needs both a minimum score and a margin over the opposing
//! score; anything in between, and anything with no signal, is Medium.

use super::{ClassificationResult, Complexity, Request};
use crate::budget::estimate_tokens;

/// Phrases that suggest multi-step work
const COMPLEX_KEYWORDS: &[&str] = &[
    "design",
    "architect",
    "architecture",
    "implement",
    "refactor",
    "build a",
    "step by step",
    "step-by-step",
    "end-to-end",
    "migrate",
    "migration",
    "multiple",
    "compare and",
    "comprehensive",
    "in depth",
    "in-depth",
    "analyze",
    "analyse",
];

/// Phrases that suggest a one-shot answer
const SIMPLE_KEYWORDS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "thanks",
    "thank you",
    "what is",
    "what's",
    "who is",
    "define",
    "translate",
    "yes or no",
    "true or false",
    "spell",
];

/// At most this many keyword hits count per direction
const MAX_KEYWORD_HITS: i32 = 3;
const KEYWORD_WEIGHT: i32 = 2;

const COMPLEX_MIN_SCORE: i32 = 4;
const COMPLEX_MIN_MARGIN: i32 = 3;
const SIMPLE_MIN_SCORE: i32 = 3;
const SIMPLE_MIN_MARGIN: i32 = 3;

/// Stateless request classifier
#[derive(Debug, Clone, Default)]
pub struct ComplexityClassifier;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Scores {
    simple: i32,
    complex: i32,
}

impl ComplexityClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a request; never fails
    pub fn classify(&self, request: &Request) -> ClassificationResult {
        self.classify_text(request.prompt())
    }

    /// Classify raw prompt text
    pub fn classify_text(&self, prompt: &str) -> ClassificationResult {
        if prompt.trim().is_empty() {
            return ClassificationResult {
                complexity: Complexity::Medium,
                confidence: 0.0,
            };
        }

        let scores = Self::score(prompt);
        let margin = scores.complex - scores.simple;

        let (complexity, confidence) =
            if scores.complex >= COMPLEX_MIN_SCORE && margin >= COMPLEX_MIN_MARGIN {
                (Complexity::Complex, Self::decisive_confidence(margin))
            } else if scores.simple >= SIMPLE_MIN_SCORE && -margin >= SIMPLE_MIN_MARGIN {
                (Complexity::Simple, Self::decisive_confidence(margin))
            } else {
                // Ambiguous: confidence falls as the scores pull apart
                let pull = f64::from(margin.abs().min(6)) / 10.0;
                (Complexity::Medium, (0.6 - pull).max(0.3))
            };

        tracing::debug!(
            simple_score = scores.simple,
            complex_score = scores.complex,
            complexity = complexity.as_str(),
            confidence = confidence,
            "Request classified"
        );

        ClassificationResult {
            complexity,
            confidence,
        }
    }

    fn decisive_confidence(margin: i32) -> f64 {
        (0.5 + f64::from(margin.abs()) / 12.0).min(0.95)
    }

    fn score(prompt: &str) -> Scores {
        let mut scores = Scores::default();
        let normalized = prompt.to_lowercase();

        let tokens = estimate_tokens(prompt);
        if tokens < 16 {
            scores.simple += 2;
        } else if tokens < 64 {
            scores.simple += 1;
        } else if tokens >= 2048 {
            scores.complex += 4;
        } else if tokens >= 512 {
            scores.complex += 2;
        }

        scores.complex += Self::keyword_score(&normalized, COMPLEX_KEYWORDS);
        scores.simple += Self::keyword_score(&normalized, SIMPLE_KEYWORDS);

        let lines: Vec<&str> = prompt.lines().map(str::trim).collect();
        let list_items = lines.iter().filter(|l| Self::is_list_item(l)).count();
        if list_items >= 3 {
            scores.complex += 2;
        }
        if lines.iter().any(|l| l.starts_with("```")) {
            scores.complex += 1;
        }
        if prompt.matches('?').count() >= 3 {
            scores.complex += 1;
        }
        if lines.iter().filter(|l| !l.is_empty()).count() >= 10 {
            scores.complex += 1;
        }

        scores
    }

    fn keyword_score(normalized: &str, keywords: &[&str]) -> i32 {
        let hits = keywords
            .iter()
            .filter(|k| find_word_boundary(normalized, k).is_some())
            .count() as i32;
        hits.min(MAX_KEYWORD_HITS) * KEYWORD_WEIGHT
    }

    /// `- x`, `* x`, `• x`, `1. x`, `1) x`
    fn is_list_item(line: &str) -> bool {
        if line.starts_with("- ") || line.starts_with("* ") || line.starts_with("• ") {
            return true;
        }
        let digits = line.chars().take_while(char::is_ascii_digit).count();
        digits > 0 && {
            let rest = &line[digits..];
            rest.starts_with(". ") || rest.starts_with(") ")
        }
    }
}

/// Find `word` in `text` surrounded by word boundaries
///
/// A boundary is the start/end of the string or any byte that is not ASCII
/// alphanumeric, so "design" matches "design," but not "designer".
pub(crate) fn find_word_boundary(text: &str, word: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    text.match_indices(word).map(|(pos, _)| pos).find(|&pos| {
        let before = pos == 0 || !bytes[pos - 1].is_ascii_alphanumeric();
        let after_pos = pos + word.len();
        let after = after_pos >= bytes.len() || !bytes[after_pos].is_ascii_alphanumeric();
        before && after
    })
}
