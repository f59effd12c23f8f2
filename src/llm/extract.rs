//! Code extraction from LLM response text
//!
//! Deterministic, no I/O. Pulls the first fenced code block out of the
//! response and scores how confident we are that it is the intended AL
//! source. The work pool marks a result `ready_for_compile` only when the
//! confidence clears 0.5; callers may still compile lower-confidence text.

use once_cell::sync::Lazy;
use regex::Regex;

static FENCED_AL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:al|AL)\s*\n(.*?)```").expect("static fenced-al pattern")
});

static FENCED_ANY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\s*\n(.*?)```").expect("static fenced pattern")
});

/// AL object declarations; bare responses that open with one of these are
/// treated as code even without a fence.
static AL_OBJECT_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^\s*(codeunit|table|tableextension|page|pageextension|report|enum|enumextension|interface|query|xmlport|permissionset)\s+\d*",
    )
    .expect("static object-header pattern")
});

/// Result of extraction: the candidate code and a confidence in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub code: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodeExtractor;

impl CodeExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> Extraction {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Extraction {
                code: String::new(),
                confidence: 0.0,
            };
        }

        if let Some(captures) = FENCED_AL.captures(trimmed) {
            return Extraction {
                code: captures[1].trim().to_string(),
                confidence: 0.95,
            };
        }

        if let Some(captures) = FENCED_ANY.captures(trimmed) {
            let code = captures[1].trim().to_string();
            let confidence = if AL_OBJECT_HEADER.is_match(&code) {
                0.85
            } else {
                0.6
            };
            return Extraction { code, confidence };
        }

        if AL_OBJECT_HEADER.is_match(trimmed) {
            return Extraction {
                code: trimmed.to_string(),
                confidence: 0.6,
            };
        }

        // Prose or something unrecognizable; hand it back but flag it.
        Extraction {
            code: trimmed.to_string(),
            confidence: 0.2,
        }
    }
}
