//! Placeholder token recognition
//!
//! A token is a key wrapped in a start/end marker pair. Markers are either
//! the raw control bytes `0x02`/`0x03` or, in escaped mode, also their
//! four-character textual spelling `\x02`/`\x03`. Start and end spellings may
//! be mixed. Keys are 1 to 64 bytes, contain no raw marker byte and no
//! newline, and end at the first end marker (non-greedy).

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

pub const RAW_START: u8 = 0x02;
pub const RAW_END: u8 = 0x03;
pub const ESCAPED_START: &[u8] = br"\x02";
pub const ESCAPED_END: &[u8] = br"\x03";

pub const MAX_KEY_LEN: usize = 64;

/// Longest byte span a single token can occupy
pub const MAX_TOKEN_LEN: usize = ESCAPED_START.len() + MAX_KEY_LEN + ESCAPED_END.len();

static MARKERS_AND_ESCAPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)(?:\\x02|\x02)([^\x02\x03\n]{1,64}?)(?:\\x03|\x03)")
        .expect("token pattern is valid")
});

static MARKERS_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)\x02([^\x02\x03\n]{1,64}?)\x03").expect("token pattern is valid")
});

/// Which marker spellings are accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkerMode {
    #[default]
    MarkersAndEscaped,
    MarkersOnly,
}

/// A complete token found in a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMatch {
    /// Span of the whole token, markers included
    pub start: usize,
    pub end: usize,
    /// Span of the key
    pub key_start: usize,
    pub key_end: usize,
}

/// Finds tokens in byte buffers
#[derive(Debug, Clone, Copy)]
pub struct TokenScanner {
    mode: MarkerMode,
    pattern: &'static Regex,
}

impl TokenScanner {
    pub fn new(mode: MarkerMode) -> Self {
        let pattern: &'static Regex = match mode {
            MarkerMode::MarkersAndEscaped => &MARKERS_AND_ESCAPED,
            MarkerMode::MarkersOnly => &MARKERS_ONLY,
        };
        Self { mode, pattern }
    }

    pub fn mode(&self) -> MarkerMode {
        self.mode
    }

    /// All complete, non-overlapping tokens in `haystack`, left to right
    pub fn find_all<'h>(&self, haystack: &'h [u8]) -> impl Iterator<Item = TokenMatch> + 'h {
        self.pattern.captures_iter(haystack).filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?;
            Some(TokenMatch {
                start: whole.start(),
                end: whole.end(),
                key_start: key.start(),
                key_end: key.end(),
            })
        })
    }

    /// Where the unmatched tail of a buffer must be held back
    ///
    /// Returns the offset into `tail` of the earliest start marker (or
    /// partial escaped start marker at the very end) that could still grow
    /// into a token once more input arrives. A start marker further than
    /// [`MAX_TOKEN_LEN`] from the end cannot: its token would already be
    /// complete inside the buffer. Returns `tail.len()` when nothing needs to
    /// be held back.
    pub fn carry_start(&self, tail: &[u8]) -> usize {
        let window = tail.len().saturating_sub(MAX_TOKEN_LEN - 1);
        (window..tail.len())
            .find(|&i| self.could_start_token(&tail[i..]))
            .unwrap_or(tail.len())
    }

    fn could_start_token(&self, rest: &[u8]) -> bool {
        if rest.first() == Some(&RAW_START) {
            return true;
        }
        match self.mode {
            MarkerMode::MarkersOnly => false,
            MarkerMode::MarkersAndEscaped => {
                rest.starts_with(ESCAPED_START)
                    || (rest.len() < ESCAPED_START.len() && ESCAPED_START.starts_with(rest))
            }
        }
    }
}

/// Text with every token swapped for a plain placeholder
///
/// Raw marker bytes are control characters that YAML refuses, so a manifest
/// still holding an unbound token is masked before it is parsed and unmasked
/// after it is rendered again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedText {
    pub text: String,
    /// (placeholder, original token) pairs
    tokens: Vec<(String, String)>,
}

impl MaskedText {
    pub fn is_masked(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Put the original tokens back into `rendered`
    pub fn unmask(&self, rendered: &str) -> String {
        let mut out = rendered.to_string();
        for (placeholder, raw) in &self.tokens {
            out = out.replace(placeholder.as_str(), raw);
        }
        out
    }
}

impl TokenScanner {
    /// Replace every token in `text` with a unique placeholder
    pub fn mask(&self, text: &str) -> MaskedText {
        let mut masked = String::with_capacity(text.len());
        let mut tokens = Vec::new();
        let mut last = 0;

        // token spans start and end on ASCII bytes, so they are char boundaries
        for m in self.find_all(text.as_bytes()) {
            let placeholder = format!("__relpack_token_{}__", tokens.len());
            masked.push_str(&text[last..m.start]);
            masked.push_str(&placeholder);
            tokens.push((placeholder, text[m.start..m.end].to_string()));
            last = m.end;
        }
        masked.push_str(&text[last..]);

        MaskedText {
            text: masked,
            tokens,
        }
    }
}
