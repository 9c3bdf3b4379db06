//! Chunking of oversized documents
//!
//! Text is cut at paragraph breaks where possible. Paragraphs that alone
//! exceed the window are split at whitespace (or, failing that, at any char
//! boundary). Consecutive chunks share up to `overlap` characters of whole
//! trailing units so the model keeps some cross-chunk context.
//!
//! Lengths are measured in chars, never bytes.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::provider::CHARS_PER_TOKEN_MIXED;

/// One or more blank lines
static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n)+").unwrap());

/// Separator placed between chunk outputs
pub const CHUNK_OUTPUT_SEPARATOR: &str = "\n\n";

/// Token budget of a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBudget {
    pub context_window: u32,
    /// Tokens kept free for the response
    pub output_reserve: u32,
    /// Tokens taken by the prompts without document content
    pub prompt_overhead: u32,
}

impl ChunkBudget {
    /// Tokens left for document content
    pub fn available(&self) -> u32 {
        self.context_window
            .saturating_sub(self.output_reserve)
            .saturating_sub(self.prompt_overhead)
    }

    pub fn fits(&self, document_tokens: u32) -> bool {
        document_tokens <= self.available()
    }
}

/// Convert token limits into char limits using the document's own ratio
///
/// Returns `(max_chars, overlap_chars)`.
pub fn char_limits(
    document_chars: usize,
    document_tokens: u32,
    budget_tokens: u32,
    overlap_tokens: u32,
) -> (usize, usize) {
    let ratio = if document_tokens == 0 || document_chars == 0 {
        CHARS_PER_TOKEN_MIXED
    } else {
        document_chars as f32 / document_tokens as f32
    };
    let max_chars = ((budget_tokens as f32 * ratio) as usize).max(1);
    let overlap_chars = (overlap_tokens as f32 * ratio) as usize;
    (max_chars, overlap_chars.min(max_chars / 2))
}

/// Split `text` into ordered chunks of at most `max_chars` chars
///
/// Text that already fits comes back as a single chunk.
pub fn split_into_chunks(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let overlap = overlap_chars.min(max_chars / 2);
    let step = max_chars - overlap;

    let units: Vec<&str> = paragraph_units(text)
        .into_iter()
        .flat_map(|unit| hard_split(unit, step))
        .collect();
    let lens: Vec<usize> = units.iter().map(|u| u.chars().count()).collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < units.len() {
        let mut end = start;
        let mut size = 0;
        while end < units.len() && size + lens[end] <= max_chars {
            size += lens[end];
            end += 1;
        }
        // Every unit is at most `step` long, so at least one always fits
        if end == start {
            end = start + 1;
        }
        chunks.push(units[start..end].concat());
        if end == units.len() {
            break;
        }

        // Carry trailing whole units of this chunk into the next one
        let mut next = end;
        let mut tail = 0;
        for k in (start + 1..end).rev() {
            if tail + lens[k] > overlap {
                break;
            }
            tail += lens[k];
            next = k;
        }
        if tail + lens[end] > max_chars {
            next = end;
        }
        start = next;
    }

    chunks
}

/// Join per-chunk outputs in chunk order
pub fn join_chunk_outputs(outputs: &[String]) -> String {
    outputs.join(CHUNK_OUTPUT_SEPARATOR)
}

/// Paragraphs with their trailing separators kept
fn paragraph_units(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut last = 0;
    for m in PARAGRAPH_BREAK.find_iter(text) {
        units.push(&text[last..m.end()]);
        last = m.end();
    }
    if last < text.len() {
        units.push(&text[last..]);
    }
    units
}

/// Pieces of at most `limit` chars, breaking after whitespace when one
/// falls in the second half of the window
fn hard_split(unit: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let chars: Vec<(usize, char)> = unit.char_indices().collect();
    if chars.len() <= limit {
        return vec![unit];
    }

    let mut pieces = Vec::new();
    let mut i = 0;
    while chars.len() - i > limit {
        let window_end = i + limit;
        let cut = (i + limit / 2..window_end)
            .rev()
            .find(|&j| chars[j].1.is_whitespace())
            .map(|j| j + 1)
            .unwrap_or(window_end);
        pieces.push(&unit[chars[i].0..chars[cut].0]);
        i = cut;
    }
    pieces.push(&unit[chars[i].0..]);
    pieces
}
