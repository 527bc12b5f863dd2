// tokenizer.rs
// Description: Comma separated tokenizer for the visualizer input text.
// History:
// - 2026-10-17: Replace the BPE tokenizer with plain comma splitting.

pub const TOKEN_SEPARATOR: char = ',';

// Splits on commas, trims each piece and drops empty pieces.
pub fn tokenize(s_text: &str) -> Vec<String> {
    s_text
        .split(TOKEN_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
