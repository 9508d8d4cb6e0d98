//! Character symbol table used to turn input text into token ids.
//!
//! Ids index [`SYMBOLS`]: `0` is padding, `1` marks end of sequence.

/// Padding symbol.
pub const PAD: char = '_';
/// End-of-sequence symbol.
pub const EOS: char = '~';

const PUNCTUATION: &str = "!'(),-.:;? ";
const LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Every symbol the acoustic model was trained on, in id order.
pub static SYMBOLS: std::sync::LazyLock<Vec<char>> = std::sync::LazyLock::new(|| {
    let mut symbols = vec![PAD, EOS];
    symbols.extend(PUNCTUATION.chars());
    symbols.extend(LETTERS.chars());
    symbols
});

/// Number of symbols (embedding rows of the acoustic model).
pub fn vocab_size() -> usize {
    SYMBOLS.len()
}

fn symbol_id(symbol: char) -> Option<i64> {
    SYMBOLS
        .iter()
        .position(|candidate| *candidate == symbol)
        .map(|idx| idx as i64)
}

/// Lowercase and collapse runs of whitespace into single spaces.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Convert text into symbol ids terminated by the EOS id.
///
/// Characters outside the symbol table are dropped.
pub fn text_to_sequence(text: &str) -> Vec<i64> {
    let cleaned = clean_text(text);
    let mut sequence: Vec<i64> = cleaned
        .chars()
        .filter(|c| *c != PAD && *c != EOS)
        .filter_map(symbol_id)
        .collect();
    sequence.push(1);
    sequence
}

/// Convert ids back into text, skipping padding and EOS.
pub fn sequence_to_text(sequence: &[i64]) -> String {
    sequence
        .iter()
        .filter(|id| **id > 1)
        .filter_map(|id| SYMBOLS.get(*id as usize))
        .collect()
}
