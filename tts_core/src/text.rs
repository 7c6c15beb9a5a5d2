//! Splitting text at punctuation so synthesis can insert natural pauses.

use std::time::Duration;

const ABBREVIATIONS: &[&str] = &[
    "Dr.", "Mr.", "Mrs.", "Ms.", "Prof.", "etc.", "vs.", "e.g.", "i.e.", "a.m.", "p.m.", "Inc.",
    "Ltd.", "Corp.", "z.B.", "usw.",
];

/// Split `text` after sentence ends, commas, semicolons and colons.
///
/// Abbreviations and commas inside numbers (`1,000`, `3,14`) don't split.
/// A following space stays with the chunk it ends.
pub fn split_with_pauses(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut current = String::new();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        current.push(c);

        let splits = match c {
            // `e.g`, `3.14`, `example.com`
            '.' if chars.get(i + 1).is_some_and(|n| n.is_alphanumeric()) => false,
            '.' | '!' | '?' => !ends_with_abbreviation(&current),
            ',' => !is_number_comma(&chars, i),
            ';' | ':' => true,
            _ => false,
        };
        if splits {
            if chars.get(i + 1) == Some(&' ') {
                current.push(' ');
                i += 1;
            }
            chunks.push(std::mem::take(&mut current));
        }
        i += 1;
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }
    if chunks.is_empty() {
        chunks.push(text.to_string());
    }
    chunks
}

fn ends_with_abbreviation(chunk: &str) -> bool {
    ABBREVIATIONS.iter().any(|abbrev| {
        chunk.ends_with(abbrev)
            && chunk[..chunk.len() - abbrev.len()]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric())
    })
}

fn is_number_comma(chars: &[char], i: usize) -> bool {
    let before = i.checked_sub(1).and_then(|p| chars.get(p));
    let after = chars.get(i + 1);
    matches!((before, after), (Some(b), Some(a)) if b.is_ascii_digit() && a.is_ascii_digit())
}

/// Pause to insert after a chunk, by its final punctuation.
pub fn pause_after(chunk: &str) -> Duration {
    let millis = match chunk.trim_end().chars().last() {
        Some('.' | '!' | '?') => 400,
        Some(';' | ':') => 250,
        Some(',') => 150,
        _ => 100,
    };
    Duration::from_millis(millis)
}

pub fn silence_samples(pause: Duration, sample_rate: u32) -> usize {
    (pause.as_secs_f64() * sample_rate as f64) as usize
}
