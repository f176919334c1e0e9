//! Character-trigram vectorization.
//!
//! Slides a 3-character window across normalized content one character at a
//! time and counts every window. The result is a multiset: repeated trigrams
//! raise their count, which matters for cosine weighting.

use tracing::debug;

use crate::models::TrigramVector;

/// Window width.
pub const TRIGRAM_WIDTH: usize = 3;

/// Default cap on the number of characters vectorized per document.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 50_000;

/// Build the trigram vector of `normalized`, truncated to `max_length`
/// characters first. Content shorter than three characters yields an empty
/// vector.
pub fn vectorize(normalized: &str, max_length: usize) -> TrigramVector {
    let chars: Vec<char> = normalized.chars().take(max_length).collect();
    let mut vector = TrigramVector::new();

    if chars.len() < TRIGRAM_WIDTH {
        debug!(len = chars.len(), "content too short to generate trigrams");
        return vector;
    }

    for window in chars.windows(TRIGRAM_WIDTH) {
        vector.increment(window.iter().collect());
    }
    vector
}
