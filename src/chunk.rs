//! Sliding-window text chunker.
//!
//! Splits document text into overlapping [`Chunk`]s of at most `chunk_size`
//! characters. Consecutive windows advance by `chunk_size - overlap`, so each
//! chunk after the first repeats the last `overlap` characters of its
//! predecessor. The last window is clipped to the end of the text.
//!
//! Sizes are counted in characters (Unicode scalar values), not bytes, so a
//! window never splits a multi-byte sequence.
//!
//! ```text
//!  text:   |---------------------------------------------|
//!  chunk0: |==========|
//!  chunk1:         |==========|
//!  chunk2:                 |==========|
//!  ...                                  (last chunk may be shorter)
//!          |<-step->|
//! ```

use thiserror::Error;

use crate::models::Chunk;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk_size must be > 0")]
    ZeroSize,
    #[error("overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { overlap: usize, chunk_size: usize },
}

/// Split `text` into overlapping windows.
///
/// Text no longer than `chunk_size` comes back as a single chunk equal to
/// the whole text. Otherwise the result has
/// `ceil((len - overlap) / (chunk_size - overlap))` chunks whose spans cover
/// every character, and the final chunk ends exactly at the text length.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::ZeroSize);
    }
    if overlap >= chunk_size {
        return Err(ChunkError::OverlapTooLarge {
            overlap,
            chunk_size,
        });
    }

    // Byte offset of every character, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = boundaries.len() - 1;

    if len <= chunk_size {
        return Ok(vec![Chunk {
            index: 0,
            total: 1,
            start: 0,
            end: len,
            text: text.to_string(),
        }]);
    }

    let step = chunk_size - overlap;
    let mut spans = Vec::with_capacity((len - overlap).div_ceil(step));
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(len);
        spans.push((start, end));
        if end >= len {
            break;
        }
        start += step;
    }

    let total = spans.len();
    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Chunk {
            index,
            total,
            start,
            end,
            text: text[boundaries[start]..boundaries[end]].to_string(),
        })
        .collect())
}
