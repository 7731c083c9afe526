//! Recursive, overlapping text chunker.
//!
//! Splits document text into [`Chunk`]s of roughly `size` tokens, each chunk
//! after the first overlapping its predecessor by up to `overlap` tokens.
//! Token lengths come from a [`TokenCounter`].
//!
//! # Algorithm
//!
//! 1. Split the text on the first separator of [`SEPARATORS`] it contains
//!    (paragraph break, line break, sentence end, clause mark, space), each
//!    piece keeping its trailing separator.
//! 2. Any piece still longer than `size` is split again with the remaining,
//!    finer separators, down to single characters.
//! 3. Merge consecutive pieces into a window until adding the next piece
//!    would exceed `size`; emit the window as a chunk.
//! 4. Start the next window with the longest tail of the emitted window
//!    that fits in `overlap` tokens.
//!
//! Window boundaries are searched rather than grown piece by piece, so
//! text that only splits into single characters still chunks in
//! near-linear time.
//!
//! Chunks are byte spans of the source, so removing the overlapping prefix
//! of every chunk but the first reconstructs the input exactly (see
//! [`reassemble`]).
//!
//! Invalid parameters never surface as errors: [`build_chunks`] degrades to
//! a single chunk holding the whole text.
//!
//! # Example
//!
//! ```rust
//! use roundtable_core::chunk::{build_chunks, reassemble};
//!
//! let text = "First paragraph.\n\nSecond paragraph.";
//! let chunks = build_chunks(text, 1000, 200);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(reassemble(&chunks), text);
//! ```

use std::ops::Range;

use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Chunk;
use crate::tokens::{count_tokens, ApproxCounter, TokenCounter};

/// Separator hierarchy, coarsest first. The empty string means "between
/// characters" and always matches.
pub const SEPARATORS: &[&str] = &["\n\n", "\n", "。", ". ", "、", " ", ""];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk size must be > 0")]
    ZeroSize,
    #[error("overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Split `text` into overlapping chunks using the default token estimator.
pub fn build_chunks(text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    build_chunks_with(text, size, overlap, &ApproxCounter)
}

/// Split `text` with an explicit token counter.
///
/// # Guarantees
///
/// - At least one chunk is returned (empty input yields one empty chunk).
/// - Chunk indices are contiguous from 0.
/// - With valid parameters every chunk's token count is `<= size`.
pub fn build_chunks_with(
    text: &str,
    size: usize,
    overlap: usize,
    counter: &dyn TokenCounter,
) -> Vec<Chunk> {
    match try_chunk(text, size, overlap, counter) {
        Ok(chunks) => chunks,
        Err(e) => {
            tracing::warn!("chunking degraded to a single chunk: {e}");
            vec![make_chunk(text, 0, 0..text.len(), counter)]
        }
    }
}

/// Fallible chunking; callers outside this module go through
/// [`build_chunks_with`], which never fails.
pub fn try_chunk(
    text: &str,
    size: usize,
    overlap: usize,
    counter: &dyn TokenCounter,
) -> Result<Vec<Chunk>, ChunkError> {
    if size == 0 {
        return Err(ChunkError::ZeroSize);
    }
    if overlap >= size {
        return Err(ChunkError::OverlapTooLarge { size, overlap });
    }
    if text.is_empty() {
        return Ok(vec![make_chunk(text, 0, 0..0, counter)]);
    }

    let mut pieces = Vec::new();
    split_pieces(text, 0..text.len(), SEPARATORS, size, counter, &mut pieces);

    let spans = merge_pieces(text, &pieces, size, overlap, counter);
    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(i, span)| make_chunk(text, i, span, counter))
        .collect())
}

/// Rebuild the source text by dropping each chunk's overlap with its
/// predecessor.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered: usize = 0;
    for c in chunks {
        let skip = covered.saturating_sub(c.start).min(c.text.len());
        out.push_str(&c.text[skip..]);
        covered = covered.max(c.end);
    }
    out
}

/// Recursively split `range` into contiguous pieces no larger than `size`
/// tokens (single characters excepted).
fn split_pieces(
    text: &str,
    range: Range<usize>,
    separators: &[&str],
    size: usize,
    counter: &dyn TokenCounter,
    out: &mut Vec<Range<usize>>,
) {
    let segment = &text[range.clone()];
    let (pos, sep) = separators
        .iter()
        .enumerate()
        .find(|(_, s)| s.is_empty() || segment.contains(**s))
        .map(|(i, s)| (i, *s))
        .unwrap_or((separators.len(), ""));
    let finer = separators.get(pos + 1..).unwrap_or(&[]);

    if sep.is_empty() {
        for (i, ch) in segment.char_indices() {
            let start = range.start + i;
            out.push(start..start + ch.len_utf8());
        }
        return;
    }

    let mut piece_start = range.start;
    let emit = |piece: Range<usize>, out: &mut Vec<Range<usize>>| {
        if count_tokens(counter, &text[piece.clone()]) > size && !finer.is_empty() {
            split_pieces(text, piece, finer, size, counter, out);
        } else {
            out.push(piece);
        }
    };
    for (offset, _) in segment.match_indices(sep) {
        let piece_end = range.start + offset + sep.len();
        emit(piece_start..piece_end, out);
        piece_start = piece_end;
    }
    if piece_start < range.end {
        emit(piece_start..range.end, out);
    }
}

/// Merge pieces into chunk spans of at most `size` tokens, carrying up to
/// `overlap` tokens of tail into each following span.
///
/// Window bounds are found by galloping and binary search over piece
/// indices, so each chunk costs a logarithmic number of token counts over
/// at most twice its own text. Token counts must not decrease as a window
/// grows.
fn merge_pieces(
    text: &str,
    pieces: &[Range<usize>],
    size: usize,
    overlap: usize,
    counter: &dyn TokenCounter,
) -> Vec<Range<usize>> {
    let tokens = |from: usize, to: usize| -> usize {
        count_tokens(counter, &text[pieces[from].start..pieces[to - 1].end])
    };

    let mut spans = Vec::new();
    let mut start = 0;
    while start < pieces.len() {
        let end = window_end(start, pieces.len(), |e| tokens(start, e) <= size);
        spans.push(pieces[start].start..pieces[end - 1].end);
        if end == pieces.len() {
            break;
        }
        // longest tail within `overlap` that still leaves room for piece `end`
        let tail = first_true(start + 1, end, |s| tokens(s, end) <= overlap);
        start = first_true(tail, end, |s| tokens(s, end + 1) <= size);
    }
    spans
}

/// Largest `end` in `start + 1..=len` with `fits(end)`, never less than
/// `start + 1`. `fits` must hold on a prefix of the range only.
fn window_end(start: usize, len: usize, fits: impl Fn(usize) -> bool) -> usize {
    let mut lo = start + 1;
    let mut step = 1;
    while lo + step <= len && fits(lo + step) {
        lo += step;
        step *= 2;
    }
    let hi = (lo + step).min(len + 1);
    first_true(lo + 1, hi, |e| !fits(e)) - 1
}

/// First index in `lo..hi` where `pred` holds, or `hi`. `pred` must be
/// false then true over the range.
fn first_true(mut lo: usize, mut hi: usize, pred: impl Fn(usize) -> bool) -> usize {
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

/// Create a [`Chunk`] with a content hash and a stable id.
fn make_chunk(source: &str, index: usize, span: Range<usize>, counter: &dyn TokenCounter) -> Chunk {
    let text = &source[span.clone()];
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{index}:{hash}").as_bytes());

    Chunk {
        id: id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        start: span.start,
        end: span.end,
        tokens: count_tokens(counter, text),
        hash,
    }
}
