//! Overlapping passage splitter
//!
//! Cuts text into chunks of at most `target_size` characters, preferring to
//! end a chunk on a paragraph break, then a sentence end, then a word break,
//! and only then cutting mid-word. Consecutive chunks overlap by at least
//! `overlap` characters so facts straddling a cut stay retrievable.
//!
//! Chunks are raw slices of the input and carry their character span, so the
//! source can be rebuilt exactly with [`reconstruct`].

use serde::{Deserialize, Serialize};

use crate::config::ChunkingConfig;

/// Bounded contiguous slice of the source text; the unit of retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within a document: ordinal plus a short content hash
    pub id: String,
    /// 0-based position in the document
    pub ordinal: usize,
    pub text: String,
    /// Character offset of the first char (inclusive)
    pub char_start: usize,
    /// Character offset one past the last char
    pub char_end: usize,
}

impl Chunk {
    fn new(ordinal: usize, text: &str, char_start: usize, char_end: usize) -> Self {
        let digest = blake3::hash(text.as_bytes()).to_hex();
        Self {
            id: format!("{:05}-{}", ordinal, &digest.as_str()[..8]),
            ordinal,
            text: text.to_string(),
            char_start,
            char_end,
        }
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// Where a cut may fall, coarsest last so `Ord` ranks preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum BoundaryKind {
    Word,
    Sentence,
    Paragraph,
}

/// Splitter configuration
#[derive(Debug, Clone)]
pub struct Chunker {
    target_size: usize,
    overlap: usize,
}

impl Chunker {
    /// `overlap` is clamped to half of `target_size`, so every chunk
    /// advances by at least that much
    pub fn new(target_size: usize, overlap: usize) -> Self {
        let target_size = target_size.max(1);
        Self {
            target_size,
            overlap: overlap.min(target_size / 2),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.target_size, config.overlap)
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into ordered, non-empty chunks. Deterministic.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let byte_offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        let total = byte_offsets.len();
        let byte_at = |c: usize| if c >= total { text.len() } else { byte_offsets[c] };
        let boundaries = scan_boundaries(text);

        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            let end = self.pick_end(start, total, &boundaries);
            let slice = &text[byte_at(start)..byte_at(end)];
            if !slice.trim().is_empty() {
                chunks.push(Chunk::new(chunks.len(), slice, start, end));
            }
            if end >= total {
                break;
            }
            start = self.pick_next_start(start, end, &boundaries);
        }

        chunks
    }

    /// Furthest, coarsest boundary in the upper half of the window, else a hard cut
    fn pick_end(&self, start: usize, total: usize, boundaries: &[(usize, BoundaryKind)]) -> usize {
        let limit = start + self.target_size;
        if limit >= total {
            return total;
        }

        let floor = (start + self.target_size / 2).max(start + 1);
        let lo = boundaries.partition_point(|(p, _)| *p < floor);
        let hi = boundaries.partition_point(|(p, _)| *p <= limit);

        boundaries[lo..hi]
            .iter()
            .max_by_key(|(pos, kind)| (*kind, *pos))
            .map(|(pos, _)| *pos)
            .unwrap_or(limit)
    }

    /// Latest boundary that still leaves `overlap` shared chars; hard offset otherwise
    fn pick_next_start(&self, start: usize, end: usize, boundaries: &[(usize, BoundaryKind)]) -> usize {
        if self.overlap == 0 {
            return end;
        }

        let latest = end.saturating_sub(self.overlap);
        let slack = self.target_size / 4;
        let idx = boundaries.partition_point(|(p, _)| *p <= latest);

        boundaries[..idx]
            .iter()
            .rev()
            .map(|(p, _)| *p)
            .find(|p| *p > start && latest - *p <= slack)
            .unwrap_or_else(|| latest.max(start + 1))
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

/// `split(text, target_size, overlap)`
pub fn split(text: &str, target_size: usize, overlap: usize) -> Vec<Chunk> {
    Chunker::new(target_size, overlap).split(text)
}

/// Rebuild the source from chunks, dropping the overlapped prefix of each.
///
/// Whitespace-only gaps (never emitted as chunks) are not restored.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.char_start);
        out.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.char_end);
    }
    out
}

/// Char offsets where a chunk may end (exclusive) / the next may begin
fn scan_boundaries(text: &str) -> Vec<(usize, BoundaryKind)> {
    let mut boundaries = Vec::new();
    let mut prev: Option<char> = None;

    for (i, c) in text.chars().enumerate() {
        let kind = match c {
            '\n' => Some(BoundaryKind::Paragraph),
            '。' | '！' | '？' => Some(BoundaryKind::Sentence),
            c if c.is_whitespace() => match prev {
                Some('.') | Some('?') | Some('!') | Some('…') => Some(BoundaryKind::Sentence),
                _ => Some(BoundaryKind::Word),
            },
            _ => None,
        };
        if let Some(kind) = kind {
            boundaries.push((i + 1, kind));
        }
        prev = Some(c);
    }

    boundaries
}
