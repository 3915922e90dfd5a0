//! Boundary-aware text chunker.
//!
//! Splits extracted report text into [`Chunk`]s of at most `chunk_size`
//! characters with `chunk_overlap` characters of shared context between
//! neighbours. Splitting prefers the coarsest boundary available:
//!
//! 1. paragraphs (`\n\n`)
//! 2. lines (`\n`)
//! 3. sentences (`". "`)
//! 4. words (`" "`)
//! 5. single characters, only when a span has no boundary at all
//!
//! Pieces smaller than the limit are greedily merged back together with the
//! separator they were split on; a piece that is still too large is split
//! again with the next, finer separator.
//!
//! All lengths are measured in `char`s, so multi-byte text (Cyrillic in
//! particular) is never cut inside a code point.
//!
//! # Example
//!
//! ```rust
//! use report_pipeline::chunk::TextSplitter;
//!
//! let splitter = TextSplitter::new(1000, 200);
//! let chunks = splitter.chunk_text("First paragraph.\n\nSecond paragraph.");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use std::collections::VecDeque;

/// Separators tried in order, coarsest first. The empty separator means
/// "cut between characters".
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// A contiguous span of report text sized for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position within the report, contiguous from 0.
    pub index: usize,
    pub text: String,
}

/// Recursive character splitter with overlap.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// Create a splitter. `chunk_overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `text` into indexed chunks. Blank text yields no chunks.
    pub fn chunk_text(&self, text: &str) -> Vec<Chunk> {
        self.split_text(text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk { index, text })
            .collect()
    }

    /// Split `text` into chunk strings. Blank text yields an empty vector.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_recursive(text, SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting, separator));
        }

        chunks
    }

    /// Greedily join small pieces into chunks, carrying up to
    /// `chunk_overlap` characters of trailing context into the next chunk.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = if window.is_empty() { 0 } else { sep_len };

            if total + len + joiner > self.chunk_size && !window.is_empty() {
                if let Some(chunk) = join_window(&window, separator) {
                    chunks.push(chunk);
                }
                while total > self.chunk_overlap
                    || (total > 0
                        && total + len + if window.is_empty() { 0 } else { sep_len }
                            > self.chunk_size)
                {
                    let Some(first) = window.pop_front() else {
                        break;
                    };
                    let removed = char_len(first) + if window.is_empty() { 0 } else { sep_len };
                    total = total.saturating_sub(removed);
                }
            }

            window.push_back(piece);
            total += len + if window.len() > 1 { sep_len } else { 0 };
        }

        if let Some(chunk) = join_window(&window, separator) {
            chunks.push(chunk);
        }

        chunks
    }
}

fn join_window(window: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(len: usize) -> String {
        let mut p: String = "lorem ".repeat(len).chars().take(len - 1).collect();
        p.push('.');
        p
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = TextSplitter::new(1000, 200).chunk_text("Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        let splitter = TextSplitter::new(1000, 200);
        assert!(splitter.chunk_text("").is_empty());
        assert!(splitter.chunk_text(" \n\n \t").is_empty());
    }

    #[test]
    fn test_2400_chars_prefer_paragraph_breaks() {
        let mut paragraphs: Vec<String> = (0..5).map(|_| paragraph(398)).collect();
        paragraphs.push(paragraph(400));
        let text = paragraphs.join("\n\n");
        assert_eq!(text.chars().count(), 2400);

        let chunks = TextSplitter::new(1000, 200).chunk_text(&text);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 1000);
            for part in chunk.text.split("\n\n") {
                assert!(
                    paragraphs.iter().any(|p| p == part),
                    "chunk {} cut inside a paragraph",
                    chunk.index
                );
            }
        }
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let text = "x".repeat(2500);
        let chunks = TextSplitter::new(1000, 200).split_text(&text);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[2].len(), 900);
    }

    #[test]
    fn test_overlap_carries_context() {
        let text = (0..600)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = TextSplitter::new(1000, 200).split_text(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[0].chars().count() <= 1000);
            let first_word = pair[1].split(' ').next().unwrap();
            assert!(pair[0].split(' ').any(|w| w == first_word));
        }
    }

    #[test]
    fn test_line_boundaries_before_words() {
        let line = "a".repeat(30);
        let text = vec![line.clone(); 10].join("\n");
        let chunks = TextSplitter::new(100, 0).split_text(&text);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
            assert!(chunk.split('\n').all(|l| l == line));
        }
    }

    #[test]
    fn test_cyrillic_counts_chars_not_bytes() {
        let text = "Выручка выросла. ".repeat(200);
        let chunks = TextSplitter::new(300, 50).split_text(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 300));
    }

    #[test]
    fn test_indices_contiguous_and_deterministic() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let splitter = TextSplitter::new(60, 10);
        let a = splitter.chunk_text(&text);
        let b = splitter.chunk_text(&text);
        assert_eq!(a, b);
        for (i, c) in a.iter().enumerate() {
            assert_eq!(c.index, i, "Index mismatch at position {}", i);
        }
    }
}
