use crate::error::IngestError;
use std::ops::Range;

pub const DEFAULT_CHUNK_TARGET_CHARS: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub target_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: DEFAULT_CHUNK_TARGET_CHARS,
            overlap_chars: DEFAULT_CHUNK_OVERLAP_CHARS,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.target_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "target_chars must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Collapses every whitespace run (newlines and NBSP included) to a single
/// space and trims both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One emitted chunk. `range` is the untrimmed character window it was cut
/// from; `text` is that window trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub range: Range<usize>,
    pub text: String,
}

/// Lazy chunk sequence over a text, measured in characters.
#[derive(Debug, Clone)]
pub struct TextChunks {
    chars: Vec<char>,
    config: ChunkingConfig,
    start: usize,
}

impl TextChunks {
    pub fn new(text: &str, config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            chars: text.chars().collect(),
            config,
            start: 0,
        })
    }

    /// Index of the later of the last `.` or `\n` in `(start, end]`.
    fn break_point(&self, start: usize, end: usize) -> Option<usize> {
        let window = &self.chars[start + 1..=end];
        window
            .iter()
            .rposition(|c| *c == '.' || *c == '\n')
            .map(|offset| start + 1 + offset)
    }
}

impl Iterator for TextChunks {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        let len = self.chars.len();

        while self.start < len {
            let start = self.start;
            let mut end = start.saturating_add(self.config.target_chars);

            if end < len {
                if let Some(found) = self.break_point(start, end) {
                    end = found + 1;
                }
            }

            // Progress is measured against the unclamped end so a window that
            // already reaches the end of the text is the last one.
            self.start = (start + 1).max(end.saturating_sub(self.config.overlap_chars));

            let slice_end = end.min(len);
            let text = self.chars[start..slice_end]
                .iter()
                .collect::<String>()
                .trim()
                .to_string();

            if !text.is_empty() {
                return Some(ChunkSpan {
                    range: start..slice_end,
                    text,
                });
            }
        }

        None
    }
}

pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    Ok(TextChunks::new(text, config)?.map(|span| span.text).collect())
}
