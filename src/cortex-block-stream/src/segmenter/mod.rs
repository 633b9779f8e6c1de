//! Streaming text segmenter.
//!
//! Accumulates text and cuts it into blocks between `min_chars` and
//! `max_chars` characters, preferring natural boundaries and keeping fenced
//! code regions intact. When a fence has to be cut at the size limit, the
//! emitted half is closed with the fence marker and the remainder reopened
//! with it, so both halves render as valid code blocks.
//!
//! The segmenter is plain synchronous state: no I/O, no timers.

mod breaks;
mod fence;

use tracing::trace;

use crate::config::{BreakPreference, ChunkConfig};

use self::breaks::{find_natural_break, last_whitespace_before};
use self::fence::{FenceRegion, open_marker, scan_fences};

/// Incremental block segmenter.
#[derive(Debug, Clone)]
pub struct Segmenter {
    buffer: String,
    min_chars: usize,
    max_chars: usize,
    break_preference: BreakPreference,
    strict_fences: bool,
    in_fenced_block: bool,
    fence_marker: Option<String>,
}

impl Segmenter {
    /// Create a segmenter. `max_chars` is clamped to at least `min_chars + 1`.
    pub fn new(config: &ChunkConfig) -> Self {
        let min_chars = config.min_chars.max(1);
        Self {
            buffer: String::new(),
            min_chars,
            max_chars: config.max_chars.max(min_chars + 1),
            break_preference: config.break_preference,
            strict_fences: config.strict_fences,
            in_fenced_block: false,
            fence_marker: None,
        }
    }

    /// Append `text` and return every block that became ready, in order.
    pub fn feed(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut blocks = Vec::new();
        while let Some(block) = self.next_block() {
            if !block.is_empty() {
                blocks.push(block);
            }
        }
        self.refresh_fence_state();

        trace!(
            fed_chars = text.chars().count(),
            ready = blocks.len(),
            buffered_chars = self.buffered_chars(),
            in_fence = self.in_fenced_block,
            "Segmenter fed"
        );
        blocks
    }

    /// Emit whatever is buffered, closing an open fence first.
    ///
    /// Returns `None` when nothing but whitespace was buffered.
    pub fn flush(&mut self) -> Option<String> {
        let mut text = std::mem::take(&mut self.buffer);
        if let Some(marker) = open_marker(&text, self.strict_fences) {
            if !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&marker);
        }
        self.in_fenced_block = false;
        self.fence_marker = None;

        let block = text.trim();
        (!block.is_empty()).then(|| block.to_string())
    }

    /// Text buffered but not yet emitted.
    pub fn peek(&self) -> &str {
        &self.buffer
    }

    /// Whether the buffer has reached `min_chars`.
    pub fn is_ready(&self) -> bool {
        self.buffered_chars() >= self.min_chars
    }

    /// Buffered size in characters.
    pub fn buffered_chars(&self) -> usize {
        self.buffer.chars().count()
    }

    /// Whether the buffer ends inside an open fence.
    pub fn in_fenced_block(&self) -> bool {
        self.in_fenced_block
    }

    /// Marker of the open fence, if any.
    pub fn fence_marker(&self) -> Option<&str> {
        self.fence_marker.as_deref()
    }

    /// Effective minimum block size.
    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    /// Effective maximum block size.
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Cut the next block off the buffer, or `None` if more input is needed.
    fn next_block(&mut self) -> Option<String> {
        let total_chars = self.buffered_chars();
        if total_chars < self.min_chars {
            return None;
        }

        let fences = scan_fences(&self.buffer, self.strict_fences);
        let lower = char_to_byte(&self.buffer, self.min_chars);
        let max_offset =
            (total_chars >= self.max_chars).then(|| char_to_byte(&self.buffer, self.max_chars));
        let window = lower..max_offset.unwrap_or(self.buffer.len() + 1);

        if let Some(split) =
            find_natural_break(&self.buffer, window, self.break_preference, &fences)
        {
            return Some(self.split_at(split));
        }

        let max_offset = max_offset?;
        Some(self.forced_break(max_offset, &fences))
    }

    fn forced_break(&mut self, max_offset: usize, fences: &[FenceRegion]) -> String {
        match fences.iter().find(|fence| fence.contains(max_offset)) {
            Some(fence) => self.forced_fence_break(max_offset, fence),
            None => {
                let split =
                    last_whitespace_before(&self.buffer, max_offset, fences).unwrap_or(max_offset);
                trace!(split, max_offset, "Forced break outside fence");
                self.split_at(split)
            }
        }
    }

    fn forced_fence_break(&mut self, max_offset: usize, fence: &FenceRegion) -> String {
        // The limit falls on the opening marker line itself: cut before the
        // fence when there is anything in front of it.
        if max_offset <= fence.body_start {
            let split = if fence.start > 0 {
                fence.start
            } else {
                max_offset
            };
            return self.split_at(split);
        }

        let split = self.buffer[fence.body_start..max_offset]
            .rfind('\n')
            .map(|idx| fence.body_start + idx + 1)
            .unwrap_or(max_offset);

        let reopen = format!("{}\n", fence.marker);
        if split <= reopen.len() {
            // Reopening would not shrink the buffer.
            return self.split_at(max_offset);
        }

        let rest = self.buffer.split_off(split);
        let mut head = std::mem::replace(&mut self.buffer, reopen);
        self.buffer.push_str(&rest);

        if !head.ends_with('\n') {
            head.push('\n');
        }
        head.push_str(&fence.marker);
        head.push('\n');

        trace!(split, max_offset, marker = %fence.marker, "Forced break inside fence");
        head.trim().to_string()
    }

    /// Split the buffer at byte offset `split`, returning the trimmed head.
    fn split_at(&mut self, split: usize) -> String {
        let rest = self.buffer.split_off(split);
        let head = std::mem::replace(&mut self.buffer, rest);
        head.trim().to_string()
    }

    fn refresh_fence_state(&mut self) {
        self.fence_marker = open_marker(&self.buffer, self.strict_fences);
        self.in_fenced_block = self.fence_marker.is_some();
    }
}

/// Byte offset of the `n`th character, or the text length if shorter.
fn char_to_byte(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}
