//! Second-stage block merging.
//!
//! Small blocks are held back and concatenated until their combined size
//! reaches `merge_max` or the run goes quiet for `idle_ms`. This module only
//! holds the fragments and decides; the orchestrator owns the idle timer.

use std::time::Duration;

use crate::config::{BreakPreference, MergeConfig};

/// What the orchestrator should do after a block was added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// Combined size reached `merge_max`: emit this merged block now.
    Emit(String),
    /// Keep holding and (re)arm the idle timer.
    Hold {
        /// Whether the pending fragments already reached `merge_min`.
        reached_min: bool,
    },
}

/// Pending fragments awaiting merge.
#[derive(Debug, Clone)]
pub struct MergeBuffer {
    config: MergeConfig,
    joiner: &'static str,
    pending: Vec<String>,
}

impl MergeBuffer {
    /// Create an empty merge buffer. Fragments are joined per `preference`.
    pub fn new(config: MergeConfig, preference: BreakPreference) -> Self {
        Self {
            config,
            joiner: preference.joiner(),
            pending: Vec::new(),
        }
    }

    /// Add a block and decide whether the pending content goes out now.
    pub fn push(&mut self, block: String) -> MergeDecision {
        self.pending.push(block);

        let combined = self.combined_chars();
        if combined >= self.config.merge_max {
            // Non-empty: we just pushed.
            let merged = self.drain().unwrap_or_default();
            return MergeDecision::Emit(merged);
        }

        MergeDecision::Hold {
            reached_min: combined >= self.config.merge_min,
        }
    }

    /// Take all pending fragments as one merged block.
    pub fn drain(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let merged = self.pending.join(self.joiner);
        self.pending.clear();
        Some(merged)
    }

    /// Size of the pending fragments once joined, in characters.
    pub fn combined_chars(&self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let content: usize = self.pending.iter().map(|p| p.chars().count()).sum();
        content + self.joiner.chars().count() * (self.pending.len() - 1)
    }

    /// Number of pending fragments.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Quiet period before pending fragments flush.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.config.idle_ms)
    }
}
