//! Block streaming for Cortex.
//!
//! Model output arrives as a stream of small text deltas. This crate turns
//! it into display-ready blocks that are published to session viewers:
//! - A streaming segmenter that cuts text at natural boundaries within
//!   configurable size limits without breaking fenced code
//! - An optional merge stage that coalesces small blocks, flushed on size
//!   or after a quiet period
//! - Optional human-like pacing between blocks
//! - One orchestration actor per generation run, plus a per-session registry
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cortex_block_stream::{BlockStreamConfig, ChannelBroadcaster, StreamRegistry};
//!
//! let broadcaster = Arc::new(ChannelBroadcaster::new());
//! let mut blocks = broadcaster.subscribe("session-1");
//!
//! let registry = StreamRegistry::new(BlockStreamConfig::default(), broadcaster);
//! let run = registry.start_run("session-1", None).await?;
//! run.feed("Hello ")?;
//! run.feed("world.")?;
//! let summary = run.stream_end().await?;
//! ```
//!
//! # Configuration
//!
//! `BlockStreamConfig` loads from TOML and accepts overrides from:
//! - `CORTEX_BLOCK_STREAM_ENABLED`
//! - `CORTEX_BLOCK_STREAM_BREAK` (`segment_end` or `stream_end`)
//! - `CORTEX_BLOCK_STREAM_MIN_CHARS` / `CORTEX_BLOCK_STREAM_MAX_CHARS`
//! - `CORTEX_BLOCK_STREAM_BREAK_PREFERENCE`
//! - `CORTEX_BLOCK_STREAM_PACING` (`off`, `natural` or `custom:MIN-MAX`)

pub mod broadcast;
pub mod config;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod pacing;
pub mod registry;
pub mod segmenter;

// Re-export main types
pub use broadcast::{BlockBroadcaster, BlockEvent, ChannelBroadcaster, topic_for_session};
pub use config::{
    BlockStreamConfig, BreakMode, BreakPreference, ChunkConfig, MergeConfig, PacingConfig,
};
pub use error::{BlockStreamError, BlockStreamResult};
pub use merge::{MergeBuffer, MergeDecision};
pub use orchestrator::{BlockStreamHandle, BlockStreamSnapshot, BlockStreamer, StreamEndSummary};
pub use pacing::Pacer;
pub use registry::StreamRegistry;
pub use segmenter::Segmenter;
