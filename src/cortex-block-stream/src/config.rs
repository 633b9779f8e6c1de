//! Configuration for block streaming.
//!
//! Supports loading configuration from:
//! - TOML files or strings
//! - Environment variables (`CORTEX_BLOCK_STREAM_*`), layered on top
//!
//! Every field has a serde default, so a partial file only overrides what it names.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BlockStreamError, BlockStreamResult};

/// Environment variable names for overrides.
const ENV_ENABLED: &str = "CORTEX_BLOCK_STREAM_ENABLED";
const ENV_BREAK: &str = "CORTEX_BLOCK_STREAM_BREAK";
const ENV_MIN_CHARS: &str = "CORTEX_BLOCK_STREAM_MIN_CHARS";
const ENV_MAX_CHARS: &str = "CORTEX_BLOCK_STREAM_MAX_CHARS";
const ENV_BREAK_PREFERENCE: &str = "CORTEX_BLOCK_STREAM_BREAK_PREFERENCE";
const ENV_PACING: &str = "CORTEX_BLOCK_STREAM_PACING";

/// Lower bound of the `natural` pacing range, in milliseconds.
pub const NATURAL_PACING_MIN_MS: u64 = 800;
/// Upper bound of the `natural` pacing range, in milliseconds.
pub const NATURAL_PACING_MAX_MS: u64 = 2500;

/// When fed text is turned into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreakMode {
    /// Segment as text arrives; each segment end flushes the segmenter.
    #[default]
    SegmentEnd,
    /// Buffer everything raw and segment once at stream end.
    StreamEnd,
}

impl std::str::FromStr for BreakMode {
    type Err = BlockStreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "segment_end" | "text_end" => Ok(BreakMode::SegmentEnd),
            "stream_end" | "message_end" => Ok(BreakMode::StreamEnd),
            other => Err(BlockStreamError::Config(format!(
                "unknown break mode '{}'",
                other
            ))),
        }
    }
}

/// Preferred kind of boundary when choosing where to split a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreakPreference {
    /// Blank line between paragraphs.
    #[default]
    Paragraph,
    /// Any line break.
    Newline,
    /// End of a sentence.
    Sentence,
    /// Any whitespace.
    Whitespace,
}

impl BreakPreference {
    /// Separator used when merged fragments are concatenated.
    pub fn joiner(self) -> &'static str {
        match self {
            BreakPreference::Paragraph => "\n\n",
            BreakPreference::Newline => "\n",
            BreakPreference::Sentence | BreakPreference::Whitespace => " ",
        }
    }
}

impl std::str::FromStr for BreakPreference {
    type Err = BlockStreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paragraph" => Ok(BreakPreference::Paragraph),
            "newline" => Ok(BreakPreference::Newline),
            "sentence" => Ok(BreakPreference::Sentence),
            "whitespace" => Ok(BreakPreference::Whitespace),
            other => Err(BlockStreamError::Config(format!(
                "unknown break preference '{}'",
                other
            ))),
        }
    }
}

/// Segmenter thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Minimum characters before a block may be emitted.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    /// Characters at which a break is forced.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Preferred break kind.
    #[serde(default)]
    pub break_preference: BreakPreference,
    /// Only close a fence with a marker of the same kind and at least the same length.
    #[serde(default)]
    pub strict_fences: bool,
}

fn default_min_chars() -> usize {
    800
}

fn default_max_chars() -> usize {
    1200
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
            max_chars: default_max_chars(),
            break_preference: BreakPreference::default(),
            strict_fences: false,
        }
    }
}

impl ChunkConfig {
    /// Create thresholds with the given bounds and preference.
    pub fn new(min_chars: usize, max_chars: usize, break_preference: BreakPreference) -> Self {
        Self {
            min_chars,
            max_chars,
            break_preference,
            strict_fences: false,
        }
    }

    /// Require exact fence closers.
    pub fn with_strict_fences(mut self, strict: bool) -> Self {
        self.strict_fences = strict;
        self
    }

    /// `max_chars` as the segmenter will use it: always above `min_chars`.
    pub fn effective_max_chars(&self) -> usize {
        self.max_chars.max(self.min_chars + 1)
    }
}

/// Second-stage merge thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Combined size at which pending fragments are worth emitting on idle.
    pub merge_min: usize,
    /// Combined size at which pending fragments are emitted immediately.
    pub merge_max: usize,
    /// Quiet period after the last arrival before pending fragments flush.
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
}

fn default_idle_ms() -> u64 {
    1000
}

impl MergeConfig {
    /// Create merge thresholds.
    pub fn new(merge_min: usize, merge_max: usize, idle_ms: u64) -> Self {
        Self {
            merge_min,
            merge_max,
            idle_ms,
        }
    }
}

/// Delay applied before every block after the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PacingConfig {
    /// No delay.
    #[default]
    Off,
    /// Uniform delay in the human-like 800-2500ms range.
    Natural,
    /// Uniform delay in a configured range.
    Custom {
        /// Lower bound in milliseconds.
        min_ms: u64,
        /// Upper bound in milliseconds.
        max_ms: u64,
    },
}

impl PacingConfig {
    /// Delay bounds in milliseconds, or `None` when pacing is off.
    pub fn range_ms(&self) -> Option<(u64, u64)> {
        match *self {
            PacingConfig::Off => None,
            PacingConfig::Natural => Some((NATURAL_PACING_MIN_MS, NATURAL_PACING_MAX_MS)),
            PacingConfig::Custom { min_ms, max_ms } => Some((min_ms, max_ms)),
        }
    }
}

impl std::str::FromStr for PacingConfig {
    type Err = BlockStreamError;

    /// Parses `off`, `natural` or `custom:MIN-MAX`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "off" | "none" => return Ok(PacingConfig::Off),
            "natural" => return Ok(PacingConfig::Natural),
            _ => {}
        }

        let range = s.strip_prefix("custom:").ok_or_else(|| {
            BlockStreamError::Config(format!("unknown pacing mode '{}'", s))
        })?;
        let (min, max) = range.split_once('-').ok_or_else(|| {
            BlockStreamError::Config(format!("custom pacing needs MIN-MAX, got '{}'", range))
        })?;
        let parse = |v: &str| {
            v.trim().parse::<u64>().map_err(|e| {
                BlockStreamError::Config(format!("invalid pacing bound '{}': {}", v, e))
            })
        };
        Ok(PacingConfig::Custom {
            min_ms: parse(min)?,
            max_ms: parse(max)?,
        })
    }
}

/// Full configuration for one run's block stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStreamConfig {
    /// Whether block streaming is active at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When text is segmented.
    #[serde(default, rename = "break")]
    pub break_mode: BreakMode,
    /// Segmenter thresholds.
    #[serde(default)]
    pub chunk: ChunkConfig,
    /// Optional merge stage.
    #[serde(default)]
    pub merge: Option<MergeConfig>,
    /// Pacing between blocks.
    #[serde(default)]
    pub pacing: PacingConfig,
}

fn default_true() -> bool {
    true
}

impl Default for BlockStreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            break_mode: BreakMode::default(),
            chunk: ChunkConfig::default(),
            merge: None,
            pacing: PacingConfig::default(),
        }
    }
}

impl BlockStreamConfig {
    /// A configuration where every operation is a no-op.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the break mode.
    pub fn with_break_mode(mut self, mode: BreakMode) -> Self {
        self.break_mode = mode;
        self
    }

    /// Set the segmenter thresholds.
    pub fn with_chunk(mut self, chunk: ChunkConfig) -> Self {
        self.chunk = chunk;
        self
    }

    /// Enable the merge stage.
    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = Some(merge);
        self
    }

    /// Set the pacing mode.
    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> BlockStreamResult<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> BlockStreamResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BlockStreamError::Io(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "Loaded block stream config");
        Ok(config)
    }

    /// Layer `CORTEX_BLOCK_STREAM_*` environment variables on top.
    pub fn with_env_overrides(self) -> BlockStreamResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Layer overrides from an arbitrary key lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> BlockStreamResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_ENABLED) {
            self.enabled = parse_bool(ENV_ENABLED, &value)?;
        }
        if let Some(value) = lookup(ENV_BREAK) {
            self.break_mode = value.parse()?;
        }
        if let Some(value) = lookup(ENV_MIN_CHARS) {
            self.chunk.min_chars = parse_usize(ENV_MIN_CHARS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_CHARS) {
            self.chunk.max_chars = parse_usize(ENV_MAX_CHARS, &value)?;
        }
        if let Some(value) = lookup(ENV_BREAK_PREFERENCE) {
            self.chunk.break_preference = value.parse()?;
        }
        if let Some(value) = lookup(ENV_PACING) {
            self.pacing = value.parse()?;
        }
        Ok(self)
    }

    /// Reject configurations that cannot run.
    ///
    /// `max_chars <= min_chars` is accepted and clamped by the segmenter.
    pub fn validate(&self) -> BlockStreamResult<()> {
        if self.chunk.min_chars == 0 {
            return Err(BlockStreamError::Config(
                "chunk.min_chars must be at least 1".to_string(),
            ));
        }
        if self.chunk.max_chars <= self.chunk.min_chars {
            warn!(
                min_chars = self.chunk.min_chars,
                max_chars = self.chunk.max_chars,
                effective_max_chars = self.chunk.effective_max_chars(),
                "chunk.max_chars not above min_chars, clamping"
            );
        }

        if let Some(merge) = &self.merge {
            if merge.merge_max <= merge.merge_min {
                return Err(BlockStreamError::Config(format!(
                    "merge.merge_max ({}) must be greater than merge.merge_min ({})",
                    merge.merge_max, merge.merge_min
                )));
            }
            if merge.idle_ms == 0 {
                return Err(BlockStreamError::Config(
                    "merge.idle_ms must be positive".to_string(),
                ));
            }
        }

        if let PacingConfig::Custom { min_ms, max_ms } = self.pacing {
            if min_ms > max_ms {
                return Err(BlockStreamError::Config(format!(
                    "pacing.min_ms ({}) must not exceed pacing.max_ms ({})",
                    min_ms, max_ms
                )));
            }
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> BlockStreamResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BlockStreamError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_usize(key: &str, value: &str) -> BlockStreamResult<usize> {
    value.trim().parse::<usize>().map_err(|e| {
        BlockStreamError::Config(format!("{} must be a non-negative integer: {}", key, e))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = BlockStreamConfig::default();
        assert!(config.enabled);
        assert_eq!(config.break_mode, BreakMode::SegmentEnd);
        assert_eq!(config.chunk.min_chars, 800);
        assert_eq!(config.chunk.max_chars, 1200);
        assert_eq!(config.chunk.break_preference, BreakPreference::Paragraph);
        assert!(config.merge.is_none());
        assert_eq!(config.pacing, PacingConfig::Off);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = BlockStreamConfig::from_toml_str(
            r#"
            break = "stream_end"

            [chunk]
            min_chars = 10
            break_preference = "sentence"

            [merge]
            merge_min = 100
            merge_max = 1500

            [pacing]
            mode = "custom"
            min_ms = 50
            max_ms = 75
            "#,
        )
        .unwrap();

        assert!(config.enabled);
        assert_eq!(config.break_mode, BreakMode::StreamEnd);
        assert_eq!(config.chunk.min_chars, 10);
        assert_eq!(config.chunk.max_chars, 1200);
        assert_eq!(config.chunk.break_preference, BreakPreference::Sentence);
        assert_eq!(config.merge, Some(MergeConfig::new(100, 1500, 1000)));
        assert_eq!(
            config.pacing,
            PacingConfig::Custom {
                min_ms: 50,
                max_ms: 75
            }
        );
    }

    #[test]
    fn test_from_toml_rejects_unknown_mode() {
        let err = BlockStreamConfig::from_toml_str("break = \"sometimes\"").unwrap_err();
        assert!(matches!(err, BlockStreamError::Toml(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "enabled = false\n[pacing]\nmode = \"natural\"").unwrap();

        let config = BlockStreamConfig::from_file(file.path()).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.pacing.range_ms(), Some((800, 2500)));
    }

    #[test]
    fn test_from_missing_file() {
        let err = BlockStreamConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, BlockStreamError::Io(_)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CORTEX_BLOCK_STREAM_ENABLED", "off"),
            ("CORTEX_BLOCK_STREAM_BREAK", "stream_end"),
            ("CORTEX_BLOCK_STREAM_MIN_CHARS", "20"),
            ("CORTEX_BLOCK_STREAM_MAX_CHARS", "40"),
            ("CORTEX_BLOCK_STREAM_BREAK_PREFERENCE", "newline"),
            ("CORTEX_BLOCK_STREAM_PACING", "custom:100-300"),
        ]
        .into_iter()
        .collect();

        let config = BlockStreamConfig::default()
            .with_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.break_mode, BreakMode::StreamEnd);
        assert_eq!(config.chunk, ChunkConfig::new(20, 40, BreakPreference::Newline));
        assert_eq!(
            config.pacing,
            PacingConfig::Custom {
                min_ms: 100,
                max_ms: 300
            }
        );
    }

    #[test]
    fn test_overrides_invalid_value() {
        let result = BlockStreamConfig::default().with_overrides_from(|key| {
            (key == "CORTEX_BLOCK_STREAM_MIN_CHARS").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(BlockStreamError::Config(_))));
    }

    #[test]
    fn test_pacing_from_str() {
        assert_eq!("off".parse::<PacingConfig>().unwrap(), PacingConfig::Off);
        assert_eq!(
            "Natural".parse::<PacingConfig>().unwrap(),
            PacingConfig::Natural
        );
        assert!("custom:10".parse::<PacingConfig>().is_err());
        assert!("fast".parse::<PacingConfig>().is_err());
    }

    #[test]
    fn test_validate() {
        let config = BlockStreamConfig::default().with_merge(MergeConfig::new(100, 100, 500));
        assert!(config.validate().is_err());

        let config = BlockStreamConfig::default().with_merge(MergeConfig::new(100, 200, 0));
        assert!(config.validate().is_err());

        let config = BlockStreamConfig::default().with_pacing(PacingConfig::Custom {
            min_ms: 500,
            max_ms: 100,
        });
        assert!(config.validate().is_err());

        let config = BlockStreamConfig::default().with_pacing(PacingConfig::Custom {
            min_ms: 100,
            max_ms: 100,
        });
        assert!(config.validate().is_ok());

        let config = BlockStreamConfig::default()
            .with_chunk(ChunkConfig::new(0, 10, BreakPreference::Whitespace));
        assert!(config.validate().is_err());

        // Clamped, not rejected.
        let config = BlockStreamConfig::default()
            .with_chunk(ChunkConfig::new(50, 10, BreakPreference::Whitespace));
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk.effective_max_chars(), 51);
    }

    #[test]
    fn test_joiner() {
        assert_eq!(BreakPreference::Paragraph.joiner(), "\n\n");
        assert_eq!(BreakPreference::Newline.joiner(), "\n");
        assert_eq!(BreakPreference::Sentence.joiner(), " ");
        assert_eq!(BreakPreference::Whitespace.joiner(), " ");
    }
}
