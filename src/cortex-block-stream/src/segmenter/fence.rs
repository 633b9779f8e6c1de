//! Fenced code region tracking.
//!
//! A marker line is a run of at least three backticks or tildes, indented by
//! at most three spaces, optionally followed by an info string. Marker lines
//! toggle an open/closed state. In permissive mode any marker line closes an
//! open region; strict mode requires the same character, a run at least as
//! long as the opener, and no info string.

/// A fenced region found in a buffer. Offsets are byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FenceRegion {
    /// Start of the opening marker line.
    pub start: usize,
    /// First byte after the opening marker line, newline included.
    pub body_start: usize,
    /// First byte after the closing marker text. `None` while still open.
    pub end: Option<usize>,
    /// The marker run that opened the region, e.g. "```".
    pub marker: String,
}

impl FenceRegion {
    /// Whether splitting at `pos` would cut through this region.
    pub fn contains(&self, pos: usize) -> bool {
        self.start < pos && self.end.is_none_or(|end| pos < end)
    }

    /// Whether the region is still waiting for its closer.
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

#[derive(Debug)]
struct MarkerLine<'a> {
    ch: char,
    run: &'a str,
    has_info: bool,
}

fn parse_marker_line(line: &str) -> Option<MarkerLine<'_>> {
    let unindented = line.trim_start_matches(' ');
    if line.len() - unindented.len() > 3 {
        return None;
    }

    let ch = unindented.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }

    let run_len = unindented.len() - unindented.trim_start_matches(ch).len();
    if run_len < 3 {
        return None;
    }

    let info = unindented[run_len..].trim();
    // A backtick info string may not itself contain backticks.
    if ch == '`' && info.contains('`') {
        return None;
    }

    Some(MarkerLine {
        ch,
        run: &unindented[..run_len],
        has_info: !info.is_empty(),
    })
}

fn closes(opener: &str, line: &MarkerLine<'_>, strict: bool) -> bool {
    if !strict {
        return true;
    }
    opener.starts_with(line.ch) && line.run.len() >= opener.len() && !line.has_info
}

/// Scan `text` for fenced regions, in order. At most the last region is open.
pub(crate) fn scan_fences(text: &str, strict: bool) -> Vec<FenceRegion> {
    let mut regions = Vec::new();
    let mut open: Option<FenceRegion> = None;
    let mut offset = 0;

    for raw in text.split_inclusive('\n') {
        let line_start = offset;
        offset += raw.len();

        let line = raw.trim_end_matches(['\n', '\r']);
        let Some(marker) = parse_marker_line(line) else {
            continue;
        };

        match open.take() {
            None => {
                open = Some(FenceRegion {
                    start: line_start,
                    body_start: offset,
                    end: None,
                    marker: marker.run.to_string(),
                });
            }
            Some(mut region) => {
                if closes(&region.marker, &marker, strict) {
                    region.end = Some(line_start + line.len());
                    regions.push(region);
                } else {
                    open = Some(region);
                }
            }
        }
    }

    regions.extend(open);
    regions
}

/// Marker of the region left open at the end of `text`, if any.
pub(crate) fn open_marker(text: &str, strict: bool) -> Option<String> {
    scan_fences(text, strict)
        .pop()
        .filter(FenceRegion::is_open)
        .map(|region| region.marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_marker_line() {
        assert!(parse_marker_line("```").is_some());
        assert!(parse_marker_line("```rust").is_some());
        assert!(parse_marker_line("~~~~ python ").is_some());
        assert!(parse_marker_line("   ```").is_some());
        assert!(parse_marker_line("    ```").is_none());
        assert!(parse_marker_line("``").is_none());
        assert!(parse_marker_line("text ```").is_none());
        assert!(parse_marker_line("``` a`b").is_none());
    }

    #[test]
    fn test_scan_closed_region() {
        let text = "Intro\n```rust\nlet a = 1;\n```\nAfter";
        let regions = scan_fences(text, false);

        assert_eq!(regions.len(), 1);
        let region = &regions[0];
        assert_eq!(region.start, 6);
        assert_eq!(region.body_start, 14);
        assert_eq!(region.end, Some(28));
        assert_eq!(region.marker, "```");
        assert!(!region.contains(6));
        assert!(region.contains(20));
        assert!(!region.contains(28));
    }

    #[test]
    fn test_scan_open_region() {
        let text = "```\ncode\n";
        assert_eq!(open_marker(text, false), Some("```".to_string()));
        assert_eq!(open_marker("no fences here", false), None);
    }

    #[test]
    fn test_permissive_close_accepts_any_marker() {
        let text = "~~~\ncode\n```\n";
        assert_eq!(open_marker(text, false), None);
        assert_eq!(open_marker(text, true), Some("~~~".to_string()));
    }

    #[test]
    fn test_strict_close_rules() {
        // Shorter run does not close.
        assert!(open_marker("````\ncode\n```\n", true).is_some());
        // Longer run of the same char does.
        assert!(open_marker("```\ncode\n`````\n", true).is_none());
        // Info string on the closer does not close.
        assert!(open_marker("```\ncode\n```rust\n", true).is_some());
    }

    #[test]
    fn test_multiple_regions() {
        let text = "```\na\n```\ntext\n~~~\nb\n";
        let regions = scan_fences(text, false);
        assert_eq!(regions.len(), 2);
        assert!(!regions[0].is_open());
        assert!(regions[1].is_open());
        assert_eq!(regions[1].marker, "~~~");
    }
}
