//! Natural break detection.
//!
//! Candidate split points are the ends of maximal whitespace runs. Each run is
//! classified by what it separates, and the preference order decides which
//! classes are tried, best first. Within a class the last candidate in the
//! window wins, so a block takes as much content as fits.

use std::ops::Range;

use crate::config::BreakPreference;

use super::fence::FenceRegion;

/// Characters that may sit between sentence punctuation and the following space.
const SENTENCE_CLOSERS: &[char] = &['"', '\'', ')', ']', '\u{201d}', '\u{2019}'];

/// Kind of boundary a whitespace run represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BreakKind {
    /// Blank line.
    Paragraph,
    /// Line break.
    Newline,
    /// Whitespace after `.`, `!` or `?`.
    Sentence,
    /// Any whitespace.
    Whitespace,
}

impl BreakKind {
    fn matches(self, run: &WhitespaceRun) -> bool {
        match self {
            BreakKind::Paragraph => run.newlines >= 2,
            BreakKind::Newline => run.newlines >= 1,
            BreakKind::Sentence => run.after_sentence,
            BreakKind::Whitespace => true,
        }
    }
}

/// Break kinds to try, best first.
///
/// Plain whitespace is only a natural break under the `whitespace`
/// preference; otherwise it is left to the forced break at `max_chars`.
pub(crate) fn preference_order(preference: BreakPreference) -> &'static [BreakKind] {
    match preference {
        BreakPreference::Paragraph => &[
            BreakKind::Paragraph,
            BreakKind::Newline,
            BreakKind::Sentence,
        ],
        BreakPreference::Newline => &[BreakKind::Newline, BreakKind::Sentence],
        BreakPreference::Sentence => &[BreakKind::Sentence],
        BreakPreference::Whitespace => &[BreakKind::Whitespace],
    }
}

/// A maximal run of whitespace. Offsets are byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WhitespaceRun {
    pub start: usize,
    pub end: usize,
    pub newlines: usize,
    pub after_sentence: bool,
}

/// All maximal whitespace runs in `text`, in order.
pub(crate) fn whitespace_runs(text: &str) -> Vec<WhitespaceRun> {
    let mut runs: Vec<WhitespaceRun> = Vec::new();
    let mut current: Option<WhitespaceRun> = None;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            let run = current.get_or_insert_with(|| WhitespaceRun {
                start: idx,
                end: idx,
                newlines: 0,
                after_sentence: ends_sentence(&text[..idx]),
            });
            run.end = idx + ch.len_utf8();
            if ch == '\n' {
                run.newlines += 1;
            }
        } else if let Some(run) = current.take() {
            runs.push(run);
        }
    }

    runs.extend(current);
    runs
}

fn ends_sentence(prefix: &str) -> bool {
    prefix
        .chars()
        .rev()
        .find(|c| !SENTENCE_CLOSERS.contains(c))
        .is_some_and(|c| matches!(c, '.' | '!' | '?' | '\u{2026}'))
}

fn outside_fences(pos: usize, fences: &[FenceRegion]) -> bool {
    !fences.iter().any(|fence| fence.contains(pos))
}

/// Last natural split point inside `window`, honoring the preference order.
///
/// The split lands just after a whitespace run and never inside a fence.
pub(crate) fn find_natural_break(
    text: &str,
    window: Range<usize>,
    preference: BreakPreference,
    fences: &[FenceRegion],
) -> Option<usize> {
    let runs = whitespace_runs(text);

    preference_order(preference).iter().find_map(|kind| {
        runs.iter()
            .rev()
            .filter(|run| kind.matches(run))
            .map(|run| run.end)
            .find(|&end| end > 0 && window.contains(&end) && outside_fences(end, fences))
    })
}

/// Start of the last whitespace run that begins before `limit`, outside fences.
pub(crate) fn last_whitespace_before(
    text: &str,
    limit: usize,
    fences: &[FenceRegion],
) -> Option<usize> {
    whitespace_runs(text)
        .iter()
        .rev()
        .map(|run| run.start)
        .find(|&start| start > 0 && start < limit && outside_fences(start, fences))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::fence::scan_fences;

    #[test]
    fn test_whitespace_runs_classification() {
        let runs = whitespace_runs("One. Two\n\nthree\nfour five");

        assert_eq!(runs.len(), 4);
        assert_eq!((runs[0].start, runs[0].end), (4, 5));
        assert!(runs[0].after_sentence);
        assert_eq!(runs[1].newlines, 2);
        assert!(!runs[1].after_sentence);
        assert_eq!(runs[2].newlines, 1);
        assert_eq!(runs[3].newlines, 0);
    }

    #[test]
    fn test_sentence_with_closing_quote() {
        let runs = whitespace_runs("He said \"stop.\" Then left");
        assert!(runs.iter().any(|run| run.after_sentence));
    }

    #[test]
    fn test_paragraph_preferred_over_later_whitespace() {
        let text = "Alpha beta.\n\nGamma delta epsilon";
        let found = find_natural_break(text, 5..text.len() + 1, BreakPreference::Paragraph, &[]);
        assert_eq!(found, Some(13));
    }

    #[test]
    fn test_whitespace_preference_takes_last_in_window() {
        let text = "Alpha beta.\n\nGamma delta epsilon";
        let found =
            find_natural_break(text, 5..text.len() + 1, BreakPreference::Whitespace, &[]);
        assert_eq!(found, Some(25));
    }

    #[test]
    fn test_paragraph_preference_ignores_plain_spaces() {
        let text = "Alpha beta gamma delta";
        assert_eq!(
            find_natural_break(text, 5..text.len() + 1, BreakPreference::Paragraph, &[]),
            None
        );
    }

    #[test]
    fn test_window_excludes_early_breaks() {
        let text = "ab cdefghijklmnop";
        assert_eq!(
            find_natural_break(text, 5..10, BreakPreference::Whitespace, &[]),
            None
        );
    }

    #[test]
    fn test_breaks_skip_fence_interior() {
        let text = "Intro\n```\na b\nc d\n";
        let fences = scan_fences(text, false);
        let found =
            find_natural_break(text, 1..text.len() + 1, BreakPreference::Newline, &fences);
        assert_eq!(found, Some(6));
    }

    #[test]
    fn test_last_whitespace_before() {
        assert_eq!(last_whitespace_before("aaaa bbbbbbbb", 10, &[]), Some(4));
        assert_eq!(last_whitespace_before(" bbbbbbbb", 10, &[]), None);
        assert_eq!(last_whitespace_before("aaaaaaaaaaa b", 10, &[]), None);
    }
}
