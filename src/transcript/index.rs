//! Time-indexed transcript lookup.
//!
//! [`TranscriptIndex`] keeps cues sorted by start time so the active cue for
//! a playback position is found with one binary search. It is built once per
//! transcript and queried on every playback tick.

use serde::Serialize;

use crate::collab::RawCue;

// ---------------------------------------------------------------------------
// Cue
// ---------------------------------------------------------------------------

/// One transcript segment, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Cue {
    /// `start <= position < end`.
    pub fn contains(&self, position: f64) -> bool {
        self.start <= position && position < self.end
    }
}

// ---------------------------------------------------------------------------
// TranscriptIndex
// ---------------------------------------------------------------------------

/// Cues ordered by non-decreasing start time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptIndex {
    cues: Vec<Cue>,
    /// `max_end[i]` is the latest end among `cues[..=i]`.
    max_end: Vec<f64>,
}

impl TranscriptIndex {
    /// Build an index from collaborator output.
    ///
    /// The input order is never trusted: cues are sorted by start time (stable,
    /// so equal starts keep their source order). Cues with blank text, a
    /// non-finite timestamp or `end < start` are dropped.
    pub fn from_raw(raw: Vec<RawCue>) -> Self {
        let total = raw.len();
        let mut cues: Vec<Cue> = raw
            .into_iter()
            .filter_map(|c| {
                let text = c.text.trim();
                let valid = !text.is_empty()
                    && c.start.is_finite()
                    && c.end.is_finite()
                    && c.end >= c.start;
                valid.then(|| Cue {
                    start: c.start,
                    end: c.end,
                    text: text.to_string(),
                })
            })
            .collect();
        cues.sort_by(|a, b| a.start.total_cmp(&b.start));
        let max_end = cues
            .iter()
            .scan(f64::NEG_INFINITY, |latest, c| {
                *latest = latest.max(c.end);
                Some(*latest)
            })
            .collect();

        if cues.len() < total {
            log::debug!(
                "transcript: dropped {} malformed cue(s) of {total}",
                total - cues.len()
            );
        }
        Self { cues, max_end }
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// End of the last cue, in seconds.
    pub fn duration(&self) -> f64 {
        self.max_end.last().copied().unwrap_or(0.0)
    }

    /// Index of the last cue with `start <= position`, whether or not it is
    /// still running.
    pub fn nearest_index(&self, position: f64) -> Option<usize> {
        self.cues
            .partition_point(|c| c.start <= position)
            .checked_sub(1)
    }

    /// Index of the cue active at `position`: the last cue with
    /// `start <= position < end`.
    ///
    /// Walks back from the binary-search hit only while an earlier cue can
    /// still cover `position`, so lookups without overlap stay O(log n).
    pub fn current_index(&self, position: f64) -> Option<usize> {
        let last = self.nearest_index(position)?;
        (0..=last)
            .rev()
            .take_while(|&i| self.max_end[i] > position)
            .find(|&i| self.cues[i].end > position)
    }

    pub fn current_cue(&self, position: f64) -> Option<&Cue> {
        self.current_index(position).map(|i| &self.cues[i])
    }

    /// Cue to highlight when scrolling along: the most recent one that has
    /// started, even if it already ended.
    pub fn nearest_cue(&self, position: f64) -> Option<&Cue> {
        self.nearest_index(position).map(|i| &self.cues[i])
    }

    /// Case-insensitive substring search. Matches come back in index order.
    pub fn search(&self, query: &str) -> Vec<(usize, &Cue)> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.cues
            .iter()
            .enumerate()
            .filter(|(_, c)| c.text.to_lowercase().contains(&needle))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn index(cues: &[(f64, f64, &str)]) -> TranscriptIndex {
        TranscriptIndex::from_raw(
            cues.iter()
                .map(|&(s, e, t)| RawCue::new(s, e, t))
                .collect(),
        )
    }

    fn text_at(idx: &TranscriptIndex, position: f64) -> Option<&str> {
        idx.current_cue(position).map(|c| c.text.as_str())
    }

    #[test]
    fn unsorted_input_is_sorted_before_lookup() {
        let idx = index(&[(10.0, 20.0, "x"), (0.0, 10.0, "y")]);
        assert_eq!(text_at(&idx, 5.0), Some("y"));
        assert_eq!(text_at(&idx, 15.0), Some("x"));
        assert_eq!(idx.cues()[0].text, "y");
    }

    #[test]
    fn boundaries_are_half_open() {
        let idx = index(&[(0.0, 10.0, "y"), (10.0, 20.0, "x")]);
        assert_eq!(text_at(&idx, 0.0), Some("y"));
        assert_eq!(text_at(&idx, 10.0), Some("x"));
        assert_eq!(text_at(&idx, 20.0), None);
        assert_eq!(text_at(&idx, 19.999), Some("x"));
    }

    #[test]
    fn positions_outside_and_in_gaps() {
        let idx = index(&[(2.0, 4.0, "a"), (8.0, 9.0, "b")]);
        assert_eq!(text_at(&idx, -1.0), None);
        assert_eq!(text_at(&idx, 1.0), None);
        assert_eq!(text_at(&idx, 5.0), None);
        assert_eq!(text_at(&idx, 100.0), None);
        assert_eq!(text_at(&idx, f64::NAN), None);

        assert_eq!(idx.nearest_cue(5.0).map(|c| c.text.as_str()), Some("a"));
        assert_eq!(idx.nearest_cue(1.0), None);
    }

    #[test]
    fn current_cue_agrees_with_linear_scan() {
        let idx = index(&[
            (0.0, 1.5, "a"),
            (1.5, 3.0, "b"),
            (4.0, 4.0, "zero"),
            (4.0, 6.0, "c"),
            (7.25, 8.0, "d"),
        ]);
        let mut pos = -0.5;
        while pos < 9.0 {
            let expected = idx
                .cues()
                .iter()
                .rposition(|c| c.contains(pos));
            assert_eq!(idx.current_index(pos), expected, "position {pos}");
            pos += 0.25;
        }
    }

    #[test]
    fn long_cue_covers_shorter_later_cue() {
        let idx = index(&[(0.0, 100.0, "long"), (5.0, 6.0, "short")]);
        assert_eq!(text_at(&idx, 50.0), Some("long"));
        assert_eq!(text_at(&idx, 5.5), Some("short"));
        assert_eq!(text_at(&idx, 2.0), Some("long"));
        assert_eq!(text_at(&idx, 100.0), None);
        assert_eq!(idx.nearest_cue(50.0).map(|c| c.text.as_str()), Some("short"));
        assert_eq!(idx.duration(), 100.0);
    }

    #[test]
    fn overlapping_cues_agree_with_linear_scan() {
        let idx = index(&[
            (0.0, 30.0, "intro"),
            (2.0, 4.0, "a"),
            (3.0, 12.0, "b"),
            (5.0, 6.0, "c"),
            (40.0, 41.0, "d"),
        ]);
        let mut pos = -1.0;
        while pos < 45.0 {
            let expected = idx.cues().iter().rposition(|c| c.contains(pos));
            assert_eq!(idx.current_index(pos), expected, "position {pos}");
            pos += 0.5;
        }
    }

    #[test]
    fn malformed_cues_are_dropped() {
        let idx = index(&[
            (0.0, 1.0, "  ok  "),
            (5.0, 4.0, "backwards"),
            (6.0, 7.0, "   "),
            (f64::NAN, 1.0, "nan"),
        ]);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.cues()[0].text, "ok");
    }

    #[test]
    fn search_is_case_insensitive_and_ordered() {
        let idx = index(&[
            (20.0, 21.0, "Rust is fast"),
            (0.0, 1.0, "hello RUST"),
            (10.0, 11.0, "nothing here"),
        ]);
        let hits: Vec<f64> = idx.search("rust").iter().map(|(_, c)| c.start).collect();
        assert_eq!(hits, vec![0.0, 20.0]);
        assert!(idx.search("").is_empty());
        assert!(idx.search("python").is_empty());
    }

    #[test]
    fn empty_index() {
        let idx = TranscriptIndex::default();
        assert!(idx.is_empty());
        assert_eq!(idx.current_cue(0.0), None);
        assert_eq!(idx.duration(), 0.0);
    }
}
