//! `IntervalSet` over `[Valid-After, Valid-Until]` instants (spec §3),
//! supporting union, difference, and emptiness — used to decide whether a
//! descriptor is superseded by newer same-nickname descriptors.
//!
//! The original's `mixminion.Common.IntervalSet` is named by the source but
//! not present in the kept reference files, so this is a standard
//! sorted-merge interval algorithm, not a transliteration.

use chrono::{DateTime, Utc};

pub type Instant = DateTime<Utc>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntervalSet {
    /// Sorted, non-overlapping, positive-length intervals.
    intervals: Vec<(Instant, Instant)>,
}

impl IntervalSet {
    pub fn empty() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }

    /// A set containing the single interval `[start, end]`, or the empty
    /// set if `start >= end`.
    pub fn single(start: Instant, end: Instant) -> Self {
        if start < end {
            Self {
                intervals: vec![(start, end)],
            }
        } else {
            Self::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn contains(&self, t: Instant) -> bool {
        self.intervals.iter().any(|&(s, e)| s <= t && t <= e)
    }

    fn normalize(mut intervals: Vec<(Instant, Instant)>) -> Self {
        intervals.retain(|(s, e)| s < e);
        intervals.sort_by_key(|&(s, _)| s);
        let mut merged: Vec<(Instant, Instant)> = Vec::with_capacity(intervals.len());
        for (s, e) in intervals {
            match merged.last_mut() {
                Some((_, last_end)) if s <= *last_end => {
                    if e > *last_end {
                        *last_end = e;
                    }
                }
                _ => merged.push((s, e)),
            }
        }
        Self { intervals: merged }
    }

    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let mut all = self.intervals.clone();
        all.extend(other.intervals.iter().copied());
        Self::normalize(all)
    }

    /// `self \ other`: every point in `self` not covered by any interval
    /// of `other`.
    pub fn difference(&self, other: &IntervalSet) -> IntervalSet {
        let mut result = Vec::new();
        for &(cs, ce) in &self.intervals {
            let mut remaining = vec![(cs, ce)];
            for &(os, oe) in &other.intervals {
                let mut next = Vec::new();
                for (rs, re) in remaining {
                    if oe <= rs || os >= re {
                        next.push((rs, re));
                        continue;
                    }
                    if os > rs {
                        next.push((rs, os));
                    }
                    if oe < re {
                        next.push((oe, re));
                    }
                }
                remaining = next;
            }
            result.extend(remaining);
        }
        Self::normalize(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> Instant {
        Utc.with_ymd_and_hms(y, m, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn single_rejects_inverted_range() {
        assert!(IntervalSet::single(d(2003, 5, 17), d(2003, 5, 10)).is_empty());
    }

    #[test]
    fn difference_removes_fully_covered_interval() {
        let a = IntervalSet::single(d(2003, 5, 10), d(2003, 5, 17));
        let b = IntervalSet::single(d(2003, 5, 1), d(2003, 6, 1));
        assert!(a.difference(&b).is_empty());
    }

    #[test]
    fn difference_leaves_uncovered_remainder() {
        let a = IntervalSet::single(d(2003, 5, 10), d(2003, 5, 17));
        let b = IntervalSet::single(d(2003, 5, 10), d(2003, 5, 14));
        let rem = a.difference(&b);
        assert!(!rem.is_empty());
        assert!(rem.contains(d(2003, 5, 15)));
        assert!(!rem.contains(d(2003, 5, 11)));
    }

    #[test]
    fn union_merges_overlapping_intervals() {
        let a = IntervalSet::single(d(2003, 5, 1), d(2003, 5, 10));
        let b = IntervalSet::single(d(2003, 5, 5), d(2003, 5, 20));
        let u = a.union(&b);
        assert!(u.contains(d(2003, 5, 15)));
        assert!(u.contains(d(2003, 5, 2)));
    }
}
