//! Run-length encoded lookup tables.
//!
//! MP4 sample tables describe per-item values compactly as `(count, value)` pairs. We use one
//! type for two flavors of table:
//! - **run tables** (`stts`): `value` applies to the next `run_length` items, looked up with
//!   [`RunLengthIndex::lookup_by_consumption`].
//! - **boundary tables** (`stsc`): the first field is an absolute start index and `value` applies
//!   from there until the next entry's start, looked up with [`RunLengthIndex::lookup_first_match`].
//!
//! Both lookups are `O(log n)`. We precompute cumulative run ends once at build time and binary
//! search them instead of re-walking the entries on every call.

use crate::{Error, Result};

/// One `(run_length, value)` pair.
///
/// For boundary tables `run_length` holds the absolute start index of the entry instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunEntry {
    pub run_length: u32,
    pub value: u32,
}

impl RunEntry {
    pub fn new(run_length: u32, value: u32) -> Self {
        Self { run_length, value }
    }
}

impl From<(u32, u32)> for RunEntry {
    fn from((run_length, value): (u32, u32)) -> Self {
        Self::new(run_length, value)
    }
}

/// An immutable, ordered sequence of [`RunEntry`] values.
///
/// Insertion order is significant: it defines each entry's cumulative position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLengthIndex {
    entries: Vec<RunEntry>,

    // Exclusive cumulative end of each run. `u64` so a long table of `u32` runs can't overflow.
    run_ends: Vec<u64>,
}

impl RunLengthIndex {
    /// Build a run table from `(run_length, value)` pairs, keeping their order.
    ///
    /// A zero-length run would make the same index belong to two entries, so it rejects the
    /// whole table with [`Error::InvalidTable`].
    pub fn build_from_pairs<I>(table: &'static str, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let entries: Vec<RunEntry> = pairs.into_iter().map(RunEntry::from).collect();

        let mut run_ends = Vec::with_capacity(entries.len());
        let mut end = 0u64;
        for (i, entry) in entries.iter().enumerate() {
            if entry.run_length == 0 {
                return Err(Error::invalid_table(
                    table,
                    format!("zero-length run at entry {i}"),
                ));
            }
            end += u64::from(entry.run_length);
            run_ends.push(end);
        }

        Ok(Self { entries, run_ends })
    }

    /// Build a boundary table from `(start, value)` pairs.
    ///
    /// The first start may be zero, but starts must be strictly increasing so every index has
    /// exactly one owning entry.
    pub fn build_from_boundaries<I>(table: &'static str, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let entries: Vec<RunEntry> = pairs.into_iter().map(RunEntry::from).collect();

        if let Some(i) = entries
            .windows(2)
            .position(|w| w[0].run_length >= w[1].run_length)
        {
            return Err(Error::invalid_table(
                table,
                format!(
                    "boundary {} at entry {} does not follow boundary {}",
                    entries[i + 1].run_length,
                    i + 1,
                    entries[i].run_length
                ),
            ));
        }

        // Boundary tables have no run ends until the caller supplies the item count.
        Ok(Self {
            entries,
            run_ends: Vec::new(),
        })
    }

    pub fn entries(&self) -> &[RunEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all run lengths (run tables only).
    pub fn total_run_length(&self) -> u64 {
        self.run_ends.last().copied().unwrap_or(0)
    }

    /// Sum of `run_length * value` over all runs (run tables only).
    ///
    /// For a time-to-sample table this is the track duration in timescale units.
    pub fn weighted_total(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| u64::from(e.run_length) * u64::from(e.value))
            .sum()
    }

    /// Value of the last entry whose boundary is `<= n` (boundary tables).
    ///
    /// - empty table: `0`
    /// - `n` past every boundary: the last entry's value
    /// - `n` before the first boundary: the first entry's value
    pub fn lookup_first_match(&self, n: u32) -> u32 {
        let owners = self.entries.partition_point(|e| e.run_length <= n);
        match owners {
            0 => self.entries.first().map_or(0, |e| e.value),
            i => self.entries[i - 1].value,
        }
    }

    /// Value of the run that contains item `n` (run tables).
    ///
    /// - empty table: `0`
    /// - `n` at or past the total run length: the last entry's value
    pub fn lookup_by_consumption(&self, n: u32) -> u32 {
        let n = u64::from(n);
        let owner = self.run_ends.partition_point(|&end| end <= n);
        match self.entries.get(owner) {
            Some(entry) => entry.value,
            None => self.entries.last().map_or(0, |e| e.value),
        }
    }

    /// Per-entry item counts for a boundary table covering `item_count` items.
    ///
    /// Entry `i` spans from its boundary to the next entry's boundary; the last entry spans to
    /// `item_count`. The first entry also owns everything before its boundary, matching
    /// [`lookup_first_match`](Self::lookup_first_match). Entries starting at or past
    /// `item_count` span nothing.
    pub fn boundary_spans(&self, item_count: u32) -> impl Iterator<Item = (RunEntry, u32)> + '_ {
        self.entries.iter().enumerate().map(move |(i, entry)| {
            let start = if i == 0 { 0 } else { entry.run_length.min(item_count) };
            let end = self
                .entries
                .get(i + 1)
                .map_or(item_count, |next| next.run_length.min(item_count));
            (*entry, end.saturating_sub(start))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Explicit signed-remainder walk over the run entries, kept as the reference the binary
    /// search must agree with.
    fn walk_by_consumption(entries: &[RunEntry], n: u32) -> u32 {
        let mut remainder = i64::from(n);
        for entry in entries {
            remainder -= i64::from(entry.run_length);
            if remainder < 0 {
                return entry.value;
            }
        }
        entries.last().map_or(0, |e| e.value)
    }

    #[test]
    fn consumption_lookup_finds_short_final_run() -> anyhow::Result<()> {
        let durations = RunLengthIndex::build_from_pairs("time-to-sample", [(651, 4096), (1, 672)])?;

        for n in 0..651 {
            assert_eq!(durations.lookup_by_consumption(n), 4096, "frame {n}");
        }
        assert_eq!(durations.lookup_by_consumption(651), 672);
        assert_eq!(durations.total_run_length(), 652);
        assert_eq!(durations.weighted_total(), 651 * 4096 + 672);
        Ok(())
    }

    #[test]
    fn consumption_lookup_past_the_end_returns_last_value() -> anyhow::Result<()> {
        let durations = RunLengthIndex::build_from_pairs("time-to-sample", [(3, 10), (2, 20)])?;
        assert_eq!(durations.lookup_by_consumption(5), 20);
        assert_eq!(durations.lookup_by_consumption(u32::MAX), 20);
        Ok(())
    }

    #[test]
    fn consumption_lookup_matches_signed_walk() -> anyhow::Result<()> {
        let pairs = [(1, 7), (4, 3), (2, 9), (10, 1), (1, 5)];
        let table = RunLengthIndex::build_from_pairs("time-to-sample", pairs)?;
        for n in 0..25 {
            assert_eq!(
                table.lookup_by_consumption(n),
                walk_by_consumption(table.entries(), n),
                "index {n}"
            );
        }
        Ok(())
    }

    #[test]
    fn first_match_lookup_respects_boundaries() -> anyhow::Result<()> {
        let per_chunk = RunLengthIndex::build_from_boundaries("sample-to-chunk", [(0, 5), (130, 2)])?;
        assert_eq!(per_chunk.lookup_first_match(0), 5);
        assert_eq!(per_chunk.lookup_first_match(129), 5);
        assert_eq!(per_chunk.lookup_first_match(130), 2);
        assert_eq!(per_chunk.lookup_first_match(500), 2);
        Ok(())
    }

    #[test]
    fn first_match_before_first_boundary_uses_first_value() -> anyhow::Result<()> {
        let table = RunLengthIndex::build_from_boundaries("sample-to-chunk", [(4, 8), (9, 1)])?;
        assert_eq!(table.lookup_first_match(0), 8);
        assert_eq!(table.lookup_first_match(3), 8);

        let spans: Vec<u32> = table.boundary_spans(12).map(|(_, span)| span).collect();
        assert_eq!(spans, vec![9, 3]);
        Ok(())
    }

    #[test]
    fn empty_tables_return_zero() -> anyhow::Result<()> {
        let empty_runs = RunLengthIndex::build_from_pairs("time-to-sample", Vec::<(u32, u32)>::new())?;
        assert!(empty_runs.is_empty());
        assert_eq!(empty_runs.lookup_by_consumption(0), 0);
        assert_eq!(empty_runs.total_run_length(), 0);

        let empty_bounds =
            RunLengthIndex::build_from_boundaries("sample-to-chunk", Vec::<(u32, u32)>::new())?;
        assert_eq!(empty_bounds.lookup_first_match(42), 0);
        Ok(())
    }

    #[test]
    fn zero_length_run_is_rejected() {
        let err = RunLengthIndex::build_from_pairs("time-to-sample", [(3, 1), (0, 2)]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTable {
                table: "time-to-sample",
                ..
            }
        ));
    }

    #[test]
    fn non_increasing_boundaries_are_rejected() {
        let err =
            RunLengthIndex::build_from_boundaries("sample-to-chunk", [(0, 5), (7, 2), (7, 1)])
                .unwrap_err();
        assert!(err.to_string().contains("entry 2"));
    }

    #[test]
    fn boundary_spans_cover_every_item_once() -> anyhow::Result<()> {
        let table = RunLengthIndex::build_from_boundaries("sample-to-chunk", [(0, 5), (130, 2)])?;
        let spans: Vec<u32> = table.boundary_spans(140).map(|(_, span)| span).collect();
        assert_eq!(spans, vec![130, 10]);

        let packets: u64 = table
            .boundary_spans(140)
            .map(|(entry, span)| u64::from(entry.value) * u64::from(span))
            .sum();
        assert_eq!(packets, 130 * 5 + 10 * 2);
        Ok(())
    }
}
