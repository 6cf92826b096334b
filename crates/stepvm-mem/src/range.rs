use std::collections::BTreeMap;
use std::fmt;

/// Half-open address interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressRange {
    pub start: u64,
    pub end: u64,
}

impl AddressRange {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Range starting at `start` spanning `len` bytes.
    ///
    /// The interval is clamped at `u64::MAX`, so the very last address of the space can be stored
    /// but is never covered by a range.
    pub fn with_len(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Address of the last byte inside the range, if any.
    pub fn last(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.end - 1)
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

/// Set of merged, non-overlapping, non-adjacent address intervals.
///
/// Keyed by interval start; inserting an interval coalesces every interval it overlaps or
/// touches, so lookups and in-order iteration stay logarithmic/linear in the number of disjoint
/// runs rather than the number of bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeTable {
    ranges: BTreeMap<u64, u64>,
}

impl RangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single address, merging it into a neighbouring interval where possible.
    pub fn insert_addr(&mut self, addr: u64) {
        self.insert(AddressRange::with_len(addr, 1));
    }

    pub fn insert(&mut self, range: AddressRange) {
        if range.is_empty() {
            return;
        }

        let mut start = range.start;
        let mut end = range.end;

        // Ends are sorted the same way as starts, so walking backwards from the last interval that
        // begins at or before `end` visits every overlapping/adjacent interval before stopping.
        let touching: Vec<u64> = self
            .ranges
            .range(..=end)
            .rev()
            .take_while(|(_, &e)| e >= start)
            .map(|(&s, _)| s)
            .collect();

        for s in touching {
            if let Some(e) = self.ranges.remove(&s) {
                start = start.min(s);
                end = end.max(e);
            }
        }

        self.ranges.insert(start, end);
    }

    /// Returns the interval containing `addr`.
    pub fn find(&self, addr: u64) -> Option<AddressRange> {
        self.ranges
            .range(..=addr)
            .next_back()
            .filter(|(_, &end)| addr < end)
            .map(|(&start, &end)| AddressRange::new(start, end))
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.find(addr).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = AddressRange> + '_ {
        self.ranges
            .iter()
            .map(|(&start, &end)| AddressRange::new(start, end))
    }

    /// Number of disjoint intervals.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}
