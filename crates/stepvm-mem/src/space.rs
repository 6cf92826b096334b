use std::collections::{BTreeMap, HashMap};

use crate::error::MemoryError;
use crate::range::{AddressRange, RangeTable};

/// Name of the segment holding the loaded program image.
pub const MAIN_SEGMENT: &str = ".main";
/// Name of the implicit stack segment.
pub const STACK_SEGMENT: &str = ".stack";
/// Default start address of the implicit stack segment (the stack grows down from here).
pub const DEFAULT_STACK_BASE: u64 = 0x80_0000;

/// Named, non-enforcing region of a [`MemorySpace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub range: AddressRange,
    /// Bytes written at `range.start` when the segment is added.
    pub data: Option<Vec<u8>>,
}

impl Segment {
    pub fn new(range: AddressRange) -> Self {
        Self { range, data: None }
    }

    pub fn with_data(start: u64, data: Vec<u8>) -> Self {
        Self {
            range: AddressRange::with_len(start, data.len() as u64),
            data: Some(data),
        }
    }
}

/// Sparse, lazily-populated byte-addressable storage over the full 64-bit range.
///
/// Storage is exactly the set of non-zero bytes: unset addresses read as zero and writing zero
/// removes the entry. The range index, on the other hand, records every address ever assigned
/// through [`MemorySpace::write`]/[`MemorySpace::write_range`] (including zero writes) and never
/// shrinks.
///
/// `Clone` is a deep copy; no storage is shared between copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySpace {
    bytes: HashMap<u64, u8>,
    ranges: RangeTable,
    segments: BTreeMap<String, Segment>,
    entry_point: u64,
    end: u64,
}

impl Default for MemorySpace {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl MemorySpace {
    /// Loads `image` as `.main` at entry point 0 and reserves `.stack` at [`DEFAULT_STACK_BASE`].
    pub fn new(image: &[u8]) -> Self {
        Self::with_stack_base(image, DEFAULT_STACK_BASE)
    }

    pub fn with_stack_base(image: &[u8], stack_base: u64) -> Self {
        let entry_point = 0;
        let mut space = Self {
            bytes: HashMap::new(),
            ranges: RangeTable::new(),
            segments: BTreeMap::new(),
            entry_point,
            end: entry_point.saturating_add(image.len() as u64),
        };

        // Fresh map: neither name can collide.
        space.load_segment(MAIN_SEGMENT, Segment::with_data(entry_point, image.to_vec()));
        space.load_segment(
            STACK_SEGMENT,
            Segment::new(AddressRange::with_len(stack_base, 1)),
        );
        space
    }

    /// Address execution starts from.
    pub fn entry_point(&self) -> u64 {
        self.entry_point
    }

    /// Address one past the last loaded program byte.
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn read(&self, addr: u64) -> u8 {
        self.bytes.get(&addr).copied().unwrap_or(0)
    }

    /// Reads `len` consecutive bytes, wrapping at the top of the address space.
    pub fn read_bytes(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| self.read(addr.wrapping_add(i)))
            .collect()
    }

    pub fn write(&mut self, addr: u64, value: u8) {
        self.ranges.insert_addr(addr);
        self.store(addr, value);
    }

    /// Writes `data` starting at `addr`.
    ///
    /// The touched interval is registered with the range index in one merge instead of one merge
    /// per byte.
    pub fn write_range(&mut self, addr: u64, data: &[u8]) {
        let len = data.len() as u64;
        self.ranges.insert(AddressRange::with_len(addr, len));
        if addr.checked_add(len).is_none() {
            self.ranges
                .insert(AddressRange::new(0, addr.wrapping_add(len)));
        }

        for (i, &byte) in data.iter().enumerate() {
            self.store(addr.wrapping_add(i as u64), byte);
        }
    }

    /// Registers a named segment, writing its initial data (if any) at the segment start.
    pub fn add_segment(
        &mut self,
        name: impl Into<String>,
        segment: Segment,
    ) -> Result<(), MemoryError> {
        let name = name.into();
        if self.segments.contains_key(&name) {
            return Err(MemoryError::DuplicateSegment { name });
        }
        self.load_segment(&name, segment);
        Ok(())
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.get(name)
    }

    pub fn segments(&self) -> impl Iterator<Item = (&str, &Segment)> {
        self.segments.iter().map(|(name, seg)| (name.as_str(), seg))
    }

    pub fn ranges(&self) -> &RangeTable {
        &self.ranges
    }

    /// Whether `addr` currently holds a non-zero byte.
    pub fn is_stored(&self, addr: u64) -> bool {
        self.bytes.contains_key(&addr)
    }

    /// Number of non-zero bytes held.
    pub fn stored_len(&self) -> usize {
        self.bytes.len()
    }

    /// Sorted copy of every stored (non-zero) byte.
    pub fn to_map(&self) -> BTreeMap<u64, u8> {
        self.bytes.iter().map(|(&addr, &byte)| (addr, byte)).collect()
    }

    /// Fully independent copy of this memory space.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    fn load_segment(&mut self, name: &str, segment: Segment) {
        tracing::trace!(segment = name, range = %segment.range, "adding segment");
        if let Some(data) = &segment.data {
            self.write_range(segment.range.start, data);
        }
        self.segments.insert(name.to_owned(), segment);
    }

    // Bypasses the range index; callers register the address first.
    fn store(&mut self, addr: u64, value: u8) {
        if value == 0 {
            self.bytes.remove(&addr);
        } else {
            self.bytes.insert(addr, value);
        }
    }
}
