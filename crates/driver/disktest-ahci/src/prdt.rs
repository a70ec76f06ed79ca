//! Scatter/gather list construction for a single contiguous destination.

use disktest_core::addr::PhysAddr;

use crate::command::{PRDT_CAPACITY, PRDT_CHUNK_SIZE, PrdtEntry, SECTOR_SIZE, SECTORS_PER_PRDT};

/// The populated PRDT entries for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrdtList {
    entries: [PrdtEntry; PRDT_CAPACITY],
    len: usize,
}

impl PrdtList {
    /// Returns the populated entries.
    #[must_use]
    pub fn entries(&self) -> &[PrdtEntry] {
        &self.entries[..self.len]
    }

    /// Returns the number of populated entries (the header's PRDTL).
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no entries are populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the total bytes described by the list.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries().iter().map(|e| u64::from(e.byte_count())).sum()
    }
}

/// Describes `sector_count` sectors at `dest` as a PRDT.
///
/// Every entry but the last covers exactly 4 KiB; the last covers the
/// remaining sectors. Returns `None` if the transfer is empty or needs more
/// entries than a command table holds.
#[must_use]
pub fn build_prdt(dest: PhysAddr, sector_count: u16) -> Option<PrdtList> {
    let sectors = usize::from(sector_count);
    let len = sectors.div_ceil(SECTORS_PER_PRDT);
    if len == 0 || len > PRDT_CAPACITY {
        return None;
    }

    let mut entries = [PrdtEntry::default(); PRDT_CAPACITY];
    let mut remaining = sectors;
    for (i, entry) in entries.iter_mut().take(len).enumerate() {
        let chunk = remaining.min(SECTORS_PER_PRDT);
        let phys = dest + (i * PRDT_CHUNK_SIZE) as u64;
        *entry = PrdtEntry::new(phys, (chunk * SECTOR_SIZE) as u32, true);
        remaining -= chunk;
    }

    Some(PrdtList { entries, len })
}
