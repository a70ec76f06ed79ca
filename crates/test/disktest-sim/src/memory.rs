//! Simulated physical memory.
//!
//! Allocations are ordinary heap blocks tagged with made-up physical
//! addresses. The driver sees them as [`DmaRegion`]s; the simulated HBA
//! resolves physical addresses back to the same bytes.

use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use disktest_core::addr::PhysAddr;
use disktest_core::dma::DmaRegion;

/// Spacing between allocations so neighbouring blocks are never contiguous.
const GUARD_GAP: u64 = 0x1000;

struct Block {
    phys: u64,
    ptr: NonNull<u8>,
    len: usize,
}

struct MemoryState {
    next_phys: u64,
    blocks: Vec<Block>,
}

// SAFETY: The blocks are heap allocations owned by this state; their pointers
// are not tied to the allocating thread.
unsafe impl Send for MemoryState {}

impl Drop for MemoryState {
    fn drop(&mut self) {
        for block in self.blocks.drain(..) {
            let slice = ptr::slice_from_raw_parts_mut(block.ptr.as_ptr(), block.len);
            // SAFETY: ptr/len came from Box::into_raw in `alloc` and are freed once.
            drop(unsafe { Box::from_raw(slice) });
        }
    }
}

/// A shared, cloneable handle to simulated physical memory.
///
/// Regions handed out by [`alloc`](Self::alloc) stay valid until the last
/// handle is dropped; they must not be used after that.
#[derive(Clone)]
pub struct SimMemory {
    state: Arc<Mutex<MemoryState>>,
}

impl SimMemory {
    /// Creates memory whose first allocation lands at 1 MiB.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base(0x10_0000)
    }

    /// Creates memory whose first allocation lands at `base` (or the next
    /// suitably aligned address above it).
    #[must_use]
    pub fn with_base(base: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                next_phys: base,
                blocks: Vec::new(),
            })),
        }
    }

    /// Allocates `len` zeroed bytes at a physical address aligned to `align`.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or `align` is not a power of two.
    #[must_use]
    pub fn alloc(&self, len: usize, align: u64) -> DmaRegion {
        self.alloc_at_offset(len, align, 0)
    }

    /// Like [`alloc`](Self::alloc), but places the block `offset` bytes past
    /// an `align` boundary. Used to produce deliberately misaligned regions.
    #[must_use]
    pub fn alloc_at_offset(&self, len: usize, align: u64, offset: u64) -> DmaRegion {
        assert!(len > 0, "SimMemory: zero-length allocation");
        assert!(align.is_power_of_two(), "SimMemory: bad alignment {align}");

        let mut state = self.lock();
        let phys = PhysAddr::new(state.next_phys).align_up(align).as_u64() + offset;
        state.next_phys = PhysAddr::new(phys + len as u64 + GUARD_GAP)
            .align_up(GUARD_GAP)
            .as_u64();

        let raw = Box::into_raw(vec![0u8; len].into_boxed_slice());
        // SAFETY: Box::into_raw never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw.cast::<u8>()) };
        state.blocks.push(Block { phys, ptr, len });

        // SAFETY: The block stays allocated until the memory state is dropped,
        // and `phys` is the address this model resolves back to it.
        unsafe { DmaRegion::new(ptr, PhysAddr::new(phys), len) }
    }

    /// Moves the next allocation to `phys` or above.
    pub fn skip_to(&self, phys: u64) {
        let mut state = self.lock();
        state.next_phys = state.next_phys.max(phys);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves `[phys, phys + len)` to a host pointer if one block holds it.
    fn resolve(&self, phys: u64, len: usize) -> Option<*mut u8> {
        let state = self.lock();
        state.blocks.iter().find_map(|block| {
            let offset = phys.checked_sub(block.phys)?;
            let end = offset.checked_add(len as u64)?;
            (end <= block.len as u64).then(|| {
                // SAFETY: offset + len lies inside the block.
                unsafe { block.ptr.as_ptr().add(offset as usize) }
            })
        })
    }

    /// Bus-master read. Returns `false` if the range is not mapped.
    pub fn read(&self, phys: u64, out: &mut [u8]) -> bool {
        let Some(src) = self.resolve(phys, out.len()) else {
            return false;
        };
        // SAFETY: resolve checked the range; blocks never overlap `out`.
        unsafe { ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len()) };
        true
    }

    /// Bus-master write. Returns `false` if the range is not mapped.
    pub fn write(&self, phys: u64, data: &[u8]) -> bool {
        let Some(dst) = self.resolve(phys, data.len()) else {
            return false;
        };
        // SAFETY: resolve checked the range; blocks never overlap `data`.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        true
    }

    /// Reads a little-endian dword, or `None` if unmapped.
    #[must_use]
    pub fn read_u32(&self, phys: u64) -> Option<u32> {
        let mut bytes = [0u8; 4];
        self.read(phys, &mut bytes).then(|| u32::from_le_bytes(bytes))
    }

    /// Writes a little-endian dword. Returns `false` if unmapped.
    pub fn write_u32(&self, phys: u64, value: u32) -> bool {
        self.write(phys, &value.to_le_bytes())
    }
}

impl Default for SimMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mem = SimMemory::new();
        let a = mem.alloc(3328, 1024);
        let b = mem.alloc(512, 4096);
        assert!(a.phys_base().is_aligned(1024));
        assert!(b.phys_base().is_aligned(4096));
        assert!(b.phys_base().as_u64() >= a.phys_base().as_u64() + 3328 + GUARD_GAP);
    }

    #[test]
    fn device_and_driver_views_agree() {
        let mem = SimMemory::new();
        let region = mem.alloc(64, 16);
        let base = region.phys_base().as_u64();

        region.write_u32(region.phys_base() + 8, 0xCAFE_F00D);
        assert_eq!(mem.read_u32(base + 8), Some(0xCAFE_F00D));

        assert!(mem.write(base + 60, &[1, 2, 3, 4]));
        let mut out = [0u8; 4];
        region.read_bytes(region.phys_base() + 60, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn unmapped_access_is_reported() {
        let mem = SimMemory::new();
        let region = mem.alloc(64, 16);
        let base = region.phys_base().as_u64();
        assert_eq!(mem.read_u32(base + 62), None);
        assert!(!mem.write(base - 4, &[0; 4]));
    }

    #[test]
    fn high_base_and_offset() {
        let mem = SimMemory::with_base(0x1_0000_0000);
        assert!(!mem.alloc(16, 16).phys_base().fits_in_32_bits());

        let mem = SimMemory::new();
        let odd = mem.alloc_at_offset(64, 1024, 0x200);
        assert_eq!(odd.phys_base().as_u64() % 1024, 0x200);
    }
}
