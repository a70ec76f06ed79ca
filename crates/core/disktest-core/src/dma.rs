//! Physically contiguous DMA memory and physical/virtual address translation.
//!
//! A [`DmaRegion`] pairs a virtual mapping with the physical address of its
//! first byte. Hardware registers and command structures hold physical
//! addresses; software must translate them through the owning region before
//! dereferencing, never assuming an identity mapping.
//!
//! All accesses go through raw pointers with volatile semantics because a bus
//! master may write the same memory at any time.

use core::ptr::{self, NonNull};

use crate::addr::{PhysAddr, VirtAddr};

/// A caller-owned, physically contiguous memory region shared with a device.
#[derive(Debug)]
pub struct DmaRegion {
    /// Virtual address of the first byte.
    virt: NonNull<u8>,
    /// Physical address of the first byte.
    phys: PhysAddr,
    /// Length in bytes.
    len: usize,
}

// SAFETY: A DmaRegion is a handle to memory that is already shared with a
// device; moving the handle to another thread does not create new aliasing.
// It is deliberately not `Sync`: concurrent users must serialize externally.
unsafe impl Send for DmaRegion {}

impl DmaRegion {
    /// Creates a region handle.
    ///
    /// # Safety
    ///
    /// - `virt` must be valid for reads and writes of `len` bytes for as long
    ///   as this handle (and any [`alias`](Self::alias)) is used.
    /// - `phys` must be the true physical address of `virt`, and the region
    ///   must be physically contiguous.
    pub unsafe fn new(virt: NonNull<u8>, phys: PhysAddr, len: usize) -> Self {
        Self { virt, phys, len }
    }

    /// Creates a second handle to the same memory.
    ///
    /// Used by bus-master models that must see the same bytes as the driver.
    ///
    /// # Safety
    ///
    /// The caller must ensure accesses through the two handles never race.
    #[must_use]
    pub unsafe fn alias(&self) -> Self {
        Self {
            virt: self.virt,
            phys: self.phys,
            len: self.len,
        }
    }

    /// Returns the physical address of the first byte.
    #[inline]
    #[must_use]
    pub fn phys_base(&self) -> PhysAddr {
        self.phys
    }

    /// Returns the virtual address of the first byte.
    #[inline]
    #[must_use]
    pub fn virt_base(&self) -> VirtAddr {
        VirtAddr::from_ptr(self.virt.as_ptr())
    }

    /// Returns the region length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the region is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if `[phys, phys + size)` lies within the region.
    #[must_use]
    pub fn contains(&self, phys: PhysAddr, size: usize) -> bool {
        let Some(offset) = phys.as_u64().checked_sub(self.phys.as_u64()) else {
            return false;
        };
        offset
            .checked_add(size as u64)
            .is_some_and(|end| end <= self.len as u64)
    }

    /// Translates `phys` if `[phys, phys + size)` lies within the region.
    #[must_use]
    pub fn try_phys_to_virt(&self, phys: PhysAddr, size: usize) -> Option<VirtAddr> {
        if !self.contains(phys, size) {
            return None;
        }
        Some(self.virt_base() + (phys - self.phys))
    }

    /// Translates a physical address inside the region to its virtual alias,
    /// preserving the offset from the region base.
    ///
    /// # Panics
    ///
    /// Panics if `phys` lies outside the region. Callers guarantee containment
    /// by construction, so a miss is a program defect.
    #[must_use]
    pub fn phys_to_virt(&self, phys: PhysAddr) -> VirtAddr {
        match self.try_phys_to_virt(phys, 1) {
            Some(virt) => virt,
            None => panic!(
                "DmaRegion::phys_to_virt: {phys} outside [{}, +{:#x})",
                self.phys, self.len
            ),
        }
    }

    /// Translates a virtual address inside the region to its physical address.
    ///
    /// # Panics
    ///
    /// Panics if `virt` lies outside the region.
    #[must_use]
    pub fn virt_to_phys(&self, virt: VirtAddr) -> PhysAddr {
        let offset = virt - self.virt_base();
        assert!(
            virt >= self.virt_base() && offset < self.len as u64,
            "DmaRegion::virt_to_phys: {virt} outside region"
        );
        self.phys + offset
    }

    /// Returns the physical address `offset` bytes into the region.
    ///
    /// `offset == len` is allowed and yields the one-past-the-end address.
    #[must_use]
    pub fn phys_at(&self, offset: usize) -> PhysAddr {
        assert!(offset <= self.len, "DmaRegion::phys_at: offset past end");
        self.phys + offset as u64
    }

    /// Returns a checked pointer to `[phys, phys + size)`.
    fn ptr_for(&self, phys: PhysAddr, size: usize) -> *mut u8 {
        match self.try_phys_to_virt(phys, size) {
            Some(virt) => virt.as_mut_ptr(),
            None => panic!(
                "DmaRegion: access {phys}+{size:#x} outside [{}, +{:#x})",
                self.phys, self.len
            ),
        }
    }

    /// Zero-fills `len` bytes starting at `phys`.
    pub fn zero(&self, phys: PhysAddr, len: usize) {
        let dst = self.ptr_for(phys, len);
        // SAFETY: ptr_for checked the range lies inside the region, which the
        // constructor guarantees is valid for writes.
        unsafe { ptr::write_bytes(dst, 0, len) };
    }

    /// Reads a little-endian 32-bit word at `phys`.
    #[must_use]
    pub fn read_u32(&self, phys: PhysAddr) -> u32 {
        let src = self.ptr_for(phys, 4).cast::<[u8; 4]>();
        // SAFETY: In-bounds per ptr_for; [u8; 4] has alignment 1.
        u32::from_le_bytes(unsafe { ptr::read_volatile(src) })
    }

    /// Writes a little-endian 32-bit word at `phys`.
    pub fn write_u32(&self, phys: PhysAddr, value: u32) {
        let dst = self.ptr_for(phys, 4).cast::<[u8; 4]>();
        // SAFETY: In-bounds per ptr_for; [u8; 4] has alignment 1.
        unsafe { ptr::write_volatile(dst, value.to_le_bytes()) };
    }

    /// Copies `out.len()` bytes starting at `phys` into `out`.
    pub fn read_bytes(&self, phys: PhysAddr, out: &mut [u8]) {
        let src = self.ptr_for(phys, out.len());
        for (i, byte) in out.iter_mut().enumerate() {
            // SAFETY: i < out.len(), and the whole range was bounds-checked.
            *byte = unsafe { ptr::read_volatile(src.add(i)) };
        }
    }

    /// Copies `data` into the region starting at `phys`.
    pub fn write_bytes(&self, phys: PhysAddr, data: &[u8]) {
        let dst = self.ptr_for(phys, data.len());
        for (i, byte) in data.iter().enumerate() {
            // SAFETY: i < data.len(), and the whole range was bounds-checked.
            unsafe { ptr::write_volatile(dst.add(i), *byte) };
        }
    }

    /// Copies the first `out.len()` bytes of the region into `out`.
    pub fn copy_to_slice(&self, out: &mut [u8]) {
        self.read_bytes(self.phys, out);
    }
}
