//! Typed register block abstractions.
//!
//! This crate re-exports the [`register_block!`] macro from
//! `disktest-mmio-macros`, which generates typed register accessor structs
//! from a declarative definition. Generated structs read and write through a
//! [`RegisterBus`]:
//!
//! - [`Mmio`] performs volatile loads and stores against a mapped device
//!   window. Its constructor is the single `unsafe` point.
//! - Test harnesses implement [`RegisterBus`] with a software model of the
//!   device, so driver logic can be exercised without hardware.
//!
//! # Example
//!
//! ```ignore
//! use disktest_mmio::{Mmio, register_block};
//!
//! register_block! {
//!     /// AHCI per-port registers.
//!     pub PortRegs {
//!         /// SATA Status.
//!         [0x28; u32; ro] ssts,
//!         /// Command Issue.
//!         [0x38; u32; rw] ci,
//!     }
//! }
//!
//! let port = PortRegs::new(unsafe { Mmio::new(port_base) });
//! let busy = port.ci();
//! ```

#![cfg_attr(not(test), no_std)]

// Lets the generated `::disktest_mmio::RegisterBus` paths resolve in this
// crate's own tests.
extern crate self as disktest_mmio;

use core::ptr;

use disktest_core::addr::VirtAddr;

pub use disktest_mmio_macros::register_block;

/// Dword-granular access to a window of device registers.
///
/// Offsets are bytes from the start of the window. Implementations must give
/// every access device-visible (volatile) semantics: no caching, merging or
/// reordering relative to other accesses on the same bus.
pub trait RegisterBus {
    /// Reads the 32-bit register at `offset`.
    fn read_u32(&self, offset: u64) -> u32;

    /// Writes the 32-bit register at `offset`.
    fn write_u32(&self, offset: u64, value: u32);

    /// Returns a bus for the sub-window starting at `offset`.
    #[must_use]
    fn window(&self, offset: u64) -> Self
    where
        Self: Sized;

    /// Reads a 64-bit register as two dwords, low half first.
    fn read_u64(&self, offset: u64) -> u64 {
        let low = u64::from(self.read_u32(offset));
        let high = u64::from(self.read_u32(offset + 4));
        (high << 32) | low
    }

    /// Writes a 64-bit register as two dwords, low half first.
    fn write_u64(&self, offset: u64, value: u64) {
        self.write_u32(offset, value as u32);
        self.write_u32(offset + 4, (value >> 32) as u32);
    }
}

/// A volatile memory-mapped register window.
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    base: VirtAddr,
}

impl Mmio {
    /// Creates a window starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a valid, mapped MMIO region covering every
    /// register accessed through this window and any sub-window, for as long
    /// as the window is used.
    pub unsafe fn new(base: VirtAddr) -> Self {
        Self { base }
    }

    /// Returns the base virtual address.
    #[must_use]
    pub fn base(&self) -> VirtAddr {
        self.base
    }
}

impl RegisterBus for Mmio {
    #[inline]
    fn read_u32(&self, offset: u64) -> u32 {
        // SAFETY: Caller of `new` guarantees base points to a valid MMIO region.
        unsafe { ptr::read_volatile((self.base + offset).as_ptr::<u32>()) }
    }

    #[inline]
    fn write_u32(&self, offset: u64, value: u32) {
        // SAFETY: Caller of `new` guarantees base points to a valid MMIO region.
        unsafe { ptr::write_volatile((self.base + offset).as_mut_ptr::<u32>(), value) };
    }

    #[inline]
    fn window(&self, offset: u64) -> Self {
        Self {
            base: self.base + offset,
        }
    }
}
