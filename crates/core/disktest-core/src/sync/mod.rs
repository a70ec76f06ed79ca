//! Synchronization primitives.
//!
//! Provides [`SpinLock`], usable without an allocator or an operating system
//! scheduler.

mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard};
