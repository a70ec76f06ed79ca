//! Lock-protected port handle for callers on more than one thread.

use disktest_core::dma::DmaRegion;
use disktest_core::sync::SpinLock;
use disktest_mmio::{Mmio, RegisterBus};

use crate::error::AhciError;
use crate::port::{AhciPort, ReadCompletion};
use crate::snapshot::PortSnapshot;

const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SharedPort<Mmio>>();
};

/// An [`AhciPort`] behind a spin lock.
///
/// One command is in flight per port at a time: each call holds the lock from
/// slot allocation until the command completes or fails.
pub struct SharedPort<B> {
    inner: SpinLock<AhciPort<B>>,
}

impl<B: RegisterBus> SharedPort<B> {
    /// Wraps an initialized port.
    pub const fn new(port: AhciPort<B>) -> Self {
        Self {
            inner: SpinLock::new(port),
        }
    }

    /// Locked [`AhciPort::read_sectors`].
    pub fn read_sectors(
        &self,
        lba: u64,
        count: u16,
        dest: &DmaRegion,
    ) -> Result<ReadCompletion, AhciError> {
        self.inner.lock().read_sectors(lba, count, dest)
    }

    /// Locked [`AhciPort::reinitialize`].
    pub fn reinitialize(&self) -> Result<(), AhciError> {
        self.inner.lock().reinitialize()
    }

    /// Returns a register snapshot taken under the lock.
    pub fn snapshot(&self) -> PortSnapshot {
        self.inner.lock().snapshot()
    }

    /// Runs `f` with exclusive access to the port.
    pub fn with<R>(&self, f: impl FnOnce(&mut AhciPort<B>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Unwraps the port.
    pub fn into_inner(self) -> AhciPort<B> {
        self.inner.into_inner()
    }
}
