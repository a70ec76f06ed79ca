//! AHCI driver error types.

use core::fmt;

use disktest_core::addr::PhysAddr;

use crate::command::FisRegD2h;
use crate::regs::{AtaError, AtaStatus};
use crate::snapshot::PortSnapshot;

pub use crate::engine::EngineWait;

/// Errors returned by AHCI port operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AhciError {
    /// Every command slot is busy; the caller may retry later.
    NoFreeSlot,
    /// A bounded wait on the hardware ran out. The port must be re-initialized.
    DeviceUnresponsive {
        /// The condition that never became true.
        wait: EngineWait,
    },
    /// The device reported an error for the issued command.
    TaskFileError(TaskFileError),
    /// The caller-supplied port memory cannot hold the command structures.
    InvalidLayout(LayoutError),
    /// The read request cannot be expressed as one command.
    InvalidRequest(RequestError),
    /// No device is attached to the port.
    NoDevice,
}

impl AhciError {
    /// Returns `true` if the received-FIS diagnostic was corrupt.
    #[must_use]
    pub fn has_corrupt_fis(&self) -> bool {
        matches!(
            self,
            Self::TaskFileError(TaskFileError {
                received: ReceivedFis::CorruptReceivedFis { .. },
                ..
            })
        )
    }
}

impl fmt::Display for AhciError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFreeSlot => f.write_str("no free command slot"),
            Self::DeviceUnresponsive { wait } => write!(f, "device unresponsive: {wait}"),
            Self::TaskFileError(err) => write!(f, "task file error: {err}"),
            Self::InvalidLayout(err) => write!(f, "invalid port memory layout: {err}"),
            Self::InvalidRequest(err) => write!(f, "invalid read request: {err}"),
            Self::NoDevice => f.write_str("no device attached"),
        }
    }
}

impl core::error::Error for AhciError {}

impl From<LayoutError> for AhciError {
    fn from(err: LayoutError) -> Self {
        Self::InvalidLayout(err)
    }
}

impl From<RequestError> for AhciError {
    fn from(err: RequestError) -> Self {
        Self::InvalidRequest(err)
    }
}

/// A device-reported command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFileError {
    /// Slot the failed command was issued in.
    pub slot: u8,
    /// ATA status byte from PxTFD.
    pub status: AtaStatus,
    /// ATA error byte from PxTFD.
    pub error: AtaError,
    /// Port registers at the time the error was decoded.
    pub snapshot: PortSnapshot,
    /// The D2H Register FIS from the received-FIS area, if any.
    pub received: ReceivedFis,
}

impl fmt::Display for TaskFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slot {} status={:#04x} error={:#04x}",
            self.slot,
            self.status.bits(),
            self.error.bits()
        )?;
        match self.received {
            ReceivedFis::NotReceived => Ok(()),
            ReceivedFis::DeviceToHost(fis) => write!(
                f,
                " (d2h status={:#04x} error={:#04x} lba={:#x})",
                fis.status,
                fis.error,
                fis.lba()
            ),
            ReceivedFis::CorruptReceivedFis { fis_type } => {
                write!(f, " (corrupt received FIS, type {fis_type:#04x})")
            }
        }
    }
}

/// Diagnostic read of the D2H Register FIS after a task-file error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivedFis {
    /// PxIS.DHRS was clear; no D2H FIS was posted.
    NotReceived,
    /// A well-formed D2H Register FIS.
    DeviceToHost(FisRegD2h),
    /// The type tag at the D2H offset was not 0x34. Does not change the outcome.
    CorruptReceivedFis {
        /// The type tag found.
        fis_type: u8,
    },
}

/// Port memory that cannot hold the command structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// The region is shorter than the command list, FIS area and tables.
    RegionTooSmall {
        /// Bytes needed.
        required: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// The region (or a buffer) does not start on the required boundary.
    Misaligned {
        /// Required alignment in bytes.
        required: u64,
        /// The offending physical address.
        phys: PhysAddr,
    },
    /// The HBA cannot address memory above 4 GiB (CAP.S64A clear).
    AddressAbove4GiB {
        /// The unreachable physical address.
        phys: PhysAddr,
    },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegionTooSmall { required, actual } => {
                write!(f, "region is {actual} bytes, need {required}")
            }
            Self::Misaligned { required, phys } => {
                write!(f, "{phys} is not {required}-byte aligned")
            }
            Self::AddressAbove4GiB { phys } => {
                write!(f, "{phys} is above 4 GiB and the HBA lacks 64-bit addressing")
            }
        }
    }
}

/// A read request that cannot be issued as one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// A zero-sector read.
    ZeroSectors,
    /// More sectors than one command table can describe.
    TooManySectors {
        /// Sectors requested.
        requested: u16,
        /// Largest supported count.
        max: u16,
    },
    /// The destination buffer is shorter than the transfer.
    BufferTooSmall {
        /// Bytes needed.
        required: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// The range extends past the 48-bit LBA space.
    LbaOutOfRange {
        /// The starting LBA.
        lba: u64,
    },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSectors => f.write_str("zero-sector read"),
            Self::TooManySectors { requested, max } => {
                write!(f, "{requested} sectors requested, at most {max} per command")
            }
            Self::BufferTooSmall { required, actual } => {
                write!(f, "buffer is {actual} bytes, need {required}")
            }
            Self::LbaOutOfRange { lba } => write!(f, "LBA {lba:#x} outside 48-bit range"),
        }
    }
}
