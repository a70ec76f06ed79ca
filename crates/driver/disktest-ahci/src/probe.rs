//! Device detection and classification from PxSSTS / PxSIG.

use core::fmt;

use disktest_mmio::RegisterBus;

use crate::regs::{
    self, AhciPortRegs, MAX_PORTS, SATA_SIG_ATAPI, SATA_SIG_PM, SATA_SIG_SEMB, SSTS_DET_PRESENT,
    SSTS_IPM_ACTIVE,
};

/// Kind of device attached to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceKind {
    /// No device, or the link is not active.
    #[default]
    None,
    /// SATA drive (also any unrecognized signature on an active link).
    Sata,
    /// SATAPI drive.
    Satapi,
    /// Enclosure management bridge.
    Semb,
    /// Port multiplier.
    PortMultiplier,
}

impl DeviceKind {
    /// Classifies from raw PxSSTS and PxSIG values.
    #[must_use]
    pub const fn from_status(ssts: u32, sig: u32) -> Self {
        if regs::ssts_det(ssts) != SSTS_DET_PRESENT || regs::ssts_ipm(ssts) != SSTS_IPM_ACTIVE {
            return Self::None;
        }
        match sig {
            SATA_SIG_ATAPI => Self::Satapi,
            SATA_SIG_SEMB => Self::Semb,
            SATA_SIG_PM => Self::PortMultiplier,
            _ => Self::Sata,
        }
    }

    /// Returns `true` for devices this driver can initialize a port for.
    #[must_use]
    pub const fn is_ata(self) -> bool {
        matches!(self, Self::Sata | Self::Satapi)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("no device"),
            Self::Sata => f.write_str("SATA drive"),
            Self::Satapi => f.write_str("SATAPI drive"),
            Self::Semb => f.write_str("SEMB drive"),
            Self::PortMultiplier => f.write_str("port multiplier"),
        }
    }
}

/// Classifies the device on `port`. Reads PxSSTS and PxSIG only.
pub fn classify<B: RegisterBus>(port: &AhciPortRegs<B>) -> DeviceKind {
    DeviceKind::from_status(port.ssts(), port.sig())
}

/// Classification of every port of an HBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortScan {
    implemented: u32,
    kinds: [DeviceKind; MAX_PORTS as usize],
}

impl PortScan {
    pub(crate) const fn new(implemented: u32) -> Self {
        Self {
            implemented,
            kinds: [DeviceKind::None; MAX_PORTS as usize],
        }
    }

    pub(crate) fn set(&mut self, port: u8, kind: DeviceKind) {
        self.kinds[usize::from(port)] = kind;
    }

    /// Returns the Ports Implemented mask the scan walked.
    #[must_use]
    pub const fn implemented(&self) -> u32 {
        self.implemented
    }

    /// Returns the kind found on `port`, `None` for unimplemented ports.
    #[must_use]
    pub fn kind(&self, port: u8) -> DeviceKind {
        self.kinds
            .get(usize::from(port))
            .copied()
            .unwrap_or(DeviceKind::None)
    }

    /// Iterates `(port, kind)` over implemented ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, DeviceKind)> + '_ {
        (0..MAX_PORTS)
            .filter(|&port| self.implemented & (1 << port) != 0)
            .map(|port| (port, self.kinds[usize::from(port)]))
    }

    /// Returns the lowest-numbered port with a SATA or SATAPI device.
    #[must_use]
    pub fn first_ata(&self) -> Option<u8> {
        self.iter()
            .find(|(_, kind)| kind.is_ata())
            .map(|(port, _)| port)
    }
}
