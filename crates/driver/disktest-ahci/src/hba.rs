//! AHCI HBA (Host Bus Adapter) controller.
//!
//! Provides access to the generic host control registers, capability queries
//! and per-port register windows.

use core::fmt;

use disktest_core::dma::DmaRegion;
use disktest_core::{ddebug, dinfo};
use disktest_mmio::RegisterBus;

use crate::config::PortConfig;
use crate::error::AhciError;
use crate::port::AhciPort;
use crate::probe::{self, DeviceKind, PortScan};
use crate::regs::{self, AhciHbaRegs, AhciPortRegs, HbaCap, HbaGhc, MAX_PORTS};

/// Decoded AHCI version register (VS).
///
/// The minor half is BCD-style: bits 15:8 hold the minor number and bits 7:0
/// a sub-minor that is zero for most releases (0x0300 is 1.3, 0x0301 is 1.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AhciVersion {
    /// Major version (bits 31:16).
    pub major: u16,
    /// Minor version (bits 15:8).
    pub minor: u8,
    /// Sub-minor version (bits 7:0).
    pub subminor: u8,
}

impl AhciVersion {
    /// Decodes a raw VS register value.
    #[must_use]
    pub const fn from_raw(vs: u32) -> Self {
        Self {
            major: (vs >> 16) as u16,
            minor: (vs >> 8) as u8,
            subminor: vs as u8,
        }
    }
}

impl fmt::Display for AhciVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if self.subminor != 0 {
            write!(f, ".{}", self.subminor)?;
        }
        Ok(())
    }
}

/// AHCI HBA controller state.
pub struct AhciHba<B> {
    /// Typed register block for the HBA MMIO region (ABAR).
    regs: AhciHbaRegs<B>,
    /// Number of command slots per port (1-32).
    num_cmd_slots: u8,
    /// Whether the HBA supports 64-bit addressing.
    supports_64bit: bool,
}

impl<B: RegisterBus> AhciHba<B> {
    /// Creates an HBA handle over the ABAR window, reading capabilities.
    pub fn new(bus: B) -> Self {
        let regs = AhciHbaRegs::new(bus);
        let cap = regs.cap();

        Self {
            regs,
            num_cmd_slots: cap.num_cmd_slots(),
            supports_64bit: cap.contains(HbaCap::S64A),
        }
    }

    /// Sets GHC.AE so the HBA operates in AHCI mode. Interrupts stay off.
    pub fn enable_ahci(&self) {
        let ghc = self.regs.ghc();
        if !ghc.contains(HbaGhc::AE) {
            self.regs.set_ghc((ghc | HbaGhc::AE) - HbaGhc::IE);
        }
    }

    /// Returns `true` if CAP.S64A is set.
    #[must_use]
    pub fn supports_64bit(&self) -> bool {
        self.supports_64bit
    }

    /// Returns the number of command slots per port the HBA implements.
    #[must_use]
    pub fn num_cmd_slots(&self) -> u8 {
        self.num_cmd_slots
    }

    /// Returns the number of ports the HBA reports in CAP.NP.
    #[must_use]
    pub fn num_ports(&self) -> u8 {
        self.regs.cap().num_ports()
    }

    /// Returns the Ports Implemented bitmask.
    #[must_use]
    pub fn ports_implemented(&self) -> u32 {
        self.regs.pi()
    }

    /// Returns the decoded AHCI version.
    #[must_use]
    pub fn version(&self) -> AhciVersion {
        AhciVersion::from_raw(self.regs.vs())
    }

    /// Returns the register block of `port`.
    ///
    /// # Panics
    ///
    /// Panics if `port` is 32 or higher.
    #[must_use]
    pub fn port(&self, port: u8) -> AhciPortRegs<B> {
        assert!(port < MAX_PORTS, "AHCI: port {port} out of range");
        AhciPortRegs::new(self.regs.bus().window(regs::port_offset(port)))
    }

    /// Classifies every implemented port and logs the result.
    pub fn probe_ports(&self) -> PortScan {
        dinfo!(
            "AHCI: version {}, {} ports, {} slots, 64-bit {}",
            self.version(),
            self.num_ports(),
            self.num_cmd_slots,
            if self.supports_64bit { "supported" } else { "not supported" }
        );

        let pi = self.ports_implemented();
        let mut scan = PortScan::new(pi);
        for port in (0..MAX_PORTS).filter(|p| pi & (1 << p) != 0) {
            let regs = self.port(port);
            let kind = probe::classify(&regs);
            match kind {
                DeviceKind::None => ddebug!("AHCI: port {}: no device", port),
                kind => dinfo!("AHCI: port {}: {} found (sig={:#010x})", port, kind, regs.sig()),
            }
            scan.set(port, kind);
        }
        scan
    }

    /// Initializes `port` if it is implemented and has a SATA/SATAPI device.
    pub fn init_port(
        &self,
        port: u8,
        region: DmaRegion,
        config: PortConfig,
    ) -> Result<AhciPort<B>, AhciError> {
        if port >= MAX_PORTS || self.ports_implemented() & (1 << port) == 0 {
            return Err(AhciError::NoDevice);
        }
        let regs = self.port(port);
        if !probe::classify(&regs).is_ata() {
            return Err(AhciError::NoDevice);
        }
        AhciPort::initialize(regs, region, config, self.supports_64bit)
    }
}
