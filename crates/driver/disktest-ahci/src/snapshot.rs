//! Point-in-time copy of a port's status registers for diagnostics.

use core::fmt;

use disktest_mmio::RegisterBus;

use crate::regs::{self, AhciPortRegs};

/// Values of a port's status and control registers, read once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortSnapshot {
    /// PxIS.
    pub is: u32,
    /// PxIE.
    pub ie: u32,
    /// PxCMD.
    pub cmd: u32,
    /// PxTFD.
    pub tfd: u32,
    /// PxSSTS.
    pub ssts: u32,
    /// PxSCTL.
    pub sctl: u32,
    /// PxSERR.
    pub serr: u32,
    /// PxSACT.
    pub sact: u32,
    /// PxCI.
    pub ci: u32,
    /// PxSNTF.
    pub sntf: u32,
}

impl PortSnapshot {
    /// Reads every register once. Reads have no side effects on AHCI ports.
    pub fn capture<B: RegisterBus>(port: &AhciPortRegs<B>) -> Self {
        Self {
            is: port.is().bits(),
            ie: port.ie().bits(),
            cmd: port.cmd().bits(),
            tfd: port.tfd(),
            ssts: port.ssts(),
            sctl: port.sctl(),
            serr: port.serr(),
            sact: port.sact(),
            ci: port.ci(),
            sntf: port.sntf(),
        }
    }
}

impl fmt::Display for PortSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "IS={:#010x} IE={:#010x} CMD={:#010x} TFD={:#010x} (status={:#04x} error={:#04x})",
            self.is,
            self.ie,
            self.cmd,
            self.tfd,
            regs::tfd_status(self.tfd).bits(),
            regs::tfd_error(self.tfd).bits(),
        )?;
        write!(
            f,
            "SSTS={:#010x} (det={} ipm={}) SCTL={:#010x} SERR={:#010x} SACT={:#010x} CI={:#010x} SNTF={:#010x}",
            self.ssts,
            regs::ssts_det(self.ssts),
            regs::ssts_ipm(self.ssts),
            self.sctl,
            self.serr,
            self.sact,
            self.ci,
            self.sntf,
        )
    }
}
