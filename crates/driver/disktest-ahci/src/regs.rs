//! AHCI HBA register offsets and bitflags.
//!
//! Defines the memory-mapped register layout of an AHCI Host Bus Adapter,
//! including generic host control registers and per-port register blocks,
//! plus the ATA/SATA constants needed to interpret them. All field access is
//! shift/mask over fixed-width integers; no bit-field structs.

use bitflags::bitflags;
use disktest_mmio::register_block;

// ---------------------------------------------------------------------------
// Generic Host Control register block (0x00 - 0x2B)
// ---------------------------------------------------------------------------

register_block! {
    /// AHCI HBA generic host control registers.
    pub AhciHbaRegs {
        /// Host Capabilities (read-only).
        [0x00; u32; ro] cap => HbaCap,
        /// Global Host Control.
        [0x04; u32; rw] ghc => HbaGhc,
        /// Interrupt Status, one bit per port.
        [0x08; u32; w1c] is,
        /// Ports Implemented (read-only).
        [0x0C; u32; ro] pi,
        /// AHCI Version (read-only).
        [0x10; u32; ro] vs,
        /// Command Completion Coalescing Control.
        [0x14; u32; rw] ccc_ctl,
        /// Command Completion Coalescing Ports.
        [0x18; u32; rw] ccc_pts,
        /// Enclosure Management Location (read-only).
        [0x1C; u32; ro] em_loc,
        /// Enclosure Management Control.
        [0x20; u32; rw] em_ctl,
        /// Host Capabilities Extended (read-only).
        [0x24; u32; ro] cap2,
        /// BIOS/OS Handoff Control and Status.
        [0x28; u32; rw] bohc,
    }
}

// ---------------------------------------------------------------------------
// Per-port register block (base = hba_base + 0x100 + port * 0x80)
// ---------------------------------------------------------------------------

/// Port register block size.
pub const PORT_REG_SIZE: u64 = 0x80;
/// Base offset for port 0.
pub const PORT_BASE: u64 = 0x100;
/// Number of port register blocks an HBA can expose.
pub const MAX_PORTS: u8 = 32;
/// Start of the vendor-specific host register range.
pub const HBA_VENDOR_BASE: u64 = 0xA0;

/// Returns the offset of `port`'s register block from the HBA base.
#[must_use]
pub const fn port_offset(port: u8) -> u64 {
    PORT_BASE + port as u64 * PORT_REG_SIZE
}

register_block! {
    /// AHCI per-port registers.
    pub AhciPortRegs {
        /// Command List Base Address (low 32 bits, 1 KiB aligned).
        [0x00; u32; rw] clb,
        /// Command List Base Address (high 32 bits).
        [0x04; u32; rw] clbu,
        /// FIS Base Address (low 32 bits, 256-byte aligned).
        [0x08; u32; rw] fb,
        /// FIS Base Address (high 32 bits).
        [0x0C; u32; rw] fbu,
        /// Interrupt Status (write-1-to-clear).
        [0x10; u32; w1c] is => PortIs,
        /// Interrupt Enable.
        [0x14; u32; rw] ie => PortIe,
        /// Command and Status.
        [0x18; u32; rw] cmd => PortCmd,
        /// Task File Data (read-only): status in 7:0, error in 15:8.
        [0x20; u32; ro] tfd,
        /// Signature (read-only).
        [0x24; u32; ro] sig,
        /// SATA Status, SCR0 (read-only).
        [0x28; u32; ro] ssts,
        /// SATA Control, SCR2.
        [0x2C; u32; rw] sctl,
        /// SATA Error, SCR1 (write-1-to-clear).
        [0x30; u32; w1c] serr,
        /// SATA Active, SCR3.
        [0x34; u32; rw] sact,
        /// Command Issue.
        [0x38; u32; rw] ci,
        /// SATA Notification, SCR4 (write-1-to-clear).
        [0x3C; u32; w1c] sntf,
        /// FIS-based Switching Control.
        [0x40; u32; rw] fbs,
    }
}

// ---------------------------------------------------------------------------
// Bitflags
// ---------------------------------------------------------------------------

bitflags! {
    /// HBA Capabilities (CAP) register flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HbaCap: u32 {
        /// Supports 64-bit addressing (S64A).
        const S64A = 1 << 31;
        /// Supports native command queuing (SNCQ).
        const SNCQ = 1 << 30;
        /// Number of ports (bits 4:0) and command slots (bits 12:8), accessed via helpers.
        const _ = !0;
    }
}

impl HbaCap {
    /// Returns the number of command slots (1-32).
    #[must_use]
    pub const fn num_cmd_slots(self) -> u8 {
        (((self.bits() >> 8) & 0x1F) + 1) as u8
    }

    /// Returns the number of ports the HBA supports (1-32).
    #[must_use]
    pub const fn num_ports(self) -> u8 {
        ((self.bits() & 0x1F) + 1) as u8
    }
}

bitflags! {
    /// Global Host Control (GHC) register flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HbaGhc: u32 {
        /// AHCI Enable (AE).
        const AE = 1 << 31;
        /// Interrupt Enable (IE).
        const IE = 1 << 1;
        /// HBA Reset (HR).
        const HR = 1 << 0;
    }
}

bitflags! {
    /// Port Command and Status (PxCMD) register flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortCmd: u32 {
        /// Start (ST): enables command processing.
        const ST = 1 << 0;
        /// Spin-Up Device (SUD).
        const SUD = 1 << 1;
        /// Power On Device (POD).
        const POD = 1 << 2;
        /// FIS Receive Enable (FRE).
        const FRE = 1 << 4;
        /// FIS Receive Running (FR).
        const FR = 1 << 14;
        /// Command List Running (CR).
        const CR = 1 << 15;
        /// Remaining bits (current command slot, ICC, ...).
        const _ = !0;
    }
}

bitflags! {
    /// Port Interrupt Status (PxIS) register flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortIs: u32 {
        /// Device to Host Register FIS Interrupt (DHRS).
        const DHRS = 1 << 0;
        /// PIO Setup FIS Interrupt (PSS).
        const PSS = 1 << 1;
        /// DMA Setup FIS Interrupt (DSS).
        const DSS = 1 << 2;
        /// Set Device Bits Interrupt (SDBS).
        const SDBS = 1 << 3;
        /// Host Bus Fatal Error Status (HBFS).
        const HBFS = 1 << 29;
        /// Task File Error Status (TFES).
        const TFES = 1 << 30;
        /// Remaining status bits.
        const _ = !0;
    }
}

bitflags! {
    /// Port Interrupt Enable (PxIE) register flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortIe: u32 {
        /// Device to Host Register FIS Interrupt Enable.
        const DHRE = 1 << 0;
        /// PIO Setup FIS Interrupt Enable.
        const PSE = 1 << 1;
        /// DMA Setup FIS Interrupt Enable.
        const DSE = 1 << 2;
        /// Set Device Bits Interrupt Enable.
        const SDBE = 1 << 3;
        /// Task File Error Enable.
        const TFEE = 1 << 30;
        /// Remaining enable bits.
        const _ = !0;
    }
}

bitflags! {
    /// ATA Status register bits (PxTFD bits 7:0, D2H FIS status byte).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AtaStatus: u8 {
        /// Error (ERR).
        const ERR = 1 << 0;
        /// Data Request (DRQ).
        const DRQ = 1 << 3;
        /// Device Fault (DF).
        const DF = 1 << 5;
        /// Device Ready (DRDY).
        const DRDY = 1 << 6;
        /// Busy (BSY).
        const BSY = 1 << 7;
        /// Command-specific bits.
        const _ = !0;
    }
}

bitflags! {
    /// ATA Error register bits (PxTFD bits 15:8, D2H FIS error byte).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AtaError: u8 {
        /// Address mark not found / obsolete.
        const AMNF = 1 << 0;
        /// Command aborted (ABRT).
        const ABRT = 1 << 2;
        /// ID not found: LBA out of range (IDNF).
        const IDNF = 1 << 4;
        /// Uncorrectable data (UNC).
        const UNC = 1 << 6;
        /// Interface CRC error (ICRC).
        const ICRC = 1 << 7;
        /// Command-specific bits.
        const _ = !0;
    }
}

// ---------------------------------------------------------------------------
// ATA constants
// ---------------------------------------------------------------------------

/// ATA IDENTIFY DEVICE command.
pub const ATA_CMD_IDENTIFY: u8 = 0xEC;
/// ATA READ DMA command (28-bit LBA).
pub const ATA_CMD_READ_DMA: u8 = 0xC8;
/// ATA READ DMA EXT command (48-bit LBA).
pub const ATA_CMD_READ_DMA_EX: u8 = 0x25;

/// Device register value selecting LBA addressing (bit 6).
pub const ATA_DEVICE_LBA: u8 = 1 << 6;

// ---------------------------------------------------------------------------
// FIS types
// ---------------------------------------------------------------------------

/// FIS type: Register, Host to Device.
pub const FIS_TYPE_REG_H2D: u8 = 0x27;
/// FIS type: Register, Device to Host.
pub const FIS_TYPE_REG_D2H: u8 = 0x34;
/// FIS type: DMA Activate, Device to Host.
pub const FIS_TYPE_DMA_ACT: u8 = 0x39;
/// FIS type: DMA Setup, bidirectional.
pub const FIS_TYPE_DMA_SETUP: u8 = 0x41;
/// FIS type: Data, bidirectional.
pub const FIS_TYPE_DATA: u8 = 0x46;
/// FIS type: PIO Setup, Device to Host.
pub const FIS_TYPE_PIO_SETUP: u8 = 0x5F;
/// FIS type: Set Device Bits, Device to Host.
pub const FIS_TYPE_DEV_BITS: u8 = 0xA1;

// ---------------------------------------------------------------------------
// Device signatures (PxSIG)
// ---------------------------------------------------------------------------

/// SATA drive.
pub const SATA_SIG_ATA: u32 = 0x0000_0101;
/// SATAPI drive.
pub const SATA_SIG_ATAPI: u32 = 0xEB14_0101;
/// Enclosure management bridge.
pub const SATA_SIG_SEMB: u32 = 0xC33C_0101;
/// Port multiplier.
pub const SATA_SIG_PM: u32 = 0x9669_0101;

// ---------------------------------------------------------------------------
// SStatus / task file helpers
// ---------------------------------------------------------------------------

/// Extracts DET (Device Detection) field from SStatus (bits 3:0).
#[must_use]
pub const fn ssts_det(ssts: u32) -> u8 {
    (ssts & 0x0F) as u8
}

/// Extracts SPD (Current Interface Speed) field from SStatus (bits 7:4).
#[must_use]
pub const fn ssts_spd(ssts: u32) -> u8 {
    ((ssts >> 4) & 0x0F) as u8
}

/// Extracts IPM (Interface Power Management) field from SStatus (bits 11:8).
#[must_use]
pub const fn ssts_ipm(ssts: u32) -> u8 {
    ((ssts >> 8) & 0x0F) as u8
}

/// DET value indicating device present and Phy communication established.
pub const SSTS_DET_PRESENT: u8 = 3;
/// IPM value indicating interface in active state.
pub const SSTS_IPM_ACTIVE: u8 = 1;

/// Extracts the ATA status byte from PxTFD (bits 7:0).
#[must_use]
pub const fn tfd_status(tfd: u32) -> AtaStatus {
    AtaStatus::from_bits_retain(tfd as u8)
}

/// Extracts the ATA error byte from PxTFD (bits 15:8).
#[must_use]
pub const fn tfd_error(tfd: u32) -> AtaError {
    AtaError::from_bits_retain((tfd >> 8) as u8)
}
