//! AHCI command structures: FIS, Command Header, and PRDT entries.
//!
//! The hardware layouts are fixed little-endian byte formats. Each structure
//! is held as plain integers and serialized field by field through shift/mask
//! accessors; nothing here relies on compiler bit-field or packed layout.

use disktest_core::addr::PhysAddr;
use disktest_core::dma::DmaRegion;

use crate::regs::{ATA_CMD_READ_DMA_EX, ATA_DEVICE_LBA, FIS_TYPE_REG_D2H, FIS_TYPE_REG_H2D};

// ---------------------------------------------------------------------------
// Per-port memory layout
// ---------------------------------------------------------------------------

/// Number of command slots this driver uses per port.
pub const NUM_CMD_SLOTS: usize = 8;
/// Size of one command header.
pub const CMD_HEADER_SIZE: usize = 32;
/// Size of the command list area (1 KiB, 1 KiB aligned).
pub const CMD_LIST_SIZE: usize = 1024;
/// Required alignment of the command list.
pub const CMD_LIST_ALIGN: u64 = 1024;
/// Size of the received-FIS area.
pub const RECEIVED_FIS_SIZE: usize = 256;
/// Size of one command table.
pub const CMD_TABLE_SIZE: usize = 256;

/// Offset of the command list inside a port region.
pub const CLB_OFFSET: usize = 0;
/// Offset of the received-FIS area inside a port region.
pub const FB_OFFSET: usize = CLB_OFFSET + CMD_LIST_SIZE;
/// Offset of command table 0 inside a port region.
pub const CMD_TABLES_OFFSET: usize = FB_OFFSET + RECEIVED_FIS_SIZE;
/// Minimum size of a port region: command list, received FIS and 8 tables.
pub const PORT_REGION_SIZE: usize = CMD_TABLES_OFFSET + NUM_CMD_SLOTS * CMD_TABLE_SIZE;

/// Returns the offset of `slot`'s command table inside a port region.
#[must_use]
pub const fn cmd_table_offset(slot: usize) -> usize {
    CMD_TABLES_OFFSET + slot * CMD_TABLE_SIZE
}

/// Offset of the Command FIS within a Command Table.
pub const CMD_FIS_OFFSET: usize = 0x00;
/// Offset of the ATAPI command area within a Command Table.
pub const ACMD_OFFSET: usize = 0x40;
/// Offset of the PRDT within a Command Table.
pub const PRDT_OFFSET: usize = 0x80;
/// PRDT entries that fit in one 256-byte command table.
pub const PRDT_CAPACITY: usize = (CMD_TABLE_SIZE - PRDT_OFFSET) / PRDT_ENTRY_SIZE;
/// Size of one PRDT entry.
pub const PRDT_ENTRY_SIZE: usize = 16;
/// Command FIS length in DWORDs for Register H2D (20 bytes / 4 = 5).
pub const CMD_FIS_LEN_DWORDS: u8 = 5;
/// Offset of the D2H Register FIS inside the received-FIS area.
pub const D2H_FIS_OFFSET: usize = 0x40;

/// ATA sector size in bytes.
pub const SECTOR_SIZE: usize = 512;
/// Bytes addressed by every PRDT entry except the last.
pub const PRDT_CHUNK_SIZE: usize = 4096;
/// Sectors addressed by one full PRDT entry.
pub const SECTORS_PER_PRDT: usize = PRDT_CHUNK_SIZE / SECTOR_SIZE;
/// Largest transfer a single command table can describe.
pub const MAX_SECTORS_PER_COMMAND: u16 = (PRDT_CAPACITY * SECTORS_PER_PRDT) as u16;
/// One past the highest 48-bit LBA.
pub const LBA48_LIMIT: u64 = 1 << 48;

// ---------------------------------------------------------------------------
// Register FIS: Host to Device
// ---------------------------------------------------------------------------

/// Size of a Register FIS (H2D or D2H) in bytes.
pub const REG_FIS_SIZE: usize = 20;

/// FIS Register - Host to Device (20 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FisRegH2d {
    /// FIS type (0x27 for Register H2D).
    pub fis_type: u8,
    /// PM port and C bit (bit 7 = 1 for command, 0 for control).
    pub pm_and_c: u8,
    /// ATA command register.
    pub command: u8,
    /// Features register (low byte).
    pub features_lo: u8,
    /// LBA bytes 0-5, least significant first.
    pub lba: [u8; 6],
    /// Device register.
    pub device: u8,
    /// Features register (high byte).
    pub features_hi: u8,
    /// Sector count (low byte).
    pub count_lo: u8,
    /// Sector count (high byte).
    pub count_hi: u8,
    /// Isochronous command completion.
    pub icc: u8,
    /// Control register.
    pub control: u8,
}

/// Bit 7 of byte 1: the frame carries a command, not a control update.
const H2D_C_BIT: u8 = 1 << 7;

impl FisRegH2d {
    /// Builds a READ DMA EXT command for `count` sectors starting at `lba`.
    #[must_use]
    pub fn read_dma_ext(lba: u64, count: u16) -> Self {
        let mut fis = Self {
            fis_type: FIS_TYPE_REG_H2D,
            pm_and_c: H2D_C_BIT,
            command: ATA_CMD_READ_DMA_EX,
            device: ATA_DEVICE_LBA,
            ..Self::default()
        };
        fis.set_lba(lba);
        fis.set_count(count);
        fis
    }

    /// Returns `true` if the C (command) bit is set.
    #[must_use]
    pub const fn is_command(&self) -> bool {
        self.pm_and_c & H2D_C_BIT != 0
    }

    /// Splits a 48-bit LBA across the six LBA bytes. Bits above 47 are dropped.
    pub fn set_lba(&mut self, lba: u64) {
        for (i, byte) in self.lba.iter_mut().enumerate() {
            *byte = (lba >> (8 * i)) as u8;
        }
    }

    /// Reassembles the 48-bit LBA.
    #[must_use]
    pub fn lba(&self) -> u64 {
        self.lba
            .iter()
            .enumerate()
            .fold(0, |acc, (i, &byte)| acc | (u64::from(byte) << (8 * i)))
    }

    /// Splits a sector count into the low/high count bytes.
    pub fn set_count(&mut self, count: u16) {
        let [lo, hi] = count.to_le_bytes();
        self.count_lo = lo;
        self.count_hi = hi;
    }

    /// Reassembles the sector count.
    #[must_use]
    pub const fn sector_count(&self) -> u16 {
        u16::from_le_bytes([self.count_lo, self.count_hi])
    }

    /// Serializes to the 20-byte wire layout.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; REG_FIS_SIZE] {
        [
            self.fis_type,
            self.pm_and_c,
            self.command,
            self.features_lo,
            self.lba[0],
            self.lba[1],
            self.lba[2],
            self.device,
            self.lba[3],
            self.lba[4],
            self.lba[5],
            self.features_hi,
            self.count_lo,
            self.count_hi,
            self.icc,
            self.control,
            0,
            0,
            0,
            0,
        ]
    }

    /// Parses the 20-byte wire layout.
    #[must_use]
    pub const fn from_bytes(b: &[u8; REG_FIS_SIZE]) -> Self {
        Self {
            fis_type: b[0],
            pm_and_c: b[1],
            command: b[2],
            features_lo: b[3],
            lba: [b[4], b[5], b[6], b[8], b[9], b[10]],
            device: b[7],
            features_hi: b[11],
            count_lo: b[12],
            count_hi: b[13],
            icc: b[14],
            control: b[15],
        }
    }
}

// ---------------------------------------------------------------------------
// Register FIS: Device to Host
// ---------------------------------------------------------------------------

/// FIS Register - Device to Host (20 bytes). Read only for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FisRegD2h {
    /// FIS type (0x34 for Register D2H).
    pub fis_type: u8,
    /// PM port and I bit (bit 6 = interrupt).
    pub pm_and_i: u8,
    /// ATA status register.
    pub status: u8,
    /// ATA error register.
    pub error: u8,
    /// Echoed LBA bytes 0-5.
    pub lba: [u8; 6],
    /// Device register.
    pub device: u8,
    /// Echoed sector count (low byte).
    pub count_lo: u8,
    /// Echoed sector count (high byte).
    pub count_hi: u8,
}

impl FisRegD2h {
    /// Parses the 20-byte wire layout.
    #[must_use]
    pub const fn from_bytes(b: &[u8; REG_FIS_SIZE]) -> Self {
        Self {
            fis_type: b[0],
            pm_and_i: b[1],
            status: b[2],
            error: b[3],
            lba: [b[4], b[5], b[6], b[8], b[9], b[10]],
            device: b[7],
            count_lo: b[12],
            count_hi: b[13],
        }
    }

    /// Returns `true` if the type tag identifies a Register D2H FIS.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.fis_type == FIS_TYPE_REG_D2H
    }

    /// Returns `true` if the interrupt bit is set.
    #[must_use]
    pub const fn interrupt(&self) -> bool {
        self.pm_and_i & (1 << 6) != 0
    }

    /// Reassembles the echoed 48-bit LBA.
    #[must_use]
    pub fn lba(&self) -> u64 {
        self.lba
            .iter()
            .enumerate()
            .fold(0, |acc, (i, &byte)| acc | (u64::from(byte) << (8 * i)))
    }

    /// Reassembles the echoed sector count.
    #[must_use]
    pub const fn sector_count(&self) -> u16 {
        u16::from_le_bytes([self.count_lo, self.count_hi])
    }
}

// ---------------------------------------------------------------------------
// Command header
// ---------------------------------------------------------------------------

/// AHCI Command Header (32 bytes), one per command slot.
///
/// DW0 holds CFL in bits 4:0, A=bit 5, W=bit 6, P=bit 7, R=bit 8, B=bit 9,
/// C=bit 10, PMP in bits 15:12 and PRDTL in bits 31:16. DW4-7 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandHeader {
    /// DW0: flags and PRDT length.
    pub dw0: u32,
    /// Physical Region Descriptor Byte Count (written by the HBA).
    pub prdbc: u32,
    /// Command Table Base Address (low 32 bits, 128-byte aligned).
    pub ctba: u32,
    /// Command Table Base Address (high 32 bits).
    pub ctbau: u32,
}

const HDR_CFL_MASK: u32 = 0x1F;
const HDR_WRITE: u32 = 1 << 6;
const HDR_PRDTL_SHIFT: u32 = 16;

impl CommandHeader {
    /// Returns the command FIS length in DWORDs.
    #[must_use]
    pub const fn cfl(&self) -> u8 {
        (self.dw0 & HDR_CFL_MASK) as u8
    }

    /// Sets the command FIS length in DWORDs (5 bits).
    pub fn set_cfl(&mut self, dwords: u8) {
        self.dw0 = (self.dw0 & !HDR_CFL_MASK) | (u32::from(dwords) & HDR_CFL_MASK);
    }

    /// Returns `true` for a host-to-device (write) transfer.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        self.dw0 & HDR_WRITE != 0
    }

    /// Sets the transfer direction bit.
    pub fn set_write(&mut self, write: bool) {
        if write {
            self.dw0 |= HDR_WRITE;
        } else {
            self.dw0 &= !HDR_WRITE;
        }
    }

    /// Returns the PRDT length in entries.
    #[must_use]
    pub const fn prdtl(&self) -> u16 {
        (self.dw0 >> HDR_PRDTL_SHIFT) as u16
    }

    /// Sets the PRDT length in entries.
    pub fn set_prdtl(&mut self, entries: u16) {
        self.dw0 = (self.dw0 & 0xFFFF) | (u32::from(entries) << HDR_PRDTL_SHIFT);
    }

    /// Returns the command table physical address.
    #[must_use]
    pub const fn ctba(&self) -> PhysAddr {
        PhysAddr::from_halves(self.ctba, self.ctbau)
    }

    /// Sets the command table physical address.
    pub fn set_ctba(&mut self, phys: PhysAddr) {
        self.ctba = phys.low_u32();
        self.ctbau = phys.high_u32();
    }

    /// Loads the header stored at `phys` inside `region`.
    #[must_use]
    pub fn read_from(region: &DmaRegion, phys: PhysAddr) -> Self {
        Self {
            dw0: region.read_u32(phys),
            prdbc: region.read_u32(phys + 4),
            ctba: region.read_u32(phys + 8),
            ctbau: region.read_u32(phys + 12),
        }
    }

    /// Stores the header at `phys` inside `region`, zeroing reserved DW4-7.
    pub fn write_to(&self, region: &DmaRegion, phys: PhysAddr) {
        region.write_u32(phys, self.dw0);
        region.write_u32(phys + 4, self.prdbc);
        region.write_u32(phys + 8, self.ctba);
        region.write_u32(phys + 12, self.ctbau);
        region.zero(phys + 16, CMD_HEADER_SIZE - 16);
    }
}

// ---------------------------------------------------------------------------
// PRDT entry
// ---------------------------------------------------------------------------

/// Physical Region Descriptor Table entry (16 bytes).
///
/// DW3 holds the byte count minus one in bits 21:0 and the
/// interrupt-on-completion flag in bit 31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrdtEntry {
    /// Data Base Address (low 32 bits, word-aligned).
    pub dba: u32,
    /// Data Base Address (high 32 bits).
    pub dbau: u32,
    /// DW3: byte count and interrupt flag.
    pub dw3: u32,
}

const PRDT_DBC_MASK: u32 = 0x003F_FFFF;
const PRDT_IOC: u32 = 1 << 31;
/// Largest byte count one PRDT entry can describe (4 MiB).
pub const PRDT_MAX_BYTES: u32 = PRDT_DBC_MASK + 1;

impl PrdtEntry {
    /// Creates an entry for `bytes` bytes at `phys`.
    ///
    /// `bytes` must be even and in `2..=4 MiB`.
    #[must_use]
    pub fn new(phys: PhysAddr, bytes: u32, interrupt: bool) -> Self {
        debug_assert!(bytes >= 2 && bytes <= PRDT_MAX_BYTES && bytes % 2 == 0);
        let mut entry = Self {
            dba: phys.low_u32(),
            dbau: phys.high_u32(),
            dw3: 0,
        };
        entry.set_byte_count(bytes);
        if interrupt {
            entry.dw3 |= PRDT_IOC;
        }
        entry
    }

    /// Returns the data base address.
    #[must_use]
    pub const fn address(&self) -> PhysAddr {
        PhysAddr::from_halves(self.dba, self.dbau)
    }

    /// Returns the number of bytes this entry transfers.
    #[must_use]
    pub const fn byte_count(&self) -> u32 {
        (self.dw3 & PRDT_DBC_MASK) + 1
    }

    /// Encodes `bytes` as the zero-based DBC field.
    pub fn set_byte_count(&mut self, bytes: u32) {
        self.dw3 = (self.dw3 & !PRDT_DBC_MASK) | (bytes.saturating_sub(1) & PRDT_DBC_MASK);
    }

    /// Returns `true` if interrupt-on-completion is set.
    #[must_use]
    pub const fn interrupt(&self) -> bool {
        self.dw3 & PRDT_IOC != 0
    }

    /// Loads the entry stored at `phys` inside `region`.
    #[must_use]
    pub fn read_from(region: &DmaRegion, phys: PhysAddr) -> Self {
        Self {
            dba: region.read_u32(phys),
            dbau: region.read_u32(phys + 4),
            dw3: region.read_u32(phys + 12),
        }
    }

    /// Stores the entry at `phys` inside `region`.
    pub fn write_to(&self, region: &DmaRegion, phys: PhysAddr) {
        region.write_u32(phys, self.dba);
        region.write_u32(phys + 4, self.dbau);
        region.write_u32(phys + 8, 0);
        region.write_u32(phys + 12, self.dw3);
    }
}
