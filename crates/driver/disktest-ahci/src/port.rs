//! AHCI per-port state and command management.
//!
//! Each AHCI port represents a SATA device connection. This module lays out
//! the command list, received-FIS area and command tables inside one
//! caller-owned [`DmaRegion`], manages the eight command slots and issues
//! polled READ DMA EXT commands.
//!
//! Physical addresses read back from PxCLB/PxFB or from a command header are
//! always translated through the region before they are dereferenced.

use core::fmt;
use core::sync::atomic::{Ordering, fence};

use disktest_core::addr::PhysAddr;
use disktest_core::dma::DmaRegion;
use disktest_core::{ddebug, derror, dtrace, dwarn};
use disktest_mmio::RegisterBus;

use crate::command::{
    CLB_OFFSET, CMD_FIS_LEN_DWORDS, CMD_FIS_OFFSET, CMD_HEADER_SIZE, CMD_LIST_ALIGN,
    CMD_LIST_SIZE, CMD_TABLE_SIZE, CommandHeader, D2H_FIS_OFFSET, FB_OFFSET, FisRegD2h, FisRegH2d,
    LBA48_LIMIT, MAX_SECTORS_PER_COMMAND, NUM_CMD_SLOTS, PORT_REGION_SIZE, PRDT_CAPACITY,
    PRDT_ENTRY_SIZE, PRDT_OFFSET, REG_FIS_SIZE, RECEIVED_FIS_SIZE, SECTOR_SIZE, cmd_table_offset,
};
use crate::config::{CompletionPolicy, PortConfig};
use crate::engine::{CommandEngine, EngineState, EngineWait, spin_until};
use crate::error::{AhciError, LayoutError, ReceivedFis, RequestError, TaskFileError};
use crate::prdt::{PrdtList, build_prdt};
use crate::regs::{self, AhciPortRegs, PortIe, PortIs};
use crate::snapshot::PortSnapshot;

/// Mask of the command slots this driver uses.
const SLOT_MASK: u32 = (1 << NUM_CMD_SLOTS) - 1;

/// Required alignment of a PRDT data base address (DBA bit 0 is reserved).
const DATA_ALIGN: u64 = 2;

/// Returns the lowest slot whose bit is clear in both PxSACT and PxCI.
#[must_use]
pub fn find_free_slot(sact: u32, ci: u32) -> Option<u8> {
    let free = !(sact | ci) & SLOT_MASK;
    if free == 0 {
        None
    } else {
        Some(free.trailing_zeros() as u8)
    }
}

/// Outcome of a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCompletion {
    /// Slot the command ran in.
    pub slot: u8,
    /// PRDBC as written back by the HBA.
    pub bytes_transferred: u32,
}

/// Per-port AHCI state.
pub struct AhciPort<B> {
    /// Typed register block for this port.
    regs: AhciPortRegs<B>,
    /// Command list, received FIS and command tables.
    region: DmaRegion,
    config: PortConfig,
    /// Whether the HBA can reach memory above 4 GiB.
    supports_64bit: bool,
}

impl<B: RegisterBus> AhciPort<B> {
    /// Initializes a port: stops the engine, installs and zeroes the command
    /// list, received-FIS area and eight command tables inside `region`, then
    /// restarts the engine.
    ///
    /// `region` must be at least 3328 bytes, 1 KiB aligned, and below 4 GiB
    /// when `supports_64bit` is false.
    pub fn initialize(
        regs: AhciPortRegs<B>,
        region: DmaRegion,
        config: PortConfig,
        supports_64bit: bool,
    ) -> Result<Self, AhciError> {
        check_region(&region, supports_64bit)?;

        let port = Self {
            regs,
            region,
            config,
            supports_64bit,
        };
        port.setup()?;
        Ok(port)
    }

    /// Runs the initialization sequence again on the same memory.
    ///
    /// Needed after a timed-out command, which leaves the port undefined.
    pub fn reinitialize(&mut self) -> Result<(), AhciError> {
        self.setup()
    }

    fn setup(&self) -> Result<(), AhciError> {
        ddebug!(
            "AHCI: port registers before init:\n{}",
            PortSnapshot::capture(&self.regs)
        );

        self.engine().stop()?;

        let region = &self.region;

        let clb = region.phys_at(CLB_OFFSET);
        self.regs.set_clb(clb.low_u32());
        self.regs.set_clbu(clb.high_u32());
        region.zero(self.command_list(), CMD_LIST_SIZE);

        let fb = region.phys_at(FB_OFFSET);
        self.regs.set_fb(fb.low_u32());
        self.regs.set_fbu(fb.high_u32());
        region.zero(self.received_fis(), RECEIVED_FIS_SIZE);

        let clb = self.command_list();
        for slot in 0..NUM_CMD_SLOTS {
            let table = region.phys_at(cmd_table_offset(slot));
            let mut header = CommandHeader::default();
            header.set_prdtl(PRDT_CAPACITY as u16);
            header.set_ctba(table);
            header.write_to(region, clb + (slot * CMD_HEADER_SIZE) as u64);
            region.zero(table, CMD_TABLE_SIZE);
        }
        dtrace!(
            "AHCI: clb={} fb={} tables={}",
            clb,
            self.received_fis(),
            region.phys_at(cmd_table_offset(0))
        );

        // Clear stale errors; completion is polled, so no interrupts.
        self.clear_status();
        self.regs.set_ie(PortIe::empty());

        self.engine().start()
    }

    /// Returns the command-engine state.
    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        self.engine().state()
    }

    /// Returns this port's configuration.
    #[must_use]
    pub fn config(&self) -> PortConfig {
        self.config
    }

    /// Returns the port's register block.
    #[must_use]
    pub fn regs(&self) -> &AhciPortRegs<B> {
        &self.regs
    }

    /// Returns a register snapshot for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> PortSnapshot {
        PortSnapshot::capture(&self.regs)
    }

    /// Returns the lowest command slot free in both PxSACT and PxCI.
    #[must_use]
    pub fn find_free_slot(&self) -> Option<u8> {
        find_free_slot(self.regs.sact(), self.regs.ci())
    }

    /// Reads `count` sectors starting at `lba` into `dest` and waits for the
    /// device, polling PxCI.
    ///
    /// A read may describe at most 64 sectors (eight 4 KiB PRDT entries).
    ///
    /// On [`AhciError::TaskFileError`] the engine has already been stopped,
    /// the error status cleared and the engine restarted, so the failed slot
    /// is free again. If that restart fails, [`engine_state`](Self::engine_state)
    /// no longer reports `Running` and [`reinitialize`](Self::reinitialize)
    /// is required.
    ///
    /// On [`AhciError::DeviceUnresponsive`] the command is still outstanding
    /// and the port must be re-initialized before further use.
    pub fn read_sectors(
        &mut self,
        lba: u64,
        count: u16,
        dest: &DmaRegion,
    ) -> Result<ReadCompletion, AhciError> {
        let prdt = self.check_request(lba, count, dest)?;

        self.regs.clear_is(PortIs::from_bits_retain(u32::MAX));

        let slot = self.find_free_slot().ok_or(AhciError::NoFreeSlot)?;
        dtrace!("AHCI: read lba={:#x} count={} slot={}", lba, count, slot);

        let table = self.prepare_command(slot, &prdt, &FisRegH2d::read_dma_ext(lba, count));

        // Command memory must be visible to the HBA before the doorbell.
        fence(Ordering::SeqCst);
        self.regs.set_ci(1 << slot);

        self.wait_for_completion(slot)?;
        fence(Ordering::SeqCst);

        let header = CommandHeader::read_from(&self.region, self.header_phys(slot));
        let expected = u32::from(count) * SECTOR_SIZE as u32;
        if header.prdbc != expected {
            dwarn!(
                "AHCI: slot {} transferred {} bytes, expected {} (table {})",
                slot,
                header.prdbc,
                expected,
                table
            );
        }

        Ok(ReadCompletion {
            slot,
            bytes_transferred: header.prdbc,
        })
    }

    fn check_request(&self, lba: u64, count: u16, dest: &DmaRegion) -> Result<PrdtList, AhciError> {
        if count == 0 {
            return Err(RequestError::ZeroSectors.into());
        }
        if count > MAX_SECTORS_PER_COMMAND {
            return Err(RequestError::TooManySectors {
                requested: count,
                max: MAX_SECTORS_PER_COMMAND,
            }
            .into());
        }
        if lba.saturating_add(u64::from(count)) > LBA48_LIMIT {
            return Err(RequestError::LbaOutOfRange { lba }.into());
        }

        let bytes = usize::from(count) * SECTOR_SIZE;
        if dest.len() < bytes {
            return Err(RequestError::BufferTooSmall {
                required: bytes,
                actual: dest.len(),
            }
            .into());
        }

        let phys = dest.phys_base();
        if !phys.is_aligned(DATA_ALIGN) {
            return Err(LayoutError::Misaligned {
                required: DATA_ALIGN,
                phys,
            }
            .into());
        }
        check_reachable(phys, bytes, self.supports_64bit)?;

        build_prdt(phys, count).ok_or_else(|| {
            RequestError::TooManySectors {
                requested: count,
                max: MAX_SECTORS_PER_COMMAND,
            }
            .into()
        })
    }

    /// Fills slot `slot`'s header, PRDT and command FIS. Returns the table address.
    fn prepare_command(&self, slot: u8, prdt: &PrdtList, fis: &FisRegH2d) -> PhysAddr {
        let region = &self.region;
        let header_phys = self.header_phys(slot);

        let mut header = CommandHeader::read_from(region, header_phys);
        header.set_cfl(CMD_FIS_LEN_DWORDS);
        header.set_write(false);
        header.set_prdtl(prdt.len() as u16);
        header.prdbc = 0;
        header.write_to(region, header_phys);

        let table = header.ctba();
        region.zero(table, PRDT_OFFSET + prdt.len() * PRDT_ENTRY_SIZE);

        for (i, entry) in prdt.entries().iter().enumerate() {
            entry.write_to(region, table + (PRDT_OFFSET + i * PRDT_ENTRY_SIZE) as u64);
            dtrace!(
                "AHCI: prdt[{}] dba={} bytes={}",
                i,
                entry.address(),
                entry.byte_count()
            );
        }

        region.write_bytes(table + CMD_FIS_OFFSET as u64, &fis.to_bytes());
        table
    }

    fn wait_for_completion(&self, slot: u8) -> Result<(), AhciError> {
        let bit = 1u32 << slot;
        let abort = self.config.completion == CompletionPolicy::AbortOnError;
        let mut failed = false;

        let finished = spin_until(self.config.spin_limit, || {
            if self.regs.is().contains(PortIs::TFES) {
                failed = true;
                if abort {
                    return true;
                }
            }
            self.regs.ci() & bit == 0
        });

        if failed || self.regs.is().contains(PortIs::TFES) {
            let err = self.task_file_error(slot);
            self.restart_after_error();
            return Err(AhciError::TaskFileError(err));
        }
        if !finished {
            derror!(
                "AHCI: slot {} did not complete:\n{}",
                slot,
                PortSnapshot::capture(&self.regs)
            );
            return Err(AhciError::DeviceUnresponsive {
                wait: EngineWait::CommandCompletion,
            });
        }
        Ok(())
    }

    fn task_file_error(&self, slot: u8) -> TaskFileError {
        let snapshot = PortSnapshot::capture(&self.regs);
        derror!("AHCI: task file error on slot {}:\n{}", slot, snapshot);

        let received = if PortIs::from_bits_retain(snapshot.is).contains(PortIs::DHRS) {
            self.read_d2h()
        } else {
            ReceivedFis::NotReceived
        };

        TaskFileError {
            slot,
            status: regs::tfd_status(snapshot.tfd),
            error: regs::tfd_error(snapshot.tfd),
            snapshot,
            received,
        }
    }

    /// Cycles PxCMD.ST after TFES. The HBA halts command processing on a
    /// task-file error and only clears PxCI for the failed slot when stopped.
    fn restart_after_error(&self) {
        let restarted = self.engine().stop().and_then(|()| {
            self.clear_status();
            self.engine().start()
        });
        match restarted {
            Ok(()) => ddebug!("AHCI: engine restarted after task file error"),
            Err(err) => derror!("AHCI: engine restart after task file error failed: {}", err),
        }
    }

    /// Clears every PxSERR and PxIS bit.
    fn clear_status(&self) {
        self.regs.clear_serr(u32::MAX);
        self.regs.clear_is(PortIs::from_bits_retain(u32::MAX));
    }

    /// Reads the D2H Register FIS posted in the received-FIS area.
    fn read_d2h(&self) -> ReceivedFis {
        let mut raw = [0u8; REG_FIS_SIZE];
        self.region
            .read_bytes(self.received_fis() + D2H_FIS_OFFSET as u64, &mut raw);
        dwarn!("AHCI: D2H FIS {:02x?}", raw);

        let fis = FisRegD2h::from_bytes(&raw);
        if fis.is_valid() {
            ReceivedFis::DeviceToHost(fis)
        } else {
            dwarn!("AHCI: received FIS has type {:#04x}, expected D2H", fis.fis_type);
            ReceivedFis::CorruptReceivedFis {
                fis_type: fis.fis_type,
            }
        }
    }

    fn engine(&self) -> CommandEngine<'_, B> {
        CommandEngine::new(&self.regs, self.config.spin_limit)
    }

    /// Command list base as programmed in PxCLB/PxCLBU.
    fn command_list(&self) -> PhysAddr {
        PhysAddr::from_halves(self.regs.clb(), self.regs.clbu())
    }

    /// Received-FIS base as programmed in PxFB/PxFBU.
    fn received_fis(&self) -> PhysAddr {
        PhysAddr::from_halves(self.regs.fb(), self.regs.fbu())
    }

    fn header_phys(&self, slot: u8) -> PhysAddr {
        self.command_list() + (usize::from(slot) * CMD_HEADER_SIZE) as u64
    }
}

impl<B> fmt::Debug for AhciPort<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AhciPort")
            .field("region", &self.region)
            .field("config", &self.config)
            .field("supports_64bit", &self.supports_64bit)
            .finish_non_exhaustive()
    }
}

/// Validates that `region` can hold a port's command structures.
fn check_region(region: &DmaRegion, supports_64bit: bool) -> Result<(), LayoutError> {
    if region.len() < PORT_REGION_SIZE {
        return Err(LayoutError::RegionTooSmall {
            required: PORT_REGION_SIZE,
            actual: region.len(),
        });
    }
    let phys = region.phys_base();
    if !phys.is_aligned(CMD_LIST_ALIGN) {
        return Err(LayoutError::Misaligned {
            required: CMD_LIST_ALIGN,
            phys,
        });
    }
    check_reachable(phys, PORT_REGION_SIZE, supports_64bit)
}

/// Fails if `[phys, phys + len)` is above 4 GiB on a 32-bit-only HBA.
fn check_reachable(phys: PhysAddr, len: usize, supports_64bit: bool) -> Result<(), LayoutError> {
    if supports_64bit {
        return Ok(());
    }
    let last = phys + (len as u64 - 1);
    if last.fits_in_32_bits() {
        Ok(())
    } else {
        Err(LayoutError::AddressAbove4GiB { phys })
    }
}
