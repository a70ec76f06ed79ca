//! Simulated AHCI host bus adapter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use disktest_mmio::RegisterBus;

use crate::disk::{SECTOR_SIZE, SimDisk};
use crate::memory::SimMemory;

const HBA_REG_CAP: u64 = 0x00;
const HBA_REG_GHC: u64 = 0x04;
const HBA_REG_IS: u64 = 0x08;
const HBA_REG_PI: u64 = 0x0C;
const HBA_REG_VS: u64 = 0x10;

const PORT_BASE: u64 = 0x100;
const PORT_STRIDE: u64 = 0x80;
const NUM_PORTS: usize = 32;

const PORT_REG_CLB: u64 = 0x00;
const PORT_REG_CLBU: u64 = 0x04;
const PORT_REG_FB: u64 = 0x08;
const PORT_REG_FBU: u64 = 0x0C;
const PORT_REG_IS: u64 = 0x10;
const PORT_REG_IE: u64 = 0x14;
const PORT_REG_CMD: u64 = 0x18;
const PORT_REG_TFD: u64 = 0x20;
const PORT_REG_SIG: u64 = 0x24;
const PORT_REG_SSTS: u64 = 0x28;
const PORT_REG_SCTL: u64 = 0x2C;
const PORT_REG_SERR: u64 = 0x30;
const PORT_REG_SACT: u64 = 0x34;
const PORT_REG_CI: u64 = 0x38;
const PORT_REG_SNTF: u64 = 0x3C;
const PORT_REG_FBS: u64 = 0x40;

const CAP_S64A: u32 = 1 << 31;
/// NCS = 7 (eight command slots).
const CAP_NCS_8: u32 = 7 << 8;
const GHC_AE: u32 = 1 << 31;
const GHC_IE: u32 = 1 << 1;
const AHCI_VERSION_1_3: u32 = 0x0001_0300;

const PORT_CMD_ST: u32 = 1 << 0;
const PORT_CMD_FRE: u32 = 1 << 4;
const PORT_CMD_FR: u32 = 1 << 14;
const PORT_CMD_CR: u32 = 1 << 15;

const PORT_IS_DHRS: u32 = 1 << 0;
const PORT_IS_TFES: u32 = 1 << 30;

/// DET=3 (present, phy up), SPD=1 (Gen1), IPM=1 (active).
const SSTS_LINK_UP: u32 = 0x113;

const ATA_STATUS_ERR: u8 = 0x01;
const ATA_STATUS_DSC: u8 = 0x10;
const ATA_STATUS_DRDY: u8 = 0x40;
const ATA_ERROR_ABRT: u8 = 0x04;
const ATA_ERROR_IDNF: u8 = 0x10;

const ATA_CMD_READ_DMA: u8 = 0xC8;
const ATA_CMD_READ_DMA_EXT: u8 = 0x25;

const FIS_TYPE_REG_H2D: u8 = 0x27;
const FIS_TYPE_REG_D2H: u8 = 0x34;
const D2H_OFFSET: u64 = 0x40;

/// Signature of an ATA drive.
const SIG_ATA: u32 = 0x0000_0101;

/// A device attached to a simulated port.
#[derive(Debug, Clone)]
pub struct SimDevice {
    /// Value reported in PxSIG.
    pub signature: u32,
    /// Value reported in PxSSTS.
    pub ssts: u32,
    /// Media; `None` fails every read.
    pub disk: Option<SimDisk>,
}

impl SimDevice {
    /// An ATA drive with an active link.
    #[must_use]
    pub fn sata(disk: SimDisk) -> Self {
        Self {
            signature: SIG_ATA,
            ssts: SSTS_LINK_UP,
            disk: Some(disk),
        }
    }

    /// A device with an active link and the given signature but no media.
    #[must_use]
    pub fn with_signature(signature: u32) -> Self {
        Self {
            signature,
            ssts: SSTS_LINK_UP,
            disk: None,
        }
    }
}

/// An injected command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFault {
    /// Only commands whose range covers this LBA fail; `None` fails all.
    pub lba: Option<u64>,
    /// ATA status byte reported (ERR is always added).
    pub status: u8,
    /// ATA error byte reported.
    pub error: u8,
    /// Post a D2H FIS and set PxIS.DHRS.
    pub post_d2h: bool,
    /// Type tag written into the posted D2H FIS.
    pub d2h_type: u8,
    /// Clear the slot's PxCI bit when failing.
    pub clear_ci: bool,
}

impl Default for SimFault {
    fn default() -> Self {
        Self {
            lba: None,
            status: ATA_STATUS_DRDY,
            error: ATA_ERROR_ABRT,
            post_d2h: true,
            d2h_type: FIS_TYPE_REG_D2H,
            clear_ci: true,
        }
    }
}

/// One software write to PxCMD, as observed by the HBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdWrite {
    /// Value written.
    pub value: u32,
    /// PxCMD.CR at the time of the write.
    pub cr_was_set: bool,
    /// PxCMD.FR at the time of the write.
    pub fr_was_set: bool,
}

#[derive(Debug, Default)]
struct PortState {
    clb: u64,
    fb: u64,
    is: u32,
    ie: u32,
    cmd: u32,
    tfd: u32,
    sig: u32,
    ssts: u32,
    sctl: u32,
    serr: u32,
    sact: u32,
    ci: u32,
    sntf: u32,
    fbs: u32,

    device: Option<SimDevice>,
    fault: Option<SimFault>,

    /// PxCI reads before an issued command executes.
    completion_delay: u32,
    /// Slots waiting out the completion delay, with reads left.
    pending: Vec<(u8, u32)>,
    /// PxCMD reads CR stays set after ST clears.
    cr_stop_delay: u32,
    cr_stop_left: u32,
    /// CR and FR never follow ST/FRE.
    stuck: bool,
    /// A task-file error stopped command processing until ST is cleared.
    halted: bool,

    cmd_log: Vec<CmdWrite>,
    executed: Vec<(u64, u16)>,
}

impl PortState {
    fn running(&self) -> bool {
        self.cmd & PORT_CMD_ST != 0 && self.cmd & PORT_CMD_FRE != 0
    }

    fn write_cmd(&mut self, value: u32) {
        self.cmd_log.push(CmdWrite {
            value,
            cr_was_set: self.cmd & PORT_CMD_CR != 0,
            fr_was_set: self.cmd & PORT_CMD_FR != 0,
        });

        let status = self.cmd & (PORT_CMD_FR | PORT_CMD_CR);
        self.cmd = (value & !(PORT_CMD_FR | PORT_CMD_CR)) | status;
        if self.cmd & PORT_CMD_ST == 0 {
            self.halted = false;
        }
        if self.stuck {
            return;
        }

        if self.cmd & PORT_CMD_FRE != 0 {
            self.cmd |= PORT_CMD_FR;
        } else {
            self.cmd &= !PORT_CMD_FR;
        }

        if self.cmd & PORT_CMD_ST != 0 {
            self.cmd |= PORT_CMD_CR;
        } else if self.cmd & PORT_CMD_CR != 0 {
            self.cr_stop_left = self.cr_stop_delay;
            if self.cr_stop_left == 0 {
                self.cmd &= !PORT_CMD_CR;
            }
            // Stopping the engine drops outstanding commands.
            self.ci = 0;
            self.pending.clear();
        }
    }

    fn read_cmd(&mut self) -> u32 {
        let value = self.cmd;
        if !self.stuck && self.cmd & (PORT_CMD_ST | PORT_CMD_CR) == PORT_CMD_CR {
            self.cr_stop_left = self.cr_stop_left.saturating_sub(1);
            if self.cr_stop_left == 0 {
                self.cmd &= !PORT_CMD_CR;
            }
        }
        value
    }
}

struct HbaState {
    cap: u32,
    ghc: u32,
    pi: u32,
    vs: u32,
    ports: Vec<PortState>,
    memory: SimMemory,
}

/// A shared handle to a simulated HBA; clones observe the same state.
///
/// As a [`RegisterBus`] its offset 0 is the ABAR unless narrowed with
/// [`RegisterBus::window`].
#[derive(Clone)]
pub struct SimHba {
    state: Arc<Mutex<HbaState>>,
    base: u64,
}

impl SimHba {
    /// Creates an HBA with 64-bit addressing, eight slots and no ports.
    #[must_use]
    pub fn new(memory: SimMemory) -> Self {
        let ports = (0..NUM_PORTS).map(|_| PortState::default()).collect();
        Self {
            state: Arc::new(Mutex::new(HbaState {
                cap: CAP_S64A | CAP_NCS_8,
                ghc: GHC_AE,
                pi: 0,
                vs: AHCI_VERSION_1_3,
                ports,
                memory,
            })),
            base: 0,
        }
    }

    /// Returns the memory the HBA masters.
    #[must_use]
    pub fn memory(&self) -> SimMemory {
        self.lock().memory.clone()
    }

    /// Sets or clears CAP.S64A.
    pub fn set_supports_64bit(&self, supported: bool) {
        let mut state = self.lock();
        if supported {
            state.cap |= CAP_S64A;
        } else {
            state.cap &= !CAP_S64A;
        }
    }

    /// Marks `port` implemented and attaches `device`.
    pub fn attach(&self, port: u8, device: SimDevice) {
        self.with_port(port, |p| {
            p.sig = device.signature;
            p.ssts = device.ssts;
            p.tfd = u32::from(ATA_STATUS_DRDY | ATA_STATUS_DSC);
            p.device = Some(device);
        });
        let mut state = self.lock();
        state.pi |= 1 << port;
        let np = 31 - state.pi.leading_zeros();
        state.cap = (state.cap & !0x1F) | np;
    }

    /// Marks `port` implemented with nothing attached.
    pub fn add_empty_port(&self, port: u8) {
        self.lock().pi |= 1 << port;
    }

    /// Sets the fault applied to subsequent commands on `port`.
    pub fn inject_fault(&self, port: u8, fault: SimFault) {
        self.with_port(port, |p| p.fault = Some(fault));
    }

    /// Removes any injected fault.
    pub fn clear_fault(&self, port: u8) {
        self.with_port(port, |p| p.fault = None);
    }

    /// Delays command execution by `reads` PxCI reads. `u32::MAX` never completes.
    pub fn set_completion_delay(&self, port: u8, reads: u32) {
        self.with_port(port, |p| p.completion_delay = reads);
    }

    /// Keeps CR set for `reads` PxCMD reads after ST clears.
    pub fn set_cr_stop_delay(&self, port: u8, reads: u32) {
        self.with_port(port, |p| p.cr_stop_delay = reads);
    }

    /// Freezes CR/FR at their current values (or, with `stuck`, sets CR).
    pub fn set_stuck_engine(&self, port: u8, stuck: bool) {
        self.with_port(port, |p| {
            p.stuck = stuck;
            if stuck {
                p.cmd |= PORT_CMD_CR;
            }
        });
    }

    /// Places the port as firmware might leave it: engine running, CR/FR set.
    pub fn set_engine_running(&self, port: u8) {
        self.with_port(port, |p| {
            p.cmd |= PORT_CMD_ST | PORT_CMD_FRE | PORT_CMD_CR | PORT_CMD_FR;
        });
    }

    /// Raises PxIS bits, as if events had been posted.
    pub fn raise_interrupt_status(&self, port: u8, bits: u32) {
        self.with_port(port, |p| p.is |= bits);
    }

    /// Sets PxSACT directly, as if native commands were outstanding.
    pub fn set_sact(&self, port: u8, sact: u32) {
        self.with_port(port, |p| p.sact = sact);
    }

    /// Returns every PxCMD write so far.
    #[must_use]
    pub fn cmd_log(&self, port: u8) -> Vec<CmdWrite> {
        self.with_port(port, |p| p.cmd_log.clone())
    }

    /// Returns `(lba, count)` of every command executed successfully.
    #[must_use]
    pub fn executed(&self, port: u8) -> Vec<(u64, u16)> {
        self.with_port(port, |p| p.executed.clone())
    }

    /// Returns `(PxCMD, PxIS, PxCI)` without read side effects.
    #[must_use]
    pub fn peek(&self, port: u8) -> (u32, u32, u32) {
        self.with_port(port, |p| (p.cmd, p.is, p.ci))
    }

    /// Returns `(PxCLB, PxFB)` as programmed.
    #[must_use]
    pub fn bases(&self, port: u8) -> (u64, u64) {
        self.with_port(port, |p| (p.clb, p.fb))
    }

    fn with_port<R>(&self, port: u8, f: impl FnOnce(&mut PortState) -> R) -> R {
        f(&mut self.lock().ports[usize::from(port)])
    }

    fn lock(&self) -> MutexGuard<'_, HbaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HbaState {
    fn read(&mut self, offset: u64) -> u32 {
        match offset {
            HBA_REG_CAP => self.cap,
            HBA_REG_GHC => self.ghc,
            HBA_REG_IS => self.hba_is(),
            HBA_REG_PI => self.pi,
            HBA_REG_VS => self.vs,
            _ if offset >= PORT_BASE => self.read_port(offset),
            _ => 0,
        }
    }

    fn write(&mut self, offset: u64, value: u32) {
        match offset {
            HBA_REG_GHC => self.ghc = value & (GHC_AE | GHC_IE),
            HBA_REG_IS => {
                for (idx, port) in self.ports.iter_mut().enumerate() {
                    if value & (1 << idx) != 0 {
                        port.is = 0;
                    }
                }
            }
            _ if offset >= PORT_BASE => self.write_port(offset, value),
            _ => {}
        }
    }

    fn hba_is(&self) -> u32 {
        self.ports
            .iter()
            .enumerate()
            .filter(|(_, port)| port.is != 0)
            .fold(0, |acc, (idx, _)| acc | (1 << idx))
    }

    fn read_port(&mut self, offset: u64) -> u32 {
        let Some((idx, reg)) = decode_port_offset(offset) else {
            return 0;
        };
        if reg == PORT_REG_CI {
            self.tick(idx);
        }
        let port = &mut self.ports[idx];
        match reg {
            PORT_REG_CLB => port.clb as u32,
            PORT_REG_CLBU => (port.clb >> 32) as u32,
            PORT_REG_FB => port.fb as u32,
            PORT_REG_FBU => (port.fb >> 32) as u32,
            PORT_REG_IS => port.is,
            PORT_REG_IE => port.ie,
            PORT_REG_CMD => port.read_cmd(),
            PORT_REG_TFD => port.tfd,
            PORT_REG_SIG => port.sig,
            PORT_REG_SSTS => port.ssts,
            PORT_REG_SCTL => port.sctl,
            PORT_REG_SERR => port.serr,
            PORT_REG_SACT => port.sact,
            PORT_REG_CI => port.ci,
            PORT_REG_SNTF => port.sntf,
            PORT_REG_FBS => port.fbs,
            _ => 0,
        }
    }

    fn write_port(&mut self, offset: u64, value: u32) {
        let Some((idx, reg)) = decode_port_offset(offset) else {
            return;
        };
        let port = &mut self.ports[idx];
        match reg {
            PORT_REG_CLB => port.clb = (port.clb & !0xFFFF_FFFF) | u64::from(value),
            PORT_REG_CLBU => port.clb = (port.clb & 0xFFFF_FFFF) | (u64::from(value) << 32),
            PORT_REG_FB => port.fb = (port.fb & !0xFFFF_FFFF) | u64::from(value),
            PORT_REG_FBU => port.fb = (port.fb & 0xFFFF_FFFF) | (u64::from(value) << 32),
            PORT_REG_IS => port.is &= !value,
            PORT_REG_IE => port.ie = value,
            PORT_REG_CMD => port.write_cmd(value),
            PORT_REG_SCTL => port.sctl = value,
            PORT_REG_SERR => port.serr &= !value,
            PORT_REG_SACT => port.sact |= value,
            PORT_REG_CI => self.issue(idx, value),
            PORT_REG_SNTF => port.sntf &= !value,
            PORT_REG_FBS => port.fbs = value,
            _ => {}
        }
    }

    /// Handles a PxCI write: bits set to 1 are issued, zeros are ignored.
    fn issue(&mut self, idx: usize, value: u32) {
        let port = &mut self.ports[idx];
        if !port.running() {
            return;
        }
        let new = value & !port.ci;
        port.ci |= new;
        if port.halted {
            return;
        }
        let delay = port.completion_delay;
        for slot in (0..32u8).filter(|slot| new & (1 << slot) != 0) {
            if delay == 0 {
                if self.ports[idx].halted {
                    break;
                }
                self.execute(idx, slot);
            } else {
                self.ports[idx].pending.push((slot, delay));
            }
        }
    }

    /// Counts one PxCI read against every pending command.
    fn tick(&mut self, idx: usize) {
        if self.ports[idx].halted {
            return;
        }
        let mut due = Vec::new();
        self.ports[idx].pending.retain_mut(|(slot, left)| {
            *left = left.saturating_sub(1);
            if *left == 0 {
                due.push(*slot);
                false
            } else {
                true
            }
        });
        for slot in due {
            if self.ports[idx].halted {
                break;
            }
            self.execute(idx, slot);
        }
    }

    fn execute(&mut self, idx: usize, slot: u8) {
        let memory = self.memory.clone();
        let port = &mut self.ports[idx];
        let bit = 1u32 << slot;

        let outcome = run_command(&memory, port, slot);
        match outcome {
            Ok((lba, count, bytes)) => {
                let status = ATA_STATUS_DRDY | ATA_STATUS_DSC;
                memory.write_u32(port.clb + u64::from(slot) * 32 + 4, bytes);
                port.tfd = u32::from(status);
                write_d2h(&memory, port.fb, FIS_TYPE_REG_D2H, status, 0);
                port.is |= PORT_IS_DHRS;
                port.ci &= !bit;
                port.executed.push((lba, count));
            }
            Err(fault) => {
                let status = fault.status | ATA_STATUS_ERR;
                port.tfd = u32::from(status) | (u32::from(fault.error) << 8);
                if fault.post_d2h {
                    write_d2h(&memory, port.fb, fault.d2h_type, status, fault.error);
                    port.is |= PORT_IS_DHRS;
                }
                port.is |= PORT_IS_TFES;
                port.halted = true;
                if fault.clear_ci {
                    port.ci &= !bit;
                }
            }
        }
    }
}

/// Reads and executes the command in `slot`. Returns `(lba, count, bytes)`.
fn run_command(
    memory: &SimMemory,
    port: &PortState,
    slot: u8,
) -> Result<(u64, u16, u32), SimFault> {
    let abort = SimFault::default();
    let header = port.clb + u64::from(slot) * 32;
    let dw0 = memory.read_u32(header).ok_or(abort)?;
    let ctba_lo = memory.read_u32(header + 8).ok_or(abort)?;
    let ctba_hi = memory.read_u32(header + 12).ok_or(abort)?;
    let ctba = u64::from(ctba_lo) | (u64::from(ctba_hi) << 32);
    let prdtl = (dw0 >> 16) as u16;

    let mut cfis = [0u8; 20];
    if !memory.read(ctba, &mut cfis) || cfis[0] != FIS_TYPE_REG_H2D {
        return Err(abort);
    }

    let (lba, count) = match cfis[2] {
        ATA_CMD_READ_DMA_EXT => {
            let lba = [cfis[4], cfis[5], cfis[6], cfis[8], cfis[9], cfis[10]]
                .iter()
                .enumerate()
                .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (8 * i)));
            let count = u16::from_le_bytes([cfis[12], cfis[13]]);
            (lba, count)
        }
        ATA_CMD_READ_DMA => {
            let lba = u64::from(cfis[4])
                | (u64::from(cfis[5]) << 8)
                | (u64::from(cfis[6]) << 16)
                | (u64::from(cfis[7] & 0x0F) << 24);
            (lba, u16::from(cfis[12]))
        }
        _ => return Err(abort),
    };
    let sectors = if count == 0 { 65536 } else { u64::from(count) };

    let hits = |fault: &SimFault| fault.lba.is_none_or(|bad| (lba..lba + sectors).contains(&bad));
    if let Some(fault) = port.fault.filter(hits) {
        return Err(fault);
    }

    let out_of_range = SimFault {
        error: ATA_ERROR_IDNF | ATA_ERROR_ABRT,
        ..abort
    };
    let data = port
        .device
        .as_ref()
        .and_then(|device| device.disk.as_ref())
        .and_then(|disk| disk.read(lba, sectors))
        .ok_or(out_of_range)?;

    let mut remaining = data;
    for i in 0..u64::from(prdtl) {
        if remaining.is_empty() {
            break;
        }
        let entry = ctba + 0x80 + i * 16;
        let dba_lo = memory.read_u32(entry).ok_or(abort)?;
        let dba_hi = memory.read_u32(entry + 4).ok_or(abort)?;
        let dbc = (memory.read_u32(entry + 12).ok_or(abort)? & 0x003F_FFFF) + 1;
        let dba = u64::from(dba_lo) | (u64::from(dba_hi) << 32);

        let chunk = remaining.len().min(dbc as usize);
        if !memory.write(dba, &remaining[..chunk]) {
            return Err(abort);
        }
        remaining = &remaining[chunk..];
    }
    if !remaining.is_empty() {
        return Err(abort);
    }

    Ok((lba, count, (sectors as usize * SECTOR_SIZE) as u32))
}

fn write_d2h(memory: &SimMemory, fb: u64, fis_type: u8, status: u8, error: u8) {
    let mut fis = [0u8; 20];
    fis[0] = fis_type;
    fis[1] = 1 << 6;
    fis[2] = status;
    fis[3] = error;
    memory.write(fb + D2H_OFFSET, &fis);
}

fn decode_port_offset(offset: u64) -> Option<(usize, u64)> {
    let idx = ((offset - PORT_BASE) / PORT_STRIDE) as usize;
    (idx < NUM_PORTS).then_some((idx, (offset - PORT_BASE) % PORT_STRIDE))
}

impl RegisterBus for SimHba {
    fn read_u32(&self, offset: u64) -> u32 {
        self.lock().read(self.base + offset)
    }

    fn write_u32(&self, offset: u64, value: u32) {
        self.lock().write(self.base + offset, value);
    }

    fn window(&self, offset: u64) -> Self {
        Self {
            state: Arc::clone(&self.state),
            base: self.base + offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_reg(port: u64, reg: u64) -> u64 {
        PORT_BASE + port * PORT_STRIDE + reg
    }

    #[test]
    fn attach_reports_device() {
        let hba = SimHba::new(SimMemory::new());
        hba.attach(2, SimDevice::sata(SimDisk::patterned(8)));
        assert_eq!(hba.read_u32(HBA_REG_PI), 0b100);
        assert_eq!(hba.read_u32(HBA_REG_CAP) & 0x1F, 2);
        assert_eq!(hba.read_u32(port_reg(2, PORT_REG_SIG)), SIG_ATA);
        let port = hba.window(port_reg(2, 0));
        assert_eq!(port.read_u32(PORT_REG_SSTS), SSTS_LINK_UP);
    }

    #[test]
    fn interrupt_status_is_write_one_to_clear() {
        let hba = SimHba::new(SimMemory::new());
        hba.with_port(0, |p| p.is = PORT_IS_DHRS | PORT_IS_TFES);
        hba.write_u32(port_reg(0, PORT_REG_IS), PORT_IS_DHRS);
        assert_eq!(hba.peek(0).1, PORT_IS_TFES);
        assert_eq!(hba.read_u32(HBA_REG_IS), 1);
    }

    #[test]
    fn running_bits_follow_control_bits() {
        let hba = SimHba::new(SimMemory::new());
        let cmd = port_reg(0, PORT_REG_CMD);
        hba.write_u32(cmd, PORT_CMD_FRE);
        assert_eq!(hba.read_u32(cmd), PORT_CMD_FRE | PORT_CMD_FR);
        hba.write_u32(cmd, PORT_CMD_FRE | PORT_CMD_ST);
        assert_eq!(
            hba.read_u32(cmd),
            PORT_CMD_FRE | PORT_CMD_FR | PORT_CMD_ST | PORT_CMD_CR
        );
        // Software cannot write the status bits.
        hba.write_u32(cmd, PORT_CMD_CR | PORT_CMD_FR);
        assert_eq!(hba.read_u32(cmd), 0);
    }

    #[test]
    fn command_list_stop_can_lag() {
        let hba = SimHba::new(SimMemory::new());
        hba.set_engine_running(0);
        hba.set_cr_stop_delay(0, 2);
        let cmd = port_reg(0, PORT_REG_CMD);
        hba.write_u32(cmd, PORT_CMD_FRE);
        assert_ne!(hba.read_u32(cmd) & PORT_CMD_CR, 0);
        assert_ne!(hba.read_u32(cmd) & PORT_CMD_CR, 0);
        assert_eq!(hba.read_u32(cmd) & PORT_CMD_CR, 0);
        assert!(hba.cmd_log(0)[0].cr_was_set);
    }

    #[test]
    fn stuck_engine_keeps_cr() {
        let hba = SimHba::new(SimMemory::new());
        hba.set_stuck_engine(0, true);
        let cmd = port_reg(0, PORT_REG_CMD);
        hba.write_u32(cmd, 0);
        for _ in 0..10 {
            assert_ne!(hba.read_u32(cmd) & PORT_CMD_CR, 0);
        }
    }

    #[test]
    fn task_file_error_halts_until_stop() {
        let hba = SimHba::new(SimMemory::new());
        hba.attach(0, SimDevice::sata(SimDisk::patterned(8)));
        hba.set_engine_running(0);
        let ci = port_reg(0, PORT_REG_CI);
        let is = port_reg(0, PORT_REG_IS);
        let cmd = port_reg(0, PORT_REG_CMD);

        // No command list is installed, so every command fails.
        hba.write_u32(ci, 0b1);
        assert_eq!(hba.read_u32(ci), 0);
        assert_ne!(hba.peek(0).1 & PORT_IS_TFES, 0);

        // Halted: a new slot is accepted but never processed.
        hba.write_u32(is, u32::MAX);
        hba.write_u32(ci, 0b10);
        assert_eq!(hba.read_u32(ci), 0b10);
        assert_eq!(hba.peek(0).1, 0);

        // Cycling ST drops it and resumes processing.
        hba.write_u32(cmd, PORT_CMD_FRE);
        assert_eq!(hba.read_u32(ci), 0);
        hba.write_u32(cmd, PORT_CMD_FRE | PORT_CMD_ST);
        hba.write_u32(ci, 0b1);
        assert_eq!(hba.read_u32(ci), 0);
        assert_ne!(hba.peek(0).1 & PORT_IS_TFES, 0);
    }

    #[test]
    fn issue_is_ignored_while_stopped() {
        let hba = SimHba::new(SimMemory::new());
        hba.attach(0, SimDevice::sata(SimDisk::patterned(8)));
        hba.write_u32(port_reg(0, PORT_REG_CI), 1);
        assert_eq!(hba.peek(0).2, 0);
    }
}
