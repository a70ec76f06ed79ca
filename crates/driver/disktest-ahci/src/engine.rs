//! Port command-engine control (PxCMD.ST / PxCMD.FRE).
//!
//! The engine has two states. Every transition waits on a hardware-driven
//! status bit (CR or FR), and every wait is bounded by the port's spin limit.

use core::fmt;

use disktest_core::{ddebug, dtrace};
use disktest_mmio::RegisterBus;

use crate::error::AhciError;
use crate::regs::{AhciPortRegs, PortCmd};

/// Command-engine state as seen in PxCMD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// ST and FRE clear; command list and FIS area may be reprogrammed.
    Stopped,
    /// ST and FRE set; the HBA processes PxCI.
    Running,
}

/// A bounded wait that can time out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineWait {
    /// PxCMD.CR to clear before starting the engine.
    CommandListIdle,
    /// PxCMD.FR to set after FRE was set.
    FisReceiveRunning,
    /// PxCMD.CR to clear after ST was cleared.
    CommandListStopped,
    /// PxCMD.FR to clear after FRE was cleared.
    FisReceiveStopped,
    /// PxCI bit of the issued slot to clear.
    CommandCompletion,
}

impl fmt::Display for EngineWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandListIdle => f.write_str("command list still running before start"),
            Self::FisReceiveRunning => f.write_str("FIS receive did not start"),
            Self::CommandListStopped => f.write_str("command list did not stop"),
            Self::FisReceiveStopped => f.write_str("FIS receive did not stop"),
            Self::CommandCompletion => f.write_str("command completion"),
        }
    }
}

/// Polls `done` up to `limit` times. Returns `true` once it holds.
pub(crate) fn spin_until(limit: u32, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..limit {
        if done() {
            return true;
        }
        core::hint::spin_loop();
    }
    false
}

/// Start/stop sequencing for one port's command engine.
pub struct CommandEngine<'a, B> {
    regs: &'a AhciPortRegs<B>,
    spin_limit: u32,
}

impl<'a, B: RegisterBus> CommandEngine<'a, B> {
    /// Creates an engine controller over `regs`.
    pub fn new(regs: &'a AhciPortRegs<B>, spin_limit: u32) -> Self {
        Self { regs, spin_limit }
    }

    /// Returns the state implied by PxCMD.ST and PxCMD.FRE.
    #[must_use]
    pub fn state(&self) -> EngineState {
        if self.regs.cmd().contains(PortCmd::ST | PortCmd::FRE) {
            EngineState::Running
        } else {
            EngineState::Stopped
        }
    }

    /// Starts the engine: waits for CR to clear, sets FRE, waits for FR, sets ST.
    pub fn start(&self) -> Result<(), AhciError> {
        self.wait(EngineWait::CommandListIdle, |cmd| !cmd.contains(PortCmd::CR))?;

        let cmd = self.regs.cmd();
        self.regs.set_cmd(cmd | PortCmd::FRE);
        self.wait(EngineWait::FisReceiveRunning, |cmd| cmd.contains(PortCmd::FR))?;

        let cmd = self.regs.cmd();
        self.regs.set_cmd(cmd | PortCmd::ST);
        ddebug!("AHCI: engine started (cmd={:#010x})", self.regs.cmd().bits());
        Ok(())
    }

    /// Stops the engine: clears ST, waits for CR, clears FRE, waits for FR.
    pub fn stop(&self) -> Result<(), AhciError> {
        let cmd = self.regs.cmd();

        // If already stopped, nothing to do.
        if !cmd.intersects(PortCmd::ST | PortCmd::FRE | PortCmd::CR | PortCmd::FR) {
            dtrace!("AHCI: engine already stopped");
            return Ok(());
        }

        self.regs.set_cmd(cmd - PortCmd::ST);
        self.wait(EngineWait::CommandListStopped, |cmd| !cmd.contains(PortCmd::CR))?;

        let cmd = self.regs.cmd();
        self.regs.set_cmd(cmd - PortCmd::FRE);
        self.wait(EngineWait::FisReceiveStopped, |cmd| !cmd.contains(PortCmd::FR))?;

        ddebug!("AHCI: engine stopped");
        Ok(())
    }

    fn wait(&self, wait: EngineWait, done: impl Fn(PortCmd) -> bool) -> Result<(), AhciError> {
        if spin_until(self.spin_limit, || done(self.regs.cmd())) {
            Ok(())
        } else {
            Err(AhciError::DeviceUnresponsive { wait })
        }
    }
}
