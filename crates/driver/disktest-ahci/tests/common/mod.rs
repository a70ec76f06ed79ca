//! Shared fixture: a simulated HBA with one drive on port 0.

#![allow(dead_code)]

use disktest_ahci::command::{CMD_LIST_ALIGN, PORT_REGION_SIZE};
use disktest_ahci::{AhciError, AhciHba, AhciPort, PortConfig};
use disktest_sim::{SimDevice, SimDisk, SimHba, SimMemory};

/// Port the drive is attached to.
pub const PORT: u8 = 0;

/// Spin limit small enough that timeouts are fast.
pub const SPIN_LIMIT: u32 = 2_000;

pub struct Rig {
    pub sim: SimHba,
    pub memory: SimMemory,
    pub hba: AhciHba<SimHba>,
}

impl Rig {
    /// One patterned SATA drive of `sectors` sectors on port 0.
    pub fn with_disk(sectors: u64) -> Self {
        Self::build(SimMemory::new(), true, sectors)
    }

    pub fn build(memory: SimMemory, supports_64bit: bool, sectors: u64) -> Self {
        let sim = SimHba::new(memory.clone());
        sim.set_supports_64bit(supports_64bit);
        sim.attach(PORT, SimDevice::sata(SimDisk::patterned(sectors)));
        let hba = AhciHba::new(sim.clone());
        Self { sim, memory, hba }
    }

    pub fn config() -> PortConfig {
        PortConfig::with_spin_limit(SPIN_LIMIT)
    }

    /// Initializes port 0 in a fresh, correctly laid out region.
    pub fn init(&self) -> Result<AhciPort<SimHba>, AhciError> {
        self.init_with(Self::config())
    }

    pub fn init_with(&self, config: PortConfig) -> Result<AhciPort<SimHba>, AhciError> {
        let region = self.memory.alloc(PORT_REGION_SIZE, CMD_LIST_ALIGN);
        self.hba.init_port(PORT, region, config)
    }

    /// Reads a little-endian dword from simulated physical memory.
    pub fn dword(&self, phys: u64) -> u32 {
        self.memory.read_u32(phys).unwrap()
    }
}
