//! Builds the simulated controller described by `[sim]`.

use anyhow::Result;
use disktest_ahci::command::{CMD_LIST_ALIGN, PORT_REGION_SIZE};
use disktest_ahci::{AhciHba, AhciPort, PortConfig};
use disktest_core::dma::DmaRegion;
use disktest_sim::{SimDevice, SimDisk, SimFault, SimHba, SimMemory};

use crate::config::SimSection;

/// First physical address used when `high_memory` is set.
const HIGH_MEMORY_BASE: u64 = 0x1_0000_0000;

/// Type tag written into the received FIS when `corrupt_fis` is set.
const CORRUPT_FIS_TYPE: u8 = 0x5F;

/// Data buffers are page aligned.
const BUFFER_ALIGN: u64 = 4096;

/// A simulated HBA, the memory it masters and the driver's view of it.
pub struct Controller {
    memory: SimMemory,
    hba: AhciHba<SimHba>,
}

impl Controller {
    /// Attaches one patterned drive per configured port and enables AHCI mode.
    pub fn build(sim: &SimSection) -> Self {
        let memory = if sim.high_memory {
            SimMemory::with_base(HIGH_MEMORY_BASE)
        } else {
            SimMemory::new()
        };

        let bus = SimHba::new(memory.clone());
        bus.set_supports_64bit(sim.supports_64bit);
        for &port in &sim.ports {
            let device = SimDevice {
                signature: sim.sata_signature,
                ..SimDevice::sata(SimDisk::patterned(sim.sectors))
            };
            bus.attach(port, device);
            if let Some(fault) = injected_fault(sim) {
                bus.inject_fault(port, fault);
            }
        }

        let hba = AhciHba::new(bus);
        hba.enable_ahci();
        Self { memory, hba }
    }

    /// The driver's HBA handle.
    pub fn hba(&self) -> &AhciHba<SimHba> {
        &self.hba
    }

    /// Allocates port memory and initializes `port`.
    pub fn init_port(&self, port: u8, config: PortConfig) -> Result<AhciPort<SimHba>> {
        let region = self.memory.alloc(PORT_REGION_SIZE, CMD_LIST_ALIGN);
        Ok(self.hba.init_port(port, region, config)?)
    }

    /// Allocates a zeroed data buffer of at least one byte.
    pub fn buffer(&self, len: usize) -> DmaRegion {
        self.memory.alloc(len.max(1), BUFFER_ALIGN)
    }
}

fn injected_fault(sim: &SimSection) -> Option<SimFault> {
    if sim.fault_lba.is_none() && !sim.corrupt_fis {
        return None;
    }
    let mut fault = SimFault {
        lba: sim.fault_lba,
        ..SimFault::default()
    };
    if sim.corrupt_fis {
        fault.d2h_type = CORRUPT_FIS_TYPE;
    }
    Some(fault)
}
