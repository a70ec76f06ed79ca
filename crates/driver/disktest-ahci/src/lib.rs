//! Minimal polled AHCI (Advanced Host Controller Interface) driver.
//!
//! Probes SATA ports on a memory-mapped host bus adapter, lays out one port's
//! command list, received-FIS area and command tables inside caller-supplied
//! physical memory, and issues DMA sector reads while polling for completion.
//!
//! Control flow: [`hba::AhciHba::probe_ports`] classifies each implemented
//! port; for a SATA/SATAPI port, [`port::AhciPort::initialize`] installs the
//! command structures and starts the command engine; each
//! [`port::AhciPort::read_sectors`] then allocates a slot, builds the command
//! and waits for the device. No interrupts are used.
//!
//! All waits are bounded by [`config::PortConfig::spin_limit`]. A command that
//! times out is not aborted; the port is left in an undefined state and must
//! be re-initialized.

#![cfg_attr(not(test), no_std)]

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod hba;
pub mod port;
pub mod prdt;
pub mod probe;
pub mod regs;
pub mod shared;
pub mod snapshot;

pub use config::{CompletionPolicy, PortConfig};
pub use error::AhciError;
pub use hba::{AhciHba, AhciVersion};
pub use port::{AhciPort, ReadCompletion};
pub use probe::DeviceKind;
pub use shared::SharedPort;
