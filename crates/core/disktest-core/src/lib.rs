//! Core library for disktest, providing the address, memory and logging
//! primitives shared by the register layer and the AHCI driver.

#![cfg_attr(not(test), no_std)]

pub mod addr;
pub mod dma;
pub mod log;
pub mod sync;
