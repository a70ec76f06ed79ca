//! Host front end for the polled AHCI driver.
//!
//! Usage:
//!   disktest scan                          - Probe every implemented port
//!   disktest read --lba N --count N        - Read sectors and verify them
//!   disktest read --lba N --hexdump        - Also dump the data read
//!
//! The controller is the software HBA from `disktest-sim`, laid out by the
//! `[sim]` section of `disktest.toml`.

mod config;
mod controller;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use disktest_ahci::command::SECTOR_SIZE;
use disktest_sim::SimDisk;

use crate::config::Config;
use crate::controller::Controller;

#[derive(Parser)]
#[command(name = "disktest")]
#[command(about = "Polled AHCI driver test harness")]
struct Cli {
    /// Configuration file (default: ./disktest.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (repeat for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Override [driver] spin_limit
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    spin_limit: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the device on every implemented port
    Scan,

    /// Read sectors from a port and check them against the disk image
    Read {
        /// First sector
        #[arg(long)]
        lba: u64,

        /// Number of sectors (1-64)
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u16,

        /// Port to read from (default: first SATA port)
        #[arg(short, long)]
        port: Option<u8>,

        /// Print the data as a hex dump
        #[arg(long)]
        hexdump: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(limit) = cli.spin_limit {
        config.driver.spin_limit = limit;
    }
    logging::init(config.log.level.raised(cli.verbose).into());

    let controller = Controller::build(&config.sim);
    match cli.command {
        Commands::Scan => scan(&controller),
        Commands::Read {
            lba,
            count,
            port,
            hexdump,
        } => read(&controller, &config, lba, count, port, hexdump),
    }
}

fn scan(controller: &Controller) -> Result<()> {
    let hba = controller.hba();
    let scan = hba.probe_ports();
    println!(
        "AHCI {}, {} command slots, 64-bit addressing: {}",
        hba.version(),
        hba.num_cmd_slots(),
        if hba.supports_64bit() { "yes" } else { "no" }
    );
    println!("port  device");
    for (port, kind) in scan.iter() {
        println!("{port:>4}  {kind}");
    }
    Ok(())
}

fn read(
    controller: &Controller,
    config: &Config,
    lba: u64,
    count: u16,
    port: Option<u8>,
    hexdump: bool,
) -> Result<()> {
    let port = match port {
        Some(port) => port,
        None => controller
            .hba()
            .probe_ports()
            .first_ata()
            .context("No SATA device found")?,
    };

    let mut ahci = controller
        .init_port(port, config.port_config())
        .with_context(|| format!("Failed to initialize port {port}"))?;

    let dest = controller.buffer(usize::from(count) * SECTOR_SIZE);
    let done = ahci
        .read_sectors(lba, count, &dest)
        .with_context(|| format!("Failed to read {count} sectors at LBA {lba} on port {port}"))?;
    println!(
        "port {port}: read {} bytes at LBA {lba} (slot {})",
        done.bytes_transferred, done.slot
    );

    let mut data = vec![0u8; usize::from(count) * SECTOR_SIZE];
    dest.copy_to_slice(&mut data);
    verify(lba, &data)?;
    println!("verified {count} sectors");

    if hexdump {
        print_hexdump(lba, &data);
    }
    Ok(())
}

/// Checks each sector against the pattern the simulated drive is filled with.
fn verify(lba: u64, data: &[u8]) -> Result<()> {
    for (sector, actual) in (lba..).zip(data.chunks_exact(SECTOR_SIZE)) {
        if actual != SimDisk::pattern(sector) {
            anyhow::bail!("Sector {sector} does not match the disk image");
        }
    }
    Ok(())
}

fn print_hexdump(lba: u64, data: &[u8]) {
    let base = lba * SECTOR_SIZE as u64;
    for (row, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        println!("{:010x}  {:<47}  |{ascii}|", base + row as u64 * 16, hex.join(" "));
    }
}
