#[macro_use]
extern crate log;

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::num::ParseIntError;
use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serial_core::Parity;
use simplelog::{Config, LevelFilter, SimpleLogger};
use structopt::StructOpt;

use stm32_uart_flasher::linux::LinuxProgrammer;
use stm32_uart_flasher::{format_uid, format_version, DeviceFlags, Error, Options, Profile, Segment};

type FlashError = Error<IoErrorKind>;

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "57600")]
    baud: usize,

    /// Disable parity, required by BlueNRG bootloaders
    #[structopt(long)]
    no_parity: bool,

    /// Switch to this baud rate with the Speed command once connected
    #[structopt(long)]
    speed: Option<u32>,

    /// Flash size (KiB) to assume for devices missing from the profile table
    #[structopt(long)]
    flash_kib: Option<u32>,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// Show device identity, memory layout and unique ID
    Info,
    /// Read memory to a file
    Read {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        #[structopt(parse(try_from_str = parse_u32))]
        length: u32,
        file: PathBuf,
    },
    /// Write a binary file to memory
    Write {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        file: PathBuf,
        /// Erase the pages covering the image first
        #[structopt(long)]
        erase: bool,
        /// Read back and compare after writing
        #[structopt(long)]
        verify: bool,
        /// Start the application once written
        #[structopt(long)]
        go: bool,
    },
    /// Erase a range, or the whole flash when no range is given
    Erase {
        #[structopt(parse(try_from_str = parse_u32))]
        address: Option<u32>,
        #[structopt(parse(try_from_str = parse_u32))]
        length: Option<u32>,
    },
    /// Compare memory against a binary file
    Verify {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
        file: PathBuf,
    },
    /// Start execution at an address
    Go {
        #[structopt(parse(try_from_str = parse_u32))]
        address: u32,
    },
    /// Enable read or write protection
    Protect {
        #[structopt(long)]
        read: bool,
        /// Sectors to write protect
        #[structopt(long)]
        write: Vec<u8>,
    },
    /// Disable read (erases flash) or write protection
    Unprotect {
        #[structopt(long)]
        read: bool,
        #[structopt(long)]
        write: bool,
    },
}

fn parse_u32(s: &str) -> Result<u32, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn progress_bar(message: &str, total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>10} [{bar:40}] {bytes}/{total_bytes} ({eta})")
            .progress_chars("=> "),
    );
    pb.set_message(message);
    pb
}

/// Exit status: 1 file or argument, 2 connection, 3 command, 4 verification
fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<FlashError>() {
        Some(e) if e.is_connection_error() => 2,
        Some(Error::VerifyMismatch { .. }) => 4,
        Some(_) => 3,
        None if e.downcast_ref::<serial_core::Error>().is_some() => 2,
        None => 1,
    }
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if let Err(e) = run(o) {
        error!("{:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn run(o: Args) -> Result<()> {
    info!("Connecting to serial port {}", o.port);

    let parity = if o.no_parity { Parity::ParityNone } else { Parity::ParityEven };
    let mut p = LinuxProgrammer::linux(&o.port, o.baud, parity, o.options.clone())
        .with_context(|| format!("opening serial port {}", o.port))?;

    info!("Connecting to bootloader");

    let id = p.connect().context("connecting to bootloader")?;

    if p.profiles().has_variants(id.product_id) {
        if let Err(e) = p.detect_bootloader_id() {
            warn!("Unable to read bootloader ID: {}", e);
        }
    }

    if p.profile().is_none() {
        match o.flash_kib {
            Some(kib) => {
                let profile = kib
                    .checked_mul(1024)
                    .and_then(|size| Profile::generic(id.product_id, size))
                    .ok_or_else(|| anyhow::anyhow!("--flash-kib {} does not fit the address space", kib))?;

                warn!("Using generic profile with {} KiB flash", kib);
                p.set_profile(profile);
            }
            None => info!("Device {:#05x} is not in the profile table, pass --flash-kib to continue", id.product_id),
        }
    }

    if let Some(speed) = o.speed {
        p.set_speed(speed).context("changing baud rate")?;
    }

    match o.operation {
        Operation::Info => info(&mut p)?,
        Operation::Read { address, length, file } => {
            let length = length as usize;
            let pb = progress_bar("read", length);
            let data = p
                .read_to_vec(address, length, &mut |done: usize, _total: usize| pb.set_position(done as u64), None)
                .context("reading memory")?;
            pb.finish_and_clear();

            fs::write(&file, &data).with_context(|| format!("writing {}", file.display()))?;
            info!("Read {} to {}", bytefmt::format(data.len() as u64), file.display());
        }
        Operation::Write { address, file, erase, verify, go } => {
            let data = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            info!("Writing {} at {:#010x}", bytefmt::format(data.len() as u64), address);

            if erase {
                p.erase(address, data.len()).context("erasing flash")?;
            }

            let pb = progress_bar("write", data.len());
            p.write_segments(&[Segment::new(address, &data)], &mut |done: usize, _total: usize| pb.set_position(done as u64), None)
                .context("writing memory")?;
            pb.finish_and_clear();

            if verify {
                verify_file(&mut p, address, &data)?;
            }

            if go {
                p.go(address).context("starting application")?;
            }
        }
        Operation::Erase { address: Some(address), length: Some(length) } => {
            let plan = p.erase(address, length as usize).context("erasing flash")?;
            info!("Erased {:#010x}..{:#010x}", plan.region.start, plan.region.end);
        }
        Operation::Erase { address: None, length: None } => {
            p.erase_all().context("erasing flash")?;
            info!("Flash erased");
        }
        Operation::Erase { .. } => anyhow::bail!("erase takes both an address and a length, or neither"),
        Operation::Verify { address, file } => {
            let data = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            verify_file(&mut p, address, &data)?;
        }
        Operation::Go { address } => p.go(address).context("starting application")?,
        Operation::Protect { read, write } => {
            if !write.is_empty() {
                p.write_protect(&write).context("enabling write protection")?;
            }
            if read {
                p.readout_protect().context("enabling readout protection")?;
            }
        }
        Operation::Unprotect { read, write } => {
            if write {
                p.write_unprotect().context("disabling write protection")?;
            }
            if read {
                p.readout_unprotect().context("disabling readout protection")?;
            }
        }
    }

    Ok(())
}

fn verify_file(p: &mut LinuxProgrammer, address: u32, data: &[u8]) -> Result<()> {
    let pb = progress_bar("verify", data.len());
    p.verify(address, data, &mut |done: usize, _total: usize| pb.set_position(done as u64), None)
        .context("verifying memory")?;
    pb.finish_and_clear();

    info!("Verified {}", bytefmt::format(data.len() as u64));
    Ok(())
}

fn info(p: &mut LinuxProgrammer) -> Result<()> {
    let id = match p.identity() {
        Some(id) => *id,
        None => return Ok(()),
    };

    info!("Product ID: {:#05x}", id.product_id);
    info!("Bootloader: v{}", format_version(id.bootloader_version));
    if let Some(bid) = id.bootloader_id {
        info!("Bootloader ID: {:#04x}", bid);
    }
    if let Some(commands) = p.supported_commands() {
        info!("Commands: {}", hex::encode(commands));
    }

    let version = p.get_version().context("reading bootloader version")?;
    info!("Option bytes: {}", hex::encode(version.option_bytes));

    let profile = match p.profile() {
        Some(profile) => *profile,
        None => return Ok(()),
    };

    info!("Device: {} ({:?})", profile.name, profile.family);
    info!(
        "Flash: {:#010x}, {}",
        profile.flash_base(),
        bytefmt::format(profile.flash_size() as u64)
    );
    for r in profile.ram {
        info!("RAM: {:#010x}..{:#010x}", r.start, r.end);
    }
    if profile.flags() != DeviceFlags::empty() {
        info!("Flags: {:?}", profile.flags());
    }

    match p.read_flash_size() {
        Ok(kib) => info!("Flash size register: {} KiB", kib),
        Err(e) => warn!("Unable to read flash size: {}", e),
    }
    match p.read_uid() {
        Ok(uid) => info!("UID: {} ({})", format_uid(&uid), hex::encode(uid)),
        Err(e) => warn!("Unable to read UID: {}", e),
    }

    Ok(())
}
