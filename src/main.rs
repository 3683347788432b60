//! stripeio command line driver
//!
//! Moves whole files in and out of a striped layout kept in local stripe
//! files, and inspects or rebuilds an existing layout.
//!
//! ```text
//!  stripeio --config raid.yaml put  <src>    local file ──▶ stripes
//!  stripeio --config raid.yaml get  <dst>    stripes ──▶ local file
//!  stripeio --config raid.yaml rebuild       rewrite lost blocks
//!  stripeio --config raid.yaml info          size, layout, lost stripes
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stripeio::adapters::{AsyncDispatch, LocalStripe};
use stripeio::{AccessMode, RaidConfig, RaidFile, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// stripeio - client-side RAID striping over stripe files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Layout configuration (YAML, or JSON with a .json extension)
    #[arg(long, short, env = "STRIPEIO_CONFIG")]
    config: PathBuf,

    /// Threads completing stripe I/O
    #[arg(long, env = "STRIPEIO_WORKERS", default_value = "4")]
    workers: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a local file into the stripes, replacing their content
    Put { src: PathBuf },
    /// Copy the striped file out to a local file
    Get { dst: PathBuf },
    /// Rebuild every group, writing back what was lost
    Rebuild,
    /// Print size, layout and stripe state as JSON
    Info,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = RaidConfig::from_file(&args.config)?;
    info!(
        "Layout {} over {} stripes ({} parity, width {})",
        config.layout,
        config.total_stripes(),
        config.parity_stripes,
        config.stripe_width
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(args.workers.max(1))
        .thread_name("stripeio-io")
        .build()?;

    let mut file = open_file(&runtime, config)?;
    match args.command {
        Command::Put { src } => put(&mut file, &src),
        Command::Get { dst } => get(&mut file, &dst),
        Command::Rebuild => rebuild(&mut file),
        Command::Info => print_info(&mut file),
    }
}

fn open_file(runtime: &Runtime, config: RaidConfig) -> Result<RaidFile> {
    let stripes = config.stripe_urls.iter().map(LocalStripe::new).collect();
    let transports = AsyncDispatch::wrap_all(stripes, runtime.handle());
    RaidFile::new(config, transports)
}

/// Bytes moved per call: a whole number of rows
fn transfer_size(file: &RaidFile) -> usize {
    file.config().stripe_width * file.config().data_stripes() * 4
}

// =============================================================================
// Commands
// =============================================================================

fn put(file: &mut RaidFile, src: &Path) -> Result<()> {
    let mut input = File::open(src)?;
    let mut buf = vec![0u8; transfer_size(file)];
    let mut offset = 0u64;

    file.open(AccessMode::WriteOnly)?;
    loop {
        let n = read_full(&mut input, &mut buf)?;
        if n == 0 {
            break;
        }
        file.write(offset, &buf[..n])?;
        offset += n as u64;
    }
    file.close()?;

    info!("Stored {} bytes from {}", offset, src.display());
    Ok(())
}

fn get(file: &mut RaidFile, dst: &Path) -> Result<()> {
    file.open(AccessMode::ReadOnly)?;
    let size = file.size()?;
    let mut output = File::create(dst)?;
    let mut buf = vec![0u8; transfer_size(file)];
    let mut offset = 0u64;

    while offset < size {
        let n = file.read(offset, &mut buf)?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n])?;
        offset += n as u64;
    }
    output.sync_all()?;

    let recovered = file.done_recovery();
    file.close()?;
    info!(
        "Wrote {} bytes to {}{}",
        offset,
        dst.display(),
        if recovered { " (with recovery)" } else { "" }
    );
    Ok(())
}

fn rebuild(file: &mut RaidFile) -> Result<()> {
    file.open(AccessMode::ReadWrite)?;
    let report = file.rebuild()?;
    file.close()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_info(file: &mut RaidFile) -> Result<()> {
    file.open(AccessMode::ReadOnly)?;
    let stat = file.stat()?;
    file.close()?;
    println!("{}", serde_json::to_string_pretty(&stat)?);
    Ok(())
}

/// Fill `buf` from `input`, short only at end of input
fn read_full(input: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
