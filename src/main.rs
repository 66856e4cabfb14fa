// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// QUIP packet transfer tool
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use quip::config::TransferConfig;
use quip::decoder::{DecodeStatus, FileDecoder};
use quip::encoder::FileEncoder;
use quip::flow::{self, FlowFsm};
use quip::protocol::{DEFAULT_PACKET_SIZE, DEFAULT_PACKETS_PER_ACK, parse_route};
use quip::receiver::{self, ReceiverFsm};
use quip::scaffold::read_ledger;
use quip::serial::{SerialLink, parse_data_bits, parse_parity, parse_stop_bits};
use quip::signal::{CancelToken, ReadySignal};
use quip::store::DirStore;

#[derive(Parser)]
#[command(name = "quip")]
#[command(about = "QUIP packetized file transfer over a half-duplex serial link", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Fixed size of every packet on the wire
    #[arg(long, default_value_t = DEFAULT_PACKET_SIZE, value_name = "BYTES")]
    packet_size: usize,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SerialArgs {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,
}

#[derive(Args)]
struct DecodeDirs {
    /// Packet store directory holding the received packets
    #[arg(short, long)]
    store: PathBuf,

    /// Directory for scaffold and ledger files
    #[arg(short, long, default_value = "scaffold")]
    work_dir: PathBuf,

    /// Directory for verified output files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Args)]
struct FillArgs {
    /// Make a single repair attempt instead of polling
    #[arg(long)]
    rush: bool,

    /// Delay between repair attempts
    #[arg(long, default_value = "5000", value_name = "MS")]
    poll_ms: u64,

    /// Stop polling after this many seconds
    #[arg(long, value_name = "SECS")]
    give_up_after: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a file into packets
    Encode {
        /// File to encode
        file: PathBuf,

        /// Packet store directory to write into (stale packets are removed)
        #[arg(short, long)]
        store: PathBuf,

        /// Triple every payload byte for majority-vote recovery
        #[arg(long)]
        redundancy: bool,

        /// Routing designator (payload, companion, or ground)
        #[arg(long, default_value = "payload")]
        route: String,

        /// Destination directory name on the receiving side
        #[arg(long, default_value = ".")]
        destination: String,
    },
    /// Rebuild a file from a packet store
    Decode {
        #[command(flatten)]
        dirs: DecodeDirs,

        #[command(flatten)]
        fill: FillArgs,
    },
    /// Retry missing packets of an in-progress transfer
    Fill {
        #[command(flatten)]
        dirs: DecodeDirs,

        #[command(flatten)]
        fill: FillArgs,

        /// Sequence ids to retry (default: every id in the ledger)
        ids: Vec<u32>,
    },
    /// Pace a packet store onto the serial link
    Send {
        #[command(flatten)]
        serial: SerialArgs,

        /// Packet store directory to send
        #[arg(short, long)]
        store: PathBuf,

        /// Packets per acknowledgement
        #[arg(long, default_value_t = DEFAULT_PACKETS_PER_ACK)]
        ppa: usize,

        /// Interval between ready signals
        #[arg(long, default_value = "250", value_name = "MS")]
        interval_ms: u64,

        /// Routing designator for the completion marker
        #[arg(long, default_value = "payload")]
        route: String,
    },
    /// Stage packets arriving on the serial link into a packet store
    Receive {
        #[command(flatten)]
        serial: SerialArgs,

        /// Packet store directory to fill
        #[arg(short, long)]
        store: PathBuf,

        /// Give up after this many seconds without traffic
        #[arg(long, default_value = "60", value_name = "SECS")]
        idle_secs: u32,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = TransferConfig {
        packet_size: cli.packet_size,
        ..TransferConfig::default()
    };

    let result = match cli.command {
        Commands::Encode { file, store, redundancy, route, destination } => {
            encode(config, &file, &store, redundancy, &route, destination)
        }
        Commands::Decode { dirs, fill } => decode(config, dirs, fill),
        Commands::Fill { dirs, fill, ids } => repair(config, dirs, fill, ids),
        Commands::Send { serial, store, ppa, interval_ms, route } => {
            send(config, serial, &store, ppa, interval_ms, &route)
        }
        Commands::Receive { serial, store, idle_secs } => receive(config, serial, &store, idle_secs),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "quip=debug" } else { "quip=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn encode(
    mut config: TransferConfig,
    file: &Path,
    store: &Path,
    redundancy: bool,
    route: &str,
    destination: String,
) -> CliResult {
    config.routing = parse_route(route)?;
    config.redundant = redundancy;
    config.destination = destination;

    let mut store = DirStore::open(store)?;
    let encoder = FileEncoder::new(config.codec()?, config.routing, config.redundant)
        .with_destination(config.destination.clone());
    let metadata = encoder.encode_file(file, &mut store)?;

    println!(
        "Encoded {} ({} bytes) into {} packets in {}",
        metadata.filename,
        metadata.file_size,
        metadata.packet_count,
        store.dir().display()
    );
    Ok(())
}

fn fill_config(mut config: TransferConfig, fill: &FillArgs) -> (TransferConfig, CancelToken) {
    config.poll_interval = if fill.rush { None } else { Some(Duration::from_millis(fill.poll_ms)) };

    let cancel = CancelToken::new();
    if let Some(secs) = fill.give_up_after {
        let timer = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            timer.cancel();
        });
    }
    (config, cancel)
}

fn open_decoder(config: &TransferConfig, dirs: DecodeDirs) -> Result<FileDecoder<DirStore>, quip::QuipError> {
    let store = DirStore::open(dirs.store)?;
    FileDecoder::new(store, config.codec()?, dirs.work_dir, dirs.output_dir)
}

fn decode(config: TransferConfig, dirs: DecodeDirs, fill: FillArgs) -> CliResult {
    let (config, cancel) = fill_config(config, &fill);
    let mut decoder = open_decoder(&config, dirs)?;

    let status = match decoder.decode()? {
        DecodeStatus::Incomplete(missing) if !fill.rush => {
            println!("{} packet(s) missing, polling for stragglers", missing.len());
            decoder.poll_fill(missing, config.fill_mode(), &cancel)?
        }
        status => status,
    };
    report(status)
}

fn repair(config: TransferConfig, dirs: DecodeDirs, fill: FillArgs, ids: Vec<u32>) -> CliResult {
    let (config, cancel) = fill_config(config, &fill);
    let mut decoder = open_decoder(&config, dirs)?;

    let ids = if ids.is_empty() {
        let metadata = decoder.read_metadata()?;
        read_ledger(&decoder.scaffold_paths(&metadata).ledger)?.into_iter().collect()
    } else {
        ids
    };

    let status = decoder.poll_fill(ids, config.fill_mode(), &cancel)?;
    report(status)
}

fn report(status: DecodeStatus) -> CliResult {
    match status {
        DecodeStatus::Complete(path) => {
            println!("Transfer complete: {}", path.display());
            Ok(())
        }
        DecodeStatus::Incomplete(missing) => {
            let ids: Vec<String> = missing.iter().map(|id| id.to_string()).collect();
            println!("Still missing: {}", ids.join(" "));
            Err(quip::QuipError::Incomplete { missing }.into())
        }
    }
}

fn open_link(serial: &SerialArgs) -> Result<SerialLink, Box<dyn std::error::Error>> {
    let data_bits = parse_data_bits(serial.data_bits)?;
    let parity = parse_parity(&serial.parity)?;
    let stop_bits = parse_stop_bits(serial.stop_bits)?;

    println!("Opening serial port: {}", serial.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", serial.baud, data_bits, parity, stop_bits);

    Ok(SerialLink::open(&serial.port, serial.baud, data_bits, parity, stop_bits)?)
}

fn send(
    mut config: TransferConfig,
    serial: SerialArgs,
    store: &Path,
    ppa: usize,
    interval_ms: u64,
    route: &str,
) -> CliResult {
    config.routing = parse_route(route)?;
    config.packets_per_ack = ppa;

    let link = open_link(&serial)?;
    let store = DirStore::open(store)?;
    let signal = ReadySignal::new();
    let cancel = CancelToken::new();

    // Stands in for the link scheduler: one go signal per interval
    let scheduler_stop = CancelToken::new();
    let scheduler = {
        let signal = signal.clone();
        let stop = scheduler_stop.clone();
        let interval = Duration::from_millis(interval_ms);
        std::thread::spawn(move || {
            while !stop.sleep(interval) {
                signal.notify();
            }
        })
    };

    let fsm = FlowFsm::new(Box::new(link), Box::new(store), signal, cancel, config.flow()?)?;
    let result = flow::run(fsm);

    scheduler_stop.cancel();
    let _ = scheduler.join();
    result?;

    println!("\nPackets sent successfully!");
    Ok(())
}

fn receive(config: TransferConfig, serial: SerialArgs, store: &Path, idle_secs: u32) -> CliResult {
    let link = open_link(&serial)?;
    let store = DirStore::open(store)?;

    println!("\nReceiving packets to: {}", store.dir().display());
    let fsm = ReceiverFsm::new(Box::new(link), Box::new(store), config.codec()?, idle_secs);
    receiver::run(fsm)?;

    println!("\nPackets received successfully!");
    Ok(())
}
