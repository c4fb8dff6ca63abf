use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

use blockchat::bootstrap;
use blockchat::cli;
use blockchat::driver;
use blockchat::node::NodeConfig;
use blockchat::wallet::Wallet;

/// A participant in the BlockChat proof-of-stake network.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Total number of participants, the bootstrap included.
    #[arg(long)]
    nodes: usize,
    /// The number of transactions that seals a block.
    #[arg(long)]
    capacity: usize,
    /// The initial stake declared at admission.
    #[arg(long, default_value = "10")]
    stake: f64,
    /// Run the bootstrap role instead of a peer.
    #[arg(long)]
    bootstrap: bool,
    /// The address of the bootstrap node.
    #[arg(long = "bootstrap_address", default_value = "127.0.0.1")]
    bootstrap_address: IpAddr,
    /// The port of the bootstrap node.
    #[arg(long = "bootstrap_port", default_value = "5555")]
    bootstrap_port: u16,
    /// Directory holding trans<id>.txt files; enables the scripted driver.
    #[arg(long)]
    driver: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // The library logs through the `log` facade; route those records into
    // tracing first, or they would vanish. Logs then go to a file so they do
    // not tear through the prompt; the `logs` command reads them back.
    tracing_log::LogTracer::init()?;
    let log_path = std::env::temp_dir().join(format!("blockchat-{}.log", std::process::id()));
    let log_file = std::fs::File::create(&log_path)?;
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    let config = NodeConfig {
        nodes: args.nodes,
        capacity: args.capacity,
        stake: args.stake,
        bootstrap_addr: SocketAddr::new(args.bootstrap_address, args.bootstrap_port),
        listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };

    println!("Welcome to BlockChat!\n\nConnecting to the blockchain network...");

    let wallet = Wallet::generate();
    let node = if args.bootstrap {
        bootstrap::start(&config, wallet)?
    } else {
        bootstrap::join(&config, wallet)?
    };
    let handle = node.spawn();

    if let Some(data_dir) = args.driver {
        let driver_handle = handle.clone();
        std::thread::spawn(move || {
            if let Err(err) = driver::run(&driver_handle, &data_dir) {
                log::warn!("driver failed: {err}");
            }
        });
    }

    cli::run(&handle, Some(&log_path))?;
    Ok(())
}
