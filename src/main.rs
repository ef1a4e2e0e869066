//! Chainwatch CLI
//!
//! Command-line interface for the transaction codec and the peer
//! supervisor.

use chainwatch::codec::{SliceReader, Transaction};
use chainwatch::crypto::p2pkh_address;
use chainwatch::network::{Network, NetworkConfig};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chainwatch")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Bitcoin transaction codec and peer supervisor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a raw transaction from hex and print its txid
    Decode {
        /// Consensus-serialized transaction, hex encoded
        hex: String,
    },

    /// Derive the P2PKH address of an uncompressed public key
    Address {
        /// 65-byte uncompressed ECDSA public key, hex encoded
        pubkey: String,
    },

    /// Connect to seed peers and log the messages they send
    Watch {
        /// Seed peers as host:port (port defaults to 8333)
        #[arg(short, long, required = true)]
        peer: Vec<String>,

        /// Maximum number of active peers
        #[arg(short, long, default_value = "10")]
        max_peers: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Decode { hex } => decode_transaction(&hex)?,
        Commands::Address { pubkey } => derive_address(&pubkey)?,
        Commands::Watch { peer, max_peers } => watch_peers(peer, max_peers).await?,
    }

    Ok(())
}

fn decode_transaction(raw_hex: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let raw = hex::decode(raw_hex.trim())?;
    let mut reader = SliceReader::new(&raw);
    let tx = Transaction::decode(&mut reader)?;

    println!("version:  {}", tx.version);
    println!("inputs:   {}", tx.inputs.len());
    for input in &tx.inputs {
        let marker = if input.is_coinbase() { " (coinbase)" } else { "" };
        println!(
            "  {}:{}{} script {} bytes, sequence {:#010x}",
            hex::encode(chainwatch::reverse_bytes(&input.prev_hash)),
            input.prev_index,
            marker,
            input.script.len(),
            input.sequence
        );
    }
    println!("outputs:  {}", tx.outputs.len());
    for output in &tx.outputs {
        println!(
            "  #{}: {} satoshis, script {} bytes",
            output.index,
            output.value,
            output.script.len()
        );
    }
    println!("locktime: {}", tx.locktime);
    println!("txid:     {}", tx.txid_hex());
    if tx.has_witness() {
        println!("wtxid:    {}", tx.wtxid_hex());
    }
    Ok(())
}

fn derive_address(pubkey_hex: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let pubkey = hex::decode(pubkey_hex.trim())?;
    println!("{}", p2pkh_address(&pubkey)?);
    Ok(())
}

async fn watch_peers(
    seeds: Vec<String>,
    max_peers: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = NetworkConfig {
        max_peers,
        ..NetworkConfig::default()
    };
    let default_port = config.default_port;

    let network = Network::new(
        config,
        Arc::new(|peer, msg| {
            log::info!(
                "{} sent {} ({} bytes)",
                peer.authority,
                msg.command.name(),
                msg.payload.len()
            );
            Ok(())
        }),
    );

    for seed in &seeds {
        let host_port = if seed.contains(':') && !seed.starts_with('[') && seed.matches(':').count() > 1
        {
            // Bare IPv6 address without a port
            format!("[{}]:{}", seed, default_port)
        } else if seed.contains(':') {
            seed.clone()
        } else {
            format!("{}:{}", seed, default_port)
        };

        match tokio::net::lookup_host(&host_port).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => {
                    if let Err(e) = network.add_peer(addr.ip(), addr.port()).await {
                        log::warn!("seed {} rejected: {}", host_port, e);
                    }
                }
                None => log::warn!("seed {} resolved to no addresses", host_port),
            },
            Err(e) => log::warn!("failed to resolve seed {}: {}", host_port, e),
        };
    }

    log::info!("watching {} seed peers", seeds.len());
    network.watch().await;
    Ok(())
}
