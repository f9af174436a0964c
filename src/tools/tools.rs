//! `ssk-tools`: manual-inspection CLI for subset keys.

use clap::{Parser, Subcommand};
use ssk_core::{AbV, AbvError, Location, Result};
use tracing::info;

/// Build and inspect canonical subset keys.
#[derive(Clone, Debug, Parser)]
struct Args {
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Build a subset key from a literal list of identifiers and print its
    /// canonical bytes as hex.
    EncodeIds(EncodeIdsArgs),
    /// Decode a canonical subset key and print its partition/segment/token
    /// structure, plus the canonicity verdict.
    Inspect(InspectArgs),
}

#[derive(Clone, Debug, Parser)]
struct EncodeIdsArgs {
    /// identifiers to include, need not be pre-sorted
    ids: Vec<u64>,
}

#[derive(Clone, Debug, Parser)]
struct InspectArgs {
    /// canonical subset key, as a hex string
    hex_bytes: String,
}

fn encode_ids(args: &EncodeIdsArgs) -> Result<()> {
    let mut ids = args.ids.clone();
    ids.sort_unstable();
    ids.dedup();
    info!(count = ids.len(), "building subset key");
    let abv = AbV::from_sorted_ids(&ids)?;
    let bytes = abv.encode()?;
    println!("{}", hex_encode(&bytes));
    Ok(())
}

fn inspect(args: &InspectArgs) -> Result<()> {
    let bytes = hex_decode(&args.hex_bytes).map_err(|reason| AbvError::InvalidEncoding {
        field: "hex_bytes",
        reason,
        at: Location::new(0, "cli_input"),
    })?;

    let partitions = ssk_core::partition::decode(&bytes, bytes.len() * 8)?;
    for part in &partitions {
        println!("partition {} ({} segments)", part.id, part.segments.len());
        for (i, seg) in part.segments.iter().enumerate() {
            match seg {
                ssk_core::segment::Segment::Rle {
                    initial_delta,
                    length,
                    polarity,
                } => println!(
                    "  segment[{i}]: RLE  gap={initial_delta} length={length} polarity={polarity}"
                ),
                ssk_core::segment::Segment::Mix {
                    initial_delta,
                    chunks,
                    length,
                } => println!(
                    "  segment[{i}]: MIX  gap={initial_delta} length={length} chunks={}",
                    chunks.len()
                ),
            }
        }
    }

    match ssk_core::validate::validate(&bytes) {
        Ok(abv) => println!("canonical: yes ({} members)", abv.cardinality()),
        Err(e) => println!("canonical: no ({e})"),
    }
    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> std::result::Result<Vec<u8>, &'static str> {
    if s.len() % 2 != 0 {
        return Err("hex string must have an even number of digits");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| "invalid hex digit"))
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    ssk_core::init()?;

    let args = Args::parse();
    match &args.operation {
        Operation::EncodeIds(a) => encode_ids(a),
        Operation::Inspect(a) => inspect(a),
    }
}
