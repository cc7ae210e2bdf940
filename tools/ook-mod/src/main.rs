use std::{
    error::Error,
    fs::File,
    io::{Read, Write},
    path::PathBuf,
};

use clap::Parser;
use ookcore::Mod;

#[derive(Parser)]
struct Args {
    #[arg(
        long = "hex",
        conflicts_with = "input",
        help = "Packet payload as a hex string, e.g. deadbeef"
    )]
    hex: Option<String>,

    #[arg(
        short = 'i',
        long = "input",
        conflicts_with = "hex",
        help = "File containing the raw packet payload bytes"
    )]
    input: Option<PathBuf>,

    #[arg(short = 'o', help = "Output sample file (raw little-endian f32)")]
    output: PathBuf,

    #[arg(
        long = "stop-after",
        default_value_t = 1,
        help = "Number of transmissions before end-of-stream; -1 runs forever"
    )]
    stop_after: i32,

    #[arg(long = "ms-between-xmit", default_value_t = 10)]
    ms_between_xmit: u32,

    #[arg(long = "sample-rate", default_value_t = 32000)]
    sample_rate: u32,
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err("hex payload must have an even number of digits".into());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.into()))
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let payload = match (&args.hex, &args.input) {
        (Some(hex), None) => decode_hex(hex)?,
        (None, Some(path)) => {
            let mut file = File::open(path)?;
            let mut bytes = vec![];
            file.read_to_end(&mut bytes)?;
            bytes
        }
        _ => return Err("exactly one of --hex or --input must be given".into()),
    };

    let mut modulator = Mod::new(
        payload,
        args.stop_after,
        args.ms_between_xmit,
        args.sample_rate,
    )?;

    let mut out_file = File::create(&args.output)?;
    let mut buf = [0f32; 4096];
    let mut total = 0usize;
    loop {
        let written = modulator.pull_samples(&mut buf);
        if written == 0 {
            break;
        }
        let raw: Vec<u8> = buf[..written].iter().flat_map(|s| s.to_le_bytes()).collect();
        out_file.write_all(&raw)?;
        total += written;
    }

    println!("wrote {total} samples to {}", args.output.display());

    Ok(())
}
