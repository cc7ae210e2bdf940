use std::{error::Error, fs::File, io::Read, path::PathBuf};

use clap::Parser;
use ookcore::Demod;

#[derive(Parser)]
struct Args {
    #[arg(short = 'i', help = "Input sample file (raw little-endian f32)")]
    input: PathBuf,

    #[arg(
        short = 't',
        long = "tolerance",
        default_value_t = 0.10,
        help = "Pulse-width tolerance, as a fraction of the expected width"
    )]
    tolerance: f64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut file = File::open(&args.input)?;
    let mut raw = vec![];
    file.read_to_end(&mut raw)?;

    let samples: Vec<f32> = raw
        .chunks_exact(4)
        .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
        .collect();

    let mut demod = Demod::new(args.tolerance)?;
    demod.push_samples(&samples);

    let mut total = 0;
    while let Some(packet) = demod.pop_packet() {
        total += 1;
        println!("{}", packet.pretty);
    }

    println!("\ntotal packets decoded: {total}");

    Ok(())
}
