use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use std::io::Write;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eis_rig::framing;
use eis_rig::ImpedanceSample;

/// Headless consumer for the EIS measurement server: connects, starts a
/// sweep, decodes result frames and saves them as CSV.
#[derive(Parser, Debug)]
#[command(name = "eis-client")]
#[command(about = "Receive an impedance sweep over TCP and save it as CSV", long_about = None)]
struct Args {
    /// Server address, e.g. 127.0.0.1:5005
    #[arg(short, long, default_value = "127.0.0.1:5005")]
    address: String,

    /// Output CSV path
    #[arg(short, long, default_value = "eis_sweep.csv")]
    output: PathBuf,

    /// Stop after this many samples (default: read until the sweep ends)
    #[arg(long)]
    max_samples: Option<usize>,

    /// Override log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level.as_str())).init();

    info!("connecting to {}", args.address);
    let mut stream = TcpStream::connect(&args.address)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    install_stop_handler(&stream, &interrupted)?;

    stream.write_all(b"START")?;
    info!("START sent, receiving samples (ctrl-c sends STOP)");

    let mut rows: Vec<ImpedanceSample> = Vec::new();
    loop {
        match framing::read_frame(&mut stream) {
            Ok(frame_rows) => {
                for row in &frame_rows {
                    info!(
                        "  {:>12.4} Hz  Z' = {:.6e}  -Z'' = {:.6e}",
                        row.frequency, row.z_real, row.z_imag_neg
                    );
                }
                rows.extend(frame_rows);
                if args
                    .max_samples
                    .is_some_and(|max| rows.len() >= max)
                {
                    info!("sample limit reached, sending STOP");
                    let _ = stream.write_all(b"STOP");
                    break;
                }
            }
            Err(e) if interrupted.load(Ordering::Relaxed) => {
                info!("stopped by interrupt ({e})");
                break;
            }
            Err(e) => {
                // server closing the socket after a sweep is the normal end
                info!("stream ended: {e}");
                break;
            }
        }
    }

    if rows.is_empty() {
        warn!("no samples received, nothing to save");
        return Ok(());
    }

    save_csv(&args.output, &rows)?;
    info!("{} samples saved to {}", rows.len(), args.output.display());
    Ok(())
}

fn install_stop_handler(
    stream: &TcpStream,
    interrupted: &Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut control = stream.try_clone()?;
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
        let _ = control.write_all(b"STOP");
        let _ = control.shutdown(std::net::Shutdown::Both);
    })?;
    Ok(())
}

fn save_csv(path: &PathBuf, rows: &[ImpedanceSample]) -> std::io::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for row in rows {
        writeln!(file, "{},{},{}", row.frequency, row.z_real, row.z_imag_neg)?;
    }
    file.flush()
}
