use clap::Parser;
use env_logger::Env;
use log::info;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use eis_rig::config::{load_config_or_default, AppConfig};
use eis_rig::{
    CompositeSink, CsvSink, FrequencyLadder, JsonlSink, SessionConfig, SimulatedInstrument,
    StatusLogSink, SweepScheduler, SweepServer,
};

/// EIS measurement server
#[derive(Parser, Debug)]
#[command(name = "eis-server")]
#[command(about = "Impedance sweep server with TCP result streaming", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Override listen address, e.g. 0.0.0.0:5005
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config_or_default(args.config.as_deref());

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.log_level.clone());
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level.as_str())).init();

    let listen = args
        .listen
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.server.listen_ip, config.server.listen_port));
    log_startup_info(&config, &listen);

    let shutdown = setup_shutdown_handler();

    // the analog front end is consumed through the Instrument trait only;
    // this binary wires up the simulated cell
    let instrument = SimulatedInstrument::new(
        config.simulation.cell,
        config.simulation.excitation_volts,
    )
    .with_noise(config.simulation.noise_volts)
    .with_proxy_gain(config.sweep.current_gain);

    let ladder = FrequencyLadder::generate(&config.ladder);
    let mut scheduler = SweepScheduler::new(instrument, ladder, config.sweep.clone())?;

    let mut sink = build_sink(&config);

    let session_config: SessionConfig = config.session;
    let server = SweepServer::bind(&listen, session_config)?;
    info!("server started on {}", server.local_addr()?);

    server.serve(&mut scheduler, &mut sink, &shutdown)?;
    info!("server shut down");
    Ok(())
}

fn log_startup_info(config: &AppConfig, listen: &str) {
    info!("eis-server starting");
    info!("  listen address: {listen}");
    info!(
        "  ladder: {} Hz down {} decades, {} points/decade",
        config.ladder.start_decade_hz, config.ladder.decades, config.ladder.points_per_decade
    );
    info!(
        "  demodulation: {:?}, quality gate drop fraction {}",
        config.sweep.demod_method, config.sweep.quality_gate.drop_fraction
    );
    info!(
        "  simulated cell: Rs {} Ω, Rct {} Ω, Cdl {} F",
        config.simulation.cell.series_resistance,
        config.simulation.cell.charge_transfer_resistance,
        config.simulation.cell.double_layer_capacitance
    );
}

fn build_sink(config: &AppConfig) -> CompositeSink {
    let mut sink = CompositeSink::new()
        .with(Box::new(StatusLogSink))
        .with(Box::new(
            CsvSink::new(&config.output.csv_dir).with_header(config.output.csv_header),
        ));
    if let Some(jsonl_path) = &config.output.jsonl_path {
        sink.push(Box::new(JsonlSink::new(jsonl_path)));
    }
    if config.output.plot {
        sink.push(Box::new(PlotSink));
    }
    sink
}

/// Terminal quick-look plot after each completed sweep.
struct PlotSink;

impl eis_rig::ResultSink for PlotSink {
    fn on_sample(&mut self, _sample: &eis_rig::ImpedanceSample) {}

    fn on_status(&mut self, _level: eis_rig::StatusLevel, _message: &str) {}

    fn on_sweep_complete(&mut self, result: &eis_rig::SweepResult) {
        if let Err(e) = eis_rig::plot_sweep_magnitude(result) {
            log::warn!("sweep plot failed: {e}");
        }
    }
}

fn setup_shutdown_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("interrupt received, shutting down after current step");
        flag.store(true, Ordering::Relaxed);
    }) {
        log::warn!("failed to install interrupt handler: {e}");
    }
    shutdown
}
