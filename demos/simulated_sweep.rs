//! Run one sweep against the simulated cell without any sockets and print
//! the accepted samples.
//!
//! Usage:
//!   cargo run --example simulated_sweep

use eis_rig::{
    CellModel, FrequencyLadder, HandshakeConfig, LadderConfig, SimulatedInstrument,
    StatusLogSink, SweepConfig, SweepControl, SweepScheduler,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let ladder = FrequencyLadder::generate(&LadderConfig {
        start_decade_hz: 100.0,
        decades: 2,
        points_per_decade: 5,
    });

    let config = SweepConfig {
        settle_ms: 0,
        handshake: HandshakeConfig {
            poll_interval_ms: 0,
            max_wait_ms: 1_000,
        },
        ..SweepConfig::default()
    };

    let instrument = SimulatedInstrument::new(CellModel::default(), 1.0).with_noise(1e-6);
    let mut scheduler = SweepScheduler::new(instrument, ladder, config)?;
    let mut sink = StatusLogSink;

    scheduler.run_sweep(&mut sink, |_| Ok(()), || SweepControl::Continue)?;

    println!("\n{:>12}  {:>14}  {:>14}", "f / Hz", "Z' / Ω", "-Z'' / Ω");
    for row in scheduler.result().rows() {
        println!(
            "{:>12.4}  {:>14.4}  {:>14.4}",
            row.frequency, row.z_real, row.z_imag_neg
        );
    }

    eis_rig::plot_sweep_magnitude(scheduler.result())?;
    eis_rig::plot_nyquist(scheduler.result())?;
    Ok(())
}
