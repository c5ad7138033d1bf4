pub mod config;
pub mod error;
pub mod fitting;
pub mod framing;
pub mod impedance;
pub mod instrument;
pub mod ladder;
pub mod logger;
pub mod plotting;
pub mod refiner;
pub mod scheduler;
pub mod session;
pub mod sim;
pub mod sink;
pub mod spectrum;
pub mod types;

pub use error::EisError;
pub use fitting::{fit_tone, SinusoidFit};
pub use impedance::{ImpedanceCalculator, QualityGate, RejectReason, Verdict};
pub use instrument::{Acquisition, AcquisitionPlan, FaultKind, Instrument, ReadOutcome};
pub use ladder::{FrequencyLadder, LadderConfig};
pub use logger::Logger;
pub use plotting::{plot_nyquist, plot_sweep_magnitude};
pub use scheduler::{
    DemodMethod, HandshakeConfig, SweepConfig, SweepControl, SweepScheduler,
};
pub use session::{ControlEvent, SessionConfig, StreamingSession, SweepServer};
pub use sim::{CellModel, SimulatedInstrument};
pub use sink::{CompositeSink, CsvSink, JsonlSink, ResultSink, SampleRecord, StatusLogSink};
pub use spectrum::BandSpectrum;
pub use types::{
    ControlCommand, Demodulation, ImpedanceSample, StatusLevel, SweepResult, SweepState,
    Waveform,
};
