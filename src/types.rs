use serde::{Deserialize, Serialize};

/// One captured scope channel: an ordered sample buffer tagged with the rate
/// it was recorded at. The buffer handed back by the instrument is never
/// modified in place; `demean` and `scaled` return fresh copies.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f64>,
    sample_rate: f64,
}

impl Waveform {
    pub fn new(samples: Vec<f64>, sample_rate: f64) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Mean-centered copy of this waveform.
    pub fn demean(&self) -> Waveform {
        let mean = self.mean();
        Waveform {
            samples: self.samples.iter().map(|&v| v - mean).collect(),
            sample_rate: self.sample_rate,
        }
    }

    /// Copy with every sample multiplied by `gain`. Used to convert the
    /// current-proxy channel from shunt volts to instrument units.
    pub fn scaled(&self, gain: f64) -> Waveform {
        Waveform {
            samples: self.samples.iter().map(|&v| v * gain).collect(),
            sample_rate: self.sample_rate,
        }
    }
}

/// Amplitude/phase of one recovered tone. `frequency` is the tone the
/// demodulator actually locked onto, which may differ from the commanded
/// ladder frequency after refinement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Demodulation {
    pub amplitude: f64,
    pub phase: f64,
    pub frequency: f64,
}

/// One accepted sweep point. The imaginary part is stored negated so a
/// capacitive response plots positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpedanceSample {
    pub frequency: f64,
    pub z_real: f64,
    pub z_imag_neg: f64,
}

impl ImpedanceSample {
    pub const ZERO: ImpedanceSample = ImpedanceSample {
        frequency: 0.0,
        z_real: 0.0,
        z_imag_neg: 0.0,
    };

    pub fn is_zero(&self) -> bool {
        self.frequency == 0.0 && self.z_real == 0.0 && self.z_imag_neg == 0.0
    }

    pub fn magnitude(&self) -> f64 {
        self.z_real.hypot(self.z_imag_neg)
    }
}

/// Index-stable result buffer for one sweep. Rows are pre-allocated to the
/// ladder capacity and written at most once, by the scheduler step that
/// accepted the matching ladder entry. `finalize` drops the all-zero rows
/// left behind by skipped frequencies; after that the buffer is read-only.
#[derive(Debug, Clone)]
pub struct SweepResult {
    rows: Vec<ImpedanceSample>,
    finalized: bool,
}

impl SweepResult {
    /// Capacity matching the densest configured ladder.
    pub const DEFAULT_CAPACITY: usize = 61;

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: vec![ImpedanceSample::ZERO; capacity],
            finalized: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Write row `index`. Rows are written once, in ladder order.
    pub fn set(&mut self, index: usize, sample: ImpedanceSample) {
        debug_assert!(!self.finalized, "write to finalized sweep result");
        if let Some(row) = self.rows.get_mut(index) {
            debug_assert!(row.is_zero(), "sweep row {index} written twice");
            *row = sample;
        }
    }

    /// Drop every all-zero row, leaving only accepted samples in ladder
    /// order. Skipped frequencies show up as absent rows, not zero rows.
    pub fn finalize(&mut self) {
        self.rows.retain(|row| !row.is_zero());
        self.finalized = true;
    }

    pub fn rows(&self) -> &[ImpedanceSample] {
        &self.rows
    }

    /// Number of accepted samples (only meaningful after `finalize`).
    pub fn len(&self) -> usize {
        self.rows.iter().filter(|row| !row.is_zero()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SweepResult {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

/// Sweep scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    Idle,
    Running,
    Completed,
    Aborted,
}

/// Severity tag for status callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusLevel::Info => write!(f, "info"),
            StatusLevel::Warning => write!(f, "warning"),
            StatusLevel::Error => write!(f, "error"),
        }
    }
}

/// Inbound control message, matched by exact ASCII text after trimming
/// trailing NULs and whitespace. Unrecognized commands are preserved for
/// logging and otherwise ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Unknown(String),
}

impl ControlCommand {
    pub fn parse(bytes: &[u8]) -> ControlCommand {
        let text = String::from_utf8_lossy(bytes);
        let trimmed = text.trim_matches('\0').trim();
        match trimmed {
            "START" => ControlCommand::Start,
            "STOP" => ControlCommand::Stop,
            other => ControlCommand::Unknown(other.to_string()),
        }
    }

    /// Legacy peers detect STOP by substring containment anywhere in the
    /// received bytes. Only used when explicitly configured.
    pub fn contains_stop(bytes: &[u8]) -> bool {
        bytes.windows(4).any(|window| window == b"STOP")
    }
}
