use crate::error::EisError;
use crate::types::Waveform;
use serde::{Deserialize, Serialize};

/// Result of a non-blocking instrument read. "Nothing yet" is a normal
/// outcome the caller branches on, not an error to catch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Response bytes are available.
    Ready(Vec<u8>),
    /// No data waiting; poll again later.
    Empty,
    /// The transport reported a recoverable fault for this transfer.
    Fault(FaultKind),
}

/// Transport-level faults reported by the UART collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Parity,
    BufferOverflow,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Parity => write!(f, "parity error"),
            FaultKind::BufferOverflow => write!(f, "buffer overflow"),
        }
    }
}

/// Hardware-agnostic view of the analog front end. The measurement pipeline
/// consumes only this surface; device enumeration, UART byte transport and
/// channel wiring live behind it.
///
/// Implementations hold the device handle as explicit owned state, created on
/// session start and released on drop. Mock implementations drive the test
/// suite.
pub trait Instrument {
    /// Send one text command (typically the excitation frequency).
    fn send_command(&mut self, text: &str) -> Result<(), EisError>;

    /// Non-blocking read of the instrument's response channel.
    fn read_response(&mut self) -> Result<ReadOutcome, EisError>;

    /// Enable the given analog input channels.
    fn configure_channels(&mut self, channels: &[u32]) -> Result<(), EisError>;

    /// Capture both enabled channels simultaneously. Returns
    /// (current-proxy, voltage) buffers tagged with the actual sample rate.
    fn acquire(
        &mut self,
        sample_rate: f64,
        buffer_size: usize,
    ) -> Result<(Waveform, Waveform), EisError>;
}

/// Frequency-dependent acquisition sizing. Lower frequencies get
/// proportionally larger sampling windows to preserve the captured cycle
/// count; the bands mirror the deployed heuristics and are configuration, not
/// code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionPlan {
    /// Samples per excitation period: `sample_rate = rate_multiple * f`.
    pub rate_multiple: f64,
    /// Frequencies strictly below this use `low_buffer`.
    pub low_cutoff_hz: f64,
    /// Frequencies up to and including this use `mid_buffer`.
    pub high_cutoff_hz: f64,
    pub low_buffer: usize,
    pub mid_buffer: usize,
    pub high_buffer: usize,
}

impl Default for AcquisitionPlan {
    fn default() -> Self {
        Self {
            rate_multiple: 100.0,
            low_cutoff_hz: 1.0,
            high_cutoff_hz: 5.0,
            low_buffer: 180,
            mid_buffer: 450,
            high_buffer: 900,
        }
    }
}

/// Concrete acquisition parameters for one ladder step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acquisition {
    pub sample_rate: f64,
    pub buffer_size: usize,
}

impl AcquisitionPlan {
    pub fn for_frequency(&self, frequency: f64) -> Acquisition {
        let buffer_size = if frequency < self.low_cutoff_hz {
            self.low_buffer
        } else if frequency <= self.high_cutoff_hz {
            self.mid_buffer
        } else {
            self.high_buffer
        };
        Acquisition {
            sample_rate: self.rate_multiple * frequency,
            buffer_size,
        }
    }
}
