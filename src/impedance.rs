use crate::types::{Demodulation, ImpedanceSample};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Acceptance rule applied to a freshly computed impedance relative to the
/// previously accepted one. The historical program variants disagree on the
/// constants (0.9 / 0.95 / 0.98), so both knobs are configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityGate {
    /// Reject when the new real part falls below this fraction of the prior
    /// accepted real part.
    pub drop_fraction: f64,
    /// Reject when the new real part is below this floor.
    pub min_real: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            drop_fraction: 0.95,
            min_real: 1e-7,
        }
    }
}

/// Why a computed impedance was not stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    NearZeroReal { z_real: f64 },
    DropBelowPrior { z_real: f64, prior_real: f64 },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NearZeroReal { z_real } => {
                write!(f, "real part {z_real:.3e} at or below the floor")
            }
            RejectReason::DropBelowPrior { z_real, prior_real } => {
                write!(
                    f,
                    "real part {z_real:.3e} dropped below fraction of prior {prior_real:.3e}"
                )
            }
        }
    }
}

/// Outcome of one impedance computation. Rejection is a normal control-flow
/// branch, not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Accepted(ImpedanceSample),
    Rejected(RejectReason),
}

/// Combines the two demodulated channels into a complex impedance and applies
/// the quality gate.
#[derive(Debug, Clone, Copy)]
pub struct ImpedanceCalculator {
    gate: QualityGate,
}

impl ImpedanceCalculator {
    pub fn new(gate: QualityGate) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Compute `Z = V / I` from the demodulated channels.
    ///
    /// The half-turn added to the current phase compensates the inverting
    /// current-sense stage in the analog front end. The stored frequency is
    /// the tone the current channel actually locked onto. Pure function of
    /// its inputs; identical inputs give a bit-identical sample.
    pub fn compute(
        &self,
        current: &Demodulation,
        voltage: &Demodulation,
        prior: Option<&ImpedanceSample>,
    ) -> Verdict {
        let i = Complex64::from_polar(current.amplitude, current.phase + PI);
        let v = Complex64::from_polar(voltage.amplitude, voltage.phase);
        let z = v / i;

        if z.re < self.gate.min_real {
            return Verdict::Rejected(RejectReason::NearZeroReal { z_real: z.re });
        }
        if let Some(prior) = prior {
            if z.re < self.gate.drop_fraction * prior.z_real {
                return Verdict::Rejected(RejectReason::DropBelowPrior {
                    z_real: z.re,
                    prior_real: prior.z_real,
                });
            }
        }

        Verdict::Accepted(ImpedanceSample {
            frequency: current.frequency,
            z_real: z.re,
            z_imag_neg: -z.im,
        })
    }
}

impl Default for ImpedanceCalculator {
    fn default() -> Self {
        Self::new(QualityGate::default())
    }
}
