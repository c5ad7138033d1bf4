use crate::error::EisError;
use crate::types::{Demodulation, Waveform};
use ndarray::Array1;
use std::f64::consts::PI;

/// Fewer samples than regressors makes the design matrix rank-deficient.
pub const MIN_FIT_SAMPLES: usize = 3;

/// Least-squares recovery of one known tone from a noisy buffer.
///
/// The model is `y = a*sin(wt) + b*cos(wt) + c` sampled at `t = i / rate`;
/// amplitude and phase fall out of the fitted `(a, b)` pair. The fit also
/// reconstructs a denoised copy of the buffer for downstream reuse.
#[derive(Debug, Clone)]
pub struct SinusoidFit {
    pub amplitude: f64,
    pub phase: f64,
    pub offset: f64,
    pub reconstructed: Vec<f64>,
}

impl SinusoidFit {
    pub fn demodulation(&self, frequency: f64) -> Demodulation {
        Demodulation {
            amplitude: self.amplitude,
            phase: self.phase,
            frequency,
        }
    }
}

/// Fit `waveform` against a sinusoid of known `frequency`.
///
/// There is no iteration and no convergence failure mode; the only error is a
/// degenerate input (too few samples, or a design matrix collapsed to
/// singular, e.g. at zero frequency).
pub fn fit_tone(waveform: &Waveform, frequency: f64) -> Result<SinusoidFit, EisError> {
    let n = waveform.len();
    if n < MIN_FIT_SAMPLES {
        return Err(EisError::InsufficientData {
            expected: MIN_FIT_SAMPLES,
            got: n,
        });
    }

    let omega = 2.0 * PI * frequency;
    let time: Array1<f64> =
        Array1::from_iter((0..n).map(|i| i as f64 / waveform.sample_rate()));
    let sin_basis = time.mapv(|t| (omega * t).sin());
    let cos_basis = time.mapv(|t| (omega * t).cos());
    let y = Array1::from_iter(waveform.samples().iter().copied());

    // Normal equations for the three regressors [sin, cos, 1].
    let nf = n as f64;
    let ata = [
        [
            sin_basis.dot(&sin_basis),
            sin_basis.dot(&cos_basis),
            sin_basis.sum(),
        ],
        [
            sin_basis.dot(&cos_basis),
            cos_basis.dot(&cos_basis),
            cos_basis.sum(),
        ],
        [sin_basis.sum(), cos_basis.sum(), nf],
    ];
    let aty = [sin_basis.dot(&y), cos_basis.dot(&y), y.sum()];

    let [a, b, c] = solve3(ata, aty).ok_or(EisError::InsufficientData {
        expected: MIN_FIT_SAMPLES,
        got: n,
    })?;

    let reconstructed = time
        .iter()
        .map(|&t| a * (omega * t).sin() + b * (omega * t).cos() + c)
        .collect();

    Ok(SinusoidFit {
        amplitude: a.hypot(b),
        phase: b.atan2(a),
        offset: c,
        reconstructed,
    })
}

/// Gaussian elimination with partial pivoting on a 3x3 system. Returns `None`
/// when the matrix is numerically singular.
fn solve3(mut m: [[f64; 3]; 3], mut rhs: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3)
            .max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))
            .unwrap();
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in (col + 1)..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..3 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let mut acc = rhs[row];
        for k in (row + 1)..3 {
            acc -= m[row][k] * x[k];
        }
        x[row] = acc / m[row][row];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth(amplitude: f64, frequency: f64, phase: f64, offset: f64, rate: f64, n: usize) -> Waveform {
        let samples = (0..n)
            .map(|i| {
                let t = i as f64 / rate;
                amplitude * (2.0 * PI * frequency * t + phase).sin() + offset
            })
            .collect();
        Waveform::new(samples, rate)
    }

    #[test]
    fn test_recovers_amplitude_and_phase() {
        let amplitude = 0.75;
        let phase = 0.6;
        let offset = 0.2;
        let wave = synth(amplitude, 10.0, phase, offset, 1000.0, 900);

        let fit = fit_tone(&wave, 10.0).unwrap();

        assert!((fit.amplitude - amplitude).abs() / amplitude < 0.01);
        assert!((fit.phase - phase).abs() < 1.0_f64.to_radians());
        assert!((fit.offset - offset).abs() < 1e-3);
    }

    #[test]
    fn test_recovers_under_off_tone_noise() {
        let rate = 1000.0;
        let samples: Vec<f64> = (0..900)
            .map(|i| {
                let t = i as f64 / rate;
                0.5 * (2.0 * PI * 10.0 * t).sin() + 0.02 * (2.0 * PI * 73.0 * t).sin()
            })
            .collect();
        let wave = Waveform::new(samples, rate);

        let fit = fit_tone(&wave, 10.0).unwrap();
        assert!((fit.amplitude - 0.5).abs() / 0.5 < 0.01);
        assert!(fit.phase.abs() < 1.0_f64.to_radians());
    }

    #[test]
    fn test_reconstruction_tracks_clean_signal() {
        let wave = synth(1.0, 5.0, -0.3, 0.0, 500.0, 450);
        let fit = fit_tone(&wave, 5.0).unwrap();

        for (&fitted, &original) in fit.reconstructed.iter().zip(wave.samples()) {
            assert!((fitted - original).abs() < 1e-6);
        }
    }

    #[test]
    fn test_phase_in_principal_range() {
        for phase in [-3.0, -1.5, 0.0, 1.5, 3.0] {
            let wave = synth(1.0, 10.0, phase, 0.0, 1000.0, 500);
            let fit = fit_tone(&wave, 10.0).unwrap();
            assert!(fit.phase > -PI && fit.phase <= PI);
        }
    }

    #[test]
    fn test_short_buffer_is_insufficient() {
        let wave = Waveform::new(vec![1.0, 2.0], 100.0);
        let result = fit_tone(&wave, 10.0);
        assert!(matches!(
            result,
            Err(EisError::InsufficientData { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_zero_frequency_is_degenerate() {
        // sin column collapses to zeros, making the system singular
        let wave = Waveform::new(vec![1.0; 100], 100.0);
        let result = fit_tone(&wave, 0.0);
        assert!(matches!(result, Err(EisError::InsufficientData { .. })));
    }

    #[test]
    fn test_solve3_identity() {
        let x = solve3([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], [3.0, -2.0, 0.5]).unwrap();
        assert_eq!(x, [3.0, -2.0, 0.5]);
    }
}
