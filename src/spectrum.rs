use crate::error::EisError;
use crate::types::{Demodulation, Waveform};
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// One-sided spectrum restricted to a frequency band. Magnitudes are
/// normalized by the sample count; real/imaginary parts carry the same
/// normalization so ratios between two spectra are calibration-free.
#[derive(Debug, Clone)]
pub struct BandSpectrum {
    pub frequencies: Vec<f64>,
    pub magnitudes: Vec<f64>,
    pub reals: Vec<f64>,
    pub imags: Vec<f64>,
}

impl BandSpectrum {
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Index of the arg-max magnitude bin. Peak selection stays with the
    /// caller; this only answers "where".
    pub fn peak(&self) -> Option<usize> {
        self.magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(index, _)| index)
    }

    /// Demodulation parameters read off one bin.
    pub fn demodulation_at(&self, index: usize) -> Demodulation {
        Demodulation {
            amplitude: self.magnitudes[index],
            phase: self.imags[index].atan2(self.reals[index]),
            frequency: self.frequencies[index],
        }
    }
}

/// Hann-windowed one-sided FFT of `waveform`, masked to `band` (inclusive).
///
/// Used where the commanded ladder frequency may disagree with the actual
/// drive frequency over a band too wide for iterative refinement.
pub fn analyze(waveform: &Waveform, band: (f64, f64)) -> Result<BandSpectrum, EisError> {
    let n = waveform.len();
    if n < 2 {
        return Err(EisError::InsufficientData {
            expected: 2,
            got: n,
        });
    }

    let mut buffer: Vec<Complex64> = waveform
        .samples()
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let window = 0.5 * (1.0 - (2.0 * PI * i as f64 / (n as f64 - 1.0)).cos());
            Complex64::new(value * window, 0.0)
        })
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(n).process(&mut buffer);

    let bin_width = waveform.sample_rate() / n as f64;
    let norm = n as f64;

    let mut spectrum = BandSpectrum {
        frequencies: Vec::new(),
        magnitudes: Vec::new(),
        reals: Vec::new(),
        imags: Vec::new(),
    };

    for (k, value) in buffer.iter().enumerate().take(n / 2 + 1) {
        let frequency = k as f64 * bin_width;
        if frequency < band.0 || frequency > band.1 {
            continue;
        }
        spectrum.frequencies.push(frequency);
        spectrum.magnitudes.push(value.norm() / norm);
        spectrum.reals.push(value.re / norm);
        spectrum.imags.push(value.im / norm);
    }

    if spectrum.is_empty() {
        return Err(EisError::InsufficientData {
            expected: 1,
            got: 0,
        });
    }

    Ok(spectrum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frequency: f64, amplitude: f64, rate: f64, n: usize) -> Waveform {
        let samples = (0..n)
            .map(|i| amplitude * (2.0 * PI * frequency * i as f64 / rate).sin())
            .collect();
        Waveform::new(samples, rate)
    }

    #[test]
    fn test_peak_lands_on_tone_bin() {
        // 10 Hz tone, 1 Hz bin width
        let wave = tone(10.0, 1.0, 1000.0, 1000);
        let spectrum = analyze(&wave, (5.0, 15.0)).unwrap();

        let peak = spectrum.peak().unwrap();
        assert!((spectrum.frequencies[peak] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_band_mask_excludes_out_of_band_peak() {
        let rate = 1000.0;
        let samples: Vec<f64> = (0..1000)
            .map(|i| {
                let t = i as f64 / rate;
                // strong 50 Hz interferer outside the band, weak 10 Hz inside
                0.1 * (2.0 * PI * 10.0 * t).sin() + 1.0 * (2.0 * PI * 50.0 * t).sin()
            })
            .collect();
        let wave = Waveform::new(samples, rate);

        let spectrum = analyze(&wave, (5.0, 15.0)).unwrap();
        let peak = spectrum.peak().unwrap();
        assert!((spectrum.frequencies[peak] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_phase_difference_between_channels() {
        let rate = 1000.0;
        let n = 1000;
        let shift = 0.7;
        let a: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 10.0 * i as f64 / rate).sin())
            .collect();
        let b: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 10.0 * i as f64 / rate + shift).sin())
            .collect();

        let sa = analyze(&Waveform::new(a, rate), (5.0, 15.0)).unwrap();
        let sb = analyze(&Waveform::new(b, rate), (5.0, 15.0)).unwrap();

        let pa = sa.peak().unwrap();
        let pb = sb.peak().unwrap();
        let da = sa.demodulation_at(pa);
        let db = sb.demodulation_at(pb);

        let mut diff = db.phase - da.phase;
        while diff > PI {
            diff -= 2.0 * PI;
        }
        while diff <= -PI {
            diff += 2.0 * PI;
        }
        assert!((diff - shift).abs() < 0.02, "phase diff {diff}");
    }

    #[test]
    fn test_amplitude_ratio_preserved() {
        let wave_a = tone(10.0, 0.2, 1000.0, 1000);
        let wave_b = tone(10.0, 1.0, 1000.0, 1000);

        let sa = analyze(&wave_a, (5.0, 15.0)).unwrap();
        let sb = analyze(&wave_b, (5.0, 15.0)).unwrap();

        let ratio = sb.magnitudes[sb.peak().unwrap()] / sa.magnitudes[sa.peak().unwrap()];
        assert!((ratio - 5.0).abs() < 0.05, "ratio {ratio}");
    }

    #[test]
    fn test_empty_band_is_an_error() {
        let wave = tone(10.0, 1.0, 1000.0, 1000);
        assert!(matches!(
            analyze(&wave, (400.25, 400.75)),
            Err(EisError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_short_buffer_is_an_error() {
        let wave = Waveform::new(vec![1.0], 1000.0);
        assert!(matches!(
            analyze(&wave, (0.0, 100.0)),
            Err(EisError::InsufficientData { .. })
        ));
    }
}
