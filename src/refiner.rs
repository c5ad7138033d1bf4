use crate::fitting::fit_tone;
use crate::types::Waveform;

/// Default scan granularity in Hz.
pub const DEFAULT_STEP_HZ: f64 = 0.1;

/// Locate the true excitation tone inside a narrow band around the commanded
/// frequency, compensating oscillator drift.
///
/// Candidates are fitted at fixed `step` spacing from the bottom of the band
/// upward; the best fitted amplitude so far is tracked and the scan stops
/// early once the amplitude fails to improve for two consecutive candidates.
/// The band near resonance is expected unimodal, so this is a local-maximum
/// early exit, not a global search.
///
/// Returns the frequency of the last amplitude improvement, or `None` when no
/// candidate ever improved (caller falls back to the commanded frequency).
pub fn refine(waveform: &Waveform, band: (f64, f64), step: f64) -> Option<f64> {
    if step <= 0.0 || band.1 <= band.0 {
        return None;
    }

    let mut best_amplitude = 0.0;
    let mut best_frequency = None;
    let mut declines = 0;

    let mut candidate = band.0;
    while candidate < band.1 {
        let Ok(fit) = fit_tone(waveform, candidate) else {
            // degenerate fit ends the scan as if the band were exhausted
            break;
        };

        if fit.amplitude > best_amplitude {
            best_amplitude = fit.amplitude;
            best_frequency = Some(candidate);
            declines = 0;
        } else {
            declines += 1;
            if declines >= 2 {
                break;
            }
        }

        candidate += step;
    }

    best_frequency
}
