use serde::{Deserialize, Serialize};

/// Seed parameters for the excitation frequency ladder: a starting decade and
/// a number of log-spaced points walked down per decade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderConfig {
    /// First ladder entry, also the top of the first decade (Hz).
    pub start_decade_hz: f64,
    /// How many decades the ladder descends below the start.
    pub decades: u32,
    /// Log-spaced points per decade.
    pub points_per_decade: u32,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            start_decade_hz: 1e2,
            decades: 4,
            points_per_decade: 10,
        }
    }
}

/// The ordered, pre-computed excitation sequence for one sweep: strictly
/// decreasing, generated once per session and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct FrequencyLadder {
    points: Vec<f64>,
}

impl FrequencyLadder {
    /// Build the ladder from seed parameters: the start frequency followed by
    /// `decades * points_per_decade` log-spaced steps walking down.
    pub fn generate(config: &LadderConfig) -> Self {
        let mut points = Vec::with_capacity(1 + (config.decades * config.points_per_decade) as usize);
        points.push(config.start_decade_hz);

        let log_start = config.start_decade_hz.log10();
        for decade in 0..config.decades {
            for step in 1..=config.points_per_decade {
                let exponent =
                    log_start - decade as f64 - step as f64 / config.points_per_decade as f64;
                points.push(10f64.powf(exponent));
            }
        }

        Self { points }
    }

    /// Build a ladder from an explicit per-decade seed list replicated across
    /// a decade range, highest decade first. `decade_hi`/`decade_lo` are
    /// powers of ten, inclusive.
    pub fn from_seed(seed: &[f64], decade_hi: i32, decade_lo: i32) -> Self {
        let mut points = Vec::new();
        let mut decade = decade_hi;
        while decade >= decade_lo {
            let scale = 10f64.powi(decade);
            points.extend(seed.iter().map(|&s| s * scale));
            decade -= 1;
        }
        Self { points }
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
