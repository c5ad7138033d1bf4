use crate::error::EisError;
use crate::instrument::{Instrument, ReadOutcome};
use crate::types::Waveform;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Randles-style electrochemical cell: a series resistance in front of a
/// charge-transfer resistance shunted by the double-layer capacitance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CellModel {
    pub series_resistance: f64,
    pub charge_transfer_resistance: f64,
    pub double_layer_capacitance: f64,
}

impl Default for CellModel {
    fn default() -> Self {
        Self {
            series_resistance: 100.0,
            charge_transfer_resistance: 1000.0,
            double_layer_capacitance: 1e-4,
        }
    }
}

impl CellModel {
    /// Complex impedance at `frequency`:
    /// `Z = Rs + Rct / (1 + j*w*Rct*Cdl)`.
    pub fn impedance(&self, frequency: f64) -> Complex64 {
        let omega = 2.0 * PI * frequency;
        let rc = Complex64::new(
            1.0,
            omega * self.charge_transfer_resistance * self.double_layer_capacitance,
        );
        Complex64::new(self.series_resistance, 0.0)
            + Complex64::new(self.charge_transfer_resistance, 0.0) / rc
    }
}

/// Instrument stand-in that synthesizes the two scope channels from a cell
/// model and replays the firmware handshake, so the full pipeline runs with
/// no hardware attached.
///
/// Channel A carries the inverted current proxy (shunt volts, one
/// `proxy_gain`-th of the instrument current), channel B the excitation
/// voltage, mirroring the front-end wiring the pipeline expects.
pub struct SimulatedInstrument {
    model: CellModel,
    excitation_volts: f64,
    proxy_gain: f64,
    noise_volts: f64,
    rng: XorShift64,
    handshake: Handshake,
    commanded_hz: Option<f64>,
    acquired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    Idle,
    Commanded,
    Acquiring,
}

impl SimulatedInstrument {
    pub fn new(model: CellModel, excitation_volts: f64) -> Self {
        Self {
            model,
            excitation_volts,
            proxy_gain: 100.0,
            noise_volts: 1e-5,
            rng: XorShift64::new(0x9e37_79b9_7f4a_7c15),
            handshake: Handshake::Idle,
            commanded_hz: None,
            acquired: false,
        }
    }

    /// Additive white noise level on both channels, in volts.
    pub fn with_noise(mut self, noise_volts: f64) -> Self {
        self.noise_volts = noise_volts;
        self
    }

    /// Shunt conversion factor; must match the pipeline's current gain.
    pub fn with_proxy_gain(mut self, proxy_gain: f64) -> Self {
        self.proxy_gain = proxy_gain;
        self
    }

    pub fn model(&self) -> &CellModel {
        &self.model
    }

    fn synthesize(&mut self, frequency: f64, sample_rate: f64, n: usize) -> (Waveform, Waveform) {
        let z = self.model.impedance(frequency);
        let current_amp = self.excitation_volts / z.norm();
        let current_phase = -z.arg();
        let omega = 2.0 * PI * frequency;

        let mut current = Vec::with_capacity(n);
        let mut voltage = Vec::with_capacity(n);
        for i in 0..n {
            let t = i as f64 / sample_rate;
            let v = self.excitation_volts * (omega * t).sin();
            let i_cell = current_amp * (omega * t + current_phase).sin();
            // inverting current-sense stage, then shunt scaling
            current.push(-i_cell / self.proxy_gain + self.noise_volts * self.rng.bipolar());
            voltage.push(v + self.noise_volts * self.rng.bipolar());
        }
        (
            Waveform::new(current, sample_rate),
            Waveform::new(voltage, sample_rate),
        )
    }
}

impl Instrument for SimulatedInstrument {
    fn send_command(&mut self, text: &str) -> Result<(), EisError> {
        let frequency: f64 = text
            .trim()
            .parse()
            .map_err(|_| EisError::InstrumentProtocol(format!("bad frequency command {text:?}")))?;
        self.commanded_hz = Some(frequency);
        self.handshake = Handshake::Commanded;
        self.acquired = false;
        Ok(())
    }

    fn read_response(&mut self) -> Result<ReadOutcome, EisError> {
        match self.handshake {
            Handshake::Commanded => {
                self.handshake = Handshake::Acquiring;
                Ok(ReadOutcome::Ready(b"Received".to_vec()))
            }
            Handshake::Acquiring if self.acquired => {
                self.handshake = Handshake::Idle;
                Ok(ReadOutcome::Ready(b"DoneRecv".to_vec()))
            }
            _ => Ok(ReadOutcome::Empty),
        }
    }

    fn configure_channels(&mut self, _channels: &[u32]) -> Result<(), EisError> {
        Ok(())
    }

    fn acquire(
        &mut self,
        sample_rate: f64,
        buffer_size: usize,
    ) -> Result<(Waveform, Waveform), EisError> {
        let frequency = self.commanded_hz.ok_or_else(|| {
            EisError::InstrumentProtocol("acquisition before excitation command".to_string())
        })?;
        let capture = self.synthesize(frequency, sample_rate, buffer_size);
        self.acquired = true;
        Ok(capture)
    }
}

/// Small deterministic noise source; keeps captures reproducible without
/// pulling in an RNG dependency for cosmetic jitter.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform in [-1, 1).
    fn bipolar(&mut self) -> f64 {
        (self.next() >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_limits() {
        let model = CellModel::default();

        // at DC the capacitor is open: Rs + Rct
        let low = model.impedance(1e-6);
        assert!((low.re - 1100.0).abs() < 1.0);

        // far above the corner the capacitor shorts Rct away
        let high = model.impedance(1e6);
        assert!((high.re - 100.0).abs() < 1.0);
        assert!(high.im.abs() < 1.0);
    }

    #[test]
    fn test_capacitive_phase_is_negative() {
        let model = CellModel::default();
        // corner region: arg(Z) dips negative
        let z = model.impedance(1.6);
        assert!(z.im < 0.0);
    }

    #[test]
    fn test_handshake_sequence() {
        let mut sim = SimulatedInstrument::new(CellModel::default(), 1.0);

        assert_eq!(sim.read_response().unwrap(), ReadOutcome::Empty);

        sim.send_command("10.0").unwrap();
        assert_eq!(
            sim.read_response().unwrap(),
            ReadOutcome::Ready(b"Received".to_vec())
        );
        // acquisition still pending
        assert_eq!(sim.read_response().unwrap(), ReadOutcome::Empty);

        let (current, voltage) = sim.acquire(1000.0, 900).unwrap();
        assert_eq!(current.len(), 900);
        assert_eq!(voltage.len(), 900);
        assert_eq!(
            sim.read_response().unwrap(),
            ReadOutcome::Ready(b"DoneRecv".to_vec())
        );
        assert_eq!(sim.read_response().unwrap(), ReadOutcome::Empty);
    }

    #[test]
    fn test_acquire_without_command_is_protocol_error() {
        let mut sim = SimulatedInstrument::new(CellModel::default(), 1.0);
        assert!(matches!(
            sim.acquire(1000.0, 100),
            Err(EisError::InstrumentProtocol(_))
        ));
    }

    #[test]
    fn test_channels_encode_cell_impedance() {
        let mut sim = SimulatedInstrument::new(CellModel::default(), 1.0).with_noise(0.0);
        sim.send_command("10.0").unwrap();
        let (current, voltage) = sim.acquire(1000.0, 1000).unwrap();

        let z = sim.model().impedance(10.0);
        let v_peak = voltage
            .samples()
            .iter()
            .fold(0.0_f64, |acc, &v| acc.max(v.abs()));
        let i_peak = current
            .samples()
            .iter()
            .fold(0.0_f64, |acc, &v| acc.max(v.abs()));

        assert!((v_peak - 1.0).abs() < 1e-3);
        // proxy amplitude = |I| / gain = |V| / (|Z| * gain)
        let expected = 1.0 / (z.norm() * 100.0);
        assert!((i_peak - expected).abs() / expected < 1e-2);
    }
}
