use crate::error::EisError;
use crate::fitting::fit_tone;
use crate::impedance::{ImpedanceCalculator, QualityGate, Verdict};
use crate::instrument::{AcquisitionPlan, Instrument, ReadOutcome};
use crate::ladder::FrequencyLadder;
use crate::refiner;
use crate::sink::ResultSink;
use crate::spectrum;
use crate::types::{Demodulation, ImpedanceSample, StatusLevel, SweepResult, SweepState, Waveform};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Cooperative cancellation signal, checked between ladder steps only. A step
/// always runs to completion once acquisition has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepControl {
    Continue,
    Stop,
    Disconnect,
}

/// Which demodulation chain a sweep step runs after tone refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemodMethod {
    /// Least-squares fit of both channels at the refined tone.
    LeastSquares,
    /// Least-squares denoise, then FFT peak pick on both channels. Useful
    /// when the drive may sit far from the commanded frequency.
    SpectralPeak,
}

/// Bounded polling for the instrument handshake. The deployed scripts polled
/// without a deadline and could hang on a hardware fault; the bound here is
/// explicit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HandshakeConfig {
    pub poll_interval_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            max_wait_ms: 10_000,
        }
    }
}

/// Everything that varied between the near-identical deployed sweep scripts,
/// folded into one configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub demod_method: DemodMethod,
    /// Software gain applied to the de-meaned current-proxy channel.
    pub current_gain: f64,
    /// Refinement band half-width as a fraction of the nominal frequency.
    pub refine_band_fraction: f64,
    /// Refinement scan granularity in Hz.
    pub refine_step_hz: f64,
    /// Settle delay between commanding the excitation and polling, ms.
    pub settle_ms: u64,
    pub handshake: HandshakeConfig,
    pub plan: AcquisitionPlan,
    pub quality_gate: QualityGate,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            demod_method: DemodMethod::LeastSquares,
            current_gain: 100.0,
            refine_band_fraction: 0.1,
            refine_step_hz: refiner::DEFAULT_STEP_HZ,
            settle_ms: 500,
            handshake: HandshakeConfig::default(),
            plan: AcquisitionPlan::default(),
            quality_gate: QualityGate::default(),
        }
    }
}

enum StepOutcome {
    Accepted(ImpedanceSample),
    Rejected,
}

/// Drives one sweep at a time over the configured frequency ladder.
///
/// Owns the instrument connection, the ladder and the in-flight result buffer
/// exclusively; results are pushed out through the sink and the caller's
/// sample callback. The socket (if any) stays with the caller, which feeds
/// back cancellation through the control callback.
pub struct SweepScheduler<I: Instrument> {
    instrument: I,
    ladder: FrequencyLadder,
    config: SweepConfig,
    calculator: ImpedanceCalculator,
    state: SweepState,
    result: SweepResult,
}

impl<I: Instrument> SweepScheduler<I> {
    pub fn new(mut instrument: I, ladder: FrequencyLadder, config: SweepConfig) -> Result<Self, EisError> {
        instrument.configure_channels(&[1, 2])?;
        let capacity = ladder.len().max(SweepResult::DEFAULT_CAPACITY);
        let calculator = ImpedanceCalculator::new(config.quality_gate);
        Ok(Self {
            instrument,
            ladder,
            config,
            calculator,
            state: SweepState::Idle,
            result: SweepResult::with_capacity(capacity),
        })
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn ladder(&self) -> &FrequencyLadder {
        &self.ladder
    }

    /// Result of the most recent sweep. Finalized (and therefore immutable)
    /// once `run_sweep` has returned.
    pub fn result(&self) -> &SweepResult {
        &self.result
    }

    /// Run one full sweep.
    ///
    /// `on_sample` receives every accepted sample for transmission; an error
    /// from it is a connection failure and aborts the sweep. `poll_control`
    /// is consulted between ladder steps only. Already-accepted samples
    /// survive every abort path and are still offered to the sink.
    pub fn run_sweep(
        &mut self,
        sink: &mut dyn ResultSink,
        mut on_sample: impl FnMut(&ImpedanceSample) -> Result<(), EisError>,
        mut poll_control: impl FnMut() -> SweepControl,
    ) -> Result<(), EisError> {
        if self.state == SweepState::Running {
            return Err(EisError::Config(
                "sweep already running on this instrument".to_string(),
            ));
        }

        self.state = SweepState::Running;
        self.result = SweepResult::with_capacity(self.ladder.len().max(SweepResult::DEFAULT_CAPACITY));
        sink.on_status(StatusLevel::Info, "sweep started");

        let mut prior: Option<ImpedanceSample> = None;
        let mut send_failure: Option<EisError> = None;
        let points = self.ladder.points().to_vec();

        for (index, frequency) in points.into_iter().enumerate() {
            match poll_control() {
                SweepControl::Continue => {}
                SweepControl::Stop => {
                    info!("STOP received, aborting sweep before ladder index {index}");
                    sink.on_status(StatusLevel::Info, "sweep stopped by peer");
                    self.state = SweepState::Aborted;
                    break;
                }
                SweepControl::Disconnect => {
                    info!("peer disconnected, aborting sweep before ladder index {index}");
                    sink.on_status(StatusLevel::Warning, "peer disconnected during sweep");
                    self.state = SweepState::Aborted;
                    break;
                }
            }

            debug!("measuring ladder index {index} at {frequency} Hz");
            match self.measure_step(frequency, prior.as_ref()) {
                Ok(StepOutcome::Accepted(sample)) => {
                    self.result.set(index, sample);
                    prior = Some(sample);
                    sink.on_sample(&sample);
                    if let Err(e) = on_sample(&sample) {
                        warn!("transmitting sample failed: {e}");
                        sink.on_status(StatusLevel::Error, "result transmission failed");
                        self.state = SweepState::Aborted;
                        send_failure = Some(e);
                        break;
                    }
                }
                Ok(StepOutcome::Rejected) => {
                    // gate rejection already logged; ladder advances, no retry
                }
                Err(e) => {
                    warn!("skipping {frequency} Hz: {e}");
                    sink.on_status(
                        StatusLevel::Warning,
                        &format!("skipped {frequency} Hz: {e}"),
                    );
                }
            }
        }

        if self.state == SweepState::Running {
            self.state = SweepState::Completed;
        }
        self.result.finalize();
        sink.on_status(
            StatusLevel::Info,
            &format!(
                "sweep {:?} with {} accepted samples",
                self.state,
                self.result.len()
            ),
        );
        sink.on_sweep_complete(&self.result);

        match send_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One ladder step: excite, handshake, acquire, demodulate, gate. All
    /// errors out of here are contained by the caller; the ladder advances.
    fn measure_step(
        &mut self,
        frequency: f64,
        prior: Option<&ImpedanceSample>,
    ) -> Result<StepOutcome, EisError> {
        self.instrument.send_command(&format!("{frequency}"))?;
        std::thread::sleep(Duration::from_millis(self.config.settle_ms));

        let capture = self.await_capture(frequency)?;
        let (current_raw, voltage_raw) = capture;

        let current = current_raw.demean().scaled(self.config.current_gain);
        let voltage = voltage_raw.demean();

        let band = (
            frequency * (1.0 - self.config.refine_band_fraction),
            frequency * (1.0 + self.config.refine_band_fraction),
        );
        let tone = refiner::refine(&current, band, self.config.refine_step_hz)
            .unwrap_or(frequency);
        if tone != frequency {
            debug!("refined {frequency} Hz command to {tone} Hz drive");
        }

        let (current_demod, voltage_demod) = match self.config.demod_method {
            DemodMethod::LeastSquares => {
                let current_fit = fit_tone(&current, tone)?;
                let voltage_fit = fit_tone(&voltage, tone)?;
                (
                    current_fit.demodulation(tone),
                    voltage_fit.demodulation(tone),
                )
            }
            DemodMethod::SpectralPeak => self.demodulate_spectral(&current, &voltage, tone)?,
        };

        debug!(
            "recovered amplitudes at {:.4} Hz: V {:.3e}, I {:.3e}",
            current_demod.frequency, voltage_demod.amplitude, current_demod.amplitude
        );

        match self.calculator.compute(&current_demod, &voltage_demod, prior) {
            Verdict::Accepted(sample) => Ok(StepOutcome::Accepted(sample)),
            Verdict::Rejected(reason) => {
                info!("frequency {frequency} Hz skipped: {reason}");
                Ok(StepOutcome::Rejected)
            }
        }
    }

    /// Handshake with the front end: wait for "Received", trigger the
    /// capture, wait for "DoneRecv". Bounded by the configured deadline.
    fn await_capture(&mut self, frequency: f64) -> Result<(Waveform, Waveform), EisError> {
        let acquisition = self.config.plan.for_frequency(frequency);
        let deadline = Instant::now() + Duration::from_millis(self.config.handshake.max_wait_ms);
        let poll_interval = Duration::from_millis(self.config.handshake.poll_interval_ms);
        let mut capture: Option<(Waveform, Waveform)> = None;

        loop {
            if Instant::now() >= deadline {
                return Err(EisError::Timeout);
            }

            match self.instrument.read_response()? {
                ReadOutcome::Ready(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    match text.trim_matches('\0').trim() {
                        "Received" => {
                            capture = Some(self.instrument.acquire(
                                acquisition.sample_rate,
                                acquisition.buffer_size,
                            )?);
                        }
                        "DoneRecv" => break,
                        other => debug!("ignoring instrument response {other:?}"),
                    }
                }
                ReadOutcome::Empty => std::thread::sleep(poll_interval),
                ReadOutcome::Fault(kind) => {
                    return Err(EisError::InstrumentProtocol(kind.to_string()));
                }
            }
        }

        capture.ok_or_else(|| {
            EisError::InstrumentProtocol("completion signaled before any capture".to_string())
        })
    }

    /// Spectral demodulation: denoise both channels with the least-squares
    /// fit, then read amplitude/phase off the FFT peak near the tone.
    fn demodulate_spectral(
        &self,
        current: &Waveform,
        voltage: &Waveform,
        tone: f64,
    ) -> Result<(Demodulation, Demodulation), EisError> {
        let current_fit = fit_tone(current, tone)?;
        let voltage_fit = fit_tone(voltage, tone)?;

        let current_clean = Waveform::new(current_fit.reconstructed, current.sample_rate());
        let voltage_clean = Waveform::new(voltage_fit.reconstructed, voltage.sample_rate());

        let band = (tone * 0.5, tone * 1.5);
        let current_spectrum = spectrum::analyze(&current_clean, band)?;
        let voltage_spectrum = spectrum::analyze(&voltage_clean, band)?;

        let current_peak = current_spectrum.peak().ok_or(EisError::InsufficientData {
            expected: 1,
            got: 0,
        })?;
        let voltage_peak = voltage_spectrum.peak().ok_or(EisError::InsufficientData {
            expected: 1,
            got: 0,
        })?;

        Ok((
            current_spectrum.demodulation_at(current_peak),
            voltage_spectrum.demodulation_at(voltage_peak),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::FaultKind;
    use crate::ladder::FrequencyLadder;
    use crate::types::ControlCommand;
    use std::f64::consts::PI;

    /// Scripted front end: replays the firmware handshake and hands out
    /// synthetic captures with a fixed impedance per frequency.
    struct ScriptedInstrument {
        z_real_by_step: Vec<f64>,
        step: usize,
        commanded: Option<f64>,
        acquired: bool,
        awaiting_done: bool,
        fault_on_step: Option<usize>,
    }

    impl ScriptedInstrument {
        fn new(z_real_by_step: Vec<f64>) -> Self {
            Self {
                z_real_by_step,
                step: 0,
                commanded: None,
                acquired: false,
                awaiting_done: false,
                fault_on_step: None,
            }
        }

        fn with_fault_on_step(mut self, step: usize) -> Self {
            self.fault_on_step = Some(step);
            self
        }
    }

    impl Instrument for ScriptedInstrument {
        fn send_command(&mut self, text: &str) -> Result<(), EisError> {
            self.commanded = Some(text.parse().unwrap());
            self.acquired = false;
            self.awaiting_done = false;
            Ok(())
        }

        fn read_response(&mut self) -> Result<ReadOutcome, EisError> {
            if self.fault_on_step == Some(self.step) && !self.acquired {
                self.step += 1;
                return Ok(ReadOutcome::Fault(FaultKind::BufferOverflow));
            }
            if !self.awaiting_done {
                self.awaiting_done = true;
                Ok(ReadOutcome::Ready(b"Received".to_vec()))
            } else if self.acquired {
                Ok(ReadOutcome::Ready(b"DoneRecv".to_vec()))
            } else {
                Ok(ReadOutcome::Empty)
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
            let frequency = self.commanded.unwrap();
            let z_real = self.z_real_by_step[self.step.min(self.z_real_by_step.len() - 1)];
            self.step += 1;

            // purely resistive cell: voltage 1 V, inverted current proxy
            let omega = 2.0 * PI * frequency;
            let voltage: Vec<f64> = (0..buffer_size)
                .map(|i| (omega * i as f64 / sample_rate).sin())
                .collect();
            let current: Vec<f64> = (0..buffer_size)
                .map(|i| -(omega * i as f64 / sample_rate).sin() / z_real / 100.0)
                .collect();

            self.acquired = true;
            Ok((
                Waveform::new(current, sample_rate),
                Waveform::new(voltage, sample_rate),
            ))
        }
    }

    /// Sink that remembers everything pushed into it.
    #[derive(Default)]
    struct RecordingSink {
        samples: Vec<ImpedanceSample>,
        statuses: Vec<(StatusLevel, String)>,
        completed: Option<usize>,
    }

    impl ResultSink for RecordingSink {
        fn on_sample(&mut self, sample: &ImpedanceSample) {
            self.samples.push(*sample);
        }
        fn on_status(&mut self, level: StatusLevel, message: &str) {
            self.statuses.push((level, message.to_string()));
        }
        fn on_sweep_complete(&mut self, result: &SweepResult) {
            self.completed = Some(result.len());
        }
    }

    fn fast_config() -> SweepConfig {
        SweepConfig {
            settle_ms: 0,
            handshake: HandshakeConfig {
                poll_interval_ms: 0,
                max_wait_ms: 1_000,
            },
            ..SweepConfig::default()
        }
    }

    fn ladder(points: &[f64]) -> FrequencyLadder {
        // explicit seed at decade 0 reproduces the points verbatim
        FrequencyLadder::from_seed(points, 0, 0)
    }

    #[test]
    fn test_end_to_end_two_point_ladder() {
        let instrument = ScriptedInstrument::new(vec![50.0, 52.0]);
        let mut scheduler =
            SweepScheduler::new(instrument, ladder(&[10.0, 5.0]), fast_config()).unwrap();
        let mut sink = RecordingSink::default();
        let mut transmitted = Vec::new();

        scheduler
            .run_sweep(
                &mut sink,
                |sample| {
                    transmitted.push(*sample);
                    Ok(())
                },
                || SweepControl::Continue,
            )
            .unwrap();

        assert_eq!(scheduler.state(), SweepState::Completed);
        let rows = scheduler.result().rows();
        assert_eq!(rows.len(), 2);
        assert!((rows[0].frequency - 10.0).abs() <= 0.1);
        assert!((rows[1].frequency - 5.0).abs() <= 0.1);
        assert!((rows[0].z_real - 50.0).abs() / 50.0 < 0.01);
        assert!((rows[1].z_real - 52.0).abs() / 52.0 < 0.01);
        assert!(rows[0].z_imag_neg.abs() < 0.5);

        // transmitted in ladder order, one frame callback per accepted sample
        assert_eq!(transmitted, rows.to_vec());
        assert_eq!(sink.samples, rows.to_vec());
        assert_eq!(sink.completed, Some(2));
    }

    #[test]
    fn test_spectral_method_recovers_impedance() {
        let config = SweepConfig {
            demod_method: DemodMethod::SpectralPeak,
            ..fast_config()
        };
        let instrument = ScriptedInstrument::new(vec![50.0]);
        let mut scheduler = SweepScheduler::new(instrument, ladder(&[10.0]), config).unwrap();
        let mut sink = RecordingSink::default();

        scheduler
            .run_sweep(&mut sink, |_| Ok(()), || SweepControl::Continue)
            .unwrap();

        let rows = scheduler.result().rows();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].z_real - 50.0).abs() / 50.0 < 0.01, "{}", rows[0].z_real);
    }

    #[test]
    fn test_stop_between_steps_aborts_and_preserves_samples() {
        let instrument = ScriptedInstrument::new(vec![50.0; 5]);
        let mut scheduler = SweepScheduler::new(
            instrument,
            ladder(&[10.0, 9.0, 8.0, 7.0, 6.0]),
            fast_config(),
        )
        .unwrap();
        let mut sink = RecordingSink::default();

        let mut polls = 0;
        scheduler
            .run_sweep(
                &mut sink,
                |_| Ok(()),
                || {
                    polls += 1;
                    // STOP arrives between step 1 and step 2
                    if polls >= 2 {
                        SweepControl::Stop
                    } else {
                        SweepControl::Continue
                    }
                },
            )
            .unwrap();

        assert_eq!(scheduler.state(), SweepState::Aborted);
        assert_eq!(scheduler.result().rows().len(), 1);
        assert_eq!(sink.completed, Some(1));
    }

    #[test]
    fn test_disconnect_aborts() {
        let instrument = ScriptedInstrument::new(vec![50.0; 3]);
        let mut scheduler =
            SweepScheduler::new(instrument, ladder(&[10.0, 9.0, 8.0]), fast_config()).unwrap();
        let mut sink = RecordingSink::default();

        scheduler
            .run_sweep(&mut sink, |_| Ok(()), || SweepControl::Disconnect)
            .unwrap();

        assert_eq!(scheduler.state(), SweepState::Aborted);
        assert!(scheduler.result().is_empty());
    }

    #[test]
    fn test_quality_drop_skips_exactly_one_step() {
        // 40 < 0.95 * 50: step 1 rejected, steps 0 and 2 accepted
        let instrument = ScriptedInstrument::new(vec![50.0, 40.0, 51.0]);
        let mut scheduler =
            SweepScheduler::new(instrument, ladder(&[10.0, 9.0, 8.0]), fast_config()).unwrap();
        let mut sink = RecordingSink::default();

        scheduler
            .run_sweep(&mut sink, |_| Ok(()), || SweepControl::Continue)
            .unwrap();

        assert_eq!(scheduler.state(), SweepState::Completed);
        let rows = scheduler.result().rows();
        assert_eq!(rows.len(), 2);
        assert!((rows[0].z_real - 50.0).abs() / 50.0 < 0.01);
        assert!((rows[1].z_real - 51.0).abs() / 51.0 < 0.01);
    }

    #[test]
    fn test_instrument_fault_skips_step_and_continues() {
        let instrument =
            ScriptedInstrument::new(vec![50.0, 51.0, 52.0]).with_fault_on_step(1);
        let mut scheduler =
            SweepScheduler::new(instrument, ladder(&[10.0, 9.0, 8.0]), fast_config()).unwrap();
        let mut sink = RecordingSink::default();

        scheduler
            .run_sweep(&mut sink, |_| Ok(()), || SweepControl::Continue)
            .unwrap();

        assert_eq!(scheduler.state(), SweepState::Completed);
        assert_eq!(scheduler.result().rows().len(), 2);
        assert!(sink
            .statuses
            .iter()
            .any(|(level, _)| *level == StatusLevel::Warning));
    }

    #[test]
    fn test_send_failure_aborts_with_partial_result() {
        let instrument = ScriptedInstrument::new(vec![50.0, 51.0, 52.0]);
        let mut scheduler =
            SweepScheduler::new(instrument, ladder(&[10.0, 9.0, 8.0]), fast_config()).unwrap();
        let mut sink = RecordingSink::default();

        let mut sent = 0;
        let outcome = scheduler.run_sweep(
            &mut sink,
            |_| {
                sent += 1;
                if sent >= 2 {
                    Err(EisError::io(
                        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone"),
                        "transmitting result frame",
                    ))
                } else {
                    Ok(())
                }
            },
            || SweepControl::Continue,
        );

        assert!(outcome.is_err());
        assert_eq!(scheduler.state(), SweepState::Aborted);
        // both accepted samples survive the abort and reach the sink
        assert_eq!(scheduler.result().rows().len(), 2);
        assert_eq!(sink.completed, Some(2));
    }

    #[test]
    fn test_rerun_resets_result() {
        let instrument = ScriptedInstrument::new(vec![50.0, 51.0, 52.0, 53.0]);
        let mut scheduler =
            SweepScheduler::new(instrument, ladder(&[10.0, 9.0]), fast_config()).unwrap();
        let mut sink = RecordingSink::default();

        scheduler
            .run_sweep(&mut sink, |_| Ok(()), || SweepControl::Continue)
            .unwrap();
        assert_eq!(scheduler.result().rows().len(), 2);

        scheduler
            .run_sweep(&mut sink, |_| Ok(()), || SweepControl::Continue)
            .unwrap();
        assert_eq!(scheduler.state(), SweepState::Completed);
        assert_eq!(scheduler.result().rows().len(), 2);
    }

    #[test]
    fn test_unknown_command_is_not_a_control_signal() {
        // scheduler-level counterpart of the idle no-op scenario: parsing an
        // unrecognized token never yields Start or Stop
        assert!(matches!(
            ControlCommand::parse(b"CALIBRATE"),
            ControlCommand::Unknown(_)
        ));
    }

    #[test]
    fn test_handshake_timeout_is_contained() {
        /// Never answers: handshake must hit the deadline, step is skipped.
        struct SilentInstrument;
        impl Instrument for SilentInstrument {
            fn send_command(&mut self, _text: &str) -> Result<(), EisError> {
                Ok(())
            }
            fn read_response(&mut self) -> Result<ReadOutcome, EisError> {
                Ok(ReadOutcome::Empty)
            }
            fn configure_channels(&mut self, _channels: &[u32]) -> Result<(), EisError> {
                Ok(())
            }
            fn acquire(
                &mut self,
                _sample_rate: f64,
                _buffer_size: usize,
            ) -> Result<(Waveform, Waveform), EisError> {
                unreachable!("acquisition is never reached")
            }
        }

        let config = SweepConfig {
            settle_ms: 0,
            handshake: HandshakeConfig {
                poll_interval_ms: 1,
                max_wait_ms: 20,
            },
            ..SweepConfig::default()
        };
        let mut scheduler =
            SweepScheduler::new(SilentInstrument, ladder(&[10.0]), config).unwrap();
        let mut sink = RecordingSink::default();

        scheduler
            .run_sweep(&mut sink, |_| Ok(()), || SweepControl::Continue)
            .unwrap();

        assert_eq!(scheduler.state(), SweepState::Completed);
        assert!(scheduler.result().is_empty());
    }
}
