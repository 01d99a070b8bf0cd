//! Signal generator controller
//!
//! Runs independently of the acquisition state machine and shares only the
//! device session with it.

use log::{debug, info};

use crate::driver::{ArbitraryLimits, PhaseSweep};
use crate::error::{Result, ScopeError};
use crate::session::DeviceSession;
use crate::types::{IndexMode, SigGenTrigSource, SigGenTrigType, SweepType, WaveType};

/// What starts the generator and how
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SigGenTrigger {
    pub trigger_type: SigGenTrigType,
    pub source: SigGenTrigSource,
    /// Threshold in ADC counts when `source` is the external input
    pub ext_in_threshold: i16,
}

/// Built-in waveform, optionally swept between two frequencies
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltInSignal {
    pub offset_uv: i32,
    pub pk_to_pk_uv: u32,
    pub wave: WaveType,
    pub start_frequency: f32,
    pub stop_frequency: f32,
    pub increment: f32,
    pub dwell_time: f32,
    pub sweep_type: SweepType,
    pub shots: u32,
    pub sweeps: u32,
    pub trigger: SigGenTrigger,
}

impl Default for BuiltInSignal {
    fn default() -> Self {
        Self {
            offset_uv: 0,
            pk_to_pk_uv: 1_000_000,
            wave: WaveType::Sine,
            start_frequency: 1_000.0,
            stop_frequency: 1_000.0,
            increment: 0.0,
            dwell_time: 0.0,
            sweep_type: SweepType::Up,
            shots: 0,
            sweeps: 0,
            trigger: SigGenTrigger::default(),
        }
    }
}

impl BuiltInSignal {
    /// A continuous, unswept waveform
    pub fn fixed(wave: WaveType, frequency: f32, pk_to_pk_uv: u32) -> Self {
        Self {
            wave,
            start_frequency: frequency,
            stop_frequency: frequency,
            pk_to_pk_uv,
            ..Self::default()
        }
    }

    fn is_sweep(&self) -> bool {
        self.increment > 0.0 && self.start_frequency != self.stop_frequency
    }
}

/// Arbitrary waveform played back by the AWG
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrarySignal {
    pub offset_uv: i32,
    pub pk_to_pk_uv: u32,
    pub waveform: Vec<i16>,
    pub index_mode: IndexMode,
    /// Playback frequency of the whole waveform, in Hz
    pub start_frequency: f64,
    pub stop_frequency: f64,
    pub increment: f64,
    pub dwell_count: u32,
    pub sweep_type: SweepType,
    pub shots: u32,
    pub sweeps: u32,
    pub trigger: SigGenTrigger,
}

impl ArbitrarySignal {
    /// Continuous playback of `waveform` at `frequency`
    pub fn new(waveform: Vec<i16>, frequency: f64) -> Self {
        Self {
            offset_uv: 0,
            pk_to_pk_uv: 1_000_000,
            waveform,
            index_mode: IndexMode::Single,
            start_frequency: frequency,
            stop_frequency: frequency,
            increment: 0.0,
            dwell_count: 0,
            sweep_type: SweepType::Up,
            shots: 0,
            sweeps: 0,
            trigger: SigGenTrigger::default(),
        }
    }
}

/// Currently configured output
#[derive(Debug, Clone, PartialEq)]
pub enum SigGenOutput {
    BuiltIn(BuiltInSignal),
    Arbitrary {
        signal: ArbitrarySignal,
        phases: PhaseSweep,
    },
}

/// Controls the unit's signal generator
#[derive(Debug, Default)]
pub struct SigGenController {
    output: Option<SigGenOutput>,
}

impl SigGenController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> Option<&SigGenOutput> {
        self.output.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.output.is_some()
    }

    fn trigger_source(&self) -> Option<SigGenTrigSource> {
        self.output.as_ref().map(|output| match output {
            SigGenOutput::BuiltIn(signal) => signal.trigger.source,
            SigGenOutput::Arbitrary { signal, .. } => signal.trigger.source,
        })
    }

    /// Configure a built-in waveform
    pub fn set_built_in(&mut self, session: &DeviceSession, signal: &BuiltInSignal) -> Result<()> {
        if !(signal.start_frequency >= 0.0 && signal.stop_frequency >= 0.0) {
            return Err(ScopeError::invalid("signal frequencies must be non-negative"));
        }
        if signal.is_sweep() && signal.dwell_time <= 0.0 {
            return Err(ScopeError::invalid("a frequency sweep needs a positive dwell time"));
        }
        check_shots_sweeps(signal.shots, signal.sweeps)?;

        let (driver, handle) = session.live()?;
        driver
            .set_sig_gen_built_in(handle, signal)
            .map_err(ScopeError::from)?;

        info!(
            "Signal generator: {:?} {}-{} Hz, {} uV pk-pk",
            signal.wave, signal.start_frequency, signal.stop_frequency, signal.pk_to_pk_uv
        );
        self.output = Some(SigGenOutput::BuiltIn(signal.clone()));
        Ok(())
    }

    /// Configure an arbitrary waveform. Frequencies are converted to delta
    /// phases by the device before upload; the schedule used is returned.
    pub fn set_arbitrary(
        &mut self,
        session: &DeviceSession,
        signal: &ArbitrarySignal,
    ) -> Result<PhaseSweep> {
        check_shots_sweeps(signal.shots, signal.sweeps)?;
        let limits = self.arbitrary_limits(session)?;

        let len = signal.waveform.len() as u64;
        if len < limits.min_size as u64 || len > limits.max_size as u64 {
            return Err(ScopeError::capability(format!(
                "waveform of {} samples outside {}..={}",
                len, limits.min_size, limits.max_size
            )));
        }
        if let Some(bad) = signal
            .waveform
            .iter()
            .find(|&&v| v < limits.min_value || v > limits.max_value)
        {
            return Err(ScopeError::invalid(format!(
                "waveform value {} outside {}..={}",
                bad, limits.min_value, limits.max_value
            )));
        }

        let len = len as u32;
        let phases = PhaseSweep {
            start_delta_phase: self.frequency_to_phase(
                session,
                signal.start_frequency,
                signal.index_mode,
                len,
            )?,
            stop_delta_phase: self.frequency_to_phase(
                session,
                signal.stop_frequency,
                signal.index_mode,
                len,
            )?,
            delta_phase_increment: if signal.increment > 0.0 {
                self.frequency_to_phase(session, signal.increment, signal.index_mode, len)?
            } else {
                0
            },
            dwell_count: signal.dwell_count,
        };

        let (driver, handle) = session.live()?;
        driver
            .set_sig_gen_arbitrary(handle, signal, phases)
            .map_err(ScopeError::from)?;

        info!(
            "Arbitrary waveform: {} samples at {} Hz",
            signal.waveform.len(),
            signal.start_frequency
        );
        self.output = Some(SigGenOutput::Arbitrary {
            signal: signal.clone(),
            phases,
        });
        Ok(phases)
    }

    /// Fire or release a generator configured with a software trigger
    pub fn software_trigger(&mut self, session: &DeviceSession, state: bool) -> Result<()> {
        if self.trigger_source() != Some(SigGenTrigSource::SoftTrig) {
            return Err(ScopeError::invalid(
                "signal generator is not configured for a software trigger",
            ));
        }
        let (driver, handle) = session.live()?;
        driver
            .sig_gen_software_control(handle, state)
            .map_err(ScopeError::from)?;
        debug!("Signal generator software trigger {}", state);
        Ok(())
    }

    /// Disable the output
    pub fn off(&mut self, session: &DeviceSession) -> Result<()> {
        let (driver, handle) = session.live()?;
        driver.sig_gen_off(handle).map_err(ScopeError::from)?;
        self.output = None;
        info!("Signal generator off");
        Ok(())
    }

    /// Delta phase the device would use to play a `buffer_length` waveform
    /// at `frequency`
    pub fn frequency_to_phase(
        &self,
        session: &DeviceSession,
        frequency: f64,
        index_mode: IndexMode,
        buffer_length: u32,
    ) -> Result<u32> {
        let (driver, handle) = session.live()?;
        driver
            .sig_gen_frequency_to_phase(handle, frequency, index_mode, buffer_length)
            .map_err(ScopeError::from)
    }

    /// Legal sample values and waveform lengths for the AWG
    pub fn arbitrary_limits(&self, session: &DeviceSession) -> Result<ArbitraryLimits> {
        let (driver, handle) = session.live()?;
        driver
            .sig_gen_arbitrary_min_max_values(handle)
            .map_err(ScopeError::from)
    }
}

fn check_shots_sweeps(shots: u32, sweeps: u32) -> Result<()> {
    if shots > 0 && sweeps > 0 {
        Err(ScopeError::invalid("shots and sweeps are mutually exclusive"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimConfig, SimulatedDriver};
    use crate::types::Model;
    use std::sync::Arc;

    fn session(model: Model) -> DeviceSession {
        DeviceSession::open(Arc::new(SimulatedDriver::new(SimConfig::for_model(model)))).unwrap()
    }

    #[test]
    fn test_built_in_on_awg_model() {
        let session = session(Model::Ps4227);
        let mut siggen = SigGenController::new();
        siggen
            .set_built_in(&session, &BuiltInSignal::fixed(WaveType::Square, 10_000.0, 2_000_000))
            .unwrap();
        assert!(siggen.is_active());
        siggen.off(&session).unwrap();
        assert!(!siggen.is_active());
    }

    #[test]
    fn test_no_generator_is_capability_error() {
        let session = session(Model::Ps4224);
        let mut siggen = SigGenController::new();
        let err = siggen
            .set_built_in(&session, &BuiltInSignal::default())
            .unwrap_err();
        assert!(matches!(err, ScopeError::Capability(_)));
    }

    #[test]
    fn test_arbitrary_rejects_out_of_range_values() {
        let session = session(Model::Ps4227);
        let mut siggen = SigGenController::new();
        let limits = siggen.arbitrary_limits(&session).unwrap();
        let mut waveform = vec![limits.min_value; limits.min_size as usize];
        waveform[0] = limits.max_value.saturating_add(1);
        let err = siggen
            .set_arbitrary(&session, &ArbitrarySignal::new(waveform, 1_000.0))
            .unwrap_err();
        assert!(matches!(err, ScopeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_arbitrary_phase_scales_with_frequency() {
        let session = session(Model::Ps4227);
        let mut siggen = SigGenController::new();
        let waveform: Vec<i16> = (0..1024).map(|i| (i % 4096) as i16).collect();
        let slow = siggen
            .set_arbitrary(&session, &ArbitrarySignal::new(waveform.clone(), 1_000.0))
            .unwrap();
        let fast = siggen
            .set_arbitrary(&session, &ArbitrarySignal::new(waveform, 2_000.0))
            .unwrap();
        assert!(fast.start_delta_phase > slow.start_delta_phase);
        let ratio = fast.start_delta_phase as f64 / slow.start_delta_phase as f64;
        assert!((ratio - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_software_trigger_requires_soft_source() {
        let session = session(Model::Ps4226);
        let mut siggen = SigGenController::new();
        siggen.set_built_in(&session, &BuiltInSignal::default()).unwrap();
        assert!(siggen.software_trigger(&session, true).is_err());

        let mut signal = BuiltInSignal::default();
        signal.shots = 1;
        signal.trigger.source = SigGenTrigSource::SoftTrig;
        siggen.set_built_in(&session, &signal).unwrap();
        siggen.software_trigger(&session, true).unwrap();
    }

    #[test]
    fn test_shots_and_sweeps_exclusive() {
        let session = session(Model::Ps4226);
        let mut siggen = SigGenController::new();
        let mut signal = BuiltInSignal::default();
        signal.shots = 2;
        signal.sweeps = 2;
        assert!(matches!(
            siggen.set_built_in(&session, &signal),
            Err(ScopeError::InvalidConfiguration(_))
        ));
    }
}
