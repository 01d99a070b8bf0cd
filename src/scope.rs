//! `Ps4000`: one open unit with all of its components
//!
//! The facade owns the session and every component, refuses configuration
//! changes while a run is in progress and propagates invalidation: a channel
//! change drops the resolved timebase and that channel's buffers, a segment
//! change drops every buffer. Dropping a `Ps4000` stops any run and closes
//! the unit.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::buffers::{BufferManager, BufferRole, SampleBuffer};
use crate::channels::{CapabilityTable, ChannelConfig, ChannelRegistry, FrequencyCounter};
use crate::driver::{ArbitraryLimits, Driver, PhaseSweep};
use crate::engine::{
    AcquisitionEngine, AcquisitionPlan, AcquisitionState, ArmContext, CaptureResult, CompletionFn,
    RunOutcome, StreamingBatch, StreamingStart,
};
use crate::error::{Result, ScopeError};
use crate::session::{DeviceSession, UnitInfo};
use crate::siggen::{ArbitrarySignal, BuiltInSignal, SigGenController, SigGenOutput};
use crate::timebase::{ResolvedTimebase, TimebaseRequest, TimebaseResolver};
use crate::trigger::{TriggerConfig, TriggerSpec, TriggerStatus};
use crate::types::{
    Channel, ChannelInfo, DownSamplingMode, EtsMode, IndexMode, Model, Probe, Range, TimeValue,
};

/// An open PS4000 unit
pub struct Ps4000 {
    session: DeviceSession,
    channels: ChannelRegistry,
    trigger: TriggerConfig,
    timebase: TimebaseResolver,
    buffers: BufferManager,
    engine: AcquisitionEngine,
    siggen: SigGenController,
}

impl Ps4000 {
    /// Open the first unit the driver finds
    pub fn open(driver: Arc<dyn Driver>) -> Result<Self> {
        Self::from_session(DeviceSession::open(driver)?)
    }

    /// Open a unit by batch/serial
    pub fn open_serial(driver: Arc<dyn Driver>, serial: &str) -> Result<Self> {
        Self::from_session(DeviceSession::open_serial(driver, serial)?)
    }

    /// Wrap an already open session, reading its capabilities
    pub fn from_session(session: DeviceSession) -> Result<Self> {
        let channels = ChannelRegistry::open(&session)?;
        Ok(Self {
            session,
            channels,
            trigger: TriggerConfig::new(),
            timebase: TimebaseResolver::new(),
            buffers: BufferManager::new(),
            engine: AcquisitionEngine::new(),
            siggen: SigGenController::new(),
        })
    }

    /// Stop any run and release the unit
    pub fn close(&mut self) -> Result<()> {
        if !self.session.is_open() {
            return Ok(());
        }
        if self.engine.state() != AcquisitionState::Idle {
            if let Err(e) = self.engine.stop(&self.session) {
                warn!("Stop before close failed: {}", e);
            }
        }
        self.session.close()
    }

    fn guard(&self, what: &str) -> Result<()> {
        if self.engine.is_busy() {
            Err(ScopeError::busy(format!(
                "cannot {} while {}",
                what,
                self.engine.state()
            )))
        } else {
            Ok(())
        }
    }

    /// An armed run pins buffers that a configuration change just made
    /// stale, so it is disarmed
    fn disarm(&mut self) -> Result<()> {
        if self.engine.state() == AcquisitionState::Armed {
            info!("Configuration changed, disarming");
            self.engine.stop(&self.session)?;
        }
        Ok(())
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn model(&self) -> Option<Model> {
        self.session.model()
    }

    pub fn state(&self) -> AcquisitionState {
        self.engine.state()
    }

    pub fn unit_info(&self) -> Result<UnitInfo> {
        self.session.unit_info()
    }

    pub fn ping(&self) -> Result<()> {
        self.session.ping()
    }

    pub fn flash_led(&self, start: i16) -> Result<()> {
        self.session.flash_led(start)
    }

    pub fn is_led_flashing(&self) -> Result<bool> {
        self.session.is_led_flashing()
    }

    // Channels

    pub fn capabilities(&self) -> &CapabilityTable {
        self.channels.capabilities()
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelConfig> {
        self.channels.config(channel)
    }

    pub fn enabled_channels(&self) -> Vec<Channel> {
        self.channels.enabled_channels()
    }

    pub fn set_channel(&mut self, config: ChannelConfig) -> Result<()> {
        self.guard("change channel settings")?;
        self.channels.set_channel(&self.session, config)?;
        self.timebase.invalidate();
        self.buffers.invalidate_channel(&self.session, config.channel);
        self.disarm()
    }

    pub fn set_bandwidth_filter(&mut self, channel: Channel, enable: bool) -> Result<()> {
        self.guard("change the bandwidth filter")?;
        self.channels.set_bandwidth_filter(&self.session, channel, enable)?;
        self.timebase.invalidate();
        self.buffers.invalidate_channel(&self.session, channel);
        self.disarm()
    }

    pub fn set_probe(&mut self, probe: Probe, range: Range) -> Result<()> {
        self.guard("change the probe")?;
        self.channels.set_probe(&self.session, probe, range)?;
        self.timebase.invalidate();
        for channel in Channel::ANALOG {
            self.buffers.invalidate_channel(&self.session, channel);
        }
        self.disarm()
    }

    pub fn get_probe(&self) -> Result<Probe> {
        self.channels.get_probe(&self.session)
    }

    pub fn channel_information(&self, info: ChannelInfo, probe: Probe, channel: Channel) -> Result<Vec<i32>> {
        self.channels.channel_information(&self.session, info, probe, channel)
    }

    pub fn set_ext_trigger_range(&mut self, range: Range) -> Result<()> {
        self.guard("change the external input range")?;
        self.channels.set_ext_trigger_range(&self.session, range)
    }

    pub fn set_frequency_counter(&mut self, counter: FrequencyCounter) -> Result<()> {
        self.guard("change the frequency counter")?;
        self.channels.set_frequency_counter(&self.session, counter)
    }

    // Trigger

    pub fn set_trigger(&mut self, spec: TriggerSpec) -> Result<()> {
        self.guard("change the trigger")?;
        self.trigger.apply(&self.session, &self.channels, spec)?;
        self.disarm()
    }

    pub fn trigger(&self) -> &TriggerSpec {
        self.trigger.applied()
    }

    pub fn set_trigger_delay(&mut self, delay: u32) -> Result<()> {
        self.guard("change the trigger delay")?;
        self.trigger.set_trigger_delay(&self.session, delay)?;
        self.disarm()
    }

    pub fn trigger_within_pre_trigger_samples(&mut self, enable: bool) -> Result<()> {
        self.guard("change pre-trigger triggering")?;
        self.trigger.trigger_within_pre_trigger_samples(&self.session, enable)?;
        self.disarm()
    }

    pub fn hold_off(&mut self, time: u64) -> Result<()> {
        self.guard("change the trigger hold-off")?;
        self.trigger.hold_off(&self.session, time)?;
        self.disarm()
    }

    pub fn is_trigger_enabled(&self) -> Result<TriggerStatus> {
        self.trigger.is_trigger_enabled(&self.session)
    }

    // Timebase and memory

    pub fn resolve_timebase(&mut self, index: u32, samples: u32, oversample: i16, segment: u16) -> Result<ResolvedTimebase> {
        let request = TimebaseRequest {
            index,
            samples,
            oversample,
            segment,
        };
        self.timebase
            .resolve(&self.session, request, self.channels.generation())
    }

    pub fn max_down_sample_ratio(&self, samples: u32, mode: DownSamplingMode, segment: u16) -> Result<u32> {
        self.timebase
            .max_down_sample_ratio(&self.session, samples, mode, segment)
    }

    /// Partition capture memory. Every buffer binding is dropped.
    pub fn set_memory_segments(&mut self, segments: u16) -> Result<u32> {
        self.guard("change memory segments")?;
        let per_segment = self.timebase.set_memory_segments(&self.session, segments)?;
        self.buffers.invalidate_all(&self.session);
        self.disarm()?;
        Ok(per_segment)
    }

    pub fn memory_segments(&self) -> u16 {
        self.timebase.segments()
    }

    // Buffers

    pub fn set_buffer(&mut self, channel: Channel, buffer: &SampleBuffer, mode: DownSamplingMode, segment: u16) -> Result<()> {
        self.guard("register buffers")?;
        self.buffers.set_buffer(&self.session, channel, buffer, mode, segment)
    }

    pub fn set_buffers(
        &mut self,
        channel: Channel,
        max: &SampleBuffer,
        min: &SampleBuffer,
        mode: DownSamplingMode,
        segment: u16,
    ) -> Result<()> {
        self.guard("register buffers")?;
        self.buffers
            .set_buffers(&self.session, channel, max, min, mode, segment)
    }

    pub fn set_buffers_bulk(&mut self, channel: Channel, buffers: &[SampleBuffer], first_segment: u16) -> Result<()> {
        self.guard("register buffers")?;
        self.buffers
            .set_buffers_bulk(&self.session, channel, buffers, first_segment)
    }

    pub fn buffer_role(&self, channel: Channel, segment: u16) -> Option<BufferRole> {
        self.buffers.role(channel, segment)
    }

    // Acquisition

    pub fn set_no_of_captures(&mut self, captures: u16) -> Result<()> {
        self.engine.set_no_of_captures(&self.session, captures)
    }

    pub fn get_no_of_captures(&self) -> Result<u16> {
        self.engine.get_no_of_captures(&self.session)
    }

    /// Configure equivalent-time sampling. The effective sample interval
    /// changes, so cached timebases are dropped and an armed run disarmed.
    pub fn set_ets(&mut self, mode: EtsMode, cycles: i16, interleave: i16) -> Result<i32> {
        let picoseconds = self.engine.set_ets(&self.session, mode, cycles, interleave)?;
        self.timebase.invalidate();
        self.disarm()?;
        Ok(picoseconds)
    }

    pub fn arm(&mut self, plan: AcquisitionPlan) -> Result<()> {
        let ctx = ArmContext {
            registry: &self.channels,
            resolver: &mut self.timebase,
            buffers: &self.buffers,
            trigger: self.trigger.applied(),
        };
        self.engine.arm(&self.session, ctx, plan)
    }

    pub fn run_block(&mut self, on_complete: Option<CompletionFn>) -> Result<Duration> {
        self.engine.run_block(&self.session, on_complete)
    }

    pub fn is_ready(&mut self) -> Result<bool> {
        self.engine.is_ready(&self.session)
    }

    pub fn wait_for_completion(&mut self, timeout: Duration) -> Result<RunOutcome> {
        self.engine.wait_for_completion(timeout)
    }

    pub fn get_values(&mut self, start: u32) -> Result<CaptureResult> {
        self.engine.get_values(&self.session, start)
    }

    pub fn get_values_bulk(&mut self) -> Result<Vec<CaptureResult>> {
        self.engine.get_values_bulk(&self.session)
    }

    pub fn get_values_async(&mut self, start: u32) -> Result<()> {
        self.engine.get_values_async(&self.session, start)
    }

    pub fn wait_for_values(&mut self, timeout: Duration) -> Result<CaptureResult> {
        self.engine.wait_for_values(&self.session, timeout)
    }

    /// Arm, run and fetch one block capture, blocking up to `timeout`
    pub fn capture_block(&mut self, plan: AcquisitionPlan, timeout: Duration) -> Result<CaptureResult> {
        self.arm(plan)?;
        self.run_block(None)?;
        match self.wait_for_completion(timeout)? {
            RunOutcome::Completed => self.get_values(0),
            RunOutcome::Stopped => Err(ScopeError::invalid("capture was stopped")),
            RunOutcome::Faulted(err) => Err(err),
        }
    }

    pub fn trigger_time_offset(&self, segment: u16) -> Result<TimeValue> {
        self.engine.trigger_time_offset(&self.session, segment)
    }

    pub fn trigger_channel_time_offset(&self, segment: u16, channel: Channel) -> Result<TimeValue> {
        self.engine
            .trigger_channel_time_offset(&self.session, segment, channel)
    }

    pub fn trigger_time_offsets_bulk(&self, from: u16, to: u16) -> Result<Vec<TimeValue>> {
        self.engine.trigger_time_offsets_bulk(&self.session, from, to)
    }

    pub fn trigger_channel_time_offsets_bulk(&self, from: u16, to: u16, channel: Channel) -> Result<Vec<TimeValue>> {
        self.engine
            .trigger_channel_time_offsets_bulk(&self.session, from, to, channel)
    }

    pub fn run_streaming(&mut self) -> Result<StreamingStart> {
        self.engine.run_streaming(&self.session)
    }

    pub fn get_latest_streaming_values(&mut self, on_batch: &mut dyn FnMut(StreamingBatch)) -> Result<u32> {
        self.engine
            .get_latest_streaming_values(&self.session, on_batch)
    }

    pub fn no_of_streaming_values(&self) -> Result<u32> {
        self.engine.no_of_streaming_values(&self.session)
    }

    /// Stop any run. A no-op when idle.
    pub fn stop(&mut self) -> Result<()> {
        self.engine.stop(&self.session)
    }

    // Signal generator

    pub fn set_sig_gen_built_in(&mut self, signal: &BuiltInSignal) -> Result<()> {
        self.siggen.set_built_in(&self.session, signal)
    }

    pub fn set_sig_gen_arbitrary(&mut self, signal: &ArbitrarySignal) -> Result<PhaseSweep> {
        self.siggen.set_arbitrary(&self.session, signal)
    }

    pub fn sig_gen_software_trigger(&mut self, state: bool) -> Result<()> {
        self.siggen.software_trigger(&self.session, state)
    }

    pub fn sig_gen_off(&mut self) -> Result<()> {
        self.siggen.off(&self.session)
    }

    pub fn sig_gen_output(&self) -> Option<&SigGenOutput> {
        self.siggen.output()
    }

    pub fn sig_gen_frequency_to_phase(&self, frequency: f64, index_mode: IndexMode, buffer_length: u32) -> Result<u32> {
        self.siggen
            .frequency_to_phase(&self.session, frequency, index_mode, buffer_length)
    }

    pub fn sig_gen_arbitrary_limits(&self) -> Result<ArbitraryLimits> {
        self.siggen.arbitrary_limits(&self.session)
    }
}

impl Drop for Ps4000 {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close unit on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimConfig, SimulatedDriver};

    fn scope() -> Ps4000 {
        Ps4000::open(Arc::new(SimulatedDriver::new(SimConfig::for_model(Model::Ps4424)))).unwrap()
    }

    #[test]
    fn test_channel_change_drops_bindings_and_disarms() {
        let mut scope = scope();
        scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
        let buffer = SampleBuffer::new(1_000);
        scope
            .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        scope.arm(AcquisitionPlan::block(0, 1_000, 3)).unwrap();
        assert_eq!(scope.state(), AcquisitionState::Armed);

        scope.set_channel(ChannelConfig::new(Channel::A, Range::V5)).unwrap();
        assert_eq!(scope.state(), AcquisitionState::Idle);
        assert_eq!(scope.buffer_role(Channel::A, 0), None);
        assert!(matches!(
            scope.arm(AcquisitionPlan::block(0, 1_000, 3)),
            Err(ScopeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_configuration_refused_while_running() {
        let mut config = SimConfig::for_model(Model::Ps4424);
        config.capture_time = Duration::from_secs(5);
        let mut scope = Ps4000::open(Arc::new(SimulatedDriver::new(config))).unwrap();
        scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
        let buffer = SampleBuffer::new(100);
        scope
            .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        scope.arm(AcquisitionPlan::block(0, 100, 3)).unwrap();
        scope.run_block(None).unwrap();

        assert!(matches!(
            scope.set_channel(ChannelConfig::new(Channel::B, Range::V2)),
            Err(ScopeError::Busy(_))
        ));
        assert!(matches!(scope.set_trigger(TriggerSpec::Disabled), Err(ScopeError::Busy(_))));
        assert!(matches!(scope.set_memory_segments(4), Err(ScopeError::Busy(_))));
        assert!(matches!(
            scope.set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0),
            Err(ScopeError::Busy(_))
        ));

        scope.stop().unwrap();
        assert_eq!(scope.state(), AcquisitionState::Idle);
        scope.set_channel(ChannelConfig::new(Channel::B, Range::V2)).unwrap();
    }

    #[test]
    fn test_timing_changes_disarm() {
        let mut scope = scope();
        scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
        let buffer = SampleBuffer::new(1_000);
        scope
            .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        let plan = AcquisitionPlan::block(0, 1_000, 3);

        scope.arm(plan).unwrap();
        scope.set_trigger_delay(100).unwrap();
        assert_eq!(scope.state(), AcquisitionState::Idle);

        scope.arm(plan).unwrap();
        scope.hold_off(1_000).unwrap();
        assert_eq!(scope.state(), AcquisitionState::Idle);

        scope.arm(plan).unwrap();
        scope.set_ets(EtsMode::Off, 0, 0).unwrap();
        assert_eq!(scope.state(), AcquisitionState::Idle);

        // Bindings survive, so the same plan arms again
        scope.arm(plan).unwrap();
        assert_eq!(scope.state(), AcquisitionState::Armed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut scope = scope();
        scope.close().unwrap();
        scope.close().unwrap();
        assert!(matches!(scope.ping(), Err(ScopeError::InvalidHandle(_))));
    }

    #[test]
    fn test_segment_change_drops_every_binding() {
        let mut scope = scope();
        scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
        let buffer = SampleBuffer::new(100);
        scope
            .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        scope.set_memory_segments(2).unwrap();
        assert_eq!(scope.memory_segments(), 2);
        assert_eq!(scope.buffer_role(Channel::A, 0), None);
    }
}
