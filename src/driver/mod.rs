//! Driver boundary
//!
//! [`Driver`] mirrors the ps4000 call surface with safe signatures. Every
//! call returns the raw `PICO_STATUS` on failure; classification into
//! [`ScopeError`](crate::ScopeError) happens one layer up. Completion
//! notifications cross the boundary as boxed closures, which stand in for
//! the native function pointer plus its opaque context argument.

pub mod sim;

#[cfg(feature = "native")]
pub mod native;

use std::sync::Arc;

use log::info;

use crate::buffers::SampleBuffer;
use crate::ffi::{PICO_STATUS, PS4000_HANDLE, PWQ_CONDITIONS, TRIGGER_CHANNEL_PROPERTIES, TRIGGER_CONDITIONS};
use crate::siggen::{ArbitrarySignal, BuiltInSignal};
use crate::types::*;

/// Result of a raw driver call
pub type DriverResult<T> = std::result::Result<T, PICO_STATUS>;

/// Block-ready notification, invoked at most once from a driver-owned thread
pub type BlockReadyFn = Box<dyn FnOnce(PS4000_HANDLE, PICO_STATUS) + Send>;

/// Data-ready notification for asynchronous value fetches
pub type DataReadyFn = Box<dyn FnOnce(PS4000_HANDLE, DataReady) + Send>;

/// Arguments of one streaming-ready notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingReady {
    pub no_of_samples: i32,
    pub start_index: u32,
    pub overflow: i16,
    pub trigger_at: u32,
    pub triggered: bool,
    pub auto_stop: bool,
}

/// Arguments of one data-ready notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataReady {
    pub no_of_samples: i32,
    pub overflow: i16,
    pub trigger_at: u32,
    pub triggered: bool,
}

/// Progress of an asynchronous open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenProgress {
    pub handle: PS4000_HANDLE,
    pub percent: i16,
    pub complete: bool,
}

/// Limits of the arbitrary waveform generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitraryLimits {
    pub min_value: i16,
    pub max_value: i16,
    pub min_size: u32,
    pub max_size: u32,
}

/// Delta-phase schedule handed to the arbitrary waveform generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseSweep {
    pub start_delta_phase: u32,
    pub stop_delta_phase: u32,
    pub delta_phase_increment: u32,
    pub dwell_count: u32,
}

/// Threshold direction per trigger input, in driver argument order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerDirections {
    pub a: ThresholdDirection,
    pub b: ThresholdDirection,
    pub c: ThresholdDirection,
    pub d: ThresholdDirection,
    pub ext: ThresholdDirection,
    pub aux: ThresholdDirection,
}

impl Default for TriggerDirections {
    fn default() -> Self {
        Self {
            a: ThresholdDirection::NONE,
            b: ThresholdDirection::NONE,
            c: ThresholdDirection::NONE,
            d: ThresholdDirection::NONE,
            ext: ThresholdDirection::NONE,
            aux: ThresholdDirection::NONE,
        }
    }
}

impl TriggerDirections {
    pub fn get(&self, channel: Channel) -> ThresholdDirection {
        match channel {
            Channel::A => self.a,
            Channel::B => self.b,
            Channel::C => self.c,
            Channel::D => self.d,
            Channel::External => self.ext,
            Channel::Aux | Channel::None => self.aux,
        }
    }

    pub fn set(&mut self, channel: Channel, direction: ThresholdDirection) {
        match channel {
            Channel::A => self.a = direction,
            Channel::B => self.b = direction,
            Channel::C => self.c = direction,
            Channel::D => self.d = direction,
            Channel::External => self.ext = direction,
            Channel::Aux | Channel::None => self.aux = direction,
        }
    }
}

/// The native ps4000 call surface
pub trait Driver: Send + Sync {
    // Unit lifecycle
    fn open_unit(&self, serial: Option<&str>) -> DriverResult<PS4000_HANDLE>;
    fn open_unit_async(&self, serial: Option<&str>) -> DriverResult<()>;
    fn open_unit_progress(&self) -> DriverResult<OpenProgress>;
    fn close_unit(&self, handle: PS4000_HANDLE) -> DriverResult<()>;
    fn enumerate_units(&self) -> DriverResult<Vec<String>>;
    fn ping_unit(&self, handle: PS4000_HANDLE) -> DriverResult<()>;
    fn get_unit_info(&self, handle: PS4000_HANDLE, info: InfoKind) -> DriverResult<String>;
    fn flash_led(&self, handle: PS4000_HANDLE, start: i16) -> DriverResult<()>;
    fn is_led_flashing(&self, handle: PS4000_HANDLE) -> DriverResult<bool>;

    // Channels
    fn set_channel(
        &self,
        handle: PS4000_HANDLE,
        channel: Channel,
        enabled: bool,
        dc: bool,
        range: Range,
    ) -> DriverResult<()>;
    fn set_bw_filter(&self, handle: PS4000_HANDLE, channel: Channel, enable: bool) -> DriverResult<()>;
    fn set_probe(&self, handle: PS4000_HANDLE, probe: Probe, range: Range) -> DriverResult<()>;
    fn get_probe(&self, handle: PS4000_HANDLE) -> DriverResult<Probe>;
    fn get_channel_information(
        &self,
        handle: PS4000_HANDLE,
        info: ChannelInfo,
        probe: Probe,
        channel: Channel,
    ) -> DriverResult<Vec<i32>>;
    fn set_ext_trigger_range(&self, handle: PS4000_HANDLE, range: Range) -> DriverResult<()>;
    fn set_frequency_counter(
        &self,
        handle: PS4000_HANDLE,
        channel: Channel,
        enabled: bool,
        range: FrequencyCounterRange,
        threshold_major: i16,
        threshold_minor: i16,
    ) -> DriverResult<()>;

    // Timebase and memory
    fn memory_segments(&self, handle: PS4000_HANDLE, segments: u16) -> DriverResult<i32>;
    fn set_no_of_captures(&self, handle: PS4000_HANDLE, captures: u16) -> DriverResult<()>;
    fn get_no_of_captures(&self, handle: PS4000_HANDLE) -> DriverResult<u16>;
    /// Integer-nanosecond variant, returns (interval ns, max samples)
    fn get_timebase(
        &self,
        handle: PS4000_HANDLE,
        timebase: u32,
        samples: i32,
        oversample: i16,
        segment: u16,
    ) -> DriverResult<(i32, i32)>;
    /// Floating-point variant, returns (interval ns, max samples)
    fn get_timebase2(
        &self,
        handle: PS4000_HANDLE,
        timebase: u32,
        samples: i32,
        oversample: i16,
        segment: u16,
    ) -> DriverResult<(f32, i32)>;
    fn set_ets(
        &self,
        handle: PS4000_HANDLE,
        mode: EtsMode,
        cycles: i16,
        interleave: i16,
    ) -> DriverResult<i32>;

    // Triggering
    #[allow(clippy::too_many_arguments)]
    fn set_simple_trigger(
        &self,
        handle: PS4000_HANDLE,
        enable: bool,
        source: Channel,
        threshold: i16,
        direction: ThresholdDirection,
        delay: u32,
        auto_trigger_ms: i16,
    ) -> DriverResult<()>;
    fn set_trigger_channel_properties(
        &self,
        handle: PS4000_HANDLE,
        properties: &[TRIGGER_CHANNEL_PROPERTIES],
        aux_output_enable: bool,
        auto_trigger_ms: i32,
    ) -> DriverResult<()>;
    fn set_trigger_channel_conditions(
        &self,
        handle: PS4000_HANDLE,
        conditions: &[TRIGGER_CONDITIONS],
    ) -> DriverResult<()>;
    fn set_trigger_channel_directions(
        &self,
        handle: PS4000_HANDLE,
        directions: &TriggerDirections,
    ) -> DriverResult<()>;
    fn set_trigger_delay(&self, handle: PS4000_HANDLE, delay: u32) -> DriverResult<()>;
    fn set_pulse_width_qualifier(
        &self,
        handle: PS4000_HANDLE,
        conditions: &[PWQ_CONDITIONS],
        direction: ThresholdDirection,
        lower: u32,
        upper: u32,
        kind: PulseWidthType,
    ) -> DriverResult<()>;
    /// Returns (trigger enabled, pulse-width qualifier enabled)
    fn is_trigger_or_pwq_enabled(&self, handle: PS4000_HANDLE) -> DriverResult<(bool, bool)>;
    fn trigger_within_pre_trigger_samples(&self, handle: PS4000_HANDLE, enable: bool) -> DriverResult<()>;
    fn hold_off(&self, handle: PS4000_HANDLE, holdoff: u64, kind: HoldOffType) -> DriverResult<()>;
    fn get_trigger_time_offset64(&self, handle: PS4000_HANDLE, segment: u16) -> DriverResult<TimeValue>;
    fn get_trigger_channel_time_offset64(
        &self,
        handle: PS4000_HANDLE,
        segment: u16,
        channel: Channel,
    ) -> DriverResult<TimeValue>;
    fn get_values_trigger_time_offset_bulk64(
        &self,
        handle: PS4000_HANDLE,
        from_segment: u16,
        to_segment: u16,
    ) -> DriverResult<Vec<TimeValue>>;
    fn get_values_trigger_channel_time_offset_bulk64(
        &self,
        handle: PS4000_HANDLE,
        from_segment: u16,
        to_segment: u16,
        channel: Channel,
    ) -> DriverResult<Vec<TimeValue>>;

    // Buffers. `None` clears the registration.
    fn set_data_buffers(
        &self,
        handle: PS4000_HANDLE,
        channel: Channel,
        max: Option<&SampleBuffer>,
        min: Option<&SampleBuffer>,
        mode: DownSamplingMode,
    ) -> DriverResult<()>;
    fn set_data_buffer_bulk(
        &self,
        handle: PS4000_HANDLE,
        channel: Channel,
        buffer: Option<&SampleBuffer>,
        segment: u16,
    ) -> DriverResult<()>;

    // Acquisition
    /// Starts a block capture and returns the time the unit will be busy, in ms
    #[allow(clippy::too_many_arguments)]
    fn run_block(
        &self,
        handle: PS4000_HANDLE,
        pre_trigger: i32,
        post_trigger: i32,
        timebase: u32,
        oversample: i16,
        segment: u16,
        ready: BlockReadyFn,
    ) -> DriverResult<i32>;
    fn is_ready(&self, handle: PS4000_HANDLE) -> DriverResult<bool>;
    /// Starts streaming and returns the achieved sample interval in `units`
    #[allow(clippy::too_many_arguments)]
    fn run_streaming(
        &self,
        handle: PS4000_HANDLE,
        sample_interval: u32,
        units: TimeUnits,
        max_pre_trigger: u32,
        max_post_trigger: u32,
        auto_stop: bool,
        down_sample_ratio: u32,
        mode: DownSamplingMode,
        overview_buffer_size: u32,
    ) -> DriverResult<u32>;
    /// Invokes `ready` zero or one times, synchronously, before returning
    fn get_streaming_latest_values(
        &self,
        handle: PS4000_HANDLE,
        ready: &mut dyn FnMut(StreamingReady),
    ) -> DriverResult<()>;
    fn no_of_streaming_values(&self, handle: PS4000_HANDLE) -> DriverResult<u32>;
    fn get_max_down_sample_ratio(
        &self,
        handle: PS4000_HANDLE,
        samples: u32,
        mode: DownSamplingMode,
        segment: u16,
    ) -> DriverResult<u32>;
    /// Returns (samples written, overflow bits)
    #[allow(clippy::too_many_arguments)]
    fn get_values(
        &self,
        handle: PS4000_HANDLE,
        start_index: u32,
        samples: u32,
        down_sample_ratio: u32,
        mode: DownSamplingMode,
        segment: u16,
    ) -> DriverResult<(u32, i16)>;
    /// Returns (samples per segment, overflow bits per segment)
    fn get_values_bulk(
        &self,
        handle: PS4000_HANDLE,
        samples: u32,
        from_segment: u16,
        to_segment: u16,
    ) -> DriverResult<(u32, Vec<i16>)>;
    #[allow(clippy::too_many_arguments)]
    fn get_values_async(
        &self,
        handle: PS4000_HANDLE,
        start_index: u32,
        samples: u32,
        down_sample_ratio: u32,
        mode: DownSamplingMode,
        segment: u16,
        ready: DataReadyFn,
    ) -> DriverResult<()>;
    /// Returns once the unit has stopped sampling
    fn stop(&self, handle: PS4000_HANDLE) -> DriverResult<()>;

    // Signal generator
    fn sig_gen_off(&self, handle: PS4000_HANDLE) -> DriverResult<()>;
    fn set_sig_gen_built_in(&self, handle: PS4000_HANDLE, signal: &BuiltInSignal) -> DriverResult<()>;
    fn set_sig_gen_arbitrary(
        &self,
        handle: PS4000_HANDLE,
        signal: &ArbitrarySignal,
        phases: PhaseSweep,
    ) -> DriverResult<()>;
    fn sig_gen_frequency_to_phase(
        &self,
        handle: PS4000_HANDLE,
        frequency: f64,
        index_mode: IndexMode,
        buffer_length: u32,
    ) -> DriverResult<u32>;
    fn sig_gen_arbitrary_min_max_values(&self, handle: PS4000_HANDLE) -> DriverResult<ArbitraryLimits>;
    fn sig_gen_software_control(&self, handle: PS4000_HANDLE, state: bool) -> DriverResult<()>;
}

/// Which driver backs a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// In-process simulated unit
    Simulated,
    /// Vendor ps4000 library (requires the `native` feature)
    Native,
}

/// Create the driver for `kind`, falling back to the simulator when the
/// native library was not compiled in
pub fn create_driver(kind: DriverKind, sim: sim::SimConfig) -> Arc<dyn Driver> {
    match kind {
        DriverKind::Native => {
            #[cfg(feature = "native")]
            {
                info!("Using native ps4000 driver");
                return Arc::new(native::NativeDriver::new());
            }

            #[cfg(not(feature = "native"))]
            log::warn!("native feature not enabled, using simulated driver");
        }
        DriverKind::Simulated => {}
    }

    info!("Using simulated {} driver", sim.model.variant());
    Arc::new(sim::SimulatedDriver::new(sim))
}
