//! Simulated PS4000 unit
//!
//! Behaves like a connected scope as far as the call surface is concerned:
//! per-variant capability tables, timebase rules, segmented memory, block
//! captures finished on a worker thread, pump-driven streaming and a signal
//! generator. Inputs are synthetic sine waves that can be set per channel.
//! Faults and disconnects can be injected for testing recovery paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use super::*;
use crate::buffers::WeakSampleBuffer;
use crate::ffi::*;

const MAX_TIMEBASE: u32 = (1 << 30) - 1;
const MIN_STREAMING_INTERVAL_NS: f64 = 1_000.0;
const AWG_DAC_FREQUENCY: f64 = 20e6;
const AWG_MAX_BUFFER: u32 = 8192;
const AWG_MIN_BUFFER: u32 = 10;
const AWG_MAX_VALUE: i16 = 4095;
const ETS_BASE_PICOSECONDS: i32 = 4_000;
const TRIGGER_OFFSET_STEP_PS: i64 = 37;

/// Simulator settings
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub model: Model,
    /// Serials of the units "on the bus"
    pub serials: Vec<String>,
    /// On-device sample memory, shared by all segments and channels
    pub memory_samples: u32,
    /// Wall-clock time a block capture takes to complete
    pub capture_time: Duration,
    /// Raw samples produced per streaming pump
    pub streaming_chunk: u32,
    /// Whether the floating-point timebase query is available
    pub float_timebase: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::for_model(Model::Ps4424)
    }
}

impl SimConfig {
    pub fn for_model(model: Model) -> Self {
        Self {
            model,
            serials: vec![format!("SIM{}/0001", model.variant())],
            memory_samples: 32 * 1024 * 1024,
            capture_time: Duration::from_millis(5),
            streaming_chunk: 1_000,
            float_timebase: true,
        }
    }
}

/// Synthetic input applied to one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSignal {
    pub amplitude_mv: f64,
    pub frequency_hz: f64,
    pub offset_mv: f64,
}

impl Default for InputSignal {
    fn default() -> Self {
        Self {
            amplitude_mv: 500.0,
            frequency_hz: 1_000.0,
            offset_mv: 0.0,
        }
    }
}

impl InputSignal {
    fn millivolts_at(&self, t: f64) -> f64 {
        self.offset_mv + self.amplitude_mv * (2.0 * std::f64::consts::PI * self.frequency_hz * t).sin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigGenKind {
    None,
    BuiltIn,
    Arbitrary,
}

/// Hardware facts of one variant
#[derive(Debug, Clone)]
struct Profile {
    channels: usize,
    ranges: Vec<Range>,
    resistances: Vec<Range>,
    probes: Vec<Probe>,
    max_value: i16,
    siggen: SigGenKind,
    bandwidth_filter: bool,
    ets: bool,
    max_segments: u16,
}

impl Profile {
    fn for_model(model: Model) -> Self {
        let between = |lo: Range, hi: Range| -> Vec<Range> {
            Range::VOLTAGE
                .iter()
                .copied()
                .filter(|r| *r >= lo && *r <= hi)
                .collect()
        };
        match model {
            Model::Ps4223 | Model::Ps4224 | Model::Ps4423 | Model::Ps4424 => Profile {
                channels: if matches!(model, Model::Ps4423 | Model::Ps4424) { 4 } else { 2 },
                ranges: between(Range::Mv50, Range::V100),
                resistances: Range::RESISTANCE.to_vec(),
                probes: vec![Probe::None, Probe::CurrentClamp10A, Probe::CurrentClamp1000A],
                max_value: PS4000_MAX_VALUE,
                siggen: SigGenKind::None,
                bandwidth_filter: false,
                ets: true,
                max_segments: 8192,
            },
            Model::Ps4226 | Model::Ps4227 => Profile {
                channels: 2,
                ranges: between(Range::Mv50, Range::V20),
                resistances: Vec::new(),
                probes: vec![Probe::None, Probe::CurrentClamp10A],
                max_value: PS4000_MAX_VALUE,
                siggen: SigGenKind::Arbitrary,
                bandwidth_filter: false,
                ets: true,
                max_segments: 8192,
            },
            Model::Ps4262 => Profile {
                channels: 2,
                ranges: between(Range::Mv10, Range::V20),
                resistances: Vec::new(),
                probes: vec![Probe::None],
                max_value: PS4262_MAX_VALUE,
                siggen: SigGenKind::BuiltIn,
                bandwidth_filter: true,
                ets: false,
                max_segments: 4096,
            },
        }
    }

    fn probe_ranges(&self, probe: Probe) -> Vec<Range> {
        let (lo, hi) = match probe {
            Probe::None => return self.ranges.clone(),
            Probe::CurrentClamp10A => (Range::Mv100, Range::V10),
            Probe::CurrentClamp1000A => (Range::V1, Range::V20),
            _ => (Range::V1, Range::V5),
        };
        self.ranges
            .iter()
            .copied()
            .filter(|r| *r >= lo && *r <= hi)
            .collect()
    }

    fn has_channel(&self, channel: Channel) -> bool {
        channel.is_analog() && channel.index() < self.channels
    }

    fn interval_ns(&self, model: Model, timebase: u32, enabled: usize) -> DriverResult<f64> {
        if timebase > MAX_TIMEBASE {
            return Err(PICO_INVALID_TIMEBASE);
        }
        if model == Model::Ps4262 {
            return Ok((timebase as f64 + 1.0) * 100.0);
        }
        // The fastest timebases are only reachable with few channels enabled
        match timebase {
            0 if enabled > 1 => Err(PICO_INVALID_TIMEBASE),
            1 if enabled > 2 => Err(PICO_INVALID_TIMEBASE),
            0..=2 => Ok(4.0 * (1u32 << timebase) as f64),
            n => Ok((n - 2) as f64 * 32.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    enabled: bool,
    dc: bool,
    range: Range,
    bw_filter: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            enabled: false,
            dc: true,
            range: Range::V5,
            bw_filter: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Registered {
    max: Option<WeakSampleBuffer>,
    min: Option<WeakSampleBuffer>,
    mode: DownSamplingMode,
}

#[derive(Debug, Clone)]
struct Capture {
    /// Raw samples per channel index, empty for disabled channels
    samples: Vec<Vec<i16>>,
    overflow: i16,
    trigger_at: u32,
    triggered: bool,
    offset_ps: Option<i64>,
}

impl Capture {
    fn len(&self) -> usize {
        self.samples.iter().map(Vec::len).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
struct TriggerSetup {
    simple: bool,
    conditions: usize,
    pwq: bool,
    directions: Option<TriggerDirections>,
    delay: u32,
    within_pre_trigger: bool,
    hold_off: u64,
    aux_output: bool,
}

impl TriggerSetup {
    fn enabled(&self) -> bool {
        self.simple || self.conditions > 0
    }
}

#[derive(Debug, Clone)]
struct StreamState {
    interval_s: f64,
    max_pre: u64,
    max_post: u64,
    auto_stop: bool,
    ratio: u32,
    mode: DownSamplingMode,
    written: u64,
    write_index: usize,
    buffer_len: usize,
    trigger_enabled: bool,
    triggered: bool,
    active: bool,
}

#[derive(Debug)]
struct Unit {
    handle: PS4000_HANDLE,
    serial: String,
    channels: [ChannelState; 4],
    probe: Probe,
    ext_range: Option<Range>,
    frequency_counter: Option<(Channel, FrequencyCounterRange)>,
    segments: u16,
    captures_per_run: u16,
    trigger: TriggerSetup,
    ets: EtsMode,
    buffers: [Registered; 4],
    bulk: BTreeMap<(usize, u16), WeakSampleBuffer>,
    captures: BTreeMap<u16, Capture>,
    block_running: bool,
    block_ready: bool,
    stream: Option<StreamState>,
    siggen_source: Option<SigGenTrigSource>,
    led: i16,
}

impl Unit {
    fn new(handle: PS4000_HANDLE, serial: String) -> Self {
        let mut channels = [ChannelState::default(); 4];
        channels[0].enabled = true;
        Self {
            handle,
            serial,
            channels,
            probe: Probe::None,
            ext_range: None,
            frequency_counter: None,
            segments: 1,
            captures_per_run: 1,
            trigger: TriggerSetup::default(),
            ets: EtsMode::Off,
            buffers: Default::default(),
            bulk: BTreeMap::new(),
            captures: BTreeMap::new(),
            block_running: false,
            block_ready: false,
            stream: None,
            siggen_source: None,
            led: 0,
        }
    }

    fn enabled(&self) -> Vec<usize> {
        (0..4).filter(|&i| self.channels[i].enabled).collect()
    }

    fn is_busy(&self) -> bool {
        self.block_running || self.stream.as_ref().map(|s| s.active).unwrap_or(false)
    }

    fn max_samples(&self, memory: u32) -> i32 {
        let enabled = self.enabled().len().max(1) as u32;
        (memory / self.segments as u32 / enabled).min(i32::MAX as u32) as i32
    }
}

#[derive(Debug, Default)]
struct PendingOpen {
    serial: String,
    step: usize,
}

#[derive(Debug)]
struct SimState {
    unit: Option<Unit>,
    next_handle: PS4000_HANDLE,
    pending: Option<PendingOpen>,
    disconnected: bool,
    fault: Option<PICO_STATUS>,
    inputs: [InputSignal; 4],
}

struct Worker {
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Everything a worker needs to produce one block run
struct BlockJob {
    handle: PS4000_HANDLE,
    pre: usize,
    post: usize,
    interval_s: f64,
    first_segment: u16,
    captures: u16,
    channels: Vec<(usize, Range)>,
    inputs: [InputSignal; 4],
    max_value: i16,
    triggered: bool,
}

/// In-process stand-in for a connected PS4000 unit
pub struct SimulatedDriver {
    config: SimConfig,
    profile: Profile,
    state: Arc<Mutex<SimState>>,
    worker: Mutex<Option<Worker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulatedDriver {
    pub fn new(config: SimConfig) -> Self {
        let profile = Profile::for_model(config.model);
        Self {
            config,
            profile,
            state: Arc::new(Mutex::new(SimState {
                unit: None,
                next_handle: 1,
                pending: None,
                disconnected: false,
                fault: None,
                inputs: [InputSignal::default(); 4],
            })),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Apply a synthetic signal to an analog input
    pub fn set_input(&self, channel: Channel, signal: InputSignal) {
        if channel.is_analog() {
            lock(&self.state).inputs[channel.index()] = signal;
        }
    }

    /// Make the next block completion or streaming pump report `status`
    pub fn inject_fault(&self, status: PICO_STATUS) {
        warn!("Simulator: injecting {}", status_to_string(status));
        lock(&self.state).fault = Some(status);
    }

    /// Pull the USB cable
    pub fn disconnect(&self) {
        warn!("Simulator: unit disconnected");
        lock(&self.state).disconnected = true;
    }

    pub fn reconnect(&self) {
        lock(&self.state).disconnected = false;
    }

    fn with_unit<T>(
        &self,
        handle: PS4000_HANDLE,
        f: impl FnOnce(&mut Unit, &mut SimState) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let mut unit = match state.unit.take() {
            Some(unit) if unit.handle == handle => unit,
            other => {
                state.unit = other;
                return Err(PICO_INVALID_HANDLE);
            }
        };
        let result = if state.disconnected {
            Err(PICO_NOT_RESPONDING)
        } else {
            f(&mut unit, state)
        };
        state.unit = Some(unit);
        result
    }

    fn join_worker(&self, cancel: bool) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if cancel {
                worker.cancel.store(true, Ordering::SeqCst);
            }
            if worker.join.join().is_err() {
                warn!("Simulator: block worker panicked");
            }
        }
    }

    fn check_siggen(&self, need: SigGenKind) -> DriverResult<()> {
        match (self.profile.siggen, need) {
            (SigGenKind::None, _) => Err(PICO_NO_SIGNAL_GENERATOR),
            (SigGenKind::BuiltIn, SigGenKind::Arbitrary) => Err(PICO_AWG_NOT_SUPPORTED),
            _ => Ok(()),
        }
    }

    fn timebase_query(
        &self,
        handle: PS4000_HANDLE,
        timebase: u32,
        samples: i32,
        oversample: i16,
        segment: u16,
    ) -> DriverResult<(f64, i32)> {
        let memory = self.config.memory_samples;
        self.with_unit(handle, |unit, _| {
            if !(1..=256).contains(&oversample) || samples < 0 {
                return Err(PICO_INVALID_PARAMETER);
            }
            if segment >= unit.segments {
                return Err(PICO_SEGMENT_OUT_OF_RANGE);
            }
            let interval = self
                .profile
                .interval_ns(self.config.model, timebase, unit.enabled().len())?;
            let max_samples = unit.max_samples(memory);
            if samples > max_samples {
                return Err(PICO_TOO_MANY_SAMPLES);
            }
            Ok((interval, max_samples))
        })
    }
}

fn to_sample(mv: f64, range: Range, max_value: i16) -> (i16, bool) {
    let full_scale = range.millivolts().unwrap_or(1_000) as f64;
    let scaled = (mv / full_scale * max_value as f64).round();
    let clamped = scaled.clamp(-(max_value as f64), max_value as f64);
    (clamped as i16, mv.abs() > full_scale)
}

/// Reduce `raw` by `ratio` according to `mode`. Returns the max (or only)
/// series and, for aggregation, the min series.
fn downsample(raw: &[i16], ratio: u32, mode: DownSamplingMode) -> (Vec<i16>, Option<Vec<i16>>) {
    let ratio = ratio.max(1) as usize;
    match mode {
        DownSamplingMode::None => (raw.to_vec(), None),
        DownSamplingMode::Aggregate => {
            let max = raw.chunks(ratio).map(|w| w.iter().copied().max().unwrap_or(0)).collect();
            let min = raw.chunks(ratio).map(|w| w.iter().copied().min().unwrap_or(0)).collect();
            (max, Some(min))
        }
        DownSamplingMode::Average => {
            let avg = raw
                .chunks(ratio)
                .map(|w| {
                    let sum: i64 = w.iter().map(|&v| v as i64).sum();
                    (sum as f64 / w.len() as f64).round() as i16
                })
                .collect();
            (avg, None)
        }
    }
}

fn write_into(target: &WeakSampleBuffer, offset: usize, data: &[i16]) -> usize {
    let Some(buffer) = target.upgrade() else {
        return 0;
    };
    let mut guard = buffer.lock();
    let offset = offset.min(guard.len());
    let n = data.len().min(guard.len() - offset);
    guard[offset..offset + n].copy_from_slice(&data[..n]);
    n
}

fn generate_block(job: &BlockJob, segment: u16) -> Capture {
    let total = job.pre + job.post;
    let mut samples = vec![Vec::new(); 4];
    let mut overflow = 0i16;
    for &(idx, range) in &job.channels {
        let input = job.inputs[idx];
        let data = (0..total)
            .map(|i| {
                let t = (i as f64 - job.pre as f64) * job.interval_s;
                let (value, over) = to_sample(input.millivolts_at(t), range, job.max_value);
                if over {
                    overflow |= 1 << idx;
                }
                value
            })
            .collect();
        samples[idx] = data;
    }
    Capture {
        samples,
        overflow,
        trigger_at: job.pre as u32,
        triggered: job.triggered,
        offset_ps: job
            .triggered
            .then(|| -((segment as i64 + 1) * TRIGGER_OFFSET_STEP_PS)),
    }
}

fn read_values(
    unit: &Unit,
    start: u32,
    samples: u32,
    ratio: u32,
    mode: DownSamplingMode,
    segment: u16,
) -> DriverResult<(u32, i16)> {
    if ratio == 0 {
        return Err(PICO_INVALID_SAMPLERATIO);
    }
    let capture = unit.captures.get(&segment).ok_or(PICO_NO_SAMPLES_AVAILABLE)?;
    let start = start as usize;
    if start >= capture.len() {
        return Err(PICO_STARTINDEX_INVALID);
    }
    let count = (samples as usize).min(capture.len() - start);

    let mut written: Option<usize> = None;
    for (idx, data) in capture.samples.iter().enumerate() {
        if data.is_empty() {
            continue;
        }
        let reg = &unit.buffers[idx];
        let Some(max) = &reg.max else { continue };
        if reg.mode != mode {
            return Err(PICO_RATIO_MODE_NOT_SUPPORTED);
        }
        let (hi, lo) = downsample(&data[start..start + count], ratio, mode);
        let mut n = write_into(max, 0, &hi);
        if let (Some(lo), Some(min)) = (lo, &reg.min) {
            n = n.min(write_into(min, 0, &lo));
        }
        written = Some(written.map_or(n, |w| w.min(n)));
    }

    let written = written.ok_or(PICO_BUFFERS_NOT_SET)?;
    Ok((written as u32, capture.overflow))
}

impl Driver for SimulatedDriver {
    fn open_unit(&self, serial: Option<&str>) -> DriverResult<PS4000_HANDLE> {
        let mut state = lock(&self.state);
        if state.disconnected || state.unit.is_some() {
            return Err(PICO_NOT_FOUND);
        }
        let serial = match serial {
            Some(wanted) => self
                .config
                .serials
                .iter()
                .find(|s| s.as_str() == wanted)
                .cloned()
                .ok_or(PICO_NOT_FOUND)?,
            None => self.config.serials.first().cloned().ok_or(PICO_NOT_FOUND)?,
        };
        let handle = state.next_handle;
        state.next_handle = state.next_handle.wrapping_add(1).max(1);
        info!("Simulator: opened PS{} {} as handle {}", self.config.model.variant(), serial, handle);
        state.unit = Some(Unit::new(handle, serial));
        Ok(handle)
    }

    fn open_unit_async(&self, serial: Option<&str>) -> DriverResult<()> {
        let mut state = lock(&self.state);
        if state.pending.is_some() {
            return Err(PICO_OPEN_OPERATION_IN_PROGRESS);
        }
        if state.disconnected || state.unit.is_some() {
            return Err(PICO_NOT_FOUND);
        }
        let serial = match serial {
            Some(wanted) if self.config.serials.iter().any(|s| s == wanted) => wanted.to_string(),
            Some(_) => return Err(PICO_NOT_FOUND),
            None => self.config.serials.first().cloned().ok_or(PICO_NOT_FOUND)?,
        };
        state.pending = Some(PendingOpen { serial, step: 0 });
        Ok(())
    }

    fn open_unit_progress(&self) -> DriverResult<OpenProgress> {
        const STEPS: [i16; 3] = [25, 50, 100];
        let mut state = lock(&self.state);
        let pending = state.pending.as_mut().ok_or(PICO_INVALID_CALL)?;
        let percent = STEPS[pending.step.min(STEPS.len() - 1)];
        pending.step += 1;
        if percent < 100 {
            return Ok(OpenProgress {
                handle: 0,
                percent,
                complete: false,
            });
        }

        let serial = state
            .pending
            .take()
            .map(|p| p.serial)
            .unwrap_or_default();
        let handle = state.next_handle;
        state.next_handle = state.next_handle.wrapping_add(1).max(1);
        state.unit = Some(Unit::new(handle, serial));
        Ok(OpenProgress {
            handle,
            percent,
            complete: true,
        })
    }

    fn close_unit(&self, handle: PS4000_HANDLE) -> DriverResult<()> {
        // Validate before tearing down the worker
        self.with_unit(handle, |_, _| Ok(())).or_else(|status| {
            if status == PICO_NOT_RESPONDING {
                Ok(())
            } else {
                Err(status)
            }
        })?;
        self.join_worker(true);
        let mut state = lock(&self.state);
        if let Some(unit) = state.unit.take() {
            info!("Simulator: closed handle {} ({})", handle, unit.serial);
        }
        Ok(())
    }

    fn enumerate_units(&self) -> DriverResult<Vec<String>> {
        let state = lock(&self.state);
        if state.disconnected {
            return Ok(Vec::new());
        }
        let open = state.unit.as_ref().map(|u| u.serial.clone());
        Ok(self
            .config
            .serials
            .iter()
            .filter(|s| Some(*s) != open.as_ref())
            .cloned()
            .collect())
    }

    fn ping_unit(&self, handle: PS4000_HANDLE) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if unit.block_running {
                Err(PICO_BUSY)
            } else {
                Ok(())
            }
        })
    }

    fn get_unit_info(&self, handle: PS4000_HANDLE, info: InfoKind) -> DriverResult<String> {
        let variant = self.config.model.variant();
        self.with_unit(handle, |unit, _| {
            Ok(match info {
                InfoKind::DriverVersion => "1.4.0.1 (simulated)".to_string(),
                InfoKind::UsbVersion => "2.0".to_string(),
                InfoKind::HardwareVersion => "1".to_string(),
                InfoKind::VariantInfo => variant.to_string(),
                InfoKind::BatchAndSerial => unit.serial.clone(),
                InfoKind::CalDate => "18Oct26".to_string(),
                InfoKind::KernelVersion => "1.0".to_string(),
            })
        })
    }

    fn flash_led(&self, handle: PS4000_HANDLE, start: i16) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            unit.led = start;
            Ok(())
        })
    }

    fn is_led_flashing(&self, handle: PS4000_HANDLE) -> DriverResult<bool> {
        self.with_unit(handle, |unit, _| Ok(unit.led != 0))
    }

    fn set_channel(
        &self,
        handle: PS4000_HANDLE,
        channel: Channel,
        enabled: bool,
        dc: bool,
        range: Range,
    ) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if !self.profile.has_channel(channel) {
                return Err(PICO_INVALID_CHANNEL);
            }
            if enabled {
                if range.is_resistance() {
                    if unit.probe != Probe::None {
                        return Err(PICO_RESISTANCE_AND_PROBE_NOT_ALLOWED);
                    }
                    if !self.profile.resistances.contains(&range) {
                        return Err(PICO_INVALID_VOLTAGE_RANGE);
                    }
                } else if !self.profile.probe_ranges(unit.probe).contains(&range) {
                    return Err(PICO_INVALID_VOLTAGE_RANGE);
                }
            }
            let state = &mut unit.channels[channel.index()];
            state.enabled = enabled;
            state.dc = dc;
            state.range = range;
            trace!("Simulator: channel {} enabled={} dc={} {:?}", channel, enabled, dc, range);
            Ok(())
        })
    }

    fn set_bw_filter(&self, handle: PS4000_HANDLE, channel: Channel, enable: bool) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if !self.profile.bandwidth_filter {
                return Err(PICO_BANDWIDTH_NOT_SUPPORTED);
            }
            if !self.profile.has_channel(channel) {
                return Err(PICO_INVALID_CHANNEL);
            }
            unit.channels[channel.index()].bw_filter = enable;
            Ok(())
        })
    }

    fn set_probe(&self, handle: PS4000_HANDLE, probe: Probe, range: Range) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if !self.profile.probes.contains(&probe) {
                return Err(PICO_INVALID_PARAMETER);
            }
            if !self.profile.probe_ranges(probe).contains(&range) {
                return Err(PICO_INVALID_VOLTAGE_RANGE);
            }
            let resistance_in_use = unit
                .channels
                .iter()
                .any(|c| c.enabled && c.range.is_resistance());
            if probe != Probe::None && resistance_in_use {
                return Err(PICO_RESISTANCE_AND_PROBE_NOT_ALLOWED);
            }
            unit.probe = probe;
            Ok(())
        })
    }

    fn get_probe(&self, handle: PS4000_HANDLE) -> DriverResult<Probe> {
        self.with_unit(handle, |unit, _| Ok(unit.probe))
    }

    fn get_channel_information(
        &self,
        handle: PS4000_HANDLE,
        info: ChannelInfo,
        probe: Probe,
        channel: Channel,
    ) -> DriverResult<Vec<i32>> {
        self.with_unit(handle, |_, _| {
            if !self.profile.has_channel(channel) {
                return Err(PICO_INVALID_CHANNEL);
            }
            if !self.profile.probes.contains(&probe) {
                return Err(PICO_INVALID_PARAMETER);
            }
            let values = match info {
                ChannelInfo::Ranges => self
                    .profile
                    .probe_ranges(probe)
                    .into_iter()
                    .map(|r| r as i32)
                    .collect(),
                ChannelInfo::Resistances if probe == Probe::None => {
                    self.profile.resistances.iter().map(|r| *r as i32).collect()
                }
                ChannelInfo::Probes => self.profile.probes.iter().map(|p| *p as i32).collect(),
                _ => Vec::new(),
            };
            Ok(values)
        })
    }

    fn set_ext_trigger_range(&self, handle: PS4000_HANDLE, range: Range) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if range < Range::Mv500 || range > Range::V20 {
                return Err(PICO_INVALID_VOLTAGE_RANGE);
            }
            unit.ext_range = Some(range);
            Ok(())
        })
    }

    fn set_frequency_counter(
        &self,
        handle: PS4000_HANDLE,
        channel: Channel,
        enabled: bool,
        range: FrequencyCounterRange,
        threshold_major: i16,
        threshold_minor: i16,
    ) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if !self.profile.has_channel(channel) {
                return Err(PICO_INVALID_CHANNEL);
            }
            if enabled && threshold_minor >= threshold_major {
                return Err(PICO_INVALID_PARAMETER);
            }
            unit.frequency_counter = enabled.then_some((channel, range));
            Ok(())
        })
    }

    fn memory_segments(&self, handle: PS4000_HANDLE, segments: u16) -> DriverResult<i32> {
        let memory = self.config.memory_samples;
        self.with_unit(handle, |unit, _| {
            if unit.is_busy() {
                return Err(PICO_BUSY);
            }
            if segments == 0 || segments > self.profile.max_segments {
                return Err(PICO_TOO_MANY_SEGMENTS);
            }
            unit.segments = segments;
            unit.captures_per_run = unit.captures_per_run.min(segments);
            unit.captures.clear();
            unit.bulk.clear();
            Ok((memory / segments as u32).min(i32::MAX as u32) as i32)
        })
    }

    fn set_no_of_captures(&self, handle: PS4000_HANDLE, captures: u16) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if captures == 0 || captures > unit.segments {
                return Err(PICO_NOT_ENOUGH_SEGMENTS);
            }
            unit.captures_per_run = captures;
            Ok(())
        })
    }

    fn get_no_of_captures(&self, handle: PS4000_HANDLE) -> DriverResult<u16> {
        self.with_unit(handle, |unit, _| Ok(unit.captures_per_run))
    }

    fn get_timebase(
        &self,
        handle: PS4000_HANDLE,
        timebase: u32,
        samples: i32,
        oversample: i16,
        segment: u16,
    ) -> DriverResult<(i32, i32)> {
        let (interval, max) = self.timebase_query(handle, timebase, samples, oversample, segment)?;
        Ok((interval.round() as i32, max))
    }

    fn get_timebase2(
        &self,
        handle: PS4000_HANDLE,
        timebase: u32,
        samples: i32,
        oversample: i16,
        segment: u16,
    ) -> DriverResult<(f32, i32)> {
        if !self.config.float_timebase {
            return Err(PICO_NOT_USED);
        }
        let (interval, max) = self.timebase_query(handle, timebase, samples, oversample, segment)?;
        Ok((interval as f32, max))
    }

    fn set_ets(&self, handle: PS4000_HANDLE, mode: EtsMode, cycles: i16, interleave: i16) -> DriverResult<i32> {
        self.with_unit(handle, |unit, _| {
            if !self.profile.ets {
                return Err(PICO_ETS_NOT_SUPPORTED);
            }
            if mode == EtsMode::Off {
                unit.ets = mode;
                return Ok(0);
            }
            if cycles < 1 || interleave < 1 || interleave > cycles {
                return Err(PICO_INVALID_PARAMETER);
            }
            unit.ets = mode;
            Ok(ETS_BASE_PICOSECONDS / interleave as i32)
        })
    }

    fn set_simple_trigger(
        &self,
        handle: PS4000_HANDLE,
        enable: bool,
        source: Channel,
        _threshold: i16,
        direction: ThresholdDirection,
        delay: u32,
        _auto_trigger_ms: i16,
    ) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if enable {
                if !(self.profile.has_channel(source) || source == Channel::External) {
                    return Err(PICO_INVALID_TRIGGER_CHANNEL);
                }
                if !direction.is_simple() {
                    return Err(PICO_INVALID_TRIGGER_PROPERTY);
                }
            }
            unit.trigger = TriggerSetup {
                simple: enable,
                delay,
                ..TriggerSetup::default()
            };
            Ok(())
        })
    }

    fn set_trigger_channel_properties(
        &self,
        handle: PS4000_HANDLE,
        properties: &[TRIGGER_CHANNEL_PROPERTIES],
        aux_output_enable: bool,
        _auto_trigger_ms: i32,
    ) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            for prop in properties {
                let raw = prop.channel;
                let channel = Channel::from_raw(raw).ok_or(PICO_INVALID_TRIGGER_CHANNEL)?;
                if !(self.profile.has_channel(channel) || channel == Channel::External) {
                    return Err(PICO_INVALID_TRIGGER_CHANNEL);
                }
            }
            unit.trigger.simple = false;
            unit.trigger.aux_output = aux_output_enable;
            Ok(())
        })
    }

    fn set_trigger_channel_conditions(
        &self,
        handle: PS4000_HANDLE,
        conditions: &[TRIGGER_CONDITIONS],
    ) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            unit.trigger.simple = false;
            unit.trigger.conditions = conditions.len();
            Ok(())
        })
    }

    fn set_trigger_channel_directions(
        &self,
        handle: PS4000_HANDLE,
        directions: &TriggerDirections,
    ) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            unit.trigger.directions = Some(*directions);
            Ok(())
        })
    }

    fn set_trigger_delay(&self, handle: PS4000_HANDLE, delay: u32) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            unit.trigger.delay = delay;
            Ok(())
        })
    }

    fn set_pulse_width_qualifier(
        &self,
        handle: PS4000_HANDLE,
        conditions: &[PWQ_CONDITIONS],
        _direction: ThresholdDirection,
        lower: u32,
        upper: u32,
        kind: PulseWidthType,
    ) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            let ranged = matches!(kind, PulseWidthType::InRange | PulseWidthType::OutOfRange);
            if ranged && lower > upper {
                return Err(PICO_PULSE_WIDTH_QUALIFIER);
            }
            unit.trigger.pwq = !conditions.is_empty() && kind != PulseWidthType::None;
            Ok(())
        })
    }

    fn is_trigger_or_pwq_enabled(&self, handle: PS4000_HANDLE) -> DriverResult<(bool, bool)> {
        self.with_unit(handle, |unit, _| Ok((unit.trigger.enabled(), unit.trigger.pwq)))
    }

    fn trigger_within_pre_trigger_samples(&self, handle: PS4000_HANDLE, enable: bool) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            unit.trigger.within_pre_trigger = enable;
            Ok(())
        })
    }

    fn hold_off(&self, handle: PS4000_HANDLE, holdoff: u64, _kind: HoldOffType) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            unit.trigger.hold_off = holdoff;
            Ok(())
        })
    }

    fn get_trigger_time_offset64(&self, handle: PS4000_HANDLE, segment: u16) -> DriverResult<TimeValue> {
        self.with_unit(handle, |unit, _| {
            let capture = unit.captures.get(&segment).ok_or(PICO_NO_SAMPLES_AVAILABLE)?;
            let ps = capture.offset_ps.ok_or(PICO_TRIGGER_ERROR)?;
            Ok(TimeValue::new(ps, TimeUnits::Picoseconds))
        })
    }

    fn get_trigger_channel_time_offset64(
        &self,
        handle: PS4000_HANDLE,
        segment: u16,
        channel: Channel,
    ) -> DriverResult<TimeValue> {
        if !self.profile.has_channel(channel) {
            return Err(PICO_INVALID_CHANNEL);
        }
        let base = self.get_trigger_time_offset64(handle, segment)?;
        Ok(TimeValue::new(base.value - 5 * channel.index() as i64, base.units))
    }

    fn get_values_trigger_time_offset_bulk64(
        &self,
        handle: PS4000_HANDLE,
        from_segment: u16,
        to_segment: u16,
    ) -> DriverResult<Vec<TimeValue>> {
        if from_segment > to_segment {
            return Err(PICO_SEGMENT_OUT_OF_RANGE);
        }
        (from_segment..=to_segment)
            .map(|segment| self.get_trigger_time_offset64(handle, segment))
            .collect()
    }

    fn get_values_trigger_channel_time_offset_bulk64(
        &self,
        handle: PS4000_HANDLE,
        from_segment: u16,
        to_segment: u16,
        channel: Channel,
    ) -> DriverResult<Vec<TimeValue>> {
        if from_segment > to_segment {
            return Err(PICO_SEGMENT_OUT_OF_RANGE);
        }
        (from_segment..=to_segment)
            .map(|segment| self.get_trigger_channel_time_offset64(handle, segment, channel))
            .collect()
    }

    fn set_data_buffers(
        &self,
        handle: PS4000_HANDLE,
        channel: Channel,
        max: Option<&SampleBuffer>,
        min: Option<&SampleBuffer>,
        mode: DownSamplingMode,
    ) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if !self.profile.has_channel(channel) {
                return Err(PICO_INVALID_CHANNEL);
            }
            let idx = channel.index();
            if max.is_none() && min.is_none() {
                unit.buffers[idx] = Registered::default();
                unit.bulk.retain(|(ch, _), _| *ch != idx);
                return Ok(());
            }
            unit.buffers[idx] = Registered {
                max: max.map(SampleBuffer::downgrade),
                min: min.map(SampleBuffer::downgrade),
                mode,
            };
            Ok(())
        })
    }

    fn set_data_buffer_bulk(
        &self,
        handle: PS4000_HANDLE,
        channel: Channel,
        buffer: Option<&SampleBuffer>,
        segment: u16,
    ) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if !self.profile.has_channel(channel) {
                return Err(PICO_INVALID_CHANNEL);
            }
            if segment >= unit.segments {
                return Err(PICO_SEGMENT_OUT_OF_RANGE);
            }
            let key = (channel.index(), segment);
            match buffer {
                Some(buffer) => {
                    unit.bulk.insert(key, buffer.downgrade());
                }
                None => {
                    unit.bulk.remove(&key);
                }
            }
            Ok(())
        })
    }

    fn run_block(
        &self,
        handle: PS4000_HANDLE,
        pre_trigger: i32,
        post_trigger: i32,
        timebase: u32,
        oversample: i16,
        segment: u16,
        ready: BlockReadyFn,
    ) -> DriverResult<i32> {
        let memory = self.config.memory_samples;
        let job = self.with_unit(handle, |unit, state| {
            if unit.is_busy() {
                return Err(PICO_BUSY);
            }
            if pre_trigger < 0 || post_trigger < 0 || pre_trigger + post_trigger == 0 {
                return Err(PICO_INVALID_PARAMETER);
            }
            if !(1..=256).contains(&oversample) {
                return Err(PICO_INVALID_PARAMETER);
            }
            let enabled = unit.enabled();
            if enabled.is_empty() {
                return Err(PICO_INVALID_CHANNEL);
            }
            let interval_ns = self.profile.interval_ns(self.config.model, timebase, enabled.len())?;
            if pre_trigger + post_trigger > unit.max_samples(memory) {
                return Err(PICO_TOO_MANY_SAMPLES);
            }
            let captures = unit.captures_per_run;
            if segment as u32 + captures as u32 > unit.segments as u32 {
                return Err(PICO_SEGMENT_OUT_OF_RANGE);
            }

            for s in segment..segment + captures {
                unit.captures.remove(&s);
            }
            unit.block_running = true;
            unit.block_ready = false;

            Ok(BlockJob {
                handle,
                pre: pre_trigger as usize,
                post: post_trigger as usize,
                interval_s: interval_ns * 1e-9,
                first_segment: segment,
                captures,
                channels: enabled
                    .iter()
                    .map(|&i| (i, unit.channels[i].range))
                    .collect(),
                inputs: state.inputs,
                max_value: self.profile.max_value,
                triggered: unit.trigger.enabled(),
            })
        })?;

        // Reap a worker that already delivered its notification
        self.join_worker(false);

        debug!(
            "Simulator: block run {} captures x {} samples from segment {}",
            job.captures,
            job.pre + job.post,
            job.first_segment
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let state = Arc::clone(&self.state);
        let capture_time = self.config.capture_time;
        let join = thread::spawn(move || {
            let deadline = Instant::now() + capture_time;
            while !worker_cancel.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep((deadline - now).min(Duration::from_millis(1)));
            }
            let cancelled = worker_cancel.load(Ordering::SeqCst);

            let captures: Vec<(u16, Capture)> = if cancelled {
                Vec::new()
            } else {
                (job.first_segment..job.first_segment + job.captures)
                    .map(|s| (s, generate_block(&job, s)))
                    .collect()
            };

            let status = {
                let mut guard = lock(&state);
                let fault = guard.fault.take();
                match guard.unit.as_mut().filter(|u| u.handle == job.handle) {
                    Some(unit) => {
                        unit.block_running = false;
                        unit.block_ready = true;
                        if cancelled {
                            PICO_CANCELLED
                        } else if let Some(status) = fault {
                            status
                        } else {
                            unit.captures.extend(captures);
                            PICO_OK
                        }
                    }
                    None => PICO_CANCELLED,
                }
            };
            trace!("Simulator: block ready, {}", status_to_string(status));
            ready(job.handle, status);
        });

        *lock(&self.worker) = Some(Worker { cancel, join });
        Ok(capture_time.as_millis().min(i32::MAX as u128) as i32)
    }

    fn is_ready(&self, handle: PS4000_HANDLE) -> DriverResult<bool> {
        self.with_unit(handle, |unit, _| Ok(unit.block_ready))
    }

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
    ) -> DriverResult<u32> {
        self.with_unit(handle, |unit, _| {
            if unit.is_busy() {
                return Err(PICO_BUSY);
            }
            if sample_interval == 0 {
                return Err(PICO_INVALID_SAMPLE_INTERVAL);
            }
            if down_sample_ratio == 0 {
                return Err(PICO_INVALID_SAMPLERATIO);
            }
            if overview_buffer_size == 0 {
                return Err(PICO_INVALID_PARAMETER);
            }
            let enabled = unit.enabled();
            if enabled.is_empty() {
                return Err(PICO_INVALID_CHANNEL);
            }
            let buffer_len = enabled
                .iter()
                .filter_map(|&i| unit.buffers[i].max.as_ref())
                .map(WeakSampleBuffer::len)
                .min()
                .ok_or(PICO_BUFFERS_NOT_SET)?;
            if buffer_len == 0 {
                return Err(PICO_INVALID_BUFFER);
            }

            let unit_fs = units.femtoseconds() as f64;
            let requested_ns = sample_interval as f64 * unit_fs / 1e6;
            let achieved_ns = requested_ns.max(MIN_STREAMING_INTERVAL_NS);
            let achieved = (achieved_ns * 1e6 / unit_fs).ceil().min(u32::MAX as f64) as u32;

            unit.stream = Some(StreamState {
                interval_s: achieved as f64 * unit_fs * 1e-15,
                max_pre: max_pre_trigger as u64,
                max_post: max_post_trigger as u64,
                auto_stop,
                ratio: if mode == DownSamplingMode::None { 1 } else { down_sample_ratio },
                mode,
                written: 0,
                write_index: 0,
                buffer_len,
                trigger_enabled: unit.trigger.enabled(),
                triggered: false,
                active: true,
            });
            debug!(
                "Simulator: streaming at {} {:?}, buffer {} samples",
                achieved, units, buffer_len
            );
            Ok(achieved)
        })
    }

    fn get_streaming_latest_values(
        &self,
        handle: PS4000_HANDLE,
        ready: &mut dyn FnMut(StreamingReady),
    ) -> DriverResult<()> {
        let chunk = self.config.streaming_chunk.max(1) as u64;
        let max_value = self.profile.max_value;
        let notification = self.with_unit(handle, |unit, state| {
            let channels: Vec<(usize, Range)> = unit
                .enabled()
                .into_iter()
                .map(|i| (i, unit.channels[i].range))
                .collect();
            let Some(stream) = unit.stream.as_mut() else {
                return Err(PICO_INVALID_CALL);
            };
            if !stream.active {
                return Ok(None);
            }
            if let Some(status) = state.fault.take() {
                stream.active = false;
                return Err(status);
            }

            let ratio = stream.ratio as u64;
            let mut raw = chunk.div_ceil(ratio) * ratio;
            if stream.auto_stop {
                let remaining = (stream.max_pre + stream.max_post).saturating_sub(stream.written);
                raw = raw.min(remaining.div_ceil(ratio) * ratio);
            }
            let space = (stream.buffer_len - stream.write_index) as u64;
            let count = raw.div_ceil(ratio).min(space);
            let raw = (count * ratio).min(raw);
            if count == 0 {
                return Ok(None);
            }

            let mut overflow = 0i16;
            for &(idx, range) in &channels {
                let input = state.inputs[idx];
                let samples: Vec<i16> = (0..raw)
                    .map(|i| {
                        let t = (stream.written + i) as f64 * stream.interval_s;
                        let (value, over) = to_sample(input.millivolts_at(t), range, max_value);
                        if over {
                            overflow |= 1 << idx;
                        }
                        value
                    })
                    .collect();
                let (hi, lo) = downsample(&samples, stream.ratio, stream.mode);
                let reg = &unit.buffers[idx];
                if let Some(max) = &reg.max {
                    write_into(max, stream.write_index, &hi);
                }
                if let (Some(lo), Some(min)) = (lo, &reg.min) {
                    write_into(min, stream.write_index, &lo);
                }
            }

            let mut trigger_at = 0u32;
            let mut triggered = false;
            if stream.trigger_enabled
                && !stream.triggered
                && stream.written + raw > stream.max_pre
            {
                stream.triggered = true;
                triggered = true;
                trigger_at = (stream.max_pre.saturating_sub(stream.written) / ratio) as u32;
            }

            stream.written += raw;
            let start_index = stream.write_index as u32;
            stream.write_index = (stream.write_index + count as usize) % stream.buffer_len;
            let auto_stop =
                stream.auto_stop && stream.written >= stream.max_pre + stream.max_post;
            if auto_stop {
                stream.active = false;
            }

            Ok(Some(StreamingReady {
                no_of_samples: count as i32,
                start_index,
                overflow,
                trigger_at,
                triggered,
                auto_stop,
            }))
        })?;

        // Deliver outside the lock so the callback may query the driver
        if let Some(notification) = notification {
            ready(notification);
        }
        Ok(())
    }

    fn no_of_streaming_values(&self, handle: PS4000_HANDLE) -> DriverResult<u32> {
        self.with_unit(handle, |unit, _| {
            let stream = unit.stream.as_ref().ok_or(PICO_NO_SAMPLES_AVAILABLE)?;
            Ok((stream.written / stream.ratio as u64).min(u32::MAX as u64) as u32)
        })
    }

    fn get_max_down_sample_ratio(
        &self,
        handle: PS4000_HANDLE,
        samples: u32,
        mode: DownSamplingMode,
        segment: u16,
    ) -> DriverResult<u32> {
        self.with_unit(handle, |unit, _| {
            if segment >= unit.segments {
                return Err(PICO_SEGMENT_OUT_OF_RANGE);
            }
            let capture = unit.captures.get(&segment).ok_or(PICO_NO_SAMPLES_AVAILABLE)?;
            if mode == DownSamplingMode::None {
                return Ok(1);
            }
            Ok((samples as usize).min(capture.len()).max(1) as u32)
        })
    }

    fn get_values(
        &self,
        handle: PS4000_HANDLE,
        start_index: u32,
        samples: u32,
        down_sample_ratio: u32,
        mode: DownSamplingMode,
        segment: u16,
    ) -> DriverResult<(u32, i16)> {
        self.with_unit(handle, |unit, _| {
            if unit.block_running {
                return Err(PICO_BUSY);
            }
            read_values(unit, start_index, samples, down_sample_ratio, mode, segment)
        })
    }

    fn get_values_bulk(
        &self,
        handle: PS4000_HANDLE,
        samples: u32,
        from_segment: u16,
        to_segment: u16,
    ) -> DriverResult<(u32, Vec<i16>)> {
        self.with_unit(handle, |unit, _| {
            if unit.block_running {
                return Err(PICO_BUSY);
            }
            if from_segment > to_segment || to_segment >= unit.segments {
                return Err(PICO_SEGMENT_OUT_OF_RANGE);
            }
            let mut count = samples as usize;
            let mut overflows = Vec::new();
            for segment in from_segment..=to_segment {
                let capture = unit.captures.get(&segment).ok_or(PICO_NO_SAMPLES_AVAILABLE)?;
                let mut any = false;
                for (idx, data) in capture.samples.iter().enumerate() {
                    if data.is_empty() {
                        continue;
                    }
                    if let Some(target) = unit.bulk.get(&(idx, segment)) {
                        let n = (samples as usize).min(data.len());
                        count = count.min(write_into(target, 0, &data[..n]));
                        any = true;
                    }
                }
                if !any {
                    return Err(PICO_BUFFERS_NOT_SET);
                }
                overflows.push(capture.overflow);
            }
            Ok((count as u32, overflows))
        })
    }

    fn get_values_async(
        &self,
        handle: PS4000_HANDLE,
        start_index: u32,
        samples: u32,
        down_sample_ratio: u32,
        mode: DownSamplingMode,
        segment: u16,
        ready: DataReadyFn,
    ) -> DriverResult<()> {
        // Fail synchronously when nothing has been captured
        self.with_unit(handle, |unit, _| {
            if unit.block_running {
                return Err(PICO_BUSY);
            }
            unit.captures
                .get(&segment)
                .map(|_| ())
                .ok_or(PICO_NO_SAMPLES_AVAILABLE)
        })?;

        let state = Arc::clone(&self.state);
        thread::spawn(move || {
            let result = {
                let guard = lock(&state);
                match guard.unit.as_ref().filter(|u| u.handle == handle) {
                    Some(unit) => read_values(unit, start_index, samples, down_sample_ratio, mode, segment)
                        .map(|(n, overflow)| {
                            let capture = unit.captures.get(&segment);
                            DataReady {
                                no_of_samples: n as i32,
                                overflow,
                                trigger_at: capture
                                    .map(|c| c.trigger_at.saturating_sub(start_index))
                                    .unwrap_or(0),
                                triggered: capture.map(|c| c.triggered).unwrap_or(false),
                            }
                        }),
                    None => Err(PICO_INVALID_HANDLE),
                }
            };
            let data = result.unwrap_or_else(|status| {
                warn!("Simulator: async read failed, {}", status_to_string(status));
                DataReady {
                    no_of_samples: 0,
                    overflow: 0,
                    trigger_at: 0,
                    triggered: false,
                }
            });
            ready(handle, data);
        });
        Ok(())
    }

    fn stop(&self, handle: PS4000_HANDLE) -> DriverResult<()> {
        self.with_unit(handle, |unit, _| {
            if let Some(stream) = unit.stream.as_mut() {
                stream.active = false;
            }
            Ok(())
        })?;
        self.join_worker(true);
        Ok(())
    }

    fn sig_gen_off(&self, handle: PS4000_HANDLE) -> DriverResult<()> {
        self.check_siggen(SigGenKind::BuiltIn)?;
        self.with_unit(handle, |unit, _| {
            unit.siggen_source = None;
            Ok(())
        })
    }

    fn set_sig_gen_built_in(&self, handle: PS4000_HANDLE, signal: &BuiltInSignal) -> DriverResult<()> {
        self.check_siggen(SigGenKind::BuiltIn)?;
        let max_frequency = match self.profile.siggen {
            SigGenKind::Arbitrary => 1_000_000.0,
            _ => 20_000.0,
        };
        self.with_unit(handle, |unit, _| {
            if signal.start_frequency > max_frequency || signal.stop_frequency > max_frequency {
                return Err(PICO_SIG_GEN_PARAM);
            }
            if signal.pk_to_pk_uv > 4_000_000 {
                return Err(PICO_SIGGEN_PK_TO_PK);
            }
            if signal.offset_uv.unsigned_abs() + signal.pk_to_pk_uv / 2 > 2_000_000 {
                return Err(PICO_SIGGEN_OFFSET_VOLTAGE);
            }
            if signal.shots > 0 && signal.sweeps > 0 {
                return Err(PICO_SHOTS_SWEEPS_WARNING);
            }
            unit.siggen_source = Some(signal.trigger.source);
            Ok(())
        })
    }

    fn set_sig_gen_arbitrary(
        &self,
        handle: PS4000_HANDLE,
        signal: &ArbitrarySignal,
        phases: PhaseSweep,
    ) -> DriverResult<()> {
        self.check_siggen(SigGenKind::Arbitrary)?;
        self.with_unit(handle, |unit, _| {
            let len = signal.waveform.len() as u32;
            if !(AWG_MIN_BUFFER..=AWG_MAX_BUFFER).contains(&len) {
                return Err(PICO_SIG_GEN_PARAM);
            }
            if signal.waveform.iter().any(|&v| !(0..=AWG_MAX_VALUE).contains(&v)) {
                return Err(PICO_SIG_GEN_PARAM);
            }
            if phases.start_delta_phase == 0 {
                return Err(PICO_SIG_GEN_PARAM);
            }
            if signal.shots > 0 && signal.sweeps > 0 {
                return Err(PICO_SHOTS_SWEEPS_WARNING);
            }
            unit.siggen_source = Some(signal.trigger.source);
            Ok(())
        })
    }

    fn sig_gen_frequency_to_phase(
        &self,
        handle: PS4000_HANDLE,
        frequency: f64,
        index_mode: IndexMode,
        buffer_length: u32,
    ) -> DriverResult<u32> {
        self.check_siggen(SigGenKind::BuiltIn)?;
        self.with_unit(handle, |_, _| {
            if buffer_length == 0 || buffer_length > AWG_MAX_BUFFER || frequency < 0.0 {
                return Err(PICO_SIG_GEN_PARAM);
            }
            let played = buffer_length as f64 * index_mode.multiplier() as f64;
            let phase = frequency * played * 4_294_967_296.0 / (AWG_DAC_FREQUENCY * AWG_MAX_BUFFER as f64);
            if phase > u32::MAX as f64 {
                return Err(PICO_SIG_GEN_PARAM);
            }
            Ok(phase as u32)
        })
    }

    fn sig_gen_arbitrary_min_max_values(&self, handle: PS4000_HANDLE) -> DriverResult<ArbitraryLimits> {
        self.check_siggen(SigGenKind::Arbitrary)?;
        self.with_unit(handle, |_, _| {
            Ok(ArbitraryLimits {
                min_value: 0,
                max_value: AWG_MAX_VALUE,
                min_size: AWG_MIN_BUFFER,
                max_size: AWG_MAX_BUFFER,
            })
        })
    }

    fn sig_gen_software_control(&self, handle: PS4000_HANDLE, _state: bool) -> DriverResult<()> {
        self.check_siggen(SigGenKind::BuiltIn)?;
        self.with_unit(handle, |unit, _| match unit.siggen_source {
            Some(SigGenTrigSource::SoftTrig) => Ok(()),
            _ => Err(PICO_SIGGEN_TRIGGER_SOURCE),
        })
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        self.join_worker(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(model: Model) -> (SimulatedDriver, PS4000_HANDLE) {
        let driver = SimulatedDriver::new(SimConfig::for_model(model));
        let handle = driver.open_unit(None).unwrap();
        (driver, handle)
    }

    #[test]
    fn test_timebase_rules_by_variant() {
        let (driver, handle) = open(Model::Ps4424);
        let (interval, _) = driver.get_timebase2(handle, 3, 1000, 1, 0).unwrap();
        assert_eq!(interval, 32.0);
        let (interval, _) = driver.get_timebase2(handle, 2, 1000, 1, 0).unwrap();
        assert_eq!(interval, 16.0);

        driver.set_channel(handle, Channel::B, true, true, Range::V2).unwrap();
        assert_eq!(driver.get_timebase2(handle, 0, 1000, 1, 0), Err(PICO_INVALID_TIMEBASE));

        let (driver, handle) = open(Model::Ps4262);
        let (interval, _) = driver.get_timebase2(handle, 9, 1000, 1, 0).unwrap();
        assert_eq!(interval, 1000.0);
    }

    #[test]
    fn test_max_samples_divided_by_segments_and_channels() {
        let (driver, handle) = open(Model::Ps4424);
        let (_, one) = driver.get_timebase2(handle, 3, 0, 1, 0).unwrap();
        driver.set_channel(handle, Channel::B, true, true, Range::V2).unwrap();
        let (_, two) = driver.get_timebase2(handle, 3, 0, 1, 0).unwrap();
        assert_eq!(one, two * 2);
        driver.memory_segments(handle, 4).unwrap();
        let (_, segmented) = driver.get_timebase2(handle, 3, 0, 1, 0).unwrap();
        assert_eq!(two, segmented * 4);
    }

    #[test]
    fn test_channel_information_depends_on_probe() {
        let (driver, handle) = open(Model::Ps4224);
        let plain = driver
            .get_channel_information(handle, ChannelInfo::Ranges, Probe::None, Channel::A)
            .unwrap();
        let clamp = driver
            .get_channel_information(handle, ChannelInfo::Ranges, Probe::CurrentClamp10A, Channel::A)
            .unwrap();
        assert!(plain.len() > clamp.len());
        assert!(plain.contains(&(Range::V100 as i32)));
        assert!(!clamp.contains(&(Range::V100 as i32)));
        assert_eq!(
            driver.get_channel_information(handle, ChannelInfo::Ranges, Probe::None, Channel::C),
            Err(PICO_INVALID_CHANNEL)
        );
    }

    #[test]
    fn test_block_capture_completes_on_worker() {
        let (driver, handle) = open(Model::Ps4224);
        let (tx, rx) = flume::unbounded();
        driver
            .run_block(
                handle,
                100,
                400,
                3,
                1,
                0,
                Box::new(move |h, status| {
                    let _ = tx.send((h, status));
                }),
            )
            .unwrap();
        let (h, status) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!((h, status), (handle, PICO_OK));
        assert!(driver.is_ready(handle).unwrap());

        let buffer = SampleBuffer::new(500);
        driver
            .set_data_buffers(handle, Channel::A, Some(&buffer), None, DownSamplingMode::None)
            .unwrap();
        let (n, overflow) = driver
            .get_values(handle, 0, 500, 1, DownSamplingMode::None, 0)
            .unwrap();
        assert_eq!(n, 500);
        assert_eq!(overflow, 0);
        assert!(buffer.to_vec().iter().any(|&v| v != 0));
    }

    #[test]
    fn test_stop_cancels_running_block() {
        let mut config = SimConfig::for_model(Model::Ps4224);
        config.capture_time = Duration::from_secs(10);
        let driver = SimulatedDriver::new(config);
        let handle = driver.open_unit(None).unwrap();
        let (tx, rx) = flume::unbounded();
        driver
            .run_block(handle, 0, 100, 3, 1, 0, Box::new(move |_, status| {
                let _ = tx.send(status);
            }))
            .unwrap();
        driver.stop(handle).unwrap();
        assert_eq!(rx.try_recv(), Ok(PICO_CANCELLED));
    }

    #[test]
    fn test_downsample_modes() {
        let raw = [1i16, 5, -3, 7, 2, 2];
        let (max, min) = downsample(&raw, 2, DownSamplingMode::Aggregate);
        assert_eq!(max, vec![5, 7, 2]);
        assert_eq!(min, Some(vec![1, -3, 2]));
        let (avg, none) = downsample(&raw, 3, DownSamplingMode::Average);
        assert_eq!(avg, vec![1, 4]);
        assert!(none.is_none());
    }

    #[test]
    fn test_overflow_when_input_exceeds_range() {
        let (driver, handle) = open(Model::Ps4224);
        driver.set_channel(handle, Channel::A, true, true, Range::Mv100).unwrap();
        let (tx, rx) = flume::unbounded();
        driver
            .run_block(handle, 0, 200, 3, 1, 0, Box::new(move |_, s| {
                let _ = tx.send(s);
            }))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(PICO_OK));
        let buffer = SampleBuffer::new(200);
        driver
            .set_data_buffers(handle, Channel::A, Some(&buffer), None, DownSamplingMode::None)
            .unwrap();
        let (_, overflow) = driver
            .get_values(handle, 0, 200, 1, DownSamplingMode::None, 0)
            .unwrap();
        assert_eq!(OverflowFlags(overflow).channels(), vec![Channel::A]);
    }

    #[test]
    fn test_async_open_progresses() {
        let driver = SimulatedDriver::new(SimConfig::default());
        driver.open_unit_async(None).unwrap();
        let first = driver.open_unit_progress().unwrap();
        assert!(!first.complete);
        let _ = driver.open_unit_progress().unwrap();
        let last = driver.open_unit_progress().unwrap();
        assert!(last.complete);
        assert_eq!(last.percent, 100);
        assert!(driver.ping_unit(last.handle).is_ok());
    }

    #[test]
    fn test_disconnect_reports_not_responding() {
        let (driver, handle) = open(Model::Ps4424);
        driver.disconnect();
        assert_eq!(driver.ping_unit(handle), Err(PICO_NOT_RESPONDING));
        assert_eq!(driver.enumerate_units(), Ok(Vec::new()));
    }
}
