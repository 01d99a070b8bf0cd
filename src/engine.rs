//! Acquisition engine
//!
//! Drives block, rapid-block and streaming runs through the states
//!
//! ```text
//! Idle -> Armed -> Running(mode) -> Completed -> Idle
//!                        |      \-> Stopping -> Idle
//!                        \-> Faulted --stop--> Idle
//! ```
//!
//! Driver-thread notifications never touch engine state directly. They are
//! posted as events on a `flume` channel and folded into the state machine
//! on the caller thread the next time the engine is polled, waited on or
//! fetched from.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, trace, warn};

use crate::buffers::{BufferManager, BufferRequirement, PinnedBuffers, SampleBuffer};
use crate::channels::ChannelRegistry;
use crate::driver::{DataReady, Driver, StreamingReady};
use crate::error::{Result, ScopeError};
use crate::ffi::{PICO_CANCELLED, PICO_OK, PICO_STATUS, PS4000_HANDLE};
use crate::session::DeviceSession;
use crate::timebase::{ResolvedTimebase, TimebaseRequest, TimebaseResolver};
use crate::trigger::TriggerSpec;
use crate::types::{millis, Channel, DownSamplingMode, EtsMode, OverflowFlags, TimeUnits, TimeValue};

/// Kind of run in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Block,
    RapidBlock,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Armed,
    Running(RunMode),
    Stopping,
    Completed,
    Faulted,
}

impl AcquisitionState {
    pub fn is_running(&self) -> bool {
        matches!(self, AcquisitionState::Running(_))
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionState::Running(mode) => write!(f, "Running({:?})", mode),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Downsampling applied when values are fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downsampling {
    pub mode: DownSamplingMode,
    pub ratio: u32,
}

impl Default for Downsampling {
    fn default() -> Self {
        Self {
            mode: DownSamplingMode::None,
            ratio: 1,
        }
    }
}

impl Downsampling {
    pub fn new(mode: DownSamplingMode, ratio: u32) -> Self {
        Self { mode, ratio }
    }

    /// Ratio actually applied; raw reads ignore the configured ratio
    pub fn effective_ratio(&self) -> u32 {
        match self.mode {
            DownSamplingMode::None => 1,
            _ => self.ratio,
        }
    }

    /// Output samples produced from `raw` input samples
    pub fn output_len(&self, raw: u32) -> u32 {
        raw.div_ceil(self.effective_ratio().max(1))
    }
}

/// Streaming run parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingConfig {
    pub sample_interval: u32,
    pub time_units: TimeUnits,
    pub max_pre_trigger: u32,
    pub max_post_trigger: u32,
    pub auto_stop: bool,
    /// Samples the driver buffers between pumps
    pub overview_buffer_size: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            sample_interval: 1,
            time_units: TimeUnits::Microseconds,
            max_pre_trigger: 0,
            max_post_trigger: 100_000,
            auto_stop: false,
            overview_buffer_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Block {
        pre_trigger: u32,
        post_trigger: u32,
        segment: u16,
    },
    RapidBlock {
        pre_trigger: u32,
        post_trigger: u32,
        captures: u16,
    },
    Streaming(StreamingConfig),
}

/// Everything needed to arm one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionPlan {
    pub mode: PlanMode,
    /// Timebase index, ignored by streaming
    pub timebase: u32,
    pub oversample: i16,
    pub downsampling: Downsampling,
}

impl Default for AcquisitionPlan {
    fn default() -> Self {
        Self::block(0, 1_000, 3)
    }
}

impl AcquisitionPlan {
    pub fn block(pre_trigger: u32, post_trigger: u32, timebase: u32) -> Self {
        Self {
            mode: PlanMode::Block {
                pre_trigger,
                post_trigger,
                segment: 0,
            },
            timebase,
            oversample: 1,
            downsampling: Downsampling::default(),
        }
    }

    pub fn rapid(pre_trigger: u32, post_trigger: u32, captures: u16, timebase: u32) -> Self {
        Self {
            mode: PlanMode::RapidBlock {
                pre_trigger,
                post_trigger,
                captures,
            },
            timebase,
            oversample: 1,
            downsampling: Downsampling::default(),
        }
    }

    pub fn streaming(config: StreamingConfig) -> Self {
        Self {
            mode: PlanMode::Streaming(config),
            timebase: 0,
            oversample: 1,
            downsampling: Downsampling::default(),
        }
    }

    pub fn with_downsampling(mut self, mode: DownSamplingMode, ratio: u32) -> Self {
        self.downsampling = Downsampling::new(mode, ratio);
        self
    }

    pub fn in_segment(mut self, segment: u16) -> Self {
        if let PlanMode::Block { segment: s, .. } = &mut self.mode {
            *s = segment;
        }
        self
    }

    pub fn run_mode(&self) -> RunMode {
        match self.mode {
            PlanMode::Block { .. } => RunMode::Block,
            PlanMode::RapidBlock { .. } => RunMode::RapidBlock,
            PlanMode::Streaming(_) => RunMode::Streaming,
        }
    }

    /// Raw samples per capture (pre + post trigger)
    pub fn samples(&self) -> u32 {
        match self.mode {
            PlanMode::Block {
                pre_trigger,
                post_trigger,
                ..
            }
            | PlanMode::RapidBlock {
                pre_trigger,
                post_trigger,
                ..
            } => pre_trigger.saturating_add(post_trigger),
            PlanMode::Streaming(cfg) => cfg.max_pre_trigger.saturating_add(cfg.max_post_trigger),
        }
    }

    fn pre_trigger(&self) -> u32 {
        match self.mode {
            PlanMode::Block { pre_trigger, .. } | PlanMode::RapidBlock { pre_trigger, .. } => pre_trigger,
            PlanMode::Streaming(cfg) => cfg.max_pre_trigger,
        }
    }

    fn segments(&self) -> std::ops::Range<u16> {
        match self.mode {
            PlanMode::Block { segment, .. } => segment..segment + 1,
            PlanMode::RapidBlock { captures, .. } => 0..captures,
            PlanMode::Streaming(_) => 0..1,
        }
    }

    /// Shortest buffer that can hold what the run delivers
    fn required_len(&self) -> usize {
        match self.mode {
            PlanMode::Block { .. } => self.downsampling.output_len(self.samples()) as usize,
            PlanMode::RapidBlock { .. } => self.samples() as usize,
            PlanMode::Streaming(cfg) => self.downsampling.output_len(cfg.overview_buffer_size) as usize,
        }
    }

    fn validate(&self, segments: u16) -> Result<()> {
        let ds = self.downsampling;
        if ds.mode != DownSamplingMode::None && ds.ratio == 0 {
            return Err(ScopeError::invalid("downsampling ratio must be at least 1"));
        }
        if !(1..=256).contains(&self.oversample) {
            return Err(ScopeError::invalid(format!(
                "oversample {} outside 1..=256",
                self.oversample
            )));
        }
        match self.mode {
            PlanMode::Block { segment, .. } => {
                if self.samples() == 0 {
                    return Err(ScopeError::invalid("block capture of zero samples"));
                }
                if segment >= segments {
                    return Err(ScopeError::invalid(format!(
                        "segment {} outside the {} configured",
                        segment, segments
                    )));
                }
            }
            PlanMode::RapidBlock { captures, .. } => {
                if self.samples() == 0 {
                    return Err(ScopeError::invalid("rapid capture of zero samples"));
                }
                if captures == 0 || captures > segments {
                    return Err(ScopeError::invalid(format!(
                        "{} captures need as many segments, {} configured",
                        captures, segments
                    )));
                }
                if ds.mode != DownSamplingMode::None {
                    return Err(ScopeError::capability(
                        "rapid block reads do not support downsampling",
                    ));
                }
            }
            PlanMode::Streaming(cfg) => {
                if cfg.sample_interval == 0 {
                    return Err(ScopeError::invalid("streaming interval must be non-zero"));
                }
                if cfg.overview_buffer_size == 0 {
                    return Err(ScopeError::invalid("overview buffer must be non-zero"));
                }
                if cfg.auto_stop && self.samples() == 0 {
                    return Err(ScopeError::invalid("auto-stop needs a pre or post trigger count"));
                }
            }
        }
        Ok(())
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Stopped,
    Faulted(ScopeError),
}

impl RunOutcome {
    fn from_status(status: PICO_STATUS, stop_requested: bool) -> Self {
        if stop_requested || status == PICO_CANCELLED {
            RunOutcome::Stopped
        } else if status == PICO_OK {
            RunOutcome::Completed
        } else {
            RunOutcome::Faulted(status.into())
        }
    }
}

/// Completion callback for block runs. Runs on a driver-owned thread; it
/// must not block or call back into the engine.
pub type CompletionFn = Box<dyn FnOnce(RunOutcome) + Send>;

/// Samples delivered for one segment
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    pub segment: u16,
    /// Samples written per channel
    pub samples: u32,
    pub overflow: OverflowFlags,
    /// Index of the trigger point within the delivered samples
    pub trigger_sample: Option<u32>,
    /// Time the unit spent capturing, block modes only
    pub time_indisposed: Option<Duration>,
    pub trigger_offset: Option<TimeValue>,
}

impl CaptureResult {
    /// Overflow as an advisory error, if any channel clipped
    pub fn overflow_error(&self) -> Option<ScopeError> {
        self.overflow.any().then(|| ScopeError::Overflow {
            channels: self.overflow.channels(),
        })
    }
}

/// One streaming delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingBatch {
    pub count: u32,
    pub start_index: u32,
    pub overflow: OverflowFlags,
    /// Position of the trigger relative to `start_index`, if it fired in this batch
    pub trigger_at: Option<u32>,
    pub auto_stopped: bool,
}

impl StreamingBatch {
    pub fn triggered(&self) -> bool {
        self.trigger_at.is_some()
    }

    /// Copy this batch's samples out of a registered buffer
    pub fn read(&self, buffer: &SampleBuffer) -> Vec<i16> {
        buffer.slice_to_vec(self.start_index as usize, self.count as usize)
    }
}

/// Achieved streaming rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingStart {
    pub sample_interval: u32,
    pub time_units: TimeUnits,
}

#[derive(Debug)]
enum EngineEvent {
    BlockReady { run: u64, outcome: RunOutcome },
    DataReady { run: u64, data: DataReady },
}

/// Configuration an arm is validated against
pub struct ArmContext<'a> {
    pub registry: &'a ChannelRegistry,
    pub resolver: &'a mut TimebaseResolver,
    pub buffers: &'a BufferManager,
    pub trigger: &'a TriggerSpec,
}

#[derive(Debug, Default)]
struct StreamingProgress {
    start: Option<StreamingStart>,
    delivered: u64,
}

/// Acquisition state machine of one session
pub struct AcquisitionEngine {
    state: AcquisitionState,
    plan: Option<AcquisitionPlan>,
    timebase: Option<ResolvedTimebase>,
    trigger_enabled: bool,
    pins: PinnedBuffers,
    run: u64,
    stop_flag: Arc<AtomicBool>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    time_indisposed: Option<Duration>,
    started: Option<Instant>,
    fault: Option<ScopeError>,
    last_outcome: Option<RunOutcome>,
    async_pending: bool,
    streaming: StreamingProgress,
    captures: u16,
    /// Count fixed by an explicit `set_no_of_captures`
    declared_captures: Option<u16>,
}

impl Default for AcquisitionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AcquisitionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionEngine")
            .field("state", &self.state)
            .field("plan", &self.plan)
            .field("run", &self.run)
            .finish()
    }
}

impl AcquisitionEngine {
    pub fn new() -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            state: AcquisitionState::Idle,
            plan: None,
            timebase: None,
            trigger_enabled: false,
            pins: PinnedBuffers::default(),
            run: 0,
            stop_flag: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx,
            time_indisposed: None,
            started: None,
            fault: None,
            last_outcome: None,
            async_pending: false,
            streaming: StreamingProgress::default(),
            captures: 1,
            declared_captures: None,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn plan(&self) -> Option<&AcquisitionPlan> {
        self.plan.as_ref()
    }

    pub fn timebase(&self) -> Option<&ResolvedTimebase> {
        self.timebase.as_ref()
    }

    /// Captures declared for rapid-block runs
    pub fn captures(&self) -> u16 {
        self.captures
    }

    pub fn last_outcome(&self) -> Option<&RunOutcome> {
        self.last_outcome.as_ref()
    }

    /// Whether configuration changes must be refused
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            AcquisitionState::Running(_) | AcquisitionState::Stopping
        )
    }

    fn transition(&mut self, next: AcquisitionState) {
        if self.state != next {
            debug!("Acquisition {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn release(&mut self) {
        if !self.pins.is_empty() {
            trace!("Released {} pinned buffer(s)", self.pins.len());
        }
        self.pins = PinnedBuffers::default();
    }

    fn ensure_not_busy(&self, what: &str) -> Result<()> {
        if self.is_busy() {
            Err(ScopeError::busy(format!("cannot {} while {}", what, self.state)))
        } else {
            Ok(())
        }
    }

    /// Pre-declare the number of rapid-block captures. Rapid plans armed
    /// afterwards must ask for the same count.
    pub fn set_no_of_captures(&mut self, session: &DeviceSession, captures: u16) -> Result<()> {
        self.ensure_not_busy("change capture count")?;
        if captures == 0 {
            return Err(ScopeError::invalid("at least one capture is required"));
        }
        let (driver, handle) = session.live()?;
        driver
            .set_no_of_captures(handle, captures)
            .map_err(ScopeError::from)?;
        self.captures = captures;
        self.declared_captures = Some(captures);
        Ok(())
    }

    pub fn get_no_of_captures(&self, session: &DeviceSession) -> Result<u16> {
        let (driver, handle) = session.live()?;
        driver.get_no_of_captures(handle).map_err(ScopeError::from)
    }

    /// Configure equivalent-time sampling. Returns the effective sample time
    /// in picoseconds (0 when switched off).
    pub fn set_ets(&mut self, session: &DeviceSession, mode: EtsMode, cycles: i16, interleave: i16) -> Result<i32> {
        self.ensure_not_busy("configure ETS")?;
        if mode != EtsMode::Off && (cycles < 1 || interleave < 1 || interleave > cycles) {
            return Err(ScopeError::invalid(format!(
                "ETS needs 1 <= interleave ({}) <= cycles ({})",
                interleave, cycles
            )));
        }
        let (driver, handle) = session.live()?;
        let picoseconds = driver
            .set_ets(handle, mode, cycles, interleave)
            .map_err(ScopeError::from)?;
        info!("ETS {:?}: {} ps", mode, picoseconds);
        Ok(picoseconds)
    }

    /// Validate `plan` against the current configuration and pin its buffers
    pub fn arm(&mut self, session: &DeviceSession, mut ctx: ArmContext<'_>, plan: AcquisitionPlan) -> Result<()> {
        self.drain_events();
        match self.state {
            AcquisitionState::Running(_) | AcquisitionState::Stopping => {
                return Err(ScopeError::busy(format!("cannot arm while {}", self.state)));
            }
            AcquisitionState::Faulted => {
                let fault = self
                    .fault
                    .clone()
                    .unwrap_or_else(|| ScopeError::invalid("previous run faulted"));
                warn!("Arm refused, stop the faulted run first: {}", fault);
                return Err(fault);
            }
            _ => {}
        }

        if !ctx.registry.has_enabled_input() {
            return Err(ScopeError::invalid(
                "enable at least one channel or the external input before arming",
            ));
        }
        plan.validate(ctx.resolver.segments())?;
        if let (PlanMode::RapidBlock { captures, .. }, Some(declared)) = (plan.mode, self.declared_captures) {
            if captures != declared {
                return Err(ScopeError::invalid(format!(
                    "rapid plan asks for {} captures, {} were declared",
                    captures, declared
                )));
            }
        }

        let timebase = match plan.mode {
            PlanMode::Streaming(_) => None,
            _ => {
                let request = TimebaseRequest {
                    index: plan.timebase,
                    samples: plan.samples(),
                    oversample: plan.oversample,
                    segment: plan.segments().start,
                };
                Some(ctx.resolver.resolve(session, request, ctx.registry.generation())?)
            }
        };

        let requirement = BufferRequirement {
            channels: ctx.registry.enabled_channels(),
            segments: plan.segments(),
            min_len: plan.required_len(),
            mode: plan.downsampling.mode,
            bulk: plan.run_mode() == RunMode::RapidBlock,
        };
        let pins = ctx.buffers.pin(&requirement)?;

        // A plain block run after a rapid one must go back to one capture
        let captures = match plan.mode {
            PlanMode::RapidBlock { captures, .. } => Some(captures),
            PlanMode::Block { .. } if self.captures != 1 => Some(1),
            _ => None,
        };
        if let Some(captures) = captures {
            let (driver, handle) = session.live()?;
            driver
                .set_no_of_captures(handle, captures)
                .map_err(ScopeError::from)?;
            self.captures = captures;
        }

        self.release();
        self.pins = pins;
        self.plan = Some(plan);
        self.timebase = timebase;
        self.trigger_enabled = ctx.trigger.is_enabled();
        self.last_outcome = None;
        info!(
            "Armed {:?}: {} samples, {} buffer(s)",
            plan.run_mode(),
            plan.samples(),
            self.pins.len()
        );
        self.transition(AcquisitionState::Armed);
        Ok(())
    }

    fn armed_plan(&self, expect: &[RunMode]) -> Result<AcquisitionPlan> {
        self.ensure_not_busy("start a run")?;
        match (self.state, self.plan) {
            (AcquisitionState::Armed, Some(plan)) if expect.contains(&plan.run_mode()) => Ok(plan),
            (AcquisitionState::Armed, Some(plan)) => Err(ScopeError::invalid(format!(
                "armed for {:?}, not {:?}",
                plan.run_mode(),
                expect
            ))),
            (state, _) => Err(ScopeError::invalid(format!("not armed ({})", state))),
        }
    }

    fn register_pins(&self, driver: &dyn Driver, handle: PS4000_HANDLE, bulk: bool) -> Result<()> {
        for pin in self.pins.iter() {
            if bulk {
                driver
                    .set_data_buffer_bulk(handle, pin.key.channel, Some(&pin.max), pin.key.segment)
                    .map_err(ScopeError::from)?;
            } else {
                driver
                    .set_data_buffers(handle, pin.key.channel, Some(&pin.max), pin.min.as_ref(), pin.mode)
                    .map_err(ScopeError::from)?;
            }
        }
        Ok(())
    }

    /// Start an armed block or rapid-block run. Returns the time the unit
    /// expects to spend capturing.
    ///
    /// Completion is reported through `on_complete` if given, and is always
    /// observable through [`is_ready`](Self::is_ready) and
    /// [`wait_for_completion`](Self::wait_for_completion).
    pub fn run_block(&mut self, session: &DeviceSession, on_complete: Option<CompletionFn>) -> Result<Duration> {
        let plan = self.armed_plan(&[RunMode::Block, RunMode::RapidBlock])?;
        let timebase = self
            .timebase
            .ok_or_else(|| ScopeError::invalid("armed without a resolved timebase"))?;
        let (driver, handle) = session.live()?;

        let (pre, post, segment) = match plan.mode {
            PlanMode::Block {
                pre_trigger,
                post_trigger,
                segment,
            } => (pre_trigger, post_trigger, segment),
            PlanMode::RapidBlock {
                pre_trigger,
                post_trigger,
                ..
            } => (pre_trigger, post_trigger, 0),
            PlanMode::Streaming(_) => {
                return Err(ScopeError::invalid("armed plan is a streaming plan"));
            }
        };
        let bulk = plan.run_mode() == RunMode::RapidBlock;
        self.register_pins(driver, handle, bulk)?;

        self.run += 1;
        let run = self.run;
        let stop_flag = Arc::new(AtomicBool::new(false));
        self.stop_flag = Arc::clone(&stop_flag);
        let tx = self.events_tx.clone();
        let ready = Box::new(move |_handle: PS4000_HANDLE, status: PICO_STATUS| {
            let outcome = RunOutcome::from_status(status, stop_flag.load(Ordering::SeqCst));
            let _ = tx.send(EngineEvent::BlockReady {
                run,
                outcome: outcome.clone(),
            });
            if let Some(callback) = on_complete {
                callback(outcome);
            }
        });

        let ms = driver
            .run_block(
                handle,
                pre as i32,
                post as i32,
                timebase.index,
                plan.oversample,
                segment,
                ready,
            )
            .map_err(ScopeError::from)?;

        let indisposed = millis(ms);
        self.time_indisposed = Some(indisposed);
        self.started = Some(Instant::now());
        info!(
            "Run {} started ({:?}), expected {:?}",
            run,
            plan.run_mode(),
            indisposed
        );
        self.transition(AcquisitionState::Running(plan.run_mode()));
        Ok(indisposed)
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::BlockReady { run, outcome } if run == self.run => {
                if let Some(started) = self.started {
                    debug!("Run {} finished after {:?}: {:?}", run, started.elapsed(), outcome);
                }
                match &outcome {
                    RunOutcome::Completed => self.transition(AcquisitionState::Completed),
                    RunOutcome::Stopped => {
                        self.release();
                        self.transition(AcquisitionState::Idle);
                    }
                    RunOutcome::Faulted(err) => {
                        warn!("Run {} faulted: {}", run, err);
                        self.fault = Some(err.clone());
                        self.release();
                        self.transition(AcquisitionState::Faulted);
                    }
                }
                self.last_outcome = Some(outcome);
            }
            EngineEvent::DataReady { run, .. } if run != self.run => {
                trace!("Dropped data-ready for stale run {}", run);
            }
            EngineEvent::BlockReady { run, .. } => {
                trace!("Dropped block-ready for stale run {}", run);
            }
            EngineEvent::DataReady { .. } => {
                // Consumed by wait_for_values
            }
        }
    }

    fn drain_events(&mut self) {
        // Data-ready events are held back for wait_for_values
        let events: Vec<EngineEvent> = self.events_rx.try_iter().collect();
        for event in events {
            match event {
                EngineEvent::DataReady { run, data } if run == self.run && self.async_pending => {
                    self.requeue(EngineEvent::DataReady { run, data });
                }
                other => self.handle_event(other),
            }
        }
    }

    fn requeue(&self, event: EngineEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Whether the current block run has finished. Never blocks.
    ///
    /// A run that faulted reports its fault here.
    pub fn is_ready(&mut self, session: &DeviceSession) -> Result<bool> {
        session.live()?;
        self.drain_events();
        match self.state {
            AcquisitionState::Completed => Ok(true),
            AcquisitionState::Faulted => Err(self
                .fault
                .clone()
                .unwrap_or_else(|| ScopeError::invalid("run faulted"))),
            _ => Ok(false),
        }
    }

    /// Block the caller until the current block run ends or `timeout` passes
    pub fn wait_for_completion(&mut self, timeout: Duration) -> Result<RunOutcome> {
        self.drain_events();
        let deadline = Instant::now() + timeout;
        while matches!(
            self.state,
            AcquisitionState::Running(RunMode::Block) | AcquisitionState::Running(RunMode::RapidBlock)
        ) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ScopeError::Timeout(format!(
                        "run {} not complete after {:?}",
                        self.run, timeout
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ScopeError::CommunicationLost("event channel closed".into()));
                }
            }
        }
        self.last_outcome
            .clone()
            .ok_or_else(|| ScopeError::invalid(format!("no run to wait for ({})", self.state)))
    }

    fn completed_plan(&mut self, expect: RunMode) -> Result<AcquisitionPlan> {
        self.drain_events();
        match (self.state, self.plan) {
            (AcquisitionState::Completed, Some(plan)) if plan.run_mode() == expect => Ok(plan),
            (AcquisitionState::Running(_) | AcquisitionState::Stopping, _) => {
                Err(ScopeError::busy(format!("capture still {}", self.state)))
            }
            (AcquisitionState::Faulted, _) => Err(self
                .fault
                .clone()
                .unwrap_or_else(|| ScopeError::invalid("run faulted"))),
            (AcquisitionState::Completed, Some(plan)) => Err(ScopeError::invalid(format!(
                "completed run was {:?}, not {:?}",
                plan.run_mode(),
                expect
            ))),
            (state, _) => Err(ScopeError::invalid(format!("no completed capture ({})", state))),
        }
    }

    fn trigger_sample(&self, plan: &AcquisitionPlan, start: u32) -> Option<u32> {
        if !self.trigger_enabled {
            return None;
        }
        let ratio = plan.downsampling.effective_ratio().max(1);
        plan.pre_trigger().checked_sub(start).map(|n| n / ratio)
    }

    fn finish_fetch(&mut self) {
        self.release();
        self.transition(AcquisitionState::Idle);
    }

    /// Copy a completed block capture into its buffers.
    ///
    /// `start` is the first raw sample to read. The engine returns to
    /// `Idle` once the values are fetched.
    pub fn get_values(&mut self, session: &DeviceSession, start: u32) -> Result<CaptureResult> {
        let plan = self.completed_plan(RunMode::Block)?;
        let segment = plan.segments().start;
        let (driver, handle) = session.live()?;
        self.register_pins(driver, handle, false)?;

        let ds = plan.downsampling;
        let (samples, overflow) = driver
            .get_values(
                handle,
                start,
                plan.samples().saturating_sub(start),
                ds.effective_ratio(),
                ds.mode,
                segment,
            )
            .map_err(ScopeError::from)?;

        let trigger_offset = if self.trigger_enabled {
            driver.get_trigger_time_offset64(handle, segment).ok()
        } else {
            None
        };
        let result = CaptureResult {
            segment,
            samples,
            overflow: OverflowFlags(overflow),
            trigger_sample: self.trigger_sample(&plan, start),
            time_indisposed: self.time_indisposed,
            trigger_offset,
        };
        if result.overflow.any() {
            warn!("Overflow on {:?}", result.overflow.channels());
        }
        debug!("Fetched {} samples from segment {}", samples, segment);
        self.finish_fetch();
        Ok(result)
    }

    /// Fetch every segment of a completed rapid-block run, one result per
    /// segment
    pub fn get_values_bulk(&mut self, session: &DeviceSession) -> Result<Vec<CaptureResult>> {
        let plan = self.completed_plan(RunMode::RapidBlock)?;
        let segments = plan.segments();
        let last = segments.end.saturating_sub(1);
        let (driver, handle) = session.live()?;
        self.register_pins(driver, handle, true)?;

        let (samples, overflows) = driver
            .get_values_bulk(handle, plan.samples(), segments.start, last)
            .map_err(ScopeError::from)?;
        let offsets = if self.trigger_enabled {
            driver
                .get_values_trigger_time_offset_bulk64(handle, segments.start, last)
                .map_err(ScopeError::from)?
                .into_iter()
                .map(Some)
                .collect()
        } else {
            vec![None; segments.len()]
        };

        let results: Vec<CaptureResult> = segments
            .clone()
            .zip(overflows)
            .zip(offsets)
            .map(|((segment, overflow), trigger_offset)| CaptureResult {
                segment,
                samples,
                overflow: OverflowFlags(overflow),
                trigger_sample: self.trigger_sample(&plan, 0),
                time_indisposed: self.time_indisposed,
                trigger_offset,
            })
            .collect();
        info!("Fetched {} segment(s) of {} samples", results.len(), samples);
        self.finish_fetch();
        Ok(results)
    }

    /// Start an asynchronous fetch of a completed block capture. Collect it
    /// with [`wait_for_values`](Self::wait_for_values).
    pub fn get_values_async(&mut self, session: &DeviceSession, start: u32) -> Result<()> {
        let plan = self.completed_plan(RunMode::Block)?;
        if self.async_pending {
            return Err(ScopeError::busy("an asynchronous fetch is already pending"));
        }
        let segment = plan.segments().start;
        let (driver, handle) = session.live()?;
        self.register_pins(driver, handle, false)?;

        let run = self.run;
        let tx = self.events_tx.clone();
        let ds = plan.downsampling;
        driver
            .get_values_async(
                handle,
                start,
                plan.samples().saturating_sub(start),
                ds.effective_ratio(),
                ds.mode,
                segment,
                Box::new(move |_handle, data| {
                    let _ = tx.send(EngineEvent::DataReady { run, data });
                }),
            )
            .map_err(ScopeError::from)?;
        self.async_pending = true;
        Ok(())
    }

    /// Wait for the values requested by [`get_values_async`](Self::get_values_async)
    pub fn wait_for_values(&mut self, session: &DeviceSession, timeout: Duration) -> Result<CaptureResult> {
        if !self.async_pending {
            return Err(ScopeError::invalid("no asynchronous fetch pending"));
        }
        let plan = self
            .plan
            .ok_or_else(|| ScopeError::invalid("no plan for pending fetch"))?;
        let deadline = Instant::now() + timeout;
        let data = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(EngineEvent::DataReady { run, data }) if run == self.run => break data,
                Ok(other) => self.handle_event(other),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ScopeError::Timeout(format!("values not delivered after {:?}", timeout)));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ScopeError::CommunicationLost("event channel closed".into()));
                }
            }
        };
        self.async_pending = false;

        let segment = plan.segments().start;
        let trigger_offset = if self.trigger_enabled && data.triggered {
            let (driver, handle) = session.live()?;
            driver.get_trigger_time_offset64(handle, segment).ok()
        } else {
            None
        };
        let result = CaptureResult {
            segment,
            samples: data.no_of_samples.max(0) as u32,
            overflow: OverflowFlags(data.overflow),
            trigger_sample: (self.trigger_enabled && data.triggered).then_some(data.trigger_at),
            time_indisposed: self.time_indisposed,
            trigger_offset,
        };
        self.finish_fetch();
        Ok(result)
    }

    /// Trigger time relative to the trigger sample of `segment`
    pub fn trigger_time_offset(&self, session: &DeviceSession, segment: u16) -> Result<TimeValue> {
        self.ensure_not_busy("read trigger offsets")?;
        let (driver, handle) = session.live()?;
        driver
            .get_trigger_time_offset64(handle, segment)
            .map_err(ScopeError::from)
    }

    pub fn trigger_channel_time_offset(
        &self,
        session: &DeviceSession,
        segment: u16,
        channel: Channel,
    ) -> Result<TimeValue> {
        self.ensure_not_busy("read trigger offsets")?;
        let (driver, handle) = session.live()?;
        driver
            .get_trigger_channel_time_offset64(handle, segment, channel)
            .map_err(ScopeError::from)
    }

    /// Trigger offsets for segments `from..=to`
    pub fn trigger_time_offsets_bulk(&self, session: &DeviceSession, from: u16, to: u16) -> Result<Vec<TimeValue>> {
        self.ensure_not_busy("read trigger offsets")?;
        if from > to {
            return Err(ScopeError::invalid(format!("segment range {}..={} is empty", from, to)));
        }
        let (driver, handle) = session.live()?;
        driver
            .get_values_trigger_time_offset_bulk64(handle, from, to)
            .map_err(ScopeError::from)
    }

    pub fn trigger_channel_time_offsets_bulk(
        &self,
        session: &DeviceSession,
        from: u16,
        to: u16,
        channel: Channel,
    ) -> Result<Vec<TimeValue>> {
        self.ensure_not_busy("read trigger offsets")?;
        if from > to {
            return Err(ScopeError::invalid(format!("segment range {}..={} is empty", from, to)));
        }
        let (driver, handle) = session.live()?;
        driver
            .get_values_trigger_channel_time_offset_bulk64(handle, from, to, channel)
            .map_err(ScopeError::from)
    }

    /// Start an armed streaming run
    pub fn run_streaming(&mut self, session: &DeviceSession) -> Result<StreamingStart> {
        let plan = self.armed_plan(&[RunMode::Streaming])?;
        let PlanMode::Streaming(cfg) = plan.mode else {
            return Err(ScopeError::invalid("armed plan is not a streaming plan"));
        };
        let (driver, handle) = session.live()?;
        self.register_pins(driver, handle, false)?;

        let ds = plan.downsampling;
        let achieved = driver
            .run_streaming(
                handle,
                cfg.sample_interval,
                cfg.time_units,
                cfg.max_pre_trigger,
                cfg.max_post_trigger,
                cfg.auto_stop,
                ds.effective_ratio(),
                ds.mode,
                cfg.overview_buffer_size,
            )
            .map_err(ScopeError::from)?;

        self.run += 1;
        let start = StreamingStart {
            sample_interval: achieved,
            time_units: cfg.time_units,
        };
        self.streaming = StreamingProgress {
            start: Some(start),
            delivered: 0,
        };
        self.started = Some(Instant::now());
        self.time_indisposed = None;
        info!(
            "Streaming run {} at {} {:?} per sample",
            self.run, achieved, cfg.time_units
        );
        self.transition(AcquisitionState::Running(RunMode::Streaming));
        Ok(start)
    }

    pub fn streaming_start(&self) -> Option<StreamingStart> {
        self.streaming.start
    }

    /// Samples delivered by the current or last streaming run
    pub fn streaming_delivered(&self) -> u64 {
        self.streaming.delivered
    }

    /// Pump streaming delivery. Calls `on_batch` at most once and returns
    /// the number of samples delivered by this pump.
    ///
    /// Pumps on a session that is not streaming deliver nothing.
    pub fn get_latest_streaming_values(
        &mut self,
        session: &DeviceSession,
        on_batch: &mut dyn FnMut(StreamingBatch),
    ) -> Result<u32> {
        if self.state != AcquisitionState::Running(RunMode::Streaming) {
            return Ok(0);
        }
        let (driver, handle) = session.live()?;

        let mut delivered: Option<StreamingBatch> = None;
        let pumped = driver.get_streaming_latest_values(handle, &mut |ready: StreamingReady| {
            delivered = Some(StreamingBatch {
                count: ready.no_of_samples.max(0) as u32,
                start_index: ready.start_index,
                overflow: OverflowFlags(ready.overflow),
                trigger_at: ready.triggered.then_some(ready.trigger_at),
                auto_stopped: ready.auto_stop,
            });
        });

        if let Err(status) = pumped {
            let err = ScopeError::from(status);
            warn!("Streaming pump failed: {}", err);
            self.fault = Some(err.clone());
            self.last_outcome = Some(RunOutcome::Faulted(err.clone()));
            self.release();
            self.transition(AcquisitionState::Faulted);
            return Err(err);
        }

        let Some(batch) = delivered else {
            return Ok(0);
        };
        self.streaming.delivered += batch.count as u64;
        if batch.overflow.any() {
            debug!("Streaming overflow on {:?}", batch.overflow.channels());
        }
        on_batch(batch);

        if batch.auto_stopped {
            info!("Streaming auto-stopped after {} samples", self.streaming.delivered);
            if let Err(status) = driver.stop(handle) {
                debug!("Stop after auto-stop: {}", crate::ffi::status_to_string(status));
            }
            self.last_outcome = Some(RunOutcome::Completed);
            self.release();
            self.transition(AcquisitionState::Idle);
        }
        Ok(batch.count)
    }

    /// Total samples the driver has captured in the current streaming run
    pub fn no_of_streaming_values(&self, session: &DeviceSession) -> Result<u32> {
        let (driver, handle) = session.live()?;
        driver.no_of_streaming_values(handle).map_err(ScopeError::from)
    }

    /// Stop sampling and return to `Idle`.
    ///
    /// Legal in every state and a no-op when idle. A block completion
    /// already in flight is still delivered but reports
    /// [`RunOutcome::Stopped`].
    pub fn stop(&mut self, session: &DeviceSession) -> Result<()> {
        self.drain_events();
        match self.state {
            AcquisitionState::Idle => return Ok(()),
            AcquisitionState::Armed | AcquisitionState::Completed => {
                self.async_pending = false;
                self.finish_fetch();
                return Ok(());
            }
            _ => {}
        }

        let running = matches!(self.state, AcquisitionState::Running(_));
        self.stop_flag.store(true, Ordering::SeqCst);
        if running {
            self.transition(AcquisitionState::Stopping);
        }
        let (driver, handle) = session.live()?;
        let stopped = driver.stop(handle);

        // The driver has ceased sampling; fold in any completion it raced
        self.drain_events();
        if running {
            self.last_outcome = Some(RunOutcome::Stopped);
        }
        self.fault = None;
        self.async_pending = false;
        self.release();
        self.transition(AcquisitionState::Idle);
        info!("Acquisition stopped");
        stopped.map_err(ScopeError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelConfig;
    use crate::driver::sim::{SimConfig, SimulatedDriver};
    use crate::types::{Model, Range};
    use crate::ffi::PICO_FW_FAIL;

    struct Rig {
        sim: Arc<SimulatedDriver>,
        session: DeviceSession,
        registry: ChannelRegistry,
        resolver: TimebaseResolver,
        buffers: BufferManager,
        trigger: TriggerSpec,
        engine: AcquisitionEngine,
    }

    impl Rig {
        fn new() -> Self {
            Self::with_config(SimConfig::for_model(Model::Ps4224))
        }

        fn with_config(config: SimConfig) -> Self {
            let sim = Arc::new(SimulatedDriver::new(config));
            let session = DeviceSession::open(sim.clone()).unwrap();
            let mut registry = ChannelRegistry::open(&session).unwrap();
            registry
                .set_channel(&session, ChannelConfig::new(Channel::A, Range::V2))
                .unwrap();
            Rig {
                sim,
                session,
                registry,
                resolver: TimebaseResolver::new(),
                buffers: BufferManager::new(),
                trigger: TriggerSpec::Disabled,
                engine: AcquisitionEngine::new(),
            }
        }

        fn arm(&mut self, plan: AcquisitionPlan) -> Result<()> {
            let ctx = ArmContext {
                registry: &self.registry,
                resolver: &mut self.resolver,
                buffers: &self.buffers,
                trigger: &self.trigger,
            };
            self.engine.arm(&self.session, ctx, plan)
        }
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut rig = Rig::new();
        rig.engine.stop(&rig.session).unwrap();
        assert_eq!(rig.engine.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_arm_requires_buffers() {
        let mut rig = Rig::new();
        let err = rig.arm(AcquisitionPlan::block(0, 100, 3)).unwrap_err();
        assert!(matches!(err, ScopeError::InvalidConfiguration(_)));
        assert_eq!(rig.engine.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_short_buffer_rejected_at_arm() {
        let mut rig = Rig::new();
        let buffer = SampleBuffer::new(50);
        rig.buffers
            .set_buffer(&rig.session, Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        assert!(matches!(
            rig.arm(AcquisitionPlan::block(0, 100, 3)),
            Err(ScopeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_block_run_with_callback() {
        let mut rig = Rig::new();
        let buffer = SampleBuffer::new(100);
        rig.buffers
            .set_buffer(&rig.session, Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        rig.arm(AcquisitionPlan::block(0, 100, 3)).unwrap();
        assert_eq!(rig.engine.state(), AcquisitionState::Armed);

        let (tx, rx) = flume::bounded(1);
        rig.engine
            .run_block(
                &rig.session,
                Some(Box::new(move |outcome| {
                    let _ = tx.send(outcome);
                })),
            )
            .unwrap();
        assert_eq!(rig.engine.state(), AcquisitionState::Running(RunMode::Block));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(RunOutcome::Completed));
        assert_eq!(
            rig.engine.wait_for_completion(Duration::from_secs(2)).unwrap(),
            RunOutcome::Completed
        );

        let result = rig.engine.get_values(&rig.session, 0).unwrap();
        assert_eq!(result.samples, 100);
        assert!(result.trigger_sample.is_none());
        assert_eq!(rig.engine.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_reconfigure_rejected_while_running() {
        let mut rig = Rig::new();
        let buffer = SampleBuffer::new(100);
        rig.buffers
            .set_buffer(&rig.session, Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        rig.arm(AcquisitionPlan::block(0, 100, 3)).unwrap();
        rig.engine.run_block(&rig.session, None).unwrap();
        assert!(matches!(
            rig.arm(AcquisitionPlan::block(0, 100, 3)),
            Err(ScopeError::Busy(_))
        ));
        assert!(matches!(
            rig.engine.set_no_of_captures(&rig.session, 2),
            Err(ScopeError::Busy(_))
        ));
        rig.engine.stop(&rig.session).unwrap();
    }

    #[test]
    fn test_fault_requires_stop_before_rearm() {
        let mut rig = Rig::new();
        let buffer = SampleBuffer::new(100);
        rig.buffers
            .set_buffer(&rig.session, Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        rig.arm(AcquisitionPlan::block(0, 100, 3)).unwrap();
        rig.sim.inject_fault(PICO_FW_FAIL);
        rig.engine.run_block(&rig.session, None).unwrap();
        let outcome = rig.engine.wait_for_completion(Duration::from_secs(2)).unwrap();
        assert!(matches!(outcome, RunOutcome::Faulted(ScopeError::HardwareFault { .. })));
        assert_eq!(rig.engine.state(), AcquisitionState::Faulted);
        assert!(rig.engine.is_ready(&rig.session).is_err());

        assert!(matches!(
            rig.arm(AcquisitionPlan::block(0, 100, 3)),
            Err(ScopeError::HardwareFault { .. })
        ));
        rig.engine.stop(&rig.session).unwrap();
        rig.arm(AcquisitionPlan::block(0, 100, 3)).unwrap();
    }

    #[test]
    fn test_rapid_rejects_downsampling() {
        let mut rig = Rig::new();
        rig.resolver.set_memory_segments(&rig.session, 4).unwrap();
        let plan = AcquisitionPlan::rapid(0, 100, 4, 3).with_downsampling(DownSamplingMode::Average, 4);
        assert!(matches!(rig.arm(plan), Err(ScopeError::Capability(_))));
    }

    #[test]
    fn test_async_values() {
        let mut rig = Rig::new();
        let buffer = SampleBuffer::new(200);
        rig.buffers
            .set_buffer(&rig.session, Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        rig.arm(AcquisitionPlan::block(50, 150, 3)).unwrap();
        rig.engine.run_block(&rig.session, None).unwrap();
        rig.engine.wait_for_completion(Duration::from_secs(2)).unwrap();

        rig.engine.get_values_async(&rig.session, 0).unwrap();
        let result = rig
            .engine
            .wait_for_values(&rig.session, Duration::from_secs(2))
            .unwrap();
        assert_eq!(result.samples, 200);
        assert_eq!(rig.engine.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_wait_times_out() {
        let mut config = SimConfig::for_model(Model::Ps4224);
        config.capture_time = Duration::from_secs(5);
        let mut rig = Rig::with_config(config);
        let buffer = SampleBuffer::new(100);
        rig.buffers
            .set_buffer(&rig.session, Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        rig.arm(AcquisitionPlan::block(0, 100, 3)).unwrap();
        rig.engine.run_block(&rig.session, None).unwrap();
        assert!(matches!(
            rig.engine.wait_for_completion(Duration::from_millis(20)),
            Err(ScopeError::Timeout(_))
        ));
        rig.engine.stop(&rig.session).unwrap();
        assert_eq!(rig.engine.last_outcome(), Some(&RunOutcome::Stopped));
    }
}
