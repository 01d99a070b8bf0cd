//! Acquisition control and streaming for PicoScope 4000 series oscilloscopes
//!
//! This library drives a PS4000 unit through the vendor ps4000 driver (or an
//! in-process simulator): opening units, configuring inputs and triggers,
//! resolving timebases, registering sample buffers and running block,
//! rapid-block and streaming acquisitions, plus the signal generator.
//!
//! [`Ps4000`] is the entry point. It owns the open unit and every component
//! and enforces the acquisition state machine: configuration is refused with
//! [`ScopeError::Busy`] while a run is in progress, and changing a channel or
//! the segment layout drops the buffer bindings it invalidates.
//!
//! # Quick Start
//!
//! ## Block Capture
//! ```no_run
//! use std::time::Duration;
//! use ps4000_interface::{
//!     create_driver, AcquisitionPlan, Channel, ChannelConfig, DownSamplingMode, DriverKind,
//!     Ps4000, Range, SampleBuffer, SimConfig, TriggerSpec,
//! };
//!
//! let driver = create_driver(DriverKind::Native, SimConfig::default());
//! let mut scope = Ps4000::open(driver)?;
//!
//! scope.set_channel(ChannelConfig::new(Channel::A, Range::V2))?;
//! scope.set_trigger(TriggerSpec::rising(Channel::A, 8_000))?;
//!
//! let buffer = SampleBuffer::new(5_000);
//! scope.set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)?;
//!
//! // 1000 samples before the trigger, 4000 after, timebase 3
//! let capture = scope.capture_block(AcquisitionPlan::block(1_000, 4_000, 3), Duration::from_secs(5))?;
//! println!("{} samples, overflow {:?}", capture.samples, capture.overflow);
//! let samples = buffer.to_vec();
//! # Ok::<(), ps4000_interface::ScopeError>(())
//! ```
//!
//! ## Completion Callback
//! ```no_run
//! use std::time::Duration;
//! use ps4000_interface::{
//!     AcquisitionPlan, Channel, ChannelConfig, DownSamplingMode, Ps4000, Range, RunOutcome,
//!     SampleBuffer, SimConfig, SimulatedDriver,
//! };
//! use std::sync::Arc;
//!
//! let mut scope = Ps4000::open(Arc::new(SimulatedDriver::new(SimConfig::default())))?;
//! scope.set_channel(ChannelConfig::new(Channel::A, Range::V5))?;
//! let buffer = SampleBuffer::new(10_000);
//! scope.set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)?;
//!
//! scope.arm(AcquisitionPlan::block(0, 10_000, 5))?;
//! scope.run_block(Some(Box::new(|outcome: RunOutcome| {
//!     println!("capture finished: {:?}", outcome);
//! })))?;
//!
//! // The callback runs on a driver thread; the state is folded in here
//! scope.wait_for_completion(Duration::from_secs(5))?;
//! let capture = scope.get_values(0)?;
//! # Ok::<(), ps4000_interface::ScopeError>(())
//! ```
//!
//! ## Streaming
//! ```no_run
//! use std::sync::Arc;
//! use ps4000_interface::{
//!     AcquisitionPlan, Channel, ChannelConfig, DownSamplingMode, Ps4000, Range, SampleBuffer,
//!     SimConfig, SimulatedDriver, StreamingConfig, TimeUnits,
//! };
//!
//! let mut scope = Ps4000::open(Arc::new(SimulatedDriver::new(SimConfig::default())))?;
//! scope.set_channel(ChannelConfig::new(Channel::A, Range::V1))?;
//!
//! // The driver writes into this buffer as a ring
//! let ring = SampleBuffer::new(50_000);
//! scope.set_buffer(Channel::A, &ring, DownSamplingMode::None, 0)?;
//!
//! let config = StreamingConfig {
//!     sample_interval: 1,
//!     time_units: TimeUnits::Microseconds,
//!     auto_stop: true,
//!     max_post_trigger: 100_000,
//!     ..StreamingConfig::default()
//! };
//! scope.arm(AcquisitionPlan::streaming(config))?;
//! scope.run_streaming()?;
//!
//! let mut total = 0u64;
//! while scope.state().is_running() {
//!     scope.get_latest_streaming_values(&mut |batch| {
//!         let samples = batch.read(&ring);
//!         total += samples.len() as u64;
//!     })?;
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! # Ok::<(), ps4000_interface::ScopeError>(())
//! ```
//!
//! ## Signal Generator
//! ```no_run
//! use std::sync::Arc;
//! use ps4000_interface::{BuiltInSignal, Ps4000, SimConfig, SimulatedDriver, WaveType};
//!
//! let mut scope = Ps4000::open(Arc::new(SimulatedDriver::new(SimConfig::default())))?;
//! // 1 kHz sine, 2 V peak to peak
//! scope.set_sig_gen_built_in(&BuiltInSignal::fixed(WaveType::Sine, 1_000.0, 2_000_000))?;
//! # Ok::<(), ps4000_interface::ScopeError>(())
//! ```

pub mod buffers;
pub mod channels;
pub mod common;
pub mod driver;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod scope;
pub mod session;
pub mod siggen;
pub mod timebase;
pub mod trigger;
pub mod types;

// Re-export public API
pub use buffers::{BufferManager, BufferRole, SampleBuffer};
pub use channels::{CapabilityTable, ChannelConfig, ChannelRegistry, FrequencyCounter};
pub use common::{adc_to_mv, level_bar, max_adc_value, mv_to_adc, TimeKeeper};
pub use driver::sim::{InputSignal, SimConfig, SimulatedDriver};
pub use driver::{create_driver, Driver, DriverKind, TriggerDirections};
pub use engine::{
    AcquisitionEngine, AcquisitionPlan, AcquisitionState, CaptureResult, CompletionFn, Downsampling,
    RunMode, RunOutcome, StreamingBatch, StreamingConfig, StreamingStart,
};
pub use error::{Result, ScopeError};
pub use scope::Ps4000;
pub use session::{DeviceSession, OpenStatus, PendingOpen, UnitInfo};
pub use siggen::{ArbitrarySignal, BuiltInSignal, SigGenController, SigGenOutput, SigGenTrigger};
pub use timebase::{ResolvedTimebase, TimebaseRequest, TimebaseResolver};
pub use trigger::{
    AdvancedTrigger, ChannelThreshold, PulseWidthQualifier, PwqConditions, SimpleTrigger,
    TriggerConditions, TriggerConfig, TriggerSpec, TriggerStatus,
};
pub use types::*;
