//! End-to-end acquisition scenarios against the simulated unit

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use ps4000_interface::ffi::PICO_BLOCK_MODE_FAILED;
use ps4000_interface::{
    max_adc_value, mv_to_adc, AcquisitionPlan, AcquisitionState, Channel, ChannelConfig,
    DownSamplingMode, InputSignal, Model, Probe, Ps4000, Range, RunOutcome, SampleBuffer,
    ScopeError, SimConfig, SimulatedDriver, StreamingConfig, TimeUnits, TriggerSpec,
};

fn open(model: Model) -> (Arc<SimulatedDriver>, Ps4000) {
    let sim = Arc::new(SimulatedDriver::new(SimConfig::for_model(model)));
    let scope = Ps4000::open(sim.clone()).unwrap();
    (sim, scope)
}

fn rising(scope: &Ps4000, channel: Channel, mv: f64, range: Range) -> TriggerSpec {
    let threshold = mv_to_adc(mv, range, max_adc_value(scope.model())).unwrap();
    TriggerSpec::rising(channel, threshold)
}

#[test]
fn block_capture_with_rising_trigger() {
    let (_sim, mut scope) = open(Model::Ps4224);
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
    let trigger = rising(&scope, Channel::A, 0.0, Range::V2);
    scope.set_trigger(trigger).unwrap();

    let buffer = SampleBuffer::new(5_000);
    scope
        .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
        .unwrap();

    let capture = scope
        .capture_block(AcquisitionPlan::block(1_000, 4_000, 3), Duration::from_secs(5))
        .unwrap();

    assert_eq!(capture.samples, 5_000);
    assert!(!capture.overflow.any());
    assert!(capture.overflow_error().is_none());
    assert_eq!(capture.trigger_sample, Some(1_000));
    assert!(capture.trigger_offset.is_some());
    assert!(capture.time_indisposed.is_some());
    assert!(buffer.to_vec().iter().any(|&s| s != 0));
    assert_eq!(scope.state(), AcquisitionState::Idle);
}

#[test]
fn block_capture_reports_overflow() {
    let (sim, mut scope) = open(Model::Ps4224);
    sim.set_input(
        Channel::A,
        InputSignal {
            amplitude_mv: 3_000.0,
            frequency_hz: 1_000.0,
            offset_mv: 0.0,
        },
    );
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
    let buffer = SampleBuffer::new(2_000);
    scope
        .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
        .unwrap();

    // Timebase 100 spans several periods of the 1 kHz input
    let capture = scope
        .capture_block(AcquisitionPlan::block(0, 2_000, 100), Duration::from_secs(5))
        .unwrap();
    assert!(capture.overflow.is_set(Channel::A));
    assert_eq!(
        capture.overflow_error(),
        Some(ScopeError::Overflow {
            channels: vec![Channel::A]
        })
    );
}

#[test]
fn average_downsampling_needs_average_buffer() {
    let (_sim, mut scope) = open(Model::Ps4224);
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
    let buffer = SampleBuffer::new(5_000);
    scope
        .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
        .unwrap();

    let plan = AcquisitionPlan::block(0, 5_000, 3).with_downsampling(DownSamplingMode::Average, 10);
    assert!(matches!(
        scope.arm(plan),
        Err(ScopeError::InvalidConfiguration(_))
    ));
    assert_eq!(scope.state(), AcquisitionState::Idle);

    // With a matching registration the same plan arms and reads 500 values
    let averaged = SampleBuffer::new(500);
    scope
        .set_buffer(Channel::A, &averaged, DownSamplingMode::Average, 0)
        .unwrap();
    let capture = scope.capture_block(plan, Duration::from_secs(5)).unwrap();
    assert_eq!(capture.samples, 500);
}

#[test]
fn stop_during_streaming_ends_delivery() {
    let (_sim, mut scope) = open(Model::Ps4424);
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V1)).unwrap();
    let ring = SampleBuffer::new(10_000);
    scope
        .set_buffer(Channel::A, &ring, DownSamplingMode::None, 0)
        .unwrap();

    let config = StreamingConfig {
        sample_interval: 1,
        time_units: TimeUnits::Microseconds,
        max_post_trigger: 1_000_000,
        ..StreamingConfig::default()
    };
    scope.arm(AcquisitionPlan::streaming(config)).unwrap();
    scope.run_streaming().unwrap();
    assert_eq!(scope.state(), AcquisitionState::Running(ps4000_interface::RunMode::Streaming));

    let mut batches = Vec::new();
    let delivered = scope
        .get_latest_streaming_values(&mut |batch| batches.push(batch))
        .unwrap();
    assert!(delivered > 0);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].read(&ring).len(), delivered as usize);

    scope.stop().unwrap();
    assert_eq!(scope.state(), AcquisitionState::Idle);
    for _ in 0..3 {
        let n = scope
            .get_latest_streaming_values(&mut |_| panic!("no batch after stop"))
            .unwrap();
        assert_eq!(n, 0);
    }
}

#[test]
fn streaming_auto_stop_delivers_requested_samples() {
    let (_sim, mut scope) = open(Model::Ps4224);
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V1)).unwrap();
    let ring = SampleBuffer::new(3_000);
    scope
        .set_buffer(Channel::A, &ring, DownSamplingMode::None, 0)
        .unwrap();

    let config = StreamingConfig {
        max_pre_trigger: 0,
        max_post_trigger: 5_000,
        auto_stop: true,
        overview_buffer_size: 3_000,
        ..StreamingConfig::default()
    };
    scope.arm(AcquisitionPlan::streaming(config)).unwrap();
    scope.run_streaming().unwrap();

    let mut total = 0u64;
    let mut auto_stopped = false;
    let mut pumps = 0;
    while scope.state().is_running() && pumps < 1_000 {
        total += scope
            .get_latest_streaming_values(&mut |batch| auto_stopped |= batch.auto_stopped)
            .unwrap() as u64;
        pumps += 1;
    }
    assert!(auto_stopped);
    assert_eq!(total, 5_000);
    assert_eq!(scope.state(), AcquisitionState::Idle);
}

#[test]
fn rapid_block_returns_one_result_per_segment() {
    let (_sim, mut scope) = open(Model::Ps4224);
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
    let trigger = rising(&scope, Channel::A, 0.0, Range::V2);
    scope.set_trigger(trigger).unwrap();

    let captures = 4u16;
    scope.set_memory_segments(captures).unwrap();
    let buffers: Vec<SampleBuffer> = (0..captures).map(|_| SampleBuffer::new(500)).collect();
    scope.set_buffers_bulk(Channel::A, &buffers, 0).unwrap();

    scope
        .arm(AcquisitionPlan::rapid(0, 500, captures, 3))
        .unwrap();
    scope.run_block(None).unwrap();
    assert_eq!(
        scope.wait_for_completion(Duration::from_secs(5)).unwrap(),
        RunOutcome::Completed
    );

    let results = scope.get_values_bulk().unwrap();
    assert_eq!(results.len(), captures as usize);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.segment, i as u16);
        assert_eq!(result.samples, 500);
    }

    let bulk = scope.trigger_time_offsets_bulk(0, captures - 1).unwrap();
    assert_eq!(bulk.len(), captures as usize);
    for (segment, offset) in bulk.iter().enumerate() {
        let single = scope.trigger_time_offset(segment as u16).unwrap();
        assert_eq!(single.as_femtoseconds(), offset.as_femtoseconds());
        assert_eq!(results[segment].trigger_offset, Some(*offset));
    }
    assert!(bulk
        .windows(2)
        .all(|w| w[0].as_femtoseconds() != w[1].as_femtoseconds()));
}

#[test]
fn timebase_resolution_is_idempotent() {
    let (_sim, mut scope) = open(Model::Ps4224);
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
    let first = scope.resolve_timebase(3, 5_000, 1, 0).unwrap();
    let second = scope.resolve_timebase(3, 5_000, 1, 0).unwrap();
    assert_eq!(first, second);
    assert!(first.max_samples >= 5_000);
}

#[test]
fn stop_when_idle_is_a_no_op() {
    let (_sim, mut scope) = open(Model::Ps4224);
    scope.stop().unwrap();
    scope.stop().unwrap();
    assert_eq!(scope.state(), AcquisitionState::Idle);
}

#[test]
fn faulted_run_recovers_after_stop() {
    let mut config = SimConfig::for_model(Model::Ps4224);
    config.capture_time = Duration::from_millis(50);
    let sim = Arc::new(SimulatedDriver::new(config));
    let mut scope = Ps4000::open(sim.clone()).unwrap();
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
    let buffer = SampleBuffer::new(1_000);
    scope
        .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
        .unwrap();

    scope.arm(AcquisitionPlan::block(0, 1_000, 3)).unwrap();
    sim.inject_fault(PICO_BLOCK_MODE_FAILED);
    scope.run_block(None).unwrap();
    let outcome = scope.wait_for_completion(Duration::from_secs(5)).unwrap();
    assert!(matches!(outcome, RunOutcome::Faulted(ScopeError::HardwareFault { .. })));
    assert_eq!(scope.state(), AcquisitionState::Faulted);

    scope.stop().unwrap();
    let capture = scope
        .capture_block(AcquisitionPlan::block(0, 1_000, 3), Duration::from_secs(5))
        .unwrap();
    assert_eq!(capture.samples, 1_000);
}

#[test]
fn stop_delivers_stopped_to_completion_callback() {
    let mut config = SimConfig::for_model(Model::Ps4224);
    config.capture_time = Duration::from_secs(5);
    let sim = Arc::new(SimulatedDriver::new(config));
    let mut scope = Ps4000::open(sim).unwrap();
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
    let buffer = SampleBuffer::new(1_000);
    scope
        .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
        .unwrap();

    let (tx, rx) = flume::unbounded();
    scope.arm(AcquisitionPlan::block(0, 1_000, 3)).unwrap();
    scope
        .run_block(Some(Box::new(move |outcome: RunOutcome| {
            let _ = tx.send(outcome);
        })))
        .unwrap();
    scope.stop().unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(RunOutcome::Stopped));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(scope.state(), AcquisitionState::Idle);
}

#[test]
fn probe_change_keeps_enabled_ranges_legal() {
    let (_sim, mut scope) = open(Model::Ps4224);
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V20)).unwrap();
    let buffer = SampleBuffer::new(1_000);
    scope
        .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
        .unwrap();

    assert!(matches!(
        scope.set_probe(Probe::CurrentClamp10A, Range::V1),
        Err(ScopeError::Capability(_))
    ));
    assert_eq!(scope.get_probe().unwrap(), Probe::None);
    let channel = scope.channel(Channel::A).unwrap();
    assert!(scope
        .capabilities()
        .supports(Channel::A, scope.get_probe().unwrap(), channel.range));

    // The rejected change left the configuration armable
    scope.arm(AcquisitionPlan::block(0, 1_000, 3)).unwrap();
    assert_eq!(scope.state(), AcquisitionState::Armed);
}

#[test]
fn rapid_plan_must_match_declared_captures() {
    let (_sim, mut scope) = open(Model::Ps4224);
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
    scope.set_memory_segments(4).unwrap();
    let buffers: Vec<SampleBuffer> = (0..4).map(|_| SampleBuffer::new(500)).collect();
    scope.set_buffers_bulk(Channel::A, &buffers, 0).unwrap();

    scope.set_no_of_captures(4).unwrap();
    assert!(matches!(
        scope.arm(AcquisitionPlan::rapid(0, 500, 2, 3)),
        Err(ScopeError::InvalidConfiguration(_))
    ));
    assert_eq!(scope.get_no_of_captures().unwrap(), 4);
    scope.arm(AcquisitionPlan::rapid(0, 500, 4, 3)).unwrap();
}

#[test]
fn dropped_buffer_cannot_be_armed() {
    let (_sim, mut scope) = open(Model::Ps4224);
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V2)).unwrap();
    {
        let buffer = SampleBuffer::new(1_000);
        scope
            .set_buffer(Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
    }
    assert!(matches!(
        scope.arm(AcquisitionPlan::block(0, 1_000, 3)),
        Err(ScopeError::InvalidConfiguration(_))
    ));
}

fn any_model() -> impl Strategy<Value = Model> {
    prop_oneof![
        Just(Model::Ps4223),
        Just(Model::Ps4224),
        Just(Model::Ps4424),
        Just(Model::Ps4226),
        Just(Model::Ps4262),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A channel setting is accepted exactly when the unit's reported
    /// capabilities include it
    #[test]
    fn channel_settings_follow_capabilities(
        model in any_model(),
        channel in 0usize..4,
        range in 0usize..Range::VOLTAGE.len(),
    ) {
        let (_sim, mut scope) = open(model);
        let channel = Channel::ANALOG[channel];
        let range = Range::VOLTAGE[range];
        let supported = scope.capabilities().supports(channel, Probe::None, range);

        match scope.set_channel(ChannelConfig::new(channel, range)) {
            Ok(()) => {
                prop_assert!(supported);
                prop_assert_eq!(scope.channel(channel).map(|c| c.range), Some(range));
            }
            Err(ScopeError::Capability(_)) => prop_assert!(!supported),
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }
}
