//! Example: Rapid-block capture with per-segment trigger timing
//!
//! Captures 16 triggered segments back to back and prints, for each one,
//! the trigger time offset and the peak level seen on channel A.
//!
//! Run with: cargo run --example rapid_trigger_offsets

use ps4000_interface::{
    adc_to_mv, create_driver, max_adc_value, mv_to_adc, AcquisitionPlan, Channel, ChannelConfig,
    DriverKind, Ps4000, Range, RunOutcome, SampleBuffer, SimConfig, TriggerSpec,
};
use std::time::Duration;

const CAPTURES: u16 = 16;
const SAMPLES: u32 = 2_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("Rapid Block Example");
    println!("===================\n");

    let mut scope = Ps4000::open(create_driver(DriverKind::Native, SimConfig::default()))?;
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V2))?;

    let max = max_adc_value(scope.model());
    let threshold = mv_to_adc(100.0, Range::V2, max).unwrap_or_default();
    scope.set_trigger(TriggerSpec::rising(Channel::A, threshold))?;

    let per_segment = scope.set_memory_segments(CAPTURES)?;
    println!("{} segments of up to {} samples", CAPTURES, per_segment);

    let buffers: Vec<SampleBuffer> = (0..CAPTURES)
        .map(|_| SampleBuffer::new(SAMPLES as usize))
        .collect();
    scope.set_buffers_bulk(Channel::A, &buffers, 0)?;

    scope.arm(AcquisitionPlan::rapid(SAMPLES / 4, SAMPLES * 3 / 4, CAPTURES, 3))?;
    scope.run_block(None)?;
    match scope.wait_for_completion(Duration::from_secs(10))? {
        RunOutcome::Completed => {}
        other => {
            println!("Run did not complete: {:?}", other);
            return Ok(());
        }
    }

    let results = scope.get_values_bulk()?;
    let offsets = scope.trigger_time_offsets_bulk(0, CAPTURES - 1)?;

    println!("\nSegment | Trigger offset (ns) | Peak (mV) | Overflow");
    println!("--------|---------------------|-----------|---------");
    for ((result, offset), buffer) in results.iter().zip(&offsets).zip(&buffers) {
        let samples = buffer.slice_to_vec(0, result.samples as usize);
        let peak = samples.iter().map(|s| s.saturating_abs()).max().unwrap_or(0);
        println!(
            "{:7} | {:19.3} | {:9.2} | {}",
            result.segment,
            offset.as_secs_f64() * 1e9,
            adc_to_mv(peak, Range::V2, max).unwrap_or_default(),
            if result.overflow.any() { "yes" } else { "no" }
        );
    }
    Ok(())
}
