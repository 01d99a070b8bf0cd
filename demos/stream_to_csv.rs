//! Example: Streaming capture logged to CSV
//!
//! Streams channel A at 10 µs per sample until 200 000 samples have been
//! collected, writing each sample with its time and millivolt value.
//!
//! Run with: cargo run --example stream_to_csv

use ps4000_interface::{
    adc_to_mv, create_driver, max_adc_value, AcquisitionPlan, Channel, ChannelConfig,
    DownSamplingMode, DriverKind, Ps4000, Range, SampleBuffer, SimConfig, StreamingConfig,
    TimeUnits,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("Streaming to CSV Example");
    println!("========================\n");

    let mut scope = Ps4000::open(create_driver(DriverKind::Native, SimConfig::default()))?;
    scope.set_channel(ChannelConfig::new(Channel::A, Range::V5))?;

    let ring = SampleBuffer::new(20_000);
    scope.set_buffer(Channel::A, &ring, DownSamplingMode::None, 0)?;

    let config = StreamingConfig {
        sample_interval: 10,
        time_units: TimeUnits::Microseconds,
        max_post_trigger: 200_000,
        auto_stop: true,
        overview_buffer_size: 20_000,
        ..StreamingConfig::default()
    };
    scope.arm(AcquisitionPlan::streaming(config))?;
    let start = scope.run_streaming()?;
    let interval_s = start.sample_interval as f64 * start.time_units.femtoseconds() as f64 * 1e-15;
    println!("Sample interval: {} {:?}", start.sample_interval, start.time_units);

    let mut log_file = BufWriter::new(File::create("stream_log.csv")?);
    writeln!(log_file, "time_s,channel_a_mv")?;

    let max = max_adc_value(scope.model());
    let mut index = 0u64;
    let mut write_error = None;
    while scope.state().is_running() {
        let delivered = scope.get_latest_streaming_values(&mut |batch| {
            for raw in batch.read(&ring) {
                let mv = adc_to_mv(raw, Range::V5, max).unwrap_or_default();
                if let Err(e) = writeln!(log_file, "{:.9},{:.3}", index as f64 * interval_s, mv) {
                    write_error.get_or_insert(e);
                }
                index += 1;
            }
        })?;
        if let Some(e) = write_error.take() {
            scope.stop()?;
            return Err(e.into());
        }
        if delivered == 0 {
            thread::sleep(Duration::from_millis(5));
        }
    }
    log_file.flush()?;

    println!("Logged {} samples", index);
    println!("Output file: stream_log.csv");
    Ok(())
}
