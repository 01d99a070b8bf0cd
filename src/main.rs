//! PS4000 reader - block, rapid-block and streaming captures from the console
//!
//! Usage:
//!   ps4000-reader info
//!   ps4000-reader block --range 2V --trigger-mv 250 --pre 1000 --post 4000
//!   ps4000-reader rapid --captures 16 --samples 1000
//!   ps4000-reader --sim 4224 stream --interval-us 1 --duration 10
//!
//! Without `--sim` the native driver is used when built with the `native`
//! feature, otherwise the simulator stands in.

use clap::{Parser, Subcommand};
use ps4000_interface::{
    adc_to_mv, create_driver, level_bar, max_adc_value, mv_to_adc, AcquisitionPlan, CaptureResult,
    Channel, ChannelConfig, DeviceSession, DownSamplingMode, DriverKind, Model, Ps4000, Range,
    RunOutcome, SampleBuffer, ScopeError, SimConfig, SimpleTrigger, StreamingConfig,
    ThresholdDirection, TimeKeeper, TimeUnits, TriggerSpec,
};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "ps4000-reader")]
#[command(about = "Capture data from a PicoScope 4000 series oscilloscope", long_about = None)]
struct Args {
    /// Use the simulated driver for this variant (e.g. 4224, 4424, 4262)
    #[arg(long)]
    sim: Option<String>,

    /// Open the unit with this batch/serial
    #[arg(short, long)]
    serial: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List units and print information about the opened one
    Info,

    /// Capture one block
    Block {
        #[command(flatten)]
        input: InputArgs,

        /// Samples before the trigger
        #[arg(long, default_value = "1000")]
        pre: u32,

        /// Samples after the trigger
        #[arg(long, default_value = "4000")]
        post: u32,

        /// Timebase index
        #[arg(short, long, default_value = "3")]
        timebase: u32,
    },

    /// Capture several triggered blocks into memory segments
    Rapid {
        #[command(flatten)]
        input: InputArgs,

        /// Number of captures
        #[arg(short, long, default_value = "10")]
        captures: u16,

        /// Samples per capture
        #[arg(long, default_value = "1000")]
        samples: u32,

        /// Timebase index
        #[arg(short, long, default_value = "3")]
        timebase: u32,
    },

    /// Stream continuously until Ctrl+C or the duration elapses
    Stream {
        #[command(flatten)]
        input: InputArgs,

        /// Sample interval in microseconds
        #[arg(short, long, default_value = "1")]
        interval_us: u32,

        /// Duration in seconds (runs until Ctrl+C if omitted)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Ring buffer size in samples
        #[arg(long, default_value = "100000")]
        buffer: usize,
    },
}

#[derive(clap::Args, Debug)]
struct InputArgs {
    /// Input channel (A-D)
    #[arg(long, default_value = "A", value_parser = parse_channel)]
    channel: Channel,

    /// Input range (10mV .. 100V)
    #[arg(short, long, default_value = "5V", value_parser = parse_range)]
    range: Range,

    /// AC coupling instead of DC
    #[arg(long)]
    ac: bool,

    /// Rising-edge trigger level in millivolts (free-running if omitted)
    #[arg(long, allow_hyphen_values = true)]
    trigger_mv: Option<f64>,

    /// Auto-trigger timeout in milliseconds
    #[arg(long, default_value = "1000")]
    auto_trigger_ms: i16,
}

fn parse_channel(s: &str) -> Result<Channel, String> {
    match s.to_ascii_uppercase().as_str() {
        "A" => Ok(Channel::A),
        "B" => Ok(Channel::B),
        "C" => Ok(Channel::C),
        "D" => Ok(Channel::D),
        other => Err(format!("unknown channel '{}'", other)),
    }
}

fn parse_range(s: &str) -> Result<Range, String> {
    let lower = s.to_ascii_lowercase();
    let mv = if let Some(v) = lower.strip_suffix("mv") {
        v.trim().parse::<u32>().ok()
    } else if let Some(v) = lower.strip_suffix('v') {
        v.trim().parse::<u32>().ok().map(|v| v * 1000)
    } else {
        None
    };
    mv.and_then(|mv| Range::VOLTAGE.iter().copied().find(|r| r.millivolts() == Some(mv)))
        .ok_or_else(|| format!("unknown range '{}'", s))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let driver = match &args.sim {
        Some(variant) => {
            let model = Model::from_variant(variant)
                .ok_or_else(|| format!("unknown PS4000 variant '{}'", variant))?;
            create_driver(DriverKind::Simulated, SimConfig::for_model(model))
        }
        None => create_driver(DriverKind::Native, SimConfig::default()),
    };

    if let Command::Info = args.command {
        match DeviceSession::enumerate(driver.as_ref()) {
            Ok(serials) if serials.is_empty() => println!("No unopened units found"),
            Ok(serials) => println!("Units: {}", serials.join(", ")),
            Err(e) => eprintln!("Enumeration failed: {}", e),
        }
    }

    println!("Opening unit...");
    let mut scope = match &args.serial {
        Some(serial) => Ps4000::open_serial(driver, serial),
        None => Ps4000::open(driver),
    }
    .map_err(|e| {
        if let ScopeError::NotFound(_) = e {
            eprintln!("Error: no PicoScope 4000 unit found.");
            eprintln!("Please check:");
            eprintln!("  1. The unit is connected via USB");
            eprintln!("  2. PicoSDK is installed");
            eprintln!("  3. No other application has the unit open");
        }
        e
    })?;

    let info = scope.unit_info()?;
    println!("Opened PS{} ({})\n", info.variant, info.serial);

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    match args.command {
        Command::Info => print_info(&scope),
        Command::Block {
            input,
            pre,
            post,
            timebase,
        } => run_block(&mut scope, &input, pre, post, timebase, &running),
        Command::Rapid {
            input,
            captures,
            samples,
            timebase,
        } => run_rapid(&mut scope, &input, captures, samples, timebase, &running),
        Command::Stream {
            input,
            interval_us,
            duration,
            buffer,
        } => run_stream(&mut scope, &input, interval_us, duration, buffer, &running),
    }?;

    scope.close()?;
    Ok(())
}

fn print_info(scope: &Ps4000) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}\n", scope.unit_info()?);

    let caps = scope.capabilities();
    for &channel in caps.channels() {
        let ranges: Vec<String> = caps
            .ranges(channel, ps4000_interface::Probe::None)
            .iter()
            .map(|r| format!("{:?}", r))
            .collect();
        println!("Channel {}: {}", channel, ranges.join(" "));
    }
    Ok(())
}

/// Enable the requested input and its trigger
fn configure_input(scope: &mut Ps4000, input: &InputArgs) -> Result<(), ScopeError> {
    let coupling = if input.ac {
        ps4000_interface::Coupling::Ac
    } else {
        ps4000_interface::Coupling::Dc
    };
    scope.set_channel(ChannelConfig::new(input.channel, input.range).with_coupling(coupling))?;

    let trigger = match input.trigger_mv {
        Some(mv) => {
            let max = max_adc_value(scope.model());
            let threshold = mv_to_adc(mv, input.range, max)
                .ok_or_else(|| ScopeError::InvalidConfiguration("trigger level needs a voltage range".into()))?;
            println!("Trigger: {} rising through {} mV ({} counts)", input.channel, mv, threshold);
            TriggerSpec::Simple(SimpleTrigger {
                channel: input.channel,
                threshold,
                direction: ThresholdDirection::Rising,
                delay: 0,
                auto_trigger_ms: input.auto_trigger_ms,
            })
        }
        None => TriggerSpec::Disabled,
    };
    scope.set_trigger(trigger)
}

/// Poll until the armed run completes or Ctrl+C stops it
fn wait_for_run(scope: &mut Ps4000, running: &AtomicBool) -> Result<bool, ScopeError> {
    while running.load(Ordering::SeqCst) {
        if scope.is_ready()? {
            return match scope.wait_for_completion(Duration::from_millis(100))? {
                RunOutcome::Completed => Ok(true),
                RunOutcome::Stopped => Ok(false),
                RunOutcome::Faulted(e) => Err(e),
            };
        }
        thread::sleep(Duration::from_millis(5));
    }
    scope.stop()?;
    Ok(false)
}

fn print_summary(samples: &[i16], range: Range, max: i16) {
    if samples.is_empty() {
        return;
    }
    let (lo, hi) = samples
        .iter()
        .fold((i16::MAX, i16::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    let lo_mv = adc_to_mv(lo, range, max).unwrap_or_default();
    let hi_mv = adc_to_mv(hi, range, max).unwrap_or_default();
    println!("  min {:9.2} mV [{}]", lo_mv, level_bar(lo, max, 40));
    println!("  max {:9.2} mV [{}]", hi_mv, level_bar(hi, max, 40));
}

fn print_capture(capture: &CaptureResult) {
    print!("  segment {:4}: {} samples", capture.segment, capture.samples);
    if let Some(offset) = capture.trigger_offset {
        print!(", trigger offset {:.3} ns", offset.as_secs_f64() * 1e9);
    }
    if let Some(err) = capture.overflow_error() {
        print!(" ({})", err);
    }
    println!();
}

fn run_block(
    scope: &mut Ps4000,
    input: &InputArgs,
    pre: u32,
    post: u32,
    timebase: u32,
    running: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    configure_input(scope, input)?;
    let total = pre + post;
    let resolved = scope.resolve_timebase(timebase, total, 1, 0)?;
    println!(
        "Timebase {}: {} ns per sample ({:.3} MS/s), {} samples max",
        resolved.index,
        resolved.interval_ns,
        resolved.sample_rate_hz() / 1e6,
        resolved.max_samples
    );

    let buffer = SampleBuffer::new(total as usize);
    scope.set_buffer(input.channel, &buffer, DownSamplingMode::None, 0)?;
    scope.arm(AcquisitionPlan::block(pre, post, timebase))?;

    let started = chrono::Local::now();
    let expected = scope.run_block(None)?;
    println!("Capturing (unit busy for ~{} ms)...", expected.as_millis());

    if !wait_for_run(scope, running)? {
        println!("Capture stopped");
        return Ok(());
    }
    let capture = scope.get_values(0)?;
    println!("\nCapture at {}", started.to_rfc3339());
    print_capture(&capture);
    let samples = buffer.slice_to_vec(0, capture.samples as usize);
    print_summary(&samples, input.range, max_adc_value(scope.model()));
    Ok(())
}

fn run_rapid(
    scope: &mut Ps4000,
    input: &InputArgs,
    captures: u16,
    samples: u32,
    timebase: u32,
    running: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    configure_input(scope, input)?;
    let per_segment = scope.set_memory_segments(captures)?;
    println!("{} segments of {} samples", captures, per_segment);

    let buffers: Vec<SampleBuffer> = (0..captures).map(|_| SampleBuffer::new(samples as usize)).collect();
    scope.set_buffers_bulk(input.channel, &buffers, 0)?;
    scope.arm(AcquisitionPlan::rapid(0, samples, captures, timebase))?;

    let started = chrono::Local::now();
    scope.run_block(None)?;
    println!("Capturing {} blocks...", captures);
    if !wait_for_run(scope, running)? {
        println!("Capture stopped");
        return Ok(());
    }

    let results = scope.get_values_bulk()?;
    println!("\nCaptures at {}", started.to_rfc3339());
    let max = max_adc_value(scope.model());
    for (capture, buffer) in results.iter().zip(&buffers) {
        print_capture(capture);
        print_summary(&buffer.slice_to_vec(0, capture.samples as usize), input.range, max);
    }
    Ok(())
}

fn run_stream(
    scope: &mut Ps4000,
    input: &InputArgs,
    interval_us: u32,
    duration: Option<u64>,
    buffer_len: usize,
    running: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    configure_input(scope, input)?;
    let ring = SampleBuffer::new(buffer_len);
    scope.set_buffer(input.channel, &ring, DownSamplingMode::None, 0)?;

    let config = StreamingConfig {
        sample_interval: interval_us,
        time_units: TimeUnits::Microseconds,
        max_pre_trigger: 0,
        max_post_trigger: buffer_len as u32,
        auto_stop: false,
        overview_buffer_size: buffer_len as u32,
    };
    scope.arm(AcquisitionPlan::streaming(config))?;
    let start = scope.run_streaming()?;
    println!(
        "Streaming at {} {:?} per sample, started {}",
        start.sample_interval,
        start.time_units,
        chrono::Local::now().to_rfc3339()
    );
    println!("Press Ctrl+C to stop\n");

    let timer = TimeKeeper::new();
    let end_time = duration.map(|d| Instant::now() + Duration::from_secs(d));
    let max = max_adc_value(scope.model());
    let mut total = 0u64;
    let mut overflowed = false;

    // Clear screen once at start
    print!("\x1B[2J\x1B[H");
    io::stdout().flush()?;

    while running.load(Ordering::SeqCst) && scope.state().is_running() {
        if end_time.is_some_and(|end| Instant::now() >= end) {
            break;
        }

        let mut latest: Option<i16> = None;
        let delivered = scope.get_latest_streaming_values(&mut |batch| {
            overflowed |= batch.overflow.any();
            if let Some(&last) = batch.read(&ring).last() {
                latest = Some(last);
            }
        })?;
        total += delivered as u64;

        if let Some(raw) = latest {
            let mv = adc_to_mv(raw, input.range, max).unwrap_or_default();
            // Move cursor to top without clearing (reduces flicker)
            print!("\x1B[H");
            println!("PS4000 Streaming - Channel {}                              ", input.channel);
            println!(
                "Time: {:.2}s | Samples: {} | Rate: {:.0} S/s          ",
                timer.elapsed_secs(),
                total,
                timer.rate(total)
            );
            println!("  {:9.2} mV [{}]", mv, level_bar(raw, max, 40));
            if overflowed {
                println!("  OVERRANGE");
            }
            io::stdout().flush()?;
        } else {
            thread::sleep(Duration::from_millis(1));
        }
    }

    scope.stop()?;
    println!("\nStreaming complete!");
    println!("Total samples: {}", total);
    println!("Elapsed time: {:.2} seconds", timer.elapsed_secs());
    println!("Average rate: {:.0} S/s", timer.rate(total));
    Ok(())
}
