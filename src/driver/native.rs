//! Driver backed by the vendor ps4000 library
//!
//! Buffer registrations hold a strong clone of every [`SampleBuffer`] handed
//! to the library, so the memory it writes into outlives the registration.
//! Completion closures travel through the library's `pParameter` argument
//! as boxed raw pointers and are reclaimed by the trampolines below.

use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::ptr;
use std::sync::Mutex;

use log::{debug, warn};

use super::*;
use crate::ffi::*;

fn check(status: PICO_STATUS) -> DriverResult<()> {
    if status == PICO_OK {
        Ok(())
    } else {
        Err(status)
    }
}

fn flag(value: bool) -> i16 {
    value as i16
}

fn time_value(value: i64, units: i32) -> DriverResult<TimeValue> {
    let units = TimeUnits::from_raw(units).ok_or(PICO_INVALID_PARAMETER)?;
    Ok(TimeValue::new(value, units))
}

fn buffer_len(buffer: &SampleBuffer) -> DriverResult<i32> {
    i32::try_from(buffer.len()).map_err(|_| PICO_INVALID_BUFFER)
}

extern "system" fn block_ready(handle: PS4000_HANDLE, status: PICO_STATUS, param: *mut c_void) {
    if param.is_null() {
        return;
    }
    // SAFETY: `param` came from Box::into_raw in run_block and the library
    // invokes the callback at most once
    let ready = unsafe { Box::from_raw(param as *mut BlockReadyFn) };
    ready(handle, status);
}

extern "system" fn data_ready(
    handle: PS4000_HANDLE,
    no_of_samples: i32,
    overflow: i16,
    trigger_at: u32,
    triggered: i16,
    param: *mut c_void,
) {
    if param.is_null() {
        return;
    }
    // SAFETY: `param` came from Box::into_raw in get_values_async
    let ready = unsafe { Box::from_raw(param as *mut DataReadyFn) };
    ready(
        handle,
        DataReady {
            no_of_samples,
            overflow,
            trigger_at,
            triggered: triggered != 0,
        },
    );
}

#[allow(clippy::too_many_arguments)]
extern "system" fn streaming_ready(
    _handle: PS4000_HANDLE,
    no_of_samples: i32,
    start_index: u32,
    overflow: i16,
    trigger_at: u32,
    triggered: i16,
    auto_stop: i16,
    param: *mut c_void,
) {
    if param.is_null() {
        return;
    }
    // SAFETY: `param` points at a `&mut dyn FnMut` on the stack of
    // get_streaming_latest_values, which is still executing
    let ready = unsafe { &mut *(param as *mut &mut dyn FnMut(StreamingReady)) };
    ready(StreamingReady {
        no_of_samples,
        start_index,
        overflow,
        trigger_at,
        triggered: triggered != 0,
        auto_stop: auto_stop != 0,
    });
}

/// Which registration slot a buffer occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Single(PS4000_HANDLE, Channel),
    Bulk(PS4000_HANDLE, Channel, u16),
}

/// The vendor library, linked with the `native` feature
#[derive(Debug, Default)]
pub struct NativeDriver {
    registered: Mutex<HashMap<Slot, Vec<SampleBuffer>>>,
}

impl NativeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn keep(&self, slot: Slot, buffers: Vec<SampleBuffer>) {
        let mut registered = self
            .registered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if buffers.is_empty() {
            registered.remove(&slot);
        } else {
            registered.insert(slot, buffers);
        }
    }

    fn forget_unit(&self, handle: PS4000_HANDLE) {
        let mut registered = self
            .registered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registered.retain(|slot, _| match slot {
            Slot::Single(h, _) | Slot::Bulk(h, _, _) => *h != handle,
        });
    }
}

impl Driver for NativeDriver {
    fn open_unit(&self, serial: Option<&str>) -> DriverResult<PS4000_HANDLE> {
        let mut handle: PS4000_HANDLE = 0;
        let status = match serial {
            Some(serial) => {
                let serial = CString::new(serial).map_err(|_| PICO_INVALID_PARAMETER)?;
                unsafe { ps4000OpenUnitEx(&mut handle, serial.as_ptr() as *mut i8) }
            }
            None => unsafe { ps4000OpenUnit(&mut handle) },
        };
        check(status)?;
        // The library reports "no unit" as handle 0 and failure as -1
        if handle <= 0 {
            return Err(PICO_NOT_FOUND);
        }
        debug!("ps4000OpenUnit -> handle {}", handle);
        Ok(handle)
    }

    fn open_unit_async(&self, serial: Option<&str>) -> DriverResult<()> {
        let mut started: i16 = 0;
        let status = match serial {
            Some(serial) => {
                let serial = CString::new(serial).map_err(|_| PICO_INVALID_PARAMETER)?;
                unsafe { ps4000OpenUnitAsyncEx(&mut started, serial.as_ptr() as *mut i8) }
            }
            None => unsafe { ps4000OpenUnitAsync(&mut started) },
        };
        check(status)?;
        if started == 0 {
            return Err(PICO_OPEN_OPERATION_IN_PROGRESS);
        }
        Ok(())
    }

    fn open_unit_progress(&self) -> DriverResult<OpenProgress> {
        let mut handle: PS4000_HANDLE = 0;
        let mut percent: i16 = 0;
        let mut complete: i16 = 0;
        check(unsafe { ps4000OpenUnitProgress(&mut handle, &mut percent, &mut complete) })?;
        let complete = complete != 0;
        if complete && handle <= 0 {
            return Err(PICO_NOT_FOUND);
        }
        Ok(OpenProgress {
            handle,
            percent,
            complete,
        })
    }

    fn close_unit(&self, handle: PS4000_HANDLE) -> DriverResult<()> {
        check(unsafe { ps4000CloseUnit(handle) })?;
        self.forget_unit(handle);
        Ok(())
    }

    fn enumerate_units(&self) -> DriverResult<Vec<String>> {
        let mut count: i16 = 0;
        let mut serials = [0i8; 512];
        let mut length = serials.len() as i16;
        check(unsafe { ps4000EnumerateUnits(&mut count, serials.as_mut_ptr(), &mut length) })?;
        if count <= 0 {
            return Ok(Vec::new());
        }
        let end = (length.max(0) as usize).min(serials.len());
        let bytes: Vec<u8> = serials[..end]
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        Ok(String::from_utf8_lossy(&bytes)
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    fn ping_unit(&self, handle: PS4000_HANDLE) -> DriverResult<()> {
        check(unsafe { ps4000PingUnit(handle) })
    }

    fn get_unit_info(&self, handle: PS4000_HANDLE, info: InfoKind) -> DriverResult<String> {
        let mut text = [0i8; 64];
        let mut required: i16 = 0;
        check(unsafe {
            ps4000GetUnitInfo(
                handle,
                text.as_mut_ptr(),
                text.len() as i16,
                &mut required,
                info as PICO_INFO,
            )
        })?;
        // The library always NUL-terminates within the given length
        let text = unsafe { CStr::from_ptr(text.as_ptr()) };
        Ok(text.to_string_lossy().into_owned())
    }

    fn flash_led(&self, handle: PS4000_HANDLE, start: i16) -> DriverResult<()> {
        check(unsafe { ps4000FlashLed(handle, start) })
    }

    fn is_led_flashing(&self, handle: PS4000_HANDLE) -> DriverResult<bool> {
        let mut flashing: i16 = 0;
        check(unsafe { ps4000IsLedFlashing(handle, &mut flashing) })?;
        Ok(flashing != 0)
    }

    fn set_channel(
        &self,
        handle: PS4000_HANDLE,
        channel: Channel,
        enabled: bool,
        dc: bool,
        range: Range,
    ) -> DriverResult<()> {
        check(unsafe { ps4000SetChannel(handle, channel as i32, flag(enabled), flag(dc), range as i32) })
    }

    fn set_bw_filter(&self, handle: PS4000_HANDLE, channel: Channel, enable: bool) -> DriverResult<()> {
        check(unsafe { ps4000SetBwFilter(handle, channel as i32, flag(enable)) })
    }

    fn set_probe(&self, handle: PS4000_HANDLE, probe: Probe, range: Range) -> DriverResult<()> {
        check(unsafe { ps4000SetProbe(handle, probe as i32, range as i32) })
    }

    fn get_probe(&self, handle: PS4000_HANDLE) -> DriverResult<Probe> {
        let mut probe: i32 = 0;
        check(unsafe { ps4000GetProbe(handle, &mut probe) })?;
        Ok(Probe::from_raw(probe).unwrap_or(Probe::Unknown))
    }

    fn get_channel_information(
        &self,
        handle: PS4000_HANDLE,
        info: ChannelInfo,
        probe: Probe,
        channel: Channel,
    ) -> DriverResult<Vec<i32>> {
        let mut values = [0i32; 32];
        let mut length = values.len() as i32;
        check(unsafe {
            ps4000GetChannelInformation(
                handle,
                info as i32,
                probe as i32,
                values.as_mut_ptr(),
                &mut length,
                channel as i32,
            )
        })?;
        let length = (length.max(0) as usize).min(values.len());
        Ok(values[..length].to_vec())
    }

    fn set_ext_trigger_range(&self, handle: PS4000_HANDLE, range: Range) -> DriverResult<()> {
        check(unsafe { ps4000SetExtTriggerRange(handle, range as i32) })
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
        check(unsafe {
            ps4000SetFrequencyCounter(
                handle,
                channel as i32,
                flag(enabled),
                range as i32,
                threshold_major,
                threshold_minor,
            )
        })
    }

    fn memory_segments(&self, handle: PS4000_HANDLE, segments: u16) -> DriverResult<i32> {
        let mut max_samples: i32 = 0;
        check(unsafe { ps4000MemorySegments(handle, segments, &mut max_samples) })?;
        Ok(max_samples)
    }

    fn set_no_of_captures(&self, handle: PS4000_HANDLE, captures: u16) -> DriverResult<()> {
        check(unsafe { ps4000SetNoOfCaptures(handle, captures) })
    }

    fn get_no_of_captures(&self, handle: PS4000_HANDLE) -> DriverResult<u16> {
        let mut captures: u16 = 0;
        check(unsafe { ps4000GetNoOfCaptures(handle, &mut captures) })?;
        Ok(captures)
    }

    fn get_timebase(
        &self,
        handle: PS4000_HANDLE,
        timebase: u32,
        samples: i32,
        oversample: i16,
        segment: u16,
    ) -> DriverResult<(i32, i32)> {
        let mut interval: i32 = 0;
        let mut max_samples: i32 = 0;
        check(unsafe {
            ps4000GetTimebase(
                handle,
                timebase,
                samples,
                &mut interval,
                oversample,
                &mut max_samples,
                segment,
            )
        })?;
        Ok((interval, max_samples))
    }

    fn get_timebase2(
        &self,
        handle: PS4000_HANDLE,
        timebase: u32,
        samples: i32,
        oversample: i16,
        segment: u16,
    ) -> DriverResult<(f32, i32)> {
        let mut interval: f32 = 0.0;
        let mut max_samples: i32 = 0;
        check(unsafe {
            ps4000GetTimebase2(
                handle,
                timebase,
                samples,
                &mut interval,
                oversample,
                &mut max_samples,
                segment,
            )
        })?;
        Ok((interval, max_samples))
    }

    fn set_ets(&self, handle: PS4000_HANDLE, mode: EtsMode, cycles: i16, interleave: i16) -> DriverResult<i32> {
        let mut sample_time_ps: i32 = 0;
        check(unsafe { ps4000SetEts(handle, mode as i32, cycles, interleave, &mut sample_time_ps) })?;
        Ok(sample_time_ps)
    }

    fn set_simple_trigger(
        &self,
        handle: PS4000_HANDLE,
        enable: bool,
        source: Channel,
        threshold: i16,
        direction: ThresholdDirection,
        delay: u32,
        auto_trigger_ms: i16,
    ) -> DriverResult<()> {
        check(unsafe {
            ps4000SetSimpleTrigger(
                handle,
                flag(enable),
                source as i32,
                threshold,
                direction as i32,
                delay,
                auto_trigger_ms,
            )
        })
    }

    fn set_trigger_channel_properties(
        &self,
        handle: PS4000_HANDLE,
        properties: &[TRIGGER_CHANNEL_PROPERTIES],
        aux_output_enable: bool,
        auto_trigger_ms: i32,
    ) -> DriverResult<()> {
        let count = i16::try_from(properties.len()).map_err(|_| PICO_INVALID_PARAMETER)?;
        let ptr = if properties.is_empty() {
            ptr::null()
        } else {
            properties.as_ptr()
        };
        check(unsafe {
            ps4000SetTriggerChannelProperties(handle, ptr, count, flag(aux_output_enable), auto_trigger_ms)
        })
    }

    fn set_trigger_channel_conditions(
        &self,
        handle: PS4000_HANDLE,
        conditions: &[TRIGGER_CONDITIONS],
    ) -> DriverResult<()> {
        let count = i16::try_from(conditions.len()).map_err(|_| PICO_INVALID_PARAMETER)?;
        let ptr = if conditions.is_empty() {
            ptr::null()
        } else {
            conditions.as_ptr()
        };
        check(unsafe { ps4000SetTriggerChannelConditions(handle, ptr, count) })
    }

    fn set_trigger_channel_directions(
        &self,
        handle: PS4000_HANDLE,
        directions: &TriggerDirections,
    ) -> DriverResult<()> {
        check(unsafe {
            ps4000SetTriggerChannelDirections(
                handle,
                directions.a as i32,
                directions.b as i32,
                directions.c as i32,
                directions.d as i32,
                directions.ext as i32,
                directions.aux as i32,
            )
        })
    }

    fn set_trigger_delay(&self, handle: PS4000_HANDLE, delay: u32) -> DriverResult<()> {
        check(unsafe { ps4000SetTriggerDelay(handle, delay) })
    }

    fn set_pulse_width_qualifier(
        &self,
        handle: PS4000_HANDLE,
        conditions: &[PWQ_CONDITIONS],
        direction: ThresholdDirection,
        lower: u32,
        upper: u32,
        kind: PulseWidthType,
    ) -> DriverResult<()> {
        let count = i16::try_from(conditions.len()).map_err(|_| PICO_INVALID_PARAMETER)?;
        let ptr = if conditions.is_empty() {
            ptr::null()
        } else {
            conditions.as_ptr()
        };
        check(unsafe {
            ps4000SetPulseWidthQualifier(handle, ptr, count, direction as i32, lower, upper, kind as i32)
        })
    }

    fn is_trigger_or_pwq_enabled(&self, handle: PS4000_HANDLE) -> DriverResult<(bool, bool)> {
        let mut trigger: i16 = 0;
        let mut pwq: i16 = 0;
        check(unsafe { ps4000IsTriggerOrPulseWidthQualifierEnabled(handle, &mut trigger, &mut pwq) })?;
        Ok((trigger != 0, pwq != 0))
    }

    fn trigger_within_pre_trigger_samples(&self, handle: PS4000_HANDLE, enable: bool) -> DriverResult<()> {
        check(unsafe { ps4000TriggerWithinPreTriggerSamples(handle, flag(enable)) })
    }

    fn hold_off(&self, handle: PS4000_HANDLE, holdoff: u64, kind: HoldOffType) -> DriverResult<()> {
        check(unsafe { ps4000HoldOff(handle, holdoff, kind as i32) })
    }

    fn get_trigger_time_offset64(&self, handle: PS4000_HANDLE, segment: u16) -> DriverResult<TimeValue> {
        let mut time: i64 = 0;
        let mut units: i32 = 0;
        check(unsafe { ps4000GetTriggerTimeOffset64(handle, &mut time, &mut units, segment) })?;
        time_value(time, units)
    }

    fn get_trigger_channel_time_offset64(
        &self,
        handle: PS4000_HANDLE,
        segment: u16,
        channel: Channel,
    ) -> DriverResult<TimeValue> {
        let mut time: i64 = 0;
        let mut units: i32 = 0;
        check(unsafe {
            ps4000GetTriggerChannelTimeOffset64(handle, &mut time, &mut units, segment, channel as i32)
        })?;
        time_value(time, units)
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
        let count = (to_segment - from_segment) as usize + 1;
        let mut times = vec![0i64; count];
        let mut units = vec![0i32; count];
        check(unsafe {
            ps4000GetValuesTriggerTimeOffsetBulk64(
                handle,
                times.as_mut_ptr(),
                units.as_mut_ptr(),
                from_segment,
                to_segment,
            )
        })?;
        times
            .into_iter()
            .zip(units)
            .map(|(time, units)| time_value(time, units))
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
        let count = (to_segment - from_segment) as usize + 1;
        let mut times = vec![0i64; count];
        let mut units = vec![0i32; count];
        check(unsafe {
            ps4000GetValuesTriggerChannelTimeOffsetBulk64(
                handle,
                times.as_mut_ptr(),
                units.as_mut_ptr(),
                from_segment,
                to_segment,
                channel as i32,
            )
        })?;
        times
            .into_iter()
            .zip(units)
            .map(|(time, units)| time_value(time, units))
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
        let length = match (max, min) {
            (Some(max), Some(min)) if max.len() != min.len() => return Err(PICO_INVALID_BUFFER),
            (Some(max), _) => buffer_len(max)?,
            (None, Some(min)) => buffer_len(min)?,
            (None, None) => 0,
        };
        let max_ptr = max.map_or(ptr::null_mut(), SampleBuffer::as_mut_ptr);
        let min_ptr = min.map_or(ptr::null_mut(), SampleBuffer::as_mut_ptr);
        check(unsafe { ps4000SetDataBuffersWithMode(handle, channel as i32, max_ptr, min_ptr, length, mode as i32) })?;

        let kept: Vec<SampleBuffer> = max.into_iter().chain(min).cloned().collect();
        self.keep(Slot::Single(handle, channel), kept);
        Ok(())
    }

    fn set_data_buffer_bulk(
        &self,
        handle: PS4000_HANDLE,
        channel: Channel,
        buffer: Option<&SampleBuffer>,
        segment: u16,
    ) -> DriverResult<()> {
        let length = buffer.map_or(Ok(0), buffer_len)?;
        let ptr = buffer.map_or(ptr::null_mut(), SampleBuffer::as_mut_ptr);
        check(unsafe { ps4000SetDataBufferBulk(handle, channel as i32, ptr, length, segment) })?;
        self.keep(Slot::Bulk(handle, channel, segment), buffer.into_iter().cloned().collect());
        Ok(())
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
        let mut time_indisposed_ms: i32 = 0;
        let param = Box::into_raw(Box::new(ready)) as *mut c_void;
        let status = unsafe {
            ps4000RunBlock(
                handle,
                pre_trigger,
                post_trigger,
                timebase,
                oversample,
                &mut time_indisposed_ms,
                segment,
                Some(block_ready),
                param,
            )
        };
        if status != PICO_OK {
            // The callback will never run, take the closure back
            drop(unsafe { Box::from_raw(param as *mut BlockReadyFn) });
            return Err(status);
        }
        Ok(time_indisposed_ms)
    }

    fn is_ready(&self, handle: PS4000_HANDLE) -> DriverResult<bool> {
        let mut ready: i16 = 0;
        check(unsafe { ps4000IsReady(handle, &mut ready) })?;
        Ok(ready != 0)
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
        let mut interval = sample_interval;
        check(unsafe {
            ps4000RunStreamingEx(
                handle,
                &mut interval,
                units as i32,
                max_pre_trigger,
                max_post_trigger,
                flag(auto_stop),
                down_sample_ratio,
                mode as i16,
                overview_buffer_size,
            )
        })?;
        Ok(interval)
    }

    fn get_streaming_latest_values(
        &self,
        handle: PS4000_HANDLE,
        ready: &mut dyn FnMut(StreamingReady),
    ) -> DriverResult<()> {
        let mut ready: &mut dyn FnMut(StreamingReady) = ready;
        let param = &mut ready as *mut &mut dyn FnMut(StreamingReady) as *mut c_void;
        check(unsafe { ps4000GetStreamingLatestValues(handle, Some(streaming_ready), param) })
    }

    fn no_of_streaming_values(&self, handle: PS4000_HANDLE) -> DriverResult<u32> {
        let mut values: u32 = 0;
        check(unsafe { ps4000NoOfStreamingValues(handle, &mut values) })?;
        Ok(values)
    }

    fn get_max_down_sample_ratio(
        &self,
        handle: PS4000_HANDLE,
        samples: u32,
        mode: DownSamplingMode,
        segment: u16,
    ) -> DriverResult<u32> {
        let mut ratio: u32 = 0;
        check(unsafe { ps4000GetMaxDownSampleRatio(handle, samples, &mut ratio, mode as i16, segment) })?;
        Ok(ratio)
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
        let mut count = samples;
        let mut overflow: i16 = 0;
        check(unsafe {
            ps4000GetValues(
                handle,
                start_index,
                &mut count,
                down_sample_ratio,
                mode as i16,
                segment,
                &mut overflow,
            )
        })?;
        Ok((count, overflow))
    }

    fn get_values_bulk(
        &self,
        handle: PS4000_HANDLE,
        samples: u32,
        from_segment: u16,
        to_segment: u16,
    ) -> DriverResult<(u32, Vec<i16>)> {
        if from_segment > to_segment {
            return Err(PICO_SEGMENT_OUT_OF_RANGE);
        }
        let mut count = samples;
        let mut overflow = vec![0i16; (to_segment - from_segment) as usize + 1];
        check(unsafe {
            ps4000GetValuesBulk(handle, &mut count, from_segment, to_segment, overflow.as_mut_ptr())
        })?;
        Ok((count, overflow))
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
        let param = Box::into_raw(Box::new(ready)) as *mut c_void;
        let status = unsafe {
            ps4000GetValuesAsync(
                handle,
                start_index,
                samples,
                down_sample_ratio,
                mode as i16,
                segment,
                Some(data_ready),
                param,
            )
        };
        if status != PICO_OK {
            drop(unsafe { Box::from_raw(param as *mut DataReadyFn) });
            return Err(status);
        }
        Ok(())
    }

    fn stop(&self, handle: PS4000_HANDLE) -> DriverResult<()> {
        check(unsafe { ps4000Stop(handle) })
    }

    fn sig_gen_off(&self, handle: PS4000_HANDLE) -> DriverResult<()> {
        check(unsafe { ps4000SigGenOff(handle) })
    }

    fn set_sig_gen_built_in(&self, handle: PS4000_HANDLE, signal: &BuiltInSignal) -> DriverResult<()> {
        check(unsafe {
            ps4000SetSigGenBuiltIn(
                handle,
                signal.offset_uv,
                signal.pk_to_pk_uv,
                signal.wave as i16,
                signal.start_frequency,
                signal.stop_frequency,
                signal.increment,
                signal.dwell_time,
                signal.sweep_type as i32,
                0,
                signal.shots,
                signal.sweeps,
                signal.trigger.trigger_type as i32,
                signal.trigger.source as i32,
                signal.trigger.ext_in_threshold,
            )
        })
    }

    fn set_sig_gen_arbitrary(
        &self,
        handle: PS4000_HANDLE,
        signal: &ArbitrarySignal,
        phases: PhaseSweep,
    ) -> DriverResult<()> {
        let size = i32::try_from(signal.waveform.len()).map_err(|_| PICO_SIG_GEN_PARAM)?;
        check(unsafe {
            ps4000SetSigGenArbitrary(
                handle,
                signal.offset_uv,
                signal.pk_to_pk_uv,
                phases.start_delta_phase,
                phases.stop_delta_phase,
                phases.delta_phase_increment,
                phases.dwell_count,
                signal.waveform.as_ptr(),
                size,
                signal.sweep_type as i32,
                0,
                signal.index_mode as i32,
                signal.shots,
                signal.sweeps,
                signal.trigger.trigger_type as i32,
                signal.trigger.source as i32,
                signal.trigger.ext_in_threshold,
            )
        })
    }

    fn sig_gen_frequency_to_phase(
        &self,
        handle: PS4000_HANDLE,
        frequency: f64,
        index_mode: IndexMode,
        buffer_length: u32,
    ) -> DriverResult<u32> {
        let mut phase: u32 = 0;
        check(unsafe {
            ps4000SigGenFrequencyToPhase(handle, frequency, index_mode as i32, buffer_length, &mut phase)
        })?;
        Ok(phase)
    }

    fn sig_gen_arbitrary_min_max_values(&self, handle: PS4000_HANDLE) -> DriverResult<ArbitraryLimits> {
        let mut limits = ArbitraryLimits {
            min_value: 0,
            max_value: 0,
            min_size: 0,
            max_size: 0,
        };
        check(unsafe {
            ps4000SigGenArbitraryMinMaxValues(
                handle,
                &mut limits.min_value,
                &mut limits.max_value,
                &mut limits.min_size,
                &mut limits.max_size,
            )
        })?;
        Ok(limits)
    }

    fn sig_gen_software_control(&self, handle: PS4000_HANDLE, state: bool) -> DriverResult<()> {
        check(unsafe { ps4000SigGenSoftwareControl(handle, flag(state)) })
    }
}

impl Drop for NativeDriver {
    fn drop(&mut self) {
        let registered = self
            .registered
            .get_mut()
            .map(|r| r.len())
            .unwrap_or_default();
        if registered > 0 {
            warn!("Native driver dropped with {} buffer registration(s) outstanding", registered);
        }
    }
}
