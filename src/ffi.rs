//! FFI bindings for the PicoScope 4000 series driver
//!
//! Low-level declarations matching ps4000Api.h and PicoStatus.h. The status
//! codes and packed structures are always compiled because the simulated
//! driver speaks the same status vocabulary; the `extern` block is only
//! linked with the `native` feature.

#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::ffi::c_void;

// C types (matching ps4000Api.h)
pub type PICO_STATUS = u32;
pub type PS4000_HANDLE = i16;
pub type PS4000_CHANNEL = i32;
pub type PS4000_RANGE = i32;
pub type PS4000_TIME_UNITS = i32;
pub type PS4000_THRESHOLD_MODE = i32;
pub type PS4000_THRESHOLD_DIRECTION = i32;
pub type PS4000_TRIGGER_STATE = i32;
pub type PS4000_RATIO_MODE = i32;
pub type PS4000_PULSE_WIDTH_TYPE = i32;
pub type PICO_INFO = u32;

/// Largest sample value reported for a full-scale positive input
pub const PS4000_MAX_VALUE: i16 = 32764;
/// Largest sample value on the 16-bit PS4262
pub const PS4262_MAX_VALUE: i16 = 32767;

// PICO_STATUS return codes (from PicoStatus.h)
pub const PICO_OK: PICO_STATUS = 0x00;
pub const PICO_MAX_UNITS_OPENED: PICO_STATUS = 0x01;
pub const PICO_MEMORY_FAIL: PICO_STATUS = 0x02;
pub const PICO_NOT_FOUND: PICO_STATUS = 0x03;
pub const PICO_FW_FAIL: PICO_STATUS = 0x04;
pub const PICO_OPEN_OPERATION_IN_PROGRESS: PICO_STATUS = 0x05;
pub const PICO_OPERATION_FAILED: PICO_STATUS = 0x06;
pub const PICO_NOT_RESPONDING: PICO_STATUS = 0x07;
pub const PICO_CONFIG_FAIL: PICO_STATUS = 0x08;
pub const PICO_KERNEL_DRIVER_TOO_OLD: PICO_STATUS = 0x09;
pub const PICO_EEPROM_CORRUPT: PICO_STATUS = 0x0A;
pub const PICO_OS_NOT_SUPPORTED: PICO_STATUS = 0x0B;
pub const PICO_INVALID_HANDLE: PICO_STATUS = 0x0C;
pub const PICO_INVALID_PARAMETER: PICO_STATUS = 0x0D;
pub const PICO_INVALID_TIMEBASE: PICO_STATUS = 0x0E;
pub const PICO_INVALID_VOLTAGE_RANGE: PICO_STATUS = 0x0F;
pub const PICO_INVALID_CHANNEL: PICO_STATUS = 0x10;
pub const PICO_INVALID_TRIGGER_CHANNEL: PICO_STATUS = 0x11;
pub const PICO_INVALID_CONDITION_CHANNEL: PICO_STATUS = 0x12;
pub const PICO_NO_SIGNAL_GENERATOR: PICO_STATUS = 0x13;
pub const PICO_STREAMING_FAILED: PICO_STATUS = 0x14;
pub const PICO_BLOCK_MODE_FAILED: PICO_STATUS = 0x15;
pub const PICO_NULL_PARAMETER: PICO_STATUS = 0x16;
pub const PICO_ETS_MODE_SET: PICO_STATUS = 0x17;
pub const PICO_DATA_NOT_AVAILABLE: PICO_STATUS = 0x18;
pub const PICO_STRING_BUFFER_TOO_SMALL: PICO_STATUS = 0x19;
pub const PICO_ETS_NOT_SUPPORTED: PICO_STATUS = 0x1A;
pub const PICO_AUTO_TRIGGER_TIME_TOO_SHORT: PICO_STATUS = 0x1B;
pub const PICO_BUFFER_STALL: PICO_STATUS = 0x1C;
pub const PICO_TOO_MANY_SAMPLES: PICO_STATUS = 0x1D;
pub const PICO_TOO_MANY_SEGMENTS: PICO_STATUS = 0x1E;
pub const PICO_PULSE_WIDTH_QUALIFIER: PICO_STATUS = 0x1F;
pub const PICO_DELAY: PICO_STATUS = 0x20;
pub const PICO_SOURCE_DETAILS: PICO_STATUS = 0x21;
pub const PICO_CONDITIONS: PICO_STATUS = 0x22;
pub const PICO_USER_CALLBACK: PICO_STATUS = 0x23;
pub const PICO_DEVICE_SAMPLING: PICO_STATUS = 0x24;
pub const PICO_NO_SAMPLES_AVAILABLE: PICO_STATUS = 0x25;
pub const PICO_SEGMENT_OUT_OF_RANGE: PICO_STATUS = 0x26;
pub const PICO_BUSY: PICO_STATUS = 0x27;
pub const PICO_STARTINDEX_INVALID: PICO_STATUS = 0x28;
pub const PICO_INVALID_INFO: PICO_STATUS = 0x29;
pub const PICO_INFO_UNAVAILABLE: PICO_STATUS = 0x2A;
pub const PICO_INVALID_SAMPLE_INTERVAL: PICO_STATUS = 0x2B;
pub const PICO_TRIGGER_ERROR: PICO_STATUS = 0x2C;
pub const PICO_MEMORY: PICO_STATUS = 0x2D;
pub const PICO_SIG_GEN_PARAM: PICO_STATUS = 0x2E;
pub const PICO_SHOTS_SWEEPS_WARNING: PICO_STATUS = 0x2F;
pub const PICO_SIGGEN_TRIGGER_SOURCE: PICO_STATUS = 0x30;
pub const PICO_AUX_OUTPUT_CONFLICT: PICO_STATUS = 0x31;
pub const PICO_AUX_OUTPUT_ETS_CONFLICT: PICO_STATUS = 0x32;
pub const PICO_WARNING_EXT_THRESHOLD_CONFLICT: PICO_STATUS = 0x33;
pub const PICO_WARNING_AUX_OUTPUT_CONFLICT: PICO_STATUS = 0x34;
pub const PICO_SIGGEN_OUTPUT_OVER_VOLTAGE: PICO_STATUS = 0x35;
pub const PICO_DELAY_NULL: PICO_STATUS = 0x36;
pub const PICO_INVALID_BUFFER: PICO_STATUS = 0x37;
pub const PICO_SIGGEN_OFFSET_VOLTAGE: PICO_STATUS = 0x38;
pub const PICO_SIGGEN_PK_TO_PK: PICO_STATUS = 0x39;
pub const PICO_CANCELLED: PICO_STATUS = 0x3A;
pub const PICO_SEGMENT_NOT_USED: PICO_STATUS = 0x3B;
pub const PICO_INVALID_CALL: PICO_STATUS = 0x3C;
pub const PICO_GET_VALUES_INTERRUPTED: PICO_STATUS = 0x3D;
pub const PICO_NOT_USED: PICO_STATUS = 0x3F;
pub const PICO_INVALID_SAMPLERATIO: PICO_STATUS = 0x40;
pub const PICO_INVALID_STATE: PICO_STATUS = 0x41;
pub const PICO_NOT_ENOUGH_SEGMENTS: PICO_STATUS = 0x42;
pub const PICO_DRIVER_FUNCTION: PICO_STATUS = 0x43;
pub const PICO_INVALID_COUPLING: PICO_STATUS = 0x45;
pub const PICO_BUFFERS_NOT_SET: PICO_STATUS = 0x46;
pub const PICO_RATIO_MODE_NOT_SUPPORTED: PICO_STATUS = 0x47;
pub const PICO_RAPID_NOT_SUPPORT_AGGREGATION: PICO_STATUS = 0x48;
pub const PICO_INVALID_TRIGGER_PROPERTY: PICO_STATUS = 0x49;
pub const PICO_INTERFACE_NOT_CONNECTED: PICO_STATUS = 0x4A;
pub const PICO_RESISTANCE_AND_PROBE_NOT_ALLOWED: PICO_STATUS = 0x4B;
pub const PICO_POWER_FAILED: PICO_STATUS = 0x4C;
pub const PICO_SIGGEN_WAVEFORM_SETUP_FAILED: PICO_STATUS = 0x4D;
pub const PICO_FPGA_FAIL: PICO_STATUS = 0x4E;
pub const PICO_POWER_MANAGER: PICO_STATUS = 0x4F;
pub const PICO_INVALID_ANALOGUE_OFFSET: PICO_STATUS = 0x50;
pub const PICO_PLL_LOCK_FAILED: PICO_STATUS = 0x51;
pub const PICO_ANALOG_BOARD: PICO_STATUS = 0x52;
pub const PICO_CONFIG_FAIL_AWG: PICO_STATUS = 0x53;
pub const PICO_INITIALISE_FPGA: PICO_STATUS = 0x54;
pub const PICO_NO_CAPTURES_AVAILABLE: PICO_STATUS = 0x5D;
pub const PICO_GET_DATA_ACTIVE: PICO_STATUS = 0x103;
pub const PICO_BANDWIDTH_NOT_SUPPORTED: PICO_STATUS = 0x10D;
pub const PICO_AWG_NOT_SUPPORTED: PICO_STATUS = 0x10F;

// PICO_INFO selectors (from PicoStatus.h)
pub const PICO_DRIVER_VERSION: PICO_INFO = 0;
pub const PICO_USB_VERSION: PICO_INFO = 1;
pub const PICO_HARDWARE_VERSION: PICO_INFO = 2;
pub const PICO_VARIANT_INFO: PICO_INFO = 3;
pub const PICO_BATCH_AND_SERIAL: PICO_INFO = 4;
pub const PICO_CAL_DATE: PICO_INFO = 5;
pub const PICO_KERNEL_VERSION: PICO_INFO = 6;

// TRIGGER_CHANNEL_PROPERTIES structure (from ps4000Api.h, pack 1)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
#[allow(non_snake_case)]
pub struct TRIGGER_CHANNEL_PROPERTIES {
    pub thresholdUpper: i16,
    pub thresholdUpperHysteresis: u16,
    pub thresholdLower: i16,
    pub thresholdLowerHysteresis: u16,
    pub channel: PS4000_CHANNEL,
    pub thresholdMode: PS4000_THRESHOLD_MODE,
}

// TRIGGER_CONDITIONS structure (from ps4000Api.h, pack 1)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
#[allow(non_snake_case)]
pub struct TRIGGER_CONDITIONS {
    pub channelA: PS4000_TRIGGER_STATE,
    pub channelB: PS4000_TRIGGER_STATE,
    pub channelC: PS4000_TRIGGER_STATE,
    pub channelD: PS4000_TRIGGER_STATE,
    pub external: PS4000_TRIGGER_STATE,
    pub aux: PS4000_TRIGGER_STATE,
    pub pulseWidthQualifier: PS4000_TRIGGER_STATE,
}

// PWQ_CONDITIONS structure (from ps4000Api.h, pack 1)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
#[allow(non_snake_case)]
pub struct PWQ_CONDITIONS {
    pub channelA: PS4000_TRIGGER_STATE,
    pub channelB: PS4000_TRIGGER_STATE,
    pub channelC: PS4000_TRIGGER_STATE,
    pub channelD: PS4000_TRIGGER_STATE,
    pub external: PS4000_TRIGGER_STATE,
    pub aux: PS4000_TRIGGER_STATE,
}

// Callback typedefs (invoked from a driver-owned thread, or from inside
// ps4000GetStreamingLatestValues for the streaming shape)
#[allow(non_snake_case)]
pub type ps4000BlockReady =
    extern "system" fn(handle: PS4000_HANDLE, status: PICO_STATUS, pParameter: *mut c_void);

#[allow(non_snake_case)]
pub type ps4000StreamingReady = extern "system" fn(
    handle: PS4000_HANDLE,
    noOfSamples: i32,
    startIndex: u32,
    overflow: i16,
    triggerAt: u32,
    triggered: i16,
    autoStop: i16,
    pParameter: *mut c_void,
);

#[allow(non_snake_case)]
pub type ps4000DataReady = extern "system" fn(
    handle: PS4000_HANDLE,
    noOfSamples: i32,
    overflow: i16,
    triggerAt: u32,
    triggered: i16,
    pParameter: *mut c_void,
);

// External function declarations from the ps4000 library
#[cfg(feature = "native")]
#[link(name = "ps4000")]
#[allow(non_snake_case)]
extern "system" {
    pub fn ps4000OpenUnit(handle: *mut PS4000_HANDLE) -> PICO_STATUS;

    pub fn ps4000OpenUnitAsync(status: *mut i16) -> PICO_STATUS;

    pub fn ps4000OpenUnitEx(handle: *mut PS4000_HANDLE, serial: *mut i8) -> PICO_STATUS;

    pub fn ps4000OpenUnitAsyncEx(status: *mut i16, serial: *mut i8) -> PICO_STATUS;

    pub fn ps4000OpenUnitProgress(
        handle: *mut PS4000_HANDLE,
        progressPercent: *mut i16,
        complete: *mut i16,
    ) -> PICO_STATUS;

    pub fn ps4000GetUnitInfo(
        handle: PS4000_HANDLE,
        string: *mut i8,
        stringLength: i16,
        requiredSize: *mut i16,
        info: PICO_INFO,
    ) -> PICO_STATUS;

    pub fn ps4000FlashLed(handle: PS4000_HANDLE, start: i16) -> PICO_STATUS;

    pub fn ps4000IsLedFlashing(handle: PS4000_HANDLE, status: *mut i16) -> PICO_STATUS;

    pub fn ps4000CloseUnit(handle: PS4000_HANDLE) -> PICO_STATUS;

    pub fn ps4000MemorySegments(
        handle: PS4000_HANDLE,
        nSegments: u16,
        nMaxSamples: *mut i32,
    ) -> PICO_STATUS;

    pub fn ps4000SetChannel(
        handle: PS4000_HANDLE,
        channel: PS4000_CHANNEL,
        enabled: i16,
        dc: i16,
        range: PS4000_RANGE,
    ) -> PICO_STATUS;

    pub fn ps4000SetNoOfCaptures(handle: PS4000_HANDLE, nCaptures: u16) -> PICO_STATUS;

    pub fn ps4000GetNoOfCaptures(handle: PS4000_HANDLE, nCaptures: *mut u16) -> PICO_STATUS;

    pub fn ps4000GetTimebase(
        handle: PS4000_HANDLE,
        timebase: u32,
        noSamples: i32,
        timeIntervalNanoseconds: *mut i32,
        oversample: i16,
        maxSamples: *mut i32,
        segmentIndex: u16,
    ) -> PICO_STATUS;

    pub fn ps4000GetTimebase2(
        handle: PS4000_HANDLE,
        timebase: u32,
        noSamples: i32,
        timeIntervalNanoseconds: *mut f32,
        oversample: i16,
        maxSamples: *mut i32,
        segmentIndex: u16,
    ) -> PICO_STATUS;

    pub fn ps4000SigGenOff(handle: PS4000_HANDLE) -> PICO_STATUS;

    pub fn ps4000SetSigGenArbitrary(
        handle: PS4000_HANDLE,
        offsetVoltage: i32,
        pkToPk: u32,
        startDeltaPhase: u32,
        stopDeltaPhase: u32,
        deltaPhaseIncrement: u32,
        dwellCount: u32,
        arbitraryWaveform: *const i16,
        arbitraryWaveformSize: i32,
        sweepType: i32,
        operationType: i16,
        indexMode: i32,
        shots: u32,
        sweeps: u32,
        triggerType: i32,
        triggerSource: i32,
        extInThreshold: i16,
    ) -> PICO_STATUS;

    pub fn ps4000SetSigGenBuiltIn(
        handle: PS4000_HANDLE,
        offsetVoltage: i32,
        pkToPk: u32,
        waveType: i16,
        startFrequency: f32,
        stopFrequency: f32,
        increment: f32,
        dwellTime: f32,
        sweepType: i32,
        operationType: i16,
        shots: u32,
        sweeps: u32,
        triggerType: i32,
        triggerSource: i32,
        extInThreshold: i16,
    ) -> PICO_STATUS;

    pub fn ps4000SigGenFrequencyToPhase(
        handle: PS4000_HANDLE,
        frequency: f64,
        indexMode: i32,
        bufferLength: u32,
        phase: *mut u32,
    ) -> PICO_STATUS;

    pub fn ps4000SigGenArbitraryMinMaxValues(
        handle: PS4000_HANDLE,
        minArbitraryWaveformValue: *mut i16,
        maxArbitraryWaveformValue: *mut i16,
        minArbitraryWaveformSize: *mut u32,
        maxArbitraryWaveformSize: *mut u32,
    ) -> PICO_STATUS;

    pub fn ps4000SigGenSoftwareControl(handle: PS4000_HANDLE, state: i16) -> PICO_STATUS;

    pub fn ps4000SetEts(
        handle: PS4000_HANDLE,
        mode: i32,
        etsCycles: i16,
        etsInterleave: i16,
        sampleTimePicoseconds: *mut i32,
    ) -> PICO_STATUS;

    pub fn ps4000SetSimpleTrigger(
        handle: PS4000_HANDLE,
        enable: i16,
        source: PS4000_CHANNEL,
        threshold: i16,
        direction: PS4000_THRESHOLD_DIRECTION,
        delay: u32,
        autoTrigger_ms: i16,
    ) -> PICO_STATUS;

    pub fn ps4000SetTriggerChannelProperties(
        handle: PS4000_HANDLE,
        channelProperties: *const TRIGGER_CHANNEL_PROPERTIES,
        nChannelProperties: i16,
        auxOutputEnable: i16,
        autoTriggerMilliseconds: i32,
    ) -> PICO_STATUS;

    pub fn ps4000SetExtTriggerRange(handle: PS4000_HANDLE, extRange: PS4000_RANGE) -> PICO_STATUS;

    pub fn ps4000SetTriggerChannelConditions(
        handle: PS4000_HANDLE,
        conditions: *const TRIGGER_CONDITIONS,
        nConditions: i16,
    ) -> PICO_STATUS;

    pub fn ps4000SetTriggerChannelDirections(
        handle: PS4000_HANDLE,
        channelA: PS4000_THRESHOLD_DIRECTION,
        channelB: PS4000_THRESHOLD_DIRECTION,
        channelC: PS4000_THRESHOLD_DIRECTION,
        channelD: PS4000_THRESHOLD_DIRECTION,
        ext: PS4000_THRESHOLD_DIRECTION,
        aux: PS4000_THRESHOLD_DIRECTION,
    ) -> PICO_STATUS;

    pub fn ps4000SetTriggerDelay(handle: PS4000_HANDLE, delay: u32) -> PICO_STATUS;

    pub fn ps4000SetPulseWidthQualifier(
        handle: PS4000_HANDLE,
        conditions: *const PWQ_CONDITIONS,
        nConditions: i16,
        direction: PS4000_THRESHOLD_DIRECTION,
        lower: u32,
        upper: u32,
        pulseWidthType: PS4000_PULSE_WIDTH_TYPE,
    ) -> PICO_STATUS;

    pub fn ps4000IsTriggerOrPulseWidthQualifierEnabled(
        handle: PS4000_HANDLE,
        triggerEnabled: *mut i16,
        pulseWidthQualifierEnabled: *mut i16,
    ) -> PICO_STATUS;

    pub fn ps4000GetTriggerTimeOffset64(
        handle: PS4000_HANDLE,
        time: *mut i64,
        timeUnits: *mut PS4000_TIME_UNITS,
        segmentIndex: u16,
    ) -> PICO_STATUS;

    pub fn ps4000GetTriggerChannelTimeOffset64(
        handle: PS4000_HANDLE,
        time: *mut i64,
        timeUnits: *mut PS4000_TIME_UNITS,
        segmentIndex: u16,
        channel: PS4000_CHANNEL,
    ) -> PICO_STATUS;

    pub fn ps4000GetValuesTriggerTimeOffsetBulk64(
        handle: PS4000_HANDLE,
        times: *mut i64,
        timeUnits: *mut PS4000_TIME_UNITS,
        fromSegmentIndex: u16,
        toSegmentIndex: u16,
    ) -> PICO_STATUS;

    pub fn ps4000GetValuesTriggerChannelTimeOffsetBulk64(
        handle: PS4000_HANDLE,
        times: *mut i64,
        timeUnits: *mut PS4000_TIME_UNITS,
        fromSegmentIndex: u16,
        toSegmentIndex: u16,
        channel: PS4000_CHANNEL,
    ) -> PICO_STATUS;

    pub fn ps4000SetDataBufferBulk(
        handle: PS4000_HANDLE,
        channel: PS4000_CHANNEL,
        buffer: *mut i16,
        bufferLth: i32,
        waveform: u16,
    ) -> PICO_STATUS;

    pub fn ps4000SetDataBuffersWithMode(
        handle: PS4000_HANDLE,
        channel: PS4000_CHANNEL,
        bufferMax: *mut i16,
        bufferMin: *mut i16,
        bufferLth: i32,
        mode: PS4000_RATIO_MODE,
    ) -> PICO_STATUS;

    pub fn ps4000RunBlock(
        handle: PS4000_HANDLE,
        noOfPreTriggerSamples: i32,
        noOfPostTriggerSamples: i32,
        timebase: u32,
        oversample: i16,
        timeIndisposedMs: *mut i32,
        segmentIndex: u16,
        lpReady: Option<ps4000BlockReady>,
        pParameter: *mut c_void,
    ) -> PICO_STATUS;

    pub fn ps4000RunStreamingEx(
        handle: PS4000_HANDLE,
        sampleInterval: *mut u32,
        sampleIntervalTimeUnits: PS4000_TIME_UNITS,
        maxPreTriggerSamples: u32,
        maxPostTriggerSamples: u32,
        autoStop: i16,
        downSampleRatio: u32,
        downSampleRatioMode: i16,
        overviewBufferSize: u32,
    ) -> PICO_STATUS;

    pub fn ps4000IsReady(handle: PS4000_HANDLE, ready: *mut i16) -> PICO_STATUS;

    pub fn ps4000GetStreamingLatestValues(
        handle: PS4000_HANDLE,
        lpPs4000Ready: Option<ps4000StreamingReady>,
        pParameter: *mut c_void,
    ) -> PICO_STATUS;

    pub fn ps4000NoOfStreamingValues(handle: PS4000_HANDLE, noOfValues: *mut u32) -> PICO_STATUS;

    pub fn ps4000GetMaxDownSampleRatio(
        handle: PS4000_HANDLE,
        noOfUnaggreatedSamples: u32,
        maxDownSampleRatio: *mut u32,
        downSampleRatioMode: i16,
        segmentIndex: u16,
    ) -> PICO_STATUS;

    pub fn ps4000GetValues(
        handle: PS4000_HANDLE,
        startIndex: u32,
        noOfSamples: *mut u32,
        downSampleRatio: u32,
        downSampleRatioMode: i16,
        segmentIndex: u16,
        overflow: *mut i16,
    ) -> PICO_STATUS;

    pub fn ps4000GetValuesBulk(
        handle: PS4000_HANDLE,
        noOfSamples: *mut u32,
        fromSegmentIndex: u16,
        toSegmentIndex: u16,
        overflow: *mut i16,
    ) -> PICO_STATUS;

    pub fn ps4000GetValuesAsync(
        handle: PS4000_HANDLE,
        startIndex: u32,
        noOfSamples: u32,
        downSampleRatio: u32,
        downSampleRatioMode: i16,
        segmentIndex: u16,
        lpDataReady: Option<ps4000DataReady>,
        pParameter: *mut c_void,
    ) -> PICO_STATUS;

    pub fn ps4000Stop(handle: PS4000_HANDLE) -> PICO_STATUS;

    pub fn ps4000SetProbe(handle: PS4000_HANDLE, probe: i32, range: PS4000_RANGE) -> PICO_STATUS;

    pub fn ps4000GetProbe(handle: PS4000_HANDLE, probe: *mut i32) -> PICO_STATUS;

    pub fn ps4000HoldOff(handle: PS4000_HANDLE, holdoff: u64, holdoffType: i32) -> PICO_STATUS;

    pub fn ps4000GetChannelInformation(
        handle: PS4000_HANDLE,
        info: i32,
        probe: i32,
        ranges: *mut i32,
        length: *mut i32,
        channels: i32,
    ) -> PICO_STATUS;

    pub fn ps4000SetFrequencyCounter(
        handle: PS4000_HANDLE,
        channel: PS4000_CHANNEL,
        enabled: i16,
        range: i32,
        thresholdMajor: i16,
        thresholdMinor: i16,
    ) -> PICO_STATUS;

    pub fn ps4000EnumerateUnits(count: *mut i16, serials: *mut i8, serialLth: *mut i16) -> PICO_STATUS;

    pub fn ps4000PingUnit(handle: PS4000_HANDLE) -> PICO_STATUS;

    pub fn ps4000SetBwFilter(
        handle: PS4000_HANDLE,
        channel: PS4000_CHANNEL,
        enable: i16,
    ) -> PICO_STATUS;

    pub fn ps4000TriggerWithinPreTriggerSamples(handle: PS4000_HANDLE, state: i16) -> PICO_STATUS;
}

/// Helper function to convert PICO_STATUS to a string description
pub fn status_to_string(status: PICO_STATUS) -> &'static str {
    match status {
        PICO_OK => "PICO_OK",
        PICO_MAX_UNITS_OPENED => "PICO_MAX_UNITS_OPENED",
        PICO_MEMORY_FAIL => "PICO_MEMORY_FAIL",
        PICO_NOT_FOUND => "PICO_NOT_FOUND",
        PICO_FW_FAIL => "PICO_FW_FAIL",
        PICO_OPEN_OPERATION_IN_PROGRESS => "PICO_OPEN_OPERATION_IN_PROGRESS",
        PICO_OPERATION_FAILED => "PICO_OPERATION_FAILED",
        PICO_NOT_RESPONDING => "PICO_NOT_RESPONDING",
        PICO_CONFIG_FAIL => "PICO_CONFIG_FAIL",
        PICO_KERNEL_DRIVER_TOO_OLD => "PICO_KERNEL_DRIVER_TOO_OLD",
        PICO_EEPROM_CORRUPT => "PICO_EEPROM_CORRUPT",
        PICO_OS_NOT_SUPPORTED => "PICO_OS_NOT_SUPPORTED",
        PICO_INVALID_HANDLE => "PICO_INVALID_HANDLE",
        PICO_INVALID_PARAMETER => "PICO_INVALID_PARAMETER",
        PICO_INVALID_TIMEBASE => "PICO_INVALID_TIMEBASE",
        PICO_INVALID_VOLTAGE_RANGE => "PICO_INVALID_VOLTAGE_RANGE",
        PICO_INVALID_CHANNEL => "PICO_INVALID_CHANNEL",
        PICO_INVALID_TRIGGER_CHANNEL => "PICO_INVALID_TRIGGER_CHANNEL",
        PICO_INVALID_CONDITION_CHANNEL => "PICO_INVALID_CONDITION_CHANNEL",
        PICO_NO_SIGNAL_GENERATOR => "PICO_NO_SIGNAL_GENERATOR",
        PICO_STREAMING_FAILED => "PICO_STREAMING_FAILED",
        PICO_BLOCK_MODE_FAILED => "PICO_BLOCK_MODE_FAILED",
        PICO_NULL_PARAMETER => "PICO_NULL_PARAMETER",
        PICO_ETS_MODE_SET => "PICO_ETS_MODE_SET",
        PICO_DATA_NOT_AVAILABLE => "PICO_DATA_NOT_AVAILABLE",
        PICO_STRING_BUFFER_TOO_SMALL => "PICO_STRING_BUFFER_TOO_SMALL",
        PICO_ETS_NOT_SUPPORTED => "PICO_ETS_NOT_SUPPORTED",
        PICO_AUTO_TRIGGER_TIME_TOO_SHORT => "PICO_AUTO_TRIGGER_TIME_TOO_SHORT",
        PICO_BUFFER_STALL => "PICO_BUFFER_STALL",
        PICO_TOO_MANY_SAMPLES => "PICO_TOO_MANY_SAMPLES",
        PICO_TOO_MANY_SEGMENTS => "PICO_TOO_MANY_SEGMENTS",
        PICO_PULSE_WIDTH_QUALIFIER => "PICO_PULSE_WIDTH_QUALIFIER",
        PICO_DELAY => "PICO_DELAY",
        PICO_SOURCE_DETAILS => "PICO_SOURCE_DETAILS",
        PICO_CONDITIONS => "PICO_CONDITIONS",
        PICO_USER_CALLBACK => "PICO_USER_CALLBACK",
        PICO_DEVICE_SAMPLING => "PICO_DEVICE_SAMPLING",
        PICO_NO_SAMPLES_AVAILABLE => "PICO_NO_SAMPLES_AVAILABLE",
        PICO_SEGMENT_OUT_OF_RANGE => "PICO_SEGMENT_OUT_OF_RANGE",
        PICO_BUSY => "PICO_BUSY",
        PICO_STARTINDEX_INVALID => "PICO_STARTINDEX_INVALID",
        PICO_INVALID_INFO => "PICO_INVALID_INFO",
        PICO_INFO_UNAVAILABLE => "PICO_INFO_UNAVAILABLE",
        PICO_INVALID_SAMPLE_INTERVAL => "PICO_INVALID_SAMPLE_INTERVAL",
        PICO_TRIGGER_ERROR => "PICO_TRIGGER_ERROR",
        PICO_MEMORY => "PICO_MEMORY",
        PICO_SIG_GEN_PARAM => "PICO_SIG_GEN_PARAM",
        PICO_SHOTS_SWEEPS_WARNING => "PICO_SHOTS_SWEEPS_WARNING",
        PICO_SIGGEN_TRIGGER_SOURCE => "PICO_SIGGEN_TRIGGER_SOURCE",
        PICO_AUX_OUTPUT_CONFLICT => "PICO_AUX_OUTPUT_CONFLICT",
        PICO_AUX_OUTPUT_ETS_CONFLICT => "PICO_AUX_OUTPUT_ETS_CONFLICT",
        PICO_WARNING_EXT_THRESHOLD_CONFLICT => "PICO_WARNING_EXT_THRESHOLD_CONFLICT",
        PICO_WARNING_AUX_OUTPUT_CONFLICT => "PICO_WARNING_AUX_OUTPUT_CONFLICT",
        PICO_SIGGEN_OUTPUT_OVER_VOLTAGE => "PICO_SIGGEN_OUTPUT_OVER_VOLTAGE",
        PICO_DELAY_NULL => "PICO_DELAY_NULL",
        PICO_INVALID_BUFFER => "PICO_INVALID_BUFFER",
        PICO_SIGGEN_OFFSET_VOLTAGE => "PICO_SIGGEN_OFFSET_VOLTAGE",
        PICO_SIGGEN_PK_TO_PK => "PICO_SIGGEN_PK_TO_PK",
        PICO_CANCELLED => "PICO_CANCELLED",
        PICO_SEGMENT_NOT_USED => "PICO_SEGMENT_NOT_USED",
        PICO_INVALID_CALL => "PICO_INVALID_CALL",
        PICO_GET_VALUES_INTERRUPTED => "PICO_GET_VALUES_INTERRUPTED",
        PICO_NOT_USED => "PICO_NOT_USED",
        PICO_INVALID_SAMPLERATIO => "PICO_INVALID_SAMPLERATIO",
        PICO_INVALID_STATE => "PICO_INVALID_STATE",
        PICO_NOT_ENOUGH_SEGMENTS => "PICO_NOT_ENOUGH_SEGMENTS",
        PICO_DRIVER_FUNCTION => "PICO_DRIVER_FUNCTION",
        PICO_INVALID_COUPLING => "PICO_INVALID_COUPLING",
        PICO_BUFFERS_NOT_SET => "PICO_BUFFERS_NOT_SET",
        PICO_RATIO_MODE_NOT_SUPPORTED => "PICO_RATIO_MODE_NOT_SUPPORTED",
        PICO_RAPID_NOT_SUPPORT_AGGREGATION => "PICO_RAPID_NOT_SUPPORT_AGGREGATION",
        PICO_INVALID_TRIGGER_PROPERTY => "PICO_INVALID_TRIGGER_PROPERTY",
        PICO_INTERFACE_NOT_CONNECTED => "PICO_INTERFACE_NOT_CONNECTED",
        PICO_RESISTANCE_AND_PROBE_NOT_ALLOWED => "PICO_RESISTANCE_AND_PROBE_NOT_ALLOWED",
        PICO_POWER_FAILED => "PICO_POWER_FAILED",
        PICO_SIGGEN_WAVEFORM_SETUP_FAILED => "PICO_SIGGEN_WAVEFORM_SETUP_FAILED",
        PICO_FPGA_FAIL => "PICO_FPGA_FAIL",
        PICO_POWER_MANAGER => "PICO_POWER_MANAGER",
        PICO_INVALID_ANALOGUE_OFFSET => "PICO_INVALID_ANALOGUE_OFFSET",
        PICO_PLL_LOCK_FAILED => "PICO_PLL_LOCK_FAILED",
        PICO_ANALOG_BOARD => "PICO_ANALOG_BOARD",
        PICO_CONFIG_FAIL_AWG => "PICO_CONFIG_FAIL_AWG",
        PICO_INITIALISE_FPGA => "PICO_INITIALISE_FPGA",
        PICO_NO_CAPTURES_AVAILABLE => "PICO_NO_CAPTURES_AVAILABLE",
        PICO_GET_DATA_ACTIVE => "PICO_GET_DATA_ACTIVE",
        PICO_BANDWIDTH_NOT_SUPPORTED => "PICO_BANDWIDTH_NOT_SUPPORTED",
        PICO_AWG_NOT_SUPPORTED => "PICO_AWG_NOT_SUPPORTED",
        _ => "UNKNOWN_STATUS",
    }
}
