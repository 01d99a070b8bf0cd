//! Device vocabulary shared by every component
//!
//! Discriminants match the ps4000Api.h enumerations so values can be handed
//! to the native driver with a plain `as i32`.

use std::fmt;
use std::time::Duration;

/// Scope input, trigger source or sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum Channel {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
    External = 4,
    Aux = 5,
    None = 6,
}

impl Channel {
    /// Analog inputs that carry sample data
    pub const ANALOG: [Channel; 4] = [Channel::A, Channel::B, Channel::C, Channel::D];

    /// Inputs that may take part in trigger conditions
    pub const TRIGGER_INPUTS: [Channel; 6] = [
        Channel::A,
        Channel::B,
        Channel::C,
        Channel::D,
        Channel::External,
        Channel::Aux,
    ];

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Channel::A),
            1 => Some(Channel::B),
            2 => Some(Channel::C),
            3 => Some(Channel::D),
            4 => Some(Channel::External),
            5 => Some(Channel::Aux),
            6 => Some(Channel::None),
            _ => None,
        }
    }

    pub fn is_analog(self) -> bool {
        matches!(self, Channel::A | Channel::B | Channel::C | Channel::D)
    }

    /// Position of the channel in per-channel tables and overflow bitmasks
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::A => "A",
            Channel::B => "B",
            Channel::C => "C",
            Channel::D => "D",
            Channel::External => "EXT",
            Channel::Aux => "AUX",
            Channel::None => "NONE",
        };
        f.write_str(name)
    }
}

/// Input coupling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coupling {
    Ac,
    Dc,
}

/// Input voltage range, or resistance range on units that measure it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum Range {
    Mv10 = 0,
    Mv20 = 1,
    Mv50 = 2,
    Mv100 = 3,
    Mv200 = 4,
    Mv500 = 5,
    V1 = 6,
    V2 = 7,
    V5 = 8,
    V10 = 9,
    V20 = 10,
    V50 = 11,
    V100 = 12,
    R100 = 13,
    R1k = 14,
    R10k = 15,
    R100k = 16,
    R1M = 17,
}

impl Range {
    pub const VOLTAGE: [Range; 13] = [
        Range::Mv10,
        Range::Mv20,
        Range::Mv50,
        Range::Mv100,
        Range::Mv200,
        Range::Mv500,
        Range::V1,
        Range::V2,
        Range::V5,
        Range::V10,
        Range::V20,
        Range::V50,
        Range::V100,
    ];

    pub const RESISTANCE: [Range; 5] = [Range::R100, Range::R1k, Range::R10k, Range::R100k, Range::R1M];

    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::VOLTAGE
            .iter()
            .chain(Self::RESISTANCE.iter())
            .copied()
            .find(|range| *range as i32 == raw)
    }

    pub fn is_resistance(self) -> bool {
        self >= Range::R100
    }

    /// Full-scale input in millivolts, `None` for resistance ranges
    pub fn millivolts(self) -> Option<u32> {
        let mv = match self {
            Range::Mv10 => 10,
            Range::Mv20 => 20,
            Range::Mv50 => 50,
            Range::Mv100 => 100,
            Range::Mv200 => 200,
            Range::Mv500 => 500,
            Range::V1 => 1_000,
            Range::V2 => 2_000,
            Range::V5 => 5_000,
            Range::V10 => 10_000,
            Range::V20 => 20_000,
            Range::V50 => 50_000,
            Range::V100 => 100_000,
            _ => return None,
        };
        Some(mv)
    }

    /// Full-scale resistance in ohms, `None` for voltage ranges
    pub fn ohms(self) -> Option<u32> {
        match self {
            Range::R100 => Some(100),
            Range::R1k => Some(1_000),
            Range::R10k => Some(10_000),
            Range::R100k => Some(100_000),
            Range::R1M => Some(1_000_000),
            _ => None,
        }
    }
}

/// Probe or accessory attached to the unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum Probe {
    None = 0,
    CurrentClamp10A = 1,
    CurrentClamp1000A = 2,
    TemperatureSensor = 3,
    CurrentMeasuringDevice = 4,
    PressureSensor50Bar = 5,
    PressureSensor5Bar = 6,
    OpticalSwitch = 7,
    Unknown = 8,
}

impl Probe {
    pub fn from_raw(raw: i32) -> Option<Self> {
        let probe = match raw {
            0 => Probe::None,
            1 => Probe::CurrentClamp10A,
            2 => Probe::CurrentClamp1000A,
            3 => Probe::TemperatureSensor,
            4 => Probe::CurrentMeasuringDevice,
            5 => Probe::PressureSensor50Bar,
            6 => Probe::PressureSensor5Bar,
            7 => Probe::OpticalSwitch,
            8 => Probe::Unknown,
            _ => return None,
        };
        Some(probe)
    }
}

/// Selector for channel capability queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ChannelInfo {
    Ranges = 0,
    Resistances = 1,
    Accelerometer = 2,
    Probes = 3,
    Temperatures = 4,
}

/// Unit of a time value reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TimeUnits {
    Femtoseconds = 0,
    Picoseconds = 1,
    Nanoseconds = 2,
    Microseconds = 3,
    Milliseconds = 4,
    Seconds = 5,
}

impl TimeUnits {
    pub fn from_raw(raw: i32) -> Option<Self> {
        let units = match raw {
            0 => TimeUnits::Femtoseconds,
            1 => TimeUnits::Picoseconds,
            2 => TimeUnits::Nanoseconds,
            3 => TimeUnits::Microseconds,
            4 => TimeUnits::Milliseconds,
            5 => TimeUnits::Seconds,
            _ => return None,
        };
        Some(units)
    }

    /// Femtoseconds per unit
    pub fn femtoseconds(self) -> i128 {
        match self {
            TimeUnits::Femtoseconds => 1,
            TimeUnits::Picoseconds => 1_000,
            TimeUnits::Nanoseconds => 1_000_000,
            TimeUnits::Microseconds => 1_000_000_000,
            TimeUnits::Milliseconds => 1_000_000_000_000,
            TimeUnits::Seconds => 1_000_000_000_000_000,
        }
    }
}

/// A signed time with an explicit unit, as returned by the 64-bit
/// trigger time offset queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeValue {
    pub value: i64,
    pub units: TimeUnits,
}

impl TimeValue {
    pub fn new(value: i64, units: TimeUnits) -> Self {
        Self { value, units }
    }

    pub fn as_femtoseconds(&self) -> i128 {
        self.value as i128 * self.units.femtoseconds()
    }

    pub fn as_picoseconds(&self) -> i128 {
        self.as_femtoseconds() / 1_000
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.as_femtoseconds() as f64 * 1e-15
    }
}

/// Trigger threshold mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ThresholdMode {
    Level = 0,
    Window = 1,
}

/// Trigger threshold direction
///
/// Window-mode directions share discriminants with the level-mode ones and
/// are exposed as associated constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ThresholdDirection {
    Above = 0,
    Below = 1,
    Rising = 2,
    Falling = 3,
    RisingOrFalling = 4,
    AboveLower = 5,
    BelowLower = 6,
    RisingLower = 7,
    FallingLower = 8,
    PositiveRunt = 9,
    NegativeRunt = 10,
}

impl ThresholdDirection {
    pub const INSIDE: ThresholdDirection = ThresholdDirection::Above;
    pub const OUTSIDE: ThresholdDirection = ThresholdDirection::Below;
    pub const ENTER: ThresholdDirection = ThresholdDirection::Rising;
    pub const EXIT: ThresholdDirection = ThresholdDirection::Falling;
    pub const ENTER_OR_EXIT: ThresholdDirection = ThresholdDirection::RisingOrFalling;
    /// The driver's "no direction" value
    pub const NONE: ThresholdDirection = ThresholdDirection::Rising;

    /// Directions accepted by the simple trigger
    pub fn is_simple(self) -> bool {
        matches!(
            self,
            ThresholdDirection::Above
                | ThresholdDirection::Below
                | ThresholdDirection::Rising
                | ThresholdDirection::Falling
                | ThresholdDirection::RisingOrFalling
        )
    }
}

/// Per-input state in a trigger or pulse-width condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum TriggerState {
    #[default]
    DontCare = 0,
    True = 1,
    False = 2,
}

/// Pulse-width qualifier comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PulseWidthType {
    None = 0,
    LessThan = 1,
    GreaterThan = 2,
    InRange = 3,
    OutOfRange = 4,
}

/// Downsampling applied when values are read back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum DownSamplingMode {
    #[default]
    None = 0,
    Aggregate = 1,
    Average = 2,
}

/// Equivalent-time sampling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EtsMode {
    Off = 0,
    Fast = 1,
    Slow = 2,
}

/// Hold-off unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum HoldOffType {
    Time = 0,
}

/// Frequency counter input range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FrequencyCounterRange {
    Khz2 = 0,
    Khz20 = 1,
    Hz20 = 2,
    Hz200 = 3,
}

/// Unit information selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum InfoKind {
    DriverVersion = 0,
    UsbVersion = 1,
    HardwareVersion = 2,
    VariantInfo = 3,
    BatchAndSerial = 4,
    CalDate = 5,
    KernelVersion = 6,
}

impl InfoKind {
    pub const ALL: [InfoKind; 7] = [
        InfoKind::DriverVersion,
        InfoKind::UsbVersion,
        InfoKind::HardwareVersion,
        InfoKind::VariantInfo,
        InfoKind::BatchAndSerial,
        InfoKind::CalDate,
        InfoKind::KernelVersion,
    ];
}

/// Known members of the family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    Ps4223,
    Ps4224,
    Ps4423,
    Ps4424,
    Ps4226,
    Ps4227,
    Ps4262,
}

impl Model {
    /// Parse the variant string reported by the unit ("4224", "4262", ...)
    pub fn from_variant(variant: &str) -> Option<Self> {
        let model = match variant.trim() {
            "4223" => Model::Ps4223,
            "4224" => Model::Ps4224,
            "4423" => Model::Ps4423,
            "4424" => Model::Ps4424,
            "4226" => Model::Ps4226,
            "4227" => Model::Ps4227,
            "4262" => Model::Ps4262,
            _ => return None,
        };
        Some(model)
    }

    pub fn variant(self) -> &'static str {
        match self {
            Model::Ps4223 => "4223",
            Model::Ps4224 => "4224",
            Model::Ps4423 => "4423",
            Model::Ps4424 => "4424",
            Model::Ps4226 => "4226",
            Model::Ps4227 => "4227",
            Model::Ps4262 => "4262",
        }
    }
}

/// Signal generator sweep direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum SweepType {
    #[default]
    Up = 0,
    Down = 1,
    UpDown = 2,
    DownUp = 3,
}

/// How the arbitrary waveform buffer is replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum IndexMode {
    #[default]
    Single = 0,
    Dual = 1,
    Quad = 2,
}

impl IndexMode {
    /// Effective playback length multiplier
    pub fn multiplier(self) -> u32 {
        match self {
            IndexMode::Single => 1,
            IndexMode::Dual => 2,
            IndexMode::Quad => 4,
        }
    }
}

/// Built-in signal generator waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum WaveType {
    #[default]
    Sine = 0,
    Square = 1,
    Triangle = 2,
    RampUp = 3,
    RampDown = 4,
    Sinc = 5,
    Gaussian = 6,
    HalfSine = 7,
    DcVoltage = 8,
    WhiteNoise = 9,
}

/// Signal generator trigger edge or gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum SigGenTrigType {
    #[default]
    Rising = 0,
    Falling = 1,
    GateHigh = 2,
    GateLow = 3,
}

/// What starts the signal generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum SigGenTrigSource {
    #[default]
    None = 0,
    ScopeTrig = 1,
    AuxIn = 2,
    ExtIn = 3,
    SoftTrig = 4,
}

/// Per-channel overflow bits as reported by the driver (bit n = channel n)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverflowFlags(pub i16);

impl OverflowFlags {
    pub fn is_set(&self, channel: Channel) -> bool {
        self.0 & (1 << channel.index()) != 0
    }

    pub fn any(&self) -> bool {
        self.0 != 0
    }

    pub fn channels(&self) -> Vec<Channel> {
        Channel::ANALOG
            .iter()
            .copied()
            .filter(|channel| self.is_set(*channel))
            .collect()
    }
}

/// Convert a millisecond count reported by the driver into a `Duration`
pub(crate) fn millis(ms: i32) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_round_trips_raw_values() {
        assert_eq!(Range::from_raw(7), Some(Range::V2));
        assert_eq!(Range::from_raw(13), Some(Range::R100));
        assert_eq!(Range::from_raw(18), None);
        assert_eq!(Range::V2.millivolts(), Some(2_000));
        assert!(Range::R1k.is_resistance());
        assert_eq!(Range::R1k.millivolts(), None);
    }

    #[test]
    fn test_window_directions_alias_level_directions() {
        assert_eq!(ThresholdDirection::INSIDE as i32, 0);
        assert_eq!(ThresholdDirection::ENTER_OR_EXIT as i32, 4);
        assert!(!ThresholdDirection::PositiveRunt.is_simple());
    }

    #[test]
    fn test_overflow_flags_per_channel() {
        let flags = OverflowFlags(0b0101);
        assert!(flags.is_set(Channel::A));
        assert!(!flags.is_set(Channel::B));
        assert_eq!(flags.channels(), vec![Channel::A, Channel::C]);
        assert!(!OverflowFlags::default().any());
    }

    #[test]
    fn test_time_value_conversion() {
        let offset = TimeValue::new(-250, TimeUnits::Nanoseconds);
        assert_eq!(offset.as_picoseconds(), -250_000);
        assert!((offset.as_secs_f64() + 250e-9).abs() < 1e-15);
    }

    #[test]
    fn test_model_from_variant() {
        assert_eq!(Model::from_variant("4262"), Some(Model::Ps4262));
        assert_eq!(Model::from_variant(" 4424 "), Some(Model::Ps4424));
        assert_eq!(Model::from_variant("5444D"), None);
    }
}
