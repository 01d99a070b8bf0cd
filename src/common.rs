//! Helpers shared by the library and the reader binary

use std::time::Instant;

use crate::ffi::{PS4000_MAX_VALUE, PS4262_MAX_VALUE};
use crate::types::{Model, Range};

/// Wall-clock timer for acquisition rates
pub struct TimeKeeper {
    started: Instant,
}

impl TimeKeeper {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Average rate of `count` events since creation
    pub fn rate(&self, count: u64) -> f64 {
        let elapsed = self.elapsed_secs();
        if elapsed > 0.0 {
            count as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

/// Full-scale ADC count of `model` (the 4262 has a wider range)
pub fn max_adc_value(model: Option<Model>) -> i16 {
    match model {
        Some(Model::Ps4262) => PS4262_MAX_VALUE,
        _ => PS4000_MAX_VALUE,
    }
}

/// Convert an ADC count to millivolts on a voltage `range`.
/// Resistance ranges have no voltage scale and return `None`.
pub fn adc_to_mv(raw: i16, range: Range, max_value: i16) -> Option<f64> {
    let full_scale = range.millivolts()? as f64;
    Some(raw as f64 * full_scale / max_value as f64)
}

/// Convert millivolts to the ADC count the unit compares trigger thresholds
/// against, saturating at full scale
pub fn mv_to_adc(mv: f64, range: Range, max_value: i16) -> Option<i16> {
    let full_scale = range.millivolts()? as f64;
    let counts = (mv / full_scale * max_value as f64).round();
    Some(counts.clamp(-(max_value as f64), max_value as f64) as i16)
}

/// Render `raw` as a bar centred on zero, scaled so `max_value` counts
/// fill one half of `width`
///
/// ```
/// use ps4000_interface::level_bar;
///
/// let bar = level_bar(16_382, 32_764, 40);
/// assert_eq!(bar.chars().count(), 41);
/// ```
pub fn level_bar(raw: i16, max_value: i16, width: usize) -> String {
    let half = width / 2;
    let fraction = (raw as f64 / max_value.max(1) as f64).clamp(-1.0, 1.0);
    let filled = ((fraction.abs() * half as f64).round() as usize).min(half);

    let (left, right) = if fraction < 0.0 {
        (
            format!("{}{}", " ".repeat(half - filled), "█".repeat(filled)),
            " ".repeat(half),
        )
    } else {
        (
            " ".repeat(half),
            format!("{}{}", "█".repeat(filled), " ".repeat(half - filled)),
        )
    };
    format!("{}|{}", left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_bar() {
        let max = PS4000_MAX_VALUE;
        assert_eq!(level_bar(0, max, 40), format!("{}|{}", " ".repeat(20), " ".repeat(20)));

        let low = level_bar(-max / 2, max, 40);
        assert_eq!(low.chars().count(), 41);
        assert_eq!(low.chars().filter(|&c| c == '█').count(), 10);
        assert!(low.ends_with(&format!("|{}", " ".repeat(20))));

        // Overrange saturates at the edge
        assert_eq!(level_bar(i16::MAX, max, 40).chars().filter(|&c| c == '█').count(), 20);
    }

    #[test]
    fn test_adc_conversion() {
        let max = max_adc_value(Some(Model::Ps4224));
        assert_eq!(adc_to_mv(max, Range::V2, max), Some(2000.0));
        assert_eq!(adc_to_mv(-max / 2, Range::V2, max).map(f64::round), Some(-1000.0));
        assert_eq!(adc_to_mv(100, Range::R1k, max), None);

        assert_eq!(mv_to_adc(500.0, Range::V1, max), Some(16382));
        assert_eq!(mv_to_adc(9_000.0, Range::V1, max), Some(max));
        assert_eq!(max_adc_value(Some(Model::Ps4262)), 32767);
    }

    #[test]
    fn test_rate_after_sleep() {
        let timer = TimeKeeper::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_secs() >= 0.01);
        assert!(timer.rate(100) > 0.0);
    }
}
