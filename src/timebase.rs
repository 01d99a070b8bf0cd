//! Timebase resolution and memory segmentation
//!
//! The unit is always asked; interval and memory rules differ per variant
//! and per enabled channel count, so nothing here is computed locally.
//! Results are cached per configuration generation.

use std::collections::HashMap;

use log::{debug, trace};

use crate::error::{Result, ScopeError};
use crate::ffi::PICO_NOT_USED;
use crate::session::DeviceSession;
use crate::types::DownSamplingMode;

/// Arguments of one timebase query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimebaseRequest {
    pub index: u32,
    pub samples: u32,
    pub oversample: i16,
    pub segment: u16,
}

/// A timebase the unit has confirmed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTimebase {
    pub index: u32,
    pub interval_ns: f64,
    pub max_samples: u32,
    /// Whether the interval came from the floating-point query
    pub precise: bool,
}

impl ResolvedTimebase {
    pub fn interval_ps(&self) -> u64 {
        (self.interval_ns * 1_000.0).round() as u64
    }

    pub fn sample_rate_hz(&self) -> f64 {
        1e9 / self.interval_ns
    }
}

/// Resolver state of one session
#[derive(Debug)]
pub struct TimebaseResolver {
    cache: HashMap<TimebaseRequest, ResolvedTimebase>,
    generation: u64,
    segments: u16,
}

impl Default for TimebaseResolver {
    fn default() -> Self {
        Self {
            cache: HashMap::new(),
            generation: 0,
            segments: 1,
        }
    }
}

impl TimebaseResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a timebase, preferring the floating-point query and falling
    /// back to the integer one on units without it.
    ///
    /// `generation` identifies the channel configuration the answer is valid
    /// for. Repeating a request within one generation returns the cached
    /// answer.
    pub fn resolve(
        &mut self,
        session: &DeviceSession,
        request: TimebaseRequest,
        generation: u64,
    ) -> Result<ResolvedTimebase> {
        if generation != self.generation {
            self.invalidate();
            self.generation = generation;
        }
        if let Some(cached) = self.cache.get(&request) {
            trace!("Timebase {} served from cache", request.index);
            return Ok(*cached);
        }

        if request.segment >= self.segments {
            return Err(ScopeError::invalid(format!(
                "segment {} outside the {} configured",
                request.segment, self.segments
            )));
        }
        let samples = i32::try_from(request.samples)
            .map_err(|_| ScopeError::capability(format!("{} samples is too many", request.samples)))?;

        let (driver, handle) = session.live()?;
        let resolved = match driver.get_timebase2(
            handle,
            request.index,
            samples,
            request.oversample,
            request.segment,
        ) {
            Ok((interval_ns, max_samples)) => ResolvedTimebase {
                index: request.index,
                interval_ns: interval_ns as f64,
                max_samples: max_samples.max(0) as u32,
                precise: true,
            },
            Err(PICO_NOT_USED) => self.resolve_integer(session, request)?,
            Err(status) => return Err(status.into()),
        };

        debug!(
            "Timebase {} -> {} ns, max {} samples",
            resolved.index, resolved.interval_ns, resolved.max_samples
        );
        self.cache.insert(request, resolved);
        Ok(resolved)
    }

    /// Resolve through the integer-nanosecond query only
    pub fn resolve_integer(&self, session: &DeviceSession, request: TimebaseRequest) -> Result<ResolvedTimebase> {
        let samples = i32::try_from(request.samples)
            .map_err(|_| ScopeError::capability(format!("{} samples is too many", request.samples)))?;
        let (driver, handle) = session.live()?;
        let (interval_ns, max_samples) = driver
            .get_timebase(handle, request.index, samples, request.oversample, request.segment)
            .map_err(ScopeError::from)?;
        Ok(ResolvedTimebase {
            index: request.index,
            interval_ns: interval_ns as f64,
            max_samples: max_samples.max(0) as u32,
            precise: false,
        })
    }

    /// Drop every cached answer
    pub fn invalidate(&mut self) {
        if !self.cache.is_empty() {
            debug!("Timebase cache invalidated ({} entries)", self.cache.len());
        }
        self.cache.clear();
    }

    /// Largest ratio usable when downsampling `samples` captured samples
    pub fn max_down_sample_ratio(
        &self,
        session: &DeviceSession,
        samples: u32,
        mode: DownSamplingMode,
        segment: u16,
    ) -> Result<u32> {
        let (driver, handle) = session.live()?;
        driver
            .get_max_down_sample_ratio(handle, samples, mode, segment)
            .map_err(ScopeError::from)
    }

    /// Split on-device memory into `segments` partitions. Returns the samples
    /// available per segment.
    pub fn set_memory_segments(&mut self, session: &DeviceSession, segments: u16) -> Result<u32> {
        if segments == 0 {
            return Err(ScopeError::invalid("at least one memory segment is required"));
        }
        let (driver, handle) = session.live()?;
        let per_segment = driver
            .memory_segments(handle, segments)
            .map_err(ScopeError::from)?;
        self.segments = segments;
        self.invalidate();
        debug!("{} memory segment(s), {} samples each", segments, per_segment);
        Ok(per_segment.max(0) as u32)
    }

    pub fn segments(&self) -> u16 {
        self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimConfig, SimulatedDriver};
    use crate::types::{Channel, Model, Range};
    use std::sync::Arc;

    fn request(index: u32, samples: u32) -> TimebaseRequest {
        TimebaseRequest {
            index,
            samples,
            oversample: 1,
            segment: 0,
        }
    }

    fn open(config: SimConfig) -> DeviceSession {
        DeviceSession::open(Arc::new(SimulatedDriver::new(config))).unwrap()
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let session = open(SimConfig::for_model(Model::Ps4224));
        let mut resolver = TimebaseResolver::new();
        let first = resolver.resolve(&session, request(3, 5000), 0).unwrap();
        let second = resolver.resolve(&session, request(3, 5000), 0).unwrap();
        assert_eq!(first, second);
        assert!(first.precise);
        assert_eq!(first.interval_ns, 32.0);
    }

    #[test]
    fn test_integer_fallback() {
        let mut config = SimConfig::for_model(Model::Ps4262);
        config.float_timebase = false;
        let session = open(config);
        let mut resolver = TimebaseResolver::new();
        let resolved = resolver.resolve(&session, request(9, 1000), 0).unwrap();
        assert!(!resolved.precise);
        assert_eq!(resolved.interval_ns, 1000.0);
        assert_eq!(resolved.interval_ps(), 1_000_000);
    }

    #[test]
    fn test_generation_change_requeries() {
        let sim = Arc::new(SimulatedDriver::new(SimConfig::for_model(Model::Ps4424)));
        let session = DeviceSession::open(sim.clone()).unwrap();
        let mut resolver = TimebaseResolver::new();
        let before = resolver.resolve(&session, request(0, 1000), 0).unwrap();
        assert_eq!(before.interval_ns, 4.0);

        let (driver, handle) = session.live().unwrap();
        driver.set_channel(handle, Channel::B, true, true, Range::V1).unwrap();

        // Same generation: the stale answer is still served
        assert_eq!(resolver.resolve(&session, request(0, 1000), 0).unwrap(), before);
        // New generation: the unit now refuses timebase 0 with two channels
        assert!(matches!(
            resolver.resolve(&session, request(0, 1000), 1),
            Err(ScopeError::Capability(_))
        ));
    }

    #[test]
    fn test_segments_shrink_capacity() {
        let session = open(SimConfig::for_model(Model::Ps4224));
        let mut resolver = TimebaseResolver::new();
        let whole = resolver.resolve(&session, request(3, 0), 0).unwrap();
        let per_segment = resolver.set_memory_segments(&session, 8).unwrap();
        assert_eq!(resolver.segments(), 8);
        let split = resolver.resolve(&session, request(3, 0), 0).unwrap();
        assert!(split.max_samples * 8 <= whole.max_samples);
        assert!(per_segment > 0);

        assert!(matches!(
            resolver.resolve(
                &session,
                TimebaseRequest {
                    segment: 8,
                    ..request(3, 0)
                },
                0
            ),
            Err(ScopeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_too_many_samples_is_capability_error() {
        let session = open(SimConfig::for_model(Model::Ps4224));
        let mut resolver = TimebaseResolver::new();
        let err = resolver
            .resolve(&session, request(3, i32::MAX as u32), 0)
            .unwrap_err();
        assert!(matches!(err, ScopeError::Capability(_)));
    }
}
