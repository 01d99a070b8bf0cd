//! Caller-owned sample buffers and their bindings to channels and segments
//!
//! A [`SampleBuffer`] is owned by the caller. The [`BufferManager`] only keeps
//! a weak reference per (channel, segment) binding; arming a run upgrades the
//! bindings it needs into [`PinnedBuffers`], which keep the storage alive
//! until the run completes or is stopped.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, trace};

use crate::error::{Result, ScopeError};
use crate::session::DeviceSession;
use crate::types::{Channel, DownSamplingMode};

/// Fixed-length sample storage shared between the caller and the driver
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    data: Arc<Mutex<Box<[i16]>>>,
    len: usize,
}

/// Non-owning handle to a [`SampleBuffer`]
#[derive(Debug, Clone)]
pub struct WeakSampleBuffer {
    data: Weak<Mutex<Box<[i16]>>>,
    len: usize,
}

/// Read/write access to buffer contents
pub struct SampleGuard<'a>(MutexGuard<'a, Box<[i16]>>);

impl SampleBuffer {
    /// Allocate a zeroed buffer of `len` samples
    pub fn new(len: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0i16; len].into_boxed_slice())),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lock the buffer for access. Must not be held across a running capture.
    pub fn lock(&self) -> SampleGuard<'_> {
        // A poisoned lock only means a writer panicked mid-copy; samples are plain data
        SampleGuard(self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Copy the contents out
    pub fn to_vec(&self) -> Vec<i16> {
        self.lock().to_vec()
    }

    /// Copy a sub-range out, clamped to the buffer length
    pub fn slice_to_vec(&self, start: usize, count: usize) -> Vec<i16> {
        let guard = self.lock();
        let start = start.min(self.len);
        let end = start.saturating_add(count).min(self.len);
        guard[start..end].to_vec()
    }

    pub fn downgrade(&self) -> WeakSampleBuffer {
        WeakSampleBuffer {
            data: Arc::downgrade(&self.data),
            len: self.len,
        }
    }

    /// Whether two handles refer to the same storage
    pub fn same_storage(&self, other: &SampleBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Stable pointer to the first sample, for handing to the native driver.
    /// The boxed slice is never reallocated, so the pointer stays valid for
    /// as long as any clone of this buffer is alive.
    #[cfg_attr(not(feature = "native"), allow(dead_code))]
    pub(crate) fn as_mut_ptr(&self) -> *mut i16 {
        self.lock().as_mut_ptr()
    }
}

impl WeakSampleBuffer {
    pub fn upgrade(&self) -> Option<SampleBuffer> {
        self.data.upgrade().map(|data| SampleBuffer {
            data,
            len: self.len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_alive(&self) -> bool {
        self.data.strong_count() > 0
    }
}

impl Deref for SampleGuard<'_> {
    type Target = [i16];

    fn deref(&self) -> &[i16] {
        &self.0
    }
}

impl DerefMut for SampleGuard<'_> {
    fn deref_mut(&mut self) -> &mut [i16] {
        &mut self.0
    }
}

/// Role a registered buffer plays for its channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    /// One buffer receiving raw or averaged samples
    Single,
    /// Max/min pair for aggregate downsampling
    Pair,
}

/// Key of one binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    pub channel: Channel,
    pub segment: u16,
}

#[derive(Debug, Clone)]
struct Binding {
    max: WeakSampleBuffer,
    min: Option<WeakSampleBuffer>,
    mode: DownSamplingMode,
    bulk: bool,
    generation: u64,
}

impl Binding {
    fn role(&self) -> BufferRole {
        if self.min.is_some() {
            BufferRole::Pair
        } else {
            BufferRole::Single
        }
    }
}

/// A binding upgraded for the duration of a run
#[derive(Debug, Clone)]
pub struct PinnedBuffer {
    pub key: BindingKey,
    pub max: SampleBuffer,
    pub min: Option<SampleBuffer>,
    pub mode: DownSamplingMode,
}

/// What a run needs bound before it may be armed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRequirement {
    pub channels: Vec<Channel>,
    pub segments: std::ops::Range<u16>,
    pub min_len: usize,
    pub mode: DownSamplingMode,
    /// Rapid-block runs read through bulk bindings
    pub bulk: bool,
}

/// Strong references held by an armed or running acquisition
#[derive(Debug, Default, Clone)]
pub struct PinnedBuffers {
    buffers: Vec<PinnedBuffer>,
}

impl PinnedBuffers {
    pub fn iter(&self) -> impl Iterator<Item = &PinnedBuffer> {
        self.buffers.iter()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn for_segment(&self, segment: u16) -> impl Iterator<Item = &PinnedBuffer> {
        self.buffers.iter().filter(move |p| p.key.segment == segment)
    }
}

/// Registry of caller buffers bound to (channel, segment) pairs
#[derive(Debug, Default)]
pub struct BufferManager {
    bindings: BTreeMap<BindingKey, Binding>,
    generation: u64,
}

impl BufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a single buffer for `channel`.
    ///
    /// Aggregate downsampling needs a max/min pair, use [`set_buffers`](Self::set_buffers).
    pub fn set_buffer(
        &mut self,
        session: &DeviceSession,
        channel: Channel,
        buffer: &SampleBuffer,
        mode: DownSamplingMode,
        segment: u16,
    ) -> Result<()> {
        if mode == DownSamplingMode::Aggregate {
            return Err(ScopeError::invalid(
                "aggregate downsampling requires a max/min buffer pair",
            ));
        }
        check_channel(channel)?;

        let (driver, handle) = session.live()?;
        driver
            .set_data_buffers(handle, channel, Some(buffer), None, mode)
            .map_err(ScopeError::from)?;

        self.bind(channel, segment, buffer, None, mode, false);
        Ok(())
    }

    /// Bind a max/min pair of equal length for `channel`
    pub fn set_buffers(
        &mut self,
        session: &DeviceSession,
        channel: Channel,
        max: &SampleBuffer,
        min: &SampleBuffer,
        mode: DownSamplingMode,
        segment: u16,
    ) -> Result<()> {
        check_channel(channel)?;
        if max.len() != min.len() {
            return Err(ScopeError::invalid(format!(
                "max/min buffers differ in length ({} vs {})",
                max.len(),
                min.len()
            )));
        }
        if max.same_storage(min) {
            return Err(ScopeError::invalid("max and min must be distinct buffers"));
        }

        let (driver, handle) = session.live()?;
        driver
            .set_data_buffers(handle, channel, Some(max), Some(min), mode)
            .map_err(ScopeError::from)?;

        self.bind(channel, segment, max, Some(min), mode, false);
        Ok(())
    }

    /// Bind one buffer per segment for rapid-block reads. `buffers[i]` is
    /// bound to segment `first_segment + i`; all must share one length.
    pub fn set_buffers_bulk(
        &mut self,
        session: &DeviceSession,
        channel: Channel,
        buffers: &[SampleBuffer],
        first_segment: u16,
    ) -> Result<()> {
        check_channel(channel)?;
        let Some(first) = buffers.first() else {
            return Err(ScopeError::invalid("bulk registration needs at least one buffer"));
        };
        if buffers.iter().any(|b| b.len() != first.len()) {
            return Err(ScopeError::invalid("bulk buffers must share one length"));
        }
        let last = first_segment as usize + buffers.len() - 1;
        if last > u16::MAX as usize {
            return Err(ScopeError::invalid("segment range exceeds u16"));
        }

        let (driver, handle) = session.live()?;
        for (i, buffer) in buffers.iter().enumerate() {
            let segment = first_segment + i as u16;
            driver
                .set_data_buffer_bulk(handle, channel, Some(buffer), segment)
                .map_err(ScopeError::from)?;
            self.bind(channel, segment, buffer, None, DownSamplingMode::None, true);
        }
        Ok(())
    }

    fn bind(
        &mut self,
        channel: Channel,
        segment: u16,
        max: &SampleBuffer,
        min: Option<&SampleBuffer>,
        mode: DownSamplingMode,
        bulk: bool,
    ) {
        let key = BindingKey { channel, segment };
        let binding = Binding {
            max: max.downgrade(),
            min: min.map(SampleBuffer::downgrade),
            mode,
            bulk,
            generation: self.generation,
        };
        if self.bindings.insert(key, binding).is_some() {
            trace!("Replaced buffer binding for channel {} segment {}", channel, segment);
        } else {
            trace!("Bound buffer for channel {} segment {}", channel, segment);
        }
    }

    /// Drop every binding of `channel`, e.g. after its configuration changed
    pub fn invalidate_channel(&mut self, session: &DeviceSession, channel: Channel) {
        let before = self.bindings.len();
        self.bindings.retain(|key, _| key.channel != channel);
        if before != self.bindings.len() {
            debug!(
                "Cleared {} buffer binding(s) for channel {}",
                before - self.bindings.len(),
                channel
            );
            release_driver_buffers(session, channel);
        }
    }

    /// Drop every binding, e.g. after the segment layout changed
    pub fn invalidate_all(&mut self, session: &DeviceSession) {
        if self.bindings.is_empty() {
            return;
        }
        debug!("Cleared all {} buffer binding(s)", self.bindings.len());
        let channels: Vec<Channel> = self.bindings.keys().map(|k| k.channel).collect();
        self.bindings.clear();
        self.generation += 1;
        for channel in channels {
            release_driver_buffers(session, channel);
        }
    }

    pub fn role(&self, channel: Channel, segment: u16) -> Option<BufferRole> {
        self.bindings
            .get(&BindingKey { channel, segment })
            .map(Binding::role)
    }

    pub fn is_bound(&self, channel: Channel, segment: u16) -> bool {
        self.bindings
            .get(&BindingKey { channel, segment })
            .map(|b| b.max.is_alive())
            .unwrap_or(false)
    }

    /// Upgrade every binding `req` names, failing if any is missing, stale,
    /// too short or registered for another downsampling mode
    pub fn pin(&self, req: &BufferRequirement) -> Result<PinnedBuffers> {
        let mut buffers = Vec::new();
        for &channel in &req.channels {
            for segment in req.segments.clone() {
                let key = BindingKey { channel, segment };
                let binding = self.bindings.get(&key).ok_or_else(|| {
                    ScopeError::invalid(format!(
                        "no buffer registered for channel {} segment {}",
                        channel, segment
                    ))
                })?;
                buffers.push(pin_binding(key, binding, req, self.generation)?);
            }
        }
        debug!("Pinned {} buffer binding(s)", buffers.len());
        Ok(PinnedBuffers { buffers })
    }
}

fn pin_binding(
    key: BindingKey,
    binding: &Binding,
    req: &BufferRequirement,
    generation: u64,
) -> Result<PinnedBuffer> {
    let stale = |what: &str| {
        ScopeError::invalid(format!(
            "buffer for channel {} segment {} {}",
            key.channel, key.segment, what
        ))
    };

    if binding.generation != generation {
        return Err(stale("predates the current segment layout"));
    }
    if binding.bulk != req.bulk {
        return Err(stale(if req.bulk {
            "was not registered for bulk reads"
        } else {
            "was registered for bulk reads only"
        }));
    }
    if binding.mode != req.mode {
        return Err(stale(&format!(
            "is registered for {:?} downsampling, run uses {:?}",
            binding.mode, req.mode
        )));
    }
    if req.mode == DownSamplingMode::Aggregate && binding.min.is_none() {
        return Err(stale("needs a max/min pair for aggregate downsampling"));
    }
    if binding.max.len() < req.min_len {
        return Err(stale(&format!(
            "holds {} samples, run needs {}",
            binding.max.len(),
            req.min_len
        )));
    }

    let max = binding.max.upgrade().ok_or_else(|| stale("has been dropped"))?;
    let min = match &binding.min {
        Some(weak) => Some(weak.upgrade().ok_or_else(|| stale("has been dropped"))?),
        None => None,
    };

    Ok(PinnedBuffer {
        key,
        max,
        min,
        mode: binding.mode,
    })
}

fn check_channel(channel: Channel) -> Result<()> {
    if channel.is_analog() {
        Ok(())
    } else {
        Err(ScopeError::invalid(format!(
            "channel {} does not carry sample data",
            channel
        )))
    }
}

fn release_driver_buffers(session: &DeviceSession, channel: Channel) {
    if let Ok((driver, handle)) = session.live() {
        if let Err(status) =
            driver.set_data_buffers(handle, channel, None, None, DownSamplingMode::None)
        {
            debug!(
                "Driver kept buffers for channel {}: {}",
                channel,
                crate::ffi::status_to_string(status)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimConfig, SimulatedDriver};
    use std::sync::Arc;

    fn open_session() -> DeviceSession {
        DeviceSession::open(Arc::new(SimulatedDriver::new(SimConfig::default())))
            .expect("simulated unit opens")
    }

    fn requirement(mode: DownSamplingMode, min_len: usize) -> BufferRequirement {
        BufferRequirement {
            channels: vec![Channel::A],
            segments: 0..1,
            min_len,
            mode,
            bulk: false,
        }
    }

    #[test]
    fn test_aggregate_single_buffer_rejected() {
        let session = open_session();
        let mut manager = BufferManager::new();
        let buffer = SampleBuffer::new(100);
        let err = manager
            .set_buffer(&session, Channel::A, &buffer, DownSamplingMode::Aggregate, 0)
            .unwrap_err();
        assert!(matches!(err, ScopeError::InvalidConfiguration(_)));
        assert!(!manager.is_bound(Channel::A, 0));
    }

    #[test]
    fn test_pair_length_mismatch_rejected() {
        let session = open_session();
        let mut manager = BufferManager::new();
        let max = SampleBuffer::new(100);
        let min = SampleBuffer::new(99);
        assert!(manager
            .set_buffers(&session, Channel::A, &max, &min, DownSamplingMode::Aggregate, 0)
            .is_err());
    }

    #[test]
    fn test_rebinding_replaces_previous() {
        let session = open_session();
        let mut manager = BufferManager::new();
        let first = SampleBuffer::new(10);
        let second = SampleBuffer::new(20);
        manager
            .set_buffer(&session, Channel::A, &first, DownSamplingMode::None, 0)
            .unwrap();
        manager
            .set_buffer(&session, Channel::A, &second, DownSamplingMode::None, 0)
            .unwrap();
        let pinned = manager.pin(&requirement(DownSamplingMode::None, 20)).unwrap();
        assert_eq!(pinned.len(), 1);
        assert!(pinned.iter().all(|p| p.max.same_storage(&second)));
    }

    #[test]
    fn test_pin_rejects_short_dropped_and_mismatched() {
        let session = open_session();
        let mut manager = BufferManager::new();
        let buffer = SampleBuffer::new(100);
        manager
            .set_buffer(&session, Channel::A, &buffer, DownSamplingMode::Average, 0)
            .unwrap();

        assert!(manager.pin(&requirement(DownSamplingMode::Average, 101)).is_err());
        assert!(manager.pin(&requirement(DownSamplingMode::None, 50)).is_err());
        assert!(manager.pin(&requirement(DownSamplingMode::Average, 100)).is_ok());

        drop(buffer);
        let err = manager
            .pin(&requirement(DownSamplingMode::Average, 10))
            .unwrap_err();
        assert!(matches!(err, ScopeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_invalidate_channel_clears_bindings() {
        let session = open_session();
        let mut manager = BufferManager::new();
        let a = SampleBuffer::new(10);
        let b = SampleBuffer::new(10);
        manager
            .set_buffer(&session, Channel::A, &a, DownSamplingMode::None, 0)
            .unwrap();
        manager
            .set_buffer(&session, Channel::B, &b, DownSamplingMode::None, 0)
            .unwrap();
        manager.invalidate_channel(&session, Channel::A);
        assert!(!manager.is_bound(Channel::A, 0));
        assert!(manager.is_bound(Channel::B, 0));
    }

    #[test]
    fn test_bulk_registration_covers_segments() {
        let session = open_session();
        let mut manager = BufferManager::new();
        let buffers: Vec<SampleBuffer> = (0..4).map(|_| SampleBuffer::new(64)).collect();
        manager
            .set_buffers_bulk(&session, Channel::A, &buffers, 0)
            .unwrap();
        let req = BufferRequirement {
            channels: vec![Channel::A],
            segments: 0..4,
            min_len: 64,
            mode: DownSamplingMode::None,
            bulk: true,
        };
        assert_eq!(manager.pin(&req).unwrap().len(), 4);
        assert_eq!(manager.role(Channel::A, 3), Some(BufferRole::Single));
    }

    #[test]
    fn test_pinned_buffer_outlives_caller_handle() {
        let session = open_session();
        let mut manager = BufferManager::new();
        let buffer = SampleBuffer::new(8);
        manager
            .set_buffer(&session, Channel::A, &buffer, DownSamplingMode::None, 0)
            .unwrap();
        let pinned = manager.pin(&requirement(DownSamplingMode::None, 8)).unwrap();
        drop(buffer);
        let kept = pinned.iter().next().unwrap();
        kept.max.lock()[0] = 42;
        assert_eq!(kept.max.to_vec()[0], 42);
    }
}
