//! Channel and range registry
//!
//! Holds the last configuration applied to each analog input and validates
//! new configurations against a [`CapabilityTable`] read from the unit at
//! open. Unsupported combinations are rejected, never clamped.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::error::{Result, ScopeError};
use crate::ffi::PICO_INVALID_CHANNEL;
use crate::session::DeviceSession;
use crate::types::{Channel, ChannelInfo, Coupling, FrequencyCounterRange, Probe, Range};

/// Last-applied settings of one analog channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub channel: Channel,
    pub enabled: bool,
    pub coupling: Coupling,
    pub range: Range,
    pub bandwidth_filter: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel: Channel::A,
            enabled: true,
            coupling: Coupling::Dc,
            range: Range::V5,
            bandwidth_filter: false,
        }
    }
}

impl ChannelConfig {
    /// Enabled, DC coupled, no bandwidth filter
    pub fn new(channel: Channel, range: Range) -> Self {
        Self {
            channel,
            range,
            ..Self::default()
        }
    }

    pub fn disabled(channel: Channel) -> Self {
        Self {
            channel,
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_coupling(mut self, coupling: Coupling) -> Self {
        self.coupling = coupling;
        self
    }

    pub fn with_bandwidth_filter(mut self, enable: bool) -> Self {
        self.bandwidth_filter = enable;
        self
    }
}

/// Frequency counter settings. Thresholds are ADC counts with `minor < major`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyCounter {
    pub channel: Channel,
    pub enabled: bool,
    pub range: FrequencyCounterRange,
    pub threshold_major: i16,
    pub threshold_minor: i16,
}

/// Legal ranges per (channel, probe), as reported by the unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityTable {
    channels: Vec<Channel>,
    probes: Vec<Probe>,
    ranges: BTreeMap<(Channel, Probe), Vec<Range>>,
    resistances: BTreeMap<Channel, Vec<Range>>,
}

impl CapabilityTable {
    /// Build the table from channel-information queries
    pub fn query(session: &DeviceSession) -> Result<Self> {
        let (driver, handle) = session.live()?;
        let mut table = CapabilityTable::default();

        for channel in Channel::ANALOG {
            let probes = match driver.get_channel_information(handle, ChannelInfo::Probes, Probe::None, channel) {
                Ok(raw) => raw,
                // Channel not fitted on this variant
                Err(PICO_INVALID_CHANNEL) => break,
                Err(status) => return Err(status.into()),
            };
            let probes: Vec<Probe> = probes.into_iter().filter_map(Probe::from_raw).collect();

            for &probe in &probes {
                let ranges = driver
                    .get_channel_information(handle, ChannelInfo::Ranges, probe, channel)
                    .map_err(ScopeError::from)?;
                table
                    .ranges
                    .insert((channel, probe), ranges.into_iter().filter_map(Range::from_raw).collect());
            }

            let resistances = driver
                .get_channel_information(handle, ChannelInfo::Resistances, Probe::None, channel)
                .map_err(ScopeError::from)?;
            table
                .resistances
                .insert(channel, resistances.into_iter().filter_map(Range::from_raw).collect());

            if table.probes.is_empty() {
                table.probes = probes;
            }
            table.channels.push(channel);
        }

        if table.channels.is_empty() {
            return Err(ScopeError::capability("unit reports no analog channels"));
        }
        info!(
            "Capability table: {} channel(s), {} probe type(s)",
            table.channels.len(),
            table.probes.len()
        );
        Ok(table)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        self.channels.contains(&channel)
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    /// Voltage ranges legal for `channel` with `probe` attached
    pub fn ranges(&self, channel: Channel, probe: Probe) -> &[Range] {
        self.ranges
            .get(&(channel, probe))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn resistances(&self, channel: Channel) -> &[Range] {
        self.resistances
            .get(&channel)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `range` may be selected on `channel` with `probe` attached
    pub fn supports(&self, channel: Channel, probe: Probe, range: Range) -> bool {
        if range.is_resistance() {
            probe == Probe::None && self.resistances(channel).contains(&range)
        } else {
            self.ranges(channel, probe).contains(&range)
        }
    }
}

/// Per-channel configuration state of one session
#[derive(Debug)]
pub struct ChannelRegistry {
    capabilities: CapabilityTable,
    configs: BTreeMap<Channel, ChannelConfig>,
    probe: Probe,
    ext_range: Option<Range>,
    frequency_counter: Option<FrequencyCounter>,
    generation: u64,
}

impl ChannelRegistry {
    /// Read capabilities and start from a known state with every input off
    pub fn open(session: &DeviceSession) -> Result<Self> {
        let capabilities = CapabilityTable::query(session)?;
        let (driver, handle) = session.live()?;
        let mut configs = BTreeMap::new();
        for &channel in capabilities.channels() {
            let range = capabilities
                .ranges(channel, Probe::None)
                .last()
                .copied()
                .unwrap_or(Range::V5);
            let config = ChannelConfig {
                range,
                ..ChannelConfig::disabled(channel)
            };
            driver
                .set_channel(handle, channel, false, true, range)
                .map_err(ScopeError::from)?;
            configs.insert(channel, config);
        }
        Ok(Self {
            capabilities,
            configs,
            probe: Probe::None,
            ext_range: None,
            frequency_counter: None,
            generation: 0,
        })
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Check `config` against the capability table without touching the unit
    pub fn validate(&self, config: &ChannelConfig) -> Result<()> {
        if !self.capabilities.has_channel(config.channel) {
            return Err(ScopeError::capability(format!(
                "unit has no analog channel {}",
                config.channel
            )));
        }
        if config.enabled && !self.capabilities.supports(config.channel, self.probe, config.range) {
            return Err(ScopeError::capability(format!(
                "range {:?} not available on channel {} with probe {:?}",
                config.range, config.channel, self.probe
            )));
        }
        Ok(())
    }

    /// Apply a channel configuration.
    ///
    /// Any change bumps the generation, which invalidates the resolved
    /// timebase and the buffers bound to this channel.
    pub fn set_channel(&mut self, session: &DeviceSession, config: ChannelConfig) -> Result<()> {
        self.validate(&config)?;
        let (driver, handle) = session.live()?;
        driver
            .set_channel(
                handle,
                config.channel,
                config.enabled,
                config.coupling == Coupling::Dc,
                config.range,
            )
            .map_err(ScopeError::from)?;

        let previous_filter = self
            .configs
            .get(&config.channel)
            .map(|c| c.bandwidth_filter)
            .unwrap_or(false);
        if config.bandwidth_filter || previous_filter {
            driver
                .set_bw_filter(handle, config.channel, config.bandwidth_filter)
                .map_err(ScopeError::from)?;
        }

        debug!(
            "Channel {}: enabled={} {:?} {:?} bw_filter={}",
            config.channel, config.enabled, config.coupling, config.range, config.bandwidth_filter
        );
        self.configs.insert(config.channel, config);
        self.generation += 1;
        Ok(())
    }

    pub fn set_bandwidth_filter(&mut self, session: &DeviceSession, channel: Channel, enable: bool) -> Result<()> {
        if !self.capabilities.has_channel(channel) {
            return Err(ScopeError::capability(format!("unit has no analog channel {}", channel)));
        }
        let (driver, handle) = session.live()?;
        driver.set_bw_filter(handle, channel, enable).map_err(ScopeError::from)?;
        if let Some(config) = self.configs.get_mut(&channel) {
            config.bandwidth_filter = enable;
        }
        self.generation += 1;
        Ok(())
    }

    /// Attach a probe type, which constrains the legal range set
    pub fn set_probe(&mut self, session: &DeviceSession, probe: Probe, range: Range) -> Result<()> {
        if !self.capabilities.probes().contains(&probe) {
            return Err(ScopeError::capability(format!("probe {:?} not supported", probe)));
        }
        let resistance_enabled = self
            .configs
            .values()
            .any(|c| c.enabled && c.range.is_resistance());
        if probe != Probe::None && resistance_enabled {
            return Err(ScopeError::capability(
                "resistance ranges cannot be combined with a probe",
            ));
        }
        let legal = self
            .capabilities
            .channels()
            .iter()
            .any(|&ch| self.capabilities.ranges(ch, probe).contains(&range));
        if !legal {
            return Err(ScopeError::capability(format!(
                "range {:?} not available with probe {:?}",
                range, probe
            )));
        }
        // Enabled inputs must stay within the new probe's range set
        if let Some(stale) = self.configs.values().find(|c| {
            c.enabled && c.channel.is_analog() && !self.capabilities.supports(c.channel, probe, c.range)
        }) {
            return Err(ScopeError::capability(format!(
                "channel {} is set to {:?}, not available with probe {:?}",
                stale.channel, stale.range, probe
            )));
        }

        let (driver, handle) = session.live()?;
        driver.set_probe(handle, probe, range).map_err(ScopeError::from)?;
        info!("Probe set to {:?}", probe);
        self.probe = probe;
        self.generation += 1;
        Ok(())
    }

    /// Probe currently reported by the unit
    pub fn get_probe(&self, session: &DeviceSession) -> Result<Probe> {
        let (driver, handle) = session.live()?;
        driver.get_probe(handle).map_err(ScopeError::from)
    }

    /// Raw channel-information query (range, resistance or probe codes)
    pub fn channel_information(
        &self,
        session: &DeviceSession,
        info: ChannelInfo,
        probe: Probe,
        channel: Channel,
    ) -> Result<Vec<i32>> {
        let (driver, handle) = session.live()?;
        driver
            .get_channel_information(handle, info, probe, channel)
            .map_err(ScopeError::from)
    }

    /// Select the external trigger input range, which also counts as an
    /// enabled input for arming
    pub fn set_ext_trigger_range(&mut self, session: &DeviceSession, range: Range) -> Result<()> {
        if range.is_resistance() {
            return Err(ScopeError::invalid("external input has no resistance ranges"));
        }
        let (driver, handle) = session.live()?;
        driver.set_ext_trigger_range(handle, range).map_err(ScopeError::from)?;
        self.ext_range = Some(range);
        Ok(())
    }

    pub fn set_frequency_counter(&mut self, session: &DeviceSession, counter: FrequencyCounter) -> Result<()> {
        if !self.capabilities.has_channel(counter.channel) {
            return Err(ScopeError::capability(format!(
                "unit has no analog channel {}",
                counter.channel
            )));
        }
        if counter.enabled && counter.threshold_minor >= counter.threshold_major {
            return Err(ScopeError::invalid(format!(
                "frequency counter thresholds need minor < major, got {} >= {}",
                counter.threshold_minor, counter.threshold_major
            )));
        }
        let (driver, handle) = session.live()?;
        driver
            .set_frequency_counter(
                handle,
                counter.channel,
                counter.enabled,
                counter.range,
                counter.threshold_major,
                counter.threshold_minor,
            )
            .map_err(ScopeError::from)?;
        self.frequency_counter = counter.enabled.then_some(counter);
        Ok(())
    }

    pub fn frequency_counter(&self) -> Option<&FrequencyCounter> {
        self.frequency_counter.as_ref()
    }

    pub fn config(&self, channel: Channel) -> Option<&ChannelConfig> {
        self.configs.get(&channel)
    }

    pub fn probe(&self) -> Probe {
        self.probe
    }

    pub fn ext_trigger_range(&self) -> Option<Range> {
        self.ext_range
    }

    pub fn enabled_channels(&self) -> Vec<Channel> {
        self.configs
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.channel)
            .collect()
    }

    /// At least one analog channel or the external input is enabled
    pub fn has_enabled_input(&self) -> bool {
        self.ext_range.is_some() || self.configs.values().any(|c| c.enabled)
    }

    /// Incremented on every configuration change
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimConfig, SimulatedDriver};
    use crate::types::Model;
    use std::sync::Arc;

    fn open(model: Model) -> (DeviceSession, ChannelRegistry) {
        let session =
            DeviceSession::open(Arc::new(SimulatedDriver::new(SimConfig::for_model(model)))).unwrap();
        let registry = ChannelRegistry::open(&session).unwrap();
        (session, registry)
    }

    #[test]
    fn test_capability_table_matches_variant() {
        let (_session, registry) = open(Model::Ps4424);
        let caps = registry.capabilities();
        assert_eq!(caps.channels(), &Channel::ANALOG);
        assert!(caps.supports(Channel::D, Probe::None, Range::V100));
        assert!(caps.supports(Channel::A, Probe::None, Range::R1k));
        assert!(!caps.supports(Channel::A, Probe::CurrentClamp10A, Range::R1k));

        let (_session, registry) = open(Model::Ps4262);
        let caps = registry.capabilities();
        assert_eq!(caps.channels(), &[Channel::A, Channel::B]);
        assert!(caps.supports(Channel::A, Probe::None, Range::Mv10));
        assert!(!caps.supports(Channel::A, Probe::None, Range::V50));
    }

    #[test]
    fn test_starts_with_inputs_disabled() {
        let (_session, registry) = open(Model::Ps4224);
        assert!(registry.enabled_channels().is_empty());
        assert!(!registry.has_enabled_input());
    }

    #[test]
    fn test_unsupported_range_is_rejected_not_clamped() {
        let (session, mut registry) = open(Model::Ps4226);
        let err = registry
            .set_channel(&session, ChannelConfig::new(Channel::A, Range::V100))
            .unwrap_err();
        assert!(matches!(err, ScopeError::Capability(_)));
        assert!(!registry.config(Channel::A).unwrap().enabled);
        assert_eq!(registry.generation(), 0);
    }

    #[test]
    fn test_missing_channel_is_capability_error() {
        let (session, mut registry) = open(Model::Ps4224);
        let err = registry
            .set_channel(&session, ChannelConfig::new(Channel::C, Range::V2))
            .unwrap_err();
        assert!(matches!(err, ScopeError::Capability(_)));
    }

    #[test]
    fn test_set_channel_bumps_generation() {
        let (session, mut registry) = open(Model::Ps4224);
        registry
            .set_channel(&session, ChannelConfig::new(Channel::A, Range::V2))
            .unwrap();
        assert_eq!(registry.generation(), 1);
        assert_eq!(registry.enabled_channels(), vec![Channel::A]);
    }

    #[test]
    fn test_probe_constrains_ranges() {
        let (session, mut registry) = open(Model::Ps4224);
        registry
            .set_probe(&session, Probe::CurrentClamp10A, Range::V1)
            .unwrap();
        assert_eq!(registry.get_probe(&session).unwrap(), Probe::CurrentClamp10A);
        let err = registry
            .set_channel(&session, ChannelConfig::new(Channel::A, Range::V100))
            .unwrap_err();
        assert!(matches!(err, ScopeError::Capability(_)));

        let err = registry
            .set_probe(&session, Probe::OpticalSwitch, Range::V1)
            .unwrap_err();
        assert!(matches!(err, ScopeError::Capability(_)));
    }

    #[test]
    fn test_probe_rejected_when_enabled_range_falls_outside() {
        let (session, mut registry) = open(Model::Ps4224);
        registry
            .set_channel(&session, ChannelConfig::new(Channel::A, Range::V20))
            .unwrap();
        let generation = registry.generation();

        let err = registry
            .set_probe(&session, Probe::CurrentClamp10A, Range::V1)
            .unwrap_err();
        assert!(matches!(err, ScopeError::Capability(_)));
        assert_eq!(registry.probe(), Probe::None);
        assert_eq!(registry.get_probe(&session).unwrap(), Probe::None);
        assert_eq!(registry.generation(), generation);

        // Bringing the channel into the clamp's range set makes it legal
        registry
            .set_channel(&session, ChannelConfig::new(Channel::A, Range::V2))
            .unwrap();
        registry
            .set_probe(&session, Probe::CurrentClamp10A, Range::V1)
            .unwrap();
        assert_eq!(registry.probe(), Probe::CurrentClamp10A);
    }

    #[test]
    fn test_bandwidth_filter_only_where_fitted() {
        let (session, mut registry) = open(Model::Ps4262);
        registry
            .set_bandwidth_filter(&session, Channel::A, true)
            .unwrap();
        assert!(registry.config(Channel::A).unwrap().bandwidth_filter);

        let (session, mut registry) = open(Model::Ps4224);
        let err = registry
            .set_bandwidth_filter(&session, Channel::A, true)
            .unwrap_err();
        assert!(matches!(err, ScopeError::Capability(_)));
    }

    #[test]
    fn test_external_input_counts_as_enabled() {
        let (session, mut registry) = open(Model::Ps4224);
        registry.set_ext_trigger_range(&session, Range::V5).unwrap();
        assert!(registry.has_enabled_input());
    }

    #[test]
    fn test_frequency_counter_thresholds() {
        let (session, mut registry) = open(Model::Ps4224);
        let mut counter = FrequencyCounter {
            channel: Channel::A,
            enabled: true,
            range: FrequencyCounterRange::Khz20,
            threshold_major: 100,
            threshold_minor: 200,
        };
        assert!(matches!(
            registry.set_frequency_counter(&session, counter),
            Err(ScopeError::InvalidConfiguration(_))
        ));
        counter.threshold_minor = -100;
        registry.set_frequency_counter(&session, counter).unwrap();
        assert_eq!(registry.frequency_counter(), Some(&counter));
    }
}
