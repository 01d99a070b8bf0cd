//! Trigger configuration
//!
//! Simple and advanced triggers are variants of one [`TriggerSpec`], so only
//! one of them can ever be applied. Specs are validated before anything is
//! sent to the unit.

use log::{debug, info};

use crate::channels::ChannelRegistry;
use crate::driver::TriggerDirections;
use crate::error::{Result, ScopeError};
use crate::ffi::{PWQ_CONDITIONS, TRIGGER_CHANNEL_PROPERTIES, TRIGGER_CONDITIONS};
use crate::session::DeviceSession;
use crate::types::{
    Channel, HoldOffType, PulseWidthType, ThresholdDirection, ThresholdMode, TriggerState,
};

/// Threshold and hysteresis for one trigger input, in ADC counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelThreshold {
    pub channel: Channel,
    pub upper: i16,
    pub upper_hysteresis: u16,
    pub lower: i16,
    pub lower_hysteresis: u16,
    pub mode: ThresholdMode,
}

impl ChannelThreshold {
    /// Single-level threshold
    pub fn level(channel: Channel, threshold: i16, hysteresis: u16) -> Self {
        Self {
            channel,
            upper: threshold,
            upper_hysteresis: hysteresis,
            lower: threshold,
            lower_hysteresis: hysteresis,
            mode: ThresholdMode::Level,
        }
    }

    /// Window between `lower` and `upper`
    pub fn window(channel: Channel, lower: i16, upper: i16, hysteresis: u16) -> Self {
        Self {
            channel,
            upper,
            upper_hysteresis: hysteresis,
            lower,
            lower_hysteresis: hysteresis,
            mode: ThresholdMode::Window,
        }
    }

    fn to_raw(self) -> TRIGGER_CHANNEL_PROPERTIES {
        TRIGGER_CHANNEL_PROPERTIES {
            thresholdUpper: self.upper,
            thresholdUpperHysteresis: self.upper_hysteresis,
            thresholdLower: self.lower,
            thresholdLowerHysteresis: self.lower_hysteresis,
            channel: self.channel as i32,
            thresholdMode: self.mode as i32,
        }
    }
}

/// One AND-term of an advanced trigger. Rows are ORed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerConditions {
    pub a: TriggerState,
    pub b: TriggerState,
    pub c: TriggerState,
    pub d: TriggerState,
    pub external: TriggerState,
    pub aux: TriggerState,
    pub pulse_width_qualifier: TriggerState,
}

impl TriggerConditions {
    pub fn with(mut self, channel: Channel, state: TriggerState) -> Self {
        match channel {
            Channel::A => self.a = state,
            Channel::B => self.b = state,
            Channel::C => self.c = state,
            Channel::D => self.d = state,
            Channel::External => self.external = state,
            Channel::Aux => self.aux = state,
            Channel::None => {}
        }
        self
    }

    pub fn with_pulse_width_qualifier(mut self, state: TriggerState) -> Self {
        self.pulse_width_qualifier = state;
        self
    }

    fn inputs(&self) -> [(Channel, TriggerState); 6] {
        [
            (Channel::A, self.a),
            (Channel::B, self.b),
            (Channel::C, self.c),
            (Channel::D, self.d),
            (Channel::External, self.external),
            (Channel::Aux, self.aux),
        ]
    }

    pub fn is_all_dont_care(&self) -> bool {
        self.pulse_width_qualifier == TriggerState::DontCare
            && self.inputs().iter().all(|(_, s)| *s == TriggerState::DontCare)
    }

    fn to_raw(self) -> TRIGGER_CONDITIONS {
        TRIGGER_CONDITIONS {
            channelA: self.a as i32,
            channelB: self.b as i32,
            channelC: self.c as i32,
            channelD: self.d as i32,
            external: self.external as i32,
            aux: self.aux as i32,
            pulseWidthQualifier: self.pulse_width_qualifier as i32,
        }
    }
}

/// Input states that gate the pulse-width qualifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PwqConditions {
    pub a: TriggerState,
    pub b: TriggerState,
    pub c: TriggerState,
    pub d: TriggerState,
    pub external: TriggerState,
    pub aux: TriggerState,
}

impl PwqConditions {
    pub fn with(mut self, channel: Channel, state: TriggerState) -> Self {
        match channel {
            Channel::A => self.a = state,
            Channel::B => self.b = state,
            Channel::C => self.c = state,
            Channel::D => self.d = state,
            Channel::External => self.external = state,
            Channel::Aux => self.aux = state,
            Channel::None => {}
        }
        self
    }

    pub fn is_all_dont_care(&self) -> bool {
        [self.a, self.b, self.c, self.d, self.external, self.aux]
            .iter()
            .all(|s| *s == TriggerState::DontCare)
    }

    fn to_raw(self) -> PWQ_CONDITIONS {
        PWQ_CONDITIONS {
            channelA: self.a as i32,
            channelB: self.b as i32,
            channelC: self.c as i32,
            channelD: self.d as i32,
            external: self.external as i32,
            aux: self.aux as i32,
        }
    }
}

/// Pulse-width qualifier. Bounds are in samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseWidthQualifier {
    pub conditions: Vec<PwqConditions>,
    pub direction: ThresholdDirection,
    pub lower: u32,
    pub upper: u32,
    pub kind: PulseWidthType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleTrigger {
    pub channel: Channel,
    /// ADC counts
    pub threshold: i16,
    pub direction: ThresholdDirection,
    /// Samples between the trigger event and the first recorded sample
    pub delay: u32,
    /// 0 waits forever
    pub auto_trigger_ms: i16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvancedTrigger {
    pub properties: Vec<ChannelThreshold>,
    pub conditions: Vec<TriggerConditions>,
    pub directions: TriggerDirections,
    pub pulse_width_qualifier: Option<PulseWidthQualifier>,
    pub delay: u32,
    pub aux_output_enable: bool,
    pub auto_trigger_ms: i32,
}

impl Default for AdvancedTrigger {
    fn default() -> Self {
        Self {
            properties: Vec::new(),
            conditions: Vec::new(),
            directions: TriggerDirections::default(),
            pulse_width_qualifier: None,
            delay: 0,
            aux_output_enable: false,
            auto_trigger_ms: 0,
        }
    }
}

/// The trigger applied to the unit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TriggerSpec {
    #[default]
    Disabled,
    Simple(SimpleTrigger),
    Advanced(AdvancedTrigger),
}

impl TriggerSpec {
    /// Rising-edge trigger without delay or auto-trigger
    pub fn rising(channel: Channel, threshold: i16) -> Self {
        TriggerSpec::Simple(SimpleTrigger {
            channel,
            threshold,
            direction: ThresholdDirection::Rising,
            delay: 0,
            auto_trigger_ms: 0,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, TriggerSpec::Disabled)
    }

    pub fn validate(&self, registry: &ChannelRegistry) -> Result<()> {
        match self {
            TriggerSpec::Disabled => Ok(()),
            TriggerSpec::Simple(simple) => {
                check_source(registry, simple.channel)?;
                if !simple.direction.is_simple() {
                    return Err(ScopeError::invalid(format!(
                        "{:?} is not a simple trigger direction",
                        simple.direction
                    )));
                }
                Ok(())
            }
            TriggerSpec::Advanced(advanced) => validate_advanced(registry, advanced),
        }
    }
}

fn check_source(registry: &ChannelRegistry, channel: Channel) -> Result<()> {
    let fitted = registry.capabilities().has_channel(channel);
    if fitted || channel == Channel::External {
        Ok(())
    } else {
        Err(ScopeError::invalid(format!("{} cannot be a trigger source", channel)))
    }
}

fn validate_advanced(registry: &ChannelRegistry, advanced: &AdvancedTrigger) -> Result<()> {
    if advanced.conditions.is_empty() {
        return Err(ScopeError::invalid("advanced trigger needs at least one condition"));
    }
    for property in &advanced.properties {
        check_source(registry, property.channel)?;
        if property.mode == ThresholdMode::Window && property.lower > property.upper {
            return Err(ScopeError::invalid(format!(
                "window on {} has lower {} above upper {}",
                property.channel, property.lower, property.upper
            )));
        }
    }

    for (i, row) in advanced.conditions.iter().enumerate() {
        if row.is_all_dont_care() {
            return Err(ScopeError::invalid(format!(
                "condition {} does not care about any input",
                i
            )));
        }
        for (channel, state) in row.inputs() {
            let has_property = advanced.properties.iter().any(|p| p.channel == channel);
            if state != TriggerState::DontCare && !has_property {
                return Err(ScopeError::invalid(format!(
                    "condition {} uses {} which has no threshold",
                    i, channel
                )));
            }
        }
        if row.pulse_width_qualifier != TriggerState::DontCare && advanced.pulse_width_qualifier.is_none() {
            return Err(ScopeError::invalid(format!(
                "condition {} uses the pulse-width qualifier but none is configured",
                i
            )));
        }
    }

    if let Some(pwq) = &advanced.pulse_width_qualifier {
        if pwq.kind == PulseWidthType::None {
            return Err(ScopeError::invalid("pulse-width qualifier needs a comparison type"));
        }
        let ranged = matches!(pwq.kind, PulseWidthType::InRange | PulseWidthType::OutOfRange);
        if ranged && pwq.lower > pwq.upper {
            return Err(ScopeError::invalid(format!(
                "pulse-width window [{}, {}] is inverted",
                pwq.lower, pwq.upper
            )));
        }
        if pwq.conditions.is_empty() || pwq.conditions.iter().any(PwqConditions::is_all_dont_care) {
            return Err(ScopeError::invalid(
                "pulse-width qualifier conditions must each name an input",
            ));
        }
    }
    Ok(())
}

/// Which trigger stages the unit reports as enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerStatus {
    pub trigger: bool,
    pub pulse_width_qualifier: bool,
}

/// Applied trigger state of one session
#[derive(Debug, Default)]
pub struct TriggerConfig {
    applied: TriggerSpec,
    within_pre_trigger: bool,
    hold_off: u64,
}

impl TriggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and apply `spec`, replacing whatever was applied before
    pub fn apply(&mut self, session: &DeviceSession, registry: &ChannelRegistry, spec: TriggerSpec) -> Result<()> {
        spec.validate(registry)?;
        let (driver, handle) = session.live()?;

        match &spec {
            TriggerSpec::Disabled => {
                driver
                    .set_simple_trigger(handle, false, Channel::A, 0, ThresholdDirection::NONE, 0, 0)
                    .map_err(ScopeError::from)?;
                driver
                    .set_pulse_width_qualifier(handle, &[], ThresholdDirection::NONE, 0, 0, PulseWidthType::None)
                    .map_err(ScopeError::from)?;
            }
            TriggerSpec::Simple(simple) => {
                driver
                    .set_pulse_width_qualifier(handle, &[], ThresholdDirection::NONE, 0, 0, PulseWidthType::None)
                    .map_err(ScopeError::from)?;
                driver
                    .set_simple_trigger(
                        handle,
                        true,
                        simple.channel,
                        simple.threshold,
                        simple.direction,
                        simple.delay,
                        simple.auto_trigger_ms,
                    )
                    .map_err(ScopeError::from)?;
            }
            TriggerSpec::Advanced(advanced) => {
                let properties: Vec<_> = advanced.properties.iter().map(|p| p.to_raw()).collect();
                let conditions: Vec<_> = advanced.conditions.iter().map(|c| c.to_raw()).collect();
                driver
                    .set_trigger_channel_properties(
                        handle,
                        &properties,
                        advanced.aux_output_enable,
                        advanced.auto_trigger_ms,
                    )
                    .map_err(ScopeError::from)?;
                driver
                    .set_trigger_channel_conditions(handle, &conditions)
                    .map_err(ScopeError::from)?;
                driver
                    .set_trigger_channel_directions(handle, &advanced.directions)
                    .map_err(ScopeError::from)?;
                driver
                    .set_trigger_delay(handle, advanced.delay)
                    .map_err(ScopeError::from)?;
                match &advanced.pulse_width_qualifier {
                    Some(pwq) => {
                        let raw: Vec<_> = pwq.conditions.iter().map(|c| c.to_raw()).collect();
                        driver
                            .set_pulse_width_qualifier(handle, &raw, pwq.direction, pwq.lower, pwq.upper, pwq.kind)
                            .map_err(ScopeError::from)?;
                    }
                    None => {
                        driver
                            .set_pulse_width_qualifier(handle, &[], ThresholdDirection::NONE, 0, 0, PulseWidthType::None)
                            .map_err(ScopeError::from)?;
                    }
                }
            }
        }

        info!("Trigger applied: {}", describe(&spec));
        self.applied = spec;
        Ok(())
    }

    /// Move the recorded window relative to the trigger event
    pub fn set_trigger_delay(&mut self, session: &DeviceSession, delay: u32) -> Result<()> {
        let (driver, handle) = session.live()?;
        driver.set_trigger_delay(handle, delay).map_err(ScopeError::from)?;
        match &mut self.applied {
            TriggerSpec::Simple(simple) => simple.delay = delay,
            TriggerSpec::Advanced(advanced) => advanced.delay = delay,
            TriggerSpec::Disabled => {}
        }
        Ok(())
    }

    /// Allow the trigger to fire on events inside the pre-trigger window
    pub fn trigger_within_pre_trigger_samples(&mut self, session: &DeviceSession, enable: bool) -> Result<()> {
        let (driver, handle) = session.live()?;
        driver
            .trigger_within_pre_trigger_samples(handle, enable)
            .map_err(ScopeError::from)?;
        self.within_pre_trigger = enable;
        Ok(())
    }

    /// Ignore further trigger events for `time` after one fires
    pub fn hold_off(&mut self, session: &DeviceSession, time: u64) -> Result<()> {
        let (driver, handle) = session.live()?;
        driver
            .hold_off(handle, time, HoldOffType::Time)
            .map_err(ScopeError::from)?;
        debug!("Trigger hold-off {}", time);
        self.hold_off = time;
        Ok(())
    }

    /// Ask the unit which stages are enabled. Either or both may be.
    pub fn is_trigger_enabled(&self, session: &DeviceSession) -> Result<TriggerStatus> {
        let (driver, handle) = session.live()?;
        let (trigger, pulse_width_qualifier) = driver
            .is_trigger_or_pwq_enabled(handle)
            .map_err(ScopeError::from)?;
        Ok(TriggerStatus {
            trigger,
            pulse_width_qualifier,
        })
    }

    pub fn applied(&self) -> &TriggerSpec {
        &self.applied
    }

    pub fn within_pre_trigger(&self) -> bool {
        self.within_pre_trigger
    }

    pub fn hold_off_time(&self) -> u64 {
        self.hold_off
    }
}

fn describe(spec: &TriggerSpec) -> String {
    match spec {
        TriggerSpec::Disabled => "disabled".to_string(),
        TriggerSpec::Simple(s) => format!("{:?} on {} at {}", s.direction, s.channel, s.threshold),
        TriggerSpec::Advanced(a) => format!(
            "{} condition(s), {} threshold(s), pwq={}",
            a.conditions.len(),
            a.properties.len(),
            a.pulse_width_qualifier.is_some()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelConfig;
    use crate::driver::sim::{SimConfig, SimulatedDriver};
    use crate::types::{Model, Range};
    use std::sync::Arc;

    fn setup() -> (DeviceSession, ChannelRegistry) {
        let session =
            DeviceSession::open(Arc::new(SimulatedDriver::new(SimConfig::for_model(Model::Ps4424)))).unwrap();
        let mut registry = ChannelRegistry::open(&session).unwrap();
        registry
            .set_channel(&session, ChannelConfig::new(Channel::A, Range::V2))
            .unwrap();
        (session, registry)
    }

    fn advanced_on_a() -> AdvancedTrigger {
        let mut directions = TriggerDirections::default();
        directions.set(Channel::A, ThresholdDirection::Rising);
        AdvancedTrigger {
            properties: vec![ChannelThreshold::level(Channel::A, 1000, 256)],
            conditions: vec![TriggerConditions::default().with(Channel::A, TriggerState::True)],
            directions,
            ..AdvancedTrigger::default()
        }
    }

    #[test]
    fn test_simple_trigger_reports_enabled() {
        let (session, registry) = setup();
        let mut trigger = TriggerConfig::new();
        trigger
            .apply(&session, &registry, TriggerSpec::rising(Channel::A, 0))
            .unwrap();
        let status = trigger.is_trigger_enabled(&session).unwrap();
        assert!(status.trigger);
        assert!(!status.pulse_width_qualifier);

        trigger.apply(&session, &registry, TriggerSpec::Disabled).unwrap();
        assert!(!trigger.is_trigger_enabled(&session).unwrap().trigger);
    }

    #[test]
    fn test_simple_rejects_window_only_direction() {
        let (session, registry) = setup();
        let mut trigger = TriggerConfig::new();
        let spec = TriggerSpec::Simple(SimpleTrigger {
            channel: Channel::A,
            threshold: 0,
            direction: ThresholdDirection::PositiveRunt,
            delay: 0,
            auto_trigger_ms: 0,
        });
        assert!(matches!(
            trigger.apply(&session, &registry, spec),
            Err(ScopeError::InvalidConfiguration(_))
        ));
        assert_eq!(trigger.applied(), &TriggerSpec::Disabled);
    }

    #[test]
    fn test_all_dont_care_row_rejected() {
        let (session, registry) = setup();
        let mut trigger = TriggerConfig::new();
        let mut advanced = advanced_on_a();
        advanced.conditions.push(TriggerConditions::default());
        assert!(matches!(
            trigger.apply(&session, &registry, TriggerSpec::Advanced(advanced)),
            Err(ScopeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_pwq_window_must_be_ordered() {
        let (session, registry) = setup();
        let mut trigger = TriggerConfig::new();
        let mut advanced = advanced_on_a();
        advanced.conditions[0] = advanced.conditions[0].with_pulse_width_qualifier(TriggerState::True);
        advanced.pulse_width_qualifier = Some(PulseWidthQualifier {
            conditions: vec![PwqConditions::default().with(Channel::A, TriggerState::True)],
            direction: ThresholdDirection::Rising,
            lower: 200,
            upper: 100,
            kind: PulseWidthType::InRange,
        });
        assert!(matches!(
            trigger.apply(&session, &registry, TriggerSpec::Advanced(advanced.clone())),
            Err(ScopeError::InvalidConfiguration(_))
        ));

        if let Some(pwq) = advanced.pulse_width_qualifier.as_mut() {
            pwq.lower = 50;
        }
        trigger
            .apply(&session, &registry, TriggerSpec::Advanced(advanced))
            .unwrap();
        let status = trigger.is_trigger_enabled(&session).unwrap();
        assert!(status.trigger && status.pulse_width_qualifier);
    }

    #[test]
    fn test_condition_needs_threshold() {
        let (session, registry) = setup();
        let mut trigger = TriggerConfig::new();
        let mut advanced = advanced_on_a();
        advanced.conditions[0] = advanced.conditions[0].with(Channel::B, TriggerState::False);
        assert!(matches!(
            trigger.apply(&session, &registry, TriggerSpec::Advanced(advanced)),
            Err(ScopeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_simple_replaces_advanced() {
        let (session, registry) = setup();
        let mut trigger = TriggerConfig::new();
        trigger
            .apply(&session, &registry, TriggerSpec::Advanced(advanced_on_a()))
            .unwrap();
        trigger
            .apply(&session, &registry, TriggerSpec::rising(Channel::A, 100))
            .unwrap();
        assert!(matches!(trigger.applied(), TriggerSpec::Simple(_)));
        trigger.set_trigger_delay(&session, 50).unwrap();
        match trigger.applied() {
            TriggerSpec::Simple(s) => assert_eq!(s.delay, 50),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_hold_off_and_pre_trigger_flags() {
        let (session, _registry) = setup();
        let mut trigger = TriggerConfig::new();
        trigger.hold_off(&session, 1_000).unwrap();
        trigger.trigger_within_pre_trigger_samples(&session, true).unwrap();
        assert_eq!(trigger.hold_off_time(), 1_000);
        assert!(trigger.within_pre_trigger());
    }
}
