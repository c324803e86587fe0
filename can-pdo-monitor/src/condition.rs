//! Start and end conditions for data logs
//!
//! A condition is a small state machine fed one datapoint at a time:
//!
//! ```text
//! Idle --check--> Armed --predicate holds--> Triggered
//!   ^                                            |
//!   +------------------- reset ------------------+
//! ```
//!
//! Triggered is sticky: further checks keep returning `true` until `reset`.

use crate::types::Datapoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionState {
    /// Not checked since construction or reset
    Idle,
    /// Checked at least once, not yet triggered
    Armed,
    Triggered,
}

/// Transition a [`TriggerCondition`] fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    /// From below the threshold to at or above it
    Rising,
    /// From above the threshold to at or below it
    Falling,
    /// From any other value to exactly the threshold
    Equal,
    /// Rising or falling
    Either,
}

/// Triggers on the `target`-th counted datapoint
#[derive(Debug, Clone, PartialEq)]
pub struct CountCondition {
    target: u64,
    signal: Option<String>,
    count: u64,
    state: ConditionState,
}

impl CountCondition {
    /// Count every datapoint
    pub fn new(target: u64) -> Self {
        Self {
            target,
            signal: None,
            count: 0,
            state: ConditionState::Idle,
        }
    }

    /// Count only datapoints of one signal
    pub fn for_signal(target: u64, signal: impl Into<String>) -> Self {
        Self {
            signal: Some(signal.into()),
            ..Self::new(target)
        }
    }

    pub fn check(&mut self, datapoint: &Datapoint) -> bool {
        if self.state == ConditionState::Triggered {
            return true;
        }
        self.state = ConditionState::Armed;

        let counted = self
            .signal
            .as_deref()
            .map_or(true, |name| name == datapoint.name);
        if counted {
            self.count += 1;
        }

        if self.count >= self.target {
            self.state = ConditionState::Triggered;
        }
        self.state == ConditionState::Triggered
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.state = ConditionState::Idle;
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Triggers once a duration has elapsed, measured on datapoint timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct TimeCondition {
    duration: Duration,
    start_at_zero: bool,
    origin: Option<Duration>,
    state: ConditionState,
}

impl TimeCondition {
    /// Timer starts at the first check
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            start_at_zero: false,
            origin: None,
            state: ConditionState::Idle,
        }
    }

    /// Timer starts at timestamp zero, i.e. when acquisition started
    pub fn from_zero(duration: Duration) -> Self {
        Self {
            start_at_zero: true,
            ..Self::new(duration)
        }
    }

    pub fn check(&mut self, datapoint: &Datapoint) -> bool {
        if self.state == ConditionState::Triggered {
            return true;
        }
        self.state = ConditionState::Armed;

        let start_at_zero = self.start_at_zero;
        let origin = *self.origin.get_or_insert(if start_at_zero {
            Duration::ZERO
        } else {
            datapoint.timestamp
        });

        if datapoint.timestamp.saturating_sub(origin) >= self.duration {
            self.state = ConditionState::Triggered;
        }
        self.state == ConditionState::Triggered
    }

    pub fn reset(&mut self) {
        self.origin = None;
        self.state = ConditionState::Idle;
    }
}

/// Edge trigger on one named signal
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCondition {
    signal: String,
    edge: Edge,
    threshold: f64,
    previous: Option<f64>,
    state: ConditionState,
}

impl TriggerCondition {
    pub fn new(signal: impl Into<String>, edge: Edge, threshold: f64) -> Self {
        Self {
            signal: signal.into(),
            edge,
            threshold,
            previous: None,
            state: ConditionState::Idle,
        }
    }

    /// Datapoints of other signals are ignored
    pub fn check(&mut self, datapoint: &Datapoint) -> bool {
        if self.state == ConditionState::Triggered {
            return true;
        }
        if datapoint.name != self.signal {
            return false;
        }
        self.state = ConditionState::Armed;

        let value = datapoint.value.as_f64();
        let Some(prev) = self.previous.replace(value) else {
            return false;
        };

        let t = self.threshold;
        let rising = prev < t && value >= t;
        let falling = prev > t && value <= t;
        let fired = match self.edge {
            Edge::Rising => rising,
            Edge::Falling => falling,
            Edge::Either => rising || falling,
            Edge::Equal => prev != t && value == t,
        };

        if fired {
            log::debug!(
                "Trigger on '{}' fired: {} -> {} ({:?} at {})",
                self.signal,
                prev,
                value,
                self.edge,
                t
            );
            self.state = ConditionState::Triggered;
        }
        fired
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.state = ConditionState::Idle;
    }

    pub fn signal(&self) -> &str {
        &self.signal
    }
}

/// Closed set of condition kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Count(CountCondition),
    Time(TimeCondition),
    Trigger(TriggerCondition),
}

impl Condition {
    pub fn count(target: u64) -> Self {
        Condition::Count(CountCondition::new(target))
    }

    pub fn time(duration: Duration) -> Self {
        Condition::Time(TimeCondition::new(duration))
    }

    pub fn trigger(signal: impl Into<String>, edge: Edge, threshold: f64) -> Self {
        Condition::Trigger(TriggerCondition::new(signal, edge, threshold))
    }

    /// Feed one datapoint; true once the condition has triggered
    pub fn check(&mut self, datapoint: &Datapoint) -> bool {
        match self {
            Condition::Count(c) => c.check(datapoint),
            Condition::Time(c) => c.check(datapoint),
            Condition::Trigger(c) => c.check(datapoint),
        }
    }

    /// Return to the idle, un-triggered state
    pub fn reset(&mut self) {
        match self {
            Condition::Count(c) => c.reset(),
            Condition::Time(c) => c.reset(),
            Condition::Trigger(c) => c.reset(),
        }
    }

    pub fn state(&self) -> ConditionState {
        match self {
            Condition::Count(c) => c.state,
            Condition::Time(c) => c.state,
            Condition::Trigger(c) => c.state,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.state() == ConditionState::Triggered
    }

    /// Signal the condition watches, if it is tied to one
    pub fn signal(&self) -> Option<&str> {
        match self {
            Condition::Count(c) => c.signal.as_deref(),
            Condition::Time(_) => None,
            Condition::Trigger(c) => Some(&c.signal),
        }
    }
}

impl From<CountCondition> for Condition {
    fn from(c: CountCondition) -> Self {
        Condition::Count(c)
    }
}

impl From<TimeCondition> for Condition {
    fn from(c: TimeCondition) -> Self {
        Condition::Time(c)
    }
}

impl From<TriggerCondition> for Condition {
    fn from(c: TriggerCondition) -> Self {
        Condition::Trigger(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalValue;

    fn point(name: &str, value: f64, millis: u64) -> Datapoint {
        Datapoint::new(name, SignalValue::Float(value), Duration::from_millis(millis))
    }

    #[test]
    fn test_count_triggers_on_third_check() {
        let mut condition = Condition::count(3);
        assert_eq!(condition.state(), ConditionState::Idle);
        assert!(!condition.check(&point("a", 0.0, 0)));
        assert_eq!(condition.state(), ConditionState::Armed);
        assert!(!condition.check(&point("a", 0.0, 1)));
        assert!(condition.check(&point("a", 0.0, 2)));
        // Sticky once triggered
        assert!(condition.check(&point("a", 0.0, 3)));

        condition.reset();
        assert_eq!(condition.state(), ConditionState::Idle);
        assert!(!condition.check(&point("a", 0.0, 4)));
        assert!(!condition.check(&point("a", 0.0, 5)));
        assert!(condition.check(&point("a", 0.0, 6)));
    }

    #[test]
    fn test_count_for_signal_ignores_others() {
        let mut condition = CountCondition::for_signal(2, "speed");
        assert!(!condition.check(&point("speed", 1.0, 0)));
        assert!(!condition.check(&point("torque", 1.0, 1)));
        assert_eq!(condition.count(), 1);
        assert!(condition.check(&point("speed", 1.0, 2)));
    }

    #[test]
    fn test_time_from_first_check() {
        let mut condition = Condition::time(Duration::from_millis(100));
        assert!(!condition.check(&point("a", 0.0, 500)));
        assert!(!condition.check(&point("a", 0.0, 599)));
        assert!(condition.check(&point("a", 0.0, 600)));

        condition.reset();
        assert!(!condition.check(&point("a", 0.0, 700)));
        assert!(condition.check(&point("a", 0.0, 800)));
    }

    #[test]
    fn test_time_from_zero() {
        let mut condition = Condition::from(TimeCondition::from_zero(Duration::from_millis(100)));
        assert!(condition.check(&point("a", 0.0, 150)));
    }

    #[test]
    fn test_rising_trigger_fires_once() {
        let mut condition = Condition::trigger("x", Edge::Rising, 10.0);
        let results: Vec<bool> = [5.0, 9.0, 12.0, 8.0]
            .iter()
            .enumerate()
            .map(|(i, v)| condition.check(&point("x", *v, i as u64)))
            .collect();

        // Fires on 9 -> 12, then stays triggered through 12 -> 8
        assert_eq!(results.iter().position(|r| *r), Some(2));
        assert!(condition.is_triggered());
    }

    #[test]
    fn test_rising_trigger_does_not_fire_on_fall() {
        let mut condition = TriggerCondition::new("x", Edge::Rising, 10.0);
        assert!(!condition.check(&point("x", 12.0, 0)));
        assert!(!condition.check(&point("x", 8.0, 1)));
        assert_eq!(condition.state, ConditionState::Armed);
    }

    #[test]
    fn test_first_sample_never_triggers() {
        let mut condition = TriggerCondition::new("x", Edge::Equal, 3.0);
        assert!(!condition.check(&point("x", 3.0, 0)));
        assert!(!condition.check(&point("x", 3.0, 1)));
        assert!(!condition.check(&point("x", 2.0, 2)));
        assert!(condition.check(&point("x", 3.0, 3)));
    }

    #[test]
    fn test_falling_and_either_edges() {
        let mut falling = TriggerCondition::new("x", Edge::Falling, 0.0);
        assert!(!falling.check(&point("x", 1.0, 0)));
        assert!(falling.check(&point("x", -1.0, 1)));

        let mut either = TriggerCondition::new("x", Edge::Either, 0.0);
        assert!(!either.check(&point("x", -1.0, 0)));
        assert!(either.check(&point("x", 0.5, 1)));

        either.reset();
        assert!(!either.check(&point("x", 1.0, 2)));
        assert!(either.check(&point("x", -1.0, 3)));
    }

    #[test]
    fn test_trigger_ignores_other_signals() {
        let mut condition = TriggerCondition::new("x", Edge::Rising, 10.0);
        assert!(!condition.check(&point("y", 0.0, 0)));
        assert_eq!(condition.state, ConditionState::Idle);
        assert!(!condition.check(&point("x", 0.0, 1)));
        assert!(!condition.check(&point("y", 100.0, 2)));
        assert!(condition.check(&point("x", 20.0, 3)));
    }
}
