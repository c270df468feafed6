//! Alert manager: pattern switching and console throttling

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use fatigue::FatigueState;

use crate::{AlertError, AlertPattern, AlertSink, LogSink};

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// When false every sink stays off; the state is still reported
    pub enabled: bool,
    /// Minimum gap between two console reports of the same state (default: 1000 ms)
    pub repeat_interval_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repeat_interval_ms: 1000,
        }
    }
}

impl AlertConfig {
    pub fn repeat_interval(&self) -> Duration {
        Duration::from_millis(self.repeat_interval_ms)
    }

    pub fn validate(&self) -> Result<(), AlertError> {
        if self.repeat_interval_ms == 0 || self.repeat_interval_ms > 600_000 {
            return Err(AlertError::Config(format!(
                "repeat_interval_ms {} outside [1, 600000]",
                self.repeat_interval_ms
            )));
        }
        Ok(())
    }
}

/// Console report bookkeeping for one state
#[derive(Debug, Clone)]
pub struct AlertState {
    /// Frame time of the last console report
    pub last_reported: Duration,
    pub report_count: usize,
}

/// Drives the sinks from the per-frame fatigue state
pub struct AlertManager {
    config: AlertConfig,
    sinks: Vec<Box<dyn AlertSink>>,
    states: HashMap<FatigueState, AlertState>,
    pattern: AlertPattern,
    /// Frame time the current pattern started
    pattern_since: Duration,
    sink_failures: u64,
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        info!("Creating alert manager with config: {:?}", config);
        Self {
            config,
            sinks: Vec::new(),
            states: HashMap::new(),
            pattern: AlertPattern::Off,
            pattern_since: Duration::ZERO,
            sink_failures: 0,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn AlertSink>) {
        info!("Alert sink registered: {}", sink.name());
        self.sinks.push(sink);
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn pattern(&self) -> AlertPattern {
        self.pattern
    }

    pub fn sink_failures(&self) -> u64 {
        self.sink_failures
    }

    /// Feed the state of the frame at `now`, returning the active pattern
    pub fn update(&mut self, state: FatigueState, now: Duration) -> AlertPattern {
        let pattern = if self.config.enabled {
            AlertPattern::for_state(state)
        } else {
            AlertPattern::Off
        };

        if pattern != self.pattern {
            debug!("Alert pattern {} -> {}", self.pattern, pattern);
            self.pattern = pattern;
            self.pattern_since = now;
            self.apply(pattern, state);
        }

        if self.should_report(state, now) {
            self.record_report(state, now);
        }
        pattern
    }

    /// Whether the buzzer should be sounding at `now` for the active pattern
    pub fn signal_on(&self, now: Duration) -> bool {
        self.pattern.is_on(now.saturating_sub(self.pattern_since))
    }

    /// Check the console throttle for `state`
    pub fn should_report(&self, state: FatigueState, now: Duration) -> bool {
        if state == FatigueState::Normal {
            return false;
        }
        match self.states.get(&state) {
            Some(s) => now.saturating_sub(s.last_reported) >= self.config.repeat_interval(),
            None => true,
        }
    }

    fn record_report(&mut self, state: FatigueState, now: Duration) {
        let entry = self.states.entry(state).or_insert(AlertState {
            last_reported: now,
            report_count: 0,
        });
        entry.last_reported = now;
        entry.report_count += 1;

        if state.is_critical() {
            warn!("[ALERT] {} (reported {} times)", state, entry.report_count);
        } else {
            info!("[ALERT] {} (reported {} times)", state, entry.report_count);
        }
    }

    pub fn report_count(&self, state: FatigueState) -> usize {
        self.states.get(&state).map(|s| s.report_count).unwrap_or(0)
    }

    /// Silence every sink and forget the report history
    pub fn clear(&mut self) {
        self.states.clear();
        if self.pattern != AlertPattern::Off {
            self.pattern = AlertPattern::Off;
            self.apply(AlertPattern::Off, FatigueState::Normal);
        }
    }

    fn apply(&mut self, pattern: AlertPattern, state: FatigueState) {
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.apply(pattern, state) {
                self.sink_failures += 1;
                warn!("{}", e);
            }
        }
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(AlertConfig::default()).with_sink(Box::new(LogSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingSink;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn manager() -> (AlertManager, RecordingSink) {
        let sink = RecordingSink::new();
        let manager = AlertManager::new(AlertConfig::default()).with_sink(Box::new(sink.clone()));
        (manager, sink)
    }

    struct Broken;

    impl AlertSink for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn apply(&mut self, _: AlertPattern, _: FatigueState) -> Result<(), AlertError> {
            Err(AlertError::Sink {
                sink: "broken".into(),
                reason: "gpio busy".into(),
            })
        }
    }

    #[test]
    fn test_sink_sees_changes_only() {
        let (mut manager, sink) = manager();
        manager.update(FatigueState::Normal, ms(0));
        manager.update(FatigueState::Attention, ms(66));
        manager.update(FatigueState::Attention, ms(133));
        manager.update(FatigueState::Microsleep, ms(200));
        manager.update(FatigueState::Normal, ms(266));

        assert_eq!(
            sink.patterns(),
            vec![
                AlertPattern::SlowIntermittent,
                AlertPattern::Continuous,
                AlertPattern::Off
            ]
        );
    }

    #[test]
    fn test_console_throttle() {
        let (mut manager, _) = manager();
        for i in 0..30 {
            manager.update(FatigueState::Alert, ms(i * 66));
        }
        // 0 .. 1914 ms: reports at 0 and 1056
        assert_eq!(manager.report_count(FatigueState::Alert), 2);
        assert_eq!(manager.report_count(FatigueState::Normal), 0);
    }

    #[test]
    fn test_throttle_is_per_state() {
        let (mut manager, _) = manager();
        manager.update(FatigueState::Attention, ms(0));
        manager.update(FatigueState::Alert, ms(100));
        manager.update(FatigueState::Attention, ms(200));
        assert_eq!(manager.report_count(FatigueState::Attention), 1);
        assert_eq!(manager.report_count(FatigueState::Alert), 1);
    }

    #[test]
    fn test_disabled_keeps_sinks_off() {
        let sink = RecordingSink::new();
        let config = AlertConfig {
            enabled: false,
            ..Default::default()
        };
        let mut manager = AlertManager::new(config).with_sink(Box::new(sink.clone()));
        assert_eq!(manager.update(FatigueState::Microsleep, ms(0)), AlertPattern::Off);
        assert!(sink.patterns().is_empty());
        assert_eq!(manager.report_count(FatigueState::Microsleep), 1);
    }

    #[test]
    fn test_signal_follows_pattern_start() {
        let (mut manager, _) = manager();
        manager.update(FatigueState::Alert, ms(10_000));
        assert!(manager.signal_on(ms(10_100)));
        assert!(!manager.signal_on(ms(10_300)));
    }

    #[test]
    fn test_sink_failure_is_counted() {
        let sink = RecordingSink::new();
        let mut manager = AlertManager::new(AlertConfig::default())
            .with_sink(Box::new(Broken))
            .with_sink(Box::new(sink.clone()));
        manager.update(FatigueState::Alert, ms(0));
        assert_eq!(manager.sink_failures(), 1);
        assert_eq!(sink.last(), Some(AlertPattern::FastIntermittent));
    }

    #[test]
    fn test_clear_silences() {
        let (mut manager, sink) = manager();
        manager.update(FatigueState::Microsleep, ms(0));
        manager.clear();
        assert_eq!(sink.last(), Some(AlertPattern::Off));
        assert_eq!(manager.report_count(FatigueState::Microsleep), 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(AlertConfig::default().validate().is_ok());
        let bad = AlertConfig {
            repeat_interval_ms: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
