//! Delivery health over a sliding window of recent outcomes.
//!
//! The gateway records every inbound delivery and outbound send here and
//! consults [`HealthMonitor::assess`] to enter or leave degraded mode.

use std::collections::VecDeque;
use std::sync::Mutex;

use conduit_config::HealthConfig;

/// What the monitor recommends for the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    Degraded,
    /// Between the two thresholds, or not enough samples yet.
    Unchanged,
}

pub struct HealthMonitor {
    window: usize,
    min_samples: usize,
    degrade_ratio: f64,
    recover_ratio: f64,
    samples: Mutex<VecDeque<bool>>,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            window: config.window.max(1),
            min_samples: config.min_samples,
            degrade_ratio: config.degrade_failure_ratio,
            recover_ratio: config.recover_failure_ratio,
            samples: Mutex::new(VecDeque::with_capacity(config.window)),
        }
    }

    pub fn record(&self, success: bool) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(success);
    }

    /// Failure ratio over the window, once `min_samples` have been seen.
    pub fn failure_ratio(&self) -> Option<f64> {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.is_empty() || samples.len() < self.min_samples {
            return None;
        }
        let failures = samples.iter().filter(|ok| !**ok).count();
        Some(failures as f64 / samples.len() as f64)
    }

    pub fn assess(&self) -> HealthVerdict {
        match self.failure_ratio() {
            Some(r) if r >= self.degrade_ratio => HealthVerdict::Degraded,
            Some(r) if r <= self.recover_ratio => HealthVerdict::Healthy,
            _ => HealthVerdict::Unchanged,
        }
    }

    pub fn reset(&self) {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(&HealthConfig {
            window: 10,
            min_samples: 4,
            degrade_failure_ratio: 0.5,
            recover_failure_ratio: 0.2,
        })
    }

    #[test]
    fn no_verdict_below_min_samples() {
        let m = monitor();
        for _ in 0..3 {
            m.record(false);
        }
        assert_eq!(m.failure_ratio(), None);
        assert_eq!(m.assess(), HealthVerdict::Unchanged);
    }

    #[test]
    fn degrades_and_recovers_with_hysteresis() {
        let m = monitor();
        for ok in [true, false, false, true] {
            m.record(ok);
        }
        assert_eq!(m.assess(), HealthVerdict::Degraded);

        // 2 failures in 7: between thresholds.
        for _ in 0..3 {
            m.record(true);
        }
        assert_eq!(m.assess(), HealthVerdict::Unchanged);

        // Window of 10 slides one early failure out.
        for _ in 0..5 {
            m.record(true);
        }
        assert_eq!(m.failure_ratio(), Some(0.1));
        assert_eq!(m.assess(), HealthVerdict::Healthy);
    }

    #[test]
    fn reset_clears_samples() {
        let m = monitor();
        for _ in 0..5 {
            m.record(false);
        }
        m.reset();
        assert_eq!(m.failure_ratio(), None);
    }
}
