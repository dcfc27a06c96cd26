//! Tunable knobs for the history facade and analyzers.
//!
//! Defaults follow field-proven values for UI-thread monitoring; every
//! constructor that takes a config validates it up front so misconfiguration
//! surfaces at startup rather than as silent misbehavior at runtime.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: i64 },
}

fn positive(name: &'static str, value: i64) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { name, value })
    }
}

/// Configuration for the recording facade.
#[derive(Clone, Debug)]
pub struct HistoryConfig {
    /// Slots in the record ring buffer. 1M slots is ~8 MiB and covers
    /// minutes of dense instrumentation before wrapping.
    pub recorder_capacity: usize,
    /// Merged ranges retained before FIFO eviction.
    pub merger_capacity: usize,
    /// Largest idle gap (ms) across which adjacent dispatches still merge.
    pub idle_threshold_millis: i64,
    /// Largest combined wall duration (ms) a merged range may reach.
    pub merge_threshold_millis: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            recorder_capacity: 1_000_000,
            merger_capacity: 2_000,
            idle_threshold_millis: 16,
            merge_threshold_millis: 100,
        }
    }
}

impl HistoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("recorder_capacity", self.recorder_capacity as i64)?;
        positive("merger_capacity", self.merger_capacity as i64)?;
        positive("idle_threshold_millis", self.idle_threshold_millis)?;
        positive("merge_threshold_millis", self.merge_threshold_millis)?;
        Ok(())
    }
}

/// Configuration for the block analyzer.
#[derive(Clone, Debug)]
pub struct BlockConfig {
    /// Wall duration (ms) past which a dispatch counts as a block.
    pub threshold_millis: i64,
    /// Interval (ms) between stack samples while a dispatch is in flight.
    pub sample_interval_millis: i64,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            threshold_millis: 700,
            sample_interval_millis: 500,
        }
    }
}

impl BlockConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("threshold_millis", self.threshold_millis)?;
        positive("sample_interval_millis", self.sample_interval_millis)?;
        Ok(())
    }
}

/// Configuration for the ANR watchdog.
#[derive(Clone, Debug)]
pub struct AnrConfig {
    /// Probe interval (ms); a main thread unresponsive past this is
    /// considered hung.
    pub interval_millis: i64,
}

impl Default for AnrConfig {
    fn default() -> Self {
        Self {
            interval_millis: 5_000,
        }
    }
}

impl AnrConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("interval_millis", self.interval_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(HistoryConfig::default().validate(), Ok(()));
        assert_eq!(BlockConfig::default().validate(), Ok(()));
        assert_eq!(AnrConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_non_positive_values() {
        let config = HistoryConfig {
            recorder_capacity: 0,
            ..HistoryConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositive {
                name: "recorder_capacity",
                value: 0,
            })
        );

        let config = BlockConfig {
            threshold_millis: -1,
            ..BlockConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn error_message_names_the_field() {
        let error = ConfigError::NonPositive {
            name: "interval_millis",
            value: -5,
        };
        assert_eq!(error.to_string(), "interval_millis must be positive, got -5");
    }
}
