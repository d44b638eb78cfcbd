//! Network configuration
//!
//! Every threshold the detectors and the collector use lives here. The whole
//! tree can be loaded from one JSON file; any field left out keeps its default.
//!
//! ```json
//! {
//!   "detector": { "min_drop_v": 0.3, "burst": { "block_ms": 200 } },
//!   "reporter": { "report_period_ms": 30000 },
//!   "collector": { "roster": ["Nodo_1", "Nodo_2"], "publish_period_ms": 3600000 }
//! }
//! ```

use crate::runtime::Millis;
use crate::{PulseNetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Rate limiter applied to pulse candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// Candidates closer together than this count as one burst
    pub window_ms: Millis,
    /// Burst length that triggers a blackout
    pub count_limit: u8,
    /// Blackout length
    pub block_ms: Millis,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            window_ms: 5,
            count_limit: 5,
            block_ms: 100,
        }
    }
}

/// Pulse classifier thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Baseline smoothing factor, in (0, 1]
    pub baseline_alpha: f32,
    /// Smallest dip below baseline that starts a pulse and counts as valid (V)
    pub min_drop_v: f32,
    /// Largest valid dip (V); deeper ones are discharges
    pub max_drop_v: f32,
    /// A pulse has ended once the dip is back under this fraction of `min_drop_v`
    pub recovery_fraction: f32,
    pub min_pulse_ms: Millis,
    pub max_pulse_ms: Millis,
    /// Dead time after every resolved pulse
    pub refractory_ms: Millis,
    /// Minimum time between two valid events
    pub min_spacing_ms: Millis,
    /// How long the indicator stays lit after a valid event
    pub indicator_ms: Millis,
    pub burst: BurstConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            baseline_alpha: 0.001,
            min_drop_v: 0.27,
            max_drop_v: 2.2,
            recovery_fraction: 0.3,
            min_pulse_ms: 4,
            max_pulse_ms: 70,
            refractory_ms: 100,
            min_spacing_ms: 500,
            indicator_ms: 50,
            burst: BurstConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Dip below the pulse's starting baseline under which the pulse has ended
    pub fn recovery_threshold_v(&self) -> f32 {
        self.recovery_fraction * self.min_drop_v
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.baseline_alpha > 0.0 && self.baseline_alpha <= 1.0) {
            return Err(invalid("baseline_alpha must be in (0, 1]"));
        }
        if !(self.min_drop_v > 0.0) {
            return Err(invalid("min_drop_v must be positive"));
        }
        if self.min_drop_v >= self.max_drop_v {
            return Err(invalid("min_drop_v must be below max_drop_v"));
        }
        if !(self.recovery_fraction > 0.0 && self.recovery_fraction <= 1.0) {
            return Err(invalid("recovery_fraction must be in (0, 1]"));
        }
        if self.min_pulse_ms > self.max_pulse_ms {
            return Err(invalid("min_pulse_ms must not exceed max_pulse_ms"));
        }
        if self.burst.count_limit < 2 {
            return Err(invalid("burst.count_limit must be at least 2"));
        }
        Ok(())
    }
}

/// Reporting clock of a sensing node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub report_period_ms: Millis,
    /// Events ending this long before a due report are discarded
    pub quiet_pre_ms: Millis,
    /// Events ending this long after a report are discarded
    pub quiet_post_ms: Millis,
    /// Delay between node start and the handshake line
    pub startup_delay_ms: Millis,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            report_period_ms: 60_000,
            quiet_pre_ms: 50,
            quiet_post_ms: 50,
            startup_delay_ms: 500,
        }
    }
}

impl ReporterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.report_period_ms == 0 {
            return Err(invalid("report_period_ms must be positive"));
        }
        let quiet = u64::from(self.quiet_pre_ms) + u64::from(self.quiet_post_ms);
        if quiet >= u64::from(self.report_period_ms) {
            return Err(invalid(
                "quiet_pre_ms + quiet_post_ms must be shorter than report_period_ms",
            ));
        }
        Ok(())
    }
}

/// Collector roster and activity conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Node identifiers whose counts are accumulated, in output order
    pub roster: Vec<String>,
    pub publish_period_ms: Millis,
    /// Length of the counting window used in the conversion (s)
    pub window_seconds: f64,
    /// Detector sensitivity in counts per second per Bq/L
    pub sensitivity_cps_per_bq_l: f64,
    pub heartbeat_ms: Millis,
    /// Longest line accepted from a link before it is discarded
    pub max_line_len: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            roster: vec!["Nodo_1".to_string(), "Nodo_2".to_string()],
            publish_period_ms: 3_600_000,
            window_seconds: 3600.0,
            sensitivity_cps_per_bq_l: 0.43,
            heartbeat_ms: 900_000,
            max_line_len: 256,
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.roster.is_empty() {
            return Err(invalid("collector roster must not be empty"));
        }
        let mut seen = HashSet::new();
        for node in &self.roster {
            if node.trim().is_empty() || node.contains(';') || node.chars().any(char::is_control) {
                return Err(invalid(format!("invalid node identifier '{}'", node)));
            }
            if !seen.insert(node.as_str()) {
                return Err(invalid(format!("node '{}' listed twice in roster", node)));
            }
        }
        if self.publish_period_ms == 0 {
            return Err(invalid("publish_period_ms must be positive"));
        }
        if !(self.window_seconds > 0.0) {
            return Err(invalid("window_seconds must be positive"));
        }
        if !(self.sensitivity_cps_per_bq_l > 0.0) {
            return Err(invalid("sensitivity_cps_per_bq_l must be positive"));
        }
        if self.max_line_len == 0 {
            return Err(invalid("max_line_len must be positive"));
        }
        Ok(())
    }
}

/// Complete configuration of a network run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub detector: DetectorConfig,
    pub reporter: ReporterConfig,
    pub collector: CollectorConfig,
}

impl NetworkConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.reporter.validate()?;
        self.collector.validate()
    }
}

fn invalid(msg: impl Into<String>) -> PulseNetError {
    PulseNetError::Config(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NetworkConfig::default();
        config.validate().unwrap();
        assert_eq!(config.detector.min_spacing_ms, 500);
        assert_eq!(config.reporter.report_period_ms, 60_000);
        assert_eq!(config.collector.roster, vec!["Nodo_1", "Nodo_2"]);
        assert!((config.detector.recovery_threshold_v() - 0.081).abs() < 1e-6);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = NetworkConfig::from_json_str(
            r#"{ "detector": { "min_drop_v": 0.3, "burst": { "block_ms": 200 } },
                 "collector": { "roster": ["A", "B", "C"] } }"#,
        )
        .unwrap();
        assert_eq!(config.detector.min_drop_v, 0.3);
        assert_eq!(config.detector.max_drop_v, 2.2);
        assert_eq!(config.detector.burst.block_ms, 200);
        assert_eq!(config.detector.burst.window_ms, 5);
        assert_eq!(config.reporter, ReporterConfig::default());
        assert_eq!(config.collector.roster.len(), 3);
    }

    #[test]
    fn test_json_round_trip() {
        let config = NetworkConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(NetworkConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = NetworkConfig::default();
        config.detector.min_drop_v = 3.0;
        assert!(matches!(config.validate(), Err(PulseNetError::Config(_))));

        let mut config = NetworkConfig::default();
        config.detector.min_pulse_ms = 100;
        assert!(config.validate().is_err());

        let mut config = NetworkConfig::default();
        config.detector.baseline_alpha = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quiet_window_must_fit_in_period() {
        let mut config = NetworkConfig::default();
        config.reporter.report_period_ms = 100;
        assert!(config.validate().is_err());
        config.reporter.report_period_ms = 101;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_roster_rules() {
        let mut config = NetworkConfig::default();
        config.collector.roster = vec!["Nodo_1".into(), "Nodo_1".into()];
        assert!(config.validate().is_err());

        config.collector.roster.clear();
        assert!(config.validate().is_err());

        config.collector.roster = vec!["bad;id".into()];
        assert!(config.validate().is_err());

        config.collector.roster = vec!["Nodo\r\n1".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_a_json_error() {
        let err = NetworkConfig::from_json_str("{ detector: }").unwrap_err();
        assert!(matches!(err, PulseNetError::Json(_)));
    }
}
