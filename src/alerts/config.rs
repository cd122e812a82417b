//! Rule set configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use super::event::{AlertKind, Pressure, Priority};
use super::rules::{
    AlertRule, BloodPressureCriticalThreshold, BloodPressureTrend, EcgAnomaly,
    HypotensiveHypoxemia, LowSaturation, RapidDrop,
};

/// Rule identifiers as they appear in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    LowSaturation,
    RapidDrop,
    HypotensiveHypoxemia,
    BloodPressureTrend,
    BloodPressureCriticalThreshold,
    EcgAnomaly,
}

impl RuleId {
    pub const ALL: [RuleId; 6] = [
        RuleId::LowSaturation,
        RuleId::RapidDrop,
        RuleId::HypotensiveHypoxemia,
        RuleId::BloodPressureTrend,
        RuleId::BloodPressureCriticalThreshold,
        RuleId::EcgAnomaly,
    ];
}

impl From<AlertKind> for RuleId {
    fn from(kind: AlertKind) -> Self {
        match kind {
            AlertKind::LowSaturation => RuleId::LowSaturation,
            AlertKind::RapidDrop => RuleId::RapidDrop,
            AlertKind::HypotensiveHypoxemia => RuleId::HypotensiveHypoxemia,
            AlertKind::BloodPressureTrend(_) => RuleId::BloodPressureTrend,
            AlertKind::BloodPressureCriticalThreshold(_) => RuleId::BloodPressureCriticalThreshold,
            AlertKind::EcgAnomaly => RuleId::EcgAnomaly,
        }
    }
}

/// Which rules run, in what order, and with which thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSetConfig {
    /// Active rules in evaluation order
    pub enabled: Vec<RuleId>,
    pub saturation_threshold: f64,
    pub rapid_drop_window_ms: i64,
    pub rapid_drop_ratio: f64,
    pub systolic_hypotension_threshold: f64,
    /// Maximum gap between the low saturation and low systolic observations
    pub hypoxemia_pairing_window_ms: Option<i64>,
    pub trend_min_delta: f64,
    pub ecg_window_ms: i64,
    pub ecg_max_deviation: f64,
    /// Post-processing applied to emitted alerts
    pub delivery: DeliveryPolicy,
}

impl Default for RuleSetConfig {
    fn default() -> Self {
        Self {
            enabled: RuleId::ALL.to_vec(),
            saturation_threshold: 92.0,
            rapid_drop_window_ms: 600_000,
            rapid_drop_ratio: 0.05,
            systolic_hypotension_threshold: 90.0,
            hypoxemia_pairing_window_ms: None,
            trend_min_delta: 10.0,
            ecg_window_ms: 60_000,
            ecg_max_deviation: 0.2,
            delivery: DeliveryPolicy::default(),
        }
    }
}

impl RuleSetConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Only run the given rules
    pub fn with_enabled(mut self, enabled: impl IntoIterator<Item = RuleId>) -> Self {
        self.enabled = enabled.into_iter().collect();
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    /// Instantiate the active rules. Blood pressure rules produce one rule
    /// per pressure component, systolic first.
    pub fn build_rules(&self) -> Vec<Box<dyn AlertRule>> {
        let mut rules: Vec<Box<dyn AlertRule>> = Vec::new();

        for id in &self.enabled {
            match id {
                RuleId::LowSaturation => rules.push(Box::new(LowSaturation {
                    threshold: self.saturation_threshold,
                })),
                RuleId::RapidDrop => rules.push(Box::new(RapidDrop {
                    window_ms: self.rapid_drop_window_ms,
                    min_drop_ratio: self.rapid_drop_ratio,
                })),
                RuleId::HypotensiveHypoxemia => rules.push(Box::new(HypotensiveHypoxemia {
                    saturation_threshold: self.saturation_threshold,
                    systolic_threshold: self.systolic_hypotension_threshold,
                    pairing_window_ms: self.hypoxemia_pairing_window_ms,
                })),
                RuleId::BloodPressureTrend => {
                    for pressure in [Pressure::Systolic, Pressure::Diastolic] {
                        rules.push(Box::new(
                            BloodPressureTrend::new(pressure).with_min_delta(self.trend_min_delta),
                        ));
                    }
                }
                RuleId::BloodPressureCriticalThreshold => {
                    for pressure in [Pressure::Systolic, Pressure::Diastolic] {
                        rules.push(Box::new(BloodPressureCriticalThreshold::new(pressure)));
                    }
                }
                RuleId::EcgAnomaly => rules.push(Box::new(EcgAnomaly {
                    window_ms: self.ecg_window_ms,
                    max_deviation: self.ecg_max_deviation,
                })),
            }
        }

        rules
    }
}

/// How emitted alerts are wrapped before reaching the sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryPolicy {
    /// Severity tag per rule
    #[serde(default)]
    pub priorities: HashMap<RuleId, Priority>,
    /// Minimum gap between deliveries of the same kind for one patient
    #[serde(default, with = "duration_serde")]
    pub repeat_interval: Option<Duration>,
}

impl DeliveryPolicy {
    pub fn with_priority(mut self, rule: RuleId, priority: Priority) -> Self {
        self.priorities.insert(rule, priority);
        self
    }

    pub fn with_repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = Some(interval);
        self
    }

    pub fn priority_for(&self, kind: AlertKind) -> Option<Priority> {
        self.priorities.get(&RuleId::from(kind)).copied()
    }

    /// True when events pass through untouched
    pub fn is_passthrough(&self) -> bool {
        self.priorities.is_empty() && self.repeat_interval.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Optional duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct DurationHelper {
        secs: u64,
        #[serde(default)]
        nanos: u32,
    }

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| DurationHelper {
                secs: d.as_secs(),
                nanos: d.subsec_nanos(),
            })
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let helper = Option::<DurationHelper>::deserialize(deserializer)?;
        Ok(helper.map(|h| Duration::new(h.secs, h.nanos)))
    }
}
