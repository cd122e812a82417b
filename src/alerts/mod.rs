//! Alert rules, evaluation and delivery
//!
//! Rules are pure functions over a patient's window. The [`RuleEngine`]
//! pulls one snapshot from the store per evaluation, runs every rule over it
//! and hands what fires to an [`AlertSink`], optionally through the wrappers
//! in [`compose`]. The [`AlertChecker`] drives evaluation periodically.

pub mod checker;
pub mod compose;
pub mod config;
pub mod engine;
pub mod event;
pub mod latch;
pub mod rules;
pub mod sink;

pub use checker::AlertChecker;
pub use compose::{Deliverable, DeliveryStage, Prioritized, RateLimited};
pub use config::{ConfigError, DeliveryPolicy, RuleId, RuleSetConfig};
pub use engine::{EvaluationSummary, RuleEngine};
pub use event::{AlertEvent, AlertKind, Pressure, Priority};
pub use latch::ManualAlertLatch;
pub use rules::{
    AlertRule, BloodPressureCriticalThreshold, BloodPressureTrend, EcgAnomaly,
    HypotensiveHypoxemia, LowSaturation, RapidDrop,
};
pub use sink::{AlertHistory, AlertSink, FanoutSink, LogSink, WebhookConfig, WebhookSink};
