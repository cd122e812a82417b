//! Alert wrappers applied between rule evaluation and the sink
//!
//! Wrappers hold the alert they decorate and implement the same
//! [`Deliverable`] capability, delegating explicitly. Unlike rules they carry
//! state, so one instance is kept per monitored stream. A severity tag travels
//! down the chain with the delivery itself and reaches the sink in the same
//! call as its event.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::config::DeliveryPolicy;
use super::event::{AlertEvent, AlertKind, Priority};
use super::sink::AlertSink;

/// Something that can be delivered to a sink
pub trait Deliverable: Send {
    fn event(&self) -> &AlertEvent;

    /// Deliver to the sink with the tag set by outer wrappers, returning
    /// whether anything was delivered
    fn deliver_tagged(
        &mut self,
        sink: &dyn AlertSink,
        now_ms: i64,
        priority: Option<Priority>,
    ) -> bool;

    fn deliver(&mut self, sink: &dyn AlertSink, now_ms: i64) -> bool {
        self.deliver_tagged(sink, now_ms, None)
    }
}

impl Deliverable for AlertEvent {
    fn event(&self) -> &AlertEvent {
        self
    }

    fn deliver_tagged(
        &mut self,
        sink: &dyn AlertSink,
        _now_ms: i64,
        priority: Option<Priority>,
    ) -> bool {
        sink.deliver(self, priority);
        true
    }
}

impl Deliverable for Box<dyn Deliverable> {
    fn event(&self) -> &AlertEvent {
        (**self).event()
    }

    fn deliver_tagged(
        &mut self,
        sink: &dyn AlertSink,
        now_ms: i64,
        priority: Option<Priority>,
    ) -> bool {
        (**self).deliver_tagged(sink, now_ms, priority)
    }
}

/// Tags an alert with a severity before delivering it.
///
/// When nested, the highest tag in the chain wins.
pub struct Prioritized<D> {
    inner: D,
    priority: Priority,
}

impl<D: Deliverable> Prioritized<D> {
    pub fn new(inner: D, priority: Priority) -> Self {
        Self { inner, priority }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl<D: Deliverable> Deliverable for Prioritized<D> {
    fn event(&self) -> &AlertEvent {
        self.inner.event()
    }

    fn deliver_tagged(
        &mut self,
        sink: &dyn AlertSink,
        now_ms: i64,
        priority: Option<Priority>,
    ) -> bool {
        let tag = priority.map_or(self.priority, |outer| outer.max(self.priority));
        self.inner.deliver_tagged(sink, now_ms, Some(tag))
    }
}

/// Suppresses deliveries closer together than `interval_ms`
pub struct RateLimited<D> {
    inner: D,
    interval_ms: i64,
    last_fired: Option<i64>,
}

impl<D: Deliverable> RateLimited<D> {
    pub fn new(inner: D, interval: Duration) -> Self {
        Self {
            inner,
            interval_ms: interval.as_millis() as i64,
            last_fired: None,
        }
    }

    /// Swap in a newer alert for the same stream, keeping the timing state
    pub fn replace(&mut self, inner: D) -> D {
        std::mem::replace(&mut self.inner, inner)
    }

    pub fn last_fired(&self) -> Option<i64> {
        self.last_fired
    }
}

impl<D: Deliverable> Deliverable for RateLimited<D> {
    fn event(&self) -> &AlertEvent {
        self.inner.event()
    }

    fn deliver_tagged(
        &mut self,
        sink: &dyn AlertSink,
        now_ms: i64,
        priority: Option<Priority>,
    ) -> bool {
        if let Some(last) = self.last_fired {
            if now_ms - last < self.interval_ms {
                return false;
            }
        }
        let delivered = self.inner.deliver_tagged(sink, now_ms, priority);
        if delivered {
            self.last_fired = Some(now_ms);
        }
        delivered
    }
}

type Stream = Arc<Mutex<RateLimited<Box<dyn Deliverable>>>>;

/// Applies a [`DeliveryPolicy`] to emitted alerts.
///
/// Keeps one rate-limited stream per (patient, alert kind), each behind its
/// own lock so different streams deliver in parallel.
pub struct DeliveryStage {
    policy: DeliveryPolicy,
    streams: DashMap<(i64, AlertKind), Stream>,
}

impl DeliveryStage {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            policy,
            streams: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Wrap and deliver one event, returning whether it reached the sink
    pub fn dispatch(&self, event: AlertEvent, sink: &dyn AlertSink, now_ms: i64) -> bool {
        let key = (event.patient_id, event.kind);
        let mut alert: Box<dyn Deliverable> = match self.policy.priority_for(event.kind) {
            Some(priority) => Box::new(Prioritized::new(event, priority)),
            None => Box::new(event),
        };

        let Some(interval) = self.policy.repeat_interval else {
            return alert.deliver(sink, now_ms);
        };

        // The map shard guard is released before the stream lock is taken
        let (stream, newer) = match self.streams.entry(key) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), Some(alert)),
            Entry::Vacant(entry) => {
                let stream = Arc::new(Mutex::new(RateLimited::new(alert, interval)));
                entry.insert(Arc::clone(&stream));
                (stream, None)
            }
        };

        let mut stream = stream.lock();
        if let Some(alert) = newer {
            stream.replace(alert);
        }
        let delivered = stream.deliver(sink, now_ms);
        if !delivered {
            tracing::debug!(
                patient_id = key.0,
                kind = %key.1,
                "Alert suppressed by repeat interval"
            );
        }
        delivered
    }

    /// Number of tracked streams
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::config::RuleId;
    use crate::alerts::sink::AlertHistory;

    fn event(kind: AlertKind) -> AlertEvent {
        AlertEvent::new(1, kind, "test", 1000)
    }

    #[test]
    fn test_plain_alert_always_delivers() {
        let sink = AlertHistory::new(10);
        let mut alert = event(AlertKind::EcgAnomaly);
        assert!(alert.deliver(&sink, 0));
        assert!(alert.deliver(&sink, 0));
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_prioritized_tags_then_delegates() {
        let sink = AlertHistory::new(10);
        let mut alert = Prioritized::new(event(AlertKind::EcgAnomaly), Priority::High);

        assert_eq!(alert.event().kind, AlertKind::EcgAnomaly);
        assert!(alert.deliver(&sink, 0));

        let entries = sink.recent();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].priority, Some(Priority::High));
    }

    #[test]
    fn test_rate_limited_respects_interval() {
        let sink = AlertHistory::new(10);
        let mut alert = RateLimited::new(event(AlertKind::RapidDrop), Duration::from_secs(100));

        assert!(alert.deliver(&sink, 1_000));
        assert!(!alert.deliver(&sink, 50_000));
        assert!(alert.deliver(&sink, 101_000));
        assert_eq!(alert.last_fired(), Some(101_000));
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_wrappers_nest() {
        let sink = AlertHistory::new(10);
        let mut alert = RateLimited::new(
            Prioritized::new(event(AlertKind::LowSaturation), Priority::Medium),
            Duration::from_millis(10),
        );
        assert!(alert.deliver(&sink, 0));
        assert!(!alert.deliver(&sink, 5));
        assert_eq!(sink.recent()[0].priority, Some(Priority::Medium));
    }

    #[test]
    fn test_suppressed_delivery_leaves_no_tag_behind() {
        let sink = AlertHistory::new(10);
        let mut tagged = Prioritized::new(
            RateLimited::new(event(AlertKind::RapidDrop), Duration::from_secs(100)),
            Priority::High,
        );
        assert!(tagged.deliver(&sink, 0));
        assert!(!tagged.deliver(&sink, 10));

        let mut plain = event(AlertKind::RapidDrop);
        assert!(plain.deliver(&sink, 20));

        let priorities: Vec<Option<Priority>> = sink.recent().iter().map(|e| e.priority).collect();
        assert_eq!(priorities, vec![Some(Priority::High), None]);
    }

    #[test]
    fn test_nested_tags_keep_highest() {
        let sink = AlertHistory::new(10);
        let mut low_outside = Prioritized::new(
            Prioritized::new(event(AlertKind::EcgAnomaly), Priority::High),
            Priority::Low,
        );
        let mut high_outside = Prioritized::new(
            Prioritized::new(event(AlertKind::EcgAnomaly), Priority::Low),
            Priority::High,
        );
        assert!(low_outside.deliver(&sink, 0));
        assert!(high_outside.deliver(&sink, 0));

        let priorities: Vec<Option<Priority>> = sink.recent().iter().map(|e| e.priority).collect();
        assert_eq!(priorities, vec![Some(Priority::High), Some(Priority::High)]);
    }

    #[test]
    fn test_stage_passthrough() {
        let sink = AlertHistory::new(10);
        let stage = DeliveryStage::new(DeliveryPolicy::default());

        assert!(stage.dispatch(event(AlertKind::LowSaturation), &sink, 0));
        assert!(stage.dispatch(event(AlertKind::LowSaturation), &sink, 0));
        assert_eq!(sink.len(), 2);
        assert_eq!(stage.stream_count(), 0);
    }

    #[test]
    fn test_stage_rate_limits_per_stream() {
        let sink = AlertHistory::new(10);
        let policy = DeliveryPolicy::default()
            .with_repeat_interval(Duration::from_secs(60))
            .with_priority(RuleId::EcgAnomaly, Priority::High);
        let stage = DeliveryStage::new(policy);

        assert!(stage.dispatch(event(AlertKind::LowSaturation), &sink, 0));
        assert!(!stage.dispatch(event(AlertKind::LowSaturation), &sink, 30_000));
        assert!(stage.dispatch(event(AlertKind::EcgAnomaly), &sink, 30_000));
        assert!(stage.dispatch(event(AlertKind::LowSaturation), &sink, 60_000));

        let other_patient = AlertEvent::new(2, AlertKind::LowSaturation, "test", 1000);
        assert!(stage.dispatch(other_patient, &sink, 60_000));

        assert_eq!(stage.stream_count(), 3);
        let entries = sink.recent();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].priority, Some(Priority::High));
        assert_eq!(entries[0].priority, None);
    }

    #[test]
    fn test_stage_streams_dispatch_concurrently() {
        let sink = AlertHistory::new(1000);
        let stage = DeliveryStage::new(
            DeliveryPolicy::default().with_repeat_interval(Duration::from_secs(60)),
        );

        std::thread::scope(|s| {
            for patient_id in 0..8 {
                let stage = &stage;
                let sink = &sink;
                s.spawn(move || {
                    for _ in 0..50 {
                        let alert = AlertEvent::new(patient_id, AlertKind::LowSaturation, "test", 1000);
                        stage.dispatch(alert, sink, 0);
                    }
                });
            }
        });

        assert_eq!(stage.stream_count(), 8);
        assert_eq!(sink.len(), 8);
    }
}
