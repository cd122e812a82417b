//! Alert sinks
//!
//! Sinks are fire-and-forget: `deliver` never fails and never blocks on
//! network I/O. Anything that can fail is the sink's own business. The
//! severity tag, if any, arrives in the same call as its event.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::event::{AlertEvent, Priority};

/// Consumer of emitted alerts
pub trait AlertSink: Send + Sync {
    fn deliver(&self, event: &AlertEvent, priority: Option<Priority>);
}

/// Logs alerts through tracing
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn deliver(&self, event: &AlertEvent, priority: Option<Priority>) {
        let at = chrono::DateTime::from_timestamp_millis(event.timestamp)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| event.timestamp.to_string());
        tracing::warn!(
            patient_id = event.patient_id,
            kind = %event.kind,
            priority = ?priority,
            at = %at,
            "Alert triggered: {}",
            event.description
        );
    }
}

/// Entry kept by [`AlertHistory`]
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub event: AlertEvent,
    pub priority: Option<Priority>,
    /// Wall clock time the sink received the event
    pub received_at: i64,
}

/// Bounded in-memory record of the most recent alerts
pub struct AlertHistory {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    /// Most recent entries, oldest first
    pub fn recent(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Recorded events for one patient, oldest first
    pub fn for_patient(&self, patient_id: i64) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.event.patient_id == patient_id)
            .cloned()
            .collect()
    }

    /// Recorded events without their annotations
    pub fn events(&self) -> Vec<AlertEvent> {
        self.entries.lock().iter().map(|e| e.event.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AlertSink for AlertHistory {
    fn deliver(&self, event: &AlertEvent, priority: Option<Priority>) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(HistoryEntry {
            event: event.clone(),
            priority,
            received_at: chrono::Utc::now().timestamp_millis(),
        });
    }
}

/// Forwards every call to each inner sink in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutSink {
    fn deliver(&self, event: &AlertEvent, priority: Option<Priority>) {
        for sink in &self.sinks {
            sink.deliver(event, priority);
        }
    }
}

/// Webhook target configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub headers: HashMap<String, String>,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

enum WebhookMessage {
    Alert(AlertEvent, Option<Priority>),
}

/// Posts alerts as JSON to an HTTP endpoint from a background task
pub struct WebhookSink {
    tx: mpsc::UnboundedSender<WebhookMessage>,
}

impl WebhookSink {
    /// Spawn the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(config: WebhookConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WebhookMessage>();
        let client = reqwest::Client::new();

        let handle = tokio::spawn(async move {
            while let Some(WebhookMessage::Alert(event, priority)) = rx.recv().await {
                if let Err(e) = send_webhook(&client, &config, &event, priority).await {
                    tracing::error!(
                        patient_id = event.patient_id,
                        url = %config.url,
                        error = %e,
                        "Failed to send webhook notification"
                    );
                }
            }
            tracing::debug!("Webhook sink stopped");
        });

        (Self { tx }, handle)
    }
}

impl AlertSink for WebhookSink {
    fn deliver(&self, event: &AlertEvent, priority: Option<Priority>) {
        if self
            .tx
            .send(WebhookMessage::Alert(event.clone(), priority))
            .is_err()
        {
            tracing::warn!(
                patient_id = event.patient_id,
                "Webhook task is gone, dropping alert"
            );
        }
    }
}

async fn send_webhook(
    client: &reqwest::Client,
    config: &WebhookConfig,
    event: &AlertEvent,
    priority: Option<Priority>,
) -> Result<(), WebhookError> {
    let payload = serde_json::json!({
        "patient_id": event.patient_id,
        "kind": event.kind,
        "description": event.description,
        "timestamp": event.timestamp,
        "priority": priority,
        "sent_at": chrono::Utc::now().to_rfc3339(),
    });

    let mut request = client.post(&config.url).json(&payload);
    for (key, value) in &config.headers {
        request = request.header(key, value);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(WebhookError::Status(response.status().as_u16()));
    }

    tracing::debug!(patient_id = event.patient_id, url = %config.url, "Webhook notification sent");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook returned status {0}")]
    Status(u16),
}
