use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerts::sink::HistoryEntry;
use crate::alerts::{AlertEvent, AlertHistory, ManualAlertLatch, RuleEngine};
use crate::data::PatientRecord;
use crate::ingest::{ingest_lines, IngestReport, IngestSnapshot, IngestStats, Rejection};
use crate::storage::{PatientStore, StorageError};

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<PatientStore>,
    pub engine: Arc<RuleEngine>,
    pub latch: Arc<ManualAlertLatch>,
    pub history: Arc<AlertHistory>,
    pub ingest_stats: Arc<IngestStats>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Ingest
// ============================================================================

/// Structured records, raw canonical lines, or both
#[derive(Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub records: Vec<PatientRecord>,
    #[serde(default)]
    pub lines: Vec<String>,
}

pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestReport>, ApiError> {
    if request.records.is_empty() && request.lines.is_empty() {
        return Err(ApiError::BadRequest(
            "Request contains no records or lines".to_string(),
        ));
    }

    let mut report = IngestReport::default();
    for (idx, record) in request.records.into_iter().enumerate() {
        if !record.value.is_finite() {
            report.rejected += 1;
            report.rejections.push(Rejection {
                source: "records".to_string(),
                line_number: idx + 1,
                reason: format!("invalid measurement value '{}'", record.value),
                retryable: false,
            });
            continue;
        }
        match state.store.ingest_record(record) {
            Ok(()) => report.accepted += 1,
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "Rejected ingest record");
                report.rejected += 1;
                report.rejections.push(Rejection {
                    source: "records".to_string(),
                    line_number: idx + 1,
                    reason: e.to_string(),
                    retryable: e.is_retryable(),
                });
            }
        }
    }
    state.ingest_stats.record_accepted(report.accepted as u64);
    state.ingest_stats.record_rejected(report.rejected as u64);

    let line_report = ingest_lines(
        &state.store,
        &state.ingest_stats,
        "lines",
        request.lines.iter().map(String::as_str),
    );
    report.merge(line_report);

    Ok(Json(report))
}

// ============================================================================
// Patients
// ============================================================================

#[derive(Serialize)]
pub struct PatientsResponse {
    pub patients: Vec<PatientInfo>,
}

#[derive(Serialize)]
pub struct PatientInfo {
    pub id: i64,
    pub record_count: usize,
    pub manual_alert: bool,
}

pub async fn list_patients(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PatientsResponse>, ApiError> {
    let patients = state
        .store
        .patient_ids()
        .into_iter()
        .map(|id| {
            Ok(PatientInfo {
                id,
                record_count: state.store.patient_record_count(id)?,
                manual_alert: state.latch.is_active(id),
            })
        })
        .collect::<Result<Vec<_>, StorageError>>()?;

    Ok(Json(PatientsResponse { patients }))
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Serialize)]
pub struct RecordsResponse {
    pub patient_id: i64,
    pub start: i64,
    pub end: i64,
    pub records: Vec<PatientRecord>,
}

pub async fn patient_records(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<i64>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<RecordsResponse>, ApiError> {
    ensure_known(&state, patient_id)?;

    let start = range.start.unwrap_or(i64::MIN);
    let end = range.end.unwrap_or(i64::MAX);
    let records = state.store.window(patient_id, start, end)?;

    Ok(Json(RecordsResponse {
        patient_id,
        start,
        end,
        records,
    }))
}

#[derive(Serialize)]
pub struct EvaluateResponse {
    pub patient_id: i64,
    pub alerts: Vec<AlertEvent>,
    pub manual_alert: bool,
}

/// Evaluate one patient now; alerts are dispatched to the configured sinks
pub async fn evaluate_patient(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<i64>,
) -> Result<Json<EvaluateResponse>, ApiError> {
    ensure_known(&state, patient_id)?;

    let alerts = state.engine.evaluate(patient_id)?;

    Ok(Json(EvaluateResponse {
        patient_id,
        alerts,
        manual_alert: state.latch.is_active(patient_id),
    }))
}

fn ensure_known(state: &AppState, patient_id: i64) -> Result<(), ApiError> {
    if state.store.contains(patient_id) {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!(
            "Patient {} not found",
            patient_id
        )))
    }
}

// ============================================================================
// Manual Alerts
// ============================================================================

#[derive(Serialize)]
pub struct ManualAlertResponse {
    pub patient_id: i64,
    pub active: bool,
}

pub async fn manual_alert_status(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<i64>,
) -> Json<ManualAlertResponse> {
    Json(ManualAlertResponse {
        patient_id,
        active: state.latch.is_active(patient_id),
    })
}

pub async fn trigger_manual_alert(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<i64>,
) -> Json<ManualAlertResponse> {
    state.latch.trigger(patient_id);
    Json(ManualAlertResponse {
        patient_id,
        active: true,
    })
}

pub async fn clear_manual_alert(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<i64>,
) -> Json<ManualAlertResponse> {
    state.latch.untrigger(patient_id);
    Json(ManualAlertResponse {
        patient_id,
        active: false,
    })
}

// ============================================================================
// Alert History
// ============================================================================

#[derive(Deserialize)]
pub struct AlertsQuery {
    pub patient_id: Option<i64>,
}

#[derive(Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<HistoryEntry>,
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Json<AlertsResponse> {
    let alerts = match query.patient_id {
        Some(id) => state.history.for_patient(id),
        None => state.history.recent(),
    };
    Json(AlertsResponse { alerts })
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Serialize)]
pub struct StatsResponse {
    pub patients: usize,
    pub records: usize,
    pub ingest: IngestSnapshot,
    pub alerts_recorded: usize,
    pub manual_alerts: Vec<i64>,
    pub rules: Vec<String>,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let store = state.store.stats();

    Json(StatsResponse {
        patients: store.patients,
        records: store.records,
        ingest: state.ingest_stats.snapshot(),
        alerts_recorded: state.history.len(),
        manual_alerts: state.latch.active_patients(),
        rules: state
            .engine
            .rule_kinds()
            .into_iter()
            .map(|k| k.to_string())
            .collect(),
    })
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// Transient contention; the client may retry
    Unavailable(String),
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        if e.is_retryable() {
            ApiError::Unavailable(e.to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
