use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    clear_manual_alert, evaluate_patient, health_check, ingest, list_alerts, list_patients,
    manual_alert_status, patient_records, stats, trigger_manual_alert, AppState,
};
use crate::alerts::{
    AlertChecker, AlertHistory, FanoutSink, LogSink, ManualAlertLatch, RuleEngine, RuleSetConfig,
    WebhookConfig, WebhookSink,
};
use crate::ingest::{read_directory, IngestStats, LineListener};
use crate::storage::{PatientStore, StoreConfig};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Port for the live TCP line feed, disabled when unset
    pub line_port: Option<u16>,
    /// Directory of `.txt` files loaded before serving
    pub data_dir: Option<PathBuf>,
    pub eval_interval_secs: u64,
    /// Evaluation workers, one per CPU when unset
    pub eval_threads: Option<usize>,
    pub lock_timeout_ms: Option<u64>,
    pub rules: RuleSetConfig,
    pub webhook_url: Option<String>,
    pub history_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            line_port: None,
            data_dir: None,
            eval_interval_secs: 1,
            eval_threads: None,
            lock_timeout_ms: None,
            rules: RuleSetConfig::default(),
            webhook_url: None,
            history_capacity: 1000,
        }
    }
}

impl ServerConfig {
    fn store_config(&self) -> StoreConfig {
        match self.lock_timeout_ms {
            Some(ms) => StoreConfig::default().with_lock_timeout(Duration::from_millis(ms)),
            None => StoreConfig::default(),
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Data operations
        .route("/ingest", post(ingest))
        .route("/patients", get(list_patients))
        .route("/patients/:id/records", get(patient_records))
        // Alerts
        .route("/patients/:id/evaluate", post(evaluate_patient))
        .route(
            "/patients/:id/manual-alert",
            get(manual_alert_status)
                .post(trigger_manual_alert)
                .delete(clear_manual_alert),
        )
        .route("/alerts", get(list_alerts))
        // Stats
        .route("/stats", get(stats))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server together with the checker and ingest adapters
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(PatientStore::with_config(config.store_config()));
    let ingest_stats = Arc::new(IngestStats::new());
    let latch = Arc::new(ManualAlertLatch::new());
    let history = Arc::new(AlertHistory::new(config.history_capacity));

    // Alert sinks
    let mut sink = FanoutSink::new()
        .with_sink(Arc::new(LogSink))
        .with_sink(Arc::clone(&history) as _);
    let webhook_handle = match &config.webhook_url {
        Some(url) => {
            tracing::info!("Forwarding alerts to webhook {}", url);
            let (webhook, handle) = WebhookSink::spawn(WebhookConfig::new(url.as_str()));
            sink = sink.with_sink(Arc::new(webhook));
            Some(handle)
        }
        None => None,
    };

    let engine = Arc::new(RuleEngine::from_config(
        Arc::clone(&store),
        &config.rules,
        Arc::new(sink),
    ));

    // Batch preload
    if let Some(dir) = config.data_dir.clone() {
        let store = Arc::clone(&store);
        let stats = Arc::clone(&ingest_stats);
        let report =
            tokio::task::spawn_blocking(move || read_directory(&store, &stats, &dir)).await??;
        tracing::info!(
            accepted = report.accepted,
            rejected = report.rejected,
            "Batch import complete"
        );
    }

    // Start background checker
    let mut checker = match config.eval_threads {
        Some(threads) => AlertChecker::new(Arc::clone(&engine), Arc::clone(&latch), threads)?,
        None => AlertChecker::with_default_threads(Arc::clone(&engine), Arc::clone(&latch))?,
    };
    let checker_handle = checker.start(Duration::from_secs(config.eval_interval_secs.max(1)));

    // Live line feed
    let line_handle = match config.line_port {
        Some(port) => {
            let listener = LineListener::bind(
                (config.host.as_str(), port),
                Arc::clone(&store),
                Arc::clone(&ingest_stats),
            )
            .await?;
            tracing::info!("Accepting line feed on {}", listener.local_addr()?);
            Some(tokio::spawn(listener.run()))
        }
        None => None,
    };

    let state = Arc::new(AppState {
        store,
        engine,
        latch,
        history,
        ingest_stats,
    });

    // Build router
    let app = build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting vitalwatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, stopping workers...");
    checker.stop().await;
    if let Err(e) = checker_handle.await {
        tracing::error!(error = %e, "Alert checker task failed");
    }
    if let Some(handle) = line_handle {
        handle.abort();
    }
    if let Some(handle) = webhook_handle {
        handle.abort();
    }

    tracing::info!("vitalwatch server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn create_test_state() -> Arc<AppState> {
        let store = Arc::new(PatientStore::new());
        let history = Arc::new(AlertHistory::new(100));
        let engine = Arc::new(RuleEngine::from_config(
            Arc::clone(&store),
            &RuleSetConfig::default(),
            Arc::clone(&history) as _,
        ));
        Arc::new(AppState {
            store,
            engine,
            latch: Arc::new(ManualAlertLatch::new()),
            history,
            ingest_stats: Arc::new(IngestStats::new()),
        })
    }

    fn create_test_app() -> Router {
        build_router(create_test_state())
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app();

        let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ingest_and_read_records() {
        let state = create_test_state();
        let app = build_router(Arc::clone(&state));

        let ingest_body = serde_json::json!({
            "records": [
                {"patient_id": 1, "record_type": "Saturation", "value": 97.0, "timestamp": 3000}
            ],
            "lines": [
                "1,96,Saturation,1000",
                "1,oops,Saturation,2000",
                "1,95,Saturation,2000"
            ]
        });

        let response = app
            .clone()
            .oneshot(json_request("POST", "/ingest", ingest_body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["accepted"], 3);
        assert_eq!(report["rejected"], 1);
        assert_eq!(report["rejections"][0]["line_number"], 2);
        assert_eq!(state.ingest_stats.accepted(), 3);

        let response = app
            .oneshot(empty_request("GET", "/patients/1/records?start=1500&end=3000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let timestamps: Vec<i64> = body["records"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["timestamp"].as_i64().unwrap())
            .collect();
        assert_eq!(timestamps, vec![2000, 3000]);
    }

    #[tokio::test]
    async fn test_empty_ingest_rejected() {
        let app = create_test_app();

        let response = app
            .oneshot(json_request("POST", "/ingest", serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_evaluate_records_alert_history() {
        let state = create_test_state();
        state
            .store
            .ingest(7, 90.0, crate::data::RecordType::Saturation, 1000)
            .unwrap();
        let app = build_router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(empty_request("POST", "/patients/7/evaluate"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["alerts"][0]["kind"], "low_saturation");
        assert_eq!(body["alerts"][0]["timestamp"], 1000);
        assert_eq!(body["manual_alert"], false);

        let response = app
            .oneshot(empty_request("GET", "/alerts?patient_id=7"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["alerts"].as_array().unwrap().len(), 1);
        assert_eq!(body["alerts"][0]["patient_id"], 7);
    }

    #[tokio::test]
    async fn test_manual_alert_toggle() {
        let state = create_test_state();
        let app = build_router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(empty_request("POST", "/patients/3/manual-alert"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.latch.is_active(3));

        let response = app
            .clone()
            .oneshot(empty_request("GET", "/patients/3/manual-alert"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["active"], true);

        let response = app
            .oneshot(empty_request("DELETE", "/patients/3/manual-alert"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.latch.is_active(3));
    }

    #[tokio::test]
    async fn test_unknown_patient_not_found() {
        let app = create_test_app();

        let response = app
            .clone()
            .oneshot(empty_request("GET", "/patients/42/records"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(empty_request("POST", "/patients/42/evaluate"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_and_patient_listing() {
        let state = create_test_state();
        state
            .store
            .ingest(2, 120.0, crate::data::RecordType::SystolicPressure, 10)
            .unwrap();
        state
            .store
            .ingest(1, 80.0, crate::data::RecordType::DiastolicPressure, 10)
            .unwrap();
        state.latch.trigger(2);
        let app = build_router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(empty_request("GET", "/patients"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["patients"][0]["id"], 1);
        assert_eq!(body["patients"][1]["id"], 2);
        assert_eq!(body["patients"][1]["manual_alert"], true);

        let response = app.oneshot(empty_request("GET", "/stats")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["patients"], 2);
        assert_eq!(body["records"], 2);
        assert_eq!(body["manual_alerts"], serde_json::json!([2]));
        assert_eq!(body["rules"].as_array().unwrap().len(), 8);
    }
}
