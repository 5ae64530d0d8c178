//! Observability module for centralized metrics, tracing, and logging setup.
//!
//! This module provides:
//! - Structured logging with configurable levels and formats
//! - Metrics collection and Prometheus export
//! - Health check endpoints for monitoring
//! - Span and metric helpers used by the OCR, database and pipeline code

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use hyper::server::conn::http1;
use hyper::{Method, Response, StatusCode};
use hyper_util::rt::TokioIo;
use leptess::LepTess;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing_subscriber::prelude::*;

use crate::observability_config::ObservabilityConfig;

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Dependencies probed by `/health/ready`
#[derive(Debug, Clone, Default)]
pub struct ReadinessChecks {
    pub db_pool: Option<PgPool>,
    /// Tesseract language to load during the OCR probe; skipped when `None`
    pub ocr_languages: Option<String>,
}

/// Initialize the tracing subscriber and the Prometheus recorder
///
/// Call this before anything that logs during startup, such as connecting to the
/// database. The HTTP endpoint is started separately by [`serve_metrics_if_enabled`]
/// once its readiness dependencies exist.
pub fn init_observability_with_config(config: &ObservabilityConfig) -> Result<PrometheusHandle> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid observability configuration: {}", e))?;

    init_tracing_with_config(config)?;
    let metrics_handle = init_metrics_with_config(config)?;

    tracing::info!(
        environment = %config.environment,
        metrics_export = %config.enable_metrics_export,
        metrics_port = %config.metrics_port,
        "Observability stack initialized successfully"
    );
    Ok(metrics_handle)
}

/// Serve `/metrics` and the health probes when metrics export is enabled
pub async fn serve_metrics_if_enabled(
    config: &ObservabilityConfig,
    metrics_handle: PrometheusHandle,
    checks: ReadinessChecks,
) -> Result<()> {
    if !config.enable_metrics_export {
        tracing::debug!("Metrics export disabled, health endpoint not started");
        return Ok(());
    }
    start_metrics_server(metrics_handle, config.metrics_port, checks).await
}

/// Initialize structured logging with tracing and configuration
fn init_tracing_with_config(config: &ObservabilityConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("nutri_scan={}", config.log_level).parse()?)
        .add_directive("sqlx=warn".parse()?);

    if config.use_pretty_logs() {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    tracing::info!(
        environment = %config.environment,
        log_level = %config.log_level,
        "Tracing initialized with structured logging"
    );
    Ok(())
}

/// Initialize metrics collection with Prometheus exporter and configuration
fn init_metrics_with_config(config: &ObservabilityConfig) -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    tracing::info!(
        metrics_enabled = %config.enable_metrics_export,
        "Metrics collection initialized"
    );
    Ok(handle)
}

async fn start_metrics_server(
    metrics_handle: PrometheusHandle,
    port: u16,
    checks: ReadinessChecks,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting metrics server with health checks on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on {}", addr);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let metrics_handle = metrics_handle.clone();
                    let checks = checks.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = hyper::service::service_fn(
                            move |req: hyper::Request<hyper::body::Incoming>| {
                                let metrics_handle = metrics_handle.clone();
                                let checks = checks.clone();
                                async move {
                                    Ok::<_, std::convert::Infallible>(
                                        route_request(
                                            req.method(),
                                            req.uri().path(),
                                            &metrics_handle,
                                            &checks,
                                        )
                                        .await,
                                    )
                                }
                            },
                        );

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await
                        {
                            tracing::error!("Error serving connection: {:?}", err);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting connection: {}", e);
                }
            }
        }
    });

    Ok(())
}

/// Answer one request to the metrics endpoint
pub async fn route_request(
    method: &Method,
    path: &str,
    metrics_handle: &PrometheusHandle,
    checks: &ReadinessChecks,
) -> Response<String> {
    match (method, path) {
        (&Method::GET, "/metrics") => {
            // Ensure at least one metric is registered to avoid empty render
            metrics::gauge!("uptime_seconds").set(1.0);
            let mut response = Response::new(metrics_handle.render());
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static(METRICS_CONTENT_TYPE),
            );
            response
        }
        (&Method::GET, "/health/live") => Response::new("OK".to_string()),
        (&Method::GET, "/health/ready") => match perform_readiness_checks(checks).await {
            Ok(()) => Response::new("OK".to_string()),
            Err(e) => {
                let mut response = Response::new(format!("NOT READY: {}", e));
                *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                response
            }
        },
        _ => {
            let mut response = Response::new("Not Found".to_string());
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    }
}

/// Perform readiness checks against every configured dependency
pub async fn perform_readiness_checks(checks: &ReadinessChecks) -> Result<()> {
    if let Some(pool) = &checks.db_pool {
        check_database_health(pool).await?;
    }

    if let Some(languages) = &checks.ocr_languages {
        check_ocr_health(languages).await?;
    }

    Ok(())
}

/// Check database connectivity and basic query capability
pub async fn check_database_health(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database health check failed: {}", e))?;

    tracing::debug!("Database health check passed");
    Ok(())
}

/// Check OCR engine availability by loading Tesseract with the configured languages
pub async fn check_ocr_health(languages: &str) -> Result<()> {
    let languages = languages.to_string();
    tokio::task::spawn_blocking(move || LepTess::new(None, &languages).map(|_| ()))
        .await?
        .map_err(|e| anyhow::anyhow!("OCR health check failed: {}", e))?;

    tracing::debug!("OCR health check passed");
    Ok(())
}

/// Create a span for OCR operations
pub fn ocr_span(operation: &str) -> tracing::Span {
    tracing::info_span!("ocr_operation", operation = operation, component = "ocr")
}

/// Create a span for database operations
pub fn db_span(operation: &str, table: &str) -> tracing::Span {
    tracing::info_span!(
        "db_operation",
        operation = operation,
        table = table,
        component = "database"
    )
}

/// Create a span for analysis pipeline runs
pub fn pipeline_span(operation: &str, user_id: i64) -> tracing::Span {
    tracing::info_span!(
        "pipeline_operation",
        operation = operation,
        user_id = user_id,
        component = "pipeline"
    )
}

/// Record OCR operation metrics
pub fn record_ocr_metrics(success: bool, duration: Duration, image_size: u64) {
    metrics::counter!("ocr_operations_total", "result" => if success { "success" } else { "failure" }).increment(1);
    metrics::histogram!("ocr_duration_seconds").record(duration.as_secs_f64());
    metrics::histogram!("ocr_image_size_bytes").record(image_size as f64);
}

/// Record database operation metrics
pub fn record_db_metrics(operation: &str, duration: Duration) {
    let operation = operation.to_string();
    metrics::counter!("db_operations_total", "operation" => operation).increment(1);
    metrics::histogram!("db_operation_duration_seconds").record(duration.as_secs_f64());
}

/// Record the outcome of one analysis run (`success` or a failing stage)
pub fn record_analysis_run(result: &str, duration: Duration) {
    let result = result.to_string();
    metrics::counter!("analysis_runs_total", "result" => result).increment(1);
    metrics::histogram!("analysis_duration_seconds").record(duration.as_secs_f64());
}

/// Record the score of a stored analysis
pub fn record_health_score(score: u8) {
    metrics::histogram!("analysis_health_score").record(f64::from(score));
}

/// Update circuit breaker state metric
pub fn update_circuit_breaker_state(is_open: bool) {
    metrics::gauge!("circuit_breaker_state").set(if is_open { 1.0 } else { 0.0 });
}
