use anyhow::{anyhow, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub fn init() -> Result<()> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("eventdb_http_request_duration_seconds".into()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .map_err(|err| anyhow!("failed to configure prometheus exporter: {err}"))?;
    let handle = builder
        .install_recorder()
        .map_err(|err| anyhow!("failed to initialise prometheus recorder: {err}"))?;

    describe_counter!(
        "eventdb_events_created_total",
        "Total number of events posted."
    );
    describe_counter!(
        "eventdb_events_failed_total",
        "Total number of errors while creating events."
    );
    describe_counter!(
        "eventdb_vacuum_events_deleted_total",
        "Total number of events deleted by the vacuum worker."
    );
    describe_gauge!(
        "eventdb_vacuum_last_run_time_seconds",
        "Last run of the vacuum routine."
    );
    describe_counter!(
        "eventdb_http_requests_total",
        "Total number of HTTP requests processed."
    );
    describe_histogram!(
        "eventdb_http_request_duration_seconds",
        "HTTP request latency."
    );

    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}

pub async fn metrics_handler() -> Response {
    let Some(handle) = PROMETHEUS_HANDLE.get() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not initialised",
        )
            .into_response();
    };

    let headers = [(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    )];
    (StatusCode::OK, headers, handle.render()).into_response()
}

pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().as_str().to_owned();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(
        "eventdb_http_requests_total",
        1,
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.clone()
    );
    histogram!(
        "eventdb_http_request_duration_seconds",
        latency,
        "method" => method,
        "path" => path,
        "status" => status
    );

    response
}
