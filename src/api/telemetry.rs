//! Request metrics for the HTTP API.

use axum::extract::MatchedPath;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info_span, Instrument};

struct ApiInstruments {
    requests: Counter<u64>,
    duration: Histogram<f64>,
    failures: Counter<u64>,
    auth_rejections: Counter<u64>,
    upload_bytes: Histogram<u64>,
}

fn instruments() -> &'static ApiInstruments {
    static INSTRUMENTS: OnceLock<ApiInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("coviddy.api");
        ApiInstruments {
            requests: meter
                .u64_counter("http.server.request.count")
                .with_description("Requests served by the coviddy API")
                .init(),
            duration: meter
                .f64_histogram("http.server.request.duration")
                .with_description("Time from routing to response")
                .with_unit("s")
                .init(),
            failures: meter
                .u64_counter("http.server.request.errors")
                .with_description("Responses with a 4xx or 5xx status")
                .init(),
            auth_rejections: meter
                .u64_counter("coviddy.api.auth.rejected")
                .with_description("Internal requests refused for missing or wrong credentials")
                .init(),
            upload_bytes: meter
                .u64_histogram("coviddy.api.request.body.size")
                .with_description("Declared body size of write requests")
                .with_unit("By")
                .init(),
        }
    })
}

/// Status class label, e.g. `2xx`.
fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Records count, latency and failures per matched route.
///
/// Internal routes additionally record refused credentials and the declared
/// size of uploaded bodies.
pub async fn http_observability_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let internal = route.starts_with("/api/internal/");
    let declared_len = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let span = info_span!(
        "http.request",
        otel.kind = "server",
        http.request.method = %method,
        http.route = %route
    );
    let response = next.run(req).instrument(span).await;

    let status = response.status();
    let attrs = [
        KeyValue::new("http.request.method", method.as_str().to_string()),
        KeyValue::new("http.route", route.clone()),
        KeyValue::new("http.response.status_class", status_class(status)),
    ];
    let instruments = instruments();
    instruments.requests.add(1, &attrs);
    instruments
        .duration
        .record(started.elapsed().as_secs_f64(), &attrs);
    if status.is_client_error() || status.is_server_error() {
        instruments.failures.add(1, &attrs);
    }

    if internal {
        if status == StatusCode::FORBIDDEN {
            instruments
                .auth_rejections
                .add(1, &[KeyValue::new("http.route", route.clone())]);
        } else if let Some(len) = declared_len {
            instruments
                .upload_bytes
                .record(len, &[KeyValue::new("http.route", route)]);
        }
    }

    response
}
