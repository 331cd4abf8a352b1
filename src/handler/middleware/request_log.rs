use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};
use tracing::field::{Field, Visit};
use tracing::{info, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{format, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

pub const ACCESS_LOG_TARGET: &str = "http.access";

/// What a handler did with a request. Handlers and `SyncError` attach it to
/// the response; the access log reports it next to the status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncTrace {
    pub call_id: Option<String>,
    pub outcome: &'static str,
    pub warnings: usize,
}

impl SyncTrace {
    pub fn new(outcome: &'static str) -> Self {
        Self {
            outcome,
            ..Default::default()
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_warnings(mut self, warnings: usize) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Writes `http.access` events as one line per request:
/// `<time> <level> http.access | ip | METHOD uri | status | ms | call_id= outcome= warnings=`.
/// Other events use the default formatter.
#[derive(Clone, Default)]
pub struct AccessLogEventFormat<T = SystemTime> {
    timer: T,
}

impl<T: FormatTime> AccessLogEventFormat<T> {
    pub fn new(timer: T) -> Self {
        Self { timer }
    }
}

#[derive(Default)]
struct AccessLine(HashMap<&'static str, String>);

impl AccessLine {
    fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("-")
    }
}

impl Visit for AccessLine {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name(), value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name(), format!("{value:.3}"));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name(), format!("{value:?}"));
    }
}

impl<S, N, T> FormatEvent<S, N> for AccessLogEventFormat<T>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
    T: FormatTime + Clone,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        if metadata.target() != ACCESS_LOG_TARGET {
            return format::Format::default()
                .with_timer(self.timer.clone())
                .with_target(true)
                .format_event(ctx, writer, event);
        }

        let mut line = AccessLine::default();
        event.record(&mut line);
        self.timer.format_time(&mut writer)?;
        writeln!(
            writer,
            " {} {} | {} | {} {} | {} | {}ms | call_id={} outcome={} warnings={}",
            metadata.level(),
            ACCESS_LOG_TARGET,
            line.get("client_ip"),
            line.get("method"),
            line.get("uri"),
            line.get("status"),
            line.get("cost_ms"),
            line.get("call_id"),
            line.get("outcome"),
            line.get("warnings"),
        )
    }
}

fn should_skip_logging(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == pattern,
    })
}

/// First `X-Forwarded-For` hop, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "-".to_string())
}

/// Logs one access line per request, including the `SyncTrace` the handler
/// attached, unless the path matches `skip_paths`.
pub async fn log_requests(
    State(skip_paths): State<Arc<Vec<String>>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if should_skip_logging(req.uri().path(), skip_paths.as_slice()) {
        return next.run(req).await;
    }
    let started_at = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().to_string();
    let peer = req
        .extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client_ip = client_ip(req.headers(), peer);

    let response = next.run(req).await;

    let trace = response
        .extensions()
        .get::<SyncTrace>()
        .cloned()
        .unwrap_or_default();
    info!(
        target: ACCESS_LOG_TARGET,
        client_ip = client_ip.as_str(),
        method = method.as_str(),
        uri = uri.as_str(),
        status = response.status().as_u16(),
        cost_ms = started_at.elapsed().as_secs_f64() * 1_000.0,
        call_id = trace.call_id.as_deref().unwrap_or("-"),
        outcome = if trace.outcome.is_empty() { "-" } else { trace.outcome },
        warnings = trace.warnings,
    );
    response
}
