use std::time::Instant;

use axum::{
    body::Body,
    http::{
        HeaderName, HeaderValue, Method, Request, StatusCode, Uri,
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
    },
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Tags the request with a fresh id and echoes it back so a client report can
/// be matched to the log line.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Every response is readable cross-origin, errors included.
pub async fn allow_any_origin(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// A 4xx/5xx response with whatever diagnostics the handler attached.
#[derive(Debug)]
struct FailedResponse {
    status: StatusCode,
    method: Method,
    uri: Uri,
    elapsed_ms: u128,
    request_id: String,
    source: &'static str,
    chain: Vec<String>,
}

macro_rules! emit_failure {
    ($level:ident, $failure:expr, $message:literal) => {{
        let failure = $failure;
        $level!(
            target = "yacdn::http::response",
            status = failure.status.as_u16(),
            method = %failure.method,
            path = %failure.uri.path(),
            query = failure.uri.query().unwrap_or(""),
            elapsed_ms = failure.elapsed_ms,
            source = failure.source,
            detail = %failure.detail(),
            chain = ?failure.chain,
            request_id = %failure.request_id,
            $message,
        )
    }};
}

impl FailedResponse {
    fn new(
        status: StatusCode,
        method: Method,
        uri: Uri,
        started: Instant,
        request_id: String,
        report: Option<ErrorReport>,
    ) -> Self {
        let (source, chain) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        Self {
            status,
            method,
            uri,
            elapsed_ms: started.elapsed().as_millis(),
            request_id,
            source,
            chain,
        }
    }

    fn detail(&self) -> &str {
        self.chain
            .first()
            .map(String::as_str)
            .unwrap_or("no diagnostic available")
    }

    fn log(&self) {
        if self.status.is_server_error() {
            emit_failure!(error, self, "request failed");
        } else {
            emit_failure!(warn, self, "client request error");
        }
    }
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let report = response.extensions_mut().remove::<ErrorReport>();
        FailedResponse::new(status, method, uri, started, request_id, report).log();
    }
    response
}
