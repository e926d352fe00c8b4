use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    Json, Router,
    extract::{ConnectInfo, Query, State},
    http::{
        Extensions, HeaderMap, HeaderValue, StatusCode, Uri,
        header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, REFERER},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use url::form_urlencoded;
use yacdn_api_types::{GlobalStatsReport, NodeDistance, PopularUrl, StatsReport};

use crate::{
    application::{
        counters::UsageCounters,
        edge::{ContentRequest, EdgeService},
        error::HttpError,
        geo::GeoLocator,
        stats::StatsAggregator,
    },
    domain::{error::EdgeError, types::Route},
    util::bytes::format_bytes,
};

use super::middleware::{allow_any_origin, log_responses, set_request_context};

const DEFAULT_TOP_LIMIT: usize = 10;
const MAX_TOP_LIMIT: usize = 100;
const FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Clone)]
pub struct HttpState {
    pub edge: Arc<EdgeService>,
    pub geo: Arc<GeoLocator>,
    pub stats: Arc<StatsAggregator>,
    pub counters: UsageCounters,
    pub landing_url: Arc<str>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/serve/", get(content))
        .route("/serve/{*target}", get(content))
        .route("/proxy/", get(content))
        .route("/proxy/{*target}", get(content))
        .route("/stats", get(local_stats))
        .route("/global-stats", get(global_stats))
        .route("/nodes", get(nearest_nodes))
        .route("/top", get(top_urls))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .layer(middleware::from_fn(allow_any_origin))
}

async fn landing(State(state): State<HttpState>) -> Response {
    match HeaderValue::from_str(&state.landing_url) {
        Ok(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
        Err(err) => HttpError::new(
            "infra::http::landing",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            format!("landing url is not a valid header value: {err}"),
        )
        .into_response(),
    }
}

/// `/serve/<url>` and `/proxy/<url>`. The target is taken from the raw
/// request path so that `//` and percent-escapes reach the cache key as sent.
async fn content(
    State(state): State<HttpState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, HttpError> {
    let Some((route, remainder)) = Route::classify(uri.path()) else {
        return Err(HttpError::new(
            "infra::http::content",
            StatusCode::NOT_FOUND,
            "Not found",
            format!("`{}` is not a content path", uri.path()),
        ));
    };

    let query = uri.query().map(str::to_string);
    let max_age_param = query.as_deref().and_then(|query| {
        form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == "maxAge")
            .map(|(_, value)| value.into_owned())
    });
    let referer = headers
        .get(REFERER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let request = ContentRequest {
        route,
        path_remainder: remainder.to_string(),
        query,
        referer,
        max_age_param,
    };

    let served = state.edge.handle(request).await?;

    let mut response = served.body.into_response();
    let response_headers = response.headers_mut();
    if let Ok(content_type) = HeaderValue::from_str(&served.content_type) {
        response_headers.insert(CONTENT_TYPE, content_type);
    }
    response_headers.insert(CONTENT_LENGTH, HeaderValue::from(served.content_length));
    Ok(response)
}

async fn local_stats(State(state): State<HttpState>) -> Result<Json<StatsReport>, HttpError> {
    let report = state.stats.local_stats().await?;
    Ok(Json(report))
}

async fn global_stats(
    State(state): State<HttpState>,
) -> Result<Json<GlobalStatsReport>, HttpError> {
    let total = state.stats.global_stats().await?;
    Ok(Json(GlobalStatsReport {
        cdn_hits: total.cdn_hits,
        cdn_data: format_bytes(total.cdn_data),
        cache_storage_usage: format_bytes(total.cache_storage_usage),
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodesQuery {
    k: Option<usize>,
}

async fn nearest_nodes(
    State(state): State<HttpState>,
    Query(query): Query<NodesQuery>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Result<Json<Vec<NodeDistance>>, HttpError> {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(&headers, peer)
        .ok_or_else(|| EdgeError::geolocation("client address is unknown"))?;
    let nodes = state.geo.nearest_to_client(ip, query.k).await?;
    Ok(Json(nodes))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TopQuery {
    limit: Option<usize>,
}

async fn top_urls(
    State(state): State<HttpState>,
    Query(query): Query<TopQuery>,
) -> Result<Json<Vec<PopularUrl>>, HttpError> {
    let limit = query.limit.unwrap_or(DEFAULT_TOP_LIMIT).min(MAX_TOP_LIMIT);
    let top = state
        .counters
        .top_urls(limit)
        .await
        .map_err(EdgeError::from)?;
    Ok(Json(top))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// First `X-Forwarded-For` entry, else the peer address of the connection.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    forwarded.or_else(|| peer.map(|addr| addr.ip()))
}
