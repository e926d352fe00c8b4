use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use httpmock::MockServer;
use serde::de::DeserializeOwned;
use tower::ServiceExt;
use url::Url;
use yacdn::{
    application::{
        blacklist::Blacklist,
        counters::UsageCounters,
        edge::{EdgeConfig, EdgeService},
        geo::{GeoLocator, GeoLookup},
        repos::KeyValueStore,
        stats::StatsAggregator,
    },
    cache::{CacheConfig, CacheManager},
    config::{OriginSettings, PeerSettings},
    domain::{
        entities::{Coordinates, Node},
        error::EdgeError,
    },
    infra::{
        http::{HttpState, build_router},
        memory::MemoryStore,
        origin::HttpOriginFetcher,
        peers::HttpPeerStatsClient,
    },
};
use yacdn_api_types::{GlobalStatsReport, NodeDistance, PopularUrl, StatsReport};

const LANDING: &str = "https://ovsoinc.github.io/yacdn.org";
const LOCAL_NODE: &str = "http://local.edge.test";

struct FixedLookup(Coordinates);

#[async_trait]
impl GeoLookup for FixedLookup {
    async fn locate(&self, _ip: IpAddr) -> Result<Coordinates, EdgeError> {
        Ok(self.0)
    }
}

struct Harness {
    router: Router,
    counters: UsageCounters,
    geo: Arc<GeoLocator>,
}

#[derive(Default)]
struct HarnessOptions {
    nodes: Vec<Node>,
    blacklist: Vec<&'static str>,
}

fn harness(options: HarnessOptions) -> Harness {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let counters = UsageCounters::new(store.clone());

    let cache_config = CacheConfig::default();
    let origin = Arc::new(
        HttpOriginFetcher::new(
            &OriginSettings {
                timeout: Duration::from_secs(5),
                user_agent: "yacdn-tests".to_string(),
            },
            cache_config.max_body_bytes,
        )
        .expect("origin client"),
    );
    let cache = CacheManager::new(cache_config, origin, counters.clone());

    let edge = Arc::new(EdgeService::new(
        EdgeConfig::default(),
        cache,
        counters.clone(),
        Arc::new(Blacklist::new(options.blacklist)),
    ));

    let geo = Arc::new(GeoLocator::new(
        store,
        Arc::new(FixedLookup(Coordinates::new(0.0, 0.0))),
        5,
    ));

    let peers = Arc::new(
        HttpPeerStatsClient::new(&PeerSettings {
            timeout: Duration::from_secs(5),
        })
        .expect("peer client"),
    );
    let local_url = Url::parse(LOCAL_NODE).expect("local url");
    let stats = Arc::new(StatsAggregator::new(
        counters.clone(),
        peers,
        options.nodes,
        Some(&local_url),
    ));

    let router = build_router(HttpState {
        edge,
        geo: geo.clone(),
        stats,
        counters: counters.clone(),
        landing_url: Arc::from(LANDING),
    });

    Harness {
        router,
        counters,
        geo,
    }
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn get(router: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(router, request).await
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
        .to_vec()
}

async fn body_json<T: DeserializeOwned>(response: Response) -> T {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("json body")
}

fn node(url: &str, longitude: f64) -> Node {
    Node {
        url: url.to_string(),
        longitude,
        latitude: 0.0,
    }
}

#[tokio::test]
async fn landing_redirects_with_cors_header() {
    let h = harness(HarnessOptions::default());

    let response = get(&h.router, "/").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], LANDING);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn serve_fetches_once_and_counts_usage() {
    let origin = MockServer::start();
    let mock = origin.mock(|when, then| {
        when.method("GET").path("/assets/site.css");
        then.status(200)
            .header("content-type", "text/css")
            .body("body { color: red; }");
    });
    let h = harness(HarnessOptions::default());
    let uri = format!("/serve/{}", origin.url("/assets/site.css"));

    for _ in 0..2 {
        let response = get(&h.router, &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "20");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body_bytes(response).await, b"body { color: red; }");
    }
    mock.assert_calls(1);

    let stats: StatsReport = body_json(get(&h.router, "/stats").await).await;
    assert_eq!(
        stats,
        StatsReport {
            cdn_hits: 2,
            cdn_data: 40,
            cache_storage_usage: 20,
        }
    );

    let top: Vec<PopularUrl> = body_json(get(&h.router, "/top?limit=5").await).await;
    assert_eq!(
        top,
        vec![PopularUrl {
            url: format!("{}?", origin.url("/assets/site.css")),
            hits: 2,
        }]
    );
}

#[tokio::test]
async fn proxy_forwards_query_and_refetches() {
    let origin = MockServer::start();
    let mock = origin.mock(|when, then| {
        when.method("GET").path("/api").query_param("page", "2");
        then.status(200).body("{}");
    });
    let h = harness(HarnessOptions::default());
    let uri = format!("/proxy/{}?page=2", origin.url("/api"));

    for _ in 0..2 {
        let response = get(&h.router, &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    mock.assert_calls(2);
}

#[tokio::test]
async fn blacklisted_referer_is_forbidden_without_origin_traffic() {
    let origin = MockServer::start();
    let mock = origin.mock(|when, then| {
        when.any_request();
        then.status(200).body("payload");
    });
    let h = harness(HarnessOptions {
        blacklist: vec!["hotlinker.example"],
        ..Default::default()
    });

    let request = Request::builder()
        .uri(format!("/serve/{}", origin.url("/image.png")))
        .header(header::REFERER, "https://hotlinker.example/gallery")
        .body(Body::empty())
        .expect("request should build");
    let response = send(&h.router, request).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    mock.assert_calls(0);

    let top = h.counters.top_urls(10).await.expect("top urls");
    assert!(top.is_empty());
}

#[tokio::test]
async fn invalid_max_age_is_a_bad_request() {
    let origin = MockServer::start();
    let mock = origin.mock(|when, then| {
        when.any_request();
        then.status(200).body("payload");
    });
    let h = harness(HarnessOptions::default());

    let response = get(
        &h.router,
        &format!("/serve/{}?maxAge=-5", origin.url("/file.txt")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    mock.assert_calls(0);
}

#[tokio::test]
async fn missing_target_is_a_bad_request() {
    let h = harness(HarnessOptions::default());

    let response = get(&h.router, "/serve/").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn origin_failure_maps_to_bad_gateway() {
    let origin = MockServer::start();
    origin.mock(|when, then| {
        when.method("GET");
        then.status(404);
    });
    let h = harness(HarnessOptions::default());

    let response = get(&h.router, &format!("/serve/{}", origin.url("/gone"))).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let stats = h.counters.snapshot().await.expect("snapshot");
    assert_eq!(stats.cdn_data, 0);
}

#[tokio::test]
async fn global_stats_sums_the_fleet() {
    let peer_a = MockServer::start();
    let peer_b = MockServer::start();
    peer_a.mock(|when, then| {
        when.method("GET").path("/stats");
        then.status(200)
            .json_body(serde_json::json!({"cdnHits": 2, "cdnData": 200, "cacheStorageUsage": 20}));
    });
    peer_b.mock(|when, then| {
        when.method("GET").path("/stats");
        then.status(200)
            .json_body(serde_json::json!({"cdnHits": 3, "cdnData": 300, "cacheStorageUsage": 30}));
    });
    let h = harness(HarnessOptions {
        nodes: vec![
            node(LOCAL_NODE, 0.0),
            node(&peer_a.base_url(), 1.0),
            node(&peer_b.base_url(), 2.0),
        ],
        ..Default::default()
    });
    h.counters.record_hit().await.expect("hit");
    h.counters.record_bytes_served(100).await.expect("bytes");
    h.counters.adjust_storage(10).await.expect("storage");

    let response = get(&h.router, "/global-stats").await;
    assert_eq!(response.status(), StatusCode::OK);
    let report: GlobalStatsReport = body_json(response).await;

    assert_eq!(
        report,
        GlobalStatsReport {
            cdn_hits: 6,
            cdn_data: "600 B".to_string(),
            cache_storage_usage: "60 B".to_string(),
        }
    );
}

#[tokio::test]
async fn global_stats_fails_when_a_peer_is_down() {
    let peer = MockServer::start();
    peer.mock(|when, then| {
        when.method("GET").path("/stats");
        then.status(500);
    });
    let h = harness(HarnessOptions {
        nodes: vec![node(LOCAL_NODE, 0.0), node(&peer.base_url(), 1.0)],
        ..Default::default()
    });

    let response = get(&h.router, "/global-stats").await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn nodes_ranks_fleet_by_distance_from_forwarded_client() {
    let h = harness(HarnessOptions::default());
    h.geo
        .register_nodes(&[
            node("http://far.edge.test", 30.0),
            node("http://near.edge.test", 5.0),
            node("http://mid.edge.test", 10.0),
        ])
        .await
        .expect("register nodes");

    let request = Request::builder()
        .uri("/nodes?k=2")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .body(Body::empty())
        .expect("request should build");
    let response = send(&h.router, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let nodes: Vec<NodeDistance> = body_json(response).await;
    let urls: Vec<&str> = nodes.iter().map(|node| node.url.as_str()).collect();
    assert_eq!(urls, ["http://near.edge.test", "http://mid.edge.test"]);
    assert!(nodes[0].distance < nodes[1].distance);
}

#[tokio::test]
async fn nodes_without_client_address_is_a_bad_gateway() {
    let h = harness(HarnessOptions::default());

    let response = get(&h.router, "/nodes").await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn health_is_empty() {
    let h = harness(HarnessOptions::default());

    let response = get(&h.router, "/_health").await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn every_response_carries_a_distinct_request_id() {
    let h = harness(HarnessOptions::default());

    let ok = get(&h.router, "/_health").await;
    let failed = get(&h.router, "/serve/").await;

    assert_eq!(failed.status(), StatusCode::BAD_REQUEST);
    let first = ok.headers()["x-request-id"].to_str().expect("ascii id");
    let second = failed.headers()["x-request-id"].to_str().expect("ascii id");
    assert_eq!(first.len(), 36);
    assert_ne!(first, second);
}
