use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc};

use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use yacdn::{
    application::{
        blacklist::Blacklist,
        counters::UsageCounters,
        edge::{EdgeConfig, EdgeService},
        error::AppError,
        geo::GeoLocator,
        repos::KeyValueStore,
        stats::StatsAggregator,
    },
    cache::{CacheConfig, CacheManager},
    config,
    domain::error::EdgeError,
    infra::{
        error::InfraError,
        geoip::IpstackLookup,
        http::{self, HttpState},
        memory::MemoryStore,
        origin::HttpOriginFetcher,
        peers::HttpPeerStatsClient,
        redis_store::RedisStore,
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::CheckConfig(_) => run_check_config(&settings).await,
    }
}

async fn run_check_config(settings: &config::Settings) -> Result<(), AppError> {
    let blacklist = load_blacklist(settings).await?;
    for line in settings.summary() {
        println!("{line}");
    }
    println!("blacklist: {} host(s) loaded", blacklist.len());
    println!("configuration ok");
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    app.geo
        .register_nodes(&settings.nodes)
        .await
        .map_err(EdgeError::from)?;

    serve_http(&settings, app.http_state).await
}

struct ApplicationContext {
    http_state: HttpState,
    geo: Arc<GeoLocator>,
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let store = open_store(&settings.store).await?;
    let counters = UsageCounters::new(store.clone());

    let cache_config = CacheConfig::from(&settings.cache);
    let origin = Arc::new(HttpOriginFetcher::new(
        &settings.origin,
        cache_config.max_body_bytes,
    )?);
    let cache = CacheManager::new(cache_config, origin, counters.clone());

    let blacklist = Arc::new(load_blacklist(settings).await?);
    info!(hosts = blacklist.len(), "blacklist loaded");

    let edge = Arc::new(EdgeService::new(
        EdgeConfig {
            serve_max_age: settings.cache.serve_max_age,
            count_blocked_requests: settings.stats.count_blocked_requests,
        },
        cache,
        counters.clone(),
        blacklist,
    ));

    let lookup = Arc::new(IpstackLookup::new(&settings.geo)?);
    let geo = Arc::new(GeoLocator::new(
        store.clone(),
        lookup,
        settings.geo.default_k,
    ));

    let peers = Arc::new(HttpPeerStatsClient::new(&settings.peers)?);
    let stats = Arc::new(StatsAggregator::new(
        counters.clone(),
        peers,
        settings.nodes.clone(),
        settings.server.public_url.as_ref(),
    ));

    let http_state = HttpState {
        edge,
        geo: geo.clone(),
        stats,
        counters,
        landing_url: Arc::from(settings.server.landing_url.as_str()),
    };

    Ok(ApplicationContext { http_state, geo })
}

async fn open_store(settings: &config::StoreSettings) -> Result<Arc<dyn KeyValueStore>, AppError> {
    match &settings.url {
        Some(url) => Ok(Arc::new(RedisStore::connect(url).await?)),
        None => {
            warn!("no store.url configured, counters and node index reset on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn load_blacklist(settings: &config::Settings) -> Result<Blacklist, AppError> {
    Blacklist::load(
        settings.blacklist.path.as_deref(),
        &settings.blacklist.hosts,
    )
    .await
    .map_err(|err| {
        let path = settings
            .blacklist
            .path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        AppError::from(InfraError::configuration(format!(
            "failed to read blacklist `{path}`: {err}"
        )))
    })
}

async fn serve_http(settings: &config::Settings, http_state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(http_state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "edge node listening");

    let draining = Arc::new(Notify::new());
    let signal_draining = draining.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        signal_draining.notify_one();
    })
    .into_future();

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        draining.notified().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = deadline => {
            warn!(
                grace_secs = grace.as_secs(),
                "graceful shutdown timed out, dropping open connections"
            );
        }
    }

    info!("edge node stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received, draining connections");
}
