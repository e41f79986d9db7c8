mod config;

use std::sync::Arc;

use anyhow::Context;
use config::FleetConfig;
use fleet_api::ApiState;
use fleet_auth::{RateLimiter, SessionAuth, UserResolver};
use fleet_broker::{Broker, InMemoryBroker, RedisBroker};
use fleet_notify::{BrokerChangeNotifier, ChangeNotifier, LoggingNotifier};
use fleet_session::{AgentSession, TokioSleeper};
use fleet_store::{SqliteStore, Store};
use fleet_types::collaborators::{SystemClock, SystemCodeGen, SystemUuidGen};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetd=debug".parse().unwrap()),
        )
        .init();

    info!("fleetd starting...");

    let config = FleetConfig::from_env();

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(
            &config.sqlite_path,
            Arc::new(SystemClock),
            Arc::new(SystemCodeGen),
            Arc::new(SystemUuidGen),
            config.default_grace_period_secs,
        )
        .context("failed to open fleet store")?,
    );

    let resolver: Arc<dyn UserResolver> = Arc::new(
        SessionAuth::open(&config.sessions_db_path).context("failed to open session store")?,
    );

    let rate_limiter = RateLimiter::new();
    rate_limiter.start_cleanup_task(
        std::time::Duration::from_secs(300),
        std::time::Duration::from_secs(900),
    );

    let notify_sink: Arc<dyn fleet_notify::Notifier> = Arc::new(LoggingNotifier::default());

    let state = match &config.redis_url {
        Some(url) => {
            info!("using Redis broker at {url}");
            let broker = Arc::new(
                RedisBroker::connect(url)
                    .await
                    .context("failed to connect to Redis broker")?,
            );
            build_state(broker, store, resolver, rate_limiter, notify_sink, &config)
        }
        None => {
            info!("no FLEETD_REDIS_URL set, using single-node in-memory broker");
            let broker = Arc::new(InMemoryBroker::new());
            build_state(broker, store, resolver, rate_limiter, notify_sink, &config)
        }
    };

    let router = fleet_api::build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("fleetd listening on {}", config.listen_addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("fleetd shut down");
    Ok(())
}

/// Wires one concrete broker backend into `ApiState`, sharing the same
/// `Arc<B>` between the Client Stream's group membership and the
/// Change Notifier's publishes (they must ride the same bus).
fn build_state<B: Broker + 'static>(
    broker: Arc<B>,
    store: Arc<dyn Store>,
    resolver: Arc<dyn UserResolver>,
    rate_limiter: RateLimiter,
    notify_sink: Arc<dyn fleet_notify::Notifier>,
    config: &FleetConfig,
) -> ApiState {
    let notifier: Arc<dyn ChangeNotifier> =
        Arc::new(BrokerChangeNotifier::new(broker.clone(), store.clone(), notify_sink));
    let broker_dyn: Arc<dyn Broker> = broker;

    let session = Arc::new(AgentSession::new(
        store.clone(),
        broker_dyn.clone(),
        notifier.clone(),
        Arc::new(TokioSleeper),
        config.heartbeat_interval,
    ));

    ApiState {
        store,
        broker: broker_dyn,
        notifier,
        session,
        resolver,
        rate_limiter,
        cors_allowlist: Arc::new(config.cors_allowlist.clone()),
        heartbeat_interval: config.heartbeat_interval,
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to install ctrl-c handler");
        return;
    }
    info!("shutdown signal received");
}
