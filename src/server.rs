use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    api, config::SharedConfig, error::Result, observability, store::EventStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
    pub config: SharedConfig,
}

pub async fn run(
    addr: SocketAddr,
    store: Arc<EventStore>,
    config: SharedConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let state = AppState { store, config };

    // The dashboard calls these endpoints cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE]);

    let dashboard = Router::new()
        .route("/annotations", post(api::annotations::annotations))
        .route("/query", post(api::query::query))
        .route("/search", post(api::query::search))
        .layer(cors);

    let app = Router::new()
        .route("/", get(api::events::health))
        .route(
            "/api/v2/event",
            post(api::events::ingest)
                .get(api::events::list)
                .delete(api::events::remove),
        )
        .route("/api/v2/buckets", get(api::events::buckets))
        .route("/api/v1/promwebhook", post(api::promwebhook::ingest))
        .route("/hquery", get(api::web::query_page))
        .route("/db/stats", get(api::db::stats))
        .merge(dashboard)
        .route("/metrics", get(observability::metrics_handler))
        .layer(middleware::from_fn(observability::track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("listening on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Resolves on SIGTERM or Ctrl+C.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
