//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::scheduler::{Aggregator, Scheduler};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// How long in-flight requests may keep running once shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Scheduler,
    pub aggregator: Arc<Aggregator>,
}

/// HTTP API server for Vigil.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<Store>, scheduler: Scheduler, aggregator: Arc<Aggregator>) -> Self {
        Self {
            state: AppState {
                config,
                store,
                scheduler,
                aggregator,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        let router = Router::new()
            .route("/health", get(handlers::handle_health))
            // Targets
            .route("/api/apps", get(handlers::handle_list_apps).post(handlers::handle_create_app))
            .route(
                "/api/apps/{id}",
                get(handlers::handle_get_app)
                    .put(handlers::handle_update_app)
                    .delete(handlers::handle_delete_app),
            )
            // Checks
            .route("/api/apps/{id}/check", post(handlers::handle_check_app))
            .route("/api/check-all", post(handlers::handle_check_all))
            // History
            .route("/api/apps/{id}/logs", get(handlers::handle_get_logs))
            .route("/api/apps/{id}/diagnostics", get(handlers::handle_diagnostics))
            .route("/api/apps/{id}/uptime", get(handlers::handle_uptime))
            .route("/api/apps/{id}/uptime/series", get(handlers::handle_uptime_series))
            .route("/api/summary", get(handlers::handle_summary))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone());

        match &self.state.config.frontend_dist {
            Some(dist) => router.fallback_service(ServeDir::new(dist)),
            None => router,
        }
    }

    /// Serve on the configured port until `shutdown` is cancelled.
    ///
    /// Requests still running [`SHUTDOWN_GRACE`] after cancellation are
    /// abandoned and an error is returned.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future();

        match bounded_drain(serve, shutdown, SHUTDOWN_GRACE).await {
            Some(served) => served?,
            None => {
                return Err(format!("requests still in flight {:?} after shutdown", SHUTDOWN_GRACE).into());
            }
        }

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// Drive `serve` to completion, giving up `grace` after `shutdown` fires.
///
/// Returns `None` when the deadline won.
pub async fn bounded_drain<F: Future>(serve: F, shutdown: CancellationToken, grace: Duration) -> Option<F::Output> {
    let deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        out = serve => Some(out),
        _ = deadline => {
            tracing::warn!("Shutdown grace of {:?} elapsed, abandoning in-flight requests", grace);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_drain_returns_finished_output() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let out = bounded_drain(async { 7 }, shutdown, Duration::from_millis(50)).await;
        assert_eq!(out, Some(7));
    }

    #[tokio::test]
    async fn test_bounded_drain_gives_up_after_grace() {
        let shutdown = CancellationToken::new();
        let stuck = std::future::pending::<()>();

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let out = tokio::time::timeout(
            Duration::from_secs(2),
            bounded_drain(stuck, shutdown, Duration::from_millis(50)),
        )
        .await
        .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_bounded_drain_waits_while_running() {
        let shutdown = CancellationToken::new();
        let stuck = std::future::pending::<()>();

        let waited = tokio::time::timeout(
            Duration::from_millis(100),
            bounded_drain(stuck, shutdown, Duration::from_millis(10)),
        )
        .await;
        assert!(waited.is_err());
    }
}
