use crate::config::Config;
use crate::error::AppError;
use crate::middleware::SessionLayerExt;
use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use sqlscope_db::Database;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;

/// Health report for one engine.
#[derive(Debug, Serialize)]
pub struct BindHealth {
    pub bind: Option<String>,
    pub url: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub session_id: String,
    pub binds: Vec<BindHealth>,
}

/// Create the Axum router.
///
/// Every route runs inside a per-request database session.
pub fn create_router(db: Arc<Database>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_db_session(db.clone())
        .layer(TraceLayer::new_for_http())
        .with_state(db)
}

async fn health_check(State(db): State<Arc<Database>>) -> Result<Json<HealthResponse>, AppError> {
    let session = db.session()?;

    let binds: Vec<BindHealth> = db
        .engines()?
        .into_iter()
        .map(|engine| {
            let result = session.with_connection(engine.bind(), |conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            });
            BindHealth {
                bind: engine.bind().map(str::to_string),
                url: engine.url().to_string(),
                ok: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        })
        .collect();

    let status = if binds.iter().all(|b| b.ok) {
        "ok"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status,
        session_id: session.id().to_string(),
        binds,
    }))
}

/// Start the HTTP server
pub async fn start_server(config: Config, db: Arc<Database>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app = create_router(db);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
