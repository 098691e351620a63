//! HTTP API for on-demand harvests and the watch list.
//!
//! - `GET /views?user=` harvests a subject and reports view changes
//! - `GET|POST|DELETE /watched` manages the watch list
//! - `POST /refresh` and `POST /challenge/resolve` are operator controls
//! - `GET /health` reports liveness and transport

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::harvest::{HarvestService, ManualResolver, Runtime};

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<HarvestService>,
    pub resolver: Arc<ManualResolver>,
}

impl From<Runtime> for AppState {
    fn from(runtime: Runtime) -> Self {
        Self {
            service: runtime.service,
            resolver: runtime.resolver,
        }
    }
}

/// Start the web server and run until Ctrl-C.
pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr: SocketAddr = bind.parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    Ok(())
}
