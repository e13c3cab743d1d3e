//! HTTP server for the conversion page.

pub mod handlers;
pub mod page;

use crate::pipeline::Coordinator;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Allows one conversion in flight per process
#[derive(Debug, Default)]
pub struct ConversionGate {
    busy: AtomicBool,
}

/// Held while a conversion runs; releases the gate on drop.
///
/// Owns its gate so it can move into the task running the pipeline.
#[derive(Debug)]
pub struct GateGuard {
    gate: Arc<ConversionGate>,
}

impl ConversionGate {
    /// Claim the gate, or `None` if a conversion is already running
    pub fn try_acquire(self: &Arc<Self>) -> Option<GateGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard {
                gate: Arc::clone(self),
            })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

/// Application state shared across handlers.
#[derive(Debug)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub gate: Arc<ConversionGate>,
}

impl AppState {
    #[must_use]
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            gate: Arc::new(ConversionGate::default()),
        }
    }
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/preview", post(handlers::preview))
        .route("/api/convert", post(handlers::convert))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the page until the process is terminated
pub async fn serve(coordinator: Coordinator, host: &str, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(coordinator));
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Serving conversion page on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_allows_one_holder() {
        let gate = Arc::new(ConversionGate::default());
        let guard = gate.try_acquire().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }
}
