//! Debug HTTP server surfaced only in debug feature builds.
//!
//! This module spawns a lightweight Axum server that exposes pipeline health,
//! counters, a live metric SSE stream and a manual flush trigger.

#[cfg(all(feature = "debug_http", debug_assertions))]
mod routes;
#[cfg(all(feature = "debug_http", debug_assertions))]
mod sse;

use std::sync::Arc;

use crate::replay::TelemetryPipeline;

#[cfg(all(feature = "debug_http", debug_assertions))]
pub use routes::{build_router, run_http_server, DebugHttpState};

#[cfg(all(feature = "debug_http", debug_assertions))]
use std::net::SocketAddr;
#[cfg(all(feature = "debug_http", debug_assertions))]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(all(feature = "debug_http", debug_assertions))]
use tracing::{error, info, warn};

#[cfg(all(feature = "debug_http", debug_assertions))]
static SERVER_STARTED: AtomicBool = AtomicBool::new(false);

/// Default bind address when `REPLAY_DEBUG_HTTP_ADDR` is unset
pub const DEFAULT_DEBUG_ADDR: &str = "127.0.0.1:8787";

/// Spawn the debug HTTP server on the current runtime when the feature flag
/// and debug builds are enabled. Returns whether a server was spawned.
pub fn spawn_if_enabled(pipeline: Arc<TelemetryPipeline>) -> bool {
    #[cfg(all(feature = "debug_http", debug_assertions))]
    {
        if SERVER_STARTED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Debug HTTP server already running");
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Debug HTTP server needs a tokio runtime");
            SERVER_STARTED.store(false, Ordering::SeqCst);
            return false;
        };

        let addr: SocketAddr = std::env::var("REPLAY_DEBUG_HTTP_ADDR")
            .unwrap_or_else(|_| DEFAULT_DEBUG_ADDR.to_string())
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8787)));

        let token =
            std::env::var("REPLAY_DEBUG_TOKEN").unwrap_or_else(|_| "replay-debug".to_string());
        let preview = token.chars().take(4).collect::<String>();

        info!(
            "Debug HTTP server binding {} (token prefix {}***)",
            addr, preview
        );

        runtime.spawn(async move {
            let state = DebugHttpState::new(pipeline, token);
            if let Err(err) = run_http_server(state, addr).await {
                error!("Debug HTTP server stopped: {}", err);
            }
            SERVER_STARTED.store(false, Ordering::SeqCst);
        });
        true
    }

    #[cfg(not(all(feature = "debug_http", debug_assertions)))]
    {
        let _ = pipeline;
        false
    }
}
