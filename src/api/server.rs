//! API Server
//!
//! Wires storage, collaborators and the refund retry worker behind the axum
//! router.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
    security::AdminGuard,
};
use crate::{
    config::{ServerConfig, WagerConfig},
    errors::{ConfigError, WagerResult},
    invoices::RocksInvoiceStore,
    metrics::WagerMetrics,
    storage::WagerStorage,
    wager::{
        coordinator::{Collaborators, SettlementCoordinator},
        outbox::RefundRetryWorker,
        randomness::OsRandomness,
        rate_limit::SlidingWindowLimiter,
        refund::TreasuryDispatcher,
        types::Currency,
    },
};
use ed25519_dalek::SigningKey;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Assemble the shared state from already-built collaborators
pub fn build_state(
    config: &WagerConfig,
    storage: WagerStorage,
    collaborators: Collaborators,
) -> WagerResult<Arc<AppState>> {
    let metrics = Arc::new(WagerMetrics::new()?);
    let coordinator = SettlementCoordinator::new(storage, config, collaborators, metrics.clone());

    Ok(Arc::new(AppState {
        coordinator,
        admin: AdminGuard::new(config.admin.secret.as_deref()),
        metrics,
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// Treasury signing with the configured key, funded from the configured
/// balances. Balances are per process and are not persisted.
pub fn treasury_from_config(config: &WagerConfig) -> WagerResult<TreasuryDispatcher> {
    let treasury = match config.refunds.treasury_key_hex.as_deref() {
        Some(seed) => TreasuryDispatcher::new(signing_key_from_hex(seed)?),
        None => {
            warn!("No treasury key configured; signing with an ephemeral key");
            TreasuryDispatcher::generate()
        }
    };
    for balance in &config.refunds.treasury_balances {
        treasury.fund(&Currency::parse(&balance.currency)?, balance.amount);
    }
    Ok(treasury)
}

fn signing_key_from_hex(seed: &str) -> WagerResult<SigningKey> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: "refunds.treasury_key_hex".to_string(),
        value: "<redacted>".to_string(),
        reason: reason.to_string(),
    };
    let bytes = hex::decode(seed.trim()).map_err(|_| invalid("Key is not valid hex"))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| invalid("Key must be a 32-byte ed25519 seed"))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Router with the middleware stack applied
pub fn create_app(state: Arc<AppState>, server: &ServerConfig) -> axum::Router {
    create_router(state)
        // Request ID middleware (first for tracing)
        .layer(axum::middleware::from_fn(request_id_middleware))
        // CORS layer (before timeout to handle preflight)
        .layer(create_cors_layer(server.cors_origins.clone()))
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
}

pub struct ApiServer {
    config: WagerConfig,
    storage: WagerStorage,
}

impl ApiServer {
    pub fn new(config: WagerConfig, storage: WagerStorage) -> Self {
        Self { config, storage }
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let treasury = treasury_from_config(&self.config)?;
        info!(public_key = %treasury.public_key_hex(), "Treasury signer ready");

        let limiter = Arc::new(SlidingWindowLimiter::from_config(&self.config.rate_limit));
        let collaborators = Collaborators {
            invoices: Arc::new(RocksInvoiceStore::new(self.storage.clone())),
            randomness: Arc::new(OsRandomness),
            rate_limiter: limiter.clone(),
            dispatcher: Arc::new(treasury),
        };
        let state = build_state(&self.config, self.storage.clone(), collaborators)?;
        if !state.admin.is_enabled() {
            warn!("No admin secret configured; admin endpoints are disabled");
        }

        let worker = RefundRetryWorker::spawn(
            state.coordinator.outbox(),
            Duration::from_secs(self.config.refunds.retry_interval_secs.max(1)),
        );
        let cleanup = spawn_limiter_cleanup(limiter, Duration::from_secs(self.config.rate_limit.window_secs.max(1)));

        let app = create_app(state, &self.config.server);
        let addr = self.socket_addr()?;
        self.log_server_info(&addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        worker.stop();
        cleanup.abort();

        if let Err(e) = served {
            error!("Server error: {}", e);
            return Err(e.into());
        }
        info!("Wager engine stopped gracefully");
        Ok(())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.server.host.parse::<std::net::IpAddr>()?,
            self.config.server.port,
        )))
    }

    fn log_server_info(&self, addr: &SocketAddr) {
        info!("Starting wager engine on http://{}", addr);
        info!("   Data dir: {}", self.config.storage.data_dir);
        info!("   CORS: {:?}", self.config.server.cors_origins);
        info!("   Request timeout: {}s", self.config.server.request_timeout_secs);
        info!("   Activation threshold: {}", self.config.pool.activation_threshold);
        info!(
            "   Rate limit: {} entries / {}s",
            self.config.rate_limit.max_entries, self.config.rate_limit.window_secs
        );
    }
}

fn spawn_limiter_cleanup(limiter: Arc<SlidingWindowLimiter>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            limiter.cleanup();
        }
    })
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
