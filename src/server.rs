//! Service wiring and process lifecycle.

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::db::{PgStore, Store};
use crate::errors::AppError;
use crate::galactic_war::GalacticWarService;
use crate::games::{GameService, NullPublisher, ResultsPublisher};
use crate::models::{QueueMap, new_queue_map};
use crate::players::PlayerService;
use crate::protocol::ConnectionRegistry;
use crate::rating::{RaterConfig, RatingService};
use crate::tada::TadaService;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;

/// Shared server state: every service, wired once.
pub struct ServerInstance {
    pub config: ServerConfig,
    pub connections: Arc<ConnectionRegistry>,
    pub queues: QueueMap,
    pub player_service: Arc<PlayerService>,
    pub rating_service: Arc<RatingService>,
    pub game_service: Arc<GameService>,
    pub tada_service: Arc<TadaService>,
    pub galactic_war_service: Arc<GalacticWarService>,
    broadcaster: Arc<Broadcaster>,
    broadcast_tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ServerInstance {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn Store>,
        results_publisher: Arc<dyn ResultsPublisher>,
    ) -> Arc<Self> {
        let connections = Arc::new(ConnectionRegistry::new());
        let queues = new_queue_map();

        let player_service = Arc::new(PlayerService::new(
            store.clone(),
            config.start_rating_mean,
            config.start_rating_dev,
        ));
        let rating_service = Arc::new(RatingService::new(
            store.clone(),
            player_service.clone(),
            RaterConfig {
                start_mean: config.start_rating_mean,
                start_dev: config.start_rating_dev,
                beta: config.rating_beta,
                draw_probability: config.rating_draw_probability,
            },
        ));
        let game_service = Arc::new(GameService::new(
            store.clone(),
            player_service.clone(),
            rating_service.clone(),
            results_publisher,
            queues.clone(),
            config.strict_map_pool,
            config.publish_game_info_with_pings_only,
            config.game_setup_timeout,
        ));
        let tada_service = Arc::new(TadaService::new());
        let galactic_war_service = Arc::new(GalacticWarService::new(
            config.galactic_war.clone(),
            player_service.clone(),
            connections.clone(),
            queues.clone(),
        ));
        let broadcaster = Arc::new(Broadcaster::new(
            connections.clone(),
            game_service.clone(),
            player_service.clone(),
            tada_service.clone(),
            galactic_war_service.clone(),
            config.dirty_report_interval,
            config.ping_interval,
        ));

        Arc::new(Self {
            config,
            connections,
            queues,
            player_service,
            rating_service,
            game_service,
            tada_service,
            galactic_war_service,
            broadcaster,
            broadcast_tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Initializes every service and starts the periodic tasks. The
    /// galactic war service is subscribed to rating results here.
    pub async fn start(self: &Arc<Self>) -> Result<(), AppError> {
        self.player_service.initialize().await?;
        self.rating_service
            .initialize()
            .await
            .map_err(|e| AppError::Config(e.to_string()))?;
        self.game_service.initialize().await?;
        self.galactic_war_service.initialize().await?;

        self.rating_service
            .add_game_rating_callback(self.galactic_war_service.rating_callback())
            .await;

        let (report, ping) = self.broadcaster.start();
        self.broadcast_tasks.lock().await.extend([report, ping]);
        Ok(())
    }

    /// Drains the rating queue, stops the periodic tasks.
    pub async fn shutdown(&self) {
        self.rating_service.shutdown().await;
        self.galactic_war_service.shutdown().await;
        for task in self.broadcast_tasks.lock().await.drain(..) {
            task.abort();
        }
    }
}

/// Entry point used by the service binary: wire everything against
/// Postgres and run until a shutdown signal arrives.
pub async fn start_server() -> Result<(), AppError> {
    tracing_subscriber::fmt::init();
    let config = ServerConfig::from_env();

    let database_url = config
        .database_url
        .clone()
        .ok_or_else(|| AppError::Config("DATABASE_URL is not set".to_string()))?;
    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&database_url).await?);
    tracing::info!("PostgreSQL connection pool established");

    let instance = ServerInstance::new(config, store, Arc::new(NullPublisher));
    instance.start().await?;
    tracing::info!("Services started");

    shutdown_signal().await;
    instance.shutdown().await;
    Ok(())
}

/// Resolves on SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, shutting down");
        },
        _ = terminate => {
            tracing::info!("SIGTERM received, shutting down");
        },
    }
}
