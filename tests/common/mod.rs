//! Shared helpers for the integration scenarios.
#![allow(dead_code)]

use galactic_wars_be::broadcast::Broadcaster;
use galactic_wars_be::db::{MapVersionRow, MemStore, Store};
use galactic_wars_be::games::{CreateGameArgs, GameConnection, GameService, NullPublisher};
use galactic_wars_be::models::{GameId, PlayerId, QueueMap, new_queue_map};
use galactic_wars_be::players::{PlayerService, PlayerState};
use galactic_wars_be::protocol::{
    ChannelProtocol, ConnectionRegistry, GameClientMessage, GameProtocol,
};
use galactic_wars_be::rating::{RaterConfig, RatingService};
use galactic_wars_be::tada::TadaService;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct TestServer {
    pub store: Arc<MemStore>,
    pub connections: Arc<ConnectionRegistry>,
    pub queues: QueueMap,
    pub player_service: Arc<PlayerService>,
    pub rating_service: Arc<RatingService>,
    pub game_service: Arc<GameService>,
    pub tada_service: Arc<TadaService>,
}

impl TestServer {
    pub async fn start() -> Self {
        let store = Arc::new(MemStore::new());
        store.add_map_version(MapVersionRow {
            id: 1,
            filename: "total2.hpi/SHERWOOD/cafe".to_string(),
            ranked: true,
        });

        let connections = Arc::new(ConnectionRegistry::new());
        let queues = new_queue_map();
        let player_service = Arc::new(PlayerService::new(
            store.clone() as Arc<dyn Store>,
            1500.0,
            500.0,
        ));
        let rating_service = Arc::new(RatingService::new(
            store.clone() as Arc<dyn Store>,
            player_service.clone(),
            RaterConfig {
                start_mean: 1500.0,
                start_dev: 500.0,
                beta: 250.0,
                draw_probability: 0.10,
            },
        ));
        let game_service = Arc::new(GameService::new(
            store.clone() as Arc<dyn Store>,
            player_service.clone(),
            rating_service.clone(),
            Arc::new(NullPublisher),
            queues.clone(),
            false,
            false,
            Duration::from_secs(60),
        ));

        player_service.initialize().await.unwrap();
        rating_service.initialize().await.unwrap();
        game_service.initialize().await.unwrap();

        Self {
            store,
            connections,
            queues,
            player_service,
            rating_service,
            game_service,
            tada_service: Arc::new(TadaService::new()),
        }
    }

    pub fn broadcaster(&self, galactic_war: Arc<galactic_wars_be::galactic_war::GalacticWarService>) -> Broadcaster {
        Broadcaster::new(
            self.connections.clone(),
            self.game_service.clone(),
            self.player_service.clone(),
            self.tada_service.clone(),
            galactic_war,
            Duration::from_secs(1),
            Duration::from_secs(45),
        )
    }

    /// Signs a player in and registers an authenticated lobby connection.
    pub async fn sign_in(
        &self,
        player_id: PlayerId,
        login: &str,
    ) -> mpsc::UnboundedReceiver<Value> {
        self.player_service.create_player(player_id, login).await;
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.register(Some(player_id), true, tx).await;
        rx
    }

    /// Attaches a game client to a game, returning the connection handle
    /// and the receiver of messages sent to that client.
    pub async fn open_game_connection(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        state: PlayerState,
    ) -> (GameConnection, mpsc::UnboundedReceiver<Value>) {
        let player = self
            .player_service
            .get_player(player_id)
            .await
            .expect("player must be signed in first");
        {
            let mut player = player.lock().await;
            player.state = state;
            player.game_id = Some(game_id);
        }
        let (protocol, rx) = ChannelProtocol::new();
        let connection = GameConnection::new(
            game_id,
            player_id,
            self.store.clone() as Arc<dyn Store>,
            self.game_service.clone(),
            self.player_service.clone(),
            self.connections.clone(),
            Arc::new(protocol) as Arc<dyn GameProtocol>,
        );
        (connection, rx)
    }

    pub async fn host_custom_game(&self, host_id: PlayerId, host_login: &str) -> GameId {
        let (game_id, _game) = self
            .game_service
            .create_game(CreateGameArgs {
                host_id: Some(host_id),
                host_login: host_login.to_string(),
                name: format!("{host_login}'s game"),
                ..Default::default()
            })
            .await;
        game_id
    }
}

pub async fn send(connection: &mut GameConnection, command: &str, args: Vec<Value>) {
    connection
        .handle_message(&GameClientMessage::new(command, args))
        .await;
}

/// Reports a lifecycle state the way the client does: the minor state goes
/// out first in a `GameOption("SubState", ..)`.
pub async fn report_state(connection: &mut GameConnection, major: &str, minor: &str) {
    send(
        connection,
        "GameOption",
        vec![json!("SubState"), json!(minor)],
    )
    .await;
    send(connection, "GameState", vec![json!(major)]).await;
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<Value>) -> Vec<Value> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

pub fn commands(messages: &[Value]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| m["command"].as_str().map(|s| s.to_string()))
        .collect()
}
