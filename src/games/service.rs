//! Registry of active games, dirty-set coalescing and result publication.

use crate::db::Store;
use crate::games::game::{Game, GameArgs};
use crate::games::kind::{GameKind, InitMode};
use crate::models::{
    EndedGameInfo, FeaturedMod, GameId, GameLifecycle, InclusiveRange, MatchmakerQueue, PlayerId,
    PlayerRatings, QueueMap, VisibilityState,
};
use crate::players::PlayerService;
use crate::rating::RatingService;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Destination for finished-game results outside this process. Delivery is
/// fire-and-forget, at-least-once from our side.
#[async_trait]
pub trait ResultsPublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: &Value);
}

/// Default publisher when no message bus is wired up.
pub struct NullPublisher;

#[async_trait]
impl ResultsPublisher for NullPublisher {
    async fn publish(&self, routing_key: &str, _payload: &Value) {
        tracing::debug!("No message bus configured; dropping {routing_key}");
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyGameFlags {
    pub only_to_peers: bool,
    pub pings_only: bool,
}

pub struct CreateGameArgs {
    pub game_mode: String,
    pub host_id: Option<PlayerId>,
    pub host_login: String,
    pub name: String,
    pub map_name: String,
    pub visibility: VisibilityState,
    pub password: Option<String>,
    pub matchmaker_queue_id: Option<i32>,
    pub rating_type: Option<String>,
    pub displayed_rating_range: InclusiveRange,
    pub enforce_rating_range: bool,
    pub max_players: Option<usize>,
    pub replay_delay_seconds: i64,
    pub map_pool_map_ids: Option<HashSet<i32>>,
    pub galactic_war_planet_name: Option<String>,
}

impl Default for CreateGameArgs {
    fn default() -> Self {
        Self {
            game_mode: crate::models::featured_mod::DEFAULT.to_string(),
            host_id: None,
            host_login: String::new(),
            name: "None".to_string(),
            map_name: "SHERWOOD".to_string(),
            visibility: VisibilityState::Public,
            password: None,
            matchmaker_queue_id: None,
            rating_type: None,
            displayed_rating_range: InclusiveRange::default(),
            enforce_rating_range: false,
            max_players: None,
            replay_delay_seconds: 300,
            map_pool_map_ids: None,
            galactic_war_planet_name: None,
        }
    }
}

pub struct GameService {
    store: Arc<dyn Store>,
    player_service: Arc<PlayerService>,
    rating_service: Arc<RatingService>,
    results_publisher: Arc<dyn ResultsPublisher>,
    queues: QueueMap,

    games: Mutex<HashMap<GameId, Arc<Mutex<Game>>>>,
    dirty_games: Mutex<HashMap<GameId, DirtyGameFlags>>,
    dirty_queues: Mutex<HashSet<String>>,
    game_id_counter: AtomicI32,

    featured_mods: Mutex<HashMap<String, FeaturedMod>>,
    ranked_mods: Mutex<HashSet<String>>,

    strict_map_pool: bool,
    publish_game_info_with_pings_only: bool,
    game_setup_timeout: Duration,
}

impl GameService {
    pub fn new(
        store: Arc<dyn Store>,
        player_service: Arc<PlayerService>,
        rating_service: Arc<RatingService>,
        results_publisher: Arc<dyn ResultsPublisher>,
        queues: QueueMap,
        strict_map_pool: bool,
        publish_game_info_with_pings_only: bool,
        game_setup_timeout: Duration,
    ) -> Self {
        Self {
            store,
            player_service,
            rating_service,
            results_publisher,
            queues,
            games: Mutex::new(HashMap::new()),
            dirty_games: Mutex::new(HashMap::new()),
            dirty_queues: Mutex::new(HashSet::new()),
            game_id_counter: AtomicI32::new(0),
            featured_mods: Mutex::new(HashMap::new()),
            ranked_mods: Mutex::new(HashSet::new()),
            strict_map_pool,
            publish_game_info_with_pings_only,
            game_setup_timeout,
        }
    }

    pub async fn initialize(&self) -> Result<(), crate::errors::AppError> {
        self.initialise_game_counter().await?;
        self.update_data().await
    }

    /// Game ids are allocated here, not by the database: games that never
    /// start are never inserted, so the id column cannot auto-increment.
    async fn initialise_game_counter(&self) -> Result<(), crate::errors::AppError> {
        let max = self.store.max_game_id().await?.unwrap_or(0);
        self.game_id_counter.store(max as i32, Ordering::SeqCst);
        Ok(())
    }

    /// Reloads the mostly-constant catalog data.
    pub async fn update_data(&self) -> Result<(), crate::errors::AppError> {
        let mods = self.store.featured_mods().await?;
        *self.featured_mods.lock().await = mods
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        *self.ranked_mods.lock().await = self.store.ranked_mod_uids().await?;
        Ok(())
    }

    pub fn create_uid(&self) -> GameId {
        self.game_id_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn publish_pings_only(&self) -> bool {
        self.publish_game_info_with_pings_only
    }

    pub async fn featured_mod(&self, name: &str) -> Option<FeaturedMod> {
        self.featured_mods.lock().await.get(name).cloned()
    }

    pub async fn ranked_mods(&self) -> HashSet<String> {
        self.ranked_mods.lock().await.clone()
    }

    /// Ranked maps are the union of the queues' rating-1500 pools.
    pub async fn available_ranked_map_ids(&self) -> Option<HashSet<i32>> {
        let queues = self.queues.lock().await;
        if queues.is_empty() {
            return None;
        }
        let mut ids = HashSet::new();
        for queue in queues.values() {
            if let Some(pool) = queue.map_pool_for_rating(1500.0) {
                ids.extend(pool.map_ids());
            }
        }
        Some(ids)
    }

    pub async fn queues_snapshot(&self) -> HashMap<String, MatchmakerQueue> {
        self.queues.lock().await.clone()
    }

    /// Main entrypoint for creating new games.
    pub async fn create_game(self: &Arc<Self>, args: CreateGameArgs) -> (GameId, Arc<Mutex<Game>>) {
        let game_id = self.create_uid();
        let kind = GameKind::from_featured_mod(&args.game_mode);
        tracing::info!(
            "[create_game] id={game_id}, game_mode={}, kind={kind:?}",
            args.game_mode
        );
        let mut game = Game::new(GameArgs {
            id: game_id,
            kind,
            host_id: args.host_id,
            host_login: args.host_login,
            name: args.name,
            map_name: args.map_name,
            game_mode: args.game_mode,
            mod_version: None,
            matchmaker_queue_id: args.matchmaker_queue_id,
            rating_type: args.rating_type,
            displayed_rating_range: args.displayed_rating_range,
            enforce_rating_range: args.enforce_rating_range,
            max_players: args.max_players,
            replay_delay_seconds: args.replay_delay_seconds,
            map_pool_map_ids: args.map_pool_map_ids,
            galactic_war_planet_name: args.galactic_war_planet_name,
        });
        game.visibility = args.visibility;
        game.password = args.password;

        let game = Arc::new(Mutex::new(game));
        self.games.lock().await.insert(game_id, game.clone());
        self.mark_dirty(game_id, false, false).await;
        self.spawn_setup_timeout(game_id, kind.init_mode());
        (game_id, game)
    }

    /// A game that never leaves its setup phase is cancelled after the
    /// configured timeout, with validity unchanged and no results.
    fn spawn_setup_timeout(self: &Arc<Self>, game_id: GameId, init_mode: InitMode) {
        let service = self.clone();
        let timeout = self.game_setup_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(game) = service.get(game_id).await else {
                return;
            };
            let ended = {
                let mut game = game.lock().await;
                let timed_out = match init_mode {
                    InitMode::NormalLobby => game.state == GameLifecycle::Initializing,
                    InitMode::AutoLobby => matches!(
                        game.state,
                        GameLifecycle::Initializing | GameLifecycle::Staging
                    ),
                };
                if timed_out {
                    tracing::debug!(
                        "Game {game_id} setup timed out waiting to be hosted; cancelling"
                    );
                    Some(game.on_game_end(service.store.as_ref()).await)
                } else {
                    None
                }
            };
            if let Some(info) = ended {
                service.finalize_game_end(game_id, info).await;
            }
        });
    }

    pub async fn get(&self, game_id: GameId) -> Option<Arc<Mutex<Game>>> {
        self.games.lock().await.get(&game_id).cloned()
    }

    pub async fn contains(&self, game_id: GameId) -> bool {
        self.games.lock().await.contains_key(&game_id)
    }

    pub async fn game_count(&self) -> usize {
        self.games.lock().await.len()
    }

    pub async fn remove_game(&self, game_id: GameId) {
        self.games.lock().await.remove(&game_id);
        self.dirty_games.lock().await.remove(&game_id);
    }

    /// Flags are merged by OR-ing into any existing record for the game.
    pub async fn mark_dirty(&self, game_id: GameId, only_to_peers: bool, pings_only: bool) {
        let mut dirty = self.dirty_games.lock().await;
        let flags = dirty.entry(game_id).or_default();
        flags.only_to_peers |= only_to_peers;
        flags.pings_only |= pings_only;
    }

    pub async fn mark_queue_dirty(&self, queue_name: &str) {
        self.dirty_queues.lock().await.insert(queue_name.to_string());
    }

    /// Drains both dirty sets for a broadcaster tick.
    pub async fn take_dirty(
        &self,
    ) -> (
        Vec<(GameId, Arc<Mutex<Game>>, DirtyGameFlags)>,
        Vec<MatchmakerQueue>,
    ) {
        let drained: Vec<(GameId, DirtyGameFlags)> =
            self.dirty_games.lock().await.drain().collect();
        let games = self.games.lock().await;
        let dirty_games = drained
            .into_iter()
            .filter_map(|(id, flags)| games.get(&id).map(|game| (id, game.clone(), flags)))
            .collect();
        drop(games);

        let queue_names: Vec<String> = self.dirty_queues.lock().await.drain().collect();
        let queues = self.queues.lock().await;
        let dirty_queues = queue_names
            .iter()
            .filter_map(|name| queues.get(name).cloned())
            .collect();
        (dirty_games, dirty_queues)
    }

    /// LAUNCHING → LIVE for the given game, with the catalog data and the
    /// live roster's cached ratings gathered here.
    pub async fn make_game_live(&self, game_id: GameId) {
        let Some(game) = self.get(game_id).await else {
            return;
        };
        let players = game.lock().await.players();
        let mut ratings: HashMap<PlayerId, PlayerRatings> = HashMap::new();
        for pid in players {
            if let Some(player) = self.player_service.get_player(pid).await {
                ratings.insert(pid, player.lock().await.ratings.clone());
            }
        }
        let queues = self.queues_snapshot().await;
        let ranked_map_ids = self.available_ranked_map_ids().await;
        let ranked_mods = self.ranked_mods().await;
        let featured_mod_id = {
            let game_mode = game.lock().await.game_mode.clone();
            self.featured_mod(&game_mode).await.map(|m| m.id).unwrap_or(0)
        };
        let mut game = game.lock().await;
        game.on_live(
            self.store.as_ref(),
            &queues,
            ranked_map_ids.as_ref(),
            &ranked_mods,
            self.strict_map_pool,
            featured_mod_id,
            &ratings,
        )
        .await;
    }

    /// Marks the ended game dirty and forwards its results.
    pub async fn finalize_game_end(&self, game_id: GameId, info: Option<EndedGameInfo>) {
        self.mark_dirty(game_id, false, false).await;
        if let Some(info) = info {
            self.publish_game_results(info).await;
        }
    }

    /// Publishes results onto the bus and feeds valid rated games to the
    /// rating pipeline.
    pub async fn publish_game_results(&self, info: EndedGameInfo) {
        match serde_json::to_value(&info) {
            Ok(payload) => {
                self.results_publisher
                    .publish("success.gameResults.create", &payload)
                    .await;
            }
            Err(e) => tracing::error!("Failed to serialize game results: {e}"),
        }

        if info.validity.is_valid() && info.rating_type.is_some() {
            if let Err(e) = self.rating_service.enqueue(info).await {
                tracing::warn!("Rating service refused results: {e}");
            }
        }
    }
}
