//! Signed-in player registry and presence tracking.

use crate::db::Store;
use crate::errors::AppError;
use crate::models::{Faction, GameId, PlayerId, PlayerRatings, Rating, rating_type};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Hosting,
    Joining,
    Hosted,
    Joined,
    Playing,
    SearchingLadder,
    StartingAutomatch,
}

impl PlayerState {
    pub fn as_client_str(&self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Hosting => "hosting",
            PlayerState::Joining => "joining",
            PlayerState::Hosted => "hosted",
            PlayerState::Joined => "joined",
            PlayerState::Playing => "playing",
            PlayerState::SearchingLadder => "searching_ladder",
            PlayerState::StartingAutomatch => "starting_automatch",
        }
    }
}

/// A signed-in player. Game membership is tracked by id only and resolved
/// through the registries, so a dropped player can never keep a game alive.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub login: String,
    pub alias: String,
    pub address: Option<String>,
    pub ratings: PlayerRatings,
    pub game_count: HashMap<String, u32>,
    pub friends: HashSet<PlayerId>,
    pub foes: HashSet<PlayerId>,
    pub user_groups: HashSet<String>,
    pub state: PlayerState,
    pub faction: Faction,
    /// Substate delivered through `GameOption("SubState", ..)` and consumed
    /// together with the next `GameState`, because the ICE adapter drops the
    /// second GameState argument.
    pub own_game_substate: Option<String>,
    pub game_id: Option<GameId>,
    pub afk_seconds: u32,
}

impl Player {
    pub fn new(id: PlayerId, login: &str, start_mean: f64, start_dev: f64) -> Self {
        Self {
            id,
            login: login.to_string(),
            alias: login.to_string(),
            address: None,
            ratings: PlayerRatings::new(start_mean, start_dev),
            game_count: HashMap::new(),
            friends: HashSet::new(),
            foes: HashSet::new(),
            user_groups: HashSet::new(),
            state: PlayerState::Idle,
            faction: Faction::Arm,
            own_game_substate: None,
            game_id: None,
            afk_seconds: 0,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.user_groups.contains("taf_server_administrators")
    }

    pub fn is_moderator(&self) -> bool {
        self.user_groups.contains("taf_moderators_global")
    }

    pub fn displayed_rating(&self, rating_type: &str) -> f64 {
        self.ratings.get(rating_type).penis_points()
    }

    pub fn to_player_info(&self) -> Value {
        let mut ratings = serde_json::Map::new();
        for rt in self.ratings.known_types() {
            let rating = self.ratings.get(rt);
            ratings.insert(
                rt.clone(),
                json!({
                    "rating": [rating.mean, rating.sigma],
                    "number_of_games": self.game_count.get(rt).copied().unwrap_or(0),
                }),
            );
        }
        json!({
            "id": self.id,
            "login": self.login,
            "alias": self.alias,
            "ratings": Value::Object(ratings),
            "state": self.state.as_client_str(),
            "afk_seconds": self.afk_seconds,
            "current_game_uid": self.game_id.unwrap_or(-1),
            "number_of_games": self
                .game_count
                .get(rating_type::GLOBAL)
                .copied()
                .unwrap_or(0),
        })
    }
}

pub struct PlayerService {
    store: Arc<dyn Store>,
    start_mean: f64,
    start_dev: f64,
    players: Mutex<HashMap<PlayerId, Arc<Mutex<Player>>>>,
    dirty_players: Mutex<HashSet<PlayerId>>,
    uniqueid_exempt: Mutex<HashSet<PlayerId>>,
}

impl PlayerService {
    pub fn new(store: Arc<dyn Store>, start_mean: f64, start_dev: f64) -> Self {
        Self {
            store,
            start_mean,
            start_dev,
            players: Mutex::new(HashMap::new()),
            dirty_players: Mutex::new(HashSet::new()),
            uniqueid_exempt: Mutex::new(HashSet::new()),
        }
    }

    pub async fn initialize(&self) -> Result<(), AppError> {
        self.update_data().await
    }

    /// Refreshes rarely-changing data such as the uniqueid-exempt set.
    pub async fn update_data(&self) -> Result<(), AppError> {
        let exempt = self.store.uniqueid_exempt_ids().await?;
        *self.uniqueid_exempt.lock().await = exempt;
        Ok(())
    }

    pub async fn add_player(&self, player: Player) -> Arc<Mutex<Player>> {
        let id = player.id;
        let player = Arc::new(Mutex::new(player));
        self.players.lock().await.insert(id, player.clone());
        player
    }

    pub async fn create_player(&self, id: PlayerId, login: &str) -> Arc<Mutex<Player>> {
        self.add_player(Player::new(id, login, self.start_mean, self.start_dev))
            .await
    }

    pub async fn get_player(&self, player_id: PlayerId) -> Option<Arc<Mutex<Player>>> {
        self.players.lock().await.get(&player_id).cloned()
    }

    pub async fn remove_player(&self, player_id: PlayerId) {
        if self.players.lock().await.remove(&player_id).is_some() {
            tracing::debug!("Removed player {player_id}");
        }
    }

    pub async fn len(&self) -> usize {
        self.players.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.players.lock().await.is_empty()
    }

    /// Clones every registered player. Used by the broadcaster, which must
    /// not take player locks while holding a game lock.
    pub async fn snapshot_all(&self) -> HashMap<PlayerId, Player> {
        let players: Vec<Arc<Mutex<Player>>> =
            self.players.lock().await.values().cloned().collect();
        let mut snapshot = HashMap::new();
        for player in players {
            let player = player.lock().await.clone();
            snapshot.insert(player.id, player);
        }
        snapshot
    }

    pub async fn mark_dirty(&self, player_id: PlayerId) {
        self.dirty_players.lock().await.insert(player_id);
    }

    /// Drains the dirty set, resolving still-registered players.
    pub async fn take_dirty(&self) -> Vec<Arc<Mutex<Player>>> {
        let ids: Vec<PlayerId> = self.dirty_players.lock().await.drain().collect();
        let players = self.players.lock().await;
        ids.iter()
            .filter_map(|id| players.get(id).cloned())
            .collect()
    }

    /// Sets the player's transient state, marking dirty only on change.
    pub async fn set_player_state(&self, player_id: PlayerId, new_state: PlayerState) {
        let Some(player) = self.get_player(player_id).await else {
            return;
        };
        let changed = {
            let mut player = player.lock().await;
            if player.state != new_state {
                player.state = new_state;
                true
            } else {
                false
            }
        };
        if changed {
            self.mark_dirty(player_id).await;
        }
    }

    /// Authoritative rating update from the rating pipeline.
    pub async fn on_player_rating_change(
        &self,
        player_id: PlayerId,
        rating_type: &str,
        new_rating: Rating,
    ) {
        let Some(player) = self.get_player(player_id).await else {
            tracing::debug!(
                "Received rating change for player {player_id} not in PlayerService"
            );
            return;
        };
        {
            let mut player = player.lock().await;
            player.ratings.set(rating_type, new_rating);
            *player.game_count.entry(rating_type.to_string()).or_insert(0) += 1;
        }
        self.mark_dirty(player_id).await;
    }

    /// Loads user groups, cached ratings and game counts from the store.
    pub async fn fetch_player_data(&self, player_id: PlayerId) -> Result<(), AppError> {
        let Some(player) = self.get_player(player_id).await else {
            return Err(AppError::NotFound(format!("player {player_id}")));
        };
        let groups = self.store.player_user_groups(player_id).await?;
        let ratings = self.store.player_ratings(player_id).await?;

        let mut player = player.lock().await;
        player.user_groups = groups;
        for (rating_type, mean, deviation, total_games) in ratings {
            player.ratings.set(&rating_type, Rating::new(mean, deviation));
            player.game_count.insert(rating_type, total_games);
        }
        Ok(())
    }

    pub async fn has_permission_role(
        &self,
        player_id: PlayerId,
        role_name: &str,
    ) -> Result<bool, AppError> {
        self.store.has_permission_role(player_id, role_name).await
    }

    pub async fn is_uniqueid_exempt(&self, player_id: PlayerId) -> bool {
        self.uniqueid_exempt.lock().await.contains(&player_id)
    }
}
