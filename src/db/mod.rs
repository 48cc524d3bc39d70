//! Persistence boundary.
//!
//! Every table access the backbone needs goes through the [`Store`] trait so
//! services stay testable without a live database. The Postgres
//! implementation lives in [`postgres`].

pub mod memory;
pub mod postgres;

use crate::errors::AppError;
use crate::models::{FeaturedMod, GameId, GameOutcome, PlayerId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

pub use memory::MemStore;
pub use postgres::PgStore;

#[derive(Debug, Clone)]
pub struct GameStatsRow {
    pub id: GameId,
    pub game_type: String,
    pub game_mod: i32,
    pub host: PlayerId,
    pub map_id: Option<i32>,
    pub game_name: String,
    pub validity: i32,
    pub replay_hidden: bool,
}

#[derive(Debug, Clone)]
pub struct GamePlayerStatsRow {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub faction: i32,
    pub color: i32,
    pub team: i32,
    pub place: i32,
    pub mean: f64,
    pub deviation: f64,
}

#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub score: i64,
    pub result: String,
}

#[derive(Debug, Clone)]
pub struct RatingChangeRow {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub rating_type_id: i32,
    pub old_mean: f64,
    pub old_deviation: f64,
    pub new_mean: f64,
    pub new_deviation: f64,
}

#[derive(Debug, Clone)]
pub struct LeaderboardOutcomeUpdate {
    pub player_id: PlayerId,
    pub rating_type_id: i32,
    pub new_mean: f64,
    pub new_deviation: f64,
    pub outcome: GameOutcome,
    pub game_mode: String,
}

#[derive(Debug, Clone)]
pub struct LeaderboardRow {
    pub id: i32,
    pub technical_name: String,
    pub initializer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LeaderboardRatingRow {
    pub player_id: PlayerId,
    pub mean: f64,
    pub deviation: f64,
    pub rating: f64,
}

#[derive(Debug, Clone)]
pub struct MapVersionRow {
    pub id: i32,
    pub filename: String,
    pub ranked: bool,
}

#[derive(Debug, Clone)]
pub struct TeamkillRow {
    pub teamkiller: PlayerId,
    pub victim: PlayerId,
    pub game_id: GameId,
    pub gametime: i64,
}

#[derive(Debug, Clone)]
pub struct CoopResultRow {
    pub mission: i32,
    pub game_id: GameId,
    pub secondary: i32,
    pub time: String,
    pub player_count: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn max_game_id(&self) -> Result<Option<i64>, AppError>;

    async fn featured_mods(&self) -> Result<Vec<FeaturedMod>, AppError>;
    async fn ranked_mod_uids(&self) -> Result<HashSet<String>, AppError>;
    async fn mod_names(&self, uids: &[String]) -> Result<HashMap<String, String>, AppError>;
    async fn bump_mod_play_counts(&self, uids: &[String]) -> Result<(), AppError>;

    async fn find_map_version(
        &self,
        map_name: &str,
        crc: &str,
    ) -> Result<Option<MapVersionRow>, AppError>;

    async fn insert_game_stats(&self, row: &GameStatsRow) -> Result<(), AppError>;
    async fn insert_matchmaker_queue_game(
        &self,
        queue_id: i32,
        game_id: GameId,
    ) -> Result<(), AppError>;
    async fn update_game_stats_end_time(&self, game_id: GameId) -> Result<(), AppError>;
    async fn update_game_stats_validity(
        &self,
        game_id: GameId,
        validity: i32,
    ) -> Result<(), AppError>;
    async fn insert_game_player_stats(
        &self,
        rows: &[GamePlayerStatsRow],
    ) -> Result<(), AppError>;
    async fn update_game_player_scores(&self, rows: &[ScoreRow]) -> Result<(), AppError>;

    async fn leaderboards(&self) -> Result<Vec<LeaderboardRow>, AppError>;
    async fn leaderboard_ratings(
        &self,
        rating_type_id: i32,
    ) -> Result<Vec<LeaderboardRatingRow>, AppError>;
    async fn insert_default_leaderboard_rating(
        &self,
        player_id: PlayerId,
        rating_type_id: i32,
        mean: f64,
        deviation: f64,
    ) -> Result<(), AppError>;
    /// Returns the number of affected rows so callers can detect missing
    /// game_player_stats entries.
    async fn update_game_player_rating(&self, change: &RatingChangeRow) -> Result<u64, AppError>;
    async fn insert_rating_journal(&self, change: &RatingChangeRow) -> Result<(), AppError>;
    async fn apply_leaderboard_outcome(
        &self,
        update: &LeaderboardOutcomeUpdate,
    ) -> Result<(), AppError>;

    async fn player_user_groups(&self, player_id: PlayerId) -> Result<HashSet<String>, AppError>;
    async fn player_ratings(
        &self,
        player_id: PlayerId,
    ) -> Result<Vec<(String, f64, f64, u32)>, AppError>;
    async fn uniqueid_exempt_ids(&self) -> Result<HashSet<PlayerId>, AppError>;
    async fn has_permission_role(
        &self,
        player_id: PlayerId,
        role_name: &str,
    ) -> Result<bool, AppError>;

    async fn insert_teamkill(&self, row: &TeamkillRow) -> Result<(), AppError>;
    async fn coop_map_id(&self, filename: &str) -> Result<Option<i32>, AppError>;
    async fn insert_coop_result(&self, row: &CoopResultRow) -> Result<(), AppError>;
}
