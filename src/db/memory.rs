//! In-memory [`Store`] used by tests and local development.
//!
//! Mirrors the SQL semantics closely enough for the services to observe the
//! same row counts, streak arithmetic and recent-score strings they would
//! see from Postgres.

use crate::db::{
    CoopResultRow, GamePlayerStatsRow, GameStatsRow, LeaderboardOutcomeUpdate,
    LeaderboardRatingRow, LeaderboardRow, MapVersionRow, RatingChangeRow, ScoreRow, Store,
    TeamkillRow,
};
use crate::errors::AppError;
use crate::models::{FeaturedMod, GameId, GameOutcome, PlayerId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct LeaderboardRatingState {
    pub mean: f64,
    pub deviation: f64,
    pub total_games: u32,
    pub won_games: u32,
    pub drawn_games: u32,
    pub lost_games: u32,
    pub streak: i32,
    pub best_streak: i32,
    pub recent_scores: String,
    pub recent_mod: String,
}

#[derive(Default)]
struct Inner {
    max_game_id: Option<i64>,
    featured_mods: Vec<FeaturedMod>,
    ranked_mods: HashSet<String>,
    mod_names: HashMap<String, String>,
    map_versions: Vec<MapVersionRow>,
    leaderboards: Vec<LeaderboardRow>,

    game_stats: HashMap<GameId, GameStatsRow>,
    game_ended: HashSet<GameId>,
    queue_games: Vec<(i32, GameId)>,
    game_player_stats: Vec<GamePlayerStatsRow>,
    scores: Vec<ScoreRow>,
    rating_changes: Vec<RatingChangeRow>,
    journal: Vec<RatingChangeRow>,
    leaderboard_ratings: HashMap<(PlayerId, i32), LeaderboardRatingState>,
    teamkills: Vec<TeamkillRow>,
    coop_results: Vec<CoopResultRow>,
    uniqueid_exempt: HashSet<PlayerId>,
    user_groups: HashMap<PlayerId, HashSet<String>>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        let store = Self::default();
        {
            let mut inner = store.inner.lock().unwrap();
            inner.leaderboards = vec![
                LeaderboardRow {
                    id: 1,
                    technical_name: "global".to_string(),
                    initializer: None,
                },
                LeaderboardRow {
                    id: 2,
                    technical_name: "ladder1v1".to_string(),
                    initializer: Some("global".to_string()),
                },
                LeaderboardRow {
                    id: 3,
                    technical_name: "ladder1v1_tavmod".to_string(),
                    initializer: Some("ladder1v1".to_string()),
                },
            ];
            inner.featured_mods = vec![FeaturedMod {
                id: 1,
                name: "tacc".to_string(),
                full_name: "Total Annihilation".to_string(),
                description: "base game".to_string(),
                publish: true,
                order: 0,
            }];
        }
        store
    }

    pub fn set_max_game_id(&self, id: i64) {
        self.inner.lock().unwrap().max_game_id = Some(id);
    }

    pub fn add_ranked_mod(&self, uid: &str) {
        self.inner.lock().unwrap().ranked_mods.insert(uid.to_string());
    }

    pub fn add_map_version(&self, row: MapVersionRow) {
        self.inner.lock().unwrap().map_versions.push(row);
    }

    pub fn seed_leaderboard_rating(
        &self,
        player_id: PlayerId,
        rating_type_id: i32,
        mean: f64,
        deviation: f64,
    ) {
        self.inner.lock().unwrap().leaderboard_ratings.insert(
            (player_id, rating_type_id),
            LeaderboardRatingState {
                mean,
                deviation,
                ..Default::default()
            },
        );
    }

    pub fn game_player_stats_rows(&self) -> Vec<GamePlayerStatsRow> {
        self.inner.lock().unwrap().game_player_stats.clone()
    }

    pub fn score_rows(&self) -> Vec<ScoreRow> {
        self.inner.lock().unwrap().scores.clone()
    }

    pub fn journal_rows(&self) -> Vec<RatingChangeRow> {
        self.inner.lock().unwrap().journal.clone()
    }

    pub fn leaderboard_rating(
        &self,
        player_id: PlayerId,
        rating_type_id: i32,
    ) -> Option<LeaderboardRatingState> {
        self.inner
            .lock()
            .unwrap()
            .leaderboard_ratings
            .get(&(player_id, rating_type_id))
            .cloned()
    }

    pub fn game_stats_row(&self, game_id: GameId) -> Option<GameStatsRow> {
        self.inner.lock().unwrap().game_stats.get(&game_id).cloned()
    }

    pub fn game_marked_ended(&self, game_id: GameId) -> bool {
        self.inner.lock().unwrap().game_ended.contains(&game_id)
    }

    pub fn teamkill_rows(&self) -> Vec<TeamkillRow> {
        self.inner.lock().unwrap().teamkills.clone()
    }

    pub fn set_user_groups(&self, player_id: PlayerId, groups: &[&str]) {
        self.inner.lock().unwrap().user_groups.insert(
            player_id,
            groups.iter().map(|g| g.to_string()).collect(),
        );
    }

    pub fn add_uniqueid_exempt(&self, player_id: PlayerId) {
        self.inner.lock().unwrap().uniqueid_exempt.insert(player_id);
    }
}

#[async_trait]
impl Store for MemStore {
    async fn max_game_id(&self) -> Result<Option<i64>, AppError> {
        Ok(self.inner.lock().unwrap().max_game_id)
    }

    async fn featured_mods(&self) -> Result<Vec<FeaturedMod>, AppError> {
        Ok(self.inner.lock().unwrap().featured_mods.clone())
    }

    async fn ranked_mod_uids(&self) -> Result<HashSet<String>, AppError> {
        Ok(self.inner.lock().unwrap().ranked_mods.clone())
    }

    async fn mod_names(&self, uids: &[String]) -> Result<HashMap<String, String>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(uids
            .iter()
            .filter_map(|uid| {
                inner
                    .mod_names
                    .get(uid)
                    .map(|name| (uid.clone(), name.clone()))
            })
            .collect())
    }

    async fn bump_mod_play_counts(&self, _uids: &[String]) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_map_version(
        &self,
        map_name: &str,
        crc: &str,
    ) -> Result<Option<MapVersionRow>, AppError> {
        let suffix = format!("/{map_name}/{crc}");
        Ok(self
            .inner
            .lock()
            .unwrap()
            .map_versions
            .iter()
            .find(|m| m.filename.ends_with(&suffix))
            .cloned())
    }

    async fn insert_game_stats(&self, row: &GameStatsRow) -> Result<(), AppError> {
        self.inner
            .lock()
            .unwrap()
            .game_stats
            .insert(row.id, row.clone());
        Ok(())
    }

    async fn insert_matchmaker_queue_game(
        &self,
        queue_id: i32,
        game_id: GameId,
    ) -> Result<(), AppError> {
        self.inner.lock().unwrap().queue_games.push((queue_id, game_id));
        Ok(())
    }

    async fn update_game_stats_end_time(&self, game_id: GameId) -> Result<(), AppError> {
        self.inner.lock().unwrap().game_ended.insert(game_id);
        Ok(())
    }

    async fn update_game_stats_validity(
        &self,
        game_id: GameId,
        validity: i32,
    ) -> Result<(), AppError> {
        if let Some(row) = self.inner.lock().unwrap().game_stats.get_mut(&game_id) {
            row.validity = validity;
        }
        Ok(())
    }

    async fn insert_game_player_stats(
        &self,
        rows: &[GamePlayerStatsRow],
    ) -> Result<(), AppError> {
        self.inner
            .lock()
            .unwrap()
            .game_player_stats
            .extend(rows.iter().cloned());
        Ok(())
    }

    async fn update_game_player_scores(&self, rows: &[ScoreRow]) -> Result<(), AppError> {
        self.inner.lock().unwrap().scores.extend(rows.iter().cloned());
        Ok(())
    }

    async fn leaderboards(&self) -> Result<Vec<LeaderboardRow>, AppError> {
        Ok(self.inner.lock().unwrap().leaderboards.clone())
    }

    async fn leaderboard_ratings(
        &self,
        rating_type_id: i32,
    ) -> Result<Vec<LeaderboardRatingRow>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .leaderboard_ratings
            .iter()
            .filter(|((_, type_id), _)| *type_id == rating_type_id)
            .map(|((player_id, _), state)| LeaderboardRatingRow {
                player_id: *player_id,
                mean: state.mean,
                deviation: state.deviation,
                rating: state.mean - 3.0 * state.deviation,
            })
            .collect())
    }

    async fn insert_default_leaderboard_rating(
        &self,
        player_id: PlayerId,
        rating_type_id: i32,
        mean: f64,
        deviation: f64,
    ) -> Result<(), AppError> {
        self.inner.lock().unwrap().leaderboard_ratings.insert(
            (player_id, rating_type_id),
            LeaderboardRatingState {
                mean,
                deviation,
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn update_game_player_rating(&self, change: &RatingChangeRow) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let affected = inner
            .game_player_stats
            .iter()
            .filter(|row| row.game_id == change.game_id && row.player_id == change.player_id)
            .count() as u64;
        if affected > 0 {
            inner.rating_changes.push(change.clone());
        }
        Ok(affected)
    }

    async fn insert_rating_journal(&self, change: &RatingChangeRow) -> Result<(), AppError> {
        self.inner.lock().unwrap().journal.push(change.clone());
        Ok(())
    }

    async fn apply_leaderboard_outcome(
        &self,
        update: &LeaderboardOutcomeUpdate,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .leaderboard_ratings
            .entry((update.player_id, update.rating_type_id))
            .or_default();
        let score: i32 = match update.outcome {
            GameOutcome::Victory => 1,
            GameOutcome::Draw | GameOutcome::MutualDraw => 0,
            _ => -1,
        };
        state.mean = update.new_mean;
        state.deviation = update.new_deviation;
        state.total_games += 1;
        match score {
            1 => state.won_games += 1,
            0 => state.drawn_games += 1,
            _ => state.lost_games += 1,
        }
        let old_streak = state.streak;
        state.streak = if old_streak * score >= 0 {
            old_streak + score
        } else {
            score
        };
        if old_streak > state.best_streak {
            state.best_streak = old_streak;
        }
        let mut recent = format!("{}{}", score + 1, state.recent_scores);
        recent.truncate(10);
        state.recent_scores = recent;
        state.recent_mod = update.game_mode.clone();
        Ok(())
    }

    async fn player_user_groups(&self, player_id: PlayerId) -> Result<HashSet<String>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .user_groups
            .get(&player_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn player_ratings(
        &self,
        player_id: PlayerId,
    ) -> Result<Vec<(String, f64, f64, u32)>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .leaderboard_ratings
            .iter()
            .filter(|((pid, _), _)| *pid == player_id)
            .filter_map(|((_, type_id), state)| {
                inner
                    .leaderboards
                    .iter()
                    .find(|l| l.id == *type_id)
                    .map(|l| {
                        (
                            l.technical_name.clone(),
                            state.mean,
                            state.deviation,
                            state.total_games,
                        )
                    })
            })
            .collect())
    }

    async fn uniqueid_exempt_ids(&self) -> Result<HashSet<PlayerId>, AppError> {
        Ok(self.inner.lock().unwrap().uniqueid_exempt.clone())
    }

    async fn has_permission_role(
        &self,
        player_id: PlayerId,
        role_name: &str,
    ) -> Result<bool, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .user_groups
            .get(&player_id)
            .map(|groups| groups.contains(role_name))
            .unwrap_or(false))
    }

    async fn insert_teamkill(&self, row: &TeamkillRow) -> Result<(), AppError> {
        self.inner.lock().unwrap().teamkills.push(row.clone());
        Ok(())
    }

    async fn coop_map_id(&self, filename: &str) -> Result<Option<i32>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .map_versions
            .iter()
            .position(|m| m.filename == filename)
            .map(|idx| idx as i32 + 1))
    }

    async fn insert_coop_result(&self, row: &CoopResultRow) -> Result<(), AppError> {
        self.inner.lock().unwrap().coop_results.push(row.clone());
        Ok(())
    }
}
