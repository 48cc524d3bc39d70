//! The rating queue: a single consumer that rates finished games in the
//! order they were finalized, persists the deltas and fans the new ratings
//! out to registered callbacks.

use crate::db::{LeaderboardOutcomeUpdate, RatingChangeRow, Store};
use crate::models::{
    EndedGameInfo, OutcomeLikelihoods, PlayerId, RankedRating, Rating, TeamId,
};
use crate::players::PlayerService;
use crate::rating::error::RatingError;
use crate::rating::rater::{GameRater, RaterConfig};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Invoked after each rated game, in registration order, with the game,
/// the pre-game leaderboard-ranked ratings, the post-game ratings and the
/// per-team outcome likelihoods.
pub type RatingCallback = Arc<
    dyn Fn(
            EndedGameInfo,
            HashMap<PlayerId, RankedRating>,
            HashMap<PlayerId, Rating>,
            HashMap<TeamId, OutcomeLikelihoods>,
        ) -> BoxFuture<'static, ()>
        + Send
        + Sync,
>;

pub struct RatingService {
    store: Arc<dyn Store>,
    player_service: Arc<PlayerService>,
    config: RaterConfig,

    accept_input: AtomicBool,
    backlog: AtomicUsize,
    sender: Mutex<Option<mpsc::UnboundedSender<EndedGameInfo>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    callbacks: Mutex<Vec<RatingCallback>>,
    rating_type_ids: Mutex<HashMap<String, i32>>,
}

impl RatingService {
    pub fn new(
        store: Arc<dyn Store>,
        player_service: Arc<PlayerService>,
        config: RaterConfig,
    ) -> Self {
        Self {
            store,
            player_service,
            config,
            accept_input: AtomicBool::new(false),
            backlog: AtomicUsize::new(0),
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
            rating_type_ids: Mutex::new(HashMap::new()),
        }
    }

    pub async fn add_game_rating_callback(&self, callback: RatingCallback) {
        self.callbacks.lock().await.push(callback);
    }

    pub async fn initialize(self: &Arc<Self>) -> Result<(), RatingError> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            tracing::error!("Service already running or not properly shut down.");
            return Ok(());
        }
        self.update_data().await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<EndedGameInfo>();
        *self.sender.lock().await = Some(tx);
        self.accept_input.store(true, Ordering::SeqCst);

        let service = self.clone();
        *worker = Some(tokio::spawn(async move {
            tracing::debug!("RatingService started");
            while let Some(game_info) = rx.recv().await {
                tracing::debug!("Now rating game {}", game_info.game_id);
                match service.rate(&game_info).await {
                    Ok(()) => tracing::debug!("Done rating game {}", game_info.game_id),
                    Err(RatingError::Rating(e)) => {
                        tracing::warn!("Error rating game {}: {e}", game_info.game_id);
                    }
                    Err(e) => {
                        tracing::error!("Failed rating game {}: {e}", game_info.game_id);
                    }
                }
                service.backlog.fetch_sub(1, Ordering::SeqCst);
            }
            tracing::debug!("RatingService stopped");
        }));
        Ok(())
    }

    pub async fn update_data(&self) -> Result<(), RatingError> {
        let leaderboards = self.store.leaderboards().await.map_err(RatingError::App)?;
        *self.rating_type_ids.lock().await = leaderboards
            .into_iter()
            .map(|row| (row.technical_name, row.id))
            .collect();
        Ok(())
    }

    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    pub async fn enqueue(&self, game_info: EndedGameInfo) -> Result<(), RatingError> {
        if !self.accept_input.load(Ordering::SeqCst) {
            tracing::warn!("Dropped rating request for game {}", game_info.game_id);
            return Err(RatingError::ServiceNotReady);
        }
        let sender = self.sender.lock().await;
        match sender.as_ref() {
            Some(tx) => {
                tracing::debug!("Queued up rating request for game {}", game_info.game_id);
                self.backlog.fetch_add(1, Ordering::SeqCst);
                tx.send(game_info).map_err(|_| RatingError::ServiceNotReady)
            }
            None => Err(RatingError::ServiceNotReady),
        }
    }

    async fn rate(&self, game_info: &EndedGameInfo) -> Result<(), RatingError> {
        let rating_type = game_info
            .rating_type
            .as_deref()
            .ok_or_else(|| RatingError::Rating("game has no rating type".to_string()))?;

        let player_ids: HashSet<PlayerId> = game_info.player_ids().collect();
        let ranked = self.get_player_ratings(&player_ids, rating_type).await?;
        let old_ratings: HashMap<PlayerId, Rating> =
            ranked.iter().map(|(pid, r)| (*pid, r.rating())).collect();

        let (new_ratings, likelihoods) =
            GameRater::compute_rating(&game_info.player_summaries, &old_ratings, &self.config)?;

        let callbacks: Vec<RatingCallback> = self.callbacks.lock().await.clone();
        for callback in callbacks {
            callback(
                game_info.clone(),
                ranked.clone(),
                new_ratings.clone(),
                likelihoods.clone(),
            )
            .await;
        }

        self.persist_rating_changes(game_info, rating_type, &old_ratings, &new_ratings)
            .await
    }

    /// Everyone's rating on the leaderboard, ranked by displayed rating,
    /// creating first-seen rows for players without one.
    pub async fn get_player_ratings(
        &self,
        player_ids: &HashSet<PlayerId>,
        rating_type: &str,
    ) -> Result<HashMap<PlayerId, RankedRating>, RatingError> {
        let rating_type_id = self.rating_type_id(rating_type).await?;

        let mut rows = self
            .store
            .leaderboard_ratings(rating_type_id)
            .await
            .map_err(RatingError::App)?;
        let present: HashSet<PlayerId> = rows.iter().map(|r| r.player_id).collect();
        for pid in player_ids {
            if !present.contains(pid) {
                self.store
                    .insert_default_leaderboard_rating(
                        *pid,
                        rating_type_id,
                        self.config.start_mean,
                        self.config.start_dev,
                    )
                    .await
                    .map_err(RatingError::App)?;
                rows.push(crate::db::LeaderboardRatingRow {
                    player_id: *pid,
                    mean: self.config.start_mean,
                    deviation: self.config.start_dev,
                    rating: self.config.start_mean - 3.0 * self.config.start_dev,
                });
            }
        }

        rows.sort_by(|a, b| b.rating.partial_cmp(&a.rating).unwrap_or(std::cmp::Ordering::Equal));
        let leaderboard_size = rows.len();
        Ok(rows
            .into_iter()
            .enumerate()
            .filter(|(_, row)| player_ids.contains(&row.player_id))
            .map(|(rank, row)| {
                (
                    row.player_id,
                    RankedRating {
                        mean: row.mean,
                        sigma: row.deviation,
                        rank,
                        leaderboard_size,
                    },
                )
            })
            .collect())
    }

    async fn rating_type_id(&self, rating_type: &str) -> Result<i32, RatingError> {
        let ids = self.rating_type_ids.lock().await;
        if ids.is_empty() {
            return Err(RatingError::ServiceNotReady);
        }
        ids.get(rating_type)
            .copied()
            .ok_or_else(|| RatingError::Rating(format!("Unknown rating type {rating_type}")))
    }

    async fn persist_rating_changes(
        &self,
        game_info: &EndedGameInfo,
        rating_type: &str,
        old_ratings: &HashMap<PlayerId, Rating>,
        new_ratings: &HashMap<PlayerId, Rating>,
    ) -> Result<(), RatingError> {
        tracing::debug!("Saving rating change stats for game {}", game_info.game_id);
        let rating_type_id = self.rating_type_id(rating_type).await?;

        for summary in &game_info.player_summaries {
            let old = old_ratings[&summary.player_id];
            let new = new_ratings[&summary.player_id];
            tracing::debug!(
                "New {rating_type} rating for player {}: {old:?} -> {new:?}",
                summary.player_id
            );

            let change = RatingChangeRow {
                game_id: game_info.game_id,
                player_id: summary.player_id,
                rating_type_id,
                old_mean: old.mean,
                old_deviation: old.sigma,
                new_mean: new.mean,
                new_deviation: new.sigma,
            };
            let affected = self
                .store
                .update_game_player_rating(&change)
                .await
                .map_err(RatingError::App)?;
            if affected == 0 {
                tracing::warn!(
                    "No game_player_stats row for game {} player {}; skipping journal",
                    game_info.game_id,
                    summary.player_id
                );
                continue;
            }
            self.store
                .insert_rating_journal(&change)
                .await
                .map_err(RatingError::App)?;
            self.store
                .apply_leaderboard_outcome(&LeaderboardOutcomeUpdate {
                    player_id: summary.player_id,
                    rating_type_id,
                    new_mean: new.mean,
                    new_deviation: new.sigma,
                    outcome: summary.outcome,
                    game_mode: game_info.game_mode.clone(),
                })
                .await
                .map_err(RatingError::App)?;

            self.player_service
                .on_player_rating_change(summary.player_id, rating_type, new)
                .await;
        }
        Ok(())
    }

    /// Blocks until the queue has been emptied. Mostly for tests.
    pub async fn join_queue(&self) {
        while self.backlog() > 0 {
            tokio::task::yield_now().await;
        }
    }

    /// Finish rating all remaining games, then exit.
    pub async fn shutdown(&self) {
        self.accept_input.store(false, Ordering::SeqCst);
        tracing::debug!("Shutdown initiated. Draining rating queue.");
        self.sender.lock().await.take();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Rating worker ended abnormally: {e}");
            }
        }
        tracing::debug!("Rating queue emptied.");
    }

    /// Exit without waiting for the queue to drain.
    pub async fn kill(&self) {
        self.accept_input.store(false, Ordering::SeqCst);
        self.sender.lock().await.take();
        if let Some(handle) = self.worker.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemStore;
    use crate::models::{
        EndedGamePlayerSummary, Faction, GameOutcome, ValidityState, rating_type,
    };

    fn config() -> RaterConfig {
        RaterConfig {
            start_mean: 1500.0,
            start_dev: 500.0,
            beta: 250.0,
            draw_probability: 0.10,
        }
    }

    fn harness() -> (Arc<MemStore>, Arc<PlayerService>, Arc<RatingService>) {
        let store = Arc::new(MemStore::new());
        let players = Arc::new(PlayerService::new(
            store.clone() as Arc<dyn Store>,
            1500.0,
            500.0,
        ));
        let service = Arc::new(RatingService::new(
            store.clone() as Arc<dyn Store>,
            players.clone(),
            config(),
        ));
        (store, players, service)
    }

    fn game_info() -> EndedGameInfo {
        EndedGameInfo {
            game_id: 1,
            rating_type: Some(rating_type::GLOBAL.to_string()),
            map_id: Some(1),
            map_name: "SHERWOOD".to_string(),
            game_mode: "tacc".to_string(),
            galactic_war_planet_name: None,
            mods: vec![],
            commander_kills: HashMap::new(),
            validity: ValidityState::Valid,
            player_summaries: vec![
                EndedGamePlayerSummary {
                    player_id: 1,
                    team_id: 1,
                    faction: Faction::Core,
                    outcome: GameOutcome::Victory,
                },
                EndedGamePlayerSummary {
                    player_id: 2,
                    team_id: 2,
                    faction: Faction::Arm,
                    outcome: GameOutcome::Defeat,
                },
            ],
        }
    }

    fn bad_game_info() -> EndedGameInfo {
        let mut info = game_info();
        info.player_summaries[1].outcome = GameOutcome::Victory;
        info
    }

    fn seed_game_player_stats(store: &MemStore, game_id: i32, player_ids: &[PlayerId]) {
        let rows: Vec<crate::db::GamePlayerStatsRow> = player_ids
            .iter()
            .map(|pid| crate::db::GamePlayerStatsRow {
                game_id,
                player_id: *pid,
                faction: 0,
                color: 0,
                team: *pid,
                place: *pid,
                mean: 1500.0,
                deviation: 500.0,
            })
            .collect();
        futures::executor::block_on(store.insert_game_player_stats(&rows)).unwrap();
    }

    #[tokio::test]
    async fn enqueue_uninitialized_is_refused() {
        let (_store, _players, service) = harness();
        let err = service.enqueue(game_info()).await.unwrap_err();
        assert!(matches!(err, RatingError::ServiceNotReady));
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_refused() {
        let (_store, _players, service) = harness();
        service.initialize().await.unwrap();
        service.shutdown().await;
        let err = service.enqueue(game_info()).await.unwrap_err();
        assert!(matches!(err, RatingError::ServiceNotReady));
        assert_eq!(service.backlog(), 0);
    }

    #[tokio::test]
    async fn default_ratings_are_created_for_new_players() {
        let (store, _players, service) = harness();
        service.update_data().await.unwrap();

        let ids: HashSet<PlayerId> = [300].into_iter().collect();
        let ratings = service
            .get_player_ratings(&ids, rating_type::GLOBAL)
            .await
            .unwrap();
        assert_eq!(ratings[&300].mean, 1500.0);
        assert_eq!(ratings[&300].sigma, 500.0);
        assert!(store.leaderboard_rating(300, 1).is_some());
    }

    #[tokio::test]
    async fn rankings_follow_displayed_rating() {
        let (store, _players, service) = harness();
        service.update_data().await.unwrap();
        store.seed_leaderboard_rating(1, 1, 2000.0, 50.0);
        store.seed_leaderboard_rating(2, 1, 1500.0, 50.0);
        store.seed_leaderboard_rating(3, 1, 1000.0, 50.0);

        let ids: HashSet<PlayerId> = [1, 3].into_iter().collect();
        let ratings = service
            .get_player_ratings(&ids, rating_type::GLOBAL)
            .await
            .unwrap();
        assert_eq!(ratings[&1].rank, 0);
        assert_eq!(ratings[&3].rank, 2);
        assert_eq!(ratings[&1].leaderboard_size, 3);
    }

    #[tokio::test]
    async fn rating_persists_rows_and_updates_players() {
        let (store, players, service) = harness();
        players.create_player(1, "winner").await;
        players.create_player(2, "loser").await;
        seed_game_player_stats(&store, 1, &[1, 2]);
        service.initialize().await.unwrap();

        service.enqueue(game_info()).await.unwrap();
        service.shutdown().await;

        assert_eq!(store.journal_rows().len(), 2);
        let winner = store.leaderboard_rating(1, 1).unwrap();
        let loser = store.leaderboard_rating(2, 1).unwrap();
        assert!(winner.mean > 1500.0);
        assert!(loser.mean < 1500.0);
        assert_eq!(winner.won_games, 1);
        assert_eq!(winner.streak, 1);
        assert_eq!(winner.recent_scores, "2");
        assert_eq!(loser.lost_games, 1);
        assert_eq!(loser.streak, -1);
        assert_eq!(loser.recent_scores, "0");

        let p1 = players.get_player(1).await.unwrap();
        assert!(p1.lock().await.ratings.get("global").mean > 1500.0);
        assert_eq!(p1.lock().await.game_count["global"], 1);
    }

    #[tokio::test]
    async fn bad_game_advances_queue_without_mutating() {
        let (store, players, service) = harness();
        players.create_player(1, "one").await;
        players.create_player(2, "two").await;
        seed_game_player_stats(&store, 1, &[1, 2]);
        service.initialize().await.unwrap();

        service.enqueue(bad_game_info()).await.unwrap();
        service.enqueue(game_info()).await.unwrap();
        service.shutdown().await;

        // the bad game rated nothing, the good one rated both players
        assert_eq!(store.journal_rows().len(), 2);
    }

    #[tokio::test]
    async fn missing_stats_row_skips_journal_for_that_player() {
        let (store, players, service) = harness();
        players.create_player(1, "one").await;
        players.create_player(2, "two").await;
        seed_game_player_stats(&store, 1, &[1]);
        service.initialize().await.unwrap();

        service.enqueue(game_info()).await.unwrap();
        service.shutdown().await;

        let journaled: Vec<PlayerId> =
            store.journal_rows().iter().map(|r| r.player_id).collect();
        assert_eq!(journaled, vec![1]);
    }

    #[tokio::test]
    async fn callbacks_run_in_registration_order() {
        let (store, players, service) = harness();
        players.create_player(1, "one").await;
        players.create_player(2, "two").await;
        seed_game_player_stats(&store, 1, &[1, 2]);

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = order.clone();
            service
                .add_game_rating_callback(Arc::new(move |_info, old, new, likelihoods| {
                    let order = order.clone();
                    Box::pin(async move {
                        assert_eq!(old.len(), 2);
                        assert!(new[&1].mean > old[&1].mean);
                        assert!((likelihoods[&1].pwin + likelihoods[&1].pdraw
                            + likelihoods[&1].plose
                            - 1.0)
                            .abs()
                            < 1e-3);
                        order.lock().unwrap().push(tag);
                    })
                }))
                .await;
        }

        service.initialize().await.unwrap();
        service.enqueue(game_info()).await.unwrap();
        service.shutdown().await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn streaks_reset_on_sign_change() {
        let (store, players, service) = harness();
        players.create_player(1, "one").await;
        players.create_player(2, "two").await;
        service.initialize().await.unwrap();

        for game_id in 1..=3 {
            let mut info = game_info();
            info.game_id = game_id;
            if game_id == 3 {
                // player 1 loses the third game
                info.player_summaries[0].outcome = GameOutcome::Defeat;
                info.player_summaries[1].outcome = GameOutcome::Victory;
            }
            seed_game_player_stats(&store, game_id, &[1, 2]);
            service.enqueue(info).await.unwrap();
        }
        service.shutdown().await;

        let p1 = store.leaderboard_rating(1, 1).unwrap();
        assert_eq!(p1.streak, -1);
        assert_eq!(p1.best_streak, 2);
        assert_eq!(p1.recent_scores, "022");
    }
}
