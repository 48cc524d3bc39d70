//! sqlx-backed [`Store`] implementation.

use crate::db::{
    CoopResultRow, GamePlayerStatsRow, GameStatsRow, LeaderboardOutcomeUpdate,
    LeaderboardRatingRow, LeaderboardRow, MapVersionRow, RatingChangeRow, ScoreRow, Store,
    TeamkillRow,
};
use crate::errors::AppError;
use crate::models::{FeaturedMod, GameId, GameOutcome, PlayerId};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn max_game_id(&self) -> Result<Option<i64>, AppError> {
        let row = sqlx::query("SELECT MAX(id)::bigint AS max_id FROM game_stats")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<i64>, _>("max_id")?)
    }

    async fn featured_mods(&self) -> Result<Vec<FeaturedMod>, AppError> {
        let rows = sqlx::query(
            r#"SELECT id, gamemod, name, description, publish, "order"
               FROM "game_featuredMods""#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FeaturedMod {
                id: row.get("id"),
                name: row.get("gamemod"),
                full_name: row.get("name"),
                description: row.get("description"),
                publish: row.get("publish"),
                order: row.get("order"),
            })
            .collect())
    }

    async fn ranked_mod_uids(&self) -> Result<HashSet<String>, AppError> {
        let rows = sqlx::query("SELECT uid FROM table_mod WHERE ranked = TRUE")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("uid")).collect())
    }

    async fn mod_names(&self, uids: &[String]) -> Result<HashMap<String, String>, AppError> {
        let rows = sqlx::query("SELECT uid, name FROM table_mod WHERE uid = ANY($1)")
            .bind(uids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("uid"), row.get("name")))
            .collect())
    }

    async fn bump_mod_play_counts(&self, uids: &[String]) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE mod_stats s SET times_played = times_played + 1
             FROM mod_version v
             WHERE v.mod_id = s.mod_id AND v.uid = ANY($1)",
        )
        .bind(uids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_map_version(
        &self,
        map_name: &str,
        crc: &str,
    ) -> Result<Option<MapVersionRow>, AppError> {
        let pattern = format!("%/{map_name}/{crc}");
        let row = sqlx::query(
            "SELECT id, filename, ranked FROM map_version
             WHERE filename LIKE $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(pattern)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| MapVersionRow {
            id: row.get("id"),
            filename: row.get("filename"),
            ranked: row.get("ranked"),
        }))
    }

    async fn insert_game_stats(&self, row: &GameStatsRow) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO game_stats
               (id, "gameType", "gameMod", host, "mapId", "gameName", validity, replay_hidden, "startTime")
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())"#,
        )
        .bind(row.id)
        .bind(&row.game_type)
        .bind(row.game_mod)
        .bind(row.host)
        .bind(row.map_id)
        .bind(&row.game_name)
        .bind(row.validity)
        .bind(row.replay_hidden)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_matchmaker_queue_game(
        &self,
        queue_id: i32,
        game_id: GameId,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO matchmaker_queue_game (matchmaker_queue_id, game_stats_id)
             VALUES ($1, $2)",
        )
        .bind(queue_id)
        .bind(game_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_game_stats_end_time(&self, game_id: GameId) -> Result<(), AppError> {
        sqlx::query(r#"UPDATE game_stats SET "endTime" = NOW() WHERE id = $1"#)
            .bind(game_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_game_stats_validity(
        &self,
        game_id: GameId,
        validity: i32,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE game_stats SET validity = $2 WHERE id = $1")
            .bind(game_id)
            .bind(validity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_game_player_stats(
        &self,
        rows: &[GamePlayerStatsRow],
    ) -> Result<(), AppError> {
        for row in rows {
            sqlx::query(
                r#"INSERT INTO game_player_stats
                   ("gameId", "playerId", faction, color, team, place, mean, deviation, "AI", score)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, 0)"#,
            )
            .bind(row.game_id)
            .bind(row.player_id)
            .bind(row.faction)
            .bind(row.color)
            .bind(row.team)
            .bind(row.place)
            .bind(row.mean)
            .bind(row.deviation)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn update_game_player_scores(&self, rows: &[ScoreRow]) -> Result<(), AppError> {
        for row in rows {
            sqlx::query(
                r#"UPDATE game_player_stats
                   SET score = $3, result = $4, "scoreTime" = NOW()
                   WHERE "gameId" = $1 AND "playerId" = $2"#,
            )
            .bind(row.game_id)
            .bind(row.player_id)
            .bind(row.score)
            .bind(&row.result)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn leaderboards(&self) -> Result<Vec<LeaderboardRow>, AppError> {
        let rows = sqlx::query(
            "SELECT l.id, l.technical_name, i.technical_name AS initializer
             FROM leaderboard l
             LEFT OUTER JOIN leaderboard i ON l.initializer_id = i.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| LeaderboardRow {
                id: row.get("id"),
                technical_name: row.get("technical_name"),
                initializer: row.get("initializer"),
            })
            .collect())
    }

    async fn leaderboard_ratings(
        &self,
        rating_type_id: i32,
    ) -> Result<Vec<LeaderboardRatingRow>, AppError> {
        let rows = sqlx::query(
            "SELECT login_id, mean, deviation, rating FROM leaderboard_rating
             WHERE leaderboard_id = $1",
        )
        .bind(rating_type_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| LeaderboardRatingRow {
                player_id: row.get("login_id"),
                mean: row.get("mean"),
                deviation: row.get("deviation"),
                rating: row.get("rating"),
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
        sqlx::query(
            "INSERT INTO leaderboard_rating
             (login_id, mean, deviation, total_games, won_games, lost_games, drawn_games,
              streak, best_streak, recent_scores, leaderboard_id)
             VALUES ($1, $2, $3, 0, 0, 0, 0, 0, 0, '', $4)",
        )
        .bind(player_id)
        .bind(mean)
        .bind(deviation)
        .bind(rating_type_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_game_player_rating(&self, change: &RatingChangeRow) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"UPDATE game_player_stats
               SET mean = $3, deviation = $4, after_mean = $5, after_deviation = $6,
                   "scoreTime" = NOW()
               WHERE "gameId" = $1 AND "playerId" = $2"#,
        )
        .bind(change.game_id)
        .bind(change.player_id)
        .bind(change.old_mean)
        .bind(change.old_deviation)
        .bind(change.new_mean)
        .bind(change.new_deviation)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_rating_journal(&self, change: &RatingChangeRow) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO leaderboard_rating_journal
               (leaderboard_id, rating_mean_before, rating_deviation_before,
                rating_mean_after, rating_deviation_after, game_player_stats_id)
               VALUES ($1, $2, $3, $4, $5,
                       (SELECT id FROM game_player_stats
                        WHERE "playerId" = $6 AND "gameId" = $7))"#,
        )
        .bind(change.rating_type_id)
        .bind(change.old_mean)
        .bind(change.old_deviation)
        .bind(change.new_mean)
        .bind(change.new_deviation)
        .bind(change.player_id)
        .bind(change.game_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_leaderboard_outcome(
        &self,
        update: &LeaderboardOutcomeUpdate,
    ) -> Result<(), AppError> {
        let (won, drawn, lost) = match update.outcome {
            GameOutcome::Victory => (1i32, 0i32, 0i32),
            GameOutcome::Draw | GameOutcome::MutualDraw => (0, 1, 0),
            _ => (0, 0, 1),
        };
        let score: i32 = won - lost;
        // recent_scores stores one digit per game, newest first: 2 win, 1 draw, 0 loss.
        let score_char = (score + 1).to_string();

        sqlx::query(
            "UPDATE leaderboard_rating
             SET mean = $3, deviation = $4,
                 total_games = total_games + 1,
                 won_games = won_games + $5,
                 drawn_games = drawn_games + $6,
                 lost_games = lost_games + $7,
                 streak = CASE WHEN streak * $8 >= 0 THEN streak + $8 ELSE $8 END,
                 best_streak = CASE WHEN streak > best_streak THEN streak ELSE best_streak END,
                 recent_scores = substr(concat($9::text, recent_scores), 1, 10),
                 recent_mod = $10
             WHERE login_id = $1 AND leaderboard_id = $2",
        )
        .bind(update.player_id)
        .bind(update.rating_type_id)
        .bind(update.new_mean)
        .bind(update.new_deviation)
        .bind(won)
        .bind(drawn)
        .bind(lost)
        .bind(score)
        .bind(score_char)
        .bind(&update.game_mode)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn player_user_groups(&self, player_id: PlayerId) -> Result<HashSet<String>, AppError> {
        let rows = sqlx::query(
            "SELECT g.technical_name FROM user_group_assignment a
             JOIN user_group g ON a.group_id = g.id
             WHERE a.user_id = $1",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get("technical_name"))
            .collect())
    }

    async fn player_ratings(
        &self,
        player_id: PlayerId,
    ) -> Result<Vec<(String, f64, f64, u32)>, AppError> {
        let rows = sqlx::query(
            "SELECT l.technical_name, r.mean, r.deviation, r.total_games
             FROM leaderboard l JOIN leaderboard_rating r ON r.leaderboard_id = l.id
             WHERE r.login_id = $1",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get("technical_name"),
                    row.get("mean"),
                    row.get("deviation"),
                    row.get::<i32, _>("total_games") as u32,
                )
            })
            .collect())
    }

    async fn uniqueid_exempt_ids(&self) -> Result<HashSet<PlayerId>, AppError> {
        let rows = sqlx::query("SELECT user_id FROM uniqueid_exempt")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("user_id")).collect())
    }

    async fn has_permission_role(
        &self,
        player_id: PlayerId,
        role_name: &str,
    ) -> Result<bool, AppError> {
        let row = sqlx::query(
            "SELECT p.id FROM user_group_assignment a
             JOIN group_permission_assignment pa ON a.group_id = pa.group_id
             JOIN group_permission p ON pa.permission_id = p.id
             WHERE a.user_id = $1 AND p.technical_name = $2
             LIMIT 1",
        )
        .bind(player_id)
        .bind(role_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn insert_teamkill(&self, row: &TeamkillRow) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO teamkills (teamkiller, victim, game_id, gametime)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(row.teamkiller)
        .bind(row.victim)
        .bind(row.game_id)
        .bind(row.gametime)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn coop_map_id(&self, filename: &str) -> Result<Option<i32>, AppError> {
        let row = sqlx::query("SELECT id FROM coop_map WHERE filename = $1")
            .bind(filename)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("id")))
    }

    async fn insert_coop_result(&self, row: &CoopResultRow) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO coop_leaderboard (mission, gameuid, secondary, time, player_count)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(row.mission)
        .bind(row.game_id)
        .bind(row.secondary)
        .bind(&row.time)
        .bind(row.player_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
