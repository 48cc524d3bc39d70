//! The dirty-flush broadcaster.
//!
//! One periodic tick drains every dirty source and emits at most one
//! coalesced message per dirty entity, fanned out through a per-message
//! visibility predicate. Dirty marks made during a tick are observed on
//! the next one; nothing is lost or duplicated.

use crate::galactic_war::GalacticWarService;
use crate::games::GameService;
use crate::models::GameLifecycle;
use crate::players::PlayerService;
use crate::protocol::ConnectionRegistry;
use crate::tada::TadaService;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct Broadcaster {
    connections: Arc<ConnectionRegistry>,
    game_service: Arc<GameService>,
    player_service: Arc<PlayerService>,
    tada_service: Arc<TadaService>,
    galactic_war_service: Arc<GalacticWarService>,
    dirty_report_interval: Duration,
    ping_interval: Duration,
}

impl Broadcaster {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        game_service: Arc<GameService>,
        player_service: Arc<PlayerService>,
        tada_service: Arc<TadaService>,
        galactic_war_service: Arc<GalacticWarService>,
        dirty_report_interval: Duration,
        ping_interval: Duration,
    ) -> Self {
        Self {
            connections,
            game_service,
            player_service,
            tada_service,
            galactic_war_service,
            dirty_report_interval,
            ping_interval,
        }
    }

    pub fn start(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let broadcaster = self.clone();
        let report = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(broadcaster.dirty_report_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                broadcaster.tick().await;
            }
        });

        let broadcaster = self.clone();
        let ping = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(broadcaster.ping_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                broadcaster
                    .connections
                    .broadcast(&json!({"command": "ping"}), |conn| conn.authenticated)
                    .await;
            }
        });
        (report, ping)
    }

    /// One dirty-flush pass. Public so tests can drive it directly.
    pub async fn tick(&self) {
        let (dirty_games, dirty_queues) = self.game_service.take_dirty().await;
        let dirty_players = self.player_service.take_dirty().await;
        let dirty_uploads = self.tada_service.take_dirty().await;
        let galactic_war_dirty = self.galactic_war_service.take_dirty();

        if galactic_war_dirty {
            self.connections
                .broadcast(&json!({"command": "galactic_war_update"}), |conn| {
                    conn.authenticated
                })
                .await;
        }

        if !dirty_queues.is_empty() {
            let message = json!({
                "command": "matchmaker_info",
                "queues": dirty_queues
                    .iter()
                    .map(|q| q.to_message_entry())
                    .collect::<Vec<_>>(),
            });
            self.connections
                .broadcast(&message, |conn| conn.authenticated)
                .await;
        }

        if !dirty_players.is_empty() {
            let mut players = Vec::new();
            for player in &dirty_players {
                players.push(player.lock().await.to_player_info());
            }
            let message = json!({
                "command": "player_info",
                "players": players,
            });
            self.connections
                .broadcast(&message, |conn| conn.authenticated)
                .await;
        }

        if !dirty_games.is_empty() {
            // player snapshots are taken before any game lock so the lock
            // order stays player-then-game everywhere
            let players = self.player_service.snapshot_all().await;
            let queues = self.game_service.queues_snapshot().await;
            let ranked_map_ids = self.game_service.available_ranked_map_ids().await;

            for (game_id, game, flags) in dirty_games {
                let (message, visible_to, game_players, state) = {
                    let mut game = game.lock().await;
                    if !flags.pings_only {
                        game.assign_rating_type(false, &queues, ranked_map_ids.as_ref(), false);
                    }
                    let message = game.to_game_info(flags.pings_only);
                    let host = game.host_id.and_then(|id| players.get(&id));
                    let visible_to: Vec<crate::models::PlayerId> = players
                        .values()
                        .filter(|viewer| game.is_visible_to(viewer, host))
                        .map(|viewer| viewer.id)
                        .collect();
                    (message, visible_to, game.players(), game.state)
                };

                if state == GameLifecycle::Ended {
                    self.game_service.remove_game(game_id).await;
                }

                self.connections
                    .broadcast(&message, |conn| {
                        conn.authenticated
                            && conn
                                .player_id
                                .map(|pid| {
                                    visible_to.contains(&pid)
                                        && (!flags.only_to_peers || game_players.contains(&pid))
                                })
                                .unwrap_or(false)
                    })
                    .await;
            }
        }

        for (taf_replay_id, info) in dirty_uploads {
            let message = json!({
                "command": "new_tada_replay",
                "taf_replay_id": taf_replay_id.to_string(),
                "tada_replay_id": info.party,
                "map_name": info.map_name,
                "timestamp": parse_replay_date(&info.date),
                "players": info
                    .players
                    .iter()
                    .filter(|p| p.side != "WATCH")
                    .map(|p| p.name.clone())
                    .collect::<Vec<_>>(),
            });
            self.connections
                .broadcast(&message, |conn| conn.authenticated)
                .await;
        }
    }
}

/// Upload dates arrive in whichever format the tool of the day used.
fn parse_replay_date(date: &str) -> i64 {
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(date, format) {
            if let Some(datetime) = parsed.and_hms_opt(0, 0, 0) {
                return datetime.and_utc().timestamp();
            }
        }
    }
    Utc::now().timestamp()
}
