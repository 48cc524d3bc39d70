//! The per-game lifecycle state machine.
//!
//! A `Game` owns everything mutable about one hosted game: seated players,
//! options, connections, result reports and validity. It never talks to the
//! registries directly; lifecycle methods return the facts (ended-game
//! summaries, players to transition) and callers apply them, so the object
//! graph stays acyclic.

use crate::db::{GamePlayerStatsRow, GameStatsRow, ScoreRow, Store};
use crate::games::error::GameError;
use crate::games::kind::GameKind;
use crate::games::results::{GameResultReport, GameResultReports, resolve_game};
use crate::models::{
    EndedGameInfo, EndedGamePlayerSummary, FFA_TEAM, Faction, GameId, GameLifecycle, GameOutcome,
    GameType, InclusiveRange, MatchmakerQueue, PlayerId, PlayerRatings, ValidityState, Victory,
    VisibilityState, rating_type,
};
use crate::players::Player;
use crate::protocol::GameProtocol;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

/// Game-wide options as reported by the host.
#[derive(Debug, Clone)]
pub struct GameOptions {
    pub fog_of_war: String,
    pub game_speed: String,
    pub victory: Option<Victory>,
    pub cheats_enabled: String,
    pub prebuilt_units: String,
    pub no_rush_option: String,
    pub team_lock: String,
    pub ai_replacement: String,
    pub restricted_categories: i64,
    pub extra: HashMap<String, String>,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            fog_of_war: "explored".to_string(),
            game_speed: "normal".to_string(),
            victory: Some(Victory::Demoralization),
            cheats_enabled: "false".to_string(),
            prebuilt_units: "false".to_string(),
            no_rush_option: "false".to_string(),
            team_lock: "locked".to_string(),
            ai_replacement: "false".to_string(),
            restricted_categories: 0,
            extra: HashMap::new(),
        }
    }
}

impl GameOptions {
    pub fn set(&mut self, key: &str, value: &str) {
        match key {
            "FogOfWar" => self.fog_of_war = value.to_string(),
            "GameSpeed" => self.game_speed = value.to_string(),
            "Victory" => self.victory = Victory::parse(value),
            "CheatsEnabled" => self.cheats_enabled = value.to_string(),
            "PrebuiltUnits" => self.prebuilt_units = value.to_string(),
            "NoRushOption" => self.no_rush_option = value.to_string(),
            "TeamLock" => self.team_lock = value.to_string(),
            "AIReplacement" => self.ai_replacement = value.to_string(),
            "RestrictedCategories" => {
                self.restricted_categories = value.trim().parse().unwrap_or(0)
            }
            other => {
                self.extra.insert(other.to_string(), value.to_string());
            }
        }
    }
}

/// Slot-level options for one seated player.
#[derive(Debug, Clone, Default)]
pub struct PlayerGameOptions {
    pub team: Option<i32>,
    pub army: Option<i32>,
    pub start_spot: Option<i32>,
    pub color: Option<i32>,
    pub faction: Option<Faction>,
    pub extra: HashMap<String, String>,
}

/// One game client attached to this game.
pub struct GameConnectionSlot {
    pub player_id: PlayerId,
    pub login: String,
    pub alias: String,
    pub protocol: Arc<dyn GameProtocol>,
    pub finished_sim: bool,
}

/// What became of the game when a connection was removed.
pub enum RemovalResult {
    Kept,
    Ended(Option<EndedGameInfo>),
}

pub struct Game {
    pub id: GameId,
    pub kind: GameKind,
    pub state: GameLifecycle,
    pub name: String,
    pub host_id: Option<PlayerId>,
    pub host_login: String,
    pub visibility: VisibilityState,
    pub password: Option<String>,
    pub max_players: usize,
    pub replay_delay_seconds: i64,

    pub game_mode: String,
    pub mod_version: Option<String>,
    pub map_id: Option<i32>,
    pub map_file_path: String,
    pub map_ranked: bool,

    pub rating_type: String,
    pub rating_type_preferred: String,
    pub displayed_rating_range: InclusiveRange,
    pub enforce_rating_range: bool,
    pub enforce_rating: bool,
    pub matchmaker_queue_id: Option<i32>,
    pub map_pool_map_ids: Option<HashSet<i32>>,
    pub galactic_war_planet_name: Option<String>,

    pub options: GameOptions,
    pub player_options: HashMap<PlayerId, PlayerGameOptions>,
    pub ais: HashMap<String, HashMap<String, String>>,
    pub mods: HashMap<String, String>,
    pub player_pings: HashMap<PlayerId, Vec<(PlayerId, i64)>>,

    pub desyncs: u32,
    pub validity: ValidityState,
    pub launched_at: Option<i64>,
    pub ended: bool,

    connections: HashMap<PlayerId, GameConnectionSlot>,
    live_players: Vec<PlayerId>,
    results: GameResultReports,
    army_stats: Vec<Value>,
    /// Cached ratings of the live roster, captured at launch for stats rows.
    live_ratings: HashMap<PlayerId, PlayerRatings>,

    hosted_staging: watch::Sender<bool>,
    hosted_battleroom: watch::Sender<bool>,
    launched: watch::Sender<bool>,
}

pub struct GameArgs {
    pub id: GameId,
    pub kind: GameKind,
    pub host_id: Option<PlayerId>,
    pub host_login: String,
    pub name: String,
    pub map_name: String,
    pub game_mode: String,
    pub mod_version: Option<String>,
    pub matchmaker_queue_id: Option<i32>,
    pub rating_type: Option<String>,
    pub displayed_rating_range: InclusiveRange,
    pub enforce_rating_range: bool,
    pub max_players: Option<usize>,
    pub replay_delay_seconds: i64,
    pub map_pool_map_ids: Option<HashSet<i32>>,
    pub galactic_war_planet_name: Option<String>,
}

impl Game {
    pub fn new(args: GameArgs) -> Self {
        let rating_type = args
            .rating_type
            .unwrap_or_else(|| rating_type::GLOBAL.to_string());
        Self {
            id: args.id,
            kind: args.kind,
            state: GameLifecycle::Initializing,
            name: truncate_name(&args.name),
            host_id: args.host_id,
            host_login: args.host_login,
            visibility: VisibilityState::Public,
            password: None,
            max_players: args.max_players.unwrap_or(args.kind.default_max_players()),
            replay_delay_seconds: args.replay_delay_seconds,
            game_mode: args.game_mode,
            mod_version: args.mod_version,
            map_id: None,
            map_file_path: format!("/{}/", args.map_name),
            map_ranked: false,
            rating_type: rating_type.clone(),
            rating_type_preferred: rating_type,
            displayed_rating_range: args.displayed_rating_range,
            enforce_rating_range: args.enforce_rating_range,
            enforce_rating: false,
            matchmaker_queue_id: args.matchmaker_queue_id,
            map_pool_map_ids: args.map_pool_map_ids,
            galactic_war_planet_name: args.galactic_war_planet_name,
            options: GameOptions::default(),
            player_options: HashMap::new(),
            ais: HashMap::new(),
            mods: HashMap::new(),
            player_pings: HashMap::new(),
            desyncs: 0,
            validity: ValidityState::Valid,
            launched_at: None,
            ended: false,
            connections: HashMap::new(),
            live_players: Vec::new(),
            results: GameResultReports::new(args.id),
            army_stats: Vec::new(),
            live_ratings: HashMap::new(),
            hosted_staging: watch::channel(false).0,
            hosted_battleroom: watch::channel(false).0,
            launched: watch::channel(false).0,
        }
    }

    pub fn set_name(&mut self, value: &str) -> Result<(), GameError> {
        if !value.is_ascii() {
            return Err(GameError::Other("Name must be ascii!".to_string()));
        }
        self.name = truncate_name(value);
        Ok(())
    }

    pub fn map_name(&self) -> String {
        self.map_file_path
            .split('/')
            .nth(1)
            .filter(|s| !s.is_empty())
            .unwrap_or("SHERWOOD")
            .to_string()
    }

    pub fn set_map(&mut self, map_id: Option<i32>, file_path: &str, ranked: bool) {
        self.map_id = map_id;
        self.map_file_path = file_path.to_string();
        self.map_ranked = ranked;
    }

    // Lifecycle milestone flags. The matchmaking layer awaits these.

    pub fn set_hosted_staging(&mut self) {
        self.hosted_staging.send_replace(true);
    }

    pub fn set_hosted_battleroom(&mut self) {
        self.hosted_battleroom.send_replace(true);
    }

    pub fn subscribe_hosted_staging(&self) -> watch::Receiver<bool> {
        self.hosted_staging.subscribe()
    }

    pub fn subscribe_hosted_battleroom(&self) -> watch::Receiver<bool> {
        self.hosted_battleroom.subscribe()
    }

    pub fn subscribe_launched(&self) -> watch::Receiver<bool> {
        self.launched.subscribe()
    }

    // Seating and membership.

    /// Players in the game: the currently connected, seated players while
    /// in a lobby phase, or the roster frozen at launch once live.
    pub fn players(&self) -> Vec<PlayerId> {
        if self.state.is_lobby_phase() {
            let mut seated: Vec<PlayerId> = self
                .connections
                .keys()
                .filter(|pid| self.player_options.contains_key(pid))
                .copied()
                .collect();
            seated.sort_unstable();
            seated
        } else {
            self.live_players
                .iter()
                .filter(|pid| {
                    self.player_option(**pid, |o| o.army)
                        .map(|army| army >= 0)
                        .unwrap_or(false)
                })
                .copied()
                .collect()
        }
    }

    pub fn connections(&self) -> impl Iterator<Item = &GameConnectionSlot> {
        self.connections.values()
    }

    pub fn connection(&self, player_id: PlayerId) -> Option<&GameConnectionSlot> {
        self.connections.get(&player_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn player_option<T>(&self, player_id: PlayerId, f: impl Fn(&PlayerGameOptions) -> Option<T>) -> Option<T> {
        self.player_options.get(&player_id).and_then(f)
    }

    pub fn armies(&self) -> HashSet<i32> {
        self.players()
            .iter()
            .filter_map(|pid| self.player_option(*pid, |o| o.army))
            .collect()
    }

    pub fn teams(&self) -> HashSet<i32> {
        self.players()
            .iter()
            .filter_map(|pid| self.player_option(*pid, |o| o.team))
            .filter(|team| *team >= 0)
            .collect()
    }

    fn has_unteamed_player(&self) -> bool {
        self.players()
            .iter()
            .any(|pid| self.player_option(*pid, |o| o.team).is_none())
    }

    /// Teams as player sets, with FFA players split into singleton teams.
    pub fn team_sets(&self) -> Result<Vec<Vec<PlayerId>>, GameError> {
        if self.has_unteamed_player() {
            return Err(GameError::MissingTeam(format!(
                "game {}: a seated player has no Team option",
                self.id
            )));
        }
        let mut teams: HashMap<i32, Vec<PlayerId>> = HashMap::new();
        let mut ffa: Vec<Vec<PlayerId>> = Vec::new();
        for pid in self.players() {
            let team = self.player_option(pid, |o| o.team).unwrap();
            if team == FFA_TEAM {
                ffa.push(vec![pid]);
            } else if team >= 0 {
                teams.entry(team).or_default().push(pid);
            }
        }
        let mut team_ids: Vec<i32> = teams.keys().copied().collect();
        team_ids.sort_unstable();
        let mut sets: Vec<Vec<PlayerId>> = team_ids
            .into_iter()
            .map(|id| {
                let mut players = teams.remove(&id).unwrap();
                players.sort_unstable();
                players
            })
            .collect();
        sets.extend(ffa);
        Ok(sets)
    }

    pub fn is_ffa(&self) -> bool {
        self.players().len() >= 3 && self.teams().contains(&FFA_TEAM)
    }

    pub fn is_multi_team(&self) -> bool {
        self.teams().len() > 2
    }

    pub fn has_ai(&self) -> bool {
        !self.ais.is_empty()
    }

    /// True iff all teams have the same player count. Zero teams counts as
    /// even, a single team does not.
    pub fn is_even(&self) -> bool {
        match self.team_sets() {
            Ok(teams) => match teams.len() {
                0 => true,
                1 => false,
                _ => {
                    let sizes: HashSet<usize> = teams.iter().map(|t| t.len()).collect();
                    sizes.len() == 1
                }
            },
            Err(_) => false,
        }
    }

    pub fn is_pooled_map(&self, map_id: Option<i32>) -> bool {
        match map_id {
            None => false,
            Some(id) => self
                .map_pool_map_ids
                .as_ref()
                .map(|pool| pool.contains(&id))
                .unwrap_or(true),
        }
    }

    pub fn is_mutually_agreed_draw(&self) -> bool {
        self.results.is_mutually_agreed_draw(&self.armies())
    }

    // Connections.

    pub fn add_game_connection(&mut self, slot: GameConnectionSlot) -> Result<(), GameError> {
        if self.state == GameLifecycle::Initializing {
            return Err(GameError::InvalidState(format!("{:?}", self.state)));
        }
        if self.connections.len() >= self.max_players {
            return Err(GameError::Full);
        }
        tracing::info!("Game {}: added game connection for {}", self.id, slot.player_id);
        self.connections.insert(slot.player_id, slot);
        Ok(())
    }

    pub fn set_finished_sim(&mut self, player_id: PlayerId) {
        if let Some(slot) = self.connections.get_mut(&player_id) {
            slot.finished_sim = true;
        }
    }

    /// Removes the connection, unseats the player while in the lobby and
    /// decides whether the game must end.
    pub async fn remove_game_connection(
        &mut self,
        player_id: PlayerId,
        store: &dyn Store,
    ) -> RemovalResult {
        if self.connections.remove(&player_id).is_none() {
            return RemovalResult::Kept;
        }

        if matches!(
            self.state,
            GameLifecycle::Staging | GameLifecycle::Battleroom
        ) {
            self.player_options.remove(&player_id);
        }

        self.check_sim_end(store).await;

        tracing::info!("Game {}: removed game connection for {}", self.id, player_id);

        let host_left_lobby = self.host_id == Some(player_id)
            && matches!(
                self.state,
                GameLifecycle::Staging | GameLifecycle::Battleroom
            );

        if self.state != GameLifecycle::Ended
            && (self.ended || self.connections.is_empty() || host_left_lobby)
        {
            RemovalResult::Ended(self.on_game_end(store).await)
        } else {
            RemovalResult::Kept
        }
    }

    /// Marks the simulation finished once every live connection reported
    /// `GameEnded`, stamping the end time.
    pub async fn check_sim_end(&mut self, store: &dyn Store) {
        if self.ended {
            return;
        }
        if !matches!(self.state, GameLifecycle::Launching | GameLifecycle::Live) {
            return;
        }
        if self.connections.values().any(|c| !c.finished_sim) {
            return;
        }
        self.ended = true;
        if let Err(e) = store.update_game_stats_end_time(self.id).await {
            tracing::error!("Game {}: failed to stamp end time: {e}", self.id);
        }
    }

    // Results.

    pub fn add_result(
        &mut self,
        reporter: PlayerId,
        army: i32,
        result_type: &str,
        score: i64,
    ) {
        if !self.armies().contains(&army) {
            tracing::debug!(
                "Game {}: ignoring result for unknown army {army} from {reporter}",
                self.id
            );
            return;
        }
        let outcome: GameOutcome = match result_type.parse() {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::debug!(
                    "Game {}: ignoring unparseable result '{result_type}' from {reporter}",
                    self.id
                );
                return;
            }
        };
        self.results.add(GameResultReport {
            reporter,
            army,
            outcome,
            score,
        });
        tracing::info!(
            "Game {}: {reporter} reported result for army {army}: {result_type} {score}",
            self.id
        );
    }

    pub fn get_army_score(&self, army: i32) -> i64 {
        if self.kind.uses_victory_only_scores() {
            self.results.victory_only_score(army)
        } else {
            self.results.score(army)
        }
    }

    pub fn report_army_stats(&mut self, blob: &str) {
        match serde_json::from_str::<Value>(blob) {
            Ok(parsed) => {
                self.army_stats = parsed
                    .get("stats")
                    .and_then(|s| s.as_array())
                    .cloned()
                    .unwrap_or_default();
            }
            Err(e) => {
                tracing::debug!("Game {}: unparseable army stats: {e}", self.id);
            }
        }
    }

    fn commander_kills(&self) -> HashMap<String, i64> {
        self.army_stats
            .iter()
            .filter_map(|stats| {
                let name = stats.get("name")?.as_str()?.to_string();
                let kills = stats.get("units")?.get("cdr")?.get("kills")?.as_i64()?;
                Some((name, kills))
            })
            .collect()
    }

    pub fn get_player_outcome(&self, player_id: PlayerId) -> GameOutcome {
        match self.player_option(player_id, |o| o.army) {
            Some(army) => self.results.outcome(army),
            None => GameOutcome::Unknown,
        }
    }

    // Options.

    pub fn set_player_option_value(&mut self, player_id: PlayerId, key: &str, value: &Value) {
        let entry = self.player_options.entry(player_id).or_default();
        let as_int = || -> Option<i32> {
            match value {
                Value::Number(n) => n.as_i64().map(|v| v as i32),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
        };
        match key {
            "Team" => entry.team = as_int(),
            "Army" => entry.army = as_int(),
            "StartSpot" => entry.start_spot = as_int(),
            "Color" => entry.color = as_int(),
            "Faction" => {
                entry.faction = as_int().and_then(|v| Faction::from_value(v as i64).ok());
            }
            other => {
                entry
                    .extra
                    .insert(other.to_string(), stringify_value(value));
            }
        }
    }

    pub fn set_ai_option(&mut self, name: &str, key: &str, value: &Value) {
        self.ais
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), stringify_value(value));
    }

    /// Unseats any player on the slot and drops AIs occupying it.
    pub fn clear_slot(&mut self, slot_index: i32) {
        let seated: Vec<PlayerId> = self.players();
        for pid in seated {
            if self.player_option(pid, |o| o.start_spot) == Some(slot_index) {
                let entry = self.player_options.entry(pid).or_default();
                entry.team = Some(-1);
                entry.army = Some(-1);
                entry.start_spot = Some(-1);
            }
        }
        self.ais.retain(|_, options| {
            options
                .get("StartSpot")
                .and_then(|v| v.parse::<i32>().ok())
                != Some(slot_index)
        });
    }

    pub fn update_player_pings(&mut self, player_id: PlayerId, peer_pings: &str) {
        let current: HashSet<PlayerId> = self.players().into_iter().collect();
        let pings: Vec<(PlayerId, i64)> = peer_pings
            .split(';')
            .filter_map(|pair| {
                let mut parts = pair.split(':');
                let peer: PlayerId = parts.next()?.trim().parse().ok()?;
                let ms: i64 = parts.next()?.trim().parse().ok()?;
                current.contains(&peer).then_some((peer, ms))
            })
            .collect();
        self.player_pings.insert(player_id, pings);
        self.player_pings.retain(|pid, _| current.contains(pid));
    }

    // State transitions.

    /// BATTLEROOM → LAUNCHING. Returns the players to flip to PLAYING.
    pub fn on_launching(&mut self) -> Vec<PlayerId> {
        if self.state != GameLifecycle::Battleroom {
            return Vec::new();
        }
        self.state = GameLifecycle::Launching;
        self.launched_at = Some(chrono::Utc::now().timestamp());
        tracing::info!("Game {} LAUNCHING", self.id);
        self.players()
    }

    /// LAUNCHING → LIVE. Freezes the roster, assigns the rating type,
    /// persists launch-time stats and validates settings.
    pub async fn on_live(
        &mut self,
        store: &dyn Store,
        queues: &HashMap<String, MatchmakerQueue>,
        ranked_map_ids: Option<&HashSet<i32>>,
        ranked_mods: &HashSet<String>,
        strict_map_pool: bool,
        featured_mod_id: i32,
        player_ratings: &HashMap<PlayerId, PlayerRatings>,
    ) {
        if self.state != GameLifecycle::Launching {
            return;
        }
        self.live_players = self.players();
        self.live_ratings = player_ratings.clone();

        self.assign_rating_type(true, queues, ranked_map_ids, strict_map_pool);

        self.state = GameLifecycle::Live;
        tracing::info!("Game {} LIVE", self.id);

        if let Err(e) = self.persist_game_stats(store, featured_mod_id).await {
            tracing::error!("Game {}: failed to persist game stats: {e}", self.id);
        }
        if let Err(e) = self.persist_game_player_stats(store).await {
            tracing::error!("Game {}: failed to persist player stats: {e}", self.id);
        }
        if let Err(e) = self.persist_mod_stats(store).await {
            tracing::error!("Game {}: failed to persist mod stats: {e}", self.id);
        }
        self.validate_game_settings(store, ranked_mods).await;

        self.launched.send_replace(true);
    }

    /// Terminal transition. Idempotent: a second call is a no-op. Returns
    /// the ended-game summary when there is one to publish.
    pub async fn on_game_end(&mut self, store: &dyn Store) -> Option<EndedGameInfo> {
        if self.state == GameLifecycle::Ended {
            return None;
        }
        let result = match self.state {
            GameLifecycle::Live => {
                tracing::info!("Game {} finished normally", self.id);
                if self.desyncs > 20 {
                    self.mark_invalid(store, ValidityState::TooManyDesyncs).await;
                    None
                } else if self.is_mutually_agreed_draw() {
                    tracing::info!("Game {} is a mutual draw", self.id);
                    self.mark_invalid(store, ValidityState::MutualDraw).await;
                    None
                } else {
                    self.process_game_results(store).await
                }
            }
            other => {
                tracing::info!("Game {} cancelled in state {:?}", self.id, other);
                None
            }
        };
        self.state = GameLifecycle::Ended;
        result
    }

    async fn process_game_results(&mut self, store: &dyn Store) -> Option<EndedGameInfo> {
        if self.results.is_empty() {
            self.mark_invalid(store, ValidityState::UnknownResult).await;
            return None;
        }
        if let Err(e) = self.persist_results(store).await {
            tracing::error!("Game {}: failed to persist results: {e}", self.id);
        }
        match self.resolve_game_results(store).await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::error!("Game {}: failed to resolve results: {e}", self.id);
                None
            }
        }
    }

    pub async fn resolve_game_results(
        &mut self,
        store: &dyn Store,
    ) -> Result<EndedGameInfo, GameError> {
        if !matches!(self.state, GameLifecycle::Live | GameLifecycle::Ended) {
            return Err(GameError::InvalidState(
                "Cannot rate game that has not gone live".to_string(),
            ));
        }

        self.run_pre_rate_validity_checks(store).await;

        let team_sets = self.team_sets()?;
        let mut team_outcomes = vec![GameOutcome::Unknown; team_sets.len()];

        if self.validity == ValidityState::Valid {
            let partial: Vec<HashSet<GameOutcome>> = team_sets
                .iter()
                .map(|team| {
                    team.iter()
                        .map(|pid| self.get_player_outcome(*pid))
                        .collect()
                })
                .collect();
            match self
                .outcome_override(&team_sets)
                .map(Ok)
                .unwrap_or_else(|| resolve_game(&partial))
            {
                Ok(outcomes) => team_outcomes = outcomes,
                Err(_) => {
                    self.mark_invalid(store, ValidityState::UnknownResult).await;
                }
            }
        }

        let mut summaries = Vec::new();
        for (team_index, team) in team_sets.iter().enumerate() {
            for pid in team {
                summaries.push(EndedGamePlayerSummary {
                    player_id: *pid,
                    team_id: self
                        .player_option(*pid, |o| o.team)
                        .unwrap_or(team_index as i32),
                    faction: self
                        .player_option(*pid, |o| o.faction)
                        .unwrap_or(Faction::Arm),
                    outcome: team_outcomes[team_index],
                });
            }
        }

        Ok(EndedGameInfo {
            game_id: self.id,
            rating_type: Some(self.rating_type.clone()),
            map_id: self.map_id,
            map_name: self.map_name(),
            game_mode: self.game_mode.clone(),
            galactic_war_planet_name: self.galactic_war_planet_name.clone(),
            mods: self.mods.keys().cloned().collect(),
            commander_kills: self.commander_kills(),
            validity: self.validity,
            player_summaries: summaries,
        })
    }

    /// The 1v1 score override for ladder games: when both sides' scores
    /// differ the score decides, equal scores draw.
    fn outcome_override(&self, team_sets: &[Vec<PlayerId>]) -> Option<Vec<GameOutcome>> {
        if !self.kind.allows_outcome_override() || self.players().len() > 2 {
            return None;
        }
        if team_sets.len() != 2 || team_sets.iter().any(|t| t.len() != 1) {
            return None;
        }
        let scores: Vec<i64> = team_sets
            .iter()
            .map(|team| {
                self.player_option(team[0], |o| o.army)
                    .map(|army| self.results.score(army))
                    .unwrap_or(0)
            })
            .collect();
        Some(if scores[0] > scores[1] {
            vec![GameOutcome::Victory, GameOutcome::Defeat]
        } else if scores[0] < scores[1] {
            vec![GameOutcome::Defeat, GameOutcome::Victory]
        } else {
            vec![GameOutcome::Draw, GameOutcome::Draw]
        })
    }

    async fn run_pre_rate_validity_checks(&mut self, store: &dyn Store) {
        match self.kind {
            GameKind::Custom => {
                let limit = self.players().len() as i64 * 60;
                let elapsed = self
                    .launched_at
                    .map(|t| chrono::Utc::now().timestamp() - t)
                    .unwrap_or(0);
                if !self.enforce_rating && elapsed < limit {
                    self.mark_invalid(store, ValidityState::TooShort).await;
                    return;
                }
                if !self.is_pooled_map(self.map_id) {
                    self.mark_invalid(store, ValidityState::BadMap).await;
                }
            }
            GameKind::Ladder => {
                if !self.is_pooled_map(self.map_id) {
                    self.mark_invalid(store, ValidityState::BadMap).await;
                }
            }
            GameKind::Coop => {}
        }
    }

    pub async fn persist_results(&mut self, store: &dyn Store) -> Result<(), GameError> {
        tracing::debug!("Saving scores from game {}", self.id);
        let mut rows = Vec::new();
        for pid in self.players() {
            let army = self.player_option(pid, |o| o.army);
            let outcome = self.get_player_outcome(pid);
            let score = army.map(|a| self.get_army_score(a)).unwrap_or(0);
            tracing::info!(
                "Game {}: result for player {pid}: score {score}, outcome {outcome:?}",
                self.id
            );
            rows.push(ScoreRow {
                game_id: self.id,
                player_id: pid,
                score,
                result: outcome.as_db_str().to_string(),
            });
        }
        store
            .update_game_player_scores(&rows)
            .await
            .map_err(|e| GameError::Other(e.to_string()))
    }

    /// Written at launch: games that start are the ones worth recording.
    async fn persist_game_stats(
        &mut self,
        store: &dyn Store,
        featured_mod_id: i32,
    ) -> Result<(), GameError> {
        if self.validity == ValidityState::Valid && !self.map_ranked {
            self.mark_invalid(store, ValidityState::BadMap).await;
        }

        let game_type = self
            .options
            .victory
            .map(|v| (v as i32).to_string())
            .unwrap_or_else(|| "0".to_string());

        store
            .insert_game_stats(&GameStatsRow {
                id: self.id,
                game_type,
                game_mod: featured_mod_id,
                host: self.host_id.unwrap_or(0),
                map_id: self.map_id,
                game_name: self.name.clone(),
                validity: self.validity as i32,
                // hide the replay if the host asked for no live replay
                replay_hidden: self.replay_delay_seconds < 0,
            })
            .await
            .map_err(|e| GameError::Other(e.to_string()))?;

        if let Some(queue_id) = self.matchmaker_queue_id {
            store
                .insert_matchmaker_queue_game(queue_id, self.id)
                .await
                .map_err(|e| GameError::Other(e.to_string()))?;
        }
        Ok(())
    }

    async fn persist_game_player_stats(&mut self, store: &dyn Store) -> Result<(), GameError> {
        let mut rows = Vec::new();
        for pid in self.players() {
            let Some(options) = self.player_options.get(&pid) else {
                continue;
            };
            let is_observer = options.team.map(|t| t < 0).unwrap_or(true)
                || options.start_spot.map(|s| s < 0).unwrap_or(true);
            if is_observer {
                continue;
            }
            let rating = self
                .live_ratings
                .get(&pid)
                .map(|r| r.get(&self.rating_type))
                .unwrap_or(crate::models::Rating::new(0.0, 0.0));
            rows.push(GamePlayerStatsRow {
                game_id: self.id,
                player_id: pid,
                faction: options.faction.map(|f| f as i32).unwrap_or(0),
                color: options.color.unwrap_or(0),
                team: options.team.unwrap_or(-1),
                place: options.start_spot.unwrap_or(-1),
                mean: rating.mean,
                deviation: rating.sigma,
            });
        }
        if rows.is_empty() {
            tracing::warn!("Game {}: no player options available!", self.id);
            return Ok(());
        }
        store
            .insert_game_player_stats(&rows)
            .await
            .map_err(|e| GameError::Other(e.to_string()))
    }

    async fn persist_mod_stats(&mut self, store: &dyn Store) -> Result<(), GameError> {
        if self.mods.is_empty() {
            return Ok(());
        }
        let uids: Vec<String> = self.mods.keys().cloned().collect();
        store
            .bump_mod_play_counts(&uids)
            .await
            .map_err(|e| GameError::Other(e.to_string()))
    }

    /// One-way validity downgrade; the first recorded reason wins. Persists
    /// once the game has launched.
    pub async fn mark_invalid(&mut self, store: &dyn Store, new_validity: ValidityState) {
        if self.validity != ValidityState::Valid {
            return;
        }
        tracing::info!("Game {} marked invalid because: {new_validity:?}", self.id);
        self.validity = new_validity;

        if !matches!(self.state, GameLifecycle::Launching | GameLifecycle::Live) {
            return;
        }
        if let Err(e) = store
            .update_game_stats_validity(self.id, new_validity as i32)
            .await
        {
            tracing::error!("Game {}: failed to persist validity: {e}", self.id);
        }
    }

    /// Marks the game invalid if it has non-compliant options. First
    /// failing check wins.
    pub async fn validate_game_settings(
        &mut self,
        store: &dyn Store,
        ranked_mods: &HashSet<String>,
    ) {
        for uid in self.mods.keys() {
            if !ranked_mods.contains(uid) {
                self.mark_invalid(store, ValidityState::BadMod).await;
                return;
            }
        }
        if self.has_ai() {
            self.mark_invalid(store, ValidityState::HasAiPlayers).await;
            return;
        }
        if self.is_multi_team() {
            self.mark_invalid(store, ValidityState::MultiTeam).await;
            return;
        }
        if self.is_ffa() {
            self.mark_invalid(store, ValidityState::FfaNotRanked).await;
            return;
        }
        let option_failure = if self.options.ai_replacement != "false" {
            Some(ValidityState::HasAiPlayers)
        } else if self.options.fog_of_war != "explored" {
            Some(ValidityState::NoFogOfWar)
        } else if self.options.cheats_enabled != "false" {
            Some(ValidityState::CheatsEnabled)
        } else if self.options.prebuilt_units != "false" {
            Some(ValidityState::PrebuiltEnabled)
        } else if self.options.no_rush_option != "false" {
            Some(ValidityState::NorushEnabled)
        } else if self.options.restricted_categories != 0 {
            Some(ValidityState::BadUnitRestrictions)
        } else if self.options.team_lock != "locked" {
            Some(ValidityState::UnlockedTeams)
        } else {
            None
        };
        if let Some(validity) = option_failure {
            self.mark_invalid(store, validity).await;
            return;
        }
        self.validate_game_mode_settings(store).await;
    }

    async fn validate_game_mode_settings(&mut self, store: &dyn Store) {
        if self.kind == GameKind::Coop {
            self.mark_invalid(store, ValidityState::CoopNotRanked).await;
            return;
        }
        if self.has_unteamed_player() || !self.is_even() {
            self.mark_invalid(store, ValidityState::UnevenTeamsNotRanked)
                .await;
            return;
        }
        if self.players().len() < 2 {
            self.mark_invalid(store, ValidityState::SinglePlayer).await;
            return;
        }
        if self.options.victory != Some(Victory::Demoralization) {
            self.mark_invalid(store, ValidityState::WrongVictoryCondition)
                .await;
        }
    }

    // Rating-type assignment.

    fn find_suitable_rating_queue<'q>(
        &self,
        strict_team_size: bool,
        strict_map_pool: bool,
        queues: &'q HashMap<String, MatchmakerQueue>,
        ranked_map_ids: Option<&HashSet<i32>>,
    ) -> Option<&'q MatchmakerQueue> {
        let team_size = if strict_team_size {
            let teams = self.team_sets().ok()?;
            if teams.len() != 2 || teams[0].len() != teams[1].len() {
                tracing::info!(
                    "Game {}: no suitable queue for unbalanced teams",
                    self.id
                );
                return None;
            }
            teams[0].len()
        } else {
            let player_count: usize = self
                .team_sets()
                .map(|teams| teams.iter().map(|t| t.len()).sum())
                .unwrap_or(0);
            (1 + player_count) / 2
        };

        let mut best: Option<&MatchmakerQueue> = None;
        for queue in queues.values() {
            if queue.featured_mod != self.game_mode || queue.team_size > team_size {
                continue;
            }
            if strict_map_pool {
                if let Some(pool) = queue.map_pool_for_rating(1500.0) {
                    match self.map_id {
                        Some(id) if pool.map_ids().contains(&id) => {}
                        _ => {
                            tracing::info!(
                                "Game {}: rejecting queue {} because map {:?} is not in its pool",
                                self.id,
                                queue.name,
                                self.map_id
                            );
                            continue;
                        }
                    }
                }
            } else if let Some(ranked) = ranked_map_ids {
                match self.map_id {
                    Some(id) if ranked.contains(&id) => {}
                    _ => {
                        tracing::info!(
                            "Game {}: rejecting queue {} because map {:?} is not ranked",
                            self.id,
                            queue.name,
                            self.map_id
                        );
                        continue;
                    }
                }
            }
            if best.map(|b| b.team_size < queue.team_size).unwrap_or(true) {
                best = Some(queue);
            }
        }
        best
    }

    pub fn assign_rating_type(
        &mut self,
        strict_team_size: bool,
        queues: &HashMap<String, MatchmakerQueue>,
        ranked_map_ids: Option<&HashSet<i32>>,
        strict_map_pool: bool,
    ) {
        if !self.state.is_lobby_phase() {
            return;
        }

        if self.rating_type_preferred == rating_type::GLOBAL {
            self.rating_type = rating_type::GLOBAL.to_string();
            self.matchmaker_queue_id = None;
            self.map_pool_map_ids = None;
            return;
        }

        if self.kind.game_type() == GameType::Matchmaker {
            self.rating_type = self.rating_type_preferred.clone();
            return;
        }

        self.map_pool_map_ids = ranked_map_ids.cloned();

        match self.find_suitable_rating_queue(
            strict_team_size,
            strict_map_pool,
            queues,
            ranked_map_ids,
        ) {
            None => {
                self.rating_type = rating_type::GLOBAL.to_string();
            }
            Some(queue) => {
                tracing::info!(
                    "Game {}: selecting rating type from queue {}",
                    self.id,
                    queue.name
                );
                self.matchmaker_queue_id = Some(queue.id);
                self.rating_type = queue.rating_type.clone();
                if strict_map_pool {
                    self.map_pool_map_ids = queue
                        .map_pool_for_rating(1500.0)
                        .map(|pool| pool.map_ids())
                        .or_else(|| ranked_map_ids.cloned());
                }
            }
        }
    }

    // Visibility and client messages.

    /// Whether the game shows up for `viewer`. `host` is the resolved host
    /// player, if still online.
    pub fn is_visible_to(&self, viewer: &Player, host: Option<&Player>) -> bool {
        if self.host_id.is_none() {
            return false;
        }
        if matches!(
            self.state,
            GameLifecycle::Launching | GameLifecycle::Live | GameLifecycle::Ended
        ) {
            return true;
        }
        if Some(viewer.id) == self.host_id || self.connections.contains_key(&viewer.id) {
            return true;
        }
        if self.enforce_rating_range
            && !self
                .displayed_rating_range
                .contains(viewer.displayed_rating(&self.rating_type))
        {
            return false;
        }
        match self.visibility {
            VisibilityState::Friends => host
                .map(|h| h.friends.contains(&viewer.id))
                .unwrap_or(false),
            VisibilityState::Public => host
                .map(|h| !h.foes.contains(&viewer.id))
                .unwrap_or(true),
        }
    }

    /// The `game_info` payload for lobby clients.
    pub fn to_game_info(&self, pings_only: bool) -> Value {
        let players = self.players();
        let pings: HashMap<String, Vec<(PlayerId, i64)>> = self
            .player_pings
            .iter()
            .map(|(pid, pings)| (pid.to_string(), pings.clone()))
            .collect();
        let mut message = json!({
            "command": "game_info",
            "uid": self.id,
            "state": self.state.as_client_str(),
            "pings": pings,
        });
        if pings_only {
            return message;
        }

        let mut teams: HashMap<String, Vec<PlayerId>> = HashMap::new();
        for pid in &players {
            let team = self.player_option(*pid, |o| o.team).unwrap_or(-1);
            teams.entry(team.to_string()).or_default().push(*pid);
        }

        let details = json!({
            "visibility": self.visibility,
            "password_protected": self.password.is_some(),
            "title": self.name,
            "replay_delay_seconds": self.replay_delay_seconds,
            "game_type": self.kind.game_type().as_str(),
            "featured_mod": self.game_mode,
            "featured_mod_version": self.mod_version,
            "sim_mods": self.mods,
            "map_name": self.map_name(),
            "map_file_path": self.map_file_path,
            "host": self.host_login,
            "num_players": players.len(),
            "max_players": self.max_players,
            "launched_at": self.launched_at,
            "rating_type": self.rating_type,
            "rating_min": self.displayed_rating_range.lo,
            "rating_max": self.displayed_rating_range.hi,
            "enforce_rating_range": self.enforce_rating_range,
            "galactic_war_planet_name": self.galactic_war_planet_name,
            "teams": teams,
        });
        message
            .as_object_mut()
            .unwrap()
            .extend(details.as_object().unwrap().clone());
        message
    }
}

fn truncate_name(value: &str) -> String {
    value.chars().take(128).collect()
}

fn stringify_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemStore;
    use crate::models::MapPool;
    use crate::protocol::ChannelProtocol;

    fn make_game(kind: GameKind) -> Game {
        Game::new(GameArgs {
            id: 1,
            kind,
            host_id: Some(1),
            host_login: "host".to_string(),
            name: "test game".to_string(),
            map_name: "SHERWOOD".to_string(),
            game_mode: "tacc".to_string(),
            mod_version: None,
            matchmaker_queue_id: None,
            rating_type: None,
            displayed_rating_range: InclusiveRange::default(),
            enforce_rating_range: false,
            max_players: None,
            replay_delay_seconds: 300,
            map_pool_map_ids: None,
            galactic_war_planet_name: None,
        })
    }

    fn attach(game: &mut Game, player_id: PlayerId) {
        let (protocol, _rx) = ChannelProtocol::new();
        game.add_game_connection(GameConnectionSlot {
            player_id,
            login: format!("player{player_id}"),
            alias: format!("player{player_id}"),
            protocol: Arc::new(protocol),
            finished_sim: false,
        })
        .unwrap();
    }

    fn seat(game: &mut Game, player_id: PlayerId, team: i32, army: i32) {
        game.set_player_option_value(player_id, "Team", &json!(team));
        game.set_player_option_value(player_id, "Army", &json!(army));
        game.set_player_option_value(player_id, "StartSpot", &json!(army));
        game.set_player_option_value(player_id, "Color", &json!(army));
        game.set_player_option_value(player_id, "Faction", &json!(team % 3));
    }

    fn two_player_game() -> Game {
        let mut game = make_game(GameKind::Custom);
        game.state = GameLifecycle::Staging;
        attach(&mut game, 1);
        attach(&mut game, 2);
        seat(&mut game, 1, 2, 1);
        seat(&mut game, 2, 3, 2);
        game
    }

    #[test]
    fn players_are_connected_and_seated_in_lobby() {
        let mut game = make_game(GameKind::Custom);
        game.state = GameLifecycle::Staging;
        attach(&mut game, 1);
        attach(&mut game, 2);
        seat(&mut game, 1, 2, 1);
        // player 2 connected but never seated
        assert_eq!(game.players(), vec![1]);
    }

    #[test]
    fn roster_freezes_at_live() {
        let mut game = two_player_game();
        game.state = GameLifecycle::Battleroom;
        game.on_launching();
        game.live_players = game.players();
        game.state = GameLifecycle::Live;

        // a drop after going live does not shrink the roster
        game.connections.remove(&2);
        assert_eq!(game.players(), vec![1, 2]);
    }

    #[test]
    fn game_full_is_refused() {
        let mut game = make_game(GameKind::Custom);
        game.state = GameLifecycle::Staging;
        game.max_players = 1;
        attach(&mut game, 1);
        let (protocol, _rx) = ChannelProtocol::new();
        let err = game
            .add_game_connection(GameConnectionSlot {
                player_id: 2,
                login: "p2".to_string(),
                alias: "p2".to_string(),
                protocol: Arc::new(protocol),
                finished_sim: false,
            })
            .unwrap_err();
        assert!(matches!(err, GameError::Full));
    }

    #[test]
    fn connections_rejected_while_initializing() {
        let mut game = make_game(GameKind::Custom);
        let (protocol, _rx) = ChannelProtocol::new();
        let err = game
            .add_game_connection(GameConnectionSlot {
                player_id: 2,
                login: "p2".to_string(),
                alias: "p2".to_string(),
                protocol: Arc::new(protocol),
                finished_sim: false,
            })
            .unwrap_err();
        assert!(matches!(err, GameError::InvalidState(_)));
    }

    #[tokio::test]
    async fn validity_downgrade_is_one_way() {
        let store = MemStore::new();
        let mut game = two_player_game();
        game.mark_invalid(&store, ValidityState::BadMap).await;
        game.mark_invalid(&store, ValidityState::CheatsEnabled).await;
        assert_eq!(game.validity, ValidityState::BadMap);
    }

    #[tokio::test]
    async fn even_teams_required_for_validity() {
        let store = MemStore::new();
        let mut game = make_game(GameKind::Custom);
        game.state = GameLifecycle::Staging;
        for pid in 1..=3 {
            attach(&mut game, pid);
        }
        seat(&mut game, 1, 2, 1);
        seat(&mut game, 2, 2, 2);
        seat(&mut game, 3, 3, 3);
        game.validate_game_settings(&store, &HashSet::new()).await;
        assert_eq!(game.validity, ValidityState::UnevenTeamsNotRanked);
    }

    #[tokio::test]
    async fn cheats_invalidate() {
        let store = MemStore::new();
        let mut game = two_player_game();
        game.options.set("CheatsEnabled", "true");
        game.validate_game_settings(&store, &HashSet::new()).await;
        assert_eq!(game.validity, ValidityState::CheatsEnabled);
    }

    #[tokio::test]
    async fn valid_two_player_game_passes_checks() {
        let store = MemStore::new();
        let mut game = two_player_game();
        game.validate_game_settings(&store, &HashSet::new()).await;
        assert_eq!(game.validity, ValidityState::Valid);
    }

    #[tokio::test]
    async fn unranked_mod_invalidates() {
        let store = MemStore::new();
        let mut game = two_player_game();
        game.mods.insert("abcdef".to_string(), "some mod".to_string());
        game.validate_game_settings(&store, &HashSet::new()).await;
        assert_eq!(game.validity, ValidityState::BadMod);
    }

    #[tokio::test]
    async fn on_game_end_is_idempotent() {
        let store = MemStore::new();
        let mut game = two_player_game();
        game.state = GameLifecycle::Live;
        game.live_players = vec![1, 2];
        game.add_result(1, 1, "victory", 100);
        game.add_result(2, 2, "defeat", 0);

        let first = game.on_game_end(&store).await;
        assert!(first.is_some());
        assert_eq!(game.state, GameLifecycle::Ended);

        let second = game.on_game_end(&store).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn mutual_draw_invalidates_without_results() {
        let store = MemStore::new();
        let mut game = two_player_game();
        game.state = GameLifecycle::Live;
        game.live_players = vec![1, 2];
        game.add_result(1, 1, "draw", 0);
        game.add_result(2, 2, "draw", 0);

        let info = game.on_game_end(&store).await;
        assert!(info.is_none());
        assert_eq!(game.validity, ValidityState::MutualDraw);
        assert_eq!(game.state, GameLifecycle::Ended);
    }

    #[tokio::test]
    async fn no_results_means_unknown_result() {
        let store = MemStore::new();
        let mut game = two_player_game();
        game.state = GameLifecycle::Live;
        game.live_players = vec![1, 2];

        let info = game.on_game_end(&store).await;
        assert!(info.is_none());
        assert_eq!(game.validity, ValidityState::UnknownResult);
    }

    #[tokio::test]
    async fn desyncs_invalidate_over_threshold() {
        let store = MemStore::new();
        let mut game = two_player_game();
        game.state = GameLifecycle::Live;
        game.live_players = vec![1, 2];
        game.desyncs = 21;
        game.add_result(1, 1, "victory", 100);

        game.on_game_end(&store).await;
        assert_eq!(game.validity, ValidityState::TooManyDesyncs);
    }

    #[test]
    fn visibility_rules() {
        let mut game = two_player_game();
        let mut host = Player::new(1, "host", 1500.0, 500.0);
        let viewer = Player::new(9, "viewer", 1500.0, 500.0);

        // staging, public, not a foe: visible
        assert!(game.is_visible_to(&viewer, Some(&host)));

        host.foes.insert(9);
        assert!(!game.is_visible_to(&viewer, Some(&host)));

        // live games are visible to everyone, foes included
        game.state = GameLifecycle::Live;
        assert!(game.is_visible_to(&viewer, Some(&host)));

        game.state = GameLifecycle::Staging;
        game.visibility = VisibilityState::Friends;
        assert!(!game.is_visible_to(&viewer, Some(&host)));
        host.friends.insert(9);
        assert!(game.is_visible_to(&viewer, Some(&host)));
    }

    #[test]
    fn rating_range_gates_visibility() {
        let mut game = two_player_game();
        game.enforce_rating_range = true;
        game.displayed_rating_range = InclusiveRange::new(Some(500.0), Some(1000.0));
        let host = Player::new(1, "host", 1500.0, 500.0);
        // displayed rating = 1500 - 3*500 = 0, below the range
        let viewer = Player::new(9, "viewer", 1500.0, 500.0);
        assert!(!game.is_visible_to(&viewer, Some(&host)));

        let strong = {
            let mut p = Player::new(10, "strong", 1500.0, 500.0);
            p.ratings
                .set("global", crate::models::Rating::new(2100.0, 450.0));
            p
        };
        assert!(game.is_visible_to(&strong, Some(&host)));
    }

    #[test]
    fn pings_prune_departed_players() {
        let mut game = two_player_game();
        game.update_player_pings(1, "2:35;99:10");
        assert_eq!(game.player_pings.get(&1).unwrap(), &vec![(2, 35)]);

        game.player_pings.insert(99, vec![(1, 5)]);
        game.update_player_pings(1, "2:40");
        assert!(!game.player_pings.contains_key(&99));
    }

    #[test]
    fn clear_slot_unseats_and_drops_ai() {
        let mut game = two_player_game();
        game.set_ai_option("AI: brutal", "StartSpot", &json!("2"));
        game.clear_slot(2);
        assert!(game.ais.is_empty());
        assert_eq!(
            game.player_options.get(&2).unwrap().army,
            Some(-1)
        );
    }

    fn queue(name: &str, team_size: usize, rating_type: &str, map_ids: &[i32]) -> MatchmakerQueue {
        MatchmakerQueue {
            id: team_size as i32,
            name: name.to_string(),
            featured_mod: "tacc".to_string(),
            rating_type: rating_type.to_string(),
            team_size,
            map_pools: vec![(
                MapPool {
                    id: 1,
                    name: format!("{name}_pool"),
                    maps: map_ids
                        .iter()
                        .map(|id| crate::models::MapVersion {
                            id: *id,
                            name: format!("map{id}"),
                            file_path: format!("total2.hpi/map{id}/cafe"),
                            ranked: true,
                        })
                        .collect(),
                },
                None,
                None,
            )],
        }
    }

    #[test]
    fn preferred_global_forces_global() {
        let mut game = two_player_game();
        game.rating_type_preferred = rating_type::GLOBAL.to_string();
        game.matchmaker_queue_id = Some(3);
        game.assign_rating_type(true, &HashMap::new(), None, false);
        assert_eq!(game.rating_type, rating_type::GLOBAL);
        assert_eq!(game.matchmaker_queue_id, None);
    }

    #[test]
    fn queue_with_largest_fitting_team_size_wins() {
        let mut game = make_game(GameKind::Custom);
        game.state = GameLifecycle::Staging;
        game.rating_type_preferred = "ladder1v1".to_string();
        game.map_id = Some(10);
        for pid in 1..=4 {
            attach(&mut game, pid);
        }
        seat(&mut game, 1, 2, 1);
        seat(&mut game, 2, 2, 2);
        seat(&mut game, 3, 3, 3);
        seat(&mut game, 4, 3, 4);

        let mut queues = HashMap::new();
        queues.insert(
            "q1".to_string(),
            queue("q1", 1, "ladder1v1", &[10]),
        );
        queues.insert(
            "q2".to_string(),
            queue("q2", 2, "ladder2v2", &[10]),
        );
        let ranked: HashSet<i32> = [10].into_iter().collect();

        game.assign_rating_type(true, &queues, Some(&ranked), false);
        assert_eq!(game.rating_type, "ladder2v2");
        assert_eq!(game.matchmaker_queue_id, Some(2));
    }

    #[test]
    fn no_matching_queue_falls_back_to_global() {
        let mut game = two_player_game();
        game.rating_type_preferred = "ladder1v1".to_string();
        game.map_id = Some(999);
        let mut queues = HashMap::new();
        queues.insert("q1".to_string(), queue("q1", 1, "ladder1v1", &[10]));
        let ranked: HashSet<i32> = [10].into_iter().collect();
        game.assign_rating_type(true, &queues, Some(&ranked), false);
        assert_eq!(game.rating_type, rating_type::GLOBAL);
    }

    #[test]
    fn game_info_message_shape() {
        let game = two_player_game();
        let info = game.to_game_info(false);
        assert_eq!(info["command"], "game_info");
        assert_eq!(info["uid"], 1);
        assert_eq!(info["state"], "staging");
        assert_eq!(info["num_players"], 2);
        assert_eq!(info["map_name"], "SHERWOOD");

        let pings_only = game.to_game_info(true);
        assert!(pings_only.get("num_players").is_none());
    }

    #[test]
    fn army_stats_yield_commander_kills() {
        let mut game = two_player_game();
        game.report_army_stats(
            r#"{"stats": [{"name": "player1", "units": {"cdr": {"kills": 3}}},
                          {"name": "player2", "units": {"cdr": {"kills": 0}}}]}"#,
        );
        let kills = game.commander_kills();
        assert_eq!(kills["player1"], 3);
        assert_eq!(kills["player2"], 0);

        // malformed blobs are dropped without touching previous stats
        game.report_army_stats("not json");
        assert_eq!(game.commander_kills()["player1"], 3);
    }

    #[test]
    fn ladder_outcome_override_follows_scores() {
        let mut game = make_game(GameKind::Ladder);
        game.state = GameLifecycle::Staging;
        attach(&mut game, 1);
        attach(&mut game, 2);
        seat(&mut game, 1, 2, 1);
        seat(&mut game, 2, 3, 2);
        game.add_result(1, 1, "defeat", 10);
        game.add_result(2, 2, "defeat", 4);

        let team_sets = game.team_sets().unwrap();
        let outcomes = game.outcome_override(&team_sets).unwrap();
        assert_eq!(outcomes, vec![GameOutcome::Victory, GameOutcome::Defeat]);
    }
}
