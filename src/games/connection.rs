//! Per-client game command handling.
//!
//! A `GameConnection` binds one player's game client to one game. Commands
//! arrive in receive order; malformed ones are logged and dropped without
//! touching the connection.

use crate::db::{CoopResultRow, Store, TeamkillRow};
use crate::games::error::GameError;
use crate::games::game::{GameConnectionSlot, RemovalResult};
use crate::games::service::GameService;
use crate::models::{GameId, GameLifecycle, PlayerId, ValidityState};
use crate::players::{PlayerService, PlayerState};
use crate::protocol::{
    ConnectionRegistry, GameClientMessage, GameProtocol, connect_to_peer, disconnect_from_peer,
    game_message, host_game, join_game, notice,
};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameConnectionState {
    Initializing,
    ConnectedToHost,
    Ended,
}

/// Signals that a state-machine step should not mark the game dirty.
/// Used to short-circuit without cascading a failure.
struct GameStateNotDirty;

pub struct GameConnection {
    pub game_id: GameId,
    pub player_id: PlayerId,
    state: GameConnectionState,
    store: Arc<dyn Store>,
    game_service: Arc<GameService>,
    player_service: Arc<PlayerService>,
    lobby_connections: Arc<ConnectionRegistry>,
    protocol: Arc<dyn GameProtocol>,
}

impl GameConnection {
    pub fn new(
        game_id: GameId,
        player_id: PlayerId,
        store: Arc<dyn Store>,
        game_service: Arc<GameService>,
        player_service: Arc<PlayerService>,
        lobby_connections: Arc<ConnectionRegistry>,
        protocol: Arc<dyn GameProtocol>,
    ) -> Self {
        Self {
            game_id,
            player_id,
            state: GameConnectionState::Initializing,
            store,
            game_service,
            player_service,
            lobby_connections,
            protocol,
        }
    }

    pub fn state(&self) -> GameConnectionState {
        self.state
    }

    async fn player_state(&self) -> Option<PlayerState> {
        let player = self.player_service.get_player(self.player_id).await?;
        let state = player.lock().await.state;
        Some(state)
    }

    async fn is_host(&self) -> bool {
        let Some(state) = self.player_state().await else {
            return false;
        };
        matches!(
            state,
            PlayerState::Hosting | PlayerState::Hosted | PlayerState::Playing
        ) && self.host_id().await == Some(self.player_id)
    }

    async fn host_id(&self) -> Option<PlayerId> {
        let game = self.game_service.get(self.game_id).await?;
        let host = game.lock().await.host_id;
        host
    }

    /// Entry point for decoded game commands.
    pub async fn handle_message(&mut self, message: &GameClientMessage) {
        let result = match message.command.as_str() {
            "Desync" => self.handle_desync().await,
            "GameState" => match message.str_arg(0) {
                Some(state) => self.handle_game_state(&state).await,
                None => Err(GameError::Other("GameState missing argument".to_string())),
            },
            "GameOption" => self.handle_game_option(message).await,
            "GameMods" => self.handle_game_mods(message).await,
            "PlayerOption" => self.handle_player_option(message).await,
            "AIOption" => self.handle_ai_option(message).await,
            "ClearSlot" => self.handle_clear_slot(message).await,
            "GameResult" => self.handle_game_result(message).await,
            "OperationComplete" => self.handle_operation_complete(message).await,
            "JsonStats" => self.handle_json_stats(message).await,
            "EnforceRating" => self.handle_enforce_rating().await,
            "TeamkillHappened" => self.handle_teamkill_happened(message).await,
            "GameEnded" => self.handle_game_ended().await,
            "IceMsg" => self.handle_ice_message(message).await,
            "GameMetrics" => self.handle_game_metrics(message).await,
            "TeamkillReport" | "Rehost" | "Bottleneck" | "BottleneckCleared" | "Disconnected"
            | "Chat" | "GameFull" => Ok(()),
            other => {
                tracing::warn!(
                    "Unrecognized command {other} from player {}",
                    self.player_id
                );
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(
                "Game {} player {}: error handling {}: {e}",
                self.game_id,
                self.player_id,
                message.command
            );
        }
    }

    async fn handle_desync(&mut self) -> Result<(), GameError> {
        if let Some(game) = self.game_service.get(self.game_id).await {
            game.lock().await.desyncs += 1;
        }
        Ok(())
    }

    /// Changes in game state. The minor state was smuggled in via a
    /// preceding `GameOption("SubState", ..)` and is read back here.
    pub async fn handle_game_state(&mut self, state: &str) -> Result<(), GameError> {
        let substate = match self.player_service.get_player(self.player_id).await {
            Some(player) => player.lock().await.own_game_substate.clone(),
            None => None,
        };

        let outcome = match (state, substate.as_deref()) {
            ("Idle", _) => match self.handle_idle_state().await {
                Ok(()) => Err(GameStateNotDirty),
                Err(e) => return Err(e),
            },
            ("Lobby", Some("Staging")) => self.handle_staging_state().await,
            ("Lobby", Some("Battleroom")) => self.handle_battleroom_state().await,
            ("Launching", Some("Launching")) => self.handle_launching_state().await,
            ("Launching", Some("Live")) => self.handle_live_state().await,
            ("Ended", _) => {
                self.on_connection_lost().await;
                Ok(())
            }
            (other, sub) => {
                tracing::debug!(
                    "Game {}: ignoring GameState {other:?}/{sub:?}",
                    self.game_id
                );
                Err(GameStateNotDirty)
            }
        };

        if outcome.is_ok() {
            self.mark_dirty(false, false).await;
        }
        Ok(())
    }

    async fn handle_idle_state(&mut self) -> Result<(), GameError> {
        let Some(state) = self.player_state().await else {
            return Ok(());
        };
        match state {
            PlayerState::Hosting => {
                let slot = self.own_slot().await?;
                let Some(game) = self.game_service.get(self.game_id).await else {
                    return Ok(());
                };
                let mut game = game.lock().await;
                game.state = GameLifecycle::Staging;
                self.state = GameConnectionState::ConnectedToHost;
                game.add_game_connection(slot)?;
                game.host_id = Some(self.player_id);
            }
            PlayerState::Joining => {}
            other => {
                tracing::error!("Unexpected player state {other:?} for Idle report");
                self.abort("unexpected player state").await;
            }
        }
        Ok(())
    }

    async fn handle_staging_state(&mut self) -> Result<(), GameStateNotDirty> {
        let Some(state) = self.player_state().await else {
            return Err(GameStateNotDirty);
        };
        match state {
            PlayerState::Hosting => {
                let Some(game) = self.game_service.get(self.game_id).await else {
                    return Err(GameStateNotDirty);
                };
                let map_name = {
                    let mut game = game.lock().await;
                    game.state = GameLifecycle::Staging;
                    game.set_hosted_staging();
                    game.map_name()
                };
                if self.protocol.send_message(host_game(&map_name)).await.is_err() {
                    tracing::debug!("Host {} dropped during HostGame", self.player_id);
                }
                Ok(())
            }
            PlayerState::Joining => {
                self.join_and_wire_peers().await;
                Ok(())
            }
            _ => Err(GameStateNotDirty),
        }
    }

    /// Wires the joiner to the host and every already-connected peer.
    /// Failures to reach a single peer never abort the rest of the wiring.
    async fn join_and_wire_peers(&mut self) {
        let Some(game) = self.game_service.get(self.game_id).await else {
            return;
        };

        // connect to host first
        let host_info = {
            let game = game.lock().await;
            game.host_id.and_then(|host_id| {
                game.connection(host_id).map(|slot| {
                    (
                        host_id,
                        game.kind.player_alias(&slot.login, &slot.alias),
                        slot.protocol.clone(),
                    )
                })
            })
        };
        let host_ok = match &host_info {
            Some((host_id, _, _)) => {
                let host_state = {
                    match self.player_service.get_player(*host_id).await {
                        Some(p) => Some(p.lock().await.state),
                        None => None,
                    }
                };
                matches!(
                    host_state,
                    Some(PlayerState::Hosting) | Some(PlayerState::Hosted)
                )
            }
            None => false,
        };
        if !host_ok {
            self.abort("The host left the lobby").await;
            return;
        }
        let (host_id, host_alias, host_protocol) = host_info.unwrap();

        if self
            .protocol
            .send_message(join_game(&host_alias, host_id))
            .await
            .is_err()
        {
            self.abort("lost connection during join").await;
            return;
        }

        let kind = game.lock().await.kind;
        let own_alias = self.own_alias(&kind).await;
        if host_protocol
            .send_message(connect_to_peer(&own_alias, self.player_id, true))
            .await
            .is_err()
        {
            // the joiner's path must not abort when the host's side channel drops
            tracing::debug!("Failed to offer ConnectToPeer to host {host_id}");
        }

        if self.state == GameConnectionState::Ended {
            // aborted while connecting
            return;
        }
        self.state = GameConnectionState::ConnectedToHost;

        let slot = match self.own_slot().await {
            Ok(slot) => slot,
            Err(_) => return,
        };
        let join_error = {
            let mut game = game.lock().await;
            game.add_game_connection(slot).err()
        };
        if let Some(e) = join_error {
            self.lobby_connections
                .send_to_player(
                    self.player_id,
                    &{
                        let mut msg = notice(
                            "game_join_fail",
                            &format!("Sorry, you can't join this game: {e}"),
                        );
                        msg["style"] = json!("game_join_fail");
                        msg
                    },
                )
                .await;
            self.abort(&format!("GameError while joining: {e}")).await;
            return;
        }

        // wire the remaining peers both ways
        let peers: Vec<(PlayerId, String, Arc<dyn GameProtocol>)> = {
            let game = game.lock().await;
            game.connections()
                .filter(|slot| slot.player_id != self.player_id && Some(slot.player_id) != Some(host_id))
                .map(|slot| {
                    (
                        slot.player_id,
                        game.kind.player_alias(&slot.login, &slot.alias),
                        slot.protocol.clone(),
                    )
                })
                .collect()
        };
        for (peer_id, peer_alias, peer_protocol) in peers {
            if self
                .protocol
                .send_message(connect_to_peer(&peer_alias, peer_id, true))
                .await
                .is_err()
            {
                tracing::debug!("Failed to tell {} about peer {peer_id}", self.player_id);
            }
            if peer_protocol
                .send_message(connect_to_peer(&own_alias, self.player_id, false))
                .await
                .is_err()
            {
                tracing::debug!("Failed to tell peer {peer_id} about {}", self.player_id);
            }
        }
    }

    async fn handle_battleroom_state(&mut self) -> Result<(), GameStateNotDirty> {
        let Some(state) = self.player_state().await else {
            return Err(GameStateNotDirty);
        };
        match state {
            PlayerState::Hosting => {
                if let Some(game) = self.game_service.get(self.game_id).await {
                    let mut game = game.lock().await;
                    game.state = GameLifecycle::Battleroom;
                    game.set_hosted_battleroom();
                }
                self.player_service
                    .set_player_state(self.player_id, PlayerState::Hosted)
                    .await;
                Ok(())
            }
            PlayerState::Joining => {
                self.player_service
                    .set_player_state(self.player_id, PlayerState::Joined)
                    .await;
                Ok(())
            }
            _ => Err(GameStateNotDirty),
        }
    }

    async fn handle_launching_state(&mut self) -> Result<(), GameStateNotDirty> {
        if self.player_state().await != Some(PlayerState::Hosted) {
            return Err(GameStateNotDirty);
        }
        let Some(game) = self.game_service.get(self.game_id).await else {
            return Err(GameStateNotDirty);
        };
        let players = {
            let mut game = game.lock().await;
            game.on_launching()
        };
        for pid in players {
            self.player_service
                .set_player_state(pid, PlayerState::Playing)
                .await;
        }
        Ok(())
    }

    async fn handle_live_state(&mut self) -> Result<(), GameStateNotDirty> {
        if !self.is_host().await {
            return Err(GameStateNotDirty);
        }
        self.game_service.make_game_live(self.game_id).await;
        Ok(())
    }

    async fn handle_game_option(
        &mut self,
        message: &GameClientMessage,
    ) -> Result<(), GameError> {
        let Some(key) = message.str_arg(0) else {
            return Ok(());
        };
        let value = message.str_arg(1).unwrap_or_default();

        if key == "SubState" {
            if let Some(player) = self.player_service.get_player(self.player_id).await {
                player.lock().await.own_game_substate = Some(value.clone());
            }
        }

        if !self.is_host().await {
            return Ok(());
        }
        let Some(game) = self.game_service.get(self.game_id).await else {
            return Ok(());
        };

        match key.as_str() {
            "Slots" => {
                if let Ok(slots) = value.trim().parse::<usize>() {
                    game.lock().await.max_players = slots;
                }
            }
            "MapDetails" => {
                let parts: Vec<&str> = value.split('\u{1f}').collect();
                if parts.len() >= 3 {
                    let (map_name, hpi_archive, crc) = (parts[0], parts[1], parts[2]);
                    match self.store.find_map_version(map_name, crc).await {
                        Ok(Some(row)) => {
                            game.lock().await.set_map(Some(row.id), &row.filename, row.ranked);
                        }
                        Ok(None) => {
                            tracing::debug!(
                                "{map_name}/{crc} not found. defaulting to {hpi_archive} unranked"
                            );
                            game.lock().await.set_map(
                                None,
                                &format!("{hpi_archive}/{map_name}/{crc}"),
                                true,
                            );
                        }
                        Err(e) => {
                            tracing::error!("Map lookup failed: {e}");
                        }
                    }
                }
            }
            "RatingType" => {
                let mut game = game.lock().await;
                game.rating_type = value.clone();
                game.rating_type_preferred = value.clone();
            }
            "ReplayDelaySeconds" => {
                if let Ok(delay) = value.trim().parse::<i64>() {
                    game.lock().await.replay_delay_seconds = delay;
                }
            }
            "Title" => {
                // non-ascii titles are silently ignored
                let _ = game.lock().await.set_name(&value);
            }
            other => {
                game.lock().await.options.set(other, &value);
            }
        }
        self.mark_dirty(false, false).await;
        Ok(())
    }

    async fn handle_game_mods(&mut self, message: &GameClientMessage) -> Result<(), GameError> {
        if !self.is_host().await {
            return Ok(());
        }
        let Some(mode) = message.str_arg(0) else {
            return Ok(());
        };
        let Some(game) = self.game_service.get(self.game_id).await else {
            return Ok(());
        };
        match mode.as_str() {
            "activated" => {
                if message.int_arg(1) == Some(0) {
                    game.lock().await.mods.clear();
                }
            }
            "uids" => {
                let uids: Vec<String> = message
                    .str_arg(1)
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(|s| s.to_string())
                    .collect();
                let names = self
                    .store
                    .mod_names(&uids)
                    .await
                    .unwrap_or_default();
                let mut game = game.lock().await;
                game.mods = uids
                    .into_iter()
                    .map(|uid| {
                        let name = names
                            .get(&uid)
                            .cloned()
                            .unwrap_or_else(|| "Unknown sim mod".to_string());
                        (uid, name)
                    })
                    .collect();
            }
            other => {
                tracing::warn!("Ignoring game mod: {other}");
                return Ok(());
            }
        }
        self.mark_dirty(false, false).await;
        Ok(())
    }

    async fn handle_player_option(
        &mut self,
        message: &GameClientMessage,
    ) -> Result<(), GameError> {
        // joiners may advertise their own seat; the host can't always tell
        // who joined before the game actually starts
        let (Some(player_id), Some(key)) = (message.int_arg(0), message.str_arg(1)) else {
            return Ok(());
        };
        let value = message.args.get(2).cloned().unwrap_or_default();
        if let Some(game) = self.game_service.get(self.game_id).await {
            game.lock()
                .await
                .set_player_option_value(player_id as PlayerId, &key, &value);
            self.mark_dirty(false, false).await;
        }
        Ok(())
    }

    async fn handle_ai_option(&mut self, message: &GameClientMessage) -> Result<(), GameError> {
        if !self.is_host().await {
            return Ok(());
        }
        let (Some(name), Some(key)) = (message.str_arg(0), message.str_arg(1)) else {
            return Ok(());
        };
        let value = message.args.get(2).cloned().unwrap_or_default();
        if let Some(game) = self.game_service.get(self.game_id).await {
            game.lock().await.set_ai_option(&name, &key, &value);
            self.mark_dirty(false, false).await;
        }
        Ok(())
    }

    async fn handle_clear_slot(&mut self, message: &GameClientMessage) -> Result<(), GameError> {
        if !self.is_host().await {
            return Ok(());
        }
        let Some(slot) = message.int_arg(0) else {
            return Ok(());
        };
        if let Some(game) = self.game_service.get(self.game_id).await {
            game.lock().await.clear_slot(slot as i32);
            self.mark_dirty(false, false).await;
        }
        Ok(())
    }

    async fn handle_game_result(&mut self, message: &GameClientMessage) -> Result<(), GameError> {
        let (Some(army), Some(result)) = (message.int_arg(0), message.str_arg(1)) else {
            return Ok(());
        };
        let result = result.to_lowercase();
        let words: Vec<&str> = result.split_whitespace().collect();
        if words.len() < 2 {
            tracing::warn!("Invalid result for army {army} reported: {result}");
            return Ok(());
        }
        let (label, score_text) = (words[words.len() - 2], words[words.len() - 1]);
        let Ok(score) = score_text.parse::<i64>() else {
            tracing::warn!("Invalid result for army {army} reported: {result}");
            return Ok(());
        };
        if let Some(game) = self.game_service.get(self.game_id).await {
            game.lock()
                .await
                .add_result(self.player_id, army as i32, label, score);
        }
        Ok(())
    }

    async fn handle_operation_complete(
        &mut self,
        message: &GameClientMessage,
    ) -> Result<(), GameError> {
        if message.int_arg(0) != Some(1) {
            return Ok(());
        }
        let (Some(secondary), Some(delta)) = (message.int_arg(1), message.str_arg(2)) else {
            return Ok(());
        };
        let Some(game) = self.game_service.get(self.game_id).await else {
            return Ok(());
        };
        let (validity, map_file_path, player_count) = {
            let game = game.lock().await;
            (
                game.validity,
                game.map_file_path.clone(),
                game.players().len(),
            )
        };
        if validity != ValidityState::CoopNotRanked {
            return Ok(());
        }
        let mission = match self.store.coop_map_id(&map_file_path).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                tracing::debug!("can't find coop map: {map_file_path}");
                return Ok(());
            }
            Err(e) => {
                tracing::error!("coop map lookup failed: {e}");
                return Ok(());
            }
        };
        if let Err(e) = self
            .store
            .insert_coop_result(&CoopResultRow {
                mission,
                game_id: self.game_id,
                secondary: secondary as i32,
                time: delta,
                player_count: player_count as i64,
            })
            .await
        {
            tracing::error!("failed to record coop result: {e}");
        }
        Ok(())
    }

    async fn handle_json_stats(&mut self, message: &GameClientMessage) -> Result<(), GameError> {
        let Some(blob) = message.str_arg(0) else {
            return Ok(());
        };
        if let Some(game) = self.game_service.get(self.game_id).await {
            game.lock().await.report_army_stats(&blob);
        }
        Ok(())
    }

    async fn handle_enforce_rating(&mut self) -> Result<(), GameError> {
        if let Some(game) = self.game_service.get(self.game_id).await {
            game.lock().await.enforce_rating = true;
        }
        Ok(())
    }

    async fn handle_teamkill_happened(
        &mut self,
        message: &GameClientMessage,
    ) -> Result<(), GameError> {
        let (Some(gametime), Some(victim_id), Some(teamkiller_id)) = (
            message.int_arg(0),
            message.int_arg(1),
            message.int_arg(3),
        ) else {
            return Ok(());
        };
        if victim_id == 0 || teamkiller_id == 0 {
            tracing::debug!("Ignoring teamkill for AI player");
            return Ok(());
        }
        if let Err(e) = self
            .store
            .insert_teamkill(&TeamkillRow {
                teamkiller: teamkiller_id as PlayerId,
                victim: victim_id as PlayerId,
                game_id: self.game_id,
                gametime,
            })
            .await
        {
            tracing::error!("failed to record teamkill: {e}");
        }
        Ok(())
    }

    /// Signals that the simulation has ended for this client.
    pub async fn handle_game_ended(&mut self) -> Result<(), GameError> {
        let Some(game) = self.game_service.get(self.game_id).await else {
            return Ok(());
        };
        let ended_info = {
            let mut game = game.lock().await;
            game.set_finished_sim(self.player_id);
            game.check_sim_end(self.store.as_ref()).await;
            if game.ended {
                game.on_game_end(self.store.as_ref()).await
            } else {
                return Ok(());
            }
        };
        self.game_service
            .finalize_game_end(self.game_id, ended_info)
            .await;
        Ok(())
    }

    async fn handle_ice_message(&mut self, message: &GameClientMessage) -> Result<(), GameError> {
        let (Some(receiver_id), Some(blob)) = (message.int_arg(0), message.args.get(1).cloned())
        else {
            return Ok(());
        };
        let receiver_id = receiver_id as PlayerId;
        let Some(peer) = self.player_service.get_player(receiver_id).await else {
            tracing::debug!("Ignoring ICE message for unknown player: {receiver_id}");
            return Ok(());
        };
        let peer_game = peer.lock().await.game_id;
        let protocol = match peer_game {
            Some(game_id) => match self.game_service.get(game_id).await {
                Some(game) => game
                    .lock()
                    .await
                    .connection(receiver_id)
                    .map(|slot| slot.protocol.clone()),
                None => None,
            },
            None => None,
        };
        let Some(protocol) = protocol else {
            tracing::debug!(
                "Ignoring ICE message for player without game connection: {receiver_id}"
            );
            return Ok(());
        };
        if protocol
            .send_message(game_message(
                "IceMsg",
                vec![json!(self.player_id), blob],
            ))
            .await
            .is_err()
        {
            tracing::debug!(
                "Failed to send ICE message to player {receiver_id} due to a disconnect"
            );
        }
        Ok(())
    }

    async fn handle_game_metrics(&mut self, message: &GameClientMessage) -> Result<(), GameError> {
        let (Some(key), Some(value)) = (message.str_arg(0), message.str_arg(1)) else {
            return Ok(());
        };
        if key != "PlayerPings" || value.is_empty() {
            return Ok(());
        }
        let Some(game) = self.game_service.get(self.game_id).await else {
            return Ok(());
        };
        let (table_changed, host_has_pings) = {
            let mut game = game.lock().await;
            let before = game.player_pings.len();
            game.update_player_pings(self.player_id, &value);
            let changed = before != game.player_pings.len();
            let host_has = game
                .host_id
                .map(|host| game.player_pings.contains_key(&host))
                .unwrap_or(false);
            (changed, host_has)
        };
        if self.is_host().await || (table_changed && !host_has_pings) {
            self.mark_dirty(!table_changed, self.game_service.publish_pings_only())
                .await;
        }
        Ok(())
    }

    async fn mark_dirty(&self, only_to_peers: bool, pings_only: bool) {
        self.game_service
            .mark_dirty(self.game_id, only_to_peers, pings_only)
            .await;
    }

    async fn own_slot(&self) -> Result<GameConnectionSlot, GameError> {
        let Some(player) = self.player_service.get_player(self.player_id).await else {
            return Err(GameError::Other(format!(
                "player {} not registered",
                self.player_id
            )));
        };
        let player = player.lock().await;
        Ok(GameConnectionSlot {
            player_id: self.player_id,
            login: player.login.clone(),
            alias: player.alias.clone(),
            protocol: self.protocol.clone(),
            finished_sim: false,
        })
    }

    async fn own_alias(&self, kind: &crate::games::kind::GameKind) -> String {
        match self.player_service.get_player(self.player_id).await {
            Some(player) => {
                let player = player.lock().await;
                kind.player_alias(&player.login, &player.alias)
            }
            None => self.player_id.to_string(),
        }
    }

    /// Aborts the connection. Idempotent: repeated calls are no-ops.
    pub async fn abort(&mut self, log_message: &str) {
        if self.state == GameConnectionState::Ended {
            return;
        }
        tracing::debug!(
            "GameConnection({}, {}).abort({log_message})",
            self.player_id,
            self.game_id
        );

        if let Some(game) = self.game_service.get(self.game_id).await {
            let in_lobby = matches!(
                game.lock().await.state,
                GameLifecycle::Staging | GameLifecycle::Battleroom
            );
            if in_lobby {
                self.disconnect_all_peers(&game).await;
            }
        }
        self.state = GameConnectionState::Ended;

        if let Some(game) = self.game_service.get(self.game_id).await {
            let removal = {
                let mut game = game.lock().await;
                game.remove_game_connection(self.player_id, self.store.as_ref())
                    .await
            };
            if let RemovalResult::Ended(info) = removal {
                self.game_service
                    .finalize_game_end(self.game_id, info)
                    .await;
            }
        }
        self.mark_dirty(false, false).await;
        self.player_service
            .set_player_state(self.player_id, PlayerState::Idle)
            .await;
        if let Some(player) = self.player_service.get_player(self.player_id).await {
            let mut player = player.lock().await;
            player.game_id = None;
            player.own_game_substate = None;
        }
    }

    async fn disconnect_all_peers(&self, game: &Arc<tokio::sync::Mutex<crate::games::game::Game>>) {
        let peers: Vec<(PlayerId, Arc<dyn GameProtocol>)> = {
            let game = game.lock().await;
            game.connections()
                .filter(|slot| slot.player_id != self.player_id)
                .map(|slot| (slot.player_id, slot.protocol.clone()))
                .collect()
        };
        for (peer_id, protocol) in peers {
            if protocol
                .send_message(disconnect_from_peer(self.player_id))
                .await
                .is_err()
            {
                tracing::debug!(
                    "send_DisconnectFromPeer failed for player {peer_id}"
                );
            }
        }
    }

    pub async fn on_connection_lost(&mut self) {
        if let Some(game) = self.game_service.get(self.game_id).await {
            let removal = {
                let mut game = game.lock().await;
                game.remove_game_connection(self.player_id, self.store.as_ref())
                    .await
            };
            if let RemovalResult::Ended(info) = removal {
                self.game_service
                    .finalize_game_end(self.game_id, info)
                    .await;
            }
        }
        self.abort("connection lost").await;
    }
}
