//! Campaign lifecycle: loading/saving scenarios, applying rated games and
//! rotating to the next scenario when a capital falls.

use crate::config::GalacticWarConfig;
use crate::errors::AppError;
use crate::galactic_war::gml;
use crate::galactic_war::planet::{PlanetDefaults, ScenarioDoc};
use crate::galactic_war::state::{CapitalFilter, GalacticWarState, InvalidGalacticWarGame};
use crate::models::{
    EndedGameInfo, Faction, OutcomeLikelihoods, PlayerId, QueueMap, RankedRating, Rating, TeamId,
};
use crate::players::PlayerService;
use crate::protocol::{ConnectionRegistry, notice};
use crate::rating::service::RatingCallback;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub struct GalacticWarService {
    config: GalacticWarConfig,
    player_service: Arc<PlayerService>,
    lobby_connections: Arc<ConnectionRegistry>,
    queues: QueueMap,
    state: Mutex<Option<GalacticWarState>>,
    dirty: AtomicBool,
    update_cron: Mutex<Option<JoinHandle<()>>>,
}

impl GalacticWarService {
    pub fn new(
        config: GalacticWarConfig,
        player_service: Arc<PlayerService>,
        lobby_connections: Arc<ConnectionRegistry>,
        queues: QueueMap,
    ) -> Self {
        Self {
            config,
            player_service,
            lobby_connections,
            queues,
            state: Mutex::new(None),
            dirty: AtomicBool::new(false),
            update_cron: Mutex::new(None),
        }
    }

    fn defaults(&self) -> PlanetDefaults {
        PlanetDefaults {
            size: self.config.default_planet_size,
            mod_spec: self.config.default_mod.clone(),
        }
    }

    pub async fn initialize(self: &Arc<Self>) -> Result<(), AppError> {
        self.load_state(None).await?;
        self.set_dirty(true);
        self.start_cron().await;
        if let Some(directive) = self.config.manual_capture.clone() {
            self.manual_capture(&directive).await;
        }
        Ok(())
    }

    async fn start_cron(self: &Arc<Self>) {
        let mut cron = self.update_cron.lock().await;
        if let Some(handle) = cron.take() {
            handle.abort();
        }
        if self.config.update_interval.is_zero() {
            return;
        }
        let interval = self.config.update_interval;
        tracing::info!("Scheduling galactic war updates every {interval:?}");
        let service = self.clone();
        *cron = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.scheduled_update_state().await;
            }
        }));
    }

    pub fn get_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::SeqCst);
    }

    /// Reads and clears the dirty flag in one step for a broadcaster tick.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    pub async fn has_cron(&self) -> bool {
        self.update_cron.lock().await.is_some()
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.update_cron.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn kill(&self) {
        self.shutdown().await;
    }

    /// The callback registered with the rating service.
    pub fn rating_callback(self: &Arc<Self>) -> RatingCallback {
        let service = self.clone();
        Arc::new(move |game_info, old_ratings, new_ratings, likelihoods| {
            let service = service.clone();
            Box::pin(async move {
                service
                    .on_game_rating(&game_info, &old_ratings, &new_ratings, &likelihoods)
                    .await;
            })
        })
    }

    pub async fn on_game_rating(
        &self,
        game_info: &EndedGameInfo,
        old_ratings: &HashMap<PlayerId, RankedRating>,
        new_ratings: &HashMap<PlayerId, Rating>,
        likelihoods: &HashMap<TeamId, OutcomeLikelihoods>,
    ) {
        if game_info.galactic_war_planet_name.is_none() {
            return;
        }
        tracing::info!(
            "[on_game_rating] game_id={}, planet={:?}",
            game_info.game_id,
            game_info.galactic_war_planet_name
        );

        let validation = {
            let mut state = self.state.lock().await;
            let Some(state) = state.as_mut() else {
                return;
            };
            match state.validate_game(game_info, self.config.check_game_mod) {
                Ok(()) => {
                    state.update_scores(
                        game_info,
                        old_ratings,
                        new_ratings,
                        likelihoods,
                        &self.config,
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        match validation {
            Ok(()) => {
                if !self.has_cron().await {
                    self.update_state().await;
                }
                if let Err(e) = self.save_state().await {
                    tracing::error!("Failed to save galactic war state: {e}");
                }
                self.set_dirty(true);
            }
            Err(e) => {
                tracing::error!("[on_game_rating] {e}");
                self.notify_players_of_rejection(game_info, &e).await;
            }
        }
    }

    async fn notify_players_of_rejection(
        &self,
        game_info: &EndedGameInfo,
        error: &InvalidGalacticWarGame,
    ) {
        let message = notice(
            "info",
            &format!(
                "Game {} did not count towards Galactic War because: {error}",
                game_info.game_id
            ),
        );
        for player_id in game_info.player_ids() {
            if self.player_service.get_player(player_id).await.is_some() {
                self.lobby_connections
                    .send_to_player(player_id, &message)
                    .await;
            }
        }
    }

    pub async fn scheduled_update_state(&self) {
        let changes = self.update_state().await;
        if changes > 0 {
            if let Err(e) = self.save_state().await {
                tracing::error!("Failed to save galactic war state: {e}");
            }
            self.set_dirty(true);
        }
    }

    /// Front-line pass, capture passes repeated until stable, then
    /// scenario rotation if fewer than two capitals still stand.
    pub async fn update_state(&self) -> usize {
        tracing::info!("[update_state] processing ...");
        let (mut changes, needs_rotation) = {
            let mut guard = self.state.lock().await;
            let Some(state) = guard.as_mut() else {
                return 0;
            };
            let mut changes =
                state.update_front_lines(self.config.required_dominance_ratio);
            let mut pass = 1;
            while pass > 0 {
                pass = state.capture_isolated_planets() + state.capture_uncontested_planets();
                changes += pass;
            }
            let uncaptured = state.capitals(CapitalFilter::uncaptured());
            (changes, uncaptured.len() < 2)
        };

        if needs_rotation {
            tracing::info!("[update_state] the galaxy is captured; starting a new scenario");
            match self.next_scenario_path().await {
                Ok(path) => {
                    if let Err(e) = self.load_state(Some(&path)).await {
                        tracing::error!("Failed to load next scenario {path:?}: {e}");
                    } else {
                        self.initialise_scenario().await;
                        changes += 1;
                    }
                }
                Err(e) => tracing::error!("Failed to find next scenario: {e}"),
            }
        }
        changes
    }

    async fn initialise_scenario(&self) {
        let queues = self.queues.lock().await.clone();
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            return;
        };
        if state.capitals(CapitalFilter::all()).is_empty() {
            state.assign_two_capitals();
        }
        if state.uncontested_planets().len() == 2 {
            tracing::info!("distributing planets");
            state.distribute_planets_to_factions();
        }
        state.separate_abutting_factions();
        state.capture_uncontested_planets();
        if self.config.initialise_ensure_ranked_maps {
            state.ensure_ranked_maps(&queues);
        }
    }

    /// Scenario files sorted by name, wrapping around; falls back to the
    /// configured initial scenario when the current one is not found.
    async fn next_scenario_path(&self) -> Result<PathBuf, AppError> {
        let root = PathBuf::from(&self.config.scenario_path);
        let mut files: Vec<PathBuf> = Vec::new();
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("gml") | Some("json") => files.push(path),
                _ => {}
            }
        }
        files.sort();

        let current_label = {
            let state = self.state.lock().await;
            state.as_ref().map(|s| s.label().to_string())
        };
        let current = current_label.map(|label| root.join(label));
        let index = current
            .and_then(|current| files.iter().position(|f| *f == current));
        match index {
            Some(i) => Ok(files[(i + 1) % files.len()].clone()),
            None => Ok(root.join(&self.config.initial_scenario)),
        }
    }

    pub async fn reload_state(&self) -> Result<(), AppError> {
        tracing::info!("[reload_state] reloading state from file ...");
        self.load_state(None).await?;
        self.set_dirty(true);
        Ok(())
    }

    /// Deletes the saved state and starts over from the initial scenario.
    pub async fn reset(&self) -> Result<(), AppError> {
        tracing::info!("[reset] resetting ...");
        match tokio::fs::remove_file(&self.config.state_file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.load_state(None).await?;
        self.set_dirty(true);
        Ok(())
    }

    /// Applies a `planet:faction;planet:faction` capture directive.
    pub async fn manual_capture(&self, directive: &str) {
        let result: Result<(), AppError> = async {
            {
                let mut guard = self.state.lock().await;
                let state = guard
                    .as_mut()
                    .ok_or_else(|| AppError::NotFound("galactic war state".to_string()))?;
                for capture in directive.split(';').filter(|c| !c.is_empty()) {
                    let mut parts = capture.splitn(2, ':');
                    let (Some(planet_name), Some(faction_name)) =
                        (parts.next(), parts.next())
                    else {
                        return Err(AppError::InvalidInput(format!(
                            "bad capture directive: {capture}"
                        )));
                    };
                    let faction: Faction = faction_name.trim().parse()?;
                    tracing::info!(
                        "[manual_capture] capturing {planet_name} for {faction}"
                    );
                    if !state.apply_manual_capture(planet_name.trim(), faction) {
                        return Err(AppError::NotFound(format!("planet {planet_name}")));
                    }
                }
                Ok(())
            }
        }
        .await;

        match result {
            Ok(()) => {
                if let Err(e) = self.save_state().await {
                    tracing::warn!("unable to save after manual capture: {e}");
                }
                self.set_dirty(true);
            }
            Err(e) => tracing::warn!("unable to capture planet: {e}"),
        }
    }

    pub async fn with_state<R>(&self, f: impl FnOnce(&GalacticWarState) -> R) -> Option<R> {
        let state = self.state.lock().await;
        state.as_ref().map(f)
    }

    pub async fn with_state_mut<R>(
        &self,
        f: impl FnOnce(&mut GalacticWarState) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock().await;
        state.as_mut().map(f)
    }

    async fn load_state(&self, path: Option<&Path>) -> Result<(), AppError> {
        let state_path = PathBuf::from(&self.config.state_file);
        match path {
            Some(path) => {
                let state = self.read_state_file(path).await?;
                *self.state.lock().await = Some(state);
                Ok(())
            }
            None if tokio::fs::try_exists(&state_path).await.unwrap_or(false) => {
                tracing::info!("[load_state] existing state: {state_path:?}");
                let state = self.read_state_file(&state_path).await?;
                *self.state.lock().await = Some(state);
                Ok(())
            }
            None => {
                let scenario_path =
                    PathBuf::from(&self.config.scenario_path).join(&self.config.initial_scenario);
                tracing::info!("[load_state] initial scenario: {scenario_path:?}");
                let state = self.read_state_file(&scenario_path).await?;
                *self.state.lock().await = Some(state);
                self.initialise_scenario().await;
                self.save_state().await
            }
        }
    }

    async fn read_state_file(&self, path: &Path) -> Result<GalacticWarState, AppError> {
        let contents = tokio::fs::read_to_string(path).await?;
        let doc: ScenarioDoc = match path.extension().and_then(|e| e.to_str()) {
            Some("gml") => serde_json::from_value(gml::parse_scenario(&contents)?)?,
            Some("json") => serde_json::from_str(&contents)?,
            other => {
                return Err(AppError::InvalidInput(format!(
                    "Unsupported Galactic War file type: {other:?}"
                )));
            }
        };
        let mut state = GalacticWarState::from_document(doc, &self.defaults())
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;
        if state.label().is_empty() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                state.set_label(name);
            }
        }
        Ok(state)
    }

    /// Atomic save: write a temp file, then rename over the target.
    pub async fn save_state(&self) -> Result<(), AppError> {
        let state_path = PathBuf::from(&self.config.state_file);
        let contents = {
            let state = self.state.lock().await;
            let Some(state) = state.as_ref() else {
                return Ok(());
            };
            tracing::info!(
                "[save_state] scenario={}, {state_path:?}",
                state.label()
            );
            serde_json::to_string_pretty(&state.to_document())?
        };
        let temp_path = state_path.with_extension("temp");
        tokio::fs::write(&temp_path, contents).await?;
        tokio::fs::rename(&temp_path, &state_path).await?;
        Ok(())
    }
}
