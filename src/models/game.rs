use crate::errors::AppError;
use crate::models::faction::Faction;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub type GameId = i32;
pub type PlayerId = i32;
pub type TeamId = i32;

/// Team number reserved for free-for-all players. `-1` marks observers.
pub const FFA_TEAM: i32 = 1;
pub const OBSERVER_TEAM: i32 = -1;

/// Featured mod technical names the backbone special-cases.
pub mod featured_mod {
    pub const DEFAULT: &str = "tacc";
    pub const LADDER_1V1: &str = "ladder1v1";
    pub const COOP: &str = "coop";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameLifecycle {
    Initializing,
    Staging,
    Battleroom,
    Launching,
    Live,
    Ended,
}

impl GameLifecycle {
    pub fn as_client_str(&self) -> &'static str {
        match self {
            GameLifecycle::Initializing => "unknown",
            GameLifecycle::Staging => "staging",
            GameLifecycle::Battleroom => "battleroom",
            GameLifecycle::Launching => "launching",
            GameLifecycle::Live => "live",
            GameLifecycle::Ended => "ended",
        }
    }

    /// Phases in which the seated-player set is still mutable.
    pub fn is_lobby_phase(&self) -> bool {
        matches!(
            self,
            GameLifecycle::Staging | GameLifecycle::Battleroom | GameLifecycle::Launching
        )
    }
}

/// Outcome of an army or team, as reported or resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameOutcome {
    Victory,
    Defeat,
    Draw,
    MutualDraw,
    Unknown,
    Conflicting,
}

impl GameOutcome {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            GameOutcome::Victory => "VICTORY",
            GameOutcome::Defeat => "DEFEAT",
            GameOutcome::Draw => "DRAW",
            GameOutcome::MutualDraw => "MUTUAL_DRAW",
            GameOutcome::Unknown => "UNKNOWN",
            GameOutcome::Conflicting => "CONFLICTING",
        }
    }
}

impl FromStr for GameOutcome {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "victory" => Ok(GameOutcome::Victory),
            "defeat" => Ok(GameOutcome::Defeat),
            "draw" => Ok(GameOutcome::Draw),
            "mutual_draw" => Ok(GameOutcome::MutualDraw),
            "unknown" => Ok(GameOutcome::Unknown),
            other => Err(AppError::InvalidInput(format!(
                "Unknown game outcome: {other}"
            ))),
        }
    }
}

/// Why a game does or does not count for rating. Downgrades are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidityState {
    Valid = 0,
    TooShort = 1,
    BadMap = 2,
    BadMod = 3,
    HasAiPlayers = 4,
    CheatsEnabled = 5,
    PrebuiltEnabled = 6,
    NorushEnabled = 7,
    BadUnitRestrictions = 8,
    UnlockedTeams = 9,
    NoFogOfWar = 10,
    WrongVictoryCondition = 11,
    UnevenTeamsNotRanked = 12,
    SinglePlayer = 13,
    MultiTeam = 14,
    FfaNotRanked = 15,
    MutualDraw = 16,
    TooManyDesyncs = 17,
    UnknownResult = 18,
    CoopNotRanked = 19,
}

impl ValidityState {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidityState::Valid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    Public,
    Friends,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameType {
    Custom,
    Matchmaker,
    Coop,
}

impl GameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::Custom => "custom",
            GameType::Matchmaker => "matchmaker",
            GameType::Coop => "coop",
        }
    }
}

/// Victory condition as reported through `GameOption("Victory", ...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Victory {
    Demoralization = 0,
    Domination = 1,
    Eradication = 2,
    Sandbox = 3,
}

impl Victory {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "demoralization" => Some(Victory::Demoralization),
            "domination" => Some(Victory::Domination),
            "eradication" => Some(Victory::Eradication),
            "sandbox" => Some(Victory::Sandbox),
            _ => None,
        }
    }
}

/// Catalog row describing a featured mod.
#[derive(Debug, Clone)]
pub struct FeaturedMod {
    pub id: i32,
    pub name: String,
    pub full_name: String,
    pub description: String,
    pub publish: bool,
    pub order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeLikelihoods {
    pub pwin: f64,
    pub pdraw: f64,
    pub plose: f64,
}

/// One seated player's slice of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EndedGamePlayerSummary {
    pub player_id: PlayerId,
    pub team_id: TeamId,
    pub faction: Faction,
    pub outcome: GameOutcome,
}

/// Immutable record of a finished game handed to the rating pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndedGameInfo {
    pub game_id: GameId,
    pub rating_type: Option<String>,
    pub map_id: Option<i32>,
    pub map_name: String,
    pub game_mode: String,
    pub galactic_war_planet_name: Option<String>,
    pub mods: Vec<String>,
    pub commander_kills: std::collections::HashMap<String, i64>,
    pub validity: ValidityState,
    pub player_summaries: Vec<EndedGamePlayerSummary>,
}

impl EndedGameInfo {
    pub fn player_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.player_summaries.iter().map(|s| s.player_id)
    }

    pub fn team_ids(&self) -> Vec<TeamId> {
        let mut teams = Vec::new();
        for summary in &self.player_summaries {
            if !teams.contains(&summary.team_id) {
                teams.push(summary.team_id);
            }
        }
        teams
    }
}
