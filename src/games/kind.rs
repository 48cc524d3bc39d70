//! Per-featured-mod game behavior as a tagged strategy instead of subclassing.

use crate::models::{GameType, featured_mod};

/// Which lifecycle milestone must resolve before the game counts as hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// Hosted once the host reaches the staging lobby.
    NormalLobby,
    /// Matchmaker games skip straight to the battleroom.
    AutoLobby,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameKind {
    Custom,
    Ladder,
    Coop,
}

impl GameKind {
    pub fn from_featured_mod(game_mode: &str) -> Self {
        match game_mode {
            featured_mod::LADDER_1V1 => GameKind::Ladder,
            featured_mod::COOP => GameKind::Coop,
            _ => GameKind::Custom,
        }
    }

    pub fn init_mode(&self) -> InitMode {
        match self {
            GameKind::Ladder => InitMode::AutoLobby,
            _ => InitMode::NormalLobby,
        }
    }

    pub fn game_type(&self) -> GameType {
        match self {
            GameKind::Custom => GameType::Custom,
            GameKind::Ladder => GameType::Matchmaker,
            GameKind::Coop => GameType::Coop,
        }
    }

    /// How the player shows up in peer-wiring messages.
    pub fn player_alias(&self, login: &str, alias: &str) -> String {
        match self {
            GameKind::Ladder if alias != login => format!("{alias}/{login}"),
            _ => login.to_string(),
        }
    }

    /// Ladder games report scores as win-1/other-0.
    pub fn uses_victory_only_scores(&self) -> bool {
        matches!(self, GameKind::Ladder)
    }

    /// Whether the 1v1 score-based outcome override may re-resolve outcomes.
    pub fn allows_outcome_override(&self) -> bool {
        matches!(self, GameKind::Ladder)
    }

    pub fn default_max_players(&self) -> usize {
        match self {
            GameKind::Ladder => 2,
            _ => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn featured_mod_selects_kind() {
        assert_eq!(GameKind::from_featured_mod("ladder1v1"), GameKind::Ladder);
        assert_eq!(GameKind::from_featured_mod("coop"), GameKind::Coop);
        assert_eq!(GameKind::from_featured_mod("tacc"), GameKind::Custom);
        assert_eq!(GameKind::from_featured_mod("taesc"), GameKind::Custom);
    }

    #[test]
    fn ladder_aliases_combine_alias_and_login() {
        assert_eq!(GameKind::Ladder.player_alias("foo", "bar"), "bar/foo");
        assert_eq!(GameKind::Ladder.player_alias("foo", "foo"), "foo");
        assert_eq!(GameKind::Custom.player_alias("foo", "bar"), "foo");
    }

    #[test]
    fn ladder_uses_auto_lobby() {
        assert_eq!(GameKind::Ladder.init_mode(), InitMode::AutoLobby);
        assert_eq!(GameKind::Custom.init_mode(), InitMode::NormalLobby);
    }
}
