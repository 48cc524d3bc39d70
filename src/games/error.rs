use thiserror::Error;

#[derive(Error, Debug)]
pub enum GameError {
    #[error("Game is full")]
    Full,

    #[error("Invalid game state: {0}")]
    InvalidState(String),

    #[error("Invalid connection state: {0}")]
    InvalidConnectionState(String),

    #[error("Missing team for at least one player: {0}")]
    MissingTeam(String),

    #[error("{0}")]
    Other(String),
}

/// The per-team partial outcomes could not be reconciled into one outcome
/// per team. The caller downgrades the game to UNKNOWN_RESULT.
#[derive(Error, Debug)]
#[error("Unable to resolve team outcomes: {0}")]
pub struct GameResolutionError(pub String);
