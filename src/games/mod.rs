pub mod connection;
pub mod error;
pub mod game;
pub mod kind;
pub mod results;
pub mod service;

pub use connection::{GameConnection, GameConnectionState};
pub use error::{GameError, GameResolutionError};
pub use game::{Game, GameArgs, GameConnectionSlot, GameOptions, PlayerGameOptions, RemovalResult};
pub use kind::{GameKind, InitMode};
pub use results::{GameResultReport, GameResultReports, resolve_game};
pub use service::{
    CreateGameArgs, DirtyGameFlags, GameService, NullPublisher, ResultsPublisher,
};
