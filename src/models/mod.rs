pub mod faction;
pub mod game;
pub mod queue;
pub mod rating;

pub use faction::{FACTIONS, Faction};
pub use game::{
    EndedGameInfo, EndedGamePlayerSummary, FFA_TEAM, FeaturedMod, GameId, GameLifecycle,
    GameOutcome, GameType, OBSERVER_TEAM, OutcomeLikelihoods, PlayerId, TeamId, ValidityState,
    Victory, VisibilityState, featured_mod,
};
pub use queue::{MapPool, MapVersion, MatchmakerQueue, QueueMap, new_queue_map};
pub use rating::{InclusiveRange, PlayerRatings, RankedRating, Rating, rating_type};
