pub mod error;
pub mod rater;
pub mod service;

pub use error::RatingError;
pub use rater::{GameRater, RaterConfig, likelihood_draw, likelihood_lose, likelihood_win};
pub use service::{RatingCallback, RatingService};
