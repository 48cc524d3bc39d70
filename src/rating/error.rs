use crate::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RatingError {
    /// The queue is not accepting input; the caller must retry later.
    #[error("RatingService not yet initialized or shutting down")]
    ServiceNotReady,

    /// The game could not be rated; the queue advances without persisting.
    #[error("Game rating error: {0}")]
    Rating(String),

    #[error(transparent)]
    App(#[from] AppError),
}
