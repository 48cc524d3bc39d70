use thiserror::Error;

/// Infrastructure-level failures shared across services.
///
/// Domain errors (game rules, rating queue state, galactic war validation)
/// live next to the code that raises them; this enum only carries the
/// plumbing failures every service can hit.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
