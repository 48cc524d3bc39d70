// Galactic Wars lobby backend

pub mod broadcast;
pub mod config;
pub mod db;
pub mod errors;
pub mod galactic_war;
pub mod games;
pub mod models;
pub mod players;
pub mod protocol;
pub mod rating;
pub mod server;
pub mod tada;

pub use config::{GalacticWarConfig, ServerConfig, StakeStrategy};
pub use errors::AppError;
pub use server::{ServerInstance, start_server};
