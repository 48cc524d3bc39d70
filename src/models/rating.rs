use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Leaderboard technical names consumed as rating types.
pub mod rating_type {
    pub const GLOBAL: &str = "global";
    pub const LADDER_1V1: &str = "ladder1v1";
}

/// A skill estimate: mean and standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub mean: f64,
    pub sigma: f64,
}

impl Rating {
    pub fn new(mean: f64, sigma: f64) -> Self {
        Self { mean, sigma }
    }

    /// The conservative estimate that orders the leaderboard.
    pub fn penis_points(&self) -> f64 {
        self.mean - 3.0 * self.sigma
    }
}

/// A rating together with its position on the leaderboard it came from.
/// `rank` is 0 at the top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedRating {
    pub mean: f64,
    pub sigma: f64,
    pub rank: usize,
    pub leaderboard_size: usize,
}

impl RankedRating {
    pub fn rating(&self) -> Rating {
        Rating::new(self.mean, self.sigma)
    }

    pub fn penis_points(&self) -> f64 {
        self.rating().penis_points()
    }
}

/// An inclusive numeric range where either endpoint may be open.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InclusiveRange {
    pub lo: Option<f64>,
    pub hi: Option<f64>,
}

impl InclusiveRange {
    pub fn new(lo: Option<f64>, hi: Option<f64>) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, value: f64) -> bool {
        if let Some(lo) = self.lo {
            if value < lo {
                return false;
            }
        }
        if let Some(hi) = self.hi {
            if value > hi {
                return false;
            }
        }
        true
    }
}

/// Per-player rating cache keyed by rating type, falling back to the
/// configured starting rating for types not seen yet.
#[derive(Debug, Clone)]
pub struct PlayerRatings {
    default: (f64, f64),
    ratings: HashMap<String, (f64, f64)>,
}

impl PlayerRatings {
    pub fn new(default_mean: f64, default_dev: f64) -> Self {
        Self {
            default: (default_mean, default_dev),
            ratings: HashMap::new(),
        }
    }

    pub fn get(&self, rating_type: &str) -> Rating {
        let (mean, sigma) = self
            .ratings
            .get(rating_type)
            .copied()
            .unwrap_or(self.default);
        Rating::new(mean, sigma)
    }

    pub fn set(&mut self, rating_type: &str, rating: Rating) {
        self.ratings
            .insert(rating_type.to_string(), (rating.mean, rating.sigma));
    }

    pub fn known_types(&self) -> impl Iterator<Item = &String> {
        self.ratings.keys()
    }
}
