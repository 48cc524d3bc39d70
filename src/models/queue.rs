use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A playable map as known to the matchmaker.
#[derive(Debug, Clone, PartialEq)]
pub struct MapVersion {
    pub id: i32,
    pub name: String,
    pub file_path: String,
    pub ranked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapPool {
    pub id: i32,
    pub name: String,
    pub maps: Vec<MapVersion>,
}

impl MapPool {
    pub fn map_ids(&self) -> HashSet<i32> {
        self.maps.iter().map(|m| m.id).collect()
    }

    pub fn map_names(&self) -> HashSet<String> {
        self.maps.iter().map(|m| m.name.clone()).collect()
    }
}

/// A matchmaker queue consumed as data: the backbone only reads its
/// featured mod, team size, rating type and rating-banded map pools.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchmakerQueue {
    pub id: i32,
    pub name: String,
    pub featured_mod: String,
    pub rating_type: String,
    pub team_size: usize,
    /// Pools with the rating band they apply to; `None` bounds are open.
    pub map_pools: Vec<(MapPool, Option<f64>, Option<f64>)>,
}

impl MatchmakerQueue {
    pub fn map_pool_for_rating(&self, rating: f64) -> Option<&MapPool> {
        self.map_pools
            .iter()
            .find(|(_, lo, hi)| {
                lo.map(|lo| rating >= lo).unwrap_or(true)
                    && hi.map(|hi| rating <= hi).unwrap_or(true)
            })
            .map(|(pool, _, _)| pool)
    }

    pub fn to_message_entry(&self) -> serde_json::Value {
        json!({
            "queue_name": self.name,
            "technical_name": self.name,
            "featured_mod": self.featured_mod,
            "rating_type": self.rating_type,
            "team_size": self.team_size,
        })
    }
}

/// Shared handle to the queue catalog. Populated by the matchmaking layer,
/// read by rating-type assignment and galactic war initialization.
pub type QueueMap = Arc<Mutex<HashMap<String, MatchmakerQueue>>>;

pub fn new_queue_map() -> QueueMap {
    Arc::new(Mutex::new(HashMap::new()))
}
