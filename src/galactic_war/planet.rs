//! Planets and the scenario document they are stored in.

use crate::models::{Faction, PlayerId};
use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

static PLANET_NOUNS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Aduro", "Aestus", "Ardens", "Avius", "Caelum", "Calidus", "Cinis", "Clamor",
        "Crepusculum", "Culmen", "Dominus", "Ferrum", "Fulmen", "Gelu", "Glacies", "Ignis",
        "Imber", "Limen", "Litus", "Lumen", "Mons", "Nimbus", "Nix", "Nox", "Obscurum",
        "Pelagus", "Pruina", "Pulvis", "Rupes", "Saxum", "Sidus", "Silex", "Sol", "Tellus",
        "Tempestas", "Tenebrae", "Turris", "Umbra", "Vallum", "Vortex",
    ]
});

fn random_planet_name() -> String {
    let mut rng = rand::rng();
    PLANET_NOUNS[rng.random_range(0..PLANET_NOUNS.len())].to_string()
}

/// Picks a mod from a weighted `mod:weight;mod:weight` spec.
fn random_mod(spec: &str) -> String {
    let entries: Vec<(String, u32)> = spec
        .split(';')
        .filter_map(|entry| {
            let mut parts = entry.split(':');
            let name = parts.next()?.trim();
            let weight: u32 = parts.next()?.trim().parse().ok()?;
            (!name.is_empty()).then(|| (name.to_string(), weight))
        })
        .collect();
    let total: u32 = entries.iter().map(|(_, w)| w).sum();
    if total == 0 {
        return "tacc".to_string();
    }
    let mut pick = rand::rng().random_range(0..total);
    for (name, weight) in entries {
        if pick < weight {
            return name;
        }
        pick -= weight;
    }
    "tacc".to_string()
}

fn is_number(s: &str) -> bool {
    s.parse::<f64>().is_ok()
}

/// On-disk planet record. Unknown fields survive a load/save round trip.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlanetData {
    pub id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    #[serde(rename = "mod", skip_serializing_if = "Option::is_none")]
    pub mod_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<HashMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capital_of: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlled_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub belligerents: Option<HashMap<String, HashMap<String, f64>>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeData {
    pub source: i32,
    pub target: i32,
}

/// The scenario document: `{label, node: [...], edge: [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScenarioDoc {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub node: Vec<PlanetData>,
    #[serde(default)]
    pub edge: Vec<EdgeData>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Defaults applied to planets with missing fields.
#[derive(Debug, Clone)]
pub struct PlanetDefaults {
    pub size: u32,
    pub mod_spec: String,
}

#[derive(Debug, Clone)]
pub struct Planet {
    pub id: i32,
    pub label: String,
    pub map: String,
    pub mod_name: String,
    pub size: u32,
    scores: HashMap<Faction, f64>,
    pub capital_of: Option<Faction>,
    controlled_by: Option<Faction>,
    belligerents: HashMap<PlayerId, HashMap<Faction, f64>>,
    extra: serde_json::Map<String, Value>,
}

impl Planet {
    pub fn from_data(data: PlanetData, defaults: &PlanetDefaults) -> Self {
        // empty or purely numeric labels get renamed
        let label = data
            .label
            .filter(|l| !l.is_empty() && !is_number(l))
            .unwrap_or_else(random_planet_name);
        let size = data.size.unwrap_or(defaults.size);
        let scores = match data.score {
            Some(scores) => scores
                .into_iter()
                .filter_map(|(name, score)| name.parse::<Faction>().ok().map(|f| (f, score)))
                .collect(),
            None => HashMap::from([
                (Faction::Arm, size as f64),
                (Faction::Core, size as f64),
            ]),
        };
        let belligerents = data
            .belligerents
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(pid, scores)| {
                let pid: PlayerId = pid.parse().ok()?;
                let scores = scores
                    .into_iter()
                    .filter_map(|(name, score)| {
                        name.parse::<Faction>().ok().map(|f| (f, score))
                    })
                    .collect();
                Some((pid, scores))
            })
            .collect();
        Self {
            id: data.id,
            label,
            map: data.map.unwrap_or_else(|| "SHERWOOD".to_string()),
            mod_name: data
                .mod_name
                .unwrap_or_else(|| random_mod(&defaults.mod_spec)),
            size,
            scores,
            capital_of: data.capital_of.and_then(|f| f.parse().ok()),
            controlled_by: data.controlled_by.and_then(|f| f.parse().ok()),
            belligerents,
            extra: data.extra,
        }
    }

    pub fn to_data(&self) -> PlanetData {
        PlanetData {
            id: self.id,
            label: Some(self.label.clone()),
            map: Some(self.map.clone()),
            mod_name: Some(self.mod_name.clone()),
            size: Some(self.size),
            score: Some(
                self.scores
                    .iter()
                    .map(|(f, s)| (f.capitalized().to_string(), *s))
                    .collect(),
            ),
            capital_of: self.capital_of.map(|f| f.capitalized().to_string()),
            controlled_by: self.controlled_by.map(|f| f.capitalized().to_string()),
            belligerents: Some(
                self.belligerents
                    .iter()
                    .map(|(pid, scores)| {
                        (
                            pid.to_string(),
                            scores
                                .iter()
                                .map(|(f, s)| (f.capitalized().to_string(), *s))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
            extra: self.extra.clone(),
        }
    }

    pub fn controlled_by(&self) -> Option<Faction> {
        self.controlled_by
    }

    pub fn set_controlled_by(&mut self, faction: Option<Faction>) {
        self.controlled_by = faction;
    }

    pub fn is_contested(&self) -> bool {
        self.controlled_by.is_none()
    }

    pub fn score(&self, faction: Faction) -> f64 {
        self.scores
            .get(&faction)
            .copied()
            .unwrap_or(self.size as f64)
    }

    pub fn scores(&self) -> &HashMap<Faction, f64> {
        &self.scores
    }

    pub fn set_score(&mut self, faction: Faction, value: f64) {
        self.scores.insert(faction, value);
    }

    pub fn reset_scores(&mut self) {
        let factions: Vec<Faction> = self.scores.keys().copied().collect();
        for faction in factions {
            self.set_score(faction, self.size as f64);
        }
    }

    pub fn max_score(&self) -> f64 {
        self.scores.values().copied().fold(0.0, f64::max)
    }

    /// The faction whose score exceeds the minimum by the required ratio.
    pub fn dominant_faction(&self, required_dominance_ratio: f64) -> Option<Faction> {
        if self.scores.is_empty() {
            return None;
        }
        let min = self.scores.values().copied().fold(f64::INFINITY, f64::min);
        let (max_faction, max_score) = self
            .scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        (*max_score > required_dominance_ratio * min).then_some(*max_faction)
    }

    pub fn belligerent_score(&self, player_id: PlayerId, faction: Faction) -> f64 {
        self.belligerents
            .get(&player_id)
            .and_then(|scores| scores.get(&faction))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn adjust_belligerent(&mut self, player_id: PlayerId, faction: Faction, change: f64) {
        let entry = self
            .belligerents
            .entry(player_id)
            .or_default()
            .entry(faction)
            .or_insert(0.0);
        *entry += change;
    }
}
