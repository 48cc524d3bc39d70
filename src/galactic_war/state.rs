//! The planetary graph and every campaign rule that runs on it.

use crate::config::{GalacticWarConfig, StakeStrategy};
use crate::galactic_war::planet::{EdgeData, Planet, PlanetDefaults, ScenarioDoc};
use crate::models::{
    EndedGameInfo, Faction, GameOutcome, OutcomeLikelihoods, PlayerId, RankedRating, Rating,
    TeamId, rating_type,
};
use crate::rating::rater::norm_cdf;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{NodeIndex, UnGraph};
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Raised by `validate_game` when illegal game settings are found.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct InvalidGalacticWarGame(pub String);

#[derive(Debug, Clone, Copy)]
pub struct CapitalFilter {
    pub standing: bool,
    pub contested: bool,
    pub captured: bool,
}

impl CapitalFilter {
    pub fn all() -> Self {
        Self {
            standing: true,
            contested: true,
            captured: true,
        }
    }

    pub fn uncaptured() -> Self {
        Self {
            standing: true,
            contested: true,
            captured: false,
        }
    }
}

pub struct GalacticWarState {
    label: String,
    planets: BTreeMap<i32, Planet>,
    name_to_id: HashMap<String, i32>,
    edges: Vec<(i32, i32)>,
    adjacency: HashMap<i32, Vec<i32>>,
    capitals: HashMap<Faction, i32>,
    doc_extra: serde_json::Map<String, serde_json::Value>,
}

impl GalacticWarState {
    pub fn from_document(
        doc: ScenarioDoc,
        defaults: &PlanetDefaults,
    ) -> Result<Self, InvalidGalacticWarGame> {
        let mut planets = BTreeMap::new();
        let mut name_to_id = HashMap::new();
        for data in doc.node {
            let mut planet = Planet::from_data(data, defaults);
            // keep randomly assigned names collision free
            while name_to_id.contains_key(&planet.label) {
                planet.label = format!("{} {}", planet.label, planet.id);
            }
            name_to_id.insert(planet.label.clone(), planet.id);
            if planets.insert(planet.id, planet).is_some() {
                return Err(InvalidGalacticWarGame(
                    "scenario contains duplicate planet ids".to_string(),
                ));
            }
        }

        let mut adjacency: HashMap<i32, Vec<i32>> =
            planets.keys().map(|id| (*id, Vec::new())).collect();
        let mut edges = Vec::new();
        for EdgeData { source, target } in doc.edge {
            if !planets.contains_key(&source) || !planets.contains_key(&target) {
                return Err(InvalidGalacticWarGame(format!(
                    "jump gate {source}-{target} references an unknown planet"
                )));
            }
            adjacency.get_mut(&source).unwrap().push(target);
            adjacency.get_mut(&target).unwrap().push(source);
            edges.push((source, target));
        }

        let capitals = planets
            .values()
            .filter_map(|p| p.capital_of.map(|f| (f, p.id)))
            .collect();

        Ok(Self {
            label: doc.label,
            planets,
            name_to_id,
            edges,
            adjacency,
            capitals,
            doc_extra: doc.extra,
        })
    }

    pub fn to_document(&self) -> ScenarioDoc {
        ScenarioDoc {
            label: self.label.clone(),
            node: self.planets.values().map(|p| p.to_data()).collect(),
            edge: self
                .edges
                .iter()
                .map(|(source, target)| EdgeData {
                    source: *source,
                    target: *target,
                })
                .collect(),
            extra: self.doc_extra.clone(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    pub fn planet(&self, id: i32) -> Option<&Planet> {
        self.planets.get(&id)
    }

    pub fn planet_mut(&mut self, id: i32) -> Option<&mut Planet> {
        self.planets.get_mut(&id)
    }

    pub fn planet_by_name(&self, name: &str) -> Option<&Planet> {
        self.name_to_id.get(name).and_then(|id| self.planets.get(id))
    }

    pub fn planet_by_name_mut(&mut self, name: &str) -> Option<&mut Planet> {
        let id = self.name_to_id.get(name).copied()?;
        self.planets.get_mut(&id)
    }

    pub fn planet_count(&self) -> usize {
        self.planets.len()
    }

    pub fn neighbours(&self, id: i32) -> &[i32] {
        self.adjacency.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn capitals(&self, filter: CapitalFilter) -> Vec<i32> {
        self.capitals
            .iter()
            .filter(|(faction, id)| {
                let planet = &self.planets[*id];
                match planet.controlled_by() {
                    Some(owner) if owner == **faction => filter.standing,
                    Some(_) => filter.captured,
                    None => filter.contested,
                }
            })
            .map(|(_, id)| *id)
            .collect()
    }

    /// Controlled (uncontested) planets.
    pub fn uncontested_planets(&self) -> Vec<i32> {
        self.planets
            .values()
            .filter(|p| !p.is_contested())
            .map(|p| p.id)
            .collect()
    }

    // Game validation.

    pub fn validate_game(
        &self,
        game_info: &EndedGameInfo,
        check_game_mod: bool,
    ) -> Result<(), InvalidGalacticWarGame> {
        let planet_name = game_info
            .galactic_war_planet_name
            .as_deref()
            .ok_or_else(|| InvalidGalacticWarGame("game has no planet".to_string()))?;
        let planet = self.planet_by_name(planet_name).ok_or_else(|| {
            InvalidGalacticWarGame(format!(
                "'{planet_name}' is not part of the current Galactic War scenario"
            ))
        })?;

        if planet.map != game_info.map_name {
            return Err(InvalidGalacticWarGame(format!(
                "'{}' should be played on map '{}', not '{}'",
                planet.label, planet.map, game_info.map_name
            )));
        }
        if check_game_mod && planet.mod_name != game_info.game_mode {
            return Err(InvalidGalacticWarGame(format!(
                "'{}' should be played with mod '{}', not '{}'",
                planet.label, planet.mod_name, game_info.game_mode
            )));
        }

        let mut factions_by_team: HashMap<TeamId, Faction> = HashMap::new();
        for summary in &game_info.player_summaries {
            match factions_by_team.get(&summary.team_id) {
                Some(faction) if *faction != summary.faction => {
                    return Err(InvalidGalacticWarGame(
                        "Galactic War should be played one faction versus another".to_string(),
                    ));
                }
                _ => {
                    factions_by_team.insert(summary.team_id, summary.faction);
                }
            }
        }
        if factions_by_team.len() != 2 {
            return Err(InvalidGalacticWarGame(
                "Galactic War should be played with exactly two teams".to_string(),
            ));
        }
        let team_factions: Vec<Faction> = factions_by_team.values().copied().collect();
        if team_factions[0] == team_factions[1] {
            return Err(InvalidGalacticWarGame(
                "Galactic War should be played with opposing factions".to_string(),
            ));
        }

        match game_info.rating_type.as_deref() {
            None => {
                return Err(InvalidGalacticWarGame(
                    "Galactic War games must be rated".to_string(),
                ));
            }
            Some(rt) if rt == rating_type::GLOBAL => {
                return Err(InvalidGalacticWarGame(
                    "Galactic War games must use a ladder rating".to_string(),
                ));
            }
            Some(_) => {}
        }
        if !game_info.validity.is_valid() {
            return Err(InvalidGalacticWarGame(format!(
                "game validity is {:?}",
                game_info.validity
            )));
        }
        if !planet.is_contested() {
            return Err(InvalidGalacticWarGame(format!(
                "'{}' is already controlled",
                planet.label
            )));
        }

        let neighbour_factions: HashSet<Faction> = self
            .neighbours(planet.id)
            .iter()
            .filter_map(|id| self.planets[id].controlled_by())
            .collect();
        for faction in team_factions {
            let owns_capital_here = planet.capital_of == Some(faction);
            if !neighbour_factions.contains(&faction) && !owns_capital_here {
                return Err(InvalidGalacticWarGame(format!(
                    "{} does not have connectivity to planet '{}'",
                    faction, planet.label
                )));
            }
        }
        Ok(())
    }

    // Score accounting.

    /// Applies a rated game to the planet's faction scores and the
    /// per-player belligerent ledger.
    pub fn update_scores(
        &mut self,
        game_info: &EndedGameInfo,
        old_ratings: &HashMap<PlayerId, RankedRating>,
        _new_ratings: &HashMap<PlayerId, Rating>,
        likelihoods: &HashMap<TeamId, OutcomeLikelihoods>,
        config: &GalacticWarConfig,
    ) {
        let Some(planet_name) = game_info.galactic_war_planet_name.clone() else {
            return;
        };
        let stakes = self.price_stakes(game_info, old_ratings, likelihoods, config);

        let reported = game_info.player_summaries.len();
        let team_size = (reported / 2).max(1);
        let total_lost: f64 = game_info
            .player_summaries
            .iter()
            .map(|s| match s.outcome {
                GameOutcome::Defeat => stakes.get(&s.player_id).copied().unwrap_or(0.0),
                GameOutcome::Draw | GameOutcome::MutualDraw => {
                    stakes.get(&s.player_id).copied().unwrap_or(0.0) / 2.0
                }
                _ => 0.0,
            })
            .sum();
        let winnings_per_winner = total_lost / team_size as f64;

        let Some(planet) = self.planet_by_name_mut(&planet_name) else {
            return;
        };
        for summary in &game_info.player_summaries {
            let stake = stakes.get(&summary.player_id).copied().unwrap_or(0.0);
            let settled = match summary.outcome {
                GameOutcome::Victory => 0.0,
                GameOutcome::Draw | GameOutcome::MutualDraw => -stake / 2.0,
                _ => -stake,
            };
            let attributed = if summary.outcome == GameOutcome::Victory {
                winnings_per_winner
            } else {
                settled
            };

            let planet_delta = if config.winner_takes_the_pot {
                attributed
            } else {
                settled
            };
            let score = planet.score(summary.faction) + planet_delta;
            planet.set_score(summary.faction, score);
            planet.adjust_belligerent(summary.player_id, summary.faction, attributed);
        }

        // planet scores never go negative; re-baseline the whole planet
        let min = planet
            .scores()
            .values()
            .copied()
            .fold(f64::INFINITY, f64::min);
        if min < 0.0 {
            let factions: Vec<Faction> = planet.scores().keys().copied().collect();
            for faction in factions {
                let score = planet.score(faction) - min;
                planet.set_score(faction, score);
            }
        }
    }

    fn price_stakes(
        &self,
        game_info: &EndedGameInfo,
        old_ratings: &HashMap<PlayerId, RankedRating>,
        likelihoods: &HashMap<TeamId, OutcomeLikelihoods>,
        config: &GalacticWarConfig,
    ) -> HashMap<PlayerId, f64> {
        match config.stake_strategy {
            StakeStrategy::Rating => game_info
                .player_summaries
                .iter()
                .map(|s| {
                    let pwin = likelihoods
                        .get(&s.team_id)
                        .map(|l| l.pwin)
                        .unwrap_or(0.5);
                    (s.player_id, pwin * config.max_score)
                })
                .collect(),
            StakeStrategy::Rank => self.price_stakes_by_rank(game_info, old_ratings, config),
        }
    }

    /// Experimental pairwise stake pricing from leaderboard ranks.
    fn price_stakes_by_rank(
        &self,
        game_info: &EndedGameInfo,
        old_ratings: &HashMap<PlayerId, RankedRating>,
        config: &GalacticWarConfig,
    ) -> HashMap<PlayerId, f64> {
        let team_ids = game_info.team_ids();
        let mut stakes: HashMap<PlayerId, f64> = HashMap::new();
        if team_ids.len() != 2 {
            return stakes;
        }
        let team_players = |team_id: TeamId| -> Vec<PlayerId> {
            game_info
                .player_summaries
                .iter()
                .filter(|s| s.team_id == team_id)
                .map(|s| s.player_id)
                .collect()
        };
        let (team_a, team_b) = (team_players(team_ids[0]), team_players(team_ids[1]));

        for (own_team, other_team) in [(&team_a, &team_b), (&team_b, &team_a)] {
            let max_per_opponent = config.max_score / other_team.len().max(1) as f64;
            for own in own_team {
                let mut stake = 0.0;
                for opponent in other_team {
                    let (Some(own_rating), Some(opp_rating)) =
                        (old_ratings.get(own), old_ratings.get(opponent))
                    else {
                        stake += max_per_opponent / 2.0;
                        continue;
                    };
                    let small_board = own_rating.leaderboard_size < 10
                        || opp_rating.leaderboard_size < 10;
                    let too_close =
                        (own_rating.penis_points() - opp_rating.penis_points()).abs() < 1.0;
                    if small_board || too_close {
                        stake += max_per_opponent / 2.0;
                    } else {
                        let board = own_rating.leaderboard_size.max(1) as f64;
                        let rank_diff =
                            (opp_rating.rank as f64 - own_rating.rank as f64) / board;
                        stake += max_per_opponent * norm_cdf(rank_diff / config.rank_factor);
                    }
                }
                stakes.insert(*own, stake);
            }
        }
        stakes
    }

    // Front lines and captures.

    /// Contested planets with a dominant faction get captured; their
    /// differing neighbours are contested and reset. Returns mutations.
    pub fn update_front_lines(&mut self, required_dominance_ratio: f64) -> usize {
        let mut contested: Vec<i32> = self
            .planets
            .values()
            .filter(|p| p.is_contested())
            .map(|p| p.id)
            .collect();
        contested.sort_by(|a, b| {
            self.planets[b]
                .max_score()
                .partial_cmp(&self.planets[a].max_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut changes = 0;
        for id in contested {
            let Some(dominant) = self.planets[&id].dominant_faction(required_dominance_ratio)
            else {
                continue;
            };
            // planets processed earlier may have taken this one already
            if !self.planets[&id].is_contested() {
                continue;
            }
            self.planets
                .get_mut(&id)
                .unwrap()
                .set_controlled_by(Some(dominant));
            changes += 1;
            for neighbour_id in self.neighbours(id).to_vec() {
                let neighbour = self.planets.get_mut(&neighbour_id).unwrap();
                let differing_dominance = neighbour
                    .dominant_faction(required_dominance_ratio)
                    .map(|f| f != dominant)
                    .unwrap_or(false);
                let differing_control = neighbour
                    .controlled_by()
                    .map(|f| f != dominant)
                    .unwrap_or(false);
                if differing_dominance || differing_control {
                    neighbour.set_controlled_by(None);
                    neighbour.reset_scores();
                    changes += 1;
                }
            }
        }
        changes
    }

    /// Contested non-capitals whose controlled neighbours all belong to a
    /// single faction fall to that faction.
    pub fn capture_uncontested_planets(&mut self) -> usize {
        let mut changes = 0;
        let ids: Vec<i32> = self.planets.keys().copied().collect();
        for id in ids {
            let planet = &self.planets[&id];
            if !planet.is_contested() || planet.capital_of.is_some() {
                continue;
            }
            let neighbour_factions: HashSet<Faction> = self
                .neighbours(id)
                .iter()
                .filter_map(|n| self.planets[n].controlled_by())
                .collect();
            if neighbour_factions.len() == 1 {
                let faction = *neighbour_factions.iter().next().unwrap();
                self.planets
                    .get_mut(&id)
                    .unwrap()
                    .set_controlled_by(Some(faction));
                changes += 1;
            }
        }
        changes
    }

    /// Planets cut off from their faction's capital flip to the enemy.
    /// Only meaningful in two-capital scenarios.
    pub fn capture_isolated_planets(&mut self) -> usize {
        let mut planets_by_faction: HashMap<Faction, Vec<i32>> = HashMap::new();
        for planet in self.planets.values() {
            if let Some(faction) = planet.controlled_by() {
                planets_by_faction.entry(faction).or_default().push(planet.id);
            }
        }
        if planets_by_faction.len() != 2 {
            // too hard to decide who should get the isolated planets
            return 0;
        }
        if self.capitals.len() != 2 {
            return 0;
        }

        let mut changes = 0;
        for (faction, capital_id) in self.capitals.clone() {
            let Some(other_faction) = self
                .capitals
                .keys()
                .copied()
                .find(|f| *f != faction)
            else {
                continue;
            };
            let owned: Vec<i32> = planets_by_faction
                .get(&faction)
                .cloned()
                .unwrap_or_default();
            if owned.is_empty() {
                continue;
            }
            let owned_set: HashSet<i32> = owned.iter().copied().collect();
            let capital_held = owned_set.contains(&capital_id);

            let (graph, indices) = self.induced_subgraph(&owned_set);
            for id in owned {
                if id == capital_id {
                    continue;
                }
                let connected = capital_held
                    && has_path_connecting(
                        &graph,
                        indices[&capital_id],
                        indices[&id],
                        None,
                    );
                if !connected {
                    self.planets
                        .get_mut(&id)
                        .unwrap()
                        .set_controlled_by(Some(other_faction));
                    changes += 1;
                }
            }
        }
        changes
    }

    fn induced_subgraph(
        &self,
        ids: &HashSet<i32>,
    ) -> (UnGraph<i32, ()>, HashMap<i32, NodeIndex>) {
        let mut graph = UnGraph::new_undirected();
        let mut indices = HashMap::new();
        for id in ids {
            indices.insert(*id, graph.add_node(*id));
        }
        for (source, target) in &self.edges {
            if ids.contains(source) && ids.contains(target) {
                graph.add_edge(indices[source], indices[target], ());
            }
        }
        (graph, indices)
    }

    fn bfs_distances(&self, start: i32) -> HashMap<i32, usize> {
        let mut distances = HashMap::from([(start, 0usize)]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let next_distance = distances[&current] + 1;
            for neighbour in self.neighbours(current) {
                if !distances.contains_key(neighbour) {
                    distances.insert(*neighbour, next_distance);
                    queue.push_back(*neighbour);
                }
            }
        }
        distances
    }

    // Scenario initialization.

    /// Places the two capitals at the endpoints of the graph's diameter.
    pub fn assign_two_capitals(&mut self) {
        let ids: Vec<i32> = self.planets.keys().copied().collect();
        let mut best: Option<(i32, i32, usize)> = None;
        for id in &ids {
            let distances = self.bfs_distances(*id);
            for (other, distance) in distances {
                if best.map(|(_, _, d)| distance > d).unwrap_or(true) {
                    best = Some((*id, other, distance));
                }
            }
        }
        let Some((arm_capital, core_capital, _)) = best else {
            return;
        };
        for (capital_id, faction) in [(arm_capital, Faction::Arm), (core_capital, Faction::Core)] {
            let planet = self.planets.get_mut(&capital_id).unwrap();
            planet.capital_of = Some(faction);
            planet.set_controlled_by(Some(faction));
            self.capitals.insert(faction, capital_id);
        }
    }

    /// Hands every planet to the faction whose capital is closer by jump
    /// count. Equidistant planets stay contested.
    pub fn distribute_planets_to_factions(&mut self) {
        if self.capitals.len() != 2 {
            return;
        }
        let assignments: Vec<(Faction, HashMap<i32, usize>)> = self
            .capitals
            .iter()
            .map(|(faction, capital)| (*faction, self.bfs_distances(*capital)))
            .collect();
        let ids: Vec<i32> = self.planets.keys().copied().collect();
        for id in ids {
            if self.planets[&id].capital_of.is_some() {
                continue;
            }
            let (first_faction, first_distances) = &assignments[0];
            let (second_faction, second_distances) = &assignments[1];
            let first = first_distances.get(&id).copied();
            let second = second_distances.get(&id).copied();
            let owner = match (first, second) {
                (Some(a), Some(b)) if a < b => Some(*first_faction),
                (Some(a), Some(b)) if b < a => Some(*second_faction),
                (Some(_), None) => Some(*first_faction),
                (None, Some(_)) => Some(*second_faction),
                _ => None,
            };
            self.planets.get_mut(&id).unwrap().set_controlled_by(owner);
        }
    }

    /// Breaks direct contact between opposing factions by contesting one
    /// side of every mixed jump gate.
    pub fn separate_abutting_factions(&mut self) -> usize {
        let mut changes = 0;
        for (source, target) in self.edges.clone() {
            let source_faction = self.planets[&source].controlled_by();
            let target_faction = self.planets[&target].controlled_by();
            let (Some(a), Some(b)) = (source_faction, target_faction) else {
                continue;
            };
            if a == b {
                continue;
            }
            let flip = if self.planets[&target].capital_of.is_none() {
                Some(target)
            } else if self.planets[&source].capital_of.is_none() {
                Some(source)
            } else {
                None
            };
            if let Some(id) = flip {
                let planet = self.planets.get_mut(&id).unwrap();
                planet.set_controlled_by(None);
                planet.reset_scores();
                changes += 1;
            }
        }
        changes
    }

    /// Reassigns factions' planets after a manual-capture directive:
    /// zeroes every faction's score except the captured faction's.
    pub fn apply_manual_capture(&mut self, planet_name: &str, faction: Faction) -> bool {
        let Some(planet) = self.planet_by_name_mut(planet_name) else {
            return false;
        };
        let factions: Vec<Faction> = planet.scores().keys().copied().collect();
        for f in factions {
            planet.set_score(f, if f == faction { 100.0 } else { 0.0 });
        }
        true
    }

    /// Rewrites planets whose map is outside every 1v1 queue's rating-1500
    /// pool to a pooled map (and that queue's mod).
    pub fn ensure_ranked_maps(
        &mut self,
        queues: &HashMap<String, crate::models::MatchmakerQueue>,
    ) -> usize {
        let mut pooled: Vec<(String, String)> = Vec::new();
        for queue in queues.values() {
            if queue.team_size != 1 {
                continue;
            }
            if let Some(pool) = queue.map_pool_for_rating(1500.0) {
                for map in &pool.maps {
                    pooled.push((map.name.clone(), queue.featured_mod.clone()));
                }
            }
        }
        if pooled.is_empty() {
            return 0;
        }
        let pooled_names: HashSet<&String> = pooled.iter().map(|(name, _)| name).collect();

        let mut changes = 0;
        let ids: Vec<i32> = self.planets.keys().copied().collect();
        for id in ids {
            if pooled_names.contains(&self.planets[&id].map) {
                continue;
            }
            let pick = &pooled[rand::rng().random_range(0..pooled.len())];
            let planet = self.planets.get_mut(&id).unwrap();
            planet.map = pick.0.clone();
            planet.mod_name = pick.1.clone();
            changes += 1;
        }
        changes
    }
}
