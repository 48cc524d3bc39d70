//! Galactic war service flows against real scenario files.

mod common;

use common::{TestServer, drain};
use galactic_wars_be::config::GalacticWarConfig;
use galactic_wars_be::galactic_war::{CapitalFilter, GalacticWarService};
use galactic_wars_be::models::{
    EndedGameInfo, EndedGamePlayerSummary, Faction, GameOutcome, OutcomeLikelihoods, PlayerId,
    RankedRating, Rating, TeamId, ValidityState,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

fn scenario_0() -> serde_json::Value {
    json!({
        "label": "scenario_0.json",
        "node": [
            {"id": 0, "label": "Empyrrean", "map": "[Core] Prime", "mod": "tavmod",
             "size": 100, "score": {"Arm": 100.0, "Core": 100.0},
             "capital_of": "Arm", "controlled_by": "Arm", "belligerents": {}},
            {"id": 1, "label": "Tempestus", "map": "[V] Sector 7", "mod": "tavmod",
             "size": 100, "score": {"Arm": 100.0, "Core": 100.0},
             "capital_of": "Core", "controlled_by": "Core", "belligerents": {}},
            {"id": 2, "label": "Gelidus", "map": "[Pro] Lava Run", "mod": "tavmod",
             "size": 100, "score": {"Arm": 100.0, "Core": 100.0},
             "controlled_by": "Arm", "belligerents": {}},
            {"id": 3, "label": "Rougpelt", "map": "[V] Akela", "mod": "tavmod",
             "size": 100, "score": {"Arm": 100.0, "Core": 100.0},
             "controlled_by": "Arm", "belligerents": {}},
            {"id": 4, "label": "Dump", "map": "[Pro] Comet Catcher", "mod": "tavmod",
             "size": 100, "score": {"Arm": 100.0, "Core": 100.0}, "belligerents": {}},
            {"id": 5, "label": "Barathrum", "map": "[V] Coral", "mod": "tavmod",
             "size": 100, "score": {"Arm": 100.0, "Core": 100.0},
             "controlled_by": "Core", "belligerents": {}},
            {"id": 6, "label": "Lusch", "map": "[V] Shore", "mod": "tavmod",
             "size": 100, "score": {"Arm": 100.0, "Core": 100.0},
             "controlled_by": "Core", "belligerents": {}},
            {"id": 7, "label": "Thalassean", "map": "[V] Crimson Bay", "mod": "taesc",
             "size": 100, "score": {"Arm": 100.0, "Core": 100.0}, "belligerents": {}}
        ],
        "edge": [
            {"source": 0, "target": 2},
            {"source": 0, "target": 3},
            {"source": 0, "target": 4},
            {"source": 2, "target": 7},
            {"source": 3, "target": 6},
            {"source": 4, "target": 5},
            {"source": 7, "target": 1},
            {"source": 1, "target": 5},
            {"source": 5, "target": 6},
            {"source": 6, "target": 7}
        ]
    })
}

fn scenario_1() -> serde_json::Value {
    json!({
        "label": "scenario_1.json",
        "node": (0..9).map(|id| json!({
            "id": id,
            "label": format!("planet{id}"),
            "map": "[V] Crimson Bay",
            "mod": "tavmod",
            "size": 100
        })).collect::<Vec<_>>(),
        "edge": [
            {"source": 0, "target": 1},
            {"source": 1, "target": 2},
            {"source": 2, "target": 3},
            {"source": 0, "target": 4},
            {"source": 4, "target": 5},
            {"source": 5, "target": 6},
            {"source": 6, "target": 7},
            {"source": 0, "target": 8}
        ]
    })
}

fn write_scenarios(dir: &Path) -> GalacticWarConfig {
    let scenarios = dir.join("scenarios");
    std::fs::create_dir_all(&scenarios).unwrap();
    std::fs::write(
        scenarios.join("scenario_0.json"),
        serde_json::to_string_pretty(&scenario_0()).unwrap(),
    )
    .unwrap();
    std::fs::write(
        scenarios.join("scenario_1.json"),
        serde_json::to_string_pretty(&scenario_1()).unwrap(),
    )
    .unwrap();

    GalacticWarConfig {
        state_file: dir.join("gw_state.json").to_string_lossy().to_string(),
        scenario_path: scenarios.to_string_lossy().to_string(),
        initial_scenario: "scenario_0.json".to_string(),
        ..GalacticWarConfig::default()
    }
}

async fn service_with(
    server: &TestServer,
    config: GalacticWarConfig,
) -> Arc<GalacticWarService> {
    let service = Arc::new(GalacticWarService::new(
        config,
        server.player_service.clone(),
        server.connections.clone(),
        server.queues.clone(),
    ));
    service.initialize().await.unwrap();
    service
}

fn thalassean_game() -> EndedGameInfo {
    EndedGameInfo {
        game_id: 1,
        rating_type: Some("ladder1v1".to_string()),
        map_id: Some(1),
        map_name: "[V] Crimson Bay".to_string(),
        game_mode: "taesc".to_string(),
        galactic_war_planet_name: Some("Thalassean".to_string()),
        mods: vec![],
        commander_kills: HashMap::new(),
        validity: ValidityState::Valid,
        player_summaries: vec![
            EndedGamePlayerSummary {
                player_id: 1,
                team_id: 1,
                faction: Faction::Core,
                outcome: GameOutcome::Victory,
            },
            EndedGamePlayerSummary {
                player_id: 2,
                team_id: 1,
                faction: Faction::Core,
                outcome: GameOutcome::Victory,
            },
            EndedGamePlayerSummary {
                player_id: 3,
                team_id: 2,
                faction: Faction::Arm,
                outcome: GameOutcome::Defeat,
            },
            EndedGamePlayerSummary {
                player_id: 4,
                team_id: 2,
                faction: Faction::Arm,
                outcome: GameOutcome::Defeat,
            },
        ],
    }
}

fn ratings() -> (HashMap<PlayerId, RankedRating>, HashMap<PlayerId, Rating>) {
    let old = (1..=4)
        .map(|pid| {
            (
                pid,
                RankedRating {
                    mean: 1000.0,
                    sigma: 10.0,
                    rank: pid as usize,
                    leaderboard_size: 100,
                },
            )
        })
        .collect();
    let new = (1..=4)
        .map(|pid| (pid, Rating::new(1000.0, 10.0)))
        .collect();
    (old, new)
}

fn likelihoods(pwin_team1: f64) -> HashMap<TeamId, OutcomeLikelihoods> {
    HashMap::from([
        (
            1,
            OutcomeLikelihoods {
                pwin: pwin_team1,
                pdraw: 0.0,
                plose: 1.0 - pwin_team1,
            },
        ),
        (
            2,
            OutcomeLikelihoods {
                pwin: 1.0 - pwin_team1,
                pdraw: 0.0,
                plose: pwin_team1,
            },
        ),
    ])
}

#[tokio::test]
async fn initial_scenario_loads_and_saves_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_scenarios(dir.path());
    let state_file = config.state_file.clone();

    let server = TestServer::start().await;
    let service = service_with(&server, config).await;

    assert!(service.get_dirty());
    assert!(std::path::Path::new(&state_file).exists());
    let label = service
        .with_state(|state| state.label().to_string())
        .await
        .unwrap();
    assert_eq!(label, "scenario_0.json");
}

#[tokio::test]
async fn upset_win_flips_the_planet_and_survives_a_reload() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_scenarios(dir.path());

    let server = TestServer::start().await;
    let service = service_with(&server, config.clone()).await;
    service.set_dirty(false);

    let (old, new) = ratings();
    service
        .on_game_rating(&thalassean_game(), &old, &new, &likelihoods(0.01))
        .await;

    assert!(service.get_dirty());
    let (thalassean, gelidus) = service
        .with_state(|state| {
            (
                state.planet_by_name("Thalassean").unwrap().controlled_by(),
                state.planet_by_name("Gelidus").unwrap().is_contested(),
            )
        })
        .await
        .unwrap();
    assert_eq!(thalassean, Some(Faction::Core));
    assert!(gelidus);

    // a fresh service picks the mutated state up from disk
    let reloaded = service_with(&server, config).await;
    let thalassean = reloaded
        .with_state(|state| state.planet_by_name("Thalassean").unwrap().controlled_by())
        .await
        .unwrap();
    assert_eq!(thalassean, Some(Faction::Core));
}

#[tokio::test]
async fn invalid_games_notify_the_players() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_scenarios(dir.path());

    let server = TestServer::start().await;
    let mut lobby_rx = server.sign_in(1, "one").await;
    for (pid, login) in [(2, "two"), (3, "three"), (4, "four")] {
        server.sign_in(pid, login).await;
    }
    let service = service_with(&server, config).await;

    // same faction on both teams is not a galactic war game
    let mut info = thalassean_game();
    for summary in &mut info.player_summaries {
        summary.faction = Faction::Core;
    }
    let (old, new) = ratings();
    service
        .on_game_rating(&info, &old, &new, &likelihoods(0.5))
        .await;

    let notices = drain(&mut lobby_rx);
    assert!(
        notices
            .iter()
            .any(|m| m["command"] == "notice"
                && m["text"]
                    .as_str()
                    .unwrap()
                    .contains("did not count towards Galactic War")),
        "expected a rejection notice, got {notices:?}"
    );

    // and the planet is untouched
    let contested = service
        .with_state(|state| state.planet_by_name("Thalassean").unwrap().is_contested())
        .await
        .unwrap();
    assert!(contested);
}

#[tokio::test]
async fn losing_both_capitals_rotates_to_the_next_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_scenarios(dir.path());

    let server = TestServer::start().await;
    let service = service_with(&server, config).await;

    service
        .with_state_mut(|state| {
            state
                .planet_by_name_mut("Empyrrean")
                .unwrap()
                .set_controlled_by(Some(Faction::Core));
            state
                .planet_by_name_mut("Dump")
                .unwrap()
                .set_controlled_by(Some(Faction::Core));
        })
        .await
        .unwrap();

    service.update_state().await;

    let (label, capitals, controlled) = service
        .with_state(|state| {
            (
                state.label().to_string(),
                state.capitals(CapitalFilter::all()).len(),
                state.uncontested_planets().len(),
            )
        })
        .await
        .unwrap();
    assert_eq!(label, "scenario_1.json");
    // the fresh scenario got capitals assigned and planets distributed
    assert_eq!(capitals, 2);
    assert!(controlled >= 2);
}

#[tokio::test]
async fn manual_capture_directive_flips_scores() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_scenarios(dir.path());

    let server = TestServer::start().await;
    let service = service_with(&server, config).await;

    service.manual_capture("Dump:core").await;
    let (core, arm) = service
        .with_state(|state| {
            let planet = state.planet_by_name("Dump").unwrap();
            (planet.score(Faction::Core), planet.score(Faction::Arm))
        })
        .await
        .unwrap();
    assert_eq!(core, 100.0);
    assert_eq!(arm, 0.0);
}
