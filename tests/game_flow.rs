//! Full host/join/play/report flows over in-process game connections.

mod common;

use common::{TestServer, commands, drain, report_state, send};
use galactic_wars_be::models::{GameLifecycle, ValidityState};
use galactic_wars_be::players::PlayerState;
use serde_json::json;

async fn play_to_live(
    server: &TestServer,
) -> (
    i32,
    galactic_wars_be::games::GameConnection,
    galactic_wars_be::games::GameConnection,
    tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>,
    tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>,
) {
    let _host_lobby = server.sign_in(1, "Transcend").await;
    let _joiner_lobby = server.sign_in(2, "Rogue").await;

    let game_id = server.host_custom_game(1, "Transcend").await;
    let (mut host, mut host_rx) = server
        .open_game_connection(game_id, 1, PlayerState::Hosting)
        .await;
    let (mut joiner, mut joiner_rx) = server
        .open_game_connection(game_id, 2, PlayerState::Joining)
        .await;

    // host arrives idle, then reaches the staging lobby
    send(&mut host, "GameState", vec![json!("Idle")]).await;
    send(
        &mut host,
        "GameOption",
        vec![json!("MapDetails"), json!("SHERWOOD\u{1f}total2.hpi\u{1f}cafe")],
    )
    .await;
    report_state(&mut host, "Lobby", "Staging").await;
    assert!(commands(&drain(&mut host_rx)).contains(&"HostGame".to_string()));
    {
        let game = server.game_service.get(game_id).await.unwrap();
        let game = game.lock().await;
        assert!(*game.subscribe_hosted_staging().borrow());
    }

    // joiner wires up to the host
    report_state(&mut joiner, "Lobby", "Staging").await;
    let joiner_messages = drain(&mut joiner_rx);
    assert!(commands(&joiner_messages).contains(&"JoinGame".to_string()));
    assert!(commands(&drain(&mut host_rx)).contains(&"ConnectToPeer".to_string()));

    // seat both players
    for (pid, team, army) in [(1, 2, 0), (2, 3, 1)] {
        for (key, value) in [
            ("Team", team),
            ("Army", army),
            ("StartSpot", army),
            ("Color", army),
            ("Faction", 0),
        ] {
            send(
                &mut host,
                "PlayerOption",
                vec![json!(pid), json!(key), json!(value)],
            )
            .await;
        }
    }

    report_state(&mut host, "Lobby", "Battleroom").await;
    report_state(&mut joiner, "Lobby", "Battleroom").await;
    report_state(&mut host, "Launching", "Launching").await;
    report_state(&mut host, "Launching", "Live").await;

    let game = server.game_service.get(game_id).await.unwrap();
    assert_eq!(game.lock().await.state, GameLifecycle::Live);

    // skip the too-short downgrade; this game is seconds old
    send(&mut host, "EnforceRating", vec![]).await;

    (game_id, host, joiner, host_rx, joiner_rx)
}

#[tokio::test]
async fn two_player_game_rates_and_persists() {
    let server = TestServer::start().await;
    let (game_id, mut host, mut joiner, _host_rx, _joiner_rx) = play_to_live(&server).await;

    // the launch wrote one stats row per seated player
    assert_eq!(server.store.game_player_stats_rows().len(), 2);

    for connection in [&mut host, &mut joiner] {
        send(connection, "GameResult", vec![json!(0), json!("victory 100")]).await;
        send(connection, "GameResult", vec![json!(1), json!("defeat 0")]).await;
    }
    send(&mut host, "GameEnded", vec![]).await;
    {
        let game = server.game_service.get(game_id).await.unwrap();
        assert_eq!(game.lock().await.state, GameLifecycle::Live);
    }
    send(&mut joiner, "GameEnded", vec![]).await;

    let game = server.game_service.get(game_id).await.unwrap();
    {
        let game = game.lock().await;
        assert_eq!(game.state, GameLifecycle::Ended);
        assert_eq!(game.validity, ValidityState::Valid);
    }
    assert!(server.store.game_marked_ended(game_id));

    // scores were persisted per player
    let scores = server.store.score_rows();
    assert_eq!(scores.len(), 2);
    assert!(scores.iter().any(|s| s.player_id == 1 && s.score == 100));
    assert!(scores.iter().any(|s| s.player_id == 2 && s.score == 0));

    // drain the rating queue and check the fan-out
    server.rating_service.shutdown().await;
    assert_eq!(server.store.journal_rows().len(), 2);
    let winner = server.store.leaderboard_rating(1, 1).unwrap();
    let loser = server.store.leaderboard_rating(2, 1).unwrap();
    assert!(winner.mean > 1500.0);
    assert!(loser.mean < 1500.0);

    let host_player = server.player_service.get_player(1).await.unwrap();
    assert!(host_player.lock().await.ratings.get("global").mean > 1500.0);
}

#[tokio::test]
async fn mutual_draw_is_not_rated() {
    let server = TestServer::start().await;
    let (game_id, mut host, mut joiner, _host_rx, _joiner_rx) = play_to_live(&server).await;

    for connection in [&mut host, &mut joiner] {
        send(connection, "GameResult", vec![json!(0), json!("draw 0")]).await;
        send(connection, "GameResult", vec![json!(1), json!("draw 0")]).await;
    }
    send(&mut host, "GameEnded", vec![]).await;
    send(&mut joiner, "GameEnded", vec![]).await;

    let game = server.game_service.get(game_id).await.unwrap();
    {
        let game = game.lock().await;
        assert_eq!(game.state, GameLifecycle::Ended);
        assert_eq!(game.validity, ValidityState::MutualDraw);
    }

    server.rating_service.shutdown().await;
    assert!(server.store.journal_rows().is_empty());
    // rating cache untouched
    let host_player = server.player_service.get_player(1).await.unwrap();
    assert_eq!(host_player.lock().await.ratings.get("global").mean, 1500.0);
}

#[tokio::test]
async fn host_leaving_the_lobby_ends_the_game() {
    let server = TestServer::start().await;
    let _host_lobby = server.sign_in(1, "Transcend").await;
    let _joiner_lobby = server.sign_in(2, "Rogue").await;

    let game_id = server.host_custom_game(1, "Transcend").await;
    let (mut host, _host_rx) = server
        .open_game_connection(game_id, 1, PlayerState::Hosting)
        .await;
    let (mut joiner, mut joiner_rx) = server
        .open_game_connection(game_id, 2, PlayerState::Joining)
        .await;

    send(&mut host, "GameState", vec![json!("Idle")]).await;
    report_state(&mut host, "Lobby", "Staging").await;
    report_state(&mut joiner, "Lobby", "Staging").await;
    drain(&mut joiner_rx);

    host.abort("host quit").await;

    let game = server.game_service.get(game_id).await.unwrap();
    assert_eq!(game.lock().await.state, GameLifecycle::Ended);
    // the joiner was told to drop the host link
    assert!(commands(&drain(&mut joiner_rx)).contains(&"DisconnectFromPeer".to_string()));

    // aborting again is a no-op
    host.abort("again").await;
    assert_eq!(game.lock().await.state, GameLifecycle::Ended);
}

#[tokio::test]
async fn full_game_refuses_additional_joiners() {
    let server = TestServer::start().await;
    let _host_lobby = server.sign_in(1, "Transcend").await;
    let _joiner_lobby = server.sign_in(2, "Rogue").await;
    let mut third_lobby = server.sign_in(3, "Latecomer").await;

    let game_id = server.host_custom_game(1, "Transcend").await;
    {
        let game = server.game_service.get(game_id).await.unwrap();
        game.lock().await.max_players = 2;
    }
    let (mut host, _host_rx) = server
        .open_game_connection(game_id, 1, PlayerState::Hosting)
        .await;
    let (mut joiner, _joiner_rx) = server
        .open_game_connection(game_id, 2, PlayerState::Joining)
        .await;
    let (mut third, _third_rx) = server
        .open_game_connection(game_id, 3, PlayerState::Joining)
        .await;

    send(&mut host, "GameState", vec![json!("Idle")]).await;
    report_state(&mut host, "Lobby", "Staging").await;
    report_state(&mut joiner, "Lobby", "Staging").await;
    report_state(&mut third, "Lobby", "Staging").await;

    // the third player got a join-failure notice on the lobby connection
    let notices = drain(&mut third_lobby);
    assert!(
        notices
            .iter()
            .any(|m| m["command"] == "notice" && m["style"] == "game_join_fail"),
        "expected a game_join_fail notice, got {notices:?}"
    );

    let game = server.game_service.get(game_id).await.unwrap();
    assert_eq!(game.lock().await.connection_count(), 2);
}

#[tokio::test]
async fn ice_messages_route_to_the_peer() {
    let server = TestServer::start().await;
    let _host_lobby = server.sign_in(1, "Transcend").await;
    let _joiner_lobby = server.sign_in(2, "Rogue").await;

    let game_id = server.host_custom_game(1, "Transcend").await;
    let (mut host, _host_rx) = server
        .open_game_connection(game_id, 1, PlayerState::Hosting)
        .await;
    let (mut joiner, mut joiner_rx) = server
        .open_game_connection(game_id, 2, PlayerState::Joining)
        .await;

    send(&mut host, "GameState", vec![json!("Idle")]).await;
    report_state(&mut host, "Lobby", "Staging").await;
    report_state(&mut joiner, "Lobby", "Staging").await;
    drain(&mut joiner_rx);

    send(
        &mut host,
        "IceMsg",
        vec![json!(2), json!({"candidate": "relay"})],
    )
    .await;
    let messages = drain(&mut joiner_rx);
    let ice = messages
        .iter()
        .find(|m| m["command"] == "IceMsg")
        .expect("joiner should receive the ICE message");
    assert_eq!(ice["args"][0], 1);
    assert_eq!(ice["target"], "game");

    // unknown receivers are dropped quietly
    send(&mut host, "IceMsg", vec![json!(99), json!("blob")]).await;
}
