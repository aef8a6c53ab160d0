use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tictactoe_core::MatchId;
use tictactoe_core::protocol::{LeaderboardEntry, PlayerProfile};
use tictactoe_server::config::{MatchConfig, ServerConfig};
use tictactoe_server::state::AppState;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

/// Spin up a test server on a random port, return the base URL.
async fn start_server() -> (String, Arc<AppState>) {
    start_server_with(MatchConfig {
        grace_period: Duration::from_secs(30),
        move_budget: Duration::from_secs(30),
        rematch_window: Duration::from_secs(30),
    })
    .await
}

async fn start_server_with(matches: MatchConfig) -> (String, Arc<AppState>) {
    // In-memory SQLite so tests don't clash.
    let config = ServerConfig {
        database_url: "sqlite::memory:".to_string(),
        matches,
        ..ServerConfig::default()
    };
    let (app, state) = tictactoe_server::build_app(config).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{}", port), state)
}

/// Connect a WebSocket client as `user_id`, return the split stream.
async fn ws_connect(base: &str, user_id: &str, name: &str) -> (WsSink, WsSource) {
    let ws_url = base.replace("http://", "ws://");
    let url = format!("{}/ws?userId={}&name={}", ws_url, user_id, name);
    let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    stream.split()
}

/// Send a JSON message over the WebSocket.
async fn ws_send(sink: &mut WsSink, msg: serde_json::Value) {
    sink.send(Message::Text(msg.to_string().into()))
        .await
        .unwrap();
}

/// Receive messages until we get one matching the expected type.
async fn ws_recv_type(stream: &mut WsSource, msg_type: &str) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline - tokio::time::Instant::now();
        if remaining.is_zero() {
            panic!("Timed out waiting for message type: {}", msg_type);
        }
        let msg = tokio::time::timeout(remaining, stream.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {}", msg_type))
            .unwrap()
            .unwrap();

        if let Message::Text(text) = msg {
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            if parsed["type"].as_str() == Some(msg_type) {
                return parsed;
            }
        }
    }
}

/// Message types received up to and including the first `msg_type`.
async fn ws_types_until(stream: &mut WsSource, msg_type: &str) -> Vec<String> {
    let mut seen = Vec::new();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), stream.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {}", msg_type))
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            let kind = parsed["type"].as_str().unwrap().to_string();
            let done = kind == msg_type;
            seen.push(kind);
            if done {
                return seen;
            }
        }
    }
}

fn marks(state: &serde_json::Value) -> usize {
    state["board"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| !c.as_str().unwrap().is_empty())
        .count()
}

struct Pair {
    alice: (WsSink, WsSource),
    bob: (WsSink, WsSource),
    match_id: String,
}

/// Pair alice (X) and bob (O) in a classic match and drain the opening state.
async fn paired(base: &str) -> Pair {
    let (mut a_sink, mut a_stream) = ws_connect(base, "alice", "Alice").await;
    let (mut b_sink, mut b_stream) = ws_connect(base, "bob", "Bob").await;

    ws_send(&mut a_sink, json!({"type": "find_match", "mode": "classic"})).await;
    let waiting = ws_recv_type(&mut a_stream, "waiting_for_opponent").await;
    assert_eq!(waiting["mode"], "classic");

    ws_send(&mut b_sink, json!({"type": "find_match", "mode": "classic"})).await;
    let a_joined = ws_recv_type(&mut a_stream, "match_joined").await;
    let b_joined = ws_recv_type(&mut b_stream, "match_joined").await;
    assert_eq!(a_joined["matchId"], b_joined["matchId"]);
    assert_eq!(a_joined["yourMark"], "X");
    assert_eq!(b_joined["yourMark"], "O");
    assert_eq!(a_joined["opponentName"], "Bob");
    assert_eq!(b_joined["opponentName"], "Alice");

    let opening = ws_recv_type(&mut a_stream, "game_state").await;
    assert_eq!(opening["state"], "in_progress");
    assert_eq!(opening["turn"], "X");
    ws_recv_type(&mut b_stream, "game_state").await;

    Pair {
        alice: (a_sink, a_stream),
        bob: (b_sink, b_stream),
        match_id: a_joined["matchId"].as_str().unwrap().to_string(),
    }
}

async fn play_move(sink: &mut WsSink, match_id: &str, position: usize, seq: u64) {
    ws_send(
        sink,
        json!({"type": "move", "matchId": match_id, "position": position, "moveSeq": seq}),
    )
    .await;
}

/// Alice takes the top row; bob answers on the middle row.
async fn alice_wins(p: &mut Pair) {
    let id = p.match_id.clone();
    for (seq, (a, b)) in [(0, 3), (1, 4)].into_iter().enumerate() {
        play_move(&mut p.alice.0, &id, a, seq as u64 + 1).await;
        ws_recv_type(&mut p.alice.1, "game_state").await;
        ws_recv_type(&mut p.bob.1, "game_state").await;
        play_move(&mut p.bob.0, &id, b, seq as u64 + 1).await;
        ws_recv_type(&mut p.alice.1, "game_state").await;
        ws_recv_type(&mut p.bob.1, "game_state").await;
    }
    play_move(&mut p.alice.0, &id, 2, 3).await;
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let (base, _) = start_server().await;
    let resp = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(resp, "ok");
}

#[tokio::test]
async fn test_ping_pong() {
    let (base, _) = start_server().await;
    let (mut sink, mut stream) = ws_connect(&base, "solo", "Solo").await;
    ws_send(&mut sink, json!({"type": "ping"})).await;
    ws_recv_type(&mut stream, "pong").await;
}

#[tokio::test]
async fn test_find_match_pairs_two_players() {
    let (base, state) = start_server().await;
    let p = paired(&base).await;
    assert!(state.matches.contains_key(&MatchId::from(p.match_id.as_str())));
}

#[tokio::test]
async fn test_move_is_broadcast_to_both() {
    let (base, _) = start_server().await;
    let mut p = paired(&base).await;

    play_move(&mut p.alice.0, &p.match_id, 4, 1).await;
    let a_state = ws_recv_type(&mut p.alice.1, "game_state").await;
    let b_state = ws_recv_type(&mut p.bob.1, "game_state").await;
    assert_eq!(a_state, b_state);
    assert_eq!(a_state["board"][4], "X");
    assert_eq!(a_state["turn"], "O");
}

#[tokio::test]
async fn test_out_of_turn_move_is_rejected() {
    let (base, _) = start_server().await;
    let mut p = paired(&base).await;

    play_move(&mut p.bob.0, &p.match_id, 0, 1).await;
    let err = ws_recv_type(&mut p.bob.1, "error").await;
    assert_eq!(err["code"], "not_your_turn");

    play_move(&mut p.alice.0, &p.match_id, 9, 1).await;
    let err = ws_recv_type(&mut p.alice.1, "error").await;
    assert_eq!(err["code"], "out_of_range");
}

#[tokio::test]
async fn test_duplicate_move_seq_is_not_reapplied() {
    let (base, _) = start_server().await;
    let mut p = paired(&base).await;

    play_move(&mut p.alice.0, &p.match_id, 0, 1).await;
    let first = ws_recv_type(&mut p.alice.1, "game_state").await;
    play_move(&mut p.alice.0, &p.match_id, 0, 1).await;
    let replay = ws_recv_type(&mut p.alice.1, "game_state").await;

    assert_eq!(first, replay);
    assert_eq!(marks(&replay), 1);
    assert_eq!(replay["turn"], "O");
}

#[tokio::test]
async fn test_unknown_and_malformed_requests() {
    let (base, _) = start_server().await;
    let (mut sink, mut stream) = ws_connect(&base, "solo", "Solo").await;

    play_move(&mut sink, "nope", 0, 1).await;
    let err = ws_recv_type(&mut stream, "error").await;
    assert_eq!(err["code"], "unknown_match");

    sink.send(Message::Text("{not json".into())).await.unwrap();
    let err = ws_recv_type(&mut stream, "error").await;
    assert_eq!(err["code"], "malformed_message");
}

#[tokio::test]
async fn test_win_updates_ratings_once() {
    let (base, _) = start_server().await;
    let mut p = paired(&base).await;
    alice_wins(&mut p).await;

    let a_update = ws_recv_type(&mut p.alice.1, "rating_update").await;
    assert_eq!(a_update["rating"], 1010);
    assert_eq!(a_update["delta"], 10);
    let b_update = ws_recv_type(&mut p.bob.1, "rating_update").await;
    assert_eq!(b_update["rating"], 995);

    let finished = ws_recv_type(&mut p.alice.1, "game_state").await;
    assert_eq!(finished["state"], "finished");
    assert_eq!(finished["outcome"]["kind"], "win");
    assert_eq!(finished["outcome"]["winner"], "X");
    assert_eq!(finished["outcome"]["line"], json!([0, 1, 2]));

    // Late moves on a finished match change nothing.
    play_move(&mut p.bob.0, &p.match_id, 8, 3).await;
    let err = ws_recv_type(&mut p.bob.1, "error").await;
    assert_eq!(err["code"], "not_in_progress");

    let board: Vec<LeaderboardEntry> = reqwest::get(format!("{}/leaderboard?limit=10", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].user_id, "alice");
    assert_eq!(board[0].rating, 1010);
    assert_eq!(board[1].rating, 995);

    let bob: PlayerProfile = reqwest::get(format!("{}/profile/bob", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bob.losses, 1);
    assert_eq!(bob.display_name, "Bob");
}

#[tokio::test]
async fn test_rematch_creates_successor_with_swapped_marks() {
    let (base, state) = start_server().await;
    let mut p = paired(&base).await;
    alice_wins(&mut p).await;
    ws_recv_type(&mut p.alice.1, "game_state").await;

    ws_send(
        &mut p.alice.0,
        json!({"type": "request_rematch", "matchId": p.match_id}),
    )
    .await;
    let req = ws_recv_type(&mut p.bob.1, "rematch_request").await;
    assert_eq!(req["playerId"], "alice");

    ws_send(
        &mut p.bob.0,
        json!({"type": "request_rematch", "matchId": p.match_id}),
    )
    .await;
    let ready = ws_recv_type(&mut p.alice.1, "rematch_ready").await;
    let successor = ready["newMatchId"].as_str().unwrap().to_string();
    assert_ne!(successor, p.match_id);

    let joined = ws_recv_type(&mut p.alice.1, "match_joined").await;
    assert_eq!(joined["matchId"], successor.as_str());
    assert_eq!(joined["yourMark"], "O");
    let joined = ws_recv_type(&mut p.bob.1, "match_joined").await;
    assert_eq!(joined["yourMark"], "X");

    // The old match is gone; a late vote cannot reach it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!state.matches.contains_key(&MatchId::from(p.match_id.as_str())));
    ws_send(
        &mut p.alice.0,
        json!({"type": "request_rematch", "matchId": p.match_id}),
    )
    .await;
    let err = ws_recv_type(&mut p.alice.1, "error").await;
    assert_eq!(err["code"], "unknown_match");
}

#[tokio::test]
async fn test_practice_bot_replies_immediately() {
    let (base, _) = start_server().await;
    let (mut sink, mut stream) = ws_connect(&base, "solo", "Solo").await;

    ws_send(&mut sink, json!({"type": "find_match", "mode": "practice"})).await;
    let joined = ws_recv_type(&mut stream, "match_joined").await;
    assert_eq!(joined["opponentName"], "Practice Bot");
    assert_eq!(joined["mode"], "practice");
    let id = joined["matchId"].as_str().unwrap().to_string();
    ws_recv_type(&mut stream, "game_state").await;

    play_move(&mut sink, &id, 4, 1).await;
    let state = ws_recv_type(&mut stream, "game_state").await;
    assert_eq!(marks(&state), 2);
    assert_eq!(state["turn"], "X");
}

#[tokio::test]
async fn test_disconnect_pauses_and_reconnect_resumes() {
    let (base, _) = start_server().await;
    let p = paired(&base).await;
    let (mut a_sink, mut a_stream) = p.alice;
    let (mut b_sink, b_stream) = p.bob;

    b_sink.close().await.unwrap();
    drop(b_stream);
    ws_recv_type(&mut a_stream, "opponent_disconnected").await;

    play_move(&mut a_sink, &p.match_id, 0, 1).await;
    let err = ws_recv_type(&mut a_stream, "error").await;
    assert_eq!(err["code"], "match_paused");

    let (_b_sink, mut b_stream) = ws_connect(&base, "bob", "Bob").await;
    ws_recv_type(&mut a_stream, "player_reconnected").await;
    let joined = ws_recv_type(&mut b_stream, "match_joined").await;
    assert_eq!(joined["matchId"], p.match_id.as_str());
    let resync = ws_recv_type(&mut b_stream, "game_state").await;
    assert_eq!(resync["state"], "in_progress");

    // A rejected seq is not consumed, so the same seq goes through now.
    play_move(&mut a_sink, &p.match_id, 0, 1).await;
    let moved = ws_recv_type(&mut b_stream, "game_state").await;
    assert_eq!(moved["board"][0], "X");
}

#[tokio::test]
async fn test_requeue_then_disconnect_still_forfeits_earlier_match() {
    let (base, state) = start_server_with(MatchConfig {
        grace_period: Duration::from_secs(1),
        move_budget: Duration::from_secs(30),
        rematch_window: Duration::from_secs(30),
    })
    .await;
    let p = paired(&base).await;
    let (mut a_sink, mut a_stream) = p.alice;
    let (_b_sink, mut b_stream) = p.bob;

    // Alice wanders off into practice while the classic match still runs.
    ws_send(&mut a_sink, json!({"type": "find_match", "mode": "practice"})).await;
    let joined = ws_recv_type(&mut a_stream, "match_joined").await;
    assert_eq!(joined["mode"], "practice");
    let practice_id = MatchId::from(joined["matchId"].as_str().unwrap());

    a_sink.close().await.unwrap();
    drop(a_stream);

    ws_recv_type(&mut b_stream, "opponent_disconnected").await;
    let update = ws_recv_type(&mut b_stream, "rating_update").await;
    assert_eq!(update["rating"], 1010);
    let finished = ws_recv_type(&mut b_stream, "game_state").await;
    assert_eq!(finished["matchId"], p.match_id.as_str());
    assert_eq!(finished["state"], "finished");
    assert_eq!(
        finished["outcome"],
        json!({"kind": "abandoned", "forfeitBy": "X", "reason": "disconnected"})
    );
    assert!(state.matches.contains_key(&practice_id));
}

#[tokio::test]
async fn test_replaced_socket_closing_does_not_disconnect_its_successor() {
    let (base, _) = start_server().await;
    let p = paired(&base).await;
    let (mut old_sink, old_stream) = p.alice;
    let (_b_sink, mut b_stream) = p.bob;

    let (mut a_sink, mut a_stream) = ws_connect(&base, "alice", "Alice").await;
    let joined = ws_recv_type(&mut a_stream, "match_joined").await;
    assert_eq!(joined["matchId"], p.match_id.as_str());
    assert_eq!(joined["yourMark"], "X");
    ws_recv_type(&mut a_stream, "game_state").await;

    old_sink.close().await.unwrap();
    drop(old_stream);
    tokio::time::sleep(Duration::from_millis(100)).await;

    play_move(&mut a_sink, &p.match_id, 4, 1).await;
    let moved = ws_recv_type(&mut a_stream, "game_state").await;
    assert_eq!(moved["board"][4], "X");

    let seen = ws_types_until(&mut b_stream, "game_state").await;
    assert!(!seen.iter().any(|t| t == "opponent_disconnected"), "{seen:?}");
    assert!(!seen.iter().any(|t| t == "player_reconnected"), "{seen:?}");
}
