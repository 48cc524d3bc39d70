//! Canonical wire message shapes for the game-session surface.
//!
//! Framing and authentication happen a layer below this crate; what arrives
//! here is an already-decoded JSON envelope per command.

pub mod connections;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;

pub use connections::{ClientConnection, ConnectionId, ConnectionRegistry};

#[derive(Error, Debug, Clone)]
#[error("Peer has disconnected")]
pub struct DisconnectedError;

/// A decoded game-command envelope: `{"command": ..., "args": [...]}`.
///
/// Args stay loosely typed on purpose: malformed arguments are a
/// protocol-level error handled by logging and dropping the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameClientMessage {
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl GameClientMessage {
    pub fn new(command: &str, args: Vec<Value>) -> Self {
        Self {
            command: command.to_string(),
            args,
        }
    }

    pub fn str_arg(&self, index: usize) -> Option<String> {
        self.args.get(index).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn int_arg(&self, index: usize) -> Option<i64> {
        self.args.get(index).and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

/// Builds a message destined for a game client. These always carry
/// `target: "game"` so the framing layer can route them.
pub fn game_message(command: &str, args: Vec<Value>) -> Value {
    json!({
        "command": command,
        "args": args,
        "target": "game",
    })
}

pub fn host_game(map_name: &str) -> Value {
    game_message("HostGame", vec![json!(map_name)])
}

pub fn join_game(remote_player_name: &str, remote_player_uid: i32) -> Value {
    game_message(
        "JoinGame",
        vec![json!(remote_player_name), json!(remote_player_uid)],
    )
}

pub fn connect_to_peer(player_name: &str, player_uid: i32, offer: bool) -> Value {
    game_message(
        "ConnectToPeer",
        vec![json!(player_name), json!(player_uid), json!(offer)],
    )
}

pub fn disconnect_from_peer(player_uid: i32) -> Value {
    game_message("DisconnectFromPeer", vec![json!(player_uid)])
}

pub fn notice(style: &str, text: &str) -> Value {
    json!({
        "command": "notice",
        "style": style,
        "text": text,
    })
}

/// Outbound half of a single game client's connection.
#[async_trait]
pub trait GameProtocol: Send + Sync {
    async fn send_message(&self, message: Value) -> Result<(), DisconnectedError>;
}

/// A `GameProtocol` over an in-process channel. The production framing
/// layer drains the receiver onto the socket; tests read it directly.
pub struct ChannelProtocol {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelProtocol {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl GameProtocol for ChannelProtocol {
    async fn send_message(&self, message: Value) -> Result<(), DisconnectedError> {
        self.tx.send(message).map_err(|_| DisconnectedError)
    }
}
