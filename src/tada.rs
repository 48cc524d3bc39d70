//! Dirty set for externally-uploaded replays.
//!
//! The upload pipeline itself lives outside this crate; the broadcaster
//! only needs to announce freshly indexed replays to lobby clients.

use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct TadaPlayer {
    pub name: String,
    pub side: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TadaGameInfo {
    /// The upload service's identifier for the replay.
    pub party: String,
    pub map_name: String,
    /// Date string as delivered by the upload service; format varies.
    pub date: String,
    pub players: Vec<TadaPlayer>,
}

#[derive(Default)]
pub struct TadaService {
    dirty_uploads: Mutex<Vec<(i64, TadaGameInfo)>>,
}

impl TadaService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_dirty(&self, taf_replay_id: i64, info: TadaGameInfo) {
        self.dirty_uploads.lock().await.push((taf_replay_id, info));
    }

    pub async fn take_dirty(&self) -> Vec<(i64, TadaGameInfo)> {
        std::mem::take(&mut *self.dirty_uploads.lock().await)
    }
}
