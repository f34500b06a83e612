//! Typed mutation API over the raw store.
//!
//! Every successful mutation is two writes: the state write, then the
//! refresh-marker write that drives [`RoomStore::watch_room`]. The pair is
//! not transactional; a crash in between leaves subscribers unaware of the
//! persisted change until the next mutation lands.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::kv::{Key, Kv, KvError};

/// Display name for a participant we have never seen a name for.
pub const PLACEHOLDER_NAME: &str = "🤡";

/// How long a participant survives without a heartbeat.
pub const DEFAULT_PARTICIPANT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room not found: {0}")]
    NotFound(String),

    #[error("record encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] KvError),
}

/// Stored room record. The id is the key, not part of the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub name: String,
    pub vote_system: String,
    pub show_results: bool,
}

/// Stored participant record, keyed by (room id, participant id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<String>,
}

impl Default for ParticipantRecord {
    fn default() -> Self {
        Self {
            name: PLACEHOLDER_NAME.to_string(),
            vote: None,
        }
    }
}

/// One participant as exposed in a [`Snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<String>,
}

/// Full room view, assembled on demand from the room record and the live
/// participant set. Never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub vote_system: String,
    pub show_results: bool,
    pub users: Vec<Participant>,
}

/// Change feed for one room: infinite and non-restartable. `changed()`
/// suspends until the next marker bump, with no timeout. Dropping the watch
/// releases the subscription.
pub struct RoomWatch(watch::Receiver<u64>);

impl RoomWatch {
    /// Wait for the next marker bump. Returns false only if the store side
    /// of the feed has gone away.
    pub async fn changed(&mut self) -> bool {
        self.0.changed().await.is_ok()
    }
}

fn room_key(room_id: &str) -> Key {
    vec!["room".into(), room_id.into()]
}

fn marker_key(room_id: &str) -> Key {
    vec!["room".into(), room_id.into(), "refresh".into()]
}

fn participant_prefix(room_id: &str) -> Key {
    vec!["room".into(), room_id.into(), "user".into()]
}

fn participant_key(room_id: &str, participant_id: &str) -> Key {
    vec![
        "room".into(),
        room_id.into(),
        "user".into(),
        participant_id.into(),
    ]
}

/// Room and participant mutations over a shared [`Kv`] backend.
///
/// Read-modify-write sequences here are not atomic across the two calls:
/// two concurrent mutations of the same record race and the later write
/// wins. Accepted, see the crate docs.
#[derive(Clone)]
pub struct RoomStore {
    kv: Arc<dyn Kv>,
    participant_ttl: Duration,
}

impl RoomStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self {
            kv,
            participant_ttl: DEFAULT_PARTICIPANT_TTL,
        }
    }

    pub fn with_participant_ttl(mut self, ttl: Duration) -> Self {
        self.participant_ttl = ttl;
        self
    }

    /// Bump the room's refresh marker. The stored value is an opaque
    /// timestamp; subscribers only care that it changed.
    async fn bump_marker(&self, room_id: &str) -> Result<(), StoreError> {
        let stamp = Value::String(chrono::Utc::now().to_rfc3339());
        self.kv.set(&marker_key(room_id), stamp, None).await?;
        Ok(())
    }

    async fn load_room(&self, room_id: &str) -> Result<RoomRecord, StoreError> {
        let value = self
            .kv
            .get(&room_key(room_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))?;
        serde_json::from_value(value).map_err(|_| StoreError::NotFound(room_id.to_string()))
    }

    /// Create a room with a fresh id and `showResults` off.
    pub async fn create_room(&self, name: &str, vote_system: &str) -> Result<String, StoreError> {
        let room_id = uuid::Uuid::new_v4().to_string();
        let record = RoomRecord {
            name: name.to_string(),
            vote_system: vote_system.to_string(),
            show_results: false,
        };
        self.kv
            .set(&room_key(&room_id), serde_json::to_value(&record)?, None)
            .await?;
        self.bump_marker(&room_id).await?;
        Ok(room_id)
    }

    /// Pure existence check, no side effects.
    pub async fn room_exists(&self, room_id: &str) -> Result<bool, StoreError> {
        Ok(self.kv.get(&room_key(room_id)).await?.is_some())
    }

    /// Read, transform, write the room record.
    ///
    /// Not compare-and-swap: a concurrent update that reads before this
    /// write lands is silently overwritten, last writer wins.
    pub async fn update_room<F>(&self, room_id: &str, transform: F) -> Result<(), StoreError>
    where
        F: FnOnce(RoomRecord) -> RoomRecord,
    {
        let room = self.load_room(room_id).await?;
        let updated = transform(room);
        self.kv
            .set(&room_key(room_id), serde_json::to_value(&updated)?, None)
            .await?;
        self.bump_marker(room_id).await
    }

    /// Read (or start from the placeholder), transform, write the
    /// participant record with its TTL window re-armed. First state-changing
    /// message from a connection creates the participant implicitly.
    pub async fn sync_participant<F>(
        &self,
        room_id: &str,
        participant_id: &str,
        transform: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(ParticipantRecord) -> ParticipantRecord,
    {
        let key = participant_key(room_id, participant_id);
        // A record that no longer parses is replaced, not surfaced.
        let current = match self.kv.get(&key).await? {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => ParticipantRecord::default(),
        };
        let updated = transform(current);
        self.kv
            .set(
                &key,
                serde_json::to_value(&updated)?,
                Some(self.participant_ttl),
            )
            .await?;
        self.bump_marker(room_id).await
    }

    /// Presence refresh: rewrite a live record unchanged with the TTL window
    /// re-armed. Returns false if the participant is gone, without
    /// recreating it — that is the signal for a stale session.
    pub async fn ping_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<bool, StoreError> {
        let key = participant_key(room_id, participant_id);
        let Some(value) = self.kv.get(&key).await? else {
            return Ok(false);
        };
        self.kv.set(&key, value, Some(self.participant_ttl)).await?;
        self.bump_marker(room_id).await?;
        Ok(true)
    }

    /// Delete the participant. Removing an absent participant is not an
    /// error; the marker is bumped either way so departure is observed
    /// promptly rather than waiting for TTL expiry.
    pub async fn remove_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<(), StoreError> {
        self.kv
            .delete(&participant_key(room_id, participant_id))
            .await?;
        self.bump_marker(room_id).await
    }

    /// Clear `vote` on every participant in the room, re-arming each TTL
    /// window, then bump the marker once. Unparsable records are skipped.
    pub async fn reset_all_votes(&self, room_id: &str) -> Result<(), StoreError> {
        let entries = self.kv.list(&participant_prefix(room_id)).await?;
        for (key, value) in entries {
            let Ok(mut record) = serde_json::from_value::<ParticipantRecord>(value) else {
                tracing::debug!(?key, "Skipping unparsable participant record");
                continue;
            };
            record.vote = None;
            self.kv
                .set(
                    &key,
                    serde_json::to_value(&record)?,
                    Some(self.participant_ttl),
                )
                .await?;
        }
        self.bump_marker(room_id).await
    }

    /// Assemble the full room view. Fails with [`StoreError::NotFound`] if
    /// the room record is absent or unparsable; unparsable participants are
    /// invisible, not errors.
    pub async fn get_snapshot(&self, room_id: &str) -> Result<Snapshot, StoreError> {
        let room = self.load_room(room_id).await?;

        let mut users = Vec::new();
        for (key, value) in self.kv.list(&participant_prefix(room_id)).await? {
            let Ok(record) = serde_json::from_value::<ParticipantRecord>(value) else {
                tracing::debug!(?key, "Skipping unparsable participant record");
                continue;
            };
            let Some(id) = key.last() else { continue };
            users.push(Participant {
                id: id.clone(),
                name: record.name,
                vote: record.vote,
            });
        }
        // Stable wire ordering regardless of backend iteration order.
        users.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(Snapshot {
            id: room_id.to_string(),
            name: room.name,
            vote_system: room.vote_system,
            show_results: room.show_results,
            users,
        })
    }

    /// Subscribe to the room's refresh marker.
    pub async fn watch_room(&self, room_id: &str) -> RoomWatch {
        RoomWatch(self.kv.watch(&marker_key(room_id)).await)
    }
}
