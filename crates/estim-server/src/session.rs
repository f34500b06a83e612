//! Per-connection session: one task, one select loop, two concerns — the
//! client's inbound frames and the room's change feed. Neither side may
//! block the other; both stop once the socket is observed closed, and
//! dropping the room watch releases the change-feed subscription.

use std::borrow::Cow;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use estim_store::{RoomStore, StoreError};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};

use crate::presence::Throttle;
use crate::protocol::{ClientAction, SnapshotFrame};

/// Close code for a session whose participant record expired while the
/// socket stayed open. Clients treat it as "reconnect and re-join fresh".
pub const STALE_SESSION_CODE: u16 = 4404;

/// Drive one WebSocket connection until it closes, then remove its
/// participant. The participant id is fresh per connection; reconnecting
/// yields a new identity, never a resumed one.
pub async fn run(
    socket: WebSocket,
    store: RoomStore,
    room_id: String,
    keepalive_window: Duration,
) {
    let participant_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();

    // The subscription starts with one pending event, so a fresh connection
    // receives the current room state immediately.
    let mut changes = store.watch_room(&room_id).await;
    let mut keepalive = Throttle::new(keepalive_window);

    tracing::info!(room = %room_id, participant = %participant_id, "Session opened");

    loop {
        tokio::select! {
            alive = changes.changed() => {
                if !alive || !push_snapshot(&mut sink, &store, &room_id, &participant_id).await {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" {
                            if !handle_ping(&mut sink, &mut keepalive, &store, &room_id, &participant_id).await {
                                break;
                            }
                        } else {
                            dispatch(&store, &room_id, &participant_id, &text).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(room = %room_id, participant = %participant_id, error = %e, "WS error");
                        break;
                    }
                    // Protocol-level ping/pong is answered by the transport.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // Explicit departure: other subscribers observe it promptly instead of
    // waiting out the TTL.
    if let Err(e) = store.remove_participant(&room_id, &participant_id).await {
        tracing::warn!(room = %room_id, participant = %participant_id, error = %e, "Departure cleanup failed");
    }

    tracing::info!(room = %room_id, participant = %participant_id, "Session closed");
}

/// Fetch and push the full room state tagged with our own participant id.
/// Returns false once the socket is gone; a failed snapshot read is logged
/// and the push skipped.
async fn push_snapshot(
    sink: &mut SplitSink<WebSocket, Message>,
    store: &RoomStore,
    room_id: &str,
    participant_id: &str,
) -> bool {
    let snapshot = match store.get_snapshot(room_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(room = %room_id, error = %e, "Snapshot fetch failed");
            return true;
        }
    };

    let frame = SnapshotFrame {
        room: snapshot,
        user_id: participant_id.to_string(),
    };
    match serde_json::to_string(&frame) {
        Ok(json) => sink.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            tracing::error!(room = %room_id, error = %e, "Snapshot encode failed");
            true
        }
    }
}

/// Reply to a heartbeat and, at most once per throttle window, extend the
/// participant's TTL. A refresh that finds the record gone force-closes the
/// socket with [`STALE_SESSION_CODE`] so the client re-joins fresh.
async fn handle_ping(
    sink: &mut SplitSink<WebSocket, Message>,
    keepalive: &mut Throttle,
    store: &RoomStore,
    room_id: &str,
    participant_id: &str,
) -> bool {
    if sink.send(Message::Text("pong".to_string())).await.is_err() {
        return false;
    }
    if !keepalive.ready() {
        return true;
    }

    match store.ping_participant(room_id, participant_id).await {
        Ok(true) => true,
        Ok(false) => {
            tracing::warn!(room = %room_id, participant = %participant_id, "Participant expired under an open socket");
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: STALE_SESSION_CODE,
                    reason: Cow::from("We lost user btw"),
                })))
                .await;
            false
        }
        Err(e) => {
            tracing::warn!(room = %room_id, participant = %participant_id, error = %e, "Presence refresh failed");
            true
        }
    }
}

/// Parse and apply one structured action. Bad payloads are dropped and the
/// connection stays open.
async fn dispatch(store: &RoomStore, room_id: &str, participant_id: &str, text: &str) {
    let action: ClientAction = match serde_json::from_str(text) {
        Ok(action) => action,
        Err(e) => {
            tracing::warn!(room = %room_id, error = %e, "Dropping malformed action");
            return;
        }
    };

    if let Err(e) = apply(store, room_id, participant_id, action).await {
        tracing::warn!(room = %room_id, participant = %participant_id, error = %e, "Action failed");
    }
}

pub(crate) async fn apply(
    store: &RoomStore,
    room_id: &str,
    participant_id: &str,
    action: ClientAction,
) -> Result<(), StoreError> {
    match action {
        ClientAction::ToggleResults => {
            store
                .update_room(room_id, |mut room| {
                    room.show_results = !room.show_results;
                    room
                })
                .await
        }
        ClientAction::ResetResults => store.reset_all_votes(room_id).await,
        ClientAction::ChangeName { name } => {
            store
                .sync_participant(room_id, participant_id, |mut user| {
                    user.name = name;
                    user
                })
                .await
        }
        ClientAction::ChangeVote { vote } => {
            store
                .sync_participant(room_id, participant_id, |mut user| {
                    user.vote = vote;
                    user
                })
                .await
        }
    }
}
