//! Wire protocol: inbound client actions and the outbound snapshot frame.
//! The literal `"ping"`/`"pong"` heartbeat is handled before JSON parsing
//! and never reaches these types.

use estim_store::Snapshot;
use serde::{Deserialize, Serialize};

/// Closed set of state-changing client actions. Anything else on the wire
/// is logged and dropped without closing the connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientAction {
    ToggleResults,
    ResetResults,
    ChangeName {
        name: String,
    },
    /// Omitting `vote` clears it.
    ChangeVote {
        #[serde(default)]
        vote: Option<String>,
    },
}

/// Full room state pushed on every observed mutation, tagged with the
/// receiving connection's own participant id so the client can tell itself
/// apart from the others.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFrame {
    #[serde(flatten)]
    pub room: Snapshot,
    pub user_id: String,
}
