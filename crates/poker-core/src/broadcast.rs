use serde::{Deserialize, Serialize};

use crate::ids::{BoardId, ProjectId};
use crate::snapshot::SessionSnapshot;

/// Payload delivered on a project channel after every committed transition.
/// `snapshot: None` announces that the board's session no longer exists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub board_id: BoardId,
    pub snapshot: Option<SessionSnapshot>,
}

/// Fan-out of session state to every subscriber of a project channel.
///
/// Fire-and-forget: implementations must not block, and delivery failures
/// stay inside the implementation.
pub trait SnapshotPublisher: Send + Sync {
    fn publish(&self, project_id: &ProjectId, update: &SessionUpdate);
}

/// Publisher that drops everything, for embedding without a transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPublisher;

impl SnapshotPublisher for NullPublisher {
    fn publish(&self, _project_id: &ProjectId, _update: &SessionUpdate) {}
}
