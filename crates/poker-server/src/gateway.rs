//! Broadcast gateway: session updates out to WebSocket clients, one channel
//! per project.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use poker_core::ids::{BoardId, ProjectId};
use poker_core::{SessionSnapshot, SessionUpdate, SnapshotPublisher};

use crate::client::ClientRegistry;

pub const SESSION_UPDATE_EVENT: &str = "planningPoker.sessionUpdate";

/// Push event. `data: null` means the board has no session any more.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdateEvent<'a> {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub project_id: &'a ProjectId,
    pub board_id: &'a BoardId,
    pub timestamp: DateTime<Utc>,
    pub data: Option<&'a SessionSnapshot>,
}

impl<'a> SessionUpdateEvent<'a> {
    pub fn new(project_id: &'a ProjectId, update: &'a SessionUpdate) -> Self {
        Self {
            event_type: SESSION_UPDATE_EVENT,
            project_id,
            board_id: &update.board_id,
            timestamp: Utc::now(),
            data: update.snapshot.as_ref(),
        }
    }
}

/// [`SnapshotPublisher`] that fans out to every client subscribed to the
/// project.
pub struct ProjectChannelGateway {
    registry: Arc<ClientRegistry>,
}

impl ProjectChannelGateway {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }
}

impl SnapshotPublisher for ProjectChannelGateway {
    fn publish(&self, project_id: &ProjectId, update: &SessionUpdate) {
        let event = SessionUpdateEvent::new(project_id, update);
        match serde_json::to_string(&event) {
            Ok(json) => {
                let delivered = self.registry.broadcast_to_project(project_id, &json);
                tracing::trace!(%project_id, board_id = %update.board_id, delivered, "session update published");
            }
            Err(e) => tracing::error!(%project_id, error = %e, "failed to serialize session update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_event_has_null_data() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (id, mut rx) = registry.register();
        registry.subscribe(&id, &ProjectId::from_raw("p1"));

        let gateway = ProjectChannelGateway::new(Arc::clone(&registry));
        gateway.publish(
            &ProjectId::from_raw("p1"),
            &SessionUpdate {
                board_id: BoardId::from_raw("b1"),
                snapshot: None,
            },
        );

        let msg: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], SESSION_UPDATE_EVENT);
        assert_eq!(msg["projectId"], "p1");
        assert_eq!(msg["boardId"], "b1");
        assert!(msg["data"].is_null());
        assert!(msg["timestamp"].is_string());
    }

    #[test]
    fn other_projects_hear_nothing() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (id, mut rx) = registry.register();
        registry.subscribe(&id, &ProjectId::from_raw("p2"));

        ProjectChannelGateway::new(Arc::clone(&registry)).publish(
            &ProjectId::from_raw("p1"),
            &SessionUpdate {
                board_id: BoardId::from_raw("b1"),
                snapshot: None,
            },
        );
        assert!(rx.try_recv().is_err());
    }
}
