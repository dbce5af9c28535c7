//! RPC method handlers: `planningPoker.*` verbs onto the session manager.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use poker_core::ids::{CardId, ListId, ProjectId, SessionKey, UserId};
use poker_core::{ActionOutcome, CoordinatorError};
use poker_engine::SessionManager;

use crate::client::{ClientId, ClientRegistry};
use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub manager: SessionManager,
    pub registry: Arc<ClientRegistry>,
    pub started_at: Instant,
}

impl HandlerState {
    pub fn new(manager: SessionManager, registry: Arc<ClientRegistry>) -> Self {
        Self {
            manager,
            registry,
            started_at: Instant::now(),
        }
    }

    /// Drop a client and give up every seat no other connection still holds.
    /// Safe to call more than once for the same client.
    pub async fn release_client(&self, client_id: &ClientId) {
        let Some(bindings) = self.registry.unregister(client_id) else {
            return;
        };
        for (key, user_id) in bindings {
            let registry = &self.registry;
            let released = self
                .manager
                .disconnect_if(&key, &user_id, || !registry.is_bound(&key, &user_id))
                .await;
            if released {
                tracing::info!(client_id = %client_id, %key, user_id = %user_id, "seat released on disconnect");
            }
        }
    }
}

/// Dispatch an RPC method from `client_id` to its handler.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    client_id: &ClientId,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        "planningPoker.join" => join(state, client_id, params, id).await,
        "planningPoker.leave" => leave(state, client_id, params, id).await,
        "planningPoker.setObserver" => set_observer(state, params, id).await,
        "planningPoker.activateStory" => activate_story(state, params, id).await,
        "planningPoker.vote" => vote(state, params, id).await,
        "planningPoker.finishVote" => simple(state, params, id, Verb::FinishVote).await,
        "planningPoker.restartVote" => simple(state, params, id, Verb::RestartVote).await,
        "planningPoker.assignStoryPoints" => assign_story_points(state, params, id).await,
        "planningPoker.skipStory" => simple(state, params, id, Verb::SkipStory).await,
        "planningPoker.transferHost" => transfer_host(state, params, id).await,
        "planningPoker.closeSession" => simple(state, params, id, Verb::CloseSession).await,
        "planningPoker.get" => get(state, params, id).await,
        "planningPoker.subscribe" => subscribe(state, client_id, params, id),

        "system.ping" | "health" => health(state, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

// ── Param extraction ────────────────────────────────────────────────────────

fn session_key(params: &serde_json::Value) -> Result<SessionKey, String> {
    let project_id = rpc::require_str(params, "projectId")?;
    let board_id = rpc::require_str(params, "boardId")?;
    Ok(SessionKey::new(project_id, board_id))
}

/// `(key, userId)` common to every session verb.
fn seat(params: &serde_json::Value) -> Result<(SessionKey, UserId), String> {
    let key = session_key(params)?;
    let user_id = UserId::from_raw(rpc::require_str(params, "userId")?);
    Ok((key, user_id))
}

fn respond(id: Option<serde_json::Value>, result: Result<ActionOutcome, CoordinatorError>) -> RpcResponse {
    match result {
        Ok(outcome) => match serde_json::to_value(&outcome) {
            Ok(value) => RpcResponse::success(id, value),
            Err(e) => RpcResponse::coordinator(id, &CoordinatorError::invalid(e.to_string())),
        },
        Err(e) => RpcResponse::coordinator(id, &e),
    }
}

macro_rules! params_or_return {
    ($expr:expr, $id:expr) => {
        match $expr {
            Ok(v) => v,
            Err(msg) => return RpcResponse::invalid_params($id, msg),
        }
    };
}

// ── Session verbs ───────────────────────────────────────────────────────────

async fn join(
    state: &HandlerState,
    client_id: &ClientId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let (key, user_id) = params_or_return!(seat(params), id);
    let list_id = ListId::from_raw(params_or_return!(rpc::require_str(params, "listId"), id));

    // Bind (and subscribe) before joining: the caller sees the update this
    // join publishes, and a racing disconnect from another tab sees the seat.
    let held = state.registry.holds(client_id, &key, &user_id);
    let _ = state.registry.bind(client_id, &key, &user_id);
    let result = state.manager.join(&key, &user_id, &list_id).await;
    if result.is_err() && !held {
        state.registry.unbind(client_id, &key, &user_id);
    }
    respond(id, result)
}

async fn leave(
    state: &HandlerState,
    client_id: &ClientId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let (key, user_id) = params_or_return!(seat(params), id);
    let result = state.manager.leave(&key, &user_id).await;
    // The seat is gone either way once the manager no longer knows the user.
    if !matches!(result, Err(CoordinatorError::InvalidAction(_))) {
        state.registry.unbind(client_id, &key, &user_id);
    }
    respond(id, result)
}

async fn set_observer(state: &HandlerState, params: &serde_json::Value, id: Option<serde_json::Value>) -> RpcResponse {
    let (key, user_id) = params_or_return!(seat(params), id);
    let observer = params_or_return!(rpc::require_bool(params, "isObserver"), id);
    respond(id, state.manager.set_observer(&key, &user_id, observer).await)
}

async fn activate_story(state: &HandlerState, params: &serde_json::Value, id: Option<serde_json::Value>) -> RpcResponse {
    let (key, user_id) = params_or_return!(seat(params), id);
    let card_id = CardId::from_raw(params_or_return!(rpc::require_str(params, "cardId"), id));
    respond(id, state.manager.activate_story(&key, &user_id, &card_id).await)
}

async fn vote(state: &HandlerState, params: &serde_json::Value, id: Option<serde_json::Value>) -> RpcResponse {
    let (key, user_id) = params_or_return!(seat(params), id);
    let value = params_or_return!(rpc::require_vote_value(params, "value"), id);
    respond(id, state.manager.vote(&key, &user_id, &value).await)
}

async fn assign_story_points(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let (key, user_id) = params_or_return!(seat(params), id);
    let points = params_or_return!(rpc::require_f64(params, "points"), id);
    respond(id, state.manager.assign_story_points(&key, &user_id, points).await)
}

async fn transfer_host(state: &HandlerState, params: &serde_json::Value, id: Option<serde_json::Value>) -> RpcResponse {
    let (key, user_id) = params_or_return!(seat(params), id);
    let target = UserId::from_raw(params_or_return!(rpc::require_str(params, "targetUserId"), id));
    respond(id, state.manager.transfer_host(&key, &user_id, &target).await)
}

/// Host verbs that carry nothing beyond the seat.
#[derive(Clone, Copy, Debug)]
enum Verb {
    FinishVote,
    RestartVote,
    SkipStory,
    CloseSession,
}

async fn simple(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
    verb: Verb,
) -> RpcResponse {
    let (key, user_id) = params_or_return!(seat(params), id);
    let manager = &state.manager;
    let result = match verb {
        Verb::FinishVote => manager.finish_vote(&key, &user_id).await,
        Verb::RestartVote => manager.restart_vote(&key, &user_id).await,
        Verb::SkipStory => manager.skip_story(&key, &user_id).await,
        Verb::CloseSession => manager.close_session(&key, &user_id).await,
    };
    respond(id, result)
}

// ── Reads & subscriptions ───────────────────────────────────────────────────

async fn get(state: &HandlerState, params: &serde_json::Value, id: Option<serde_json::Value>) -> RpcResponse {
    let key = params_or_return!(session_key(params), id);
    let viewer = rpc::optional_str(params, "userId").map(UserId::from_raw);
    let outcome = state
        .manager
        .snapshot(&key, viewer.as_ref())
        .await
        .unwrap_or_else(ActionOutcome::gone);
    respond(id, Ok(outcome))
}

fn subscribe(
    state: &HandlerState,
    client_id: &ClientId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let project_id = ProjectId::from_raw(params_or_return!(rpc::require_str(params, "projectId"), id));
    let subscribed = state.registry.subscribe(client_id, &project_id);
    RpcResponse::success(id, json!({ "projectId": project_id, "subscribed": subscribed }))
}

pub(crate) fn health(state: &HandlerState, id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(
        id,
        json!({
            "status": "healthy",
            "uptimeSecs": state.started_at.elapsed().as_secs(),
            "activeSessions": state.manager.active_sessions(),
            "connectedClients": state.registry.count(),
        }),
    )
}
