use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use poker_core::ids::{ProjectId, SessionKey, UserId};

use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Clients silent for this many heartbeats are considered dead.
const MISSED_HEARTBEATS: u32 = 3;

/// Unique client identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user seat taken through one connection.
pub type Binding = (SessionKey, UserId);

/// A connected WebSocket client.
pub struct Client {
    pub id: ClientId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
    /// Project channels this client receives updates for.
    projects: Mutex<HashSet<ProjectId>>,
    /// Seats joined through this connection; released on disconnect.
    bindings: Mutex<HashSet<Binding>>,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
            projects: Mutex::new(HashSet::new()),
            bindings: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    fn is_subscribed(&self, project_id: &ProjectId) -> bool {
        self.projects.lock().contains(project_id)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client and return its ID + outbound receiver.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let _ = self
            .clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    /// Remove a client. Returns the seats it held, or `None` when the client
    /// was already gone, so each connection is released exactly once.
    pub fn unregister(&self, id: &ClientId) -> Option<Vec<Binding>> {
        let (_, client) = self.clients.remove(id)?;
        client.connected.store(false, Ordering::Relaxed);
        let bindings = client.bindings.lock().drain().collect();
        Some(bindings)
    }

    /// Receive updates for a project's sessions.
    pub fn subscribe(&self, client_id: &ClientId, project_id: &ProjectId) -> bool {
        let Some(client) = self.client(client_id) else {
            return false;
        };
        let _ = client.projects.lock().insert(project_id.clone());
        true
    }

    /// Record that `user_id` sits in `key` through this client. Also
    /// subscribes the client to the key's project.
    pub fn bind(&self, client_id: &ClientId, key: &SessionKey, user_id: &UserId) -> bool {
        let Some(client) = self.client(client_id) else {
            return false;
        };
        let _ = client.projects.lock().insert(key.project_id.clone());
        let _ = client.bindings.lock().insert((key.clone(), user_id.clone()));
        true
    }

    pub fn unbind(&self, client_id: &ClientId, key: &SessionKey, user_id: &UserId) {
        if let Some(client) = self.client(client_id) {
            let _ = client.bindings.lock().remove(&(key.clone(), user_id.clone()));
        }
    }

    /// Whether this client holds the seat.
    pub fn holds(&self, client_id: &ClientId, key: &SessionKey, user_id: &UserId) -> bool {
        self.client(client_id)
            .is_some_and(|c| c.bindings.lock().contains(&(key.clone(), user_id.clone())))
    }

    /// Whether any connected client still holds this seat.
    pub fn is_bound(&self, key: &SessionKey, user_id: &UserId) -> bool {
        let binding = (key.clone(), user_id.clone());
        self.clients
            .iter()
            .any(|entry| entry.value().is_connected() && entry.value().bindings.lock().contains(&binding))
    }

    /// Queue a message for one client. Drops it when the queue is full.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        let Some(client) = self.client(client_id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %client_id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a message for every client subscribed to a project. Returns the
    /// number of clients it was queued for.
    pub fn broadcast_to_project(&self, project_id: &ProjectId, message: &str) -> usize {
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            if !client.is_connected() || !client.is_subscribed(project_id) {
                continue;
            }
            match client.tx.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    tracing::warn!(client_id = %client.id, %project_id, "dropped session update");
                }
            }
        }
        delivered
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Clients that haven't answered a ping within `timeout`.
    pub fn dead_clients(&self, timeout: Duration) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|entry| !entry.value().is_alive(timeout))
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn client(&self, client_id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(client_id).map(|c| Arc::clone(c.value()))
    }
}

/// Liveness window for a heartbeat interval.
pub fn client_timeout(heartbeat: Duration) -> Duration {
    heartbeat * MISSED_HEARTBEATS
}

/// Pump one WebSocket: outbound queue + heartbeat pings on one side, inbound
/// text frames to `on_message` on the other. Returns when either side ends.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if on_message.send((reader_cid.clone(), text.to_string())).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.client(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if let Some(client) = registry.client(&client_id) {
        client.connected.store(false, Ordering::Relaxed);
    }
}
