//! Session Hub
//!
//! Single task that owns the [`BattleEngine`]. Connections talk to it only
//! through [`HubHandle`]; every transition is applied inside the hub's loop,
//! one command at a time, so the two sides of a pairing can never be
//! mutated concurrently.
//!
//! Outbound messages go into each connection's bounded queue with
//! `try_send`. A client whose queue is full is evicted and treated as
//! disconnected; the hub never waits on a slow socket.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::color::Color;
use crate::game::battle::{BattleEngine, EngineStats};
use crate::game::events::{Notification, ReplicationChannel, ReplicationUpdate};
use crate::game::intent::Intent;
use crate::game::state::ConnectionId;
use crate::network::protocol::{now_millis, ServerMessage, WelcomeInfo};

/// Hub errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The hub task has stopped.
    #[error("session hub is not running")]
    Closed,
}

/// Route from the hub to one connection.
#[derive(Debug)]
pub struct ClientLink {
    /// Outbound queue, drained by the connection's writer task.
    pub outbound: mpsc::Sender<ServerMessage>,
    /// Dropped by the hub when it stops serving the connection.
    pub evicted: oneshot::Sender<()>,
}

impl ClientLink {
    /// Create a link and the receiver that resolves when the hub drops it.
    pub fn new(outbound: mpsc::Sender<ServerMessage>) -> (Self, oneshot::Receiver<()>) {
        let (evicted, evicted_rx) = oneshot::channel();
        (Self { outbound, evicted }, evicted_rx)
    }
}

/// Commands accepted by the hub.
#[derive(Debug)]
pub enum HubCommand {
    /// Register a connection.
    Connect {
        /// Name from the auth token, if any.
        display_name: Option<String>,
        /// Outbound route.
        link: ClientLink,
        /// Receives the assigned id.
        reply: oneshot::Sender<ConnectionId>,
    },
    /// Apply a duel intent.
    Intent {
        /// Acting connection.
        id: ConnectionId,
        /// What it asked for.
        intent: Intent,
    },
    /// Unregister a connection.
    Disconnect {
        /// Departing connection.
        id: ConnectionId,
    },
    /// Read session counts.
    Stats {
        /// Receives the counts.
        reply: oneshot::Sender<EngineStats>,
    },
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable sender side of the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Register a connection and wait for its id.
    pub async fn connect(
        &self,
        display_name: Option<String>,
        link: ClientLink,
    ) -> Result<ConnectionId, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Connect { display_name, link, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Queue an intent from `id`.
    pub async fn submit(&self, id: ConnectionId, intent: Intent) -> Result<(), HubError> {
        self.send(HubCommand::Intent { id, intent }).await
    }

    /// Queue the removal of `id`.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), HubError> {
        self.send(HubCommand::Disconnect { id }).await
    }

    /// Current session counts.
    pub async fn stats(&self) -> Result<EngineStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.tx.send(command).await.map_err(|_| HubError::Closed)
    }
}

// =============================================================================
// OUTBOX
// =============================================================================

/// [`ReplicationChannel`] over per-connection queues.
#[derive(Debug, Default)]
struct Outbox {
    links: BTreeMap<ConnectionId, ClientLink>,
    evicted: Vec<ConnectionId>,
}

impl Outbox {
    fn attach(&mut self, id: ConnectionId, link: ClientLink) {
        self.links.insert(id, link);
    }

    fn detach(&mut self, id: ConnectionId) -> bool {
        self.links.remove(&id).is_some()
    }

    fn send(&mut self, target: ConnectionId, message: ServerMessage) {
        let Some(link) = self.links.get(&target) else {
            return;
        };

        match link.outbound.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(id = %target, "Outbound queue full, evicting client");
                self.links.remove(&target);
                self.evicted.push(target);
            }
            Err(TrySendError::Closed(_)) => {
                debug!(id = %target, "Outbound queue closed");
                self.links.remove(&target);
                self.evicted.push(target);
            }
        }
    }

    fn take_evicted(&mut self) -> Option<ConnectionId> {
        self.evicted.pop()
    }
}

impl ReplicationChannel for Outbox {
    fn replicate(&mut self, target: ConnectionId, update: ReplicationUpdate) {
        self.send(target, ServerMessage::Replicate(update));
    }

    fn notify(&mut self, target: ConnectionId, notification: Notification) {
        self.send(target, ServerMessage::Notify(notification));
    }
}

// =============================================================================
// HUB
// =============================================================================

/// The task that serialises every duel transition.
pub struct SessionHub {
    engine: BattleEngine,
    outbox: Outbox,
    rng: StdRng,
    commands: mpsc::Receiver<HubCommand>,
    stats_interval: Option<Duration>,
}

impl SessionHub {
    /// Create a hub and its handle.
    ///
    /// `stats_interval` of `None` disables the periodic stats log.
    pub fn new(command_buffer: usize, stats_interval: Option<Duration>) -> (Self, HubHandle) {
        let (tx, commands) = mpsc::channel(command_buffer.max(1));
        let hub = Self {
            engine: BattleEngine::new(),
            outbox: Outbox::default(),
            rng: StdRng::from_entropy(),
            commands,
            stats_interval,
        };
        (hub, HubHandle { tx })
    }

    /// Spawn the hub on the runtime.
    pub fn spawn(command_buffer: usize, stats_interval: Option<Duration>) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(command_buffer, stats_interval);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    /// Process commands until every [`HubHandle`] is dropped.
    ///
    /// Remaining links are dropped on the way out, which releases every
    /// connection still waiting on the hub.
    pub async fn run(mut self) {
        let mut stats_tick = self.stats_interval.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!("Session hub started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
                _ = async {
                    match stats_tick.as_mut() {
                        Some(ticker) => { ticker.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let stats = self.engine.stats();
                    info!(
                        connected = stats.connected,
                        idle = stats.idle,
                        negotiating = stats.negotiating,
                        selecting = stats.selecting,
                        "Session stats"
                    );
                }
            }
        }

        info!(remaining = self.outbox.links.len(), "Session hub stopped");
    }

    /// Apply one command, then drop any clients evicted while doing so.
    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect { display_name, link, reply } => {
                let id = self.register(display_name, link);
                if reply.send(id).is_err() {
                    debug!(id = %id, "Connection went away during registration");
                    self.remove(id);
                }
            }
            HubCommand::Intent { id, intent } => {
                if let Err(e) = self.engine.handle(id, intent, &mut self.outbox) {
                    if e.is_invalid_transition() {
                        debug!(id = %id, intent = intent.name(), "Ignored intent: {}", e);
                    } else {
                        warn!(id = %id, intent = intent.name(), "Intent failed: {}", e);
                    }
                }
            }
            HubCommand::Disconnect { id } => {
                self.remove(id);
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.engine.stats());
            }
        }

        while let Some(id) = self.outbox.take_evicted() {
            if let Err(e) = self.engine.disconnect(id, &mut self.outbox) {
                debug!(id = %id, "Evicted client already removed: {}", e);
            }
        }
    }

    fn register(&mut self, display_name: Option<String>, link: ClientLink) -> ConnectionId {
        let color = Color::random(&mut self.rng);
        let id = self.engine.register(display_name, color);
        self.outbox.attach(id, link);

        if let Some(session) = self.engine.registry().get(id) {
            let welcome = ServerMessage::Welcome(WelcomeInfo {
                connection_id: id,
                display_name: session.display_name.clone(),
                color: session.color,
                server_version: crate::VERSION.to_string(),
                server_time: now_millis(),
            });
            self.outbox.send(id, welcome);
        }

        self.engine.announce(id, &mut self.outbox);
        id
    }

    fn remove(&mut self, id: ConnectionId) {
        self.outbox.detach(id);
        if let Err(e) = self.engine.disconnect(id, &mut self.outbox) {
            debug!(id = %id, "Disconnect for unknown session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::choice::{Move, Outcome};
    use crate::game::state::SessionState;

    struct TestClient {
        id: ConnectionId,
        rx: mpsc::Receiver<ServerMessage>,
        evicted: oneshot::Receiver<()>,
    }

    impl TestClient {
        async fn join(handle: &HubHandle, name: Option<&str>, buffer: usize) -> Self {
            let (tx, rx) = mpsc::channel(buffer);
            let (link, evicted) = ClientLink::new(tx);
            let id = handle.connect(name.map(String::from), link).await.unwrap();
            Self { id, rx, evicted }
        }

        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }

        fn notifications(&mut self) -> Vec<Notification> {
            self.drain()
                .into_iter()
                .filter_map(|m| match m {
                    ServerMessage::Notify(n) => Some(n),
                    _ => None,
                })
                .collect()
        }
    }

    /// Round-trip a command so everything queued before it has been applied.
    async fn settle(handle: &HubHandle) -> EngineStats {
        handle.stats().await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_sends_welcome_then_snapshot() {
        let (handle, _task) = SessionHub::spawn(16, None);
        let mut alice = TestClient::join(&handle, Some("alice"), 16).await;

        let messages = alice.drain();
        match &messages[0] {
            ServerMessage::Welcome(info) => {
                assert_eq!(info.connection_id, alice.id);
                assert_eq!(info.display_name, "alice");
            }
            other => panic!("expected welcome, got {:?}", other),
        }
        assert!(matches!(
            &messages[1],
            ServerMessage::Replicate(ReplicationUpdate::Snapshot { sessions }) if sessions.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_full_duel_through_hub() {
        let (handle, _task) = SessionHub::spawn(16, None);
        let mut p1 = TestClient::join(&handle, None, 64).await;
        let mut p2 = TestClient::join(&handle, None, 64).await;
        p1.drain();
        p2.drain();

        handle.submit(p1.id, Intent::RequestChallenge).await.unwrap();
        handle.submit(p2.id, Intent::RespondToChallenge { accept: true }).await.unwrap();
        handle.submit(p1.id, Intent::SelectMove { choice: Move::Paper }).await.unwrap();
        handle.submit(p2.id, Intent::SelectMove { choice: Move::Rock }).await.unwrap();
        let stats = settle(&handle).await;
        assert_eq!(stats.idle, 2);

        let results: Vec<_> = p1
            .notifications()
            .into_iter()
            .filter(|n| matches!(n, Notification::BattleResult { .. }))
            .collect();
        assert_eq!(
            results,
            vec![Notification::BattleResult {
                outcome: Outcome::Win,
                own_move: Move::Paper,
                opponent_move: Move::Rock,
            }]
        );

        let p2_notes = p2.notifications();
        assert!(p2_notes.contains(&Notification::ChallengeReceived { challenger_id: p1.id }));
        assert!(p2_notes.contains(&Notification::BattleResult {
            outcome: Outcome::Lose,
            own_move: Move::Rock,
            opponent_move: Move::Paper,
        }));
    }

    #[tokio::test]
    async fn test_disconnect_resets_opponent() {
        let (handle, _task) = SessionHub::spawn(16, None);
        let mut p1 = TestClient::join(&handle, None, 64).await;
        let p2 = TestClient::join(&handle, None, 64).await;

        handle.submit(p1.id, Intent::ChallengePlayer { target: p2.id }).await.unwrap();
        assert_eq!(settle(&handle).await.negotiating, 2);
        p1.drain();

        handle.disconnect(p2.id).await.unwrap();
        let stats = settle(&handle).await;
        assert_eq!(stats.connected, 1);
        assert_eq!(stats.idle, 1);

        let updates = p1.drain();
        assert!(updates.contains(&ServerMessage::Replicate(ReplicationUpdate::Removed { id: p2.id })));
        assert!(updates.iter().any(|m| matches!(
            m,
            ServerMessage::Replicate(ReplicationUpdate::Upsert(s))
                if s.id == p1.id && s.state == SessionState::Idle
        )));
    }

    #[tokio::test]
    async fn test_full_queue_evicts_client() {
        let (handle, _task) = SessionHub::spawn(16, None);
        // Room for welcome, snapshot and the next arrival only.
        let mut slow = TestClient::join(&handle, None, 3).await;
        let mut fast = TestClient::join(&handle, None, 64).await;

        assert_eq!(settle(&handle).await.connected, 2);
        assert!(matches!(
            slow.evicted.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));

        handle.submit(fast.id, Intent::ChallengePlayer { target: slow.id }).await.unwrap();
        let stats = settle(&handle).await;

        // The slow client is gone and its would-be opponent is free again.
        assert_eq!(stats.connected, 1);
        assert_eq!(stats.idle, 1);
        assert!(matches!(
            slow.evicted.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(fast
            .drain()
            .contains(&ServerMessage::Replicate(ReplicationUpdate::Removed { id: slow.id })));
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_treated_as_disconnect() {
        let (handle, _task) = SessionHub::spawn(16, None);
        let gone = TestClient::join(&handle, None, 8).await;
        let stay = TestClient::join(&handle, None, 8).await;

        drop(gone.rx);
        handle.submit(stay.id, Intent::RequestChallenge).await.unwrap();

        assert_eq!(settle(&handle).await.connected, 1);
    }

    #[tokio::test]
    async fn test_duplicate_disconnect_is_harmless() {
        let (handle, _task) = SessionHub::spawn(16, None);
        let client = TestClient::join(&handle, None, 8).await;

        handle.disconnect(client.id).await.unwrap();
        handle.disconnect(client.id).await.unwrap();
        assert_eq!(settle(&handle).await.connected, 0);
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_dropped() {
        let (handle, task) = SessionHub::spawn(16, Some(Duration::from_secs(60)));
        let mut client = TestClient::join(&handle, None, 8).await;

        drop(handle);
        task.await.unwrap();

        assert!(matches!(
            client.evicted.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }
}
