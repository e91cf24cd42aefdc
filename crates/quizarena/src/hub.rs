//! Lobby channels: which connection hears which lobby's events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quizarena_engine::{BroadcastError, BroadcastGateway};
use quizarena_protocol::{JsonCodec, LobbyCode, PlayerId, ServerEvent};
use tokio::sync::mpsc;

use crate::transport::ConnectionId;

/// Encoded frames queued for one connection's writer task.
pub type Outbox = mpsc::UnboundedSender<Arc<str>>;

struct Subscriber {
    conn: ConnectionId,
    outbox: Outbox,
}

type Channels = HashMap<LobbyCode, HashMap<PlayerId, Subscriber>>;

/// The [`BroadcastGateway`] backed by live WebSocket connections.
///
/// Each player has at most one subscription per lobby. A newer connection
/// for the same player replaces the older one, so a reconnecting client
/// takes over its seat before the stale socket has noticed it is dead.
///
/// Events are encoded once per publish and shared between subscribers.
#[derive(Default)]
pub struct BroadcastHub {
    codec: JsonCodec,
    channels: Mutex<Channels>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, Channels> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes `lobby`'s events for `player` to `outbox`.
    ///
    /// Returns the connection that was displaced, if any.
    pub fn subscribe(
        &self,
        lobby: &LobbyCode,
        player: PlayerId,
        conn: ConnectionId,
        outbox: Outbox,
    ) -> Option<ConnectionId> {
        let replaced = self
            .channels()
            .entry(lobby.clone())
            .or_default()
            .insert(player, Subscriber { conn, outbox })
            .map(|old| old.conn)
            .filter(|old| *old != conn);
        if let Some(old) = replaced {
            tracing::debug!(%lobby, %player, %old, %conn, "subscription taken over");
        }
        replaced
    }

    /// Removes `player`'s subscription to `lobby` if it still belongs to
    /// `conn`. Returns `true` if something was removed.
    pub fn unsubscribe(&self, lobby: &LobbyCode, player: PlayerId, conn: ConnectionId) -> bool {
        let mut channels = self.channels();
        let Some(subscribers) = channels.get_mut(lobby) else {
            return false;
        };
        let owned = subscribers.get(&player).is_some_and(|s| s.conn == conn);
        if owned {
            subscribers.remove(&player);
        }
        if subscribers.is_empty() {
            channels.remove(lobby);
        }
        owned
    }

    /// Live subscribers on `lobby`.
    pub fn subscriber_count(&self, lobby: &LobbyCode) -> usize {
        self.channels().get(lobby).map_or(0, HashMap::len)
    }

    /// Lobbies with at least one subscriber.
    pub fn lobby_count(&self) -> usize {
        self.channels().len()
    }

    fn encode(&self, event: &ServerEvent) -> Result<Arc<str>, BroadcastError> {
        self.codec
            .encode_text(event)
            .map(Arc::from)
            .map_err(|e| BroadcastError::Encode(e.to_string()))
    }
}

impl BroadcastGateway for BroadcastHub {
    fn publish(&self, lobby: &LobbyCode, event: &ServerEvent) -> Result<(), BroadcastError> {
        let frame = self.encode(event)?;
        let mut channels = self.channels();
        let Some(subscribers) = channels.get_mut(lobby) else {
            return Ok(());
        };

        let before = subscribers.len();
        // A closed outbox means the writer task is gone; drop the subscriber.
        subscribers.retain(|_, s| s.outbox.send(Arc::clone(&frame)).is_ok());
        let failed = before - subscribers.len();
        if subscribers.is_empty() {
            channels.remove(lobby);
        }

        if failed > 0 {
            return Err(BroadcastError::Delivery {
                lobby: lobby.clone(),
                failed,
            });
        }
        tracing::trace!(%lobby, event = event.name(), recipients = before, "published");
        Ok(())
    }

    fn unicast(
        &self,
        lobby: &LobbyCode,
        player: PlayerId,
        event: &ServerEvent,
    ) -> Result<(), BroadcastError> {
        let frame = self.encode(event)?;
        let channels = self.channels();
        let subscriber = channels
            .get(lobby)
            .and_then(|subscribers| subscribers.get(&player))
            .ok_or_else(|| BroadcastError::NotSubscribed {
                lobby: lobby.clone(),
                player,
            })?;
        subscriber
            .outbox
            .send(frame)
            .map_err(|_| BroadcastError::Delivery {
                lobby: lobby.clone(),
                failed: 1,
            })
    }
}
