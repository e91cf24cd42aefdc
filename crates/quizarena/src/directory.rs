//! Lobby membership as seen by the gateway.

use std::future::Future;

use quizarena_engine::{RosterEntry, RosterError, RosterStore};
use quizarena_protocol::{LobbyCode, PlayerId};

use crate::Identity;

/// A [`RosterStore`] that also accepts joins and leaves.
///
/// The engine only reads the roster and writes connection status. Joining
/// and leaving a lobby is a gateway concern, so it lives here.
pub trait LobbyDirectory: RosterStore {
    /// Adds `identity` to `lobby`, or marks them connected if they are
    /// already a member. Returns the resulting roster entry.
    fn join(
        &self,
        lobby: &LobbyCode,
        identity: &Identity,
    ) -> impl Future<Output = Result<RosterEntry, RosterError>> + Send;

    /// Removes `player` from `lobby`.
    fn leave(
        &self,
        lobby: &LobbyCode,
        player: PlayerId,
    ) -> impl Future<Output = Result<(), RosterError>> + Send;
}
