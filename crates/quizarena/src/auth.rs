//! Authentication hook for validating player identity.
//!
//! QuizArena doesn't implement authentication itself; accounts and tokens
//! belong to the rest of the platform. The gateway only needs to turn the
//! token a client sends in its `Handshake` into an [`Identity`], and it asks
//! an [`Authenticator`] to do that.

use std::future::Future;

use quizarena_protocol::PlayerId;

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub player_id: PlayerId,
    /// Display name used when the player joins a lobby.
    pub username: String,
}

/// Authentication failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token was malformed, expired, or rejected.
    #[error("authentication failed: {0}")]
    Rejected(String),

    /// The identity provider could not be reached.
    #[error("authenticator unavailable: {0}")]
    Unavailable(String),
}

/// Validates a client's token and returns their identity.
///
/// # Example
///
/// ```rust
/// use quizarena::{AuthError, Authenticator, Identity};
/// use quizarena_protocol::PlayerId;
///
/// /// Lets exactly one player in.
/// struct SinglePlayer;
///
/// impl Authenticator for SinglePlayer {
///     async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
///         if token != "let-me-in" {
///             return Err(AuthError::Rejected("wrong token".into()));
///         }
///         Ok(Identity {
///             player_id: PlayerId(1),
///             username: "solo".into(),
///         })
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Called once per connection, with the token from the handshake.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Identity, AuthError>> + Send;
}
