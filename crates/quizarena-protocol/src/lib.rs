//! Wire protocol for QuizArena.
//!
//! This crate defines the "language" that quiz clients and the server speak:
//!
//! - **Identity** ([`PlayerId`], [`LobbyCode`]): who is playing, and where.
//! - **Questions** ([`QuestionRecord`], [`PublicQuestion`]): the full record
//!   the engine grades against, and the redacted view players are shown.
//! - **Messages** ([`ClientMessage`], [`ServerEvent`]): inbound requests and
//!   the named events the session engine broadcasts.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer knows nothing about timers, lobbies in progress, or
//! connections. It only describes data.
//!
//! ```text
//! Gateway (frames) → Protocol (ClientMessage / ServerEvent) → Engine (sessions)
//! ```

mod codec;
mod error;
mod event;
mod question;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use event::{
    ClientMessage, EndReason, PlayerResult, ServerEvent, SessionSnapshot,
    Standing,
};
pub use question::{PublicQuestion, QuestionRecord};
pub use types::{LobbyCode, PlayerId, SessionPhase};
