//! Per-connection handler: handshake, auth, and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → authenticate token → send Welcome
//!   2. Loop: receive ClientMessages → route to the lobby or the registry
//!   3. On close: drop the lobby subscription, tell the session the player
//!      is gone
//!
//! Frames leave through the connection's outbox. A writer task drains it, so
//! events published by a session actor and direct replies to this client
//! share one ordered queue.

use std::sync::Arc;
use std::time::Duration;

use quizarena_engine::{QuestionSource, ScoringFunction};
use quizarena_protocol::{
    ClientMessage, Codec, JsonCodec, LobbyCode, ProtocolError, ServerEvent,
};
use tokio::sync::mpsc;

use crate::hub::Outbox;
use crate::server::ServerState;
use crate::transport::{ConnectionId, FrameReader, FrameWriter, WebSocketConnection};
use crate::{Authenticator, Identity, LobbyDirectory, QuizError};

/// What the handler knows about the client once it has authenticated.
struct Client {
    conn: ConnectionId,
    identity: Identity,
    outbox: Outbox,
    lobby: Option<LobbyCode>,
}

impl Client {
    fn lobby(&self) -> Result<LobbyCode, QuizError> {
        self.lobby
            .clone()
            .ok_or_else(|| QuizError::BadRequest("join a lobby first".into()))
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<Q, S, R, A>(
    conn: WebSocketConnection,
    state: Arc<ServerState<Q, S, R, A>>,
) -> Result<(), QuizError>
where
    Q: QuestionSource,
    S: ScoringFunction,
    R: LobbyDirectory,
    A: Authenticator,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    let (writer, mut reader) = conn.split();
    let (outbox, frames) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_frames(writer, frames));

    let result = serve(&mut reader, &state, conn_id, &outbox).await;

    // The hub's copy of the outbox is gone by now; once ours drops the
    // writer flushes what is queued and closes the socket.
    drop(outbox);
    if writer_task.await.is_err() {
        tracing::debug!(%conn_id, "writer task panicked");
    }
    result
}

async fn serve<Q, S, R, A>(
    reader: &mut FrameReader,
    state: &Arc<ServerState<Q, S, R, A>>,
    conn: ConnectionId,
    outbox: &Outbox,
) -> Result<(), QuizError>
where
    Q: QuestionSource,
    S: ScoringFunction,
    R: LobbyDirectory,
    A: Authenticator,
{
    // --- Step 1: Handshake ---
    let identity = match perform_handshake(reader, state).await {
        Ok(identity) => identity,
        Err(e) => {
            report(&state.codec, outbox, &e);
            return Err(e);
        }
    };
    let player_id = identity.player_id;
    tracing::info!(%conn, %player_id, username = %identity.username, "player authenticated");
    send_event(&state.codec, outbox, &ServerEvent::Welcome { player_id });

    let mut client = Client {
        conn,
        identity,
        outbox: outbox.clone(),
        lobby: None,
    };

    // --- Step 2: Message loop ---
    let result = message_loop(reader, state, &mut client).await;

    // --- Step 3: Cleanup ---
    connection_closed(state, &mut client).await;
    result
}

/// Receives the first frame and authenticates its token.
async fn perform_handshake<Q, S, R, A>(
    reader: &mut FrameReader,
    state: &ServerState<Q, S, R, A>,
) -> Result<Identity, QuizError>
where
    Q: QuestionSource,
    S: ScoringFunction,
    R: LobbyDirectory,
    A: Authenticator,
{
    let data = match tokio::time::timeout(state.handshake_timeout, reader.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let token = match state.codec.decode::<ClientMessage>(&data)? {
        ClientMessage::Handshake { token } => token,
        _ => {
            return Err(ProtocolError::InvalidMessage(
                "first message must be Handshake".into(),
            )
            .into());
        }
    };

    Ok(state.auth.authenticate(&token).await?)
}

async fn message_loop<Q, S, R, A>(
    reader: &mut FrameReader,
    state: &ServerState<Q, S, R, A>,
    client: &mut Client,
) -> Result<(), QuizError>
where
    Q: QuestionSource,
    S: ScoringFunction,
    R: LobbyDirectory,
    A: Authenticator,
{
    let player_id = client.identity.player_id;
    loop {
        let data = match tokio::time::timeout(state.idle_timeout, reader.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%player_id, "connection closed cleanly");
                return Ok(());
            }
            Ok(Err(e)) => {
                tracing::debug!(%player_id, error = %e, "recv error");
                return Err(e.into());
            }
            Err(_) => {
                tracing::info!(%player_id, "connection timed out");
                return Ok(());
            }
        };

        let result = match state.codec.decode::<ClientMessage>(&data) {
            Ok(msg) => dispatch(state, client, msg).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            report(&state.codec, &client.outbox, &e);
        }
    }
}

/// Routes one message. Errors go back to this client only.
async fn dispatch<Q, S, R, A>(
    state: &ServerState<Q, S, R, A>,
    client: &mut Client,
    msg: ClientMessage,
) -> Result<(), QuizError>
where
    Q: QuestionSource,
    S: ScoringFunction,
    R: LobbyDirectory,
    A: Authenticator,
{
    let player_id = client.identity.player_id;
    match msg {
        ClientMessage::Handshake { .. } => {
            Err(QuizError::BadRequest("already authenticated".into()))
        }
        ClientMessage::JoinLobby { lobby } => join_lobby(state, client, lobby).await,
        ClientMessage::StartGame => {
            let lobby = client.lobby()?;
            state.registry.start_session(&lobby, player_id).await?;
            Ok(())
        }
        ClientMessage::SubmitAnswer { answer } => {
            let lobby = client.lobby()?;
            let ack = state.registry.submit_answer(&lobby, player_id, answer).await?;
            tracing::debug!(%lobby, %player_id, correct = ack.correct, "answer accepted");
            Ok(())
        }
        ClientMessage::EndGame => {
            let lobby = client.lobby()?;
            state.registry.end_session(&lobby, player_id).await?;
            Ok(())
        }
        ClientMessage::LeaveLobby => leave_lobby(state, client).await,
        ClientMessage::Heartbeat { client_time } => {
            send_event(
                &state.codec,
                &client.outbox,
                &ServerEvent::HeartbeatAck { client_time },
            );
            Ok(())
        }
    }
}

/// Joins (or rejoins) a lobby and subscribes to its events. A join while a
/// round runs is a reconnect: the session sends a snapshot.
async fn join_lobby<Q, S, R, A>(
    state: &ServerState<Q, S, R, A>,
    client: &mut Client,
    lobby: LobbyCode,
) -> Result<(), QuizError>
where
    Q: QuestionSource,
    S: ScoringFunction,
    R: LobbyDirectory,
    A: Authenticator,
{
    if !lobby.is_valid() {
        return Err(QuizError::BadRequest(format!("invalid lobby code '{lobby}'")));
    }
    if client.lobby.as_ref().is_some_and(|current| *current != lobby) {
        leave_lobby(state, client).await?;
    }

    let player_id = client.identity.player_id;
    let reconnected = state.registry.is_game_active(&lobby);
    if !reconnected {
        state
            .registry
            .roster()
            .join(&lobby, &client.identity)
            .await?;
    }
    // Subscribed before the reconnect so the session's snapshot unicast
    // reaches this connection.
    state
        .hub
        .subscribe(&lobby, player_id, client.conn, client.outbox.clone());
    client.lobby = Some(lobby.clone());

    tracing::info!(%lobby, %player_id, reconnected, "joined lobby");
    send_event(
        &state.codec,
        &client.outbox,
        &ServerEvent::LobbyJoined {
            lobby: lobby.clone(),
            reconnected,
        },
    );
    if reconnected {
        // The registry marks the roster connected only on success.
        let result = state
            .registry
            .handle_player_reconnect(&lobby, player_id)
            .await;
        if let Err(err) = result {
            state.hub.unsubscribe(&lobby, player_id, client.conn);
            client.lobby = None;
            tracing::info!(%lobby, %player_id, error = %err, "reconnect refused");
            return Err(err.into());
        }
    }
    Ok(())
}

/// Leaves the current lobby. Mid-round the player only disconnects, so
/// their score stays in the standings.
async fn leave_lobby<Q, S, R, A>(
    state: &ServerState<Q, S, R, A>,
    client: &mut Client,
) -> Result<(), QuizError>
where
    Q: QuestionSource,
    S: ScoringFunction,
    R: LobbyDirectory,
    A: Authenticator,
{
    let Some(lobby) = client.lobby.take() else {
        return Err(QuizError::BadRequest("not in a lobby".into()));
    };
    let player_id = client.identity.player_id;
    state.hub.unsubscribe(&lobby, player_id, client.conn);

    if state.registry.is_game_active(&lobby) {
        state
            .registry
            .handle_player_disconnect(&lobby, player_id)
            .await?;
    } else {
        state.registry.roster().leave(&lobby, player_id).await?;
    }
    tracing::info!(%lobby, %player_id, "left lobby");
    Ok(())
}

async fn connection_closed<Q, S, R, A>(state: &ServerState<Q, S, R, A>, client: &mut Client)
where
    Q: QuestionSource,
    S: ScoringFunction,
    R: LobbyDirectory,
    A: Authenticator,
{
    let Some(lobby) = client.lobby.take() else {
        return;
    };
    let player_id = client.identity.player_id;

    // A newer connection for this player owns the seat now.
    if !state.hub.unsubscribe(&lobby, player_id, client.conn) {
        tracing::debug!(%lobby, %player_id, conn = %client.conn, "superseded connection closed");
        return;
    }

    if state.registry.is_game_active(&lobby) {
        if let Err(e) = state
            .registry
            .handle_player_disconnect(&lobby, player_id)
            .await
        {
            tracing::debug!(%lobby, %player_id, error = %e, "disconnect not applied");
        }
    } else if let Err(e) = state
        .registry
        .roster()
        .set_connected(&lobby, player_id, false)
        .await
    {
        tracing::warn!(%lobby, %player_id, error = %e, "roster update failed");
    }
}

/// Drains the outbox onto the socket until every sender is gone.
async fn write_frames(mut writer: FrameWriter, mut frames: mpsc::UnboundedReceiver<Arc<str>>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.send_text(&frame).await {
            tracing::debug!(conn = %writer.id(), error = %e, "write failed");
            return;
        }
    }
    if let Err(e) = writer.close().await {
        tracing::trace!(conn = %writer.id(), error = %e, "close failed");
    }
}

fn send_event(codec: &JsonCodec, outbox: &Outbox, event: &ServerEvent) {
    match codec.encode_text(event) {
        Ok(text) => {
            // A closed outbox means the writer already gave up on the socket.
            let _ = outbox.send(Arc::from(text));
        }
        Err(e) => tracing::warn!(event = event.name(), error = %e, "failed to encode event"),
    }
}

/// Sends `err` to the client as an `error` event, unless it is one they
/// don't need to hear about.
fn report(codec: &JsonCodec, outbox: &Outbox, err: &QuizError) {
    if err.is_silent() {
        tracing::debug!(error = %err, "ignored request");
        return;
    }
    send_event(
        codec,
        outbox,
        &ServerEvent::Error {
            code: err.code(),
            message: err.to_string(),
        },
    );
}

/// Default wait for the first frame.
pub(crate) const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default silence after which a connection is dropped. Clients heartbeat
/// well inside this.
pub(crate) const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
