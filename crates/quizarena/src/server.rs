//! `QuizServer` builder and server loop.
//!
//! This is the entry point for running a QuizArena server. It ties together
//! all the layers: transport → protocol → hub → session registry.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quizarena_engine::{EngineConfig, QuestionSource, ScoringFunction, SessionRegistry};
use quizarena_protocol::JsonCodec;
use quizarena_tick::TimerConfig;

use crate::handler::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_IDLE_TIMEOUT, handle_connection};
use crate::transport::WebSocketTransport;
use crate::{Authenticator, BroadcastHub, LobbyDirectory, QuizError};

/// The registry type a [`QuizServer`] runs, with the hub as its gateway.
pub type QuizRegistry<Q, S, R> = SessionRegistry<Q, S, R, BroadcastHub>;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<Q, S, R, A> {
    pub(crate) registry: Arc<QuizRegistry<Q, S, R>>,
    pub(crate) hub: Arc<BroadcastHub>,
    pub(crate) auth: A,
    pub(crate) codec: JsonCodec,
    pub(crate) handshake_timeout: Duration,
    pub(crate) idle_timeout: Duration,
}

/// Builder for configuring and starting a QuizArena server.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use quizarena::dev::{InMemoryQuestionBank, InMemoryRoster, NumericTokenAuth, StreakScoring};
/// use quizarena::prelude::*;
///
/// # async fn run() -> Result<(), QuizError> {
/// let roster = InMemoryRoster::new(LobbySettings {
///     question_set_ids: vec!["general".into()],
///     question_count: 10,
/// });
/// let server = QuizServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(
///         NumericTokenAuth,
///         InMemoryQuestionBank::new(),
///         StreakScoring::default(),
///         Arc::new(roster),
///     )
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct QuizServerBuilder {
    bind_addr: String,
    engine_config: EngineConfig,
    handshake_timeout: Duration,
    idle_timeout: Duration,
}

impl QuizServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            engine_config: EngineConfig::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session engine configuration.
    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Sets the per-lobby timer configuration, keeping the rest of the
    /// engine configuration.
    pub fn timer_config(mut self, config: TimerConfig) -> Self {
        self.engine_config.timers = config;
        self
    }

    /// How long a new connection may take to send its handshake.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// How long a connection may stay silent before it is dropped.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Binds the listener and wires the collaborators into a registry.
    ///
    /// The roster is shared so the caller can keep seeding lobbies while the
    /// server runs.
    pub async fn build<Q, S, R, A>(
        self,
        auth: A,
        questions: Q,
        scoring: S,
        roster: Arc<R>,
    ) -> Result<QuizServer<Q, S, R, A>, QuizError>
    where
        Q: QuestionSource,
        S: ScoringFunction,
        R: LobbyDirectory,
        A: Authenticator,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let hub = Arc::new(BroadcastHub::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(questions),
            Arc::new(scoring),
            roster,
            Arc::clone(&hub),
            self.engine_config,
        ));

        let state = Arc::new(ServerState {
            registry,
            hub,
            auth,
            codec: JsonCodec,
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
        });

        Ok(QuizServer { transport, state })
    }
}

impl Default for QuizServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound QuizArena server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct QuizServer<Q, S, R, A> {
    transport: WebSocketTransport,
    state: Arc<ServerState<Q, S, R, A>>,
}

impl QuizServer<(), (), (), ()> {
    /// Creates a new builder.
    pub fn builder() -> QuizServerBuilder {
        QuizServerBuilder::new()
    }
}

impl<Q, S, R, A> QuizServer<Q, S, R, A>
where
    Q: QuestionSource,
    S: ScoringFunction,
    R: LobbyDirectory,
    A: Authenticator,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, QuizError> {
        Ok(self.transport.local_addr()?)
    }

    /// The session registry, for queries and server-side control.
    pub fn registry(&self) -> &Arc<QuizRegistry<Q, S, R>> {
        &self.state.registry
    }

    /// The lobby channels the registry broadcasts through.
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.state.hub
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), QuizError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then tears down every
    /// session.
    ///
    /// Connections already open keep their handler tasks; they see
    /// `NoActiveSession` from then on.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), QuizError> {
        tracing::info!(addr = ?self.transport.local_addr().ok(), "QuizArena server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("shutting down");
        self.state.registry.cleanup_all().await;
        Ok(())
    }
}
