//! `ParleyServer` builder and accept loop.
//!
//! This is the entry point for running a Parley chat server. It ties
//! together the layers: transport → protocol → session → room.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parley_room::Registry;
use parley_session::{FileMuteStore, MemoryMuteStore, MutePolicy, MuteStore};
use parley_transport::{Connection, Transport, TransportError, WebSocketTransport};

use crate::config::{LimitsConfig, ServerConfig};
use crate::handler::handle_connection;
use crate::ParleyError;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<C: Connection> {
    pub(crate) registry: Arc<Registry<C>>,
    pub(crate) handshake_timeout: Duration,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) limits: LimitsConfig,
}

/// Builder for configuring and starting a Parley server.
///
/// # Example
///
/// ```rust,no_run
/// use parley::prelude::*;
///
/// # async fn start() -> Result<(), ParleyError> {
/// let server = ParleyServer::builder()
///     .bind("0.0.0.0:3000")
///     .mute_policy(MutePolicy::RecipientOnly)
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct ParleyServerBuilder {
    bind_addr: String,
    mute_policy: MutePolicy,
    mute_dir: Option<PathBuf>,
    mute_store: Option<Arc<dyn MuteStore>>,
    handshake_timeout: Duration,
    idle_timeout: Option<Duration>,
    limits: LimitsConfig,
}

impl ParleyServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::from_config(&ServerConfig::default())
    }

    /// Creates a builder that starts from `config`.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            bind_addr: config.bind_addr.clone(),
            mute_policy: config.mute_policy,
            mute_dir: config.mute_dir.clone(),
            mute_store: None,
            handshake_timeout: config.handshake_timeout(),
            idle_timeout: config.idle_timeout(),
            limits: config.limits,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn mute_policy(mut self, policy: MutePolicy) -> Self {
        self.mute_policy = policy;
        self
    }

    /// Persists mute lists as files under `dir`.
    pub fn mute_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mute_dir = Some(dir.into());
        self
    }

    /// Uses `store` for mute lists. Takes precedence over
    /// [`mute_dir`](Self::mute_dir).
    pub fn mute_store(mut self, store: Arc<dyn MuteStore>) -> Self {
        self.mute_store = Some(store);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Disconnects clients silent for `timeout`. `None` disables.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Binds a WebSocket listener and builds the server. The handshake
    /// timeout also bounds the WebSocket upgrade.
    pub async fn build(self) -> Result<ParleyServer<WebSocketTransport>, ParleyError> {
        let transport = WebSocketTransport::bind(&self.bind_addr)
            .await?
            .with_handshake_timeout(self.handshake_timeout);
        Ok(self.build_with_transport(transport))
    }

    /// Builds the server on an already constructed transport.
    pub fn build_with_transport<T: Transport>(self, transport: T) -> ParleyServer<T> {
        let store: Arc<dyn MuteStore> = match (self.mute_store, self.mute_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FileMuteStore::new(dir)),
            (None, None) => Arc::new(MemoryMuteStore::new()),
        };
        let state = Arc::new(ServerState {
            registry: Registry::new(store, self.mute_policy),
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
            limits: self.limits,
        });
        ParleyServer { transport, state }
    }
}

impl Default for ParleyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A Parley chat server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct ParleyServer<T: Transport> {
    transport: T,
    state: Arc<ServerState<T::Connection>>,
}

impl ParleyServer<WebSocketTransport> {
    /// Creates a new builder.
    pub fn builder() -> ParleyServerBuilder {
        ParleyServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }
}

impl<T> ParleyServer<T>
where
    T: Transport<Error = TransportError>,
    T::Connection: Connection<Error = TransportError>,
{
    /// The room registry shared by every connection.
    pub fn registry(&self) -> &Arc<Registry<T::Connection>> {
        &self.state.registry
    }

    /// Runs the accept loop until Ctrl-C.
    pub async fn run(self) -> Result<(), ParleyError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Runs the accept loop until `shutdown` completes or the transport
    /// stops producing connections, then disconnects every client.
    ///
    /// Each accepted connection gets its own handler task.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), ParleyError>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!("Parley server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => spawn_handler(conn, &self.state),
                    Err(TransportError::Shutdown) => {
                        tracing::info!("transport stopped accepting");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        self.state.registry.shutdown().await;
        self.transport.shutdown().await?;
        tracing::info!("Parley server stopped");
        Ok(())
    }
}

fn spawn_handler<C>(conn: C, state: &Arc<ServerState<C>>)
where
    C: Connection<Error = TransportError>,
{
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(e) = handle_connection(conn, state).await {
            tracing::debug!(error = %e, "connection ended with error");
        }
    });
}
