//! Listening socket, accept loop, and session registry
//!
//! The PBX opens a TCP connection for every call leg and only identifies it
//! in-band, with a UUID frame, after the connection is up. The application,
//! meanwhile, knows the UUID from call control before the connection exists.
//! [`AudioSocketServer::accept`] is the synchronization point between those
//! two racing events: it waits until the receive loop has registered the
//! stream and hands back the live [`Session`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ServerConfig, SessionConfig};
use crate::error::{ServerError, ServerResult};
use crate::session::Session;

/// Shared map from stream id (hyphenated UUID string) to live session.
///
/// Entries are added by each session's receive loop once the UUID frame
/// arrives, and never removed proactively; sessions that have closed are
/// pruned lazily the next time an insert happens.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, id: Uuid, session: Arc<Session>) {
        self.prune();
        let key = id.to_string();
        if self.sessions.insert(key.clone(), session).is_some() {
            warn!(stream_id = %key, "replacing an existing session registration");
        }
    }

    /// Look up a session by stream id.
    pub fn get(&self, stream_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(stream_id).map(|entry| entry.value().clone())
    }

    fn prune(&self) {
        self.sessions.retain(|_, session| session.is_connected());
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Owner of the listening socket and the session registry.
///
/// Explicitly constructed and explicitly owned: every instance is
/// independent, with its own listener and registry, so tests (and multiple
/// servers in one process) never interfere with each other.
pub struct AudioSocketServer {
    listener: Mutex<Option<Arc<TcpListener>>>,
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    config: ServerConfig,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl AudioSocketServer {
    /// Bind the listening socket and start accepting connections. Returns a
    /// fully operational server or the bind error; no partially-initialized
    /// state is observable.
    ///
    /// With `config.port == 0` the OS assigns an ephemeral port; read it
    /// back through [`local_addr`](Self::local_addr) to tell the PBX where
    /// to connect.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        let requested = SocketAddr::new(config.bind_addr, config.port);
        let listener = TcpListener::bind(requested)
            .await
            .map_err(|source| ServerError::Bind {
                addr: requested.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "AudioSocket listener bound");

        let listener = Arc::new(listener);
        let registry = Arc::new(SessionRegistry::new());
        let accept_task = tokio::spawn(Self::accept_loop(
            listener.clone(),
            registry.clone(),
            config.session.clone(),
        ));

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            registry,
            config,
            accept_task: Mutex::new(Some(accept_task)),
            closed: AtomicBool::new(false),
        })
    }

    async fn accept_loop(
        listener: Arc<TcpListener>,
        registry: Arc<SessionRegistry>,
        session_config: SessionConfig,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!(%peer_addr, "accepted AudioSocket connection");
                    Session::spawn_with_registry(
                        stream,
                        peer_addr,
                        session_config.clone(),
                        Some(Arc::downgrade(&registry)),
                    );
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The registry of identified sessions.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accept a single connection directly, bypassing the registry wait.
    /// The session still self-registers once its UUID frame arrives.
    pub async fn listen(&self) -> ServerResult<Arc<Session>> {
        let listener = self
            .listener
            .lock()
            .clone()
            .ok_or(ServerError::Closed)?;
        let (stream, peer_addr) = listener.accept().await?;
        Ok(Session::spawn_with_registry(
            stream,
            peer_addr,
            self.config.session.clone(),
            Some(Arc::downgrade(&self.registry)),
        ))
    }

    /// Wait for the session carrying `stream_id` to register and return it.
    ///
    /// The PBX opening the socket and the application asking for the call's
    /// audio race each other; this polls the registry with bounded backoff
    /// (never a busy spin) until the receive loop has filed the stream id,
    /// up to `config.accept_timeout`.
    pub async fn accept(&self, stream_id: &str) -> ServerResult<Arc<Session>> {
        let deadline = self.config.accept_timeout.map(|t| Instant::now() + t);
        let mut backoff = self.config.accept_poll_initial;
        loop {
            if let Some(session) = self.registry.get(stream_id) {
                return Ok(session);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(ServerError::AcceptTimeout {
                        stream_id: stream_id.to_string(),
                    });
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.accept_poll_max);
        }
    }

    /// Stop the accept loop and release the listening socket. Sessions that
    /// are already established keep running. Safe to call multiple times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        self.listener.lock().take();
        info!(local_addr = %self.local_addr, "AudioSocket listener closed");
    }
}

impl Drop for AudioSocketServer {
    fn drop(&mut self) {
        self.close();
    }
}
