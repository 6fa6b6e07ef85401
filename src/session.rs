//! Registry of live connections and the node identifiers bound to them.
//!
//! [`SessionRegistry`] is the sole owner of every [`Session`]. Other parts of
//! the router hold only a [`ConnectionId`] or a [`NodeId`] and look the session
//! up again whenever they need it, so a connection disappears from the whole
//! router the moment it is removed here.
//!
//! All three indices (by connection, by node id, and the active-connection
//! list used to build readiness sets) live behind one reader-writer lock that
//! is never held across I/O. Socket I/O is serialised separately by each
//! session's own lock, see [`Session::lock`].

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        OnceLock,
        PoisonError,
        RwLock,
        RwLockReadGuard,
        RwLockWriteGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{Mutex, MutexGuard, Notify},
};

use crate::frame::{MAX_NODE_ID, NodeId};

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Outcome of a non-blocking drain read.
#[derive(Debug)]
pub enum Drain {
    /// The buffer was filled completely.
    Complete,
    /// Some bytes arrived, then the socket ran dry before the buffer filled.
    Partial(usize),
    /// Nothing was available.
    Empty,
    /// The peer closed the connection.
    Closed,
    /// The socket reported a hard error.
    Failed(io::Error),
}

/// One accepted connection and the node id it has bound, if any.
#[derive(Debug)]
pub struct Session {
    handle: ConnectionId,
    peer_addr: Option<SocketAddr>,
    stream: TcpStream,
    node_id: OnceLock<NodeId>,
    io: Mutex<()>,
    armed: AtomicBool,
}

impl Session {
    fn new(handle: ConnectionId, stream: TcpStream, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            handle,
            peer_addr,
            stream,
            node_id: OnceLock::new(),
            io: Mutex::new(()),
            armed: AtomicBool::new(true),
        }
    }

    /// Connection handle of this session.
    #[must_use]
    pub fn handle(&self) -> ConnectionId { self.handle }

    /// Remote address captured at accept time.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }

    /// Bound node id, or `None` while awaiting the handshake.
    #[must_use]
    pub fn node_id(&self) -> Option<NodeId> { self.node_id.get().copied() }

    /// Whether a handshake has bound this session to a node id.
    #[must_use]
    pub fn is_bound(&self) -> bool { self.node_id.get().is_some() }

    /// Acquire exclusive I/O access to this connection.
    ///
    /// Every read drain and every send happens through the returned guard, so
    /// bytes from a read worker and a write worker can never interleave on one
    /// socket.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            _io: self.io.lock().await,
            stream: &self.stream,
        }
    }

    /// Wait until the socket has data (or an error) to report.
    pub(crate) async fn readable(&self) -> io::Result<()> { self.stream.readable().await }

    /// Mark the session as queued for a drain. Returns `false` if it already was.
    pub(crate) fn disarm(&self) -> bool { self.armed.swap(false, Ordering::AcqRel) }

    /// Make the session eligible for readiness waits again.
    pub(crate) fn rearm(&self) { self.armed.store(true, Ordering::Release); }

    pub(crate) fn is_armed(&self) -> bool { self.armed.load(Ordering::Acquire) }
}

/// Exclusive I/O access to one session's socket.
pub struct SessionGuard<'a> {
    _io: MutexGuard<'a, ()>,
    stream: &'a TcpStream,
}

impl SessionGuard<'_> {
    /// Read without blocking until `buf` is full or the socket runs dry.
    pub fn drain_read(&self, buf: &mut [u8]) -> Drain {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.try_read(&mut buf[filled..]) {
                Ok(0) => return Drain::Closed,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return if filled == 0 {
                        Drain::Empty
                    } else {
                        Drain::Partial(filled)
                    };
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Drain::Failed(e),
            }
        }
        Drain::Complete
    }

    /// Send all of `payload`, waiting for the socket to accept it.
    ///
    /// # Errors
    ///
    /// Returns the socket error, or [`io::ErrorKind::WriteZero`] if the socket
    /// stops accepting bytes before the payload is written.
    pub async fn send_all(&self, payload: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < payload.len() {
            self.stream.writable().await?;
            match self.stream.try_write(&payload[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short send: {written} of {} bytes", payload.len()),
                    ));
                }
                Ok(n) => written += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Limits applied when binding node ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Highest node id accepted by [`SessionRegistry::bind`].
    pub max_node_id: u16,
    /// Maximum number of simultaneously bound node ids.
    pub capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_node_id: MAX_NODE_ID,
            capacity: usize::from(MAX_NODE_ID),
        }
    }
}

/// Reasons a bind request was rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    /// No session exists for the handle.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    /// The node id exceeds the configured maximum.
    #[error("node id {id} exceeds maximum {max}")]
    IdOutOfRange {
        /// Requested id.
        id: NodeId,
        /// Configured maximum.
        max: u16,
    },
    /// Every node id slot is in use.
    #[error("registry full: {0} node ids bound")]
    CapacityExceeded(usize),
    /// The session already completed a handshake.
    #[error("connection already bound to node {0}")]
    AlreadyBound(NodeId),
}

#[derive(Default)]
struct Indices {
    by_handle: HashMap<ConnectionId, Arc<Session>>,
    by_node: HashMap<NodeId, ConnectionId>,
    active: Vec<ConnectionId>,
}

/// Concurrent registry of sessions keyed by [`ConnectionId`] and [`NodeId`].
pub struct SessionRegistry {
    indices: RwLock<Indices>,
    next_handle: AtomicU64,
    config: RegistryConfig,
    changed: Notify,
}

impl Default for SessionRegistry {
    fn default() -> Self { Self::new(RegistryConfig::default()) }
}

impl SessionRegistry {
    /// Create an empty registry with the given limits.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            indices: RwLock::new(Indices::default()),
            next_handle: AtomicU64::new(1),
            config,
            changed: Notify::new(),
        }
    }

    /// Limits this registry enforces.
    #[must_use]
    pub fn config(&self) -> RegistryConfig { self.config }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a freshly accepted connection as an unbound session.
    pub fn register(&self, stream: TcpStream, peer_addr: Option<SocketAddr>) -> ConnectionId {
        let handle = ConnectionId::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.register_as(handle, stream, peer_addr);
        handle
    }

    /// Register `stream` under an explicit handle, evicting any session that
    /// already used it.
    pub(crate) fn register_as(
        &self,
        handle: ConnectionId,
        stream: TcpStream,
        peer_addr: Option<SocketAddr>,
    ) {
        let session = Arc::new(Session::new(handle, stream, peer_addr));
        let mut indices = self.write();
        if indices.by_handle.contains_key(&handle) {
            Self::evict(&mut indices, handle);
        }
        indices.by_handle.insert(handle, session);
        indices.active.push(handle);
    }

    /// Bind `handle` to `id`.
    ///
    /// A newer bind of an id already held by another connection replaces the
    /// id mapping; the earlier connection stays registered and open but can no
    /// longer be reached by id. Returns the displaced connection, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`BindError`] if the handle is unknown or already bound, the
    /// id exceeds the configured maximum, or every id slot is taken.
    pub fn bind(&self, handle: ConnectionId, id: NodeId) -> Result<Option<ConnectionId>, BindError> {
        if id.get() > self.config.max_node_id {
            return Err(BindError::IdOutOfRange {
                id,
                max: self.config.max_node_id,
            });
        }
        let mut indices = self.write();
        let session = indices
            .by_handle
            .get(&handle)
            .cloned()
            .ok_or(BindError::UnknownConnection(handle))?;
        if let Some(existing) = session.node_id() {
            return Err(BindError::AlreadyBound(existing));
        }
        if !indices.by_node.contains_key(&id) && indices.by_node.len() >= self.config.capacity {
            return Err(BindError::CapacityExceeded(indices.by_node.len()));
        }
        // Binds only happen under the write lock, so the cell is still empty.
        let _ = session.node_id.set(id);
        Ok(indices
            .by_node
            .insert(id, handle)
            .filter(|previous| *previous != handle))
    }

    /// Look up a session by connection handle.
    #[must_use]
    pub fn find_by_handle(&self, handle: ConnectionId) -> Option<Arc<Session>> {
        self.read().by_handle.get(&handle).cloned()
    }

    /// Look up the session currently bound to `id`.
    #[must_use]
    pub fn find_by_id(&self, id: NodeId) -> Option<Arc<Session>> {
        let indices = self.read();
        let handle = indices.by_node.get(&id)?;
        indices.by_handle.get(handle).cloned()
    }

    /// Remove a session, its id binding, and its active-list entry.
    ///
    /// The id binding is only dropped if it still points at this connection.
    /// The socket closes once the last in-flight user of the session lets go.
    pub fn remove(&self, handle: ConnectionId) -> Option<Arc<Session>> {
        let removed = Self::evict(&mut self.write(), handle);
        self.changed.notify_one();
        removed
    }

    fn evict(indices: &mut Indices, handle: ConnectionId) -> Option<Arc<Session>> {
        let session = indices.by_handle.remove(&handle);
        if let Some(id) = session.as_ref().and_then(|s| s.node_id())
            && indices.by_node.get(&id) == Some(&handle)
        {
            indices.by_node.remove(&id);
        }
        if let Some(pos) = indices.active.iter().position(|h| *h == handle) {
            indices.active.swap_remove(pos);
        }
        session
    }

    /// Snapshot of every registered connection handle.
    #[must_use]
    pub fn active_handles(&self) -> Vec<ConnectionId> { self.read().active.clone() }

    /// Sessions that should be part of the next readiness wait.
    ///
    /// Sessions already queued for a drain are left out until a read worker
    /// re-arms them.
    pub(crate) fn armed_sessions(&self) -> Vec<Arc<Session>> {
        let indices = self.read();
        indices
            .active
            .iter()
            .filter_map(|handle| indices.by_handle.get(handle))
            .filter(|session| session.is_armed())
            .cloned()
            .collect()
    }

    /// Re-arm a drained session and wake the readiness wait.
    pub(crate) fn rearm(&self, session: &Session) {
        session.rearm();
        self.changed.notify_one();
    }

    /// Resolves after the set of sessions to wait on may have changed.
    pub(crate) async fn changed(&self) { self.changed.notified().await; }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize { self.read().by_handle.len() }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.read().by_handle.is_empty() }

    /// Number of bound node ids.
    #[must_use]
    pub fn bound_count(&self) -> usize { self.read().by_node.len() }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};
    use tokio::{io::AsyncWriteExt, time::timeout};

    use super::*;
    use crate::test_util::loopback_pair;

    #[fixture]
    fn registry() -> SessionRegistry { SessionRegistry::default() }

    fn id(value: u16) -> NodeId { NodeId::new(value).expect("id in range") }

    async fn register(registry: &SessionRegistry) -> (ConnectionId, TcpStream) {
        let (server, client) = loopback_pair().await;
        (registry.register(server, None), client)
    }

    #[rstest]
    #[tokio::test]
    async fn registered_sessions_start_unbound(registry: SessionRegistry) {
        let (handle, _client) = register(&registry).await;
        let session = registry.find_by_handle(handle).expect("session");
        assert!(!session.is_bound());
        assert_eq!(registry.active_handles(), vec![handle]);
    }

    #[rstest]
    #[tokio::test]
    async fn bind_makes_session_reachable_by_id(registry: SessionRegistry) {
        let (handle, _client) = register(&registry).await;
        assert_eq!(registry.bind(handle, id(7)), Ok(None));
        let session = registry.find_by_id(id(7)).expect("bound");
        assert_eq!(session.handle(), handle);
        assert_eq!(session.node_id(), Some(id(7)));
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_bind_keeps_earlier_connection_open(registry: SessionRegistry) {
        let (first, _c1) = register(&registry).await;
        let (second, _c2) = register(&registry).await;
        registry.bind(first, id(4)).expect("first bind");
        assert_eq!(registry.bind(second, id(4)), Ok(Some(first)));

        let by_id = registry.find_by_id(id(4)).expect("bound");
        assert_eq!(by_id.handle(), second);
        assert!(registry.find_by_handle(first).is_some());
        assert_eq!(registry.bound_count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn removing_displaced_connection_keeps_newer_binding(registry: SessionRegistry) {
        let (first, _c1) = register(&registry).await;
        let (second, _c2) = register(&registry).await;
        registry.bind(first, id(4)).expect("first bind");
        registry.bind(second, id(4)).expect("second bind");

        registry.remove(first);
        assert_eq!(registry.find_by_id(id(4)).map(|s| s.handle()), Some(second));
    }

    #[rstest]
    #[tokio::test]
    async fn remove_clears_every_index(registry: SessionRegistry) {
        let (handle, _client) = register(&registry).await;
        registry.bind(handle, id(9)).expect("bind");
        assert!(registry.remove(handle).is_some());
        assert!(registry.find_by_handle(handle).is_none());
        assert!(registry.find_by_id(id(9)).is_none());
        assert!(registry.active_handles().is_empty());
        assert!(registry.remove(handle).is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn bind_rejects_unknown_and_rebound_handles(registry: SessionRegistry) {
        let ghost = ConnectionId::new(999);
        assert_eq!(
            registry.bind(ghost, id(1)),
            Err(BindError::UnknownConnection(ghost))
        );

        let (handle, _client) = register(&registry).await;
        registry.bind(handle, id(1)).expect("bind");
        assert_eq!(
            registry.bind(handle, id(2)),
            Err(BindError::AlreadyBound(id(1)))
        );
        assert!(registry.find_by_id(id(2)).is_none());
    }

    #[tokio::test]
    async fn bind_enforces_limits() {
        let registry = SessionRegistry::new(RegistryConfig {
            max_node_id: 10,
            capacity: 1,
        });
        let (a, _ca) = register(&registry).await;
        let (b, _cb) = register(&registry).await;

        assert!(matches!(
            registry.bind(a, id(11)),
            Err(BindError::IdOutOfRange { max: 10, .. })
        ));
        registry.bind(a, id(1)).expect("first slot");
        assert_eq!(registry.bind(b, id(2)), Err(BindError::CapacityExceeded(1)));
        assert!(!registry.find_by_handle(b).expect("still registered").is_bound());
    }

    #[rstest]
    #[tokio::test]
    async fn register_as_evicts_previous_session(registry: SessionRegistry) {
        let (first, _c1) = loopback_pair().await;
        let (second, _c2) = loopback_pair().await;
        let handle = ConnectionId::new(50);

        registry.register_as(handle, first, None);
        registry.bind(handle, id(3)).expect("bind");
        registry.register_as(handle, second, None);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active_handles(), vec![handle]);
        assert!(registry.find_by_id(id(3)).is_none());
        assert!(!registry.find_by_handle(handle).expect("session").is_bound());
    }

    #[rstest]
    #[tokio::test]
    async fn disarmed_sessions_are_not_waited_on(registry: SessionRegistry) {
        let (a, _ca) = register(&registry).await;
        let (b, _cb) = register(&registry).await;
        let session = registry.find_by_handle(a).expect("session");
        assert!(session.disarm());
        assert!(!session.disarm());

        let armed: Vec<_> = registry.armed_sessions().iter().map(|s| s.handle()).collect();
        assert_eq!(armed, vec![b]);

        registry.rearm(&session);
        timeout(Duration::from_secs(1), registry.changed())
            .await
            .expect("rearm wakes waiters");
        assert_eq!(registry.armed_sessions().len(), 2);
    }

    async fn next_drain(session: &Session, buf: &mut [u8]) -> Drain {
        loop {
            session.readable().await.expect("readable");
            match session.lock().await.drain_read(buf) {
                Drain::Empty => {}
                other => return other,
            }
        }
    }

    #[rstest]
    #[tokio::test]
    async fn drain_read_reports_partial_and_empty(registry: SessionRegistry) {
        let (handle, mut client) = register(&registry).await;
        let session = registry.find_by_handle(handle).expect("session");
        let mut buf = [0; 32];

        assert!(matches!(session.lock().await.drain_read(&mut buf), Drain::Empty));

        client.write_all(b"003").await.expect("write");
        assert!(matches!(
            next_drain(&session, &mut buf[..3]).await,
            Drain::Complete
        ));
        assert_eq!(&buf[..3], b"003");

        client.write_all(b"0052210").await.expect("write");
        assert!(matches!(
            next_drain(&session, &mut buf).await,
            Drain::Partial(7)
        ));

        drop(client);
        assert!(matches!(next_drain(&session, &mut buf).await, Drain::Closed));
    }
}
