//! Message sockets
//!
//! A [`Socket`] is one end of a framed, message-oriented connection. Bound
//! sockets accept any number of peers; connected sockets talk to exactly one.
//! Incoming frames from every peer are funnelled into a single inbox by
//! background reader tasks, which is what makes the non-blocking receive
//! possible.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::endpoint::Endpoint;
use super::error::{ErrorKind, Operation, TransportError};
use super::frame;

/// Pause between connection attempts while the endpoint is not up yet
const CONNECT_RETRY: Duration = Duration::from_millis(25);

pub type SocketId = u64;
type PeerId = u64;
type Writer = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type Site = &'static Location<'static>;

/// Communication pattern of a socket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketType {
    /// Send a request, then wait for its reply
    Request,
    /// Receive a request, then answer the peer that sent it
    Reply,
    /// Send-only, round-robin across peers
    Push,
    /// Receive-only, fair-queued from all peers
    Pull,
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketType::Request => "request",
            SocketType::Reply => "reply",
            SocketType::Push => "push",
            SocketType::Pull => "pull",
        };
        f.write_str(name)
    }
}

/// Whether a socket reached its endpoint by connecting or by binding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Connected,
    Bound,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Connected => f.write_str("connected"),
            Role::Bound => f.write_str("bound"),
        }
    }
}

enum Inbound {
    Frame { peer: PeerId, payload: Vec<u8> },
    Closed { peer: PeerId },
}

#[derive(Default)]
struct Peers {
    next_id: PeerId,
    writers: BTreeMap<PeerId, Writer>,
}

impl Peers {
    fn add(&mut self, writer: Writer) -> PeerId {
        let id = self.next_id;
        self.next_id += 1;
        self.writers.insert(id, writer);
        id
    }
}

/// State shared between a socket, its background tasks and the context
/// tracking it
pub(crate) struct Shared {
    closed: AtomicBool,
    peers: Mutex<Peers>,
    tasks: Mutex<Vec<AbortHandle>>,
    ipc_path: Mutex<Option<PathBuf>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            peers: Mutex::new(Peers::default()),
            tasks: Mutex::new(Vec::new()),
            ipc_path: Mutex::new(None),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn track(&self, handle: AbortHandle) {
        let mut tasks = lock(&self.tasks);
        if self.is_closed() {
            handle.abort();
        } else {
            tasks.push(handle);
        }
    }

    /// Stop background I/O, drop every connection and remove the socket file
    /// of a bound `ipc://` endpoint. Returns `false` if already shut down.
    pub(crate) fn shutdown(&self) -> io::Result<bool> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        for handle in lock(&self.tasks).drain(..) {
            handle.abort();
        }
        lock(&self.peers).writers.clear();

        if let Some(path) = lock(&self.ipc_path).take() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        Ok(true)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Register a new peer stream: its write half goes into the peer table, its
/// read half is drained into the inbox by a background task.
fn attach<S>(stream: S, shared: &Arc<Shared>, inbox: &mpsc::UnboundedSender<Inbound>) -> PeerId
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
    let writer: Writer = Arc::new(tokio::sync::Mutex::new(writer));
    let peer = lock(&shared.peers).add(writer);

    let handle = tokio::spawn(read_loop(reader, peer, Arc::clone(shared), inbox.clone()));
    shared.track(handle.abort_handle());
    peer
}

async fn read_loop<R>(
    mut reader: R,
    peer: PeerId,
    shared: Arc<Shared>,
    inbox: mpsc::UnboundedSender<Inbound>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match frame::read_frame(&mut reader).await {
            Ok(Some(payload)) => {
                if inbox.send(Inbound::Frame { peer, payload }).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(peer, error = %e, "Peer read failed");
                break;
            }
        }
    }

    lock(&shared.peers).writers.remove(&peer);
    let _ = inbox.send(Inbound::Closed { peer });
}

enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

async fn accept_loop(
    listener: Listener,
    shared: Arc<Shared>,
    inbox: mpsc::UnboundedSender<Inbound>,
    endpoint: String,
) {
    loop {
        let accepted = match &listener {
            Listener::Unix(l) => l.accept().await.map(|(s, _)| attach(s, &shared, &inbox)),
            Listener::Tcp(l) => l.accept().await.map(|(s, _)| {
                let _ = s.set_nodelay(true);
                attach(s, &shared, &inbox)
            }),
        };

        match accepted {
            Ok(peer) => debug!(endpoint = %endpoint, peer, "Accepted connection"),
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Accept failed");
                tokio::time::sleep(CONNECT_RETRY).await;
            }
        }
    }
}

fn open_listener(endpoint: &Endpoint) -> io::Result<Listener> {
    match endpoint {
        Endpoint::Ipc(path) => {
            remove_stale_socket(path)?;
            UnixListener::bind(path).map(Listener::Unix)
        }
        Endpoint::Tcp(addr) => {
            let listener = std::net::TcpListener::bind(addr.as_str())?;
            listener.set_nonblocking(true)?;
            TcpListener::from_std(listener).map(Listener::Tcp)
        }
    }
}

/// Only ever removes socket files, anything else is left for bind to reject
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn is_not_ready(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}

fn is_peer_gone(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// One end of a message connection
pub struct Socket {
    id: SocketId,
    kind: SocketType,
    role: Option<Role>,
    endpoint: Option<Endpoint>,
    verbose: bool,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    reply_to: Option<PeerId>,
    awaiting_reply: bool,
    cursor: usize,
}

impl Socket {
    pub(crate) fn new(
        id: SocketId,
        kind: SocketType,
        verbose: bool,
        connect_timeout: Duration,
    ) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        Self {
            id,
            kind,
            role: None,
            endpoint: None,
            verbose,
            connect_timeout,
            shared: Arc::new(Shared::new()),
            inbox_tx,
            inbox,
            reply_to: None,
            awaiting_reply: false,
            cursor: 0,
        }
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn kind(&self) -> SocketType {
        self.kind
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    fn target(&self) -> String {
        self.endpoint
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<unattached>".to_string())
    }

    /// `"bound ipc://dispatch"` style label for traces
    fn label(&self) -> String {
        match self.role {
            Some(role) => format!("{} {role} {}", self.kind, self.target()),
            None => format!("{} {}", self.kind, self.target()),
        }
    }

    fn error(
        &self,
        kind: ErrorKind,
        operation: Operation,
        diagnostic: impl Into<String>,
        site: Site,
    ) -> TransportError {
        TransportError::new(kind, operation, self.target(), diagnostic, site)
    }

    fn claim(&self, operation: Operation, endpoint: &str, site: Site) -> Result<Endpoint, TransportError> {
        if self.is_closed() {
            return Err(TransportError::new(
                ErrorKind::State,
                operation,
                endpoint,
                "socket is closed",
                site,
            ));
        }
        if let Some(role) = self.role {
            return Err(TransportError::new(
                ErrorKind::State,
                operation,
                endpoint,
                format!("socket is already {role} to {}", self.target()),
                site,
            ));
        }
        endpoint.parse().map_err(|diagnostic: String| {
            TransportError::new(ErrorKind::InvalidEndpoint, operation, endpoint, diagnostic, site)
        })
    }

    /// Bind to `endpoint` and start accepting peers
    #[track_caller]
    pub fn bind(&mut self, endpoint: &str) -> Result<(), TransportError> {
        self.bind_at(endpoint, Location::caller())
    }

    pub(crate) fn bind_at(&mut self, endpoint: &str, site: Site) -> Result<(), TransportError> {
        let parsed = self.claim(Operation::Bind, endpoint, site)?;
        let listener =
            open_listener(&parsed).map_err(|e| TransportError::io(Operation::Bind, endpoint, e, site))?;

        if let Endpoint::Ipc(path) = &parsed {
            *lock(&self.shared.ipc_path) = Some(path.clone());
        }

        let handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            self.inbox_tx.clone(),
            endpoint.to_string(),
        ));
        self.shared.track(handle.abort_handle());

        self.role = Some(Role::Bound);
        self.endpoint = Some(parsed);
        if self.verbose {
            debug!("bind {}", self.label());
        }
        Ok(())
    }

    /// Connect to `endpoint`, waiting up to the connect timeout for it to
    /// come up
    #[track_caller]
    pub fn connect<'a>(
        &'a mut self,
        endpoint: &'a str,
    ) -> impl Future<Output = Result<(), TransportError>> + 'a {
        self.connect_at(endpoint, Location::caller())
    }

    pub(crate) async fn connect_at(&mut self, endpoint: &str, site: Site) -> Result<(), TransportError> {
        let parsed = self.claim(Operation::Connect, endpoint, site)?;
        let deadline = Instant::now() + self.connect_timeout;

        let peer = loop {
            match self.open_stream(&parsed).await {
                Ok(peer) => break peer,
                Err(e) if is_not_ready(&e) && Instant::now() < deadline => {
                    tokio::time::sleep(CONNECT_RETRY).await;
                }
                Err(e) if is_not_ready(&e) => {
                    return Err(TransportError::new(
                        ErrorKind::Timeout,
                        Operation::Connect,
                        endpoint,
                        format!("endpoint not available after {:?}: {e}", self.connect_timeout),
                        site,
                    ));
                }
                Err(e) => return Err(TransportError::io(Operation::Connect, endpoint, e, site)),
            }
        };

        self.role = Some(Role::Connected);
        self.endpoint = Some(parsed);
        if self.verbose {
            debug!(peer, "connect {}", self.label());
        }
        Ok(())
    }

    async fn open_stream(&self, endpoint: &Endpoint) -> io::Result<PeerId> {
        match endpoint {
            Endpoint::Ipc(path) => {
                let stream = UnixStream::connect(path).await?;
                Ok(attach(stream, &self.shared, &self.inbox_tx))
            }
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(attach(stream, &self.shared, &self.inbox_tx))
            }
        }
    }

    /// Pick the peer the next outgoing message goes to
    fn route(&mut self, site: Site) -> Result<PeerId, TransportError> {
        if self.is_closed() {
            return Err(self.error(ErrorKind::State, Operation::Send, "socket is closed", site));
        }
        if self.role.is_none() {
            return Err(self.error(
                ErrorKind::State,
                Operation::Send,
                "socket is neither bound nor connected",
                site,
            ));
        }

        match self.kind {
            SocketType::Pull => Err(self.error(
                ErrorKind::State,
                Operation::Send,
                "pull sockets cannot send",
                site,
            )),
            SocketType::Reply => self.reply_to.ok_or_else(|| {
                self.error(ErrorKind::State, Operation::Send, "no request is waiting for a reply", site)
            }),
            SocketType::Request if self.awaiting_reply => Err(self.error(
                ErrorKind::State,
                Operation::Send,
                "previous request has not been answered",
                site,
            )),
            SocketType::Request | SocketType::Push => {
                let next = {
                    let peers = lock(&self.shared.peers);
                    if peers.writers.is_empty() {
                        None
                    } else {
                        let index = self.cursor % peers.writers.len();
                        peers.writers.keys().nth(index).copied()
                    }
                };
                self.cursor = self.cursor.wrapping_add(1);
                next.ok_or_else(|| {
                    self.error(ErrorKind::Disconnected, Operation::Send, "no connected peers", site)
                })
            }
        }
    }

    /// Serialize and transmit `message`, handing it back on success
    #[track_caller]
    pub fn send<'a, T>(&'a mut self, message: T) -> impl Future<Output = Result<T, TransportError>> + 'a
    where
        T: Serialize + fmt::Debug + 'a,
    {
        let site = Location::caller();
        async move {
            let peer = self.route(site)?;
            let payload = serde_json::to_vec(&message)
                .map_err(|e| self.error(ErrorKind::Encode, Operation::Send, e.to_string(), site))?;

            let writer = lock(&self.shared.peers).writers.get(&peer).cloned();
            let writer = writer.ok_or_else(|| {
                self.error(ErrorKind::Disconnected, Operation::Send, "peer disconnected", site)
            })?;

            let written = {
                let mut writer = writer.lock().await;
                frame::write_frame(&mut **writer, &payload).await
            };
            if let Err(e) = written {
                lock(&self.shared.peers).writers.remove(&peer);
                let kind = if is_peer_gone(&e) {
                    ErrorKind::Disconnected
                } else {
                    ErrorKind::Io
                };
                return Err(TransportError::new(kind, Operation::Send, self.target(), e.to_string(), site));
            }

            match self.kind {
                SocketType::Request => self.awaiting_reply = true,
                SocketType::Reply => self.reply_to = None,
                SocketType::Push | SocketType::Pull => {}
            }

            if self.verbose {
                debug!("{} send {:?}", self.label(), message);
            }
            Ok(message)
        }
    }

    fn check_recv(&self, site: Site) -> Result<(), TransportError> {
        let problem = if self.is_closed() {
            Some("socket is closed")
        } else if self.role.is_none() {
            Some("socket is neither bound nor connected")
        } else if self.kind == SocketType::Push {
            Some("push sockets cannot receive")
        } else if self.kind == SocketType::Request && !self.awaiting_reply {
            Some("no request is waiting for a reply")
        } else {
            None
        };

        match problem {
            Some(diagnostic) => Err(self.error(ErrorKind::State, Operation::Recv, diagnostic, site)),
            None => Ok(()),
        }
    }

    /// Turn an inbox event into a message. Peer departures yield `None` on
    /// bound sockets and an error on connected ones.
    fn accept<T>(&mut self, inbound: Inbound, site: Site) -> Result<Option<T>, TransportError>
    where
        T: DeserializeOwned + fmt::Debug,
    {
        match inbound {
            Inbound::Closed { peer } => {
                if self.reply_to == Some(peer) {
                    self.reply_to = None;
                }
                if self.role == Some(Role::Connected) {
                    return Err(self.error(
                        ErrorKind::Disconnected,
                        Operation::Recv,
                        "peer closed the connection",
                        site,
                    ));
                }
                if self.verbose {
                    debug!(peer, "{} peer left", self.label());
                }
                Ok(None)
            }
            Inbound::Frame { peer, payload } => {
                let message: T = serde_json::from_slice(&payload)
                    .map_err(|e| self.error(ErrorKind::Decode, Operation::Recv, e.to_string(), site))?;

                match self.kind {
                    SocketType::Request => self.awaiting_reply = false,
                    SocketType::Reply => self.reply_to = Some(peer),
                    SocketType::Push | SocketType::Pull => {}
                }

                if self.verbose {
                    debug!("{} recv {:?}", self.label(), message);
                }
                Ok(Some(message))
            }
        }
    }

    /// Wait for the next message
    #[track_caller]
    pub fn recv<'a, T>(&'a mut self) -> impl Future<Output = Result<T, TransportError>> + 'a
    where
        T: DeserializeOwned + fmt::Debug + 'a,
    {
        self.recv_at(Location::caller())
    }

    async fn recv_at<T>(&mut self, site: Site) -> Result<T, TransportError>
    where
        T: DeserializeOwned + fmt::Debug,
    {
        self.check_recv(site)?;
        loop {
            let inbound = self.inbox.recv().await;
            let inbound = inbound.ok_or_else(|| {
                self.error(ErrorKind::Disconnected, Operation::Recv, "transport shut down", site)
            })?;
            if let Some(message) = self.accept(inbound, site)? {
                return Ok(message);
            }
        }
    }

    /// Take the next queued message without waiting; `Ok(None)` when nothing
    /// is queued
    #[track_caller]
    pub fn try_recv<T>(&mut self) -> Result<Option<T>, TransportError>
    where
        T: DeserializeOwned + fmt::Debug,
    {
        self.try_recv_at(Location::caller())
    }

    fn try_recv_at<T>(&mut self, site: Site) -> Result<Option<T>, TransportError>
    where
        T: DeserializeOwned + fmt::Debug,
    {
        self.check_recv(site)?;
        loop {
            match self.inbox.try_recv() {
                Ok(inbound) => {
                    if let Some(message) = self.accept(inbound, site)? {
                        return Ok(Some(message));
                    }
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    return Err(self.error(
                        ErrorKind::Disconnected,
                        Operation::Recv,
                        "transport shut down",
                        site,
                    ))
                }
            }
        }
    }

    /// Receive in blocking or polling mode
    #[track_caller]
    pub fn recv_mode<'a, T>(
        &'a mut self,
        block: bool,
    ) -> impl Future<Output = Result<Option<T>, TransportError>> + 'a
    where
        T: DeserializeOwned + fmt::Debug + 'a,
    {
        let site = Location::caller();
        async move {
            if block {
                self.recv_at(site).await.map(Some)
            } else {
                self.try_recv_at(site)
            }
        }
    }

    /// Shut the socket down. Closing twice is a no-op.
    #[track_caller]
    pub fn close(&mut self) -> Result<(), TransportError> {
        let site = Location::caller();
        let closed_now = self
            .shared
            .shutdown()
            .map_err(|e| TransportError::io(Operation::Close, self.target(), e, site))?;
        if closed_now && self.verbose {
            debug!("close {}", self.label());
        }
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if let Err(e) = self.shared.shutdown() {
            debug!(error = %e, "close {} on drop failed", self.label());
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("role", &self.role)
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}
