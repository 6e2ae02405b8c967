//! Message transport
//!
//! A [`Context`] is the per-process owner of every [`Socket`] it creates.
//! Each process entry point builds its own context; one is never carried
//! across a process boundary. Closing the context shuts every tracked socket
//! down and leaves the context empty, ready for reuse.

#![allow(dead_code)]

mod endpoint;
mod error;
mod frame;
mod socket;

pub use endpoint::Endpoint;
pub use error::{ErrorKind, Operation, TransportError};
pub use socket::{Socket, SocketType};

use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use socket::{Shared, SocketId};

/// Transport settings threaded into every socket
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Trace every bind, connect, send and recv at debug level
    pub verbose: bool,

    /// How long `connect` waits for the endpoint to come up
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Optional immediate attachment for a new socket
#[derive(Clone, Debug, Default)]
pub struct SocketOptions {
    pub connect: Option<String>,
    pub bind: Option<String>,
}

impl SocketOptions {
    pub fn connect(endpoint: impl Into<String>) -> Self {
        Self {
            connect: Some(endpoint.into()),
            bind: None,
        }
    }

    pub fn bind(endpoint: impl Into<String>) -> Self {
        Self {
            connect: None,
            bind: Some(endpoint.into()),
        }
    }
}

struct Tracked {
    id: SocketId,
    kind: SocketType,
    shared: Arc<Shared>,
}

/// Process-scoped socket factory and lifecycle owner
pub struct Context {
    config: TransportConfig,
    sockets: Vec<Tracked>,
    next_id: SocketId,
}

impl Context {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            sockets: Vec::new(),
            next_id: 0,
        }
    }

    /// Number of sockets created since construction or the last close
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Create a socket, optionally connecting or binding it straight away
    #[track_caller]
    pub fn socket<'a>(
        &'a mut self,
        kind: SocketType,
        options: SocketOptions,
    ) -> impl Future<Output = Result<Socket, TransportError>> + 'a {
        let site = Location::caller();
        async move {
            if let (Some(connect), Some(_)) = (&options.connect, &options.bind) {
                return Err(TransportError::new(
                    ErrorKind::State,
                    Operation::Connect,
                    connect.as_str(),
                    "a socket cannot both connect and bind",
                    site,
                ));
            }

            let id = self.next_id;
            self.next_id += 1;

            let mut socket = Socket::new(
                id,
                kind,
                self.config.verbose,
                self.config.connect_timeout,
            );
            self.sockets.push(Tracked {
                id,
                kind,
                shared: socket.shared(),
            });

            if let Some(endpoint) = &options.connect {
                socket.connect_at(endpoint, site).await?;
            }
            if let Some(endpoint) = &options.bind {
                socket.bind_at(endpoint, site)?;
            }
            Ok(socket)
        }
    }

    /// Close every tracked socket, then release the context. All sockets are
    /// attempted even if one fails; the first failure is reported.
    #[track_caller]
    pub fn close(&mut self) -> Result<(), TransportError> {
        let site = Location::caller();
        let count = self.socket_count();
        let mut failure = None;

        for tracked in self.sockets.drain(..) {
            if let Err(e) = tracked.shared.shutdown() {
                warn!(socket = tracked.id, kind = %tracked.kind, error = %e, "Failed to close socket");
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
        self.next_id = 0;

        if let Some(e) = failure {
            return Err(TransportError::io(Operation::Terminate, "context", e, site));
        }

        if self.config.verbose {
            debug!(sockets = count, "terminated context");
        }
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        for tracked in &self.sockets {
            let _ = tracked.shared.shutdown();
        }
    }
}
