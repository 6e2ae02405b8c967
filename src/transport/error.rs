//! Transport errors
//!
//! Every socket and context operation reports failure through
//! [`TransportError`], which records what was attempted, where, and from which
//! call site.

use std::fmt;
use std::panic::Location;
use thiserror::Error;

/// Broad classification of a transport failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Endpoint string could not be parsed
    InvalidEndpoint,
    /// Underlying socket I/O failed
    Io,
    /// Connect gave up waiting for the endpoint
    Timeout,
    /// The connected peer went away
    Disconnected,
    /// Operation not allowed in the socket's current state or pattern
    State,
    /// Message could not be serialized
    Encode,
    /// Payload could not be deserialized
    Decode,
}

/// Transport operation that failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Bind,
    Connect,
    Send,
    Recv,
    Close,
    Terminate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Bind => "bind",
            Operation::Connect => "connect",
            Operation::Send => "send",
            Operation::Recv => "recv",
            Operation::Close => "close",
            Operation::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

/// Failure raised by the transport layer
#[derive(Debug, Error)]
#[error("{operation} {endpoint} failed: {diagnostic} (at {site})")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub operation: Operation,
    pub endpoint: String,
    pub diagnostic: String,
    pub site: &'static Location<'static>,
}

impl TransportError {
    pub fn new(
        kind: ErrorKind,
        operation: Operation,
        endpoint: impl Into<String>,
        diagnostic: impl Into<String>,
        site: &'static Location<'static>,
    ) -> Self {
        Self {
            kind,
            operation,
            endpoint: endpoint.into(),
            diagnostic: diagnostic.into(),
            site,
        }
    }

    /// Wrap an I/O error
    pub fn io(
        operation: Operation,
        endpoint: impl Into<String>,
        err: std::io::Error,
        site: &'static Location<'static>,
    ) -> Self {
        Self::new(ErrorKind::Io, operation, endpoint, err.to_string(), site)
    }

    pub fn is_disconnect(&self) -> bool {
        self.kind == ErrorKind::Disconnected
    }
}
