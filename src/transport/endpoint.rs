//! Endpoint addresses
//!
//! `ipc://<path>` maps to a Unix domain socket, `tcp://<host>:<port>` to a TCP
//! socket.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

const IPC_SCHEME: &str = "ipc://";
const TCP_SCHEME: &str = "tcp://";

/// Parsed transport endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Ipc(PathBuf),
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix(IPC_SCHEME) {
            if path.is_empty() {
                return Err(format!("missing socket path in '{s}'"));
            }
            Ok(Endpoint::Ipc(PathBuf::from(path)))
        } else if let Some(addr) = s.strip_prefix(TCP_SCHEME) {
            match addr.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                    Ok(Endpoint::Tcp(addr.to_string()))
                }
                _ => Err(format!("expected tcp://<host>:<port>, got '{s}'")),
            }
        } else {
            Err(format!("unsupported endpoint scheme in '{s}'"))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Ipc(path) => write!(f, "{IPC_SCHEME}{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "{TCP_SCHEME}{addr}"),
        }
    }
}
