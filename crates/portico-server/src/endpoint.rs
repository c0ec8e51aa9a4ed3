//! Listen-address parsing: `scheme://host:port` or `scheme://path`.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, ServerError};

/// A parsed listen address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://`, `http://` or `ws://` with a mandatory port
    Tcp { scheme: String, authority: String },
    /// `unix://` or `ipc://` socket path
    Unix { scheme: String, path: PathBuf },
}

impl Endpoint {
    /// Parses an address. Empty input is not an address; callers treat it as
    /// "transport disabled" before getting here.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| invalid(raw, "missing scheme separator \"://\""))?;
        let scheme = scheme.to_ascii_lowercase();

        match scheme.as_str() {
            "tcp" | "http" | "ws" => {
                let authority = rest.strip_suffix('/').unwrap_or(rest);
                if authority.is_empty() {
                    return Err(invalid(raw, "empty host:port"));
                }
                if authority.contains('/') {
                    return Err(invalid(raw, "unexpected path after host:port"));
                }
                let (host, port) = authority
                    .rsplit_once(':')
                    .ok_or_else(|| invalid(raw, "missing port"))?;
                if host.is_empty() {
                    return Err(invalid(raw, "empty host"));
                }
                port.parse::<u16>()
                    .map_err(|_| invalid(raw, "port is not a number in 0-65535"))?;
                Ok(Endpoint::Tcp {
                    scheme,
                    authority: authority.to_string(),
                })
            }
            "unix" | "ipc" => {
                if rest.is_empty() {
                    return Err(invalid(raw, "empty socket path"));
                }
                Ok(Endpoint::Unix {
                    scheme,
                    path: PathBuf::from(rest),
                })
            }
            other => Err(invalid(raw, &format!("unsupported scheme {:?}", other))),
        }
    }

    /// Parses an optional address; empty means the transport is disabled
    pub fn parse_optional(raw: &str) -> Result<Option<Self>> {
        if raw.trim().is_empty() {
            Ok(None)
        } else {
            Self::parse(raw).map(Some)
        }
    }

    pub fn scheme(&self) -> &str {
        match self {
            Endpoint::Tcp { scheme, .. } | Endpoint::Unix { scheme, .. } => scheme,
        }
    }

    /// `host:port` for TCP, the socket path for Unix sockets
    pub fn address(&self) -> String {
        match self {
            Endpoint::Tcp { authority, .. } => authority.clone(),
            Endpoint::Unix { path, .. } => path.display().to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.address())
    }
}

fn invalid(raw: &str, reason: &str) -> ServerError {
    ServerError::Config(format!("invalid address {:?}: {}", raw, reason))
}
