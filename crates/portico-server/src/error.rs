use portico_protocol::jsonrpc::{self, ErrorObject};
use portico_protocol::{Code, Status};
use thiserror::Error;

use crate::adapter::Transport;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("{transport} bind failed on {address}: {source}")]
    BindFailed {
        transport: Transport,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Module already registered: {0}")]
    DuplicateModule(String),

    #[error("Server not started")]
    NotStarted,

    #[error("Server already started")]
    AlreadyStarted,

    #[error("Server was stopped; create a new manager to restart")]
    ManagerStopped,

    #[error("Gateway could not dial binary-RPC endpoint {address}: {source}")]
    GatewayDial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{transport} shutdown: {message}")]
    Shutdown {
        transport: Transport,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Failure of a single module call. Never escapes the request it belongs to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("module {0} not found")]
    ModuleNotFound(String),

    #[error("method {0} not found")]
    MethodNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ModuleError {
    pub fn to_status(&self) -> Status {
        let code = match self {
            ModuleError::ModuleNotFound(_) => Code::NotFound,
            ModuleError::MethodNotFound(_) => Code::Unimplemented,
            ModuleError::InvalidArgument(_) => Code::InvalidArgument,
            ModuleError::Unavailable(_) => Code::Unavailable,
            ModuleError::Internal(_) => Code::Internal,
        };
        Status::new(code, self.to_string())
    }

    /// JSON-RPC error object for a call to `method`
    pub fn to_error_object(&self, method: &str) -> ErrorObject {
        match self {
            ModuleError::ModuleNotFound(_) | ModuleError::MethodNotFound(_) => {
                ErrorObject::method_not_found(method)
            }
            ModuleError::InvalidArgument(detail) => ErrorObject::invalid_params(detail),
            ModuleError::Unavailable(_) | ModuleError::Internal(_) => {
                ErrorObject::new(jsonrpc::SERVER_ERROR, self.to_string())
            }
        }
    }
}
