pub mod adapter;
pub mod binary;
pub mod client;
pub mod config;
pub mod cors;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod http;
pub mod inproc;
pub mod ipc;
pub mod logging;
pub mod manager;
pub mod modules;
pub mod registry;
pub mod ws;

pub use adapter::{Adapter, AdapterState, BoundAddr, Transport};
pub use client::{BinaryClient, ClientError};
pub use config::{CliArgs, Config};
pub use endpoint::Endpoint;
pub use error::{ModuleError, Result, ServerError};
pub use inproc::InProcClient;
pub use manager::{AdapterStatus, Phase, TransportManager};
pub use modules::{HealthProbe, Module, ModuleDescriptor, ModuleResolver, RemoteProbe};
pub use registry::Registry;
