//! tamer-core - profile-scoped supervisor lifecycle management.
//!
//! This crate holds everything between the `tamer` CLI and a remote process
//! supervisor:
//!
//! - [`registry`]: durable per-profile endpoint allocation
//! - [`supervisor`]: the request/response RPC client and wire types
//! - [`watcher`]: pure builders for supervisor watcher definitions
//! - [`tamer`]: the [`DaemonTamer`](tamer::DaemonTamer) orchestrator
//! - [`config`]: the TOML configuration file

pub mod config;
pub mod registry;
pub mod supervisor;
pub mod tamer;
pub mod watcher;

pub use config::{ConfigError, TamerConfig};
pub use registry::{EndpointRegistry, ProfileEndpoint, RegistryError};
pub use supervisor::{Supervisor, SupervisorError, TcpSupervisorClient};
pub use tamer::{DaemonStatus, DaemonTamer, QuitOutcome, TamerError, WatcherState};
pub use watcher::{WatcherBuilder, WatcherError, WatcherSpec};
