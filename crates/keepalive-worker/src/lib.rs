//! Worker client runtime: holds one connection to a remote target open and
//! reconnects at most once before giving up.
//!
//! The supervisor only looks at how this process exits, see
//! [`keepalive_core::worker`].

pub mod args;
pub mod connector;
pub mod runtime;

pub use args::WorkerArgs;
pub use connector::{ConnectError, Connector, Disconnect, Session, TcpConnector};
pub use runtime::{run, RuntimeConfig};
