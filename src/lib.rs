pub mod chain;
pub mod cloud;
pub mod config;
pub mod connect;
pub mod credential;
pub mod endpoint;
pub mod error;
pub mod ssh;
pub mod tunnel;
pub mod utils;

pub use chain::{ChainState, ConnectionChain, HopConnector, TerminalIo};
pub use cloud::{InstanceConnectApi, InstanceIdentity, InstanceInventory, InstanceRecord};
pub use config::HopConfig;
pub use connect::{run_chain, run_chain_with_terminal, run_tunnel, Completion, Connectivity};
pub use credential::{CredentialProvisioner, EphemeralCredential};
pub use endpoint::{Endpoint, TunnelTarget};
pub use error::{Error, ErrorKind, Result};
pub use tunnel::{RunningTunnel, TunnelManager};
