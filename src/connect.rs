// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Entry points used by front ends.
//!
//! A front end (CLI, daemon, test) builds a [`Connectivity`] from its cloud
//! clients and configuration, then calls [`run_chain`] or [`run_tunnel`] with
//! a cancellation token it triggers on interrupt.

use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chain::{ConnectionChain, HopAuthenticator, HopConnector, ShellOutcome, TerminalIo};
use crate::cloud::{InstanceConnectApi, InstanceInventory};
use crate::config::HopConfig;
use crate::credential::{Clock, CredentialProvisioner, SystemClock};
use crate::endpoint::{Endpoint, EndpointDefaults, TunnelTarget};
use crate::error::{Error, ErrorKind, Result};
use crate::ssh::{PtyRequest, RusshTransport, Transport};
use crate::tunnel::TunnelManager;

/// How a run ended without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The remote shell exited.
    Finished,
    /// The operator cancelled.
    Cancelled,
}

impl Completion {
    pub fn exit_code(self) -> i32 {
        match self {
            Completion::Finished => 0,
            Completion::Cancelled => 130,
        }
    }
}

/// Everything the connectivity layer needs from the outside world.
#[derive(Clone)]
pub struct Connectivity {
    transport: Arc<dyn Transport>,
    inventory: Arc<dyn InstanceInventory>,
    provisioner: CredentialProvisioner,
    config: HopConfig,
}

impl Connectivity {
    pub fn new(
        transport: Arc<dyn Transport>,
        inventory: Arc<dyn InstanceInventory>,
        api: Arc<dyn InstanceConnectApi>,
        clock: Arc<dyn Clock>,
        config: HopConfig,
    ) -> Self {
        let provisioner = CredentialProvisioner::new(api, clock, &config.credentials);
        Self {
            transport,
            inventory,
            provisioner,
            config,
        }
    }

    /// Production wiring: russh transport and the system clock.
    pub fn with_russh(
        inventory: Arc<dyn InstanceInventory>,
        api: Arc<dyn InstanceConnectApi>,
        config: HopConfig,
    ) -> Self {
        let transport = Arc::new(RusshTransport::new(&config.connection));
        Self::new(transport, inventory, api, Arc::new(SystemClock), config)
    }

    pub fn config(&self) -> &HopConfig {
        &self.config
    }

    pub fn endpoint_defaults(&self) -> EndpointDefaults {
        EndpointDefaults::from(&self.config.defaults)
    }

    /// Build an endpoint for a cloud instance id, e.g. `ec2-user@i-0abc1234`.
    pub async fn instance_endpoint(&self, spec: &str) -> Result<Endpoint> {
        Endpoint::for_instance(spec, self.inventory.as_ref(), &self.endpoint_defaults()).await
    }

    pub fn connector(&self) -> HopConnector {
        let authenticator = HopAuthenticator::new(
            self.provisioner.clone(),
            self.config.defaults.identity_path(),
            self.config.credentials.rsa_fallback,
        );
        HopConnector::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.inventory),
            authenticator,
            self.config.connection.connect_timeout(),
        )
    }
}

impl fmt::Debug for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connectivity")
            .field("provisioner", &self.provisioner)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// `None` when the operator cancelled; cancellation is not a failure.
fn unless_cancelled<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == ErrorKind::UserCancelled => Ok(None),
        Err(e) => Err(e),
    }
}

/// Build the chain and attach the process's terminal to its last hop.
///
/// Blocks until the remote shell ends, a hop is lost, or `cancel` fires. A
/// construction failure names the failing hop (see [`Error::hop`]).
pub async fn run_chain(
    conn: &Connectivity,
    endpoints: Vec<Endpoint>,
    cancel: &CancellationToken,
) -> Result<Completion> {
    run_chain_with_terminal(
        conn,
        endpoints,
        TerminalIo::stdio(),
        &PtyRequest::from_local_terminal(),
        cancel,
    )
    .await
}

/// [`run_chain`] with explicit terminal streams.
pub async fn run_chain_with_terminal(
    conn: &Connectivity,
    endpoints: Vec<Endpoint>,
    io: TerminalIo,
    pty: &PtyRequest,
    cancel: &CancellationToken,
) -> Result<Completion> {
    let mut chain = ConnectionChain::new(endpoints, conn.config.connection.max_hops())?;
    let connector = conn.connector();

    if unless_cancelled(chain.establish(&connector, cancel).await)?.is_none() {
        info!("Cancelled while building the chain");
        return Ok(Completion::Cancelled);
    }

    match unless_cancelled(chain.run_interactive(io, pty, cancel).await)? {
        Some(ShellOutcome::Exited) => Ok(Completion::Finished),
        Some(ShellOutcome::Cancelled) | None => Ok(Completion::Cancelled),
    }
}

/// Run a tunnel from `local_port` (the target's port when `None`) through
/// `bastion` to `target`.
///
/// Blocks until `cancel` fires or the bastion session is lost.
pub async fn run_tunnel(
    conn: &Connectivity,
    local_port: Option<u16>,
    target: TunnelTarget,
    bastion: Endpoint,
    cancel: &CancellationToken,
) -> Result<Completion> {
    let manager = TunnelManager::new(conn.config.tunnel.clone());
    let connector = conn.connector();

    let Some(tunnel) = unless_cancelled(
        manager
            .start(&connector, local_port, target, &bastion, cancel)
            .await,
    )?
    else {
        return Ok(Completion::Cancelled);
    };

    tunnel.wait().await?;
    if cancel.is_cancelled() {
        Ok(Completion::Cancelled)
    } else {
        Err(Error::Internal("tunnel stopped without cancellation".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_exit_codes() {
        assert_eq!(Completion::Finished.exit_code(), 0);
        assert_eq!(Completion::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_cancellation_maps_to_completion() {
        let mapped = unless_cancelled::<()>(Err(Error::UserCancelled)).unwrap();
        assert!(mapped.is_none());

        let hop_failure = Error::NotFound("i-0abc1234".into()).at_hop(1, "ec2-user@10.0.1.20:22");
        assert!(unless_cancelled::<()>(Err(hop_failure)).is_err());
    }
}
