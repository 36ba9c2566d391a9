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

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::auth::HopAuthenticator;
use crate::cloud::InstanceInventory;
use crate::endpoint::{resolved_address, Endpoint};
use crate::error::{Error, Result};
use crate::ssh::{BoxedStream, HopSession, Transport};

/// Establishes a single authenticated hop.
///
/// Shared by chain construction and by the tunnel's bastion connection, so
/// both go through the same resolve, provision, handshake and authenticate
/// sequence.
#[derive(Clone)]
pub struct HopConnector {
    transport: Arc<dyn Transport>,
    inventory: Arc<dyn InstanceInventory>,
    authenticator: HopAuthenticator,
    connect_timeout: Duration,
}

impl HopConnector {
    pub fn new(
        transport: Arc<dyn Transport>,
        inventory: Arc<dyn InstanceInventory>,
        authenticator: HopAuthenticator,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            inventory,
            authenticator,
            connect_timeout,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connect hop `hop` to `endpoint`.
    ///
    /// Hop 0 dials directly; any later hop must pass the authenticated
    /// session of the previous hop as `parent` and is carried inside it.
    pub async fn connect(
        &self,
        hop: usize,
        endpoint: &Endpoint,
        parent: Option<&Arc<dyn HopSession>>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn HopSession>> {
        let endpoint = endpoint.for_hop(hop);
        let address = cancellable(
            cancel,
            resolved_address(&endpoint, self.inventory.as_ref()),
        )
        .await?;
        let port = endpoint.port();
        debug!(hop, endpoint = %endpoint, address = %address, "Resolved hop address");

        let (stream, material) = match parent {
            None => {
                let material = self.authenticator.obtain(&endpoint).await?;
                ensure_not_cancelled(cancel)?;
                let stream = self
                    .timed(cancel, self.transport.dial(&address, port), || {
                        Error::connection_failed(
                            format!("{address}:{port}"),
                            format!("timed out after {}s", self.connect_timeout.as_secs()),
                        )
                    })
                    .await?;
                (stream, material)
            }
            Some(parent) => {
                let stream: BoxedStream = self
                    .timed(cancel, parent.open_proxied_stream(&address, port), || {
                        Error::connection_failed(
                            format!("{address}:{port}"),
                            format!(
                                "proxied stream not opened within {}s",
                                self.connect_timeout.as_secs()
                            ),
                        )
                    })
                    .await?;
                let material = self.authenticator.obtain(&endpoint).await?;
                ensure_not_cancelled(cancel)?;
                (stream, material)
            }
        };

        let mut pending = self
            .timed(
                cancel,
                self.transport.handshake(stream, &address, port),
                || {
                    Error::HandshakeFailed(format!(
                        "{address}:{port} did not complete key exchange within {}s",
                        self.connect_timeout.as_secs()
                    ))
                },
            )
            .await?;

        let outcome = cancellable(
            cancel,
            self.authenticator
                .authenticate(pending.as_mut(), &endpoint, material),
        )
        .await;
        if let Err(e) = outcome {
            pending.abandon().await;
            return Err(e);
        }

        info!(hop, endpoint = %endpoint, address = %address, "Hop authenticated");
        Ok(pending.into_session())
    }

    async fn timed<T>(
        &self,
        cancel: &CancellationToken,
        fut: impl Future<Output = Result<T>>,
        on_timeout: impl FnOnce() -> Error,
    ) -> Result<T> {
        cancellable(cancel, async {
            tokio::time::timeout(self.connect_timeout, fut)
                .await
                .map_err(|_| on_timeout())?
        })
        .await
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::UserCancelled),
        result = fut => result,
    }
}

// Provisioning is allowed to finish; its credential is dropped here if the
// operator cancelled meanwhile.
fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::UserCancelled)
    } else {
        Ok(())
    }
}
