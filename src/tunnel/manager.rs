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

//! Local listener relaying connections through one bastion session.
//!
//! The accept loop owns the listener and a [`JoinSet`] of relay tasks. Every
//! accepted socket gets its own proxied stream on the shared bastion session,
//! so a failing relay only ever affects itself. Losing the bastion session
//! ends the whole tunnel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::relay::{self, RelayEnd, RelayStats};
use crate::chain::HopConnector;
use crate::config::TunnelSettings;
use crate::endpoint::{Endpoint, TunnelTarget};
use crate::error::{Error, Result};
use crate::ssh::HopSession;

/// Port the listener binds when none is given: the target's own port.
pub fn listen_port(local_port: Option<u16>, target: &TunnelTarget) -> u16 {
    local_port.unwrap_or(target.port)
}

#[derive(Debug, Default)]
struct TunnelCounters {
    accepted: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    bytes_local_to_remote: AtomicU64,
    bytes_remote_to_local: AtomicU64,
}

impl TunnelCounters {
    fn enter(self: &Arc<Self>) -> ActiveRelay {
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveRelay(Arc::clone(self))
    }

    fn snapshot(&self) -> TunnelStats {
        TunnelStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_local_to_remote: self.bytes_local_to_remote.load(Ordering::Relaxed),
            bytes_remote_to_local: self.bytes_remote_to_local.load(Ordering::Relaxed),
        }
    }
}

// Keeps `active` accurate even when a relay task is aborted.
struct ActiveRelay(Arc<TunnelCounters>);

impl Drop for ActiveRelay {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time tunnel statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub accepted: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub bytes_local_to_remote: u64,
    pub bytes_remote_to_local: u64,
}

/// Starts tunnels with a fixed set of settings.
#[derive(Debug, Clone, Default)]
pub struct TunnelManager {
    settings: TunnelSettings,
}

impl TunnelManager {
    pub fn new(settings: TunnelSettings) -> Self {
        Self { settings }
    }

    /// Authenticate to `bastion`, bind the local listener and start relaying.
    ///
    /// Returns once the listener is bound. The tunnel keeps running until
    /// `cancel` fires, [`RunningTunnel::shutdown`] is called, or the bastion
    /// session is lost.
    pub async fn start(
        &self,
        connector: &HopConnector,
        local_port: Option<u16>,
        target: TunnelTarget,
        bastion: &Endpoint,
        cancel: &CancellationToken,
    ) -> Result<RunningTunnel> {
        let session = connector
            .connect(0, bastion, None, cancel)
            .await
            .map_err(|e| e.at_hop(0, bastion.label()))?;

        let port = listen_port(local_port, &target);
        let bind_address = self.settings.bind_address.as_str();
        let listener = match TcpListener::bind((bind_address, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                session.close().await;
                return Err(Error::connection_failed(
                    format!("listen {bind_address}:{port}"),
                    e,
                ));
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                session.close().await;
                return Err(Error::Io(e));
            }
        };

        info!(
            listen = %local_addr,
            destination = %target,
            bastion = %bastion,
            "Tunnel listening"
        );

        let counters = Arc::new(TunnelCounters::default());
        let shutdown = cancel.child_token();
        let task = tokio::spawn(serve(
            listener,
            session,
            target,
            self.settings.clone(),
            Arc::clone(&counters),
            shutdown.clone(),
        ));

        Ok(RunningTunnel {
            local_addr,
            counters,
            shutdown,
            task,
        })
    }
}

/// Handle to a tunnel started by [`TunnelManager::start`].
#[derive(Debug)]
pub struct RunningTunnel {
    local_addr: SocketAddr,
    counters: Arc<TunnelCounters>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl RunningTunnel {
    /// Address the listener is bound to. Useful when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> TunnelStats {
        self.counters.snapshot()
    }

    /// Ask the tunnel to stop. Use [`wait`](Self::wait) to observe completion.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the tunnel to end.
    ///
    /// `Ok(())` after an orderly shutdown; [`Error::TransportLost`] when the
    /// bastion session dropped.
    pub async fn wait(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("tunnel task failed: {e}")))?
    }
}

async fn serve(
    listener: TcpListener,
    session: Arc<dyn HopSession>,
    target: TunnelTarget,
    settings: TunnelSettings,
    counters: Arc<TunnelCounters>,
    shutdown: CancellationToken,
) -> Result<()> {
    let permits = Arc::new(Semaphore::new(settings.max_connections));
    let relay_cancel = CancellationToken::new();
    let mut relays: JoinSet<()> = JoinSet::new();
    let mut session_check = tokio::time::interval(settings.session_check_interval());
    session_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Tunnel shutdown requested, no longer accepting connections");
                break Ok(());
            }
            _ = session_check.tick() => {
                if session.is_closed() {
                    error!(destination = %target, "Bastion session lost");
                    break Err(Error::TransportLost(format!(
                        "bastion session for tunnel to {target} closed"
                    )));
                }
            }
            Some(joined) = relays.join_next(), if !relays.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Relay task panicked: {}", e);
                    }
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        counters.accepted.fetch_add(1, Ordering::Relaxed);
                        trace!("Accepted connection from {}", peer);
                        relays.spawn(relay_connection(
                            stream,
                            peer,
                            Arc::clone(&session),
                            target.clone(),
                            Arc::clone(&permits),
                            Arc::clone(&counters),
                            settings.buffer_size,
                            relay_cancel.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        // Avoid spinning on persistent accept errors
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    };

    drop(listener);

    if result.is_ok() && !relays.is_empty() {
        let grace = settings.drain_grace();
        debug!(relays = relays.len(), ?grace, "Draining relays");
        let drained = tokio::time::timeout(grace, async {
            while relays.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = relays.len(),
                "Relays still active after grace period, closing them"
            );
        }
    }

    relay_cancel.cancel();
    relays.shutdown().await;
    session.close().await;

    let stats = counters.snapshot();
    info!(
        accepted = stats.accepted,
        completed = stats.completed,
        failed = stats.failed,
        bytes_up = stats.bytes_local_to_remote,
        bytes_down = stats.bytes_remote_to_local,
        "Tunnel stopped"
    );
    result
}

#[allow(clippy::too_many_arguments)]
async fn relay_connection(
    local: TcpStream,
    peer: SocketAddr,
    session: Arc<dyn HopSession>,
    target: TunnelTarget,
    permits: Arc<Semaphore>,
    counters: Arc<TunnelCounters>,
    buffer_size: usize,
    cancel: CancellationToken,
) {
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return,
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Failed to acquire connection permit for {}", peer);
                return;
            }
        },
    };
    let _active = counters.enter();
    if let Err(e) = local.set_nodelay(true) {
        trace!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let remote = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = session.open_proxied_stream(&target.host, target.port) => match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(peer = %peer, destination = %target, error = %e, "Failed to open proxied stream");
                counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        },
    };

    let stats = RelayStats::new();
    debug!(relay = %stats.id(), peer = %peer, destination = %target, "Relay started");
    match relay::run(local, remote, buffer_size, &stats, &cancel).await {
        Ok(RelayEnd::Completed) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(RelayEnd::Cancelled) => {}
        Err(e) => {
            warn!(relay = %stats.id(), peer = %peer, error = %e, "Relay failed");
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
    counters
        .bytes_local_to_remote
        .fetch_add(stats.bytes_local_to_remote(), Ordering::Relaxed);
    counters
        .bytes_remote_to_local
        .fetch_add(stats.bytes_remote_to_local(), Ordering::Relaxed);
}
