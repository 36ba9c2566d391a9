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

//! Multi-hop session chains.
//!
//! A [`ConnectionChain`] authenticates hop 0 over a direct connection, then
//! authenticates every later hop over a proxied stream carved out of the
//! previous hop's session. Sessions live in a [`SessionArena`] so teardown
//! order and liveness can be checked independently of the construction code.

mod arena;
pub mod auth;
mod hop;
pub mod interactive;
mod state;
pub mod terminal;

pub use arena::SessionArena;
pub use auth::{AuthMaterial, HopAuthenticator};
pub use hop::HopConnector;
pub(crate) use hop::cancellable;
pub use interactive::{run_shell, ShellOutcome, TerminalIo};
pub use state::ChainState;

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::ssh::PtyRequest;

/// How often the interactive loop checks that every hop is still open.
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Ordered chain of nested sessions, one per endpoint.
pub struct ConnectionChain {
    endpoints: Vec<Endpoint>,
    state: ChainState,
    history: Vec<ChainState>,
    arena: SessionArena,
}

impl ConnectionChain {
    /// Validate the hop list. Nothing touches the network yet.
    pub fn new(endpoints: Vec<Endpoint>, max_hops: usize) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::invalid_endpoint("", "a chain needs at least one endpoint"));
        }
        if endpoints.len() > max_hops {
            return Err(Error::invalid_endpoint(
                endpoints
                    .iter()
                    .map(Endpoint::label)
                    .collect::<Vec<_>>()
                    .join(" -> "),
                format!(
                    "{} hops exceed the limit of {max_hops}",
                    endpoints.len()
                ),
            ));
        }
        Ok(Self {
            endpoints,
            state: ChainState::Empty,
            history: vec![ChainState::Empty],
            arena: SessionArena::new(),
        })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Every state the chain has been in, oldest first.
    pub fn history(&self) -> &[ChainState] {
        &self.history
    }

    pub fn arena(&self) -> &SessionArena {
        &self.arena
    }

    fn advance(&mut self, next: ChainState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal chain transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Chain state");
        self.state = next;
        self.history.push(next);
    }

    /// Authenticate every hop in order.
    ///
    /// On failure all sessions built so far are closed, innermost first, and
    /// the error names the failing hop.
    pub async fn establish(
        &mut self,
        connector: &HopConnector,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.state != ChainState::Empty {
            return Err(Error::Internal(format!(
                "chain cannot be established from state {}",
                self.state
            )));
        }

        for hop in 0..self.endpoints.len() {
            self.advance(ChainState::Dialing(hop));
            let endpoint = self.endpoints[hop].for_hop(hop);
            let label = endpoint.label();
            let parent = hop.checked_sub(1);
            let parent_session = parent.and_then(|p| self.arena.session(p)).cloned();

            match connector
                .connect(hop, &endpoint, parent_session.as_ref(), cancel)
                .await
            {
                Ok(session) => {
                    self.arena.insert(parent, label, session);
                    self.advance(ChainState::Authenticated(hop));
                }
                Err(e) => {
                    tracing::warn!(hop, endpoint = %label, error = %e, "Hop failed, tearing down chain");
                    self.teardown().await;
                    return Err(e.at_hop(hop, label));
                }
            }
        }

        info!(hops = self.endpoints.len(), "Chain established");
        Ok(())
    }

    /// Attach `io` to a shell on the last hop and block until it ends.
    ///
    /// The chain is torn down before this returns, whatever the outcome.
    pub async fn run_interactive(
        &mut self,
        io: TerminalIo,
        pty: &PtyRequest,
        cancel: &CancellationToken,
    ) -> Result<ShellOutcome> {
        let outcome = self.attach(io, pty, cancel).await;
        self.teardown().await;
        outcome
    }

    async fn attach(
        &mut self,
        io: TerminalIo,
        pty: &PtyRequest,
        cancel: &CancellationToken,
    ) -> Result<ShellOutcome> {
        let Some(tail) = self.arena.tail() else {
            return Err(Error::Internal("chain has no established hops".to_string()));
        };
        if !matches!(self.state, ChainState::Authenticated(i) if i == tail) {
            return Err(Error::Internal(format!(
                "shell requested in state {}",
                self.state
            )));
        }
        let Some(session) = self.arena.session(tail).cloned() else {
            return Err(Error::Internal("tail session missing".to_string()));
        };

        let shell = cancellable(cancel, session.open_shell(pty)).await?;
        self.advance(ChainState::Interactive);
        info!(endpoint = self.arena.label(tail).unwrap_or_default(), "Interactive shell attached");

        let arena = &self.arena;
        run_shell(shell, io, cancel, LIVENESS_CHECK_INTERVAL, || {
            arena.is_live(tail)
        })
        .await
    }

    /// Close every session innermost first. Idempotent.
    pub async fn teardown(&mut self) {
        if self.state == ChainState::Closed {
            return;
        }
        self.arena.teardown().await;
        self.advance(ChainState::Closed);
    }
}

impl std::fmt::Debug for ConnectionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionChain")
            .field("endpoints", &self.endpoints)
            .field("state", &self.state)
            .field("sessions", &self.arena.len())
            .finish()
    }
}
