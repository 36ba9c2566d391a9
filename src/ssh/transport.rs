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

//! Transport seam between the hop logic and the SSH implementation.
//!
//! The chain and tunnel code only need four things from SSH: dial a TCP
//! connection, run a handshake over *any* byte stream (a socket for hop 0, a
//! proxied channel for later hops), authenticate with a key, and carve
//! proxied streams or a shell out of an authenticated session.

use async_trait::async_trait;
use russh::keys::PrivateKey;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Byte stream usable as an SSH transport or relay endpoint.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Terminal parameters for an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

impl PtyRequest {
    /// Describe the local terminal, falling back to 80x24.
    pub fn from_local_terminal() -> Self {
        let term = std::env::var("TERM")
            .ok()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "xterm-256color".to_string());
        let (cols, rows) = crossterm::terminal::size()
            .map(|(c, r)| (u32::from(c), u32::from(r)))
            .unwrap_or((80, 24));
        Self { term, cols, rows }
    }
}

/// Creates sessions. One implementation per SSH stack; tests supply a mock.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a direct network connection from this machine.
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream>;

    /// Run the SSH handshake over `stream`. `host`/`port` name the peer for
    /// host key checks and logging.
    async fn handshake(
        &self,
        stream: BoxedStream,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn PendingSession>>;
}

/// A transport that completed key exchange but is not yet authenticated.
#[async_trait]
pub trait PendingSession: Send {
    /// Try public key authentication. `Ok(false)` means the server rejected the key.
    async fn authenticate(&mut self, user: &str, key: Arc<PrivateKey>) -> Result<bool>;

    fn into_session(self: Box<Self>) -> Arc<dyn HopSession>;

    /// Drop a transport that will never be authenticated.
    async fn abandon(self: Box<Self>);
}

/// One authenticated, encrypted transport.
#[async_trait]
pub trait HopSession: Send + Sync {
    /// Open a `direct-tcpip` stream to `host:port` as seen from the remote side.
    async fn open_proxied_stream(&self, host: &str, port: u16) -> Result<BoxedStream>;

    /// Open a PTY-backed shell channel.
    async fn open_shell(&self, pty: &PtyRequest) -> Result<BoxedStream>;

    /// Close the transport. Idempotent.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}
