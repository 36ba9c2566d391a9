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

//! Bidirectional byte relay between a local socket and a proxied stream.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

/// Per-relay transfer counters.
#[derive(Debug)]
pub struct RelayStats {
    id: Uuid,
    bytes_local_to_remote: AtomicU64,
    bytes_remote_to_local: AtomicU64,
    started_at: Instant,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes_local_to_remote: AtomicU64::new(0),
            bytes_remote_to_local: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bytes_local_to_remote(&self) -> u64 {
        self.bytes_local_to_remote.load(Ordering::Relaxed)
    }

    pub fn bytes_remote_to_local(&self) -> u64 {
        self.bytes_remote_to_local.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_local_to_remote() + self.bytes_remote_to_local()
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// How a relay finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Both directions reached EOF.
    Completed,
    Cancelled,
}

/// Copy bytes both ways between `local` and `remote` until both directions
/// are done, either side fails, or `cancel` fires.
///
/// EOF in one direction is forwarded as a write shutdown on the other side,
/// so half-closed protocols keep working.
pub async fn run<L, R>(
    local: L,
    remote: R,
    buffer_size: usize,
    stats: &RelayStats,
    cancel: &CancellationToken,
) -> io::Result<RelayEnd>
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let upstream = pump(
        &mut local_read,
        &mut remote_write,
        buffer_size,
        &stats.bytes_local_to_remote,
    );
    let downstream = pump(
        &mut remote_read,
        &mut local_write,
        buffer_size,
        &stats.bytes_remote_to_local,
    );

    let end = tokio::select! {
        _ = cancel.cancelled() => {
            trace!(relay = %stats.id, "Relay cancelled");
            RelayEnd::Cancelled
        }
        result = async { tokio::try_join!(upstream, downstream) } => {
            result?;
            RelayEnd::Completed
        }
    };

    debug!(
        relay = %stats.id,
        up = stats.bytes_local_to_remote(),
        down = stats.bytes_remote_to_local(),
        duration = ?stats.duration(),
        ?end,
        "Relay finished"
    );
    Ok(end)
}

async fn pump<Rd, Wr>(
    reader: &mut Rd,
    writer: &mut Wr,
    buffer_size: usize,
    counter: &AtomicU64,
) -> io::Result<()>
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if is_peer_gone(&e) => break,
            Err(e) => return Err(e),
        };
        match writer.write_all(&buf[..n]).await {
            Ok(()) => {}
            Err(e) if is_peer_gone(&e) => return Ok(()),
            Err(e) => return Err(e),
        }
        writer.flush().await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
    // The other side may already be gone.
    let _ = writer.shutdown().await;
    Ok(())
}

fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}
