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

//! Wiring between the operator's terminal and a remote shell channel.

use std::fmt;
use std::io::{IsTerminal, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::terminal::TerminalStateGuard;
use crate::error::{Error, Result};
use crate::ssh::BoxedStream;

const PUMP_BUFFER_SIZE: usize = 8192;

/// How long a blocking input read waits before rechecking for shutdown.
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

trait PolledInput: Read + AsFd + Send {}

impl<T: Read + AsFd + Send> PolledInput for T {}

enum Input {
    Stream(Box<dyn AsyncRead + Unpin + Send>),
    /// A file descriptor read on a blocking thread; polled so the reader can
    /// stop without waiting for another byte.
    Polled(Box<dyn PolledInput>),
}

/// Local side of an interactive session.
pub struct TerminalIo {
    input: Input,
    output: Box<dyn AsyncWrite + Unpin + Send>,
    raw_mode: bool,
}

impl TerminalIo {
    /// The process's stdin/stdout. Raw mode is used when stdin is a TTY.
    pub fn stdio() -> Self {
        let stdin = std::io::stdin();
        let raw_mode = stdin.is_terminal();
        Self::polled(stdin, tokio::io::stdout(), raw_mode)
    }

    /// Arbitrary streams, never switched to raw mode.
    pub fn new(
        input: impl AsyncRead + Unpin + Send + 'static,
        output: impl AsyncWrite + Unpin + Send + 'static,
    ) -> Self {
        Self {
            input: Input::Stream(Box::new(input)),
            output: Box::new(output),
            raw_mode: false,
        }
    }

    fn polled(
        input: impl Read + AsFd + Send + 'static,
        output: impl AsyncWrite + Unpin + Send + 'static,
        raw_mode: bool,
    ) -> Self {
        Self {
            input: Input::Polled(Box::new(input)),
            output: Box::new(output),
            raw_mode,
        }
    }

    pub fn raw_mode(&self) -> bool {
        self.raw_mode
    }
}

impl fmt::Debug for TerminalIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let input = match self.input {
            Input::Stream(_) => "stream",
            Input::Polled(_) => "polled",
        };
        f.debug_struct("TerminalIo")
            .field("input", &input)
            .field("raw_mode", &self.raw_mode)
            .finish_non_exhaustive()
    }
}

/// How an interactive session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOutcome {
    /// The remote shell closed its output.
    Exited,
    Cancelled,
}

/// Pump bytes between `io` and `shell` until the shell ends, the session
/// carrying it dies, or `cancel` fires.
///
/// `is_live` is polled every `check_interval`; a dead session is reported as
/// [`Error::TransportLost`].
pub async fn run_shell(
    shell: BoxedStream,
    io: TerminalIo,
    cancel: &CancellationToken,
    check_interval: Duration,
    is_live: impl Fn() -> bool,
) -> Result<ShellOutcome> {
    let _raw_guard = if io.raw_mode {
        match TerminalStateGuard::enter_raw_mode() {
            Ok(guard) => {
                debug!(owned = guard.owns_raw_mode(), "Terminal in raw mode");
                Some(guard)
            }
            Err(e) => {
                warn!("Continuing without raw mode: {e:#}");
                None
            }
        }
    } else {
        None
    };

    let (shell_read, shell_write) = tokio::io::split(shell);
    let mut output_task = tokio::spawn(pump_output(shell_read, io.output));
    let input = InputPump::start(io.input, shell_write);

    let mut ticker = tokio::time::interval(check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            joined = &mut output_task => {
                break match joined {
                    Ok(Ok(bytes)) if is_live() => {
                        debug!(bytes, "Remote shell closed");
                        Ok(ShellOutcome::Exited)
                    }
                    Ok(Ok(_)) => Err(Error::TransportLost(
                        "session closed while the shell was running".to_string(),
                    )),
                    Ok(Err(e)) if is_live() => Err(Error::Io(e)),
                    Ok(Err(e)) => Err(Error::TransportLost(format!(
                        "shell stream failed after session loss: {e}"
                    ))),
                    Err(e) => Err(Error::Internal(format!("output pump failed: {e}"))),
                };
            }
            _ = cancel.cancelled() => {
                debug!("Interactive session cancelled");
                break Ok(ShellOutcome::Cancelled);
            }
            _ = ticker.tick() => {
                if !is_live() {
                    break Err(Error::TransportLost(
                        "session closed while the shell was running".to_string(),
                    ));
                }
            }
        }
    };

    output_task.abort();
    input.stop().await;
    outcome
}

/// Forwarding of local input into the shell's write half.
struct InputPump {
    task: JoinHandle<std::io::Result<u64>>,
    reader: Option<JoinHandle<std::io::Result<u64>>>,
    stop: CancellationToken,
}

impl InputPump {
    fn start(input: Input, shell: WriteHalf<BoxedStream>) -> Self {
        let stop = CancellationToken::new();
        match input {
            Input::Stream(input) => Self {
                task: tokio::spawn(pump_input(input, shell)),
                reader: None,
                stop,
            },
            Input::Polled(input) => {
                let (tx, rx) = mpsc::channel(16);
                let reader_stop = stop.clone();
                let reader =
                    tokio::task::spawn_blocking(move || read_polled(input, tx, &reader_stop));
                Self {
                    task: tokio::spawn(forward_input(rx, shell)),
                    reader: Some(reader),
                    stop,
                }
            }
        }
    }

    /// Stop forwarding and wait for the blocking reader to notice.
    async fn stop(self) {
        self.stop.cancel();
        self.task.abort();
        if let Some(reader) = self.reader {
            match tokio::time::timeout(INPUT_POLL_INTERVAL * 10, reader).await {
                Ok(Ok(Ok(bytes))) => trace!(bytes, "Input reader stopped"),
                Ok(Ok(Err(e))) => debug!("Input reader failed: {e}"),
                Ok(Err(e)) => warn!("Input reader panicked: {e}"),
                Err(_) => warn!("Input reader did not stop in time"),
            }
        }
    }
}

async fn pump_output(
    mut shell: ReadHalf<BoxedStream>,
    mut output: Box<dyn AsyncWrite + Unpin + Send>,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = shell.read(&mut buf).await?;
        if n == 0 {
            output.flush().await?;
            return Ok(total);
        }
        output.write_all(&buf[..n]).await?;
        output.flush().await?;
        total += n as u64;
    }
}

async fn pump_input(
    mut input: Box<dyn AsyncRead + Unpin + Send>,
    mut shell: WriteHalf<BoxedStream>,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            trace!("Local input closed, sending EOF to shell");
            // EOF on the shell's write side; the output half keeps running.
            let _ = shell.shutdown().await;
            return Ok(total);
        }
        shell.write_all(&buf[..n]).await?;
        shell.flush().await?;
        total += n as u64;
    }
}

async fn forward_input(
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut shell: WriteHalf<BoxedStream>,
) -> std::io::Result<u64> {
    let mut total = 0u64;
    while let Some(chunk) = rx.recv().await {
        shell.write_all(&chunk).await?;
        shell.flush().await?;
        total += chunk.len() as u64;
    }
    trace!("Local input closed, sending EOF to shell");
    let _ = shell.shutdown().await;
    Ok(total)
}

/// Blocking read loop. Never blocks longer than [`INPUT_POLL_INTERVAL`]
/// without checking `stop`, so no keystroke is consumed after shutdown.
fn read_polled(
    mut input: Box<dyn PolledInput>,
    tx: mpsc::Sender<Vec<u8>>,
    stop: &CancellationToken,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut total = 0u64;
    while !stop.is_cancelled() {
        if !poll_readable(input.as_fd(), INPUT_POLL_INTERVAL)? {
            continue;
        }
        let n = match input.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if n == 0 {
            debug!("EOF received on local input");
            break;
        }
        if tx.blocking_send(buf[..n].to_vec()).is_err() {
            break;
        }
        total += n as u64;
    }
    Ok(total)
}

fn poll_readable(fd: BorrowedFd<'_>, timeout: Duration) -> std::io::Result<bool> {
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let timeout_ms = timeout.as_millis().min(u16::MAX as u128) as u16;
    match poll(&mut fds, PollTimeout::from(timeout_ms)) {
        Ok(n) => Ok(n > 0),
        Err(nix::errno::Errno::EINTR) => Ok(false),
        Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
    }
}
