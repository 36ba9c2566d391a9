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

//! Raw mode handling for the operator's terminal.

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Serializes raw mode changes across guards.
static TERMINAL_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

fn lock() -> MutexGuard<'static, ()> {
    TERMINAL_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// RAII guard that keeps the local terminal in raw mode.
///
/// Raw mode is restored when the guard drops, including on early returns and
/// panics inside the interactive session.
#[derive(Debug)]
pub struct TerminalStateGuard {
    owns_raw_mode: bool,
}

impl TerminalStateGuard {
    /// Enter raw mode. A second guard created while one is active is a no-op.
    pub fn enter_raw_mode() -> Result<Self> {
        let _guard = lock();
        if RAW_MODE_ACTIVE.load(Ordering::SeqCst) {
            return Ok(Self {
                owns_raw_mode: false,
            });
        }
        enable_raw_mode().context("Failed to enable raw mode")?;
        RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
        Ok(Self {
            owns_raw_mode: true,
        })
    }

    pub fn owns_raw_mode(&self) -> bool {
        self.owns_raw_mode
    }

    /// Leave raw mode early. Dropping the guard afterwards does nothing.
    pub fn restore(&mut self) -> Result<()> {
        if !self.owns_raw_mode {
            return Ok(());
        }
        let _guard = lock();
        self.owns_raw_mode = false;
        if RAW_MODE_ACTIVE.swap(false, Ordering::SeqCst) {
            disable_raw_mode().context("Failed to disable raw mode")?;
        }
        Ok(())
    }
}

impl Drop for TerminalStateGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            // Can't propagate from Drop
            eprintln!("Warning: failed to restore terminal: {e}");
        }
    }
}
