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

//! Parent-pointer arena of hop sessions.
//!
//! Slot `i` holds the session for hop `i` and points at the slot whose
//! transport carries it. A slot is live only while it and every ancestor are
//! open, and closing a slot closes all of its descendants first.

use std::sync::Arc;
use tracing::debug;

use crate::ssh::HopSession;

struct SessionSlot {
    parent: Option<usize>,
    label: String,
    session: Arc<dyn HopSession>,
}

/// Sessions of one chain, indexed by hop position.
#[derive(Default)]
pub struct SessionArena {
    slots: Vec<SessionSlot>,
}

impl SessionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session and return its slot index.
    ///
    /// `parent` must name an existing slot.
    pub fn insert(
        &mut self,
        parent: Option<usize>,
        label: impl Into<String>,
        session: Arc<dyn HopSession>,
    ) -> usize {
        debug_assert!(parent.map_or(true, |p| p < self.slots.len()));
        self.slots.push(SessionSlot {
            parent,
            label: label.into(),
            session,
        });
        self.slots.len() - 1
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn session(&self, index: usize) -> Option<&Arc<dyn HopSession>> {
        self.slots.get(index).map(|slot| &slot.session)
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.slots.get(index).map(|slot| slot.label.as_str())
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.slots.get(index).and_then(|slot| slot.parent)
    }

    /// Index of the innermost session.
    pub fn tail(&self) -> Option<usize> {
        self.slots.len().checked_sub(1)
    }

    /// All descendants of `index`, in ascending slot order.
    pub fn descendants(&self, index: usize) -> Vec<usize> {
        let mut found = Vec::new();
        // Children always sit at higher indices than their parent.
        for (i, slot) in self.slots.iter().enumerate().skip(index + 1) {
            if let Some(parent) = slot.parent {
                if parent == index || found.contains(&parent) {
                    found.push(i);
                }
            }
        }
        found
    }

    /// True when slot `index` and all of its ancestors are open.
    pub fn is_live(&self, index: usize) -> bool {
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            let Some(slot) = self.slots.get(i) else {
                return false;
            };
            if slot.session.is_closed() {
                return false;
            }
            cursor = slot.parent;
        }
        true
    }

    /// Close every descendant of `index`, innermost first, then `index` itself.
    pub async fn close_from(&self, index: usize) {
        let mut order = self.descendants(index);
        order.push(index);
        order.sort_unstable_by(|a, b| b.cmp(a));
        for i in order {
            if let Some(slot) = self.slots.get(i) {
                debug!(hop = i, endpoint = %slot.label, "Closing session");
                slot.session.close().await;
            }
        }
    }

    /// Close all sessions innermost first and empty the arena.
    pub async fn teardown(&mut self) {
        while let Some(slot) = self.slots.pop() {
            debug!(hop = self.slots.len(), endpoint = %slot.label, "Closing session");
            slot.session.close().await;
        }
    }
}
