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

use std::fmt;

/// Lifecycle of a [`ConnectionChain`](super::ConnectionChain).
///
/// `Empty -> Dialing(0) -> Authenticated(0) -> Dialing(1) -> ... -> Interactive -> Closed`.
/// Any failure jumps straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Empty,
    Dialing(usize),
    Authenticated(usize),
    Interactive,
    Closed,
}

impl ChainState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: ChainState) -> bool {
        use ChainState::*;
        match (self, next) {
            (_, Closed) => true,
            (Empty, Dialing(0)) => true,
            (Dialing(i), Authenticated(j)) => i == j,
            (Authenticated(i), Dialing(j)) => j == i + 1,
            (Authenticated(_), Interactive) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ChainState::Closed)
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Empty => write!(f, "empty"),
            ChainState::Dialing(i) => write!(f, "dialing({i})"),
            ChainState::Authenticated(i) => write!(f, "authenticated({i})"),
            ChainState::Interactive => write!(f, "interactive"),
            ChainState::Closed => write!(f, "closed"),
        }
    }
}
