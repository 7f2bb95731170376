/*
 * Copyright (c) 2026. Busbar contributors
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::bus::PeerId;

/// The peers currently holding at least one subscription.
///
/// A departure notification carries no identity, so a sweep re-checks the
/// whole set against the transport and reports everyone who is gone.
#[derive(Debug, Default)]
pub(crate) struct LivenessTracker {
    peers: BTreeSet<PeerId>,
}

impl LivenessTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Starts watching `peer`; returns `false` if it was already tracked.
    pub(crate) fn track(&mut self, peer: &PeerId) -> bool {
        let added = self.peers.insert(peer.clone());
        if added {
            debug!(%peer, tracked = self.peers.len(), "tracking peer liveness");
        }
        added
    }

    /// Stops watching `peer`; returns `false` if it was not tracked.
    pub(crate) fn untrack(&mut self, peer: &PeerId) -> bool {
        let removed = self.peers.remove(peer);
        if removed {
            debug!(%peer, tracked = self.peers.len(), "peer no longer tracked");
        }
        removed
    }

    pub(crate) fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains(peer)
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.len()
    }

    /// Removes and returns every tracked peer `alive` rejects.
    pub(crate) fn sweep(&mut self, alive: impl Fn(&PeerId) -> bool) -> Vec<PeerId> {
        let vanished: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|peer| !alive(peer))
            .cloned()
            .collect();
        for peer in &vanished {
            self.peers.remove(peer);
        }
        if !vanished.is_empty() {
            info!(count = vanished.len(), tracked = self.peers.len(), "peers vanished");
        }
        vanished
    }
}
