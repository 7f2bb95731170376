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

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, trace};

use crate::bus::{BusError, PeerId};

/// The three independent pub/sub namespaces a service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicFamily {
    /// Generic string-valued topics, delivered as `TopicUpdate`.
    Topic,
    /// Integer-valued topics, delivered as `TaggedUpdate`.
    Tagged,
    /// Per-entity structured status records, delivered as `StatusUpdate`
    /// under the configured implicit topic.
    Status,
}

impl fmt::Display for TopicFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TopicFamily::Topic => "topic",
            TopicFamily::Tagged => "tagged",
            TopicFamily::Status => "status",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscription {
    topic: String,
    peer: PeerId,
}

/// One topic family: subscriptions in registration order, the cached last
/// value per key, and the walk bookkeeping that keeps reentrant
/// unsubscribes from invalidating a publish in progress.
///
/// Subscription keys and cache keys are independent namespaces; the status
/// family subscribes under one implicit topic while caching per entity.
/// Loop-thread only; the host wraps each table in a `RefCell`.
pub(crate) struct FamilyTable<V> {
    family: TopicFamily,
    subs: Vec<Subscription>,
    cache: BTreeMap<String, V>,
    walk_depth: u32,
    /// Removals requested while a walk is in progress.
    doomed: Vec<Subscription>,
}

impl<V: Clone> FamilyTable<V> {
    pub(crate) fn new(family: TopicFamily) -> Self {
        FamilyTable {
            family,
            subs: Vec::new(),
            cache: BTreeMap::new(),
            walk_depth: 0,
            doomed: Vec::new(),
        }
    }

    /// Adds `(topic, peer)`. A pair already present is refused, including
    /// one whose removal is still parked from an ongoing walk.
    pub(crate) fn subscribe(&mut self, topic: &str, peer: &PeerId) -> Result<(), BusError> {
        if self.contains(topic, peer) {
            debug!(family = %self.family, topic, %peer, "duplicate subscription refused");
            return Err(BusError::AlreadyRegistered);
        }
        self.subs.push(Subscription {
            topic: topic.to_owned(),
            peer: peer.clone(),
        });
        trace!(family = %self.family, topic, %peer, total = self.subs.len(), "subscribed");
        Ok(())
    }

    /// Removes `(topic, peer)`. During a walk the removal is parked and
    /// applied once the walk completes; the pair gets no further deliveries
    /// either way.
    pub(crate) fn unsubscribe(&mut self, topic: &str, peer: &PeerId) -> Result<(), BusError> {
        if !self.contains(topic, peer) {
            debug!(family = %self.family, topic, %peer, "no such subscription");
            return Err(BusError::ServiceUnknown);
        }
        if self.walk_depth > 0 {
            let pair = Subscription {
                topic: topic.to_owned(),
                peer: peer.clone(),
            };
            if !self.doomed.contains(&pair) {
                trace!(family = %self.family, topic, %peer, "removal parked until the walk ends");
                self.doomed.push(pair);
            }
        } else {
            self.subs
                .retain(|sub| !(sub.topic == topic && sub.peer == *peer));
            trace!(family = %self.family, topic, %peer, total = self.subs.len(), "unsubscribed");
        }
        Ok(())
    }

    /// Drops every subscription `peer` holds; returns how many went.
    pub(crate) fn remove_peer(&mut self, peer: &PeerId) -> usize {
        if self.walk_depth > 0 {
            let mut parked = 0;
            for sub in self.subs.iter().filter(|sub| sub.peer == *peer) {
                if !self.doomed.contains(sub) {
                    self.doomed.push(sub.clone());
                    parked += 1;
                }
            }
            parked
        } else {
            let before = self.subs.len();
            self.subs.retain(|sub| sub.peer != *peer);
            before - self.subs.len()
        }
    }

    fn contains(&self, topic: &str, peer: &PeerId) -> bool {
        self.subs
            .iter()
            .any(|sub| sub.topic == topic && sub.peer == *peer)
    }

    /// Whether `peer` still holds any live subscription in this family.
    pub(crate) fn has_peer(&self, peer: &PeerId) -> bool {
        self.subs
            .iter()
            .any(|sub| sub.peer == *peer && !self.doomed.contains(sub))
    }

    pub(crate) fn update_cache(&mut self, key: &str, value: V) {
        self.cache.insert(key.to_owned(), value);
    }

    pub(crate) fn cached(&self, key: &str) -> Option<V> {
        self.cache.get(key).cloned()
    }

    /// The whole cache in key order; the status family replays this to a
    /// fresh subscriber.
    pub(crate) fn cache_snapshot(&self) -> Vec<(String, V)> {
        self.cache
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Opens a walk: subscription removals are parked from here on.
    pub(crate) fn begin_walk(&mut self) {
        self.walk_depth += 1;
    }

    /// Peers subscribed to `topic`, in registration order, parked removals
    /// excluded.
    pub(crate) fn peers_for(&self, topic: &str) -> Vec<PeerId> {
        self.subs
            .iter()
            .filter(|sub| sub.topic == topic && !self.doomed.contains(sub))
            .map(|sub| sub.peer.clone())
            .collect()
    }

    /// Whether `(topic, peer)` was unsubscribed after the walk snapshot was
    /// taken.
    pub(crate) fn is_doomed(&self, topic: &str, peer: &PeerId) -> bool {
        self.doomed
            .iter()
            .any(|sub| sub.topic == topic && sub.peer == *peer)
    }

    /// Closes a walk; the outermost close applies the parked removals.
    pub(crate) fn end_walk(&mut self) {
        self.walk_depth = self.walk_depth.saturating_sub(1);
        if self.walk_depth == 0 && !self.doomed.is_empty() {
            let doomed = std::mem::take(&mut self.doomed);
            debug!(
                family = %self.family,
                count = doomed.len(),
                "applying removals parked during the walk"
            );
            self.subs.retain(|sub| !doomed.contains(sub));
        }
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.subs.len()
    }
}
