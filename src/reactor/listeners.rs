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

//! In-process named events.
//!
//! A lightweight observer table, independent of the bus: callers register
//! callbacks under an event name and [`ListenerHub::emit`] invokes them
//! synchronously on the emitting thread. The table lock is reentrant, so a
//! callback may emit further events, add listeners, or remove any listener
//! (itself included) without deadlocking; removals that land mid-emit take
//! effect once the outermost emit unwinds.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::ReentrantMutex;
use rand::Rng;
use tracing::warn;

use crate::common::types::ListenerCallback;
use crate::common::VariantMap;

struct ListenerEntry {
    token: u64,
    /// `None` while the callback is running in an emit further up the stack.
    callback: Option<ListenerCallback>,
}

#[derive(Default)]
struct ListenerTable {
    listeners: HashMap<String, Vec<ListenerEntry>>,
    /// Emit nesting depth on the thread currently holding the lock.
    depth: u32,
    /// Removals deferred until the outermost emit finishes.
    doomed: Vec<u64>,
}

/// Cross-thread registry of named-event listeners.
pub(crate) struct ListenerHub {
    table: ReentrantMutex<RefCell<ListenerTable>>,
    next_token: AtomicU64,
}

impl ListenerHub {
    pub(crate) fn new() -> Self {
        let offset: u64 = rand::rng().random_range(0..1000);
        ListenerHub {
            table: ReentrantMutex::new(RefCell::new(ListenerTable::default())),
            next_token: AtomicU64::new(5_000 + offset),
        }
    }

    /// Registers `callback` for `event`; the returned token removes it.
    pub(crate) fn add(&self, event: &str, callback: ListenerCallback) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let guard = self.table.lock();
        guard
            .borrow_mut()
            .listeners
            .entry(event.to_owned())
            .or_default()
            .push(ListenerEntry {
                token,
                callback: Some(callback),
            });
        token
    }

    /// Removes the listener registered under `token`.
    ///
    /// Mid-emit the entry is only marked; it stops receiving events
    /// immediately but leaves the table once the emit unwinds. Returns
    /// `false` (with a warning) for unknown tokens.
    pub(crate) fn remove(&self, token: u64) -> bool {
        let guard = self.table.lock();
        let mut table = guard.borrow_mut();
        let known = table
            .listeners
            .values()
            .any(|entries| entries.iter().any(|e| e.token == token));
        if !known {
            warn!(token, "no such listener to remove");
            return false;
        }
        if table.depth > 0 {
            table.doomed.push(token);
        } else {
            for entries in table.listeners.values_mut() {
                entries.retain(|e| e.token != token);
            }
            table.listeners.retain(|_, entries| !entries.is_empty());
        }
        true
    }

    /// Invokes every listener of `event` with `payload`, in registration
    /// order, on the calling thread.
    ///
    /// Listeners added while the emit runs do not see this event; listeners
    /// removed while it runs are skipped for the rest of it.
    pub(crate) fn emit(&self, event: &str, payload: &VariantMap) {
        let guard = self.table.lock();
        let tokens: Vec<u64> = {
            let mut table = guard.borrow_mut();
            table.depth += 1;
            match table.listeners.get(event) {
                Some(entries) => entries.iter().map(|e| e.token).collect(),
                None => Vec::new(),
            }
        };

        for token in tokens {
            // Take the callback out of the table so the borrow is released
            // while it runs; a None slot means it is already running in an
            // emit above us on this stack.
            let taken = {
                let mut table = guard.borrow_mut();
                if table.doomed.contains(&token) {
                    continue;
                }
                table
                    .listeners
                    .get_mut(event)
                    .and_then(|entries| entries.iter_mut().find(|e| e.token == token))
                    .and_then(|entry| entry.callback.take())
            };
            let Some(mut callback) = taken else { continue };
            callback(payload);
            let mut table = guard.borrow_mut();
            if table.doomed.contains(&token) {
                continue;
            }
            if let Some(entry) = table
                .listeners
                .get_mut(event)
                .and_then(|entries| entries.iter_mut().find(|e| e.token == token))
            {
                entry.callback = Some(callback);
            }
        }

        let mut table = guard.borrow_mut();
        table.depth -= 1;
        if table.depth == 0 && !table.doomed.is_empty() {
            let doomed = std::mem::take(&mut table.doomed);
            for entries in table.listeners.values_mut() {
                entries.retain(|e| !doomed.contains(&e.token));
            }
            table.listeners.retain(|_, entries| !entries.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn payload() -> VariantMap {
        VariantMap::new()
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let hub = ListenerHub::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for n in 0..3 {
            let log = Arc::clone(&log);
            hub.add("net/up", Box::new(move |_| log.lock().push(n)));
        }
        hub.emit("net/up", &payload());
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn removed_listener_stops_firing() {
        let hub = ListenerHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let token = {
            let hits = Arc::clone(&hits);
            hub.add(
                "net/up",
                Box::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        hub.emit("net/up", &payload());
        assert!(hub.remove(token));
        hub.emit("net/up", &payload());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_token_removal_is_refused() {
        let hub = ListenerHub::new();
        assert!(!hub.remove(99));
    }

    #[test]
    fn listener_may_remove_itself_mid_emit() {
        let hub = Arc::new(ListenerHub::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let token_slot = Arc::new(parking_lot::Mutex::new(0u64));

        let token = {
            let hub_in_cb = Arc::clone(&hub);
            let hits = Arc::clone(&hits);
            let token_slot = Arc::clone(&token_slot);
            hub.add(
                "tick",
                Box::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let token = *token_slot.lock();
                    assert!(hub_in_cb.remove(token));
                }),
            )
        };
        *token_slot.lock() = token;

        hub.emit("tick", &payload());
        hub.emit("tick", &payload());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn later_listener_removed_by_earlier_one_is_skipped() {
        let hub = Arc::new(ListenerHub::new());
        let second_ran = Arc::new(AtomicUsize::new(0));
        let second_token = Arc::new(parking_lot::Mutex::new(0u64));

        {
            let hub_in_cb = Arc::clone(&hub);
            let second_token = Arc::clone(&second_token);
            hub.add(
                "tick",
                Box::new(move |_| {
                    let token = *second_token.lock();
                    assert!(hub_in_cb.remove(token));
                }),
            );
        }
        let token = {
            let second_ran = Arc::clone(&second_ran);
            hub.add(
                "tick",
                Box::new(move |_| {
                    second_ran.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        *second_token.lock() = token;

        hub.emit("tick", &payload());
        assert_eq!(second_ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nested_emit_skips_the_listener_already_running() {
        let hub = Arc::new(ListenerHub::new());
        let outer = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(AtomicUsize::new(0));

        {
            let hub_in_cb = Arc::clone(&hub);
            let outer = Arc::clone(&outer);
            hub.add(
                "outer",
                Box::new(move |_| {
                    if outer.fetch_add(1, Ordering::SeqCst) == 0 {
                        hub_in_cb.emit("outer", &VariantMap::new());
                    }
                }),
            );
        }
        {
            let inner = Arc::clone(&inner);
            hub.add(
                "outer",
                Box::new(move |_| {
                    inner.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        hub.emit("outer", &payload());
        // The re-entrant emit finds the first listener's slot empty and
        // skips it; the second listener runs for both emits.
        assert_eq!(outer.load(Ordering::SeqCst), 1);
        assert_eq!(inner.load(Ordering::SeqCst), 2);
    }
}
