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

//! Loop-thread-local state.
//!
//! Everything single-threaded lives behind [`LoopCtx`]: the source table,
//! the bus connection, and the helper tasks spawned on the loop's
//! `LocalSet`. Deferred closures arriving from other threads reach it
//! through [`with_current`], which resolves the context of whichever loop
//! is running on the calling thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::ConnectionCore;
use crate::dispatch::Dispatcher;
use crate::reactor::sources::SourceEntry;
use crate::reactor::{SourceKind, SourceTag};

thread_local! {
    static CURRENT: RefCell<Option<Rc<LoopCtx>>> = const { RefCell::new(None) };
}

/// Per-loop state owned by the loop thread; never crosses threads.
pub(crate) struct LoopCtx {
    pub(crate) id: u64,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) sources: RefCell<HashMap<SourceTag, SourceEntry>>,
    pub(crate) connection: RefCell<Option<Rc<ConnectionCore>>>,
    /// Helper tasks (transport pump and friends) joined at teardown.
    pub(crate) aux_tasks: RefCell<Vec<JoinHandle<()>>>,
}

impl LoopCtx {
    pub(crate) fn new(id: u64, dispatcher: Dispatcher) -> Rc<Self> {
        Rc::new(LoopCtx {
            id,
            dispatcher,
            sources: RefCell::new(HashMap::new()),
            connection: RefCell::new(None),
            aux_tasks: RefCell::new(Vec::new()),
        })
    }

    /// Removes a source registered under `tag`, verifying the kind.
    ///
    /// An absent timer tag is logged at info level only: single-shot timers
    /// and child watchers retire their own tags, so callers legitimately
    /// remove tags that are already gone. Everything else absent, and any
    /// kind mismatch, is a caller bug worth a warning.
    pub(crate) fn remove(&self, kind: SourceKind, tag: SourceTag) -> bool {
        if tag.is_null() {
            return false;
        }
        let mut sources = self.sources.borrow_mut();
        match sources.get(&tag) {
            Some(entry) if entry.kind == kind => {
                let entry = sources.remove(&tag);
                drop(sources);
                if let Some(entry) = entry {
                    entry.cancel.cancel();
                }
                true
            }
            Some(entry) => {
                warn!(
                    %tag,
                    requested = %kind,
                    registered = %entry.kind,
                    "source kind mismatch; not removing"
                );
                false
            }
            None => {
                drop(sources);
                log_missing(kind, tag);
                false
            }
        }
    }

    /// Drops a source without kind checks or logging; used by sources that
    /// expire on their own.
    pub(crate) fn prune(&self, tag: SourceTag) {
        let entry = self.sources.borrow_mut().remove(&tag);
        if let Some(entry) = entry {
            entry.cancel.cancel();
        }
    }

    /// Cancels every source and helper task and waits briefly for them to
    /// wind down, then tears down the bus connection, failing its pending
    /// calls.
    pub(crate) async fn teardown(&self) {
        let connection = self.connection.borrow_mut().take();
        if let Some(connection) = connection {
            connection.shutdown();
        }

        let entries: Vec<SourceEntry> = self
            .sources
            .borrow_mut()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(entries.len());
        for mut entry in entries {
            entry.cancel.cancel();
            if let Some(handle) = entry.task.take() {
                handles.push(handle);
            }
        }
        handles.append(&mut self.aux_tasks.borrow_mut());
        if handles.is_empty() {
            return;
        }

        let grace = Duration::from_millis(250);
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(
                reactor_id = self.id,
                "source tasks did not wind down within the grace period"
            );
        }
    }
}

pub(crate) fn log_missing(kind: SourceKind, tag: SourceTag) {
    match kind {
        // Timers and child watches retire themselves, so a missing tag is
        // the expected aftermath of a fire, not a caller bug.
        SourceKind::Timer => info!(%tag, "timer already gone (expired or removed)"),
        SourceKind::Child => info!(%tag, "child watch already gone (exited or removed)"),
        other => warn!(%tag, kind = %other, "no such source to remove"),
    }
}

/// Marks `ctx` as the loop running on the calling thread.
pub(crate) fn set_current(ctx: Rc<LoopCtx>) {
    CURRENT.with(|slot| *slot.borrow_mut() = Some(ctx));
}

/// Clears the calling thread's loop marker.
pub(crate) fn clear_current() {
    CURRENT.with(|slot| *slot.borrow_mut() = None);
}

/// Reactor id of the loop running on the calling thread, if any.
pub(crate) fn current_reactor_id() -> Option<u64> {
    CURRENT.with(|slot| slot.borrow().as_ref().map(|ctx| ctx.id))
}

/// Resolves the calling thread's loop context.
///
/// Returns `None` off the loop thread, or once the loop has torn down.
pub(crate) fn with_current<R>(f: impl FnOnce(&Rc<LoopCtx>) -> R) -> Option<R> {
    CURRENT.with(|slot| {
        let borrowed = slot.borrow();
        borrowed.as_ref().map(f)
    })
}
