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

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchCore, Dispatcher};
use crate::reactor::context::{self, LoopCtx};
use crate::reactor::handle::ReactorHandle;
use crate::reactor::listeners::ListenerHub;
use crate::reactor::sources::PendingSource;
use crate::reactor::{thread_guard, SourceKind, SourceTag};

static NEXT_REACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Per-kind tag counters.
///
/// Each kind draws from its own thousand-range with a random offset, so a
/// stale tag of one kind never happens to name a live source of another.
pub(crate) struct TagCounters {
    timer: AtomicU64,
    io: AtomicU64,
    signal: AtomicU64,
    child: AtomicU64,
}

impl TagCounters {
    fn new() -> Self {
        let mut rng = rand::rng();
        let mut seeded = |base: u64| AtomicU64::new(base + rng.random_range(0..1000));
        TagCounters {
            timer: seeded(1_000),
            io: seeded(2_000),
            signal: seeded(3_000),
            child: seeded(4_000),
        }
    }

    pub(crate) fn next(&self, kind: SourceKind) -> SourceTag {
        let counter = match kind {
            SourceKind::Timer => &self.timer,
            SourceKind::Io => &self.io,
            SourceKind::Signal => &self.signal,
            SourceKind::Child => &self.child,
        };
        SourceTag::new(counter.fetch_add(1, Ordering::Relaxed))
    }
}

/// Thread-safe half of a reactor, shared by every handle cloned from it.
pub(crate) struct ReactorShared {
    pub(crate) dispatch: Arc<DispatchCore>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) exit_code: Mutex<i32>,
    /// Sources registered before the loop started.
    pub(crate) pending: Mutex<Vec<PendingSource>>,
    /// Set once `run()` has drained `pending`; later registrations go
    /// through the deferred queue instead.
    pub(crate) activated: AtomicBool,
    pub(crate) tags: TagCounters,
    pub(crate) listeners: ListenerHub,
}

/// Routes a source registration to the loop thread.
///
/// On the loop thread the source is installed directly. Before the loop has
/// activated, registrations park in the pending list and are armed at
/// startup. Otherwise the caller hops to the loop thread and blocks until
/// the source is installed, so the returned tag reflects the real outcome:
/// [`SourceTag::NULL`] means the watch could not be created or the loop is
/// already gone.
pub(crate) fn submit_source(
    shared: &Arc<ReactorShared>,
    dispatcher: &Dispatcher,
    source: PendingSource,
) -> SourceTag {
    let tag = source.tag();
    if dispatcher.on_loop_thread() {
        return match context::with_current(|ctx| ctx.install(source)) {
            Some(true) => tag,
            Some(false) => SourceTag::NULL,
            None => {
                warn!(%tag, "no loop context on this thread; source dropped");
                SourceTag::NULL
            }
        };
    }

    {
        let mut pending = shared.pending.lock();
        if !shared.activated.load(Ordering::Acquire) {
            pending.push(source);
            return tag;
        }
    }

    let installed = dispatcher.call_on_loop(move || {
        context::with_current(|ctx| ctx.install(source)).unwrap_or_else(|| {
            warn!(%tag, "no loop context on this thread; source dropped");
            false
        })
    });
    match installed {
        Some(true) => tag,
        _ => SourceTag::NULL,
    }
}

/// Routes a source removal to the loop thread; off-loop callers block until
/// the removal took effect.
pub(crate) fn submit_removal(
    shared: &Arc<ReactorShared>,
    dispatcher: &Dispatcher,
    kind: SourceKind,
    tag: SourceTag,
) {
    if tag.is_null() {
        return;
    }
    if dispatcher.on_loop_thread() {
        context::with_current(|ctx| ctx.remove(kind, tag));
        return;
    }

    {
        let mut pending = shared.pending.lock();
        if !shared.activated.load(Ordering::Acquire) {
            match pending.iter().position(|s| s.tag() == tag) {
                Some(pos) if pending[pos].kind() == kind => {
                    pending.remove(pos);
                }
                Some(pos) => {
                    warn!(
                        %tag,
                        requested = %kind,
                        registered = %pending[pos].kind(),
                        "source kind mismatch; not removing"
                    );
                }
                None => context::log_missing(kind, tag),
            }
            return;
        }
    }

    let removed = dispatcher.call_on_loop(move || {
        context::with_current(|ctx| ctx.remove(kind, tag));
    });
    if removed.is_none() {
        debug!(%tag, "loop gone before the removal could run");
    }
}

/// Answers an introspection query about `tag` from the loop thread.
pub(crate) fn source_exists(
    shared: &Arc<ReactorShared>,
    dispatcher: &Dispatcher,
    tag: SourceTag,
) -> bool {
    if tag.is_null() {
        return false;
    }
    {
        let pending = shared.pending.lock();
        if !shared.activated.load(Ordering::Acquire) {
            return pending.iter().any(|s| s.tag() == tag);
        }
    }
    dispatcher
        .call_on_loop(move || {
            context::with_current(|ctx| ctx.sources.borrow().contains_key(&tag)).unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Counts the live sources of one kind, answered on the loop thread.
pub(crate) fn active_count(
    shared: &Arc<ReactorShared>,
    dispatcher: &Dispatcher,
    kind: SourceKind,
) -> usize {
    {
        let pending = shared.pending.lock();
        if !shared.activated.load(Ordering::Acquire) {
            return pending.iter().filter(|s| s.kind() == kind).count();
        }
    }
    dispatcher
        .call_on_loop(move || {
            context::with_current(|ctx| {
                ctx.sources
                    .borrow()
                    .values()
                    .filter(|entry| entry.kind == kind)
                    .count()
            })
            .unwrap_or(0)
        })
        .unwrap_or(0)
}

/// Requests loop shutdown with `code` as the eventual `run()` return value.
///
/// Only the first request counts; later ones keep the original code. Work
/// already drained keeps running to the end of its batch, work still queued
/// is discarded.
pub(crate) fn request_stop(shared: &ReactorShared, code: i32) {
    if shared.shutdown.is_cancelled() {
        debug!(code, "stop already requested; keeping the first exit code");
        return;
    }
    *shared.exit_code.lock() = code;
    shared.shutdown.cancel();
}

fn activate_pending(shared: &Arc<ReactorShared>, ctx: &Rc<LoopCtx>) {
    let batch = {
        let mut pending = shared.pending.lock();
        shared.activated.store(true, Ordering::Release);
        std::mem::take(&mut *pending)
    };
    for source in batch {
        let tag = source.tag();
        if !ctx.install(source) {
            debug!(%tag, "pre-start source failed to install");
        }
    }
}

async fn drive(shared: &Arc<ReactorShared>, ctx: &Rc<LoopCtx>) {
    activate_pending(shared, ctx);
    let queue = &shared.dispatch.queue;
    loop {
        for task in queue.swap_batch() {
            task();
        }
        // Checked between batches so a stop requested by a drained closure
        // lets the rest of its batch finish first.
        if shared.shutdown.is_cancelled() {
            break;
        }
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            _ = queue.wait_work() => {}
        }
    }

    let dropped = queue.close();
    if dropped > 0 {
        debug!(count = dropped, "discarding deferred work at shutdown");
    }
    ctx.teardown().await;
}

/// A single-threaded event loop.
///
/// The thread that calls [`run`](Reactor::run) becomes the loop thread:
/// every source callback, deferred closure, and bus delivery happens there,
/// so none of them need internal locking. Other threads interact with the
/// loop through a [`ReactorHandle`] (or its [`Dispatcher`]), both of which
/// stay valid for the whole lifecycle.
///
/// Sources may be registered before `run()`; they are armed as the loop
/// comes up. A reactor runs at most once: `run` consumes it and returns the
/// exit code passed to [`stop`](ReactorHandle::stop).
pub struct Reactor {
    handle: ReactorHandle,
}

impl Reactor {
    /// Creates a loop in the idle state.
    pub fn new() -> Self {
        let id = NEXT_REACTOR_ID.fetch_add(1, Ordering::Relaxed);
        let dispatch = Arc::new(DispatchCore::new(id));
        let dispatcher = Dispatcher::new(Arc::clone(&dispatch));
        let shared = Arc::new(ReactorShared {
            dispatch,
            shutdown: CancellationToken::new(),
            exit_code: Mutex::new(0),
            pending: Mutex::new(Vec::new()),
            activated: AtomicBool::new(false),
            tags: TagCounters::new(),
            listeners: ListenerHub::new(),
        });
        Reactor {
            handle: ReactorHandle { shared, dispatcher },
        }
    }

    /// A cloneable handle usable from any thread.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Runs the loop on a dedicated thread.
    ///
    /// Returns the join handle (yielding the exit code, as
    /// [`run`](Self::run) would) together with a handle for driving the
    /// loop from the calling thread.
    pub fn spawn(self) -> (std::thread::JoinHandle<i32>, ReactorHandle) {
        let handle = self.handle();
        let thread = std::thread::spawn(move || self.run());
        (thread, handle)
    }

    /// Runs the loop on the calling thread until [`stop`](ReactorHandle::stop).
    ///
    /// Returns the exit code given to the first `stop` call (`0` by
    /// default). On return all sources are cancelled, undrained deferred
    /// work is discarded with its blocked submitters woken, and pending bus
    /// calls have failed with a disconnect error.
    pub fn run(self) -> i32 {
        let ReactorHandle { shared, dispatcher } = self.handle;
        let reactor_id = dispatcher.reactor_id();
        if !dispatcher.mark_running() {
            error!(reactor_id, "loop already ran once; refusing to run again");
            return 1;
        }

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(reactor_id, error = %err, "cannot build the loop runtime");
                shared.dispatch.queue.close();
                dispatcher.mark_stopped();
                return 1;
            }
        };

        thread_guard::register(reactor_id);
        info!(reactor_id, "loop running");

        let local = tokio::task::LocalSet::new();
        let ctx = LoopCtx::new(reactor_id, dispatcher.clone());
        context::set_current(Rc::clone(&ctx));
        local.block_on(&runtime, drive(&shared, &ctx));
        context::clear_current();

        dispatcher.mark_stopped();
        thread_guard::unregister(reactor_id);
        let code = *shared.exit_code.lock();
        info!(reactor_id, code, "loop stopped");
        code
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for Reactor {
    type Target = ReactorHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("id", &self.handle.dispatcher.reactor_id())
            .finish()
    }
}
