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

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::common::config::CONFIG;
use crate::common::types::DeferredTask;
use crate::dispatch::DeferredQueue;
use crate::reactor::context;

/// Lifecycle of the loop a [`Dispatcher`] submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    /// `run()` has not been entered yet.
    Idle,
    /// The loop thread owns the queue and is draining it.
    Running,
    /// `run()` has returned; the queue is closed.
    Stopped,
}

/// State shared between a loop and every dispatcher cloned from it.
pub(crate) struct DispatchCore {
    pub(crate) id: u64,
    pub(crate) queue: DeferredQueue,
    pub(crate) state: RwLock<RunState>,
    run_gate: Mutex<()>,
    run_cv: Condvar,
}

impl DispatchCore {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            queue: DeferredQueue::new(),
            state: RwLock::new(RunState::Idle),
            run_gate: Mutex::new(()),
            run_cv: Condvar::new(),
        }
    }
}

/// Cheap, cloneable handle for submitting work to a loop from any thread.
///
/// A `Dispatcher` stays valid across the whole lifecycle of its loop: work
/// submitted before `run()` is drained once the loop starts, and work
/// submitted after the loop stopped is rejected (and logged) rather than
/// lost silently.
#[derive(Clone)]
pub struct Dispatcher {
    core: Arc<DispatchCore>,
}

impl Dispatcher {
    pub(crate) fn new(core: Arc<DispatchCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<DispatchCore> {
        &self.core
    }

    /// The id of the loop this dispatcher submits to.
    pub fn reactor_id(&self) -> u64 {
        self.core.id
    }

    /// `true` while the loop thread is inside `run()`.
    pub fn is_running(&self) -> bool {
        *self.core.state.read() == RunState::Running
    }

    /// `true` when the calling thread is the loop thread itself.
    pub fn on_loop_thread(&self) -> bool {
        context::current_reactor_id() == Some(self.core.id)
    }

    /// Queues `work` to run on the loop thread during a later drain.
    ///
    /// Safe from any thread, including the loop thread itself; work enqueued
    /// from within a draining closure runs in the *next* drain. Returns
    /// `false` (after logging) when the loop has already stopped, in which
    /// case `work` is dropped without running.
    pub fn invoke(&self, work: impl FnOnce() + Send + 'static) -> bool {
        self.push_task(Box::new(work))
    }

    fn push_task(&self, task: DeferredTask) -> bool {
        if self.core.queue.push(task) {
            true
        } else {
            error!(
                reactor_id = self.core.id,
                "deferred work rejected; the loop has shut down"
            );
            false
        }
    }

    /// Blocks until every task queued before this call has run.
    ///
    /// On the loop thread, or while the loop is not running, the queue is
    /// drained in place instead of blocking. Work enqueued by the drained
    /// tasks themselves is drained too; `flush` only returns with the queue
    /// momentarily empty.
    pub fn flush(&self) {
        if self.on_loop_thread() || !self.is_running() {
            self.drain_in_place();
            return;
        }
        let (tx, rx) = oneshot::channel::<()>();
        if !self.invoke(move || {
            let _ = tx.send(());
        }) {
            return;
        }
        if rx.blocking_recv().is_err() {
            if self.is_running() {
                error!(
                    reactor_id = self.core.id,
                    "flush sentinel dropped while the loop is running"
                );
            } else {
                debug!(
                    reactor_id = self.core.id,
                    "flush sentinel dropped; loop stopped mid-flush"
                );
            }
        }
    }

    /// Runs `work` on the loop thread and hands back its result.
    ///
    /// Three cases, in order:
    /// * calling thread *is* the loop thread: `work` runs immediately;
    /// * loop not running (before `run()` or after it returned): `work` runs
    ///   on the calling thread while holding the state lock, so it cannot
    ///   race a concurrent startup;
    /// * loop running: `work` is queued and the caller blocks until it ran.
    ///
    /// Returns `None` only when the loop shut down before `work` could run.
    pub fn call_on_loop<R, F>(&self, work: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.on_loop_thread() {
            return Some(work());
        }

        {
            let state = self.core.state.write();
            if *state != RunState::Running {
                trace!(
                    reactor_id = self.core.id,
                    "loop not running; executing on the calling thread"
                );
                return Some(work());
            }
        }

        let (tx, rx) = oneshot::channel::<R>();
        let queued = self.invoke(move || {
            let _ = tx.send(work());
        });
        if !queued {
            return None;
        }
        match rx.blocking_recv() {
            Ok(value) => Some(value),
            Err(_) => {
                // A queued call can only be dropped unrun at shutdown. Seeing
                // it with the loop still alive means work is being lost.
                if self.is_running() {
                    error!(
                        reactor_id = self.core.id,
                        "queued call dropped while the loop is running"
                    );
                } else {
                    warn!(
                        reactor_id = self.core.id,
                        "loop stopped before queued call could run"
                    );
                }
                None
            }
        }
    }

    /// Blocks until the loop reaches the running state, up to `timeout`.
    ///
    /// Returns `true` once running. Returns `false` on timeout or when the
    /// loop already stopped, whichever happens first.
    pub fn wait_until_running(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.core.run_gate.lock();
        loop {
            match *self.core.state.read() {
                RunState::Running => return true,
                RunState::Stopped => return false,
                RunState::Idle => {}
            }
            if self
                .core
                .run_cv
                .wait_until(&mut gate, deadline)
                .timed_out()
            {
                return *self.core.state.read() == RunState::Running;
            }
        }
    }

    /// [`wait_until_running`](Self::wait_until_running) with the configured
    /// default bound.
    pub fn wait_running(&self) -> bool {
        self.wait_until_running(CONFIG.wait_running_timeout())
    }

    /// Drains the queue on the calling thread until it is empty.
    pub(crate) fn drain_in_place(&self) {
        loop {
            let batch = self.core.queue.swap_batch();
            if batch.is_empty() {
                return;
            }
            for task in batch {
                task();
            }
        }
    }

    /// `Idle` -> `Running`. Returns `false` when the loop ran before.
    pub(crate) fn mark_running(&self) -> bool {
        {
            let mut state = self.core.state.write();
            if *state != RunState::Idle {
                return false;
            }
            *state = RunState::Running;
        }
        let _gate = self.core.run_gate.lock();
        self.core.run_cv.notify_all();
        true
    }

    /// `Running` -> `Stopped`; wakes every `wait_until_running` caller.
    pub(crate) fn mark_stopped(&self) {
        {
            let mut state = self.core.state.write();
            *state = RunState::Stopped;
        }
        let _gate = self.core.run_gate.lock();
        self.core.run_cv.notify_all();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("reactor_id", &self.core.id)
            .field("state", &*self.core.state.read())
            .finish()
    }
}
