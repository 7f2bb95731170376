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

use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::common::types::DeferredTask;

/// MPSC queue of deferred closures with a loop wakeup.
///
/// Producers on any thread call [`push`](Self::push); the loop thread is the
/// only consumer and takes whole batches via [`swap_batch`](Self::swap_batch).
/// Draining by batch is what guarantees that work enqueued *while* a batch
/// runs is deferred to the next drain rather than extending the current one.
pub(crate) struct DeferredQueue {
    tasks: Mutex<VecDeque<DeferredTask>>,
    wakeup: Notify,
    closed: AtomicBool,
}

impl DeferredQueue {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends a task and wakes the loop. Returns `false` once the queue has
    /// been closed; the task is dropped in that case.
    pub(crate) fn push(&self, task: DeferredTask) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.tasks.lock().push_back(task);
        // A push that races with close() is still drained (and dropped) by
        // close(), so the sender-side oneshot contract holds either way.
        self.wakeup.notify_one();
        true
    }

    /// Takes the entire current batch, leaving the queue empty.
    pub(crate) fn swap_batch(&self) -> VecDeque<DeferredTask> {
        mem::take(&mut *self.tasks.lock())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Resolves when at least one push has happened since the last drain.
    pub(crate) async fn wait_work(&self) {
        self.wakeup.notified().await;
    }

    /// Rejects all future pushes and discards anything still queued.
    ///
    /// Dropping the queued closures unblocks any thread parked on a reply
    /// channel captured by one of them, which is exactly what a stopping
    /// loop needs. Returns how many tasks were discarded.
    pub(crate) fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let remaining = self.swap_batch();
        remaining.len()
    }
}
