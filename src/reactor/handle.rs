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

use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use crate::common::types::ListenerCallback;
use crate::common::VariantMap;
use crate::dispatch::Dispatcher;
use crate::reactor::event_loop::{
    active_count, request_stop, source_exists, submit_removal, submit_source, ReactorShared,
};
use crate::reactor::sources::PendingSource;
use crate::reactor::{ChildExit, IoEvents, IoInterest, SourceKind, SourceTag};

/// Cloneable, thread-safe handle to a [`Reactor`](crate::reactor::Reactor).
///
/// Sources can be registered and removed from any thread and in any loop
/// state: before `run()` they are parked and armed at startup; while the
/// loop runs, off-loop callers hop to the loop thread and block until the
/// operation took effect; after the loop stopped the attempt is logged and
/// refused.
///
/// Dereferences to the loop's [`Dispatcher`] for `invoke`, `flush`,
/// `call_on_loop` and the running-state queries.
#[derive(Clone)]
pub struct ReactorHandle {
    pub(crate) shared: Arc<ReactorShared>,
    pub(crate) dispatcher: Dispatcher,
}

impl ReactorHandle {
    /// An owned copy of the loop's dispatcher.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub(crate) fn shared(&self) -> &Arc<ReactorShared> {
        &self.shared
    }

    /// Arms a repeating timer. The first fire comes one `interval` after
    /// arming; later fires drift by however long the callback takes.
    pub fn add_timer(
        &self,
        interval: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> SourceTag {
        let tag = self.shared.tags.next(SourceKind::Timer);
        submit_source(
            &self.shared,
            &self.dispatcher,
            PendingSource::Timer {
                tag,
                interval,
                single_shot: false,
                callback: Box::new(callback),
            },
        )
    }

    /// Arms a timer that fires once after `delay` and then retires its own
    /// tag. Removing the tag after the fire logs at info level only.
    pub fn single_shot(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> SourceTag {
        let tag = self.shared.tags.next(SourceKind::Timer);
        let mut once = Some(callback);
        submit_source(
            &self.shared,
            &self.dispatcher,
            PendingSource::Timer {
                tag,
                interval: delay,
                single_shot: true,
                callback: Box::new(move || {
                    if let Some(f) = once.take() {
                        f();
                    }
                }),
            },
        )
    }

    /// Watches `fd` for readiness. The descriptor is borrowed: the caller
    /// keeps it open for the lifetime of the watch and closes it only after
    /// removal. Error and hangup conditions are reported regardless of
    /// `interest`; an empty interest watches for readability.
    pub fn add_io_source(
        &self,
        fd: RawFd,
        interest: IoInterest,
        callback: impl FnMut(IoEvents) + Send + 'static,
    ) -> SourceTag {
        let tag = self.shared.tags.next(SourceKind::Io);
        submit_source(
            &self.shared,
            &self.dispatcher,
            PendingSource::Io {
                tag,
                fd,
                interest,
                callback: Box::new(callback),
            },
        )
    }

    /// Watches for deliveries of the POSIX signal `signo`.
    pub fn add_signal_watch(
        &self,
        signo: i32,
        callback: impl FnMut(i32) + Send + 'static,
    ) -> SourceTag {
        let tag = self.shared.tags.next(SourceKind::Signal);
        submit_source(
            &self.shared,
            &self.dispatcher,
            PendingSource::Signal {
                tag,
                signo,
                callback: Box::new(callback),
            },
        )
    }

    /// Watches the child process `pid` and fires once when it exits,
    /// reaping it. The watch retires its own tag after firing.
    pub fn add_child_watch(
        &self,
        pid: i32,
        callback: impl FnOnce(ChildExit) + Send + 'static,
    ) -> SourceTag {
        let tag = self.shared.tags.next(SourceKind::Child);
        submit_source(
            &self.shared,
            &self.dispatcher,
            PendingSource::Child {
                tag,
                pid,
                callback: Box::new(callback),
            },
        )
    }

    /// Cancels a repeating timer. Removing an already-expired single-shot
    /// tag is harmless.
    pub fn remove_timer(&self, tag: SourceTag) {
        submit_removal(&self.shared, &self.dispatcher, SourceKind::Timer, tag);
    }

    /// Stops watching a descriptor; once this returns the fd may be closed.
    pub fn remove_io_source(&self, tag: SourceTag) {
        submit_removal(&self.shared, &self.dispatcher, SourceKind::Io, tag);
    }

    /// Stops watching a signal.
    pub fn remove_signal_watch(&self, tag: SourceTag) {
        submit_removal(&self.shared, &self.dispatcher, SourceKind::Signal, tag);
    }

    /// Cancels a child watch that has not fired yet.
    pub fn remove_child_watch(&self, tag: SourceTag) {
        submit_removal(&self.shared, &self.dispatcher, SourceKind::Child, tag);
    }

    /// Whether `tag` still names a live (or parked pre-start) source.
    ///
    /// Answered on the loop thread; off-loop callers block for the answer.
    pub fn source_exists(&self, tag: SourceTag) -> bool {
        source_exists(&self.shared, &self.dispatcher, tag)
    }

    /// Number of live timers, expired single-shots excluded.
    pub fn active_timer_count(&self) -> usize {
        active_count(&self.shared, &self.dispatcher, SourceKind::Timer)
    }

    /// Number of live descriptor watches.
    pub fn active_io_count(&self) -> usize {
        active_count(&self.shared, &self.dispatcher, SourceKind::Io)
    }

    /// Number of live signal watches.
    pub fn active_signal_count(&self) -> usize {
        active_count(&self.shared, &self.dispatcher, SourceKind::Signal)
    }

    /// Number of child watches that have not fired yet.
    pub fn active_child_count(&self) -> usize {
        active_count(&self.shared, &self.dispatcher, SourceKind::Child)
    }

    /// Asks the loop to exit; `run()` will return `code`.
    ///
    /// Callable from any thread, including loop callbacks. Only the first
    /// call picks the exit code. When called from a drained closure, the
    /// remainder of that closure's batch still runs before the loop winds
    /// down; work queued but not yet drained is discarded.
    pub fn stop(&self, code: i32) {
        request_stop(&self.shared, code);
    }

    /// Registers an in-process listener for the named event.
    ///
    /// Listeners run synchronously on whichever thread emits; the returned
    /// token removes the registration again.
    pub fn add_listener(
        &self,
        event: &str,
        callback: impl FnMut(&VariantMap) + Send + 'static,
    ) -> u64 {
        let callback: ListenerCallback = Box::new(callback);
        self.shared.listeners.add(event, callback)
    }

    /// Drops the listener registered under `token`. Unknown tokens are
    /// logged and refused.
    pub fn remove_listener(&self, token: u64) -> bool {
        self.shared.listeners.remove(token)
    }

    /// Delivers `payload` to every listener of `event`, in registration
    /// order, on the calling thread.
    pub fn emit_event(&self, event: &str, payload: &VariantMap) {
        self.shared.listeners.emit(event, payload);
    }
}

impl std::ops::Deref for ReactorHandle {
    type Target = Dispatcher;

    fn deref(&self) -> &Self::Target {
        &self.dispatcher
    }
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("reactor_id", &self.dispatcher.reactor_id())
            .finish()
    }
}
