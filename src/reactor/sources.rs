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

//! Event source plumbing.
//!
//! Each registered source is a small task on the loop's `LocalSet` plus an
//! entry in the context's source table. The task waits (timer sleep, fd
//! readiness, signal stream, SIGCHLD) and fires the table entry's callback;
//! removal cancels the task through its token. Callbacks are invoked with no
//! table borrow held, so a callback may freely remove or add sources,
//! including its own.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::io::unix::AsyncFd;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::common::types::{ChildCallback, IoCallback, SignalCallback, TimerCallback};
use crate::reactor::context::LoopCtx;
use crate::reactor::{ChildExit, ChildStatus, IoEvents, IoInterest, SourceKind, SourceTag};

/// A registered source's callback, one variant per kind.
pub(crate) enum SourceCallback {
    Timer(TimerCallback),
    Io(IoCallback),
    Signal(SignalCallback),
    /// Consumed on first fire.
    Child(Option<ChildCallback>),
}

/// Table entry for a live source.
pub(crate) struct SourceEntry {
    pub(crate) kind: SourceKind,
    pub(crate) callback: Rc<RefCell<SourceCallback>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) task: Option<JoinHandle<()>>,
}

/// A source registration that has not reached the loop thread yet.
///
/// Registrations made before `run()` (or from foreign threads) travel as one
/// of these; everything inside is `Send`. The tag was already handed to the
/// caller, so installation failures can only be logged, not returned.
pub(crate) enum PendingSource {
    Timer {
        tag: SourceTag,
        interval: Duration,
        single_shot: bool,
        callback: TimerCallback,
    },
    Io {
        tag: SourceTag,
        fd: RawFd,
        interest: IoInterest,
        callback: IoCallback,
    },
    Signal {
        tag: SourceTag,
        signo: i32,
        callback: SignalCallback,
    },
    Child {
        tag: SourceTag,
        pid: i32,
        callback: ChildCallback,
    },
}

impl PendingSource {
    pub(crate) fn tag(&self) -> SourceTag {
        match self {
            PendingSource::Timer { tag, .. }
            | PendingSource::Io { tag, .. }
            | PendingSource::Signal { tag, .. }
            | PendingSource::Child { tag, .. } => *tag,
        }
    }

    pub(crate) fn kind(&self) -> SourceKind {
        match self {
            PendingSource::Timer { .. } => SourceKind::Timer,
            PendingSource::Io { .. } => SourceKind::Io,
            PendingSource::Signal { .. } => SourceKind::Signal,
            PendingSource::Child { .. } => SourceKind::Child,
        }
    }
}

/// Watched descriptor; borrowed, never closed by the reactor.
#[derive(Debug)]
struct WatchedFd(RawFd);

impl AsRawFd for WatchedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl LoopCtx {
    /// Installs a pending source on the loop thread, spawning its task.
    ///
    /// Returns `false` when the underlying watch could not be created; the
    /// failure is logged and no entry is added, so removing the tag later
    /// logs an absent-source message and nothing more.
    pub(crate) fn install(self: &Rc<Self>, source: PendingSource) -> bool {
        crate::reactor::thread_guard::assert_loop_thread(self.id);
        match source {
            PendingSource::Timer {
                tag,
                interval,
                single_shot,
                callback,
            } => {
                self.install_timer(tag, interval, single_shot, callback);
                true
            }
            PendingSource::Io {
                tag,
                fd,
                interest,
                callback,
            } => self.install_io(tag, fd, interest, callback),
            PendingSource::Signal { tag, signo, callback } => {
                self.install_signal(tag, signo, callback)
            }
            PendingSource::Child { tag, pid, callback } => {
                self.install_child(tag, pid, callback);
                true
            }
        }
    }

    fn insert_entry(
        &self,
        tag: SourceTag,
        kind: SourceKind,
        callback: Rc<RefCell<SourceCallback>>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) {
        let replaced = self.sources.borrow_mut().insert(
            tag,
            SourceEntry {
                kind,
                callback,
                cancel,
                task: Some(task),
            },
        );
        debug_assert!(replaced.is_none(), "source tags are never reused");
    }

    fn install_timer(
        self: &Rc<Self>,
        tag: SourceTag,
        interval: Duration,
        single_shot: bool,
        callback: TimerCallback,
    ) {
        trace!(%tag, ?interval, single_shot, "arming timer");
        let callback = Rc::new(RefCell::new(SourceCallback::Timer(callback)));
        let cancel = CancellationToken::new();
        let ctx = Rc::downgrade(self);
        let token = cancel.clone();
        let task = tokio::task::spawn_local(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    // Plain sleep per tick: a slow callback pushes every
                    // later tick back, it is never compensated for.
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(ctx) = ctx.upgrade() else { break };
                ctx.fire_timer(tag);
                if single_shot {
                    ctx.prune(tag);
                    break;
                }
                if token.is_cancelled() {
                    break;
                }
            }
        });
        self.insert_entry(tag, SourceKind::Timer, callback, cancel, task);
    }

    fn install_io(
        self: &Rc<Self>,
        tag: SourceTag,
        fd: RawFd,
        interest: IoInterest,
        callback: IoCallback,
    ) -> bool {
        let tokio_interest = interest.to_tokio();
        let afd = match AsyncFd::with_interest(WatchedFd(fd), tokio_interest) {
            Ok(afd) => afd,
            Err(err) => {
                error!(%tag, fd, error = %err, "cannot watch descriptor");
                return false;
            }
        };
        trace!(%tag, fd, %interest, "watching descriptor");
        let callback = Rc::new(RefCell::new(SourceCallback::Io(callback)));
        let cancel = CancellationToken::new();
        let ctx = Rc::downgrade(self);
        let token = cancel.clone();
        let task = tokio::task::spawn_local(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    ready = afd.ready(tokio_interest) => match ready {
                        Ok(mut guard) => {
                            let events = IoEvents::from_ready(guard.ready());
                            // Cleared before the callback runs: readiness
                            // that appears while it runs sets a fresh edge.
                            guard.clear_ready();
                            let Some(ctx) = ctx.upgrade() else { break };
                            ctx.fire_io(tag, events);
                            if token.is_cancelled() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(%tag, fd, error = %err, "descriptor wait failed; dropping watch");
                            if let Some(ctx) = ctx.upgrade() {
                                ctx.prune(tag);
                            }
                            break;
                        }
                    }
                }
            }
        });
        self.insert_entry(tag, SourceKind::Io, callback, cancel, task);
        true
    }

    fn install_signal(
        self: &Rc<Self>,
        tag: SourceTag,
        signo: i32,
        callback: SignalCallback,
    ) -> bool {
        let mut stream = match signal(SignalKind::from_raw(signo)) {
            Ok(stream) => stream,
            Err(err) => {
                error!(%tag, signo, error = %err, "cannot watch signal");
                return false;
            }
        };
        trace!(%tag, signo, "watching signal");
        let callback = Rc::new(RefCell::new(SourceCallback::Signal(callback)));
        let cancel = CancellationToken::new();
        let ctx = Rc::downgrade(self);
        let token = cancel.clone();
        let task = tokio::task::spawn_local(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    received = stream.recv() => {
                        if received.is_none() {
                            break;
                        }
                        let Some(ctx) = ctx.upgrade() else { break };
                        ctx.fire_signal(tag, signo);
                        if token.is_cancelled() {
                            break;
                        }
                    }
                }
            }
        });
        self.insert_entry(tag, SourceKind::Signal, callback, cancel, task);
        true
    }

    fn install_child(self: &Rc<Self>, tag: SourceTag, pid: i32, callback: ChildCallback) {
        trace!(%tag, pid, "watching child");
        let callback = Rc::new(RefCell::new(SourceCallback::Child(Some(callback))));
        let cancel = CancellationToken::new();
        let ctx = Rc::downgrade(self);
        let token = cancel.clone();
        let task = tokio::task::spawn_local(async move {
            // SIGCHLD subscription must predate the first probe or an exit
            // between probe and subscribe could go unseen.
            let mut sigchld = match signal(SignalKind::child()) {
                Ok(stream) => Some(stream),
                Err(err) => {
                    warn!(%tag, pid, error = %err, "cannot watch SIGCHLD; probing once");
                    None
                }
            };
            loop {
                match probe_child(pid) {
                    ChildProbe::Exited(status) => {
                        if let Some(ctx) = ctx.upgrade() {
                            ctx.fire_child(tag, ChildExit { pid, status });
                            ctx.prune(tag);
                        }
                        break;
                    }
                    ChildProbe::Gone => {
                        warn!(%tag, pid, "child not found (already reaped elsewhere?)");
                        if let Some(ctx) = ctx.upgrade() {
                            ctx.prune(tag);
                        }
                        break;
                    }
                    ChildProbe::Alive => {}
                }
                let Some(stream) = sigchld.as_mut() else { break };
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    received = stream.recv() => {
                        if received.is_none() {
                            break;
                        }
                    }
                }
            }
        });
        self.insert_entry(tag, SourceKind::Child, callback, cancel, task);
    }

    /// Looks up `tag` and runs its timer callback with no table borrow held.
    fn fire_timer(self: &Rc<Self>, tag: SourceTag) {
        let Some(callback) = self.callback_for(tag) else {
            return;
        };
        if let SourceCallback::Timer(f) = &mut *callback.borrow_mut() {
            f();
        };
    }

    fn fire_io(self: &Rc<Self>, tag: SourceTag, events: IoEvents) {
        let Some(callback) = self.callback_for(tag) else {
            return;
        };
        if let SourceCallback::Io(f) = &mut *callback.borrow_mut() {
            f(events);
        };
    }

    fn fire_signal(self: &Rc<Self>, tag: SourceTag, signo: i32) {
        let Some(callback) = self.callback_for(tag) else {
            return;
        };
        if let SourceCallback::Signal(f) = &mut *callback.borrow_mut() {
            f(signo);
        };
    }

    fn fire_child(self: &Rc<Self>, tag: SourceTag, exit: ChildExit) {
        let Some(callback) = self.callback_for(tag) else {
            return;
        };
        let taken = match &mut *callback.borrow_mut() {
            SourceCallback::Child(slot) => slot.take(),
            _ => None,
        };
        if let Some(f) = taken {
            f(exit);
        }
    }

    fn callback_for(&self, tag: SourceTag) -> Option<Rc<RefCell<SourceCallback>>> {
        let sources = self.sources.borrow();
        sources.get(&tag).map(|entry| Rc::clone(&entry.callback))
    }
}

enum ChildProbe {
    Alive,
    Exited(ChildStatus),
    Gone,
}

/// Non-blocking wait on `pid`; consumes the exit status when there is one.
fn probe_child(pid: i32) -> ChildProbe {
    match waitid(
        Id::Pid(Pid::from_raw(pid)),
        WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG,
    ) {
        Ok(WaitStatus::StillAlive) => ChildProbe::Alive,
        Ok(WaitStatus::Exited(_, code)) => ChildProbe::Exited(ChildStatus::Exited(code)),
        Ok(WaitStatus::Signaled(_, sig, _)) => ChildProbe::Exited(ChildStatus::Signaled(sig as i32)),
        Ok(other) => {
            debug!(pid, status = ?other, "ignoring intermediate wait status");
            ChildProbe::Alive
        }
        Err(Errno::ECHILD) => ChildProbe::Gone,
        Err(err) => {
            warn!(pid, error = %err, "waitid failed");
            ChildProbe::Gone
        }
    }
}
