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

use std::fmt;

use tokio::io::{Interest, Ready};

/// Identifier for an event source registered with a reactor.
///
/// Tags are plain integers, unique per reactor for its lifetime and never
/// reused. The zero value is the null tag: it never names a live source, and
/// removing it is a no-op, which makes `SourceTag::NULL` a safe "nothing
/// registered" placeholder in caller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceTag(u64);

impl SourceTag {
    /// The tag that names no source.
    pub const NULL: SourceTag = SourceTag(0);

    pub(crate) const fn new(raw: u64) -> Self {
        SourceTag(raw)
    }

    /// `true` for [`SourceTag::NULL`].
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The raw integer value, mostly useful for logging.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The four families of event sources a reactor can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Periodic or single-shot timer.
    Timer,
    /// File-descriptor readiness.
    Io,
    /// Delivery of a POSIX signal.
    Signal,
    /// Exit of a child process.
    Child,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Timer => "timer",
            SourceKind::Io => "io",
            SourceKind::Signal => "signal",
            SourceKind::Child => "child",
        };
        f.write_str(name)
    }
}

/// Which readiness conditions an I/O source asks to be woken for.
///
/// An empty interest is treated as read interest at registration time.
/// Error and hangup conditions are always delivered, whether asked for
/// or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoInterest {
    /// Wake when the descriptor becomes readable.
    pub readable: bool,
    /// Wake when the descriptor becomes writable.
    pub writable: bool,
}

impl IoInterest {
    /// Read interest only.
    pub const READABLE: IoInterest = IoInterest {
        readable: true,
        writable: false,
    };

    /// Write interest only.
    pub const WRITABLE: IoInterest = IoInterest {
        readable: false,
        writable: true,
    };

    /// Both directions.
    pub const fn both() -> Self {
        IoInterest {
            readable: true,
            writable: true,
        }
    }

    pub(crate) fn to_tokio(self) -> Interest {
        let base = match (self.readable, self.writable) {
            (true, true) => Interest::READABLE.add(Interest::WRITABLE),
            (false, true) => Interest::WRITABLE,
            // Empty interest defaults to readable.
            _ => Interest::READABLE,
        };
        base.add(Interest::ERROR)
    }
}

impl fmt::Display for IoInterest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.readable, self.writable) {
            (true, true) => f.write_str("rw"),
            (false, true) => f.write_str("w"),
            _ => f.write_str("r"),
        }
    }
}

/// The readiness conditions that actually fired for an I/O source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoEvents {
    /// The descriptor is readable.
    pub readable: bool,
    /// The descriptor is writable.
    pub writable: bool,
    /// The descriptor is in an error state.
    pub error: bool,
    /// The peer closed its end.
    pub hangup: bool,
}

impl IoEvents {
    pub(crate) fn from_ready(ready: Ready) -> Self {
        IoEvents {
            readable: ready.is_readable(),
            writable: ready.is_writable(),
            error: ready.is_error(),
            hangup: ready.is_read_closed() || ready.is_write_closed(),
        }
    }

    /// `true` when at least one condition is set.
    pub fn any(self) -> bool {
        self.readable || self.writable || self.error || self.hangup
    }
}

/// How a watched child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Normal exit with the given status code.
    Exited(i32),
    /// Killed by the given signal.
    Signaled(i32),
}

/// Report handed to a child watcher callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Pid of the child that terminated.
    pub pid: i32,
    /// How it terminated.
    pub status: ChildStatus,
}
