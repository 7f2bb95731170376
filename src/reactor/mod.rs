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

//! The single-threaded event loop.
//!
//! A [`Reactor`] owns one loop thread and multiplexes four source kinds on
//! it: timers, fd readiness, POSIX signals, and child exits. Callbacks
//! always run on the loop thread; cross-thread interaction goes through
//! [`ReactorHandle`] and the deferred-work queue behind it.

pub use event_loop::Reactor;
pub use handle::ReactorHandle;
pub use interest::{ChildExit, ChildStatus, IoEvents, IoInterest, SourceKind, SourceTag};

pub(crate) mod context;
mod event_loop;
mod handle;
mod interest;
pub(crate) mod listeners;
pub(crate) mod sources;
pub(crate) mod thread_guard;
