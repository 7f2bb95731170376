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

//! Crate-internal type aliases.
//!
//! Every callback crossing the dispatcher is boxed and `Send`: it is created
//! on an arbitrary thread and moved onto the loop thread exactly once. After
//! installation it never leaves that thread again.

use crate::bus::CallResult;
use crate::common::VariantMap;
use crate::reactor::{ChildExit, IoEvents};

/// A deferred unit of work queued for the loop thread.
pub(crate) type DeferredTask = Box<dyn FnOnce() + Send>;

/// Callback fired when a timer elapses.
pub(crate) type TimerCallback = Box<dyn FnMut() + Send>;

/// Callback fired with the translated readiness mask of a watched descriptor.
pub(crate) type IoCallback = Box<dyn FnMut(IoEvents) + Send>;

/// Callback fired with the signal number when a watched OS signal arrives.
pub(crate) type SignalCallback = Box<dyn FnMut(i32) + Send>;

/// Callback fired once when a watched child process exits.
pub(crate) type ChildCallback = Box<dyn FnOnce(ChildExit) + Send>;

/// Callback fired for an in-process reactor event.
pub(crate) type ListenerCallback = Box<dyn FnMut(&VariantMap) + Send>;

/// Completion callback for an asynchronous outgoing call. Invoked exactly
/// once, on the loop thread, with the reply or a failure.
pub(crate) type ReplyCallback = Box<dyn FnOnce(CallResult) + Send>;

/// Callback for a matched bus signal: receives the match tag and the signal.
pub(crate) type SignalMatchCallback = Box<dyn FnMut(u64, &crate::bus::BusMessage) + Send>;
