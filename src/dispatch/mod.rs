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

//! Cross-thread work submission.
//!
//! Any thread may append closures to the deferred-work queue; only the loop
//! thread drains it, strictly in FIFO order. Work enqueued by a running
//! closure lands in the next drain, never the current one.

pub use dispatcher::Dispatcher;
pub(crate) use dispatcher::{DispatchCore, RunState};
pub(crate) use queue::DeferredQueue;

mod dispatcher;
mod queue;
