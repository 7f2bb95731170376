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

//! The inbound half of a daemon: method routing, the reply-once request
//! guard, the three pub/sub topic families with cached replay, and the
//! liveness tracking that revokes subscriptions of vanished peers.

pub use host::{ServiceHost, ServiceHostBuilder};
pub(crate) use host::ServiceCore;
pub use registry::TopicFamily;
pub use request::{ReplyError, RequestMethod, ServiceRequest};

mod host;
mod liveness;
mod registry;
mod request;
