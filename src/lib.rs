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

#![forbid(unsafe_code)]
#![forbid(missing_docs)] // Keep this to enforce coverage

//! # Busbar
//!
//! Busbar is the concurrency and correlation engine for daemons that expose a
//! remote-procedure and publish/subscribe interface over a message bus. One
//! dedicated thread owns every non-thread-safe resource; every other thread
//! reaches that state through a single disciplined hand-off.
//!
//! ## Key Concepts
//!
//! - **Reactor (`Reactor`, `ReactorHandle`)**: a single-threaded event loop
//!   owning timers, I/O readiness watchers, OS-signal watchers and child-exit
//!   watchers. `run()` blocks its thread until `stop()` and returns an exit
//!   code.
//! - **Dispatch (`Dispatcher`)**: the deferred-work queue plus wakeup that
//!   moves closures onto the loop thread from anywhere, including a blocking
//!   `call_on_loop` for threads that need the result back.
//! - **Bus calls (`BusConnection`)**: outgoing RPC with synchronous and
//!   asynchronous variants; replies are matched to pending calls by a
//!   per-connection correlation token.
//! - **Inbound requests (`ServiceRequest`)**: an at-most-once reply guard
//!   around each incoming call, with a destructor safety net so a forgotten
//!   reply still answers the remote caller.
//! - **Pub/sub (`ServiceHost`)**: three independent topic families with
//!   per-topic value caches, replay to late subscribers, and automatic
//!   revocation when a subscribed peer vanishes from the bus.
//! - **Transports (`BusTransport`)**: the wire is a collaborator behind a
//!   narrow trait; an in-memory loopback hub ships for tests and demos.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use busbar::prelude::*;
//!
//! let (thread, reactor) = Reactor::new().spawn();
//! reactor.wait_running();
//! let tag = reactor.add_timer(std::time::Duration::from_millis(250), || {
//!     tracing::info!("tick");
//! });
//! // ... later
//! reactor.remove_timer(tag);
//! reactor.stop(0);
//! let code = thread.join().unwrap();
//! ```

/// Shared utilities: configuration, variant values, internal type aliases.
pub(crate) mod common;

/// The deferred-work queue and the cross-thread dispatcher built on it.
pub(crate) mod dispatch;

/// The single-threaded event loop and its event sources.
pub(crate) mod reactor;

/// Outgoing bus traffic: messages, errors, call correlation, match rules,
/// and the loopback transport.
pub(crate) mod bus;

/// Inbound service surface: request guards, subscription registry, liveness
/// tracking, and the method router.
pub(crate) mod service;

/// Seams to external collaborators: transports, service handlers, settings.
pub(crate) mod traits;

/// A prelude module for conveniently importing the most commonly used items.
///
/// # Re-exports
///
/// ## External Crates
/// *   [`async_trait::async_trait`](https://docs.rs/async-trait/latest/async_trait/attr.async_trait.html): The macro for defining async functions in traits.
///
/// ## Reactor
/// *   [`crate::reactor::Reactor`]: The event loop; owns all event sources.
/// *   [`crate::reactor::ReactorHandle`]: Cloneable cross-thread handle.
/// *   [`crate::reactor::SourceTag`], [`crate::reactor::SourceKind`]: Event-source identification.
/// *   [`crate::reactor::IoInterest`], [`crate::reactor::IoEvents`]: I/O readiness masks.
/// *   [`crate::reactor::ChildExit`], [`crate::reactor::ChildStatus`]: Child-watcher results.
///
/// ## Dispatch
/// *   [`crate::dispatch::Dispatcher`]: invoke / flush / call_on_loop.
///
/// ## Bus
/// *   [`crate::bus::BusMessage`], [`crate::bus::MessageKind`], [`crate::bus::PeerId`]: Wire-neutral messages.
/// *   [`crate::bus::BusError`], [`crate::bus::CallResult`]: The error vocabulary.
/// *   [`crate::bus::BusConnection`]: Outgoing RPC and signal subscriptions.
/// *   [`crate::bus::MatchSpec`]: Composite signal filters.
/// *   [`crate::bus::LoopbackHub`], [`crate::bus::LoopbackEndpoint`]: In-memory transport for tests and demos.
///
/// ## Service
/// *   [`crate::service::ServiceHost`], [`crate::service::ServiceHostBuilder`]: Method routing and topic publishing.
/// *   [`crate::service::ServiceRequest`], [`crate::service::RequestMethod`]: Inbound request guard.
/// *   [`crate::service::ReplyError`]: The canned error vocabulary.
/// *   [`crate::service::TopicFamily`]: The three pub/sub namespaces.
///
/// ## Traits
/// *   [`crate::traits::BusTransport`], [`crate::traits::TransportEvent`]: The wire seam.
/// *   [`crate::traits::ServiceHandler`]: Application-supplied method bodies.
/// *   [`crate::traits::SettingsStore`], [`crate::traits::MemorySettings`]: Settings seam.
///
/// ## Common
/// *   [`crate::common::BusbarConfig`]: Configuration loaded from XDG locations.
/// *   [`crate::common::Variant`], [`crate::common::VariantMap`]: Structured status values.
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::bus::{
        BusConnection, BusError, BusMessage, CallResult, LoopbackEndpoint, LoopbackHub, MatchSpec,
        MessageKind, PeerId,
    };
    pub use crate::common::{BusbarConfig, Variant, VariantMap};
    pub use crate::dispatch::Dispatcher;
    pub use crate::reactor::{
        ChildExit, ChildStatus, IoEvents, IoInterest, Reactor, ReactorHandle, SourceKind,
        SourceTag,
    };
    pub use crate::service::{
        ReplyError, RequestMethod, ServiceHost, ServiceHostBuilder, ServiceRequest, TopicFamily,
    };
    pub use crate::traits::{
        BusTransport, MemorySettings, ServiceHandler, SettingsStore, TransportEvent,
    };
}
