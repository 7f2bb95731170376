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

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::bus::{BusError, BusMessage, CallResult, PeerId};

/// An event pushed by a transport to its owning connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound message: a method call, a reply, or a signal.
    Message(BusMessage),
    /// Some peer left the bus. The notification does not say which one;
    /// interested parties rescan with
    /// [`is_peer_present`](BusTransport::is_peer_present).
    PeerVanished,
}

/// Wire-level bus access.
///
/// Implementations own the actual message delivery (this crate ships an
/// in-memory [`LoopbackHub`](crate::bus::LoopbackHub); a system-bus binding
/// would live outside). All methods are synchronous and callable from any
/// thread; the connection layer supplies the threading discipline on top.
pub trait BusTransport: Send + Sync {
    /// This endpoint's own bus name.
    fn unique_name(&self) -> PeerId;

    /// Fire-and-forget transmission of a reply or signal.
    fn send(&self, message: BusMessage) -> Result<(), BusError>;

    /// Transmits a method call and returns the serial assigned to it, for
    /// correlating the eventual reply.
    fn submit_call(&self, message: BusMessage) -> Result<u64, BusError>;

    /// Transmits a method call and blocks the calling thread for its reply,
    /// up to `timeout`.
    fn call_blocking(&self, message: BusMessage, timeout: Duration) -> CallResult;

    /// Whether `peer` is currently connected to the bus.
    fn is_peer_present(&self, peer: &PeerId) -> bool;

    /// Hands over the inbound event stream.
    ///
    /// There is exactly one stream per endpoint; the first call takes it
    /// and later calls return `None`.
    fn take_events(&self) -> Option<UnboundedReceiver<TransportEvent>>;

    /// Leaves the bus. Remaining peers observe a
    /// [`TransportEvent::PeerVanished`].
    fn disconnect(&self);
}
