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

//! An in-memory bus for tests and demos.
//!
//! A [`LoopbackHub`] plays the role of the bus daemon: it hands out named
//! endpoints, stamps serials, and routes messages between them. Each
//! endpoint implements [`BusTransport`], so a
//! [`BusConnection`](crate::bus::BusConnection) over a loopback endpoint
//! behaves like one over a real wire, minus the wire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace, warn};

use crate::bus::{BusError, BusMessage, CallResult, MessageKind, PeerId};
use crate::traits::{BusTransport, TransportEvent};

/// A peer's mailbox plus the side-channel for its blocked callers.
struct EndpointSlot {
    events: UnboundedSender<TransportEvent>,
    waiters: Arc<Mutex<HashMap<u64, SyncSender<CallResult>>>>,
}

struct HubInner {
    peers: DashMap<PeerId, EndpointSlot>,
    next_peer: AtomicU64,
    next_serial: AtomicU64,
}

impl HubInner {
    fn stamp(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    /// Delivers an already-stamped message.
    fn route(&self, message: BusMessage) -> Result<(), BusError> {
        match message.destination.clone() {
            Some(peer) => self.deliver(&peer, message),
            None if message.kind == MessageKind::Signal => {
                self.broadcast(&message);
                Ok(())
            }
            None => Err(BusError::InvalidRequest(
                "only signals may omit a destination".to_owned(),
            )),
        }
    }

    fn deliver(&self, peer: &PeerId, message: BusMessage) -> Result<(), BusError> {
        let Some(slot) = self.peers.get(peer) else {
            debug!(%peer, member = %message.member, "no such peer on the hub");
            return Err(BusError::ServiceUnknown);
        };

        // A reply may be owed to a thread blocked in `call_blocking`; those
        // are completed here and never travel through the event stream.
        if matches!(message.kind, MessageKind::MethodReturn | MessageKind::Error) {
            if let Some(serial) = message.reply_serial {
                let waiter = slot.waiters.lock().remove(&serial);
                if let Some(waiter) = waiter {
                    let result = match message.to_error() {
                        Some(err) => Err(err),
                        None => Ok(message),
                    };
                    if waiter.send(result).is_err() {
                        debug!(serial, "blocking caller gave up before its reply arrived");
                    }
                    return Ok(());
                }
            }
        }

        slot.events
            .send(TransportEvent::Message(message))
            .map_err(|_| BusError::SendFailed(format!("endpoint {peer} stopped receiving")))
    }

    /// Signals with no destination go to every endpoint except the sender.
    fn broadcast(&self, message: &BusMessage) {
        for entry in self.peers.iter() {
            if message.sender.as_ref() == Some(entry.key()) {
                continue;
            }
            if entry
                .value()
                .events
                .send(TransportEvent::Message(message.clone()))
                .is_err()
            {
                trace!(peer = %entry.key(), "skipping broadcast to a gone endpoint");
            }
        }
    }

    fn announce_departure(&self) {
        for entry in self.peers.iter() {
            if entry.value().events.send(TransportEvent::PeerVanished).is_err() {
                trace!(peer = %entry.key(), "departure notice not deliverable");
            }
        }
    }
}

/// The in-memory bus.
///
/// Cheap to clone; all clones share the same peer directory. Endpoints are
/// created with [`endpoint`](Self::endpoint) and hand themselves back to
/// the hub on [`disconnect`](BusTransport::disconnect) or drop.
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    /// An empty hub.
    pub fn new() -> Self {
        LoopbackHub {
            inner: Arc::new(HubInner {
                peers: DashMap::new(),
                next_peer: AtomicU64::new(1),
                next_serial: AtomicU64::new(1),
            }),
        }
    }

    /// Joins the hub as a fresh peer with a unique name (`:1.1`, `:1.2`,
    /// ...).
    pub fn endpoint(&self) -> Arc<LoopbackEndpoint> {
        let ordinal = self.inner.next_peer.fetch_add(1, Ordering::Relaxed);
        let name = PeerId::from(format!(":1.{ordinal}"));
        let (tx, rx) = mpsc::unbounded_channel();
        let waiters = Arc::new(Mutex::new(HashMap::new()));
        self.inner.peers.insert(
            name.clone(),
            EndpointSlot {
                events: tx,
                waiters: Arc::clone(&waiters),
            },
        );
        info!(peer = %name, "loopback endpoint joined");
        Arc::new(LoopbackEndpoint {
            hub: Arc::clone(&self.inner),
            name,
            events: Mutex::new(Some(rx)),
            waiters,
            connected: AtomicBool::new(true),
        })
    }

    /// Number of peers currently on the hub.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoopbackHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackHub")
            .field("peers", &self.inner.peers.len())
            .finish()
    }
}

/// One peer on a [`LoopbackHub`].
///
/// Outgoing messages are stamped with the endpoint's name and a hub-wide
/// serial, then routed directly into the destination's event stream on the
/// calling thread. Blocking calls wait on a private rendezvous channel, so
/// they work even while the owning loop is stalled in one.
pub struct LoopbackEndpoint {
    hub: Arc<HubInner>,
    name: PeerId,
    events: Mutex<Option<UnboundedReceiver<TransportEvent>>>,
    waiters: Arc<Mutex<HashMap<u64, SyncSender<CallResult>>>>,
    connected: AtomicBool,
}

impl LoopbackEndpoint {
    fn stamp(&self, mut message: BusMessage) -> (u64, BusMessage) {
        let serial = self.hub.stamp();
        message.sender = Some(self.name.clone());
        message.serial = Some(serial);
        (serial, message)
    }

    fn check_connected(&self) -> Result<(), BusError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }
}

impl BusTransport for LoopbackEndpoint {
    fn unique_name(&self) -> PeerId {
        self.name.clone()
    }

    fn send(&self, message: BusMessage) -> Result<(), BusError> {
        self.check_connected()?;
        let (_, message) = self.stamp(message);
        self.hub.route(message)
    }

    fn submit_call(&self, message: BusMessage) -> Result<u64, BusError> {
        self.check_connected()?;
        if message.kind != MessageKind::MethodCall {
            return Err(BusError::InvalidRequest("expected a method call".to_owned()));
        }
        let (serial, message) = self.stamp(message);
        self.hub.route(message)?;
        Ok(serial)
    }

    fn call_blocking(&self, message: BusMessage, timeout: Duration) -> CallResult {
        self.check_connected()?;
        if message.kind != MessageKind::MethodCall {
            return Err(BusError::InvalidRequest("expected a method call".to_owned()));
        }
        let (serial, message) = self.stamp(message);

        // The waiter is registered before the call leaves, so a peer
        // answering from another thread cannot outrun it.
        let (tx, rx) = sync_channel::<CallResult>(1);
        self.waiters.lock().insert(serial, tx);
        if let Err(err) = self.hub.route(message) {
            self.waiters.lock().remove(&serial);
            return Err(err);
        }

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.waiters.lock().remove(&serial);
                warn!(serial, "blocking call timed out");
                Err(BusError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Disconnected),
        }
    }

    fn is_peer_present(&self, peer: &PeerId) -> bool {
        self.hub.peers.contains_key(peer)
    }

    fn take_events(&self) -> Option<UnboundedReceiver<TransportEvent>> {
        self.events.lock().take()
    }

    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.hub.peers.remove(&self.name);
        info!(peer = %self.name, "loopback endpoint left");
        // Dropping the rendezvous senders fails any caller still blocked on
        // a reply from us.
        self.waiters.lock().clear();
        self.hub.announce_departure();
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for LoopbackEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackEndpoint")
            .field("name", &self.name)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde_json::json;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(LoopbackHub: Send, Sync, Clone);
    assert_impl_all!(LoopbackEndpoint: Send, Sync);

    fn recv_message(rx: &mut UnboundedReceiver<TransportEvent>) -> BusMessage {
        match rx.blocking_recv() {
            Some(TransportEvent::Message(message)) => message,
            other => panic!("expected a message event, got {other:?}"),
        }
    }

    #[test]
    fn endpoints_get_unique_names() {
        let hub = LoopbackHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        assert_ne!(a.unique_name(), b.unique_name());
        assert_eq!(hub.peer_count(), 2);
        assert!(a.is_peer_present(&b.unique_name()));
    }

    #[test]
    fn targeted_send_reaches_only_the_destination() {
        let hub = LoopbackHub::new();
        let sender = hub.endpoint();
        let target = hub.endpoint();
        let bystander = hub.endpoint();
        let mut target_rx = target.take_events().unwrap();
        let mut bystander_rx = bystander.take_events().unwrap();

        let signal = BusMessage::targeted_signal(
            target.unique_name(),
            "/p",
            "i.f",
            "Changed",
            json!("v"),
        );
        sender.send(signal).unwrap();

        let received = recv_message(&mut target_rx);
        assert_eq!(received.member, "Changed");
        assert_eq!(received.sender, Some(sender.unique_name()));
        assert!(received.serial.is_some());
        assert!(bystander_rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_skips_the_sender() {
        let hub = LoopbackHub::new();
        let sender = hub.endpoint();
        let other = hub.endpoint();
        let mut sender_rx = sender.take_events().unwrap();
        let mut other_rx = other.take_events().unwrap();

        sender
            .send(BusMessage::signal("/p", "i.f", "Changed", json!(1)))
            .unwrap();

        assert_eq!(recv_message(&mut other_rx).member, "Changed");
        assert!(sender_rx.try_recv().is_err());
    }

    #[test]
    fn calls_need_a_known_destination() {
        let hub = LoopbackHub::new();
        let ep = hub.endpoint();
        let call = BusMessage::method_call(":1.99", "/p", "i.f", "Get", json!(null));
        assert_eq!(ep.submit_call(call), Err(BusError::ServiceUnknown));

        let mut reply = BusMessage::signal("/p", "i.f", "Changed", json!(null));
        reply.kind = MessageKind::MethodReturn;
        assert!(matches!(
            ep.send(reply),
            Err(BusError::InvalidRequest(_))
        ));
    }

    #[test]
    fn submit_call_rejects_non_calls() {
        let hub = LoopbackHub::new();
        let ep = hub.endpoint();
        let other = hub.endpoint();
        let signal =
            BusMessage::targeted_signal(other.unique_name(), "/p", "i.f", "Changed", json!(null));
        assert!(matches!(
            ep.submit_call(signal),
            Err(BusError::InvalidRequest(_))
        ));
    }

    #[test]
    fn serials_are_distinct_across_calls() {
        let hub = LoopbackHub::new();
        let client = hub.endpoint();
        let server = hub.endpoint();
        let _server_rx = server.take_events().unwrap();

        let first = client
            .submit_call(BusMessage::method_call(
                server.unique_name(),
                "/p",
                "i.f",
                "Get",
                json!(null),
            ))
            .unwrap();
        let second = client
            .submit_call(BusMessage::method_call(
                server.unique_name(),
                "/p",
                "i.f",
                "Get",
                json!(null),
            ))
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn blocking_call_round_trips_through_a_peer_thread() {
        let hub = LoopbackHub::new();
        let client = hub.endpoint();
        let server = hub.endpoint();
        let mut server_rx = server.take_events().unwrap();

        let echo = {
            let server = Arc::clone(&server);
            thread::spawn(move || {
                let call = recv_message(&mut server_rx);
                server
                    .send(BusMessage::reply_to(&call, call.body.clone()))
                    .unwrap();
            })
        };

        let reply = client
            .call_blocking(
                BusMessage::method_call(server.unique_name(), "/p", "i.f", "Echo", json!("ping")),
                Duration::from_secs(5),
            )
            .unwrap();
        assert_eq!(reply.body, json!("ping"));
        assert_eq!(reply.kind, MessageKind::MethodReturn);
        echo.join().unwrap();
    }

    #[test]
    fn blocking_call_times_out_against_a_silent_peer() {
        let hub = LoopbackHub::new();
        let client = hub.endpoint();
        let server = hub.endpoint();
        let _server_rx = server.take_events().unwrap();

        let result = client.call_blocking(
            BusMessage::method_call(server.unique_name(), "/p", "i.f", "Get", json!(null)),
            Duration::from_millis(30),
        );
        assert_eq!(result, Err(BusError::Timeout));
        assert!(client.waiters.lock().is_empty());
    }

    #[test]
    fn disconnect_notifies_the_survivors() {
        let hub = LoopbackHub::new();
        let leaver = hub.endpoint();
        let stayer = hub.endpoint();
        let mut stayer_rx = stayer.take_events().unwrap();
        let leaver_name = leaver.unique_name();

        leaver.disconnect();
        assert!(!stayer.is_peer_present(&leaver_name));
        assert_eq!(hub.peer_count(), 1);
        assert!(matches!(
            stayer_rx.blocking_recv(),
            Some(TransportEvent::PeerVanished)
        ));

        // Re-disconnecting is a no-op, and the gone endpoint refuses traffic.
        leaver.disconnect();
        assert_eq!(
            leaver.send(BusMessage::signal("/p", "i.f", "Changed", json!(null))),
            Err(BusError::NotConnected)
        );
    }

    #[test]
    fn dropping_an_endpoint_disconnects_it() {
        let hub = LoopbackHub::new();
        let stayer = hub.endpoint();
        let mut stayer_rx = stayer.take_events().unwrap();
        {
            let _leaver = hub.endpoint();
            assert_eq!(hub.peer_count(), 2);
        }
        assert_eq!(hub.peer_count(), 1);
        assert!(matches!(
            stayer_rx.blocking_recv(),
            Some(TransportEvent::PeerVanished)
        ));
    }

    #[test]
    fn event_stream_is_handed_over_once() {
        let hub = LoopbackHub::new();
        let ep = hub.endpoint();
        assert!(ep.take_events().is_some());
        assert!(ep.take_events().is_none());
    }
}
