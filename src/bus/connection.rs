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

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::bus::match_rules::MatchTable;
use crate::bus::{BusError, BusMessage, CallResult, MatchSpec, MessageKind, PeerId};
use crate::common::config::CONFIG;
use crate::common::types::{ReplyCallback, SignalMatchCallback};
use crate::dispatch::Dispatcher;
use crate::reactor::{context, ReactorHandle};
use crate::service::ServiceCore;
use crate::traits::{BusTransport, TransportEvent};

struct ConnShared {
    transport: Arc<dyn BusTransport>,
    next_match_tag: AtomicU64,
}

/// A connection to the bus, bound to one reactor.
///
/// Cloneable and callable from any thread. Outgoing calls are correlated
/// with their replies on the loop thread; synchronous calls from foreign
/// threads block on a private channel so the loop itself is never blocked
/// on their behalf.
#[derive(Clone)]
pub struct BusConnection {
    dispatcher: Dispatcher,
    shared: Arc<ConnShared>,
}

impl BusConnection {
    /// Binds `transport` to `reactor`'s loop.
    ///
    /// The loop-side plumbing (reply routing, signal dispatch, the event
    /// pump) is installed on the loop thread: immediately when called from
    /// it, otherwise through the deferred queue, where it precedes any call
    /// submitted through the returned handle. Fails when the transport's
    /// event stream was already claimed or the loop is already gone.
    pub fn attach(
        reactor: &ReactorHandle,
        transport: Arc<dyn BusTransport>,
    ) -> Result<BusConnection, BusError> {
        let events = transport.take_events().ok_or_else(|| {
            BusError::Internal("transport event stream already claimed".to_owned())
        })?;
        let dispatcher = reactor.dispatcher();
        let shared = Arc::new(ConnShared {
            transport: Arc::clone(&transport),
            next_match_tag: AtomicU64::new(6_000 + rand::rng().random_range(0..1000)),
        });

        let install_dispatcher = dispatcher.clone();
        let install = move || {
            let installed = context::with_current(|ctx| {
                ConnectionCore::install(ctx, install_dispatcher.clone(), transport, events);
            });
            if installed.is_none() {
                warn!("no loop context; connection core was not installed");
            }
        };

        if dispatcher.on_loop_thread() {
            install();
        } else if !dispatcher.invoke(install) {
            return Err(BusError::Disconnected);
        }
        Ok(BusConnection { dispatcher, shared })
    }

    /// This endpoint's own bus name.
    pub fn unique_name(&self) -> PeerId {
        self.shared.transport.unique_name()
    }

    /// Whether `peer` is currently present on the bus.
    pub fn is_peer_present(&self, peer: &PeerId) -> bool {
        self.shared.transport.is_peer_present(peer)
    }

    /// Fire-and-forget transmission of a signal (or reply) message.
    pub fn send(&self, message: BusMessage) -> Result<(), BusError> {
        self.shared.transport.send(message)
    }

    /// Synchronous call with the configured default deadline.
    pub fn call(&self, message: BusMessage) -> CallResult {
        self.call_with_timeout(message, CONFIG.call_timeout())
    }

    /// Synchronous call: blocks the calling thread until the reply, an
    /// error, or `timeout`.
    ///
    /// On the loop thread this uses the transport's own blocking primitive
    /// and therefore stalls the loop for the duration; prefer
    /// [`call_async`](Self::call_async) there. From any other thread the
    /// call runs asynchronously on the loop and the caller blocks on a
    /// private channel, so the loop keeps turning.
    #[instrument(level = "debug", skip_all, fields(member = %message.member))]
    pub fn call_with_timeout(&self, message: BusMessage, timeout: Duration) -> CallResult {
        if self.dispatcher.on_loop_thread() {
            if message.kind != MessageKind::MethodCall {
                return Err(BusError::InvalidRequest(
                    "only method calls expect replies".to_owned(),
                ));
            }
            trace!("blocking call from the loop thread; the loop stalls until the reply");
            return self.shared.transport.call_blocking(message, timeout);
        }

        let (tx, rx) = oneshot::channel::<CallResult>();
        self.call_with_callback(message, timeout, move |result| {
            let _ = tx.send(result);
        })?;
        match rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(BusError::Disconnected),
        }
    }

    /// Asynchronous call with the configured default deadline.
    pub fn call_async(
        &self,
        message: BusMessage,
        callback: impl FnOnce(CallResult) + Send + 'static,
    ) -> Result<(), BusError> {
        self.call_with_callback(message, CONFIG.call_timeout(), callback)
    }

    /// Asynchronous call: `callback` runs on the loop thread with the
    /// reply, a typed failure, or [`BusError::Timeout`] once `timeout`
    /// passes.
    ///
    /// From the loop thread, pre-send failures (wrong message kind, no
    /// connection, a refused send) come back as `Err` and the callback is
    /// never invoked. From other threads the submission itself always
    /// succeeds and failures reach the callback instead — except when the
    /// loop is already gone, where there is no thread left to run it and
    /// the error comes back as the return value.
    #[instrument(level = "debug", skip_all, fields(member = %message.member))]
    pub fn call_with_callback(
        &self,
        message: BusMessage,
        timeout: Duration,
        callback: impl FnOnce(CallResult) + Send + 'static,
    ) -> Result<(), BusError> {
        let callback: ReplyCallback = Box::new(callback);
        if self.dispatcher.on_loop_thread() {
            let outcome = context::with_current(|ctx| {
                let core = ctx.connection.borrow().clone();
                match core {
                    Some(core) => core.begin_call(message, callback, timeout).map_err(|(err, _)| err),
                    None => Err(BusError::NotConnected),
                }
            });
            return outcome.unwrap_or(Err(BusError::NotConnected));
        }

        let queued = self.dispatcher.invoke(move || {
            let delivered = context::with_current(|ctx| {
                let core = ctx.connection.borrow().clone();
                match core {
                    Some(core) => match core.begin_call(message, callback, timeout) {
                        Ok(()) => None,
                        Err((err, callback)) => Some((err, callback)),
                    },
                    None => Some((BusError::NotConnected, callback)),
                }
            });
            match delivered {
                Some(Some((err, callback))) => callback(Err(err)),
                Some(None) => {}
                None => warn!("no loop context; a queued call could not run"),
            }
        });
        if queued {
            Ok(())
        } else {
            Err(BusError::Disconnected)
        }
    }

    /// Subscribes to signals passing `spec`'s filter.
    ///
    /// The returned tag is allocated immediately; off the loop thread the
    /// installation itself is deferred onto it. The callback receives the
    /// tag and the signal.
    pub fn subscribe_signal(
        &self,
        spec: MatchSpec,
        callback: impl FnMut(u64, &BusMessage) + Send + 'static,
    ) -> u64 {
        let tag = self.shared.next_match_tag.fetch_add(1, Ordering::Relaxed);
        let callback: SignalMatchCallback = Box::new(callback);
        let install = move || {
            let installed = context::with_current(|ctx| {
                let core = ctx.connection.borrow().clone();
                match core {
                    Some(core) => {
                        core.matches.add(tag, spec, callback);
                        true
                    }
                    None => false,
                }
            });
            if installed != Some(true) {
                warn!(tag, "no connection on this loop; signal subscription dropped");
            }
        };
        if self.dispatcher.on_loop_thread() {
            install();
        } else if !self.dispatcher.invoke(install) {
            warn!(tag, "loop gone; signal subscription dropped");
        }
        tag
    }

    /// Drops the signal subscription registered under `tag`. Unknown tags
    /// are logged at warning level by the loop-side table.
    pub fn unsubscribe_signal(&self, tag: u64) {
        let remove = move || {
            context::with_current(|ctx| {
                if let Some(core) = ctx.connection.borrow().clone() {
                    core.matches.remove(tag);
                }
            });
        };
        if self.dispatcher.on_loop_thread() {
            remove();
        } else if !self.dispatcher.invoke(remove) {
            debug!(tag, "loop gone before the unsubscribe could run");
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn BusTransport> {
        &self.shared.transport
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl std::fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("unique_name", &self.unique_name())
            .field("reactor_id", &self.dispatcher.reactor_id())
            .finish()
    }
}

/// Loop-local half of a connection. Lives in the loop context; every
/// method asserts the loop thread under the `thread-checks` feature.
pub(crate) struct ConnectionCore {
    reactor_id: u64,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) transport: Arc<dyn BusTransport>,
    pending: RefCell<HashMap<u64, ReplyCallback>>,
    pub(crate) matches: MatchTable,
    service: RefCell<Option<Rc<ServiceCore>>>,
    cancel: CancellationToken,
}

impl ConnectionCore {
    /// Builds the core, stores it in the loop context, and spawns the
    /// event pump.
    pub(crate) fn install(
        ctx: &Rc<context::LoopCtx>,
        dispatcher: Dispatcher,
        transport: Arc<dyn BusTransport>,
        events: UnboundedReceiver<TransportEvent>,
    ) {
        crate::reactor::thread_guard::assert_loop_thread(ctx.id);
        let core = Rc::new(ConnectionCore {
            reactor_id: ctx.id,
            dispatcher,
            transport,
            pending: RefCell::new(HashMap::new()),
            matches: MatchTable::default(),
            service: RefCell::new(None),
            cancel: CancellationToken::new(),
        });
        if ctx.connection.borrow_mut().replace(Rc::clone(&core)).is_some() {
            warn!(reactor_id = ctx.id, "replacing an existing bus connection");
        }
        info!(
            reactor_id = ctx.id,
            name = %core.transport.unique_name(),
            "bus connection attached"
        );

        let pump_core = Rc::downgrade(&core);
        let cancel = core.cancel.clone();
        let pump = tokio::task::spawn_local(async move {
            run_pump(pump_core, events, cancel).await;
        });
        ctx.aux_tasks.borrow_mut().push(pump);
    }

    pub(crate) fn set_service(&self, service: Rc<ServiceCore>) {
        if self.service.borrow_mut().replace(service).is_some() {
            warn!(reactor_id = self.reactor_id, "replacing an existing service host");
        }
    }

    pub(crate) fn service(&self) -> Option<Rc<ServiceCore>> {
        self.service.borrow().clone()
    }

    /// Transmits `message` and registers `callback` under its serial.
    ///
    /// Pre-send failures return the untouched callback to the caller, who
    /// decides whether to invoke or drop it.
    pub(crate) fn begin_call(
        self: &Rc<Self>,
        message: BusMessage,
        callback: ReplyCallback,
        timeout: Duration,
    ) -> Result<(), (BusError, ReplyCallback)> {
        crate::reactor::thread_guard::assert_loop_thread(self.reactor_id);
        if message.kind != MessageKind::MethodCall {
            return Err((
                BusError::InvalidRequest("only method calls expect replies".to_owned()),
                callback,
            ));
        }
        match self.transport.submit_call(message) {
            Ok(serial) => {
                trace!(serial, "call in flight");
                self.pending.borrow_mut().insert(serial, callback);
                self.arm_deadline(serial, timeout);
                Ok(())
            }
            Err(err) => Err((err, callback)),
        }
    }

    fn arm_deadline(self: &Rc<Self>, serial: u64, timeout: Duration) {
        let core = Rc::downgrade(self);
        let cancel = self.cancel.clone();
        tokio::task::spawn_local(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(timeout) => {}
            }
            let Some(core) = core.upgrade() else { return };
            let callback = core.pending.borrow_mut().remove(&serial);
            if let Some(callback) = callback {
                warn!(serial, "call deadline passed; failing it");
                callback(Err(BusError::Timeout));
            }
        });
    }

    fn route_reply(&self, message: BusMessage) {
        let serial = message.reply_serial.unwrap_or(0);
        let callback = self.pending.borrow_mut().remove(&serial);
        match callback {
            Some(callback) => {
                let result = match message.to_error() {
                    Some(err) => Err(err),
                    None => Ok(message),
                };
                callback(result);
            }
            None => {
                error!(serial, "reply correlates with no pending call; dropping it");
            }
        }
    }

    fn handle_call(self: &Rc<Self>, message: BusMessage) {
        match self.service() {
            Some(service) => service.handle_call(message),
            None => {
                debug!(member = %message.member, "method call with no service attached");
                let reply = BusMessage::error_reply(
                    &message,
                    &BusError::UnknownMethod(message.member.clone()),
                );
                if let Err(err) = self.transport.send(reply) {
                    debug!(error = %err, "could not answer an unroutable call");
                }
            }
        }
    }

    fn handle_event(self: &Rc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => match message.kind {
                MessageKind::MethodCall => self.handle_call(message),
                MessageKind::MethodReturn | MessageKind::Error => self.route_reply(message),
                MessageKind::Signal => self.matches.dispatch(&message),
            },
            TransportEvent::PeerVanished => {
                if let Some(service) = self.service() {
                    service.sweep_vanished_peers();
                }
            }
        }
    }

    /// Fails every pending call and stops the pump; runs at loop teardown.
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
        let drained: Vec<ReplyCallback> = self
            .pending
            .borrow_mut()
            .drain()
            .map(|(_, callback)| callback)
            .collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "failing pending calls at teardown");
        }
        for callback in drained {
            callback(Err(BusError::Disconnected));
        }
        self.matches.clear();
        self.service.borrow_mut().take();
    }
}

async fn run_pump(
    core: Weak<ConnectionCore>,
    mut events: UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(core) = core.upgrade() else { break };
                match event {
                    Some(event) => core.handle_event(event),
                    None => {
                        info!("transport event stream ended");
                        core.shutdown();
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(BusConnection: Send, Sync, Clone);
}
