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

//! The hosted service: method routing, pub/sub state, and publishes.
//!
//! [`ServiceHost`] is the thread-safe face handed back to the
//! application; all actual state lives in the loop-confined
//! [`ServiceCore`] the connection routes inbound calls to.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use crate::bus::{BusConnection, BusError, BusMessage, PeerId};
use crate::common::config::CONFIG;
use crate::common::VariantMap;
use crate::dispatch::Dispatcher;
use crate::reactor::context;
use crate::service::liveness::LivenessTracker;
use crate::service::registry::{FamilyTable, TopicFamily};
use crate::service::request::{ReplyError, ServiceRequest};
use crate::traits::{BusTransport, MemorySettings, ServiceHandler, SettingsStore};

/// Configures and attaches a [`ServiceHost`].
///
/// ```no_run
/// use std::sync::Arc;
/// use busbar::prelude::*;
///
/// # struct MyHandler;
/// # #[async_trait(?Send)]
/// # impl ServiceHandler for MyHandler {}
/// # fn demo(connection: &BusConnection) -> Result<(), BusError> {
/// let host = ServiceHost::builder(MyHandler)
///     .settings(Arc::new(MemorySettings::new()))
///     .attach(connection)?;
/// host.publish_topic("/power", "on");
/// # Ok(())
/// # }
/// ```
pub struct ServiceHostBuilder {
    handler: Box<dyn ServiceHandler>,
    settings: Arc<dyn SettingsStore>,
}

impl ServiceHostBuilder {
    /// Backs `GetSystemSetting`/`SetSystemSetting` with `settings` instead
    /// of the default in-memory store.
    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    /// Installs the service on `connection`'s loop.
    ///
    /// Mirrors [`BusConnection::attach`]: immediate when called from the
    /// loop thread, otherwise through the deferred queue, so it precedes
    /// any call or publish made through the returned host.
    pub fn attach(self, connection: &BusConnection) -> Result<ServiceHost, BusError> {
        let ServiceHostBuilder { handler, settings } = self;
        let dispatcher = connection.dispatcher().clone();
        let transport = Arc::clone(connection.transport());

        let core_dispatcher = dispatcher.clone();
        let install = move || {
            let installed = context::with_current(move |ctx| {
                let borrowed = ctx.connection.borrow();
                match borrowed.as_ref() {
                    Some(core) => {
                        core.set_service(ServiceCore::new(
                            ctx.id,
                            core_dispatcher,
                            transport,
                            handler,
                            settings,
                        ));
                        true
                    }
                    None => false,
                }
            });
            if installed != Some(true) {
                warn!("no bus connection on this loop; service host was not installed");
            }
        };

        if dispatcher.on_loop_thread() {
            install();
        } else if !dispatcher.invoke(install) {
            return Err(BusError::Disconnected);
        }
        Ok(ServiceHost { dispatcher })
    }
}

/// Handle to a service hosted on a reactor's bus connection.
///
/// Cloneable and usable from any thread. Publishes made off the loop
/// thread are queued and run in submission order.
#[derive(Clone)]
pub struct ServiceHost {
    dispatcher: Dispatcher,
}

impl ServiceHost {
    /// Object path every hosted service answers under.
    pub const PATH: &'static str = "/org/busbar/Service";
    /// Interface every hosted service answers under.
    pub const INTERFACE: &'static str = "org.busbar.Service1";

    /// Starts building a host around `handler`.
    pub fn builder(handler: impl ServiceHandler) -> ServiceHostBuilder {
        ServiceHostBuilder {
            handler: Box::new(handler),
            settings: Arc::new(MemorySettings::new()),
        }
    }

    /// [`builder`](Self::builder) and
    /// [`attach`](ServiceHostBuilder::attach) in one step, with the
    /// default settings store.
    pub fn attach(
        connection: &BusConnection,
        handler: impl ServiceHandler,
    ) -> Result<ServiceHost, BusError> {
        Self::builder(handler).attach(connection)
    }

    /// Publishes a string-valued topic update.
    ///
    /// The value is cached for replay and a `TopicUpdate` signal goes to
    /// every subscriber of `key`. Returns `false` once the loop stopped.
    pub fn publish_topic(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        self.with_core(move |core| core.publish_topic(&key, value))
    }

    /// Publishes an integer-valued topic update as a `TaggedUpdate` signal.
    pub fn publish_tagged(&self, key: impl Into<String>, value: i64) -> bool {
        let key = key.into();
        self.with_core(move |core| core.publish_tagged(&key, value))
    }

    /// Publishes `entity`'s status record.
    ///
    /// The record is cached per entity and a `StatusUpdate` signal goes to
    /// every status subscriber; a later subscriber replays the whole
    /// accumulated snapshot.
    pub fn publish_status(&self, entity: impl Into<String>, state: VariantMap) -> bool {
        let entity = entity.into();
        self.with_core(move |core| core.publish_status(&entity, state))
    }

    /// Live subscription count of one family; `0` once the loop stopped.
    pub fn subscription_count(&self, family: TopicFamily) -> usize {
        self.dispatcher
            .call_on_loop(move || current_core().map(|core| core.subscription_count(family)))
            .flatten()
            .unwrap_or(0)
    }

    /// Peers currently tracked for liveness; `0` once the loop stopped.
    pub fn tracked_peer_count(&self) -> usize {
        self.dispatcher
            .call_on_loop(|| current_core().map(|core| core.tracked_peer_count()))
            .flatten()
            .unwrap_or(0)
    }

    /// Runs `work` against the loop's service core, immediately on the
    /// loop thread or queued from anywhere else.
    fn with_core(&self, work: impl FnOnce(&Rc<ServiceCore>) + Send + 'static) -> bool {
        if self.dispatcher.on_loop_thread() {
            match current_core() {
                Some(core) => {
                    work(&core);
                    true
                }
                None => {
                    warn!("no service host on this loop");
                    false
                }
            }
        } else {
            self.dispatcher.invoke(move || match current_core() {
                Some(core) => work(&core),
                None => warn!("no service host on this loop"),
            })
        }
    }
}

impl fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHost")
            .field("reactor_id", &self.dispatcher.reactor_id())
            .finish_non_exhaustive()
    }
}

/// Service core of the loop running on the calling thread, if any.
fn current_core() -> Option<Rc<ServiceCore>> {
    context::with_current(|ctx| {
        let connection = ctx.connection.borrow();
        connection.as_ref().and_then(|core| core.service())
    })
    .flatten()
}

/// Loop-confined service state: the handler, the settings store, and the
/// three subscription families.
pub(crate) struct ServiceCore {
    reactor_id: u64,
    dispatcher: Dispatcher,
    transport: Arc<dyn BusTransport>,
    handler: Box<dyn ServiceHandler>,
    settings: Arc<dyn SettingsStore>,
    topics: RefCell<FamilyTable<String>>,
    tagged: RefCell<FamilyTable<i64>>,
    status: RefCell<FamilyTable<VariantMap>>,
    liveness: RefCell<LivenessTracker>,
}

impl ServiceCore {
    fn new(
        reactor_id: u64,
        dispatcher: Dispatcher,
        transport: Arc<dyn BusTransport>,
        handler: Box<dyn ServiceHandler>,
        settings: Arc<dyn SettingsStore>,
    ) -> Rc<Self> {
        crate::reactor::thread_guard::assert_loop_thread(reactor_id);
        info!(
            reactor_id,
            path = ServiceHost::PATH,
            interface = ServiceHost::INTERFACE,
            "service host installed"
        );
        Rc::new(ServiceCore {
            reactor_id,
            dispatcher,
            transport,
            handler,
            settings,
            topics: RefCell::new(FamilyTable::new(TopicFamily::Topic)),
            tagged: RefCell::new(FamilyTable::new(TopicFamily::Tagged)),
            status: RefCell::new(FamilyTable::new(TopicFamily::Status)),
            liveness: RefCell::new(LivenessTracker::new()),
        })
    }

    /// Routes one inbound method call.
    ///
    /// Handler hooks run as local tasks so a slow hook never stalls the
    /// event pump; registry and settings methods answer inline.
    pub(crate) fn handle_call(self: &Rc<Self>, call: BusMessage) {
        crate::reactor::thread_guard::assert_loop_thread(self.reactor_id);
        if call.path != ServiceHost::PATH || call.interface != ServiceHost::INTERFACE {
            debug!(
                path = %call.path,
                interface = %call.interface,
                "call outside the service surface"
            );
            self.send_error(&call, &BusError::UnknownMethod(call.member.clone()));
            return;
        }

        let member = call.member.clone();
        match member.as_str() {
            "Config" => {
                let core = Rc::clone(self);
                tokio::task::spawn_local(async move {
                    let result = core.handler.config().await;
                    core.finish_hook(&call, result);
                });
            }
            "Request" => {
                let parsed =
                    ServiceRequest::parse(&call, self.dispatcher.clone(), Arc::clone(&self.transport));
                match parsed {
                    Ok(request) => {
                        let core = Rc::clone(self);
                        tokio::task::spawn_local(async move {
                            core.handler.handle_request(request).await;
                        });
                    }
                    Err(err) => self.send_error(&call, &err),
                }
            }
            "GetSystemInfo" => {
                let core = Rc::clone(self);
                tokio::task::spawn_local(async move {
                    let result = core.handler.system_info().await;
                    core.finish_hook(&call, result);
                });
            }
            "GetSystemTime" => {
                let core = Rc::clone(self);
                tokio::task::spawn_local(async move {
                    let result = core.handler.system_time().await;
                    core.finish_hook(&call, result);
                });
            }
            "GetDiagContexts" => {
                let core = Rc::clone(self);
                tokio::task::spawn_local(async move {
                    let result = core.handler.diag_contexts().await;
                    core.finish_hook(&call, result);
                });
            }
            "SetDiagContexts" => match args::<(String,)>(&call) {
                Ok((contexts,)) => {
                    let core = Rc::clone(self);
                    tokio::task::spawn_local(async move {
                        let result = core.handler.set_diag_contexts(contexts).await;
                        core.finish_hook(&call, result);
                    });
                }
                Err(err) => self.send_error(&call, &err),
            },
            "GetSystemSetting" => match args::<(String,)>(&call) {
                Ok((name,)) => match self.settings.get(&name) {
                    Some(value) => self.send_reply(&call, Value::String(value)),
                    None => {
                        debug!(name, "unknown setting");
                        self.send_error(&call, &ReplyError::InvalidParameters.to_bus_error());
                    }
                },
                Err(err) => self.send_error(&call, &err),
            },
            "SetSystemSetting" => match args::<(String, String)>(&call) {
                Ok((name, value)) => {
                    if self.settings.set(&name, value) {
                        self.send_reply(&call, Value::Null);
                    } else {
                        debug!(name, "setting rejected by the store");
                        self.send_error(&call, &ReplyError::InvalidParameters.to_bus_error());
                    }
                }
                Err(err) => self.send_error(&call, &err),
            },
            "RegisterTopicListener" => match args::<(String,)>(&call) {
                Ok((topic,)) => self.register_listener(TopicFamily::Topic, topic, &call),
                Err(err) => self.send_error(&call, &err),
            },
            "UnregisterTopicListener" => match args::<(String,)>(&call) {
                Ok((topic,)) => self.unregister_listener(TopicFamily::Topic, &topic, &call),
                Err(err) => self.send_error(&call, &err),
            },
            "RegisterTaggedListener" => match args::<(String,)>(&call) {
                Ok((topic,)) => self.register_listener(TopicFamily::Tagged, topic, &call),
                Err(err) => self.send_error(&call, &err),
            },
            "UnregisterTaggedListener" => match args::<(String,)>(&call) {
                Ok((topic,)) => self.unregister_listener(TopicFamily::Tagged, &topic, &call),
                Err(err) => self.send_error(&call, &err),
            },
            // The status family has one implicit topic; the calls carry no
            // arguments.
            "RegisterStatusListener" => {
                self.register_listener(TopicFamily::Status, CONFIG.service.status_topic.clone(), &call);
            }
            "UnregisterStatusListener" => {
                let topic = CONFIG.service.status_topic.clone();
                self.unregister_listener(TopicFamily::Status, &topic, &call);
            }
            other => {
                debug!(member = other, "unknown service method");
                self.send_error(&call, &BusError::UnknownMethod(other.to_owned()));
            }
        }
    }

    fn register_listener(self: &Rc<Self>, family: TopicFamily, topic: String, call: &BusMessage) {
        let Some(peer) = call.sender.clone() else {
            self.send_error(call, &BusError::InvalidRequest("anonymous caller".to_owned()));
            return;
        };
        let result = match family {
            TopicFamily::Topic => self.topics.borrow_mut().subscribe(&topic, &peer),
            TopicFamily::Tagged => self.tagged.borrow_mut().subscribe(&topic, &peer),
            TopicFamily::Status => self.status.borrow_mut().subscribe(&topic, &peer),
        };
        if let Err(err) = result {
            self.send_error(call, &err);
            return;
        }
        self.liveness.borrow_mut().track(&peer);
        info!(%family, topic, %peer, "listener registered");
        self.send_reply(call, Value::Null);

        // Replay goes through the queue so it lines up behind the reply.
        let queued = self.dispatcher.invoke(move || match current_core() {
            Some(core) => core.replay(family, &topic, &peer),
            None => debug!(%family, topic, "loop gone before the cached replay"),
        });
        if !queued {
            debug!(%family, "loop stopped; cached replay skipped");
        }
    }

    fn unregister_listener(&self, family: TopicFamily, topic: &str, call: &BusMessage) {
        let Some(peer) = call.sender.clone() else {
            self.send_error(call, &BusError::InvalidRequest("anonymous caller".to_owned()));
            return;
        };
        let result = match family {
            TopicFamily::Topic => self.topics.borrow_mut().unsubscribe(topic, &peer),
            TopicFamily::Tagged => self.tagged.borrow_mut().unsubscribe(topic, &peer),
            TopicFamily::Status => self.status.borrow_mut().unsubscribe(topic, &peer),
        };
        match result {
            Err(err) => self.send_error(call, &err),
            Ok(()) => {
                if !self.peer_has_subscriptions(&peer) {
                    self.liveness.borrow_mut().untrack(&peer);
                }
                info!(%family, topic, %peer, "listener unregistered");
                self.send_reply(call, Value::Null);
            }
        }
    }

    /// Sends `peer` the cached state of a fresh subscription: the last
    /// value of its topic, or the full per-entity snapshot for status.
    fn replay(&self, family: TopicFamily, topic: &str, peer: &PeerId) {
        match family {
            TopicFamily::Topic => {
                if let Some(value) = self.topics.borrow().cached(topic) {
                    self.emit_update(peer.clone(), "TopicUpdate", json!([topic, value]));
                }
            }
            TopicFamily::Tagged => {
                if let Some(value) = self.tagged.borrow().cached(topic) {
                    self.emit_update(peer.clone(), "TaggedUpdate", json!([topic, value]));
                }
            }
            TopicFamily::Status => {
                let snapshot = self.status.borrow().cache_snapshot();
                if snapshot.is_empty() {
                    return;
                }
                self.emit_update(peer.clone(), "StatusUpdate", status_body(&snapshot));
            }
        }
    }

    fn peer_has_subscriptions(&self, peer: &PeerId) -> bool {
        self.topics.borrow().has_peer(peer)
            || self.tagged.borrow().has_peer(peer)
            || self.status.borrow().has_peer(peer)
    }

    pub(crate) fn publish_topic(&self, key: &str, value: String) {
        let body = json!([key, value]);
        self.deliver(&self.topics, "TopicUpdate", key, key, value, body);
    }

    pub(crate) fn publish_tagged(&self, key: &str, value: i64) {
        let body = json!([key, value]);
        self.deliver(&self.tagged, "TaggedUpdate", key, key, value, body);
    }

    pub(crate) fn publish_status(&self, entity: &str, state: VariantMap) {
        let topic = CONFIG.service.status_topic.clone();
        let body = status_body(&[(entity.to_owned(), state.clone())]);
        self.deliver(&self.status, "StatusUpdate", entity, &topic, state, body);
    }

    /// Caches `value` under `cache_key` and signals every subscriber of
    /// `sub_key`, in registration order.
    ///
    /// The walk is reentrancy-safe: a subscriber whose delivery triggers an
    /// unsubscribe (its own or another's) parks the removal until the walk
    /// ends, and parked pairs get no further signals.
    fn deliver<V: Clone>(
        &self,
        table: &RefCell<FamilyTable<V>>,
        member: &'static str,
        cache_key: &str,
        sub_key: &str,
        value: V,
        body: Value,
    ) {
        crate::reactor::thread_guard::assert_loop_thread(self.reactor_id);
        let peers = {
            let mut walk = table.borrow_mut();
            walk.update_cache(cache_key, value);
            walk.begin_walk();
            walk.peers_for(sub_key)
        };
        trace!(member, topic = sub_key, subscribers = peers.len(), "delivering an update");
        for peer in peers {
            if table.borrow().is_doomed(sub_key, &peer) {
                continue;
            }
            self.emit_update(peer, member, body.clone());
        }
        table.borrow_mut().end_walk();
    }

    fn emit_update(&self, peer: PeerId, member: &str, body: Value) {
        let signal = BusMessage::targeted_signal(
            peer,
            ServiceHost::PATH,
            ServiceHost::INTERFACE,
            member,
            body,
        );
        if let Err(err) = self.transport.send(signal) {
            debug!(member, error = %err, "update transmission failed");
        }
    }

    fn finish_hook(&self, call: &BusMessage, result: Result<Value, ReplyError>) {
        match result {
            Ok(body) => self.send_reply(call, body),
            Err(err) => self.send_error(call, &err.to_bus_error()),
        }
    }

    fn send_reply(&self, call: &BusMessage, body: Value) {
        if let Err(err) = self.transport.send(BusMessage::reply_to(call, body)) {
            debug!(member = %call.member, error = %err, "reply transmission failed");
        }
    }

    fn send_error(&self, call: &BusMessage, error: &BusError) {
        debug!(member = %call.member, error = %error, "answering with an error");
        if let Err(err) = self.transport.send(BusMessage::error_reply(call, error)) {
            debug!(member = %call.member, error = %err, "error reply transmission failed");
        }
    }

    /// Re-checks every tracked peer against the transport and revokes the
    /// subscriptions of those that are gone. The departure notification
    /// names nobody, hence the full scan.
    pub(crate) fn sweep_vanished_peers(&self) {
        crate::reactor::thread_guard::assert_loop_thread(self.reactor_id);
        let transport = Arc::clone(&self.transport);
        let vanished = self
            .liveness
            .borrow_mut()
            .sweep(|peer| transport.is_peer_present(peer));
        for peer in vanished {
            let dropped = self.topics.borrow_mut().remove_peer(&peer)
                + self.tagged.borrow_mut().remove_peer(&peer)
                + self.status.borrow_mut().remove_peer(&peer);
            info!(%peer, dropped, "revoked the subscriptions of a vanished peer");
        }
    }

    pub(crate) fn subscription_count(&self, family: TopicFamily) -> usize {
        match family {
            TopicFamily::Topic => self.topics.borrow().subscription_count(),
            TopicFamily::Tagged => self.tagged.borrow().subscription_count(),
            TopicFamily::Status => self.status.borrow().subscription_count(),
        }
    }

    pub(crate) fn tracked_peer_count(&self) -> usize {
        self.liveness.borrow().len()
    }
}

fn args<T: DeserializeOwned>(call: &BusMessage) -> Result<T, BusError> {
    serde_json::from_value(call.body.clone())
        .map_err(|err| BusError::InvalidRequest(format!("{} arguments: {err}", call.member)))
}

/// `StatusUpdate` body: an array of `[entity, record]` pairs.
fn status_body(entries: &[(String, VariantMap)]) -> Value {
    json!(entries)
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::common::Variant;

    assert_impl_all!(ServiceHost: Send, Sync, Clone);

    fn call_with(member: &str, body: Value) -> BusMessage {
        let mut call = BusMessage::method_call(
            PeerId::from(":1.9"),
            ServiceHost::PATH,
            ServiceHost::INTERFACE,
            member,
            body,
        );
        call.sender = Some(PeerId::from(":1.2"));
        call
    }

    #[test]
    fn args_decode_positional_tuples() {
        let call = call_with("GetSystemSetting", json!(["volume"]));
        assert_eq!(args::<(String,)>(&call), Ok(("volume".to_owned(),)));

        let call = call_with("SetSystemSetting", json!(["volume", "11"]));
        assert_eq!(
            args::<(String, String)>(&call),
            Ok(("volume".to_owned(), "11".to_owned()))
        );
    }

    #[test]
    fn args_name_the_member_on_a_shape_mismatch() {
        let call = call_with("GetSystemSetting", json!({ "name": "volume" }));
        match args::<(String,)>(&call) {
            Err(BusError::InvalidRequest(detail)) => {
                assert!(detail.starts_with("GetSystemSetting arguments:"), "{detail}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn status_bodies_pair_entities_with_their_records() {
        let mut record = VariantMap::new();
        record.insert("on".to_owned(), Variant::from(true));
        record.insert("level".to_owned(), Variant::from(3_i64));
        let body = status_body(&[("lamp".to_owned(), record)]);
        assert_eq!(body, json!([["lamp", { "level": 3, "on": true }]]));
    }
}
