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
use std::rc::Rc;

use derive_new::new;
use tracing::{debug, warn};

use crate::bus::BusMessage;
use crate::common::types::SignalMatchCallback;

/// A signal filter: empty fields are wildcards.
///
/// `extra` is an opaque fragment appended verbatim to the textual rule for
/// transports that speak match-rule syntax; it plays no part in local
/// matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, new)]
pub struct MatchSpec {
    /// Sending peer, or empty for any.
    #[new(into)]
    pub sender: String,
    /// Object path, or empty for any.
    #[new(into)]
    pub path: String,
    /// Interface, or empty for any.
    #[new(into)]
    pub interface: String,
    /// Signal name, or empty for any.
    #[new(into)]
    pub member: String,
    /// Extra rule fragment, appended verbatim.
    #[new(into)]
    pub extra: String,
}

impl MatchSpec {
    /// The textual match rule, `type='signal',...`, empty fields omitted.
    pub fn rule_string(&self) -> String {
        let mut rule = String::from("type='signal'");
        for (key, value) in [
            ("sender", &self.sender),
            ("path", &self.path),
            ("interface", &self.interface),
            ("member", &self.member),
        ] {
            if !value.is_empty() {
                rule.push_str(&format!(",{key}='{value}'"));
            }
        }
        if !self.extra.is_empty() {
            rule.push(',');
            rule.push_str(&self.extra);
        }
        rule
    }

    /// Whether `message` (a signal) passes this filter.
    pub(crate) fn matches(&self, message: &BusMessage) -> bool {
        if !message.is_signal() {
            return false;
        }
        let sender_ok = self.sender.is_empty()
            || message
                .sender
                .as_ref()
                .is_some_and(|sender| sender.as_str() == self.sender);
        sender_ok
            && (self.path.is_empty() || message.path == self.path)
            && (self.interface.is_empty() || message.interface == self.interface)
            && (self.member.is_empty() || message.member == self.member)
    }
}

struct MatchEntry {
    tag: u64,
    spec: MatchSpec,
    callback: Rc<RefCell<SignalMatchCallback>>,
}

/// The connection's signal-subscription table. Loop-thread only.
///
/// Entries live in a plain vector: subscription counts are small and
/// removal by tag is a linear scan.
#[derive(Default)]
pub(crate) struct MatchTable {
    entries: RefCell<Vec<MatchEntry>>,
}

impl MatchTable {
    pub(crate) fn add(&self, tag: u64, spec: MatchSpec, callback: SignalMatchCallback) {
        debug!(tag, rule = %spec.rule_string(), "signal subscription installed");
        self.entries.borrow_mut().push(MatchEntry {
            tag,
            spec,
            callback: Rc::new(RefCell::new(callback)),
        });
    }

    /// Removes the entry registered under `tag`; unknown tags only warn.
    pub(crate) fn remove(&self, tag: u64) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|entry| entry.tag != tag);
        let removed = entries.len() != before;
        if !removed {
            warn!(tag, "no such signal subscription to remove");
        }
        removed
    }

    /// Invokes every matching callback with (tag, message).
    ///
    /// Callbacks run with no table borrow held, so they may subscribe or
    /// unsubscribe freely; an entry unsubscribed by an earlier callback of
    /// the same dispatch is skipped.
    pub(crate) fn dispatch(&self, message: &BusMessage) {
        let snapshot: Vec<(u64, Rc<RefCell<SignalMatchCallback>>)> = self
            .entries
            .borrow()
            .iter()
            .filter(|entry| entry.spec.matches(message))
            .map(|entry| (entry.tag, Rc::clone(&entry.callback)))
            .collect();
        for (tag, callback) in snapshot {
            let still_registered = self.entries.borrow().iter().any(|entry| entry.tag == tag);
            if !still_registered {
                continue;
            }
            (callback.borrow_mut())(tag, message);
        }
    }

    pub(crate) fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn signal(sender: &str, path: &str, interface: &str, member: &str) -> BusMessage {
        let mut message = BusMessage::signal(path, interface, member, json!(null));
        message.sender = Some(sender.into());
        message
    }

    #[test]
    fn rule_string_omits_empty_fields() {
        let spec = MatchSpec::new("", "/org/x", "org.x.I", "", "");
        assert_eq!(spec.rule_string(), "type='signal',path='/org/x',interface='org.x.I'");

        let all = MatchSpec::new(":1.3", "/p", "i.f", "Changed", "arg0='up'");
        assert_eq!(
            all.rule_string(),
            "type='signal',sender=':1.3',path='/p',interface='i.f',member='Changed',arg0='up'"
        );
    }

    #[test]
    fn empty_fields_match_anything() {
        let spec = MatchSpec::new("", "", "", "Changed", "");
        assert!(spec.matches(&signal(":1.1", "/a", "i.a", "Changed")));
        assert!(spec.matches(&signal(":1.2", "/b", "i.b", "Changed")));
        assert!(!spec.matches(&signal(":1.1", "/a", "i.a", "Other")));
    }

    #[test]
    fn non_signals_never_match() {
        let spec = MatchSpec::default();
        let call = BusMessage::method_call(":1.9", "/p", "i.f", "Get", json!(null));
        assert!(!spec.matches(&call));
    }

    #[test]
    fn sender_filter_requires_a_sender() {
        let spec = MatchSpec::new(":1.5", "", "", "", "");
        let mut anonymous = BusMessage::signal("/p", "i.f", "Changed", json!(null));
        anonymous.sender = None;
        assert!(!spec.matches(&anonymous));
        assert!(spec.matches(&signal(":1.5", "/p", "i.f", "Changed")));
    }

    #[test]
    fn dispatch_delivers_in_registration_order() {
        let table = MatchTable::default();
        let hits = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        for tag in [1u64, 2, 3] {
            let hits = std::sync::Arc::clone(&hits);
            table.add(
                tag,
                MatchSpec::default(),
                Box::new(move |tag, _| hits.lock().push(tag)),
            );
        }
        table.dispatch(&signal(":1.1", "/p", "i.f", "Changed"));
        assert_eq!(*hits.lock(), vec![1, 2, 3]);
    }

    // Callbacks must be Send, so the reentrant callback reaches its table
    // through a thread-local rather than a captured Rc, exactly as user
    // code reaches it through a connection handle.
    thread_local! {
        static REENTRY_TABLE: RefCell<Option<Rc<MatchTable>>> = const { RefCell::new(None) };
    }

    #[test]
    fn unsubscribe_during_dispatch_skips_the_removed_entry() {
        let table = Rc::new(MatchTable::default());
        REENTRY_TABLE.with(|slot| *slot.borrow_mut() = Some(Rc::clone(&table)));
        let hits = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));

        {
            let hits = std::sync::Arc::clone(&hits);
            table.add(
                1,
                MatchSpec::default(),
                Box::new(move |tag, _| {
                    hits.lock().push(tag);
                    REENTRY_TABLE.with(|slot| {
                        if let Some(table) = slot.borrow().as_ref() {
                            assert!(table.remove(2));
                        }
                    });
                }),
            );
        }
        {
            let hits = std::sync::Arc::clone(&hits);
            table.add(
                2,
                MatchSpec::default(),
                Box::new(move |tag, _| {
                    hits.lock().push(tag);
                }),
            );
        }

        table.dispatch(&signal(":1.1", "/p", "i.f", "Changed"));
        assert_eq!(*hits.lock(), vec![1]);
        REENTRY_TABLE.with(|slot| slot.borrow_mut().take());
    }
}
