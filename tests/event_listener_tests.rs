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
#![allow(dead_code, unused_doc_comments)]

use std::sync::mpsc;
use std::time::Duration;

use busbar::prelude::*;

use crate::setup::initialize_tracing;

mod setup;

const WAIT: Duration = Duration::from_secs(5);

fn payload(key: &str, value: i64) -> VariantMap {
    let mut map = VariantMap::new();
    map.insert(key.to_owned(), Variant::from(value));
    map
}

/// Tests the in-process event table end to end.
///
/// **Scenario:**
/// 1. Register a listener for `net/up` through the reactor handle.
/// 2. Emit once from the test thread and once from a loop callback.
///
/// **Verification:**
/// - Both payloads arrive, in emission order, with their values intact.
#[test]
fn listeners_hear_events_from_any_thread() {
    initialize_tracing();
    let (thread, reactor) = Reactor::new().spawn();
    assert!(reactor.wait_running());

    let (tx, rx) = mpsc::channel();
    let token = reactor.add_listener("net/up", move |payload| {
        let _ = tx.send(payload.clone());
    });

    reactor.emit_event("net/up", &payload("attempt", 1));
    let emitter = reactor.clone();
    assert!(reactor.invoke(move || emitter.emit_event("net/up", &payload("attempt", 2))));

    let first = rx.recv_timeout(WAIT).expect("first event");
    assert_eq!(first.get("attempt"), Some(&Variant::from(1_i64)));
    let second = rx.recv_timeout(WAIT).expect("second event");
    assert_eq!(second.get("attempt"), Some(&Variant::from(2_i64)));

    assert!(reactor.remove_listener(token));
    reactor.stop(0);
    thread.join().expect("loop thread panicked");
}

/// Listeners run synchronously on whichever thread emits.
#[test]
fn emission_runs_the_listener_on_the_emitting_thread() {
    initialize_tracing();
    let (thread, reactor) = Reactor::new().spawn();
    assert!(reactor.wait_running());

    let (tx, rx) = mpsc::channel();
    let token = reactor.add_listener("probe", move |_| {
        let _ = tx.send(std::thread::current().id());
    });

    reactor.emit_event("probe", &VariantMap::new());
    assert_eq!(
        rx.recv_timeout(WAIT).expect("listener ran"),
        std::thread::current().id()
    );

    assert!(reactor.remove_listener(token));
    reactor.stop(0);
    thread.join().expect("loop thread panicked");
}

/// A removed token stops delivery; removing it twice is refused.
#[test]
fn a_removed_listener_goes_quiet() {
    initialize_tracing();
    let (thread, reactor) = Reactor::new().spawn();
    assert!(reactor.wait_running());

    let (tx, rx) = mpsc::channel();
    let token = reactor.add_listener("tick", move |_| {
        let _ = tx.send(());
    });
    reactor.emit_event("tick", &VariantMap::new());
    rx.recv_timeout(WAIT).expect("delivery while registered");

    assert!(reactor.remove_listener(token));
    reactor.emit_event("tick", &VariantMap::new());
    assert!(
        rx.recv_timeout(Duration::from_millis(100)).is_err(),
        "removed listener still fired"
    );
    assert!(!reactor.remove_listener(token));

    reactor.stop(0);
    thread.join().expect("loop thread panicked");
}

/// Event names are exact keys, not prefixes or patterns.
#[test]
fn events_are_independent_namespaces() {
    initialize_tracing();
    let (thread, reactor) = Reactor::new().spawn();
    assert!(reactor.wait_running());

    let (tx, rx) = mpsc::channel();
    let token = reactor.add_listener("net/up", move |_| {
        let _ = tx.send(());
    });

    reactor.emit_event("net/down", &VariantMap::new());
    reactor.emit_event("net", &VariantMap::new());
    assert!(
        rx.recv_timeout(Duration::from_millis(100)).is_err(),
        "listener heard an unrelated event"
    );

    reactor.emit_event("net/up", &VariantMap::new());
    rx.recv_timeout(WAIT).expect("the matching event arrives");

    assert!(reactor.remove_listener(token));
    reactor.stop(0);
    thread.join().expect("loop thread panicked");
}
