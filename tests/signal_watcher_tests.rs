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
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::setup::initialize_tracing;

mod setup;

/// Tests OS signal delivery into a loop callback.
///
/// **Scenario:**
/// 1. Watch `SIGUSR1` on a spawned reactor; the watch is armed once
///    `add_signal_watch` returns.
/// 2. Raise `SIGUSR1` against our own process.
///
/// **Verification:**
/// - The callback runs with the watched signal number.
#[test]
fn a_raised_signal_reaches_its_watcher() {
    initialize_tracing();
    let (thread, reactor) = Reactor::new().spawn();
    assert!(reactor.wait_running());

    let signo = Signal::SIGUSR1 as i32;
    let (tx, rx) = mpsc::channel();
    let tag = reactor.add_signal_watch(signo, move |delivered| {
        let _ = tx.send(delivered);
    });

    kill(Pid::this(), Signal::SIGUSR1).expect("raising SIGUSR1");
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).expect("signal delivery"),
        signo
    );

    reactor.remove_signal_watch(tag);
    assert_eq!(reactor.active_signal_count(), 0);

    reactor.stop(0);
    thread.join().expect("loop thread panicked");
}

/// A removed watch disappears from the source table.
#[test]
fn removal_retires_the_watch() {
    initialize_tracing();
    let (thread, reactor) = Reactor::new().spawn();
    assert!(reactor.wait_running());

    let tag = reactor.add_signal_watch(Signal::SIGUSR2 as i32, |_| {});
    assert!(reactor.source_exists(tag));
    assert_eq!(reactor.active_signal_count(), 1);

    reactor.remove_signal_watch(tag);
    assert!(!reactor.source_exists(tag));
    assert_eq!(reactor.active_signal_count(), 0);

    reactor.stop(0);
    thread.join().expect("loop thread panicked");
}
