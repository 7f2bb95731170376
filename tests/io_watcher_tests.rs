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

use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::time::Duration;

use busbar::prelude::*;

use crate::setup::initialize_tracing;

mod setup;

const WAIT: Duration = Duration::from_secs(5);

/// Tests readability watching on a socketpair.
///
/// **Scenario:**
/// 1. Watch the read end of a `UnixStream` pair for readability.
/// 2. Write a byte into the other end.
///
/// **Verification:**
/// - The callback fires with `readable` set.
/// - After removal the watch count drops to zero and the fd can be closed.
#[test]
fn a_write_makes_the_watched_end_readable() {
    initialize_tracing();
    let (mut writer, mut reader) = UnixStream::pair().expect("socketpair");
    let (thread, reactor) = Reactor::new().spawn();
    assert!(reactor.wait_running());

    let (tx, rx) = mpsc::channel();
    let tag = reactor.add_io_source(reader.as_raw_fd(), IoInterest::READABLE, move |events| {
        let _ = tx.send(events);
    });

    writer.write_all(b"x").expect("write");
    let events = rx.recv_timeout(WAIT).expect("readable event");
    assert!(events.readable, "expected a readable event, got {events:?}");

    // Drain so a level-triggered re-fire cannot outlive the test.
    let mut buf = [0_u8; 8];
    let _ = reader.read(&mut buf).expect("read back");

    reactor.remove_io_source(tag);
    assert_eq!(reactor.active_io_count(), 0);

    reactor.stop(0);
    thread.join().expect("loop thread panicked");
}

/// An idle stream socket is immediately writable.
#[test]
fn writable_interest_fires_for_an_idle_socket() {
    initialize_tracing();
    let (writer, _reader) = UnixStream::pair().expect("socketpair");
    let (thread, reactor) = Reactor::new().spawn();
    assert!(reactor.wait_running());

    let (tx, rx) = mpsc::channel();
    let tag = reactor.add_io_source(writer.as_raw_fd(), IoInterest::WRITABLE, move |events| {
        let _ = tx.send(events);
    });
    let events = rx.recv_timeout(WAIT).expect("writable event");
    assert!(events.writable, "expected a writable event, got {events:?}");

    reactor.remove_io_source(tag);
    reactor.stop(0);
    thread.join().expect("loop thread panicked");
}

/// Tests that closing the peer is reported on the watched end.
///
/// **Scenario:**
/// 1. Watch the read end for readability.
/// 2. Drop the write end entirely.
///
/// **Verification:**
/// - A condition arrives: readability (EOF) or hangup, depending on what
///   the poller hands out first.
#[test]
fn closing_the_peer_reports_a_condition() {
    initialize_tracing();
    let (writer, reader) = UnixStream::pair().expect("socketpair");
    let (thread, reactor) = Reactor::new().spawn();
    assert!(reactor.wait_running());

    let (tx, rx) = mpsc::channel();
    let tag = reactor.add_io_source(reader.as_raw_fd(), IoInterest::READABLE, move |events| {
        let _ = tx.send(events);
    });

    drop(writer);
    let events = rx.recv_timeout(WAIT).expect("close condition");
    assert!(
        events.readable || events.hangup,
        "expected EOF readability or hangup, got {events:?}"
    );

    reactor.remove_io_source(tag);
    reactor.stop(0);
    thread.join().expect("loop thread panicked");
}

/// A removed watch stops reporting even with data pending.
#[test]
fn a_removed_watch_goes_quiet() {
    initialize_tracing();
    let (mut writer, reader) = UnixStream::pair().expect("socketpair");
    let (thread, reactor) = Reactor::new().spawn();
    assert!(reactor.wait_running());

    let (tx, rx) = mpsc::channel();
    let tag = reactor.add_io_source(reader.as_raw_fd(), IoInterest::READABLE, move |events| {
        let _ = tx.send(events);
    });
    reactor.remove_io_source(tag);
    assert!(!reactor.source_exists(tag));

    writer.write_all(b"x").expect("write");
    assert!(
        rx.recv_timeout(Duration::from_millis(100)).is_err(),
        "removed watch still delivered an event"
    );

    reactor.stop(0);
    thread.join().expect("loop thread panicked");
}
