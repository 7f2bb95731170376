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

//! Optional loop-thread affinity checks.
//!
//! With the `thread-checks` feature enabled, every reactor registers its
//! loop thread at startup and the single-threaded internals assert they are
//! only entered from it. A violation means shared mutable loop state is
//! being touched from the wrong thread, so the process aborts rather than
//! limping on with corrupted state. Without the feature these calls compile
//! to nothing.

#[cfg(feature = "thread-checks")]
mod enabled {
    use std::thread::{self, ThreadId};

    use dashmap::DashMap;
    use lazy_static::lazy_static;
    use tracing::error;

    lazy_static! {
        static ref LOOP_THREADS: DashMap<u64, ThreadId> = DashMap::new();
    }

    pub(crate) fn register(reactor_id: u64) {
        LOOP_THREADS.insert(reactor_id, thread::current().id());
    }

    pub(crate) fn unregister(reactor_id: u64) {
        LOOP_THREADS.remove(&reactor_id);
    }

    pub(crate) fn assert_loop_thread(reactor_id: u64) {
        let Some(owner) = LOOP_THREADS.get(&reactor_id).map(|entry| *entry.value()) else {
            return;
        };
        let caller = thread::current().id();
        if caller != owner {
            error!(
                reactor_id,
                ?owner,
                ?caller,
                "loop-local state touched from a foreign thread; aborting"
            );
            std::process::abort();
        }
    }
}

#[cfg(feature = "thread-checks")]
pub(crate) use enabled::{assert_loop_thread, register, unregister};

#[cfg(not(feature = "thread-checks"))]
mod disabled {
    #[inline(always)]
    pub(crate) fn register(_reactor_id: u64) {}

    #[inline(always)]
    pub(crate) fn unregister(_reactor_id: u64) {}

    #[inline(always)]
    pub(crate) fn assert_loop_thread(_reactor_id: u64) {}
}

#[cfg(not(feature = "thread-checks"))]
pub(crate) use disabled::{assert_loop_thread, register, unregister};
