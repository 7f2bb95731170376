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

//! The crate's boundary traits.
//!
//! Everything the runtime consumes from the outside world comes through
//! here: the wire transport ([`BusTransport`]), the application's method
//! implementations ([`ServiceHandler`]), and persistent settings
//! ([`SettingsStore`]).

pub use handler::ServiceHandler;
pub use settings::{MemorySettings, SettingsStore};
pub use transport::{BusTransport, TransportEvent};

mod handler;
mod settings;
mod transport;
