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

//! Bus messaging: the message model, the connection with its outgoing-call
//! correlation, signal match rules, and the in-memory loopback transport.

pub use connection::BusConnection;
pub(crate) use connection::ConnectionCore;
pub use error::{BusError, CallResult};
pub use loopback::{LoopbackEndpoint, LoopbackHub};
pub use match_rules::MatchSpec;
pub use message::{BusMessage, MessageKind, PeerId};

mod connection;
mod error;
mod loopback;
mod match_rules;
mod message;
