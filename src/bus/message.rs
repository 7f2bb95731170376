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

use std::fmt;

use derive_new::new;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::BusError;

/// A peer's bus name, e.g. `:1.7`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, new,
)]
pub struct PeerId(#[new(into)] String);

impl PeerId {
    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        PeerId(value.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        PeerId(value)
    }
}

/// The four wire message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// A request expecting exactly one reply.
    MethodCall,
    /// The successful reply to a call.
    MethodReturn,
    /// The failure reply to a call.
    Error,
    /// A broadcast or targeted notification; no reply.
    Signal,
}

/// One bus message.
///
/// Bodies are JSON values; the byte-level encoding is the transport's
/// business. `serial` is stamped by the transport on transmission;
/// `reply_serial` correlates a reply with the call it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// What kind of message this is.
    pub kind: MessageKind,
    /// Originating peer, stamped by the transport.
    pub sender: Option<PeerId>,
    /// Target peer; `None` broadcasts a signal.
    pub destination: Option<PeerId>,
    /// Object path, e.g. `/org/busbar/Service`.
    pub path: String,
    /// Interface name, e.g. `org.busbar.Service1`.
    pub interface: String,
    /// Method or signal name.
    pub member: String,
    /// Transport-assigned sequence number.
    pub serial: Option<u64>,
    /// For replies: the serial of the call being answered.
    pub reply_serial: Option<u64>,
    /// For `Error` messages: the wire error name.
    pub error_name: Option<String>,
    /// Payload.
    pub body: Value,
}

impl BusMessage {
    /// A method call addressed at `destination`.
    pub fn method_call(
        destination: impl Into<PeerId>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        body: Value,
    ) -> Self {
        BusMessage {
            kind: MessageKind::MethodCall,
            sender: None,
            destination: Some(destination.into()),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            serial: None,
            reply_serial: None,
            error_name: None,
            body,
        }
    }

    /// The successful reply to `call`.
    pub fn reply_to(call: &BusMessage, body: Value) -> Self {
        BusMessage {
            kind: MessageKind::MethodReturn,
            sender: None,
            destination: call.sender.clone(),
            path: call.path.clone(),
            interface: call.interface.clone(),
            member: call.member.clone(),
            serial: None,
            reply_serial: call.serial,
            error_name: None,
            body,
        }
    }

    /// The failure reply to `call`, carrying `error`'s wire name.
    pub fn error_reply(call: &BusMessage, error: &BusError) -> Self {
        BusMessage {
            kind: MessageKind::Error,
            sender: None,
            destination: call.sender.clone(),
            path: call.path.clone(),
            interface: call.interface.clone(),
            member: call.member.clone(),
            serial: None,
            reply_serial: call.serial,
            error_name: Some(error.error_name().to_owned()),
            body: Value::String(error.to_string()),
        }
    }

    /// A broadcast signal.
    pub fn signal(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        body: Value,
    ) -> Self {
        BusMessage {
            kind: MessageKind::Signal,
            sender: None,
            destination: None,
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            serial: None,
            reply_serial: None,
            error_name: None,
            body,
        }
    }

    /// A signal delivered to `destination` only; used for replaying cached
    /// state to a fresh subscriber.
    pub fn targeted_signal(
        destination: PeerId,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        body: Value,
    ) -> Self {
        let mut message = Self::signal(path, interface, member, body);
        message.destination = Some(destination);
        message
    }

    /// `true` for [`MessageKind::MethodCall`].
    pub fn is_method_call(&self) -> bool {
        self.kind == MessageKind::MethodCall
    }

    /// `true` for [`MessageKind::Signal`].
    pub fn is_signal(&self) -> bool {
        self.kind == MessageKind::Signal
    }

    /// For `Error` messages: the typed error this message carries.
    pub fn to_error(&self) -> Option<BusError> {
        if self.kind != MessageKind::Error {
            return None;
        }
        let name = self.error_name.as_deref().unwrap_or("");
        let detail = self.body.as_str().unwrap_or("");
        Some(BusError::from_error_name(name, detail))
    }
}
