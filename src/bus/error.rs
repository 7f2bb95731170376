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

use std::error::Error;
use std::fmt;

use crate::bus::BusMessage;

/// Outcome of a method call: the reply message or a typed failure.
pub type CallResult = Result<BusMessage, BusError>;

/// Errors surfaced by the bus layer.
///
/// Each variant has a stable wire name under `org.busbar.Error.` so
/// failures can travel inside `Error` messages and be reconstructed on the
/// other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No live connection to send on.
    NotConnected,
    /// A call exceeded its deadline.
    Timeout,
    /// The peer answered nothing usable.
    NoReply,
    /// The connection (or the whole loop) went away mid-operation.
    Disconnected,
    /// Malformed request: wrong kind or wrong argument shape.
    InvalidRequest(String),
    /// The addressed peer or subscription does not exist.
    ServiceUnknown,
    /// The addressed member is not part of the service surface.
    UnknownMethod(String),
    /// The method exists but the device does not provide it.
    NotSupported,
    /// The (topic, peer) pair is already subscribed.
    AlreadyRegistered,
    /// The transport refused or dropped the message.
    SendFailed(String),
    /// Payload could not be encoded or decoded.
    Marshalling(String),
    /// Anything that does not fit the taxonomy above.
    Internal(String),
}

impl BusError {
    /// The stable wire name for this error.
    pub fn error_name(&self) -> &'static str {
        match self {
            BusError::NotConnected => "org.busbar.Error.NotConnected",
            BusError::Timeout => "org.busbar.Error.Timeout",
            BusError::NoReply => "org.busbar.Error.NoReply",
            BusError::Disconnected => "org.busbar.Error.Disconnected",
            BusError::InvalidRequest(_) => "org.busbar.Error.InvalidRequest",
            BusError::ServiceUnknown => "org.busbar.Error.ServiceUnknown",
            BusError::UnknownMethod(_) => "org.busbar.Error.UnknownMethod",
            BusError::NotSupported => "org.busbar.Error.NotSupported",
            BusError::AlreadyRegistered => "org.busbar.Error.AlreadyRegistered",
            BusError::SendFailed(_) => "org.busbar.Error.SendFailed",
            BusError::Marshalling(_) => "org.busbar.Error.Marshalling",
            BusError::Internal(_) => "org.busbar.Error.Internal",
        }
    }

    /// Rebuilds the error from a wire name plus detail text.
    ///
    /// Unrecognized names collapse to [`BusError::Internal`] carrying both.
    pub fn from_error_name(name: &str, detail: &str) -> Self {
        match name {
            "org.busbar.Error.NotConnected" => BusError::NotConnected,
            "org.busbar.Error.Timeout" => BusError::Timeout,
            "org.busbar.Error.NoReply" => BusError::NoReply,
            "org.busbar.Error.Disconnected" => BusError::Disconnected,
            "org.busbar.Error.InvalidRequest" => BusError::InvalidRequest(detail.to_owned()),
            "org.busbar.Error.ServiceUnknown" => BusError::ServiceUnknown,
            "org.busbar.Error.UnknownMethod" => BusError::UnknownMethod(detail.to_owned()),
            "org.busbar.Error.NotSupported" => BusError::NotSupported,
            "org.busbar.Error.AlreadyRegistered" => BusError::AlreadyRegistered,
            "org.busbar.Error.SendFailed" => BusError::SendFailed(detail.to_owned()),
            "org.busbar.Error.Marshalling" => BusError::Marshalling(detail.to_owned()),
            "org.busbar.Error.Internal" => BusError::Internal(detail.to_owned()),
            other => BusError::Internal(format!("{other}: {detail}")),
        }
    }

    /// `true` for the failures that mean "the transport cannot carry this",
    /// which callers handle identically: no connection, a refused send, or
    /// a payload that would not marshal.
    pub fn is_transport_unavailable(&self) -> bool {
        matches!(
            self,
            BusError::NotConnected | BusError::SendFailed(_) | BusError::Marshalling(_)
        )
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::NotConnected => write!(f, "not connected to a bus"),
            BusError::Timeout => write!(f, "call timed out"),
            BusError::NoReply => write!(f, "peer sent no usable reply"),
            BusError::Disconnected => write!(f, "connection closed"),
            BusError::InvalidRequest(detail) => write!(f, "invalid request: {detail}"),
            BusError::ServiceUnknown => write!(f, "no such service or subscription"),
            BusError::UnknownMethod(member) => write!(f, "unknown method: {member}"),
            BusError::NotSupported => write!(f, "not supported on this device"),
            BusError::AlreadyRegistered => write!(f, "listener already registered"),
            BusError::SendFailed(detail) => write!(f, "send failed: {detail}"),
            BusError::Marshalling(detail) => write!(f, "marshalling failed: {detail}"),
            BusError::Internal(detail) => write!(f, "internal error: {detail}"),
        }
    }
}

impl Error for BusError {}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Marshalling(err.to_string())
    }
}
