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

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::bus::{BusError, BusMessage};
use crate::dispatch::Dispatcher;
use crate::traits::BusTransport;

/// Code and body of the reply synthesized when a request is dropped
/// unanswered.
const DROPPED_STATUS: u16 = 500;
const DROPPED_CODE: u32 = 105;
const DROPPED_USER: &str = "Service failure";
const DROPPED_DEVELOPER: &str = "Service failed to send response to request";

/// HTTP-style verb of an inbound request, decoded from the low nibble of
/// the request flags. Higher flag bits are reserved and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    /// Read access (`0x1`).
    Get,
    /// Write access (`0x2`).
    Post,
}

impl RequestMethod {
    /// Decodes the verb from request `flags`; unknown verbs return `None`.
    pub fn from_flags(flags: u64) -> Option<RequestMethod> {
        match flags & 0xf {
            0x1 => Some(RequestMethod::Get),
            0x2 => Some(RequestMethod::Post),
            _ => None,
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
        };
        f.write_str(name)
    }
}

/// The closed vocabulary of canned failure replies.
///
/// Each category carries a fixed (HTTP status, error code, user message)
/// triple, so services answer failures consistently instead of hand-rolling
/// bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    /// The request path names nothing: 404, code 101.
    InvalidUrl,
    /// Arguments were present but wrong: 400, code 102.
    InvalidParameters,
    /// The operation failed for an unnamed reason: 500, code 103.
    GenericFailure,
    /// The device does not provide this operation: 404, code 104.
    NotSupported,
}

impl ReplyError {
    /// HTTP status of the canned reply.
    pub fn http_status(self) -> u16 {
        match self {
            ReplyError::InvalidUrl => 404,
            ReplyError::InvalidParameters => 400,
            ReplyError::GenericFailure => 500,
            ReplyError::NotSupported => 404,
        }
    }

    /// Numeric code inside the canned reply body.
    pub fn error_code(self) -> u32 {
        match self {
            ReplyError::InvalidUrl => 101,
            ReplyError::InvalidParameters => 102,
            ReplyError::GenericFailure => 103,
            ReplyError::NotSupported => 104,
        }
    }

    /// Human-readable message inside the canned reply body.
    pub fn user_message(self) -> &'static str {
        match self {
            ReplyError::InvalidUrl => "Invalid URL",
            ReplyError::InvalidParameters => "Invalid Parameters",
            ReplyError::GenericFailure => "Generic failure",
            ReplyError::NotSupported => "Not supported on this device",
        }
    }

    /// The bus-level error used when a plain method (not a `Request`)
    /// fails with this category.
    pub(crate) fn to_bus_error(self) -> BusError {
        match self {
            ReplyError::InvalidUrl | ReplyError::InvalidParameters => {
                BusError::InvalidRequest(self.user_message().to_owned())
            }
            ReplyError::GenericFailure => BusError::Internal(self.user_message().to_owned()),
            ReplyError::NotSupported => BusError::NotSupported,
        }
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_message())
    }
}

/// The wire shape of `Request`: (flags, path, headers, query, body).
#[derive(Deserialize)]
struct RequestWire(
    u64,
    String,
    BTreeMap<String, String>,
    BTreeMap<String, String>,
    String,
);

/// Body of a canned or synthesized error reply; the developer message is
/// omitted when empty.
fn error_body(code: u32, user: &str, developer: &str) -> String {
    let mut body = serde_json::Map::new();
    body.insert("errorCode".to_owned(), json!(code));
    body.insert("userMessage".to_owned(), json!(user));
    if !developer.is_empty() {
        body.insert("developerMessage".to_owned(), json!(developer));
    }
    Value::Object(body).to_string()
}

/// Reply bookkeeping shared by every clone of a [`ServiceRequest`].
struct ReplyState {
    dispatcher: Dispatcher,
    transport: Arc<dyn BusTransport>,
    call: BusMessage,
    replied: Mutex<bool>,
}

impl ReplyState {
    /// Flips unanswered to answered; `false` when someone already replied.
    fn claim(&self) -> bool {
        let mut replied = self.replied.lock();
        if *replied {
            return false;
        }
        *replied = true;
        true
    }

    /// Marshals and transmits the reply. Transmission is loop-thread work;
    /// off-loop callers defer it through the dispatcher.
    fn transmit(&self, status: u16, headers: BTreeMap<String, String>, body: String) {
        let reply = BusMessage::reply_to(&self.call, json!([status, headers, body]));
        if self.dispatcher.on_loop_thread() {
            if let Err(err) = self.transport.send(reply) {
                debug!(member = %self.call.member, error = %err, "reply not sent");
            }
            return;
        }
        let transport = Arc::clone(&self.transport);
        let member = self.call.member.clone();
        let queued = self.dispatcher.invoke(move || {
            if let Err(err) = transport.send(reply) {
                debug!(%member, error = %err, "reply not sent");
            }
        });
        if !queued {
            debug!(member = %self.call.member, "loop gone; reply dropped");
        }
    }
}

impl Drop for ReplyState {
    fn drop(&mut self) {
        if *self.replied.get_mut() {
            return;
        }
        warn!(
            path = %self.call.path,
            "request dropped without a reply; synthesizing a failure answer"
        );
        self.transmit(
            DROPPED_STATUS,
            BTreeMap::new(),
            error_body(DROPPED_CODE, DROPPED_USER, DROPPED_DEVELOPER),
        );
    }
}

/// An inbound `Request` call plus the obligation to answer it exactly once.
///
/// The guard is cheap to clone and may cross threads; all clones share one
/// answer slot. The first [`send_reply`](Self::send_reply) or
/// [`send_error`](Self::send_error) wins, later attempts are refused and
/// logged. If every clone is dropped with the request still unanswered, a
/// generic failure reply goes out in its place, so the remote caller never
/// hangs on forgotten server code.
#[derive(Clone)]
pub struct ServiceRequest {
    method: RequestMethod,
    path: String,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    body: String,
    state: Arc<ReplyState>,
}

impl ServiceRequest {
    /// Decodes `call` into a guard, capturing the context needed to answer
    /// it later. Calls whose body does not have the request shape, or whose
    /// flags name no known verb, are rejected.
    pub(crate) fn parse(
        call: &BusMessage,
        dispatcher: Dispatcher,
        transport: Arc<dyn BusTransport>,
    ) -> Result<ServiceRequest, BusError> {
        let RequestWire(flags, path, headers, query, body) =
            serde_json::from_value(call.body.clone())
                .map_err(|err| BusError::InvalidRequest(format!("request arguments: {err}")))?;
        let method = RequestMethod::from_flags(flags).ok_or_else(|| {
            BusError::InvalidRequest(format!("unsupported method flags {flags:#x}"))
        })?;
        Ok(ServiceRequest {
            method,
            path,
            headers,
            query,
            body,
            state: Arc::new(ReplyState {
                dispatcher,
                transport,
                call: call.clone(),
                replied: Mutex::new(false),
            }),
        })
    }

    /// The decoded verb.
    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// The request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request headers.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Query parameters.
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// The request body; empty for bodiless requests.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Answers the request with `(status, headers, body)`.
    ///
    /// `true` means this call claimed the answer; the transmit itself hops
    /// to the loop thread when needed. `false` means some earlier call
    /// already answered, which is logged and otherwise harmless.
    pub fn send_reply(
        &self,
        status: u16,
        headers: BTreeMap<String, String>,
        body: impl Into<String>,
    ) -> bool {
        if !self.state.claim() {
            warn!(path = %self.path, "request already answered; dropping the extra reply");
            return false;
        }
        self.state.transmit(status, headers, body.into());
        true
    }

    /// Answers the request with `error`'s canned triple. First answer wins,
    /// as with [`send_reply`](Self::send_reply).
    pub fn send_error(&self, error: ReplyError) -> bool {
        if !self.state.claim() {
            warn!(path = %self.path, "request already answered; dropping the extra reply");
            return false;
        }
        debug!(path = %self.path, %error, "answering with a canned error");
        self.state.transmit(
            error.http_status(),
            BTreeMap::new(),
            error_body(error.error_code(), error.user_message(), ""),
        );
        true
    }
}

impl fmt::Debug for ServiceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("answered", &*self.state.replied.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use serde_json::json;
    use static_assertions::assert_impl_all;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::bus::{CallResult, MessageKind, PeerId};
    use crate::dispatch::{DispatchCore, Dispatcher};
    use crate::traits::TransportEvent;

    assert_impl_all!(ServiceRequest: Send, Sync, Clone);

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<BusMessage>>,
    }

    impl BusTransport for RecordingTransport {
        fn unique_name(&self) -> PeerId {
            ":1.100".into()
        }

        fn send(&self, message: BusMessage) -> Result<(), BusError> {
            self.sent.lock().push(message);
            Ok(())
        }

        fn submit_call(&self, _message: BusMessage) -> Result<u64, BusError> {
            Err(BusError::NotConnected)
        }

        fn call_blocking(&self, _message: BusMessage, _timeout: Duration) -> CallResult {
            Err(BusError::NotConnected)
        }

        fn is_peer_present(&self, _peer: &PeerId) -> bool {
            false
        }

        fn take_events(&self) -> Option<UnboundedReceiver<TransportEvent>> {
            None
        }

        fn disconnect(&self) {}
    }

    fn request_call(flags: u64) -> BusMessage {
        let mut call = BusMessage::method_call(
            ":1.100",
            "/org/busbar/Service",
            "org.busbar.Service1",
            "Request",
            json!([
                flags,
                "/system/power",
                { "accept": "application/json" },
                { "verbose": "1" },
                "body-bytes"
            ]),
        );
        call.sender = Some(":1.7".into());
        call.serial = Some(99);
        call
    }

    fn fixture(flags: u64) -> (ServiceRequest, Arc<RecordingTransport>, Dispatcher) {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(Arc::new(DispatchCore::new(900)));
        let request = ServiceRequest::parse(
            &request_call(flags),
            dispatcher.clone(),
            Arc::clone(&transport) as Arc<dyn BusTransport>,
        )
        .expect("well-formed request");
        (request, transport, dispatcher)
    }

    fn sent_reply(transport: &RecordingTransport) -> BusMessage {
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1, "expected exactly one reply, got {sent:?}");
        sent[0].clone()
    }

    #[test]
    fn verbs_decode_from_the_low_nibble() {
        assert_eq!(RequestMethod::from_flags(0x1), Some(RequestMethod::Get));
        assert_eq!(RequestMethod::from_flags(0x2), Some(RequestMethod::Post));
        // Reserved high bits are ignored.
        assert_eq!(RequestMethod::from_flags(0xf1), Some(RequestMethod::Get));
        assert_eq!(RequestMethod::from_flags(0x0), None);
        assert_eq!(RequestMethod::from_flags(0x3), None);
        assert_eq!(RequestMethod::from_flags(0xf), None);
    }

    #[test]
    fn parse_exposes_the_request_fields() {
        let (request, _, _) = fixture(0x2);
        assert_eq!(request.method(), RequestMethod::Post);
        assert_eq!(request.path(), "/system/power");
        assert_eq!(
            request.headers().get("accept").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(request.query().get("verbose").map(String::as_str), Some("1"));
        assert_eq!(request.body(), "body-bytes");
    }

    #[test]
    fn parse_rejects_wrong_shapes_and_verbs() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(Arc::new(DispatchCore::new(901)));

        let mut bad_shape = request_call(0x1);
        bad_shape.body = json!({ "flags": 1 });
        let err = ServiceRequest::parse(
            &bad_shape,
            dispatcher.clone(),
            Arc::clone(&transport) as Arc<dyn BusTransport>,
        )
        .unwrap_err();
        assert!(matches!(err, BusError::InvalidRequest(_)));

        let err = ServiceRequest::parse(
            &request_call(0x4),
            dispatcher,
            transport as Arc<dyn BusTransport>,
        )
        .unwrap_err();
        assert!(matches!(err, BusError::InvalidRequest(_)));
    }

    #[test]
    fn first_reply_wins() {
        let (request, transport, dispatcher) = fixture(0x1);
        assert!(request.send_reply(200, BTreeMap::new(), "ok"));
        assert!(!request.send_reply(200, BTreeMap::new(), "again"));
        assert!(!request.send_error(ReplyError::GenericFailure));
        drop(request);
        dispatcher.flush();

        let reply = sent_reply(&transport);
        assert_eq!(reply.kind, MessageKind::MethodReturn);
        assert_eq!(reply.reply_serial, Some(99));
        assert_eq!(reply.destination, Some(":1.7".into()));
        assert_eq!(reply.body, json!([200, {}, "ok"]));
    }

    #[test]
    fn clones_share_the_answer_slot() {
        let (request, transport, dispatcher) = fixture(0x1);
        let clone = request.clone();
        assert!(clone.send_reply(204, BTreeMap::new(), ""));
        assert!(!request.send_reply(200, BTreeMap::new(), "late"));
        drop(request);
        drop(clone);
        dispatcher.flush();
        assert_eq!(sent_reply(&transport).body[0], json!(204));
    }

    #[test]
    fn racing_replies_from_two_threads_yield_one_transmission() {
        let (request, transport, dispatcher) = fixture(0x1);
        let other = request.clone();
        let claims = thread::scope(|scope| {
            let a = scope.spawn(move || request.send_reply(200, BTreeMap::new(), "a"));
            let b = scope.spawn(move || other.send_reply(200, BTreeMap::new(), "b"));
            [a.join().unwrap(), b.join().unwrap()]
        });
        assert_eq!(claims.iter().filter(|won| **won).count(), 1);
        dispatcher.flush();
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[test]
    fn dropping_unanswered_synthesizes_the_failure_reply() {
        let (request, transport, dispatcher) = fixture(0x1);
        drop(request);
        dispatcher.flush();

        let reply = sent_reply(&transport);
        assert_eq!(reply.body[0], json!(500));
        let body: Value =
            serde_json::from_str(reply.body[2].as_str().expect("body is a string")).unwrap();
        assert_eq!(body["errorCode"], json!(105));
        assert_eq!(body["userMessage"], json!("Service failure"));
        assert_eq!(
            body["developerMessage"],
            json!("Service failed to send response to request")
        );
    }

    #[test]
    fn canned_errors_carry_the_fixed_table() {
        let table = [
            (ReplyError::InvalidUrl, 404, 101, "Invalid URL"),
            (ReplyError::InvalidParameters, 400, 102, "Invalid Parameters"),
            (ReplyError::GenericFailure, 500, 103, "Generic failure"),
            (
                ReplyError::NotSupported,
                404,
                104,
                "Not supported on this device",
            ),
        ];
        for (error, status, code, message) in table {
            assert_eq!(error.http_status(), status);
            assert_eq!(error.error_code(), code);
            assert_eq!(error.user_message(), message);

            let (request, transport, dispatcher) = fixture(0x1);
            assert!(request.send_error(error));
            drop(request);
            dispatcher.flush();
            let reply = sent_reply(&transport);
            assert_eq!(reply.body[0], json!(status));
            let body: Value =
                serde_json::from_str(reply.body[2].as_str().unwrap()).unwrap();
            assert_eq!(body["errorCode"], json!(code));
            assert_eq!(body["userMessage"], json!(message));
            // Canned replies carry no developer message.
            assert!(body.get("developerMessage").is_none());
        }
    }
}
