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

use async_trait::async_trait;
use serde_json::Value;

use crate::service::{ReplyError, ServiceRequest};

/// The application's half of the service surface.
///
/// [`ServiceHost`](crate::service::ServiceHost) routes inbound methods to
/// these hooks. Every hook has a default body answering the
/// [`NotSupported`](ReplyError::NotSupported) canned error, so an
/// implementation only overrides what the device actually provides.
///
/// Hooks run as tasks on the loop thread; their futures never cross
/// threads, hence `#[async_trait(?Send)]`. The handler value itself moves
/// onto the loop thread once at startup and must be `Send`.
///
/// ```
/// use busbar::prelude::*;
/// use serde_json::json;
///
/// struct Thermostat;
///
/// #[async_trait(?Send)]
/// impl ServiceHandler for Thermostat {
///     async fn config(&self) -> Result<serde_json::Value, ReplyError> {
///         Ok(json!({ "mode": "heat" }))
///     }
/// }
/// ```
#[async_trait(?Send)]
pub trait ServiceHandler: Send + 'static {
    /// `Config()`: the device's configuration blob.
    async fn config(&self) -> Result<Value, ReplyError> {
        Err(ReplyError::NotSupported)
    }

    /// `Request(...)`: an HTTP-style request. Answer through the guard;
    /// dropping it unanswered sends the generic failure reply for you.
    async fn handle_request(&self, request: ServiceRequest) {
        request.send_error(ReplyError::NotSupported);
    }

    /// `GetSystemInfo()`.
    async fn system_info(&self) -> Result<Value, ReplyError> {
        Err(ReplyError::NotSupported)
    }

    /// `GetSystemTime()`.
    async fn system_time(&self) -> Result<Value, ReplyError> {
        Err(ReplyError::NotSupported)
    }

    /// `GetDiagContexts()`.
    async fn diag_contexts(&self) -> Result<Value, ReplyError> {
        Err(ReplyError::NotSupported)
    }

    /// `SetDiagContexts(contexts)`.
    async fn set_diag_contexts(&self, _contexts: String) -> Result<Value, ReplyError> {
        Err(ReplyError::NotSupported)
    }
}
