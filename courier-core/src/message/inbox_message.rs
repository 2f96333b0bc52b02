/*
 * Copyright (c) 2024. Govcraft
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

use bytes::Bytes;

use crate::message::{ReplyContext, RpcAddress, RpcError};

/// An item queued in a per-endpoint inbox.
///
/// Lifecycle markers bracket an endpoint's traffic: `OnStart` is enqueued at
/// registration and is always the first item delivered; `OnStop` is appended
/// by the stop protocol and is the last. The `Remote*` variants are transport
/// events broadcast to every registered endpoint, which is why the whole enum
/// is cloneable.
#[derive(Debug, Clone)]
pub(crate) enum InboxMessage {
    /// The endpoint was registered; run `on_start`.
    OnStart,
    /// The endpoint is being unregistered; run `on_stop` and drain.
    OnStop,
    /// A fire-and-forget message.
    OneWay {
        sender: RpcAddress,
        payload: Bytes,
    },
    /// A request expecting exactly one reply through its context.
    Rpc {
        sender: RpcAddress,
        payload: Bytes,
        reply: ReplyContext,
    },
    /// A remote peer connected to this environment.
    RemoteConnected(RpcAddress),
    /// A remote peer disconnected from this environment.
    RemoteDisconnected(RpcAddress),
    /// Traffic to or from a remote peer failed.
    RemoteFailure(RpcAddress, RpcError),
}
