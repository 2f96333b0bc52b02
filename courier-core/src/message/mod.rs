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

//! Message-level building blocks of the runtime.
//!
//! This module aggregates the value types that flow through the system:
//! addresses, request messages, the items queued in per-endpoint inboxes and
//! per-peer outboxes, the single-shot reply capability, and the error type.

pub use address::RpcAddress;
pub(crate) use inbox_message::InboxMessage;
pub(crate) use outbox_message::OutboxMessage;
pub use outbox_message::ResponseCallback;
pub use reply_context::ReplyContext;
pub use request::RequestMessage;
pub use rpc_error::RpcError;

mod address;
mod inbox_message;
mod outbox_message;
mod reply_context;
mod request;
mod rpc_error;
