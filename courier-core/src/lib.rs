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

#![forbid(unsafe_code)]

//! # Courier Core
//!
//! This crate provides the core runtime of the Courier RPC system, built on
//! top of Tokio. It multiplexes many named endpoints onto a fixed pool of
//! worker tasks and serializes outbound traffic to remote peers.
//!
//! ## Key Concepts
//!
//! - **Endpoints (`RpcEndpoint`)**: Long-lived actors identified by a name
//!   within an environment and by a `(host, port)` address across
//!   environments. An endpoint is single-threaded from its own point of
//!   view: no two of its callbacks ever run concurrently.
//! - **References (`RpcEndpointRef`)**: Location-transparent handles used by
//!   senders. A reference resolves "local vs. remote" and routes into the
//!   dispatcher or the destination's outbox.
//! - **Dispatcher**: Owns the endpoint registry and schedules ready inboxes
//!   onto the worker pool via a shared ready-queue.
//! - **Inbox**: Per-endpoint FIFO mailbox delivering one message at a time,
//!   in the exact order the messages were posted.
//! - **Outbox**: Per-remote-address outbound queue that drains strictly in
//!   order while the underlying transport connection is asynchronously
//!   established.
//! - **Environment (`RpcEnv`)**: Top-level facade exposing `send`
//!   (fire-and-forget) and `ask` (request/response) and driving
//!   startup/shutdown.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier_core::prelude::*;
//!
//! let env = RpcEnv::new(RpcConfig::default());
//! let echo = env.register("echo", Arc::new(EchoEndpoint))?;
//! let reply = echo.ask(Bytes::from("hello")).await?;
//! ```

/// Runtime components: dispatcher, inboxes, outboxes, environment.
pub(crate) mod common;

/// Addresses, mailbox and outbox items, reply contexts, and errors.
pub(crate) mod message;

/// Trait definitions: the endpoint contract and the transport seams.
pub(crate) mod traits;

/// TCP transport: wire framing, client, and server ingress.
pub(crate) mod transport;

/// Prelude module for convenient imports.
///
/// Re-exports the public surface of the crate along with the `async_trait`
/// attribute used to implement [`traits::RpcEndpoint`].
pub mod prelude {
    pub use async_trait::async_trait;
    pub use bytes::Bytes;

    pub use crate::common::{
        AskFuture, RpcConfig, RpcEndpointRef, RpcEnv, ENDPOINT_VERIFIER_NAME,
    };
    pub use crate::message::{ReplyContext, RequestMessage, ResponseCallback, RpcAddress, RpcError};
    pub use crate::traits::{RpcEndpoint, TransportClient, TransportClientFactory};
    pub use crate::transport::TcpClientFactory;
}
