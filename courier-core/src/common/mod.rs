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

//! Runtime components of the environment.
//!
//! This module aggregates the moving parts: the dispatcher and its worker
//! pool, per-endpoint inboxes, per-peer outboxes, endpoint references, the
//! built-in verifier endpoint, configuration, and the [`RpcEnv`] facade that
//! owns them all.

pub use config::{RpcConfig, DEFAULT_DISPATCHER_THREADS};
pub(crate) use dispatcher::Dispatcher;
pub use endpoint_ref::{AskFuture, RpcEndpointRef};
pub use environment::RpcEnv;
pub(crate) use environment::EnvInner;
pub use verifier::ENDPOINT_VERIFIER_NAME;

mod config;
mod dispatcher;
mod endpoint_ref;
mod environment;
mod inbox;
mod outbox;
mod verifier;
