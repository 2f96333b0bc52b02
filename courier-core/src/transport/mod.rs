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

//! TCP transport of the RPC runtime.
//!
//! The wire speaks length-prefixed frames ([`protocol`]); [`client`] owns the
//! outbound side used by outboxes, and [`server`] is the sole ingress through
//! which remote traffic reaches the dispatcher.

pub use client::{TcpClientFactory, TcpTransportClient};
pub(crate) use server::TransportServer;

mod client;
pub(crate) mod protocol;
mod server;
