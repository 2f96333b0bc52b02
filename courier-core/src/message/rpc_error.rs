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

use std::fmt;

/// Errors surfaced by the RPC runtime.
///
/// Errors that carry a reply context are delivered through that context; the
/// worker that hit them keeps running. Errors on one-way paths are logged and
/// dropped, except [`RpcError::NameAlreadyRegistered`],
/// [`RpcError::InvalidAddress`], and [`RpcError::EnvironmentStopped`], which
/// are returned to the caller.
#[derive(Debug, Clone)]
pub enum RpcError {
    /// An endpoint with the given name is already registered.
    NameAlreadyRegistered(String),
    /// The operation was attempted after the environment shut down.
    EnvironmentStopped,
    /// A message was posted to a name with no registered endpoint.
    NoSuchEndpoint(String),
    /// A message was posted to an endpoint whose inbox has stopped.
    EndpointStopped(String),
    /// Connecting to or sending over the transport failed.
    TransportFailure(String),
    /// An RPC URL could not be parsed.
    InvalidAddress(String),
    /// The deadline of an `ask` elapsed before the reply arrived.
    Timeout,
    /// An endpoint callback returned an error.
    HandlerFailure(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameAlreadyRegistered(name) => {
                write!(f, "there is already an endpoint called {name}")
            }
            Self::EnvironmentStopped => write!(f, "rpc environment already stopped"),
            Self::NoSuchEndpoint(name) => write!(f, "no such endpoint: {name}"),
            Self::EndpointStopped(name) => write!(f, "endpoint {name} has stopped"),
            Self::TransportFailure(reason) => write!(f, "transport failure: {reason}"),
            Self::InvalidAddress(url) => write!(f, "invalid rpc url: {url}"),
            Self::Timeout => write!(f, "rpc ask timed out"),
            Self::HandlerFailure(reason) => write!(f, "endpoint handler failed: {reason}"),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        Self::TransportFailure(err.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::TransportFailure(format!("serialization error: {err}"))
    }
}
