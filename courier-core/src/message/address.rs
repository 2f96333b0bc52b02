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

use serde::{Deserialize, Serialize};

use crate::message::RpcError;

/// URL scheme of the canonical address form, `jspark://host:port`.
pub const RPC_URL_SCHEME: &str = "jspark";

/// Network address of an RPC environment: a `(host, port)` pair.
///
/// Addresses compare and hash structurally, which is what the local-vs-remote
/// routing decision relies on. An environment that runs without a server uses
/// the distinguished [`RpcAddress::client_only`] sentinel as its sender
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpcAddress {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl RpcAddress {
    /// Creates an address from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        RpcAddress {
            host: host.into(),
            port,
        }
    }

    /// The sender address of an environment that has no listening server.
    pub fn client_only() -> Self {
        RpcAddress {
            host: String::new(),
            port: 0,
        }
    }

    /// Returns `true` for the client-only sentinel.
    pub fn is_client_only(&self) -> bool {
        self.host.is_empty()
    }

    /// Renders the address as `host:port`.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Renders the canonical URL form, `jspark://host:port`.
    pub fn to_url(&self) -> String {
        format!("{}://{}:{}", RPC_URL_SCHEME, self.host, self.port)
    }

    /// Parses the canonical URL form produced by [`RpcAddress::to_url`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidAddress`] when the scheme is wrong or the
    /// host or port is absent or malformed.
    pub fn parse_url(url: &str) -> Result<Self, RpcError> {
        let invalid = || RpcError::InvalidAddress(url.to_string());
        let rest = url
            .strip_prefix(RPC_URL_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(RpcAddress::new(host, port))
    }
}

impl fmt::Display for RpcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_client_only() {
            write!(f, "<client-only>")
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_round_trips() {
        let address = RpcAddress::new("worker-3.internal", 7077);
        assert_eq!(address.to_url(), "jspark://worker-3.internal:7077");
        assert_eq!(RpcAddress::parse_url(&address.to_url()).unwrap(), address);
    }

    #[test]
    fn parse_rejects_malformed_urls() {
        for url in [
            "worker:7077",
            "http://worker:7077",
            "jspark://worker",
            "jspark://:7077",
            "jspark://worker:",
            "jspark://worker:notaport",
            "jspark://worker:99999",
        ] {
            assert!(
                matches!(RpcAddress::parse_url(url), Err(RpcError::InvalidAddress(_))),
                "expected {url} to be rejected"
            );
        }
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(RpcAddress::new("a", 1), RpcAddress::new("a", 1));
        assert_ne!(RpcAddress::new("a", 1), RpcAddress::new("a", 2));
        assert_ne!(RpcAddress::new("a", 1), RpcAddress::new("b", 1));
        assert!(RpcAddress::client_only().is_client_only());
    }
}
