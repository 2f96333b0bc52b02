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

use serde::{Deserialize, Serialize};

/// Worker count used when `dispatcher_threads` is zero or negative.
pub const DEFAULT_DISPATCHER_THREADS: usize = 5;

/// Configuration of an [`RpcEnv`](crate::common::RpcEnv).
///
/// Every field has a default, so a partial TOML document (or
/// `RpcConfig::default()`) yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Dispatcher worker count. Values `<= 0` fall back to
    /// [`DEFAULT_DISPATCHER_THREADS`].
    pub dispatcher_threads: i32,
    /// Concurrent outbound connect attempts.
    pub rpc_connect_threads: usize,
    /// Concurrent local-ask deliveries.
    pub deliver_threads: usize,
    /// Whether server and clients exchange the auth bootstrap frame.
    pub authentication_enabled: bool,
    /// Shared secret of the auth bootstrap.
    pub auth_secret: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            dispatcher_threads: DEFAULT_DISPATCHER_THREADS as i32,
            rpc_connect_threads: 2,
            deliver_threads: 2,
            authentication_enabled: false,
            auth_secret: String::new(),
        }
    }
}

impl RpcConfig {
    /// Parses a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// The worker count actually used by the dispatcher.
    pub fn effective_dispatcher_threads(&self) -> usize {
        if self.dispatcher_threads <= 0 {
            DEFAULT_DISPATCHER_THREADS
        } else {
            self.dispatcher_threads as usize
        }
    }

    /// Connect permits, floored at one.
    pub(crate) fn effective_connect_threads(&self) -> usize {
        self.rpc_connect_threads.max(1)
    }

    /// Deliver permits, floored at one.
    pub(crate) fn effective_deliver_threads(&self) -> usize {
        self.deliver_threads.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_or_negative_thread_counts_fall_back() {
        let mut config = RpcConfig {
            dispatcher_threads: 0,
            ..RpcConfig::default()
        };
        assert_eq!(config.effective_dispatcher_threads(), 5);
        config.dispatcher_threads = -3;
        assert_eq!(config.effective_dispatcher_threads(), 5);
        config.dispatcher_threads = 8;
        assert_eq!(config.effective_dispatcher_threads(), 8);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RpcConfig::from_toml_str(
            r#"
            dispatcher_threads = 3
            authentication_enabled = true
            auth_secret = "hunter2"
            "#,
        )
        .unwrap();
        assert_eq!(config.dispatcher_threads, 3);
        assert!(config.authentication_enabled);
        assert_eq!(config.auth_secret, "hunter2");
        assert_eq!(config.rpc_connect_threads, RpcConfig::default().rpc_connect_threads);
    }
}
