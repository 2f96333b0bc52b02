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

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::common::Dispatcher;
use crate::message::{ReplyContext, RpcAddress, RpcError};
use crate::traits::RpcEndpoint;

/// Reserved name of the built-in verifier endpoint. User registrations under
/// this name are rejected.
pub const ENDPOINT_VERIFIER_NAME: &str = "endpoint-verifier";

/// Existence probe answered by the verifier.
#[derive(Debug, Serialize, Deserialize)]
struct CheckExistence {
    name: String,
}

pub(crate) fn encode_check_existence(name: &str) -> Result<Bytes, RpcError> {
    let probe = CheckExistence {
        name: name.to_string(),
    };
    Ok(Bytes::from(serde_json::to_vec(&probe)?))
}

pub(crate) fn decode_existence(payload: &Bytes) -> Result<bool, RpcError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Built-in endpoint answering remote existence probes for names.
///
/// Registered eagerly when the server starts so that
/// `endpoint_ref_for` calls from other environments can succeed.
pub(crate) struct EndpointVerifier {
    dispatcher: Arc<Dispatcher>,
}

impl EndpointVerifier {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>) -> Self {
        EndpointVerifier { dispatcher }
    }
}

#[async_trait]
impl RpcEndpoint for EndpointVerifier {
    async fn receive_and_reply(
        &self,
        sender: RpcAddress,
        payload: Bytes,
        reply: ReplyContext,
    ) -> Result<(), RpcError> {
        let probe: CheckExistence = serde_json::from_slice(&payload)?;
        let exists = self.dispatcher.contains(&probe.name);
        trace!(%sender, name = %probe.name, exists, "answering existence probe");
        reply.reply(Bytes::from(serde_json::to_vec(&exists)?));
        Ok(())
    }
}
