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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use courier_core::prelude::*;

use crate::setup::{initialize_tracing, wait_until, EchoEndpoint, RecordingEndpoint};

mod setup;

/// A local ask completes with the endpoint's reply.
///
/// **Scenario:** register "echo", ask it for `"x"`, and expect the reply to
/// carry the payload back after exactly one handler invocation.
#[tokio::test]
async fn local_echo_completes_ask() -> anyhow::Result<()> {
    initialize_tracing();
    let env = RpcEnv::new(RpcConfig::default());
    let echo = EchoEndpoint::new();
    let reference = env.register("echo", echo.clone())?;

    let reply = reference.ask(Bytes::from("x")).await?;
    assert_eq!(reply.as_ref(), b"x");
    assert_eq!(echo.calls(), 1);

    env.shutdown().await;
    Ok(())
}

/// Per-producer FIFO holds under concurrent producers.
///
/// **Scenario:** ten tasks each post one hundred tagged one-way messages to
/// the same endpoint. Every producer's sequence numbers must arrive strictly
/// increasing, whatever the interleaving between producers.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_preserve_per_producer_order() -> anyhow::Result<()> {
    initialize_tracing();
    let env = RpcEnv::new(RpcConfig::default());
    let recorder = RecordingEndpoint::new();
    let reference = env.register("recorder", recorder.clone())?;

    const PRODUCERS: usize = 10;
    const MESSAGES: usize = 100;

    let producers = (0..PRODUCERS).map(|producer| {
        let reference = reference.clone();
        tokio::spawn(async move {
            for seq in 0..MESSAGES {
                reference
                    .send(Bytes::from(format!("{producer}:{seq}")))
                    .expect("send failed");
            }
        })
    });
    for producer in join_all(producers).await {
        producer?;
    }

    assert!(
        wait_until(Duration::from_secs(10), || recorder.received().len()
            == PRODUCERS * MESSAGES)
        .await,
        "expected {} deliveries, saw {}",
        PRODUCERS * MESSAGES,
        recorder.received().len()
    );

    let mut next_expected: HashMap<usize, usize> = HashMap::new();
    for entry in recorder.received() {
        let (producer, seq) = entry.split_once(':').expect("malformed tag");
        let producer: usize = producer.parse()?;
        let seq: usize = seq.parse()?;
        let expected = next_expected.entry(producer).or_insert(0);
        assert_eq!(
            seq, *expected,
            "producer {producer} observed out of order: got {seq}, expected {expected}"
        );
        *expected += 1;
    }
    for (producer, count) in next_expected {
        assert_eq!(count, MESSAGES, "producer {producer} lost messages");
    }

    env.shutdown().await;
    Ok(())
}

/// An ask to an unknown name fails with `NoSuchEndpoint`; a one-way post to
/// an unknown name is logged and dropped.
#[tokio::test]
async fn unknown_endpoint_behaviour() -> anyhow::Result<()> {
    initialize_tracing();
    let env = RpcEnv::new(RpcConfig::default());
    let address = env.start_server("127.0.0.1", 0).await?;
    let ghost = env.remote_endpoint_ref("ghost", &address);

    // Ask: the error reaches the caller through the reply future.
    let outcome = ghost.ask(Bytes::from("x")).await;
    assert!(matches!(outcome, Err(RpcError::NoSuchEndpoint(_))));

    // One-way: dropped per policy, the call itself succeeds.
    ghost.send(Bytes::from("ignored"))?;

    env.shutdown().await;
    Ok(())
}

/// Registering then fetching the reference yields the registration name and
/// the environment's listen address.
#[tokio::test]
async fn registered_reference_carries_name_and_listen_address() -> anyhow::Result<()> {
    initialize_tracing();
    let env = RpcEnv::new(RpcConfig::default());
    let address = env.start_server("127.0.0.1", 0).await?;

    let echo = EchoEndpoint::new();
    let endpoint: Arc<dyn RpcEndpoint> = echo;
    let reference = env.register("echo", Arc::clone(&endpoint))?;
    assert_eq!(reference.name(), "echo");
    assert_eq!(reference.address(), &address);

    let looked_up = env.endpoint_ref(&endpoint).expect("reverse lookup failed");
    assert_eq!(looked_up, reference);

    env.shutdown().await;
    Ok(())
}

/// `ask_with_timeout` fails with `Timeout` when the endpoint is slower than
/// the deadline; the late reply is discarded without effect.
#[tokio::test]
async fn ask_with_timeout_elapses() -> anyhow::Result<()> {
    initialize_tracing();

    struct SlowReply;

    #[async_trait]
    impl RpcEndpoint for SlowReply {
        async fn receive_and_reply(
            &self,
            _sender: RpcAddress,
            payload: Bytes,
            reply: ReplyContext,
        ) -> Result<(), RpcError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            reply.reply(payload);
            Ok(())
        }
    }

    let env = RpcEnv::new(RpcConfig::default());
    let reference = env.register("slow-reply", Arc::new(SlowReply))?;

    let outcome = reference
        .ask_with_timeout(Bytes::from("x"), Duration::from_millis(50))
        .await;
    assert!(matches!(outcome, Err(RpcError::Timeout)));

    env.shutdown().await;
    Ok(())
}
