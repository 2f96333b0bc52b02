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

use std::time::Duration;

use courier_core::prelude::*;

use crate::setup::{initialize_tracing, wait_until, EchoEndpoint, RecordingEndpoint};

mod setup;

/// Full round trip between two environments over TCP: resolve through the
/// verifier, ask, and get the echoed payload back.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_echo_round_trip() -> anyhow::Result<()> {
    initialize_tracing();
    let server_env = RpcEnv::new(RpcConfig::default());
    let address = server_env.start_server("127.0.0.1", 0).await?;
    let echo = EchoEndpoint::new();
    server_env.register("echo", echo.clone())?;

    let client_env = RpcEnv::new(RpcConfig::default());
    let reference = client_env.endpoint_ref_for("echo", &address).await?;
    assert_eq!(reference.name(), "echo");
    assert_eq!(reference.address(), &address);

    let reply = reference.ask(Bytes::from("over the wire")).await?;
    assert_eq!(reply.as_ref(), b"over the wire");
    assert_eq!(echo.calls(), 1);

    client_env.shutdown().await;
    server_env.shutdown().await;
    Ok(())
}

/// Resolving a name the remote environment does not know fails with
/// `NoSuchEndpoint`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn endpoint_ref_for_unknown_name_fails() -> anyhow::Result<()> {
    initialize_tracing();
    let server_env = RpcEnv::new(RpcConfig::default());
    let address = server_env.start_server("127.0.0.1", 0).await?;

    let client_env = RpcEnv::new(RpcConfig::default());
    let outcome = client_env.endpoint_ref_for("nobody", &address).await;
    assert!(matches!(outcome, Err(RpcError::NoSuchEndpoint(_))));

    client_env.shutdown().await;
    server_env.shutdown().await;
    Ok(())
}

/// One-way messages cross the wire and preserve their order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_one_way_delivery() -> anyhow::Result<()> {
    initialize_tracing();
    let server_env = RpcEnv::new(RpcConfig::default());
    let address = server_env.start_server("127.0.0.1", 0).await?;
    let recorder = RecordingEndpoint::new();
    server_env.register("recorder", recorder.clone())?;

    let client_env = RpcEnv::new(RpcConfig::default());
    let reference = client_env.endpoint_ref_for("recorder", &address).await?;
    for payload in ["one", "two", "three"] {
        reference.send(Bytes::from(payload))?;
    }

    assert!(
        wait_until(Duration::from_secs(5), || recorder.received().len() == 3).await,
        "deliveries missing; log: {:?}",
        recorder.entries()
    );
    assert_eq!(recorder.received(), vec!["one", "two", "three"]);
    // The server side saw the connection come up.
    assert!(recorder
        .entries()
        .iter()
        .any(|entry| entry.starts_with("connected:")));

    client_env.shutdown().await;
    server_env.shutdown().await;
    Ok(())
}

/// A failed connect fails every queued ask with `TransportFailure`, and the
/// next send to the same address gets a fresh outbox (and a fresh attempt).
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn outbox_connect_failure_fails_pending_asks() -> anyhow::Result<()> {
    initialize_tracing();
    let env = RpcEnv::new(RpcConfig::default());
    // TCP port 1 on loopback: connection refused, quickly.
    let unreachable = RpcAddress::new("127.0.0.1", 1);
    let reference = env.remote_endpoint_ref("echo", &unreachable);

    let outcome = reference.ask(Bytes::from("hi")).await;
    assert!(matches!(outcome, Err(RpcError::TransportFailure(_))));

    // The outbox was evicted; a second ask reconstructs one and retries the
    // connect rather than failing on the stopped predecessor.
    let retry = reference.ask(Bytes::from("hi again")).await;
    assert!(matches!(retry, Err(RpcError::TransportFailure(_))));

    env.shutdown().await;
    Ok(())
}

/// A reference bound to an existing transport client bypasses the outbox and
/// writes directly to that connection.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bound_client_reference_round_trip() -> anyhow::Result<()> {
    initialize_tracing();
    let config = RpcConfig::default();
    let server_env = RpcEnv::new(config.clone());
    let address = server_env.start_server("127.0.0.1", 0).await?;
    server_env.register("echo", EchoEndpoint::new())?;

    let client_env = RpcEnv::new(config.clone());
    let client = TcpClientFactory::new(&config).create_client(&address).await?;
    let reference = client_env.client_endpoint_ref("echo", client);

    let reply = reference.ask(Bytes::from("direct")).await?;
    assert_eq!(reply.as_ref(), b"direct");

    client_env.shutdown().await;
    server_env.shutdown().await;
    Ok(())
}

/// With authentication enabled, a client presenting the right secret gets
/// through and one presenting the wrong secret is cut off.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn authentication_gates_connections() -> anyhow::Result<()> {
    initialize_tracing();
    let secured = RpcConfig {
        authentication_enabled: true,
        auth_secret: "open sesame".into(),
        ..RpcConfig::default()
    };
    let server_env = RpcEnv::new(secured.clone());
    let address = server_env.start_server("127.0.0.1", 0).await?;
    server_env.register("echo", EchoEndpoint::new())?;

    let good_env = RpcEnv::new(secured);
    let good_ref = good_env.endpoint_ref_for("echo", &address).await?;
    let reply = good_ref.ask(Bytes::from("let me in")).await?;
    assert_eq!(reply.as_ref(), b"let me in");

    let impostor = RpcConfig {
        authentication_enabled: true,
        auth_secret: "wrong".into(),
        ..RpcConfig::default()
    };
    let bad_env = RpcEnv::new(impostor);
    let bad_ref = bad_env.remote_endpoint_ref("echo", &address);
    let outcome = bad_ref.ask(Bytes::from("let me in")).await;
    assert!(matches!(outcome, Err(RpcError::TransportFailure(_))));

    good_env.shutdown().await;
    bad_env.shutdown().await;
    server_env.shutdown().await;
    Ok(())
}
