// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Drives the six literal end-to-end scenarios from the server
//! specification's testable-properties section against a live listener
//! bound to an ephemeral port.

use std::time::Duration;

use greenhouse_server::config::Config;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

const TIMEOUT: Duration = Duration::from_secs(2);

/// One client connection, split so a single `BufReader` owns the read
/// half for the whole test — recreating a `BufReader` mid-test would
/// silently drop whatever it had already buffered from the socket.
struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn send(&mut self, value: &Value) {
        let mut line = value.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        tokio::time::timeout(TIMEOUT, async {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            serde_json::from_str(line.trim_end()).unwrap()
        })
        .await
        .unwrap()
    }

    /// Reads lines until one matches `predicate`, within the overall
    /// timeout. `sensor_update`/`node_change` may interleave with replies
    /// on the same connection, so scenarios expecting a specific reply
    /// must skip past unrelated unsolicited events.
    async fn recv_until(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                let mut line = String::new();
                self.reader.read_line(&mut line).await.unwrap();
                let value: Value = serde_json::from_str(line.trim_end()).unwrap();
                if predicate(&value) {
                    return value;
                }
            }
        })
        .await
        .unwrap()
    }
}

/// Binds an ephemeral listener, starts the server against it, and connects
/// one client. The returned `TempDir` backs the session's user store file
/// and must outlive the test (it is removed on drop).
async fn start_server() -> (Client, TempDir) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.users.file_path = dir.path().join("users.json").to_string_lossy().to_string();
    config.sim.test_seed = Some(1);

    tokio::spawn(greenhouse_server::server::serve(listener, config));

    let stream = tokio::time::timeout(TIMEOUT, TcpStream::connect(addr)).await.unwrap().unwrap();
    let (read_half, writer) = stream.into_split();
    let client = Client { reader: BufReader::new(read_half), writer };
    (client, dir)
}

#[tokio::test]
async fn scenario_1_welcome_on_connect() {
    let (mut client, _dir) = start_server().await;
    let welcome = client.recv().await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["server"], "GreenhouseServer");
}

#[tokio::test]
async fn scenario_2_get_topology_returns_demo_node() {
    let (mut client, _dir) = start_server().await;
    let _welcome = client.recv().await;

    client.send(&json!({"type":"get_topology","id":"c-2"})).await;
    let topology = client.recv_until(|v| v["type"] == "topology").await;

    assert_eq!(topology["id"], "c-2");
    let nodes = topology["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["id"], "node-1");
    assert_eq!(nodes[0]["name"], "Demo Greenhouse");
    assert_eq!(nodes[0]["sensors"], json!(["temperature", "humidity", "light", "ph"]));
}

#[tokio::test]
async fn scenario_3_subscribe_then_receive_sensor_update() {
    let (mut client, _dir) = start_server().await;
    let _welcome = client.recv().await;

    client
        .send(&json!({"type":"subscribe","id":"c-3","nodes":["*"],"events":["sensor_update"]}))
        .await;
    let ack = client.recv_until(|v| v["type"] == "ack").await;
    assert_eq!(ack["id"], "c-3");

    let update = client.recv_until(|v| v["type"] == "sensor_update" && v["nodeId"] == "node-1").await;
    let data = update["data"].as_object().unwrap();
    for key in ["temperature", "humidity", "light", "ph", "fan", "water_pump", "co2", "window"] {
        assert!(data.contains_key(key), "missing key {key}");
    }
}

#[tokio::test]
async fn scenario_4_command_reflected_in_next_sensor_update() {
    let (mut client, _dir) = start_server().await;
    let _welcome = client.recv().await;

    client
        .send(&json!({"type":"subscribe","id":"c-3","nodes":["*"],"events":["sensor_update"]}))
        .await;
    let _ack = client.recv_until(|v| v["type"] == "ack").await;

    client
        .send(&json!({"type":"command","id":"c-4","nodeId":"node-1","target":"fan","action":"set","params":{"on":true}}))
        .await;
    let ack = client.recv_until(|v| v["type"] == "ack" && v["id"] == "c-4").await;
    assert_eq!(ack["status"], "ok");

    let update = client.recv_until(|v| v["type"] == "sensor_update" && v["nodeId"] == "node-1").await;
    assert_eq!(update["data"]["fan"], "ON");
}

#[tokio::test]
async fn scenario_5_create_node_broadcasts_node_change() {
    let (mut client, _dir) = start_server().await;
    let _welcome = client.recv().await;

    client.send(&json!({"type":"subscribe","id":"c-3","nodes":["*"],"events":["node_change"]})).await;
    let _ack = client.recv_until(|v| v["type"] == "ack").await;

    client
        .send(&json!({"type":"create_node","id":"c-5","node":{"name":"B","location":"S","ip":"10.0.0.1","sensors":["temperature"],"actuators":["fan"]}}))
        .await;
    let ack = client.recv_until(|v| v["type"] == "ack" && v["id"] == "c-5").await;
    assert_eq!(ack["nodeId"], "node-2");

    let change = client.recv_until(|v| v["type"] == "node_change" && v["nodeId"] == "node-2").await;
    assert_eq!(change["op"], "added");
}

#[tokio::test]
async fn scenario_6_auth_success_and_failure() {
    let (mut client, _dir) = start_server().await;
    let _welcome = client.recv().await;

    client.send(&json!({"type":"auth","id":"c-6","username":"admin","password":"admin123"})).await;
    let ok = client.recv_until(|v| v["type"] == "auth_response" && v["id"] == "c-6").await;
    assert_eq!(ok["success"], true);
    assert_eq!(ok["userId"], 1);
    assert_eq!(ok["role"], "Admin");

    client.send(&json!({"type":"auth","id":"c-7","username":"admin","password":"wrong"})).await;
    let bad = client.recv_until(|v| v["type"] == "auth_response" && v["id"] == "c-7").await;
    assert_eq!(bad["success"], false);
}

#[tokio::test]
async fn unknown_message_type_is_ignored_not_fatal() {
    let (mut client, _dir) = start_server().await;
    let _welcome = client.recv().await;

    client.send(&json!({"type":"frobnicate","id":"c-1"})).await;
    client.send(&json!({"type":"ping","id":"c-2"})).await;
    let pong = client.recv_until(|v| v["type"] == "pong").await;
    assert_eq!(pong["id"], "c-2");
}

#[tokio::test]
async fn delete_node_twice_returns_not_found_second_time() {
    let (mut client, _dir) = start_server().await;
    let _welcome = client.recv().await;

    client.send(&json!({"type":"delete_node","id":"c-1","nodeId":"node-1"})).await;
    let first = client.recv_until(|v| v["id"] == "c-1").await;
    assert_eq!(first["type"], "ack");

    client.send(&json!({"type":"delete_node","id":"c-2","nodeId":"node-1"})).await;
    let second = client.recv_until(|v| v["id"] == "c-2").await;
    assert_eq!(second["type"], "error");
    assert_eq!(second["code"], "NOT_FOUND");
}
