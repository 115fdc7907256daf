//! End-to-end RPC scenarios against a camera unit backed by the synthetic
//! test source, over a real websocket connection.

use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};

use astrolabe_core::Defaults;
use astrolabe_server::server::{serve, Handler};
use astrolabe_server::unit::CameraUnit;
use serde_json::{json, Value};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

type Client = WebSocket<MaybeTlsStream<TcpStream>>;

/// Start a server on an ephemeral port; the tempdir keeps the store alive.
fn start_server() -> (u16, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let unit = CameraUnit::new("test-cam", Path::new("test"), tmp.path(), Defaults::default())
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler: Arc<Mutex<dyn Handler>> = Arc::new(Mutex::new(unit));
    std::thread::spawn(move || {
        let _ = serve(listener, handler);
    });
    (port, tmp)
}

fn connect(port: u16) -> Client {
    let (client, _response) = tungstenite::connect(format!("ws://127.0.0.1:{port}")).unwrap();
    client
}

fn roundtrip(client: &mut Client, request: Value) -> Value {
    client
        .send(Message::Text(request.to_string()))
        .unwrap();
    loop {
        match client.read().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

#[test]
fn raw_returns_a_nonempty_image_string() {
    let (port, _tmp) = start_server();
    let mut client = connect(port);

    let response = roundtrip(&mut client, json!({ "function": "raw" }));
    assert!(response.get("error").is_none(), "unexpected {response}");
    assert!(!response["image_string"].as_str().unwrap().is_empty());
}

#[test]
fn switch_color_clamps_to_the_last_index() {
    let (port, _tmp) = start_server();
    let mut client = connect(port);

    // Two colors exist after one add.
    let response = roundtrip(&mut client, json!({ "function": "add_color", "red": 10 }));
    assert_eq!(response["colors"].as_array().unwrap().len(), 2);

    let response = roundtrip(
        &mut client,
        json!({ "function": "switch_color", "new_color": 5 }),
    );
    assert_eq!(response["active_color"], json!(1));
}

#[test]
fn set_camera_params_keeps_the_resolution_floor() {
    let (port, _tmp) = start_server();
    let mut client = connect(port);

    let response = roundtrip(
        &mut client,
        json!({ "function": "set_camera_params", "horizontal_resolution_pixels": 0 }),
    );
    assert!(response["horizontal_resolution_pixels"].as_u64().unwrap() >= 1);
}

#[test]
fn malformed_message_keeps_the_connection_usable() {
    let (port, _tmp) = start_server();
    let mut client = connect(port);

    client.send(Message::Text("not json".into())).unwrap();
    let reply = match client.read().unwrap() {
        Message::Text(text) => text,
        other => panic!("unexpected frame {other:?}"),
    };
    let value: Value = serde_json::from_str(&reply).unwrap();
    assert!(value.get("error").is_some());

    // The same connection still answers a valid command.
    let response = roundtrip(&mut client, json!({ "function": "info" }));
    assert!(response.get("error").is_none());
    assert_eq!(response["serial"], json!("test-cam"));
}

#[test]
fn ping_answers_pong_without_dispatch() {
    let (port, _tmp) = start_server();
    let mut client = connect(port);

    client.send(Message::Text("ping".into())).unwrap();
    match client.read().unwrap() {
        Message::Text(text) => assert_eq!(text, "pong"),
        other => panic!("unexpected frame {other:?}"),
    }
}

#[test]
fn unknown_function_reports_and_keeps_the_connection() {
    let (port, _tmp) = start_server();
    let mut client = connect(port);

    let response = roundtrip(&mut client, json!({ "function": "frobnicate" }));
    assert!(response["error"].as_str().unwrap().contains("frobnicate"));

    let response = roundtrip(&mut client, json!({ "function": "function_info" }));
    assert!(response.get("error").is_none());
}

#[test]
fn empty_string_arguments_act_as_omitted() {
    let (port, _tmp) = start_server();
    let mut client = connect(port);

    // quality "" must fall back to the default rather than fail validation.
    let response = roundtrip(&mut client, json!({ "function": "raw", "quality": "" }));
    assert!(response.get("error").is_none(), "unexpected {response}");
}

#[test]
fn two_connections_share_the_unit_state() {
    let (port, _tmp) = start_server();
    let mut first = connect(port);
    let mut second = connect(port);

    roundtrip(&mut first, json!({ "function": "add_color", "red": 99 }));
    let info = roundtrip(&mut second, json!({ "function": "info" }));
    assert_eq!(info["colors"].as_array().unwrap().len(), 2);
}
