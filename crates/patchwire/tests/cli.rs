#![cfg(feature = "cli")]

use std::io::Write;
use std::net::SocketAddr;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::{stream, StreamExt};
use patchwire_transport::{incremental_response, parse_request_body, RequestError};
use serde_json::{json, Value};

fn patchwire() -> Command {
    Command::new(env!("CARGO_BIN_EXE_patchwire"))
}

fn run_with_stdin(args: &[&str], stdin: &[u8]) -> Output {
    let mut child = patchwire()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("cli should spawn");
    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(stdin)
        .expect("stdin should accept input");
    child.wait_with_output().expect("cli should exit")
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("stdout line should be JSON"))
        .collect()
}

const PAYLOADS: &str = concat!(
    r#"{"data":{"products":[{"id":"001"},{"id":"002"}]},"hasNext":true}"#,
    "\n",
    "\n",
    r#"{"path":["products",1],"data":{"price":250},"hasNext":false}"#,
    "\n",
);

#[test]
fn version_prints_name() {
    let output = patchwire().arg("version").output().expect("cli should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("patchwire "));
}

#[test]
fn encoded_body_decodes_part_by_part() {
    let encoded = run_with_stdin(&["encode"], PAYLOADS.as_bytes());
    assert!(encoded.status.success(), "{}", String::from_utf8_lossy(&encoded.stderr));
    assert!(encoded.stdout.ends_with(b"\r\n-----\r\n"));

    let decoded = run_with_stdin(&["decode", "--format", "json"], &encoded.stdout);
    assert!(decoded.status.success(), "{}", String::from_utf8_lossy(&decoded.stderr));

    let parts = json_lines(&decoded.stdout);
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["index"], 0);
    assert_eq!(parts[0]["kind"], "json");
    assert_eq!(parts[1]["body"]["path"], json!(["products", 1]));
}

#[test]
fn encode_rejects_invalid_json_lines() {
    let output = run_with_stdin(&["encode"], b"{\"data\":{}}\nnot json\n");
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 2"));
}

#[test]
fn truncated_body_is_data_invalid() {
    let encoded = run_with_stdin(&["encode"], PAYLOADS.as_bytes());
    assert!(encoded.status.success());
    let cut = &encoded.stdout[..encoded.stdout.len() - 20];

    let output = run_with_stdin(&["decode", "--format", "json"], cut);
    assert_eq!(output.status.code(), Some(60));
    assert_eq!(json_lines(&output.stdout).len(), 1);
}

#[test]
fn decode_rejects_empty_boundary() {
    let output = run_with_stdin(&["decode", "--boundary", ""], b"");
    assert_eq!(output.status.code(), Some(64));
}

async fn graphql(body: Bytes) -> Response {
    let request = match parse_request_body(&body) {
        Ok(request) => request,
        Err(err) => {
            let status = StatusCode::from_u16(err.status()).unwrap();
            return (status, Json(err.body())).into_response();
        }
    };
    if request.query == "{ broken" {
        let err = RequestError::Syntax("Expected Name, found <EOF>".into());
        let status = StatusCode::from_u16(err.status()).unwrap();
        return (status, Json(err.body())).into_response();
    }

    let payloads = stream::iter(vec![
        json!({"data": {"products": [{"id": "001"}, {"id": "002"}]}, "hasNext": true}),
        json!({"path": ["products", 0], "data": {"price": 500}, "hasNext": true}),
        json!({"path": ["products", 1], "data": {"price": 250}, "hasNext": false}),
    ])
    .then(|payload| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        payload
    });
    let response = incremental_response(payloads, "-").unwrap();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, response.content_type)
        .body(Body::from_stream(response.body))
        .unwrap()
}

async fn spawn_server() -> SocketAddr {
    let app = Router::new().route("/graphql", post(graphql));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn fetch(args: Vec<String>) -> Output {
    tokio::task::spawn_blocking(move || patchwire().args(&args).output().expect("cli should run"))
        .await
        .expect("cli task should join")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_prints_merged_result() {
    let addr = spawn_server().await;
    let output = fetch(vec![
        "fetch".into(),
        format!("http://{addr}/graphql"),
        "--query".into(),
        "{ products { id ... @defer { price } } }".into(),
        "--format".into(),
        "json".into(),
        "--timeout".into(),
        "5s".into(),
    ])
    .await;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let results = json_lines(&output.stdout);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["payloads"], 3);
    assert_eq!(results[0]["hasNext"], false);
    assert_eq!(
        results[0]["data"],
        json!({"products": [{"id": "001", "price": 500}, {"id": "002", "price": 250}]})
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_watch_prints_every_payload() {
    let addr = spawn_server().await;
    let output = fetch(vec![
        "fetch".into(),
        format!("http://{addr}/graphql"),
        "--query".into(),
        "{ products { id ... @defer { price } } }".into(),
        "--format".into(),
        "json".into(),
        "--watch".into(),
    ])
    .await;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let snapshots = json_lines(&output.stdout);
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots[1]["path"], json!(["products", 0]));
    assert_eq!(snapshots[2]["data"]["products"][1]["price"], 250);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_fetch_is_transport_error() {
    let addr = spawn_server().await;
    let output = fetch(vec![
        "fetch".into(),
        format!("http://{addr}/graphql"),
        "--query".into(),
        "{ broken".into(),
    ])
    .await;
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Expected Name"));
}
