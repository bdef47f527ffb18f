//! Control socket commands as sent by `editlink-ctl`.

use std::sync::Arc;

use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::GenericNamespaced;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use editlink::config::PreviewMode;
use editlink::dispatcher::{Action, Dispatcher};
use editlink::host::SessionDirectory;
use editlink::ipc::{spawn_control_server, ControlContext};
use editlink::models::{Edit, Range};
use editlink::surface::FileSurface;

use super::test_helpers::{dispatcher, operator_edit, session, unique_endpoint, Workspace, SOURCE};

const TOKEN: &str = "control-secret";

struct Control {
    name: String,
    dispatcher: Arc<Dispatcher<FileSurface>>,
    cancel: CancellationToken,
}

impl Drop for Control {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn start(ws: &Workspace) -> Control {
    let d = dispatcher(ws, PreviewMode::Overlay);
    let ctx = Arc::new(ControlContext {
        dispatcher: Arc::clone(&d),
        sessions: Arc::new(SessionDirectory::new()),
        auth_token: Some(TOKEN.to_owned()),
    });
    let name = format!("{}-ctl", unique_endpoint());
    let cancel = CancellationToken::new();
    spawn_control_server(ctx, &name, cancel.clone()).expect("control server");
    Control {
        name,
        dispatcher: d,
        cancel,
    }
}

async fn send_line(name: &str, line: &str) -> Value {
    let ns = name.to_ns_name::<GenericNamespaced>().unwrap();
    let stream = Stream::connect(ns).await.unwrap();
    let (recv, mut send) = stream.split();
    send.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    let reply = BufReader::new(recv)
        .lines()
        .next_line()
        .await
        .unwrap()
        .expect("one response line");
    serde_json::from_str(&reply).unwrap()
}

/// Send `body` the way `editlink-ctl` does, with the host's token.
async fn command(control: &Control, mut body: Value) -> Value {
    body["auth_token"] = json!(TOKEN);
    send_line(&control.name, &body.to_string()).await
}

async fn propose(control: &Control, file: &std::path::Path, edits: Vec<Edit>) {
    let outcome = control
        .dispatcher
        .dispatch(Action::ProposeDiff {
            origin: Some(session("agent")),
            file: file.to_path_buf(),
            edits,
            description: "from the agent".into(),
        })
        .await;
    assert!(outcome.is_ok());
}

#[tokio::test]
async fn list_and_show_describe_pending_proposals() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let control = start(&ws);

    let empty = command(&control, json!({ "command": "list" })).await;
    assert_eq!(empty["ok"], true);
    assert_eq!(empty["data"]["proposals"], json!([]));

    propose(&control, &file, vec![operator_edit()]).await;

    let listed = command(&control, json!({ "command": "list" })).await;
    let proposals = listed["data"]["proposals"].as_array().unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0]["file"], json!(file));
    assert_eq!(proposals[0]["state"], "proposed");
    assert_eq!(proposals[0]["pending"], json!([0]));
    assert_eq!(proposals[0]["origin"], "agent");
    assert_eq!(proposals[0]["description"], "from the agent");

    let shown = command(&control, json!({ "command": "show", "file": file })).await;
    assert_eq!(shown["ok"], true);
    assert_eq!(shown["data"]["statuses"], json!(["pending"]));
    assert_eq!(shown["data"]["edits"][0]["newText"], "a + b");
    assert_eq!(shown["data"]["annotations"][0]["line"], 4);
    assert_eq!(shown["data"]["annotations"][0]["kind"], "replace");
}

#[tokio::test]
async fn accept_applies_and_reports_the_notification() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let control = start(&ws);
    propose(&control, &file, vec![operator_edit()]).await;

    let reply = command(&control, json!({ "command": "accept", "file": file })).await;
    assert_eq!(reply["ok"], true, "{reply}");
    assert_eq!(reply["data"]["state"], "accepted");
    assert_eq!(reply["data"]["notified"], 1);
    assert!(ws.read("a.py").contains("a + b"));
    assert!(control.dispatcher.get(&file).await.is_none());
}

#[tokio::test]
async fn per_edit_commands_resolve_one_edit() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let control = start(&ws);
    propose(
        &control,
        &file,
        vec![
            Edit::new(Range::from_coords(0, 0, 0, 11), "import cmath"),
            operator_edit(),
        ],
    )
    .await;

    let first = command(
        &control,
        json!({ "command": "reject-edit", "file": file, "index": 0 }),
    )
    .await;
    assert_eq!(first["data"]["state"], "partial");
    assert_eq!(first["data"]["notified"], 0);

    let second = command(
        &control,
        json!({ "command": "accept-edit", "file": file, "index": 1 }),
    )
    .await;
    assert_eq!(second["data"]["state"], "accepted");
    assert_eq!(ws.read("a.py"), SOURCE.replace("a * b", "a + b"));
}

#[tokio::test]
async fn reject_and_close_leave_the_file_untouched() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let control = start(&ws);

    propose(&control, &file, vec![operator_edit()]).await;
    let rejected = command(&control, json!({ "command": "reject", "file": file })).await;
    assert_eq!(rejected["data"]["state"], "rejected");

    propose(&control, &file, vec![operator_edit()]).await;
    let closed = command(&control, json!({ "command": "close", "file": file })).await;
    assert_eq!(closed["data"]["state"], "none");
    assert_eq!(closed["data"]["notified"], 0);

    assert_eq!(ws.read("a.py"), SOURCE);
}

#[tokio::test]
async fn bad_requests_get_error_responses() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let control = start(&ws);
    propose(&control, &file, vec![operator_edit()]).await;

    let cases = [
        json!({ "command": "accept" }),
        json!({ "command": "accept-edit", "file": file }),
        json!({ "command": "accept-edit", "file": file, "index": 9 }),
        json!({ "command": "explode", "file": file }),
        json!({ "command": "show", "file": ws.root.join("other.py") }),
        json!({ "command": "accept", "file": "/elsewhere/a.py" }),
    ];
    for case in cases {
        let reply = command(&control, case.clone()).await;
        assert_eq!(reply["ok"], false, "{case} should fail");
        assert!(reply["error"].is_string());
    }

    let garbage = send_line(&control.name, "{not json").await;
    assert_eq!(garbage["ok"], false);
    assert!(garbage["error"].as_str().unwrap().starts_with("invalid json"));

    assert!(control.dispatcher.get(&file).await.is_some());
}

#[tokio::test]
async fn one_connection_serves_several_commands() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let control = start(&ws);
    propose(&control, &file, vec![operator_edit()]).await;

    let ns = control.name.as_str().to_ns_name::<GenericNamespaced>().unwrap();
    let stream = Stream::connect(ns).await.unwrap();
    let (recv, mut send) = stream.split();
    let mut lines = BufReader::new(recv).lines();

    let list = json!({ "command": "list", "auth_token": TOKEN }).to_string();
    send.write_all(format!("{list}\n\n").as_bytes()).await.unwrap();
    let listed: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(listed["data"]["proposals"].as_array().unwrap().len(), 1);

    let accept = json!({ "command": "accept", "file": file, "auth_token": TOKEN }).to_string();
    send.write_all(format!("{accept}\n").as_bytes()).await.unwrap();
    let accepted: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(accepted["ok"], true);
}

#[tokio::test]
async fn requests_without_the_token_are_refused() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let control = start(&ws);
    propose(&control, &file, vec![operator_edit()]).await;

    let requests = [
        json!({ "command": "list" }),
        json!({ "command": "accept", "file": file }),
        json!({ "command": "accept", "file": file, "auth_token": "guess" }),
        json!({ "command": "accept-edit", "file": file, "index": 0, "auth_token": "" }),
    ];
    for request in requests {
        let reply = send_line(&control.name, &request.to_string()).await;
        assert_eq!(reply["ok"], false, "{request} should be refused");
        assert_eq!(reply["error"], "unauthorized");
    }

    assert!(control.dispatcher.get(&file).await.is_some());
    assert_eq!(ws.read("a.py"), SOURCE);
}
