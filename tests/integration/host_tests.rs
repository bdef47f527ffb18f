//! Editor host and agent bridge talking over a real socket.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use editlink::config::GlobalConfig;
use editlink::dispatcher::{Action, Dispatcher};
use editlink::driver::tools::edit_file;
use editlink::driver::{AgentBridge, BridgeEvent, BridgeMode, ProposeOutcome};
use editlink::host::{EditorHost, SessionDirectory};
use editlink::models::{Edit, Range};
use editlink::registry::{ENDPOINT_ENV, TOKEN_ENV};
use editlink::surface::FileSurface;
use editlink::transport::StatusLevel;
use editlink::AppError;

use super::test_helpers::{eventually, operator_edit, Workspace, SOURCE};

const WAIT: Duration = Duration::from_secs(5);

struct RunningHost {
    config: GlobalConfig,
    dispatcher: Arc<Dispatcher<FileSurface>>,
    sessions: Arc<SessionDirectory>,
    token: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

fn start_host(ws: &Workspace) -> RunningHost {
    let config = ws.config();
    let host = EditorHost::bind(Arc::new(config.clone()), FileSurface::new()).expect("bind host");
    RunningHost {
        config,
        dispatcher: host.dispatcher(),
        sessions: host.sessions(),
        token: host.auth_token().to_owned(),
        cancel: host.cancel_token(),
        task: tokio::spawn(host.run()),
    }
}

impl RunningHost {
    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("host stops")
            .expect("host task");
    }

    /// Run a user action and deliver its notifications like the control
    /// server does.
    async fn decide(&self, action: Action) {
        let outcome = self.dispatcher.dispatch(action).await;
        assert!(outcome.is_ok(), "{:?}", outcome.error);
        self.sessions.deliver(outcome.notifications).await;
    }

    async fn wait_for_proposal(&self, file: &Path) {
        for _ in 0..250 {
            if self.dispatcher.get(file).await.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no proposal for {} arrived", file.display());
    }

    async fn wait_for_sessions(&self, count: usize) {
        for _ in 0..250 {
            if self.sessions.len().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {count} session(s)");
    }
}

async fn next_decision(events: &mut broadcast::Receiver<BridgeEvent>) -> BridgeEvent {
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("event before timeout")
            .expect("event stream open");
        if !matches!(event, BridgeEvent::Status { .. }) {
            return event;
        }
    }
}

#[tokio::test]
async fn proposal_round_trip_reaches_the_agent() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let host = start_host(&ws);

    let bridge = AgentBridge::connect_to(&host.config, &host.config.endpoint, Some(&host.token))
        .await
        .expect("bridge connects");
    assert_eq!(bridge.mode().await, BridgeMode::Connected);
    let mut events = bridge.subscribe();

    let outcome = bridge
        .propose_edit(&file, vec![operator_edit()], "use addition")
        .await
        .unwrap();
    assert_eq!(outcome, ProposeOutcome::Proposed);
    host.wait_for_proposal(&file).await;
    assert_eq!(ws.read("a.py"), SOURCE);

    host.decide(Action::AcceptEdit {
        file: file.clone(),
        index: 0,
    })
    .await;

    assert_eq!(
        next_decision(&mut events).await,
        BridgeEvent::Accepted {
            file: file.clone(),
            accepted: vec![0],
            rejected: vec![],
        }
    );
    assert!(ws.read("a.py").contains("return a + b"));

    bridge.close().await;
    host.stop().await;
}

#[tokio::test]
async fn rejection_and_errors_reach_the_agent() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let host = start_host(&ws);
    let bridge = AgentBridge::connect_to(&host.config, &host.config.endpoint, Some(&host.token))
        .await
        .unwrap();
    let mut events = bridge.subscribe();

    bridge
        .propose_edit(&file, vec![operator_edit()], "")
        .await
        .unwrap();
    host.wait_for_proposal(&file).await;
    host.decide(Action::RejectAll { file: file.clone() }).await;
    assert_eq!(
        next_decision(&mut events).await,
        BridgeEvent::Rejected { file: file.clone() }
    );

    // The host refuses an empty proposal and answers with an error.
    bridge.propose_edit(&file, Vec::new(), "").await.unwrap();
    match next_decision(&mut events).await {
        BridgeEvent::Error {
            code,
            file: named,
            ..
        } => {
            assert_eq!(code, "protocol_violation");
            assert_eq!(named, Some(file.clone()));
        }
        other => panic!("unexpected {other:?}"),
    }

    bridge.close().await;
    host.stop().await;
}

#[tokio::test]
async fn open_diff_ignores_errors_about_other_files() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let other = ws.file("b.py", SOURCE);
    let host = start_host(&ws);
    let bridge = AgentBridge::connect_to(&host.config, &host.config.endpoint, Some(&host.token))
        .await
        .unwrap();
    let mut events = bridge.subscribe();
    let after = SOURCE.replace("a * b", "a + b");

    let (accepted, ()) = tokio::join!(
        bridge.open_diff(&file, SOURCE, &after, "whole file"),
        async {
            host.wait_for_proposal(&file).await;
            bridge.propose_edit(&other, Vec::new(), "").await.unwrap();
            loop {
                if let BridgeEvent::Error { file: named, .. } = next_decision(&mut events).await {
                    assert_eq!(named, Some(other.clone()));
                    break;
                }
            }
            host.decide(Action::AcceptAll { file: file.clone() }).await;
        }
    );
    assert!(accepted.unwrap());
    assert_eq!(ws.read("a.py"), after);

    bridge.close().await;
    host.stop().await;
}

#[tokio::test]
async fn open_diff_blocks_until_the_user_decides() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let host = start_host(&ws);
    let bridge = AgentBridge::connect_to(&host.config, &host.config.endpoint, Some(&host.token))
        .await
        .unwrap();
    let after = SOURCE.replace("a * b", "a + b");

    let (accepted, ()) = tokio::join!(
        bridge.open_diff(&file, SOURCE, &after, "whole file"),
        async {
            host.wait_for_proposal(&file).await;
            host.decide(Action::AcceptAll { file: file.clone() }).await;
        }
    );
    assert!(accepted.unwrap());
    assert_eq!(ws.read("a.py"), after);

    let (accepted, ()) = tokio::join!(
        bridge.open_diff(&file, &after, SOURCE, "undo"),
        async {
            host.wait_for_proposal(&file).await;
            host.decide(Action::RejectAll { file: file.clone() }).await;
        }
    );
    assert!(!accepted.unwrap());
    assert_eq!(ws.read("a.py"), after);

    bridge.close().await;
    host.stop().await;
}

#[tokio::test]
async fn advisory_messages_and_direct_applies_are_handled() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let host = start_host(&ws);
    let bridge = AgentBridge::connect_to(&host.config, &host.config.endpoint, Some(&host.token))
        .await
        .unwrap();
    let mut events = bridge.subscribe();

    bridge.send_status("starting", StatusLevel::Info).await;
    bridge.send_response("done thinking").await;
    bridge
        .send_tool_executed("grep", serde_json::json!({ "pattern": "mul" }), "1 match")
        .await;

    bridge.apply_diff(&file, vec![operator_edit()]).await.unwrap();
    let status = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(
        status,
        BridgeEvent::Status {
            level: StatusLevel::Info,
            ..
        }
    ));
    assert!(ws.read("a.py").contains("a + b"));
    assert_eq!(bridge.mode().await, BridgeMode::Connected);

    bridge.close().await;
    host.stop().await;
}

#[tokio::test]
async fn superseded_partial_proposal_reports_to_its_author() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let host = start_host(&ws);
    let bridge = AgentBridge::connect_to(&host.config, &host.config.endpoint, Some(&host.token))
        .await
        .unwrap();
    let mut events = bridge.subscribe();

    let first = vec![
        Edit::new(Range::from_coords(0, 0, 0, 11), "import cmath"),
        operator_edit(),
    ];
    bridge.propose_edit(&file, first, "").await.unwrap();
    host.wait_for_proposal(&file).await;
    host.decide(Action::AcceptEdit {
        file: file.clone(),
        index: 0,
    })
    .await;

    edit_file(&bridge, &file, "def mul", "def product", "rename")
        .await
        .unwrap();

    let warning = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(
        warning,
        BridgeEvent::Status {
            level: StatusLevel::Warning,
            ..
        }
    ));
    assert_eq!(
        next_decision(&mut events).await,
        BridgeEvent::Accepted {
            file: file.clone(),
            accepted: vec![0],
            rejected: vec![1],
        }
    );

    bridge.close().await;
    host.stop().await;
}

#[tokio::test]
async fn registry_record_lives_as_long_as_the_host() {
    let ws = Workspace::new();
    let host = start_host(&ws);
    let registry = host.config.registry().unwrap();

    let record = registry.read().expect("record published");
    assert_eq!(record.endpoint, host.config.endpoint);
    assert_eq!(record.process_id, std::process::id());
    assert_eq!(record.workspace_roots, ws.roots());

    host.cancel.cancel();
    assert!(eventually(WAIT, || registry.read().is_none()).await);
    tokio::time::timeout(WAIT, host.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn host_shutdown_leaves_the_bridge_standalone() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let host = start_host(&ws);
    let bridge = AgentBridge::connect_to(&host.config, &host.config.endpoint, Some(&host.token))
        .await
        .unwrap();
    let mut events = bridge.subscribe();
    host.wait_for_sessions(1).await;

    host.stop().await;
    assert!(matches!(
        next_decision(&mut events).await,
        BridgeEvent::Disconnected { .. }
    ));
    assert_eq!(bridge.mode().await, BridgeMode::Standalone);

    let outcome = bridge
        .propose_edit(&file, vec![operator_edit()], "")
        .await
        .unwrap();
    assert!(matches!(outcome, ProposeOutcome::Applied(_)));
    assert!(ws.read("a.py").contains("a + b"));
}

#[tokio::test]
async fn disconnect_orphans_pending_proposals() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let host = start_host(&ws);
    let bridge = AgentBridge::connect_to(&host.config, &host.config.endpoint, Some(&host.token))
        .await
        .unwrap();
    bridge
        .propose_edit(&file, vec![operator_edit()], "")
        .await
        .unwrap();
    host.wait_for_proposal(&file).await;

    bridge.close().await;
    host.wait_for_sessions(0).await;
    for _ in 0..250 {
        if host.dispatcher.get(&file).await.and_then(|p| p.origin).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(host.dispatcher.get(&file).await.unwrap().origin, None);

    // The proposal stays reviewable and still applies.
    host.decide(Action::AcceptAll { file: file.clone() }).await;
    assert!(ws.read("a.py").contains("a + b"));
    host.stop().await;
}

#[tokio::test]
#[serial]
async fn connect_discovers_the_host_through_its_record() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let host = start_host(&ws);
    std::env::remove_var(ENDPOINT_ENV);
    std::env::remove_var(TOKEN_ENV);

    let bridge = AgentBridge::connect(&host.config).await;
    assert_eq!(bridge.mode().await, BridgeMode::Connected);
    let outcome = bridge
        .propose_edit(&file, vec![operator_edit()], "")
        .await
        .unwrap();
    assert_eq!(outcome, ProposeOutcome::Proposed);
    host.wait_for_proposal(&file).await;

    bridge.close().await;
    host.stop().await;
}

#[tokio::test]
#[serial]
async fn unreachable_record_is_retracted_and_the_bridge_runs_standalone() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let config = ws.config();
    let registry = config.registry().unwrap();
    registry
        .publish(&config.endpoint, "ghost", &ws.roots(), None)
        .unwrap();
    std::env::remove_var(ENDPOINT_ENV);
    std::env::remove_var(TOKEN_ENV);

    let bridge = AgentBridge::connect(&config).await;
    assert_eq!(bridge.mode().await, BridgeMode::Standalone);
    assert!(registry.read().is_none());

    let outcome = bridge
        .propose_edit(&file, vec![operator_edit()], "")
        .await
        .unwrap();
    assert!(matches!(outcome, ProposeOutcome::Applied(_)));
}

#[tokio::test]
async fn connectors_without_the_token_are_refused() {
    let ws = Workspace::new();
    let host = start_host(&ws);

    for token in [None, Some("guess")] {
        let refused = AgentBridge::connect_to(&host.config, &host.config.endpoint, token).await;
        assert!(
            matches!(refused, Err(AppError::Unauthorized(_))),
            "{token:?} should be refused"
        );
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(host.sessions.len().await, 0);

    let bridge = AgentBridge::connect_to(&host.config, &host.config.endpoint, Some(&host.token))
        .await
        .expect("the published token is accepted");
    host.wait_for_sessions(1).await;

    bridge.close().await;
    host.stop().await;
}

#[tokio::test]
#[serial]
async fn refused_token_keeps_the_record_and_runs_standalone() {
    let ws = Workspace::new();
    let file = ws.file("a.py", SOURCE);
    let host = start_host(&ws);
    let registry = host.config.registry().unwrap();
    registry
        .publish(&host.config.endpoint, "stale", &ws.roots(), Some("outdated"))
        .unwrap();
    std::env::remove_var(ENDPOINT_ENV);
    std::env::remove_var(TOKEN_ENV);

    let bridge = AgentBridge::connect(&host.config).await;
    assert_eq!(bridge.mode().await, BridgeMode::Standalone);
    assert!(registry.read().is_some());

    let outcome = bridge
        .propose_edit(&file, vec![operator_edit()], "")
        .await
        .unwrap();
    assert!(matches!(outcome, ProposeOutcome::Applied(_)));
    host.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn spawned_terminals_inherit_endpoint_and_token() {
    let ws = Workspace::new();
    let config = ws.config();
    let host = EditorHost::bind(Arc::new(config.clone()), FileSurface::new()).expect("bind host");
    let out = ws.root.join("inherited.txt");

    let script = format!(
        "printf '%s %s' \"$EDITLINK_ENDPOINT\" \"$EDITLINK_TOKEN\" > '{}'",
        out.display()
    );
    let mut child = host
        .spawn_terminal("sh", &["-c".to_owned(), script])
        .expect("spawn sh");
    let status = tokio::time::timeout(WAIT, child.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());

    let inherited = std::fs::read_to_string(&out).unwrap();
    assert_eq!(inherited, format!("{} {}", config.endpoint, host.auth_token()));
    host.cancel_token().cancel();
}
