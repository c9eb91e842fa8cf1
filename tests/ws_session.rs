use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use retro_live::{
    ClientConfig, Collaborators, ConnectionManager, ConnectionState, HttpSnapshotFetcher,
    Notifier, RetrospectiveStore, Severity, WsConnector,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, timeout};

fn reserve_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// What the fake backend does with each websocket it accepts
#[derive(Clone, Copy)]
enum Script {
    /// Push the scripted frames, then wait for the client to hang up
    Push,
    /// Hang up the first connection right away, behave like `Push` afterwards
    DropFirst,
}

struct Backend {
    script: Script,
    frames: Vec<String>,
    snapshot: Value,
    upgrades: AtomicUsize,
    snapshots: AtomicUsize,
    snapshot_served: Notify,
    closes: mpsc::UnboundedSender<(u16, String)>,
}

async fn hello(
    State(backend): State<Arc<Backend>>,
    Path(_session): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(backend, socket))
}

async fn serve_socket(backend: Arc<Backend>, mut socket: WebSocket) {
    let attempt = backend.upgrades.fetch_add(1, Ordering::SeqCst);
    if matches!(backend.script, Script::DropFirst) && attempt == 0 {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    // Events pushed before the resync landed would be overwritten by it
    backend.snapshot_served.notified().await;
    sleep(Duration::from_millis(200)).await;
    for frame in &backend.frames {
        if socket.send(Message::Text(frame.clone().into())).await.is_err() {
            return;
        }
    }

    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Close(Some(frame))) => {
                let _ = backend.closes.send((frame.code, frame.reason.to_string()));
                break;
            }
            Ok(Message::Close(None)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

async fn retrospective(
    State(backend): State<Arc<Backend>>,
    Path(session): Path<String>,
) -> Json<Value> {
    backend.snapshots.fetch_add(1, Ordering::SeqCst);
    let mut body = backend.snapshot.clone();
    body["id"] = Value::String(session);
    backend.snapshot_served.notify_one();
    Json(body)
}

async fn start_backend(
    script: Script,
    frames: Vec<String>,
) -> Result<(u16, Arc<Backend>, mpsc::UnboundedReceiver<(u16, String)>)> {
    let (closes, closes_rx) = mpsc::unbounded_channel();
    let backend = Arc::new(Backend {
        script,
        frames,
        snapshot: json!({
            "name": "Sprint 42",
            "questions": [{"id": "q1", "title": "What went well?"}],
            "answers": [{"id": "a1", "questionId": "q1", "text": "deploys"}],
        }),
        upgrades: AtomicUsize::new(0),
        snapshots: AtomicUsize::new(0),
        snapshot_served: Notify::new(),
        closes,
    });

    let app = Router::new()
        .route("/socket/hello/{session}", get(hello))
        .route("/retrospective/{session}", get(retrospective))
        .with_state(backend.clone());

    let port = reserve_port()?;
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok((port, backend, closes_rx))
}

#[derive(Default)]
struct Recorded {
    notices: Mutex<Vec<(String, Severity)>>,
    panics: Mutex<Vec<(String, Option<String>, bool)>>,
}

impl Notifier for Recorded {
    fn notify(&self, message: &str, severity: Severity) {
        self.notices.lock().push((message.to_string(), severity));
    }

    fn panic(&self, message: &str, context_id: Option<&str>, user_initiated: bool) {
        self.panics.lock().push((
            message.to_string(),
            context_id.map(str::to_string),
            user_initiated,
        ));
    }
}

fn client(
    port: u16,
    config: impl FnOnce(&mut ClientConfig),
) -> Result<(ConnectionManager, RetrospectiveStore, Arc<Recorded>)> {
    let mut cfg = ClientConfig {
        host: format!("127.0.0.1:{}", port),
        ..Default::default()
    };
    config(&mut cfg);

    let store = RetrospectiveStore::new();
    let notes = Arc::new(Recorded::default());
    let manager = ConnectionManager::new(
        &cfg,
        Collaborators {
            connector: Arc::new(WsConnector),
            fetcher: Arc::new(HttpSnapshotFetcher::new(cfg.clone())?),
            sink: Arc::new(store.clone()),
            notifier: notes.clone(),
        },
    )?;
    Ok((manager, store, notes))
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for {what}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resync_then_live_events_then_client_close() -> Result<()> {
    let frames = vec![
        json!({"action": "banana", "type": "answer", "value": {}}).to_string(),
        json!({"action": "update", "type": "answer", "value": {"id": "a1", "text": "fast deploys"}})
            .to_string(),
        json!({"action": "create", "type": "question", "value": {"id": "q2", "title": "What to improve?"}})
            .to_string(),
    ];
    let (port, backend, mut closes) = start_backend(Script::Push, frames).await?;
    let (manager, store, notes) = client(port, |_| {})?;

    manager.connect("sprint-42").await?;

    eventually("live events", || store.question("q2").is_some()).await?;
    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(backend.snapshots.load(Ordering::SeqCst), 1);

    let retro = store.retrospective().expect("snapshot applied");
    assert_eq!(retro["name"], "Sprint 42");
    assert_eq!(retro["id"], "sprint-42");
    assert_eq!(store.question("q1").unwrap()["title"], "What went well?");

    let answer = store.answer("a1").unwrap();
    assert_eq!(answer["text"], "fast deploys");
    assert_eq!(answer["questionId"], "q1");

    {
        let notices = notes.notices.lock();
        assert!(notices.contains(&("Websocket connected".to_string(), Severity::Success)));
        let warnings: Vec<_> = notices
            .iter()
            .filter(|(_, severity)| *severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].0.contains("banana"));
    }

    manager.disconnect("The user left the retrospective").await?;
    let (code, reason) = timeout(Duration::from_secs(5), closes.recv())
        .await?
        .ok_or_else(|| anyhow!("backend stopped"))?;
    assert_eq!(code, 4000);
    assert_eq!(reason, "client requested disconnect");

    assert_eq!(manager.state(), ConnectionState::Idle);
    let panics = notes.panics.lock();
    assert_eq!(
        *panics,
        vec![(
            "The user left the retrospective".to_string(),
            Some("sprint-42".to_string()),
            true
        )]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_side_close_reconnects_and_resyncs() -> Result<()> {
    let (port, backend, _closes) = start_backend(Script::DropFirst, Vec::new()).await?;
    let (manager, store, notes) = client(port, |cfg| {
        cfg.retry_floor_ms = 50;
        cfg.retry_step_ms = 50;
    })?;

    manager.connect("sprint-42").await?;

    eventually("resync after reconnect", || {
        backend.upgrades.load(Ordering::SeqCst) >= 2 && backend.snapshots.load(Ordering::SeqCst) >= 2
    })
    .await?;
    eventually("open channel", || manager.state() == ConnectionState::Open).await?;
    assert!(store.retrospective().is_some());

    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(manager.status().retries, 0);
    assert!(notes
        .notices
        .lock()
        .iter()
        .any(|(msg, severity)| *severity == Severity::Warning
            && msg == "The websocket connection has been closed"));
    assert!(notes.panics.lock().is_empty());

    manager.disconnect("done").await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_backend_is_abandoned() -> Result<()> {
    let port = reserve_port()?;
    let (manager, _store, notes) = client(port, |cfg| {
        cfg.retry_floor_ms = 10;
        cfg.retry_step_ms = 10;
    })?;

    manager.connect("sprint-42").await?;
    eventually("abandonment", || {
        manager.state() == ConnectionState::Abandoned
    })
    .await?;

    let panics = notes.panics.lock().clone();
    assert_eq!(panics.len(), 1);
    assert_eq!(panics[0].1.as_deref(), Some("sprint-42"));
    assert!(!panics[0].2);

    manager.connect("sprint-42").await?;
    assert_ne!(manager.state(), ConnectionState::Abandoned);
    Ok(())
}
