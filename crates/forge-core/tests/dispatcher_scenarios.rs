//! End-to-end dispatcher scenarios, driven through the public API with a
//! scripted build engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use forge_core::{
    dispatcher, request_queue, work_queue, BuildEngine, BuildState, BuildStateCell,
    BuildStructure, CancelToken, ClientHandle, ClientId, CommandError, Dispatcher,
    DispatcherConfig, Event, LastCommandCell, OutboundRx, Reader, Request, RequestQueue,
    ResolvedKey, Response, ScopedKey, ServerMessage, ServerRequest, ServerStateCell, StateError,
    Work,
};

// -----------------------------------------------------------------------------
// Scripted engine
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct FakeState {
    settings: BTreeMap<ScopedKey, String>,
    tasks: BTreeMap<ScopedKey, String>,
    fail_lookups: bool,
}

impl FakeState {
    fn standard() -> Self {
        let mut settings = BTreeMap::new();
        settings.insert(ScopedKey::global("name"), "demo".to_string());
        settings.insert(ScopedKey::global("status"), "idle".to_string());

        let mut tasks = BTreeMap::new();
        tasks.insert(ScopedKey::global("compile"), "compile".to_string());

        FakeState {
            settings,
            tasks,
            fail_lookups: false,
        }
    }
}

impl BuildState for FakeState {
    fn parse_keys(&self, text: &str) -> Result<Vec<ScopedKey>, StateError> {
        if self.fail_lookups {
            return Err(StateError("lookup backend offline".to_string()));
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let key = ScopedKey::global(text);
        if self.settings.contains_key(&key) || self.tasks.contains_key(&key) {
            Ok(vec![key])
        } else {
            Ok(Vec::new())
        }
    }

    fn resolve(&self, key: &ScopedKey) -> Result<Option<ResolvedKey>, StateError> {
        if let Some(value) = self.settings.get(key) {
            return Ok(Some(ResolvedKey::Setting {
                value: value.clone(),
            }));
        }
        if let Some(command) = self.tasks.get(key) {
            return Ok(Some(ResolvedKey::Task {
                command: command.clone(),
            }));
        }
        Ok(None)
    }

    fn structure(&self) -> BuildStructure {
        BuildStructure {
            projects: vec!["root".to_string()],
        }
    }

    fn completions(&self, line: &str, _level: u8) -> Result<Vec<String>, StateError> {
        Ok(self
            .settings
            .keys()
            .chain(self.tasks.keys())
            .map(ToString::to_string)
            .filter(|name| name.starts_with(line.trim()))
            .collect())
    }
}

/// Engine whose load can be held back by a gate, and whose `hang` command
/// spins until cancelled.
struct FakeEngine {
    state: Arc<FakeState>,
    load_gate: Option<std::sync::mpsc::Receiver<()>>,
}

impl FakeEngine {
    fn new(state: FakeState) -> Self {
        FakeEngine {
            state: Arc::new(state),
            load_gate: None,
        }
    }

    fn gated(state: FakeState) -> (Self, std::sync::mpsc::Sender<()>) {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut engine = FakeEngine::new(state);
        engine.load_gate = Some(rx);
        (engine, tx)
    }
}

impl BuildEngine for FakeEngine {
    type State = FakeState;

    fn load(&mut self) -> Result<Arc<FakeState>, CommandError> {
        if let Some(gate) = self.load_gate.take() {
            gate.recv()
                .map_err(|_| CommandError::Failed("load gate dropped".to_string()))?;
        }
        Ok(self.state.clone())
    }

    fn run_command(
        &mut self,
        command: &str,
        cancel: &CancelToken,
    ) -> Result<Arc<FakeState>, CommandError> {
        if command == "hang" {
            for _ in 0..600 {
                if cancel.is_cancelled() {
                    return Err(CommandError::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            return Err(CommandError::Failed("hang was never cancelled".to_string()));
        }
        if command.starts_with("fail") {
            return Err(CommandError::Failed(format!("`{command}` failed")));
        }

        let mut next = (*self.state).clone();
        next.settings
            .insert(ScopedKey::global("status"), format!("ran {command}"));
        self.state = Arc::new(next);
        Ok(self.state.clone())
    }

    fn current_state(&self) -> Arc<FakeState> {
        self.state.clone()
    }
}

// -----------------------------------------------------------------------------
// Harness
// -----------------------------------------------------------------------------

struct Harness {
    requests: RequestQueue,
    server_state: Arc<ServerStateCell>,
}

fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        boot_poll_interval: Duration::from_millis(20),
        ..DispatcherConfig::default()
    }
}

fn start(engine: FakeEngine) -> Harness {
    start_with(engine, test_config())
}

fn start_with(engine: FakeEngine, config: DispatcherConfig) -> Harness {
    let Dispatcher {
        requests,
        reader,
        engine,
        work: _work,
        server_state,
    } = dispatcher(engine, config);

    tokio::spawn(reader.run());
    tokio::task::spawn_blocking(move || engine.run());

    Harness {
        requests,
        server_state,
    }
}

fn connect(id: u64) -> (ClientHandle, OutboundRx) {
    ClientHandle::channel(ClientId(id))
}

fn submit(requests: &RequestQueue, client: &ClientHandle, serial: u64, request: Request) {
    requests
        .submit(ServerRequest {
            client: client.clone(),
            serial,
            request,
        })
        .expect("request queue rejected a test request");
}

async fn next_message(rx: &mut OutboundRx) -> ServerMessage {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("client channel closed")
}

/// Wait for the acknowledgement of the execution submitted with `serial`,
/// skipping unrelated traffic.
async fn execution_ack(rx: &mut OutboundRx, serial: u64) -> u64 {
    loop {
        if let ServerMessage::Reply {
            serial: s,
            response: Response::ExecutionRequestReceived { id },
        } = next_message(rx).await
        {
            if s == serial {
                return id;
            }
        }
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

// -----------------------------------------------------------------------------
// Scenarios
// -----------------------------------------------------------------------------

#[tokio::test]
async fn requests_before_boot_are_deferred_until_the_build_is_up() {
    let (engine, gate) = FakeEngine::gated(FakeState::standard());
    let h = start(engine);
    let (c1, mut rx1) = connect(1);

    submit(
        &h.requests,
        &c1,
        1,
        Request::KeyLookup {
            text: "compile".to_string(),
        },
    );
    submit(&h.requests, &c1, 2, Request::ListenToEvents);

    // Nothing is answered while the build is still loading.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx1.try_recv().is_err());

    gate.send(()).unwrap();

    // `NowListening` first, then the replayed lookup.
    let mut messages = Vec::new();
    loop {
        let message = next_message(&mut rx1).await;
        let lookup_answered = matches!(
            &message,
            ServerMessage::Reply {
                response: Response::KeyLookup { .. },
                ..
            }
        );
        messages.push(message);
        if lookup_answered {
            break;
        }
    }

    let listening = messages
        .iter()
        .position(|m| {
            matches!(
                m,
                ServerMessage::Event {
                    event: Event::NowListening
                }
            )
        })
        .expect("no NowListening");
    let lookup = messages.len() - 1;
    assert!(listening < lookup);

    match &messages[lookup] {
        ServerMessage::Reply {
            serial,
            response: Response::KeyLookup { text, keys },
        } => {
            assert_eq!(*serial, 1);
            assert_eq!(text, "compile");
            assert_eq!(keys, &vec![ScopedKey::global("compile")]);
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn executions_submitted_before_boot_run_after_load() {
    let (engine, gate) = FakeEngine::gated(FakeState::standard());
    let h = start(engine);
    let (c1, mut rx1) = connect(1);

    submit(
        &h.requests,
        &c1,
        1,
        Request::Execution {
            command: "compile".to_string(),
        },
    );

    // Queued but unacknowledged: the engine has not taken it yet.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx1.try_recv().is_err());

    gate.send(()).unwrap();
    assert_eq!(execution_ack(&mut rx1, 1).await, 1);
}

#[tokio::test]
async fn duplicate_executions_share_one_work_item_end_to_end() {
    let h = start(FakeEngine::new(FakeState::standard()));
    let (c1, mut rx1) = connect(1);
    let (c2, mut rx2) = connect(2);
    let (c3, mut rx3) = connect(3);

    // Keep the engine busy so the duplicates pile up behind it.
    submit(
        &h.requests,
        &c1,
        1,
        Request::Execution {
            command: "hang".to_string(),
        },
    );
    let hang_id = execution_ack(&mut rx1, 1).await;

    submit(
        &h.requests,
        &c2,
        1,
        Request::Execution {
            command: "test".to_string(),
        },
    );
    submit(
        &h.requests,
        &c3,
        1,
        Request::Execution {
            command: "test".to_string(),
        },
    );
    submit(&h.requests, &c1, 2, Request::Cancel { id: hang_id });

    let id2 = execution_ack(&mut rx2, 1).await;
    let id3 = execution_ack(&mut rx3, 1).await;
    assert_eq!(id2, id3);
    assert!(id2 > hang_id);
}

#[tokio::test]
async fn cancel_interrupts_the_running_command() {
    let h = start(FakeEngine::new(FakeState::standard()));
    let (c1, mut rx1) = connect(1);

    submit(&h.requests, &c1, 1, Request::ListenToEvents);
    loop {
        if matches!(
            next_message(&mut rx1).await,
            ServerMessage::Event {
                event: Event::NowListening
            }
        ) {
            break;
        }
    }

    submit(
        &h.requests,
        &c1,
        2,
        Request::Execution {
            command: "hang".to_string(),
        },
    );
    let id = execution_ack(&mut rx1, 2).await;
    submit(&h.requests, &c1, 3, Request::Cancel { id });

    loop {
        if let ServerMessage::Event {
            event: Event::ExecutionFailure { id: failed },
        } = next_message(&mut rx1).await
        {
            assert_eq!(failed, id);
            break;
        }
    }
}

#[tokio::test]
async fn client_closed_removes_every_subscription() {
    let h = start(FakeEngine::new(FakeState::standard()));
    let (c1, mut rx1) = connect(1);

    submit(&h.requests, &c1, 1, Request::ListenToEvents);
    submit(&h.requests, &c1, 2, Request::ListenToBuildChange);
    submit(
        &h.requests,
        &c1,
        3,
        Request::ListenToValue {
            key: ScopedKey::global("name"),
        },
    );

    // The subscribe-time value event marks all three as processed.
    loop {
        if matches!(
            next_message(&mut rx1).await,
            ServerMessage::Event {
                event: Event::ValueChange { .. }
            }
        ) {
            break;
        }
    }
    assert!(!h.server_state.snapshot().is_disconnected(&c1));

    submit(&h.requests, &c1, 4, Request::ClientClosed);
    let server_state = h.server_state.clone();
    let c1_probe = c1.clone();
    wait_for(move || server_state.snapshot().is_disconnected(&c1_probe)).await;
}

#[tokio::test]
async fn task_valued_listen_subscribes_and_queues_execution() {
    let server_state = Arc::new(ServerStateCell::new());
    let build_state = Arc::new(BuildStateCell::new());
    build_state.publish(Arc::new(FakeState::standard()));

    let (requests, request_rx) = request_queue(64);
    let (work, mut source) = work_queue(10, server_state.clone());
    let reader = Reader::new(
        request_rx,
        server_state.clone(),
        build_state,
        work.clone(),
        LastCommandCell::new(),
        test_config(),
    );
    let reader_task = tokio::spawn(reader.run());

    let (c1, mut rx1) = connect(1);
    submit(
        &requests,
        &c1,
        7,
        Request::ListenToValue {
            key: ScopedKey::global("compile"),
        },
    );

    // The engine's next take sees a synthetic execution with a fresh id.
    let (_, taken) = tokio::task::spawn_blocking(move || source.take_next_work())
        .await
        .unwrap();
    let Work::CommandExecution(execution) = taken else {
        panic!("expected a command execution");
    };
    assert_eq!(execution.id, 1);
    assert_eq!(execution.command, "compile");
    assert!(execution.requesters.contains(&c1));

    // Acknowledged against the ListenToValue serial, and subscribed.
    match next_message(&mut rx1).await {
        ServerMessage::Reply {
            serial: 7,
            response: Response::ExecutionRequestReceived { id: 1 },
        } => {}
        other => panic!("unexpected message: {other:?}"),
    }
    assert!(!server_state.snapshot().is_disconnected(&c1));

    drop(requests);
    reader_task.await.unwrap();
}

#[tokio::test]
async fn unknown_key_gets_key_not_found() {
    let h = start(FakeEngine::new(FakeState::standard()));
    let (c1, mut rx1) = connect(1);

    let key = ScopedKey::global("no-such-key");
    submit(
        &h.requests,
        &c1,
        1,
        Request::ListenToValue { key: key.clone() },
    );

    match next_message(&mut rx1).await {
        ServerMessage::Reply {
            serial: 1,
            response: Response::KeyNotFound { key: reported },
        } => assert_eq!(reported, key),
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn handler_failure_is_replied_and_the_reader_survives() {
    let mut state = FakeState::standard();
    state.fail_lookups = true;
    let h = start(FakeEngine::new(state));
    let (c1, mut rx1) = connect(1);
    let (c2, mut rx2) = connect(2);

    submit(
        &h.requests,
        &c1,
        1,
        Request::KeyLookup {
            text: "compile".to_string(),
        },
    );
    match next_message(&mut rx1).await {
        ServerMessage::Reply {
            serial: 1,
            response: Response::Error { message },
        } => assert!(message.contains("offline")),
        other => panic!("unexpected message: {other:?}"),
    }

    // The reader still serves this client and others.
    submit(&h.requests, &c1, 2, Request::ListenToEvents);
    assert!(matches!(
        next_message(&mut rx1).await,
        ServerMessage::Event {
            event: Event::NowListening
        }
    ));

    submit(
        &h.requests,
        &c2,
        1,
        Request::CommandCompletions {
            id: 9,
            line: "co".to_string(),
            level: 1,
        },
    );
    match next_message(&mut rx2).await {
        ServerMessage::Reply {
            serial: 1,
            response: Response::Completions { id, completions },
        } => {
            assert_eq!(id, 9);
            assert!(completions.contains(&"compile".to_string()));
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn key_listeners_hear_value_changes_after_commands() {
    let h = start(FakeEngine::new(FakeState::standard()));
    let (c1, mut rx1) = connect(1);

    submit(
        &h.requests,
        &c1,
        1,
        Request::ListenToValue {
            key: ScopedKey::global("status"),
        },
    );
    match next_message(&mut rx1).await {
        ServerMessage::Event {
            event: Event::ValueChange { value, .. },
        } => assert_eq!(value, "idle"),
        other => panic!("unexpected message: {other:?}"),
    }

    submit(
        &h.requests,
        &c1,
        2,
        Request::Execution {
            command: "compile".to_string(),
        },
    );
    let _ = execution_ack(&mut rx1, 2).await;

    loop {
        if let ServerMessage::Event {
            event: Event::ValueChange { value, .. },
        } = next_message(&mut rx1).await
        {
            assert_eq!(value, "ran compile");
            break;
        }
    }
}

#[tokio::test]
async fn deferred_buffer_overflow_is_rejected() {
    let (engine, gate) = FakeEngine::gated(FakeState::standard());
    let config = DispatcherConfig {
        deferred_startup_capacity: 2,
        ..test_config()
    };
    let h = start_with(engine, config);
    let (c1, mut rx1) = connect(1);

    for serial in 1..=3 {
        submit(
            &h.requests,
            &c1,
            serial,
            Request::KeyLookup {
                text: "compile".to_string(),
            },
        );
    }

    // The first two are parked; the third bounces immediately.
    match next_message(&mut rx1).await {
        ServerMessage::Reply {
            serial: 3,
            response: Response::QueueFull,
        } => {}
        other => panic!("unexpected message: {other:?}"),
    }

    gate.send(()).unwrap();
}
