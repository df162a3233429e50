//! Session lifecycle: initialization ordering, stop/continue, teardown.

mod support;

use dapmux::{Debugger, Error, SessionState, ThreadExecState};
use serde_json::json;
use support::*;

#[tokio::test(start_paused = true)]
async fn test_launch_reaches_running() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.simple_program("script.js", 3);
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);

        let session = debugger.start(launch_config("fake")).await.unwrap();
        assert_eq!(session.state().get(), SessionState::Running);

        let commands: Vec<String> = fake.requests().into_iter().map(|(name, _)| name).collect();
        let initialize = commands.iter().position(|c| c == "initialize").unwrap();
        let launch = commands.iter().position(|c| c == "launch").unwrap();
        let configuration_done = commands
            .iter()
            .position(|c| c == "configurationDone")
            .unwrap();
        assert!(initialize < launch);
        assert!(initialize < configuration_done);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_initialized_event_after_launch_request() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.initialized_after_launch(true);
        fake.simple_program("script.js", 3);
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);

        let session = debugger.start(launch_config("fake")).await.unwrap();
        assert_eq!(session.state().get(), SessionState::Running);
        assert_eq!(fake.request_count("configurationDone"), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_single_stop_continue_cycle() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.simple_program("script.js", 3);
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let source = debugger.source_for_path("script.js");
        debugger.add_breakpoint(&source, 3, Default::default());

        let session = debugger.start(launch_config("fake")).await.unwrap();
        let hit_ids = fake.last_breakpoint_ids();
        assert_eq!(hit_ids, vec![17]);

        fake.emit_stopped_on_breakpoint(1, hit_ids);
        settle().await;

        assert_eq!(session.state().get(), SessionState::Stopped);
        let binding = session.bindings().iter()[0].as_binding().unwrap();
        assert!(binding.hit().get());
        assert!(binding.verified().get());

        let thread = session.threads().iter()[0].as_thread().unwrap();
        assert_eq!(thread.state().get(), ThreadExecState::Stopped);
        assert_eq!(thread.stop_reason().get().as_deref(), Some("breakpoint"));

        let stack = thread.stack().await.unwrap();
        let frames = stack.frames().iter();
        assert!(!frames.is_empty());
        let frame = frames[0].as_frame().unwrap();
        assert_eq!(frame.line(), 3);
        assert_eq!(frame.location().as_deref(), Some("script.js:3"));

        let scopes = frame.scopes().await.unwrap();
        assert!(scopes.iter().any(|scope| scope.name() == "Local"));

        session.continue_thread(1).await.unwrap();
        assert!(!binding.hit().get());
        assert!(binding.active_frame().get().is_none());
        assert!(!stack.is_current().get());
        assert_eq!(session.state().get(), SessionState::Running);
        assert_eq!(thread.state().get(), ThreadExecState::Running);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_continued_event_clears_stop_state() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.simple_program("script.js", 3);
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();

        fake.emit_stopped_on_breakpoint(1, vec![]);
        settle().await;
        assert_eq!(session.state().get(), SessionState::Stopped);

        fake.emit_continued(1, true);
        settle().await;
        assert_eq!(session.state().get(), SessionState::Running);
        let thread = session.threads().iter()[0].as_thread().unwrap();
        assert_eq!(thread.state().get(), ThreadExecState::Running);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_thread_events_create_and_dispose() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.program(|program| {
            program.threads = vec![(1, "main".to_string()), (2, "worker".to_string())];
        });
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();

        fake.emit_thread_started(2);
        settle().await;
        assert_eq!(session.threads().count(), 1);
        let thread = session.threads().iter()[0].as_thread().unwrap();
        assert_eq!(thread.id(), 2);
        // Background name refresh picked up the adapter-assigned name.
        wait_until(|| thread.name().get() == "worker").await;

        fake.emit("thread", json!({"reason": "exited", "threadId": 2}));
        settle().await;
        assert_eq!(session.threads().count(), 0);
        assert!(debugger.query(thread.uri().as_str()).unwrap().is_none());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_output_events_append_in_order() {
    run_local(async {
        let fake = FakeAdapter::new();
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();

        fake.emit("output", json!({"category": "stdout", "output": "one\n"}));
        fake.emit("output", json!({"category": "stderr", "output": "two\n"}));
        settle().await;

        let outputs = session.outputs().iter();
        assert_eq!(outputs.len(), 2);
        let first = outputs[0].as_output().unwrap();
        let second = outputs[1].as_output().unwrap();
        assert_eq!(first.index(), 1);
        assert_eq!(first.output(), "one\n");
        assert_eq!(second.index(), 2);
        assert_eq!(second.category(), "stderr");
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_process_event_captures_start_method() {
    run_local(async {
        let fake = FakeAdapter::new();
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();

        fake.emit(
            "process",
            json!({
                "name": "node",
                "systemProcessId": 12345,
                "startMethod": "attachForSuspendedLaunch",
            }),
        );
        settle().await;

        assert_eq!(session.process_id(), Some(12345));
        assert!(session.is_auto_attached());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_terminated_event_disposes_session_graph() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.simple_program("script.js", 3);
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let source = debugger.source_for_path("script.js");
        debugger.add_breakpoint(&source, 3, Default::default());
        let session = debugger.start(launch_config("fake")).await.unwrap();

        fake.emit_stopped_on_breakpoint(1, fake.last_breakpoint_ids());
        settle().await;
        let thread = session.threads().iter()[0].as_thread().unwrap();
        let stack = thread.stack().await.unwrap();

        fake.emit("exited", json!({"exitCode": 3}));
        fake.emit_terminated();
        settle().await;

        assert_eq!(session.state().get(), SessionState::Terminated);
        assert_eq!(session.exit_code(), Some(3));
        assert!(debugger.query(session.uri().as_str()).unwrap().is_none());
        assert!(debugger.query(thread.uri().as_str()).unwrap().is_none());
        assert!(debugger.query(stack.uri().as_str()).unwrap().is_none());
        assert!(debugger.sessions().is_empty());
        // Global entities survive session teardown.
        assert_eq!(debugger.breakpoints().count(), 1);
        assert_eq!(debugger.sources().count(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_launch_refusal_fails_start() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.fail_command("launch", "no such file");
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);

        let result = debugger.start(launch_config("fake")).await;
        match result {
            Err(Error::Adapter { command, message }) => {
                assert_eq!(command, "launch");
                assert_eq!(message, "no such file");
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.id().to_string())),
        }
        assert!(debugger.sessions().is_empty());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_adapter_type_is_refused() {
    run_local(async {
        let debugger = Debugger::new(vec![]);
        let result = debugger.start(launch_config("node")).await;
        assert!(matches!(result, Err(Error::UnknownAdapterType(t)) if t == "node"));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_evaluate_without_frame() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.program(|program| {
            program
                .evaluations
                .insert("1+1".to_string(), ("2".to_string(), 0));
        });
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();

        let result = session.evaluate("1+1", "repl").await.unwrap();
        assert_eq!(result.result().get(), "2");
        assert_eq!(session.evaluations().count(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_completions_capability_gate() {
    run_local(async {
        let fake = FakeAdapter::new()
            .with_capabilities(|caps| caps.supports_completions_request = Some(false));
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();

        let result = session.completions("x", 2, None, None).await;
        assert!(matches!(result, Err(Error::UnsupportedCapability("completions"))));
        assert_eq!(fake.request_count("completions"), 0);
    })
    .await;
}
