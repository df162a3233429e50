//! Stack fetching, expiration cascades and variable access.

mod support;

use dapmux::{Debugger, Error, Session};
use support::*;

async fn stopped_session() -> (Debugger, Session, FakeAdapter) {
    let fake = FakeAdapter::new();
    fake.simple_program("script.js", 3);
    fake.program(|program| {
        program
            .evaluations
            .insert("x+1".to_string(), ("2".to_string(), 0));
    });
    let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
    let source = debugger.source_for_path("script.js");
    debugger.add_breakpoint(&source, 3, Default::default());
    let session = debugger.start(launch_config("fake")).await.unwrap();
    fake.emit_stopped_on_breakpoint(1, fake.last_breakpoint_ids());
    settle().await;
    (debugger, session, fake)
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_stack_fetch_issues_one_request() {
    run_local(async {
        let (_debugger, session, fake) = stopped_session().await;
        let thread = session.threads().iter()[0].as_thread().unwrap();

        let (first, second) = tokio::join!(thread.stack(), thread.stack());
        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.uri(), second.uri());
        assert_eq!(fake.request_count("stackTrace"), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_variable_fetch_issues_one_request() {
    run_local(async {
        let (_debugger, session, fake) = stopped_session().await;
        let thread = session.threads().iter()[0].as_thread().unwrap();
        let stack = thread.stack().await.unwrap();
        let frame = stack.frames().iter()[0].as_frame().unwrap();
        let scope = frame.scopes().await.unwrap().remove(0);

        let (first, second) = tokio::join!(scope.variables(), scope.variables());
        assert_eq!(first.unwrap().len(), 2);
        // The second caller piggybacks on the flagged fetch and never issues
        // its own request; its snapshot may trail the in-flight response.
        second.unwrap();
        assert_eq!(fake.request_count("variables"), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_expiration_cascade_on_continue() {
    run_local(async {
        let (_debugger, session, _fake) = stopped_session().await;
        let thread = session.threads().iter()[0].as_thread().unwrap();
        let stack = thread.stack().await.unwrap();
        let frame = stack.frames().iter()[0].as_frame().unwrap();
        let scope = frame.scopes().await.unwrap().remove(0);
        let variables = scope.variables().await.unwrap();
        let evaluation = frame.evaluate("x+1", "repl").await.unwrap();
        assert_eq!(evaluation.result().get(), "2");

        session.continue_thread(1).await.unwrap();

        assert!(!stack.is_current().get());
        assert!(!frame.is_current().get());
        assert!(!scope.is_current().get());
        for variable in &variables {
            assert!(!variable.is_current().get());
        }
        assert!(!evaluation.is_current().get());

        // Stale adapter references are refused before touching the wire.
        let err = frame.evaluate("x+1", "repl").await.unwrap_err();
        assert!(matches!(err, Error::Expired(_)));
        let err = scope.variables().await.unwrap_err();
        assert!(matches!(err, Error::Expired(_)));
        let err = variables[0].set_value("5").await.unwrap_err();
        assert!(matches!(err, Error::Expired(_)));

        // The evaluation entity itself survives the frame.
        assert_eq!(session.evaluations().count(), 1);
        assert_eq!(evaluation.result().get(), "2");
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_new_stop_creates_new_stack() {
    run_local(async {
        let (_debugger, session, fake) = stopped_session().await;
        let thread = session.threads().iter()[0].as_thread().unwrap();
        let first = thread.stack().await.unwrap();
        assert_eq!(first.index().get(), 0);

        session.continue_thread(1).await.unwrap();
        fake.emit_stopped_on_breakpoint(1, fake.last_breakpoint_ids());
        settle().await;

        let second = thread.stack().await.unwrap();
        assert_ne!(first.uri(), second.uri());
        assert!(second.sequence() > first.sequence());
        assert!(second.is_current().get());
        assert!(!first.is_current().get());

        // Newest first in the history view, reactive indexes follow.
        let stacks = thread.stacks().iter();
        assert_eq!(stacks[0].uri(), second.uri());
        assert_eq!(stacks[1].uri(), first.uri());
        assert_eq!(second.index().get(), 0);
        assert_eq!(first.index().get(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_stack_refused_while_running() {
    run_local(async {
        let (_debugger, session, _fake) = stopped_session().await;
        let thread = session.threads().iter()[0].as_thread().unwrap();
        session.continue_thread(1).await.unwrap();

        let err = thread.stack().await.unwrap_err();
        assert!(matches!(err, Error::NotStopped(1)));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_set_value_updates_signals_and_children() {
    run_local(async {
        let (_debugger, session, fake) = stopped_session().await;
        let thread = session.threads().iter()[0].as_thread().unwrap();
        let stack = thread.stack().await.unwrap();
        let frame = stack.frames().iter()[0].as_frame().unwrap();
        let scope = frame.scopes().await.unwrap().remove(0);
        let variables = scope.variables().await.unwrap();
        let x = variables
            .iter()
            .find(|variable| variable.name() == "x")
            .unwrap();
        assert_eq!(x.value().get(), "1");

        x.set_value("5").await.unwrap();
        assert_eq!(x.value().get(), "5");
        assert_eq!(fake.request_count("setVariable"), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_structured_variable_children() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.program(|program| {
            program.threads = vec![(1, "main".to_string())];
            program
                .frames
                .insert(1, vec![FakeFrame::at_path(100, "main", "script.js", 3)]);
            program.scopes.insert(100, vec![("Local".to_string(), 1001)]);
            program.variables.insert(
                1001,
                vec![FakeVar {
                    name: "point".to_string(),
                    value: "Point".to_string(),
                    ty: Some("Point".to_string()),
                    variables_reference: 2001,
                    evaluate_name: Some("point".to_string()),
                }],
            );
            program.variables.insert(
                2001,
                vec![FakeVar::scalar("x", "4"), FakeVar::scalar("y", "8")],
            );
        });
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();
        fake.emit_stopped_on_breakpoint(1, vec![]);
        settle().await;

        let thread = session.threads().iter()[0].as_thread().unwrap();
        let stack = thread.stack().await.unwrap();
        let frame = stack.frames().iter()[0].as_frame().unwrap();
        let scope = frame.scopes().await.unwrap().remove(0);
        let point = scope.variables().await.unwrap().remove(0);

        let children = point.children().await.unwrap();
        assert_eq!(children.len(), 2);
        // Dotted variable paths under the scope URI.
        assert!(children[0]
            .uri()
            .as_str()
            .ends_with("/scope:Local/var:point.x"));

        let leaves = children[0].children().await.unwrap();
        assert!(leaves.is_empty());
        // A leaf fetch never hits the adapter.
        assert_eq!(fake.request_count("variables"), 2);
    })
    .await;
}
