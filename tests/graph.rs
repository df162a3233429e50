//! Entity graph behavior through the embedding API: URIs, views, disposal.

mod support;

use dapmux::{Debugger, EntityKind};
use std::cell::RefCell;
use std::rc::Rc;
use support::*;

#[tokio::test(start_paused = true)]
async fn test_query_validates_uri_grammar() {
    run_local(async {
        let fake = FakeAdapter::new();
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();

        assert!(debugger.query("not-a-uri").is_err());
        assert!(debugger.query("dap:").is_err());
        assert!(debugger
            .query("dap:session:zzzzzzzzzzzzzzzz")
            .unwrap()
            .is_none());

        let found = debugger.query(session.uri().as_str()).unwrap().unwrap();
        assert_eq!(found.kind(), EntityKind::Session);
        assert_eq!(found.uri(), session.uri());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_entity_uris_follow_the_segment_grammar() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.simple_program("script.js", 3);
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();
        fake.emit_stopped_on_breakpoint(1, vec![]);
        settle().await;

        let thread = session.threads().iter()[0].as_thread().unwrap();
        let stack = thread.stack().await.unwrap();
        let frame = stack.frames().iter()[0].as_frame().unwrap();
        let scope = frame.scopes().await.unwrap().remove(0);
        let variable = scope.variables().await.unwrap().remove(0);

        let expected = format!(
            "dap:session:{}/thread:1/stack:1/frame:100/scope:Local/var:x",
            session.id()
        );
        assert_eq!(variable.uri().as_str(), expected);
        // Round-trips through query.
        let found = debugger.query(&expected).unwrap().unwrap();
        assert_eq!(found.kind(), EntityKind::Variable);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_view_each_sees_current_then_future() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.program(|program| {
            program.threads = vec![(1, "main".to_string()), (2, "worker".to_string())];
        });
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();

        fake.emit_thread_started(1);
        settle().await;

        let seen: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let subscription = session.on_thread(move |thread| sink.borrow_mut().push(thread.id()));
        assert_eq!(*seen.borrow(), vec![1]);

        fake.emit_thread_started(2);
        settle().await;
        assert_eq!(*seen.borrow(), vec![1, 2]);

        subscription.cancel();
        fake.emit("thread", serde_json::json!({"reason": "started", "threadId": 3}));
        settle().await;
        assert_eq!(*seen.borrow(), vec![1, 2]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_where_filter_tracks_field_updates() {
    run_local(async {
        let fake = FakeAdapter::new();
        fake.simple_program("script.js", 3);
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let session = debugger.start(launch_config("fake")).await.unwrap();
        fake.emit_stopped_on_breakpoint(1, vec![]);
        settle().await;
        let thread = session.threads().iter()[0].as_thread().unwrap();
        let stack = thread.stack().await.unwrap();

        let current = debugger
            .view(EntityKind::Stack)
            .where_eq("is_current", true);
        assert_eq!(current.count(), 1);

        session.continue_thread(1).await.unwrap();
        assert_eq!(current.count(), 0);
        assert!(!stack.is_current().get());
        // The stack itself is history, not disposed.
        assert!(debugger.query(stack.uri().as_str()).unwrap().is_some());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_session_dispose_reaches_every_descendant() {
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
        let frame = stack.frames().iter()[0].as_frame().unwrap();
        let scope = frame.scopes().await.unwrap().remove(0);
        let variable = scope.variables().await.unwrap().remove(0);
        let binding = session.bindings().iter()[0].as_binding().unwrap();

        session.dispose();

        for uri in [
            session.uri(),
            thread.uri(),
            stack.uri(),
            frame.uri(),
            scope.uri(),
            variable.uri(),
            binding.uri(),
        ] {
            assert!(
                debugger.query(uri.as_str()).unwrap().is_none(),
                "{uri} survived disposal"
            );
        }
        // Globals are untouched.
        assert_eq!(debugger.breakpoints().count(), 1);
        assert_eq!(debugger.sources().count(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_debugger_dispose_clears_the_store() {
    run_local(async {
        let fake = FakeAdapter::new();
        let debugger = Debugger::new(vec![fake.clone().into_adapter()]);
        let source = debugger.source_for_path("script.js");
        debugger.add_breakpoint(&source, 3, Default::default());
        let session = debugger.start(launch_config("fake")).await.unwrap();

        debugger.dispose();

        assert!(debugger.sessions().is_empty());
        assert_eq!(debugger.breakpoints().count(), 0);
        assert_eq!(debugger.sources().count(), 0);
        assert!(debugger.query(session.uri().as_str()).unwrap().is_none());
    })
    .await;
}
