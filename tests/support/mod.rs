//! In-memory fake adapter for driving the runtime end to end.
//!
//! The fake plays the adapter role over a channel transport: it answers every
//! request from a scripted program model and lets tests inject events
//! (stopped, loadedSource, reverse requests) at will.

// Each integration test binary compiles this module and uses its own slice.
#![allow(dead_code)]

use async_trait::async_trait;
use dapmux::proto::types::{Capabilities, ExceptionBreakpointsFilter};
use dapmux::proto::{ProtocolMessage, RequestEnvelope, ResponseEnvelope};
use dapmux::proto::requests::{RunInTerminalArguments, RunInTerminalResponse};
use dapmux::session::{StartConfig, StartRequest};
use dapmux::transport::RawClient;
use dapmux::Adapter;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use tokio::sync::mpsc;

pub async fn run_local<F: Future>(f: F) -> F::Output {
    let _ = env_logger::builder().is_test(true).try_init();
    tokio::task::LocalSet::new().run_until(f).await
}

/// Let every spawned task and auto-advanced timer settle.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
}

/// Step virtual time in 10ms increments until the condition holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not met within virtual two seconds");
}

pub fn launch_config(adapter_type: &str) -> StartConfig {
    StartConfig {
        adapter_type: adapter_type.to_string(),
        request: StartRequest::Launch,
        name: None,
        payload: json!({"program": "script.js"}),
    }
}

#[derive(Debug, Clone)]
pub struct FakeFrame {
    pub id: i64,
    pub name: String,
    pub path: Option<String>,
    pub source_reference: Option<i64>,
    pub source_name: Option<String>,
    pub line: i64,
}

impl FakeFrame {
    pub fn at_path(id: i64, name: &str, path: &str, line: i64) -> FakeFrame {
        FakeFrame {
            id,
            name: name.to_string(),
            path: Some(path.to_string()),
            source_reference: None,
            source_name: None,
            line,
        }
    }

    fn descriptor(&self) -> Value {
        let mut source = serde_json::Map::new();
        if let Some(path) = &self.path {
            source.insert("path".to_string(), json!(path));
        }
        if let Some(name) = &self.source_name {
            source.insert("name".to_string(), json!(name));
        }
        if let Some(reference) = self.source_reference {
            source.insert("sourceReference".to_string(), json!(reference));
        }
        json!(source)
    }
}

#[derive(Debug, Clone)]
pub struct FakeVar {
    pub name: String,
    pub value: String,
    pub ty: Option<String>,
    pub variables_reference: i64,
    pub evaluate_name: Option<String>,
}

impl FakeVar {
    pub fn scalar(name: &str, value: &str) -> FakeVar {
        FakeVar {
            name: name.to_string(),
            value: value.to_string(),
            ty: None,
            variables_reference: 0,
            evaluate_name: None,
        }
    }
}

#[derive(Default)]
pub struct FakeProgram {
    pub threads: Vec<(i64, String)>,
    pub frames: HashMap<i64, Vec<FakeFrame>>,
    pub scopes: HashMap<i64, Vec<(String, i64)>>,
    pub variables: HashMap<i64, Vec<FakeVar>>,
    pub evaluations: HashMap<String, (String, i64)>,
    pub source_contents: HashMap<i64, String>,
    pub loaded_sources: Vec<Value>,
}

struct Connection {
    outbound: mpsc::UnboundedSender<ProtocolMessage>,
    next_seq: Cell<i64>,
}

impl Connection {
    fn alloc_seq(&self) -> i64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }

    fn emit(&self, event: &str, body: Value) {
        let _ = self
            .outbound
            .send(ProtocolMessage::event(self.alloc_seq(), event, body));
    }

    fn respond(&self, request: &RequestEnvelope, result: Result<Option<Value>, String>) {
        let _ = self.outbound.send(ProtocolMessage::response(
            self.alloc_seq(),
            request.seq,
            request.command.clone(),
            result,
        ));
    }

    fn send_request(&self, command: &str, arguments: Value) -> i64 {
        let seq = self.alloc_seq();
        let _ = self
            .outbound
            .send(ProtocolMessage::request(seq, command, arguments));
        seq
    }
}

pub struct FakeState {
    capabilities: RefCell<Capabilities>,
    /// Emit `initialized` only once the launch/attach request has arrived
    /// (the protocol permits both orderings).
    initialized_after_launch: Cell<bool>,
    line_adjust: RefCell<HashMap<i64, i64>>,
    fail_commands: RefCell<HashMap<String, String>>,
    omit_hit_ids: Cell<bool>,
    requests: RefCell<Vec<(String, Value)>>,
    responses: RefCell<Vec<ResponseEnvelope>>,
    breakpoint_seq: Cell<i64>,
    last_breakpoint_ids: RefCell<Vec<i64>>,
    program: RefCell<FakeProgram>,
    run_in_terminal_calls: RefCell<Vec<RunInTerminalArguments>>,
    connections: RefCell<Vec<Rc<Connection>>>,
}

#[derive(Clone)]
pub struct FakeAdapter {
    state: Rc<FakeState>,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAdapter {
    pub fn new() -> FakeAdapter {
        let capabilities = Capabilities {
            supports_configuration_done_request: Some(true),
            supports_set_variable: Some(true),
            supports_completions_request: Some(true),
            ..Default::default()
        };
        FakeAdapter {
            state: Rc::new(FakeState {
                capabilities: RefCell::new(capabilities),
                initialized_after_launch: Cell::new(false),
                line_adjust: RefCell::new(HashMap::new()),
                fail_commands: RefCell::new(HashMap::new()),
                omit_hit_ids: Cell::new(false),
                requests: RefCell::new(Vec::new()),
                responses: RefCell::new(Vec::new()),
                breakpoint_seq: Cell::new(16),
                last_breakpoint_ids: RefCell::new(Vec::new()),
                program: RefCell::new(FakeProgram::default()),
                run_in_terminal_calls: RefCell::new(Vec::new()),
                connections: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn into_adapter(self) -> Rc<dyn Adapter> {
        Rc::new(self)
    }

    // ----------------------------- scripting ----------------------------

    pub fn with_capabilities(self, f: impl FnOnce(&mut Capabilities)) -> Self {
        f(&mut self.state.capabilities.borrow_mut());
        self
    }

    pub fn set_capabilities(&self, f: impl FnOnce(&mut Capabilities)) {
        f(&mut self.state.capabilities.borrow_mut());
    }

    pub fn declare_exception_filter(&self, id: &str, label: &str, default: bool) {
        let mut capabilities = self.state.capabilities.borrow_mut();
        capabilities
            .exception_breakpoint_filters
            .get_or_insert_with(Vec::new)
            .push(ExceptionBreakpointsFilter {
                filter: id.to_string(),
                label: label.to_string(),
                description: None,
                enabled_by_default: Some(default),
                supports_condition: None,
            });
    }

    pub fn initialized_after_launch(&self, value: bool) {
        self.state.initialized_after_launch.set(value);
    }

    /// Rewrite requested breakpoint lines, e.g. blank line 7 -> line 9.
    pub fn adjust_line(&self, from: i64, to: i64) {
        self.state.line_adjust.borrow_mut().insert(from, to);
    }

    pub fn fail_command(&self, command: &str, message: &str) {
        self.state
            .fail_commands
            .borrow_mut()
            .insert(command.to_string(), message.to_string());
    }

    pub fn omit_hit_ids(&self, value: bool) {
        self.state.omit_hit_ids.set(value);
    }

    pub fn program(&self, f: impl FnOnce(&mut FakeProgram)) {
        f(&mut self.state.program.borrow_mut());
    }

    /// One stopped thread with a single frame and a Local scope, the common
    /// scenario fixture.
    pub fn simple_program(&self, path: &str, line: i64) {
        self.program(|program| {
            program.threads = vec![(1, "main".to_string())];
            program
                .frames
                .insert(1, vec![FakeFrame::at_path(100, "main", path, line)]);
            program.scopes.insert(100, vec![("Local".to_string(), 1001)]);
            program.variables.insert(
                1001,
                vec![FakeVar::scalar("x", "1"), FakeVar::scalar("y", "2")],
            );
        });
    }

    // ----------------------------- inspection ---------------------------

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.state.requests.borrow().clone()
    }

    pub fn requests_named(&self, command: &str) -> Vec<Value> {
        self.state
            .requests
            .borrow()
            .iter()
            .filter(|(name, _)| name == command)
            .map(|(_, arguments)| arguments.clone())
            .collect()
    }

    pub fn request_count(&self, command: &str) -> usize {
        self.requests_named(command).len()
    }

    pub fn last_breakpoint_ids(&self) -> Vec<i64> {
        self.state.last_breakpoint_ids.borrow().clone()
    }

    pub fn reverse_responses(&self) -> Vec<ResponseEnvelope> {
        self.state.responses.borrow().clone()
    }

    pub fn run_in_terminal_calls(&self) -> usize {
        self.state.run_in_terminal_calls.borrow().len()
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.borrow().len()
    }

    // ------------------------------- events -----------------------------

    fn latest(&self) -> Rc<Connection> {
        self.state
            .connections
            .borrow()
            .last()
            .cloned()
            .expect("no adapter connection yet")
    }

    fn nth(&self, index: usize) -> Rc<Connection> {
        self.state.connections.borrow()[index].clone()
    }

    pub fn emit(&self, event: &str, body: Value) {
        self.latest().emit(event, body);
    }

    pub fn emit_on(&self, connection: usize, event: &str, body: Value) {
        self.nth(connection).emit(event, body);
    }

    pub fn emit_thread_started(&self, thread_id: i64) {
        self.emit("thread", json!({"reason": "started", "threadId": thread_id}));
    }

    pub fn emit_stopped_on_breakpoint(&self, thread_id: i64, hit_ids: Vec<i64>) {
        let mut body = json!({"reason": "breakpoint", "threadId": thread_id});
        if !self.state.omit_hit_ids.get() {
            body["hitBreakpointIds"] = json!(hit_ids);
        }
        self.emit("stopped", body);
    }

    pub fn emit_continued(&self, thread_id: i64, all: bool) {
        self.emit(
            "continued",
            json!({"threadId": thread_id, "allThreadsContinued": all}),
        );
    }

    pub fn emit_terminated(&self) {
        self.emit("terminated", Value::Null);
    }

    pub fn send_reverse_request(&self, command: &str, arguments: Value) -> i64 {
        self.latest().send_request(command, arguments)
    }

    // ------------------------------ the peer ----------------------------

    fn spawn_peer(&self, raw: RawClient) {
        let RawClient { mut recv, mut send } = raw;
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ProtocolMessage>();
        let connection = Rc::new(Connection {
            outbound: outbound_tx,
            next_seq: Cell::new(1),
        });
        self.state.connections.borrow_mut().push(connection.clone());

        // Writer: single owner of the send half.
        tokio::task::spawn_local(async move {
            while let Some(message) = outbound_rx.recv().await {
                if send.send(message).await.is_err() {
                    break;
                }
            }
        });

        let state = self.state.clone();
        tokio::task::spawn_local(async move {
            loop {
                let message = match recv.recv().await {
                    Ok(message) => message,
                    Err(_) => break,
                };
                match message {
                    ProtocolMessage::Request(request) => {
                        handle_request(&state, &connection, request);
                    }
                    ProtocolMessage::Response(response) => {
                        state.responses.borrow_mut().push(response);
                    }
                    ProtocolMessage::Event(_) => {}
                }
            }
        });
    }
}

fn handle_request(state: &Rc<FakeState>, connection: &Rc<Connection>, request: RequestEnvelope) {
    state
        .requests
        .borrow_mut()
        .push((request.command.clone(), request.arguments.clone()));

    if let Some(message) = state.fail_commands.borrow().get(&request.command) {
        connection.respond(&request, Err(message.clone()));
        return;
    }

    match request.command.as_str() {
        "initialize" => {
            let capabilities = state.capabilities.borrow().clone();
            connection.respond(&request, Ok(Some(serde_json::to_value(capabilities).unwrap())));
            if !state.initialized_after_launch.get() {
                connection.emit("initialized", Value::Null);
            }
        }
        "launch" | "attach" => {
            if state.initialized_after_launch.get() {
                connection.emit("initialized", Value::Null);
            }
            connection.respond(&request, Ok(None));
        }
        "setBreakpoints" => {
            let requested = request.arguments["breakpoints"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            let mut ids = Vec::new();
            let results: Vec<Value> = requested
                .iter()
                .map(|breakpoint| {
                    let line = breakpoint["line"].as_i64().unwrap_or(0);
                    let adjusted = state
                        .line_adjust
                        .borrow()
                        .get(&line)
                        .copied()
                        .unwrap_or(line);
                    let id = state.breakpoint_seq.get() + 1;
                    state.breakpoint_seq.set(id);
                    ids.push(id);
                    json!({"id": id, "verified": true, "line": adjusted})
                })
                .collect();
            *state.last_breakpoint_ids.borrow_mut() = ids;
            connection.respond(&request, Ok(Some(json!({"breakpoints": results}))));
        }
        "setExceptionBreakpoints" => {
            let filters = request.arguments["filters"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            let results: Vec<Value> = filters
                .iter()
                .enumerate()
                .map(|(position, _)| json!({"id": 9000 + position as i64, "verified": true}))
                .collect();
            connection.respond(&request, Ok(Some(json!({"breakpoints": results}))));
        }
        "configurationDone" => connection.respond(&request, Ok(None)),
        "threads" => {
            let threads: Vec<Value> = state
                .program
                .borrow()
                .threads
                .iter()
                .map(|(id, name)| json!({"id": id, "name": name}))
                .collect();
            connection.respond(&request, Ok(Some(json!({"threads": threads}))));
        }
        "stackTrace" => {
            let thread_id = request.arguments["threadId"].as_i64().unwrap_or(0);
            let frames: Vec<Value> = state
                .program
                .borrow()
                .frames
                .get(&thread_id)
                .map(|frames| {
                    frames
                        .iter()
                        .map(|frame| {
                            json!({
                                "id": frame.id,
                                "name": frame.name,
                                "line": frame.line,
                                "column": 1,
                                "source": frame.descriptor(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            connection.respond(
                &request,
                Ok(Some(json!({"stackFrames": frames, "totalFrames": frames.len()}))),
            );
        }
        "scopes" => {
            let frame_id = request.arguments["frameId"].as_i64().unwrap_or(0);
            let scopes: Vec<Value> = state
                .program
                .borrow()
                .scopes
                .get(&frame_id)
                .map(|scopes| {
                    scopes
                        .iter()
                        .map(|(name, reference)| {
                            json!({
                                "name": name,
                                "variablesReference": reference,
                                "expensive": false,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            connection.respond(&request, Ok(Some(json!({"scopes": scopes}))));
        }
        "variables" => {
            let reference = request.arguments["variablesReference"].as_i64().unwrap_or(0);
            let variables: Vec<Value> = state
                .program
                .borrow()
                .variables
                .get(&reference)
                .map(|variables| {
                    variables
                        .iter()
                        .map(|variable| {
                            let mut body = json!({
                                "name": variable.name,
                                "value": variable.value,
                                "variablesReference": variable.variables_reference,
                            });
                            if let Some(ty) = &variable.ty {
                                body["type"] = json!(ty);
                            }
                            if let Some(evaluate_name) = &variable.evaluate_name {
                                body["evaluateName"] = json!(evaluate_name);
                            }
                            body
                        })
                        .collect()
                })
                .unwrap_or_default();
            connection.respond(&request, Ok(Some(json!({"variables": variables}))));
        }
        "setVariable" => {
            let value = request.arguments["value"].as_str().unwrap_or("").to_string();
            connection.respond(&request, Ok(Some(json!({"value": value}))));
        }
        "setExpression" => {
            let value = request.arguments["value"].as_str().unwrap_or("").to_string();
            connection.respond(&request, Ok(Some(json!({"value": value}))));
        }
        "evaluate" => {
            let expression = request.arguments["expression"].as_str().unwrap_or("");
            let program = state.program.borrow();
            let (result, reference) = program
                .evaluations
                .get(expression)
                .cloned()
                .unwrap_or_else(|| (format!("<{expression}>"), 0));
            drop(program);
            connection.respond(
                &request,
                Ok(Some(json!({"result": result, "variablesReference": reference}))),
            );
        }
        "completions" => {
            connection.respond(
                &request,
                Ok(Some(json!({"targets": [{"label": "xyz"}]}))),
            );
        }
        "source" => {
            let reference = request.arguments["sourceReference"].as_i64().unwrap_or(0);
            let content = state
                .program
                .borrow()
                .source_contents
                .get(&reference)
                .cloned()
                .unwrap_or_default();
            connection.respond(&request, Ok(Some(json!({"content": content}))));
        }
        "loadedSources" => {
            let sources = state.program.borrow().loaded_sources.clone();
            connection.respond(&request, Ok(Some(json!({"sources": sources}))));
        }
        "breakpointLocations" => {
            let line = request.arguments["line"].as_i64().unwrap_or(0);
            connection.respond(
                &request,
                Ok(Some(json!({"breakpoints": [{"line": line}]}))),
            );
        }
        "continue" => {
            connection.respond(
                &request,
                Ok(Some(json!({"allThreadsContinued": true}))),
            );
        }
        "next" | "stepIn" | "stepOut" | "pause" => connection.respond(&request, Ok(None)),
        "restart" => connection.respond(&request, Ok(None)),
        "disconnect" | "terminate" => connection.respond(&request, Ok(None)),
        other => {
            connection.respond(&request, Err(format!("unsupported command `{other}`")));
        }
    }
}

#[async_trait(?Send)]
impl Adapter for FakeAdapter {
    fn adapter_type(&self) -> &str {
        "fake"
    }

    async fn connect(&self) -> anyhow::Result<RawClient> {
        let (client_side, adapter_side) = RawClient::pair();
        self.spawn_peer(adapter_side);
        Ok(client_side)
    }

    async fn run_in_terminal(
        &self,
        arguments: RunInTerminalArguments,
    ) -> anyhow::Result<RunInTerminalResponse> {
        self.state.run_in_terminal_calls.borrow_mut().push(arguments);
        Ok(RunInTerminalResponse {
            process_id: Some(4242),
            shell_process_id: None,
        })
    }
}
