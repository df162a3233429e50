//! One debug session: a client connection, the DAP state machine and the
//! session-scoped slice of the entity graph.

mod events;
mod init;
mod sync;

use crate::breakpoint::Binding;
use crate::client::Client;
use crate::debugger::{Adapter, Debugger, DebuggerInner};
use crate::entity::{edges, EntityKind, EntityObject, FieldValue, Thread};
use crate::entity::evaluate::EvaluateResult;
use crate::error::{Error, Result};
use crate::proto::requests::{
    BreakpointLocations, BreakpointLocationsArguments, Completions, CompletionsArguments, Continue,
    ContinueArguments, Disconnect, DisconnectArguments, Evaluate, EvaluateArguments, LoadedSources,
    LoadedSourcesArguments, Next, Pause, PauseArguments, Restart, RestartArguments, StepArguments,
    StepIn, StepInArguments, StepOut, Terminate, TerminateArguments,
};
use crate::proto::types::{BreakpointLocation, Capabilities, CompletionItem};
use crate::reactive::{DisposalScope, Signal, Subscription};
use crate::source::Source;
use crate::store::{EntityStore, View};
use crate::uri::Uri;
use crate::{ids, weak_error};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    Initializing,
    Running,
    Stopped,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRequest {
    Launch,
    Attach,
}

/// What to start and how. The payload is the opaque adapter configuration.
#[derive(Clone)]
pub struct StartConfig {
    pub adapter_type: String,
    pub request: StartRequest,
    pub name: Option<String>,
    pub payload: Value,
}

#[derive(Default)]
pub(crate) struct SyncState {
    pub(crate) in_flight: bool,
    pub(crate) dirty: bool,
    /// Whether this source ever reached the adapter; an empty payload is only
    /// worth sending when there is adapter state to clear.
    pub(crate) pushed: bool,
}

type HookList = RefCell<Vec<(u64, Rc<dyn Fn(&Session)>)>>;

#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Rc<SessionInner>,
}

pub(crate) struct SessionInner {
    pub(crate) uri: Uri,
    pub(crate) id: String,
    pub(crate) adapter_type: String,
    pub(crate) adapter: Rc<dyn Adapter>,
    pub(crate) debugger: Weak<DebuggerInner>,
    pub(crate) client: Client,
    pub(crate) state: Signal<SessionState>,
    pub(crate) capabilities: RefCell<Capabilities>,
    pub(crate) start_config: RefCell<StartConfig>,
    pub(crate) process_name: RefCell<Option<String>>,
    pub(crate) process_id: Cell<Option<i64>>,
    pub(crate) start_method: RefCell<Option<String>>,
    pub(crate) is_auto_attached: Cell<bool>,
    pub(crate) exit_code: Cell<Option<i64>>,
    pub(crate) output_seq: Cell<i64>,
    pub(crate) eval_seq: Cell<i64>,
    pub(crate) store: EntityStore,
    pub(crate) scope: DisposalScope,
    pub(crate) initialized: Cell<bool>,
    pub(crate) caps_ready: Cell<bool>,
    pub(crate) caps_notify: Rc<Notify>,
    pub(crate) configured: Cell<bool>,
    pub(crate) configured_notify: Rc<Notify>,
    pub(crate) sync_states: RefCell<HashMap<String, SyncState>>,
    pub(crate) active_syncs: Cell<usize>,
    pub(crate) syncs_idle: Rc<Notify>,
    pub(crate) on_restart: HookList,
    pub(crate) on_restarted: HookList,
    pub(crate) next_hook: Cell<u64>,
    pub(crate) event_task: RefCell<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn create(
        debugger: &Debugger,
        adapter: Rc<dyn Adapter>,
        config: StartConfig,
        client: Client,
        parent: Option<&Session>,
    ) -> Session {
        let id = ids::pronounceable();
        let uri = Uri::root("session", &id);
        let store = debugger.store().clone();
        let scope = match parent {
            Some(parent) => parent.disposal_scope().child(),
            None => DisposalScope::new(),
        };

        let session = Session {
            inner: Rc::new(SessionInner {
                uri: uri.clone(),
                id: id.clone(),
                adapter_type: config.adapter_type.clone(),
                adapter,
                debugger: debugger.downgrade(),
                client: client.clone(),
                state: Signal::new(SessionState::Initializing),
                capabilities: RefCell::new(Capabilities::default()),
                start_config: RefCell::new(config),
                process_name: RefCell::new(None),
                process_id: Cell::new(None),
                start_method: RefCell::new(None),
                is_auto_attached: Cell::new(false),
                exit_code: Cell::new(None),
                output_seq: Cell::new(0),
                eval_seq: Cell::new(0),
                store: store.clone(),
                scope: scope.clone(),
                initialized: Cell::new(false),
                caps_ready: Cell::new(false),
                caps_notify: Rc::new(Notify::new()),
                configured: Cell::new(false),
                configured_notify: Rc::new(Notify::new()),
                sync_states: RefCell::new(HashMap::new()),
                active_syncs: Cell::new(0),
                syncs_idle: Rc::new(Notify::new()),
                on_restart: RefCell::new(Vec::new()),
                on_restarted: RefCell::new(Vec::new()),
                next_hook: Cell::new(0),
                event_task: RefCell::new(None),
            }),
        };

        let parent_edges: Vec<(Uri, &'static str)> = parent
            .map(|p| vec![(p.uri().clone(), edges::CHILDREN)])
            .unwrap_or_default();
        store.add(session.clone(), &parent_edges);
        debugger.sessions().insert(id, session.clone());

        let weak = Rc::downgrade(&session.inner);
        let debugger_weak = debugger.downgrade();
        scope.on_dispose(move || {
            if let Some(inner) = weak.upgrade() {
                inner.state.set(SessionState::Terminated);
                inner.client.close();
                if let Some(task) = inner.event_task.borrow_mut().take() {
                    task.abort();
                }
                if let Some(debugger) = debugger_weak.upgrade() {
                    Debugger::from_inner(debugger).sessions().remove(&inner.id);
                }
            }
        });
        session
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> String {
        self.inner
            .start_config
            .borrow()
            .name
            .clone()
            .unwrap_or_else(|| self.inner.adapter_type.clone())
    }

    pub fn adapter_type(&self) -> &str {
        &self.inner.adapter_type
    }

    pub fn state(&self) -> Signal<SessionState> {
        self.inner.state.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities.borrow().clone()
    }

    pub fn process_id(&self) -> Option<i64> {
        self.inner.process_id.get()
    }

    pub fn start_method(&self) -> Option<String> {
        self.inner.start_method.borrow().clone()
    }

    /// True for sessions the adapter attached to a suspended child process.
    pub fn is_auto_attached(&self) -> bool {
        self.inner.is_auto_attached.get()
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.inner.exit_code.get()
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn store(&self) -> &EntityStore {
        &self.inner.store
    }

    pub fn debugger(&self) -> Option<Debugger> {
        self.inner.debugger.upgrade().map(Debugger::from_inner)
    }

    pub(crate) fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    // ------------------------------- views ------------------------------

    pub fn threads(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::THREADS, EntityKind::Thread)
    }

    pub fn bindings(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::BINDINGS, EntityKind::Binding)
    }

    pub fn outputs(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::OUTPUTS, EntityKind::Output)
    }

    pub fn evaluations(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::EVALUATIONS, EntityKind::Evaluate)
    }

    pub fn source_bindings(&self) -> View {
        self.inner.store.view_from(
            &self.inner.uri,
            edges::SOURCE_BINDINGS,
            EntityKind::SourceBinding,
        )
    }

    pub fn exception_filter_bindings(&self) -> View {
        self.inner.store.view_from(
            &self.inner.uri,
            edges::EXCEPTION_BINDINGS,
            EntityKind::ExceptionFilterBinding,
        )
    }

    pub fn children(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::CHILDREN, EntityKind::Session)
    }

    /// Every variable of this session, whatever container it lives in.
    pub fn variables(&self) -> View {
        self.inner
            .store
            .view(EntityKind::Variable)
            .where_eq("session_id", self.inner.id.as_str())
    }

    /// Session-scoped slice of an arbitrary entity type.
    pub fn view(&self, kind: EntityKind) -> View {
        self.inner
            .store
            .view(kind)
            .where_eq("session_id", self.inner.id.as_str())
    }

    // ------------------------------- hooks ------------------------------

    pub fn on_thread(&self, mut f: impl FnMut(&Thread) + 'static) -> Subscription {
        self.threads().each(move |entity| {
            if let Some(thread) = entity.as_thread() {
                f(&thread)
            }
        })
    }

    pub fn on_binding(&self, mut f: impl FnMut(&Binding) + 'static) -> Subscription {
        self.bindings().each(move |entity| {
            if let Some(binding) = entity.as_binding() {
                f(&binding)
            }
        })
    }

    pub fn on_output(&self, mut f: impl FnMut(&crate::entity::Output) + 'static) -> Subscription {
        self.outputs().each(move |entity| {
            if let Some(output) = entity.as_output() {
                f(&output)
            }
        })
    }

    pub fn on_child(&self, mut f: impl FnMut(&Session) + 'static) -> Subscription {
        self.children().each(move |entity| {
            if let Some(child) = entity.as_session() {
                f(&child)
            }
        })
    }

    pub fn on_source_binding(
        &self,
        mut f: impl FnMut(&crate::source::SourceBinding) + 'static,
    ) -> Subscription {
        self.source_bindings().each(move |entity| {
            if let Some(binding) = entity.as_source_binding() {
                f(&binding)
            }
        })
    }

    pub fn on_exception_filter_binding(
        &self,
        mut f: impl FnMut(&crate::exception::ExceptionFilterBinding) + 'static,
    ) -> Subscription {
        self.exception_filter_bindings().each(move |entity| {
            if let Some(binding) = entity.as_exception_filter_binding() {
                f(&binding)
            }
        })
    }

    pub fn on_restart(&self, f: impl Fn(&Session) + 'static) -> Subscription {
        Self::register_hook(&self.inner, &self.inner.on_restart, f)
    }

    pub fn on_restarted(&self, f: impl Fn(&Session) + 'static) -> Subscription {
        Self::register_hook(&self.inner, &self.inner.on_restarted, f)
    }

    fn register_hook(
        inner: &Rc<SessionInner>,
        list: &HookList,
        f: impl Fn(&Session) + 'static,
    ) -> Subscription {
        let id = inner.next_hook.get();
        inner.next_hook.set(id + 1);
        list.borrow_mut().push((id, Rc::new(f)));
        let weak = Rc::downgrade(inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_restart.borrow_mut().retain(|(hook_id, _)| *hook_id != id);
                inner
                    .on_restarted
                    .borrow_mut()
                    .retain(|(hook_id, _)| *hook_id != id);
            }
        })
    }

    pub(crate) fn fire_hooks(&self, list: &HookList) {
        let hooks: Vec<Rc<dyn Fn(&Session)>> =
            list.borrow().iter().map(|(_, hook)| hook.clone()).collect();
        for hook in hooks {
            hook(self);
        }
    }

    // ------------------------------ commands ----------------------------

    /// Resume a thread. Per the protocol, the adapter may resume everything.
    pub async fn continue_thread(&self, thread_id: i64) -> Result<()> {
        self.ensure_alive()?;
        let single = Capabilities::flag(
            self.capabilities().supports_single_thread_execution_requests,
        );
        let response = self
            .client()
            .request::<Continue>(ContinueArguments {
                thread_id,
                single_thread: single.then_some(true),
            })
            .await?;
        let all = response
            .and_then(|body| body.all_threads_continued)
            .unwrap_or(true);
        self.apply_continue(if all { None } else { Some(thread_id) });
        Ok(())
    }

    pub async fn pause(&self, thread_id: i64) -> Result<()> {
        self.ensure_alive()?;
        self.client()
            .request::<Pause>(PauseArguments { thread_id })
            .await?;
        Ok(())
    }

    pub async fn next(&self, thread_id: i64) -> Result<()> {
        self.ensure_alive()?;
        self.client()
            .request::<Next>(StepArguments {
                thread_id,
                single_thread: None,
                granularity: None,
            })
            .await?;
        self.apply_continue(Some(thread_id));
        Ok(())
    }

    pub async fn step_in(&self, thread_id: i64) -> Result<()> {
        self.ensure_alive()?;
        self.client()
            .request::<StepIn>(StepInArguments {
                thread_id,
                single_thread: None,
                target_id: None,
                granularity: None,
            })
            .await?;
        self.apply_continue(Some(thread_id));
        Ok(())
    }

    pub async fn step_out(&self, thread_id: i64) -> Result<()> {
        self.ensure_alive()?;
        self.client()
            .request::<StepOut>(StepArguments {
                thread_id,
                single_thread: None,
                granularity: None,
            })
            .await?;
        self.apply_continue(Some(thread_id));
        Ok(())
    }

    pub async fn disconnect(&self, terminate_debuggee: bool) -> Result<()> {
        self.ensure_alive()?;
        let result = self
            .client()
            .request::<Disconnect>(DisconnectArguments {
                restart: None,
                terminate_debuggee: Some(terminate_debuggee),
            })
            .await;
        self.dispose();
        result.map(|_| ())
    }

    /// Terminate the debuggee gracefully; falls back to `disconnect` when the
    /// adapter cannot.
    pub async fn terminate(&self) -> Result<()> {
        self.ensure_alive()?;
        if Capabilities::flag(self.capabilities().supports_terminate_request) {
            self.client()
                .request::<Terminate>(TerminateArguments { restart: None })
                .await?;
            Ok(())
        } else {
            self.disconnect(true).await
        }
    }

    /// Restart the debuggee.
    ///
    /// With `supportsRestartRequest` the session (and its URI) survives and
    /// only ephemeral entities are dropped. Otherwise the session is torn
    /// down and a fresh one is started from the stored configuration; callers
    /// observing URIs must expect a new one in that case.
    pub async fn restart(&self) -> Result<Session> {
        self.ensure_alive()?;
        if Capabilities::flag(self.capabilities().supports_restart_request) {
            let arguments = Some(self.inner.start_config.borrow().payload.clone());
            self.client()
                .request::<Restart>(RestartArguments { arguments })
                .await?;
            self.fire_hooks(&self.inner.on_restart);
            self.dispose_ephemeral();
            if self.inner.state.get() != SessionState::Terminated {
                self.set_state(SessionState::Running);
            }
            self.fire_hooks(&self.inner.on_restarted);
            Ok(self.clone())
        } else {
            let mut config = self.inner.start_config.borrow().clone();
            if let Value::Object(map) = &mut config.payload {
                map.insert("__restart".to_string(), Value::Bool(true));
            }
            let debugger = self.debugger().ok_or(Error::SessionTerminated)?;
            weak_error!(self.disconnect(true).await, "restart disconnect:");
            let session = debugger.start(config).await?;
            session.fire_hooks(&session.inner.on_restarted);
            Ok(session)
        }
    }

    /// Evaluate without frame context (repl/watch against the global scope).
    pub async fn evaluate(&self, expression: &str, context: &str) -> Result<EvaluateResult> {
        self.evaluate_in_frame(None, expression, context).await
    }

    pub(crate) async fn evaluate_in_frame(
        &self,
        frame_id: Option<i64>,
        expression: &str,
        context: &str,
    ) -> Result<EvaluateResult> {
        self.ensure_alive()?;
        let response = self
            .client()
            .request::<Evaluate>(EvaluateArguments {
                expression: expression.to_string(),
                frame_id,
                context: Some(context.to_string()),
            })
            .await?;
        self.ensure_alive()?;
        let id = self.inner.eval_seq.get() + 1;
        self.inner.eval_seq.set(id);
        Ok(EvaluateResult::create(
            self,
            id,
            expression.to_string(),
            context.to_string(),
            response.result,
            response.ty,
            response.variables_reference,
        ))
    }

    pub async fn completions(
        &self,
        text: &str,
        column: i64,
        frame_id: Option<i64>,
        line: Option<i64>,
    ) -> Result<Vec<CompletionItem>> {
        self.ensure_alive()?;
        if !Capabilities::flag(self.capabilities().supports_completions_request) {
            return Err(Error::UnsupportedCapability("completions"));
        }
        let response = self
            .client()
            .request::<Completions>(CompletionsArguments {
                frame_id,
                text: text.to_string(),
                column,
                line,
            })
            .await?;
        Ok(response.targets)
    }

    pub async fn breakpoint_locations(
        &self,
        source: &Source,
        line: i64,
    ) -> Result<Vec<BreakpointLocation>> {
        self.ensure_alive()?;
        if !Capabilities::flag(self.capabilities().supports_breakpoint_locations_request) {
            return Err(Error::UnsupportedCapability("breakpointLocations"));
        }
        let descriptor = self
            .source_descriptor(source)
            .ok_or_else(|| Error::EntityNotFound(source.uri().to_string()))?;
        let response = self
            .client()
            .request::<BreakpointLocations>(BreakpointLocationsArguments {
                source: descriptor,
                line,
                column: None,
                end_line: None,
                end_column: None,
            })
            .await?;
        Ok(response.breakpoints)
    }

    /// Query the adapter's loaded sources and fold them into the registry.
    pub async fn loaded_sources(&self) -> Result<Vec<Source>> {
        self.ensure_alive()?;
        let response = self
            .client()
            .request::<LoadedSources>(LoadedSourcesArguments {})
            .await?;
        self.ensure_alive()?;
        let Some(debugger) = self.debugger() else {
            return Err(Error::SessionTerminated);
        };
        let mut sources = Vec::with_capacity(response.sources.len());
        for dap in response.sources {
            let source = debugger.intern_source(&dap);
            self.ensure_source_binding(&source, &dap);
            sources.push(source);
        }
        Ok(sources)
    }

    // ----------------------------- internals ----------------------------

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.inner.state.get() == SessionState::Terminated {
            return Err(Error::SessionTerminated);
        }
        Ok(())
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.state.set(state);
        self.inner.store.update_field(&self.inner.uri, "state");
    }

    pub(crate) fn find_thread(&self, thread_id: i64) -> Option<Thread> {
        let key = format!("{}:{}", self.inner.id, thread_id);
        self.inner
            .store
            .index_lookup(EntityKind::Thread, "key", key)
            .into_iter()
            .find_map(|entity| entity.as_thread())
    }

    pub(crate) fn ensure_thread(&self, thread_id: i64) -> Thread {
        match self.find_thread(thread_id) {
            Some(thread) => thread,
            None => Thread::create(self, thread_id, format!("Thread #{thread_id}")),
        }
    }

    fn all_threads(&self) -> Vec<Thread> {
        self.threads()
            .iter()
            .into_iter()
            .filter_map(|entity| entity.as_thread())
            .collect()
    }

    /// Mutations shared by the `continued` event and resume-shaped responses:
    /// threads run again, no binding stays hit, every adapter-assigned
    /// reference of this stop is expired.
    pub(crate) fn apply_continue(&self, only_thread: Option<i64>) {
        match only_thread {
            Some(thread_id) => {
                if let Some(thread) = self.find_thread(thread_id) {
                    thread.mark_running();
                }
            }
            None => {
                for thread in self.all_threads() {
                    thread.mark_running();
                }
            }
        }
        self.clear_hits();
        self.expire_derived();
        if self.inner.state.get() == SessionState::Stopped {
            self.set_state(SessionState::Running);
        }
    }

    pub(crate) fn clear_hits(&self) {
        for entity in self.bindings().iter() {
            if let Some(binding) = entity.as_binding() {
                binding.set_hit(false);
            }
        }
        for entity in self.exception_filter_bindings().iter() {
            if let Some(binding) = entity.as_exception_filter_binding() {
                binding.set_hit(false);
            }
        }
    }

    fn expire_derived(&self) {
        for entity in self.evaluations().iter() {
            if let Some(evaluate) = entity.as_evaluate() {
                evaluate.expire();
            }
        }
        for entity in self.outputs().iter() {
            if let Some(output) = entity.as_output() {
                output.expire();
            }
        }
    }

    fn dispose_ephemeral(&self) {
        for entity in self.threads().iter() {
            self.inner.store.dispose_entity(entity.uri());
        }
        for entity in self.outputs().iter() {
            self.inner.store.dispose_entity(entity.uri());
        }
        for entity in self.evaluations().iter() {
            self.inner.store.dispose_entity(entity.uri());
        }
    }

    /// Tear the session down: state to `terminated`, client closed, every
    /// session-scoped entity disposed.
    pub fn dispose(&self) {
        self.inner.store.dispose_entity(&self.inner.uri);
    }
}

impl EntityObject for Session {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::from(self.inner.id.as_str())),
            "session_id" => Some(FieldValue::from(self.inner.id.as_str())),
            "state" => Some(FieldValue::from(self.inner.state.get().to_string())),
            "adapter_type" => Some(FieldValue::from(self.inner.adapter_type.as_str())),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("id", self.field("id").unwrap()),
            ("adapter_type", self.field("adapter_type").unwrap()),
            ("state", self.field("state").unwrap()),
        ]
    }
}
