//! Adapter event wiring and reverse-request handling.

use crate::client::ReverseRequest;
use crate::entity::{EntityKind, Output};
use crate::proto::events::{
    BreakpointEventBody, ContinuedEventBody, Event, ExitedEventBody, LoadedSourceEventBody,
    OutputEventBody, ProcessEventBody, StoppedEventBody, ThreadEventBody,
};
use crate::proto::requests::{
    RunInTerminalArguments, StartDebuggingArguments, Threads, ThreadsArguments,
};
use crate::session::{Session, SessionState, StartConfig, StartRequest};
use crate::weak_error;
use std::rc::Rc;
use std::time::Duration;

/// Grace period before inferring breakpoint hits from the top frame when the
/// adapter omits `hitBreakpointIds` and no breakpoint sync is in flight.
const HIT_INFERENCE_GRACE: Duration = Duration::from_millis(100);

impl Session {
    pub(crate) async fn handle_event(&self, event: Event) {
        match event {
            Event::Initialized => self.configure().await,
            Event::Stopped(body) => self.on_stopped(body),
            Event::Continued(body) => self.on_continued(body),
            Event::Thread(body) => self.on_thread_event(body),
            Event::Output(body) => self.on_output_event(body),
            Event::Breakpoint(body) => self.on_breakpoint_event(body),
            Event::LoadedSource(body) => self.on_loaded_source(body),
            Event::Process(body) => self.on_process(body),
            Event::Capabilities(body) => {
                *self.inner.capabilities.borrow_mut() = body.capabilities;
            }
            Event::Exited(body) => self.on_exited(body),
            Event::Terminated(_) => self.dispose(),
            Event::Unknown { name, .. } => {
                log::debug!(target: "session", "ignoring `{name}` event");
            }
        }
    }

    fn on_stopped(&self, body: StoppedEventBody) {
        self.set_state(SessionState::Stopped);

        let reason = body.reason.clone();
        if body.all_threads_stopped.unwrap_or(false) {
            for entity in self.threads().iter() {
                if let Some(thread) = entity.as_thread() {
                    thread.mark_stopped(Some(reason.clone()));
                }
            }
        }
        if let Some(thread_id) = body.thread_id {
            self.ensure_thread(thread_id)
                .mark_stopped(Some(reason.clone()));
        }

        if reason == "breakpoint" || reason == "exception" {
            match &body.hit_breakpoint_ids {
                Some(ids) => self.mark_hits_by_id(ids),
                None if reason == "breakpoint" => {
                    if let Some(thread_id) = body.thread_id {
                        self.spawn_hit_inference(thread_id);
                    }
                }
                None => {}
            }
        }
    }

    /// Precise attribution: the adapter told us which breakpoints were hit.
    fn mark_hits_by_id(&self, ids: &[i64]) {
        for id in ids {
            let key = format!("{}:{}", self.inner.id, id);
            for entity in
                self.inner
                    .store
                    .index_lookup(EntityKind::Binding, "dap_key", key.as_str())
            {
                if let Some(binding) = entity.as_binding() {
                    binding.set_hit(true);
                }
            }
            for entity in self.inner.store.index_lookup(
                EntityKind::ExceptionFilterBinding,
                "dap_key",
                key.as_str(),
            ) {
                if let Some(binding) = entity.as_exception_filter_binding() {
                    binding.set_hit(true);
                }
            }
        }
    }

    /// Inferred attribution: wait out the race against a concurrent
    /// breakpoint sync, then match bindings by the top frame's location.
    fn spawn_hit_inference(&self, thread_id: i64) {
        let weak = Rc::downgrade(&self.inner);
        tokio::task::spawn_local(async move {
            let wait_for_sync = {
                let Some(inner) = weak.upgrade() else { return };
                (inner.active_syncs.get() > 0).then(|| inner.syncs_idle.clone())
            };
            match wait_for_sync {
                // A sync is settling; its response order is the real
                // causality barrier.
                Some(idle) => idle.notified().await,
                None => tokio::time::sleep(HIT_INFERENCE_GRACE).await,
            }
            let Some(inner) = weak.upgrade() else { return };
            let session = Session { inner };
            if session.inner.state.get() != SessionState::Stopped {
                return;
            }
            let Some(thread) = session.find_thread(thread_id) else {
                return;
            };
            let Some(stack) = weak_error!(thread.stack().await, "hit inference:") else {
                return;
            };
            let Some(frame) = stack.top_frame() else { return };
            let Some(source) = frame.source() else { return };

            let key = format!("{}|{}:{}", session.inner.id, source.key(), frame.line());
            for entity in session.inner.store.index_lookup(
                EntityKind::Binding,
                "location_key",
                key.as_str(),
            ) {
                if let Some(binding) = entity.as_binding() {
                    binding.set_hit(true);
                }
            }
        });
    }

    fn on_continued(&self, body: ContinuedEventBody) {
        let all = body.all_threads_continued.unwrap_or(false);
        self.apply_continue(if all { None } else { Some(body.thread_id) });
    }

    fn on_thread_event(&self, body: ThreadEventBody) {
        match body.reason.as_str() {
            "started" => {
                self.ensure_thread(body.thread_id);
                self.spawn_thread_name_refresh();
            }
            "exited" => {
                if let Some(thread) = self.find_thread(body.thread_id) {
                    thread.dispose();
                }
            }
            other => {
                log::debug!(target: "session", "unknown thread event reason `{other}`");
            }
        }
    }

    /// Adapters assign names asynchronously; pick them up in the background.
    fn spawn_thread_name_refresh(&self) {
        let weak = Rc::downgrade(&self.inner);
        tokio::task::spawn_local(async move {
            let Some(inner) = weak.upgrade() else { return };
            let session = Session { inner };
            let response = session
                .client()
                .request::<Threads>(ThreadsArguments {})
                .await;
            let Some(response) = weak_error!(response, "thread name refresh:") else {
                return;
            };
            for dap_thread in response.threads {
                if let Some(thread) = session.find_thread(dap_thread.id) {
                    thread.set_name(dap_thread.name);
                }
            }
        });
    }

    fn on_output_event(&self, body: OutputEventBody) {
        let index = self.inner.output_seq.get() + 1;
        self.inner.output_seq.set(index);
        Output::create(self, index, body);
    }

    fn on_breakpoint_event(&self, body: BreakpointEventBody) {
        let Some(id) = body.breakpoint.id else {
            log::debug!(target: "session", "breakpoint event without id");
            return;
        };
        let key = format!("{}:{}", self.inner.id, id);
        for entity in self
            .inner
            .store
            .index_lookup(EntityKind::Binding, "dap_key", key.as_str())
        {
            if let Some(binding) = entity.as_binding() {
                binding.apply_verification(&body.breakpoint);
            }
        }
    }

    fn on_loaded_source(&self, body: LoadedSourceEventBody) {
        let Some(debugger) = self.debugger() else { return };
        let source = debugger.intern_source(&body.source);
        match body.reason.as_str() {
            "new" => {
                self.ensure_source_binding(&source, &body.source);
                // Virtual sources become syncable once a session-local
                // reference exists.
                self.schedule_sync(source.key().to_string());
            }
            "changed" => {
                source.invalidate_content();
                self.ensure_source_binding(&source, &body.source);
            }
            "removed" => {
                // The global Source stays; only this session's reference dies.
                if let Some(binding) = self.source_binding_for(source.key()) {
                    binding.dispose();
                }
            }
            other => {
                log::debug!(target: "session", "unknown loadedSource reason `{other}`");
            }
        }
    }

    fn on_process(&self, body: ProcessEventBody) {
        *self.inner.process_name.borrow_mut() = Some(body.name);
        self.inner.process_id.set(body.system_process_id);
        self.inner
            .is_auto_attached
            .set(body.start_method.as_deref() == Some("attachForSuspendedLaunch"));
        *self.inner.start_method.borrow_mut() = body.start_method;
    }

    fn on_exited(&self, body: ExitedEventBody) {
        self.inner.exit_code.set(Some(body.exit_code));
    }

    pub(crate) async fn handle_reverse_request(&self, request: ReverseRequest) {
        let command = request.command.clone();
        match command.as_str() {
            "startDebugging" => {
                let arguments: StartDebuggingArguments =
                    match serde_json::from_value(request.arguments.clone()) {
                        Ok(arguments) => arguments,
                        Err(err) => {
                            request.respond(Err(format!("bad startDebugging arguments: {err}")));
                            return;
                        }
                    };
                let start_request = match arguments.request.as_str() {
                    "attach" => StartRequest::Attach,
                    _ => StartRequest::Launch,
                };
                let config = StartConfig {
                    adapter_type: self.inner.adapter_type.clone(),
                    request: start_request,
                    name: None,
                    payload: arguments.configuration,
                };
                let Some(debugger) = self.debugger() else {
                    request.respond(Err("debugger is gone".to_string()));
                    return;
                };
                // Create and link the child before replying so the parent's
                // children view yields it as soon as the handler returns.
                match debugger.connect_session(config, Some(self)).await {
                    Ok(child) => {
                        request.respond(Ok(None));
                        tokio::task::spawn_local(async move {
                            if let Err(err) = child.initialize_and_start().await {
                                log::warn!(
                                    target: "session",
                                    "child session failed to start: {err:#}"
                                );
                                child.dispose();
                            }
                        });
                    }
                    Err(err) => request.respond(Err(err.to_string())),
                }
            }
            "runInTerminal" => {
                let arguments: RunInTerminalArguments =
                    match serde_json::from_value(request.arguments.clone()) {
                        Ok(arguments) => arguments,
                        Err(err) => {
                            request.respond(Err(format!("bad runInTerminal arguments: {err}")));
                            return;
                        }
                    };
                match self.inner.adapter.run_in_terminal(arguments).await {
                    Ok(response) => {
                        request.respond(Ok(serde_json::to_value(response).ok()));
                    }
                    Err(err) => request.respond(Err(format!("{err:#}"))),
                }
            }
            other => {
                request.respond(Err(format!("unsupported reverse request `{other}`")));
            }
        }
    }
}
