//! Per-source breakpoint synchronization and exception filter pushes.
//!
//! `setBreakpoints` is serialized per (session, source): a push that lands
//! while one is in flight marks the source dirty and the finisher loops.
//! This also batches bursts of edits into one request.

use crate::breakpoint::{Binding, Breakpoint};
use crate::entity::EntityKind;
use crate::error::{Error, Result};
use crate::proto::requests::{
    SetBreakpoints, SetBreakpointsArguments, SetExceptionBreakpoints,
    SetExceptionBreakpointsArguments,
};
use crate::proto::types::{Capabilities, DapSource, ExceptionFilterOptions, SourceBreakpoint};
use crate::session::{Session, SessionState};
use crate::source::{Source, SourceBinding};
use crate::weak_error;
use std::rc::Rc;

impl Session {
    /// Queue a breakpoint push for one source. Fire-and-forget; errors are
    /// logged and surface as unverified bindings.
    pub(crate) fn schedule_sync(&self, source_key: String) {
        if !self.inner.initialized.get() {
            // Everything is pushed wholesale in the `initialized` handler.
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        tokio::task::spawn_local(async move {
            let Some(inner) = weak.upgrade() else { return };
            let session = Session { inner };
            session.sync_breakpoints_for_source(source_key).await;
        });
    }

    /// Push the current breakpoint set of one source, serialized per source.
    pub(crate) async fn sync_breakpoints_for_source(&self, source_key: String) {
        if self.inner.state.get() == SessionState::Terminated {
            return;
        }
        {
            let mut states = self.inner.sync_states.borrow_mut();
            let state = states.entry(source_key.clone()).or_default();
            if state.in_flight {
                state.dirty = true;
                return;
            }
            state.in_flight = true;
        }
        self.inner.active_syncs.set(self.inner.active_syncs.get() + 1);

        loop {
            weak_error!(self.push_source(&source_key).await, "breakpoint sync:");
            let mut states = self.inner.sync_states.borrow_mut();
            let state = states.entry(source_key.clone()).or_default();
            if state.dirty {
                state.dirty = false;
                continue;
            }
            state.in_flight = false;
            break;
        }

        let remaining = self.inner.active_syncs.get() - 1;
        self.inner.active_syncs.set(remaining);
        if remaining == 0 {
            self.inner.syncs_idle.notify_waiters();
        }
    }

    async fn push_source(&self, source_key: &str) -> Result<()> {
        let Some(debugger) = self.debugger() else {
            return Ok(());
        };
        let Some(source) = debugger.source_by_key(source_key) else {
            return Ok(());
        };

        let breakpoints: Vec<Breakpoint> = debugger
            .breakpoints_for_source(source_key)
            .into_iter()
            .filter(|breakpoint| breakpoint.enabled().get())
            .collect();

        let Some(descriptor) = self.source_descriptor(&source) else {
            // Virtual source without a session-local reference: the
            // breakpoints cannot be expressed for this session.
            return Ok(());
        };

        let already_pushed = self
            .inner
            .sync_states
            .borrow()
            .get(source_key)
            .map(|state| state.pushed)
            .unwrap_or(false);
        if breakpoints.is_empty() && !already_pushed {
            return Ok(());
        }

        let payload: Vec<SourceBreakpoint> = breakpoints
            .iter()
            .map(|breakpoint| SourceBreakpoint {
                line: breakpoint.line(),
                column: breakpoint.column(),
                condition: breakpoint.condition().get(),
                hit_condition: breakpoint.hit_condition().get(),
                log_message: breakpoint.log_message().get(),
            })
            .collect();

        let response = self
            .client()
            .request::<SetBreakpoints>(SetBreakpointsArguments {
                source: descriptor,
                breakpoints: payload,
                source_modified: None,
            })
            .await;

        match response {
            Ok(response) => {
                self.inner
                    .sync_states
                    .borrow_mut()
                    .entry(source_key.to_string())
                    .or_default()
                    .pushed = true;
                // Response order mirrors request order; bindings update in
                // lockstep.
                for (position, breakpoint) in breakpoints.iter().enumerate() {
                    let Some(binding) = debugger.ensure_binding(self, breakpoint) else {
                        continue;
                    };
                    match response.breakpoints.get(position) {
                        Some(dap) => binding.apply_verification(dap),
                        None => binding.mark_unverified("missing breakpoint in response"),
                    }
                }
                Ok(())
            }
            Err(Error::Adapter { message, .. }) => {
                for breakpoint in &breakpoints {
                    if let Some(binding) = debugger.ensure_binding(self, breakpoint) {
                        binding.mark_unverified(&message);
                    }
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// The wire descriptor this session must use for a source, or None when
    /// the source is virtual and this session holds no reference for it.
    pub(crate) fn source_descriptor(&self, source: &Source) -> Option<DapSource> {
        if source.is_virtual() {
            let binding = self.source_binding_for(source.key())?;
            Some(binding.descriptor())
        } else {
            Some(DapSource {
                path: source.path().map(str::to_string),
                name: source.name().map(str::to_string),
                ..Default::default()
            })
        }
    }

    pub(crate) fn source_binding_for(&self, source_key: &str) -> Option<SourceBinding> {
        let key = format!("{}|{}", self.inner.id, source_key);
        self.inner
            .store
            .index_lookup(EntityKind::SourceBinding, "key", key.as_str())
            .into_iter()
            .find_map(|entity| entity.as_source_binding())
    }

    pub(crate) fn ensure_source_binding(
        &self,
        source: &Source,
        dap: &crate::proto::types::DapSource,
    ) -> SourceBinding {
        match self.source_binding_for(source.key()) {
            Some(binding) => {
                binding.update(dap);
                binding
            }
            None => SourceBinding::create(self, source, dap),
        }
    }

    pub(crate) fn binding_for(&self, breakpoint: &Breakpoint) -> Option<Binding> {
        let uri = self.inner.uri.child("binding", breakpoint.id());
        self.inner
            .store
            .get_uri(&uri)
            .and_then(|entity| entity.as_binding())
    }

    /// Queue an exception filter push (filter toggled, condition edited).
    pub(crate) fn schedule_exception_push(&self) {
        if !self.inner.initialized.get() {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        tokio::task::spawn_local(async move {
            let Some(inner) = weak.upgrade() else { return };
            let session = Session { inner };
            weak_error!(
                session.push_exception_filters().await,
                "exception filter push:"
            );
        });
    }

    /// Push the enabled exception filters; response entries map back onto the
    /// enabled bindings in order.
    pub(crate) async fn push_exception_filters(&self) -> Result<()> {
        if self.inner.state.get() == SessionState::Terminated {
            return Ok(());
        }
        let bindings: Vec<crate::exception::ExceptionFilterBinding> = self
            .exception_filter_bindings()
            .iter()
            .into_iter()
            .filter_map(|entity| entity.as_exception_filter_binding())
            .collect();
        if bindings.is_empty() {
            return Ok(());
        }

        let enabled: Vec<_> = bindings
            .iter()
            .filter(|binding| binding.filter().enabled().get())
            .collect();
        let filters: Vec<String> = enabled
            .iter()
            .map(|binding| binding.filter().filter_id().to_string())
            .collect();

        let supports_options =
            Capabilities::flag(self.capabilities().supports_exception_filter_options);
        let filter_options = if supports_options
            && enabled.iter().any(|b| b.condition().get().is_some())
        {
            Some(
                enabled
                    .iter()
                    .map(|binding| ExceptionFilterOptions {
                        filter_id: binding.filter().filter_id().to_string(),
                        condition: binding.condition().get(),
                    })
                    .collect(),
            )
        } else {
            None
        };

        let response = self
            .client()
            .request::<SetExceptionBreakpoints>(SetExceptionBreakpointsArguments {
                filters,
                filter_options,
            })
            .await?;

        if let Some(results) = response.and_then(|body| body.breakpoints) {
            for (position, binding) in enabled.iter().enumerate() {
                if let Some(dap) = results.get(position) {
                    binding.apply_verification(dap);
                }
            }
        }
        Ok(())
    }
}
