//! Stack frames. Frame ids are adapter-assigned integers that are only valid
//! while the owning thread is stopped; every request path re-checks currency
//! before putting one on the wire.

use crate::entity::scope::Scope;
use crate::entity::stack::Stack;
use crate::entity::{edges, EntityKind, EntityObject, FieldValue};
use crate::entity::evaluate::EvaluateResult;
use crate::error::{Error, Result};
use crate::proto::requests::{Scopes, ScopesArguments};
use crate::proto::types::DapStackFrame;
use crate::reactive::{DisposalScope, Signal};
use crate::session::Session;
use crate::source::Source;
use crate::store::{EntityStore, View};
use crate::uri::Uri;
use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone)]
pub struct Frame {
    inner: Rc<FrameInner>,
}

struct FrameInner {
    uri: Uri,
    id: i64,
    index: usize,
    name: String,
    line: i64,
    column: i64,
    source: Option<Source>,
    is_current: Signal<bool>,
    scopes_fetched: Cell<bool>,
    session: Session,
    store: EntityStore,
    scope: DisposalScope,
}

impl Frame {
    pub(crate) fn create(stack: &Stack, index: usize, dap: DapStackFrame) -> Frame {
        let session = stack.session().clone();
        let store = session.store().clone();
        let uri = stack.uri().child("frame", dap.id);
        let source = dap
            .source
            .as_ref()
            .and_then(|s| session.debugger().map(|d| d.intern_source(s)));

        let frame = Frame {
            inner: Rc::new(FrameInner {
                uri: uri.clone(),
                id: dap.id,
                index,
                name: dap.name,
                line: dap.line,
                column: dap.column,
                source,
                is_current: Signal::new(true),
                scopes_fetched: Cell::new(false),
                session: session.clone(),
                store: store.clone(),
                scope: stack.disposal_scope().child(),
            }),
        };
        store.add(frame.clone(), &[(stack.uri().clone(), edges::FRAMES)]);

        // Stopped on a breakpoint: bindings at this location light up with
        // the frame that hit them.
        if index == 0 && stack.reason() == "breakpoint" {
            frame.activate_bindings();
        }
        frame
    }

    fn activate_bindings(&self) {
        let Some(source) = &self.inner.source else {
            return;
        };
        let session_id = self.inner.session.id().to_string();
        for entity in self.inner.store.index_lookup(
            EntityKind::Binding,
            "source_key",
            source.key(),
        ) {
            let Some(binding) = entity.as_binding() else {
                continue;
            };
            if binding.session_id() != session_id {
                continue;
            }
            // Adapters move breakpoints to executable lines; match the
            // declared or the adjusted position.
            let declared = binding.breakpoint().line();
            let adjusted = binding.actual_line().get();
            if declared == self.inner.line || adjusted == Some(self.inner.line) {
                binding.set_active_frame(Some(self.inner.uri.clone()));
            }
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn id(&self) -> i64 {
        self.inner.id
    }

    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn line(&self) -> i64 {
        self.inner.line
    }

    pub fn column(&self) -> i64 {
        self.inner.column
    }

    pub fn source(&self) -> Option<Source> {
        self.inner.source.clone()
    }

    pub fn is_current(&self) -> Signal<bool> {
        self.inner.is_current.clone()
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// `path:line` of the frame position, when the source is known.
    pub fn location(&self) -> Option<String> {
        self.inner
            .source
            .as_ref()
            .map(|source| format!("{}:{}", source.display_name(), self.inner.line))
    }

    pub fn scopes_view(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::SCOPES, EntityKind::Scope)
    }

    /// Fetch the scopes of this frame, at most once.
    pub async fn scopes(&self) -> Result<Vec<Scope>> {
        self.ensure_current()?;
        if self.inner.scopes_fetched.get() {
            return Ok(self.collect_scopes());
        }
        // Flag set before the await: concurrent callers piggyback on the
        // in-flight request instead of issuing their own.
        self.inner.scopes_fetched.set(true);

        let response = self
            .inner
            .session
            .client()
            .request::<Scopes>(ScopesArguments {
                frame_id: self.inner.id,
            })
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.inner.scopes_fetched.set(false);
                return Err(err);
            }
        };

        if self.ensure_current().is_err() {
            // Resumed while the request was pending; drop the result.
            return Err(Error::Expired(self.inner.uri.clone()));
        }
        for dap_scope in response.scopes {
            Scope::create(self, dap_scope);
        }
        Ok(self.collect_scopes())
    }

    /// Evaluate an expression in this frame. The result is parented to the
    /// session so it outlives the frame.
    pub async fn evaluate(&self, expression: &str, context: &str) -> Result<EvaluateResult> {
        self.ensure_current()?;
        self.inner
            .session
            .evaluate_in_frame(Some(self.inner.id), expression, context)
            .await
    }

    fn collect_scopes(&self) -> Vec<Scope> {
        self.scopes_view()
            .iter()
            .into_iter()
            .filter_map(|e| e.as_scope())
            .collect()
    }

    pub(crate) fn ensure_current(&self) -> Result<()> {
        if self.inner.scope.is_disposed() || !self.inner.is_current.get() {
            return Err(Error::Expired(self.inner.uri.clone()));
        }
        Ok(())
    }

    pub(crate) fn expire(&self) {
        if !self.inner.is_current.get() {
            return;
        }
        self.inner.is_current.set(false);
        self.inner.store.update_field(&self.inner.uri, "is_current");
        for entity in self.scopes_view().iter() {
            if let Some(scope) = entity.as_scope() {
                scope.expire();
            }
        }
    }
}

impl EntityObject for Frame {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Int(self.inner.id)),
            "index" => Some(FieldValue::Int(self.inner.index as i64)),
            "name" => Some(FieldValue::from(self.inner.name.as_str())),
            "line" => Some(FieldValue::Int(self.inner.line)),
            "session_id" => Some(FieldValue::from(self.inner.session.id())),
            "is_current" => Some(FieldValue::Bool(self.inner.is_current.get())),
            "source_key" => self
                .inner
                .source
                .as_ref()
                .map(|source| FieldValue::from(source.key())),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        let mut fields = vec![
            ("session_id", self.field("session_id").unwrap()),
            ("is_current", self.field("is_current").unwrap()),
        ];
        if let Some(source_key) = self.field("source_key") {
            fields.push(("source_key", source_key));
        }
        fields
    }
}
