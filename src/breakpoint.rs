//! User breakpoints and their per-session bindings.
//!
//! A breakpoint is declared once, globally, against a source. Every session
//! that coexists with it gets exactly one Binding carrying the adapter's
//! verification result: the DAP id, the adjusted location, hit state and the
//! frame that hit it.

use crate::entity::{edges, EntityObject, FieldValue};
use crate::reactive::{DisposalScope, Signal};
use crate::session::Session;
use crate::source::Source;
use crate::store::EntityStore;
use crate::uri::Uri;
use std::rc::Rc;

/// Optional attributes of a new breakpoint.
#[derive(Debug, Clone, Default)]
pub struct BreakpointOptions {
    pub column: Option<i64>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

#[derive(Clone)]
pub struct Breakpoint {
    inner: Rc<BreakpointInner>,
}

struct BreakpointInner {
    uri: Uri,
    id: i64,
    source: Source,
    line: i64,
    column: Option<i64>,
    condition: Signal<Option<String>>,
    hit_condition: Signal<Option<String>>,
    log_message: Signal<Option<String>>,
    enabled: Signal<bool>,
    store: EntityStore,
    scope: DisposalScope,
}

impl Breakpoint {
    pub(crate) fn create(
        store: &EntityStore,
        id: i64,
        source: &Source,
        line: i64,
        options: BreakpointOptions,
    ) -> Breakpoint {
        let uri = Uri::root("breakpoint", &id.to_string());
        let breakpoint = Breakpoint {
            inner: Rc::new(BreakpointInner {
                uri,
                id,
                source: source.clone(),
                line,
                column: options.column,
                condition: Signal::new(options.condition),
                hit_condition: Signal::new(options.hit_condition),
                log_message: Signal::new(options.log_message),
                enabled: Signal::new(true),
                store: store.clone(),
                scope: DisposalScope::new(),
            }),
        };
        store.add(breakpoint.clone(), &[]);
        breakpoint
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn id(&self) -> i64 {
        self.inner.id
    }

    pub fn source(&self) -> &Source {
        &self.inner.source
    }

    pub fn line(&self) -> i64 {
        self.inner.line
    }

    pub fn column(&self) -> Option<i64> {
        self.inner.column
    }

    pub fn condition(&self) -> Signal<Option<String>> {
        self.inner.condition.clone()
    }

    pub fn hit_condition(&self) -> Signal<Option<String>> {
        self.inner.hit_condition.clone()
    }

    pub fn log_message(&self) -> Signal<Option<String>> {
        self.inner.log_message.clone()
    }

    /// Disabled breakpoints are excluded from `setBreakpoints` payloads.
    pub fn enabled(&self) -> Signal<bool> {
        self.inner.enabled.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.set(enabled);
        self.inner.store.update_field(&self.inner.uri, "enabled");
    }

    pub(crate) fn disposal_scope_ref(&self) -> &DisposalScope {
        &self.inner.scope
    }
}

impl EntityObject for Breakpoint {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Int(self.inner.id)),
            "source_key" => Some(FieldValue::from(self.inner.source.key())),
            "line" => Some(FieldValue::Int(self.inner.line)),
            "enabled" => Some(FieldValue::Bool(self.inner.enabled.get())),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("source_key", self.field("source_key").unwrap()),
            ("enabled", self.field("enabled").unwrap()),
        ]
    }
}

/// The per-session materialization of a breakpoint.
#[derive(Clone)]
pub struct Binding {
    inner: Rc<BindingInner>,
}

struct BindingInner {
    uri: Uri,
    breakpoint: Breakpoint,
    session: Session,
    dap_id: Signal<Option<i64>>,
    verified: Signal<bool>,
    message: Signal<Option<String>>,
    actual_line: Signal<Option<i64>>,
    actual_column: Signal<Option<i64>>,
    hit: Signal<bool>,
    active_frame: Signal<Option<Uri>>,
    /// Derived `display:line`, adapter-adjusted position winning.
    location: Signal<String>,
    store: EntityStore,
    scope: DisposalScope,
}

impl Binding {
    pub(crate) fn create(session: &Session, breakpoint: &Breakpoint) -> Binding {
        let store = session.store().clone();
        let uri = session.uri().child("binding", breakpoint.id());
        let location = format!(
            "{}:{}",
            breakpoint.source().display_name(),
            breakpoint.line()
        );
        let binding = Binding {
            inner: Rc::new(BindingInner {
                uri: uri.clone(),
                breakpoint: breakpoint.clone(),
                session: session.clone(),
                dap_id: Signal::new(None),
                verified: Signal::new(false),
                message: Signal::new(None),
                actual_line: Signal::new(None),
                actual_column: Signal::new(None),
                hit: Signal::new(false),
                active_frame: Signal::new(None),
                location: Signal::new(location),
                store: store.clone(),
                scope: session.disposal_scope().child(),
            }),
        };
        // Parented to both owners; disposal is idempotent so whichever side
        // goes down first wins.
        store.add(
            binding.clone(),
            &[
                (session.uri().clone(), edges::BINDINGS),
                (breakpoint.uri().clone(), edges::BINDINGS),
            ],
        );
        binding
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn breakpoint(&self) -> &Breakpoint {
        &self.inner.breakpoint
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn session_id(&self) -> String {
        self.inner.session.id().to_string()
    }

    pub fn dap_id(&self) -> Signal<Option<i64>> {
        self.inner.dap_id.clone()
    }

    pub fn verified(&self) -> Signal<bool> {
        self.inner.verified.clone()
    }

    pub fn message(&self) -> Signal<Option<String>> {
        self.inner.message.clone()
    }

    pub fn actual_line(&self) -> Signal<Option<i64>> {
        self.inner.actual_line.clone()
    }

    pub fn actual_column(&self) -> Signal<Option<i64>> {
        self.inner.actual_column.clone()
    }

    pub fn hit(&self) -> Signal<bool> {
        self.inner.hit.clone()
    }

    pub fn active_frame(&self) -> Signal<Option<Uri>> {
        self.inner.active_frame.clone()
    }

    pub fn location(&self) -> Signal<String> {
        self.inner.location.clone()
    }

    /// Adapter-adjusted line when present, declared line otherwise.
    pub fn effective_line(&self) -> i64 {
        self.inner
            .actual_line
            .get()
            .unwrap_or_else(|| self.inner.breakpoint.line())
    }

    pub fn effective_column(&self) -> Option<i64> {
        self.inner
            .actual_column
            .get()
            .or_else(|| self.inner.breakpoint.column())
    }

    pub(crate) fn apply_verification(&self, dap: &crate::proto::types::DapBreakpoint) {
        if let Some(id) = dap.id {
            self.inner.dap_id.set(Some(id));
        }
        self.inner.verified.set(dap.verified);
        self.inner.message.set(dap.message.clone());
        if dap.line.is_some() {
            self.inner.actual_line.set(dap.line);
        }
        if dap.column.is_some() {
            self.inner.actual_column.set(dap.column);
        }
        self.refresh_location();
        self.inner.store.update_field(&self.inner.uri, "verified");
    }

    pub(crate) fn mark_unverified(&self, message: &str) {
        self.inner.verified.set(false);
        self.inner.message.set(Some(message.to_string()));
        self.inner.store.update_field(&self.inner.uri, "verified");
    }

    pub(crate) fn set_hit(&self, hit: bool) {
        self.inner.hit.set(hit);
        if !hit {
            self.inner.active_frame.set(None);
        }
        self.inner.store.update_field(&self.inner.uri, "hit");
    }

    pub(crate) fn set_active_frame(&self, frame: Option<Uri>) {
        self.inner.active_frame.set(frame);
    }

    fn refresh_location(&self) {
        let location = format!(
            "{}:{}",
            self.inner.breakpoint.source().display_name(),
            self.effective_line()
        );
        self.inner.location.set(location);
    }
}

impl EntityObject for Binding {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "session_id" => Some(FieldValue::from(self.inner.session.id())),
            "breakpoint_id" => Some(FieldValue::Int(self.inner.breakpoint.id())),
            "source_key" => Some(FieldValue::from(self.inner.breakpoint.source().key())),
            "verified" => Some(FieldValue::Bool(self.inner.verified.get())),
            "hit" => Some(FieldValue::Bool(self.inner.hit.get())),
            "dap_key" => self.inner.dap_id.get().map(|id| {
                FieldValue::from(format!("{}:{}", self.inner.session.id(), id))
            }),
            "location_key" => Some(FieldValue::from(format!(
                "{}|{}:{}",
                self.inner.session.id(),
                self.inner.breakpoint.source().key(),
                self.effective_line()
            ))),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        let mut fields = vec![
            ("session_id", self.field("session_id").unwrap()),
            ("breakpoint_id", self.field("breakpoint_id").unwrap()),
            ("source_key", self.field("source_key").unwrap()),
            ("hit", self.field("hit").unwrap()),
            ("location_key", self.field("location_key").unwrap()),
        ];
        if let Some(dap_key) = self.field("dap_key") {
            fields.push(("dap_key", dap_key));
        }
        fields
    }
}
