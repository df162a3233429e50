//! Exception break filters. The catalog is global per adapter logical type,
//! user preference included; verification is per session through bindings.

use crate::entity::{edges, EntityObject, FieldValue};
use crate::proto::types::ExceptionBreakpointsFilter;
use crate::reactive::{DisposalScope, Signal};
use crate::session::Session;
use crate::store::EntityStore;
use crate::uri::Uri;
use std::rc::Rc;

#[derive(Clone)]
pub struct ExceptionFilter {
    inner: Rc<ExceptionFilterInner>,
}

struct ExceptionFilterInner {
    uri: Uri,
    filter_id: String,
    adapter_type: String,
    label: String,
    supports_condition: bool,
    enabled: Signal<bool>,
    store: EntityStore,
    scope: DisposalScope,
}

impl ExceptionFilter {
    pub(crate) fn create(
        store: &EntityStore,
        adapter_type: &str,
        declared: &ExceptionBreakpointsFilter,
    ) -> ExceptionFilter {
        let uri = Uri::root(
            "exception",
            &format!("{adapter_type}:{}", declared.filter),
        );
        let filter = ExceptionFilter {
            inner: Rc::new(ExceptionFilterInner {
                uri,
                filter_id: declared.filter.clone(),
                adapter_type: adapter_type.to_string(),
                label: declared.label.clone(),
                supports_condition: declared.supports_condition.unwrap_or(false),
                enabled: Signal::new(declared.enabled_by_default.unwrap_or(false)),
                store: store.clone(),
                scope: DisposalScope::new(),
            }),
        };
        store.add(filter.clone(), &[]);
        filter
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn filter_id(&self) -> &str {
        &self.inner.filter_id
    }

    pub fn adapter_type(&self) -> &str {
        &self.inner.adapter_type
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn supports_condition(&self) -> bool {
        self.inner.supports_condition
    }

    /// User preference; toggling re-pushes the filter set on every session of
    /// this adapter type.
    pub fn enabled(&self) -> Signal<bool> {
        self.inner.enabled.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.set(enabled);
        self.inner.store.update_field(&self.inner.uri, "enabled");
    }
}

impl EntityObject for ExceptionFilter {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "filter_id" => Some(FieldValue::from(self.inner.filter_id.as_str())),
            "adapter_type" => Some(FieldValue::from(self.inner.adapter_type.as_str())),
            "enabled" => Some(FieldValue::Bool(self.inner.enabled.get())),
            "key" => Some(FieldValue::from(format!(
                "{}:{}",
                self.inner.adapter_type, self.inner.filter_id
            ))),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("adapter_type", self.field("adapter_type").unwrap()),
            ("key", self.field("key").unwrap()),
        ]
    }
}

#[derive(Clone)]
pub struct ExceptionFilterBinding {
    inner: Rc<ExceptionFilterBindingInner>,
}

struct ExceptionFilterBindingInner {
    uri: Uri,
    filter: ExceptionFilter,
    session: Session,
    verified: Signal<bool>,
    message: Signal<Option<String>>,
    hit: Signal<bool>,
    dap_id: Signal<Option<i64>>,
    condition: Signal<Option<String>>,
    store: EntityStore,
    scope: DisposalScope,
}

impl ExceptionFilterBinding {
    pub(crate) fn create(session: &Session, filter: &ExceptionFilter) -> ExceptionFilterBinding {
        let store = session.store().clone();
        let uri = session.uri().child("exception", filter.filter_id());
        let binding = ExceptionFilterBinding {
            inner: Rc::new(ExceptionFilterBindingInner {
                uri: uri.clone(),
                filter: filter.clone(),
                session: session.clone(),
                verified: Signal::new(false),
                message: Signal::new(None),
                hit: Signal::new(false),
                dap_id: Signal::new(None),
                condition: Signal::new(None),
                store: store.clone(),
                scope: session.disposal_scope().child(),
            }),
        };
        store.add(
            binding.clone(),
            &[
                (session.uri().clone(), edges::EXCEPTION_BINDINGS),
                (filter.uri().clone(), edges::BINDINGS),
            ],
        );
        binding
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn filter(&self) -> &ExceptionFilter {
        &self.inner.filter
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn verified(&self) -> Signal<bool> {
        self.inner.verified.clone()
    }

    pub fn message(&self) -> Signal<Option<String>> {
        self.inner.message.clone()
    }

    pub fn hit(&self) -> Signal<bool> {
        self.inner.hit.clone()
    }

    pub fn dap_id(&self) -> Signal<Option<i64>> {
        self.inner.dap_id.clone()
    }

    /// Per-session condition, pushed when the adapter supports filter options.
    pub fn condition(&self) -> Signal<Option<String>> {
        self.inner.condition.clone()
    }

    pub fn set_condition(&self, condition: Option<String>) {
        self.inner.condition.set(condition);
        self.inner.session.schedule_exception_push();
    }

    pub(crate) fn apply_verification(&self, dap: &crate::proto::types::DapBreakpoint) {
        if let Some(id) = dap.id {
            self.inner.dap_id.set(Some(id));
        }
        self.inner.verified.set(dap.verified);
        self.inner.message.set(dap.message.clone());
        self.inner.store.update_field(&self.inner.uri, "verified");
    }

    pub(crate) fn set_hit(&self, hit: bool) {
        self.inner.hit.set(hit);
        self.inner.store.update_field(&self.inner.uri, "hit");
    }
}

impl EntityObject for ExceptionFilterBinding {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "session_id" => Some(FieldValue::from(self.inner.session.id())),
            "filter_id" => Some(FieldValue::from(self.inner.filter.filter_id())),
            "verified" => Some(FieldValue::Bool(self.inner.verified.get())),
            "hit" => Some(FieldValue::Bool(self.inner.hit.get())),
            "dap_key" => self.inner.dap_id.get().map(|id| {
                FieldValue::from(format!("{}:{}", self.inner.session.id(), id))
            }),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        let mut fields = vec![
            ("session_id", self.field("session_id").unwrap()),
            ("filter_id", self.field("filter_id").unwrap()),
        ];
        if let Some(dap_key) = self.field("dap_key") {
            fields.push(("dap_key", dap_key));
        }
        fields
    }
}
