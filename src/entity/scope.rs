//! Variable scopes of a frame (Locals, Globals, registers and friends).

use crate::entity::frame::Frame;
use crate::entity::variable::{collect_children, fetch_children, Variable, VariableContainer};
use crate::entity::{edges, EntityKind, EntityObject, FieldValue};
use crate::error::{Error, Result};
use crate::proto::types::DapScope;
use crate::reactive::{DisposalScope, Signal};
use crate::session::Session;
use crate::store::{EntityStore, View};
use crate::uri::Uri;
use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

struct ScopeInner {
    uri: Uri,
    name: String,
    variables_reference: i64,
    expensive: bool,
    is_current: Signal<bool>,
    children_fetched: Cell<bool>,
    session: Session,
    store: EntityStore,
    scope: DisposalScope,
}

impl Scope {
    pub(crate) fn create(frame: &Frame, dap: DapScope) -> Scope {
        let session = frame.session().clone();
        let store = session.store().clone();
        let uri = frame.uri().child("scope", &dap.name);

        let scope = Scope {
            inner: Rc::new(ScopeInner {
                uri: uri.clone(),
                name: dap.name,
                variables_reference: dap.variables_reference,
                expensive: dap.expensive,
                is_current: Signal::new(true),
                children_fetched: Cell::new(false),
                session,
                store: store.clone(),
                scope: frame.disposal_scope().child(),
            }),
        };
        store.add(scope.clone(), &[(frame.uri().clone(), edges::SCOPES)]);
        scope
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn expensive(&self) -> bool {
        self.inner.expensive
    }

    pub fn is_current(&self) -> Signal<bool> {
        self.inner.is_current.clone()
    }

    pub fn variables_view(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::VARIABLES, EntityKind::Variable)
    }

    /// Lazily fetch this scope's variables, at most one wire request.
    pub async fn variables(&self) -> Result<Vec<Variable>> {
        fetch_children(self).await
    }

    pub(crate) fn expire(&self) {
        if !self.inner.is_current.get() {
            return;
        }
        self.inner.is_current.set(false);
        self.inner.store.update_field(&self.inner.uri, "is_current");
        for variable in collect_children(self) {
            variable.expire();
        }
    }
}

impl VariableContainer for Scope {
    fn session(&self) -> Session {
        self.inner.session.clone()
    }

    fn store(&self) -> EntityStore {
        self.inner.store.clone()
    }

    fn container_uri(&self) -> Uri {
        self.inner.uri.clone()
    }

    fn container_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn variables_reference(&self) -> i64 {
        self.inner.variables_reference
    }

    fn children_fetched(&self) -> bool {
        self.inner.children_fetched.get()
    }

    fn set_children_fetched(&self, fetched: bool) {
        self.inner.children_fetched.set(fetched);
    }

    fn ensure_current(&self) -> Result<()> {
        if self.inner.scope.is_disposed() || !self.inner.is_current.get() {
            return Err(Error::Expired(self.inner.uri.clone()));
        }
        Ok(())
    }
}

impl Scope {
    pub(crate) fn variables_reference(&self) -> i64 {
        self.inner.variables_reference
    }
}

impl EntityObject for Scope {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(FieldValue::from(self.inner.name.as_str())),
            "session_id" => Some(FieldValue::from(self.inner.session.id())),
            "is_current" => Some(FieldValue::Bool(self.inner.is_current.get())),
            "expensive" => Some(FieldValue::Bool(self.inner.expensive)),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![("session_id", self.field("session_id").unwrap())]
    }
}
