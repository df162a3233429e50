//! Output events. Outputs carrying a `variablesReference` are variable
//! containers themselves (structured console logging).

use crate::entity::variable::{collect_children, fetch_children, Variable, VariableContainer};
use crate::entity::{edges, EntityKind, EntityObject, FieldValue};
use crate::error::{Error, Result};
use crate::proto::events::OutputEventBody;
use crate::reactive::{DisposalScope, Signal};
use crate::session::Session;
use crate::store::{EntityStore, View};
use crate::uri::Uri;
use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone)]
pub struct Output {
    inner: Rc<OutputInner>,
}

struct OutputInner {
    uri: Uri,
    index: i64,
    category: String,
    output: String,
    variables_reference: i64,
    is_current: Signal<bool>,
    children_fetched: Cell<bool>,
    session: Session,
    store: EntityStore,
    scope: DisposalScope,
}

impl Output {
    pub(crate) fn create(session: &Session, index: i64, body: OutputEventBody) -> Output {
        let store = session.store().clone();
        let uri = session.uri().child("output", index);
        let output = Output {
            inner: Rc::new(OutputInner {
                uri: uri.clone(),
                index,
                category: body.category.unwrap_or_else(|| "console".to_string()),
                output: body.output,
                variables_reference: body.variables_reference.unwrap_or(0),
                is_current: Signal::new(true),
                children_fetched: Cell::new(false),
                session: session.clone(),
                store: store.clone(),
                scope: session.disposal_scope().child(),
            }),
        };
        store.add(output.clone(), &[(session.uri().clone(), edges::OUTPUTS)]);
        output
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn index(&self) -> i64 {
        self.inner.index
    }

    pub fn category(&self) -> &str {
        &self.inner.category
    }

    pub fn output(&self) -> &str {
        &self.inner.output
    }

    pub fn variables_reference(&self) -> i64 {
        self.inner.variables_reference
    }

    pub fn children_view(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::VARIABLES, EntityKind::Variable)
    }

    pub async fn children(&self) -> Result<Vec<Variable>> {
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

impl VariableContainer for Output {
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

impl EntityObject for Output {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "index" => Some(FieldValue::Int(self.inner.index)),
            "category" => Some(FieldValue::from(self.inner.category.as_str())),
            "session_id" => Some(FieldValue::from(self.inner.session.id())),
            "is_current" => Some(FieldValue::Bool(self.inner.is_current.get())),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("session_id", self.field("session_id").unwrap()),
            ("category", self.field("category").unwrap()),
        ]
    }
}
