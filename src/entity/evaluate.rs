//! Evaluation results. Parented to the session, not the frame: a watch
//! expression survives the frame it was evaluated in, even though its
//! `variablesReference` expires with the stop.

use crate::entity::variable::{collect_children, fetch_children, Variable, VariableContainer};
use crate::entity::{edges, EntityKind, EntityObject, FieldValue};
use crate::error::{Error, Result};
use crate::reactive::{DisposalScope, Signal};
use crate::session::Session;
use crate::store::{EntityStore, View};
use crate::uri::Uri;
use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone)]
pub struct EvaluateResult {
    inner: Rc<EvaluateInner>,
}

impl std::fmt::Debug for EvaluateResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluateResult")
            .field("uri", &self.inner.uri)
            .finish()
    }
}

struct EvaluateInner {
    uri: Uri,
    id: i64,
    expression: String,
    context: String,
    result: Signal<String>,
    ty: Signal<Option<String>>,
    variables_reference: Cell<i64>,
    is_current: Signal<bool>,
    children_fetched: Cell<bool>,
    session: Session,
    store: EntityStore,
    scope: DisposalScope,
}

impl EvaluateResult {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        session: &Session,
        id: i64,
        expression: String,
        context: String,
        result: String,
        ty: Option<String>,
        variables_reference: i64,
    ) -> EvaluateResult {
        let store = session.store().clone();
        let uri = session.uri().child("eval", id);
        let evaluate = EvaluateResult {
            inner: Rc::new(EvaluateInner {
                uri: uri.clone(),
                id,
                expression,
                context,
                result: Signal::new(result),
                ty: Signal::new(ty),
                variables_reference: Cell::new(variables_reference),
                is_current: Signal::new(true),
                children_fetched: Cell::new(false),
                session: session.clone(),
                store: store.clone(),
                scope: session.disposal_scope().child(),
            }),
        };
        store.add(
            evaluate.clone(),
            &[(session.uri().clone(), edges::EVALUATIONS)],
        );
        evaluate
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn id(&self) -> i64 {
        self.inner.id
    }

    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    pub fn context(&self) -> &str {
        &self.inner.context
    }

    pub fn result(&self) -> Signal<String> {
        self.inner.result.clone()
    }

    pub fn ty(&self) -> Signal<Option<String>> {
        self.inner.ty.clone()
    }

    /// False once execution has resumed; the adapter reference is gone then.
    pub fn is_current(&self) -> Signal<bool> {
        self.inner.is_current.clone()
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

impl VariableContainer for EvaluateResult {
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
        self.inner.variables_reference.get()
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

impl EntityObject for EvaluateResult {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Int(self.inner.id)),
            "expression" => Some(FieldValue::from(self.inner.expression.as_str())),
            "context" => Some(FieldValue::from(self.inner.context.as_str())),
            "session_id" => Some(FieldValue::from(self.inner.session.id())),
            "is_current" => Some(FieldValue::Bool(self.inner.is_current.get())),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![("session_id", self.field("session_id").unwrap())]
    }
}
