//! Variables and the shared fetch path for everything that can hold them.

use crate::entity::{edges, EntityKind, EntityObject, FieldValue};
use crate::error::{Error, Result};
use crate::proto::requests::{
    SetExpression, SetExpressionArguments, SetVariable, SetVariableArguments, Variables,
    VariablesArguments,
};
use crate::proto::types::DapVariable;
use crate::reactive::{DisposalScope, Signal};
use crate::session::Session;
use crate::store::{EntityStore, View};
use crate::uri::Uri;
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;

/// Capability trait for entities that own a `variablesReference`: scopes,
/// structured variables, evaluation results and outputs with children.
pub(crate) trait VariableContainer {
    fn session(&self) -> Session;
    fn store(&self) -> EntityStore;
    /// Edge source for the `variables` edge.
    fn container_uri(&self) -> Uri;
    /// URI under which child `var:` segments nest (the nearest non-variable
    /// ancestor, so variable paths stay flat: `var:x.y.z`).
    fn var_base_uri(&self) -> Uri {
        self.container_uri()
    }
    fn child_path(&self, name: &str) -> String {
        name.to_string()
    }
    fn container_scope(&self) -> DisposalScope;
    fn variables_reference(&self) -> i64;
    fn children_fetched(&self) -> bool;
    fn set_children_fetched(&self, fetched: bool);
    fn ensure_current(&self) -> Result<()>;
}

/// Memoized-lazy child fetch shared by all containers. The fetched flag is
/// set before awaiting, so concurrent callers issue at most one request.
pub(crate) async fn fetch_children(container: &dyn VariableContainer) -> Result<Vec<Variable>> {
    container.ensure_current()?;
    let reference = container.variables_reference();
    if reference <= 0 {
        return Ok(Vec::new());
    }
    if container.children_fetched() {
        return Ok(collect_children(container));
    }
    container.set_children_fetched(true);

    let response = container
        .session()
        .client()
        .request::<Variables>(VariablesArguments {
            variables_reference: reference,
            filter: None,
            start: None,
            count: None,
        })
        .await;
    let response = match response {
        Ok(response) => response,
        Err(err) => {
            container.set_children_fetched(false);
            return Err(err);
        }
    };

    if container.ensure_current().is_err() {
        return Err(Error::Expired(container.container_uri()));
    }
    for dap_variable in response.variables {
        Variable::create(container, dap_variable);
    }
    Ok(collect_children(container))
}

pub(crate) fn collect_children(container: &dyn VariableContainer) -> Vec<Variable> {
    container
        .store()
        .view_from(&container.container_uri(), edges::VARIABLES, EntityKind::Variable)
        .iter()
        .into_iter()
        .filter_map(|e| e.as_variable())
        .collect()
}

#[derive(Clone)]
pub struct Variable {
    inner: Rc<VariableInner>,
}

impl std::fmt::Debug for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variable")
            .field("uri", &self.inner.uri)
            .finish()
    }
}

struct VariableInner {
    uri: Uri,
    base_uri: Uri,
    path: String,
    name: String,
    value: Signal<String>,
    ty: Signal<Option<String>>,
    variables_reference: Cell<i64>,
    evaluate_name: Option<String>,
    presentation_hint: Option<Value>,
    is_current: Signal<bool>,
    children_fetched: Cell<bool>,
    container_uri: Uri,
    session: Session,
    store: EntityStore,
    scope: DisposalScope,
}

impl Variable {
    pub(crate) fn create(container: &dyn VariableContainer, dap: DapVariable) -> Variable {
        let store = container.store();
        let base_uri = container.var_base_uri();
        let mut path = container.child_path(&dap.name);
        let mut uri = base_uri.child("var", &path);
        // Adapters may repeat names within one container; URIs must not.
        let mut ordinal = 1;
        while store.contains(&uri) {
            ordinal += 1;
            path = format!("{}#{ordinal}", container.child_path(&dap.name));
            uri = base_uri.child("var", &path);
        }

        let variable = Variable {
            inner: Rc::new(VariableInner {
                uri: uri.clone(),
                base_uri,
                path,
                name: dap.name,
                value: Signal::new(dap.value),
                ty: Signal::new(dap.ty),
                variables_reference: Cell::new(dap.variables_reference),
                evaluate_name: dap.evaluate_name,
                presentation_hint: dap.presentation_hint,
                is_current: Signal::new(true),
                children_fetched: Cell::new(false),
                container_uri: container.container_uri(),
                session: container.session(),
                store: store.clone(),
                scope: container.container_scope().child(),
            }),
        };
        store.add(
            variable.clone(),
            &[(container.container_uri(), edges::VARIABLES)],
        );
        variable
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn value(&self) -> Signal<String> {
        self.inner.value.clone()
    }

    pub fn ty(&self) -> Signal<Option<String>> {
        self.inner.ty.clone()
    }

    pub fn evaluate_name(&self) -> Option<&str> {
        self.inner.evaluate_name.as_deref()
    }

    pub fn presentation_hint(&self) -> Option<&Value> {
        self.inner.presentation_hint.as_ref()
    }

    pub fn variables_reference(&self) -> i64 {
        self.inner.variables_reference.get()
    }

    pub fn is_current(&self) -> Signal<bool> {
        self.inner.is_current.clone()
    }

    pub fn children_view(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::VARIABLES, EntityKind::Variable)
    }

    /// Lazily fetch structured children.
    pub async fn children(&self) -> Result<Vec<Variable>> {
        fetch_children(self).await
    }

    /// Write a new value through `setVariable` or `setExpression`.
    pub async fn set_value(&self, value: &str) -> Result<()> {
        self.ensure_current()?;
        let session = self.inner.session.clone();
        let capabilities = session.capabilities();

        let container = self.inner.store.get_uri(&self.inner.container_uri);
        let parent_reference = container.as_ref().and_then(|entity| match entity {
            crate::entity::Entity::Scope(scope) => Some(scope.variables_reference()),
            crate::entity::Entity::Variable(variable) => Some(variable.variables_reference()),
            _ => None,
        });

        let scope_parented = matches!(container, Some(crate::entity::Entity::Scope(_)));
        let use_set_variable = scope_parented
            && crate::proto::types::Capabilities::flag(capabilities.supports_set_variable);
        let use_set_expression = self.inner.evaluate_name.is_some()
            && crate::proto::types::Capabilities::flag(capabilities.supports_set_expression);

        let (new_value, new_type, new_reference) = if use_set_variable {
            let response = session
                .client()
                .request::<SetVariable>(SetVariableArguments {
                    variables_reference: parent_reference.unwrap_or(0),
                    name: self.inner.name.clone(),
                    value: value.to_string(),
                })
                .await?;
            (response.value, response.ty, response.variables_reference)
        } else if use_set_expression {
            let response = session
                .client()
                .request::<SetExpression>(SetExpressionArguments {
                    expression: self.inner.evaluate_name.clone().unwrap_or_default(),
                    value: value.to_string(),
                    frame_id: None,
                })
                .await?;
            (response.value, response.ty, response.variables_reference)
        } else if parent_reference.is_some()
            && crate::proto::types::Capabilities::flag(capabilities.supports_set_variable)
        {
            let response = session
                .client()
                .request::<SetVariable>(SetVariableArguments {
                    variables_reference: parent_reference.unwrap_or(0),
                    name: self.inner.name.clone(),
                    value: value.to_string(),
                })
                .await?;
            (response.value, response.ty, response.variables_reference)
        } else {
            return Err(Error::UnsupportedCapability("setVariable"));
        };

        self.ensure_current()?;
        self.inner.value.set(new_value);
        self.inner.ty.set(new_type);
        if let Some(reference) = new_reference {
            self.inner.variables_reference.set(reference);
        }
        // The children no longer reflect the value; refetch on next access.
        for child in collect_children(self) {
            self.inner.store.dispose_entity(child.uri());
        }
        self.inner.children_fetched.set(false);
        Ok(())
    }

    pub(crate) fn expire(&self) {
        if !self.inner.is_current.get() {
            return;
        }
        self.inner.is_current.set(false);
        self.inner.store.update_field(&self.inner.uri, "is_current");
        for entity in self.children_view().iter() {
            if let Some(variable) = entity.as_variable() {
                variable.expire();
            }
        }
    }

    fn ensure_current(&self) -> Result<()> {
        if self.inner.scope.is_disposed() || !self.inner.is_current.get() {
            return Err(Error::Expired(self.inner.uri.clone()));
        }
        Ok(())
    }
}

impl VariableContainer for Variable {
    fn session(&self) -> Session {
        self.inner.session.clone()
    }

    fn store(&self) -> EntityStore {
        self.inner.store.clone()
    }

    fn container_uri(&self) -> Uri {
        self.inner.uri.clone()
    }

    fn var_base_uri(&self) -> Uri {
        self.inner.base_uri.clone()
    }

    fn child_path(&self, name: &str) -> String {
        format!("{}.{}", self.inner.path, name)
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
        Variable::ensure_current(self)
    }
}

impl EntityObject for Variable {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(FieldValue::from(self.inner.name.as_str())),
            "path" => Some(FieldValue::from(self.inner.path.as_str())),
            "session_id" => Some(FieldValue::from(self.inner.session.id())),
            "is_current" => Some(FieldValue::Bool(self.inner.is_current.get())),
            "container_uri" => Some(FieldValue::from(&self.inner.container_uri)),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("session_id", self.field("session_id").unwrap()),
            ("container_uri", self.field("container_uri").unwrap()),
        ]
    }
}
