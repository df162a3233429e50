//! Global source registry and per-session source bindings.
//!
//! Sources are deduplicated across sessions by a correlation key: the path
//! when one exists, else name plus a checksum digest, else the bare name.
//! A `sourceReference` is session-local and never portable; it lives on the
//! SourceBinding, not on the Source.

use crate::entity::{edges, EntityObject, FieldValue};
use crate::error::{Error, Result};
use crate::ids;
use crate::proto::requests::{SourceArguments, SourceContent};
use crate::proto::types::DapSource;
use crate::reactive::DisposalScope;
use crate::session::Session;
use crate::store::EntityStore;
use crate::uri::Uri;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Derive the cross-session correlation key of a DAP source descriptor.
pub fn correlation_key(dap: &DapSource) -> String {
    if let Some(path) = &dap.path {
        return path.clone();
    }
    if let Some(name) = &dap.name {
        if let Some(checksums) = &dap.checksums {
            if !checksums.is_empty() {
                let joined = checksums
                    .iter()
                    .map(|c| format!("{}={}", c.algorithm, c.checksum))
                    .collect::<Vec<_>>()
                    .join(",");
                return format!("{name}:{}", ids::stable_hash(&joined));
            }
        }
        return name.clone();
    }
    format!(
        "sourceReference:{}",
        dap.source_reference.unwrap_or_default()
    )
}

#[derive(Clone)]
pub struct Source {
    inner: Rc<SourceInner>,
}

struct SourceInner {
    uri: Uri,
    key: String,
    path: Option<String>,
    name: Option<String>,
    origin: RefCell<Option<String>>,
    presentation_hint: RefCell<Option<String>>,
    content: RefCell<Option<String>>,
    store: EntityStore,
    scope: DisposalScope,
}

impl Source {
    pub(crate) fn create(store: &EntityStore, dap: &DapSource) -> Source {
        let key = correlation_key(dap);
        let uri = Uri::root("source", &ids::stable_hash(&key));
        let source = Source {
            inner: Rc::new(SourceInner {
                uri,
                key,
                path: dap.path.clone(),
                name: dap.name.clone(),
                origin: RefCell::new(dap.origin.clone()),
                presentation_hint: RefCell::new(dap.presentation_hint.clone()),
                content: RefCell::new(None),
                store: store.clone(),
                scope: DisposalScope::new(),
            }),
        };
        store.add(source.clone(), &[]);
        source
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn path(&self) -> Option<&str> {
        self.inner.path.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn origin(&self) -> Option<String> {
        self.inner.origin.borrow().clone()
    }

    /// Path when known, else the adapter-provided name.
    pub fn display_name(&self) -> &str {
        self.inner
            .path
            .as_deref()
            .or(self.inner.name.as_deref())
            .unwrap_or(&self.inner.key)
    }

    /// A source without a filesystem path is served by content and addressed
    /// through per-session references.
    pub fn is_virtual(&self) -> bool {
        self.inner.path.is_none()
    }

    pub(crate) fn absorb_hints(&self, dap: &DapSource) {
        if dap.origin.is_some() {
            *self.inner.origin.borrow_mut() = dap.origin.clone();
        }
        if dap.presentation_hint.is_some() {
            *self.inner.presentation_hint.borrow_mut() = dap.presentation_hint.clone();
        }
    }

    pub(crate) fn cached_content(&self) -> Option<String> {
        self.inner.content.borrow().clone()
    }

    pub(crate) fn cache_content(&self, content: String) {
        *self.inner.content.borrow_mut() = Some(content);
    }

    pub(crate) fn invalidate_content(&self) {
        self.inner.content.borrow_mut().take();
    }
}

impl EntityObject for Source {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "key" => Some(FieldValue::from(self.inner.key.as_str())),
            "path" => self.inner.path.as_deref().map(FieldValue::from),
            "name" => self.inner.name.as_deref().map(FieldValue::from),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        let mut fields = vec![("key", self.field("key").unwrap())];
        if let Some(path) = self.field("path") {
            fields.push(("path", path));
        }
        fields
    }
}

/// Per-(source, session) state: the session-local `sourceReference` and the
/// adapter's opaque data blob.
#[derive(Clone)]
pub struct SourceBinding {
    inner: Rc<SourceBindingInner>,
}

struct SourceBindingInner {
    uri: Uri,
    source: Source,
    session: Session,
    source_reference: Cell<i64>,
    adapter_data: RefCell<Option<Value>>,
    store: EntityStore,
    scope: DisposalScope,
}

impl SourceBinding {
    pub(crate) fn create(session: &Session, source: &Source, dap: &DapSource) -> SourceBinding {
        let store = session.store().clone();
        let uri = session
            .uri()
            .child("source-binding", ids::stable_hash(source.key()));
        let binding = SourceBinding {
            inner: Rc::new(SourceBindingInner {
                uri: uri.clone(),
                source: source.clone(),
                session: session.clone(),
                source_reference: Cell::new(dap.source_reference.unwrap_or(0)),
                adapter_data: RefCell::new(dap.adapter_data.clone()),
                store: store.clone(),
                scope: session.disposal_scope().child(),
            }),
        };
        store.add(
            binding.clone(),
            &[
                (session.uri().clone(), edges::SOURCE_BINDINGS),
                (source.uri().clone(), edges::SOURCE_BINDINGS),
            ],
        );
        binding
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn source(&self) -> &Source {
        &self.inner.source
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn source_reference(&self) -> i64 {
        self.inner.source_reference.get()
    }

    pub fn adapter_data(&self) -> Option<Value> {
        self.inner.adapter_data.borrow().clone()
    }

    pub(crate) fn update(&self, dap: &DapSource) {
        if let Some(reference) = dap.source_reference {
            self.inner.source_reference.set(reference);
            self.inner.store.update_field(&self.inner.uri, "source_reference");
        }
        if dap.adapter_data.is_some() {
            *self.inner.adapter_data.borrow_mut() = dap.adapter_data.clone();
        }
    }

    /// Fetch virtual source content through the session-local reference.
    pub async fn content(&self) -> Result<String> {
        if let Some(content) = self.inner.source.cached_content() {
            return Ok(content);
        }
        let reference = self.inner.source_reference.get();
        if reference <= 0 {
            return Err(Error::UnsupportedCapability("source"));
        }
        let response = self
            .inner
            .session
            .client()
            .request::<SourceContent>(SourceArguments {
                source: Some(self.descriptor()),
                source_reference: reference,
            })
            .await?;
        self.inner.source.cache_content(response.content.clone());
        Ok(response.content)
    }

    /// The wire descriptor this session must use for the source.
    pub(crate) fn descriptor(&self) -> DapSource {
        DapSource {
            name: self.inner.source.name().map(str::to_string),
            path: self.inner.source.path().map(str::to_string),
            source_reference: match self.inner.source_reference.get() {
                0 => None,
                reference => Some(reference),
            },
            adapter_data: self.adapter_data(),
            ..Default::default()
        }
    }

    pub(crate) fn dispose(&self) {
        self.inner.store.dispose_entity(&self.inner.uri);
    }
}

impl EntityObject for SourceBinding {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "session_id" => Some(FieldValue::from(self.inner.session.id())),
            "source_key" => Some(FieldValue::from(self.inner.source.key())),
            "key" => Some(FieldValue::from(format!(
                "{}|{}",
                self.inner.session.id(),
                self.inner.source.key()
            ))),
            "source_reference" => Some(FieldValue::Int(self.inner.source_reference.get())),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("session_id", self.field("session_id").unwrap()),
            ("source_key", self.field("source_key").unwrap()),
            ("key", self.field("key").unwrap()),
        ]
    }
}
