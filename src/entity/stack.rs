//! Stack traces. One stack per stop; older stacks are kept as history and
//! marked expired.

use crate::entity::frame::Frame;
use crate::entity::thread::Thread;
use crate::entity::{edges, EntityKind, EntityObject, FieldValue};
use crate::proto::types::DapStackFrame;
use crate::reactive::{DisposalScope, Signal};
use crate::session::Session;
use crate::store::{EntityStore, View};
use crate::uri::Uri;
use std::rc::Rc;

#[derive(Clone)]
pub struct Stack {
    inner: Rc<StackInner>,
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("uri", &self.inner.uri)
            .finish()
    }
}

struct StackInner {
    uri: Uri,
    thread_uri: Uri,
    thread_id: i64,
    sequence: i64,
    reason: String,
    /// 0 = newest; maintained by the owning thread on every new fetch.
    index: Signal<i64>,
    is_current: Signal<bool>,
    session: Session,
    store: EntityStore,
    scope: DisposalScope,
}

impl Stack {
    pub(crate) fn create(
        thread: &Thread,
        sequence: i64,
        reason: String,
        frames: Vec<DapStackFrame>,
    ) -> Stack {
        let uri = thread.uri().child("stack", sequence);
        let session = thread.session().clone();
        let store = session.store().clone();
        let scope = thread.disposal_scope().child();
        let stack = Stack {
            inner: Rc::new(StackInner {
                uri: uri.clone(),
                thread_uri: thread.uri().clone(),
                thread_id: thread.id(),
                sequence,
                reason,
                index: Signal::new(0),
                is_current: Signal::new(true),
                session,
                store: store.clone(),
                scope,
            }),
        };

        store.add(stack.clone(), &[]);
        // Newest stack first.
        store.prepend_edge(thread.uri(), edges::STACKS, &uri);

        for (position, dap_frame) in frames.into_iter().enumerate() {
            Frame::create(&stack, position, dap_frame);
        }
        stack
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn thread_id(&self) -> i64 {
        self.inner.thread_id
    }

    pub fn sequence(&self) -> i64 {
        self.inner.sequence
    }

    pub fn reason(&self) -> &str {
        &self.inner.reason
    }

    pub fn index(&self) -> Signal<i64> {
        self.inner.index.clone()
    }

    pub fn is_current(&self) -> Signal<bool> {
        self.inner.is_current.clone()
    }

    pub(crate) fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Frames, top (index 0) first.
    pub fn frames(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::FRAMES, EntityKind::Frame)
    }

    pub fn top_frame(&self) -> Option<Frame> {
        self.frames().iter().into_iter().find_map(|e| e.as_frame())
    }

    pub(crate) fn set_index(&self, index: i64) {
        self.inner.index.set(index);
    }

    /// Expiration cascade: this stack and everything under it stops being
    /// current, exactly once.
    pub fn expire(&self) {
        if !self.inner.is_current.get() {
            return;
        }
        self.inner.is_current.set(false);
        self.inner.store.update_field(&self.inner.uri, "is_current");
        for entity in self.frames().iter() {
            if let Some(frame) = entity.as_frame() {
                frame.expire();
            }
        }
    }
}

impl EntityObject for Stack {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "sequence" => Some(FieldValue::Int(self.inner.sequence)),
            "thread_id" => Some(FieldValue::Int(self.inner.thread_id)),
            "thread_uri" => Some(FieldValue::from(&self.inner.thread_uri)),
            "session_id" => Some(FieldValue::from(self.inner.session.id())),
            "reason" => Some(FieldValue::from(self.inner.reason.as_str())),
            "is_current" => Some(FieldValue::Bool(self.inner.is_current.get())),
            "index" => Some(FieldValue::Int(self.inner.index.get())),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("thread_uri", self.field("thread_uri").unwrap()),
            ("session_id", self.field("session_id").unwrap()),
            ("is_current", self.field("is_current").unwrap()),
        ]
    }
}
