//! Debuggee threads and their stack history.

use crate::entity::{edges, EntityKind, EntityObject, FieldValue};
use crate::entity::stack::Stack;
use crate::error::{Error, Result};
use crate::proto::requests::{StackTrace, StackTraceArguments};
use crate::reactive::{DisposalScope, Signal};
use crate::session::Session;
use crate::store::{EntityStore, View};
use crate::uri::Uri;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ThreadExecState {
    Running,
    Stopped,
}

type StackFetchResult = Option<std::result::Result<Uri, String>>;

#[derive(Clone)]
pub struct Thread {
    inner: Rc<ThreadInner>,
}

struct ThreadInner {
    uri: Uri,
    id: i64,
    session: Session,
    store: EntityStore,
    scope: DisposalScope,
    name: Signal<String>,
    state: Signal<ThreadExecState>,
    stop_reason: Signal<Option<String>>,
    stack_sequence: Cell<i64>,
    current_stack: RefCell<Option<Stack>>,
    /// Shared in-flight stack fetch; concurrent callers await the same trace.
    stack_inflight: RefCell<Option<watch::Receiver<StackFetchResult>>>,
}

impl Thread {
    pub(crate) fn create(session: &Session, id: i64, name: String) -> Thread {
        let uri = session.uri().child("thread", id);
        let store = session.store().clone();
        let scope = session.disposal_scope().child();
        let thread = Thread {
            inner: Rc::new(ThreadInner {
                uri: uri.clone(),
                id,
                session: session.clone(),
                store: store.clone(),
                scope: scope.clone(),
                name: Signal::new(name),
                state: Signal::new(ThreadExecState::Running),
                stop_reason: Signal::new(None),
                stack_sequence: Cell::new(0),
                current_stack: RefCell::new(None),
                stack_inflight: RefCell::new(None),
            }),
        };

        // The current-stack handle must not outlive the thread, it would keep
        // an expired stack graph alive.
        let weak = Rc::downgrade(&thread.inner);
        scope.on_dispose(move || {
            if let Some(inner) = weak.upgrade() {
                inner.current_stack.borrow_mut().take();
                inner.stack_inflight.borrow_mut().take();
            }
        });

        store.add(thread.clone(), &[(session.uri().clone(), edges::THREADS)]);
        thread
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn id(&self) -> i64 {
        self.inner.id
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn name(&self) -> Signal<String> {
        self.inner.name.clone()
    }

    pub fn state(&self) -> Signal<ThreadExecState> {
        self.inner.state.clone()
    }

    pub fn stop_reason(&self) -> Signal<Option<String>> {
        self.inner.stop_reason.clone()
    }

    /// Stack history, newest first.
    pub fn stacks(&self) -> View {
        self.inner
            .store
            .view_from(&self.inner.uri, edges::STACKS, EntityKind::Stack)
    }

    pub fn current_stack(&self) -> Option<Stack> {
        self.inner.current_stack.borrow().clone()
    }

    /// Fetch the stack trace for the current stop, memoized per stop.
    ///
    /// Concurrent callers share a single in-flight `stackTrace` request.
    pub async fn stack(&self) -> Result<Stack> {
        if self.inner.state.get() != ThreadExecState::Stopped {
            return Err(Error::NotStopped(self.inner.id));
        }
        if let Some(stack) = self.inner.current_stack.borrow().clone() {
            return Ok(stack);
        }

        let pending = self.inner.stack_inflight.borrow().clone();
        if let Some(mut rx) = pending {
            loop {
                let settled = rx.borrow().clone();
                if let Some(result) = settled {
                    return match result {
                        Ok(uri) => self
                            .inner
                            .store
                            .get_uri(&uri)
                            .and_then(|e| e.as_stack())
                            .ok_or_else(|| {
                                Error::SharedFetch("stack disposed during fetch".to_string())
                            }),
                        Err(message) => Err(Error::SharedFetch(message)),
                    };
                }
                if rx.changed().await.is_err() {
                    return Err(Error::SharedFetch("stack fetch abandoned".to_string()));
                }
            }
        }

        let (tx, rx) = watch::channel(None);
        *self.inner.stack_inflight.borrow_mut() = Some(rx);
        let result = self.fetch_stack().await;
        self.inner.stack_inflight.borrow_mut().take();
        let _ = tx.send(Some(match &result {
            Ok(stack) => Ok(stack.uri().clone()),
            Err(err) => Err(err.to_string()),
        }));
        result
    }

    async fn fetch_stack(&self) -> Result<Stack> {
        let response = self
            .inner
            .session
            .client()
            .request::<StackTrace>(StackTraceArguments {
                thread_id: self.inner.id,
                start_frame: None,
                levels: None,
            })
            .await?;

        // The thread may have resumed or died while the request was pending;
        // the frame ids in the response are not safe to register then.
        if self.inner.scope.is_disposed() || self.inner.state.get() != ThreadExecState::Stopped {
            return Err(Error::Expired(self.inner.uri.clone()));
        }

        let sequence = self.inner.stack_sequence.get() + 1;
        self.inner.stack_sequence.set(sequence);
        let reason = self
            .inner
            .stop_reason
            .get()
            .unwrap_or_else(|| "unknown".to_string());

        let stack = Stack::create(self, sequence, reason, response.stack_frames);
        *self.inner.current_stack.borrow_mut() = Some(stack.clone());
        self.renumber_stacks();
        Ok(stack)
    }

    /// Reassign the reactive `index` signal of every stack, newest = 0.
    fn renumber_stacks(&self) {
        for (position, uri) in self
            .inner
            .store
            .edge_targets(&self.inner.uri, edges::STACKS)
            .iter()
            .enumerate()
        {
            if let Some(stack) = self.inner.store.get_uri(uri).and_then(|e| e.as_stack()) {
                stack.set_index(position as i64);
            }
        }
    }

    pub(crate) fn set_name(&self, name: String) {
        self.inner.name.set(name);
    }

    /// Thread stopped: expire the previous stack, a new stop never reuses it.
    pub(crate) fn mark_stopped(&self, reason: Option<String>) {
        if let Some(stack) = self.inner.current_stack.borrow_mut().take() {
            stack.expire();
        }
        self.inner.stop_reason.set(reason);
        self.inner.state.set(ThreadExecState::Stopped);
        self.inner.store.update_field(&self.inner.uri, "state");
    }

    pub(crate) fn mark_running(&self) {
        if let Some(stack) = self.inner.current_stack.borrow_mut().take() {
            stack.expire();
        }
        self.inner.stop_reason.set(None);
        self.inner.state.set(ThreadExecState::Running);
        self.inner.store.update_field(&self.inner.uri, "state");
    }

    pub(crate) fn dispose(&self) {
        self.inner.store.dispose_entity(&self.inner.uri);
    }
}

impl EntityObject for Thread {
    fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    fn disposal_scope(&self) -> DisposalScope {
        self.inner.scope.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(FieldValue::Int(self.inner.id)),
            "key" => Some(FieldValue::from(format!(
                "{}:{}",
                self.inner.session.id(),
                self.inner.id
            ))),
            "session_id" => Some(FieldValue::from(self.inner.session.id())),
            "state" => Some(FieldValue::from(self.inner.state.get().to_string())),
            "name" => Some(FieldValue::from(self.inner.name.get())),
            _ => None,
        }
    }

    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("key", self.field("key").unwrap()),
            ("session_id", self.field("session_id").unwrap()),
            ("state", self.field("state").unwrap()),
        ]
    }
}
