use crate::reactive::Subscription;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Per-entity disposal scope.
///
/// Scopes compose: a session scope is parent to all its threads. Disposal is
/// bottom-up, children first, then own teardown hooks in reverse registration
/// order.
#[derive(Clone)]
pub struct DisposalScope {
    inner: Rc<ScopeInner>,
}

struct ScopeInner {
    disposed: Cell<bool>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    children: RefCell<Vec<DisposalScope>>,
}

impl Default for DisposalScope {
    fn default() -> Self {
        Self::new()
    }
}

impl DisposalScope {
    pub fn new() -> Self {
        DisposalScope {
            inner: Rc::new(ScopeInner {
                disposed: Cell::new(false),
                cleanups: RefCell::new(Vec::new()),
                children: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create a child scope disposed together with (and before) this one.
    pub fn child(&self) -> DisposalScope {
        let child = DisposalScope::new();
        if self.inner.disposed.get() {
            child.dispose();
        } else {
            self.inner.children.borrow_mut().push(child.clone());
        }
        child
    }

    /// Register a teardown hook. Runs immediately when the scope is already
    /// disposed.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        if self.inner.disposed.get() {
            f();
        } else {
            self.inner.cleanups.borrow_mut().push(Box::new(f));
        }
    }

    /// File a subscription token; it is cancelled on disposal.
    pub fn add_subscription(&self, subscription: Subscription) {
        self.on_dispose(move || subscription.cancel());
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        for child in children {
            child.dispose();
        }
        let mut cleanups = std::mem::take(&mut *self.inner.cleanups.borrow_mut());
        while let Some(cleanup) = cleanups.pop() {
            cleanup();
        }
    }
}
