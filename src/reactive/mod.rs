//! Reactive primitives: scalar signals, keyed collections and disposal scopes.
//!
//! Everything here is single-threaded. Subscriber lists live behind `RefCell`
//! and callbacks are invoked with all internal borrows released, so hooks may
//! reenter the owning object (subscribe, set, cancel) without panicking.

mod collection;
mod scope;
mod signal;

pub use collection::Collection;
pub use scope::DisposalScope;
pub use signal::{Cleanup, Signal};

/// Opaque cancellation token returned by every subscription.
///
/// Dropping the token does nothing; cancellation is explicit so that tokens
/// can be filed in an entity scope and fired on disposal.
pub struct Subscription(Option<Box<dyn FnOnce()>>);

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Subscription(Some(Box::new(cancel)))
    }

    pub fn cancel(mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}
