use crate::reactive::Subscription;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Cleanup closure returned by a subscriber; runs before the next fire and on
/// cancellation.
pub type Cleanup = Box<dyn FnOnce()>;

type Callback<T> = Box<dyn FnMut(&T) -> Option<Cleanup>>;

struct SubscriberState<T> {
    callback: Option<Callback<T>>,
    cleanup: Option<Cleanup>,
    cancelled: bool,
}

struct SubscriberEntry<T> {
    id: u64,
    state: Rc<RefCell<SubscriberState<T>>>,
}

struct SignalInner<T> {
    value: RefCell<T>,
    subscribers: RefCell<SmallVec<[SubscriberEntry<T>; 2]>>,
    next_id: Cell<u64>,
}

/// A scalar reactive cell.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Signal {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Signal {
            inner: Rc::new(SignalInner {
                value: RefCell::new(value),
                subscribers: RefCell::new(SmallVec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Write the value; fires subscribers only when the value changed.
    pub fn set(&self, value: T) {
        {
            let current = self.inner.value.borrow();
            if *current == value {
                return;
            }
        }
        *self.inner.value.borrow_mut() = value.clone();
        self.fire(&value);
    }

    /// Subscribe to every future change.
    pub fn watch(&self, callback: impl FnMut(&T) -> Option<Cleanup> + 'static) -> Subscription {
        self.subscribe(Box::new(callback), None)
    }

    /// Fire once with the current value, then subscribe to every change.
    pub fn each(&self, mut callback: impl FnMut(&T) -> Option<Cleanup> + 'static) -> Subscription {
        let current = self.inner.value.borrow().clone();
        let first_cleanup = callback(&current);
        self.subscribe(Box::new(callback), first_cleanup)
    }

    /// Return the current value and atomically detach all subscribers.
    ///
    /// Pending cleanups are dropped unrun; this is a handoff, not a disposal.
    pub fn release(&self) -> T {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        for entry in subscribers.drain(..) {
            let mut state = entry.state.borrow_mut();
            state.cancelled = true;
            state.callback = None;
            state.cleanup = None;
        }
        drop(subscribers);
        self.inner.value.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    fn subscribe(&self, callback: Callback<T>, cleanup: Option<Cleanup>) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        let state = Rc::new(RefCell::new(SubscriberState {
            callback: Some(callback),
            cleanup,
            cancelled: false,
        }));
        self.inner
            .subscribers
            .borrow_mut()
            .push(SubscriberEntry {
                id,
                state: state.clone(),
            });

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            let cleanup = {
                let mut st = state.borrow_mut();
                if st.cancelled {
                    return;
                }
                st.cancelled = true;
                st.callback = None;
                st.cleanup.take()
            };
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.borrow_mut().retain(|e| e.id != id);
            }
            if let Some(cleanup) = cleanup {
                cleanup()
            }
        })
    }

    fn fire(&self, value: &T) {
        let states: Vec<Rc<RefCell<SubscriberState<T>>>> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|e| e.state.clone())
            .collect();

        for state in states {
            let (callback, cleanup) = {
                let mut st = state.borrow_mut();
                if st.cancelled {
                    continue;
                }
                (st.callback.take(), st.cleanup.take())
            };
            if let Some(cleanup) = cleanup {
                cleanup()
            }
            let Some(mut callback) = callback else {
                continue;
            };
            let next_cleanup = callback(value);
            let mut st = state.borrow_mut();
            if st.cancelled {
                drop(st);
                if let Some(cleanup) = next_cleanup {
                    cleanup()
                }
            } else {
                st.callback = Some(callback);
                st.cleanup = next_cleanup;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_fires_on_change_only() {
        let signal = Signal::new(1);
        let hits = Rc::new(Cell::new(0));
        let hits2 = hits.clone();
        let _sub = signal.watch(move |_| {
            hits2.set(hits2.get() + 1);
            None
        });

        signal.set(1);
        assert_eq!(hits.get(), 0);
        signal.set(2);
        assert_eq!(hits.get(), 1);
        signal.set(2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_each_fires_immediately() {
        let signal = Signal::new("a".to_string());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = signal.each(move |v: &String| {
            seen2.borrow_mut().push(v.clone());
            None
        });
        signal.set("b".to_string());
        assert_eq!(*seen.borrow(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_cleanup_runs_before_next_fire_and_on_cancel() {
        let signal = Signal::new(0);
        let cleanups = Rc::new(Cell::new(0));
        let cleanups2 = cleanups.clone();
        let sub = signal.watch(move |_| {
            let c = cleanups2.clone();
            Some(Box::new(move || c.set(c.get() + 1)) as Cleanup)
        });

        signal.set(1);
        assert_eq!(cleanups.get(), 0);
        signal.set(2);
        assert_eq!(cleanups.get(), 1);
        sub.cancel();
        assert_eq!(cleanups.get(), 2);
    }

    #[test]
    fn test_release_detaches_without_cleanup() {
        let signal = Signal::new(7);
        let cleanups = Rc::new(Cell::new(0));
        let cleanups2 = cleanups.clone();
        let _sub = signal.watch(move |_| {
            let c = cleanups2.clone();
            Some(Box::new(move || c.set(c.get() + 1)) as Cleanup)
        });
        signal.set(8);

        assert_eq!(signal.release(), 8);
        assert_eq!(signal.subscriber_count(), 0);
        signal.set(9);
        assert_eq!(cleanups.get(), 0);
    }

    #[test]
    fn test_cancel_inside_own_callback() {
        let signal = Signal::new(0);
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let slot2 = slot.clone();
        let hits = Rc::new(Cell::new(0));
        let hits2 = hits.clone();
        let sub = signal.watch(move |_| {
            hits2.set(hits2.get() + 1);
            if let Some(sub) = slot2.borrow_mut().take() {
                sub.cancel();
            }
            None
        });
        *slot.borrow_mut() = Some(sub);

        signal.set(1);
        signal.set(2);
        assert_eq!(hits.get(), 1);
    }
}
