//! Reactive entity queries.
//!
//! A view is a lazy, incrementally maintained collection of entities of one
//! type. `where_eq` narrows by field equality, an origin restricts to the
//! targets of one entity's edge, and `follow` traverses an edge label from
//! every member of a parent view. Membership updates are O(affected members)
//! per store mutation, never a rescan.

use crate::entity::{Entity, EntityKind, FieldValue};
use crate::reactive::Subscription;
use crate::store::{StoreEvent, StoreShared};
use crate::uri::Uri;
use indexmap::IndexSet;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

#[derive(Clone)]
pub enum ViewEvent {
    Added(Entity),
    Removed(Entity),
}

#[derive(Clone)]
pub struct View {
    core: Rc<ViewCore>,
}

pub(crate) struct ViewCore {
    store: Weak<StoreShared>,
    kind: EntityKind,
    filters: Vec<(&'static str, FieldValue)>,
    source: ViewSource,
    members: RefCell<IndexSet<Uri>>,
    subscribers: RefCell<Vec<(u64, Rc<ViewSubscriber>)>>,
    next_sub: Cell<u64>,
}

enum ViewSource {
    /// All entities of the view's kind.
    Kind,
    /// Targets of a fixed entity's edge.
    Origin { from: Uri, label: &'static str },
    /// Targets reachable over an edge label from any member of the parent.
    Follow {
        parent: Rc<ViewCore>,
        label: &'static str,
    },
}

struct ViewSubscriber {
    cancelled: Cell<bool>,
    callback: RefCell<Box<dyn FnMut(&ViewEvent)>>,
}

impl View {
    pub(crate) fn of_kind(store: &Rc<StoreShared>, kind: EntityKind) -> View {
        Self::build(store, kind, Vec::new(), ViewSource::Kind)
    }

    pub(crate) fn from_origin(
        store: &Rc<StoreShared>,
        from: Uri,
        label: &'static str,
        kind: EntityKind,
    ) -> View {
        Self::build(store, kind, Vec::new(), ViewSource::Origin { from, label })
    }

    fn build(
        store: &Rc<StoreShared>,
        kind: EntityKind,
        filters: Vec<(&'static str, FieldValue)>,
        source: ViewSource,
    ) -> View {
        let core = Rc::new(ViewCore {
            store: Rc::downgrade(store),
            kind,
            filters,
            source,
            members: RefCell::new(IndexSet::new()),
            subscribers: RefCell::new(Vec::new()),
            next_sub: Cell::new(0),
        });

        let initial = core.compute_order(store);
        core.members.borrow_mut().extend(initial);
        store.register_view(&core);

        if let ViewSource::Follow { parent, label } = &core.source {
            let label = *label;
            let weak = Rc::downgrade(&core);
            parent.subscribe_raw(Box::new(move |event| {
                let Some(core) = weak.upgrade() else { return };
                let Some(store) = core.store.upgrade() else {
                    return;
                };
                match event {
                    ViewEvent::Added(parent_member) => {
                        for target in store.targets(parent_member.uri(), label) {
                            if let Some(entity) = store.entity(&target) {
                                if core.matches(&store, &entity) {
                                    core.add_member(entity);
                                }
                            }
                        }
                    }
                    ViewEvent::Removed(_) => {
                        let members: Vec<Uri> =
                            core.members.borrow().iter().cloned().collect();
                        for uri in members {
                            let still_reachable = store
                                .entity(&uri)
                                .map(|entity| core.reachable(&store, &entity))
                                .unwrap_or(false);
                            if !still_reachable {
                                core.remove_member(&uri, store.entity(&uri));
                            }
                        }
                    }
                }
            }));
        }

        View { core }
    }

    /// Narrow by field equality. Returns a new memoized view.
    pub fn where_eq(&self, field: &'static str, value: impl Into<FieldValue>) -> View {
        let Some(store) = self.core.store.upgrade() else {
            return View { core: self.core.clone() };
        };
        let mut filters = self.core.filters.clone();
        filters.push((field, value.into()));
        let source = match &self.core.source {
            ViewSource::Kind => ViewSource::Kind,
            ViewSource::Origin { from, label } => ViewSource::Origin {
                from: from.clone(),
                label,
            },
            ViewSource::Follow { parent, label } => ViewSource::Follow {
                parent: parent.clone(),
                label,
            },
        };
        Self::build(&store, self.core.kind, filters, source)
    }

    /// Traverse an edge label from every member to entities of another type.
    pub fn follow(&self, label: &'static str, kind: EntityKind) -> View {
        let Some(store) = self.core.store.upgrade() else {
            return View { core: self.core.clone() };
        };
        Self::build(
            &store,
            kind,
            Vec::new(),
            ViewSource::Follow {
                parent: self.core.clone(),
                label,
            },
        )
    }

    /// Current members in store order.
    pub fn iter(&self) -> Vec<Entity> {
        let Some(store) = self.core.store.upgrade() else {
            return Vec::new();
        };
        self.core
            .compute_order(&store)
            .into_iter()
            .filter_map(|uri| store.entity(&uri))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.core.members.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.members.borrow().is_empty()
    }

    pub fn contains(&self, uri: &Uri) -> bool {
        self.core.members.borrow().contains(uri)
    }

    /// First member whose indexed field equals `value`.
    pub fn get_one(&self, field: &'static str, value: impl Into<FieldValue>) -> Option<Entity> {
        let value = value.into();
        self.iter()
            .into_iter()
            .find(|entity| entity.field(field).as_ref() == Some(&value))
    }

    /// Invoke `callback` synchronously for all current members, then for every
    /// future member until the subscription is cancelled.
    pub fn each(&self, mut callback: impl FnMut(&Entity) + 'static) -> Subscription {
        for entity in self.iter() {
            callback(&entity);
        }
        self.subscribe(move |event| {
            if let ViewEvent::Added(entity) = event {
                callback(entity);
            }
        })
    }

    /// Subscribe to membership changes. The token keeps the view alive; a
    /// dropped or cancelled token lets an otherwise unreferenced view die.
    pub fn subscribe(&self, callback: impl FnMut(&ViewEvent) + 'static) -> Subscription {
        let (id, subscriber) = self.core.subscribe_raw(Box::new(callback));
        let core = self.core.clone();
        Subscription::new(move || {
            subscriber.cancelled.set(true);
            core.subscribers.borrow_mut().retain(|(sub_id, _)| *sub_id != id);
        })
    }
}

impl ViewCore {
    fn subscribe_raw(&self, callback: Box<dyn FnMut(&ViewEvent)>) -> (u64, Rc<ViewSubscriber>) {
        let id = self.next_sub.get();
        self.next_sub.set(id + 1);
        let subscriber = Rc::new(ViewSubscriber {
            cancelled: Cell::new(false),
            callback: RefCell::new(callback),
        });
        self.subscribers.borrow_mut().push((id, subscriber.clone()));
        (id, subscriber)
    }

    /// Members in semantic order, straight from the store's edge lists.
    fn compute_order(&self, store: &Rc<StoreShared>) -> Vec<Uri> {
        match &self.source {
            ViewSource::Kind => store
                .bucket_uris(self.kind)
                .into_iter()
                .filter(|uri| self.entity_matches(store, uri))
                .collect(),
            ViewSource::Origin { from, label } => store
                .targets(from, label)
                .into_iter()
                .filter(|uri| self.entity_matches(store, uri))
                .collect(),
            ViewSource::Follow { parent, label } => {
                let mut seen = IndexSet::new();
                for member in parent.compute_order(store) {
                    for target in store.targets(&member, label) {
                        if self.entity_matches(store, &target) {
                            seen.insert(target);
                        }
                    }
                }
                seen.into_iter().collect()
            }
        }
    }

    fn entity_matches(&self, store: &Rc<StoreShared>, uri: &Uri) -> bool {
        store
            .entity(uri)
            .map(|entity| self.kind == entity.kind() && self.filters_match(&entity))
            .unwrap_or(false)
    }

    fn filters_match(&self, entity: &Entity) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| entity.field(field).as_ref() == Some(value))
    }

    fn matches(&self, store: &Rc<StoreShared>, entity: &Entity) -> bool {
        entity.kind() == self.kind && self.filters_match(entity) && self.reachable(store, entity)
    }

    fn reachable(&self, store: &Rc<StoreShared>, entity: &Entity) -> bool {
        match &self.source {
            ViewSource::Kind => true,
            ViewSource::Origin { from, label } => {
                store.sources(entity.uri(), label).iter().any(|s| s == from)
            }
            ViewSource::Follow { parent, label } => store
                .sources(entity.uri(), label)
                .iter()
                .any(|source| parent.members.borrow().contains(source)),
        }
    }

    pub(crate) fn handle_store_event(self: &Rc<Self>, store: &Rc<StoreShared>, event: &StoreEvent) {
        match event {
            StoreEvent::Inserted(entity) => {
                if self.matches(store, entity) {
                    self.add_member(entity.clone());
                }
            }
            StoreEvent::Removed(entity) => {
                self.remove_member(entity.uri(), Some(entity.clone()));
            }
            StoreEvent::FieldChanged(entity, _field) => {
                if entity.kind() != self.kind {
                    return;
                }
                let is_member = self.members.borrow().contains(entity.uri());
                let matches = self.matches(store, entity);
                if matches && !is_member {
                    self.add_member(entity.clone());
                } else if !matches && is_member {
                    self.remove_member(entity.uri(), Some(entity.clone()));
                }
            }
            StoreEvent::EdgeAdded { from, label, to } => {
                if to.kind() != self.kind || !self.filters_match(to) {
                    return;
                }
                let relevant = match &self.source {
                    ViewSource::Kind => false,
                    ViewSource::Origin {
                        from: origin,
                        label: origin_label,
                    } => origin == from && origin_label == label,
                    ViewSource::Follow {
                        parent,
                        label: follow_label,
                    } => follow_label == label && parent.members.borrow().contains(from),
                };
                if relevant {
                    self.add_member(to.clone());
                }
            }
        }
    }

    fn add_member(&self, entity: Entity) {
        if !self.members.borrow_mut().insert(entity.uri().clone()) {
            return;
        }
        self.fire(&ViewEvent::Added(entity));
    }

    fn remove_member(&self, uri: &Uri, entity: Option<Entity>) {
        if !self.members.borrow_mut().shift_remove(uri) {
            return;
        }
        if let Some(entity) = entity {
            self.fire(&ViewEvent::Removed(entity));
        }
    }

    fn fire(&self, event: &ViewEvent) {
        let subscribers: Vec<Rc<ViewSubscriber>> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, sub)| sub.clone())
            .collect();
        for subscriber in subscribers {
            if subscriber.cancelled.get() {
                continue;
            }
            (subscriber.callback.borrow_mut())(event);
        }
    }
}
