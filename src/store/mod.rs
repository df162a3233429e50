//! URI-addressed entity storage with edge adjacency and secondary indexes.
//!
//! The store is the single source of truth of the runtime. Entities are keyed
//! by URI, bucketed by type, connected by labelled edges kept in both
//! directions, and republished to reactive [`View`]s on every mutation.
//! Mutation methods release all internal borrows before notifying views, so
//! subscribers may reenter the store.

mod view;

pub use view::{View, ViewEvent};

use crate::entity::{owned_labels, Entity, EntityKind, FieldValue};
use crate::uri::Uri;
use indexmap::{IndexMap, IndexSet};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use view::ViewCore;

type EdgeMap = HashMap<Uri, IndexMap<&'static str, Vec<Uri>>>;

#[derive(Clone)]
pub struct EntityStore {
    shared: Rc<StoreShared>,
}

pub(crate) struct StoreShared {
    entities: RefCell<IndexMap<Uri, Entity>>,
    buckets: RefCell<HashMap<EntityKind, IndexSet<Uri>>>,
    edges_out: RefCell<EdgeMap>,
    edges_in: RefCell<EdgeMap>,
    /// Secondary index buckets plus, per entity, the values currently filed.
    index: RefCell<HashMap<(EntityKind, &'static str, FieldValue), IndexSet<Uri>>>,
    indexed_values: RefCell<HashMap<Uri, Vec<(&'static str, FieldValue)>>>,
    views: RefCell<Vec<Weak<ViewCore>>>,
    disposing: RefCell<HashSet<Uri>>,
}

pub(crate) enum StoreEvent {
    Inserted(Entity),
    Removed(Entity),
    FieldChanged(Entity, &'static str),
    EdgeAdded {
        from: Uri,
        label: &'static str,
        to: Entity,
    },
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> EntityStore {
        EntityStore {
            shared: Rc::new(StoreShared {
                entities: RefCell::new(IndexMap::new()),
                buckets: RefCell::new(HashMap::new()),
                edges_out: RefCell::new(HashMap::new()),
                edges_in: RefCell::new(HashMap::new()),
                index: RefCell::new(HashMap::new()),
                indexed_values: RefCell::new(HashMap::new()),
                views: RefCell::new(Vec::new()),
                disposing: RefCell::new(HashSet::new()),
            }),
        }
    }

    /// Insert an entity and create its declared edges, each a
    /// `(from, label) -> entity` triple. Duplicate URIs are a programming
    /// error: rejected keep-first in release builds.
    pub(crate) fn add(&self, entity: impl Into<Entity>, edges: &[(Uri, &'static str)]) {
        let entity = entity.into();
        let uri = entity.uri().clone();
        {
            let mut entities = self.shared.entities.borrow_mut();
            if entities.contains_key(&uri) {
                debug_assert!(false, "duplicate entity uri {uri}");
                log::error!(target: "store", "ignoring duplicate entity {uri}");
                return;
            }
            entities.insert(uri.clone(), entity.clone());
        }
        self.shared
            .buckets
            .borrow_mut()
            .entry(entity.kind())
            .or_default()
            .insert(uri.clone());
        self.file_index(&entity);

        for (from, label) in edges {
            self.link(from, *label, &uri, false);
        }
        self.notify(&StoreEvent::Inserted(entity));
    }

    /// Add an edge after creation, appended at the tail of the target list.
    pub(crate) fn add_edge(&self, from: &Uri, label: &'static str, to: &Uri) {
        self.link(from, label, to, false);
        if let Some(entity) = self.get_uri(to) {
            self.notify(&StoreEvent::EdgeAdded {
                from: from.clone(),
                label,
                to: entity,
            });
        }
    }

    /// Add an edge whose target sorts before all existing targets. Used so
    /// newer stacks sit at index 0.
    pub(crate) fn prepend_edge(&self, from: &Uri, label: &'static str, to: &Uri) {
        self.link(from, label, to, true);
        if let Some(entity) = self.get_uri(to) {
            self.notify(&StoreEvent::EdgeAdded {
                from: from.clone(),
                label,
                to: entity,
            });
        }
    }

    pub fn get(&self, uri: &str) -> Option<Entity> {
        self.shared.entities.borrow().get(uri).cloned()
    }

    pub(crate) fn get_uri(&self, uri: &Uri) -> Option<Entity> {
        self.shared.entities.borrow().get(uri).cloned()
    }

    pub fn contains(&self, uri: &Uri) -> bool {
        self.shared.entities.borrow().contains_key(uri)
    }

    /// Ordered edge targets; disposed targets are already unlinked.
    pub(crate) fn edge_targets(&self, from: &Uri, label: &str) -> Vec<Uri> {
        self.shared
            .edges_out
            .borrow()
            .get(from)
            .and_then(|labels| labels.get(label))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn edge_sources(&self, to: &Uri, label: &str) -> Vec<Uri> {
        self.shared
            .edges_in
            .borrow()
            .get(to)
            .and_then(|labels| labels.get(label))
            .cloned()
            .unwrap_or_default()
    }

    /// Republish an entity to its index buckets after a signal write and let
    /// views re-evaluate membership.
    pub(crate) fn update_field(&self, uri: &Uri, field: &'static str) {
        let Some(entity) = self.get_uri(uri) else {
            return;
        };
        self.refile_index(&entity);
        self.notify(&StoreEvent::FieldChanged(entity, field));
    }

    /// O(1) amortized lookup through a secondary index bucket.
    pub fn index_lookup(
        &self,
        kind: EntityKind,
        field: &'static str,
        value: impl Into<FieldValue>,
    ) -> Vec<Entity> {
        let key = (kind, field, value.into());
        let uris: Vec<Uri> = self
            .shared
            .index
            .borrow()
            .get(&key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        uris.iter().filter_map(|uri| self.get_uri(uri)).collect()
    }

    pub fn view(&self, kind: EntityKind) -> View {
        View::of_kind(&self.shared, kind)
    }

    pub(crate) fn view_from(&self, from: &Uri, label: &'static str, kind: EntityKind) -> View {
        View::from_origin(&self.shared, from.clone(), label, kind)
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.shared
            .buckets
            .borrow()
            .get(&kind)
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }

    /// Remove an entity, its edges and its descendants. Reentrant-safe and
    /// idempotent.
    pub fn dispose_entity(&self, uri: &Uri) {
        let entity = {
            let entities = self.shared.entities.borrow();
            match entities.get(uri) {
                Some(entity) => entity.clone(),
                None => return,
            }
        };
        if !self.shared.disposing.borrow_mut().insert(uri.clone()) {
            return;
        }

        // Children first, so no intermediate view observes a dangling edge.
        for label in owned_labels(entity.kind()) {
            for child in self.edge_targets(uri, label) {
                self.dispose_entity(&child);
            }
        }

        entity.disposal_scope().dispose();

        self.unlink_all(uri);
        self.unfile_index(uri, entity.kind());
        if let Some(bucket) = self.shared.buckets.borrow_mut().get_mut(&entity.kind()) {
            bucket.shift_remove(uri);
        }
        self.shared.entities.borrow_mut().shift_remove(uri);

        self.notify(&StoreEvent::Removed(entity));
        self.shared.disposing.borrow_mut().remove(uri);
    }

    /// Dispose every entity. Debugger teardown.
    pub fn dispose_all(&self) {
        loop {
            let next = self
                .shared
                .entities
                .borrow()
                .keys()
                .next()
                .cloned();
            match next {
                Some(uri) => self.dispose_entity(&uri),
                None => break,
            }
        }
    }

    fn link(&self, from: &Uri, label: &'static str, to: &Uri, prepend: bool) {
        let mut edges_out = self.shared.edges_out.borrow_mut();
        let list = edges_out
            .entry(from.clone())
            .or_default()
            .entry(label)
            .or_default();
        if list.contains(to) {
            return;
        }
        if prepend {
            list.insert(0, to.clone());
        } else {
            list.push(to.clone());
        }
        drop(edges_out);
        self.shared
            .edges_in
            .borrow_mut()
            .entry(to.clone())
            .or_default()
            .entry(label)
            .or_default()
            .push(from.clone());
    }

    fn unlink_all(&self, uri: &Uri) {
        let outgoing = self.shared.edges_out.borrow_mut().remove(uri);
        if let Some(labels) = outgoing {
            let mut edges_in = self.shared.edges_in.borrow_mut();
            for (label, targets) in labels {
                for target in targets {
                    if let Some(entry) = edges_in.get_mut(&target) {
                        if let Some(list) = entry.get_mut(label) {
                            list.retain(|u| u != uri);
                        }
                    }
                }
            }
        }
        let incoming = self.shared.edges_in.borrow_mut().remove(uri);
        if let Some(labels) = incoming {
            let mut edges_out = self.shared.edges_out.borrow_mut();
            for (label, sources) in labels {
                for source in sources {
                    if let Some(entry) = edges_out.get_mut(&source) {
                        if let Some(list) = entry.get_mut(label) {
                            list.retain(|u| u != uri);
                        }
                    }
                }
            }
        }
    }

    fn file_index(&self, entity: &Entity) {
        let fields = entity.indexed_fields();
        let uri = entity.uri().clone();
        let mut index = self.shared.index.borrow_mut();
        for (field, value) in &fields {
            index
                .entry((entity.kind(), *field, value.clone()))
                .or_default()
                .insert(uri.clone());
        }
        drop(index);
        self.shared
            .indexed_values
            .borrow_mut()
            .insert(uri, fields);
    }

    fn refile_index(&self, entity: &Entity) {
        self.unfile_index(entity.uri(), entity.kind());
        self.file_index(entity);
    }

    fn unfile_index(&self, uri: &Uri, kind: EntityKind) {
        let old = self.shared.indexed_values.borrow_mut().remove(uri);
        if let Some(fields) = old {
            let mut index = self.shared.index.borrow_mut();
            for (field, value) in fields {
                if let Some(bucket) = index.get_mut(&(kind, field, value)) {
                    bucket.shift_remove(uri);
                }
            }
        }
    }

    fn notify(&self, event: &StoreEvent) {
        let cores: Vec<Rc<ViewCore>> = {
            let mut views = self.shared.views.borrow_mut();
            views.retain(|weak| weak.strong_count() > 0);
            views.iter().filter_map(Weak::upgrade).collect()
        };
        for core in cores {
            core.handle_store_event(&self.shared, event);
        }
    }
}

impl StoreShared {
    pub(crate) fn register_view(&self, core: &Rc<ViewCore>) {
        self.views.borrow_mut().push(Rc::downgrade(core));
    }

    pub(crate) fn entity(&self, uri: &Uri) -> Option<Entity> {
        self.entities.borrow().get(uri).cloned()
    }

    pub(crate) fn bucket_uris(&self, kind: EntityKind) -> Vec<Uri> {
        self.buckets
            .borrow()
            .get(&kind)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn targets(&self, from: &Uri, label: &str) -> Vec<Uri> {
        self.edges_out
            .borrow()
            .get(from)
            .and_then(|labels| labels.get(label))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn sources(&self, to: &Uri, label: &str) -> Vec<Uri> {
        self.edges_in
            .borrow()
            .get(to)
            .and_then(|labels| labels.get(label))
            .cloned()
            .unwrap_or_default()
    }
}
