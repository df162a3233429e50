//! Process-wide root of the runtime: the adapter registry, the entity store
//! and the global collections (sources, breakpoints, exception filters).

use crate::breakpoint::{Binding, Breakpoint, BreakpointOptions};
use crate::client::Client;
use crate::entity::{Entity, EntityKind, EntityObject};
use crate::error::{Error, Result};
use crate::exception::{ExceptionFilter, ExceptionFilterBinding};
use crate::proto::requests::{RunInTerminalArguments, RunInTerminalResponse};
use crate::proto::types::{Capabilities, DapSource};
use crate::reactive::{Cleanup, Collection, DisposalScope, Subscription};
use crate::session::{Session, SessionState, StartConfig};
use crate::source::{correlation_key, Source};
use crate::store::{EntityStore, View};
use crate::transport::RawClient;
use crate::uri::Uri;
use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Host-provided adapter configuration: how to reach an adapter of a logical
/// type, and how to satisfy its `runInTerminal` requests.
#[async_trait(?Send)]
pub trait Adapter {
    /// Logical identifier, e.g. `node`. Scopes global exception filters.
    fn adapter_type(&self) -> &str;

    /// Open a fresh framed transport to one adapter instance.
    async fn connect(&self) -> anyhow::Result<RawClient>;

    async fn run_in_terminal(
        &self,
        arguments: RunInTerminalArguments,
    ) -> anyhow::Result<RunInTerminalResponse> {
        let _ = arguments;
        anyhow::bail!("no terminal spawner configured")
    }
}

#[derive(Clone)]
pub struct Debugger {
    inner: Rc<DebuggerInner>,
}

pub(crate) struct DebuggerInner {
    store: EntityStore,
    adapters: RefCell<HashMap<String, Rc<dyn Adapter>>>,
    sessions: Collection<String, Session>,
    breakpoint_seq: Cell<i64>,
    scope: DisposalScope,
}

impl Debugger {
    pub fn new(adapters: Vec<Rc<dyn Adapter>>) -> Debugger {
        let debugger = Debugger {
            inner: Rc::new(DebuggerInner {
                store: EntityStore::new(),
                adapters: RefCell::new(HashMap::new()),
                sessions: Collection::new(),
                breakpoint_seq: Cell::new(0),
                scope: DisposalScope::new(),
            }),
        };
        for adapter in adapters {
            debugger.register_adapter(adapter);
        }
        debugger
    }

    pub fn register_adapter(&self, adapter: Rc<dyn Adapter>) {
        self.inner
            .adapters
            .borrow_mut()
            .insert(adapter.adapter_type().to_string(), adapter);
    }

    pub(crate) fn from_inner(inner: Rc<DebuggerInner>) -> Debugger {
        Debugger { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<DebuggerInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn store(&self) -> &EntityStore {
        &self.inner.store
    }

    pub fn sessions(&self) -> &Collection<String, Session> {
        &self.inner.sessions
    }

    pub fn on_session(&self, f: impl Fn(&String, &Session) + 'static) -> Subscription {
        self.inner.sessions.each(f, None)
    }

    /// Start a new root session.
    ///
    /// Must run inside a `tokio::task::LocalSet`: the runtime is
    /// single-threaded and spawns `!Send` tasks for the session's io.
    pub async fn start(&self, config: StartConfig) -> Result<Session> {
        let session = self.connect_session(config, None).await?;
        match session.initialize_and_start().await {
            Ok(()) => Ok(session),
            Err(err) => {
                session.dispose();
                Err(err)
            }
        }
    }

    /// Connect and register a session without driving initialization.
    pub(crate) async fn connect_session(
        &self,
        config: StartConfig,
        parent: Option<&Session>,
    ) -> Result<Session> {
        let adapter = self
            .inner
            .adapters
            .borrow()
            .get(&config.adapter_type)
            .cloned()
            .ok_or_else(|| Error::UnknownAdapterType(config.adapter_type.clone()))?;
        let raw = adapter
            .connect()
            .await
            .map_err(|err| Error::Connect(format!("{err:#}")))?;
        let (client, channels) = Client::start(raw);
        let session = Session::create(self, adapter, config, client, parent);
        session.spawn_event_loop(channels);
        Ok(session)
    }

    /// Resolve an entity by URI. Validates the segment grammar first.
    pub fn query(&self, uri: &str) -> Result<Option<Entity>> {
        Uri::parse_segments(uri)?;
        Ok(self.inner.store.get(uri))
    }

    pub fn view(&self, kind: EntityKind) -> View {
        self.inner.store.view(kind)
    }

    pub fn dispose(&self) {
        self.inner.store.dispose_all();
        self.inner.scope.dispose();
    }

    // ------------------------------ sources -----------------------------

    /// Resolve or create the global Source for a wire descriptor.
    pub fn intern_source(&self, dap: &DapSource) -> Source {
        let key = correlation_key(dap);
        match self.source_by_key(&key) {
            Some(source) => {
                source.absorb_hints(dap);
                source
            }
            None => Source::create(&self.inner.store, dap),
        }
    }

    pub fn source_by_key(&self, key: &str) -> Option<Source> {
        self.inner
            .store
            .index_lookup(EntityKind::Source, "key", key)
            .into_iter()
            .find_map(|entity| entity.as_source())
    }

    pub fn source_for_path(&self, path: &str) -> Source {
        self.intern_source(&DapSource {
            path: Some(path.to_string()),
            ..Default::default()
        })
    }

    pub fn sources(&self) -> View {
        self.inner.store.view(EntityKind::Source)
    }

    pub fn on_source(&self, mut f: impl FnMut(&Source) + 'static) -> Subscription {
        self.sources().each(move |entity| {
            if let Some(source) = entity.as_source() {
                f(&source)
            }
        })
    }

    // ---------------------------- breakpoints ---------------------------

    /// Declare a breakpoint. Bindings materialize on every live session and
    /// the source is re-pushed everywhere.
    pub fn add_breakpoint(
        &self,
        source: &Source,
        line: i64,
        options: BreakpointOptions,
    ) -> Breakpoint {
        let id = self.inner.breakpoint_seq.get() + 1;
        self.inner.breakpoint_seq.set(id);
        let breakpoint = Breakpoint::create(&self.inner.store, id, source, line, options);

        // Any edit to a reactive property re-pushes the owning source.
        let key = source.key().to_string();
        let scope = breakpoint.disposal_scope_ref();
        scope.add_subscription(breakpoint.enabled().watch(self.resync_watcher(&key)));
        scope.add_subscription(breakpoint.condition().watch(self.resync_watcher(&key)));
        scope.add_subscription(breakpoint.hit_condition().watch(self.resync_watcher(&key)));
        scope.add_subscription(breakpoint.log_message().watch(self.resync_watcher(&key)));

        for session in self.inner.sessions.values() {
            self.ensure_binding(&session, &breakpoint);
            session.schedule_sync(key.clone());
        }
        breakpoint
    }

    fn resync_watcher<T>(&self, source_key: &str) -> impl FnMut(&T) -> Option<Cleanup> + 'static {
        let weak = self.downgrade();
        let key = source_key.to_string();
        move |_: &T| {
            if let Some(inner) = weak.upgrade() {
                Debugger::from_inner(inner).resync_source(&key);
            }
            None
        }
    }

    /// Remove a breakpoint and its bindings, then re-push the source.
    pub fn remove_breakpoint(&self, breakpoint: &Breakpoint) {
        let key = breakpoint.source().key().to_string();
        self.inner.store.dispose_entity(breakpoint.uri());
        self.resync_source(&key);
    }

    pub fn breakpoints(&self) -> View {
        self.inner.store.view(EntityKind::Breakpoint)
    }

    /// Breakpoints of one source, in declaration order.
    pub(crate) fn breakpoints_for_source(&self, source_key: &str) -> Vec<Breakpoint> {
        self.inner
            .store
            .index_lookup(EntityKind::Breakpoint, "source_key", source_key)
            .into_iter()
            .filter_map(|entity| entity.as_breakpoint())
            .collect()
    }

    pub(crate) fn breakpoint_source_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for entity in self.breakpoints().iter() {
            if let Some(breakpoint) = entity.as_breakpoint() {
                let key = breakpoint.source().key().to_string();
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// At most one Binding per (breakpoint, session) pair.
    pub(crate) fn ensure_binding(
        &self,
        session: &Session,
        breakpoint: &Breakpoint,
    ) -> Option<Binding> {
        if session.state().get() == SessionState::Terminated {
            return None;
        }
        Some(
            session
                .binding_for(breakpoint)
                .unwrap_or_else(|| Binding::create(session, breakpoint)),
        )
    }

    pub(crate) fn create_bindings_for_session(&self, session: &Session) {
        for entity in self.breakpoints().iter() {
            if let Some(breakpoint) = entity.as_breakpoint() {
                self.ensure_binding(session, &breakpoint);
            }
        }
    }

    pub(crate) fn resync_source(&self, source_key: &str) {
        for session in self.inner.sessions.values() {
            session.schedule_sync(source_key.to_string());
        }
    }

    // ------------------------- exception filters ------------------------

    /// Fold an adapter's declared filter catalog into the global registry and
    /// bind every filter to the session.
    pub(crate) fn register_exception_filters(
        &self,
        session: &Session,
        capabilities: &Capabilities,
    ) {
        let Some(declared) = &capabilities.exception_breakpoint_filters else {
            return;
        };
        for filter_decl in declared {
            let key = format!("{}:{}", session.adapter_type(), filter_decl.filter);
            let filter = self
                .inner
                .store
                .index_lookup(EntityKind::ExceptionFilter, "key", key.as_str())
                .into_iter()
                .find_map(|entity| entity.as_exception_filter());
            let filter = match filter {
                Some(filter) => filter,
                None => {
                    let filter =
                        ExceptionFilter::create(&self.inner.store, session.adapter_type(), filter_decl);
                    // Toggling the user preference re-pushes the filter set
                    // on every session of this adapter type.
                    let weak = self.downgrade();
                    let adapter_type = session.adapter_type().to_string();
                    let sub = filter.enabled().watch(move |_| {
                        if let Some(inner) = weak.upgrade() {
                            let debugger = Debugger::from_inner(inner);
                            for session in debugger.inner.sessions.values() {
                                if session.adapter_type() == adapter_type {
                                    session.schedule_exception_push();
                                }
                            }
                        }
                        None
                    });
                    filter.disposal_scope().add_subscription(sub);
                    filter
                }
            };

            let binding_uri = session.uri().child("exception", filter.filter_id());
            if !self.inner.store.contains(&binding_uri) {
                ExceptionFilterBinding::create(session, &filter);
            }
        }
    }

    pub fn exception_filters(&self) -> View {
        self.inner.store.view(EntityKind::ExceptionFilter)
    }
}
