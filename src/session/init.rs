//! Initialization ordering.
//!
//! The protocol fixes the dance: `initialize`, then `launch`/`attach`, with
//! the adapter free to emit `initialized` anywhere between the initialize
//! response and the launch/attach response. All configuration (breakpoints,
//! exception filters, `configurationDone`) happens strictly inside the
//! `initialized` handler, and the session is not `running` before both the
//! start request and the configuration phase have settled.

use crate::client::ClientChannels;
use crate::error::{Error, Result};
use crate::proto::requests::{Attach, Initialize, InitializeArguments, Launch};
use crate::session::{Session, SessionState, StartRequest};
use crate::weak_error;
use std::rc::Rc;
use std::time::Duration;

pub(crate) const INIT_TIMEOUT: Duration = Duration::from_secs(5);

impl Session {
    /// Run the full initialization exchange. On timeout or failure the
    /// caller disposes the session.
    pub(crate) async fn initialize_and_start(&self) -> Result<()> {
        let sequence = self.run_init_sequence();
        match tokio::time::timeout(INIT_TIMEOUT, sequence).await {
            Ok(Ok(())) => {
                if self.inner.state.get() == SessionState::Initializing {
                    self.set_state(SessionState::Running);
                }
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::InitializeTimeout(INIT_TIMEOUT)),
        }
    }

    async fn run_init_sequence(&self) -> Result<()> {
        let capabilities = self
            .client()
            .request::<Initialize>(InitializeArguments {
                client_id: Some("dapmux".to_string()),
                client_name: Some("dapmux".to_string()),
                adapter_id: self.inner.adapter_type.clone(),
                locale: Some("en-US".to_string()),
                lines_start_at1: true,
                columns_start_at1: true,
                path_format: Some("path".to_string()),
                supports_variable_type: true,
                supports_run_in_terminal_request: true,
                supports_start_debugging_request: true,
                supports_progress_reporting: false,
            })
            .await?
            .unwrap_or_default();
        *self.inner.capabilities.borrow_mut() = capabilities.clone();

        if let Some(debugger) = self.debugger() {
            debugger.register_exception_filters(self, &capabilities);
            debugger.create_bindings_for_session(self);
        }
        self.inner.caps_ready.set(true);
        self.inner.caps_notify.notify_one();

        let payload = self.inner.start_config.borrow().payload.clone();
        match self.inner.start_config.borrow().request {
            StartRequest::Launch => {
                self.client().request::<Launch>(payload).await?;
            }
            StartRequest::Attach => {
                self.client().request::<Attach>(payload).await?;
            }
        }

        // `initialized` may already have completed configuration while the
        // start request was pending.
        if !self.inner.configured.get() {
            self.inner.configured_notify.notified().await;
        }
        Ok(())
    }

    /// The `initialized` event handler: push every breakpoint for every
    /// source, then the exception filters, then `configurationDone`. No
    /// debugger activity is allowed before this completes.
    pub(crate) async fn configure(&self) {
        // The `initialized` event may be scheduled ahead of the init task
        // resuming from the initialize response; configuration needs the
        // stored capabilities and the pre-created bindings.
        if !self.inner.caps_ready.get() {
            self.inner.caps_notify.notified().await;
        }
        self.inner.initialized.set(true);

        let source_keys = self
            .debugger()
            .map(|debugger| debugger.breakpoint_source_keys())
            .unwrap_or_default();
        for key in source_keys {
            self.sync_breakpoints_for_source(key).await;
        }

        weak_error!(self.push_exception_filters().await, "exception filter push:");

        if crate::proto::types::Capabilities::flag(
            self.capabilities().supports_configuration_done_request,
        ) {
            weak_error!(
                self.client()
                    .request_raw("configurationDone", serde_json::json!({}))
                    .await,
                "configurationDone:"
            );
        }
        self.inner.configured.set(true);
        self.inner.configured_notify.notify_one();
    }

    /// Spawn the ordered event pump. Entity mutations from event N complete
    /// before event N+1 is dispatched.
    pub(crate) fn spawn_event_loop(&self, channels: ClientChannels) {
        let weak = Rc::downgrade(&self.inner);
        let task = tokio::task::spawn_local(async move {
            let ClientChannels {
                mut events,
                mut reverse_requests,
            } = channels;
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let session = Session { inner };
                        match event {
                            Some(event) => session.handle_event(event).await,
                            None => {
                                session.on_transport_closed();
                                break;
                            }
                        }
                    }
                    request = reverse_requests.recv() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let session = Session { inner };
                        match request {
                            Some(request) => session.handle_reverse_request(request).await,
                            None => {
                                session.on_transport_closed();
                                break;
                            }
                        }
                    }
                }
            }
        });
        *self.inner.event_task.borrow_mut() = Some(task);
    }

    pub(crate) fn on_transport_closed(&self) {
        if self.inner.state.get() == SessionState::Terminated {
            return;
        }
        log::error!(
            target: "session",
            "session {} lost its adapter transport",
            self.inner.id
        );
        self.dispose();
    }
}
