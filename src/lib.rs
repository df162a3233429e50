//! dapmux - an in-process Debug Adapter Protocol client runtime.
//!
//! The runtime multiplexes any number of concurrent debug sessions, each
//! talking to its own adapter, and maintains a reactive, URI-addressed graph
//! of all debugger state: sessions, threads, stacks, frames, scopes,
//! variables, sources, breakpoints and their per-session bindings. UIs attach
//! through views and signals; commands flow back through typed session
//! methods.
//!
//! The core is single-threaded cooperative: run it inside a
//! `tokio::task::LocalSet` on a current-thread runtime.

pub mod breakpoint;
pub mod client;
pub mod debugger;
pub mod entity;
pub mod error;
pub mod exception;
mod ids;
pub mod proto;
pub mod reactive;
pub mod session;
pub mod source;
pub mod store;
pub mod transport;
pub mod uri;

pub use breakpoint::{Binding, Breakpoint, BreakpointOptions};
pub use client::Client;
pub use debugger::{Adapter, Debugger};
pub use entity::{
    Entity, EntityKind, EvaluateResult, Frame, Output, Scope, Stack, Thread, Variable,
};
pub use entity::thread::ThreadExecState;
pub use error::{Error, Result};
pub use exception::{ExceptionFilter, ExceptionFilterBinding};
pub use reactive::{Collection, DisposalScope, Signal, Subscription};
pub use session::{Session, SessionState, StartConfig, StartRequest};
pub use source::{Source, SourceBinding};
pub use store::{EntityStore, View, ViewEvent};
pub use transport::{MessageRecv, MessageSend, RawClient};
pub use uri::Uri;
