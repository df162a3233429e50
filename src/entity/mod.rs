//! Entity model: every node of the debugger graph is one of these types,
//! registered in the [`crate::store::EntityStore`] under its URI.

pub mod evaluate;
pub mod frame;
pub mod output;
pub mod scope;
pub mod stack;
pub mod thread;
pub mod variable;

pub use evaluate::EvaluateResult;
pub use frame::Frame;
pub use output::Output;
pub use scope::Scope;
pub use stack::Stack;
pub use thread::Thread;
pub use variable::Variable;

use crate::breakpoint::{Binding, Breakpoint};
use crate::exception::{ExceptionFilter, ExceptionFilterBinding};
use crate::reactive::DisposalScope;
use crate::session::Session;
use crate::source::{Source, SourceBinding};
use crate::uri::Uri;
use std::rc::Rc;

/// Entity type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Session,
    Thread,
    Stack,
    Frame,
    Scope,
    Variable,
    Evaluate,
    Output,
    Source,
    SourceBinding,
    Breakpoint,
    Binding,
    ExceptionFilter,
    ExceptionFilterBinding,
}

/// A field value participating in equality filters and secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Str(Rc<str>),
    Int(i64),
    Bool(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(Rc::from(value))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(Rc::from(value))
    }
}

impl From<&Uri> for FieldValue {
    fn from(value: &Uri) -> Self {
        FieldValue::Str(Rc::from(value.as_str()))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Edge labels. An edge is a `(from, label, to)` triple kept in both
/// directions by the store.
pub mod edges {
    pub const THREADS: &str = "threads";
    pub const STACKS: &str = "stacks";
    pub const FRAMES: &str = "frames";
    pub const SCOPES: &str = "scopes";
    pub const VARIABLES: &str = "variables";
    pub const OUTPUTS: &str = "outputs";
    pub const EVALUATIONS: &str = "evaluations";
    pub const BINDINGS: &str = "bindings";
    pub const SOURCE_BINDINGS: &str = "source_bindings";
    pub const EXCEPTION_BINDINGS: &str = "exception_bindings";
    pub const CHILDREN: &str = "children";
}

/// Labels along which disposal cascades, children first.
pub(crate) fn owned_labels(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Session => &[
            edges::CHILDREN,
            edges::THREADS,
            edges::OUTPUTS,
            edges::EVALUATIONS,
            edges::BINDINGS,
            edges::SOURCE_BINDINGS,
            edges::EXCEPTION_BINDINGS,
        ],
        EntityKind::Thread => &[edges::STACKS],
        EntityKind::Stack => &[edges::FRAMES],
        EntityKind::Frame => &[edges::SCOPES],
        EntityKind::Scope => &[edges::VARIABLES],
        EntityKind::Variable => &[edges::VARIABLES],
        EntityKind::Output => &[edges::VARIABLES],
        EntityKind::Evaluate => &[edges::VARIABLES],
        EntityKind::Breakpoint => &[edges::BINDINGS],
        EntityKind::ExceptionFilter => &[edges::BINDINGS],
        EntityKind::Source
        | EntityKind::SourceBinding
        | EntityKind::Binding
        | EntityKind::ExceptionFilterBinding => &[],
    }
}

/// Any live entity. Variants are cheap-clone handles.
#[derive(Clone)]
pub enum Entity {
    Session(Session),
    Thread(Thread),
    Stack(Stack),
    Frame(Frame),
    Scope(Scope),
    Variable(Variable),
    Evaluate(EvaluateResult),
    Output(Output),
    Source(Source),
    SourceBinding(SourceBinding),
    Breakpoint(Breakpoint),
    Binding(Binding),
    ExceptionFilter(ExceptionFilter),
    ExceptionFilterBinding(ExceptionFilterBinding),
}

macro_rules! delegate {
    ($self:expr, $entity:pat => $body:expr) => {
        match $self {
            Entity::Session($entity) => $body,
            Entity::Thread($entity) => $body,
            Entity::Stack($entity) => $body,
            Entity::Frame($entity) => $body,
            Entity::Scope($entity) => $body,
            Entity::Variable($entity) => $body,
            Entity::Evaluate($entity) => $body,
            Entity::Output($entity) => $body,
            Entity::Source($entity) => $body,
            Entity::SourceBinding($entity) => $body,
            Entity::Breakpoint($entity) => $body,
            Entity::Binding($entity) => $body,
            Entity::ExceptionFilter($entity) => $body,
            Entity::ExceptionFilterBinding($entity) => $body,
        }
    };
}

impl Entity {
    pub fn uri(&self) -> &Uri {
        delegate!(self, e => e.uri())
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Session(_) => EntityKind::Session,
            Entity::Thread(_) => EntityKind::Thread,
            Entity::Stack(_) => EntityKind::Stack,
            Entity::Frame(_) => EntityKind::Frame,
            Entity::Scope(_) => EntityKind::Scope,
            Entity::Variable(_) => EntityKind::Variable,
            Entity::Evaluate(_) => EntityKind::Evaluate,
            Entity::Output(_) => EntityKind::Output,
            Entity::Source(_) => EntityKind::Source,
            Entity::SourceBinding(_) => EntityKind::SourceBinding,
            Entity::Breakpoint(_) => EntityKind::Breakpoint,
            Entity::Binding(_) => EntityKind::Binding,
            Entity::ExceptionFilter(_) => EntityKind::ExceptionFilter,
            Entity::ExceptionFilterBinding(_) => EntityKind::ExceptionFilterBinding,
        }
    }

    pub(crate) fn disposal_scope(&self) -> DisposalScope {
        delegate!(self, e => e.disposal_scope())
    }

    /// Reflective field access for view filters and indexes.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        delegate!(self, e => e.field(name))
    }

    /// Fields participating in secondary indexes, with their current values.
    pub(crate) fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)> {
        delegate!(self, e => e.indexed_fields())
    }
}

macro_rules! entity_accessors {
    ($($variant:ident => $getter:ident, $ty:ty;)*) => {
        impl Entity {
            $(
                pub fn $getter(&self) -> Option<$ty> {
                    match self {
                        Entity::$variant(e) => Some(e.clone()),
                        _ => None,
                    }
                }
            )*
        }
        $(
            impl From<$ty> for Entity {
                fn from(value: $ty) -> Entity {
                    Entity::$variant(value)
                }
            }
        )*
    };
}

entity_accessors! {
    Session => as_session, Session;
    Thread => as_thread, Thread;
    Stack => as_stack, Stack;
    Frame => as_frame, Frame;
    Scope => as_scope, Scope;
    Variable => as_variable, Variable;
    Evaluate => as_evaluate, EvaluateResult;
    Output => as_output, Output;
    Source => as_source, Source;
    SourceBinding => as_source_binding, SourceBinding;
    Breakpoint => as_breakpoint, Breakpoint;
    Binding => as_binding, Binding;
    ExceptionFilter => as_exception_filter, ExceptionFilter;
    ExceptionFilterBinding => as_exception_filter_binding, ExceptionFilterBinding;
}

/// Implemented by every concrete entity type.
pub(crate) trait EntityObject {
    fn uri(&self) -> &Uri;
    fn disposal_scope(&self) -> DisposalScope;
    fn field(&self, name: &str) -> Option<FieldValue>;
    fn indexed_fields(&self) -> Vec<(&'static str, FieldValue)>;
}
