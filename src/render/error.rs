use thiserror::Error;

use crate::error::CompileError;
use crate::functions::{CallError, Kind, RegistryError};
use crate::store::StoreError;

/// Failure while rendering; no partial output is returned
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("template `{id}` not found")]
    TemplateNotFound { id: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to compile `{template}`: {source}")]
    Compile {
        template: String,
        #[source]
        source: CompileError,
    },

    #[error("compiled form of `{template}` is unreadable: {source}")]
    CompiledForm {
        template: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("section error: {message}")]
    SectionState { message: String },

    #[error("unknown filter `{name}`")]
    UnknownFilter { name: String },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },

    #[error("unknown directive @{name}")]
    UnknownDirective { name: String },

    #[error("{kind} `{name}` failed: {source}")]
    Call {
        kind: Kind,
        name: String,
        #[source]
        source: CallError,
    },

    #[error(transparent)]
    Registration(RegistryError),

    #[error("{context}: expected {expected}, got {got}")]
    Type {
        context: String,
        expected: String,
        got: String,
    },

    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: String },

    #[error("cannot access member `{member}` of `{root}`")]
    InaccessibleMember { member: String, root: String },

    #[error("@while exceeded {limit} iterations")]
    LoopLimit { limit: usize },

    #[error("including `{template}` exceeds the nesting limit of {limit}")]
    IncludeDepth { template: String, limit: usize },

    #[error("layout chain exceeds {limit} levels")]
    LayoutDepth { limit: usize },
}

impl RenderError {
    pub(crate) fn section(message: impl Into<String>) -> Self {
        Self::SectionState {
            message: message.into(),
        }
    }

    pub(crate) fn type_error(
        context: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Self::Type {
            context: context.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }
}

impl From<RegistryError> for RenderError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unknown {
                kind: Kind::Filter,
                name,
            } => RenderError::UnknownFilter { name },
            RegistryError::Unknown {
                kind: Kind::Function,
                name,
            } => RenderError::UnknownFunction { name },
            RegistryError::Unknown {
                kind: Kind::Directive | Kind::Condition,
                name,
            } => RenderError::UnknownDirective { name },
            RegistryError::Call { kind, name, source } => RenderError::Call { kind, name, source },
            other @ (RegistryError::Conflict { .. } | RegistryError::InvalidName { .. }) => {
                RenderError::Registration(other)
            }
        }
    }
}
