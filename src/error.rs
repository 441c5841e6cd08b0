//! Engine errors.
//!
//! Field-level failures are not returned to the consumer as Rust errors:
//! they are converted to GraphQL [`Error`] values and attached to the patch
//! for the path where resolution failed.

use thiserror::Error;

use crate::graphql;
use crate::json_ext::Path;

/// Structural errors raised while validating a query document.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum SpecError {
    /// `stream` applies only to list fields.
    #[error("field '{field}' is marked @stream but is not a list")]
    StreamOnNonList { field: String },

    /// Sibling defer/stream labels must be distinct so consumers can tell
    /// the resulting patches apart.
    #[error("duplicate incremental label '{label}' among sibling selections")]
    DuplicateLabel { label: String },

    /// field names are unique per parent
    #[error("duplicate field '{field}' in selection set")]
    DuplicateField { field: String },

    /// Incremental markers inside a plain (non streamed) list selection are
    /// not supported: there is no stable patch address for their items.
    #[error("field '{field}' uses @defer or @stream inside a non-streamed list selection")]
    IncrementalInsideList { field: String },
}

/// A failure reported by a resolver binding.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ResolveError {
    /// The resolver operation itself failed.
    #[error("resolver failed: {reason}")]
    ResolverFailed { reason: String },

    /// A streamed item could not be produced.
    #[error("stream item failed: {reason}")]
    StreamItemFailed { reason: String },
}

impl ResolveError {
    pub fn failed(reason: impl Into<String>) -> Self {
        ResolveError::ResolverFailed {
            reason: reason.into(),
        }
    }

    fn extension_code(&self) -> &'static str {
        match self {
            ResolveError::ResolverFailed { .. } => "RESOLVER_FAILED",
            ResolveError::StreamItemFailed { .. } => "STREAM_ITEM_FAILED",
        }
    }

    /// Convert the failure to a GraphQL error scoped to `path`.
    pub fn to_graphql_error(&self, path: Option<Path>) -> graphql::Error {
        graphql::Error::builder()
            .message(self.to_string())
            .extension_code(self.extension_code())
            .and_path(path)
            .build()
    }
}

/// Errors that abort a whole execution before any chunk is sent.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ExecutionError {
    /// A required (non deferred, non streamed) field failed to resolve.
    #[error("required field at '{path}' failed: {source}")]
    RequiredField {
        path: Path,
        #[source]
        source: ResolveError,
    },

    /// The query document did not validate.
    #[error(transparent)]
    Spec(#[from] SpecError),
}

impl ExecutionError {
    /// Surface the abort as a top-level error response, per the GraphQL
    /// convention of `errors` without `data`.
    pub fn to_response(&self) -> graphql::Response {
        let (code, path) = match self {
            ExecutionError::RequiredField { path, .. } => {
                ("REQUIRED_FIELD_FAILED", Some(path.clone()))
            }
            ExecutionError::Spec(_) => ("INVALID_QUERY_DOCUMENT", None),
        };
        graphql::Response::builder()
            .errors(vec![
                graphql::Error::builder()
                    .message(self.to_string())
                    .extension_code(code)
                    .and_path(path)
                    .build(),
            ])
            .build()
    }
}

/// Errors raised on the receiving side of the chunk stream.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ProtocolError {
    /// A chunk could not be parsed. The decoder rejects the chunk and keeps
    /// its state so the consumer process survives.
    #[error("malformed chunk: {reason}")]
    MalformedChunk { reason: String },

    /// A patch path does not fit the shape of the result tree.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The transport closed before the terminal chunk arrived.
    #[error("transport closed before delivery completed")]
    TransportClosed,

    /// A chunk arrived after the terminal `hasNext: false` chunk.
    #[error("chunk received after delivery completed")]
    AlreadyComplete,
}
