//! Incremental GraphQL delivery: `@defer` and `@stream` over multipart.
//!
//! A query document marks subtrees as deferred and list fields as streamed.
//! The execution scheduler resolves the immediate portion first, emits it as
//! the primary response, then delivers one patch per completed deferred
//! subtree or streamed item over a single ordered response stream. The
//! `protocols` module frames that stream as `multipart/mixed` chunks; the
//! `client` module decodes the chunks and reassembles the result tree.

#![warn(unreachable_pub)]

pub mod client;
pub mod error;
pub mod execution;
pub mod graphql;
pub mod json_ext;
pub mod protocols;
pub mod spec;

pub use client::MergePolicy;
pub use client::Reassembler;
pub use client::ResultTree;
pub use execution::execute;
pub use execution::execute_complete;
pub use execution::Resolvers;
pub use graphql::Response;
pub use spec::FieldNode;
pub use spec::QueryDocument;
