//! Resolver bindings.
//!
//! A binding maps an index-free query path (e.g. `currentUser/billInformation`)
//! to the operation producing that field's value. Fields without a binding
//! are read out of the enclosing resolver's value by key, which is how
//! plain mock-data fields resolve without any code.

use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::ResolveError;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// The future returned by a value resolver.
pub type ResolverFuture = BoxFuture<'static, Result<Value, ResolveError>>;

/// The item sequence returned by a stream resolver. Finite, lazily
/// consumed, bound one-to-one with a streamed field; dropped on
/// cancellation.
pub type ItemStream = BoxStream<'static, Result<Value, ResolveError>>;

pub(crate) type ValueResolver = Box<dyn Fn(Value) -> ResolverFuture + Send + Sync>;
pub(crate) type StreamResolver = Box<dyn Fn(Value) -> ItemStream + Send + Sync>;

enum Binding {
    Value(ValueResolver),
    Stream(StreamResolver),
}

/// The set of resolver bindings for one executable schema.
#[derive(Default)]
pub struct Resolvers {
    bindings: HashMap<Path, Binding>,
}

impl Resolvers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value resolver. The closure receives the parent field's
    /// resolved value (`null` at the query root).
    pub fn bind<F>(mut self, path: impl Into<Path>, resolver: F) -> Self
    where
        F: Fn(Value) -> ResolverFuture + Send + Sync + 'static,
    {
        self.bindings
            .insert(path.into(), Binding::Value(Box::new(resolver)));
        self
    }

    /// Bind a stream resolver for a streamed list field.
    pub fn bind_stream<F>(mut self, path: impl Into<Path>, resolver: F) -> Self
    where
        F: Fn(Value) -> ItemStream + Send + Sync + 'static,
    {
        self.bindings
            .insert(path.into(), Binding::Stream(Box::new(resolver)));
        self
    }

    pub(crate) fn value(&self, path: &Path) -> Option<&ValueResolver> {
        match self.bindings.get(path) {
            Some(Binding::Value(resolver)) => Some(resolver),
            _ => None,
        }
    }

    pub(crate) fn stream(&self, path: &Path) -> Option<&StreamResolver> {
        match self.bindings.get(path) {
            Some(Binding::Stream(resolver)) => Some(resolver),
            _ => None,
        }
    }
}
