//! Client side of incremental delivery: decode the chunk stream and
//! reassemble the result tree patch by patch.

pub mod multipart;

use std::collections::HashMap;

use crate::error::ProtocolError;
use crate::graphql;
use crate::graphql::Response;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;

pub use multipart::MultipartDecoder;

/// How an incoming stream chunk combines with the list already at its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Push item values in the order they arrive. The source index carried
    /// by each item is kept for consumers that want to reorder, but arrival
    /// order is display order.
    #[default]
    Append,
    /// Replace the whole list with the chunk's item values.
    Replace,
}

/// Per-execution delivery state.
///
/// Field-level errors never leave `Receiving`; only a transport failure
/// moves to `Failed`, and only the terminal chunk moves to `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Started,
    Receiving,
    Complete,
    Failed,
}

/// The consumer's merged view of one query execution.
///
/// The tree is mutated only by applying chunks in arrival order. The first
/// chunk initializes it wholesale; defer chunks deep-merge their data at
/// their path, creating pending ancestors when a container has not arrived
/// yet; stream chunks apply the field's [`MergePolicy`].
pub struct ResultTree {
    data: Value,
    errors: Vec<graphql::Error>,
    state: DeliveryState,
    policies: HashMap<Path, MergePolicy>,
}

impl Default for ResultTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultTree {
    pub fn new() -> Self {
        Self {
            data: Value::Null,
            errors: Vec::new(),
            state: DeliveryState::Started,
            policies: HashMap::new(),
        }
    }

    /// Override the merge policy for a streamed field. The path is the
    /// index-free query path of the field, e.g. `promotions/details`.
    pub fn with_policy(mut self, path: impl Into<Path>, policy: MergePolicy) -> Self {
        self.policies.insert(path.into(), policy);
        self
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == DeliveryState::Complete
    }

    /// The merged tree as of the last applied chunk.
    pub fn snapshot(&self) -> &Value {
        &self.data
    }

    pub fn errors(&self) -> &[graphql::Error] {
        &self.errors
    }

    /// Merge one chunk into the tree.
    pub fn apply(&mut self, response: &Response) -> Result<(), ProtocolError> {
        match self.state {
            DeliveryState::Complete => return Err(ProtocolError::AlreadyComplete),
            DeliveryState::Failed => return Err(ProtocolError::TransportClosed),
            DeliveryState::Started | DeliveryState::Receiving => {}
        }

        match &response.path {
            None => {
                if let Some(data) = &response.data {
                    self.data.deep_merge(data.clone());
                }
            }
            Some(path) => {
                if let Some(data) = &response.data {
                    self.data.at_path_mut(path)?.deep_merge(data.clone());
                }
                if !response.items.is_empty() {
                    let policy = self.policy_for(path);
                    let target = self.data.at_path_mut(path)?;
                    merge_items(target, response, policy, path)?;
                }
            }
        }
        self.errors.extend_from_slice(&response.errors);

        // A plain single response carries no hasNext at all; it is its own
        // terminal chunk.
        self.state = if response.has_next() {
            DeliveryState::Receiving
        } else {
            DeliveryState::Complete
        };
        Ok(())
    }

    /// Record a transport failure. The partial tree is preserved but the
    /// execution will never complete.
    pub fn transport_error(&mut self) {
        if self.state != DeliveryState::Complete {
            self.state = DeliveryState::Failed;
        }
    }

    pub fn into_parts(self) -> (Value, Vec<graphql::Error>) {
        (self.data, self.errors)
    }

    /// Policy lookup is by query path, so index elements from the concrete
    /// response path are dropped first.
    fn policy_for(&self, path: &Path) -> MergePolicy {
        let query_path = Path(
            path.iter()
                .filter(|element| matches!(element, PathElement::Key(_)))
                .cloned()
                .collect(),
        );
        self.policies.get(&query_path).copied().unwrap_or_default()
    }
}

fn merge_items(
    target: &mut Value,
    response: &Response,
    policy: MergePolicy,
    path: &Path,
) -> Result<(), ProtocolError> {
    if target.is_null() {
        *target = Value::Array(Vec::new());
    }
    let Value::Array(list) = target else {
        return Err(ProtocolError::InvalidPath {
            path: path.to_string(),
            reason: "stream chunk addressed a non-list value".to_string(),
        });
    };
    match policy {
        MergePolicy::Append => {
            list.extend(response.items.iter().map(|item| item.value.clone()));
        }
        MergePolicy::Replace => {
            *list = response.items.iter().map(|item| item.value.clone()).collect();
        }
    }
    Ok(())
}

/// Ties a [`MultipartDecoder`] to a [`ResultTree`], with an optional
/// observer invoked after every merged chunk.
///
/// The observer is the subscription point for anything that wants to watch
/// the tree grow, a UI re-render or a progress log for instance. It receives
/// the current snapshot and whether the execution is complete.
pub struct Reassembler {
    decoder: MultipartDecoder,
    tree: ResultTree,
    observer: Option<Box<dyn FnMut(&Value, bool) + Send>>,
}

impl Reassembler {
    pub fn new(tree: ResultTree) -> Self {
        Self {
            decoder: MultipartDecoder::new(),
            tree,
            observer: None,
        }
    }

    pub fn observe(mut self, observer: impl FnMut(&Value, bool) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Feed transport bytes; every chunk they complete is merged in order.
    pub fn on_chunk(&mut self, bytes: impl AsRef<[u8]>) -> Result<(), ProtocolError> {
        for response in self.decoder.decode(bytes)? {
            self.tree.apply(&response)?;
            if let Some(observer) = self.observer.as_mut() {
                observer(self.tree.snapshot(), self.tree.is_complete());
            }
        }
        Ok(())
    }

    /// The transport dropped before the terminal chunk arrived.
    pub fn on_transport_error(&mut self) {
        self.tree.transport_error();
    }

    pub fn tree(&self) -> &ResultTree {
        &self.tree
    }

    pub fn into_tree(self) -> ResultTree {
        self.tree
    }
}
