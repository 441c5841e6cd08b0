//! Query execution.
//!
//! The scheduler resolves the immediate portion of a query first, then runs
//! every deferred subtree and streamed field as an independent task. Units
//! communicate completions to a single driver task over one ordered
//! channel; the driver owns all mutable bookkeeping (outstanding unit
//! count, nested unit spawning) and is the only writer to the response
//! stream, so patches go out in completion order with a correct `hasNext`.

mod resolver;

use std::sync::Arc;

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::prelude::*;
pub use resolver::ItemStream;
pub use resolver::ResolverFuture;
pub use resolver::Resolvers;

use crate::client::ResultTree;
use crate::error::ExecutionError;
use crate::error::ResolveError;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::graphql::StreamItem;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::spec::FieldNode;
use crate::spec::FieldType;
use crate::spec::Incremental;
use crate::spec::QueryDocument;

const RESPONSE_BUFFER: usize = 10;

/// A field failure, scoped to the response path where it happened.
type FieldFailure = (Path, ResolveError);

type ScopeResult = Result<(Value, Vec<UnitSeed>), FieldFailure>;

/// An incremental unit of work discovered during resolution but not yet
/// started. Deferred subtrees nested under another deferred subtree (or
/// under a streamed item) are seeded only once the enclosing value exists,
/// which is what keeps containment patches ahead of their content.
struct UnitSeed {
    node: FieldNode,
    query_path: Path,
    response_path: Path,
    parent: Value,
}

enum UnitMessage {
    Deferred {
        path: Path,
        label: Option<String>,
        result: ScopeResult,
    },
    Item {
        path: Path,
        label: Option<String>,
        index: usize,
        result: ScopeResult,
        is_final: bool,
    },
    StreamEmpty {
        path: Path,
    },
}

/// Execute a query document against a set of resolver bindings.
///
/// The returned stream yields the primary response first, then one patch
/// per completed deferred subtree or streamed item, in completion order.
/// Exactly the last patch carries `hasNext: false`. Dropping the stream
/// cancels the execution: no further resolver work is scheduled and
/// in-flight results are discarded.
///
/// A failed resolver inside a deferred or streamed unit produces an error
/// patch for that unit only. A failed resolver in the required (immediate)
/// portion aborts the whole execution before anything is emitted.
pub async fn execute(
    document: &QueryDocument,
    resolvers: &Arc<Resolvers>,
) -> Result<ResponseStream, ExecutionError> {
    let (data, seeds) = resolve_scope(
        resolvers,
        document.roots(),
        &Value::Null,
        &Path::empty(),
        &Path::empty(),
    )
    .await
    .map_err(|(path, source)| ExecutionError::RequiredField { path, source })?;

    let (response_tx, response_rx) = mpsc::channel(RESPONSE_BUFFER);
    tokio::spawn(drive(Arc::clone(resolvers), data, seeds, response_tx));
    Ok(response_rx.boxed())
}

/// Execute a query document and deliver everything as one single response.
///
/// This is the monolithic fallback for consumers that did not negotiate
/// incremental delivery: the same execution runs, but every patch is merged
/// back into the initial payload before anything is returned.
pub async fn execute_complete(
    document: &QueryDocument,
    resolvers: &Arc<Resolvers>,
) -> Result<Response, ExecutionError> {
    let mut stream = execute(document, resolvers).await?;
    let mut tree = ResultTree::new();
    while let Some(response) = stream.next().await {
        tree.apply(&response)
            .expect("locally produced chunks always merge");
    }
    let (data, errors) = tree.into_parts();
    Ok(Response::builder().data(data).errors(errors).build())
}

/// The per-execution driver task.
async fn drive(
    resolvers: Arc<Resolvers>,
    data: Value,
    seeds: Vec<UnitSeed>,
    mut response_tx: mpsc::Sender<Response>,
) {
    let (unit_tx, mut unit_rx) = mpsc::unbounded();
    let mut outstanding = 0usize;
    for seed in seeds {
        spawn_unit(&resolvers, seed, &unit_tx);
        outstanding += 1;
    }
    tracing::debug!(units = outstanding, "initial payload resolved");

    let primary = Response::builder()
        .data(data)
        .and_has_next((outstanding > 0).then_some(true))
        .build();
    if response_tx.send(primary).await.is_err() {
        return;
    }

    while outstanding > 0 {
        let Some(message) = unit_rx.next().await else {
            break;
        };
        let patch = match message {
            UnitMessage::Deferred {
                path,
                label,
                result,
            } => {
                let (data, errors, nested) = match result {
                    Ok((value, seeds)) => (value, Vec::new(), seeds),
                    Err((error_path, error)) => (
                        Value::Null,
                        vec![error.to_graphql_error(Some(error_path))],
                        Vec::new(),
                    ),
                };
                // Nested units must be counted before this patch goes out,
                // otherwise it could wrongly carry the terminal hasNext.
                for seed in nested {
                    spawn_unit(&resolvers, seed, &unit_tx);
                    outstanding += 1;
                }
                outstanding -= 1;
                Some(
                    Response::builder()
                        .data(data)
                        .errors(errors)
                        .path(path)
                        .and_label(label)
                        .has_next(outstanding > 0)
                        .build(),
                )
            }
            UnitMessage::Item {
                path,
                label,
                index,
                result,
                is_final,
            } => {
                let (items, errors, nested) = match result {
                    Ok((value, seeds)) => (vec![StreamItem { index, value }], Vec::new(), seeds),
                    Err((error_path, error)) => (
                        Vec::new(),
                        vec![error.to_graphql_error(Some(error_path))],
                        Vec::new(),
                    ),
                };
                for seed in nested {
                    spawn_unit(&resolvers, seed, &unit_tx);
                    outstanding += 1;
                }
                if is_final {
                    outstanding -= 1;
                }
                Some(
                    Response::builder()
                        .items(items)
                        .errors(errors)
                        .path(path)
                        .and_label(label)
                        .has_next(outstanding > 0)
                        .build(),
                )
            }
            UnitMessage::StreamEmpty { path } => {
                outstanding -= 1;
                if outstanding == 0 {
                    // An empty stream was the last outstanding unit, so a
                    // bare terminal chunk is all that is left to say.
                    tracing::trace!(%path, "empty stream closed the execution");
                    Some(Response::builder().has_next(false).build())
                } else {
                    None
                }
            }
        };
        if let Some(patch) = patch {
            if response_tx.send(patch).await.is_err() {
                tracing::trace!("consumer disconnected, stopping patch emission");
                return;
            }
        }
    }
}

fn spawn_unit(
    resolvers: &Arc<Resolvers>,
    seed: UnitSeed,
    unit_tx: &mpsc::UnboundedSender<UnitMessage>,
) {
    let resolvers = Arc::clone(resolvers);
    let unit_tx = unit_tx.clone();
    match seed.node.incremental().clone() {
        Incremental::Defer { label } => {
            tokio::spawn(async move {
                let result = resolve_deferred(&resolvers, &seed).await;
                let _ = unit_tx.unbounded_send(UnitMessage::Deferred {
                    path: seed.response_path,
                    label,
                    result,
                });
            });
        }
        Incremental::Stream { label } => {
            tokio::spawn(run_stream_unit(resolvers, seed, label, unit_tx));
        }
        // seeds are only created for incremental selections
        Incremental::Immediate => {}
    }
}

async fn resolve_deferred(resolvers: &Resolvers, seed: &UnitSeed) -> ScopeResult {
    let raw = resolve_raw(
        resolvers,
        &seed.query_path,
        seed.node.name(),
        &seed.parent,
        &seed.response_path,
    )
    .await?;
    shape_node(resolvers, &seed.node, raw, &seed.query_path, &seed.response_path).await
}

async fn run_stream_unit(
    resolvers: Arc<Resolvers>,
    seed: UnitSeed,
    label: Option<String>,
    unit_tx: mpsc::UnboundedSender<UnitMessage>,
) {
    let mut source = match resolvers.stream(&seed.query_path) {
        Some(resolver) => resolver(seed.parent.clone()),
        None => {
            // No stream binding: drain the parent's materialized list.
            match field_of(&seed.parent, seed.node.name()) {
                Value::Array(items) => stream::iter(items.into_iter().map(Ok)).boxed(),
                Value::Null => stream::empty().boxed(),
                _ => {
                    let _ = unit_tx.unbounded_send(UnitMessage::Item {
                        path: seed.response_path.clone(),
                        label,
                        index: 0,
                        result: Err((
                            seed.response_path,
                            ResolveError::failed("expected a list value"),
                        )),
                        is_final: true,
                    });
                    return;
                }
            }
        }
    };

    // Look one item ahead so the last item of the source can be flagged:
    // if it is also the execution's last outstanding work, its patch must
    // carry the terminal hasNext.
    let mut next = source.next().await;
    if next.is_none() {
        let _ = unit_tx.unbounded_send(UnitMessage::StreamEmpty {
            path: seed.response_path,
        });
        return;
    }
    let mut source_index = 0usize;
    let mut position = 0usize;
    while let Some(result) = next {
        next = source.next().await;
        let is_final = next.is_none();
        let result = match result {
            Ok(raw) => {
                let mut item_path = seed.response_path.clone();
                item_path.push(PathElement::Index(position));
                match shape_item(&resolvers, &seed, raw, &item_path).await {
                    Ok(shaped) => {
                        position += 1;
                        Ok(shaped)
                    }
                    Err(failure) => Err(failure),
                }
            }
            Err(error) => Err((seed.response_path.clone(), error)),
        };
        let sent = unit_tx.unbounded_send(UnitMessage::Item {
            path: seed.response_path.clone(),
            label: label.clone(),
            index: source_index,
            result,
            is_final,
        });
        if sent.is_err() {
            // Cancelled; stop consuming the source promptly.
            return;
        }
        source_index += 1;
    }
}

/// Apply the item selection to one streamed item.
async fn shape_item(
    resolvers: &Resolvers,
    seed: &UnitSeed,
    raw: Value,
    item_path: &Path,
) -> ScopeResult {
    if seed.node.children().is_empty() || raw.is_null() {
        return Ok((raw, Vec::new()));
    }
    resolve_scope(resolvers, seed.node.children(), &raw, &seed.query_path, item_path).await
}

/// Resolve one selection set against its parent value.
///
/// Immediate fields resolve in place; deferred and streamed fields leave a
/// pending marker (`null`, or `[]` for lists) and a [`UnitSeed`] for the
/// caller to schedule.
fn resolve_scope<'a>(
    resolvers: &'a Resolvers,
    nodes: &'a [FieldNode],
    parent: &'a Value,
    query_prefix: &'a Path,
    response_prefix: &'a Path,
) -> BoxFuture<'a, ScopeResult> {
    Box::pin(async move {
        let mut object = Object::default();
        let mut seeds = Vec::new();
        for node in nodes {
            let mut query_path = query_prefix.clone();
            query_path.push(PathElement::Key(node.name().to_string()));
            let mut response_path = response_prefix.clone();
            response_path.push(PathElement::Key(node.name().to_string()));
            match node.incremental() {
                Incremental::Immediate => {
                    let raw =
                        resolve_raw(resolvers, &query_path, node.name(), parent, &response_path)
                            .await?;
                    let (value, mut nested) =
                        shape_node(resolvers, node, raw, &query_path, &response_path).await?;
                    seeds.append(&mut nested);
                    object.insert(node.name(), value);
                }
                Incremental::Defer { .. } => {
                    object.insert(node.name(), Value::Null);
                    seeds.push(UnitSeed {
                        node: node.clone(),
                        query_path,
                        response_path,
                        parent: parent.clone(),
                    });
                }
                Incremental::Stream { .. } => {
                    object.insert(node.name(), Value::Array(Vec::new()));
                    seeds.push(UnitSeed {
                        node: node.clone(),
                        query_path,
                        response_path,
                        parent: parent.clone(),
                    });
                }
            }
        }
        Ok((Value::Object(object), seeds))
    })
}

/// Shape a resolved raw value according to the node's child selection.
fn shape_node<'a>(
    resolvers: &'a Resolvers,
    node: &'a FieldNode,
    raw: Value,
    query_path: &'a Path,
    response_path: &'a Path,
) -> BoxFuture<'a, ScopeResult> {
    Box::pin(async move {
        if node.children().is_empty() || raw.is_null() {
            return Ok((raw, Vec::new()));
        }
        match node.field_type() {
            FieldType::List => {
                let elements = match raw {
                    Value::Array(elements) => elements,
                    _ => {
                        return Err((
                            response_path.clone(),
                            ResolveError::failed("expected a list value"),
                        ));
                    }
                };
                let mut shaped = Vec::with_capacity(elements.len());
                for (index, element) in elements.into_iter().enumerate() {
                    let mut element_path = response_path.clone();
                    element_path.push(PathElement::Index(index));
                    let (value, seeds) = resolve_scope(
                        resolvers,
                        node.children(),
                        &element,
                        query_path,
                        &element_path,
                    )
                    .await?;
                    // validation rejects incremental markers inside plain lists
                    debug_assert!(seeds.is_empty());
                    shaped.push(value);
                }
                Ok((Value::Array(shaped), Vec::new()))
            }
            _ => resolve_scope(resolvers, node.children(), &raw, query_path, response_path).await,
        }
    })
}

async fn resolve_raw(
    resolvers: &Resolvers,
    query_path: &Path,
    name: &str,
    parent: &Value,
    response_path: &Path,
) -> Result<Value, FieldFailure> {
    match resolvers.value(query_path) {
        Some(resolver) => resolver(parent.clone())
            .await
            .map_err(|error| (response_path.clone(), error)),
        None => Ok(field_of(parent, name)),
    }
}

fn field_of(parent: &Value, name: &str) -> Value {
    parent
        .as_object()
        .and_then(|object| object.get(name))
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::spec::FieldNode;

    fn collect(mut stream: ResponseStream) -> BoxFuture<'static, Vec<Response>> {
        Box::pin(async move {
            let mut responses = Vec::new();
            while let Some(response) = stream.next().await {
                responses.push(response);
            }
            responses
        })
    }

    #[tokio::test]
    async fn plain_query_yields_one_response_without_has_next() {
        let document = QueryDocument::new(vec![FieldNode::object(
            "currentUser",
            vec![FieldNode::scalar("id"), FieldNode::scalar("name")],
        )])
        .unwrap();
        let resolvers = Arc::new(Resolvers::new().bind("currentUser", |_| {
            async { Ok(json!({"id": "u1", "name": "Ada", "ignored": true})) }.boxed()
        }));

        let responses = collect(execute(&document, &resolvers).await.unwrap()).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(
            responses[0].data,
            Some(json!({"currentUser": {"id": "u1", "name": "Ada"}}))
        );
        assert_eq!(responses[0].has_next, None);
    }

    #[tokio::test]
    async fn unbound_fields_resolve_from_the_parent_value() {
        let document = QueryDocument::new(vec![FieldNode::object(
            "currentUser",
            vec![FieldNode::scalar("id"), FieldNode::scalar("missing")],
        )])
        .unwrap();
        let resolvers = Arc::new(
            Resolvers::new().bind("currentUser", |_| async { Ok(json!({"id": "u1"})) }.boxed()),
        );

        let responses = collect(execute(&document, &resolvers).await.unwrap()).await;
        assert_eq!(
            responses[0].data,
            Some(json!({"currentUser": {"id": "u1", "missing": null}}))
        );
    }

    #[tokio::test]
    async fn required_field_failure_aborts_before_any_chunk() {
        let document =
            QueryDocument::new(vec![FieldNode::scalar("currentUser")]).unwrap();
        let resolvers = Arc::new(Resolvers::new().bind("currentUser", |_| {
            async { Err(ResolveError::failed("database down")) }.boxed()
        }));

        let err = execute(&document, &resolvers)
            .await
            .map(|_| ())
            .unwrap_err();
        match err {
            ExecutionError::RequiredField { path, .. } => {
                assert_eq!(path, Path::from("currentUser"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn deferred_failure_patches_only_its_own_path() {
        let document = QueryDocument::new(vec![
            FieldNode::scalar("name"),
            FieldNode::object("bill", vec![FieldNode::scalar("amount")]).defer(Some("bill")),
            FieldNode::object("recs", vec![FieldNode::scalar("title")]).defer(Some("recs")),
        ])
        .unwrap();
        let resolvers = Arc::new(
            Resolvers::new()
                .bind("name", |_| async { Ok(json!("Ada")) }.boxed())
                .bind("bill", |_| {
                    async { Err(ResolveError::failed("billing backend down")) }.boxed()
                })
                .bind("recs", |_| async { Ok(json!({"title": "t"})) }.boxed()),
        );

        let responses = collect(execute(&document, &resolvers).await.unwrap()).await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].has_next, Some(true));

        let failed = responses[1..]
            .iter()
            .find(|patch| patch.path == Some(Path::from("bill")))
            .unwrap();
        assert_eq!(failed.data, Some(Value::Null));
        assert_eq!(failed.errors.len(), 1);
        assert_eq!(
            failed.errors[0].extension_code().as_deref(),
            Some("RESOLVER_FAILED")
        );

        let ok = responses[1..]
            .iter()
            .find(|patch| patch.path == Some(Path::from("recs")))
            .unwrap();
        assert_eq!(ok.data, Some(json!({"title": "t"})));
        assert!(responses.last().unwrap().has_next == Some(false));
    }

    #[tokio::test]
    async fn empty_stream_still_terminates_the_execution() {
        let document = QueryDocument::new(vec![
            FieldNode::scalar("name"),
            FieldNode::list("updates", vec![]).stream(None),
        ])
        .unwrap();
        let resolvers = Arc::new(
            Resolvers::new()
                .bind("name", |_| async { Ok(json!("Ada")) }.boxed())
                .bind_stream("updates", |_| stream::empty().boxed()),
        );

        let responses = collect(execute(&document, &resolvers).await.unwrap()).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].has_next, Some(true));
        assert_eq!(responses[1].has_next, Some(false));
        assert_eq!(responses[1].data, None);
        assert!(responses[1].items.is_empty());
    }
}
