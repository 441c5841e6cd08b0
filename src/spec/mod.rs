//! The query document model.
//!
//! A query is a tree of field selections. Selections may be marked
//! deferrable or streamable; everything else is part of the initial
//! payload. The model is purely structural: building a [`QueryDocument`]
//! validates the tree but has no side effects.

use std::collections::HashSet;

use crate::error::SpecError;
use crate::json_ext::Path;
use crate::json_ext::PathElement;

/// The shape a field resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Scalar,
    Object,
    List,
}

/// How a selection is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incremental {
    /// Part of the initial payload.
    Immediate,
    /// Delivered as a later patch, like `@defer(label:)`.
    Defer { label: Option<String> },
    /// List items delivered one at a time, like `@stream(label:)`.
    Stream { label: Option<String> },
}

impl Incremental {
    pub fn label(&self) -> Option<&str> {
        match self {
            Incremental::Immediate => None,
            Incremental::Defer { label } | Incremental::Stream { label } => label.as_deref(),
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Incremental::Immediate)
    }
}

/// A selection in the query tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNode {
    name: String,
    ty: FieldType,
    incremental: Incremental,
    children: Vec<FieldNode>,
}

impl FieldNode {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Scalar,
            incremental: Incremental::Immediate,
            children: Vec::new(),
        }
    }

    pub fn object(name: impl Into<String>, children: Vec<FieldNode>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Object,
            incremental: Incremental::Immediate,
            children,
        }
    }

    /// A list field. `children` is the selection applied to each item; an
    /// empty selection means the items are scalars.
    pub fn list(name: impl Into<String>, children: Vec<FieldNode>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::List,
            incremental: Incremental::Immediate,
            children,
        }
    }

    /// Mark the whole subtree as deferred.
    pub fn defer(mut self, label: Option<&str>) -> Self {
        self.incremental = Incremental::Defer {
            label: label.map(str::to_string),
        };
        self
    }

    /// Mark the list as streamed. Only valid on list fields; enforced when
    /// the document is built.
    pub fn stream(mut self, label: Option<&str>) -> Self {
        self.incremental = Incremental::Stream {
            label: label.map(str::to_string),
        };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.ty
    }

    pub fn incremental(&self) -> &Incremental {
        &self.incremental
    }

    pub fn children(&self) -> &[FieldNode] {
        &self.children
    }
}

/// A node paired with its position in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo<'a> {
    pub node: &'a FieldNode,
    /// The index-free query path of the node, used as the resolver binding key.
    pub path: Path,
    /// Whether an ancestor of the node is deferred or streamed.
    pub inside_incremental: bool,
}

/// A validated query document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDocument {
    roots: Vec<FieldNode>,
}

impl QueryDocument {
    pub fn new(roots: Vec<FieldNode>) -> Result<Self, SpecError> {
        validate_selection(&roots, false)?;
        Ok(Self { roots })
    }

    pub fn roots(&self) -> &[FieldNode] {
        &self.roots
    }

    /// All nodes in preorder, with their query paths.
    pub fn nodes(&self) -> Vec<NodeInfo<'_>> {
        let mut out = Vec::new();
        collect_nodes(&self.roots, &Path::empty(), false, &mut out);
        out
    }
}

fn collect_nodes<'a>(
    nodes: &'a [FieldNode],
    prefix: &Path,
    inside_incremental: bool,
    out: &mut Vec<NodeInfo<'a>>,
) {
    for node in nodes {
        let path = {
            let mut path = prefix.clone();
            path.push(PathElement::Key(node.name.clone()));
            path
        };
        let child_incremental = inside_incremental || !node.incremental.is_immediate();
        collect_nodes(&node.children, &path, child_incremental, out);
        out.push(NodeInfo {
            node,
            path,
            inside_incremental,
        });
    }
}

fn validate_selection(nodes: &[FieldNode], inside_list: bool) -> Result<(), SpecError> {
    let mut names = HashSet::new();
    let mut labels = HashSet::new();
    for node in nodes {
        if !names.insert(node.name.as_str()) {
            return Err(SpecError::DuplicateField {
                field: node.name.clone(),
            });
        }
        if let Some(label) = node.incremental.label() {
            if !labels.insert(label) {
                return Err(SpecError::DuplicateLabel {
                    label: label.to_string(),
                });
            }
        }
        match &node.incremental {
            Incremental::Stream { .. } if node.ty != FieldType::List => {
                return Err(SpecError::StreamOnNonList {
                    field: node.name.clone(),
                });
            }
            Incremental::Immediate => {}
            _ if inside_list => {
                return Err(SpecError::IncrementalInsideList {
                    field: node.name.clone(),
                });
            }
            _ => {}
        }

        // A streamed list scopes its items individually, so incremental
        // markers below it get a stable per-item patch address. A plain
        // list does not.
        let child_inside_list = match (&node.ty, &node.incremental) {
            (FieldType::List, Incremental::Stream { .. }) => false,
            (FieldType::List, _) => true,
            _ => inside_list,
        };
        validate_selection(&node.children, child_inside_list)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_query() -> Vec<FieldNode> {
        vec![FieldNode::object(
            "currentUser",
            vec![
                FieldNode::scalar("id"),
                FieldNode::scalar("name"),
                FieldNode::object(
                    "billInformation",
                    vec![FieldNode::scalar("amount"), FieldNode::scalar("dueDate")],
                )
                .defer(Some("billInformation")),
                FieldNode::list("accountUpdates", vec![FieldNode::scalar("message")])
                    .stream(Some("accountUpdates")),
            ],
        )]
    }

    #[test]
    fn builds_a_valid_document() {
        let document = QueryDocument::new(user_query()).unwrap();
        let nodes = document.nodes();
        let bill = nodes
            .iter()
            .find(|info| info.path == Path::from("currentUser/billInformation"))
            .unwrap();
        assert!(!bill.inside_incremental);
        assert_eq!(bill.node.incremental().label(), Some("billInformation"));

        let amount = nodes
            .iter()
            .find(|info| info.path == Path::from("currentUser/billInformation/amount"))
            .unwrap();
        assert!(amount.inside_incremental);
    }

    #[test]
    fn rejects_stream_on_non_list() {
        let err = QueryDocument::new(vec![
            FieldNode::object("user", vec![FieldNode::scalar("id")]).stream(None),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            SpecError::StreamOnNonList {
                field: "user".to_string()
            }
        );
    }

    #[test]
    fn rejects_duplicate_sibling_labels() {
        let err = QueryDocument::new(vec![
            FieldNode::object("a", vec![FieldNode::scalar("x")]).defer(Some("part")),
            FieldNode::object("b", vec![FieldNode::scalar("y")]).defer(Some("part")),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            SpecError::DuplicateLabel {
                label: "part".to_string()
            }
        );
    }

    #[test]
    fn rejects_duplicate_sibling_fields() {
        let err = QueryDocument::new(vec![FieldNode::scalar("a"), FieldNode::scalar("a")])
            .unwrap_err();
        assert_eq!(
            err,
            SpecError::DuplicateField {
                field: "a".to_string()
            }
        );
    }

    #[test]
    fn rejects_incremental_markers_inside_plain_lists() {
        let err = QueryDocument::new(vec![FieldNode::list(
            "products",
            vec![
                FieldNode::scalar("id"),
                FieldNode::object("details", vec![FieldNode::scalar("specs")]).defer(None),
            ],
        )])
        .unwrap_err();
        assert_eq!(
            err,
            SpecError::IncrementalInsideList {
                field: "details".to_string()
            }
        );
    }

    #[test]
    fn allows_incremental_markers_under_streamed_items() {
        let document = QueryDocument::new(vec![FieldNode::list(
            "promotions",
            vec![
                FieldNode::scalar("title"),
                FieldNode::object("details", vec![FieldNode::scalar("terms")]).defer(None),
            ],
        )
        .stream(None)])
        .unwrap();
        assert_eq!(document.roots().len(), 1);
    }
}
