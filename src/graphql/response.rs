use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;

use crate::error::ProtocolError;
use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// One delivered unit of a query execution: either the primary response or
/// a subsequent patch.
///
/// The primary response has no `path` and carries the initial payload.
/// Defer patches carry `data` to be merged at `path`; stream patches carry
/// `items` to be appended to the list at `path`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The label that was passed to the defer or stream directive for this patch.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub label: Option<String>,

    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The path that the data should be merged at.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<Path>,

    /// Streamed list items, each tagged with its source index.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub items: Vec<StreamItem>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,

    /// Whether further patches follow. `Some(false)` only on the terminal
    /// patch of an execution; omitted entirely on plain single responses.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub has_next: Option<bool>,
}

/// A single streamed list item.
///
/// `index` is the position the item had in the source sequence. The default
/// merge policy appends in arrival order and only keeps the index for
/// consumers that want to reorder.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    pub index: usize,
    pub value: Value,
}

#[buildstructor::buildstructor]
impl Response {
    /// Constructor
    #[builder(visibility = "pub")]
    fn new(
        label: Option<String>,
        data: Option<Value>,
        path: Option<Path>,
        items: Vec<StreamItem>,
        errors: Vec<Error>,
        extensions: Map<ByteString, Value>,
        has_next: Option<bool>,
    ) -> Self {
        Self {
            label,
            data,
            path,
            items,
            errors,
            extensions,
            has_next,
        }
    }

    /// If path is None, this is a primary response.
    pub fn is_primary(&self) -> bool {
        self.path.is_none()
    }

    /// Whether more chunks follow this one.
    pub fn has_next(&self) -> bool {
        self.has_next.unwrap_or(false)
    }

    /// Create a [`Response`] from the supplied [`Bytes`].
    ///
    /// Rejects chunks that are not JSON objects or that carry no payload at
    /// all, so a malformed chunk surfaces as a protocol error instead of
    /// silently merging garbage.
    pub fn from_bytes(b: Bytes) -> Result<Response, ProtocolError> {
        let value = Value::from_bytes(b).map_err(|error| ProtocolError::MalformedChunk {
            reason: error.to_string(),
        })?;
        if !value.is_object() {
            return Err(ProtocolError::MalformedChunk {
                reason: "expected a JSON object".to_string(),
            });
        }
        let response: Response =
            serde_json_bytes::from_value(value).map_err(|error| ProtocolError::MalformedChunk {
                reason: error.to_string(),
            })?;

        // The GraphQL spec requires that a response without data carries at
        // least one error. The one exception here is the bare terminal
        // chunk `{"hasNext": false}` closing an execution whose last unit
        // produced nothing (an empty stream).
        if response.data.is_none()
            && response.items.is_empty()
            && response.errors.is_empty()
            && response.has_next.is_none()
        {
            return Err(ProtocolError::MalformedChunk {
                reason: "chunk without data must contain at least one error".to_string(),
            });
        }

        Ok(response)
    }
}
