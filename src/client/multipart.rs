//! Incremental parser for the `multipart/mixed` chunk stream.

use bytes::Bytes;
use bytes::BytesMut;

use crate::error::ProtocolError;
use crate::graphql::Response;

const DELIMITER: &[u8] = b"\r\n--graphql";
const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Splits incoming transport bytes into GraphQL responses.
///
/// The decoder is incremental: it can be fed bytes in arbitrary slices and
/// only yields a response once the part is complete, i.e. once the next
/// boundary has arrived. Parsing a malformed part surfaces a
/// [`ProtocolError::MalformedChunk`] and skips past the part, so one bad
/// chunk does not take the whole consumer down. Responses parsed before
/// the bad part are never lost: they are returned first and the error is
/// held back until the next call.
#[derive(Default)]
pub struct MultipartDecoder {
    buffer: BytesMut,
    pending_error: Option<ProtocolError>,
    closed: bool,
}

impl MultipartDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the closing boundary has been seen.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Feed transport bytes, returning every response completed by them.
    pub fn decode(&mut self, bytes: impl AsRef<[u8]>) -> Result<Vec<Response>, ProtocolError> {
        if self.closed {
            return Err(ProtocolError::AlreadyComplete);
        }
        self.buffer.extend_from_slice(bytes.as_ref());
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }

        let mut responses = Vec::new();
        loop {
            let Some(start) = find(&self.buffer, DELIMITER, 0) else {
                break;
            };
            let after = start + DELIMITER.len();

            // "--" after the boundary closes the stream, "\r\n" opens a part.
            if self.buffer.len() < after + 2 {
                break;
            }
            if &self.buffer[after..after + 2] == b"--" {
                self.closed = true;
                self.buffer.clear();
                break;
            }

            let Some(end) = find(&self.buffer, DELIMITER, after) else {
                break;
            };
            let part = self.buffer[after..end].to_vec();
            let _ = self.buffer.split_to(end);

            match part_body(&part).and_then(Response::from_bytes) {
                Ok(response) => responses.push(response),
                Err(error) if responses.is_empty() => return Err(error),
                Err(error) => {
                    // Yield the responses parsed so far; the error surfaces
                    // on the next call, with the buffer already past the
                    // bad part.
                    self.pending_error = Some(error);
                    break;
                }
            }
        }
        Ok(responses)
    }
}

/// Strip the part headers, returning the JSON body.
fn part_body(part: &[u8]) -> Result<Bytes, ProtocolError> {
    let separator = find(part, HEADER_SEPARATOR, 0).ok_or(ProtocolError::MalformedChunk {
        reason: "part has no header separator".to_string(),
    })?;
    Ok(Bytes::copy_from_slice(&part[separator + HEADER_SEPARATOR.len()..]))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| from + position)
}
